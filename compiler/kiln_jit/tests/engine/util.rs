//! Unit builders and native call helpers.

use inkwell::context::Context;
use inkwell::types::BasicMetadataTypeEnum;
use inkwell::values::BasicMetadataValueEnum;
use kiln_jit::engine::{EngineConfig, ExecutorSymbolDef, JitEngine, ThreadSafeUnit};

pub fn engine() -> JitEngine {
    kiln_jit::init_tracing();
    JitEngine::with_config(EngineConfig::default().with_compile_threads(2))
        .expect("host is supported")
}

/// `i64 name() { return value; }`
pub fn constant_unit(unit: &str, name: &str, value: i64) -> ThreadSafeUnit {
    let context = Context::create();
    let module = context.create_module(unit);
    let i64_ty = context.i64_type();
    let function = module.add_function(name, i64_ty.fn_type(&[], false), None);
    let builder = context.create_builder();
    builder.position_at_end(context.append_basic_block(function, "entry"));
    builder
        .build_return(Some(&i64_ty.const_int(value as u64, true)))
        .unwrap();
    ThreadSafeUnit::from_module(&module)
}

/// `i64 name() { return callee(args...); }` with `callee` left external.
pub fn calling_unit(unit: &str, name: &str, callee: &str, args: &[i64]) -> ThreadSafeUnit {
    let context = Context::create();
    let module = context.create_module(unit);
    let i64_ty = context.i64_type();

    let params: Vec<BasicMetadataTypeEnum> = args.iter().map(|_| i64_ty.into()).collect();
    let external = module.add_function(callee, i64_ty.fn_type(&params, false), None);
    let function = module.add_function(name, i64_ty.fn_type(&[], false), None);

    let builder = context.create_builder();
    builder.position_at_end(context.append_basic_block(function, "entry"));
    let args: Vec<BasicMetadataValueEnum> = args
        .iter()
        .map(|&a| i64_ty.const_int(a as u64, true).into())
        .collect();
    let result = builder
        .build_call(external, &args, "result")
        .unwrap()
        .try_as_basic_value()
        .basic()
        .unwrap();
    builder.build_return(Some(&result)).unwrap();
    ThreadSafeUnit::from_module(&module)
}

/// Call a resolved `i64 ()` function.
pub fn call_i64(def: ExecutorSymbolDef) -> i64 {
    assert!(!def.address.is_null());
    let f: extern "C" fn() -> i64 = unsafe { std::mem::transmute(def.address.as_ptr::<()>()) };
    f()
}
