//! End-to-end tests: lower, submit, and call.

mod constant_tests;
mod control_flow_tests;
mod primitive_tests;

pub mod helper {
    use kiln_expr::{Expression, Param, TypeDescr};

    use crate::engine::EngineConfig;
    use crate::error::{CodegenError, PipelineError};
    use crate::native::Value;
    use crate::pipeline::{JitPipeline, PipelineConfig};

    /// A pipeline with a small worker pool.
    pub fn pipeline() -> JitPipeline {
        crate::init_tracing();
        let config = PipelineConfig::default()
            .with_engine(EngineConfig::default().with_compile_threads(2));
        JitPipeline::with_config(config).expect("host is supported")
    }

    /// Lower `expr` in `pipeline` and call its entry with no arguments.
    pub fn run_in(pipeline: &mut JitPipeline, expr: &Expression) -> Value {
        let f = pipeline
            .codegen_toplevel(expr)
            .unwrap_or_else(|e| panic!("codegen failed: {e}"));
        unsafe { f.call(&[]) }.expect("entry takes no arguments")
    }

    /// Lower `expr` in a fresh pipeline and call it.
    pub fn run(expr: &Expression) -> Value {
        run_in(&mut pipeline(), expr)
    }

    /// Lower `expr` in `pipeline`, expecting a codegen error.
    pub fn codegen_error_in(pipeline: &mut JitPipeline, expr: &Expression) -> CodegenError {
        match pipeline.codegen_toplevel(expr) {
            Err(PipelineError::Codegen { source, .. }) => source,
            Err(other) => panic!("expected a codegen error, got {other}"),
            Ok(f) => panic!("expected a codegen error, got {f}"),
        }
    }

    pub fn codegen_error(expr: &Expression) -> CodegenError {
        codegen_error_in(&mut pipeline(), expr)
    }

    pub fn prim(name: &str) -> Expression {
        Expression::primitive(name).unwrap_or_else(|| panic!("no primitive {name}"))
    }

    /// `(prim a b)`
    pub fn binary(name: &str, a: Expression, b: Expression) -> Expression {
        Expression::apply(prim(name), vec![a, b])
    }

    pub fn var_i64(name: &str) -> Expression {
        Expression::var(name, TypeDescr::I64)
    }

    pub fn fn_i64_to_i64() -> TypeDescr {
        TypeDescr::function(vec![TypeDescr::I64], TypeDescr::I64)
    }

    /// A one-parameter `i64 -> i64` lambda over `x`.
    pub fn lambda_i64(name: &str, body: Expression) -> Expression {
        Expression::lambda(name, vec![Param::new("x", TypeDescr::I64)], TypeDescr::I64, body)
    }
}
