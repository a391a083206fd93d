//! LLVM Backend and JIT for Kiln
//!
//! Lowers [`kiln_expr::Expression`] trees to LLVM IR and runs them in the
//! process that compiled them.
//!
//! # Debug Environment Variables
//!
//! - `KILN_DEBUG_IR`: Print each unit's IR to stderr before submission.
//!   Any non-empty value enables this.
//!   Example: `KILN_DEBUG_IR=1 cargo test`
//!
//! - `KILN_JIT_THREADS`: Number of compile worker threads (default: one per
//!   available core).
//!
//! - `RUST_LOG=kiln_jit=debug`: Enable debug-level tracing output.
//!
//! - `RUST_LOG=kiln_jit::codegen=trace`: Trace expression lowering step by
//!   step.
//!
//! # Layout
//!
//! - `pipeline.rs` lowers one top-level expression per unit, optimizes it
//!   and hands it to the engine.
//! - `context.rs` holds the LLVM context (`IrContext`) and the per-unit
//!   module with its function table (`CodegenCx`).
//! - `declare.rs` and `codegen/` do the lowering: lambdas are declared
//!   first, then bodies are emitted through `builder.rs`.
//! - `engine/` is the execution session: dylibs, trackers, and the compile
//!   and linking layers.
//! - `native.rs` calls compiled entries through their `$invoke` adapters.
//!
//! Casts between slot bits and LLVM widths are pervasive, so the cast
//! lints are off crate-wide. Builder panics mark broken invariants and are
//! not documented per function.
//!
//! # Example
//!
//! ```ignore
//! use kiln_expr::Expression;
//! use kiln_jit::{JitPipeline, Value};
//!
//! let mut pipeline = JitPipeline::create()?;
//! let sum = Expression::apply(
//!     Expression::primitive("add_i64").unwrap(),
//!     vec![Expression::i64(40), Expression::i64(2)],
//! );
//! let f = pipeline.codegen_toplevel(&sum)?;
//! assert_eq!(unsafe { f.call(&[]) }?, Value::I64(42));
//! ```

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

pub mod activation;
pub mod builder;
pub mod codegen;
pub mod context;
pub mod declare;
pub mod engine;
pub mod error;
pub mod native;
pub mod passes;
pub mod pipeline;
pub mod target;

#[cfg(test)]
mod tests;

use std::sync::Once;

pub use engine::{
    EngineConfig, EngineError, ExecutorAddr, ExecutorSymbolDef, JitEngine, JitSymbolFlags,
    ResourceTracker, ThreadSafeUnit,
};
pub use error::{CodegenError, PipelineError};
pub use native::{InvokeError, NativeFn, Value};
pub use passes::{OptimizationConfig, OptimizationLevel};
pub use pipeline::{JitPipeline, PipelineConfig};

/// Install a tracing subscriber driven by `RUST_LOG`.
///
/// Does nothing unless `RUST_LOG` is set; safe to call repeatedly.
pub fn init_tracing() {
    static INSTALLED: Once = Once::new();
    INSTALLED.call_once(|| {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::{fmt, EnvFilter};

        let Ok(filter) = EnvFilter::try_from_default_env() else {
            return;
        };
        let _ = tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_names(true))
            .with(filter)
            .try_init();
    });
}
