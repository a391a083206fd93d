//! Execution Engine Test Modules
//!
//! Units are built directly with inkwell, each in a context of its own, so
//! these tests exercise the engine without the expression pipeline.

pub mod concurrency;
pub mod lifecycle;
pub mod linking;

pub mod util;
