//! Stack growth for deep recursion.
//!
//! Expression trees are walked recursively when they are typed, printed,
//! collected and lowered. Nesting is controlled by whoever builds the tree,
//! so every recursive step goes through [`ensure_sufficient_stack`], which
//! moves onto a fresh heap-allocated segment when the current one runs low.
//!
//! On `wasm32` the closure is called directly.

/// Grow when less than this much stack remains (128KB).
const RED_ZONE: usize = 128 * 1024;

/// Size of each new stack segment (1MB).
const SEGMENT_SIZE: usize = 1024 * 1024;

/// Run `f`, switching to a new stack segment first if the current one is
/// within [`RED_ZONE`] of its end.
#[inline]
#[cfg(not(target_arch = "wasm32"))]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, SEGMENT_SIZE, f)
}

#[inline]
#[cfg(target_arch = "wasm32")]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    f()
}
