//! Utilities for memory-efficient data structures.
//!
//! This module provides low-level utilities used internally by the runtime.
//! In particular, it exposes a generation-checked [`Slab`] used as the
//! fiber arena: every scheduler table refers to fibers by [`Key`], never
//! by pointer, so a stale reference is detectable.

mod slab;

pub(crate) use slab::{Key, Slab};
