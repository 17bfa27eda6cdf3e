//! Utilities for memory-efficient data structures.
//!
//! This module provides low-level utilities used internally by the crate.
//! In particular, it exposes a [`Slab`] store used by timer buckets for
//! constant-time removal of cancelled entries, and deadline arithmetic that
//! never overflows an [`Instant`](std::time::Instant).

mod slab;
mod time;

pub(crate) use slab::Slab;
pub(crate) use time::{after, deadline};
