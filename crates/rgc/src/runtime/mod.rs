//! Runtime Module - Mutator Thread Integration
//!
//! The region space only needs to know which threads allocate through a
//! TLAB, so it can revoke their buffers before a collection.

pub mod thread;

pub use thread::{MutatorId, MutatorThread, ThreadRegistry};
