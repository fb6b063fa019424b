//! Util Module - Shared Utilities
//!
//! Utilities and helper functions used throughout RGC.

pub mod alignment;
pub mod debug;

pub use alignment::Alignment;
pub use debug::{format_address, pretty_size};
