//! Utility types shared across the crate.
//!
//! - [`Error`] / [`Result`] / [`BakeResult`] - error handling and outcome reporting
//! - Math type re-exports from glam

mod error;
mod math;

pub use error::*;
pub use math::*;
