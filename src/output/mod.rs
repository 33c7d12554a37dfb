//! Output module
//!
//! Serializes the derived configuration to the sourceable environment file
//! and the detection report to JSON.

mod report;
mod writer;

pub use report::*;
pub use writer::*;
