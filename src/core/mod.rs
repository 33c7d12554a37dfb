//! Core engine module
//!
//! Orchestrates one detect → derive → write pass.

mod engine;

pub use engine::*;
