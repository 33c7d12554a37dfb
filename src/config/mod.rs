//! Configuration module for nccl-autoconf
//!
//! Provides CLI arguments, probe locations and NCCL tuning constants.

mod settings;

pub use settings::*;
