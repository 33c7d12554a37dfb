//! # nccl-autoconf - NCCL environment auto-detection for GPU hosts
//!
//! nccl-autoconf probes a GPU training host once and writes the NCCL
//! environment that PyTorch, DeepSpeed and other NCCL users source before
//! they start.
//!
//! ## Features
//!
//! - **GPU Detection**: GPU count, per-GPU NUMA node, NVLink vs PCIe-only
//! - **RDMA Detection**: Working verbs devices only, with their network
//!   interfaces and RoCE v2 GID index
//! - **GPUDirect**: Peer-memory kernel module presence
//! - **Override Precedence**: Values the operator already set always win
//! - **Atomic Output**: The environment file is either fully written or untouched
//! - **Detection Report**: JSON record of which fields fell back to defaults
//!
//! ## Quick Start
//!
//! ```no_run
//! use nccl_autoconf::config::AutoconfConfig;
//! use nccl_autoconf::core::AutoconfEngine;
//!
//! let result = AutoconfEngine::new(AutoconfConfig::default()).execute().unwrap();
//! result.print_summary();
//! ```
//!
//! ## Stage by Stage
//!
//! ```no_run
//! use nccl_autoconf::config::{NcclTuning, ProbeConfig};
//! use nccl_autoconf::nccl::{NcclConfigDeriver, Overrides};
//! use nccl_autoconf::output::ConfigWriter;
//! use nccl_autoconf::system::TopologyDetector;
//! use std::path::Path;
//!
//! let report = TopologyDetector::for_host(ProbeConfig::default()).detect().unwrap();
//!
//! let mut overrides = Overrides::from_env();
//! overrides.insert("OMP_NUM_THREADS", "8");
//!
//! let config = NcclConfigDeriver::new(NcclTuning::default())
//!     .derive(&report.topology, &overrides);
//!
//! ConfigWriter::default()
//!     .write(&config, Path::new("/tmp/nccl-env.sh"))
//!     .unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod error;
pub mod nccl;
pub mod output;
pub mod system;

// Re-export commonly used types
pub use crate::config::{AutoconfConfig, NcclTuning, ProbeConfig};
pub use crate::core::{AutoconfEngine, AutoconfResult};
pub use crate::error::{AutoconfError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use nccl_autoconf::prelude::*;
    //! ```

    pub use crate::config::{AutoconfConfig, NcclTuning, ProbeConfig};
    pub use crate::core::{AutoconfEngine, AutoconfResult};
    pub use crate::error::{AutoconfError, Result};
    pub use crate::nccl::{DerivedConfig, NcclConfigDeriver, NcclVar, Overrides};
    pub use crate::output::{read_artifact, ConfigWriter};
    pub use crate::system::{DetectionReport, HostTopology, RdmaDevice, TopologyDetector, Transport};
}
