//! Host topology detection module
//!
//! Probes GPUs, NUMA affinity, RDMA devices, GPUDirect support and CPU
//! count, and produces an immutable [`HostTopology`] snapshot.

mod detector;
mod probe;
mod topology;

pub use detector::*;
pub use probe::{count_cpu_list, matches_indexed, natural_key, CommandOutput, HostProbe, Probe};
pub use topology::*;

#[cfg(test)]
pub(crate) use probe::fake;
