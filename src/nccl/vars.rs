//! NCCL environment variable catalogue
//!
//! The names here are the contract with the training processes that source
//! the generated file. Each variable has an environment name and a short
//! logical key; overrides may use either.

use serde::{Deserialize, Serialize};

/// Sentinel for a variable with no detected value
pub const UNSET: &str = "unset";

/// A derived environment variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NcclVar {
    /// GPUs on this host
    GpuCount,
    /// Peer-to-peer level (NVLink vs PCIe)
    P2pLevel,
    /// Working RDMA devices
    IbHca,
    /// Network interfaces, aligned with `IbHca`
    SocketIfname,
    /// RoCE v2 GID index
    IbGidIndex,
    /// IB retry timeout exponent
    IbTimeout,
    /// Allow rings/trees to cross NICs
    CrossNic,
    /// Minimum channel count
    MinNchannels,
    /// GPUDirect RDMA level
    GdrLevel,
    /// OpenMP threads per rank
    OmpThreads,
    /// Disable the IB transport
    IbDisable,
    /// NCCL log level
    Debug,
}

impl NcclVar {
    /// Every variable, in derivation order
    pub const ALL: [NcclVar; 12] = [
        NcclVar::GpuCount,
        NcclVar::P2pLevel,
        NcclVar::IbHca,
        NcclVar::SocketIfname,
        NcclVar::IbGidIndex,
        NcclVar::IbTimeout,
        NcclVar::CrossNic,
        NcclVar::MinNchannels,
        NcclVar::GdrLevel,
        NcclVar::OmpThreads,
        NcclVar::IbDisable,
        NcclVar::Debug,
    ];

    /// Name written to the environment file
    pub fn env_name(&self) -> &'static str {
        match self {
            NcclVar::GpuCount => "GPUS_PER_NODE",
            NcclVar::IbHca => "NCCL_IB_HCA",
            NcclVar::SocketIfname => "NCCL_SOCKET_IFNAME",
            NcclVar::IbGidIndex => "NCCL_IB_GID_INDEX",
            NcclVar::IbTimeout => "NCCL_IB_TIMEOUT",
            NcclVar::CrossNic => "NCCL_CROSS_NIC",
            NcclVar::MinNchannels => "NCCL_MIN_NCHANNELS",
            NcclVar::GdrLevel => "NCCL_NET_GDR_LEVEL",
            NcclVar::P2pLevel => "NCCL_P2P_LEVEL",
            NcclVar::OmpThreads => "OMP_NUM_THREADS",
            NcclVar::IbDisable => "NCCL_IB_DISABLE",
            NcclVar::Debug => "NCCL_DEBUG",
        }
    }

    /// Short logical key
    pub fn key(&self) -> &'static str {
        match self {
            NcclVar::GpuCount => "gpu_count",
            NcclVar::IbHca => "ib_hca",
            NcclVar::SocketIfname => "socket_ifname",
            NcclVar::IbGidIndex => "ib_gid_index",
            NcclVar::IbTimeout => "ib_timeout",
            NcclVar::CrossNic => "cross_nic",
            NcclVar::MinNchannels => "min_nchannels",
            NcclVar::GdrLevel => "gdr_level",
            NcclVar::P2pLevel => "p2p_level",
            NcclVar::OmpThreads => "omp_threads",
            NcclVar::IbDisable => "ib_disable",
            NcclVar::Debug => "debug",
        }
    }

    /// Look up by environment name or logical key
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.env_name() == name || v.key() == name)
    }
}

impl std::fmt::Display for NcclVar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.env_name())
    }
}
