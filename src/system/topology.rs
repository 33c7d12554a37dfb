//! Host topology snapshot
//!
//! The result of one detection pass. Created fresh per invocation and never
//! mutated afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inter-node transport NCCL should use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// InfiniBand / RoCE verbs
    Rdma,
    /// Plain sockets
    Tcp,
}

impl Transport {
    /// RDMA iff at least one working device was found
    pub fn from_devices(devices: &[RdmaDevice]) -> Self {
        if devices.is_empty() {
            Transport::Tcp
        } else {
            Transport::Rdma
        }
    }

    /// Whether NCCL's IB transport must be disabled
    pub fn disables_ib(&self) -> bool {
        matches!(self, Transport::Tcp)
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Rdma => f.write_str("RDMA"),
            Transport::Tcp => f.write_str("TCP"),
        }
    }
}

/// A working RDMA device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RdmaDevice {
    /// Device name, e.g. `mlx5_6`
    pub name: String,
    /// NUMA node, `None` when unknown
    pub numa_node: Option<u32>,
    /// OS network interface, `None` when unresolved
    pub network_interface: Option<String>,
    /// First RoCE v2 GID table index, `None` when unset
    pub roce_gid_index: Option<u32>,
    /// Passed the verb-interface check
    pub is_working: bool,
}

impl RdmaDevice {
    /// Create a working device with nothing resolved yet
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            numa_node: None,
            network_interface: None,
            roce_gid_index: None,
            is_working: true,
        }
    }

    /// Set the NUMA node
    pub fn with_numa_node(mut self, node: u32) -> Self {
        self.numa_node = Some(node);
        self
    }

    /// Set the network interface
    pub fn with_interface(mut self, name: impl Into<String>) -> Self {
        self.network_interface = Some(name.into());
        self
    }

    /// Set the RoCE v2 GID index
    pub fn with_gid_index(mut self, index: u32) -> Self {
        self.roce_gid_index = Some(index);
        self
    }
}

/// Immutable snapshot of one host probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostTopology {
    /// Number of visible GPUs
    pub gpu_count: usize,
    /// NUMA node per GPU index, `None` when unknown
    pub gpu_numa_nodes: Vec<Option<u32>>,
    /// Any GPU pair is connected through NVLink
    pub nvlink_present: bool,
    /// Working RDMA devices in discovery order
    pub rdma_devices: Vec<RdmaDevice>,
    /// Logical CPUs
    pub cpu_count: usize,
    /// GPUDirect RDMA peer-memory module is loaded
    pub gpudirect_supported: bool,
    /// Derived from `rdma_devices`
    pub transport: Transport,
}

impl HostTopology {
    /// Assemble a topology
    ///
    /// Non-working devices are dropped and names are deduplicated keeping
    /// the first occurrence; `transport` follows from what remains.
    pub fn new(
        gpu_count: usize,
        gpu_numa_nodes: Vec<Option<u32>>,
        nvlink_present: bool,
        rdma_devices: Vec<RdmaDevice>,
        cpu_count: usize,
        gpudirect_supported: bool,
    ) -> Self {
        let mut devices: Vec<RdmaDevice> = Vec::with_capacity(rdma_devices.len());
        for device in rdma_devices {
            if device.is_working && !devices.iter().any(|d| d.name == device.name) {
                devices.push(device);
            }
        }
        let transport = Transport::from_devices(&devices);

        Self {
            gpu_count,
            gpu_numa_nodes,
            nvlink_present,
            rdma_devices: devices,
            cpu_count: cpu_count.max(1),
            gpudirect_supported,
            transport,
        }
    }

    /// Print topology summary
    pub fn print_summary(&self) {
        println!("=== Host Topology ===");
        println!("GPUs:       {}", self.gpu_count);
        for (i, node) in self.gpu_numa_nodes.iter().enumerate() {
            println!("  GPU {}: NUMA {}", i, numa_label(*node));
        }
        println!("NVLink:     {}", if self.nvlink_present { "yes" } else { "no" });
        println!("GPUDirect:  {}", if self.gpudirect_supported { "yes" } else { "no" });
        println!("CPUs:       {}", self.cpu_count);
        println!("Transport:  {}", self.transport);
        if !self.rdma_devices.is_empty() {
            println!("RDMA devices:");
            for dev in &self.rdma_devices {
                println!(
                    "  {:<10} NUMA {:<8} iface {:<8} GID {}",
                    dev.name,
                    numa_label(dev.numa_node),
                    dev.network_interface.as_deref().unwrap_or("-"),
                    dev.roce_gid_index
                        .map(|i| i.to_string())
                        .unwrap_or_else(|| "unset".to_string())
                );
            }
        }
    }
}

/// Render a NUMA node, "unknown" for `None`
pub fn numa_label(node: Option<u32>) -> String {
    node.map(|n| n.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// A topology field that fell back to its safe default
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedField {
    /// Field path, e.g. `gpu_numa_node[2]` or `rdma_devices[mlx5_6].network_interface`
    pub field: String,
    /// Why the probe could not determine it
    pub reason: String,
}

/// Topology plus provenance, as reported to operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionReport {
    /// Host the probe ran on
    pub hostname: String,
    /// When the probe finished
    pub detected_at: DateTime<Utc>,
    /// Detected topology
    pub topology: HostTopology,
    /// Fields that fell back to defaults
    pub degraded: Vec<DegradedField>,
}

impl DetectionReport {
    /// Wrap a topology, stamping hostname and time
    pub fn new(topology: HostTopology, degraded: Vec<DegradedField>) -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_default();

        Self {
            hostname,
            detected_at: Utc::now(),
            topology,
            degraded,
        }
    }

    /// Everything was detected without fallbacks
    pub fn is_complete(&self) -> bool {
        self.degraded.is_empty()
    }
}
