//! GPU / RDMA topology detection
//!
//! Probes the host through a [`Probe`] and assembles a [`HostTopology`].
//! Individual probe failures degrade one field to its safe default and are
//! recorded; only an undeterminable CPU or GPU count aborts detection.

use super::probe::{count_cpu_list, matches_indexed, natural_key, HostProbe, Probe};
use super::topology::{DegradedField, DetectionReport, HostTopology, RdmaDevice, Transport};
use crate::config::ProbeConfig;
use crate::error::{AutoconfError, Result};
use std::io;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Collects fields that fell back to defaults during one pass
#[derive(Debug, Default)]
pub struct Degradations {
    fields: Vec<DegradedField>,
}

impl Degradations {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record and log a degraded field
    pub fn note(&mut self, field: impl Into<String>, reason: impl Into<String>) {
        let field = field.into();
        let reason = reason.into();
        warn!(field = %field, reason = %reason, "probe degraded");
        self.fields.push(DegradedField { field, reason });
    }

    /// Recorded fields
    pub fn fields(&self) -> &[DegradedField] {
        &self.fields
    }

    /// Consume into the recorded fields
    pub fn into_fields(self) -> Vec<DegradedField> {
        self.fields
    }
}

/// GPU portion of the topology
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuInventory {
    /// Number of GPUs
    pub count: usize,
    /// NUMA node per GPU index
    pub numa_nodes: Vec<Option<u32>>,
    /// Any NVLink connection between GPUs
    pub nvlink_present: bool,
}

/// Ways of resolving the network interface behind an RDMA device, tried in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceStrategy {
    /// Device netdev named `net<N>` (Multus secondary networks)
    NetPattern,
    /// Device netdev named `ib<N>` (IPoIB)
    IbPattern,
    /// Mapping printed by the `ibdev2netdev` tool
    Ibdev2netdev,
}

impl InterfaceStrategy {
    /// All strategies in the order they are tried
    pub const ORDER: [InterfaceStrategy; 3] = [
        InterfaceStrategy::NetPattern,
        InterfaceStrategy::IbPattern,
        InterfaceStrategy::Ibdev2netdev,
    ];

    /// Strategy name for logs
    pub fn name(&self) -> &'static str {
        match self {
            InterfaceStrategy::NetPattern => "net-pattern",
            InterfaceStrategy::IbPattern => "ib-pattern",
            InterfaceStrategy::Ibdev2netdev => "ibdev2netdev",
        }
    }
}

/// Topology detector
pub struct TopologyDetector<P: Probe = HostProbe> {
    probe: P,
    config: ProbeConfig,
}

impl TopologyDetector<HostProbe> {
    /// Detector for the local host
    pub fn for_host(config: ProbeConfig) -> Self {
        Self::new(HostProbe::new(), config)
    }
}

impl<P: Probe> TopologyDetector<P> {
    /// Create a detector over an arbitrary probe
    pub fn new(probe: P, config: ProbeConfig) -> Self {
        Self { probe, config }
    }

    /// Run a full detection pass
    pub fn detect(&self) -> Result<DetectionReport> {
        let mut degraded = Degradations::new();

        let cpu_count = self.detect_cpu_count()?;
        let gpus = self.detect_gpus(&mut degraded)?;
        let rdma_devices = self.detect_rdma_devices(&mut degraded);
        let gpudirect = self.detect_gpudirect(&mut degraded);

        let topology = HostTopology::new(
            gpus.count,
            gpus.numa_nodes,
            gpus.nvlink_present,
            rdma_devices,
            cpu_count,
            gpudirect,
        );

        info!(
            gpus = topology.gpu_count,
            cpus = topology.cpu_count,
            rdma_devices = topology.rdma_devices.len(),
            nvlink = topology.nvlink_present,
            gpudirect = topology.gpudirect_supported,
            transport = %topology.transport,
            degraded = degraded.fields().len(),
            "topology detected"
        );

        Ok(DetectionReport::new(topology, degraded.into_fields()))
    }

    /// Logical CPU count, from sysfs `cpu/online` or the OS
    pub fn detect_cpu_count(&self) -> Result<usize> {
        let online = self.sys_path("devices/system/cpu/online");
        match self.probe.read_to_string(&online) {
            Ok(content) => match count_cpu_list(&content) {
                Some(count) if count > 0 => {
                    debug!(count, "cpu count from sysfs");
                    return Ok(count);
                }
                _ => debug!(path = %online.display(), "unusable online cpu list"),
            },
            Err(e) => debug!(path = %online.display(), error = %e, "online cpu list unavailable"),
        }

        self.probe
            .logical_cpus()
            .filter(|&n| n > 0)
            .ok_or_else(|| {
                AutoconfError::detection_failed("cpu_count", "no online cpu list and no OS cpu count")
            })
    }

    /// GPU count, per-GPU NUMA node and NVLink presence
    pub fn detect_gpus(&self, degraded: &mut Degradations) -> Result<GpuInventory> {
        let bus_ids = self.enumerate_gpus()?;
        let count = bus_ids.len();

        let numa_nodes = bus_ids
            .iter()
            .enumerate()
            .map(|(i, bus_id)| self.gpu_numa_node(i, bus_id.as_deref(), degraded))
            .collect();

        let nvlink_present = if count < 2 {
            false
        } else {
            self.detect_nvlink(degraded)
        };

        debug!(count, nvlink_present, "gpus detected");

        Ok(GpuInventory {
            count,
            numa_nodes,
            nvlink_present,
        })
    }

    /// Working RDMA devices in discovery order
    pub fn detect_rdma_devices(&self, degraded: &mut Degradations) -> Vec<RdmaDevice> {
        let class_dir = self.sys_path("class/infiniband");
        let mut names = match self.probe.list_dir(&class_dir) {
            Ok(names) => names,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %class_dir.display(), "no RDMA subsystem");
                return Vec::new();
            }
            Err(e) => {
                degraded.note("rdma_devices", format!("cannot list {}: {}", class_dir.display(), e));
                return Vec::new();
            }
        };
        names.sort_by_key(|n| natural_key(n));
        names.dedup();

        let mut ibdev2netdev: Option<Option<String>> = None;
        let mut devices = Vec::new();

        for name in names {
            if !self.is_working_device(&name, degraded) {
                debug!(device = %name, "excluding device without working verbs interface");
                continue;
            }

            let mut device = RdmaDevice::new(name.clone());
            device.numa_node = self.read_numa_node(
                self.sys_path(format!("class/infiniband/{}/device/numa_node", name)),
                &format!("rdma_devices[{}].numa_node", name),
                degraded,
            );
            device.network_interface = self.resolve_interface(&name, &mut ibdev2netdev, degraded);
            device.roce_gid_index = self.find_roce_v2_gid(&name, degraded);

            debug!(
                device = %device.name,
                numa = ?device.numa_node,
                iface = ?device.network_interface,
                gid = ?device.roce_gid_index,
                "rdma device"
            );
            devices.push(device);
        }

        devices
    }

    /// True iff a GPUDirect peer-memory module is loaded
    pub fn detect_gpudirect(&self, degraded: &mut Degradations) -> bool {
        let modules_path = self.proc_path("modules");
        match self.probe.read_to_string(&modules_path) {
            Ok(content) => content
                .lines()
                .filter_map(|line| line.split_whitespace().next())
                .any(|module| self.config.peer_memory_modules.iter().any(|m| m == module)),
            Err(e) => {
                let loaded = self
                    .config
                    .peer_memory_modules
                    .iter()
                    .any(|m| self.probe.exists(&self.sys_path(format!("module/{}", m))));
                if !loaded {
                    degraded.note(
                        "gpudirect_supported",
                        format!("cannot read {}: {}", modules_path.display(), e),
                    );
                }
                loaded
            }
        }
    }

    /// Transport implied by an already-detected device list
    pub fn detect_transport(devices: &[RdmaDevice]) -> Transport {
        Transport::from_devices(devices)
    }

    /// PCI bus id per GPU, `None` where the id is unknown
    fn enumerate_gpus(&self) -> Result<Vec<Option<String>>> {
        let tool = &self.config.tools.nvidia_smi;
        let reason = match self
            .probe
            .run(tool, &["--query-gpu=index,pci.bus_id", "--format=csv,noheader"])
        {
            Ok(out) if out.success => {
                let ids = parse_gpu_query(&out.stdout);
                debug!(count = ids.len(), "gpus from {}", tool);
                return Ok(ids.into_iter().map(Some).collect());
            }
            Ok(out) => format!("{} failed: {}", tool, out.stderr.trim()),
            Err(e) => format!("{} unavailable: {}", tool, e),
        };
        debug!(reason = %reason, "falling back to procfs gpu enumeration");

        let gpus_dir = self.proc_path("driver/nvidia/gpus");
        match self.probe.list_dir(&gpus_dir) {
            Ok(mut ids) => {
                ids.sort();
                Ok(ids.into_iter().map(Some).collect())
            }
            Err(e) => Err(AutoconfError::detection_failed(
                "gpu_count",
                format!("{}; {}: {}", reason, gpus_dir.display(), e),
            )),
        }
    }

    fn gpu_numa_node(
        &self,
        index: usize,
        bus_id: Option<&str>,
        degraded: &mut Degradations,
    ) -> Option<u32> {
        let field = format!("gpu_numa_node[{}]", index);
        let Some(pci) = bus_id.and_then(sysfs_pci_address) else {
            degraded.note(field, "no PCI bus id");
            return None;
        };
        self.read_numa_node(
            self.sys_path(format!("bus/pci/devices/{}/numa_node", pci)),
            &field,
            degraded,
        )
    }

    fn detect_nvlink(&self, degraded: &mut Degradations) -> bool {
        let tool = &self.config.tools.nvidia_smi;
        match self.probe.run(tool, &["topo", "-m"]) {
            Ok(out) if out.success => topo_matrix_has_nvlink(&out.stdout),
            Ok(out) => {
                degraded.note("nvlink_present", format!("{} topo failed: {}", tool, out.stderr.trim()));
                false
            }
            Err(e) => {
                degraded.note("nvlink_present", format!("{} topo unavailable: {}", tool, e));
                false
            }
        }
    }

    fn is_working_device(&self, name: &str, degraded: &mut Degradations) -> bool {
        let verbs_dir = self.sys_path(format!("class/infiniband/{}/device/infiniband_verbs", name));
        let has_uverbs = self
            .probe
            .list_dir(&verbs_dir)
            .map(|entries| entries.iter().any(|e| e.starts_with("uverbs")))
            .unwrap_or(false);
        if !has_uverbs {
            return false;
        }

        let tool = &self.config.tools.ibv_devinfo;
        match self.probe.run(tool, &["-d", name]) {
            Ok(out) => out.success && out.stdout.contains("hca_id"),
            Err(e) => {
                degraded.note(
                    format!("rdma_devices[{}].is_working", name),
                    format!("{} unavailable, trusting sysfs verbs node: {}", tool, e),
                );
                true
            }
        }
    }

    fn resolve_interface(
        &self,
        device: &str,
        ibdev2netdev: &mut Option<Option<String>>,
        degraded: &mut Degradations,
    ) -> Option<String> {
        for strategy in InterfaceStrategy::ORDER {
            let found = match strategy {
                InterfaceStrategy::NetPattern => self.netdev_matching(device, "net"),
                InterfaceStrategy::IbPattern => self.netdev_matching(device, "ib"),
                InterfaceStrategy::Ibdev2netdev => {
                    let output = ibdev2netdev.get_or_insert_with(|| self.run_ibdev2netdev());
                    output
                        .as_deref()
                        .and_then(|out| parse_ibdev2netdev(out, device))
                }
            };
            if let Some(iface) = found {
                debug!(device, iface = %iface, strategy = strategy.name(), "interface resolved");
                return Some(iface);
            }
        }

        degraded.note(
            format!("rdma_devices[{}].network_interface", device),
            "no strategy resolved a network interface",
        );
        None
    }

    fn netdev_matching(&self, device: &str, prefix: &str) -> Option<String> {
        let net_dir = self.sys_path(format!("class/infiniband/{}/device/net", device));
        let mut names: Vec<String> = self
            .probe
            .list_dir(&net_dir)
            .ok()?
            .into_iter()
            .filter(|n| matches_indexed(n, prefix))
            .collect();
        names.sort_by_key(|n| natural_key(n));
        names.into_iter().next()
    }

    fn run_ibdev2netdev(&self) -> Option<String> {
        let tool = &self.config.tools.ibdev2netdev;
        match self.probe.run(tool, &[]) {
            Ok(out) if out.success => Some(out.stdout),
            Ok(out) => {
                debug!(stderr = %out.stderr.trim(), "{} failed", tool);
                None
            }
            Err(e) => {
                debug!(error = %e, "{} unavailable", tool);
                None
            }
        }
    }

    fn find_roce_v2_gid(&self, device: &str, degraded: &mut Degradations) -> Option<u32> {
        let ports_dir = self.sys_path(format!("class/infiniband/{}/ports", device));
        let mut ports: Vec<u32> = match self.probe.list_dir(&ports_dir) {
            Ok(entries) => entries.iter().filter_map(|p| p.parse().ok()).collect(),
            Err(e) => {
                degraded.note(
                    format!("rdma_devices[{}].roce_gid_index", device),
                    format!("cannot list {}: {}", ports_dir.display(), e),
                );
                return None;
            }
        };
        ports.sort_unstable();

        for port in ports {
            let types_dir = ports_dir.join(format!("{}/gid_attrs/types", port));
            let mut indices: Vec<u32> = match self.probe.list_dir(&types_dir) {
                Ok(entries) => entries.iter().filter_map(|i| i.parse().ok()).collect(),
                Err(_) => continue,
            };
            indices.sort_unstable();

            for index in indices {
                // Unpopulated GID entries fail to read
                let Ok(kind) = self.probe.read_to_string(&types_dir.join(index.to_string())) else {
                    continue;
                };
                if kind.trim().eq_ignore_ascii_case("RoCE v2") {
                    return Some(index);
                }
            }
        }

        debug!(device, "no RoCE v2 GID entry");
        None
    }

    fn read_numa_node(&self, path: PathBuf, field: &str, degraded: &mut Degradations) -> Option<u32> {
        match self.probe.read_to_string(&path) {
            Ok(content) => match content.trim().parse::<i64>() {
                Ok(node) if node >= 0 => u32::try_from(node).ok(),
                Ok(_) => {
                    degraded.note(field, "platform reports no NUMA affinity");
                    None
                }
                Err(_) => {
                    degraded.note(field, format!("unparseable numa_node '{}'", content.trim()));
                    None
                }
            },
            Err(e) => {
                degraded.note(field, format!("cannot read {}: {}", path.display(), e));
                None
            }
        }
    }

    fn sys_path(&self, rel: impl AsRef<str>) -> PathBuf {
        self.config.sysfs_root.join(rel.as_ref())
    }

    fn proc_path(&self, rel: impl AsRef<str>) -> PathBuf {
        self.config.procfs_root.join(rel.as_ref())
    }
}

/// Parse `index, pci.bus_id` CSV rows into bus ids ordered by GPU index
fn parse_gpu_query(output: &str) -> Vec<String> {
    let mut rows: Vec<(usize, String)> = output
        .lines()
        .filter_map(|line| {
            let (index, bus_id) = line.split_once(',')?;
            Some((index.trim().parse().ok()?, bus_id.trim().to_string()))
        })
        .collect();
    rows.sort_by_key(|(index, _)| *index);
    rows.into_iter().map(|(_, bus_id)| bus_id).collect()
}

/// Convert `00000000:3B:00.0` to the sysfs form `0000:3b:00.0`
fn sysfs_pci_address(bus_id: &str) -> Option<String> {
    let (domain, rest) = bus_id.trim().split_once(':')?;
    if domain.is_empty() || rest.is_empty() {
        return None;
    }
    let is_pci_char = |c: char| c.is_ascii_hexdigit() || c == ':' || c == '.';
    if !domain.chars().all(|c| c.is_ascii_hexdigit()) || !rest.chars().all(is_pci_char) {
        return None;
    }
    let domain = &domain[domain.len().saturating_sub(4)..];
    Some(format!("{:0>4}:{}", domain, rest).to_ascii_lowercase())
}

/// True if any GPU row of an `nvidia-smi topo -m` matrix has an `NV<n>` link
fn topo_matrix_has_nvlink(matrix: &str) -> bool {
    matrix
        .lines()
        .filter(|line| matches_indexed(line.split_whitespace().next().unwrap_or(""), "GPU"))
        .flat_map(|line| line.split_whitespace().skip(1))
        .any(|cell| matches_indexed(cell, "NV"))
}

/// Find the netdev for `device` in `ibdev2netdev` output
///
/// Lines look like `mlx5_6 port 1 ==> net1 (Up)`.
fn parse_ibdev2netdev(output: &str, device: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (left, right) = line.split_once("==>")?;
        if left.split_whitespace().next()? != device {
            return None;
        }
        right.split_whitespace().next().map(str::to_string)
    })
}
