//! NCCL environment derivation
//!
//! A pure, single-pass function of a [`HostTopology`] and [`Overrides`].
//! Every catalogued variable is always emitted; a non-empty override for a
//! variable replaces its detected value verbatim.

use super::overrides::Overrides;
use super::vars::{NcclVar, UNSET};
use crate::config::NcclTuning;
use crate::system::HostTopology;
use serde::Serialize;
use tracing::debug;

/// Where a derived value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueSource {
    /// Computed from the topology
    Detected,
    /// Copied from an override
    Override,
}

/// One `name=value` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigEntry {
    /// Environment variable name
    pub name: String,
    /// Value, never containing a newline unless supplied by an override
    pub value: String,
    /// Provenance
    pub source: ValueSource,
}

/// Ordered derived environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DerivedConfig {
    entries: Vec<ConfigEntry>,
}

impl DerivedConfig {
    /// Value of a variable by environment name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.value.as_str())
    }

    /// Value of a catalogued variable
    pub fn value(&self, var: NcclVar) -> Option<&str> {
        self.get(var.env_name())
    }

    /// Whether a variable's value came from an override
    pub fn is_overridden(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.name == name && e.source == ValueSource::Override)
    }

    /// Entries in derivation order
    pub fn entries(&self) -> &[ConfigEntry] {
        &self.entries
    }

    /// Iterate `(name, value)` pairs in derivation order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|e| (e.name.as_str(), e.value.as_str()))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, name: impl Into<String>, value: impl Into<String>, source: ValueSource) {
        self.entries.push(ConfigEntry {
            name: name.into(),
            value: value.into(),
            source,
        });
    }

    /// Print the configuration as aligned `NAME = value` lines
    pub fn print(&self) {
        let width = self.entries.iter().map(|e| e.name.len()).max().unwrap_or(0);
        for entry in &self.entries {
            let marker = match entry.source {
                ValueSource::Override => "  (override)",
                ValueSource::Detected => "",
            };
            println!("{:<width$} = {}{}", entry.name, entry.value, marker, width = width);
        }
    }
}

/// OMP threads per GPU rank: `clamp(max(1, cpus / max(gpus, 1)), min, max)`
pub fn omp_threads(cpu_count: usize, gpu_count: usize, min: usize, max: usize) -> usize {
    let per_gpu = (cpu_count / gpu_count.max(1)).max(1);
    per_gpu.clamp(min, max.max(min))
}

/// Turns a topology plus overrides into the NCCL environment
#[derive(Debug, Clone, Default)]
pub struct NcclConfigDeriver {
    tuning: NcclTuning,
}

impl NcclConfigDeriver {
    /// Create a deriver with the given constants
    pub fn new(tuning: NcclTuning) -> Self {
        Self { tuning }
    }

    /// Derive the full configuration
    pub fn derive(&self, topology: &HostTopology, overrides: &Overrides) -> DerivedConfig {
        let mut config = DerivedConfig::default();

        for var in NcclVar::ALL {
            match overrides.get(var) {
                Some(value) => {
                    debug!(var = var.env_name(), value, "using override");
                    config.push(var.env_name(), value, ValueSource::Override);
                }
                None => {
                    config.push(var.env_name(), self.detected(var, topology), ValueSource::Detected);
                }
            }
        }

        for (name, value) in overrides.extra() {
            debug!(var = name, value, "passing through extra override");
            config.push(name, value, ValueSource::Override);
        }

        config
    }

    fn detected(&self, var: NcclVar, topology: &HostTopology) -> String {
        let tuning = &self.tuning;
        let devices = &topology.rdma_devices;

        match var {
            NcclVar::GpuCount => topology.gpu_count.to_string(),
            NcclVar::IbHca => devices
                .iter()
                .map(|d| d.name.as_str())
                .collect::<Vec<_>>()
                .join(","),
            NcclVar::SocketIfname => devices
                .iter()
                .map(|d| d.network_interface.as_deref().unwrap_or(""))
                .collect::<Vec<_>>()
                .join(","),
            NcclVar::IbGidIndex => devices
                .iter()
                .find_map(|d| d.roce_gid_index)
                .map(|i| i.to_string())
                .unwrap_or_else(|| UNSET.to_string()),
            NcclVar::IbTimeout => tuning.ib_timeout.to_string(),
            NcclVar::CrossNic => tuning.cross_nic.to_string(),
            NcclVar::MinNchannels => tuning.min_nchannels.to_string(),
            NcclVar::GdrLevel => {
                let level = if topology.gpudirect_supported {
                    tuning.gdr_level_enabled
                } else {
                    tuning.gdr_level_disabled
                };
                level.to_string()
            }
            NcclVar::P2pLevel => if topology.nvlink_present {
                tuning.p2p_level_nvlink.clone()
            } else {
                tuning.p2p_level_pcie.clone()
            },
            NcclVar::OmpThreads => omp_threads(
                topology.cpu_count,
                topology.gpu_count,
                tuning.omp_threads_min,
                tuning.omp_threads_max,
            )
            .to_string(),
            NcclVar::IbDisable => {
                let flag = if topology.transport.disables_ib() { "1" } else { "0" };
                flag.to_string()
            }
            NcclVar::Debug => tuning.debug.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::{RdmaDevice, Transport};
    use proptest::prelude::*;

    fn h100_topology() -> HostTopology {
        HostTopology::new(
            4,
            vec![Some(0); 4],
            true,
            vec![
                RdmaDevice::new("mlx5_6").with_numa_node(0).with_interface("net1").with_gid_index(3),
                RdmaDevice::new("mlx5_7").with_numa_node(0).with_interface("net2").with_gid_index(3),
            ],
            64,
            true,
        )
    }

    fn tcp_topology(cpu_count: usize, gpu_count: usize) -> HostTopology {
        HostTopology::new(gpu_count, vec![None; gpu_count], false, vec![], cpu_count, false)
    }

    fn derive(topology: &HostTopology, overrides: &Overrides) -> DerivedConfig {
        NcclConfigDeriver::default().derive(topology, overrides)
    }

    #[test]
    fn test_full_detection_no_overrides() {
        let config = derive(&h100_topology(), &Overrides::new());
        assert_eq!(config.value(NcclVar::GpuCount), Some("4"));
        assert_eq!(config.value(NcclVar::IbHca), Some("mlx5_6,mlx5_7"));
        assert_eq!(config.value(NcclVar::SocketIfname), Some("net1,net2"));
        assert_eq!(config.value(NcclVar::IbGidIndex), Some("3"));
        assert_eq!(config.value(NcclVar::GdrLevel), Some("5"));
        assert_eq!(config.value(NcclVar::P2pLevel), Some("NVL"));
        assert_eq!(config.value(NcclVar::OmpThreads), Some("16"));
        assert_eq!(config.value(NcclVar::IbDisable), Some("0"));
        assert_eq!(config.len(), NcclVar::ALL.len());
    }

    #[test]
    fn test_derivation_order() {
        let config = derive(&h100_topology(), &Overrides::new());
        let names: Vec<_> = config.iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec![
                "GPUS_PER_NODE",
                "NCCL_P2P_LEVEL",
                "NCCL_IB_HCA",
                "NCCL_SOCKET_IFNAME",
                "NCCL_IB_GID_INDEX",
                "NCCL_IB_TIMEOUT",
                "NCCL_CROSS_NIC",
                "NCCL_MIN_NCHANNELS",
                "NCCL_NET_GDR_LEVEL",
                "OMP_NUM_THREADS",
                "NCCL_IB_DISABLE",
                "NCCL_DEBUG",
            ]
        );
    }

    #[test]
    fn test_override_wins() {
        let baseline = derive(&h100_topology(), &Overrides::new());
        let overrides: Overrides = [("omp_threads", "8")].into_iter().collect();
        let config = derive(&h100_topology(), &overrides);

        assert_eq!(config.value(NcclVar::OmpThreads), Some("8"));
        assert!(config.is_overridden("OMP_NUM_THREADS"));
        for ((name, value), (base_name, base_value)) in config.iter().zip(baseline.iter()) {
            assert_eq!(name, base_name);
            if name != "OMP_NUM_THREADS" {
                assert_eq!(value, base_value);
            }
        }
    }

    #[test]
    fn test_no_rdma_hardware() {
        let config = derive(&tcp_topology(32, 2), &Overrides::new());
        assert_eq!(config.value(NcclVar::IbHca), Some(""));
        assert_eq!(config.value(NcclVar::SocketIfname), Some(""));
        assert_eq!(config.value(NcclVar::IbGidIndex), Some(UNSET));
        assert_eq!(config.value(NcclVar::IbDisable), Some("1"));
        assert_eq!(config.value(NcclVar::GdrLevel), Some("0"));
        assert_eq!(config.value(NcclVar::P2pLevel), Some("PHB"));
    }

    #[test]
    fn test_gid_index_from_first_device_with_one() {
        let topo = HostTopology::new(
            2,
            vec![None; 2],
            false,
            vec![
                RdmaDevice::new("mlx5_0").with_interface("ib0"),
                RdmaDevice::new("mlx5_1").with_interface("net1").with_gid_index(5),
                RdmaDevice::new("mlx5_2").with_gid_index(3),
            ],
            16,
            false,
        );
        let config = derive(&topo, &Overrides::new());
        assert_eq!(config.value(NcclVar::IbGidIndex), Some("5"));
        // Unresolved interface keeps an empty positional slot
        assert_eq!(config.value(NcclVar::SocketIfname), Some("ib0,net1,"));
        assert_eq!(config.value(NcclVar::IbHca), Some("mlx5_0,mlx5_1,mlx5_2"));
    }

    #[test]
    fn test_thread_clamping() {
        assert_eq!(omp_threads(64, 4, 4, 16), 16);
        assert_eq!(omp_threads(8, 4, 4, 16), 4);
        assert_eq!(omp_threads(256, 4, 4, 16), 16);
        assert_eq!(omp_threads(24, 0, 4, 16), 16);
        assert_eq!(omp_threads(1, 8, 4, 16), 4);
    }

    #[test]
    fn test_zero_gpus_does_not_panic() {
        let config = derive(&tcp_topology(6, 0), &Overrides::new());
        assert_eq!(config.value(NcclVar::GpuCount), Some("0"));
        assert_eq!(config.value(NcclVar::OmpThreads), Some("6"));
    }

    #[test]
    fn test_extra_overrides_are_appended() {
        let overrides: Overrides = [("NCCL_ALGO", "Ring"), ("NCCL_IB_HCA", "mlx5_9")]
            .into_iter()
            .collect();
        let config = derive(&h100_topology(), &overrides);
        assert_eq!(config.value(NcclVar::IbHca), Some("mlx5_9"));
        let last = config.entries().last().unwrap();
        assert_eq!((last.name.as_str(), last.value.as_str()), ("NCCL_ALGO", "Ring"));
        assert_eq!(config.len(), NcclVar::ALL.len() + 1);
    }

    #[test]
    fn test_custom_tuning() {
        let tuning = NcclTuning {
            debug: "WARN".to_string(),
            omp_threads_max: 32,
            ..Default::default()
        };
        let config = NcclConfigDeriver::new(tuning).derive(&tcp_topology(128, 4), &Overrides::new());
        assert_eq!(config.value(NcclVar::Debug), Some("WARN"));
        assert_eq!(config.value(NcclVar::OmpThreads), Some("32"));
        assert_eq!(tcp_topology(128, 4).transport, Transport::Tcp);
    }

    fn arb_device() -> impl Strategy<Value = RdmaDevice> {
        (
            0u32..32,
            proptest::option::of("(net|ib)[0-9]{1,2}"),
            proptest::option::of(0u32..8),
        )
            .prop_map(|(n, iface, gid)| {
                let mut dev = RdmaDevice::new(format!("mlx5_{}", n));
                dev.network_interface = iface;
                dev.roce_gid_index = gid;
                dev
            })
    }

    fn arb_topology() -> impl Strategy<Value = HostTopology> {
        (
            0usize..16,
            1usize..512,
            any::<bool>(),
            any::<bool>(),
            proptest::collection::vec(arb_device(), 0..8),
        )
            .prop_map(|(gpus, cpus, nvlink, gdr, devices)| {
                HostTopology::new(gpus, vec![None; gpus], nvlink, devices, cpus, gdr)
            })
    }

    proptest! {
        #[test]
        fn prop_omp_threads_in_bounds(cpus in 1usize..4096, gpus in 0usize..64) {
            let n = omp_threads(cpus, gpus, 4, 16);
            prop_assert!((4..=16).contains(&n));
        }

        #[test]
        fn prop_derivation_is_idempotent(topo in arb_topology()) {
            let overrides = Overrides::new();
            prop_assert_eq!(derive(&topo, &overrides), derive(&topo, &overrides));
        }

        #[test]
        fn prop_positional_correspondence(topo in arb_topology()) {
            let config = derive(&topo, &Overrides::new());
            let hca = config.value(NcclVar::IbHca).unwrap();
            let ifname = config.value(NcclVar::SocketIfname).unwrap();
            if topo.rdma_devices.is_empty() {
                prop_assert_eq!(hca, "");
                prop_assert_eq!(ifname, "");
            } else {
                let names: Vec<_> = hca.split(',').collect();
                let ifaces: Vec<_> = ifname.split(',').collect();
                prop_assert_eq!(names.len(), ifaces.len());
                for (i, dev) in topo.rdma_devices.iter().enumerate() {
                    prop_assert_eq!(names[i], dev.name.as_str());
                    prop_assert_eq!(ifaces[i], dev.network_interface.as_deref().unwrap_or(""));
                }
            }
        }

        #[test]
        fn prop_override_precedence(
            topo in arb_topology(),
            idx in 0usize..12,
            value in "[A-Za-z0-9_,^]{1,16}",
        ) {
            let var = NcclVar::ALL[idx];
            let overrides: Overrides = [(var.env_name(), value.clone())].into_iter().collect();
            let config = derive(&topo, &overrides);
            prop_assert_eq!(config.value(var), Some(value.as_str()));
        }
    }
}
