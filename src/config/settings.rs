//! Configuration settings for nccl-autoconf
//!
//! Defines CLI arguments, probe locations, and the NCCL tuning constants
//! used when deriving the environment.

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// nccl-autoconf - GPU/RDMA topology detection and NCCL environment derivation
#[derive(Parser, Debug, Clone)]
#[command(name = "nccl-autoconf")]
#[command(author = "ML Dev Env Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Detect GPU/RDMA topology and write a sourceable NCCL environment file")]
#[command(long_about = r#"
nccl-autoconf probes the local host once and writes the NCCL environment that
training processes (PyTorch, DeepSpeed) source before starting.

Detected:
  - GPU count, per-GPU NUMA node, NVLink presence
  - Working RDMA devices, their network interfaces and RoCE v2 GID index
  - GPUDirect RDMA (peer-memory module) support
  - Logical CPU count (OMP thread derivation)

Variables already set in the environment always win over detected values.

Examples:
  nccl-autoconf                                  # Write /tmp/nccl-env.sh
  nccl-autoconf -o /workspace/.nccl-env.sh       # Custom destination
  nccl-autoconf --set OMP_NUM_THREADS=8 --print  # Explicit override
  nccl-autoconf show /tmp/nccl-env.sh            # Inspect a written file
"#)]
pub struct CliArgs {
    /// Destination of the sourceable environment file
    #[arg(
        short = 'o',
        long,
        env = "NCCL_AUTOCONF_OUTPUT",
        default_value = "/tmp/nccl-env.sh",
        value_name = "PATH"
    )]
    pub output: PathBuf,

    /// Root of the sysfs tree to probe
    #[arg(long, default_value = "/sys", value_name = "PATH")]
    pub sysfs_root: PathBuf,

    /// Root of the procfs tree to probe
    #[arg(long, default_value = "/proc", value_name = "PATH")]
    pub procfs_root: PathBuf,

    /// Write bare NAME='value' lines instead of export statements
    #[arg(long)]
    pub no_export: bool,

    /// Do not take overrides from the current process environment
    #[arg(long)]
    pub ignore_env: bool,

    /// Explicit override (repeatable), e.g. --set NCCL_IB_GID_INDEX=3
    #[arg(long = "set", value_name = "NAME=VALUE")]
    pub overrides: Vec<String>,

    /// Write a JSON detection report to this path
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Print the derived configuration to stdout
    #[arg(long)]
    pub print: bool,

    /// Detect and derive, but do not write the environment file
    #[arg(long)]
    pub dry_run: bool,

    /// Verbose output (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Show the variables stored in an existing environment file
    #[command(name = "show")]
    Show {
        /// Environment file path
        path: PathBuf,
    },

    /// Print the detected host topology without deriving or writing
    #[command(name = "detect")]
    Detect {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// External tools queried during detection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolNames {
    /// GPU device-query tool
    pub nvidia_smi: String,
    /// Verb-interface query tool
    pub ibv_devinfo: String,
    /// RDMA device to netdev mapper
    pub ibdev2netdev: String,
}

impl Default for ToolNames {
    fn default() -> Self {
        Self {
            nvidia_smi: "nvidia-smi".to_string(),
            ibv_devinfo: "ibv_devinfo".to_string(),
            ibdev2netdev: "ibdev2netdev".to_string(),
        }
    }
}

/// Where and how the host is probed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeConfig {
    /// sysfs mount point
    pub sysfs_root: PathBuf,
    /// procfs mount point
    pub procfs_root: PathBuf,
    /// Tool names
    pub tools: ToolNames,
    /// Kernel modules that provide GPUDirect RDMA peer memory
    pub peer_memory_modules: Vec<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys"),
            procfs_root: PathBuf::from("/proc"),
            tools: ToolNames::default(),
            peer_memory_modules: vec!["nvidia_peermem".to_string(), "nv_peer_mem".to_string()],
        }
    }
}

/// Fixed values used when deriving NCCL variables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NcclTuning {
    /// NCCL_NET_GDR_LEVEL when GPUDirect is available
    pub gdr_level_enabled: u32,
    /// NCCL_NET_GDR_LEVEL when GPUDirect is missing
    pub gdr_level_disabled: u32,
    /// NCCL_P2P_LEVEL on NVLink hosts
    pub p2p_level_nvlink: String,
    /// NCCL_P2P_LEVEL on PCIe-only hosts
    pub p2p_level_pcie: String,
    /// Lower bound for OMP_NUM_THREADS
    pub omp_threads_min: usize,
    /// Upper bound for OMP_NUM_THREADS
    pub omp_threads_max: usize,
    /// NCCL_IB_TIMEOUT
    pub ib_timeout: u32,
    /// NCCL_CROSS_NIC
    pub cross_nic: u32,
    /// NCCL_MIN_NCHANNELS
    pub min_nchannels: u32,
    /// NCCL_DEBUG
    pub debug: String,
}

impl Default for NcclTuning {
    fn default() -> Self {
        Self {
            gdr_level_enabled: 5,
            gdr_level_disabled: 0,
            p2p_level_nvlink: "NVL".to_string(),
            p2p_level_pcie: "PHB".to_string(),
            omp_threads_min: 4,
            omp_threads_max: 16,
            ib_timeout: 22,
            cross_nic: 1,
            min_nchannels: 4,
            debug: "INFO".to_string(),
        }
    }
}

/// Complete runtime configuration for one invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoconfConfig {
    /// Probe locations and tools
    pub probe: ProbeConfig,
    /// Derivation constants
    pub tuning: NcclTuning,
    /// Environment file destination
    pub output: PathBuf,
    /// Prefix each line with `export`
    pub export: bool,
    /// Harvest overrides from the process environment
    pub use_env_overrides: bool,
    /// Explicit overrides, applied on top of the environment
    pub explicit_overrides: Vec<(String, String)>,
    /// Optional JSON report destination
    pub report: Option<PathBuf>,
    /// Skip writing the environment file
    pub dry_run: bool,
}

impl Default for AutoconfConfig {
    fn default() -> Self {
        Self {
            probe: ProbeConfig::default(),
            tuning: NcclTuning::default(),
            output: PathBuf::from("/tmp/nccl-env.sh"),
            export: true,
            use_env_overrides: true,
            explicit_overrides: Vec::new(),
            report: None,
            dry_run: false,
        }
    }
}

impl AutoconfConfig {
    /// Create configuration from CLI arguments
    pub fn from_cli(args: &CliArgs) -> Result<Self, String> {
        let mut config = Self::default();

        config.probe.sysfs_root = args.sysfs_root.clone();
        config.probe.procfs_root = args.procfs_root.clone();
        config.output = args.output.clone();
        config.export = !args.no_export;
        config.use_env_overrides = !args.ignore_env;
        config.report = args.report.clone();
        config.dry_run = args.dry_run;

        for raw in &args.overrides {
            let (name, value) = parse_assignment(raw)
                .ok_or_else(|| format!("Invalid --set '{}': expected NAME=VALUE", raw))?;
            config.explicit_overrides.push((name, value));
        }

        if config.output.as_os_str().is_empty() {
            return Err("Output path must not be empty".to_string());
        }

        if let Some(report) = &config.report {
            if !config.dry_run && report == &config.output {
                return Err("Report path must differ from the output path".to_string());
            }
        }

        Ok(config)
    }
}

/// Parse a `NAME=VALUE` assignment
///
/// Only the first `=` splits, so values may contain `=`. The name must be
/// non-empty; the value may be empty.
pub fn parse_assignment(s: &str) -> Option<(String, String)> {
    let (name, value) = s.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        let mut argv = vec!["nccl-autoconf"];
        argv.extend_from_slice(args);
        CliArgs::parse_from(argv)
    }

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            parse_assignment("OMP_NUM_THREADS=8"),
            Some(("OMP_NUM_THREADS".to_string(), "8".to_string()))
        );
        assert_eq!(
            parse_assignment("NCCL_SOCKET_IFNAME=^lo,docker0"),
            Some(("NCCL_SOCKET_IFNAME".to_string(), "^lo,docker0".to_string()))
        );
        assert_eq!(
            parse_assignment("A=b=c"),
            Some(("A".to_string(), "b=c".to_string()))
        );
        assert!(parse_assignment("=8").is_none());
        assert!(parse_assignment("NOVALUE").is_none());
    }

    #[test]
    fn test_defaults_match_cluster_profile() {
        let tuning = NcclTuning::default();
        assert_eq!(tuning.gdr_level_enabled, 5);
        assert_eq!(tuning.p2p_level_nvlink, "NVL");
        assert_eq!(tuning.ib_timeout, 22);
        assert_eq!((tuning.omp_threads_min, tuning.omp_threads_max), (4, 16));
    }

    #[test]
    fn test_from_cli() {
        let args = parse(&[
            "-o",
            "/tmp/out.sh",
            "--no-export",
            "--set",
            "OMP_NUM_THREADS=8",
            "--sysfs-root",
            "/fake/sys",
        ]);
        let config = AutoconfConfig::from_cli(&args).unwrap();
        assert_eq!(config.output, PathBuf::from("/tmp/out.sh"));
        assert!(!config.export);
        assert_eq!(config.probe.sysfs_root, PathBuf::from("/fake/sys"));
        assert_eq!(
            config.explicit_overrides,
            vec![("OMP_NUM_THREADS".to_string(), "8".to_string())]
        );
    }

    #[test]
    fn test_from_cli_rejects_bad_override() {
        let args = parse(&["--set", "nonsense"]);
        assert!(AutoconfConfig::from_cli(&args).is_err());
    }

    #[test]
    fn test_from_cli_rejects_report_over_output() {
        let args = parse(&["-o", "/tmp/x", "--report", "/tmp/x"]);
        assert!(AutoconfConfig::from_cli(&args).is_err());
    }
}
