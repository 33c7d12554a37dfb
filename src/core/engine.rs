//! Detection → derivation → write pipeline
//!
//! One run is strictly sequential and all-or-nothing: a fatal detection or
//! write failure aborts before any artifact is left behind.

use crate::config::AutoconfConfig;
use crate::error::Result;
use crate::nccl::{DerivedConfig, NcclConfigDeriver, Overrides};
use crate::output::{write_report, ConfigWriter};
use crate::system::{DegradedField, DetectionReport, HostProbe, Probe, TopologyDetector};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Outcome of one engine run
#[derive(Debug, Clone)]
pub struct AutoconfResult {
    /// Detected topology and provenance
    pub report: DetectionReport,
    /// Derived environment
    pub config: DerivedConfig,
    /// Where the environment file was written (`None` on dry run)
    pub artifact: Option<PathBuf>,
    /// Total duration
    pub duration: Duration,
}

impl AutoconfResult {
    /// Fields that fell back to defaults
    pub fn degraded(&self) -> &[DegradedField] {
        &self.report.degraded
    }

    /// Everything was detected without fallbacks
    pub fn is_fully_detected(&self) -> bool {
        self.report.is_complete()
    }

    /// Print summary to console
    pub fn print_summary(&self) {
        println!("\n=== NCCL Autoconf Summary ===");
        println!("Host:        {}", self.report.hostname);
        println!("GPUs:        {}", self.report.topology.gpu_count);
        println!("Transport:   {}", self.report.topology.transport);
        println!("Variables:   {}", self.config.len());
        match &self.artifact {
            Some(path) => println!("Written to:  {}", path.display()),
            None => println!("Written to:  (dry run)"),
        }
        println!("Duration:    {:.2?}", self.duration);

        if !self.report.degraded.is_empty() {
            println!("\nPartially detected ({} fallbacks):", self.report.degraded.len());
            for d in &self.report.degraded {
                println!("  {} - {}", d.field, d.reason);
            }
        }
    }
}

/// Runs the three stages once
pub struct AutoconfEngine<P: Probe = HostProbe> {
    config: AutoconfConfig,
    probe: P,
}

impl AutoconfEngine<HostProbe> {
    /// Engine probing the local host
    pub fn new(config: AutoconfConfig) -> Self {
        Self::with_probe(config, HostProbe::new())
    }
}

impl<P: Probe> AutoconfEngine<P> {
    /// Engine over an arbitrary probe
    pub fn with_probe(config: AutoconfConfig, probe: P) -> Self {
        Self { config, probe }
    }

    /// Overrides from the environment (if enabled) plus explicit ones
    pub fn collect_overrides(&self) -> Overrides {
        let mut overrides = if self.config.use_env_overrides {
            Overrides::from_env()
        } else {
            Overrides::new()
        };
        overrides.extend(self.config.explicit_overrides.iter().cloned());
        overrides
    }

    /// Execute the pipeline
    pub fn execute(self) -> Result<AutoconfResult> {
        let start = Instant::now();
        let overrides = self.collect_overrides();
        let Self { config, probe } = self;

        let detector = TopologyDetector::new(probe, config.probe.clone());
        let report = detector.detect()?;
        for d in &report.degraded {
            warn!(field = %d.field, "using fallback value");
        }

        let derived = NcclConfigDeriver::new(config.tuning.clone()).derive(&report.topology, &overrides);
        info!(
            variables = derived.len(),
            overrides = overrides.len(),
            "configuration derived"
        );

        // A failed report must not leave a fresh artifact behind
        if let Some(report_path) = &config.report {
            write_report(&report, report_path)
                .map_err(|e| e.with_context("writing detection report"))?;
        }

        let artifact = if config.dry_run {
            info!("dry run, not writing environment file");
            None
        } else {
            ConfigWriter::new(config.export).write(&derived, &config.output)?;
            Some(config.output.clone())
        };

        Ok(AutoconfResult {
            report,
            config: derived,
            artifact,
            duration: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AutoconfError;
    use crate::nccl::NcclVar;
    use crate::output::{load_report, read_artifact};
    use crate::system::fake::FakeProbe;
    use tempfile::TempDir;

    fn pcie_host() -> FakeProbe {
        FakeProbe::new()
            .cpus(32)
            .command(
                "nvidia-smi --query-gpu=index,pci.bus_id --format=csv,noheader",
                "0, 00000000:18:00.0\n1, 00000000:19:00.0\n",
            )
            .file("/sys/bus/pci/devices/0000:18:00.0/numa_node", "0\n")
            .file("/sys/bus/pci/devices/0000:19:00.0/numa_node", "0\n")
            .command("nvidia-smi topo -m", "\tGPU0\tGPU1\nGPU0\t X \tPHB\nGPU1\tPHB\t X \n")
            .file("/proc/modules", "nvidia 1 0\n")
    }

    fn config_in(dir: &TempDir) -> AutoconfConfig {
        AutoconfConfig {
            output: dir.path().join("nccl-env.sh"),
            use_env_overrides: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_execute_writes_artifact() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.explicit_overrides = vec![("omp_threads".to_string(), "8".to_string())];
        config.report = Some(dir.path().join("report.json"));

        let result = AutoconfEngine::with_probe(config, pcie_host()).execute().unwrap();

        assert!(result.is_fully_detected());
        assert_eq!(result.config.value(NcclVar::OmpThreads), Some("8"));
        assert_eq!(result.config.value(NcclVar::IbDisable), Some("1"));
        assert_eq!(result.config.value(NcclVar::P2pLevel), Some("PHB"));

        let path = result.artifact.clone().unwrap();
        let pairs = read_artifact(&path).unwrap();
        assert_eq!(pairs.len(), result.config.len());
        assert!(pairs.contains(&("GPUS_PER_NODE".to_string(), "2".to_string())));

        let report = load_report(&dir.path().join("report.json")).unwrap();
        assert_eq!(report.topology.gpu_count, 2);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.dry_run = true;

        let result = AutoconfEngine::with_probe(config, pcie_host()).execute().unwrap();
        assert!(result.artifact.is_none());
        assert!(!dir.path().join("nccl-env.sh").exists());
    }

    #[test]
    fn test_detection_failure_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);

        let err = AutoconfEngine::with_probe(config, FakeProbe::new().cpus(8))
            .execute()
            .unwrap_err();
        assert!(err.is_detection_failure());
        assert!(!dir.path().join("nccl-env.sh").exists());
    }

    #[test]
    fn test_unwritable_destination() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.output = dir.path().join("no-such-dir").join("nccl-env.sh");

        let err = AutoconfEngine::with_probe(config, pcie_host())
            .execute()
            .unwrap_err();
        assert!(matches!(err, AutoconfError::Write { .. }));
        assert!(!dir.path().join("no-such-dir").exists());
    }

    #[test]
    fn test_report_failure_leaves_no_artifact() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.report = Some(dir.path().join("missing").join("report.json"));

        let err = AutoconfEngine::with_probe(config, pcie_host())
            .execute()
            .unwrap_err();
        assert!(err.to_string().contains("writing detection report"));
        assert!(err.path().is_some());
        assert!(!dir.path().join("nccl-env.sh").exists());
    }

    #[test]
    fn test_degraded_fields_are_reported() {
        let dir = TempDir::new().unwrap();
        let probe = pcie_host().file("/sys/bus/pci/devices/0000:19:00.0/numa_node", "-1\n");

        let result = AutoconfEngine::with_probe(config_in(&dir), probe).execute().unwrap();
        assert!(!result.is_fully_detected());
        assert_eq!(result.degraded()[0].field, "gpu_numa_node[1]");
        assert!(result.artifact.unwrap().exists());
    }

    #[test]
    fn test_repeated_runs_are_identical() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nccl-env.sh");

        AutoconfEngine::with_probe(config_in(&dir), pcie_host()).execute().unwrap();
        let first = std::fs::read(&path).unwrap();
        AutoconfEngine::with_probe(config_in(&dir), pcie_host()).execute().unwrap();
        let second = std::fs::read(&path).unwrap();
        assert_eq!(first, second);
    }
}
