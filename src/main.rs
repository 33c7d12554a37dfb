//! nccl-autoconf CLI
//!
//! Probes the local host once and writes a sourceable NCCL environment file.

use clap::Parser;
use nccl_autoconf::config::{AutoconfConfig, CliArgs, Commands};
use nccl_autoconf::core::AutoconfEngine;
use nccl_autoconf::error::{AutoconfError, Result};
use nccl_autoconf::output::read_artifact;
use nccl_autoconf::system::TopologyDetector;
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn main() {
    let args = CliArgs::parse();

    init_logging(&args);

    if let Err(e) = run(args) {
        eprintln!("Error ({} stage): {}", e.stage(), e);
        std::process::exit(1);
    }
}

fn init_logging(args: &CliArgs) {
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if args.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(args: CliArgs) -> Result<()> {
    let config = AutoconfConfig::from_cli(&args).map_err(AutoconfError::config)?;

    if let Some(command) = &args.command {
        return handle_command(command, &config);
    }

    let result = AutoconfEngine::new(config).execute()?;

    if args.print {
        result.config.print();
    }

    if !args.quiet {
        result.print_summary();
    }

    Ok(())
}

fn handle_command(command: &Commands, config: &AutoconfConfig) -> Result<()> {
    match command {
        Commands::Show { path } => cmd_show(path),
        Commands::Detect { json } => cmd_detect(config, *json),
    }
}

fn cmd_show(path: &Path) -> Result<()> {
    let pairs = read_artifact(path)?;
    let width = pairs.iter().map(|(n, _)| n.len()).max().unwrap_or(0);
    for (name, value) in pairs {
        println!("{:<width$} = {}", name, value, width = width);
    }
    Ok(())
}

fn cmd_detect(config: &AutoconfConfig, json: bool) -> Result<()> {
    let report = TopologyDetector::for_host(config.probe.clone()).detect()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    report.topology.print_summary();
    if !report.degraded.is_empty() {
        println!("\nFallbacks:");
        for d in &report.degraded {
            println!("  {} - {}", d.field, d.reason);
        }
    }
    Ok(())
}
