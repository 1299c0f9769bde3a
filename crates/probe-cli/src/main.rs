//! `hwenc-probe` -- report NVENC hardware encode support on this machine.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use hwenc_common::{GraphicsApi, RuntimeOverrides};
use hwenc_encoder::{EncoderContext, ProbeResult};
use hwenc_gpu_hal::{describe_bridge_kind, select_bridge_kind};

/// Command-line arguments for hwenc-probe
#[derive(Parser, Debug)]
#[command(name = "hwenc-probe")]
#[command(version, about = "Probe NVENC hardware encode support", long_about = None)]
struct Args {
    /// Directory containing the NVENC runtime library
    #[arg(long, env = "NVENC_MODULE_DIR")]
    module_dir: Option<PathBuf>,

    /// Full path to the NVENC runtime library
    #[arg(long = "library", env = "NVENC_LIBRARY_PATH")]
    library_path: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let default_directives =
        format!("hwenc_probe={level},hwenc_encoder={level},hwenc_gpu_hal={level},warn");
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_report(report: &ProbeResult) {
    let flag = |on: bool| if on { "yes" } else { "no" };

    println!("NVENC hardware encode: {}", flag(report.hardware_available));
    if let Some(name) = &report.adapter_name {
        println!("Adapter:        {name}");
    }
    if let Some(version) = &report.driver_version {
        println!("Driver:         {version}");
    }
    println!("Runtime found:  {}", flag(report.dll_present));
    println!("Exports ready:  {}", flag(report.apis_ready));
    println!("Session opens:  {}", flag(report.session_openable));
    if let Some(reason) = &report.failure_reason {
        println!("Failure:        {reason}");
    }
    for (stage, reason) in report.stage_failures.failed() {
        println!("  {stage:<8} {reason}");
    }
    if let Some(features) = &report.baseline_features {
        println!("H.264 features: {}", features.to_debug_string());
    }

    for combination in &report.combinations {
        let status = match (combination.supported, &combination.reason) {
            (true, _) => "supported".to_string(),
            (false, Some(reason)) => format!("unsupported ({reason})"),
            (false, None) => "unsupported".to_string(),
        };
        println!(
            "  {:<5} {:<5} {status}",
            combination.codec.short_name(),
            combination.format.short_name()
        );
    }

    println!("Frame submission:");
    for api in [GraphicsApi::D3D11, GraphicsApi::D3D12, GraphicsApi::Vulkan] {
        println!(
            "  {:<6} {}",
            api.name(),
            describe_bridge_kind(select_bridge_kind(api))
        );
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let context = EncoderContext::for_host();
    let overrides = RuntimeOverrides {
        module_dir: args.module_dir.clone(),
        library_path: args.library_path.clone(),
    };
    if !overrides.is_empty() {
        debug!(?overrides, "Applying runtime overrides from the command line");
        context.set_overrides(overrides);
    }

    let report = context.query_capabilities();

    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                error!(error = %e, "Failed to serialize capability report");
                return ExitCode::FAILURE;
            }
        }
    } else {
        print_report(&report);
    }

    if report.hardware_available {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}
