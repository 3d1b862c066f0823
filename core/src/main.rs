//! Alert relay simulator
//!
//! Floods one alert across an in-process mesh of relay devices and reports
//! how far it got and what it cost.
//!
//! Usage:
//!   bitalert-sim                                   # 5 devices in a chain
//!   bitalert-sim --devices 12 --topology ring      # 12 devices in a ring
//!   bitalert-sim --topology mesh --json            # Machine-readable report

use std::env;

use serde::Serialize;
use tracing::info;

use bitalert_core::protocol::{RelayEvent, MAX_TEXT_BYTES};
use bitalert_core::testing::{TestNetwork, Topology};

const DEFAULT_DEVICES: usize = 5;
const DEFAULT_TEXT: &str = "Test alert: shelter in place";

fn print_usage() {
    println!("BitAlert relay simulator v0.1.0");
    println!();
    println!("Usage:");
    println!("  bitalert-sim [options]");
    println!();
    println!("Options:");
    println!("  --devices <N>          Number of devices (default: {})", DEFAULT_DEVICES);
    println!("  --topology <KIND>      chain, ring or mesh (default: chain)");
    println!("  --origin <INDEX>       Device that raises the alert (default: 0)");
    println!("  --text <TEXT>          Alert text (max {} bytes)", MAX_TEXT_BYTES);
    println!("  --lat <DEG>            Latitude (default: 0)");
    println!("  --lon <DEG>            Longitude (default: 0)");
    println!("  --json                 Print the report as JSON");
    println!("  --help, -h             Show this help");
    println!();
    println!("Environment:");
    println!("  RUST_LOG               Set log level (e.g., info, debug)");
}

/// Outcome of one simulated flood
#[derive(Debug, Serialize)]
struct SimReport {
    topology: String,
    devices: usize,
    origin: usize,
    alert_id: String,
    deliveries: usize,
    reach: usize,
    sends_per_device: Vec<usize>,
    surfaced_per_device: Vec<usize>,
}

/// Value following `flag`, if present
fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

/// Parse the value following `flag`, exiting with a message if it is invalid
fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str, default: T) -> T {
    match arg_value(args, flag) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            eprintln!("Error: invalid value for {}: {}", flag, raw);
            std::process::exit(2);
        }),
    }
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }
    let json = args.iter().any(|a| a == "--json");

    let devices: usize = parse_arg(&args, "--devices", DEFAULT_DEVICES);
    let topology: Topology = parse_arg(&args, "--topology", Topology::Chain);
    let origin: usize = parse_arg(&args, "--origin", 0);
    let latitude: f64 = parse_arg(&args, "--lat", 0.0);
    let longitude: f64 = parse_arg(&args, "--lon", 0.0);
    let text = arg_value(&args, "--text").unwrap_or(DEFAULT_TEXT);

    if devices == 0 || origin >= devices {
        eprintln!("Error: need at least one device and --origin below --devices");
        std::process::exit(2);
    }

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut network = TestNetwork::with_topology(devices, topology);
    info!(devices, %topology, origin, "simulation starting");

    let alert = match bitalert_core::Alert::new(text, latitude, longitude) {
        Ok(alert) => alert,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };
    if let Err(e) = network.device(origin).engine.submit_local(alert.clone()).await {
        eprintln!("Error: failed to originate alert: {}", e);
        std::process::exit(1);
    }

    let deliveries = network.run_until_quiet().await;

    let surfaced_per_device: Vec<usize> = (0..network.len())
        .map(|id| {
            network
                .device_mut(id)
                .drain_events()
                .iter()
                .filter(|event| {
                    matches!(event, RelayEvent::AlertOriginated(_) | RelayEvent::AlertReceived(_))
                })
                .count()
        })
        .collect();

    let report = SimReport {
        topology: topology.to_string(),
        devices,
        origin,
        alert_id: alert.id().to_string(),
        deliveries,
        reach: network.reach(&alert.id()),
        sends_per_device: network.sends_per_device(),
        surfaced_per_device,
    };

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Error: failed to serialize report: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    println!("=== Flood Report ===");
    println!("Topology:    {} ({} devices)", report.topology, report.devices);
    println!("Alert:       {} from device {}", alert.id().short(), report.origin);
    println!("Reach:       {}/{}", report.reach, report.devices);
    println!("Deliveries:  {}", report.deliveries);
    println!();
    println!("{:<8} {:>6} {:>9}", "device", "sends", "surfaced");
    for (id, (sends, surfaced)) in report
        .sends_per_device
        .iter()
        .zip(&report.surfaced_per_device)
        .enumerate()
    {
        println!("{:<8} {:>6} {:>9}", id, sends, surfaced);
    }
}
