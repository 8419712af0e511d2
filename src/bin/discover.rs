//! WiNet Register Discovery
//!
//! Scans a register range of the meter and reports which registers hold the
//! power and energy readings the operator currently sees on the meter display.
//!
//! Usage: winet-discover <host[:port]> <start> <end> [options]
//!
//! Options:
//!   --power W        current meter power
//!   --import KWH     grid import energy counter
//!   --export KWH     grid export energy counter
//!   --unit ID        unit id (default 1)
//!   --kind KIND      input | holding (default input)
//!   --confirm N      confirmation re-reads per match (default 1)
//!   --override FILE  persist matches into this override file
//!
//! Example: winet-discover 192.168.1.20 5000 5700 --power 1240 --import 5234.5

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use winet_bridge::constants::DEFAULT_REGISTER_TIMEOUT_MS;
use winet_bridge::discovery::{DiscoveryMetric, Tolerances};
use winet_bridge::{
    scan_registers, ExpectedValues, ModbusTcpClient, RegisterCatalog, RegisterKind,
    RegisterMapResolver, RegisterRead, ScanOptions,
};

struct Args {
    address: String,
    start: u16,
    end: u16,
    expected: ExpectedValues,
    unit_id: u8,
    kind: RegisterKind,
    confirm: u32,
    override_path: Option<String>,
}

fn usage() -> ! {
    eprintln!(
        "Usage: winet-discover <host[:port]> <start> <end> [--power W] [--import KWH] \
         [--export KWH] [--unit ID] [--kind input|holding] [--confirm N] [--override FILE]"
    );
    std::process::exit(2);
}

fn parse_args() -> Result<Args, Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let (Some(address), Some(start), Some(end)) = (args.next(), args.next(), args.next()) else {
        usage();
    };
    let address = if address.contains(':') {
        address
    } else {
        format!("{}:502", address)
    };

    let mut parsed = Args {
        address,
        start: start.parse()?,
        end: end.parse()?,
        expected: ExpectedValues::default(),
        unit_id: 1,
        kind: RegisterKind::Input,
        confirm: 1,
        override_path: None,
    };

    while let Some(flag) = args.next() {
        let Some(value) = args.next() else {
            usage();
        };
        match flag.as_str() {
            "--power" => parsed.expected.power_w = Some(value.parse()?),
            "--import" => parsed.expected.import_kwh = Some(value.parse()?),
            "--export" => parsed.expected.export_kwh = Some(value.parse()?),
            "--unit" => parsed.unit_id = value.parse()?,
            "--kind" => parsed.kind = value.parse()?,
            "--confirm" => parsed.confirm = value.parse()?,
            "--override" => parsed.override_path = Some(value),
            _ => usage(),
        }
    }

    if parsed.start > parsed.end || parsed.expected.is_empty() {
        usage();
    }
    Ok(parsed)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = parse_args()?;
    let catalog = Arc::new(RegisterCatalog::builtin()?);
    let tolerances = Tolerances::from_catalog(&catalog);

    println!("WiNet Register Discovery v{}", winet_bridge::VERSION);
    println!("=================================");
    println!(
        "Scanning {} registers {}..={} on {} (unit {})",
        args.kind, args.start, args.end, args.address, args.unit_id
    );
    println!(
        "Tolerances: power ±{} W, energy ±max({} kWh, {}%)\n",
        tolerances.power_w,
        tolerances.energy_abs_kwh,
        tolerances.energy_ratio * 100.0
    );

    let mut client = ModbusTcpClient::tcp(
        args.address.clone(),
        args.unit_id,
        Duration::from_millis(DEFAULT_REGISTER_TIMEOUT_MS),
    );
    let options = ScanOptions::new(args.kind, args.start, args.end, args.expected)
        .with_tolerances(tolerances)
        .with_confirmation_reads(args.confirm);
    let report = scan_registers(&mut client, &options).await;
    if let Err(e) = client.disconnect().await {
        eprintln!("Disconnect failed: {}", e);
    }

    println!(
        "Scanned {} addresses, {} read errors\n",
        report.addresses_scanned, report.read_errors
    );

    println!("Matches");
    println!("-------");
    if report.matches.is_empty() {
        println!("  none");
    }
    for m in &report.matches {
        println!(
            "  {:<20} register {:>5}  {:>12.3}  ({}, deviation {:.3})",
            m.metric.to_string(),
            m.register,
            m.value,
            m.encoding,
            m.deviation
        );
    }

    if !report.candidates.is_empty() {
        println!("\nPower candidates (no exact match)");
        println!("---------------------------------");
        for c in &report.candidates {
            println!(
                "  register {:>5}  mean {:>10.1}  range {:>8.1}  stddev {:>8.1}  sign changes {}",
                c.register, c.mean, c.range, c.stddev, c.sign_changes
            );
        }
    }

    let Some(path) = args.override_path else {
        return Ok(());
    };
    let found: Vec<(&str, u16)> = [
        DiscoveryMetric::Power,
        DiscoveryMetric::ImportEnergy,
        DiscoveryMetric::ExportEnergy,
    ]
    .into_iter()
    .filter_map(|metric| report.match_for(metric).map(|m| (metric.metric_id(), m.register)))
    .collect();
    if found.is_empty() {
        println!("\nNothing to persist");
        return Ok(());
    }

    let resolver = RegisterMapResolver::new(catalog).with_override_path(&path);
    let changed = resolver.record_discovered(found)?;
    println!("\nUpdated {} entries in {}", changed, path);
    Ok(())
}
