//! WiNet Bridge
//!
//! Runs one gateway session, optionally augmented by a register meter, and
//! logs every published data point.
//!
//! Usage: winet-bridge <config.json>
//! Log level: RUST_LOG (default `info`)

use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use winet_bridge::meter::spawn_health_check;
use winet_bridge::register_map::ClassRegisterDefaults;
use winet_bridge::{
    BridgeConfig, GatewaySession, LabelTable, LoggingPublisher, MeterReader, ModbusTcpClient,
    RegisterCatalog, RegisterMapResolver,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let Some(config_path) = std::env::args().nth(1) else {
        eprintln!("Usage: winet-bridge <config.json>");
        std::process::exit(2);
    };
    let config = BridgeConfig::from_path(&config_path)?;
    info!(
        "WiNet Bridge v{} starting with {}",
        winet_bridge::VERSION,
        config_path
    );

    let catalog = Arc::new(match &config.catalog_path {
        Some(path) => RegisterCatalog::from_path(path)?,
        None => RegisterCatalog::builtin()?,
    });
    info!("Loaded {} metric definitions", catalog.len());

    let labels = match &config.labels_path {
        Some(path) => LabelTable::from_path(path)?,
        None => {
            warn!("No label table configured, translation keys pass through");
            LabelTable::default()
        }
    };

    let mut session: GatewaySession<_> =
        GatewaySession::new(config.gateway.clone(), Arc::new(labels), LoggingPublisher);

    let mut health_task = None;
    if let Some(meter) = &config.meter {
        let mut resolver = RegisterMapResolver::new(Arc::clone(&catalog));
        if let Some(path) = &config.class_defaults_path {
            resolver = resolver.with_class_defaults(Arc::new(ClassRegisterDefaults::from_path(path)?));
        }
        if let Some(path) = &config.override_path {
            resolver = resolver.with_override_path(path);
        }

        let client = ModbusTcpClient::tcp(meter.address(), meter.unit_id, meter.timeout());
        let mut reader = MeterReader::new(client, resolver)?.with_retry_backoff(meter.retry_backoff());
        if let Some(serial) = &meter.target_serial {
            reader = reader.with_target_serial(serial);
        }
        if let Some(class) = meter.inverter_class {
            reader = reader.with_inverter_class(class);
        }
        info!("Meter at {} (unit {})", meter.address(), meter.unit_id);

        let reader = Arc::new(Mutex::new(reader));
        if let Some(period) = meter.health_check_interval() {
            health_task = Some(spawn_health_check(Arc::clone(&reader), period));
        }
        session = session.with_meter(reader);
    }

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => error!("Signal handler failed: {}", e),
        }
        let _ = stop.send(true);
    });

    let result = session.run(shutdown).await;
    if let Some(task) = health_task {
        task.abort();
    }
    result?;
    Ok(())
}
