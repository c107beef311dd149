use std::path::PathBuf;

use clap::Parser;
use termo_core::DeviceId;
use termo_edge::config::{Config, UplinkConfig};
use termo_edge::{Adc, Engine, Sampler, SysfsAdc, TcpUplink, UdpUplink, Uplink, raw_to_voltage};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "termo-edge")]
#[command(about = "Temperature sensor node")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "termo-edge.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "tracing=info,termo_edge=info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        info!(path = ?cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!("No configuration file found, using defaults");
        Config::default()
    };

    let device_id = DeviceId(config.device.id);
    let boot_id: u32 = rand::random();

    let mut adc = SysfsAdc::new(&config.sensor.adc_path);
    match adc.read_raw().await {
        Ok(raw) => info!(
            raw,
            volts = raw_to_voltage(raw, config.sensor.vref, config.sensor.adc_max),
            path = ?adc.path(),
            "ADC probe"
        ),
        Err(e) => warn!(error = %e, "ADC probe failed, samples will be flagged as faults"),
    }

    let sampler = Sampler::new(
        adc,
        config.sensor.thermistor(),
        config.sensor.min_celsius..=config.sensor.max_celsius,
    );

    info!(%device_id, boot_id, uplink = ?config.uplink, "Starting termo-edge");

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
        }
        cancel_on_signal.cancel();
    });

    match config.uplink {
        UplinkConfig::Tcp { addr } => {
            run(TcpUplink::new(addr), sampler, device_id, boot_id, &config, cancel).await?
        }
        UplinkConfig::Udp { addr } => {
            run(UdpUplink::new(addr), sampler, device_id, boot_id, &config, cancel).await?
        }
    }

    info!("termo-edge shut down complete");
    Ok(())
}

async fn run<U: Uplink>(
    uplink: U,
    sampler: Sampler<SysfsAdc>,
    device_id: DeviceId,
    boot_id: u32,
    config: &Config,
    cancel: CancellationToken,
) -> color_eyre::Result<()> {
    let engine = Engine::new(
        uplink,
        sampler,
        device_id,
        boot_id,
        config.sampling.clone(),
        config.reconnect,
    );

    engine.run(cancel).await?;
    Ok(())
}
