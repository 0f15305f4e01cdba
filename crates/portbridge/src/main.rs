use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum, builder::NonEmptyStringValueParser};
use libportbridge::{Bridge, BridgeOptions, BrokerConfig};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Parser)]
#[command(version, author, about)]
struct Opts {
    /// The loglevel
    #[arg(value_enum, short = 'v')]
    log_level: Option<LogLevel>,

    /// MQTT broker address (host:port), e.g. 192.168.1.1:1883.
    #[arg(long = "mqtt-broker", value_parser = NonEmptyStringValueParser::new())]
    mqtt_broker: String,

    /// Base topic. Port mapping commands are received on <topic>/portmapping,
    /// the external IP is published to <topic>/externalip.
    #[arg(long, value_parser = NonEmptyStringValueParser::new())]
    topic: String,

    /// MQTT username. Credentials are only used when a password is given too.
    #[arg(long)]
    user: Option<String>,

    /// MQTT password.
    #[arg(long)]
    password: Option<String>,

    /// Periodic time in hours to recheck the external IP address.
    #[arg(long, default_value_t = 3)]
    period: u64,
}

fn init_logging(opts: &Opts) {
    let default_rust_log = match opts.log_level {
        Some(LogLevel::Trace) => "trace",
        Some(LogLevel::Debug) => "debug",
        Some(LogLevel::Info) | None => "info",
        Some(LogLevel::Warn) => "warn",
        Some(LogLevel::Error) => "error",
    };

    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = match std::env::var("RUST_LOG").ok() {
        Some(rust_log) => EnvFilter::builder()
            .parse(&rust_log)
            .expect("can't parse RUST_LOG"),
        None => EnvFilter::builder()
            .parse(default_rust_log)
            .expect("can't parse default_rust_log"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    init_logging(&opts);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .enable_io()
        .build()?;
    rt.block_on(async_main(opts))
}

async fn async_main(opts: Opts) -> anyhow::Result<()> {
    let bridge = Bridge::start(BridgeOptions {
        broker: BrokerConfig {
            address: opts.mqtt_broker,
            username: opts.user,
            password: opts.password,
        },
        topic: opts.topic,
        poll_period: Duration::from_secs(opts.period * 60 * 60),
        discover_timeout: None,
    })
    .await
    .context("error starting portbridge")?;

    bridge.run_forever().await
}
