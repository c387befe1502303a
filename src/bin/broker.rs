use std::net::IpAddr;

use anyhow::Context;
use clap::Parser;
use telemetry_broker::{
    Broker,
    config::{Config, LogConfig, read_config_file},
    log, util,
};
use tokio::net::TcpListener;
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(about = "Streams agent metrics into the log and log commands back to agents")]
struct Args {
    /// Config file (JSON)
    #[arg(short, long)]
    file: Option<String>,

    /// Listen address
    #[arg(long)]
    host: Option<IpAddr>,

    /// Listen port
    #[arg(long)]
    port: Option<u16>,

    /// Kafka bootstrap servers
    #[arg(long)]
    bootstrap_servers: Option<String>,

    /// Use the in-process log instead of Kafka
    #[arg(long)]
    memory_log: bool,

    /// Level for the broker's own log targets
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

fn init(level: LevelFilter) {
    let filter = filter::Targets::new().with_targets(vec![
        ("telemetry_broker", level),
        ("rdkafka", LevelFilter::WARN),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let config = match &args.file {
        Some(path) => read_config_file(path).with_context(|| format!("loading {path}"))?,
        None => Config::default(),
    };

    let mut config = config.apply_env(util::get_env);

    if args.memory_log {
        config.log = LogConfig::Memory;
    }
    if let Some(servers) = &args.bootstrap_servers {
        config.set_bootstrap_servers(servers.clone());
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    Ok(config)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("unable to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    init(args.log_level);
    trace!("started with args: {args:?}");

    let config = load_config(&args)?;
    trace!("effective config: {config:?}");

    let backend = log::connect(&config.log).context("connecting to the message log")?;
    let broker = Broker::new(config, backend).context("creating the producer")?;

    let addr = broker.addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    info!("starting telemetry broker");
    broker.serve(listener, shutdown_signal()).await
}
