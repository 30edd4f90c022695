//! logdns - a DNS server with rule-driven query logging.

pub mod config;
pub mod dns_server;
pub mod plugin;
pub mod types;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use rolling_file::{RollingConditionBasic, RollingFileAppender};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Local-time formatter; the default subscriber timestamps in UTC.
struct LocalTimer;

impl fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

#[derive(Parser, Debug)]
#[command(name = "logdns")]
#[command(about = "A DNS server with rule-driven query logging", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "Corefile")]
    config: String,

    #[arg(long, default_value = "0.0.0.0:53")]
    address: String,
}

fn main() -> Result<()> {
    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cores)
        .thread_name("logdns-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cores))
}

async fn async_main(cores: usize) -> Result<()> {
    std::fs::create_dir_all("logs").context("failed to create log directory")?;

    let file_appender = RollingFileAppender::new(
        "logs/logdns.log",
        RollingConditionBasic::new().daily(),
        30,
    )?;
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false).with_timer(LocalTimer))
        .with(fmt::layer().with_writer(std::io::stdout).with_timer(LocalTimer))
        .init();

    let args = Args::parse();
    info!("starting logdns {} with {} worker threads", env!("CARGO_PKG_VERSION"), cores);

    let config_path = std::fs::canonicalize(&args.config)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| args.config.clone());
    let cfg = config::Config::load(&config_path)?;
    for zone in &cfg.zones {
        info!("zone {} loaded with {} handler(s)", zone.name, zone.handlers.len());
    }

    let server = dns_server::DnsServer::new(cfg)?;
    server.run(args.address).await
}
