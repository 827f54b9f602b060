use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tickwise::error::BoxError;
use tickwise::logging::init_logging;
use tickwise::remote::{BasicMonitor, Monitor, StaticMonitor, TcpTransport};
use tickwise::sdk::{BasicProcessor, Collector, Exporter, LogExporter, MetricValue, Record, Registry};
use tickwise::storage::SqliteExporter;
use tickwise::{AppConfig, LogErrorSink, PushController, PushOptions, Resource};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Export metrics on a schedule set by the config service", long_about = None)]
struct Args {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Config service address, overrides the config file
    #[arg(long)]
    config_host: Option<String>,

    /// Export everything every N seconds instead of asking the config service
    #[arg(long)]
    static_period: Option<i32>,
}

/// 1, 5 and 15 minute load averages from /proc/loadavg.
struct LoadAverage;

impl Collector for LoadAverage {
    fn name(&self) -> &str {
        "system.load"
    }

    fn collect(&self) -> Result<Vec<Record>, BoxError> {
        let content = std::fs::read_to_string("/proc/loadavg")?;
        let mut records = Vec::new();
        for (window, field) in ["1m", "5m", "15m"].iter().zip(content.split_whitespace()) {
            let mut labels = HashMap::new();
            labels.insert("window".to_string(), window.to_string());
            records.push(Record::new("system.load", MetricValue::Float(field.parse()?), labels));
        }
        Ok(records)
    }
}

struct Uptime(Instant);

impl Collector for Uptime {
    fn name(&self) -> &str {
        "process.uptime"
    }

    fn collect(&self) -> Result<Vec<Record>, BoxError> {
        let secs = self.0.elapsed().as_secs() as i64;
        Ok(vec![Record::new("process.uptime", MetricValue::Integer(secs), HashMap::new())])
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    if let Some(host) = args.config_host {
        config.config_host = host;
    }
    config.validate()?;
    init_logging(&config.log);

    let registry = Arc::new(Registry::new());
    registry.register(Arc::new(LoadAverage));
    registry.register(Arc::new(Uptime(Instant::now())));
    let heartbeat = registry.counter("process.heartbeat");

    let exporter: Arc<dyn Exporter> = match config.exporter.as_str() {
        "sqlite" => {
            let storage = SqliteExporter::new(config.db_path.clone());
            storage.initialize()?;
            info!(path = %storage.db_path().display(), "database initialized");
            Arc::new(storage)
        }
        _ => Arc::new(LogExporter),
    };

    let sink = Arc::new(LogErrorSink);
    let monitor: Arc<dyn Monitor> = match args.static_period {
        Some(period) => Arc::new(StaticMonitor::with_period(period)),
        None => {
            let transport = TcpTransport::new(config.config_host.clone()).with_request_timeout(config.request_timeout());
            let resource = Resource::with_service_name(config.service_name.clone());
            Arc::new(
                BasicMonitor::new(Arc::new(transport), resource, sink.clone())
                    .with_check_frequency(config.check_frequency()),
            )
        }
    };

    let controller = PushController::new(
        registry.clone(),
        Box::new(BasicProcessor::new()),
        exporter,
        monitor,
        PushOptions {
            export_timeout: config.export_timeout(),
            fallback_period: config.fallback_period(),
            sink,
        },
    );

    println!("tickwise collector");
    println!("==================");
    println!("Config service: {}", config.config_host);
    println!("Exporter: {}", config.exporter);
    println!("Press Ctrl+C to stop\n");

    controller.start();

    let mut beat = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = beat.tick() => heartbeat.add(1),
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
        }
    }

    info!("shutting down, exporting once more");
    controller.stop().await;
    Ok(())
}
