//! Foglio Coordinator - Entry Point
//!
//! Runs one simulated article through the full reflection workflow and
//! prints the final article run as JSON on stdout.

use foglio_coordinator::pubsub::{LogTransport, RedisTransport, Transport};
use foglio_coordinator::{ArticleStore, Config, MemoryStore, MessageBus, Newsroom, SqliteStore};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_TOPIC: &str = "Carbon border tariffs";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().collect();
    let json_logs = args.iter().any(|a| a == "--json" || a == "-j");
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");
    let topic = args
        .iter()
        .position(|a| a == "--topic" || a == "-t")
        .and_then(|i| args.get(i + 1))
        .cloned()
        .unwrap_or_else(|| DEFAULT_TOPIC.to_string());

    if help_mode {
        println!("Foglio Coordinator v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: foglio-coordinator [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --topic, -t <TEXT>  Article topic (default: {})", DEFAULT_TOPIC);
        println!("  --json, -j          Log to stderr as JSON");
        println!("  --help, -h          Show this help");
        println!();
        println!("Environment variables:");
        println!("  REDIS_URL                       Redis pub/sub transport (default: log only)");
        println!("  FOGLIO_DB_PATH                  SQLite article store (default: in memory)");
        println!("  FOGLIO_REFLECTION_POLL_SECS     Reflection poll interval (default: 5)");
        println!("  FOGLIO_REFLECTION_WAIT_SECS     Reflection soft wait (default: 300)");
        println!("  FOGLIO_GENERATION_TIMEOUT_SECS  Hard article deadline (default: 300)");
        println!("  FOGLIO_OUTBOUND_QUEUE           Outbound queue capacity (default: 1024)");
        println!("  RUST_LOG                        trace, debug, info, warn, error");
        return Ok(());
    }

    // Setup logging
    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    if json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        // stdout carries the run JSON, logs go to stderr
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("Foglio Coordinator v{}", env!("CARGO_PKG_VERSION"));
    let config = Config::from_env()?;

    let transport: Arc<dyn Transport> = match &config.redis_url {
        Some(url) => match RedisTransport::connect(url).await {
            Ok(redis) => Arc::new(redis),
            Err(e) => {
                warn!("Redis unavailable ({}), forwarding to log only", e);
                Arc::new(LogTransport)
            }
        },
        None => Arc::new(LogTransport),
    };

    let store: Arc<dyn ArticleStore> = match &config.db_path {
        Some(path) => Arc::new(SqliteStore::open(path)?),
        None => Arc::new(MemoryStore::new()),
    };

    let bus = MessageBus::start(transport, config.bus_config());
    let newsroom = Newsroom::new(Arc::clone(&bus), store, config.workflow_config());

    let result = newsroom.run_article(&topic).await;
    bus.shutdown().await;

    let run = result?;
    info!("Article {} finished: {}", run.id, run.status);
    println!("{}", serde_json::to_string_pretty(&run)?);

    Ok(())
}
