//! Basic tierlog usage example
//!
//! Builds a logger, writes a few entries at every routed severity, wires a
//! query trace adapter and forwards `tracing` events into the same files.
//!
//! Run with: cargo run -p tierlog --example basic_usage

use std::path::PathBuf;
use std::time::{Duration, Instant};
use tierlog::{
    facade, Field, Level, LogFormat, LoggingSettings, QueryContext, QueryLogger, QueryTraceAdapter,
    RecordNotFound, RetentionSweeper, TierlogLayer,
};
use tokio::time::sleep;
use tracing_subscriber::layer::SubscriberExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("Starting tierlog basic usage example");

    let mut settings = LoggingSettings::default();
    settings.level = Level::Debug;
    settings.format = LogFormat::Json;
    settings.directory = PathBuf::from("./example_logs");
    settings.retention_day = 3;

    let logger = facade::init(settings)?;

    // Explicit handle
    logger.debug(format_args!("cache warmed with {} entries", 128))?;
    logger.log_fields(
        Level::Info,
        "user login",
        &[
            Field::new("user_id", "user123"),
            Field::new("success", true),
            Field::duration("took", Duration::from_millis(42)),
        ],
    )?;

    // Process-wide handle
    tierlog::warn!("disk usage at {}%", 91)?;
    tierlog::error!("upstream returned {}", 503)?;
    tierlog::dpanic!("invariant violated, continuing")?;

    // Query tracing
    let queries = QueryTraceAdapter::new(logger.clone());
    let ctx = QueryContext::correlated().with_operation("load_profile");

    let begin = Instant::now();
    sleep(Duration::from_millis(5)).await;
    queries.trace(
        &ctx,
        begin,
        &|| ("SELECT * FROM users WHERE id = 7".to_string(), 1),
        None,
    );
    queries.trace(
        &ctx,
        Instant::now(),
        &|| ("SELECT * FROM users WHERE id = 8".to_string(), 0),
        Some(&RecordNotFound),
    );

    // tracing events end up in the same per-level files
    let subscriber = tracing_subscriber::registry().with(TierlogLayer::new(logger.clone()));
    tracing::subscriber::with_default(subscriber, || {
        tracing::info!(request_id = "req_789", "Handling incoming request");
    });

    let sweeper = RetentionSweeper::spawn(logger.router().clone(), Duration::from_secs(60));
    sleep(Duration::from_millis(50)).await;
    sweeper.abort();

    logger.sync()?;
    for sink in logger.router().sinks() {
        println!("{:>6} -> {}", sink.level(), sink.path().display());
    }

    println!("Check './example_logs/' for the per-level files");
    Ok(())
}
