use std::sync::Arc;
use std::sync::atomic::Ordering;

use moderation_pipeline::classifier::{AnthropicClassifier, Classifier};
use moderation_pipeline::config::{ClassifierConfig, PollerConfig, ScoringConfig, WarehouseConfig};
use moderation_pipeline::ops::Operations;
use moderation_pipeline::pipeline::{PollerDeps, spawn_ingestion_poller};
use moderation_pipeline::redact::RegexRedactor;
use moderation_pipeline::store::{Database, LibSqlBackend};
use moderation_pipeline::warehouse::{SnowflakeWarehouse, Warehouse};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    eprintln!("🛡️ Moderation Pipeline v{}", env!("CARGO_PKG_VERSION"));

    let classifier_config = ClassifierConfig::from_env();
    let warehouse_config = WarehouseConfig::from_env();
    let poller_config = PollerConfig::from_env();
    let scoring_config = ScoringConfig::from_env();

    // ── Database ─────────────────────────────────────────────────────────
    let db_path =
        std::env::var("MODERATION_DB_PATH").unwrap_or_else(|_| "./data/moderation.db".to_string());
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(std::path::Path::new(&db_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {}: {}", db_path, e);
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {}", db_path);

    // ── Collaborators ────────────────────────────────────────────────────
    let classifier: Arc<dyn Classifier> = Arc::new(AnthropicClassifier::new(classifier_config));
    let warehouse: Arc<dyn Warehouse> = Arc::new(SnowflakeWarehouse::new(warehouse_config));
    eprintln!(
        "   Classifier: {}",
        if classifier.is_available() {
            "enabled"
        } else {
            "disabled (ANTHROPIC_API_KEY not set)"
        }
    );
    eprintln!(
        "   Warehouse: {}",
        if warehouse.is_available() {
            "enabled"
        } else {
            "disabled (SNOWFLAKE_ACCOUNT_URL / SNOWFLAKE_TOKEN not set)"
        }
    );

    let ops = Operations::new(
        Arc::clone(&db),
        Arc::clone(&warehouse),
        Arc::clone(&classifier),
        Arc::new(RegexRedactor::new()),
        scoring_config,
    );

    let backlog = db.count_unscored().await?;
    if backlog > 0 {
        eprintln!("   Backlog: {} unscored messages", backlog);
    }

    // ── Ingestion poller ─────────────────────────────────────────────────
    let poller = if warehouse.is_available() {
        eprintln!(
            "   Poller: every {:?}, up to {} records\n",
            poller_config.interval, poller_config.fetch_limit
        );
        let deps = PollerDeps {
            db: Arc::clone(&db),
            warehouse: Arc::clone(&warehouse),
            orchestrator: ops.orchestrator(),
        };
        Some(spawn_ingestion_poller(poller_config, deps))
    } else {
        eprintln!("   Poller: disabled\n");
        None
    };

    tokio::signal::ctrl_c().await?;
    eprintln!("Shutting down...");

    if let Some((handle, shutdown)) = poller {
        shutdown.store(true, Ordering::Relaxed);
        handle.abort();
        handle.await.ok();
    }

    Ok(())
}
