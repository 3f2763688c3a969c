//! Ingestion poller — periodically pulls warehouse messages into the store.
//!
//! Each cycle fetches a window of recent messages, drops anything empty or
//! image-only, gates on the (group, sender, text) dedup triple, pre-fills
//! scores from the cache when an identical message was scored before, and
//! inserts the rest unscored. A cycle that fails is logged and retried on
//! the next tick; the watermark only advances on success.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::PollerConfig;
use crate::error::Result;
use crate::fingerprint::fingerprint;
use crate::pipeline::ScoringOrchestrator;
use crate::store::{Database, NewMessage, ScoreSource};
use crate::warehouse::{FetchWindow, Warehouse};

/// Placeholder the chat platform stores for image-only messages. There is
/// no text to score, so these are skipped at ingest.
const IMAGE_SENTINEL: &str = "📷 image";

/// Result of one ingestion pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Records returned by the warehouse.
    pub fetched: usize,
    /// New messages inserted.
    pub ingested: usize,
    /// Records dropped as empty, image-only, or duplicate.
    pub skipped: usize,
}

/// Collaborators the poller needs.
pub struct PollerDeps {
    pub db: Arc<dyn Database>,
    pub warehouse: Arc<dyn Warehouse>,
    pub orchestrator: ScoringOrchestrator,
}

/// Fetch one window from the warehouse and ingest it.
pub async fn ingest_window(
    db: &Arc<dyn Database>,
    warehouse: &Arc<dyn Warehouse>,
    window: &FetchWindow,
) -> Result<IngestOutcome> {
    let records = warehouse.fetch_messages(window).await?;
    let mut outcome = IngestOutcome {
        fetched: records.len(),
        ..Default::default()
    };

    for record in records {
        let trimmed = record.text.trim();
        if trimmed.is_empty() || trimmed == IMAGE_SENTINEL {
            outcome.skipped += 1;
            continue;
        }

        if db
            .message_exists(&record.group_id, &record.sender_id, &record.text)
            .await?
        {
            outcome.skipped += 1;
            continue;
        }

        // Identical content from this sender in this group may already have
        // a cached score; hydrate it so the scoring pass never re-pays for it.
        let fp = fingerprint(&record.text);
        let cached = db
            .cache_lookup(&record.group_id, &record.sender_id, &fp)
            .await?;

        let msg = match cached {
            Some(hit) => NewMessage {
                warehouse_id: Some(record.message_id.clone()),
                original_text: record.text.clone(),
                redacted_text: Some(hit.redacted_text),
                community_id: record.community_id.clone(),
                group_id: record.group_id.clone(),
                group_name: record.group_name.clone(),
                sender_id: record.sender_id.clone(),
                message_timestamp: record.created_at,
                scores: Some(hit.scores),
                score_source: Some(ScoreSource::Classifier),
                score_reasoning: None,
            },
            None => NewMessage {
                warehouse_id: Some(record.message_id.clone()),
                original_text: record.text.clone(),
                redacted_text: None,
                community_id: record.community_id.clone(),
                group_id: record.group_id.clone(),
                group_name: record.group_name.clone(),
                sender_id: record.sender_id.clone(),
                message_timestamp: record.created_at,
                scores: None,
                score_source: None,
                score_reasoning: None,
            },
        };
        db.insert_message(&msg).await?;
        outcome.ingested += 1;
    }

    debug!(
        fetched = outcome.fetched,
        ingested = outcome.ingested,
        skipped = outcome.skipped,
        "Ingestion pass complete"
    );
    Ok(outcome)
}

/// Spawn the background ingestion poller.
///
/// Returns the task handle and a shutdown flag; setting the flag stops the
/// poller at the next tick.
pub fn spawn_ingestion_poller(
    config: PollerConfig,
    deps: PollerDeps,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();

    let handle = tokio::spawn(async move {
        info!(
            interval = ?config.interval,
            days_back = config.days_back,
            "Ingestion poller started"
        );
        let mut interval = tokio::time::interval(config.interval);
        // Watermark for incremental sync; only advances after a clean cycle.
        let mut watermark: Option<DateTime<Utc>> = None;

        loop {
            interval.tick().await;
            if shutdown_flag.load(Ordering::Relaxed) {
                info!("Ingestion poller shutting down");
                break;
            }
            poll_once(&config, &deps, &mut watermark).await;
        }
    });

    (handle, shutdown)
}

async fn poll_once(
    config: &PollerConfig,
    deps: &PollerDeps,
    watermark: &mut Option<DateTime<Utc>>,
) {
    let cycle_start = Utc::now();
    let window = FetchWindow {
        limit: config.fetch_limit,
        days_back: config.days_back,
        since: *watermark,
        ..Default::default()
    };

    match ingest_window(&deps.db, &deps.warehouse, &window).await {
        Ok(outcome) => {
            if outcome.ingested > 0 {
                info!(
                    ingested = outcome.ingested,
                    skipped = outcome.skipped,
                    "Ingested new messages"
                );
            }
            *watermark = Some(cycle_start);
        }
        Err(e) => {
            // Leave the watermark alone so the next cycle re-covers this window.
            error!(error = %e, "Ingestion cycle failed");
            return;
        }
    }

    if config.score_after_ingest {
        match deps
            .orchestrator
            .score_batch(config.inline_score_limit)
            .await
        {
            Ok(outcome) if outcome.scored + outcome.failed > 0 => {
                info!(
                    scored = outcome.scored,
                    failed = outcome.failed,
                    "Inline scoring pass complete"
                );
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Inline scoring pass failed"),
        }
    }
}
