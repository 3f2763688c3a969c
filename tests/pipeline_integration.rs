//! End-to-end tests for the ingestion-dedup-scoring pipeline.
//!
//! Each test wires an in-memory store, a scripted warehouse, and a scripted
//! classifier through the real orchestration code, then checks the stored
//! outcome.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_stream::StreamExt;

use moderation_pipeline::classifier::{Classifier, ScoreResult};
use moderation_pipeline::config::ScoringConfig;
use moderation_pipeline::error::{ClassifierError, WarehouseError};
use moderation_pipeline::ops::{Operations, Submission};
use moderation_pipeline::pipeline::{ScoringOrchestrator, ingest_window};
use moderation_pipeline::redact::RegexRedactor;
use moderation_pipeline::review::ReviewQueue;
use moderation_pipeline::store::{
    Database, LibSqlBackend, ReviewFilter, ReviewQuery, ScoreSet, ScoreSource, SortKey,
};
use moderation_pipeline::warehouse::{FetchWindow, Warehouse, WarehouseRecord};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Scripted warehouse returning a fixed record set.
struct ScriptedWarehouse {
    records: Vec<WarehouseRecord>,
}

#[async_trait]
impl Warehouse for ScriptedWarehouse {
    fn is_available(&self) -> bool {
        true
    }

    async fn fetch_messages(
        &self,
        _window: &FetchWindow,
    ) -> Result<Vec<WarehouseRecord>, WarehouseError> {
        Ok(self.records.clone())
    }
}

/// Scripted classifier: scores derive from the text, messages containing
/// "slow" hang forever, and concurrency is instrumented.
struct ScriptedClassifier {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl ScriptedClassifier {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, redacted_text: &str) -> Result<ScoreResult, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if redacted_text.contains("slow") {
            tokio::time::sleep(Duration::from_secs(300)).await;
        }
        // Severity keyed off the content so tests can assert ordering.
        let aggregate = if redacted_text.contains("threat") {
            0.9
        } else if redacted_text.contains("spam") {
            0.6
        } else {
            0.1
        };
        Ok(ScoreResult {
            scores: ScoreSet::from_subscores(aggregate, 0.0, 0.0, 0.0),
            reasoning: Some("scripted".into()),
        })
    }
}

fn record(id: &str, text: &str, sender: &str, group: &str) -> WarehouseRecord {
    WarehouseRecord {
        message_id: id.to_string(),
        text: text.to_string(),
        sender_id: sender.to_string(),
        group_id: group.to_string(),
        community_id: "c1".into(),
        group_name: Some(format!("Group {group}")),
        created_at: Some(chrono::Utc::now()),
    }
}

fn fast_scoring() -> ScoringConfig {
    ScoringConfig {
        max_in_flight: 2,
        per_call_timeout: Duration::from_millis(300),
        inter_call_delay: Duration::from_millis(1),
        idle_pause: Duration::from_millis(10),
        stream_batch_size: 10,
    }
}

async fn memory_db() -> Arc<LibSqlBackend> {
    Arc::new(LibSqlBackend::new_memory().await.unwrap())
}

#[tokio::test]
async fn ingest_dedups_then_batch_scores() {
    let db = memory_db().await;
    let db_dyn: Arc<dyn Database> = db.clone();
    let warehouse: Arc<dyn Warehouse> = Arc::new(ScriptedWarehouse {
        records: vec![
            record("w1", "a real threat here", "alice", "g1"),
            record("w2", "buy my spam thing", "bob", "g1"),
            record("w3", "a real threat here", "alice", "g1"), // duplicate triple
        ],
    });

    let outcome = ingest_window(&db_dyn, &warehouse, &FetchWindow::default())
        .await
        .unwrap();
    assert_eq!(outcome.fetched, 3);
    assert_eq!(outcome.ingested, 2);
    assert_eq!(outcome.skipped, 1);

    let classifier = ScriptedClassifier::new();
    let orch = ScoringOrchestrator::new(
        db.clone(),
        classifier.clone(),
        Arc::new(RegexRedactor::new()),
        fast_scoring(),
    );
    let batch = tokio::time::timeout(TEST_TIMEOUT, orch.score_batch(10))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(batch.scored, 2);
    assert_eq!(batch.failed, 0);
    assert_eq!(db.count_unscored().await.unwrap(), 0);
    assert_eq!(db.cache_stats().await.unwrap().entries, 2);
}

#[tokio::test]
async fn batch_bounds_concurrency_and_falls_back_on_timeout() {
    let db = memory_db().await;
    let classifier = ScriptedClassifier::new();
    let db_dyn: Arc<dyn Database> = db.clone();
    let warehouse: Arc<dyn Warehouse> = Arc::new(ScriptedWarehouse {
        records: vec![
            record("w1", "fine one", "a", "g1"),
            record("w2", "fine two", "b", "g1"),
            record("w3", "fine three", "c", "g1"),
            record("w4", "fine four", "d", "g1"),
            record("w5", "a slow one", "e", "g1"),
        ],
    });
    ingest_window(&db_dyn, &warehouse, &FetchWindow::default())
        .await
        .unwrap();

    let orch = ScoringOrchestrator::new(
        db.clone(),
        classifier.clone(),
        Arc::new(RegexRedactor::new()),
        fast_scoring(),
    );
    let batch = tokio::time::timeout(TEST_TIMEOUT, orch.score_batch(10))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(batch.scored, 4);
    assert_eq!(batch.failed, 1);
    assert!(classifier.max_in_flight.load(Ordering::SeqCst) <= 2);

    // The timed-out message carries the neutral fallback and is not cached.
    assert_eq!(db.cache_stats().await.unwrap().entries, 4);
    let page = db
        .query_messages(&ReviewQuery {
            score_range: Some((0.5, 0.5)),
            sort: SortKey::ScoreDesc,
            ..Default::default()
        })
        .await
        .unwrap();
    let fallback: Vec<_> = page
        .messages
        .iter()
        .filter(|m| m.score_source == Some(ScoreSource::Fallback))
        .collect();
    assert_eq!(fallback.len(), 1);
    assert_eq!(fallback[0].scores.unwrap().aggregate, 0.5);
}

#[tokio::test]
async fn reingest_after_clear_rehydrates_from_cache() {
    let db = memory_db().await;
    let db_dyn: Arc<dyn Database> = db.clone();
    let warehouse: Arc<dyn Warehouse> = Arc::new(ScriptedWarehouse {
        records: vec![record("w1", "buy my spam thing", "bob", "g1")],
    });
    ingest_window(&db_dyn, &warehouse, &FetchWindow::default())
        .await
        .unwrap();

    let classifier = ScriptedClassifier::new();
    let orch = ScoringOrchestrator::new(
        db.clone(),
        classifier.clone(),
        Arc::new(RegexRedactor::new()),
        fast_scoring(),
    );
    orch.score_batch(10).await.unwrap();
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);

    // Wipe messages; the cache survives and pre-scores the re-ingest.
    db.clear_messages().await.unwrap();
    let outcome = ingest_window(&db_dyn, &warehouse, &FetchWindow::default())
        .await
        .unwrap();
    assert_eq!(outcome.ingested, 1);
    assert_eq!(db.count_unscored().await.unwrap(), 0);

    // And a further scoring pass has nothing to do.
    orch.score_batch(10).await.unwrap();
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn review_flow_filters_sorts_and_records() {
    let db = memory_db().await;
    let db_dyn: Arc<dyn Database> = db.clone();
    let warehouse: Arc<dyn Warehouse> = Arc::new(ScriptedWarehouse {
        records: vec![
            record("w1", "a real threat here", "alice", "g1"),
            record("w2", "buy my spam thing", "bob", "g2"),
            record("w3", "nothing much", "carol", "g1"),
        ],
    });
    ingest_window(&db_dyn, &warehouse, &FetchWindow::default())
        .await
        .unwrap();

    let orch = ScoringOrchestrator::new(
        db.clone(),
        ScriptedClassifier::new(),
        Arc::new(RegexRedactor::new()),
        fast_scoring(),
    );
    orch.score_batch(10).await.unwrap();

    let queue = ReviewQueue::new(db.clone());

    // Highest severity first.
    let page = queue
        .list(&ReviewQuery {
            sort: SortKey::ScoreDesc,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    let aggregates: Vec<f64> = page
        .messages
        .iter()
        .map(|m| m.scores.unwrap().aggregate)
        .collect();
    assert_eq!(aggregates, vec![0.9, 0.6, 0.1]);

    // Review the worst one; it leaves the default queue.
    let worst = page.messages[0].id;
    queue
        .mark_reviewed(worst, "mod-1", "escalated", "explicit threat")
        .await
        .unwrap();
    let remaining = queue.list(&ReviewQuery::default()).await.unwrap();
    assert_eq!(remaining.total, 2);

    let reviewed = queue
        .list(&ReviewQuery {
            filter: ReviewFilter::Reviewed,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(reviewed.total, 1);
    assert_eq!(reviewed.messages[0].id, worst);

    // Score-range filter narrows to the mid-severity message.
    let mid = queue
        .list(&ReviewQuery {
            filter: ReviewFilter::All,
            score_range: Some((0.5, 0.7)),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(mid.total, 1);
    assert_eq!(mid.messages[0].scores.unwrap().aggregate, 0.6);
}

#[tokio::test]
async fn pagination_is_one_indexed_and_stable() {
    let db = memory_db().await;
    let db_dyn: Arc<dyn Database> = db.clone();
    let records: Vec<WarehouseRecord> = (0..5)
        .map(|i| record(&format!("w{i}"), &format!("message {i}"), "alice", "g1"))
        .collect();
    let warehouse: Arc<dyn Warehouse> = Arc::new(ScriptedWarehouse { records });
    ingest_window(&db_dyn, &warehouse, &FetchWindow::default())
        .await
        .unwrap();

    let queue = ReviewQueue::new(db);
    let query = ReviewQuery {
        page: 1,
        page_size: 2,
        ..Default::default()
    };
    let first = queue.list(&query).await.unwrap();
    assert_eq!(first.total, 5);
    assert_eq!(first.messages.len(), 2);

    let third = queue
        .list(&ReviewQuery {
            page: 3,
            ..query.clone()
        })
        .await
        .unwrap();
    assert_eq!(third.messages.len(), 1);

    // Pages never overlap.
    let second = queue
        .list(&ReviewQuery { page: 2, ..query })
        .await
        .unwrap();
    let mut ids: Vec<i64> = first
        .messages
        .iter()
        .chain(&second.messages)
        .chain(&third.messages)
        .map(|m| m.id)
        .collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 5);
}

#[tokio::test]
async fn streaming_scores_backlog_and_stops() {
    let db = memory_db().await;
    let db_dyn: Arc<dyn Database> = db.clone();
    let warehouse: Arc<dyn Warehouse> = Arc::new(ScriptedWarehouse {
        records: vec![
            record("w1", "one", "a", "g1"),
            record("w2", "two", "b", "g1"),
            record("w3", "three", "c", "g1"),
        ],
    });
    ingest_window(&db_dyn, &warehouse, &FetchWindow::default())
        .await
        .unwrap();

    let orch = ScoringOrchestrator::new(
        db.clone(),
        ScriptedClassifier::new(),
        Arc::new(RegexRedactor::new()),
        fast_scoring(),
    );
    let stop = Arc::new(AtomicBool::new(false));
    let mut stream = orch.stream_scores(stop.clone());

    let mut seen = Vec::new();
    for _ in 0..3 {
        let event = tokio::time::timeout(TEST_TIMEOUT, stream.next())
            .await
            .unwrap()
            .unwrap();
        assert!(!event.fallback);
        seen.push(event.message_id);
    }
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), 3);
    assert_eq!(db.count_unscored().await.unwrap(), 0);

    stop.store(true, Ordering::Relaxed);
    let end = tokio::time::timeout(TEST_TIMEOUT, stream.next())
        .await
        .unwrap();
    assert!(end.is_none());
}

#[tokio::test]
async fn direct_submission_round_trip() {
    let db = memory_db().await;
    let warehouse: Arc<dyn Warehouse> = Arc::new(ScriptedWarehouse { records: vec![] });
    let ops = Operations::new(
        db.clone(),
        warehouse,
        ScriptedClassifier::new(),
        Arc::new(RegexRedactor::new()),
        fast_scoring(),
    );

    let msg = ops
        .submit_message(Submission {
            text: "this is a real threat against John Smith".into(),
            community_id: "c1".into(),
            group_id: "g1".into(),
            group_name: None,
            sender_id: "alice".into(),
        })
        .await
        .unwrap();

    assert_eq!(msg.scores.unwrap().aggregate, 0.9);
    assert_eq!(msg.score_source, Some(ScoreSource::Classifier));
    // The name was redacted before the classifier ever saw the text.
    let redacted = msg.redacted_text.unwrap();
    assert!(redacted.contains("[NAME]"));
    assert!(!redacted.contains("John"));

    // The submission is reviewable like any ingested message.
    let record = ops
        .mark_reviewed(msg.id, "mod-1", "escalated", "direct submission")
        .await
        .unwrap();
    assert_eq!(record.message_id, msg.id);
}
