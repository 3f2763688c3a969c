//! Operational surface — the one facade callers drive the pipeline through.
//!
//! Owns the injected collaborators and exposes the manual triggers: ingest a
//! window, score a batch, stream scores, review, maintenance. Operations
//! that need an unconfigured collaborator fail up front with a configuration
//! error instead of failing call by call.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use crate::classifier::Classifier;
use crate::config::ScoringConfig;
use crate::error::{ConfigError, DatabaseError, Error, Result};
use crate::pipeline::{BatchOutcome, IngestOutcome, ScoreEvent, ScoringOrchestrator, ingest_window};
use crate::redact::Redact;
use crate::review::ReviewQueue;
use crate::store::{CacheStats, Database, Message, NewMessage, ReviewRecord};
use crate::warehouse::{FetchWindow, Warehouse};

/// A message submitted directly, bypassing warehouse ingestion.
#[derive(Debug, Clone)]
pub struct Submission {
    pub text: String,
    pub community_id: String,
    pub group_id: String,
    pub group_name: Option<String>,
    pub sender_id: String,
}

pub struct Operations {
    db: Arc<dyn Database>,
    warehouse: Arc<dyn Warehouse>,
    classifier: Arc<dyn Classifier>,
    orchestrator: ScoringOrchestrator,
    review: ReviewQueue,
}

impl Operations {
    pub fn new(
        db: Arc<dyn Database>,
        warehouse: Arc<dyn Warehouse>,
        classifier: Arc<dyn Classifier>,
        redactor: Arc<dyn Redact>,
        scoring: ScoringConfig,
    ) -> Self {
        let orchestrator =
            ScoringOrchestrator::new(db.clone(), classifier.clone(), redactor, scoring);
        let review = ReviewQueue::new(db.clone());
        Self {
            db,
            warehouse,
            classifier,
            orchestrator,
            review,
        }
    }

    /// The shared scoring orchestrator, for wiring up the poller.
    pub fn orchestrator(&self) -> ScoringOrchestrator {
        self.orchestrator.clone()
    }

    /// Fetch one window from the warehouse and ingest it.
    pub async fn trigger_ingestion(&self, window: &FetchWindow) -> Result<IngestOutcome> {
        if !self.warehouse.is_available() {
            return Err(missing("SNOWFLAKE_ACCOUNT_URL", "warehouse ingestion"));
        }
        ingest_window(&self.db, &self.warehouse, window).await
    }

    /// Score up to `limit` unscored messages.
    pub async fn trigger_batch_score(&self, limit: usize) -> Result<BatchOutcome> {
        if !self.classifier.is_available() {
            return Err(missing("ANTHROPIC_API_KEY", "scoring"));
        }
        self.orchestrator.score_batch(limit).await
    }

    /// Start continuous scoring. Returns the event stream and a stop flag.
    pub fn trigger_stream_score(&self) -> Result<(ReceiverStream<ScoreEvent>, Arc<AtomicBool>)> {
        if !self.classifier.is_available() {
            return Err(missing("ANTHROPIC_API_KEY", "scoring"));
        }
        let stop = Arc::new(AtomicBool::new(false));
        let stream = self.orchestrator.stream_scores(stop.clone());
        Ok((stream, stop))
    }

    /// Submit a message directly and score it synchronously.
    ///
    /// Goes through the same dedup gate as ingestion; resubmitting an
    /// identical (group, sender, text) triple is a constraint error. The
    /// returned message is always scored: genuine classifier output when the
    /// call succeeds (or the cache already has it), the neutral fallback
    /// otherwise.
    pub async fn submit_message(&self, submission: Submission) -> Result<Message> {
        if self
            .db
            .message_exists(
                &submission.group_id,
                &submission.sender_id,
                &submission.text,
            )
            .await?
        {
            return Err(Error::Database(DatabaseError::Constraint(
                "message already submitted for this group and sender".into(),
            )));
        }

        let id = self
            .db
            .insert_message(&NewMessage {
                warehouse_id: None,
                original_text: submission.text,
                redacted_text: None,
                community_id: submission.community_id,
                group_id: submission.group_id,
                group_name: submission.group_name,
                sender_id: submission.sender_id,
                message_timestamp: None,
                scores: None,
                score_source: None,
                score_reasoning: None,
            })
            .await?;

        let stored = self
            .db
            .get_message(id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "message".into(),
                id: id.to_string(),
            })?;
        self.orchestrator.score_one(stored).await?;

        info!(message_id = id, "Direct submission scored");
        self.db
            .get_message(id)
            .await?
            .ok_or_else(|| {
                DatabaseError::NotFound {
                    entity: "message".into(),
                    id: id.to_string(),
                }
                .into()
            })
    }

    /// Mark a message reviewed with an audit record.
    pub async fn mark_reviewed(
        &self,
        message_id: i64,
        reviewer: &str,
        action: &str,
        reasoning: &str,
    ) -> Result<ReviewRecord> {
        self.review
            .mark_reviewed(message_id, reviewer, action, reasoning)
            .await
    }

    /// The review queue, for listing.
    pub fn review_queue(&self) -> &ReviewQueue {
        &self.review
    }

    /// Collapse duplicate (group, sender, text) triples. Returns rows removed.
    pub async fn remove_duplicates(&self) -> Result<u64> {
        let removed = self.db.remove_duplicates().await?;
        if removed > 0 {
            info!(removed, "Removed duplicate messages");
        }
        Ok(removed)
    }

    /// Delete all stored messages. The score cache survives.
    pub async fn clear_all(&self) -> Result<u64> {
        let removed = self.db.clear_messages().await?;
        info!(removed, "Cleared stored messages");
        Ok(removed)
    }

    /// Score-cache statistics.
    pub async fn cache_stats(&self) -> Result<CacheStats> {
        Ok(self.db.cache_stats().await?)
    }
}

fn missing(key: &str, feature: &str) -> Error {
    ConfigError::MissingRequired {
        key: key.to_string(),
        hint: format!("{feature} is not available without it"),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::classifier::ScoreResult;
    use crate::error::ClassifierError;
    use crate::redact::RegexRedactor;
    use crate::store::{LibSqlBackend, ScoreSet, ScoreSource};
    use crate::warehouse::SnowflakeWarehouse;

    struct StaticClassifier {
        scores: Option<ScoreSet>,
    }

    #[async_trait]
    impl Classifier for StaticClassifier {
        async fn classify(&self, _redacted_text: &str) -> std::result::Result<ScoreResult, ClassifierError> {
            match self.scores {
                Some(scores) => Ok(ScoreResult {
                    scores,
                    reasoning: Some("static".into()),
                }),
                None => Err(ClassifierError::Transport("down".into())),
            }
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    struct AbsentClassifier;

    #[async_trait]
    impl Classifier for AbsentClassifier {
        async fn classify(&self, _redacted_text: &str) -> std::result::Result<ScoreResult, ClassifierError> {
            Err(ClassifierError::NotConfigured)
        }

        fn is_available(&self) -> bool {
            false
        }
    }

    async fn ops_with(classifier: Arc<dyn Classifier>) -> (Operations, Arc<LibSqlBackend>) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let scoring = ScoringConfig {
            inter_call_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let ops = Operations::new(
            db.clone(),
            Arc::new(SnowflakeWarehouse::new(None)),
            classifier,
            Arc::new(RegexRedactor::new()),
            scoring,
        );
        (ops, db)
    }

    fn submission(text: &str) -> Submission {
        Submission {
            text: text.to_string(),
            community_id: "c1".into(),
            group_id: "g1".into(),
            group_name: Some("General".into()),
            sender_id: "s1".into(),
        }
    }

    #[tokio::test]
    async fn submit_scores_synchronously() {
        let scores = ScoreSet::from_subscores(0.8, 0.0, 0.0, 0.0);
        let (ops, db) = ops_with(Arc::new(StaticClassifier {
            scores: Some(scores),
        }))
        .await;

        let msg = ops.submit_message(submission("watch it, pal")).await.unwrap();
        assert_eq!(msg.scores.unwrap().aggregate, 0.8);
        assert_eq!(msg.score_source, Some(ScoreSource::Classifier));
        assert!(msg.redacted_text.is_some());
        assert_eq!(db.cache_stats().await.unwrap().entries, 1);
    }

    #[tokio::test]
    async fn duplicate_submission_is_rejected() {
        let scores = ScoreSet::from_subscores(0.1, 0.0, 0.0, 0.0);
        let (ops, _db) = ops_with(Arc::new(StaticClassifier {
            scores: Some(scores),
        }))
        .await;

        ops.submit_message(submission("once")).await.unwrap();
        let err = ops.submit_message(submission("once")).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Database(DatabaseError::Constraint(_))
        ));
    }

    #[tokio::test]
    async fn submit_falls_back_when_classifier_fails() {
        let (ops, db) = ops_with(Arc::new(StaticClassifier { scores: None })).await;

        let msg = ops.submit_message(submission("tough luck")).await.unwrap();
        assert_eq!(msg.score_source, Some(ScoreSource::Fallback));
        assert_eq!(msg.scores.unwrap().aggregate, 0.5);
        assert_eq!(db.cache_stats().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn unconfigured_warehouse_is_a_config_error() {
        let (ops, _db) = ops_with(Arc::new(AbsentClassifier)).await;
        let err = ops
            .trigger_ingestion(&FetchWindow::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::MissingRequired { .. })
        ));
    }

    #[tokio::test]
    async fn unconfigured_classifier_is_a_config_error() {
        let (ops, _db) = ops_with(Arc::new(AbsentClassifier)).await;
        assert!(matches!(
            ops.trigger_batch_score(10).await.unwrap_err(),
            Error::Config(ConfigError::MissingRequired { .. })
        ));
        assert!(matches!(
            ops.trigger_stream_score().unwrap_err(),
            Error::Config(ConfigError::MissingRequired { .. })
        ));
    }

    #[tokio::test]
    async fn maintenance_passthroughs() {
        let scores = ScoreSet::from_subscores(0.2, 0.0, 0.0, 0.0);
        let (ops, _db) = ops_with(Arc::new(StaticClassifier {
            scores: Some(scores),
        }))
        .await;

        ops.submit_message(submission("keep me")).await.unwrap();
        assert_eq!(ops.remove_duplicates().await.unwrap(), 0);
        assert_eq!(ops.cache_stats().await.unwrap().entries, 1);
        assert_eq!(ops.clear_all().await.unwrap(), 1);
        // Cache survives a clear.
        assert_eq!(ops.cache_stats().await.unwrap().entries, 1);
    }
}
