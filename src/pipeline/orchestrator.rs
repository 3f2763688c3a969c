//! Scoring orchestrator — pulls unscored messages through the classifier.
//!
//! Per message: check the score cache first, otherwise redact and call the
//! classifier under a global in-flight ceiling and a per-call deadline. A
//! classifier failure never blocks the queue: the message gets a neutral
//! fallback score and moves on. Fallback scores are written to the message
//! only, never to the cache, so the next scoring pass over identical content
//! still asks the classifier.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Semaphore, mpsc};
use tokio::time::{sleep, timeout};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::classifier::Classifier;
use crate::config::ScoringConfig;
use crate::error::Result;
use crate::fingerprint::fingerprint;
use crate::redact::Redact;
use crate::store::{Database, Message, ScoreSet, ScoreSource};

/// Sub-score written by the neutral fallback.
const FALLBACK_SUBSCORE: f64 = 0.1;
/// Aggregate written by the neutral fallback. Mid-range on purpose: high
/// enough to surface in score-sorted review, low enough not to page anyone.
const FALLBACK_AGGREGATE: f64 = 0.5;

/// Result of one batch scoring pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Messages scored with genuine classifier output (including cache hits).
    pub scored: usize,
    /// Messages that received the fallback score or failed outright.
    pub failed: usize,
}

/// One scored message, as emitted by the streaming mode.
#[derive(Debug, Clone, Copy)]
pub struct ScoreEvent {
    pub message_id: i64,
    pub aggregate: f64,
    /// True when the score is the neutral fallback rather than real output.
    pub fallback: bool,
}

pub(crate) enum ScoreOutcome {
    CacheHit { aggregate: f64 },
    Scored { aggregate: f64 },
    Fallback { aggregate: f64 },
}

impl ScoreOutcome {
    fn is_fallback(&self) -> bool {
        matches!(self, ScoreOutcome::Fallback { .. })
    }

    fn aggregate(&self) -> f64 {
        match self {
            ScoreOutcome::CacheHit { aggregate }
            | ScoreOutcome::Scored { aggregate }
            | ScoreOutcome::Fallback { aggregate } => *aggregate,
        }
    }
}

/// Drives messages through redaction, caching, and classification.
#[derive(Clone)]
pub struct ScoringOrchestrator {
    db: Arc<dyn Database>,
    classifier: Arc<dyn Classifier>,
    redactor: Arc<dyn Redact>,
    config: ScoringConfig,
    /// Shared across batch and stream modes so the ceiling is global.
    semaphore: Arc<Semaphore>,
}

impl ScoringOrchestrator {
    pub fn new(
        db: Arc<dyn Database>,
        classifier: Arc<dyn Classifier>,
        redactor: Arc<dyn Redact>,
        config: ScoringConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self {
            db,
            classifier,
            redactor,
            config,
            semaphore,
        }
    }

    /// Score up to `limit` unscored messages, oldest first.
    pub async fn score_batch(&self, limit: usize) -> Result<BatchOutcome> {
        let messages = self.db.get_unscored(limit).await?;
        if messages.is_empty() {
            return Ok(BatchOutcome::default());
        }
        info!(count = messages.len(), "Scoring batch");

        let mut handles = Vec::with_capacity(messages.len());
        for (i, msg) in messages.into_iter().enumerate() {
            if i > 0 {
                sleep(self.config.inter_call_delay).await;
            }
            let this = self.clone();
            handles.push(tokio::spawn(async move { this.score_one(msg).await }));
        }

        let mut outcome = BatchOutcome::default();
        for handle in handles {
            match handle.await {
                Ok(Ok(result)) if result.is_fallback() => outcome.failed += 1,
                Ok(Ok(_)) => outcome.scored += 1,
                Ok(Err(e)) => {
                    error!(error = %e, "Scoring task failed");
                    outcome.failed += 1;
                }
                Err(e) => {
                    error!(error = %e, "Scoring task panicked");
                    outcome.failed += 1;
                }
            }
        }
        info!(
            scored = outcome.scored,
            failed = outcome.failed,
            "Batch complete"
        );
        Ok(outcome)
    }

    /// Continuously score unscored messages, emitting one event per message.
    ///
    /// Runs until `stop` is set or the returned stream is dropped. When the
    /// backlog is empty it idles for `idle_pause` and checks again.
    pub fn stream_scores(&self, stop: Arc<AtomicBool>) -> ReceiverStream<ScoreEvent> {
        let (tx, rx) = mpsc::channel(32);
        let this = self.clone();

        tokio::spawn(async move {
            loop {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                let batch = match this.db.get_unscored(this.config.stream_batch_size).await {
                    Ok(batch) => batch,
                    Err(e) => {
                        error!(error = %e, "Stream failed to fetch backlog");
                        sleep(this.config.idle_pause).await;
                        continue;
                    }
                };
                if batch.is_empty() {
                    sleep(this.config.idle_pause).await;
                    continue;
                }

                for msg in batch {
                    if stop.load(Ordering::Relaxed) {
                        return;
                    }
                    let message_id = msg.id;
                    match this.score_one(msg).await {
                        Ok(result) => {
                            let event = ScoreEvent {
                                message_id,
                                aggregate: result.aggregate(),
                                fallback: result.is_fallback(),
                            };
                            // Receiver gone means the consumer hung up.
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => error!(message_id, error = %e, "Stream scoring failed"),
                    }
                    sleep(this.config.inter_call_delay).await;
                }
            }
        });

        ReceiverStream::new(rx)
    }

    /// Score a single message: cache, then classifier, then fallback.
    /// Also backs the synchronous submission path in `ops`.
    pub(crate) async fn score_one(&self, msg: Message) -> Result<ScoreOutcome> {
        let fp = fingerprint(&msg.original_text);

        if let Some(hit) = self
            .db
            .cache_lookup(&msg.group_id, &msg.sender_id, &fp)
            .await?
        {
            debug!(message_id = msg.id, "Score cache hit");
            self.db
                .apply_scores(
                    msg.id,
                    &hit.scores,
                    &hit.redacted_text,
                    ScoreSource::Classifier,
                    None,
                )
                .await?;
            return Ok(ScoreOutcome::CacheHit {
                aggregate: hit.scores.aggregate,
            });
        }

        let redacted = self.redactor.redact(&msg.original_text);

        // Semaphore is never closed, so acquire cannot fail in practice.
        let permit = self.semaphore.clone().acquire_owned().await;
        let call = timeout(
            self.config.per_call_timeout,
            self.classifier.classify(&redacted),
        )
        .await;
        drop(permit);

        match call {
            Ok(Ok(result)) => {
                self.db
                    .apply_scores(
                        msg.id,
                        &result.scores,
                        &redacted,
                        ScoreSource::Classifier,
                        result.reasoning.as_deref(),
                    )
                    .await?;
                self.db
                    .cache_upsert(&msg.group_id, &msg.sender_id, &fp, &result.scores, &redacted)
                    .await?;
                Ok(ScoreOutcome::Scored {
                    aggregate: result.scores.aggregate,
                })
            }
            Ok(Err(e)) => {
                warn!(message_id = msg.id, error = %e, "Classifier failed, applying fallback");
                self.apply_fallback(msg.id, &redacted, &e.to_string())
                    .await?;
                Ok(ScoreOutcome::Fallback {
                    aggregate: FALLBACK_AGGREGATE,
                })
            }
            Err(_) => {
                warn!(
                    message_id = msg.id,
                    timeout = ?self.config.per_call_timeout,
                    "Classifier call timed out, applying fallback"
                );
                self.apply_fallback(msg.id, &redacted, "classifier call timed out")
                    .await?;
                Ok(ScoreOutcome::Fallback {
                    aggregate: FALLBACK_AGGREGATE,
                })
            }
        }
    }

    async fn apply_fallback(&self, message_id: i64, redacted: &str, cause: &str) -> Result<()> {
        let scores = ScoreSet {
            adversity: FALLBACK_SUBSCORE,
            violence: FALLBACK_SUBSCORE,
            inappropriate: FALLBACK_SUBSCORE,
            spam: FALLBACK_SUBSCORE,
            aggregate: FALLBACK_AGGREGATE,
        };
        let reasoning = format!("fallback score: {cause}");
        self.db
            .apply_scores(
                message_id,
                &scores,
                redacted,
                ScoreSource::Fallback,
                Some(&reasoning),
            )
            .await?;
        Ok(())
    }
}
