//! Backend-agnostic `Database` trait — single async interface for all
//! persistence the pipeline needs: messages, the score cache, review
//! records, and bulk maintenance.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::store::model::{
    CacheStats, CachedScore, Message, NewMessage, ReviewPage, ReviewQuery, ReviewRecord, ScoreSet,
    ScoreSource,
};

#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Messages ────────────────────────────────────────────────────

    /// Insert a message. Returns the generated local id.
    async fn insert_message(&self, msg: &NewMessage) -> Result<i64, DatabaseError>;

    /// Get a message by local id.
    async fn get_message(&self, id: i64) -> Result<Option<Message>, DatabaseError>;

    /// Dedup gate: does a message with this exact (group, sender, text)
    /// triple already exist?
    async fn message_exists(
        &self,
        group_id: &str,
        sender_id: &str,
        original_text: &str,
    ) -> Result<bool, DatabaseError>;

    /// Get up to `limit` unscored messages, oldest first.
    async fn get_unscored(&self, limit: usize) -> Result<Vec<Message>, DatabaseError>;

    /// Count unscored messages.
    async fn count_unscored(&self) -> Result<u64, DatabaseError>;

    /// Write a full score set onto a message.
    async fn apply_scores(
        &self,
        id: i64,
        scores: &ScoreSet,
        redacted_text: &str,
        source: ScoreSource,
        reasoning: Option<&str>,
    ) -> Result<(), DatabaseError>;

    /// Set the reviewed flag and timestamp. Errors with `NotFound` for an
    /// unknown id.
    async fn set_reviewed(&self, id: i64) -> Result<(), DatabaseError>;

    /// Filter/sort/paginate stored messages for the review queue.
    async fn query_messages(&self, query: &ReviewQuery) -> Result<ReviewPage, DatabaseError>;

    // ── Score cache ─────────────────────────────────────────────────

    /// Look up a cached score by (group, sender, content fingerprint).
    async fn cache_lookup(
        &self,
        group_id: &str,
        sender_id: &str,
        fingerprint: &str,
    ) -> Result<Option<CachedScore>, DatabaseError>;

    /// Idempotent upsert of a cached score (last write wins).
    async fn cache_upsert(
        &self,
        group_id: &str,
        sender_id: &str,
        fingerprint: &str,
        scores: &ScoreSet,
        redacted_text: &str,
    ) -> Result<(), DatabaseError>;

    /// Cache statistics.
    async fn cache_stats(&self) -> Result<CacheStats, DatabaseError>;

    // ── Review records ──────────────────────────────────────────────

    /// Append a review record (never mutated or deleted).
    async fn insert_review(
        &self,
        message_id: i64,
        reviewer: &str,
        action: &str,
        reasoning: &str,
        confidence: f64,
    ) -> Result<ReviewRecord, DatabaseError>;

    // ── Maintenance ─────────────────────────────────────────────────

    /// Collapse duplicate (group, sender, text) triples, keeping the lowest
    /// id per triple. Returns the number of rows deleted.
    async fn remove_duplicates(&self) -> Result<u64, DatabaseError>;

    /// Delete all stored messages. The score cache survives, so scores can
    /// be re-hydrated on the next ingest. Returns the number of rows deleted.
    async fn clear_messages(&self) -> Result<u64, DatabaseError>;
}
