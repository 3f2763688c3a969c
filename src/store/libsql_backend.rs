//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. A single connection is
//! reused for all operations; `libsql::Connection` is `Send + Sync` and safe
//! for concurrent async use.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::model::{
    CacheStats, CachedScore, Message, NewMessage, ReviewFilter, ReviewPage, ReviewQuery,
    ReviewRecord, ScoreSet, ScoreSource, SortKey,
};
use crate::store::traits::Database;

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<String>` to a libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

const MESSAGE_COLUMNS: &str = "id, warehouse_id, original_text, redacted_text, community_id, \
     group_id, group_name, sender_id, message_timestamp, ingested_at, \
     adversity_score, violence_score, inappropriate_score, spam_score, aggregate_score, \
     reviewed, reviewed_at, score_source, score_reasoning";

/// Map a libsql row (in MESSAGE_COLUMNS order) to a Message.
///
/// Scores are all-or-nothing: a `ScoreSet` is built only when every score
/// column is non-null, so a partially written row reads back as unscored.
fn row_to_message(row: &libsql::Row) -> Result<Message, libsql::Error> {
    let message_ts: Option<String> = row.get(8).ok();
    let ingested_str: String = row.get(9)?;
    let reviewed_at: Option<String> = row.get(16).ok();

    let adversity: Option<f64> = row.get(10).ok();
    let violence: Option<f64> = row.get(11).ok();
    let inappropriate: Option<f64> = row.get(12).ok();
    let spam: Option<f64> = row.get(13).ok();
    let aggregate: Option<f64> = row.get(14).ok();

    let scores = match (adversity, violence, inappropriate, spam, aggregate) {
        (Some(adversity), Some(violence), Some(inappropriate), Some(spam), Some(aggregate)) => {
            Some(ScoreSet {
                adversity,
                violence,
                inappropriate,
                spam,
                aggregate,
            })
        }
        _ => None,
    };

    let source_str: Option<String> = row.get(17).ok();
    let reviewed_flag: i64 = row.get(15)?;

    Ok(Message {
        id: row.get(0)?,
        warehouse_id: row.get(1).ok(),
        original_text: row.get(2)?,
        redacted_text: row.get(3).ok(),
        community_id: row.get(4)?,
        group_id: row.get(5)?,
        group_name: row.get(6).ok(),
        sender_id: row.get(7)?,
        message_timestamp: parse_optional_datetime(&message_ts),
        ingested_at: parse_datetime(&ingested_str),
        scores,
        score_source: source_str.as_deref().and_then(ScoreSource::parse),
        score_reasoning: row.get(18).ok(),
        reviewed: reviewed_flag != 0,
        reviewed_at: parse_optional_datetime(&reviewed_at),
    })
}

/// ORDER BY clause for a review-queue sort key.
fn order_clause(sort: SortKey) -> &'static str {
    match sort {
        SortKey::TimestampDesc => "message_timestamp DESC NULLS LAST",
        SortKey::TimestampAsc => "message_timestamp ASC NULLS LAST",
        SortKey::ScoreDesc => "aggregate_score DESC NULLS LAST",
        SortKey::GroupName => "group_name ASC NULLS LAST",
    }
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Messages ────────────────────────────────────────────────────

    async fn insert_message(&self, msg: &NewMessage) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let (adversity, violence, inappropriate, spam, aggregate) = match msg.scores {
            Some(s) => (
                libsql::Value::Real(s.adversity),
                libsql::Value::Real(s.violence),
                libsql::Value::Real(s.inappropriate),
                libsql::Value::Real(s.spam),
                libsql::Value::Real(s.aggregate),
            ),
            None => (
                libsql::Value::Null,
                libsql::Value::Null,
                libsql::Value::Null,
                libsql::Value::Null,
                libsql::Value::Null,
            ),
        };

        conn.execute(
            "INSERT INTO messages (warehouse_id, original_text, redacted_text, community_id, \
                group_id, group_name, sender_id, message_timestamp, ingested_at, \
                adversity_score, violence_score, inappropriate_score, spam_score, aggregate_score, \
                score_source, score_reasoning) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                opt_text_owned(msg.warehouse_id.clone()),
                msg.original_text.clone(),
                opt_text_owned(msg.redacted_text.clone()),
                msg.community_id.clone(),
                msg.group_id.clone(),
                opt_text_owned(msg.group_name.clone()),
                msg.sender_id.clone(),
                opt_text_owned(msg.message_timestamp.map(|t| t.to_rfc3339())),
                Utc::now().to_rfc3339(),
                adversity,
                violence,
                inappropriate,
                spam,
                aggregate,
                opt_text_owned(msg.scores.map(|_| {
                    msg.score_source
                        .unwrap_or(ScoreSource::Classifier)
                        .as_str()
                        .to_string()
                })),
                opt_text_owned(msg.score_reasoning.clone()),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_message: {e}")))?;

        let id = conn.last_insert_rowid();
        debug!(id, group_id = %msg.group_id, "Message inserted");
        Ok(id)
    }

    async fn get_message(&self, id: i64) -> Result<Option<Message>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_message: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_message: {e}")))?
        {
            Some(row) => Ok(Some(
                row_to_message(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_message map: {e}")))?,
            )),
            None => Ok(None),
        }
    }

    async fn message_exists(
        &self,
        group_id: &str,
        sender_id: &str,
        original_text: &str,
    ) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM messages \
                 WHERE group_id = ?1 AND sender_id = ?2 AND original_text = ?3 LIMIT 1",
                params![group_id, sender_id, original_text],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("message_exists: {e}")))?;

        Ok(rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("message_exists: {e}")))?
            .is_some())
    }

    async fn get_unscored(&self, limit: usize) -> Result<Vec<Message>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages \
                     WHERE aggregate_score IS NULL ORDER BY id ASC LIMIT ?1"
                ),
                params![limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_unscored: {e}")))?;

        let mut messages = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_unscored: {e}")))?
        {
            messages.push(
                row_to_message(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_unscored map: {e}")))?,
            );
        }
        Ok(messages)
    }

    async fn count_unscored(&self) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM messages WHERE aggregate_score IS NULL",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_unscored: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("count_unscored: {e}")))?
            .ok_or_else(|| DatabaseError::Query("count_unscored: empty result".into()))?;
        let count: i64 = row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("count_unscored: {e}")))?;
        Ok(count as u64)
    }

    async fn apply_scores(
        &self,
        id: i64,
        scores: &ScoreSet,
        redacted_text: &str,
        source: ScoreSource,
        reasoning: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE messages SET adversity_score = ?1, violence_score = ?2, \
                    inappropriate_score = ?3, spam_score = ?4, aggregate_score = ?5, \
                    redacted_text = ?6, score_source = ?7, score_reasoning = ?8 \
                 WHERE id = ?9",
                params![
                    scores.adversity,
                    scores.violence,
                    scores.inappropriate,
                    scores.spam,
                    scores.aggregate,
                    redacted_text,
                    source.as_str(),
                    opt_text_owned(reasoning.map(str::to_string)),
                    id,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("apply_scores: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "message".into(),
                id: id.to_string(),
            });
        }
        debug!(id, aggregate = scores.aggregate, source = source.as_str(), "Scores applied");
        Ok(())
    }

    async fn set_reviewed(&self, id: i64) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE messages SET reviewed = 1, reviewed_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_reviewed: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "message".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn query_messages(&self, query: &ReviewQuery) -> Result<ReviewPage, DatabaseError> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<libsql::Value> = Vec::new();

        match query.filter {
            ReviewFilter::Unreviewed => clauses.push("reviewed = 0"),
            ReviewFilter::Reviewed => clauses.push("reviewed = 1"),
            ReviewFilter::All => {}
        }

        if let Some((min, max)) = query.score_range {
            // An unset score cannot be excluded by a numeric range, so
            // unscored rows always pass.
            clauses.push(
                "(aggregate_score IS NULL OR (aggregate_score >= ? AND aggregate_score <= ?))",
            );
            values.push(libsql::Value::Real(min));
            values.push(libsql::Value::Real(max));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let mut rows = self
            .conn()
            .query(
                &format!("SELECT COUNT(*) FROM messages{where_sql}"),
                libsql::params_from_iter(values.clone()),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("query_messages count: {e}")))?;
        let total: i64 = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("query_messages count: {e}")))?
            .ok_or_else(|| DatabaseError::Query("query_messages: empty count".into()))?
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("query_messages count: {e}")))?;

        let page = query.page.max(1);
        let page_size = query.page_size.max(1);
        let offset = (page - 1) * page_size;

        values.push(libsql::Value::Integer(page_size as i64));
        values.push(libsql::Value::Integer(offset as i64));

        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages{where_sql} ORDER BY {} LIMIT ? OFFSET ?",
            order_clause(query.sort),
        );

        let mut rows = self
            .conn()
            .query(&sql, libsql::params_from_iter(values))
            .await
            .map_err(|e| DatabaseError::Query(format!("query_messages: {e}")))?;

        let mut messages = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("query_messages: {e}")))?
        {
            messages.push(
                row_to_message(&row)
                    .map_err(|e| DatabaseError::Query(format!("query_messages map: {e}")))?,
            );
        }

        Ok(ReviewPage {
            messages,
            total: total as u64,
            page,
            page_size,
        })
    }

    // ── Score cache ─────────────────────────────────────────────────

    async fn cache_lookup(
        &self,
        group_id: &str,
        sender_id: &str,
        fingerprint: &str,
    ) -> Result<Option<CachedScore>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT adversity_score, violence_score, inappropriate_score, spam_score, \
                        aggregate_score, redacted_text \
                 FROM score_cache \
                 WHERE group_id = ?1 AND sender_id = ?2 AND fingerprint = ?3",
                params![group_id, sender_id, fingerprint],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("cache_lookup: {e}")))?;

        let row = match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("cache_lookup: {e}")))?
        {
            Some(row) => row,
            None => return Ok(None),
        };

        let map_err = |e: libsql::Error| DatabaseError::Query(format!("cache_lookup map: {e}"));
        Ok(Some(CachedScore {
            scores: ScoreSet {
                adversity: row.get(0).map_err(map_err)?,
                violence: row.get(1).map_err(map_err)?,
                inappropriate: row.get(2).map_err(map_err)?,
                spam: row.get(3).map_err(map_err)?,
                aggregate: row.get(4).map_err(map_err)?,
            },
            redacted_text: row.get(5).map_err(map_err)?,
        }))
    }

    async fn cache_upsert(
        &self,
        group_id: &str,
        sender_id: &str,
        fingerprint: &str,
        scores: &ScoreSet,
        redacted_text: &str,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO score_cache (group_id, sender_id, fingerprint, \
                    adversity_score, violence_score, inappropriate_score, spam_score, \
                    aggregate_score, redacted_text, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
                 ON CONFLICT (group_id, sender_id, fingerprint) DO UPDATE SET \
                    adversity_score = excluded.adversity_score, \
                    violence_score = excluded.violence_score, \
                    inappropriate_score = excluded.inappropriate_score, \
                    spam_score = excluded.spam_score, \
                    aggregate_score = excluded.aggregate_score, \
                    redacted_text = excluded.redacted_text, \
                    updated_at = excluded.updated_at",
                params![
                    group_id,
                    sender_id,
                    fingerprint,
                    scores.adversity,
                    scores.violence,
                    scores.inappropriate,
                    scores.spam,
                    scores.aggregate,
                    redacted_text,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("cache_upsert: {e}")))?;
        Ok(())
    }

    async fn cache_stats(&self) -> Result<CacheStats, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT COUNT(*) FROM score_cache", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("cache_stats: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("cache_stats: {e}")))?
            .ok_or_else(|| DatabaseError::Query("cache_stats: empty result".into()))?;
        let entries: i64 = row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("cache_stats: {e}")))?;
        Ok(CacheStats {
            entries: entries as u64,
        })
    }

    // ── Review records ──────────────────────────────────────────────

    async fn insert_review(
        &self,
        message_id: i64,
        reviewer: &str,
        action: &str,
        reasoning: &str,
        confidence: f64,
    ) -> Result<ReviewRecord, DatabaseError> {
        let created_at = Utc::now();
        self.conn()
            .execute(
                "INSERT INTO review_records (message_id, reviewer, action, reasoning, \
                    confidence, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    message_id,
                    reviewer,
                    action,
                    reasoning,
                    confidence,
                    created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_review: {e}")))?;

        Ok(ReviewRecord {
            id: self.conn().last_insert_rowid(),
            message_id,
            reviewer: reviewer.to_string(),
            action: action.to_string(),
            reasoning: reasoning.to_string(),
            confidence,
            created_at,
        })
    }

    // ── Maintenance ─────────────────────────────────────────────────

    async fn remove_duplicates(&self) -> Result<u64, DatabaseError> {
        let deleted = self
            .conn()
            .execute(
                "DELETE FROM messages WHERE id NOT IN (\
                    SELECT MIN(id) FROM messages \
                    GROUP BY group_id, sender_id, original_text)",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("remove_duplicates: {e}")))?;
        if deleted > 0 {
            info!(deleted, "Removed duplicate messages");
        }
        Ok(deleted)
    }

    async fn clear_messages(&self) -> Result<u64, DatabaseError> {
        let deleted = self
            .conn()
            .execute("DELETE FROM messages", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("clear_messages: {e}")))?;
        info!(deleted, "Cleared all messages (score cache retained)");
        Ok(deleted)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
