//! Warehouse collaborator — read-only access to the message warehouse.
//!
//! The pipeline never writes to the warehouse. Every statement passes the
//! `ensure_read_only` guard before execution; anything resembling a write is
//! rejected up front.

pub mod snowflake;

pub use snowflake::SnowflakeWarehouse;

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;

use crate::error::WarehouseError;

/// Time-window / identifier filters for a warehouse fetch.
#[derive(Debug, Clone)]
pub struct FetchWindow {
    pub community_id: Option<String>,
    pub group_id: Option<String>,
    /// Max records to return.
    pub limit: usize,
    /// Window when no explicit `since` is given.
    pub days_back: u32,
    /// Incremental-sync watermark; overrides `days_back`.
    pub since: Option<DateTime<Utc>>,
}

impl Default for FetchWindow {
    fn default() -> Self {
        Self {
            community_id: None,
            group_id: None,
            limit: 100,
            days_back: 7,
            since: None,
        }
    }
}

impl FetchWindow {
    /// The cutoff timestamp this window starts at.
    pub fn cutoff(&self) -> DateTime<Utc> {
        self.since
            .unwrap_or_else(|| Utc::now() - Duration::days(i64::from(self.days_back)))
    }
}

/// A raw message record as returned by the warehouse.
#[derive(Debug, Clone)]
pub struct WarehouseRecord {
    pub message_id: String,
    pub text: String,
    pub sender_id: String,
    pub group_id: String,
    pub community_id: String,
    pub group_name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Read-only message warehouse.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Whether credentials are configured.
    fn is_available(&self) -> bool;

    /// Fetch message records for the given window, newest first.
    async fn fetch_messages(
        &self,
        window: &FetchWindow,
    ) -> Result<Vec<WarehouseRecord>, WarehouseError>;
}

/// SQL keywords that modify data. Statements starting with any of these are
/// rejected before execution.
static WRITE_GUARD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(INSERT|UPDATE|DELETE|DROP|CREATE|ALTER|TRUNCATE|REPLACE|MERGE|UPSERT|COPY|PUT|GRANT|REVOKE|EXECUTE|CALL)\b",
    )
    .unwrap()
});

/// Reject any statement that is not read-only.
pub fn ensure_read_only(statement: &str) -> Result<(), WarehouseError> {
    if let Some(m) = WRITE_GUARD.captures(statement) {
        return Err(WarehouseError::Rejected(m[1].to_uppercase()));
    }
    Ok(())
}
