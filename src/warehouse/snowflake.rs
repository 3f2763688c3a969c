//! Snowflake warehouse client — SELECT-only queries over the SQL REST API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::debug;

use crate::config::WarehouseConfig;
use crate::error::WarehouseError;
use crate::warehouse::{FetchWindow, Warehouse, WarehouseRecord, ensure_read_only};

/// Warehouse client backed by the Snowflake SQL API (`/api/v2/statements`).
///
/// Constructed with `None` config when credentials are absent; all fetches
/// then fail with `NotConfigured` and `is_available()` is false.
pub struct SnowflakeWarehouse {
    http: reqwest::Client,
    config: Option<WarehouseConfig>,
}

impl SnowflakeWarehouse {
    pub fn new(config: Option<WarehouseConfig>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    async fn execute(&self, statement: &str) -> Result<StatementResponse, WarehouseError> {
        let config = self.config.as_ref().ok_or(WarehouseError::NotConfigured)?;

        // No write statement ever leaves this process.
        ensure_read_only(statement)?;

        let url = format!("{}/api/v2/statements", config.account_url.trim_end_matches('/'));
        let mut body = serde_json::json!({ "statement": statement });
        if let Some(ref warehouse) = config.warehouse {
            body["warehouse"] = serde_json::json!(warehouse);
        }
        if let Some(ref role) = config.role {
            body["role"] = serde_json::json!(role);
        }

        let response = self
            .http
            .post(&url)
            .bearer_auth(config.token.expose_secret())
            .header("X-Snowflake-Authorization-Token-Type", "OAUTH")
            .json(&body)
            .send()
            .await
            .map_err(|e| WarehouseError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(WarehouseError::Transport(format!(
                "HTTP {status}: {}",
                detail.chars().take(200).collect::<String>()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| WarehouseError::Malformed(format!("statement response: {e}")))
    }
}

#[async_trait]
impl Warehouse for SnowflakeWarehouse {
    fn is_available(&self) -> bool {
        self.config.is_some()
    }

    async fn fetch_messages(
        &self,
        window: &FetchWindow,
    ) -> Result<Vec<WarehouseRecord>, WarehouseError> {
        let statement = build_messages_query(window);
        let response = self.execute(&statement).await?;

        let mut records = Vec::with_capacity(response.data.len());
        for row in &response.data {
            match row_to_record(row) {
                Some(record) => records.push(record),
                None => {
                    return Err(WarehouseError::Malformed(format!(
                        "unexpected row shape: {} columns",
                        row.len()
                    )));
                }
            }
        }
        debug!(count = records.len(), "Fetched warehouse messages");
        Ok(records)
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StatementResponse {
    #[serde(default)]
    data: Vec<Vec<Option<String>>>,
}

// ── Query construction ──────────────────────────────────────────────

/// Column order: MESSAGE_ID, TEXT, USER_ID, INTEREST_GROUP_ID, COMMUNITY_ID,
/// CREATED_AT, GROUP_NAME.
fn build_messages_query(window: &FetchWindow) -> String {
    let cutoff = window.cutoff().format("%Y-%m-%d %H:%M:%S");
    let mut where_clauses = vec![format!("m.CREATED_AT >= '{cutoff}'")];

    if let Some(ref community_id) = window.community_id {
        where_clauses.push(format!("m.COMMUNITY_ID = '{}'", escape(community_id)));
    }
    if let Some(ref group_id) = window.group_id {
        where_clauses.push(format!("m.INTEREST_GROUP_ID = '{}'", escape(group_id)));
    }

    format!(
        "SELECT m.MESSAGE_ID, m.TEXT, m.USER_ID, m.INTEREST_GROUP_ID, m.COMMUNITY_ID, \
                m.CREATED_AT, g.NAME AS GROUP_NAME \
         FROM DWH_V2.BI.DIM_INTREST_GROUP_MESSAGES m \
         LEFT JOIN DWH_V2.BI.DIM_INTREST_GROUP g \
             ON m.INTEREST_GROUP_ID = g.INTEREST_GROUP_ID \
         WHERE {} \
         ORDER BY m.CREATED_AT DESC \
         LIMIT {}",
        where_clauses.join(" AND "),
        window.limit,
    )
}

/// Escape a single-quoted SQL string literal.
fn escape(value: &str) -> String {
    value.replace('\'', "''")
}

fn row_to_record(row: &[Option<String>]) -> Option<WarehouseRecord> {
    if row.len() < 7 {
        return None;
    }
    Some(WarehouseRecord {
        message_id: row[0].clone().unwrap_or_default(),
        text: row[1].clone().unwrap_or_default(),
        sender_id: row[2].clone().unwrap_or_default(),
        group_id: row[3].clone().unwrap_or_default(),
        community_id: row[4].clone().unwrap_or_default(),
        created_at: row[5].as_deref().and_then(parse_warehouse_timestamp),
        group_name: row[6].clone(),
    })
}

/// Parse the timestamp formats the SQL API emits: RFC 3339, plain datetime,
/// or epoch seconds with a fractional part.
fn parse_warehouse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(ndt.and_utc());
    }
    if let Ok(epoch) = s.parse::<f64>() {
        return DateTime::from_timestamp(epoch as i64, 0);
    }
    None
}
