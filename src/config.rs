//! Configuration types.
//!
//! Everything is driven by environment variables so the binary can run
//! without a config file. Each section has sensible defaults; the two
//! external collaborators (warehouse, classifier) are optional and report
//! themselves unavailable when their credentials are absent.

use std::time::Duration;

use secrecy::SecretString;

/// Configuration for the Anthropic-backed classifier.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// API key. `None` means the classifier is unavailable.
    pub api_key: Option<SecretString>,
    /// Model identifier.
    pub model: String,
    /// Hard deadline for a single classify call.
    pub timeout: Duration,
    /// Messages are truncated to this many characters before classification.
    pub max_input_chars: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "claude-sonnet-4-20250514".to_string(),
            timeout: Duration::from_secs(45),
            max_input_chars: 500,
        }
    }
}

impl ClassifierConfig {
    /// Build from environment (`ANTHROPIC_API_KEY`, `MODERATION_MODEL`).
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY")
            && !key.is_empty()
        {
            cfg.api_key = Some(SecretString::from(key));
        }
        if let Ok(model) = std::env::var("MODERATION_MODEL") {
            cfg.model = model;
        }
        if let Some(secs) = env_u64("MODERATION_CLASSIFY_TIMEOUT_SECS") {
            cfg.timeout = Duration::from_secs(secs);
        }
        cfg
    }
}

/// Configuration for the Snowflake warehouse collaborator.
///
/// Returns `None` from `from_env` when the account URL or token is missing —
/// ingestion is then disabled rather than failing per call.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Base URL of the Snowflake account, e.g. `https://acct.snowflakecomputing.com`.
    pub account_url: String,
    /// Bearer token for the SQL API.
    pub token: SecretString,
    /// Warehouse to run statements on.
    pub warehouse: Option<String>,
    /// Role to assume.
    pub role: Option<String>,
}

impl WarehouseConfig {
    pub fn from_env() -> Option<Self> {
        let account_url = std::env::var("SNOWFLAKE_ACCOUNT_URL").ok()?;
        let token = std::env::var("SNOWFLAKE_TOKEN").ok()?;
        if account_url.is_empty() || token.is_empty() {
            return None;
        }
        Some(Self {
            account_url,
            token: SecretString::from(token),
            warehouse: std::env::var("SNOWFLAKE_WAREHOUSE").ok(),
            role: std::env::var("SNOWFLAKE_ROLE").ok(),
        })
    }
}

/// Configuration for the ingestion poller.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// How often to poll the warehouse.
    pub interval: Duration,
    /// Window for the first cycle (later cycles use the last-success watermark).
    pub days_back: u32,
    /// Max records fetched per cycle.
    pub fetch_limit: usize,
    /// Score newly ingested messages at the end of each cycle.
    pub score_after_ingest: bool,
    /// Cap for the inline scoring pass.
    pub inline_score_limit: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            days_back: 1,
            fetch_limit: 100,
            score_after_ingest: false,
            inline_score_limit: 20,
        }
    }
}

impl PollerConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(secs) = env_u64("MODERATION_POLL_INTERVAL_SECS") {
            cfg.interval = Duration::from_secs(secs);
        }
        if let Some(days) = env_u64("MODERATION_POLL_DAYS_BACK") {
            cfg.days_back = days as u32;
        }
        if let Some(limit) = env_u64("MODERATION_POLL_FETCH_LIMIT") {
            cfg.fetch_limit = limit as usize;
        }
        if std::env::var("MODERATION_SCORE_AFTER_INGEST").as_deref() == Ok("1") {
            cfg.score_after_ingest = true;
        }
        cfg
    }
}

/// Configuration for the scoring orchestrator.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Ceiling on simultaneously in-flight classifier calls.
    pub max_in_flight: usize,
    /// Per-call timeout wrapped around each classifier call.
    pub per_call_timeout: Duration,
    /// Delay between sequential submissions, to smooth load.
    pub inter_call_delay: Duration,
    /// How long the streaming mode sleeps when nothing is unscored.
    pub idle_pause: Duration,
    /// Batch size the streaming mode pulls per iteration.
    pub stream_batch_size: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 2,
            per_call_timeout: Duration::from_secs(60),
            inter_call_delay: Duration::from_millis(300),
            idle_pause: Duration::from_secs(5),
            stream_batch_size: 10,
        }
    }
}

impl ScoringConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(n) = env_u64("MODERATION_MAX_IN_FLIGHT") {
            cfg.max_in_flight = (n as usize).max(1);
        }
        if let Some(secs) = env_u64("MODERATION_SCORE_TIMEOUT_SECS") {
            cfg.per_call_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = env_u64("MODERATION_INTER_CALL_DELAY_MS") {
            cfg.inter_call_delay = Duration::from_millis(ms);
        }
        cfg
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.parse().ok()
}
