//! Storage model types — messages, cached scores, review records, and the
//! review-queue query shapes.

use chrono::{DateTime, Utc};

/// The four policy sub-scores plus the aggregate, each in [0, 1].
///
/// A message is either fully scored (`Some(ScoreSet)`) or fully unscored
/// (`None`); a partially scored message is unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreSet {
    pub adversity: f64,
    pub violence: f64,
    pub inappropriate: f64,
    pub spam: f64,
    /// Single-number severity summary; max of the sub-scores unless the
    /// classifier supplied its own.
    pub aggregate: f64,
}

impl ScoreSet {
    /// Build from sub-scores, deriving the aggregate as their maximum.
    pub fn from_subscores(adversity: f64, violence: f64, inappropriate: f64, spam: f64) -> Self {
        let aggregate = adversity.max(violence).max(inappropriate).max(spam);
        Self {
            adversity,
            violence,
            inappropriate,
            spam,
            aggregate,
        }
    }

    /// Clamp every component into [0, 1].
    pub fn clamped(self) -> Self {
        Self {
            adversity: self.adversity.clamp(0.0, 1.0),
            violence: self.violence.clamp(0.0, 1.0),
            inappropriate: self.inappropriate.clamp(0.0, 1.0),
            spam: self.spam.clamp(0.0, 1.0),
            aggregate: self.aggregate.clamp(0.0, 1.0),
        }
    }
}

/// Where a message's scores came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreSource {
    /// Genuine classifier output (possibly via the cache).
    Classifier,
    /// Neutral fallback applied after a classifier failure or timeout.
    Fallback,
}

impl ScoreSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreSource::Classifier => "classifier",
            ScoreSource::Fallback => "fallback",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "classifier" => Some(ScoreSource::Classifier),
            "fallback" => Some(ScoreSource::Fallback),
            _ => None,
        }
    }
}

/// A stored message.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: i64,
    /// External id from the warehouse, if the message was ingested.
    pub warehouse_id: Option<String>,
    pub original_text: String,
    pub redacted_text: Option<String>,
    pub community_id: String,
    pub group_id: String,
    pub group_name: Option<String>,
    pub sender_id: String,
    /// Original creation time at the source.
    pub message_timestamp: Option<DateTime<Utc>>,
    pub ingested_at: DateTime<Utc>,
    pub scores: Option<ScoreSet>,
    pub score_source: Option<ScoreSource>,
    pub score_reasoning: Option<String>,
    pub reviewed: bool,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Unscored means no score fields are set at all.
    pub fn is_unscored(&self) -> bool {
        self.scores.is_none()
    }
}

/// Fields for inserting a message. Scores are present only when the message
/// arrives pre-scored (cache hit on ingest, or direct synchronous submission).
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub warehouse_id: Option<String>,
    pub original_text: String,
    pub redacted_text: Option<String>,
    pub community_id: String,
    pub group_id: String,
    pub group_name: Option<String>,
    pub sender_id: String,
    pub message_timestamp: Option<DateTime<Utc>>,
    pub scores: Option<ScoreSet>,
    pub score_source: Option<ScoreSource>,
    pub score_reasoning: Option<String>,
}

/// A score-cache hit.
#[derive(Debug, Clone)]
pub struct CachedScore {
    pub scores: ScoreSet,
    pub redacted_text: String,
}

/// Score-cache statistics.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub entries: u64,
}

/// Append-only audit entry for a review action.
#[derive(Debug, Clone)]
pub struct ReviewRecord {
    pub id: i64,
    pub message_id: i64,
    pub reviewer: String,
    pub action: String,
    pub reasoning: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// Review-state filter for the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReviewFilter {
    #[default]
    Unreviewed,
    Reviewed,
    All,
}

/// Sort order for the review queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    /// Original message time, newest first (unset last).
    #[default]
    TimestampDesc,
    /// Original message time, oldest first (unset last).
    TimestampAsc,
    /// Aggregate score, highest first (unscored last).
    ScoreDesc,
    /// Group name ascending (unset last).
    GroupName,
}

/// A review-queue query: filter, sort, paginate.
#[derive(Debug, Clone)]
pub struct ReviewQuery {
    pub filter: ReviewFilter,
    /// Inclusive aggregate-score range. Unscored messages always pass this
    /// filter — an unset score cannot be excluded by a numeric range.
    pub score_range: Option<(f64, f64)>,
    pub sort: SortKey,
    /// 1-indexed page number.
    pub page: usize,
    pub page_size: usize,
}

impl Default for ReviewQuery {
    fn default() -> Self {
        Self {
            filter: ReviewFilter::default(),
            score_range: None,
            sort: SortKey::default(),
            page: 1,
            page_size: 20,
        }
    }
}

/// One page of review-queue results.
#[derive(Debug, Clone)]
pub struct ReviewPage {
    pub messages: Vec<Message>,
    pub total: u64,
    pub page: usize,
    pub page_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_is_max_of_subscores() {
        let s = ScoreSet::from_subscores(0.1, 0.7, 0.2, 0.3);
        assert_eq!(s.aggregate, 0.7);
    }

    #[test]
    fn clamp_bounds_scores() {
        let s = ScoreSet {
            adversity: -0.5,
            violence: 1.5,
            inappropriate: 0.5,
            spam: 0.0,
            aggregate: 2.0,
        }
        .clamped();
        assert_eq!(s.adversity, 0.0);
        assert_eq!(s.violence, 1.0);
        assert_eq!(s.aggregate, 1.0);
    }

    #[test]
    fn score_source_round_trips() {
        for source in [ScoreSource::Classifier, ScoreSource::Fallback] {
            assert_eq!(ScoreSource::parse(source.as_str()), Some(source));
        }
        assert_eq!(ScoreSource::parse("bogus"), None);
    }
}
