//! Classifier integration — scores redacted text for policy violations.
//!
//! The trait is the seam: the orchestrator and poller only see
//! `Arc<dyn Classifier>`, so tests substitute instrumented mocks and the
//! binary wires in the Anthropic-backed client.

pub mod anthropic;

pub use anthropic::AnthropicClassifier;

use async_trait::async_trait;

use crate::error::ClassifierError;
use crate::store::ScoreSet;

/// A successful classification.
#[derive(Debug, Clone)]
pub struct ScoreResult {
    pub scores: ScoreSet,
    /// Free-text rationale from the service, when provided.
    pub reasoning: Option<String>,
}

/// External text classifier.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Score a redacted message. Never invents scores: any failure
    /// (timeout, transport, malformed response) surfaces as an error and
    /// the fallback decision belongs to the caller.
    async fn classify(&self, redacted_text: &str) -> Result<ScoreResult, ClassifierError>;

    /// Whether the classifier is configured and usable.
    fn is_available(&self) -> bool {
        true
    }
}
