//! Review queue — human triage over scored messages.
//!
//! Listing is filter/sort/paginate over the store. Marking a message
//! reviewed flips its flag and appends an audit record; records are
//! append-only, so reviewing the same message twice leaves two entries.

use std::sync::Arc;

use tracing::info;

use crate::error::Result;
use crate::store::{Database, ReviewPage, ReviewQuery, ReviewRecord};

pub struct ReviewQueue {
    db: Arc<dyn Database>,
}

impl ReviewQueue {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// One page of the queue.
    pub async fn list(&self, query: &ReviewQuery) -> Result<ReviewPage> {
        Ok(self.db.query_messages(query).await?)
    }

    /// Mark a message reviewed and record who did it and why.
    ///
    /// Errors with `NotFound` for an unknown message id. Re-reviewing an
    /// already-reviewed message is allowed and appends another record.
    pub async fn mark_reviewed(
        &self,
        message_id: i64,
        reviewer: &str,
        action: &str,
        reasoning: &str,
    ) -> Result<ReviewRecord> {
        self.db.set_reviewed(message_id).await?;
        let record = self
            .db
            .insert_review(message_id, reviewer, action, reasoning, 1.0)
            .await?;
        info!(message_id, reviewer, action, "Message reviewed");
        Ok(record)
    }
}
