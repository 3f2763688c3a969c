//! Moderation pipeline — ingestion, dedup, scoring, and review for group messages.

pub mod classifier;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod ops;
pub mod pipeline;
pub mod redact;
pub mod review;
pub mod store;
pub mod warehouse;
