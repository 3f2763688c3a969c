//! The ingestion-dedup-scoring pipeline.

pub mod orchestrator;
pub mod poller;

pub use orchestrator::{BatchOutcome, ScoreEvent, ScoringOrchestrator};
pub use poller::{IngestOutcome, PollerDeps, ingest_window, spawn_ingestion_poller};
