//! Persistence layer — libSQL-backed storage for messages, cached scores,
//! and review records.

pub mod libsql_backend;
pub mod migrations;
pub mod model;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use model::{
    CacheStats, CachedScore, Message, NewMessage, ReviewFilter, ReviewPage, ReviewQuery,
    ReviewRecord, ScoreSet, ScoreSource, SortKey,
};
pub use traits::Database;
