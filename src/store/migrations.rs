//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY,
                warehouse_id TEXT,
                original_text TEXT NOT NULL,
                redacted_text TEXT,
                community_id TEXT NOT NULL,
                group_id TEXT NOT NULL,
                group_name TEXT,
                sender_id TEXT NOT NULL,
                message_timestamp TEXT,
                ingested_at TEXT NOT NULL,
                adversity_score REAL,
                violence_score REAL,
                inappropriate_score REAL,
                spam_score REAL,
                aggregate_score REAL,
                reviewed INTEGER NOT NULL DEFAULT 0,
                reviewed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_messages_dedup
                ON messages(group_id, sender_id, original_text);
            CREATE INDEX IF NOT EXISTS idx_messages_aggregate
                ON messages(aggregate_score);
            CREATE INDEX IF NOT EXISTS idx_messages_reviewed
                ON messages(reviewed);

            CREATE TABLE IF NOT EXISTS score_cache (
                group_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                adversity_score REAL NOT NULL,
                violence_score REAL NOT NULL,
                inappropriate_score REAL NOT NULL,
                spam_score REAL NOT NULL,
                aggregate_score REAL NOT NULL,
                redacted_text TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (group_id, sender_id, fingerprint)
            );

            CREATE TABLE IF NOT EXISTS review_records (
                id INTEGER PRIMARY KEY,
                message_id INTEGER NOT NULL REFERENCES messages(id),
                reviewer TEXT NOT NULL,
                action TEXT NOT NULL,
                reasoning TEXT NOT NULL,
                confidence REAL NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_review_records_message
                ON review_records(message_id);
        "#,
    },
    Migration {
        version: 2,
        name: "score_provenance",
        sql: r#"
            ALTER TABLE messages ADD COLUMN score_source TEXT;
            ALTER TABLE messages ADD COLUMN score_reasoning TEXT;
        "#,
    },
];

/// Run all pending migrations against the given connection.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let version = get_current_version(conn).await?;
    tracing::debug!(version, "Database migrations complete");
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
