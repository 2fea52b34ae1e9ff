//! Embedded, versioned schema migrations.
//!
//! Each migration runs in its own transaction together with its row in
//! `schema_migrations`, under a transaction-scoped advisory lock so two
//! processes booting at once apply each version exactly once.

use deadpool_postgres::Pool;
use promosync_core::{RetryPolicy, StorageError, SyncResult};

use crate::postgres::{pool_error, query_error};

/// One embedded SQL migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

/// Schema of the primary (write) database.
pub const PRIMARY_MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "promotions",
        sql: include_str!("../migrations/primary/001_promotions.sql"),
    },
    Migration {
        version: 2,
        name: "sync_events",
        sql: include_str!("../migrations/primary/002_sync_events.sql"),
    },
];

/// Schema of the replica (read) database.
pub const REPLICA_MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "slots",
        sql: include_str!("../migrations/replica/001_slots.sql"),
    },
    Migration {
        version: 2,
        name: "live_view",
        sql: include_str!("../migrations/replica/002_live_view.sql"),
    },
];

const MIGRATION_LOCK_KEY: i64 = 0x7072_6f6d_6f73;

const CREATE_MIGRATIONS_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version BIGINT PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
)";

/// Apply every migration in `set` not yet recorded. Returns how many ran.
pub async fn apply_migrations(pool: &Pool, set: &[Migration]) -> SyncResult<usize> {
    let mut client = pool.get().await.map_err(pool_error)?;

    client
        .batch_execute(CREATE_MIGRATIONS_TABLE)
        .await
        .map_err(|e| query_error("create_schema_migrations", e))?;

    let mut applied = 0;
    for migration in set {
        let tx = client
            .transaction()
            .await
            .map_err(|e| migration_error(migration, e))?;

        tx.execute("SELECT pg_advisory_xact_lock($1)", &[&MIGRATION_LOCK_KEY])
            .await
            .map_err(|e| migration_error(migration, e))?;

        let already = tx
            .query_opt(
                "SELECT 1 FROM schema_migrations WHERE version = $1",
                &[&migration.version],
            )
            .await
            .map_err(|e| migration_error(migration, e))?
            .is_some();
        if already {
            // Dropping the transaction releases the advisory lock.
            continue;
        }

        tx.batch_execute(migration.sql)
            .await
            .map_err(|e| migration_error(migration, e))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES ($1, $2)",
            &[&migration.version, &migration.name],
        )
        .await
        .map_err(|e| migration_error(migration, e))?;
        tx.commit()
            .await
            .map_err(|e| migration_error(migration, e))?;

        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Applied migration"
        );
        applied += 1;
    }

    Ok(applied)
}

/// [`apply_migrations`] under the retry helper.
pub async fn apply_migrations_with_retry(
    pool: &Pool,
    set: &[Migration],
    policy: RetryPolicy,
) -> SyncResult<usize> {
    promosync_core::retry(policy, || apply_migrations(pool, set))
        .await
        .map_err(|e| {
            tracing::error!(attempts = e.attempts, error = %e.last, "Migrations failed");
            e.into_last()
        })
}

fn migration_error(migration: &Migration, e: tokio_postgres::Error) -> StorageError {
    StorageError::Migration {
        version: migration.version,
        name: migration.name,
        reason: e.to_string(),
    }
}
