//! src/services/grant_store.rs
//!
//! GrantStore — the transactional record store behind the download gate.
//! One row per filename in SQLite; the only write path is `try_grant`, which
//! re-checks and inserts inside a single write transaction.

use crate::models::grant::{Grant, Requester};
use chrono::Utc;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use std::{str::FromStr, sync::Arc, time::Duration};
use tracing::debug;

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of a grant attempt that reached the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantOutcome {
    /// This call created the grant.
    Granted(Grant),
    /// A grant for the filename already exists (possibly committed by a
    /// concurrent request between the pre-check and this transaction).
    AlreadyGranted,
}

#[derive(Clone)]
pub struct GrantStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl GrantStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Open a pool for `database_url`, creating the database file if needed.
    ///
    /// Connections wait up to `BUSY_TIMEOUT` for the write lock, so concurrent
    /// grant transactions queue instead of failing with `SQLITE_BUSY`.
    pub async fn connect(database_url: &str, max_connections: u32) -> sqlx::Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Ok(Self::new(Arc::new(pool)))
    }

    /// Apply the embedded schema. Safe to run repeatedly.
    pub async fn migrate(&self) -> sqlx::Result<()> {
        let statements = MIGRATION_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());

        for stmt in statements {
            tracing::debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }

        Ok(())
    }

    /// Look up the grant for `filename`, if any.
    pub async fn find(&self, filename: &str) -> sqlx::Result<Option<Grant>> {
        sqlx::query_as::<_, Grant>(
            "SELECT filename, country, region, downloaded_at
             FROM download_grants WHERE filename = ?",
        )
        .bind(filename)
        .fetch_optional(&*self.db)
        .await
    }

    /// Create the grant for `filename` unless one already exists.
    ///
    /// The transaction starts with `BEGIN IMMEDIATE`, so the write lock is
    /// held from the re-read to the commit and concurrent attempts on the same
    /// filename are serialized. Exactly one of them observes no row and
    /// inserts; the rest see the committed row and get `AlreadyGranted`.
    ///
    /// A lost race returns `AlreadyGranted` without touching the connection
    /// again; dropping `tx` rolls it back, so a failing rollback can never turn
    /// a refusal into a store error.
    pub async fn try_grant(
        &self,
        filename: &str,
        requester: &Requester,
    ) -> sqlx::Result<GrantOutcome> {
        let mut tx = self.db.begin_with("BEGIN IMMEDIATE").await?;

        let existing = sqlx::query_scalar::<_, String>(
            "SELECT filename FROM download_grants WHERE filename = ?",
        )
        .bind(filename)
        .fetch_optional(&mut *tx)
        .await?;

        if existing.is_some() {
            debug!(filename, "grant already present on re-read");
            return Ok(GrantOutcome::AlreadyGranted);
        }

        let grant = Grant {
            filename: filename.to_string(),
            country: requester.country.clone(),
            region: requester.region.clone(),
            downloaded_at: Utc::now(),
        };

        let inserted = sqlx::query(
            "INSERT INTO download_grants (filename, country, region, downloaded_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(filename) DO NOTHING",
        )
        .bind(&grant.filename)
        .bind(&grant.country)
        .bind(&grant.region)
        .bind(grant.downloaded_at)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(result) if result.rows_affected() == 1 => {}
            Ok(_) => return Ok(GrantOutcome::AlreadyGranted),
            Err(err) if is_unique_violation(&err) => return Ok(GrantOutcome::AlreadyGranted),
            Err(err) => return Err(err),
        }

        tx.commit().await?;
        Ok(GrantOutcome::Granted(grant))
    }

    /// Number of grants recorded for `filename` (0 or 1).
    pub async fn count(&self, filename: &str) -> sqlx::Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM download_grants WHERE filename = ?")
            .bind(filename)
            .fetch_one(&*self.db)
            .await
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_store(max_connections: u32) -> (TempDir, GrantStore) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("grants.db").display());
        let store = GrantStore::connect(&url, max_connections).await.unwrap();
        store.migrate().await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn find_returns_none_before_grant() {
        let (_dir, store) = open_store(1).await;
        assert_eq!(store.find("report.pdf").await.unwrap(), None);
    }

    #[tokio::test]
    async fn first_grant_wins_and_second_is_refused() {
        let (_dir, store) = open_store(2).await;
        let requester = Requester::new("NL", "nh");

        let before = Utc::now();
        let first = store.try_grant("report.pdf", &requester).await.unwrap();
        let grant = match first {
            GrantOutcome::Granted(grant) => grant,
            other => panic!("expected first attempt to be granted, got {other:?}"),
        };
        assert_eq!(grant.country, "NL");
        assert_eq!(grant.region, "nh");
        assert!(grant.downloaded_at >= before);

        let second = store.try_grant("report.pdf", &Requester::default()).await.unwrap();
        assert_eq!(second, GrantOutcome::AlreadyGranted);

        let stored = store.find("report.pdf").await.unwrap().unwrap();
        assert_eq!(stored.country, "NL");
        assert_eq!(stored.region, "nh");
        assert_eq!(store.count("report.pdf").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let (_dir, store) = open_store(1).await;
        store
            .try_grant("a.bin", &Requester::default())
            .await
            .unwrap();
        store.migrate().await.unwrap();
        assert_eq!(store.count("a.bin").await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_grants_commit_exactly_once() {
        let (_dir, store) = open_store(8).await;

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let requester = Requester::new(format!("C{i}"), "");
                store.try_grant("race.zip", &requester).await.unwrap()
            }));
        }

        let mut granted = 0;
        for handle in handles {
            if let GrantOutcome::Granted(_) = handle.await.unwrap() {
                granted += 1;
            }
        }

        assert_eq!(granted, 1);
        assert_eq!(store.count("race.zip").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn grants_are_per_filename() {
        let (_dir, store) = open_store(1).await;
        let requester = Requester::default();
        assert!(matches!(
            store.try_grant("one", &requester).await.unwrap(),
            GrantOutcome::Granted(_)
        ));
        assert!(matches!(
            store.try_grant("two", &requester).await.unwrap(),
            GrantOutcome::Granted(_)
        ));
    }
}
