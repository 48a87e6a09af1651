/// Session store
///
/// One SQLite file holds the sessions of every project and their todo
/// ledgers. The file runs in WAL mode, so a crash mid-turn leaves at most the
/// last uncommitted transaction behind and SQLite recovers it on next open.
use anyhow::{Context, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::ConnectOptions;
use std::path::Path;
use tracing::{debug, info};

pub mod sessions;
pub mod todos;

pub use sessions::{
    SessionInfo, SessionRecord, SessionRepository, TodoDelta, ToolCallRecord, Turn, TurnRole,
    TurnStatus,
};
pub use todos::TodoRepository;

/// Schema steps, applied in order. `PRAGMA user_version` records how many ran.
const MIGRATIONS: &[(&str, &str)] = &[(
    "001_initial.sql",
    include_str!("../../migrations/001_initial.sql"),
)];

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the store at `db_path` and bring its schema up to date.
    ///
    /// Call `close()` on shutdown to fold the WAL back into the main file.
    pub async fn new(db_path: &Path) -> Result<Self> {
        info!("Opening session store at {}", db_path.display());

        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open session store {}", db_path.display()))?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        let applied: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await
            .context("Failed to read schema version")?;

        for (version, (name, sql)) in MIGRATIONS.iter().enumerate().skip(applied.max(0) as usize)
        {
            info!("Applying migration {}", name);
            let mut tx = self.pool.begin().await?;
            sqlx::raw_sql(sql)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to execute migration {}", name))?;
            // PRAGMA does not take bound parameters.
            sqlx::raw_sql(&format!("PRAGMA user_version = {}", version + 1))
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }

        debug!("Schema at version {}", MIGRATIONS.len());
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Fold the WAL back into the database file and close every connection
    pub async fn close(self) -> Result<()> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .context("Failed to checkpoint WAL")?;
        self.pool.close().await;

        debug!("Session store closed");
        Ok(())
    }

    pub fn sessions(&self) -> SessionRepository {
        SessionRepository::new(self.pool.clone())
    }

    pub fn todos(&self) -> TodoRepository {
        TodoRepository::new(self.pool.clone())
    }
}
