/// Todo ledger persistence
///
/// One ledger per project. Saving replaces the stored ledger wholesale inside
/// a transaction so the stored order always matches insertion order.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::todo::{Priority, TodoItem, TodoLedger, TodoStatus};

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Todo repository for database operations
pub struct TodoRepository {
    pool: SqlitePool,
}

impl TodoRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Replace the stored ledger of `ledger.project_id()`
    pub async fn save(&self, ledger: &TodoLedger) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        sqlx::query("DELETE FROM todos WHERE project_id = ?")
            .bind(ledger.project_id())
            .execute(&mut *tx)
            .await
            .context("Failed to clear stored todos")?;

        for (ord, item) in ledger.list().iter().enumerate() {
            sqlx::query(
                "INSERT INTO todos (project_id, id, ord, content, priority, status, created_at, completed_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(ledger.project_id())
            .bind(&item.id)
            .bind(ord as i64)
            .bind(&item.content)
            .bind(item.priority.as_str())
            .bind(item.status.as_str())
            .bind(item.created_at.timestamp_millis())
            .bind(item.completed_at.map(|t| t.timestamp_millis()))
            .execute(&mut *tx)
            .await
            .context("Failed to store todo")?;
        }

        tx.commit().await.context("Failed to commit todos")?;
        Ok(())
    }

    /// The stored ledger of `project_id`; empty if none was saved
    pub async fn load(&self, project_id: &str) -> Result<TodoLedger> {
        let rows = sqlx::query(
            "SELECT id, content, priority, status, created_at, completed_at FROM todos \
             WHERE project_id = ? ORDER BY ord",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load todos")?;

        let items = rows
            .iter()
            .map(|r| TodoItem {
                id: r.get("id"),
                content: r.get("content"),
                priority: r
                    .get::<String, _>("priority")
                    .parse()
                    .unwrap_or(Priority::Medium),
                status: match r.get::<String, _>("status").as_str() {
                    "completed" => TodoStatus::Completed,
                    _ => TodoStatus::Pending,
                },
                created_at: from_millis(r.get("created_at")),
                completed_at: r.get::<Option<i64>, _>("completed_at").map(from_millis),
            })
            .collect();

        Ok(TodoLedger::from_items(project_id, items))
    }
}
