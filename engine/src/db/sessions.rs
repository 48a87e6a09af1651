/// Session persistence
///
/// Sessions hold the turns of one conversation with a project. Turns and
/// their tool calls are appended in a single transaction; tool inputs and
/// outputs are stored as the exact JSON text so a replay reproduces them.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::fmt;

/// Who produced a turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "user" => TurnRole::User,
            _ => TurnRole::Assistant,
        }
    }
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a turn ended
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    Complete,
    Interrupted,
    Failed,
}

impl TurnStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TurnStatus::Complete => "complete",
            TurnStatus::Interrupted => "interrupted",
            TurnStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "complete" => TurnStatus::Complete,
            "interrupted" => TurnStatus::Interrupted,
            _ => TurnStatus::Failed,
        }
    }
}

impl fmt::Display for TurnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One dispatched tool call. For plan steps `call_id` is the step id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCallRecord {
    pub call_id: String,
    pub tool: String,
    /// JSON text exactly as dispatched
    pub input: String,
    /// JSON text exactly as returned, or the serialized error
    pub output: String,
    pub ok: bool,
}

/// Todo changes made during a turn
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TodoDelta {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub created: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub completed: Vec<String>,
}

impl TodoDelta {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.completed.is_empty()
    }
}

/// A stored turn. `seq` is assigned on append.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub seq: i64,
    pub role: TurnRole,
    pub content: String,
    pub status: TurnStatus,
    pub tool_calls: Vec<ToolCallRecord>,
    pub todo_delta: TodoDelta,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TurnRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, content)
    }

    fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            seq: 0,
            role,
            content: content.into(),
            status: TurnStatus::Complete,
            tool_calls: Vec::new(),
            todo_delta: TodoDelta::default(),
            created_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: TurnStatus) -> Self {
        self.status = status;
        self
    }
}

/// Session header as listed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionInfo {
    pub id: String,
    pub project_id: String,
    pub active_provider: String,
    pub active_model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub turn_count: i64,
}

/// A session with all of its turns
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    pub id: String,
    pub project_id: String,
    pub active_provider: String,
    pub active_model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub turns: Vec<Turn>,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn info_from_row(r: &SqliteRow) -> SessionInfo {
    SessionInfo {
        id: r.get("id"),
        project_id: r.get("project_id"),
        active_provider: r.get("active_provider"),
        active_model: r.get("active_model"),
        created_at: from_millis(r.get("created_at")),
        updated_at: from_millis(r.get("updated_at")),
        turn_count: r.get("turn_count"),
    }
}

const SELECT_INFO: &str = "SELECT s.id, s.project_id, s.active_provider, s.active_model, \
     s.created_at, s.updated_at, \
     (SELECT COUNT(*) FROM turns t WHERE t.session_id = s.id) AS turn_count \
     FROM sessions s";

/// Session repository for database operations
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create an empty session for `project_id`
    pub async fn create_session(
        &self,
        project_id: &str,
        provider: &str,
        model: &str,
    ) -> Result<SessionInfo> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_millis();

        sqlx::query(
            "INSERT INTO sessions (id, project_id, active_provider, active_model, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(project_id)
        .bind(provider)
        .bind(model)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to create session")?;

        Ok(SessionInfo {
            id,
            project_id: project_id.to_string(),
            active_provider: provider.to_string(),
            active_model: model.to_string(),
            created_at: from_millis(now),
            updated_at: from_millis(now),
            turn_count: 0,
        })
    }

    /// Append a turn and its tool calls atomically. Returns the assigned seq.
    pub async fn append_turn(&self, session_id: &str, turn: &Turn) -> Result<i64> {
        let seqs = self.append_turns(session_id, std::slice::from_ref(turn)).await?;
        Ok(seqs[0])
    }

    /// Append several turns in one transaction; either all land or none do.
    /// Returns the assigned seqs in order.
    pub async fn append_turns(&self, session_id: &str, turns: &[Turn]) -> Result<Vec<i64>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let next: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) + 1 FROM turns WHERE session_id = ?")
                .bind(session_id)
                .fetch_one(&mut *tx)
                .await
                .context("Failed to allocate turn sequence")?;

        let mut seqs = Vec::with_capacity(turns.len());
        for (offset, turn) in turns.iter().enumerate() {
            let seq = next + offset as i64;
            insert_turn(&mut *tx, session_id, seq, turn).await?;
            seqs.push(seq);
        }

        sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(now_millis())
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .context("Failed to touch session")?;

        tx.commit().await.context("Failed to commit turns")?;
        Ok(seqs)
    }

    /// Sessions of a project, newest first
    pub async fn list_sessions(&self, project_id: &str) -> Result<Vec<SessionInfo>> {
        let rows = sqlx::query(&format!(
            "{} WHERE s.project_id = ? ORDER BY s.updated_at DESC, s.rowid DESC",
            SELECT_INFO
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list sessions")?;

        Ok(rows.iter().map(info_from_row).collect())
    }

    /// Most recently updated session of a project
    pub async fn latest_session(&self, project_id: &str) -> Result<Option<SessionInfo>> {
        let row = sqlx::query(&format!(
            "{} WHERE s.project_id = ? ORDER BY s.updated_at DESC, s.rowid DESC LIMIT 1",
            SELECT_INFO
        ))
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch latest session")?;

        Ok(row.as_ref().map(info_from_row))
    }

    /// A session with turns in seq order and tool calls in call order
    pub async fn load_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let Some(header) = sqlx::query(
            "SELECT id, project_id, active_provider, active_model, created_at, updated_at \
             FROM sessions WHERE id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch session")?
        else {
            return Ok(None);
        };

        let call_rows = sqlx::query(
            "SELECT c.turn_id, c.call_id, c.tool, c.input, c.output, c.ok FROM tool_calls c \
             JOIN turns t ON t.id = c.turn_id WHERE t.session_id = ? ORDER BY c.turn_id, c.ord",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch tool calls")?;

        let mut calls: HashMap<i64, Vec<ToolCallRecord>> = HashMap::new();
        for r in &call_rows {
            calls
                .entry(r.get("turn_id"))
                .or_default()
                .push(ToolCallRecord {
                    call_id: r.get("call_id"),
                    tool: r.get("tool"),
                    input: r.get("input"),
                    output: r.get("output"),
                    ok: r.get("ok"),
                });
        }

        let turn_rows = sqlx::query(
            "SELECT id, seq, role, content, status, todo_delta, created_at FROM turns \
             WHERE session_id = ? ORDER BY seq",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch turns")?;

        let turns = turn_rows
            .iter()
            .map(|r| {
                let id: i64 = r.get("id");
                Turn {
                    seq: r.get("seq"),
                    role: TurnRole::parse(&r.get::<String, _>("role")),
                    content: r.get("content"),
                    status: TurnStatus::parse(&r.get::<String, _>("status")),
                    tool_calls: calls.remove(&id).unwrap_or_default(),
                    todo_delta: serde_json::from_str(&r.get::<String, _>("todo_delta"))
                        .unwrap_or_default(),
                    created_at: from_millis(r.get("created_at")),
                }
            })
            .collect();

        Ok(Some(SessionRecord {
            id: header.get("id"),
            project_id: header.get("project_id"),
            active_provider: header.get("active_provider"),
            active_model: header.get("active_model"),
            created_at: from_millis(header.get("created_at")),
            updated_at: from_millis(header.get("updated_at")),
            turns,
        }))
    }

    /// Persist a model switch
    pub async fn set_model(&self, session_id: &str, provider: &str, model: &str) -> Result<()> {
        sqlx::query(
            "UPDATE sessions SET active_provider = ?, active_model = ?, updated_at = ? WHERE id = ?",
        )
        .bind(provider)
        .bind(model)
        .bind(now_millis())
        .bind(session_id)
        .execute(&self.pool)
        .await
        .context("Failed to update session model")?;

        Ok(())
    }

    /// Drop every turn of a session. Tool calls go with them.
    pub async fn clear_turns(&self, session_id: &str) -> Result<u64> {
        let removed = sqlx::query("DELETE FROM turns WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .context("Failed to clear turns")?
            .rows_affected();

        Ok(removed)
    }
}

async fn insert_turn(
    conn: &mut SqliteConnection,
    session_id: &str,
    seq: i64,
    turn: &Turn,
) -> Result<()> {
    let delta = serde_json::to_string(&turn.todo_delta).context("Failed to encode todo delta")?;
    let turn_id = sqlx::query(
        "INSERT INTO turns (session_id, seq, role, content, status, todo_delta, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(session_id)
    .bind(seq)
    .bind(turn.role.as_str())
    .bind(&turn.content)
    .bind(turn.status.as_str())
    .bind(&delta)
    .bind(turn.created_at.timestamp_millis())
    .execute(&mut *conn)
    .await
    .context("Failed to append turn")?
    .last_insert_rowid();

    for (ord, call) in turn.tool_calls.iter().enumerate() {
        sqlx::query(
            "INSERT INTO tool_calls (turn_id, ord, call_id, tool, input, output, ok) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(turn_id)
        .bind(ord as i64)
        .bind(&call.call_id)
        .bind(&call.tool)
        .bind(&call.input)
        .bind(&call.output)
        .bind(call.ok)
        .execute(&mut *conn)
        .await
        .context("Failed to record tool call")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Database) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("wren.db")).await.unwrap();
        (temp_dir, db)
    }

    fn call(id: &str, ok: bool) -> ToolCallRecord {
        ToolCallRecord {
            call_id: id.into(),
            tool: "file_read".into(),
            input: r#"{"path":"src/lib.rs"}"#.into(),
            output: if ok {
                r#"{"content":"fn main() {}\n"}"#.into()
            } else {
                r#"{"kind":"execution_failed","message":"no such file","output":null}"#.into()
            },
            ok,
        }
    }

    #[tokio::test]
    async fn test_append_and_load_in_order() {
        let (_dir, db) = setup().await;
        let repo = db.sessions();
        let session = repo.create_session("proj-1", "ollama", "qwen2.5:7b").await.unwrap();

        assert_eq!(repo.append_turn(&session.id, &Turn::user("read it")).await.unwrap(), 1);

        let mut reply = Turn::assistant("done");
        reply.tool_calls = vec![call("c1", true), call("c2", false)];
        reply.todo_delta.completed = vec!["ab12cd34".into()];
        assert_eq!(repo.append_turn(&session.id, &reply).await.unwrap(), 2);

        let loaded = repo.load_session(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.turns.len(), 2);
        assert_eq!(loaded.turns[0].role, TurnRole::User);
        assert!(loaded.turns[0].tool_calls.is_empty());
        assert_eq!(loaded.turns[1].tool_calls, reply.tool_calls);
        assert_eq!(loaded.turns[1].todo_delta, reply.todo_delta);
        assert_eq!(loaded.active_model, "qwen2.5:7b");
    }

    #[tokio::test]
    async fn test_append_to_missing_session_fails() {
        let (_dir, db) = setup().await;
        let mut turn = Turn::assistant("x");
        turn.tool_calls = vec![call("c1", true)];
        assert!(db.sessions().append_turn("nope", &turn).await.is_err());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tool_calls")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_exchange_lands_together_or_not_at_all() {
        let (_dir, db) = setup().await;
        let repo = db.sessions();
        let session = repo.create_session("proj-1", "ollama", "m").await.unwrap();

        let mut reply = Turn::assistant("done");
        reply.tool_calls = vec![call("c1", true)];
        let seqs = repo
            .append_turns(&session.id, &[Turn::user("read it"), reply.clone()])
            .await
            .unwrap();
        assert_eq!(seqs, vec![1, 2]);

        sqlx::raw_sql(
            "CREATE TRIGGER refuse_replies BEFORE INSERT ON turns WHEN NEW.role = 'assistant' \
             BEGIN SELECT RAISE(ABORT, 'refused'); END",
        )
        .execute(db.pool())
        .await
        .unwrap();
        assert!(repo
            .append_turns(&session.id, &[Turn::user("again"), reply])
            .await
            .is_err());

        let loaded = repo.load_session(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.turns.len(), 2);
        assert_eq!(loaded.turns[1].content, "done");
        let calls: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tool_calls")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_list_latest_and_clear() {
        let (_dir, db) = setup().await;
        let repo = db.sessions();
        let first = repo.create_session("proj-1", "ollama", "m").await.unwrap();
        let second = repo.create_session("proj-1", "ollama", "m").await.unwrap();
        repo.create_session("proj-2", "ollama", "m").await.unwrap();
        repo.append_turn(&second.id, &Turn::user("hi")).await.unwrap();

        let sessions = repo.list_sessions("proj-1").await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, second.id);
        assert_eq!(sessions[0].turn_count, 1);
        assert_eq!(sessions[1].id, first.id);

        let latest = repo.latest_session("proj-1").await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);

        assert_eq!(repo.clear_turns(&second.id).await.unwrap(), 1);
        let cleared = repo.load_session(&second.id).await.unwrap().unwrap();
        assert!(cleared.turns.is_empty());
    }

    #[tokio::test]
    async fn test_set_model() {
        let (_dir, db) = setup().await;
        let repo = db.sessions();
        let session = repo.create_session("p", "ollama", "a").await.unwrap();
        repo.set_model(&session.id, "openai", "gpt-4o-mini").await.unwrap();

        let loaded = repo.load_session(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.active_provider, "openai");
        assert_eq!(loaded.active_model, "gpt-4o-mini");
        assert!(repo.load_session("missing").await.unwrap().is_none());
    }
}
