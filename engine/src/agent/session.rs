//! Session context
//!
//! The project-scoped state a conversation carries between turns: which
//! stored session it writes to, the todo ledger and the history fed back into
//! context. Loaded at start or resume, persisted after every turn.

use std::sync::Arc;

use anyhow::Result;
use sdk::EngineError;
use tokio::sync::Mutex;
use tracing::info;

use crate::conductor::ProjectIdentity;
use crate::db::{Database, SessionRecord, TurnRole};
use crate::llm::Message;
use crate::todo::TodoLedger;
use crate::tools::todo::SharedLedger;

/// Which stored session to continue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resume {
    /// Start fresh; a session is created on the first turn
    New,
    /// The project's most recent session, if there is one
    Latest,
    /// A specific session
    Id(String),
}

pub struct SessionContext {
    pub project: ProjectIdentity,
    session_id: Option<String>,
    ledger: SharedLedger,
    history: Vec<Message>,
}

impl SessionContext {
    pub fn new(project: ProjectIdentity, ledger: TodoLedger) -> Self {
        Self {
            project,
            session_id: None,
            ledger: Arc::new(Mutex::new(ledger)),
            history: Vec::new(),
        }
    }

    /// Context continuing `record`. Turns without content contribute nothing.
    pub fn resumed(project: ProjectIdentity, ledger: TodoLedger, record: &SessionRecord) -> Self {
        let history = record
            .turns
            .iter()
            .filter(|t| !t.content.is_empty())
            .map(|t| match t.role {
                TurnRole::User => Message::user(&t.content),
                TurnRole::Assistant => Message::assistant(&t.content),
            })
            .collect();
        Self {
            project,
            session_id: Some(record.id.clone()),
            ledger: Arc::new(Mutex::new(ledger)),
            history,
        }
    }

    /// Load the project's ledger and, if asked, a stored session.
    ///
    /// Returns the resumed record too so the caller can restore its model.
    pub async fn open(
        db: &Database,
        project: ProjectIdentity,
        resume: Resume,
    ) -> Result<(Self, Option<SessionRecord>)> {
        let ledger = db.todos().load(&project.id).await?;
        let sessions = db.sessions();

        let session_id = match resume {
            Resume::New => None,
            Resume::Latest => sessions.latest_session(&project.id).await?.map(|s| s.id),
            Resume::Id(id) => Some(id),
        };
        let Some(session_id) = session_id else {
            return Ok((Self::new(project, ledger), None));
        };

        let record = sessions
            .load_session(&session_id)
            .await?
            .filter(|r| r.project_id == project.id)
            .ok_or_else(|| EngineError::SessionNotFound(session_id.clone()))?;
        info!(
            "Resuming session {} ({} turns)",
            record.id,
            record.turns.len()
        );
        Ok((Self::resumed(project, ledger, &record), Some(record)))
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub(crate) fn set_session_id(&mut self, id: String) {
        self.session_id = Some(id);
    }

    /// Handle shared with the todo tools
    pub fn ledger(&self) -> SharedLedger {
        Arc::clone(&self.ledger)
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub(crate) fn push_history(&mut self, message: Message) {
        self.history.push(message);
    }

    pub(crate) fn clear_history(&mut self) {
        self.history.clear();
    }
}
