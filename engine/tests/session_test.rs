mod common;

use std::sync::Arc;

use common::{call, settings, Fixture, RecordingFrontend, ScriptedProvider};
use sdk::{EngineError, Interrupt};
use serde_json::json;
use wren_engine::agent::{Resume, SessionContext};
use wren_engine::conductor::ProjectIdentity;
use wren_engine::db::{TurnRole, TurnStatus};
use wren_engine::llm::{MessageRole, RawProposal};

#[tokio::test]
async fn test_tool_calls_replay_exactly() {
    let fx = Fixture::new().await;
    fx.write("src/main.rs", "fn main() {}\n");
    let provider = ScriptedProvider::new(vec![
        RawProposal::calls(
            "Looking.",
            vec![
                call("c1", "file_read", json!({"path": "src/main.rs"})),
                call("c2", "file_read", json!({"path": "missing.rs"})),
            ],
        ),
        RawProposal::answer("main is empty."),
    ]);
    let mut agent = fx
        .agent(
            vec![provider],
            Arc::new(RecordingFrontend::default()),
            Resume::New,
            settings(),
        )
        .await;

    let report = agent
        .handle_input("what's in main?", Interrupt::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.tool_calls.len(), 2);
    assert!(report.tool_calls[0].ok);
    assert!(!report.tool_calls[1].ok);

    let session_id = agent.session().session_id().unwrap().to_string();
    let record = fx.db.sessions().load_session(&session_id).await.unwrap().unwrap();
    assert_eq!(record.turns.len(), 2);
    assert_eq!(record.turns[0].seq, 1);
    assert_eq!(record.turns[1].seq, 2);
    assert!(record.turns[0].tool_calls.is_empty());
    assert_eq!(record.turns[1].tool_calls, report.tool_calls);
    assert_eq!(record.turns[1].content, "main is empty.");
    assert_eq!(record.turns[1].status, TurnStatus::Complete);
}

#[tokio::test]
async fn test_resume_latest_continues_sequence_and_history() {
    let fx = Fixture::new().await;

    let session_id = {
        let mut agent = fx
            .agent(
                vec![ScriptedProvider::new(vec![RawProposal::answer(
                    "Use tokio::select!",
                )])],
                Arc::new(RecordingFrontend::default()),
                Resume::New,
                settings(),
            )
            .await;
        agent
            .handle_input("how do I race two futures?", Interrupt::new())
            .await
            .unwrap();
        agent.session().session_id().unwrap().to_string()
    };

    let provider = ScriptedProvider::new(vec![RawProposal::answer("Add a timeout branch.")]);
    let seen = Arc::clone(&provider.seen);
    let mut agent = fx
        .agent(
            vec![provider],
            Arc::new(RecordingFrontend::default()),
            Resume::Latest,
            settings(),
        )
        .await;
    assert_eq!(agent.session().session_id(), Some(session_id.as_str()));
    assert_eq!(agent.session().history().len(), 2);

    agent
        .handle_input("and with a deadline?", Interrupt::new())
        .await
        .unwrap();

    let context = seen.lock().unwrap()[0].clone();
    assert_eq!(context[0].role, MessageRole::System);
    assert!(context
        .iter()
        .any(|m| m.role == MessageRole::User && m.content == "how do I race two futures?"));
    assert!(context
        .iter()
        .any(|m| m.role == MessageRole::Assistant && m.content == "Use tokio::select!"));
    assert_eq!(context.last().unwrap().content, "and with a deadline?");

    let record = fx.db.sessions().load_session(&session_id).await.unwrap().unwrap();
    let seqs: Vec<i64> = record.turns.iter().map(|t| t.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4]);
    assert_eq!(record.turns[2].role, TurnRole::User);
    assert_eq!(record.turns[3].content, "Add a timeout branch.");

    let listed = fx.db.sessions().list_sessions(&fx.project.id).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].turn_count, 4);
}

#[tokio::test]
async fn test_resume_latest_without_sessions_starts_fresh() {
    let fx = Fixture::new().await;
    let (session, record) = SessionContext::open(&fx.db, fx.project.clone(), Resume::Latest)
        .await
        .unwrap();
    assert!(record.is_none());
    assert!(session.session_id().is_none());
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn test_resume_refuses_other_projects_and_unknown_ids() {
    let fx = Fixture::new().await;
    let info = fx
        .db
        .sessions()
        .create_session(&fx.project.id, "ollama", "llama3.1:8b")
        .await
        .unwrap();

    let other = ProjectIdentity::for_root(fx.data.path().to_path_buf());
    let err = SessionContext::open(&fx.db, other, Resume::Id(info.id.clone()))
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::SessionNotFound(id)) if *id == info.id
    ));

    let err = SessionContext::open(&fx.db, fx.project.clone(), Resume::Id("nope".into()))
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::SessionNotFound(_))
    ));

    let (session, record) =
        SessionContext::open(&fx.db, fx.project.clone(), Resume::Id(info.id.clone()))
            .await
            .unwrap();
    assert_eq!(session.session_id(), Some(info.id.as_str()));
    assert_eq!(record.unwrap().active_model, "llama3.1:8b");
}
