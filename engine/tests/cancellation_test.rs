mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{plan, settings, Fixture, RecordingFrontend, ScriptedProvider};
use sdk::Interrupt;
use serde_json::json;
use wren_engine::agent::{AgentEvent, Resume};
use wren_engine::conductor::StepStatus;
use wren_engine::db::TurnStatus;

fn step_status(frontend: &RecordingFrontend, id: &str) -> Option<StepStatus> {
    frontend
        .events()
        .into_iter()
        .filter_map(|e| match e {
            AgentEvent::StepStatus {
                step_id, status, ..
            } if step_id == id => Some(status),
            _ => None,
        })
        .last()
}

#[tokio::test]
async fn test_interrupt_during_confirmation_writes_nothing() {
    let fx = Fixture::new().await;
    fx.write("src/a.rs", "a\n");
    fx.write("src/b.rs", "b\n");
    let provider = ScriptedProvider::new(vec![plan(
        "p1",
        json!({
            "goal": "touch both files",
            "steps": [
                {"id": "A", "action": "file_read", "args": {"path": "src/a.rs"}},
                {"id": "B", "action": "multi_edit", "depends_on": ["A"], "args": {
                    "description": "rewrite",
                    "edits": [
                        {"path": "src/a.rs", "content": "a2\n"},
                        {"path": "src/b.rs", "content": "b2\n"}
                    ]
                }},
                {"id": "C", "action": "shell_exec", "depends_on": ["B"], "args": {"command": "true"}}
            ]
        }),
    )]);
    let frontend = Arc::new(RecordingFrontend::default());
    let interrupt = Interrupt::new();
    frontend.interrupt_on_confirm(interrupt.clone());
    let mut agent = fx
        .agent(vec![provider], Arc::clone(&frontend), Resume::New, settings())
        .await;

    let report = agent
        .handle_input("rewrite both files", interrupt)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.status, TurnStatus::Interrupted);
    assert_eq!(fx.read("src/a.rs").unwrap(), "a\n");
    assert_eq!(fx.read("src/b.rs").unwrap(), "b\n");
    assert_eq!(step_status(&frontend, "A"), Some(StepStatus::Succeeded));
    assert_eq!(step_status(&frontend, "B"), Some(StepStatus::Skipped));
    assert_eq!(step_status(&frontend, "C"), Some(StepStatus::Skipped));
    assert!(frontend.has_event(|e| matches!(
        e,
        AgentEvent::Warning { message } if message.contains("partial turn was saved")
    )));

    let session_id = agent.session().session_id().unwrap().to_string();
    let record = fx.db.sessions().load_session(&session_id).await.unwrap().unwrap();
    let assistant = &record.turns[1];
    assert_eq!(assistant.status, TurnStatus::Interrupted);
    let tools: Vec<&str> = assistant.tool_calls.iter().map(|r| r.tool.as_str()).collect();
    assert_eq!(tools, vec!["file_read", "multi_edit"]);
    assert!(assistant.tool_calls[1].output.contains("interrupted"));
}

#[tokio::test]
async fn test_interrupt_while_waiting_for_backend() {
    let fx = Fixture::new().await;
    let frontend = Arc::new(RecordingFrontend::default());
    let mut agent = fx
        .agent(
            vec![ScriptedProvider::hanging()],
            Arc::clone(&frontend),
            Resume::New,
            settings(),
        )
        .await;

    let interrupt = Interrupt::new();
    let trigger = interrupt.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.trigger();
    });

    let report = tokio::time::timeout(
        Duration::from_secs(2),
        agent.handle_input("think hard", interrupt),
    )
    .await
    .expect("the interrupt should end the turn")
    .unwrap()
    .unwrap();

    assert_eq!(report.status, TurnStatus::Interrupted);
    assert!(report.reply.is_empty());

    let session_id = agent.session().session_id().unwrap().to_string();
    let record = fx.db.sessions().load_session(&session_id).await.unwrap().unwrap();
    assert_eq!(record.turns.len(), 2);
    assert_eq!(record.turns[0].content, "think hard");
    assert_eq!(record.turns[1].status, TurnStatus::Interrupted);
}

#[tokio::test]
async fn test_backend_timeout_fails_the_turn() {
    let fx = Fixture::new().await;
    let frontend = Arc::new(RecordingFrontend::default());
    let mut quick = settings();
    quick.llm_timeout = Duration::from_millis(50);
    let mut agent = fx
        .agent(
            vec![ScriptedProvider::hanging()],
            Arc::clone(&frontend),
            Resume::New,
            quick,
        )
        .await;

    let report = agent
        .handle_input("anyone there?", Interrupt::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.status, TurnStatus::Failed);
    assert!(frontend.has_event(|e| matches!(
        e,
        AgentEvent::Error { message, .. } if message.contains("timed out")
    )));
}
