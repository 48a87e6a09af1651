mod common;

use std::sync::Arc;

use common::{call, settings, Fixture, RecordingFrontend, ScriptedProvider};
use sdk::Interrupt;
use serde_json::json;
use wren_engine::agent::{AgentEvent, Resume};
use wren_engine::llm::RawProposal;
use wren_engine::todo::{Priority, TodoLedger, TodoStatus};

#[tokio::test]
async fn test_message_completes_matching_todos_only() {
    let fx = Fixture::new().await;
    let mut ledger = TodoLedger::new(&fx.project.id);
    let jwt = ledger
        .create("Implement JWT authentication", Some(Priority::High))
        .unwrap()
        .id;
    let readme = ledger.create("Write the README", None).unwrap().id;
    fx.db.todos().save(&ledger).await.unwrap();

    let reply = format!("[\"{}\", \"deadbeef\"]", jwt);
    let provider = ScriptedProvider::new(vec![RawProposal::answer("Nice work.")])
        .with_inferences(vec![reply.as_str()]);
    let prompts = Arc::clone(&provider.prompts);
    let frontend = Arc::new(RecordingFrontend::default());
    let mut agent = fx
        .agent(vec![provider], Arc::clone(&frontend), Resume::New, settings())
        .await;

    let report = agent
        .handle_input("I finished the JWT auth, it's merged", Interrupt::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.todo_delta.completed, vec![jwt.clone()]);
    assert!(report.todo_delta.created.is_empty());

    let prompts = prompts.lock().unwrap().clone();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains(&jwt));
    assert!(prompts[0].contains(&readme));
    assert!(prompts[0].contains("I finished the JWT auth"));

    assert!(frontend.has_event(|e| matches!(
        e,
        AgentEvent::TodosCompleted { items } if items.len() == 1 && items[0].id == jwt
    )));

    let stored = fx.db.todos().load(&fx.project.id).await.unwrap();
    assert_eq!(stored.get(&jwt).unwrap().status, TodoStatus::Completed);
    assert!(stored.get(&jwt).unwrap().completed_at.is_some());
    assert_eq!(stored.get(&readme).unwrap().status, TodoStatus::Pending);

    let session_id = agent.session().session_id().unwrap().to_string();
    let record = fx.db.sessions().load_session(&session_id).await.unwrap().unwrap();
    assert_eq!(record.turns[1].todo_delta.completed, vec![jwt]);
}

#[tokio::test]
async fn test_unparseable_inference_completes_nothing() {
    let fx = Fixture::new().await;
    let mut ledger = TodoLedger::new(&fx.project.id);
    let id = ledger.create("Fix the flaky login test", None).unwrap().id;
    fx.db.todos().save(&ledger).await.unwrap();

    let provider = ScriptedProvider::new(vec![])
        .with_inferences(vec!["Sure! The login test sounds done to me."]);
    let frontend = Arc::new(RecordingFrontend::default());
    let mut agent = fx
        .agent(vec![provider], Arc::clone(&frontend), Resume::New, settings())
        .await;

    let report = agent
        .handle_input("the login test is fixed", Interrupt::new())
        .await
        .unwrap()
        .unwrap();

    assert!(report.todo_delta.is_empty());
    let stored = fx.db.todos().load(&fx.project.id).await.unwrap();
    assert!(stored.get(&id).unwrap().is_pending());
    assert!(!frontend.has_event(|e| matches!(e, AgentEvent::TodoSnapshot { .. })));
}

#[tokio::test]
async fn test_no_pending_todos_skips_inference() {
    let fx = Fixture::new().await;
    let provider = ScriptedProvider::new(vec![]);
    let prompts = Arc::clone(&provider.prompts);
    let mut agent = fx
        .agent(
            vec![provider],
            Arc::new(RecordingFrontend::default()),
            Resume::New,
            settings(),
        )
        .await;

    agent
        .handle_input("all done for today", Interrupt::new())
        .await
        .unwrap();

    assert!(prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_created_todos_are_tracked_and_deduplicated() {
    let fx = Fixture::new().await;
    let create = |id: &str, content: &str| {
        RawProposal::calls(
            "",
            vec![call(id, "todo_create", json!({"content": content, "priority": "low"}))],
        )
    };
    let provider = ScriptedProvider::new(vec![
        create("c1", "Add rate limiting to the API"),
        RawProposal::answer("Noted."),
        create("c2", "add rate limiting to the api"),
        RawProposal::answer("Already on the list."),
    ]);
    let frontend = Arc::new(RecordingFrontend::default());
    let mut agent = fx
        .agent(vec![provider], Arc::clone(&frontend), Resume::New, settings())
        .await;

    let first = agent
        .handle_input("remind me to add rate limiting", Interrupt::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.todo_delta.created.len(), 1);
    assert!(frontend.has_event(|e| matches!(e, AgentEvent::TodoSnapshot { items } if items.len() == 1)));

    let second = agent
        .handle_input("also, rate limiting", Interrupt::new())
        .await
        .unwrap()
        .unwrap();
    assert!(second.todo_delta.created.is_empty());
    assert!(second.tool_calls[0].output.contains("duplicate_of"));

    let stored = fx.db.todos().load(&fx.project.id).await.unwrap();
    assert_eq!(stored.list().len(), 1);
    assert_eq!(stored.list()[0].id, first.todo_delta.created[0]);
    assert_eq!(stored.list()[0].priority, Priority::Low);
}

#[test]
fn test_apply_completions_is_idempotent() {
    let mut ledger = TodoLedger::new("proj");
    let a = ledger.create("first", None).unwrap().id;
    let b = ledger.create("second", None).unwrap().id;

    let ids = vec![a.clone(), "nope".to_string()];
    assert_eq!(ledger.apply_completions(&ids), vec![a.clone()]);
    assert!(ledger.apply_completions(&ids).is_empty());

    let both = vec![a, b.clone()];
    assert_eq!(ledger.apply_completions(&both), vec![b]);
    assert!(ledger.pending().is_empty());
}
