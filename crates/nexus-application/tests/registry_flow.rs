mod common;

use common::{CONFIG_TOML, EchoFactory};
use nexus_application::{StartOptions, start};
use nexus_core::message::MessageKind;
use nexus_core::protocol::ConnectionState;
use nexus_core::ui::{SessionCommand, UiEnvelope, UiEvent, UiSink};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

/// Collects envelopes until `done` matches one, or fails after five seconds.
async fn collect_until(
    receiver: &mut UnboundedReceiver<UiEnvelope>,
    done: impl Fn(&UiEnvelope) -> bool,
) -> Vec<UiEnvelope> {
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(envelope) = receiver.recv().await {
            let finished = done(&envelope);
            seen.push(envelope);
            if finished {
                break;
            }
        }
    })
    .await
    .expect("expected UI event did not arrive");
    seen
}

#[tokio::test]
async fn test_two_sessions_stay_independent() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("config.toml"), CONFIG_TOML).unwrap();
    let factory = Arc::new(EchoFactory::default());
    let (ui, mut events) = UiSink::channel();

    let runtime = start(
        factory.clone(),
        ui,
        StartOptions {
            base_dir: Some(dir.path().to_path_buf()),
            ..StartOptions::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(runtime.config.agents.len(), 2);

    let registry = runtime.registry.clone();
    let first = registry.create_session().await.unwrap();
    let second = registry.create_session().await.unwrap();
    assert_eq!(factory.client(0).agent_id().as_deref(), Some("echo"));

    registry
        .handle(
            &first,
            SessionCommand::SendMessage {
                text: "ping".to_string(),
                attachments: vec![],
            },
        )
        .await
        .unwrap();

    let seen = collect_until(&mut events, |e| {
        matches!(&e.event, UiEvent::Sessions { sessions } if sessions.iter().any(|s| s.messages.len() == 2))
            && e.session_id == second
    })
    .await;

    assert!(seen.iter().any(|e| e.session_id == first
        && matches!(&e.event, UiEvent::StreamEnd { stop_reason, html } if stop_reason == "end_turn" && html.contains("echo: ping"))));
    assert!(!seen.iter().any(|e| e.session_id == second
        && matches!(e.event, UiEvent::StreamStart | UiEvent::StreamChunk { .. })));

    let session = registry.get(&first).await.unwrap();
    let messages = session.messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].kind, MessageKind::Assistant);
    assert_eq!(messages[1].text, "echo: ping");
    assert!(registry.get(&second).await.unwrap().messages().await.is_empty());

    let stored = runtime.stored_sessions.list().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].title, "ping");
    assert_eq!(stored[0].agent_id.as_deref(), Some("echo"));

    runtime.shutdown().await;
    assert!(registry.is_empty().await);
    assert_eq!(*registry.watch_active_state().borrow(), ConnectionState::Disconnected);

    let state = std::fs::read_to_string(dir.path().join("state.json")).unwrap();
    assert!(state.contains("nexus.sessions"));
}

#[tokio::test]
async fn test_agent_switch_and_active_tracking() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("config.toml"), CONFIG_TOML).unwrap();
    let factory = Arc::new(EchoFactory::default());
    let (ui, mut events) = UiSink::channel();
    let runtime = start(
        factory.clone(),
        ui,
        StartOptions {
            base_dir: Some(dir.path().to_path_buf()),
            ..StartOptions::default()
        },
    )
    .await
    .unwrap();
    let registry = runtime.registry.clone();
    let first = registry.create_session().await.unwrap();
    let second = registry.create_session().await.unwrap();
    let mut active_state = registry.watch_active_state();

    registry
        .handle(
            &second,
            SessionCommand::SelectAgent {
                agent_id: "parrot".to_string(),
            },
        )
        .await
        .unwrap();

    assert_eq!(registry.active_id().await, Some(second.clone()));
    assert_eq!(factory.client(1).agent_id().as_deref(), Some("parrot"));
    assert_eq!(factory.client(0).agent_id().as_deref(), Some("echo"));
    assert!(registry.is_active_connected().await);
    tokio::time::timeout(
        Duration::from_secs(5),
        active_state.wait_for(|state| *state == ConnectionState::Connected),
    )
    .await
    .unwrap()
    .unwrap();

    let seen = collect_until(&mut events, |e| {
        matches!(e.event, UiEvent::AgentChanged { .. })
    })
    .await;
    assert!(seen.iter().all(|e| e.session_id == second || e.session_id == first));
    assert!(!seen
        .iter()
        .any(|e| e.session_id == first && matches!(e.event, UiEvent::AgentChanged { .. })));

    // The next session starts with the last selected agent.
    let third = registry.create_session().await.unwrap();
    assert_eq!(third, "session-3");
    assert_eq!(factory.client(2).agent_id().as_deref(), Some("parrot"));

    registry.dispose_session(&second).await.unwrap();
    assert_eq!(registry.active_id().await, Some(first));
    runtime.shutdown().await;
}
