//! Registry of live sessions.
//!
//! Each view (panel, tab, window) gets its own [`SessionLifecycle`], keyed by
//! a registry-assigned `session-{n}` id. The registry tracks which session is
//! active for global commands and the status indicator, and fans stored-session
//! list changes out to every live session.

use crate::lifecycle::{SessionLifecycle, SessionServices, StateObserver};
use futures::future::join_all;
use indexmap::IndexMap;
use nexus_core::error::{NexusError, Result};
use nexus_core::protocol::{ConnectionState, ProtocolEvent};
use nexus_core::stored_session::StoredSession;
use nexus_core::ui::{SessionCommand, UiEvent, UiSink};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{RwLock, broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

type SessionMap = Arc<RwLock<IndexMap<String, Arc<SessionLifecycle>>>>;

pub struct SessionRegistry {
    services: SessionServices,
    sessions: SessionMap,
    active: Arc<RwLock<Option<String>>>,
    next_id: AtomicU64,
    active_state: watch::Sender<ConnectionState>,
    state_changes: mpsc::UnboundedSender<(String, ConnectionState)>,
    shutdown: CancellationToken,
}

impl SessionRegistry {
    /// Creates the registry and starts its background tasks.
    ///
    /// Must be called inside a tokio runtime.
    pub fn init(services: SessionServices) -> Arc<Self> {
        let sessions: SessionMap = Arc::new(RwLock::new(IndexMap::new()));
        let active = Arc::new(RwLock::new(None));
        let (active_state, _) = watch::channel(ConnectionState::Disconnected);
        let (state_changes, state_receiver) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        tokio::spawn(fan_out_stored_sessions(
            services.stored_sessions.subscribe(),
            services.ui.clone(),
            sessions.clone(),
            shutdown.clone(),
        ));
        tokio::spawn(track_active_state(
            state_receiver,
            active.clone(),
            active_state.clone(),
            shutdown.clone(),
        ));

        tracing::info!("[Registry] Initialized");
        Arc::new(Self {
            services,
            sessions,
            active,
            next_id: AtomicU64::new(1),
            active_state,
            state_changes,
            shutdown,
        })
    }

    /// Creates a session bound to the saved (or first available) agent.
    ///
    /// The first session created becomes active.
    ///
    /// # Returns
    ///
    /// The new session id.
    pub async fn create_session(&self) -> Result<String> {
        let id = format!("session-{}", self.next_id.fetch_add(1, Ordering::SeqCst));

        let saved_agent = match self.services.preferences.selected_agent().await {
            Ok(saved) => saved,
            Err(e) => {
                tracing::warn!("[Registry] Could not read saved agent: {}", e);
                None
            }
        };
        // Resolving may probe PATH, which blocks.
        let agents = self.services.agents.clone();
        let agent =
            tokio::task::spawn_blocking(move || agents.resolve_initial(saved_agent.as_deref()))
                .await
                .map_err(|e| NexusError::internal(format!("agent lookup failed: {}", e)))?;

        let state_changes = self.state_changes.clone();
        let observer: StateObserver = Arc::new(move |session_id: &str, state| {
            let _ = state_changes.send((session_id.to_string(), state));
        });
        let session = SessionLifecycle::spawn(&id, agent, self.services.clone(), Some(observer))?;

        self.sessions.write().await.insert(id.clone(), session.clone());
        {
            let mut active = self.active.write().await;
            if active.is_none() {
                *active = Some(id.clone());
                self.active_state.send_replace(session.connection_state());
            }
        }
        tracing::info!("[Registry] Created {}", id);
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<SessionLifecycle>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn active_id(&self) -> Option<String> {
        self.active.read().await.clone()
    }

    pub async fn session_ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn set_active(&self, id: &str) -> Result<()> {
        let session = self.require(id).await?;
        *self.active.write().await = Some(id.to_string());
        self.active_state.send_replace(session.connection_state());
        Ok(())
    }

    /// Runs a view command on `id` and makes it the active session.
    pub async fn handle(&self, id: &str, command: SessionCommand) -> Result<()> {
        let session = self.require(id).await?;
        self.set_active(id).await?;
        session.handle(command).await
    }

    /// Delivers an inbound protocol event to session `id` only.
    pub async fn dispatch(&self, id: &str, event: ProtocolEvent) -> Result<()> {
        self.require(id).await?.dispatch(event);
        Ok(())
    }

    /// Disposes one session, promoting another if it was active.
    pub async fn dispose_session(&self, id: &str) -> Result<()> {
        let session = self
            .sessions
            .write()
            .await
            .shift_remove(id)
            .ok_or_else(|| NexusError::not_found("session", id))?;
        session.dispose().await;

        let mut active = self.active.write().await;
        if active.as_deref() == Some(id) {
            let sessions = self.sessions.read().await;
            let promoted = sessions.iter().next();
            *active = promoted.map(|(id, _)| id.clone());
            let state = promoted
                .map(|(_, session)| session.connection_state())
                .unwrap_or_default();
            self.active_state.send_replace(state);
            tracing::info!("[Registry] Active session is now {:?}", *active);
        }
        tracing::info!("[Registry] Disposed {}", id);
        Ok(())
    }

    /// Disposes every session and stops the registry's background tasks.
    pub async fn dispose_all(&self) {
        let sessions: Vec<_> = self
            .sessions
            .write()
            .await
            .drain(..)
            .map(|(_, session)| session)
            .collect();
        join_all(sessions.iter().map(|session| session.dispose())).await;

        *self.active.write().await = None;
        self.active_state.send_replace(ConnectionState::Disconnected);
        self.shutdown.cancel();
        tracing::info!("[Registry] Disposed {} sessions", sessions.len());
    }

    pub async fn connect_active(&self) -> Result<()> {
        self.require_active().await?.connect().await
    }

    pub async fn is_active_connected(&self) -> bool {
        match self.active_session().await {
            Some(session) => session.is_connected(),
            None => false,
        }
    }

    pub async fn new_chat_active(&self) -> Result<()> {
        self.require_active().await?.new_chat().await
    }

    pub async fn clear_chat_active(&self) -> Result<()> {
        self.require_active().await?.clear_chat().await
    }

    /// Connection state of whichever session is active.
    pub fn watch_active_state(&self) -> watch::Receiver<ConnectionState> {
        self.active_state.subscribe()
    }

    async fn require(&self, id: &str) -> Result<Arc<SessionLifecycle>> {
        self.get(id)
            .await
            .ok_or_else(|| NexusError::not_found("session", id))
    }

    async fn active_session(&self) -> Option<Arc<SessionLifecycle>> {
        let id = self.active_id().await?;
        self.get(&id).await
    }

    async fn require_active(&self) -> Result<Arc<SessionLifecycle>> {
        self.active_session()
            .await
            .ok_or_else(|| NexusError::not_found("session", "active"))
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn fan_out_stored_sessions(
    mut changes: broadcast::Receiver<Arc<Vec<StoredSession>>>,
    ui: UiSink,
    sessions: SessionMap,
    shutdown: CancellationToken,
) {
    loop {
        let list = tokio::select! {
            _ = shutdown.cancelled() => break,
            change = changes.recv() => match change {
                Ok(list) => list,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("[Registry] Skipped {} stored-session updates", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };
        for id in sessions.read().await.keys() {
            ui.send(
                id,
                UiEvent::Sessions {
                    sessions: list.as_ref().clone(),
                },
            );
        }
    }
}

async fn track_active_state(
    mut changes: mpsc::UnboundedReceiver<(String, ConnectionState)>,
    active: Arc<RwLock<Option<String>>>,
    active_state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
) {
    loop {
        let (id, state) = tokio::select! {
            _ = shutdown.cancelled() => break,
            change = changes.recv() => match change {
                Some(change) => change,
                None => break,
            },
        };
        if active.read().await.as_deref() == Some(id.as_str()) {
            active_state.send_replace(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockClient, MockFactory, services_with};
    use nexus_core::message::Message;
    use nexus_core::protocol::{ContentBlock, SessionUpdate};
    use nexus_core::ui::UiEnvelope;
    use nexus_infrastructure::ConfiguredAgentCatalog;
    use nexus_infrastructure::agent_catalog::builtin_agents;
    use std::time::Duration;

    async fn drain(receiver: &mut mpsc::UnboundedReceiver<UiEnvelope>) -> Vec<UiEnvelope> {
        tokio::time::sleep(Duration::from_millis(1)).await;
        let mut envelopes = Vec::new();
        while let Ok(envelope) = receiver.try_recv() {
            envelopes.push(envelope);
        }
        envelopes
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_ids_and_first_active() {
        let (services, _ui) = services_with(MockFactory::new(MockClient::connected()));
        let registry = SessionRegistry::init(services);

        let first = registry.create_session().await.unwrap();
        let second = registry.create_session().await.unwrap();

        assert_eq!(first, "session-1");
        assert_eq!(second, "session-2");
        assert_eq!(registry.active_id().await.as_deref(), Some("session-1"));
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_marks_session_active() {
        let (services, _ui) = services_with(MockFactory::new(MockClient::connected()));
        let registry = SessionRegistry::init(services);
        registry.create_session().await.unwrap();
        let second = registry.create_session().await.unwrap();

        registry.handle(&second, SessionCommand::Ready).await.unwrap();

        assert_eq!(registry.active_id().await, Some(second));
        assert!(registry
            .handle("session-9", SessionCommand::Ready)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disposing_active_promotes_remaining() {
        let (services, _ui) = services_with(MockFactory::new(MockClient::connected()));
        let registry = SessionRegistry::init(services);
        let first = registry.create_session().await.unwrap();
        let second = registry.create_session().await.unwrap();

        registry.dispose_session(&first).await.unwrap();
        assert_eq!(registry.active_id().await, Some(second.clone()));

        registry.dispose_session(&second).await.unwrap();
        assert_eq!(registry.active_id().await, None);
        assert!(registry.is_empty().await);
        assert!(registry.dispose_session(&second).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stored_session_changes_reach_every_session() {
        let (services, mut ui) = services_with(MockFactory::new(MockClient::connected()));
        let stored = services.stored_sessions.clone();
        let registry = SessionRegistry::init(services);
        registry.create_session().await.unwrap();
        registry.create_session().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        stored
            .save(StoredSession::from_messages(
                "s1",
                None,
                vec![Message::user("hello", vec![])],
            ))
            .await
            .unwrap();

        let mut recipients: Vec<_> = drain(&mut ui)
            .await
            .into_iter()
            .filter(|e| matches!(&e.event, UiEvent::Sessions { sessions } if sessions.len() == 1))
            .map(|e| e.session_id)
            .collect();
        recipients.sort();
        assert_eq!(recipients, vec!["session-1", "session-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_follows_active_session() {
        let client = MockClient::connected();
        let (services, _ui) = services_with(MockFactory::new(client.clone()));
        let registry = SessionRegistry::init(services);
        let state = registry.watch_active_state();
        registry.create_session().await.unwrap();
        assert_eq!(*state.borrow(), ConnectionState::Connected);

        client.drop_connection();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(*state.borrow(), ConnectionState::Disconnected);
        assert!(!registry.is_active_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_all_disconnects_everything() {
        let client = MockClient::connected();
        let (services, _ui) = services_with(MockFactory::new(client.clone()));
        let registry = SessionRegistry::init(services);
        registry.create_session().await.unwrap();
        registry.create_session().await.unwrap();

        registry.dispose_all().await;

        assert!(registry.is_empty().await);
        assert_eq!(registry.active_id().await, None);
        assert_eq!(client.disconnect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_reaches_only_the_target_session() {
        let (services, _ui) = services_with(MockFactory::new(MockClient::connected()));
        let registry = SessionRegistry::init(services);
        let first = registry.create_session().await.unwrap();
        let second = registry.create_session().await.unwrap();
        registry.handle(&first, SessionCommand::Connect).await.unwrap();
        registry.handle(&second, SessionCommand::Connect).await.unwrap();

        registry
            .dispatch(&first, ProtocolEvent::StateChanged(ConnectionState::Disconnected))
            .await
            .unwrap();
        registry
            .dispatch(
                &first,
                ProtocolEvent::SessionUpdate(
                    SessionUpdate::AgentMessageChunk {
                        content: ContentBlock::text("routed"),
                    }
                    .into(),
                ),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let first = registry.get(&first).await.unwrap();
        let second = registry.get(&second).await.unwrap();
        assert!(!first.has_remote_session().await);
        assert!(second.has_remote_session().await);
        assert_eq!(first.transcript().await.streaming.current_text, "routed");
        assert!(second.transcript().await.streaming.is_empty());
        assert!(registry
            .dispatch("session-9", ProtocolEvent::Stderr("lost".to_string()))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_agent_probe_runs_off_the_runtime_thread() {
        let probe_threads = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (mut services, _ui) = services_with(MockFactory::new(MockClient::connected()));
        let seen = probe_threads.clone();
        services.agents = Arc::new(ConfiguredAgentCatalog::with_probe(
            builtin_agents(),
            move |_| {
                seen.lock().unwrap().push(std::thread::current().id());
                true
            },
        ));
        let registry = SessionRegistry::init(services);

        let id = registry.create_session().await.unwrap();
        registry.handle(&id, SessionCommand::Ready).await.unwrap();

        {
            let threads = probe_threads.lock().unwrap();
            assert!(!threads.is_empty());
            assert!(threads.iter().all(|thread| *thread != std::thread::current().id()));
        }
        registry.dispose_all().await;
    }
}
