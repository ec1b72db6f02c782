//! Scripted protocol client for unit tests.

use crate::lifecycle::SessionServices;
use crate::preferences::PreferenceService;
use crate::stored_sessions::StoredSessionService;
use async_trait::async_trait;
use nexus_core::agent::AgentDescriptor;
use nexus_core::config::OrchestratorConfig;
use nexus_core::error::{NexusError, Result};
use nexus_core::protocol::{
    ConnectionState, ContentBlock, EventSink, PromptResponse, ProtocolClient,
    ProtocolClientFactory, SessionMetadata, SessionUpdate,
};
use nexus_core::stderr::RegexErrorClassifier;
use nexus_core::store::KeyValueStore;
use nexus_core::ui::{UiEnvelope, UiSink};
use nexus_infrastructure::agent_catalog::builtin_agents;
use nexus_infrastructure::{ConfiguredAgentCatalog, GfmRenderer, InMemoryStore};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, mpsc};

type ScriptedTurn = Result<(Vec<SessionUpdate>, String)>;

#[derive(Default)]
struct MockState {
    connection: ConnectionState,
    accepts_connect: bool,
    agent: Option<AgentDescriptor>,
    turns: VecDeque<ScriptedTurn>,
    metadata: Option<SessionMetadata>,
    hold_turns: bool,
    rejects_selections: bool,
    mode_calls: Vec<String>,
    model_calls: Vec<String>,
    session_count: usize,
    disconnect_count: usize,
}

pub(crate) struct MockClient {
    state: Mutex<MockState>,
    sink: Mutex<Option<EventSink>>,
    turn_gate: Notify,
}

impl MockClient {
    fn with_state(state: MockState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            sink: Mutex::new(None),
            turn_gate: Notify::new(),
        })
    }

    /// Already connected and able to reconnect.
    pub(crate) fn connected() -> Arc<Self> {
        Self::with_state(MockState {
            connection: ConnectionState::Connected,
            accepts_connect: true,
            ..MockState::default()
        })
    }

    /// Connect calls return but the process never comes up.
    pub(crate) fn refusing() -> Arc<Self> {
        Self::with_state(MockState::default())
    }

    pub(crate) fn script_turn(&self, updates: Vec<SessionUpdate>, stop_reason: &str) {
        self.lock()
            .turns
            .push_back(Ok((updates, stop_reason.to_string())));
    }

    pub(crate) fn script_failure(&self, error: NexusError) {
        self.lock().turns.push_back(Err(error));
    }

    pub(crate) fn set_metadata(&self, metadata: SessionMetadata) {
        self.lock().metadata = Some(metadata);
    }

    /// Turns wait for [`MockClient::release_turn`] before completing.
    pub(crate) fn hold_turns(&self) {
        self.lock().hold_turns = true;
    }

    /// `set_mode` and `set_model` fail from now on.
    pub(crate) fn reject_selections(&self) {
        self.lock().rejects_selections = true;
    }

    pub(crate) fn release_turn(&self) {
        self.turn_gate.notify_one();
    }

    pub(crate) fn emit_update(&self, update: SessionUpdate) {
        if let Some(sink) = self.sink() {
            sink.session_update(update);
        }
    }

    pub(crate) fn emit_stderr(&self, text: &str) {
        if let Some(sink) = self.sink() {
            sink.stderr(text);
        }
    }

    pub(crate) fn drop_connection(&self) {
        self.set_connection(ConnectionState::Disconnected);
    }

    pub(crate) fn agent(&self) -> Option<AgentDescriptor> {
        self.lock().agent.clone()
    }

    pub(crate) fn mode_calls(&self) -> Vec<String> {
        self.lock().mode_calls.clone()
    }

    pub(crate) fn model_calls(&self) -> Vec<String> {
        self.lock().model_calls.clone()
    }

    pub(crate) fn session_count(&self) -> usize {
        self.lock().session_count
    }

    pub(crate) fn disconnect_count(&self) -> usize {
        self.lock().disconnect_count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    fn sink(&self) -> Option<EventSink> {
        self.sink.lock().unwrap().clone()
    }

    fn set_connection(&self, state: ConnectionState) {
        self.lock().connection = state;
        if let Some(sink) = self.sink() {
            sink.state_changed(state);
        }
    }
}

#[async_trait]
impl ProtocolClient for MockClient {
    fn set_agent(&self, agent: AgentDescriptor) {
        self.lock().agent = Some(agent);
    }

    async fn connect(&self) -> Result<()> {
        if self.lock().accepts_connect {
            self.set_connection(ConnectionState::Connected);
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.lock().disconnect_count += 1;
        self.set_connection(ConnectionState::Disconnected);
    }

    fn is_connected(&self) -> bool {
        self.lock().connection == ConnectionState::Connected
    }

    fn state(&self) -> ConnectionState {
        self.lock().connection
    }

    async fn new_session(&self, _working_dir: &Path) -> Result<()> {
        self.lock().session_count += 1;
        Ok(())
    }

    async fn send_message(&self, _blocks: Vec<ContentBlock>) -> Result<PromptResponse> {
        let (turn, hold) = {
            let mut state = self.lock();
            let turn = state
                .turns
                .pop_front()
                .unwrap_or_else(|| Ok((Vec::new(), "end_turn".to_string())));
            (turn, state.hold_turns)
        };
        let (updates, stop_reason) = turn?;
        for update in updates {
            self.emit_update(update);
        }
        if hold {
            self.turn_gate.notified().await;
        }
        Ok(PromptResponse::new(stop_reason))
    }

    async fn set_mode(&self, mode_id: &str) -> Result<()> {
        let mut state = self.lock();
        if state.rejects_selections {
            return Err(NexusError::protocol(format!("mode {} rejected", mode_id)));
        }
        state.mode_calls.push(mode_id.to_string());
        if let Some(modes) = state.metadata.as_mut().and_then(|m| m.modes.as_mut()) {
            modes.current_mode_id = mode_id.to_string();
        }
        Ok(())
    }

    async fn set_model(&self, model_id: &str) -> Result<()> {
        let mut state = self.lock();
        if state.rejects_selections {
            return Err(NexusError::protocol(format!("model {} rejected", model_id)));
        }
        state.model_calls.push(model_id.to_string());
        if let Some(models) = state.metadata.as_mut().and_then(|m| m.models.as_mut()) {
            models.current_model_id = model_id.to_string();
        }
        Ok(())
    }

    fn session_metadata(&self) -> Option<SessionMetadata> {
        self.lock().metadata.clone()
    }
}

/// Hands out the same scripted client for every session.
pub(crate) struct MockFactory {
    client: Arc<MockClient>,
}

impl MockFactory {
    pub(crate) fn new(client: Arc<MockClient>) -> Self {
        Self { client }
    }
}

impl ProtocolClientFactory for MockFactory {
    fn create(
        &self,
        agent: Option<AgentDescriptor>,
        events: EventSink,
    ) -> Result<Arc<dyn ProtocolClient>> {
        if let Some(agent) = agent {
            self.client.set_agent(agent);
        }
        *self.client.sink.lock().unwrap() = Some(events);
        Ok(self.client.clone())
    }
}

pub(crate) fn services_with(
    factory: impl ProtocolClientFactory + 'static,
) -> (SessionServices, mpsc::UnboundedReceiver<UiEnvelope>) {
    let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
    let config = OrchestratorConfig::default();
    let (ui, receiver) = UiSink::channel();
    let services = SessionServices {
        factory: Arc::new(factory),
        agents: Arc::new(ConfiguredAgentCatalog::with_probe(builtin_agents(), |_| true)),
        renderer: Arc::new(GfmRenderer),
        classifier: Arc::new(RegexErrorClassifier),
        stored_sessions: Arc::new(StoredSessionService::new(
            store.clone(),
            config.max_stored_sessions,
        )),
        preferences: Arc::new(PreferenceService::new(store)),
        config,
        ui,
    };
    (services, receiver)
}
