//! Per-conversation session lifecycle.
//!
//! A [`SessionLifecycle`] owns one protocol client and one transcript. All
//! protocol events, coalescer timer fires and turn completions travel through
//! a single inbox drained by one pump task, so the transcript only ever sees
//! one input at a time and a turn never ends before the notifications that
//! preceded it.

use crate::coalescer::{CoalescerWindows, FlushTicket, Push, StreamCoalescer};
use crate::preferences::PreferenceService;
use crate::stored_sessions::StoredSessionService;
use nexus_core::agent::{AgentDescriptor, AgentDirectory};
use nexus_core::attachment::{Attachment, PreparedPrompt, build_prompt};
use nexus_core::config::OrchestratorConfig;
use nexus_core::error::{NexusError, Result};
use nexus_core::message::{Message, MessageKind};
use nexus_core::protocol::{
    ConnectionState, EventSink, PromptResponse, ProtocolClient, ProtocolClientFactory,
    ProtocolEvent, SessionMetadata, SessionUpdate, ToolCallData,
};
use nexus_core::render::MarkdownRenderer;
use nexus_core::stderr::{ErrorClassifier, StderrMonitor};
use nexus_core::stored_session::StoredSession;
use nexus_core::tool::{ToolTree, UNKNOWN_TOOL_NAME};
use nexus_core::transcript::{Transcript, TranscriptEvent};
use nexus_core::ui::{SessionCommand, UiEvent, UiSink};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Called with `(session_id, state)` on every connection change.
pub type StateObserver = Arc<dyn Fn(&str, ConnectionState) + Send + Sync>;

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct SessionServices {
    pub factory: Arc<dyn ProtocolClientFactory>,
    pub agents: Arc<dyn AgentDirectory>,
    pub renderer: Arc<dyn MarkdownRenderer>,
    pub classifier: Arc<dyn ErrorClassifier>,
    pub stored_sessions: Arc<StoredSessionService>,
    pub preferences: Arc<PreferenceService>,
    pub config: OrchestratorConfig,
    pub ui: UiSink,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed { stop_reason: String },
    /// The agent finished without streaming text or touching a tool.
    NoResponse,
}

/// Input drained by the session pump.
#[derive(Debug)]
pub enum SessionInput {
    Protocol(ProtocolEvent),
    TurnFinished {
        result: Result<PromptResponse>,
        reply: oneshot::Sender<Result<TurnOutcome>>,
    },
    FlushDue(FlushTicket),
}

#[derive(Debug, Default, Clone, Copy)]
struct TurnStats {
    text_chars: usize,
    tool_events: usize,
}

impl TurnStats {
    fn is_empty(&self) -> bool {
        self.text_chars == 0 && self.tool_events == 0
    }
}

struct SessionContext {
    transcript: Transcript,
    coalescer: StreamCoalescer,
    stderr: StderrMonitor,
    agent_id: Option<String>,
    stored_session_id: String,
    has_remote_session: bool,
    restored_mode_model: bool,
    turn: TurnStats,
    in_flight: bool,
    metadata_refetch: Option<JoinHandle<()>>,
}

impl SessionContext {
    /// Applies a reducer event and returns the messages it finalized.
    fn apply(&mut self, event: TranscriptEvent) -> Vec<Message> {
        self.transcript.apply(event)
    }

    fn start_new_conversation(&mut self) {
        self.coalescer.discard();
        self.transcript.apply(TranscriptEvent::Cleared);
        self.stored_session_id = new_stored_session_id();
        self.turn = TurnStats::default();
    }

    fn forget_remote_session(&mut self) {
        self.has_remote_session = false;
        self.restored_mode_model = false;
        if let Some(task) = self.metadata_refetch.take() {
            task.abort();
        }
    }
}

fn new_stored_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// One conversation bound to one agent process.
pub struct SessionLifecycle {
    id: String,
    services: SessionServices,
    client: Arc<dyn ProtocolClient>,
    ctx: Mutex<SessionContext>,
    inbox: mpsc::UnboundedSender<SessionInput>,
    cancel: CancellationToken,
    observer: Option<StateObserver>,
    working_dir: PathBuf,
}

impl SessionLifecycle {
    /// Creates the session and starts its pump.
    ///
    /// # Arguments
    ///
    /// * `id` - Registry-assigned session id
    /// * `agent` - Agent the protocol client starts with, if any is configured
    /// * `services` - Shared collaborators
    /// * `observer` - Notified on connection changes
    ///
    /// # Errors
    ///
    /// Returns the factory's error when the protocol client cannot be created.
    pub fn spawn(
        id: impl Into<String>,
        agent: Option<AgentDescriptor>,
        services: SessionServices,
        observer: Option<StateObserver>,
    ) -> Result<Arc<Self>> {
        let id = id.into();
        let (inbox, receiver) = mpsc::unbounded_channel();

        let events = {
            let inbox = inbox.clone();
            EventSink::new(move |event| {
                let _ = inbox.send(SessionInput::Protocol(event));
            })
        };
        let client = services.factory.create(agent.clone(), events)?;

        let config = &services.config;
        let ctx = SessionContext {
            transcript: Transcript::new(),
            coalescer: StreamCoalescer::new(CoalescerWindows::from(config)),
            stderr: StderrMonitor::with_limits(
                services.classifier.clone(),
                config.stderr_cap_chars,
                config.stderr_retain_chars,
            ),
            agent_id: agent.map(|a| a.id),
            stored_session_id: new_stored_session_id(),
            has_remote_session: false,
            restored_mode_model: false,
            turn: TurnStats::default(),
            in_flight: false,
            metadata_refetch: None,
        };
        let working_dir = config
            .working_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));

        let session = Arc::new(Self {
            id,
            services,
            client,
            ctx: Mutex::new(ctx),
            inbox,
            cancel: CancellationToken::new(),
            observer,
            working_dir,
        });

        tokio::spawn(run_pump(
            Arc::downgrade(&session),
            receiver,
            session.cancel.clone(),
        ));
        tracing::debug!("[Session] Spawned session {}", session.id);
        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.client.state()
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub async fn agent_id(&self) -> Option<String> {
        self.ctx.lock().await.agent_id.clone()
    }

    pub async fn has_remote_session(&self) -> bool {
        self.ctx.lock().await.has_remote_session
    }

    pub async fn stored_session_id(&self) -> String {
        self.ctx.lock().await.stored_session_id.clone()
    }

    /// Snapshot of finalized messages.
    pub async fn messages(&self) -> Vec<Message> {
        self.ctx.lock().await.transcript.messages.clone()
    }

    pub async fn transcript(&self) -> Transcript {
        self.ctx.lock().await.transcript.clone()
    }

    /// Routes a UI command to the matching operation.
    pub async fn handle(self: &Arc<Self>, command: SessionCommand) -> Result<()> {
        match command {
            SessionCommand::SendMessage { text, attachments } => {
                self.send(&text, attachments).await.map(|_| ())
            }
            SessionCommand::SelectAgent { agent_id } => self.change_agent(&agent_id).await,
            SessionCommand::SelectMode { mode_id } => self.set_mode(&mode_id).await,
            SessionCommand::SelectModel { model_id } => self.set_model(&model_id).await,
            SessionCommand::Connect => self.connect().await,
            SessionCommand::NewChat => self.new_chat().await,
            SessionCommand::ClearChat => self.clear_chat().await,
            SessionCommand::Ready => self.announce().await,
            SessionCommand::GetSessions => {
                let sessions = self.services.stored_sessions.list().await?;
                self.emit(UiEvent::Sessions { sessions });
                Ok(())
            }
            SessionCommand::DeleteSession { stored_session_id } => self
                .services
                .stored_sessions
                .delete(&stored_session_id)
                .await
                .map(|_| ()),
            SessionCommand::LoadSession { stored_session_id } => {
                self.open_stored_session(&stored_session_id).await
            }
        }
    }

    // ========================================================================
    // Connection
    // ========================================================================

    /// Makes sure the agent process is up.
    ///
    /// # Errors
    ///
    /// `ProcessTerminated` when the client still reports not connected after
    /// the settle delay; the client's own error when connecting fails.
    pub async fn ensure_connected(&self) -> Result<()> {
        match self.client.state() {
            ConnectionState::Connected => {}
            ConnectionState::Disconnected | ConnectionState::Error => {
                tracing::info!("[Session] {} connecting agent", self.id);
                self.client.connect().await?;
                tokio::time::sleep(self.services.config.connect_settle()).await;
            }
            ConnectionState::Connecting => {
                tokio::time::sleep(self.services.config.connecting_wait()).await;
            }
        }
        if !self.client.is_connected() {
            return Err(NexusError::ProcessTerminated);
        }
        Ok(())
    }

    /// Creates the remote session if none is established.
    pub async fn ensure_session(self: &Arc<Self>) -> Result<()> {
        if self.ctx.lock().await.has_remote_session {
            return Ok(());
        }
        self.open_remote_session().await
    }

    async fn open_remote_session(self: &Arc<Self>) -> Result<()> {
        self.client.new_session(&self.working_dir).await?;
        {
            let mut ctx = self.ctx.lock().await;
            ctx.has_remote_session = true;
            ctx.restored_mode_model = false;
        }
        tracing::info!("[Session] {} remote session established", self.id);
        self.refresh_metadata().await;
        self.schedule_metadata_refetch().await;
        Ok(())
    }

    /// Connects and establishes a remote session, reporting failures.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        let result = async {
            self.ensure_connected().await?;
            self.ensure_session().await
        }
        .await;
        if let Err(e) = &result {
            self.report_error(e).await;
        }
        result
    }

    // ========================================================================
    // Turns
    // ========================================================================

    /// Sends one user prompt and waits for the turn to end.
    ///
    /// # Returns
    ///
    /// `TurnOutcome::NoResponse` when the agent finished without output.
    ///
    /// # Errors
    ///
    /// `TurnInProgress` while another turn runs, `InvalidInput` for an empty
    /// prompt, or the connect/session/send failure. Failures after the user
    /// message was recorded are also written to the transcript.
    pub async fn send(
        self: &Arc<Self>,
        text: &str,
        attachments: Vec<Attachment>,
    ) -> Result<TurnOutcome> {
        let prompt = match build_prompt(text, &attachments) {
            Ok(prompt) => prompt,
            Err(e) => {
                self.emit(UiEvent::Error { text: e.to_string() });
                return Err(e);
            }
        };

        {
            let mut ctx = self.ctx.lock().await;
            if ctx.in_flight {
                let e = NexusError::TurnInProgress(self.id.clone());
                self.emit(UiEvent::Error { text: e.to_string() });
                return Err(e);
            }
            ctx.in_flight = true;
        }

        // Detached, so a caller that stops waiting cannot leave `in_flight` set.
        let session = Arc::clone(self);
        let text = text.to_string();
        let turn = tokio::spawn(async move { session.run_turn(text, attachments, prompt).await });
        turn.await.map_err(|e| {
            NexusError::internal(format!("turn on session {} did not complete: {}", self.id, e))
        })?
    }

    async fn run_turn(
        self: Arc<Self>,
        text: String,
        attachments: Vec<Attachment>,
        prompt: PreparedPrompt,
    ) -> Result<TurnOutcome> {
        {
            let mut ctx = self.ctx.lock().await;
            self.settle_stream(&mut ctx);
            ctx.apply(TranscriptEvent::UserMessage {
                text: text.clone(),
                attachments: attachments.clone(),
            });
            self.emit(UiEvent::UserMessage { text, attachments });
            self.persist(&ctx).await;
        }

        let prepared = async {
            self.ensure_connected().await?;
            self.ensure_session().await
        }
        .await;
        if let Err(e) = prepared {
            let mut ctx = self.ctx.lock().await;
            ctx.in_flight = false;
            self.fail_turn(&mut ctx, &e).await;
            return Err(e);
        }

        {
            let mut ctx = self.ctx.lock().await;
            self.settle_stream(&mut ctx);
            ctx.turn = TurnStats::default();
            ctx.stderr.clear();
            ctx.apply(TranscriptEvent::TurnStarted);
            self.emit(UiEvent::StreamStart);
        }

        tracing::debug!(
            "[Session] {} sending prompt ({} blocks)",
            self.id,
            prompt.blocks.len()
        );
        let result = self.client.send_message(prompt.blocks).await;

        let (reply, outcome) = oneshot::channel();
        self.inbox
            .send(SessionInput::TurnFinished { result, reply })
            .map_err(|_| NexusError::internal(format!("session {} is disposed", self.id)))?;
        outcome
            .await
            .map_err(|_| NexusError::internal(format!("session {} is disposed", self.id)))?
    }

    async fn finish_turn(&self, result: Result<PromptResponse>) -> Result<TurnOutcome> {
        let mut ctx = self.ctx.lock().await;
        ctx.in_flight = false;
        for event in ctx.coalescer.flush() {
            self.apply_and_publish(&mut ctx, event);
        }

        match result {
            Ok(response) if ctx.turn.is_empty() => {
                let error = NexusError::NoResponse;
                tracing::warn!(
                    "[Session] {} turn ended without output (stop reason {})",
                    self.id,
                    response.stop_reason
                );
                ctx.apply(TranscriptEvent::TurnEnded { html: None });
                ctx.apply(TranscriptEvent::Error(error.to_string()));
                self.emit(UiEvent::Error {
                    text: error.to_string(),
                });
                self.emit(stream_end_error());
                self.persist(&ctx).await;
                Ok(TurnOutcome::NoResponse)
            }
            Ok(response) => {
                let html = self.settle_stream(&mut ctx);
                self.emit(UiEvent::StreamEnd {
                    stop_reason: response.stop_reason.clone(),
                    html: html.unwrap_or_default(),
                });
                self.persist(&ctx).await;
                Ok(TurnOutcome::Completed {
                    stop_reason: response.stop_reason,
                })
            }
            Err(e) => {
                self.settle_stream(&mut ctx);
                self.fail_turn(&mut ctx, &e).await;
                Err(e)
            }
        }
    }

    /// Flushes buffered chunks and finalizes whatever is still streaming.
    ///
    /// # Returns
    ///
    /// The rendered html of the streamed text, if there was any.
    fn settle_stream(&self, ctx: &mut SessionContext) -> Option<String> {
        for event in ctx.coalescer.flush() {
            self.apply_and_publish(ctx, event);
        }
        let html = {
            let text = ctx.transcript.streaming.current_text.trim();
            if text.is_empty() {
                None
            } else {
                self.services.renderer.render(text)
            }
        };
        self.apply_and_publish(ctx, TranscriptEvent::TurnEnded { html: html.clone() });
        html
    }

    /// Records a turn failure and closes the stream on the view.
    async fn fail_turn(&self, ctx: &mut SessionContext, error: &NexusError) {
        tracing::error!("[Session] {} turn failed: {}", self.id, error);
        if error.is_connection_failure() {
            ctx.forget_remote_session();
        }
        let text = format!("Error: {}", error);
        ctx.apply(TranscriptEvent::Error(text.clone()));
        self.emit(UiEvent::Error { text });
        self.emit(stream_end_error());
        self.persist(ctx).await;
    }

    async fn report_error(&self, error: &NexusError) {
        let mut ctx = self.ctx.lock().await;
        tracing::error!("[Session] {}: {}", self.id, error);
        let text = format!("Error: {}", error);
        ctx.apply(TranscriptEvent::Error(text.clone()));
        self.emit(UiEvent::Error { text });
        self.persist(&ctx).await;
    }

    // ========================================================================
    // Agent, mode and model
    // ========================================================================

    /// Switches this session to another agent and reconnects.
    ///
    /// The choice is persisted before connecting and is kept even when the
    /// new agent fails to start.
    pub async fn change_agent(self: &Arc<Self>, agent_id: &str) -> Result<()> {
        let Some(agent) = self.services.agents.get(agent_id) else {
            let e = NexusError::not_found("agent", agent_id);
            self.emit(UiEvent::Error { text: e.to_string() });
            return Err(e);
        };
        if let Err(e) = self.services.preferences.set_selected_agent(&agent.id).await {
            tracing::warn!("[Session] Failed to persist agent selection: {}", e);
        }

        {
            let mut ctx = self.ctx.lock().await;
            ctx.forget_remote_session();
            ctx.agent_id = Some(agent.id.clone());
            ctx.start_new_conversation();
            self.emit(UiEvent::SessionMetadata(SessionMetadata::default()));
            self.emit(UiEvent::AgentChanged {
                agent_id: agent.id.clone(),
                agent_name: agent.name.clone(),
            });
            self.emit(UiEvent::ChatCleared);
            let note = format!("Switched to {}. Connecting...", agent.name);
            let finalized = ctx.apply(TranscriptEvent::System(note));
            self.publish_finalized(finalized);
        }
        tracing::info!("[Session] {} switching to agent {}", self.id, agent.id);

        if self.client.is_connected() {
            self.client.disconnect().await;
        }
        self.client.set_agent(agent.clone());

        let result = async {
            self.client.connect().await?;
            tokio::time::sleep(self.services.config.agent_switch_settle()).await;
            if !self.client.is_connected() {
                return Err(NexusError::agent_failed_to_start(&agent.id));
            }
            self.open_remote_session().await
        }
        .await;
        if let Err(e) = &result {
            self.report_error(e).await;
        }
        result
    }

    /// Applies the saved mode and model once per remote session.
    ///
    /// # Returns
    ///
    /// `true` when at least one saved selection was applied.
    pub async fn restore_mode_and_model(&self) -> Result<bool> {
        let Some(metadata) = self.client.session_metadata() else {
            return Ok(false);
        };
        if !metadata.has_selections() {
            return Ok(false);
        }
        {
            let mut ctx = self.ctx.lock().await;
            if ctx.restored_mode_model || !ctx.has_remote_session {
                return Ok(false);
            }
            ctx.restored_mode_model = true;
        }

        let preferences = &self.services.preferences;
        let mut applied = false;

        if let Some(mode_id) = preferences.selected_mode().await? {
            let current = metadata.modes.as_ref().map(|m| m.current_mode_id.as_str());
            if metadata.has_mode(&mode_id) && current != Some(mode_id.as_str()) {
                self.client.set_mode(&mode_id).await?;
                tracing::info!("[Session] {} restored mode {}", self.id, mode_id);
                applied = true;
            }
        }
        if let Some(model_id) = preferences.selected_model().await? {
            let current = metadata.models.as_ref().map(|m| m.current_model_id.as_str());
            if metadata.has_model(&model_id) && current != Some(model_id.as_str()) {
                self.client.set_model(&model_id).await?;
                tracing::info!("[Session] {} restored model {}", self.id, model_id);
                applied = true;
            }
        }

        if applied {
            if let Some(metadata) = self.client.session_metadata() {
                self.emit(UiEvent::SessionMetadata(metadata));
            }
        }
        Ok(applied)
    }

    /// Switches the agent's mode. The choice is saved once the agent accepts it.
    pub async fn set_mode(self: &Arc<Self>, mode_id: &str) -> Result<()> {
        if let Err(e) = self.client.set_mode(mode_id).await {
            self.report_error(&e).await;
            return Err(e);
        }
        if let Err(e) = self.services.preferences.set_selected_mode(mode_id).await {
            tracing::warn!("[Session] Failed to persist mode selection: {}", e);
        }
        self.refresh_metadata().await;
        Ok(())
    }

    pub async fn set_model(self: &Arc<Self>, model_id: &str) -> Result<()> {
        if let Err(e) = self.client.set_model(model_id).await {
            self.report_error(&e).await;
            return Err(e);
        }
        if let Err(e) = self.services.preferences.set_selected_model(model_id).await {
            tracing::warn!("[Session] Failed to persist model selection: {}", e);
        }
        self.refresh_metadata().await;
        Ok(())
    }

    /// Publishes current metadata and restores saved selections when possible.
    async fn refresh_metadata(&self) {
        let Some(metadata) = self.client.session_metadata() else {
            return;
        };
        let has_selections = metadata.has_selections();
        self.emit(UiEvent::SessionMetadata(metadata));
        if has_selections {
            if let Err(e) = self.restore_mode_and_model().await {
                tracing::warn!("[Session] {} could not restore mode/model: {}", self.id, e);
            }
        }
    }

    /// Agents often publish modes and models shortly after session creation.
    async fn schedule_metadata_refetch(self: &Arc<Self>) {
        let session = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        let delay = self.services.config.metadata_refetch();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Some(session) = session.upgrade() {
                        session.refresh_metadata().await;
                    }
                }
            }
        });
        let mut ctx = self.ctx.lock().await;
        if let Some(previous) = ctx.metadata_refetch.replace(task) {
            previous.abort();
        }
    }

    // ========================================================================
    // Conversations
    // ========================================================================

    /// Starts a fresh conversation, with a new remote session when connected.
    pub async fn new_chat(self: &Arc<Self>) -> Result<()> {
        {
            let mut ctx = self.ctx.lock().await;
            ctx.forget_remote_session();
            ctx.start_new_conversation();
        }
        self.emit(UiEvent::ChatCleared);
        self.emit(UiEvent::SessionMetadata(SessionMetadata::default()));

        if self.client.is_connected() {
            if let Err(e) = self.ensure_session().await {
                self.report_error(&e).await;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Clears the visible transcript but keeps the remote session.
    pub async fn clear_chat(&self) -> Result<()> {
        self.ctx.lock().await.start_new_conversation();
        self.emit(UiEvent::ChatCleared);
        Ok(())
    }

    /// Loads a stored conversation into this session.
    ///
    /// The agent gets a new remote session on the next send; it does not see
    /// the loaded history.
    pub async fn open_stored_session(&self, stored_session_id: &str) -> Result<()> {
        let stored = match self.services.stored_sessions.get(stored_session_id).await? {
            Some(stored) => stored,
            None => {
                let e = NexusError::not_found("stored session", stored_session_id);
                self.emit(UiEvent::Error { text: e.to_string() });
                return Err(e);
            }
        };

        let agent = stored
            .agent_id
            .as_deref()
            .and_then(|id| self.services.agents.get(id));
        let switch_agent = {
            let mut ctx = self.ctx.lock().await;
            ctx.coalescer.discard();
            ctx.forget_remote_session();
            ctx.transcript = Transcript::from_messages(stored.messages.clone());
            ctx.stored_session_id = stored.id.clone();
            match &agent {
                Some(agent) if ctx.agent_id.as_deref() != Some(agent.id.as_str()) => {
                    ctx.agent_id = Some(agent.id.clone());
                    true
                }
                _ => false,
            }
        };

        if let (true, Some(agent)) = (switch_agent, agent) {
            if self.client.is_connected() {
                self.client.disconnect().await;
            }
            self.client.set_agent(agent.clone());
            self.emit(UiEvent::AgentChanged {
                agent_id: agent.id,
                agent_name: agent.name,
            });
        }

        tracing::info!(
            "[Session] {} loaded stored session {} ({} messages)",
            self.id,
            stored.id,
            stored.messages.len()
        );
        self.emit(UiEvent::SessionLoaded {
            stored_session_id: stored.id,
            agent_id: stored.agent_id,
            messages: stored.messages,
        });
        Ok(())
    }

    /// Sends the initial state to a newly attached view.
    pub async fn announce(&self) -> Result<()> {
        self.emit(UiEvent::ConnectionState {
            state: self.client.state(),
        });

        let (selected, stored_session_id, messages) = {
            let ctx = self.ctx.lock().await;
            (
                ctx.agent_id.clone(),
                ctx.stored_session_id.clone(),
                ctx.transcript.messages.clone(),
            )
        };
        // Summaries probe PATH for each agent command.
        let directory = self.services.agents.clone();
        let agents = tokio::task::spawn_blocking(move || directory.summaries())
            .await
            .map_err(|e| NexusError::internal(format!("agent probe failed: {}", e)))?;
        self.emit(UiEvent::Agents {
            agents,
            selected: selected.clone(),
        });
        self.emit(UiEvent::Sessions {
            sessions: self.services.stored_sessions.list().await?,
        });
        if let Some(metadata) = self.client.session_metadata() {
            self.emit(UiEvent::SessionMetadata(metadata));
        }
        if !messages.is_empty() {
            self.emit(UiEvent::SessionLoaded {
                stored_session_id,
                agent_id: selected,
                messages,
            });
        }
        Ok(())
    }

    /// Flushes buffers, stops background work and disconnects the agent.
    pub async fn dispose(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        {
            let mut ctx = self.ctx.lock().await;
            self.settle_stream(&mut ctx);
            if let Some(task) = ctx.metadata_refetch.take() {
                task.abort();
            }
            self.persist(&ctx).await;
        }
        self.cancel.cancel();
        self.client.disconnect().await;
        tracing::info!("[Session] Disposed session {}", self.id);
    }

    // ========================================================================
    // Inbox processing
    // ========================================================================

    /// Queues an inbound protocol event behind everything already received.
    pub fn dispatch(&self, event: ProtocolEvent) {
        if self.inbox.send(SessionInput::Protocol(event)).is_err() {
            tracing::trace!("[Session] {} dropped event after disposal", self.id);
        }
    }

    async fn process(self: &Arc<Self>, input: SessionInput) {
        match input {
            SessionInput::Protocol(ProtocolEvent::StateChanged(state)) => {
                self.on_state_changed(state).await
            }
            SessionInput::Protocol(ProtocolEvent::SessionUpdate(notification)) => {
                self.on_session_update(notification.update).await
            }
            SessionInput::Protocol(ProtocolEvent::Stderr(text)) => self.on_stderr(&text).await,
            SessionInput::TurnFinished { result, reply } => {
                let outcome = self.finish_turn(result).await;
                let _ = reply.send(outcome);
            }
            SessionInput::FlushDue(ticket) => {
                let mut ctx = self.ctx.lock().await;
                if let Some(event) = ctx.coalescer.fire(&ticket) {
                    self.apply_and_publish(&mut ctx, event);
                }
            }
        }
    }

    async fn on_state_changed(&self, state: ConnectionState) {
        tracing::debug!("[Session] {} connection state {}", self.id, state);
        if state.is_dropped() {
            self.ctx.lock().await.forget_remote_session();
        }
        self.emit(UiEvent::ConnectionState { state });
        if let Some(observer) = &self.observer {
            observer(&self.id, state);
        }
    }

    async fn on_session_update(self: &Arc<Self>, update: SessionUpdate) {
        let mut ctx = self.ctx.lock().await;
        match update {
            SessionUpdate::AgentMessageChunk { content } => {
                let Some(text) = content.as_text() else {
                    return;
                };
                ctx.turn.text_chars += text.len();
                self.emit(UiEvent::StreamChunk {
                    text: text.to_string(),
                });
                let push = ctx.coalescer.push_text(text);
                self.absorb(&mut ctx, push);
            }
            SessionUpdate::AgentThoughtChunk { content } => {
                let Some(text) = content.as_text() else {
                    return;
                };
                self.emit(UiEvent::ThinkingChunk {
                    text: text.to_string(),
                });
                let push = ctx.coalescer.push_thought(text);
                self.absorb(&mut ctx, push);
            }
            SessionUpdate::ToolCall(data) => {
                let patch = data.to_patch(true);
                ctx.turn.tool_events += 1;
                self.emit(UiEvent::ToolCallStart {
                    tool_call_id: data.tool_call_id.clone(),
                    name: data.name().to_string(),
                    kind: data.kind.clone(),
                });
                let push = ctx.coalescer.push_tool(&data.tool_call_id, patch);
                self.absorb(&mut ctx, push);
            }
            SessionUpdate::ToolCallUpdate(data) => {
                let patch = data.to_patch(false);
                ctx.turn.tool_events += 1;
                if let Some(status) = patch.status.filter(|s| s.is_terminal()) {
                    let event = UiEvent::ToolCallComplete {
                        tool_call_id: data.tool_call_id.clone(),
                        name: known_tool_name(&ctx, &data),
                        kind: patch.kind.clone().or_else(|| known_tool_kind(&ctx, &data)),
                        status,
                        input: patch.input.clone(),
                        output: patch.output.clone(),
                    };
                    self.emit(event);
                }
                let push = ctx.coalescer.push_tool(&data.tool_call_id, patch);
                self.absorb(&mut ctx, push);
            }
            SessionUpdate::CurrentModeUpdate { current_mode_id } => {
                self.emit(UiEvent::ModeUpdate {
                    mode_id: current_mode_id,
                });
            }
            SessionUpdate::AvailableCommandsUpdate { available_commands } => {
                self.emit(UiEvent::AvailableCommands {
                    commands: available_commands,
                });
            }
            SessionUpdate::Plan { entries } => self.emit(UiEvent::Plan { entries }),
            SessionUpdate::Unknown => {
                tracing::trace!("[Session] {} ignored unknown session update", self.id);
            }
        }
    }

    async fn on_stderr(&self, text: &str) {
        tracing::debug!(target: "nexus::agent_stderr", session = %self.id, "{}", text.trim_end());
        let mut ctx = self.ctx.lock().await;
        let Some(report) = ctx.stderr.append(text) else {
            return;
        };
        let error = NexusError::AgentRuntime(report.to_string());
        tracing::warn!("[Session] {} agent reported: {}", self.id, error);
        ctx.apply(TranscriptEvent::Error(error.to_string()));
        self.emit(UiEvent::AgentError {
            text: error.to_string(),
        });
        self.persist(&ctx).await;
    }

    /// Applies released events and starts a timer for a newly armed buffer.
    fn absorb(self: &Arc<Self>, ctx: &mut SessionContext, push: Push) {
        for event in push.flushed {
            self.apply_and_publish(ctx, event);
        }
        if let Some(ticket) = push.ticket {
            let session = Arc::downgrade(self);
            let cancel = self.cancel.clone();
            let timer = tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(ticket.delay) => {
                        if let Some(session) = session.upgrade() {
                            let _ = session.inbox.send(SessionInput::FlushDue(ticket));
                        }
                    }
                }
            });
            ctx.coalescer.attach_timer(&ticket, timer);
        }
    }

    fn apply_and_publish(&self, ctx: &mut SessionContext, event: TranscriptEvent) {
        let finalized = ctx.apply(event);
        self.publish_finalized(finalized);
    }

    /// User and error messages have their own events.
    fn publish_finalized(&self, finalized: Vec<Message>) {
        for message in finalized {
            if matches!(message.kind, MessageKind::Assistant | MessageKind::System) {
                self.emit(UiEvent::MessageFinalized { message });
            }
        }
    }

    /// Auto-saves the conversation. Failures are logged, never surfaced.
    async fn persist(&self, ctx: &SessionContext) {
        if ctx.transcript.messages.is_empty() {
            return;
        }
        let stored = StoredSession::from_messages(
            ctx.stored_session_id.clone(),
            ctx.agent_id.clone(),
            ctx.transcript.messages.clone(),
        );
        if let Err(e) = self.services.stored_sessions.save(stored).await {
            tracing::warn!("[Session] {} auto-save failed: {}", self.id, e);
        }
    }

    fn emit(&self, event: UiEvent) {
        self.services.ui.send(&self.id, event);
    }
}

impl Drop for SessionLifecycle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn stream_end_error() -> UiEvent {
    UiEvent::StreamEnd {
        stop_reason: "error".to_string(),
        html: String::new(),
    }
}

/// Name for a completion event; an update may omit the title.
fn known_tool_name(ctx: &SessionContext, data: &ToolCallData) -> String {
    let name = data.name();
    if name != UNKNOWN_TOOL_NAME {
        return name.to_string();
    }
    ctx.coalescer
        .buffered_tool(&data.tool_call_id)
        .and_then(|p| p.name.clone())
        .filter(|n| n != UNKNOWN_TOOL_NAME)
        .or_else(|| {
            ctx.transcript
                .streaming
                .tools
                .find_tool(&data.tool_call_id)
                .map(|node| node.name.clone())
        })
        .unwrap_or_else(|| UNKNOWN_TOOL_NAME.to_string())
}

fn known_tool_kind(ctx: &SessionContext, data: &ToolCallData) -> Option<String> {
    ctx.coalescer
        .buffered_tool(&data.tool_call_id)
        .and_then(|p| p.kind.clone())
        .or_else(|| {
            ctx.transcript
                .streaming
                .tools
                .find_tool(&data.tool_call_id)
                .and_then(|node| node.kind.clone())
        })
}

async fn run_pump(
    session: Weak<SessionLifecycle>,
    mut inbox: mpsc::UnboundedReceiver<SessionInput>,
    cancel: CancellationToken,
) {
    loop {
        let input = tokio::select! {
            _ = cancel.cancelled() => break,
            input = inbox.recv() => match input {
                Some(input) => input,
                None => break,
            },
        };
        let Some(session) = session.upgrade() else {
            break;
        };
        session.process(input).await;
    }
    tracing::trace!("[Session] Pump stopped");
}
