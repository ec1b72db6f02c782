//! Echo agent used by the integration tests.

use async_trait::async_trait;
use nexus_core::agent::AgentDescriptor;
use nexus_core::error::Result;
use nexus_core::protocol::{
    ConnectionState, ContentBlock, EventSink, PromptResponse, ProtocolClient,
    ProtocolClientFactory, SessionMetadata, SessionUpdate,
};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const CONFIG_TOML: &str = r#"
[orchestrator]
connect_settle_ms = 0
agent_switch_settle_ms = 0
metadata_refetch_ms = 10

[[agents]]
id = "echo"
name = "Echo Agent"
command = "sh"

[[agents]]
id = "parrot"
name = "Parrot"
command = "sh"
"#;

/// Replies to every prompt with `echo: <prompt>`.
pub struct EchoClient {
    events: EventSink,
    state: Mutex<ConnectionState>,
    agent: Mutex<Option<AgentDescriptor>>,
}

impl EchoClient {
    pub fn agent_id(&self) -> Option<String> {
        self.agent.lock().unwrap().as_ref().map(|a| a.id.clone())
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
        self.events.state_changed(state);
    }
}

#[async_trait]
impl ProtocolClient for EchoClient {
    fn set_agent(&self, agent: AgentDescriptor) {
        *self.agent.lock().unwrap() = Some(agent);
    }

    async fn connect(&self) -> Result<()> {
        self.set_state(ConnectionState::Connecting);
        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    async fn disconnect(&self) {
        self.set_state(ConnectionState::Disconnected);
    }

    fn is_connected(&self) -> bool {
        *self.state.lock().unwrap() == ConnectionState::Connected
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    async fn new_session(&self, _working_dir: &Path) -> Result<()> {
        Ok(())
    }

    async fn send_message(&self, blocks: Vec<ContentBlock>) -> Result<PromptResponse> {
        let prompt: Vec<&str> = blocks.iter().filter_map(ContentBlock::as_text).collect();
        self.events.session_update(SessionUpdate::AgentMessageChunk {
            content: ContentBlock::text("echo: "),
        });
        self.events.session_update(SessionUpdate::AgentMessageChunk {
            content: ContentBlock::text(prompt.join("\n")),
        });
        Ok(PromptResponse::new("end_turn"))
    }

    async fn set_mode(&self, _mode_id: &str) -> Result<()> {
        Ok(())
    }

    async fn set_model(&self, _model_id: &str) -> Result<()> {
        Ok(())
    }

    fn session_metadata(&self) -> Option<SessionMetadata> {
        None
    }
}

/// Creates one [`EchoClient`] per session and remembers them.
#[derive(Default)]
pub struct EchoFactory {
    pub clients: Mutex<Vec<Arc<EchoClient>>>,
}

impl EchoFactory {
    pub fn client(&self, index: usize) -> Arc<EchoClient> {
        self.clients.lock().unwrap()[index].clone()
    }
}

impl ProtocolClientFactory for EchoFactory {
    fn create(
        &self,
        agent: Option<AgentDescriptor>,
        events: EventSink,
    ) -> Result<Arc<dyn ProtocolClient>> {
        let client = Arc::new(EchoClient {
            events,
            state: Mutex::new(ConnectionState::Disconnected),
            agent: Mutex::new(agent),
        });
        self.clients.lock().unwrap().push(client.clone());
        Ok(client)
    }
}
