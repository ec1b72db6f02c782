//! Catalog of launchable agents.
//!
//! Agents come from the `[[agents]]` entries of `config.toml`, falling back to
//! the built-in list. Availability means the agent's command resolves on PATH.

use nexus_core::agent::{AgentDescriptor, AgentDirectory, AgentSummary};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Agents offered when the config lists none.
pub fn builtin_agents() -> Vec<AgentDescriptor> {
    vec![
        AgentDescriptor::new(
            "claude-code",
            "Claude Code",
            "npx",
            &["@zed-industries/claude-code-acp"],
        ),
        AgentDescriptor::new("gemini", "Gemini CLI", "gemini", &["--experimental-acp"]),
        AgentDescriptor::new("opencode", "OpenCode", "opencode", &["acp"]),
    ]
}

/// Returns whether `command` can be found on PATH.
pub fn command_exists(command: &str) -> bool {
    #[cfg(unix)]
    let check_cmd = "which";
    #[cfg(windows)]
    let check_cmd = "where";

    std::process::Command::new(check_cmd)
        .arg(command)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

type Probe = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// [`AgentDirectory`] over a fixed agent list.
///
/// Availability probes are cached per command, since they spawn a process.
pub struct ConfiguredAgentCatalog {
    agents: Vec<AgentDescriptor>,
    probe: Probe,
    availability: RwLock<HashMap<String, bool>>,
}

impl ConfiguredAgentCatalog {
    /// Catalog over `agents`, or the built-in list when empty.
    pub fn new(agents: Vec<AgentDescriptor>) -> Self {
        Self::with_probe(agents, command_exists)
    }

    /// Catalog with a custom availability check.
    pub fn with_probe(
        agents: Vec<AgentDescriptor>,
        probe: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        let agents = if agents.is_empty() {
            builtin_agents()
        } else {
            agents
        };
        Self {
            agents,
            probe: Arc::new(probe),
            availability: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_available(&self, agent: &AgentDescriptor) -> bool {
        if let Ok(cache) = self.availability.read() {
            if let Some(available) = cache.get(&agent.command) {
                return *available;
            }
        }

        let available = (self.probe)(&agent.command);
        tracing::debug!(
            "[AgentCatalog] {} ({}) available: {}",
            agent.id,
            agent.command,
            available
        );
        if let Ok(mut cache) = self.availability.write() {
            cache.insert(agent.command.clone(), available);
        }
        available
    }

    /// Forgets cached probe results, e.g. after the user installs an agent.
    pub fn refresh(&self) {
        if let Ok(mut cache) = self.availability.write() {
            cache.clear();
        }
    }
}

impl AgentDirectory for ConfiguredAgentCatalog {
    fn get(&self, agent_id: &str) -> Option<AgentDescriptor> {
        self.agents.iter().find(|a| a.id == agent_id).cloned()
    }

    fn summaries(&self) -> Vec<AgentSummary> {
        self.agents
            .iter()
            .map(|agent| AgentSummary {
                id: agent.id.clone(),
                name: agent.name.clone(),
                available: self.is_available(agent),
            })
            .collect()
    }

    fn first_available(&self) -> Option<AgentDescriptor> {
        self.agents
            .iter()
            .find(|agent| self.is_available(agent))
            .or_else(|| self.agents.first())
            .cloned()
    }
}
