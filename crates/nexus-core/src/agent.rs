//! Agent launch recipes and the directory that lists them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How to launch one agent process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: String,
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl AgentDescriptor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        command: impl Into<String>,
        args: &[&str],
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            command: command.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: BTreeMap::new(),
        }
    }
}

/// Agent entry as shown in an agent picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    pub id: String,
    pub name: String,
    pub available: bool,
}

/// Lookup of the agents this host can launch.
pub trait AgentDirectory: Send + Sync {
    fn get(&self, agent_id: &str) -> Option<AgentDescriptor>;

    /// All configured agents with their availability.
    fn summaries(&self) -> Vec<AgentSummary>;

    /// First agent whose command is installed.
    fn first_available(&self) -> Option<AgentDescriptor>;

    /// Agent a new session starts with.
    ///
    /// A saved choice wins when it still exists; otherwise the first
    /// installed agent.
    fn resolve_initial(&self, saved: Option<&str>) -> Option<AgentDescriptor> {
        saved
            .and_then(|id| self.get(id))
            .or_else(|| self.first_available())
    }
}
