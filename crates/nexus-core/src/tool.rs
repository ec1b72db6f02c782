//! Tool invocation model.
//!
//! A [`ToolNode`] records one tool call reported by the agent. Sub-agent tasks
//! spawn their own tool calls, which are kept as `sub_tools` of the task node.
//! Nodes are owned values inside an insertion-ordered map, so a node can only
//! ever live under one parent.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Placeholder name sent by agents when a notification carries no title.
pub const UNKNOWN_TOOL_NAME: &str = "Unknown";

/// Tool calls keyed by tool-call id, in arrival order.
pub type ToolMap = IndexMap<String, ToolNode>;

/// Lifecycle status of a tool call.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ToolStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl ToolStatus {
    /// Maps a wire status string onto the local status set.
    ///
    /// Agents report `in_progress` for a running tool; anything unrecognised is
    /// treated as still running.
    pub fn from_protocol(status: &str) -> Self {
        match status {
            "pending" => Self::Pending,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Running,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One tool invocation, possibly with nested child invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolNode {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub sub_tools: ToolMap,
}

impl ToolNode {
    pub fn new(name: impl Into<String>, status: ToolStatus) -> Self {
        Self {
            name: name.into(),
            kind: None,
            status,
            input: None,
            output: None,
            agent_type: None,
            description: None,
            sub_tools: IndexMap::new(),
        }
    }

    /// Builds a node from a patch, using `default_status` when the patch has none.
    pub fn from_patch(patch: &ToolPatch, default_status: ToolStatus) -> Self {
        let mut node = Self::new(
            patch
                .name
                .clone()
                .unwrap_or_else(|| UNKNOWN_TOOL_NAME.to_string()),
            patch.status.unwrap_or(default_status),
        );
        node.kind = patch.kind.clone();
        node.input = patch.input.clone();
        node.output = patch.output.clone();
        node.agent_type = patch.agent_type.clone();
        node.description = patch.description.clone();
        node
    }

    /// Merges a patch into this node.
    ///
    /// An incoming `"Unknown"` name never replaces a name already known.
    pub fn apply(&mut self, patch: &ToolPatch) {
        if let Some(name) = &patch.name {
            if name != UNKNOWN_TOOL_NAME || self.name.is_empty() {
                self.name = name.clone();
            }
        }
        if let Some(kind) = &patch.kind {
            self.kind = Some(kind.clone());
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(input) = &patch.input {
            self.input = Some(input.clone());
        }
        if let Some(output) = &patch.output {
            self.output = Some(output.clone());
        }
        if let Some(agent_type) = &patch.agent_type {
            self.agent_type = Some(agent_type.clone());
        }
        if let Some(description) = &patch.description {
            self.description = Some(description.clone());
        }
    }

    /// Whether this call spawns a sub-agent whose tools nest under it.
    pub fn is_agent_task(&self) -> bool {
        matches!(self.kind.as_deref(), Some("task") | Some("agent")) || self.name == "Task"
    }
}

/// Partial update for a [`ToolNode`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ToolStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Tool call that spawned this one, when the agent reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl ToolPatch {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: ToolStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Folds a later patch for the same id into this one.
    ///
    /// Later fields win, except an `"Unknown"` name over a known one. The first
    /// reported parent sticks.
    pub fn merge(&mut self, newer: ToolPatch) {
        match (&self.name, newer.name) {
            (Some(_), Some(name)) if name == UNKNOWN_TOOL_NAME => {}
            (_, Some(name)) => self.name = Some(name),
            (_, None) => {}
        }
        if newer.kind.is_some() {
            self.kind = newer.kind;
        }
        if newer.status.is_some() {
            self.status = newer.status;
        }
        if newer.input.is_some() {
            self.input = newer.input;
        }
        if newer.output.is_some() {
            self.output = newer.output;
        }
        if newer.agent_type.is_some() {
            self.agent_type = newer.agent_type;
        }
        if newer.description.is_some() {
            self.description = newer.description;
        }
        if self.parent_id.is_none() {
            self.parent_id = newer.parent_id;
        }
    }
}

/// Recursive lookups and updates over a tool tree.
pub trait ToolTree {
    fn find_tool(&self, id: &str) -> Option<&ToolNode>;

    fn find_tool_mut(&mut self, id: &str) -> Option<&mut ToolNode>;

    fn contains_tool(&self, id: &str) -> bool {
        self.find_tool(id).is_some()
    }

    /// Merges `patch` into the node with this id wherever it lives, or creates it.
    ///
    /// A new node goes under `patch.parent_id` when that parent is already in
    /// the tree, otherwise at the top level. Existing nodes are never moved.
    fn upsert_tool(&mut self, id: &str, patch: &ToolPatch, default_status: ToolStatus);

    /// Number of nodes in the tree, nested ones included.
    fn tool_count(&self) -> usize;
}

impl ToolTree for ToolMap {
    fn find_tool(&self, id: &str) -> Option<&ToolNode> {
        if let Some(node) = self.get(id) {
            return Some(node);
        }
        self.values().find_map(|node| node.sub_tools.find_tool(id))
    }

    fn find_tool_mut(&mut self, id: &str) -> Option<&mut ToolNode> {
        if self.contains_key(id) {
            return self.get_mut(id);
        }
        for node in self.values_mut() {
            if let Some(found) = node.sub_tools.find_tool_mut(id) {
                return Some(found);
            }
        }
        None
    }

    fn upsert_tool(&mut self, id: &str, patch: &ToolPatch, default_status: ToolStatus) {
        if let Some(existing) = self.find_tool_mut(id) {
            existing.apply(patch);
            return;
        }

        let node = ToolNode::from_patch(patch, default_status);
        if let Some(parent_id) = patch.parent_id.as_deref().filter(|p| *p != id) {
            if let Some(parent) = self.find_tool_mut(parent_id) {
                parent.sub_tools.insert(id.to_string(), node);
                return;
            }
            tracing::debug!(
                "[ToolTree] Parent {} not found for tool {}, attaching at top level",
                parent_id,
                id
            );
        }
        self.insert(id.to_string(), node);
    }

    fn tool_count(&self) -> usize {
        self.values()
            .map(|node| 1 + node.sub_tools.tool_count())
            .sum()
    }
}
