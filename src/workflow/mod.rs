//! Agent workflow graphs.
//!
//! A workflow is a directed graph of agent nodes over a shared mutable
//! state. Each node is a function from state to state; edges may be guarded
//! by predicates over the current state. One run is one traversal from the
//! entry node to a terminal node.

pub mod agents;
pub mod graph;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::extraction::ExtractError;

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("node '{node}' failed: {message}")]
    NodeFailed { node: String, message: String },

    #[error("graph references unknown node '{0}'")]
    UnknownNode(String),

    #[error("graph has no node registered for entry '{0}'")]
    MissingEntry(String),

    #[error("traversal exceeded {0} steps")]
    StepCeiling(usize),

    #[error("workflow run cancelled")]
    Cancelled,

    #[error("document extraction failed: {0}")]
    Extraction(#[from] ExtractError),
}

/// One message accumulated along a run, for diagnosis and downstream nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// State threaded through a workflow run. Created at run start, mutated
/// node-by-node along the traversed path, owned exclusively by its run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub run_id: Uuid,
    /// The task this run is working on.
    pub task: Option<String>,
    /// Named context slots read and written by nodes.
    pub context: HashMap<String, serde_json::Value>,
    /// One output slot per agent per run.
    pub agent_outputs: HashMap<String, String>,
    pub messages: Vec<StateMessage>,
    /// Bounded retry counters keyed by retry edge.
    pub retries: HashMap<String, u32>,
    pub status: RunStatus,
    pub error_message: Option<String>,
}

impl WorkflowState {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            task: Some(task.into()),
            context: HashMap::new(),
            agent_outputs: HashMap::new(),
            messages: Vec::new(),
            retries: HashMap::new(),
            status: RunStatus::Pending,
            error_message: None,
        }
    }

    pub fn empty() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            task: None,
            context: HashMap::new(),
            agent_outputs: HashMap::new(),
            messages: Vec::new(),
            retries: HashMap::new(),
            status: RunStatus::Pending,
            error_message: None,
        }
    }

    pub fn set_slot(&mut self, key: &str, value: serde_json::Value) {
        self.context.insert(key.to_string(), value);
    }

    pub fn slot(&self, key: &str) -> Option<&serde_json::Value> {
        self.context.get(key)
    }

    pub fn slot_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(|v| v.as_str())
    }

    pub fn slot_bool(&self, key: &str) -> Option<bool> {
        self.context.get(key).and_then(|v| v.as_bool())
    }

    /// Record an agent's output under its own slot.
    pub fn record_output(&mut self, agent: &str, output: impl Into<String>) {
        self.agent_outputs.insert(agent.to_string(), output.into());
    }

    pub fn push_message(&mut self, role: &str, content: impl Into<String>) {
        self.messages.push(StateMessage {
            role: role.to_string(),
            content: content.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_state_carries_task() {
        let state = WorkflowState::new("write a report");
        assert_eq!(state.task.as_deref(), Some("write a report"));
        assert_eq!(state.status, RunStatus::Pending);
        assert!(state.context.is_empty());
    }

    #[test]
    fn slot_accessors() {
        let mut state = WorkflowState::empty();
        state.set_slot("approved", json!(true));
        state.set_slot("summary", json!("short text"));

        assert_eq!(state.slot_bool("approved"), Some(true));
        assert_eq!(state.slot_str("summary"), Some("short text"));
        assert!(state.slot("missing").is_none());
        assert!(state.slot_bool("summary").is_none());
    }

    #[test]
    fn one_output_slot_per_agent() {
        let mut state = WorkflowState::empty();
        state.record_output("research", "first");
        state.record_output("research", "second");

        // The map guarantees a single value per agent slot
        assert_eq!(state.agent_outputs.len(), 1);
        assert_eq!(state.agent_outputs["research"], "second");
    }

    #[test]
    fn state_round_trips_through_serde() {
        let mut state = WorkflowState::new("task");
        state.push_message("agent", "hello");
        state.set_slot("n", json!(42));

        let json = serde_json::to_string(&state).unwrap();
        let back: WorkflowState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.run_id, state.run_id);
        assert_eq!(back.messages.len(), 1);
        assert_eq!(back.slot("n"), Some(&json!(42)));
    }

    #[test]
    fn distinct_runs_have_distinct_ids() {
        assert_ne!(WorkflowState::new("a").run_id, WorkflowState::new("b").run_id);
    }
}
