//! Workflow graph construction and traversal.
//!
//! Nodes are trait objects with one method: state in, state out. Edges are
//! tried in insertion order; the first whose guard passes is taken. A node
//! is never revisited within one run except through an explicit retry edge
//! whose counter, carried in state, bounds the loop. A node failure routes
//! to the wired error node when present, otherwise the run aborts returning
//! the partial state alongside the failure.

use std::collections::HashMap;

use crate::cancel::CancellationToken;

use super::{RunStatus, WorkflowError, WorkflowState};

/// Hard ceiling on traversal steps, guarding against mis-wired graphs.
const DEFAULT_MAX_STEPS: usize = 64;

/// One agent step: a function from state to state.
pub trait AgentNode: Send + Sync {
    fn name(&self) -> &str;
    fn process(&self, state: WorkflowState) -> Result<WorkflowState, WorkflowError>;
}

type Guard = Box<dyn Fn(&WorkflowState) -> bool + Send + Sync>;

enum EdgeTarget {
    Node(String),
    Finish,
}

struct Edge {
    from: String,
    target: EdgeTarget,
    guard: Option<Guard>,
    /// Non-zero marks a retry edge; the counter lives in state.
    max_retries: u32,
}

pub struct WorkflowGraph {
    nodes: HashMap<String, Box<dyn AgentNode>>,
    edges: Vec<Edge>,
    entry: String,
    error_node: Option<String>,
    max_steps: usize,
}

impl WorkflowGraph {
    pub fn builder(entry: &str) -> GraphBuilder {
        GraphBuilder {
            nodes: HashMap::new(),
            edges: Vec::new(),
            entry: entry.to_string(),
            error_node: None,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

pub struct GraphBuilder {
    nodes: HashMap<String, Box<dyn AgentNode>>,
    edges: Vec<Edge>,
    entry: String,
    error_node: Option<String>,
    max_steps: usize,
}

impl GraphBuilder {
    pub fn node(mut self, node: impl AgentNode + 'static) -> Self {
        self.nodes.insert(node.name().to_string(), Box::new(node));
        self
    }

    /// Unconditional edge.
    pub fn edge(mut self, from: &str, to: &str) -> Self {
        self.edges.push(Edge {
            from: from.to_string(),
            target: EdgeTarget::Node(to.to_string()),
            guard: None,
            max_retries: 0,
        });
        self
    }

    /// Edge taken only when the predicate holds for the current state.
    pub fn edge_if(
        mut self,
        from: &str,
        to: &str,
        guard: impl Fn(&WorkflowState) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.edges.push(Edge {
            from: from.to_string(),
            target: EdgeTarget::Node(to.to_string()),
            guard: Some(Box::new(guard)),
            max_retries: 0,
        });
        self
    }

    /// Guarded edge that may revisit an earlier node, at most `max_retries`
    /// times per run.
    pub fn retry_edge_if(
        mut self,
        from: &str,
        to: &str,
        max_retries: u32,
        guard: impl Fn(&WorkflowState) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.edges.push(Edge {
            from: from.to_string(),
            target: EdgeTarget::Node(to.to_string()),
            guard: Some(Box::new(guard)),
            max_retries,
        });
        self
    }

    /// Explicit finish marker from a node.
    pub fn finish(mut self, from: &str) -> Self {
        self.edges.push(Edge {
            from: from.to_string(),
            target: EdgeTarget::Finish,
            guard: None,
            max_retries: 0,
        });
        self
    }

    /// Node that receives the state when any other node fails.
    pub fn on_error(mut self, node_name: &str) -> Self {
        self.error_node = Some(node_name.to_string());
        self
    }

    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Validate wiring: the entry, every edge endpoint, and the error node
    /// must name registered nodes.
    pub fn build(self) -> Result<WorkflowGraph, WorkflowError> {
        if !self.nodes.contains_key(&self.entry) {
            return Err(WorkflowError::MissingEntry(self.entry));
        }
        for edge in &self.edges {
            if !self.nodes.contains_key(&edge.from) {
                return Err(WorkflowError::UnknownNode(edge.from.clone()));
            }
            if let EdgeTarget::Node(to) = &edge.target {
                if !self.nodes.contains_key(to) {
                    return Err(WorkflowError::UnknownNode(to.clone()));
                }
            }
        }
        if let Some(error_node) = &self.error_node {
            if !self.nodes.contains_key(error_node) {
                return Err(WorkflowError::UnknownNode(error_node.clone()));
            }
        }
        Ok(WorkflowGraph {
            nodes: self.nodes,
            edges: self.edges,
            entry: self.entry,
            error_node: self.error_node,
            max_steps: self.max_steps,
        })
    }
}

/// Outcome of one run: the final (or partial) state, plus the failure when
/// the run aborted.
pub struct RunOutcome {
    pub state: WorkflowState,
    pub error: Option<WorkflowError>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Execute one traversal from the entry node. Strictly sequential; the
/// cancellation token is checked between node transitions.
pub fn run(graph: &WorkflowGraph, initial: WorkflowState, cancel: &CancellationToken) -> RunOutcome {
    let mut state = initial;
    state.status = RunStatus::Running;
    let run_id = state.run_id;
    let _span = tracing::info_span!("workflow_run", run_id = %run_id).entered();

    let mut current = graph.entry.clone();
    let mut steps = 0usize;

    loop {
        if cancel.is_cancelled() {
            state.status = RunStatus::Failed;
            state.error_message = Some("cancelled".into());
            return RunOutcome {
                state,
                error: Some(WorkflowError::Cancelled),
            };
        }
        if steps >= graph.max_steps {
            state.status = RunStatus::Failed;
            state.error_message = Some(format!("exceeded {} steps", graph.max_steps));
            return RunOutcome {
                state,
                error: Some(WorkflowError::StepCeiling(graph.max_steps)),
            };
        }
        steps += 1;

        let node = graph
            .nodes
            .get(&current)
            .expect("edge targets validated at build time");

        tracing::debug!(node = %current, step = steps, "executing node");

        state = match node.process(state.clone()) {
            Ok(next) => next,
            Err(e) => {
                tracing::warn!(node = %current, error = %e, "node failed");
                state.error_message = Some(e.to_string());

                // Route to the error handler if one is wired and the
                // failing node is not the handler itself.
                match &graph.error_node {
                    Some(handler) if *handler != current => {
                        current = handler.clone();
                        continue;
                    }
                    _ => {
                        state.status = RunStatus::Failed;
                        return RunOutcome {
                            state,
                            error: Some(e),
                        };
                    }
                }
            }
        };

        // First matching edge in insertion order wins.
        let mut next: Option<String> = None;
        for edge in graph.edges.iter().filter(|e| e.from == current) {
            if let Some(guard) = &edge.guard {
                if !guard(&state) {
                    continue;
                }
            }
            if edge.max_retries > 0 {
                let EdgeTarget::Node(to) = &edge.target else {
                    continue;
                };
                let key = format!("{}->{}", edge.from, to);
                let taken = state.retries.get(&key).copied().unwrap_or(0);
                if taken >= edge.max_retries {
                    tracing::debug!(edge = %key, "retry budget spent, skipping edge");
                    continue;
                }
                state.retries.insert(key, taken + 1);
                next = Some(to.clone());
                break;
            }
            match &edge.target {
                EdgeTarget::Node(to) => next = Some(to.clone()),
                EdgeTarget::Finish => {}
            }
            break;
        }

        match next {
            Some(to) => current = to,
            None => {
                // Finish marker or terminal node (no matching edge)
                state.status = RunStatus::Completed;
                tracing::info!(steps, "workflow run completed");
                return RunOutcome { state, error: None };
            }
        }
    }
}
