//! Built-in agent nodes and prebuilt workflow graphs.
//!
//! The LLM nodes are deliberately thin: they compose a prompt from state
//! slots, call the provider fallback chain, and write one output slot.
//! Their reasoning quality is the model's business, not the engine's. The
//! document-intelligence node bridges a workflow run into the extraction
//! engine.

use std::path::Path;
use std::sync::Arc;

use serde_json::json;

use crate::document::format::detect_format;
use crate::document::loader::DocumentLoader;
use crate::extraction::engine::{CompletionEngine, ProcessOptions};
use crate::providers::fallback::FallbackController;
use crate::providers::{GenerationParams, GenerationRequest};

use super::graph::{AgentNode, WorkflowGraph};
use super::{WorkflowError, WorkflowState};

// ──────────────────────────────────────────────
// LLM-backed agent node
// ──────────────────────────────────────────────

/// A single LLM step: prompt from state slots in, one output slot written.
pub struct LlmAgentNode {
    name: String,
    system_prompt: String,
    /// Context slots included in the prompt, in order.
    input_slots: Vec<String>,
    output_slot: String,
    params: GenerationParams,
    /// Review-style nodes set an `approved` flag from their own output.
    flag_approval: bool,
    fallback: Arc<FallbackController>,
}

impl LlmAgentNode {
    pub fn new(
        name: &str,
        system_prompt: &str,
        input_slots: &[&str],
        output_slot: &str,
        params: GenerationParams,
        fallback: Arc<FallbackController>,
    ) -> Self {
        Self {
            name: name.to_string(),
            system_prompt: system_prompt.to_string(),
            input_slots: input_slots.iter().map(|s| s.to_string()).collect(),
            output_slot: output_slot.to_string(),
            params,
            flag_approval: false,
            fallback,
        }
    }

    /// Research specialist: gathers and synthesizes information on the task.
    pub fn research(fallback: Arc<FallbackController>) -> Self {
        Self::new(
            "research",
            "You are a research specialist. Gather comprehensive information \
             on the given topic and provide a well-structured summary of key \
             findings and trends.",
            &[],
            "research_findings",
            GenerationParams {
                temperature: 0.3,
                ..Default::default()
            },
            fallback,
        )
    }

    /// Content writer: turns research findings into a draft.
    pub fn writing(fallback: Arc<FallbackController>) -> Self {
        Self::new(
            "write",
            "You are a professional writer. Create clear, well-structured \
             content for the target audience from the provided research.",
            &["research_findings"],
            "written_content",
            GenerationParams {
                temperature: 0.7,
                ..Default::default()
            },
            fallback,
        )
    }

    /// Reviewer: checks the draft and renders a verdict.
    pub fn review(fallback: Arc<FallbackController>) -> Self {
        let mut node = Self::new(
            "review",
            "You are a quality reviewer. Check the content for accuracy, \
             clarity and consistency. Say 'approved' when it meets the bar, \
             otherwise give specific improvement feedback.",
            &["written_content"],
            "review_feedback",
            GenerationParams {
                temperature: 0.2,
                ..Default::default()
            },
            fallback,
        );
        node.flag_approval = true;
        node
    }

    fn compose_prompt(&self, state: &WorkflowState) -> String {
        let mut prompt = String::new();

        let inputs: Vec<(&str, String)> = self
            .input_slots
            .iter()
            .filter_map(|slot| {
                state.slot(slot).map(|v| {
                    let rendered = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                    (slot.as_str(), rendered)
                })
            })
            .collect();

        if !inputs.is_empty() {
            prompt.push_str("Context from previous agents:\n");
            for (slot, value) in inputs {
                prompt.push_str(&format!("{slot}: {value}\n"));
            }
            prompt.push('\n');
        }

        if let Some(task) = &state.task {
            prompt.push_str(&format!("Task: {task}"));
        }

        prompt
    }
}

impl AgentNode for LlmAgentNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, mut state: WorkflowState) -> Result<WorkflowState, WorkflowError> {
        let request = GenerationRequest::new(self.compose_prompt(&state))
            .with_system(self.system_prompt.clone())
            .with_params(self.params);

        let result = self.fallback.execute(&request).map_err(|e| {
            WorkflowError::NodeFailed {
                node: self.name.clone(),
                message: e.to_string(),
            }
        })?;

        let output = result.completion.text;
        tracing::info!(
            agent = %self.name,
            provider = %result.provider,
            output_len = output.len(),
            "agent step complete"
        );

        if self.flag_approval {
            let lower = output.to_lowercase();
            let approved = lower.contains("approved") || lower.contains("excellent");
            state.set_slot("approved", json!(approved));
        }

        state.set_slot(&self.output_slot, json!(output.clone()));
        state.record_output(&self.name, output.clone());
        state.push_message(&self.name, output);
        Ok(state)
    }
}

// ──────────────────────────────────────────────
// Document intelligence nodes
// ──────────────────────────────────────────────

/// Checks that the document path in state exists and has a supported
/// format. Writes `processing_status` for downstream routing instead of
/// failing the run.
pub struct ValidateDocumentNode;

impl AgentNode for ValidateDocumentNode {
    fn name(&self) -> &str {
        "validate"
    }

    fn process(&self, mut state: WorkflowState) -> Result<WorkflowState, WorkflowError> {
        let Some(path) = state.slot_str("document_path").map(str::to_string) else {
            state.set_slot("processing_status", json!("error"));
            state.set_slot("error_detail", json!("no document path provided"));
            return Ok(state);
        };

        match detect_format(Path::new(&path)) {
            Ok(detection) if detection.format.is_supported() => {
                state.set_slot("processing_status", json!("validated"));
                state.push_message("validate", format!("document validated: {path}"));
            }
            Ok(detection) => {
                state.set_slot("processing_status", json!("error"));
                state.set_slot(
                    "error_detail",
                    json!(format!("unsupported format: {}", detection.mime_type)),
                );
            }
            Err(e) => {
                state.set_slot("processing_status", json!("error"));
                state.set_slot("error_detail", json!(e.to_string()));
            }
        }
        Ok(state)
    }
}

/// Runs the extraction engine on the document named in state and folds the
/// result back into the workflow context for downstream agents.
pub struct DocumentIntelligenceNode {
    engine: Arc<CompletionEngine>,
    loader: Arc<dyn DocumentLoader>,
    options: ProcessOptions,
}

impl DocumentIntelligenceNode {
    pub fn new(
        engine: Arc<CompletionEngine>,
        loader: Arc<dyn DocumentLoader>,
        options: ProcessOptions,
    ) -> Self {
        Self {
            engine,
            loader,
            options,
        }
    }
}

impl AgentNode for DocumentIntelligenceNode {
    fn name(&self) -> &str {
        "document_intelligence"
    }

    fn process(&self, mut state: WorkflowState) -> Result<WorkflowState, WorkflowError> {
        let path = state
            .slot_str("document_path")
            .map(str::to_string)
            .ok_or_else(|| WorkflowError::NodeFailed {
                node: self.name().to_string(),
                message: "no document path in state".into(),
            })?;

        let document = self
            .loader
            .load(Path::new(&path))
            .map_err(crate::extraction::ExtractError::from)?;

        // Callers that share one token between run() and these options get
        // unit-level cancellation as well as transition-level.
        let result = self.engine.process(&document, &self.options)?;

        state.set_slot("document_type", json!(result.doc_type.clone()));
        state.set_slot(
            "extracted_data",
            serde_json::to_value(&result).unwrap_or(json!(null)),
        );
        state.set_slot("processing_status", json!("completed"));
        state.push_message(
            self.name(),
            format!(
                "extracted {} fields from {} units ({} failed)",
                result.fields.len(),
                result.unit_count,
                result.failed_units.len()
            ),
        );
        state.record_output(self.name(), result.doc_type);
        Ok(state)
    }
}

/// Terminal error handler: folds the failure detail into the message log.
pub struct ErrorReportNode;

impl AgentNode for ErrorReportNode {
    fn name(&self) -> &str {
        "handle_error"
    }

    fn process(&self, mut state: WorkflowState) -> Result<WorkflowState, WorkflowError> {
        let detail = state
            .slot_str("error_detail")
            .or(state.error_message.as_deref())
            .unwrap_or("unknown error")
            .to_string();
        tracing::warn!(error = %detail, "workflow error handled");
        state.push_message("handle_error", format!("error: {detail}"));
        state.set_slot("processing_status", json!("error"));
        Ok(state)
    }
}

/// Assembles the final deliverable from the content pipeline's slots.
pub struct FinalizeNode;

impl AgentNode for FinalizeNode {
    fn name(&self) -> &str {
        "finalize"
    }

    fn process(&self, mut state: WorkflowState) -> Result<WorkflowState, WorkflowError> {
        let content = state.slot_str("written_content").unwrap_or("").to_string();
        let feedback = state.slot_str("review_feedback").unwrap_or("").to_string();

        let final_result = format!(
            "=== FINAL CONTENT ===\n{content}\n\n=== REVIEW FEEDBACK ===\n{feedback}"
        );
        state.set_slot("final_result", json!(final_result));
        state.push_message("finalize", "workflow complete");
        Ok(state)
    }
}

// ──────────────────────────────────────────────
// Prebuilt graphs
// ──────────────────────────────────────────────

/// Content pipeline: research → write → review → finalize, with a bounded
/// revision loop when the reviewer withholds approval.
pub fn content_graph(fallback: Arc<FallbackController>) -> WorkflowGraph {
    WorkflowGraph::builder("research")
        .node(LlmAgentNode::research(fallback.clone()))
        .node(LlmAgentNode::writing(fallback.clone()))
        .node(LlmAgentNode::review(fallback))
        .node(FinalizeNode)
        .edge("research", "write")
        .edge("write", "review")
        .retry_edge_if("review", "write", 2, |s| s.slot_bool("approved") != Some(true))
        .edge("review", "finalize")
        .finish("finalize")
        .build()
        .expect("content graph wiring is static")
}

/// Document pipeline: validate → extract, with conditional error routing.
pub fn document_graph(
    engine: Arc<CompletionEngine>,
    loader: Arc<dyn DocumentLoader>,
    options: ProcessOptions,
) -> WorkflowGraph {
    WorkflowGraph::builder("validate")
        .node(ValidateDocumentNode)
        .node(DocumentIntelligenceNode::new(engine, loader, options))
        .node(ErrorReportNode)
        .edge_if("validate", "document_intelligence", |s| {
            s.slot_str("processing_status") == Some("validated")
        })
        .edge("validate", "handle_error")
        .finish("document_intelligence")
        .on_error("handle_error")
        .build()
        .expect("document graph wiring is static")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::config::Settings;
    use crate::document::loader::TextLoader;
    use crate::extraction::contract::{ExtractionContract, FieldKind, FieldSpec};
    use crate::providers::registry::ProviderRegistry;
    use crate::providers::MockProvider;
    use crate::workflow::graph::run;
    use crate::workflow::RunStatus;
    use std::io::Write;

    fn fallback_with(provider: MockProvider) -> Arc<FallbackController> {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(provider));
        Arc::new(FallbackController::new(Arc::new(registry)))
    }

    fn content_provider(review_reply: &str) -> MockProvider {
        MockProvider::ok("mock", "Research findings about the topic.")
            .with_rule("written_content", Ok(review_reply.to_string()))
            .with_rule("research_findings", Ok("Draft article text.".to_string()))
    }

    // ── Content pipeline ────────────────────────────────────────────

    #[test]
    fn content_pipeline_happy_path() {
        let fallback = fallback_with(content_provider("Approved, excellent work."));
        let graph = content_graph(fallback);

        let outcome = run(
            &graph,
            WorkflowState::new("write about local-first AI"),
            &CancellationToken::new(),
        );

        assert!(outcome.is_success());
        assert_eq!(outcome.state.status, RunStatus::Completed);
        assert_eq!(
            outcome.state.agent_outputs["write"],
            "Draft article text."
        );
        assert!(outcome.state.agent_outputs.contains_key("research"));
        assert!(outcome.state.agent_outputs.contains_key("review"));

        let final_result = outcome.state.slot_str("final_result").unwrap();
        assert!(final_result.contains("Draft article text."));
        assert!(final_result.contains("Approved"));
        // Approved on first pass — no revision loop
        assert!(outcome.state.retries.is_empty());
    }

    #[test]
    fn content_pipeline_revision_loop_is_bounded() {
        let fallback = fallback_with(content_provider("Needs revision: add sources."));
        let graph = content_graph(fallback);

        let outcome = run(
            &graph,
            WorkflowState::new("write about anything"),
            &CancellationToken::new(),
        );

        // Reviewer never approves; the loop runs its bounded retries and
        // the run still completes through finalize.
        assert!(outcome.is_success());
        assert_eq!(outcome.state.retries["review->write"], 2);
        assert_eq!(outcome.state.slot_bool("approved"), Some(false));
        assert!(outcome
            .state
            .slot_str("final_result")
            .unwrap()
            .contains("Needs revision"));
    }

    #[test]
    fn agent_prompt_includes_context_and_task() {
        let fallback = fallback_with(MockProvider::ok("mock", "unused"));
        let node = LlmAgentNode::writing(fallback);

        let mut state = WorkflowState::new("explain the merge policy");
        state.set_slot("research_findings", serde_json::json!("key facts here"));

        let prompt = node.compose_prompt(&state);
        assert!(prompt.contains("research_findings: key facts here"));
        assert!(prompt.contains("Task: explain the merge policy"));
    }

    #[test]
    fn provider_exhaustion_fails_the_node() {
        let fallback = fallback_with(MockProvider::failing(
            "mock",
            crate::providers::ProviderError::Unavailable("down".into()),
        ));
        let graph = content_graph(fallback);

        let outcome = run(
            &graph,
            WorkflowState::new("anything"),
            &CancellationToken::new(),
        );

        assert!(!outcome.is_success());
        assert_eq!(outcome.state.status, RunStatus::Failed);
        assert!(matches!(
            outcome.error,
            Some(WorkflowError::NodeFailed { .. })
        ));
    }

    // ── Document pipeline ───────────────────────────────────────────

    fn invoice_contract() -> ExtractionContract {
        ExtractionContract::new("invoice", "billing document")
            .with_field(FieldSpec::new("total_amount", "total", FieldKind::Number).required())
    }

    fn document_engine() -> Arc<CompletionEngine> {
        let provider = MockProvider::ok("mock", "no rule matched")
            .with_rule(
                "Classify this document",
                Ok("```json\n{\"label\": \"invoice\", \"confidence\": 0.9}\n```".into()),
            )
            .with_rule(
                "Extract the following fields",
                Ok("```json\n{\"total_amount\": 321.5}\n```".into()),
            );
        Arc::new(CompletionEngine::new(
            fallback_with(provider),
            &Settings::default(),
        ))
    }

    #[test]
    fn document_pipeline_extracts_into_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invoice.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "Invoice 42 from Acme Corp, total due 321.50 dollars.").unwrap();

        let graph = document_graph(
            document_engine(),
            Arc::new(TextLoader),
            ProcessOptions::new(vec![invoice_contract()]),
        );

        let mut state = WorkflowState::new("process the invoice");
        state.set_slot("document_path", serde_json::json!(path.to_str().unwrap()));

        let outcome = run(&graph, state, &CancellationToken::new());

        assert!(outcome.is_success());
        assert_eq!(outcome.state.slot_str("processing_status"), Some("completed"));
        assert_eq!(outcome.state.slot_str("document_type"), Some("invoice"));

        let extracted = outcome.state.slot("extracted_data").unwrap();
        assert_eq!(extracted["doc_type"], "invoice");
        assert!(extracted["fields"]
            .as_array()
            .unwrap()
            .iter()
            .any(|f| f["name"] == "total_amount"));
    }

    #[test]
    fn missing_document_routes_to_error_node() {
        let graph = document_graph(
            document_engine(),
            Arc::new(TextLoader),
            ProcessOptions::new(vec![invoice_contract()]),
        );

        let mut state = WorkflowState::new("process");
        state.set_slot(
            "document_path",
            serde_json::json!("/nonexistent/invoice.txt"),
        );

        let outcome = run(&graph, state, &CancellationToken::new());

        assert!(outcome.is_success());
        assert_eq!(outcome.state.slot_str("processing_status"), Some("error"));
        assert!(outcome
            .state
            .messages
            .iter()
            .any(|m| m.role == "handle_error"));
    }

    #[test]
    fn pathless_state_routes_to_error_node() {
        let graph = document_graph(
            document_engine(),
            Arc::new(TextLoader),
            ProcessOptions::new(vec![invoice_contract()]),
        );

        let outcome = run(
            &graph,
            WorkflowState::new("process"),
            &CancellationToken::new(),
        );

        assert!(outcome.is_success());
        assert_eq!(outcome.state.slot_str("processing_status"), Some("error"));
        assert!(outcome
            .state
            .slot_str("error_detail")
            .unwrap()
            .contains("no document path"));
    }
}
