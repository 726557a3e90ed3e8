pub mod cancel;
pub mod config;
pub mod document;
pub mod extraction;
pub mod providers;
pub mod workflow;

pub use cancel::CancellationToken;
pub use config::Settings;
pub use document::loader::{DocumentLoader, TextLoader};
pub use document::split::{SplitStrategy, Splitter};
pub use document::Document;
pub use extraction::contract::{ExtractionContract, FieldKind, FieldSpec, FieldValue};
pub use extraction::engine::{CompletionEngine, CompletionStrategy, ProcessOptions};
pub use extraction::privacy::{MaskingMode, PrivacyFilter};
pub use extraction::{ExtractError, ExtractionResult};
pub use providers::fallback::FallbackController;
pub use providers::registry::ProviderRegistry;
pub use providers::{ModelProvider, ProviderDescriptor, ProviderError};
pub use workflow::graph::{run, AgentNode, RunOutcome, WorkflowGraph};
pub use workflow::{WorkflowError, WorkflowState};

use tracing_subscriber::EnvFilter;

/// Initialize tracing for binaries and examples embedding the engine.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init();
}
