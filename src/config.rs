//! Engine configuration.
//!
//! All knobs live in a single `Settings` struct constructed once per process
//! (from the environment or directly in code) and passed by reference.
//! Nothing here mutates after construction.

use serde::Serialize;

use crate::extraction::classify::ClassificationPolicy;
use crate::extraction::engine::CompletionStrategy;
use crate::extraction::privacy::MaskingMode;

/// Application-level constants
pub const APP_NAME: &str = "Docuflow";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tracing filter when RUST_LOG is not set.
pub fn default_log_filter() -> String {
    "info,docuflow=debug".to_string()
}

/// Engine settings: provider endpoints, context budgets, strategy defaults,
/// and processing limits.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    /// Base URL of the local Ollama daemon.
    pub ollama_base_url: String,
    /// Text model served by Ollama.
    pub ollama_model: String,
    /// Vision-capable model served by Ollama.
    pub ollama_vision_model: String,

    /// Base URL of an OpenAI-compatible remote endpoint, if configured.
    pub remote_base_url: Option<String>,
    /// Model name at the remote endpoint.
    pub remote_model: String,
    /// API key for the remote endpoint.
    #[serde(skip_serializing)]
    pub remote_api_key: Option<String>,

    /// Ordered provider preference (primary first).
    pub provider_order: Vec<String>,

    /// Declared context window of the target model, in tokens.
    pub max_context_tokens: usize,
    /// Token budget per content unit.
    pub max_unit_tokens: usize,
    /// Overlap window carried across budget-driven cuts, in tokens.
    pub overlap_tokens: usize,
    /// Combined token ceiling for one concatenated batch prompt.
    pub max_batch_tokens: usize,

    /// Default completion strategy.
    pub completion_strategy: CompletionStrategy,
    /// PII masking mode.
    pub masking: MaskingMode,

    /// Per provider-call HTTP timeout, seconds.
    pub request_timeout_secs: u64,
    /// Whole-document processing ceiling, seconds. None = unbounded.
    pub document_deadline_secs: Option<u64>,
    /// Bounded worker count for independent units under eager pagination.
    pub max_workers: usize,

    /// Classification confidence below this tags the result degraded.
    pub classification_threshold: f32,
    /// Conflict policy when pagination could disagree on classification.
    pub classification_policy: ClassificationPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ollama_base_url: "http://localhost:11434".into(),
            ollama_model: "phi4:latest".into(),
            ollama_vision_model: "moondream:latest".into(),
            remote_base_url: None,
            remote_model: "qwen2.5-7b-instruct".into(),
            remote_api_key: None,
            provider_order: vec!["ollama".into()],
            max_context_tokens: 8192,
            max_unit_tokens: 2048,
            overlap_tokens: 50,
            max_batch_tokens: 6144,
            completion_strategy: CompletionStrategy::Paginate,
            masking: MaskingMode::PreSplit,
            request_timeout_secs: 300,
            document_deadline_secs: None,
            max_workers: 4,
            classification_threshold: 0.5,
            classification_policy: ClassificationPolicy::FirstUnit,
        }
    }
}

impl Settings {
    /// Build settings from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let remote_base_url = env_string("REMOTE_API_BASE");
        let primary = env_string("MODEL_PROVIDER").unwrap_or_else(|| "ollama".into());
        let fallback = env_string("FALLBACK_PROVIDER");

        let mut provider_order = vec![primary.clone()];
        if let Some(f) = fallback {
            if f != primary {
                provider_order.push(f);
            }
        } else if remote_base_url.is_some() && primary != "remote" {
            provider_order.push("remote".into());
        }

        Self {
            ollama_base_url: env_string("OLLAMA_API_BASE")
                .unwrap_or(defaults.ollama_base_url),
            ollama_model: env_string("OLLAMA_MODEL").unwrap_or(defaults.ollama_model),
            ollama_vision_model: env_string("OLLAMA_VISION_MODEL")
                .unwrap_or(defaults.ollama_vision_model),
            remote_base_url,
            remote_model: env_string("REMOTE_MODEL").unwrap_or(defaults.remote_model),
            remote_api_key: env_string("REMOTE_API_KEY"),
            provider_order,
            max_context_tokens: env_parse("MAX_CONTEXT_TOKENS", defaults.max_context_tokens),
            max_unit_tokens: env_parse("MAX_UNIT_TOKENS", defaults.max_unit_tokens),
            overlap_tokens: env_parse("OVERLAP_TOKENS", defaults.overlap_tokens),
            max_batch_tokens: env_parse("MAX_BATCH_TOKENS", defaults.max_batch_tokens),
            completion_strategy: defaults.completion_strategy,
            masking: if env_bool("ENABLE_PII_MASKING", true) {
                MaskingMode::PreSplit
            } else {
                MaskingMode::Off
            },
            request_timeout_secs: env_parse(
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            ),
            document_deadline_secs: env_string("DOCUMENT_DEADLINE_SECS")
                .and_then(|v| v.parse().ok()),
            max_workers: env_parse("MAX_WORKERS", defaults.max_workers).max(1),
            classification_threshold: env_parse(
                "CLASSIFICATION_THRESHOLD",
                defaults.classification_threshold,
            ),
            classification_policy: defaults.classification_policy,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_string(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_string(key) {
        Some(v) => v.eq_ignore_ascii_case("true") || v == "1",
        None => default,
    }
}
