//! Model provider abstraction.
//!
//! A uniform interface over heterogeneous model backends: a local Ollama
//! daemon, an OpenAI-compatible remote endpoint, and mock providers for
//! tests. Every call carries timing instrumentation and refreshes the
//! provider's health snapshot.

pub mod fallback;
pub mod ollama;
pub mod registry;
pub mod remote;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ──────────────────────────────────────────────
// Errors
// ──────────────────────────────────────────────

/// One recorded failure during fallback traversal.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderAttempt {
    pub provider: String,
    pub reason: String,
}

#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// Connection refused or request timed out.
    #[error("provider unreachable: {0}")]
    Unavailable(String),

    /// Rate-limit or overload signal from the backend (HTTP 429/503).
    #[error("provider overloaded: {0}")]
    Overloaded(String),

    /// The model answered, but the output failed validation.
    #[error("invalid model response: {0}")]
    InvalidResponse(String),

    /// Any other backend-reported error.
    #[error("backend error (status {status}): {body}")]
    Backend { status: u16, body: String },

    /// A provider name that is not present in the registry.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// Every provider in the preference order failed.
    #[error("all providers exhausted ({} attempts)", attempts.len())]
    AllExhausted { attempts: Vec<ProviderAttempt> },
}

impl ProviderError {
    /// Whether the fallback controller should move on to the next provider.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_)
                | Self::Overloaded(_)
                | Self::InvalidResponse(_)
                | Self::Backend { .. }
        )
    }
}

// ──────────────────────────────────────────────
// Request / response types
// ──────────────────────────────────────────────

/// Sampling parameters for one generation call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 2048,
        }
    }
}

/// One generation request. Image bytes, when present, are only routed to
/// vision-capable providers.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub image: Option<Vec<u8>>,
    pub params: GenerationParams,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            image: None,
            params: GenerationParams::default(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_image(mut self, image: Vec<u8>) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }
}

/// Token accounting reported by the backend (zero when not reported).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Result of one successful generation call.
#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
    pub elapsed_ms: u64,
}

// ──────────────────────────────────────────────
// Descriptor + trait
// ──────────────────────────────────────────────

/// Health snapshot, refreshed on every call and health check.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct HealthStatus {
    pub ok: bool,
    pub last_checked: DateTime<Utc>,
}

impl HealthStatus {
    pub fn unknown() -> Self {
        Self {
            ok: false,
            last_checked: Utc::now(),
        }
    }
}

/// Static capabilities plus the live health snapshot of one provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderDescriptor {
    pub name: String,
    pub endpoint: String,
    pub model: String,
    /// Declared context window, in tokens.
    pub context_window: usize,
    /// Whether the provider accepts image inputs.
    pub vision: bool,
    pub health: HealthStatus,
}

/// Uniform contract over model backends.
pub trait ModelProvider: Send + Sync {
    /// Run one generation call. Updates the health snapshot as a side effect.
    fn invoke(&self, request: &GenerationRequest) -> Result<Completion, ProviderError>;

    /// Cheap liveness probe (endpoint reachable and model present).
    fn health_check(&self) -> bool;

    /// Capability and health snapshot.
    fn describe(&self) -> ProviderDescriptor;
}

// ──────────────────────────────────────────────
// MockProvider (testing)
// ──────────────────────────────────────────────

/// Scriptable provider for tests: fixed default reply, prompt-matched rules,
/// and an optional ordered script that takes precedence.
pub struct MockProvider {
    name: String,
    vision: bool,
    context_window: usize,
    default_reply: Result<String, ProviderError>,
    rules: Vec<(String, Result<String, ProviderError>)>,
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    calls: AtomicUsize,
    healthy: AtomicBool,
}

impl MockProvider {
    /// Provider that always answers with `response`.
    pub fn ok(name: &str, response: &str) -> Self {
        Self {
            name: name.to_string(),
            vision: false,
            context_window: 8192,
            default_reply: Ok(response.to_string()),
            rules: Vec::new(),
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            healthy: AtomicBool::new(true),
        }
    }

    /// Provider that always fails with `error`.
    pub fn failing(name: &str, error: ProviderError) -> Self {
        Self {
            default_reply: Err(error),
            healthy: AtomicBool::new(false),
            ..Self::ok(name, "")
        }
    }

    /// Answer with `reply` whenever the prompt contains `needle`.
    /// Rules are checked in insertion order before the default reply.
    pub fn with_rule(mut self, needle: &str, reply: Result<String, ProviderError>) -> Self {
        self.rules.push((needle.to_string(), reply));
        self
    }

    /// Replies consumed in order before rules and default are consulted.
    pub fn with_script(self, replies: Vec<Result<String, ProviderError>>) -> Self {
        *self.script.lock().unwrap() = replies.into();
        self
    }

    pub fn with_vision(mut self) -> Self {
        self.vision = true;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn reply_for(&self, prompt: &str) -> Result<String, ProviderError> {
        if let Some(front) = self.script.lock().unwrap().pop_front() {
            return front;
        }
        for (needle, reply) in &self.rules {
            if prompt.contains(needle.as_str()) {
                return reply.clone();
            }
        }
        self.default_reply.clone()
    }
}

impl ModelProvider for MockProvider {
    fn invoke(&self, request: &GenerationRequest) -> Result<Completion, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = self.reply_for(&request.prompt)?;
        Ok(Completion {
            usage: TokenUsage {
                prompt_tokens: (request.prompt.len() / 4) as u32,
                completion_tokens: (text.len() / 4) as u32,
            },
            text,
            elapsed_ms: 1,
        })
    }

    fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn describe(&self) -> ProviderDescriptor {
        ProviderDescriptor {
            name: self.name.clone(),
            endpoint: "mock://".to_string(),
            model: "mock".to_string(),
            context_window: self.context_window,
            vision: self.vision,
            health: HealthStatus {
                ok: self.healthy.load(Ordering::SeqCst),
                last_checked: Utc::now(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_returns_default_reply() {
        let p = MockProvider::ok("m", "hello");
        let out = p.invoke(&GenerationRequest::new("anything")).unwrap();
        assert_eq!(out.text, "hello");
        assert_eq!(p.call_count(), 1);
    }

    #[test]
    fn mock_rules_match_prompt_substring() {
        let p = MockProvider::ok("m", "default")
            .with_rule("classify", Ok("label".into()))
            .with_rule("extract", Ok("fields".into()));

        assert_eq!(
            p.invoke(&GenerationRequest::new("please classify this")).unwrap().text,
            "label"
        );
        assert_eq!(
            p.invoke(&GenerationRequest::new("please extract this")).unwrap().text,
            "fields"
        );
        assert_eq!(
            p.invoke(&GenerationRequest::new("other")).unwrap().text,
            "default"
        );
    }

    #[test]
    fn mock_script_takes_precedence() {
        let p = MockProvider::ok("m", "default").with_script(vec![
            Err(ProviderError::Unavailable("down".into())),
            Ok("second".into()),
        ]);

        assert!(p.invoke(&GenerationRequest::new("x")).is_err());
        assert_eq!(p.invoke(&GenerationRequest::new("x")).unwrap().text, "second");
        // Script drained — default applies
        assert_eq!(p.invoke(&GenerationRequest::new("x")).unwrap().text, "default");
    }

    #[test]
    fn failing_mock_is_unhealthy() {
        let p = MockProvider::failing("m", ProviderError::Overloaded("429".into()));
        assert!(!p.health_check());
        assert!(matches!(
            p.invoke(&GenerationRequest::new("x")),
            Err(ProviderError::Overloaded(_))
        ));
    }

    #[test]
    fn recoverable_classification() {
        assert!(ProviderError::Unavailable("x".into()).is_recoverable());
        assert!(ProviderError::Overloaded("x".into()).is_recoverable());
        assert!(ProviderError::InvalidResponse("x".into()).is_recoverable());
        assert!(!ProviderError::AllExhausted { attempts: vec![] }.is_recoverable());
    }

    #[test]
    fn generation_request_builder() {
        let req = GenerationRequest::new("p")
            .with_system("s")
            .with_params(GenerationParams {
                temperature: 0.1,
                top_p: 0.9,
                max_tokens: 512,
            });
        assert_eq!(req.system.as_deref(), Some("s"));
        assert!((req.params.temperature - 0.1).abs() < f32::EPSILON);
        assert!(req.image.is_none());
    }

    #[test]
    fn exhausted_error_reports_attempt_count() {
        let err = ProviderError::AllExhausted {
            attempts: vec![
                ProviderAttempt {
                    provider: "a".into(),
                    reason: "down".into(),
                },
                ProviderAttempt {
                    provider: "b".into(),
                    reason: "429".into(),
                },
            ],
        };
        assert!(err.to_string().contains("2 attempts"));
    }
}
