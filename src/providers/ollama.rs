//! Local Ollama daemon provider.
//!
//! Text generation goes through `/api/generate`; requests carrying an image
//! go through `/api/chat` with base64-encoded attachments (the Ollama
//! standard for vision models). `/api/tags` backs health checks and model
//! discovery.

use std::sync::Mutex;
use std::time::Instant;

use base64::Engine as _;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{
    Completion, GenerationRequest, HealthStatus, ModelProvider, ProviderDescriptor,
    ProviderError, TokenUsage,
};

/// Ollama HTTP provider for local model inference.
pub struct OllamaProvider {
    name: String,
    base_url: String,
    model: String,
    context_window: usize,
    vision: bool,
    timeout_secs: u64,
    client: reqwest::blocking::Client,
    health: Mutex<HealthStatus>,
}

impl OllamaProvider {
    pub fn new(
        name: &str,
        base_url: &str,
        model: &str,
        context_window: usize,
        vision: bool,
        timeout_secs: u64,
    ) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            context_window,
            vision,
            timeout_secs,
            client,
            health: Mutex::new(HealthStatus::unknown()),
        }
    }

    /// Default Ollama instance at localhost:11434 with 5-minute timeout.
    pub fn default_local(name: &str, model: &str, context_window: usize) -> Self {
        Self::new(name, "http://localhost:11434", model, context_window, false, 300)
    }

    /// List model names known to the daemon.
    pub fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(map_status_error(status.as_u16(), body));
        }

        let parsed: TagsResponse = response
            .json()
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }

    fn map_transport_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_connect() {
            ProviderError::Unavailable(format!("Ollama is not running at {}", self.base_url))
        } else if e.is_timeout() {
            ProviderError::Unavailable(format!(
                "request timed out after {}s",
                self.timeout_secs
            ))
        } else {
            ProviderError::Unavailable(e.to_string())
        }
    }

    fn record_health(&self, ok: bool) {
        let mut health = self.health.lock().unwrap();
        health.ok = ok;
        health.last_checked = Utc::now();
    }

    fn invoke_text(&self, request: &GenerationRequest) -> Result<OllamaReply, ProviderError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: &self.model,
            prompt: &request.prompt,
            system: request.system.as_deref().unwrap_or(""),
            stream: false,
            options: Options {
                temperature: request.params.temperature,
                top_p: request.params.top_p,
                num_predict: request.params.max_tokens as i32,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(map_status_error(status.as_u16(), body));
        }

        let parsed: GenerateResponse = response
            .json()
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        Ok(OllamaReply {
            text: parsed.response,
            prompt_eval_count: parsed.prompt_eval_count,
            eval_count: parsed.eval_count,
        })
    }

    fn invoke_vision(
        &self,
        request: &GenerationRequest,
        image: &[u8],
    ) -> Result<OllamaReply, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);

        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system.clone(),
                images: None,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: request.prompt.clone(),
            images: Some(vec![encoded]),
        });

        let body = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
            options: Options {
                temperature: request.params.temperature,
                top_p: request.params.top_p,
                num_predict: request.params.max_tokens as i32,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(map_status_error(status.as_u16(), body));
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        Ok(OllamaReply {
            text: parsed.message.content,
            prompt_eval_count: parsed.prompt_eval_count,
            eval_count: parsed.eval_count,
        })
    }
}

/// Map an HTTP error status to the provider error taxonomy.
fn map_status_error(status: u16, body: String) -> ProviderError {
    match status {
        429 | 503 => ProviderError::Overloaded(format!("status {status}: {body}")),
        _ => ProviderError::Backend { status, body },
    }
}

struct OllamaReply {
    text: String,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

impl ModelProvider for OllamaProvider {
    fn invoke(&self, request: &GenerationRequest) -> Result<Completion, ProviderError> {
        let start = Instant::now();

        let result = match &request.image {
            Some(image) => self.invoke_vision(request, image),
            None => self.invoke_text(request),
        };

        match result {
            Ok(reply) => {
                self.record_health(true);
                let elapsed_ms = start.elapsed().as_millis() as u64;
                tracing::debug!(
                    provider = %self.name,
                    model = %self.model,
                    elapsed_ms,
                    "Ollama call complete"
                );
                Ok(Completion {
                    text: reply.text,
                    usage: TokenUsage {
                        prompt_tokens: reply.prompt_eval_count.unwrap_or(0),
                        completion_tokens: reply.eval_count.unwrap_or(0),
                    },
                    elapsed_ms,
                })
            }
            Err(e) => {
                self.record_health(!matches!(e, ProviderError::Unavailable(_)));
                Err(e)
            }
        }
    }

    fn health_check(&self) -> bool {
        let ok = match self.list_models() {
            Ok(models) => models.iter().any(|m| m.starts_with(&self.model))
                || models.iter().any(|m| self.model.starts_with(m.as_str())),
            Err(_) => false,
        };
        self.record_health(ok);
        ok
    }

    fn describe(&self) -> ProviderDescriptor {
        ProviderDescriptor {
            name: self.name.clone(),
            endpoint: self.base_url.clone(),
            model: self.model.clone(),
            context_window: self.context_window,
            vision: self.vision,
            health: *self.health.lock().unwrap(),
        }
    }
}

// ──────────────────────────────────────────────
// Wire types
// ──────────────────────────────────────────────

#[derive(Serialize)]
struct Options {
    temperature: f32,
    top_p: f32,
    num_predict: i32,
}

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    options: Options,
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
}

/// Request body for Ollama /api/chat (vision calls)
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: Options,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

/// Response body from Ollama /api/tags
#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructor_trims_trailing_slash() {
        let p = OllamaProvider::new("ollama", "http://localhost:11434/", "phi4", 8192, false, 60);
        assert_eq!(p.base_url, "http://localhost:11434");
    }

    #[test]
    fn default_local_uses_standard_port() {
        let p = OllamaProvider::default_local("ollama", "phi4:latest", 8192);
        assert_eq!(p.base_url, "http://localhost:11434");
        assert_eq!(p.timeout_secs, 300);
        assert!(!p.describe().vision);
    }

    #[test]
    fn descriptor_carries_capabilities() {
        let p = OllamaProvider::new(
            "ollama-vision",
            "http://localhost:11434",
            "moondream:latest",
            4096,
            true,
            120,
        );
        let d = p.describe();
        assert_eq!(d.name, "ollama-vision");
        assert_eq!(d.model, "moondream:latest");
        assert_eq!(d.context_window, 4096);
        assert!(d.vision);
        // Health starts pessimistic until a call or check succeeds
        assert!(!d.health.ok);
    }

    #[test]
    fn overload_statuses_map_to_overloaded() {
        assert!(matches!(
            map_status_error(429, "rate limited".into()),
            ProviderError::Overloaded(_)
        ));
        assert!(matches!(
            map_status_error(503, "busy".into()),
            ProviderError::Overloaded(_)
        ));
        assert!(matches!(
            map_status_error(500, "boom".into()),
            ProviderError::Backend { status: 500, .. }
        ));
    }
}
