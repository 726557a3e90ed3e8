//! OpenAI-compatible remote provider.
//!
//! Covers hosted endpoints and self-hosted inference servers (vLLM, LocalAI,
//! OpenLLM) that speak the `/chat/completions` protocol. Requests carrying an
//! image are sent as multimodal content parts when the provider is declared
//! vision-capable.

use std::sync::Mutex;
use std::time::Instant;

use base64::Engine as _;
use chrono::Utc;
use serde_json::json;

use super::{
    Completion, GenerationRequest, HealthStatus, ModelProvider, ProviderDescriptor,
    ProviderError, TokenUsage,
};

pub struct RemoteProvider {
    name: String,
    base_url: String,
    model: String,
    api_key: Option<String>,
    context_window: usize,
    vision: bool,
    timeout_secs: u64,
    client: reqwest::blocking::Client,
    health: Mutex<HealthStatus>,
}

impl RemoteProvider {
    pub fn new(
        name: &str,
        base_url: &str,
        model: &str,
        api_key: Option<String>,
        context_window: usize,
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
            api_key,
            context_window,
            vision: false,
            timeout_secs,
            client,
            health: Mutex::new(HealthStatus::unknown()),
        }
    }

    pub fn with_vision(mut self) -> Self {
        self.vision = true;
        self
    }

    fn record_health(&self, ok: bool) {
        let mut health = self.health.lock().unwrap();
        health.ok = ok;
        health.last_checked = Utc::now();
    }

    fn map_transport_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_connect() {
            ProviderError::Unavailable(format!("endpoint unreachable: {}", self.base_url))
        } else if e.is_timeout() {
            ProviderError::Unavailable(format!(
                "request timed out after {}s",
                self.timeout_secs
            ))
        } else {
            ProviderError::Unavailable(e.to_string())
        }
    }

    fn build_messages(&self, request: &GenerationRequest) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }

        match &request.image {
            Some(image) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(image);
                messages.push(json!({
                    "role": "user",
                    "content": [
                        { "type": "text", "text": request.prompt },
                        {
                            "type": "image_url",
                            "image_url": { "url": format!("data:image/png;base64,{encoded}") }
                        }
                    ]
                }));
            }
            None => messages.push(json!({ "role": "user", "content": request.prompt })),
        }

        serde_json::Value::Array(messages)
    }
}

impl ModelProvider for RemoteProvider {
    fn invoke(&self, request: &GenerationRequest) -> Result<Completion, ProviderError> {
        if request.image.is_some() && !self.vision {
            return Err(ProviderError::InvalidResponse(
                "provider does not accept image inputs".into(),
            ));
        }

        let start = Instant::now();
        let url = format!("{}/chat/completions", self.base_url);

        let body = json!({
            "model": self.model,
            "messages": self.build_messages(request),
            "temperature": request.params.temperature,
            "top_p": request.params.top_p,
            "max_tokens": request.params.max_tokens,
        });

        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().map_err(|e| {
            let err = self.map_transport_error(e);
            self.record_health(false);
            err
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let err = match status.as_u16() {
                429 | 503 => ProviderError::Overloaded(format!("status {status}: {body}")),
                s => ProviderError::Backend { status: s, body },
            };
            self.record_health(!matches!(err, ProviderError::Unavailable(_)));
            return Err(err);
        }

        let value: serde_json::Value = response
            .json()
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let text = value
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ProviderError::InvalidResponse("no message content in response".into())
            })?
            .to_string();

        let usage = TokenUsage {
            prompt_tokens: value
                .pointer("/usage/prompt_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
            completion_tokens: value
                .pointer("/usage/completion_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
        };

        self.record_health(true);
        let elapsed_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(
            provider = %self.name,
            model = %self.model,
            elapsed_ms,
            "remote call complete"
        );

        Ok(Completion {
            text,
            usage,
            elapsed_ms,
        })
    }

    fn health_check(&self) -> bool {
        // Models listing is the cheapest widely-supported probe.
        let url = format!("{}/models", self.base_url);
        let mut req = self.client.get(&url);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let ok = matches!(req.send(), Ok(resp) if resp.status().is_success());
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
