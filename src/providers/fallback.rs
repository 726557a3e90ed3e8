//! Ordered-preference provider fallback.
//!
//! `execute` walks the preference list and fails over on recoverable errors,
//! carrying every per-provider failure reason to the caller on exhaustion.
//! `benchmark` exercises every registered provider for diagnostics and is
//! never on the hot path.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use super::registry::ProviderRegistry;
use super::{Completion, GenerationRequest, ProviderAttempt, ProviderError};

/// A successful completion plus the provider that produced it.
#[derive(Debug, Clone)]
pub struct ProviderCompletion {
    pub provider: String,
    pub completion: Completion,
}

/// One row of a benchmark comparison table.
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkRecord {
    pub provider: String,
    pub ok: bool,
    pub latency_ms: u64,
    pub response_len: usize,
    pub error: Option<String>,
}

pub struct FallbackController {
    registry: Arc<ProviderRegistry>,
    preference: Vec<String>,
}

impl FallbackController {
    /// Preference defaults to registration order.
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        let preference = registry.names();
        Self {
            registry,
            preference,
        }
    }

    pub fn with_preference(
        registry: Arc<ProviderRegistry>,
        order: Vec<String>,
    ) -> Result<Self, ProviderError> {
        let mut controller = Self::new(registry);
        controller.set_preference(order)?;
        Ok(controller)
    }

    pub fn preference(&self) -> &[String] {
        &self.preference
    }

    /// Switch the active provider order. Explicit operation; validates every
    /// name against the registry and carries no state between runs.
    pub fn set_preference(&mut self, order: Vec<String>) -> Result<(), ProviderError> {
        if order.is_empty() {
            return Err(ProviderError::UnknownProvider(
                "preference order is empty".into(),
            ));
        }
        for name in &order {
            if self.registry.get(name).is_none() {
                return Err(ProviderError::UnknownProvider(name.clone()));
            }
        }
        tracing::info!(order = ?order, "provider preference updated");
        self.preference = order;
        Ok(())
    }

    /// Try providers in preference order. Recoverable failures advance to
    /// the next provider; exhaustion reports every recorded reason.
    pub fn execute(
        &self,
        request: &GenerationRequest,
    ) -> Result<ProviderCompletion, ProviderError> {
        let mut attempts: Vec<ProviderAttempt> = Vec::new();

        for name in &self.preference {
            let Some(provider) = self.registry.get(name) else {
                attempts.push(ProviderAttempt {
                    provider: name.clone(),
                    reason: "not registered".into(),
                });
                continue;
            };

            if request.image.is_some() && !provider.describe().vision {
                attempts.push(ProviderAttempt {
                    provider: name.clone(),
                    reason: "no vision capability".into(),
                });
                continue;
            }

            match provider.invoke(request) {
                Ok(completion) => {
                    if !attempts.is_empty() {
                        tracing::info!(
                            provider = %name,
                            failed_over_from = attempts.len(),
                            "fallback succeeded after failover"
                        );
                    }
                    return Ok(ProviderCompletion {
                        provider: name.clone(),
                        completion,
                    });
                }
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(provider = %name, error = %e, "provider failed, trying next");
                    attempts.push(ProviderAttempt {
                        provider: name.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Err(ProviderError::AllExhausted { attempts })
    }

    /// Invoke every registered provider with a short probe prompt and record
    /// latency and outcome. Diagnostics only.
    pub fn benchmark(&self, prompt: &str) -> Vec<BenchmarkRecord> {
        let request = GenerationRequest::new(prompt).with_params(super::GenerationParams {
            max_tokens: 100,
            ..Default::default()
        });

        self.registry
            .descriptors()
            .iter()
            .map(|descriptor| {
                let name = descriptor.name.clone();
                let provider = self
                    .registry
                    .get(&name)
                    .expect("descriptor names come from the registry");

                let start = Instant::now();
                match provider.invoke(&request) {
                    Ok(completion) => BenchmarkRecord {
                        provider: name,
                        ok: true,
                        latency_ms: start.elapsed().as_millis() as u64,
                        response_len: completion.text.len(),
                        error: None,
                    },
                    Err(e) => BenchmarkRecord {
                        provider: name,
                        ok: false,
                        latency_ms: start.elapsed().as_millis() as u64,
                        response_len: 0,
                        error: Some(e.to_string()),
                    },
                }
            })
            .collect()
    }
}

/// Flatten an error into a single failure-manifest reason string,
/// expanding exhaustion into its per-provider reasons.
pub fn failure_reason(error: &ProviderError) -> String {
    match error {
        ProviderError::AllExhausted { attempts } if !attempts.is_empty() => attempts
            .iter()
            .map(|a| format!("{}: {}", a.provider, a.reason))
            .collect::<Vec<_>>()
            .join("; "),
        other => other.to_string(),
    }
}
