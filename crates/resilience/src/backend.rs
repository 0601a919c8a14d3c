//! The AI request path with its protections applied.
//!
//! [`ProtectedBackend::send`] runs a [`BackendClient`] stream through a
//! [`CircuitBreaker`], inside [`DegradationManager::execute_with_fallback`]
//! for one named feature.

use crate::circuit_breaker::CircuitBreaker;
use crate::degradation::DegradationManager;
use crate::fallback::CachedResponse;
use beacon_core::backend::ToolUse;
use beacon_core::{BackendClient, BackendRequest, BackendResponse, Error, Result, StreamChunk};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ProtectedBackend {
    client: Arc<dyn BackendClient>,
    breaker: Arc<CircuitBreaker>,
    degradation: Arc<DegradationManager>,
    feature: String,
    last_good: Option<Arc<CachedResponse<BackendResponse>>>,
}

impl ProtectedBackend {
    /// `feature` must already be registered with `degradation`.
    pub fn new(
        client: Arc<dyn BackendClient>,
        breaker: Arc<CircuitBreaker>,
        degradation: Arc<DegradationManager>,
        feature: impl Into<String>,
    ) -> Self {
        Self {
            client,
            breaker,
            degradation,
            feature: feature.into(),
            last_good: None,
        }
    }

    /// Record every successful primary response in `cache`, typically the same
    /// strategy registered as (part of) the feature's fallback.
    pub fn with_response_cache(mut self, cache: Arc<CachedResponse<BackendResponse>>) -> Self {
        self.last_good = Some(cache);
        self
    }

    pub fn feature(&self) -> &str {
        &self.feature
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub async fn send(&self, request: BackendRequest) -> Result<BackendResponse> {
        let client = self.client.as_ref();
        let breaker = self.breaker.as_ref();
        let last_good = self.last_good.as_deref();
        let request = &request;

        self.degradation
            .execute_with_fallback(&self.feature, || async move {
                let response = breaker
                    .execute(|| collect_stream(client, request.clone()))
                    .await?;
                if let Some(cache) = last_good {
                    cache.store(response.clone());
                }
                Ok(response)
            })
            .await
    }
}

/// A tool call whose input is still arriving as JSON fragments.
struct ToolUseAccumulator {
    id: String,
    name: String,
    partial_json: String,
}

impl ToolUseAccumulator {
    fn finish(self) -> Result<ToolUse> {
        let input = if self.partial_json.trim().is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            serde_json::from_str(&self.partial_json).map_err(|e| {
                Error::Backend(format!("invalid input for tool call '{}': {e}", self.id))
            })?
        };
        Ok(ToolUse {
            id: self.id,
            name: self.name,
            input,
        })
    }
}

/// Drain a backend stream into one response. An `error` chunk, a transport
/// error or a stream that closes before `complete` fails the whole call.
pub async fn collect_stream(client: &dyn BackendClient, request: BackendRequest) -> Result<BackendResponse> {
    let mut rx = client.stream(request).await?;
    let mut response = BackendResponse::default();
    let mut pending: Vec<ToolUseAccumulator> = Vec::new();
    let mut completed = false;

    while let Some(chunk) = rx.recv().await {
        match chunk? {
            StreamChunk::ContentDelta { text } => response.text.push_str(&text),
            StreamChunk::ToolUseStart { id, name } => pending.push(ToolUseAccumulator {
                id,
                name,
                partial_json: String::new(),
            }),
            StreamChunk::ToolUseDelta { id, partial_json } => {
                match pending.iter_mut().find(|acc| acc.id == id) {
                    Some(acc) => acc.partial_json.push_str(&partial_json),
                    None => debug!(tool_use = %id, "Delta for unknown tool call ignored"),
                }
            }
            StreamChunk::ToolUse { id, name, input } => {
                pending.retain(|acc| acc.id != id);
                response.tool_uses.push(ToolUse { id, name, input });
            }
            StreamChunk::Complete { stop_reason } => {
                response.stop_reason = stop_reason;
                completed = true;
                break;
            }
            StreamChunk::Error { message } => {
                warn!(backend = client.name(), error = %message, "Backend stream reported an error");
                return Err(Error::Backend(message));
            }
        }
    }

    if !completed {
        return Err(Error::Backend(format!(
            "{} stream ended without completing",
            client.name()
        )));
    }

    for acc in pending {
        response.tool_uses.push(acc.finish()?);
    }
    Ok(response)
}
