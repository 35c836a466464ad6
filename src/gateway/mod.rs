//! LLM Gateway: normalizes provider-specific streaming wire formats into a
//! uniform event stream (text delta, reasoning delta, tool-call, finish).

pub mod model;
pub mod openai_compatible;
pub mod test_adapter;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;

use crate::abort::AbortSignal;
use crate::error::{Error, Result};
use crate::stream::{EventBus, StreamEvent};
use crate::types::Message;

/// Tool names reserved for the Gateway's own internal helpers. Filtered out
/// of every provider tool list before materialization so the model can
/// never recurse back into the Gateway through a tool call (the gateway is
/// exposed as a native capability, not a tool).
pub const RESERVED_TOOL_NAMES: &[&str] = &["llm_gateway_invoke", "llm_gateway_stream"];

/// One normalized frame from a provider's streaming response.
#[derive(Debug, Clone)]
pub enum Frame {
    TextDelta(String),
    ReasoningDelta(String),
    ToolCall { id: String, name: String, args: Value },
    Finish { finish_reason: Option<String>, usage: Option<Usage> },
    Error(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A tool definition materialized into provider schema shape.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Normalized request sent to a provider adapter.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub model_id: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

/// A recorded tool call once streaming completes.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// Result of one `invoke` turn.
#[derive(Debug, Clone)]
pub struct GatewayOutput {
    pub content: String,
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub model: String,
}

#[derive(Debug, Clone, Default)]
pub struct InvokeMetadata {
    pub duration: Option<std::time::Duration>,
    pub provider: String,
    pub model: String,
}

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

/// A provider-specific streaming adapter. Implementations stream frames
/// tagged text-delta / reasoning-delta / tool-call / finish / error and must
/// honor `abort`.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn stream(&self, request: &ChatRequest, abort: &AbortSignal) -> Result<FrameStream>;
}

/// Registry of provider adapters keyed by provider id.
#[derive(Default)]
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        ProviderRegistry::default()
    }

    pub fn register(&mut self, provider_id: impl Into<String>, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(provider_id.into(), adapter);
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(provider_id).cloned()
    }

    pub fn known_providers(&self) -> Vec<&str> {
        self.adapters.keys().map(String::as_str).collect()
    }
}

/// The LLM Gateway: resolves a `providerId/modelId` string against the
/// registry and drives one streaming turn, emitting [`StreamEvent`]s as it
/// goes.
pub struct Gateway {
    registry: ProviderRegistry,
    capabilities: model::CapabilityRegistry,
}

impl Gateway {
    pub fn new(registry: ProviderRegistry) -> Self {
        Gateway {
            registry,
            capabilities: model::CapabilityRegistry::new(),
        }
    }

    pub fn capabilities_mut(&mut self) -> &mut model::CapabilityRegistry {
        &mut self.capabilities
    }

    /// Materialize the tool list into provider schema shape, filtering out
    /// the Gateway's own reserved helper names.
    pub fn materialize_tools(tools: &[ToolDefinition]) -> Vec<ToolDefinition> {
        tools
            .iter()
            .filter(|t| !RESERVED_TOOL_NAMES.contains(&t.name.as_str()))
            .cloned()
            .collect()
    }

    /// Drive one streaming LLM turn.
    pub async fn invoke(
        &self,
        model: &str,
        mut request: ChatRequest,
        session_id: &str,
        abort: &AbortSignal,
        events: &EventBus,
    ) -> Result<(GatewayOutput, InvokeMetadata)> {
        let started = Instant::now();
        let known: Vec<&str> = self.registry.known_providers();
        let (provider_id, model_id) = model::parse_model(model, &known)?;
        let adapter = self
            .registry
            .get(&provider_id)
            .ok_or_else(|| Error::invalid_input(format!("Unknown provider: {provider_id}")))?;

        request.model_id = model_id.clone();
        request.tools = Self::materialize_tools(&request.tools);

        let _capabilities = self.capabilities.get(&model_id);

        events
            .emit(StreamEvent::Start {
                session_id: session_id.to_string(),
                model: model.to_string(),
            })
            .await;

        let mut frames = adapter.stream(&request, abort).await?;

        let mut content = String::new();
        let mut reasoning = String::new();
        let mut has_reasoning = false;
        let mut tool_calls: Vec<ToolCallRequest> = Vec::new();
        let mut finish_reason = None;
        let mut usage = None;

        loop {
            let next = tokio::select! {
                frame = futures::StreamExt::next(&mut frames) => frame,
                _ = abort.cancelled() => return Err(Error::aborted()),
            };

            let Some(frame) = next else { break };
            match frame? {
                Frame::TextDelta(delta) => {
                    content.push_str(&delta);
                    events
                        .emit(StreamEvent::Text {
                            session_id: session_id.to_string(),
                            content: content.clone(),
                            delta,
                        })
                        .await;
                }
                Frame::ReasoningDelta(delta) => {
                    has_reasoning = true;
                    reasoning.push_str(&delta);
                    events
                        .emit(StreamEvent::Reasoning {
                            session_id: session_id.to_string(),
                            content: reasoning.clone(),
                            delta,
                        })
                        .await;
                }
                Frame::ToolCall { id, name, args } => {
                    events
                        .emit(StreamEvent::ToolCall {
                            session_id: session_id.to_string(),
                            tool_name: name.clone(),
                            tool_args: args.clone(),
                            tool_call_id: id.clone(),
                        })
                        .await;
                    tool_calls.push(ToolCallRequest { id, name, args });
                }
                Frame::Finish { finish_reason: reason, usage: u } => {
                    finish_reason = reason;
                    usage = u;
                    break;
                }
                Frame::Error(message) => return Err(Error::stream(message)),
            }
        }
        let _ = (&finish_reason, &usage);

        // Drop tool-calls missing a non-empty name.
        tool_calls.retain(|call| !call.name.is_empty());

        let output = GatewayOutput {
            content: content.clone(),
            reasoning: has_reasoning.then_some(reasoning),
            tool_calls,
            model: model.to_string(),
        };

        if output.tool_calls.is_empty() {
            events
                .emit(StreamEvent::Completed {
                    session_id: session_id.to_string(),
                    content,
                    model: model.to_string(),
                })
                .await;
        }

        let metadata = InvokeMetadata {
            duration: Some(started.elapsed()),
            provider: provider_id,
            model: model_id,
        };

        Ok((output, metadata))
    }
}
