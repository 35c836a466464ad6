//! HTTP/SSE adapter for OpenAI-compatible chat-completions endpoints
//! (LM Studio, Ollama, llama.cpp, vLLM).

use std::collections::BTreeMap;

use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::abort::AbortSignal;
use crate::error::{Error, Result};
use crate::types::{ContentPart, MessageContent, Role};

use super::{ChatRequest, Frame, FrameStream, ProviderAdapter, Usage};

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OpenAiTool>,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OpenAiToolCall>,
}

#[derive(Debug, Serialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Serialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: OpenAiFunction,
}

#[derive(Debug, Serialize)]
struct OpenAiFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ChunkResponse {
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChunkToolCall>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<ChunkFunctionCall>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkFunctionCall {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

/// Accumulates tool-call argument fragments by index; a provider streams a
/// tool call's `id`/`name` once on its first delta and its `arguments` in
/// fragments across subsequent deltas.
#[derive(Default)]
struct ToolCallAggregator {
    entries: BTreeMap<usize, (Option<String>, Option<String>, String)>,
}

impl ToolCallAggregator {
    fn ingest(&mut self, delta: ChunkToolCall) {
        let entry = self.entries.entry(delta.index).or_insert((None, None, String::new()));
        if let Some(id) = delta.id {
            entry.0 = Some(id);
        }
        if let Some(function) = delta.function {
            if let Some(name) = function.name {
                entry.1 = Some(name);
            }
            if let Some(fragment) = function.arguments {
                entry.2.push_str(&fragment);
            }
        }
    }

    /// Finalize every accumulated call, parsing its argument buffer as JSON
    /// (an empty buffer becomes `{}`, matching providers that omit
    /// arguments for no-arg tools).
    fn finish(self) -> Vec<(String, String, Value)> {
        self.entries
            .into_values()
            .map(|(id, name, args)| {
                let parsed = if args.trim().is_empty() {
                    serde_json::json!({})
                } else {
                    serde_json::from_str(&args).unwrap_or(Value::String(args))
                };
                (id.unwrap_or_default(), name.unwrap_or_default(), parsed)
            })
            .collect()
    }
}

fn to_openai_messages(request: &ChatRequest) -> Vec<OpenAiMessage> {
    let mut out = Vec::new();
    for message in &request.messages {
        match message.role {
            Role::System => out.push(OpenAiMessage {
                role: "system",
                content: Some(message.content.to_display_string()),
                tool_call_id: None,
                tool_calls: Vec::new(),
            }),
            Role::User => out.push(OpenAiMessage {
                role: "user",
                content: Some(message.content.to_display_string()),
                tool_call_id: None,
                tool_calls: Vec::new(),
            }),
            Role::Tool => out.push(OpenAiMessage {
                role: "tool",
                content: Some(message.content.to_display_string()),
                tool_call_id: message.tool_call_id.clone(),
                tool_calls: Vec::new(),
            }),
            Role::Assistant => {
                let (text, tool_calls) = match &message.content {
                    MessageContent::Text(text) => (Some(text.clone()), Vec::new()),
                    MessageContent::Parts(parts) => {
                        let mut text = String::new();
                        let mut calls = Vec::new();
                        for part in parts {
                            match part {
                                ContentPart::Text { text: t } | ContentPart::Reasoning { text: t } => {
                                    text.push_str(t);
                                }
                                ContentPart::ToolCall { id, name, args } => calls.push(OpenAiToolCall {
                                    id: id.clone(),
                                    kind: "function",
                                    function: OpenAiFunctionCall {
                                        name: name.clone(),
                                        arguments: args.to_string(),
                                    },
                                }),
                                ContentPart::ToolResult { .. } => {}
                            }
                        }
                        (if text.is_empty() { None } else { Some(text) }, calls)
                    }
                };
                out.push(OpenAiMessage {
                    role: "assistant",
                    content: text,
                    tool_call_id: None,
                    tool_calls,
                });
            }
        }
    }
    out
}

/// Adapter for OpenAI-compatible `/chat/completions` streaming endpoints.
pub struct OpenAiCompatibleAdapter {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleAdapter {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        OpenAiCompatibleAdapter {
            client: Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    async fn stream(&self, request: &ChatRequest, abort: &AbortSignal) -> Result<FrameStream> {
        let body = OpenAiRequest {
            model: request.model_id.clone(),
            messages: to_openai_messages(request),
            stream: true,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            tools: request
                .tools
                .iter()
                .map(|t| OpenAiTool {
                    kind: "function",
                    function: OpenAiFunction {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters.clone(),
                    },
                })
                .collect(),
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = tokio::select! {
            res = builder.send() => res?,
            _ = abort.cancelled() => return Err(Error::aborted()),
        };

        if let Err(status_err) = response.error_for_status_ref() {
            let body = response.text().await.unwrap_or_default();
            log::warn!("provider request to {} failed: {status_err}", self.base_url);
            if status_err.status() == Some(reqwest::StatusCode::UNAUTHORIZED) {
                return Err(Error::auth(format!("401 Unauthorized: {body}")));
            }
            return Err(Error::api(format!("{status_err}: {body}")));
        }

        let byte_stream = response.bytes_stream();
        let mut events = byte_stream.eventsource();

        let (tx, rx) = mpsc::channel::<Result<Frame>>(32);
        let abort = abort.clone();

        tokio::spawn(async move {
            let mut aggregator = ToolCallAggregator::default();

            loop {
                let next = tokio::select! {
                    event = events.next() => event,
                    _ = abort.cancelled() => {
                        let _ = tx.send(Err(Error::aborted())).await;
                        return;
                    }
                };

                let Some(event) = next else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        let _ = tx.send(Err(Error::stream(err.to_string()))).await;
                        return;
                    }
                };

                if event.data == "[DONE]" {
                    break;
                }

                let chunk: ChunkResponse = match serde_json::from_str(&event.data) {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        let _ = tx.send(Err(Error::Json(err))).await;
                        return;
                    }
                };

                let Some(choice) = chunk.choices.into_iter().next() else {
                    continue;
                };

                if let Some(text) = choice.delta.content {
                    if !text.is_empty() && tx.send(Ok(Frame::TextDelta(text))).await.is_err() {
                        return;
                    }
                }
                if let Some(text) = choice.delta.reasoning_content {
                    if !text.is_empty() && tx.send(Ok(Frame::ReasoningDelta(text))).await.is_err() {
                        return;
                    }
                }
                for call in choice.delta.tool_calls {
                    aggregator.ingest(call);
                }

                if let Some(finish_reason) = choice.finish_reason {
                    for (id, name, args) in aggregator.finish() {
                        if tx.send(Ok(Frame::ToolCall { id, name, args })).await.is_err() {
                            return;
                        }
                    }
                    aggregator = ToolCallAggregator::default();
                    let usage = chunk.usage.map(|u| Usage {
                        prompt_tokens: u.prompt_tokens,
                        completion_tokens: u.completion_tokens,
                        total_tokens: u.total_tokens,
                    });
                    let _ = tx
                        .send(Ok(Frame::Finish {
                            finish_reason: Some(finish_reason),
                            usage,
                        }))
                        .await;
                    return;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
