//! The Agent Loop: drives iterative LLM turns against the Environment,
//! appending messages to session history and dispatching tool calls until
//! the model replies with plain text, an unrecoverable error occurs, or the
//! iteration bound is reached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::abort::AbortSignal;
use crate::config::RuntimeConfig;
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::gateway::{ChatRequest, ToolDefinition};
use crate::retry::BackoffPolicy;
use crate::types::{ContentPart, Message, MessageContent, ToolOutput};

/// Callback fired with every message appended to session history, in
/// emission order — the hook external callers use to mirror history into
/// their own UI or transcript store without polling the session.
pub type OnMessageAdded = Arc<dyn Fn(&Message) + Send + Sync>;

/// Canonical string form of a JSON value with object keys sorted, so two
/// calls to the same tool with the same arguments in different key order
/// fingerprint identically.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let sorted: std::collections::BTreeMap<&String, &Value> = map.iter().collect();
            let mut out = String::from("{");
            for (i, (k, v)) in sorted.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&format!("{k:?}:{}", canonical_json(v)));
            }
            out.push('}');
            out
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}

fn fingerprint(tool_name: &str, args: &Value) -> String {
    format!("{tool_name}:{}", canonical_json(args))
}

/// Per-session doom-loop fingerprint counters, cleared for a fingerprint the
/// moment it trips so a subsequent distinct call sequence isn't immediately
/// flagged again.
#[derive(Default)]
struct LoopGuard {
    counts: Mutex<HashMap<String, u32>>,
}

impl LoopGuard {
    fn record(&self, key: &str, threshold: u32) -> bool {
        let mut counts = self.counts.lock().expect("loop guard poisoned");
        let count = counts.entry(key.to_string()).or_insert(0);
        *count += 1;
        if *count >= threshold {
            counts.remove(key);
            true
        } else {
            false
        }
    }
}

pub struct AgentLoop {
    environment: Arc<Environment>,
    config: RuntimeConfig,
    backoff: BackoffPolicy,
}

impl AgentLoop {
    pub fn new(environment: Arc<Environment>, config: RuntimeConfig) -> Self {
        let backoff = BackoffPolicy {
            base_delay_ms: config.retry_delay_ms,
            multiplier: config.retry_backoff_factor,
            max_delay_ms: config.max_retry_delay_ms,
            ..BackoffPolicy::default()
        };
        AgentLoop {
            environment,
            config,
            backoff,
        }
    }

    /// Run the agent loop for one user turn on `session_id`, returning the
    /// final assistant text. A non-fatal exhaustion — max iterations, or an
    /// LLM call that keeps failing past `max_error_retries` (retried with
    /// backoff in between when the failure looks transient) — is reported as
    /// an `Error:`-prefixed string rather than an `Err`, so a caller looping
    /// on replies doesn't need a `match` just to handle running out of
    /// budget. Only an abort propagates as `Err`.
    pub async fn handle_query(
        &self,
        session_id: &str,
        user_input: &str,
        model: &str,
        tools: Vec<ToolDefinition>,
        abort: &AbortSignal,
        on_message_added: Option<OnMessageAdded>,
    ) -> Result<String> {
        let notify = |msg: &Message| {
            if let Some(cb) = &on_message_added {
                cb(msg);
            }
        };

        let user_message = Message::user(user_input);
        self.append(session_id, user_message.clone()).await?;
        notify(&user_message);

        let loop_guard = LoopGuard::default();

        for _iteration in 0..self.config.max_iterations {
            if abort.is_aborted() {
                return Err(Error::aborted());
            }

            let history = self
                .environment
                .get_session(session_id)
                .await
                .ok_or_else(|| Error::invalid_input(format!("Session not found: {session_id}")))?
                .to_history();

            let mut messages = Vec::with_capacity(history.len() + 1);
            if !self.config.system_prompt.is_empty() {
                messages.push(Message::system(self.config.system_prompt.clone()));
            }
            messages.extend(history);

            let request = ChatRequest {
                messages,
                tools: tools.clone(),
                model_id: String::new(),
                temperature: None,
                max_tokens: None,
            };

            let mut llm_attempt: u32 = 0;
            let (output, _meta) = loop {
                match self.environment.invoke_llm(model, request.clone(), session_id, abort).await {
                    Ok(result) => break result,
                    Err(err) => {
                        if matches!(err, Error::Aborted) {
                            return Err(err);
                        }
                        if !crate::error::is_retryable_error(&err) {
                            log::error!("session {session_id}: llm call failed, not retrying: {err}");
                            return Ok(format!("Error: {err}"));
                        }
                        llm_attempt += 1;
                        if llm_attempt > self.config.max_error_retries {
                            log::error!("session {session_id}: llm call failed after {llm_attempt} attempts: {err}");
                            return Ok(format!("Error: {err}"));
                        }
                        log::warn!("session {session_id}: llm call failed (attempt {llm_attempt}), retrying: {err}");
                        crate::retry::backoff_sleep(&self.backoff, llm_attempt, abort).await;
                    }
                }
            };

            let mut parts = Vec::new();
            if !output.content.is_empty() {
                parts.push(ContentPart::Text { text: output.content.clone() });
            }
            if let Some(reasoning) = output.reasoning.filter(|r| !r.is_empty()) {
                parts.push(ContentPart::Reasoning { text: reasoning });
            }
            for call in &output.tool_calls {
                parts.push(ContentPart::ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    args: call.args.clone(),
                });
            }

            let assistant_message = Message::assistant(MessageContent::Parts(parts));
            self.append(session_id, assistant_message.clone()).await?;
            notify(&assistant_message);

            if output.tool_calls.is_empty() {
                return Ok(output.content);
            }

            for call in &output.tool_calls {
                if !tools.is_empty() && !tools.iter().any(|t| t.name == call.name) {
                    let available = tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(", ");
                    let message = format!("Tool {} is not available. Available: {available}", call.name);
                    let tool_message = Message::tool_result(call.id.clone(), call.name.clone(), ToolOutput::Text(message), true);
                    self.append(session_id, tool_message.clone()).await?;
                    notify(&tool_message);
                    continue;
                }

                if matches!(&call.args, Value::String(_)) {
                    let message = format!("Invalid JSON in tool arguments for '{}'", call.name);
                    let tool_message = Message::tool_result(call.id.clone(), call.name.clone(), ToolOutput::Text(message), true);
                    self.append(session_id, tool_message.clone()).await?;
                    notify(&tool_message);
                    continue;
                }

                let key = fingerprint(&call.name, &call.args);
                if loop_guard.record(&key, self.config.doom_loop_threshold) {
                    let message = format!(
                        "Doom loop detected: tool \"{}\" has been called {} times with identical arguments",
                        call.name, self.config.doom_loop_threshold
                    );
                    log::warn!("session {session_id}: {message}");
                    let tool_message = Message::tool_result(call.id.clone(), call.name.clone(), ToolOutput::Text(message), true);
                    self.append(session_id, tool_message.clone()).await?;
                    notify(&tool_message);
                    continue;
                }

                let action = crate::tools::Action::new(call.name.clone(), call.args.clone()).with_id(call.id.clone());
                let result = self.environment.handle_action(action, session_id, abort).await;

                let tool_message = Message::tool_result(call.id.clone(), call.name.clone(), result.output.clone(), !result.success);
                self.append(session_id, tool_message.clone()).await?;
                notify(&tool_message);
            }
        }

        log::warn!("session {session_id}: exhausted {} iterations without a final reply", self.config.max_iterations);
        Ok(format!("Error: max iterations ({}) exhausted", self.config.max_iterations))
    }

    async fn append(&self, session_id: &str, message: Message) -> Result<()> {
        self.environment
            .sessions
            .update(
                session_id,
                Box::new(move |session| session.add_message(message)),
            )
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::test_adapter::ScriptedAdapter;
    use crate::gateway::{Frame, Gateway, ProviderRegistry};
    use crate::session::InMemorySessionStore;

    async fn setup(scripts: Vec<Vec<Frame>>) -> (AgentLoop, String) {
        let mut registry = ProviderRegistry::new();
        registry.register("test", Arc::new(ScriptedAdapter::new(scripts)));
        let gateway = Arc::new(Gateway::new(registry));
        let environment = Arc::new(Environment::new(Arc::new(InMemorySessionStore::new()), gateway));
        let session = environment.create_session("chat", None).await.unwrap();
        let config = RuntimeConfig {
            model: "test/model-a".into(),
            base_url: "unused".into(),
            ..RuntimeConfig::default()
        };
        (AgentLoop::new(environment, config), session.id)
    }

    #[tokio::test]
    async fn text_only_reply_returns_immediately() {
        let (agent, session_id) = setup(vec![vec![
            Frame::TextDelta("Hello there".into()),
            Frame::Finish {
                finish_reason: Some("stop".into()),
                usage: None,
            },
        ]])
        .await;
        let abort = AbortSignal::default();
        let result = agent
            .handle_query(&session_id, "hi", "test/model-a", vec![], &abort, None)
            .await
            .unwrap();
        assert_eq!(result, "Hello there");
    }

    #[tokio::test]
    async fn single_tool_call_then_final_reply() {
        let (agent, session_id) = setup(vec![
            vec![
                Frame::ToolCall {
                    id: "call_1".into(),
                    name: "echo".into(),
                    args: serde_json::json!({"text": "hi"}),
                },
                Frame::Finish {
                    finish_reason: Some("tool_calls".into()),
                    usage: None,
                },
            ],
            vec![
                Frame::TextDelta("done".into()),
                Frame::Finish {
                    finish_reason: Some("stop".into()),
                    usage: None,
                },
            ],
        ])
        .await;
        agent
            .environment
            .register_tool(crate::tools::tool("echo", "echoes").handler(|args, _ctx| async move {
                Ok(crate::tools::ToolResult::ok(args.to_string()))
            }));
        let abort = AbortSignal::default();
        let result = agent
            .handle_query(&session_id, "hi", "test/model-a", vec![], &abort, None)
            .await
            .unwrap();
        assert_eq!(result, "done");
    }

    #[tokio::test]
    async fn invalid_json_arguments_are_reported_without_dispatch() {
        let (agent, session_id) = setup(vec![
            vec![
                Frame::ToolCall {
                    id: "call_1".into(),
                    name: "echo".into(),
                    args: Value::String("{not json".into()),
                },
                Frame::Finish {
                    finish_reason: Some("tool_calls".into()),
                    usage: None,
                },
            ],
            vec![
                Frame::TextDelta("recovered".into()),
                Frame::Finish {
                    finish_reason: Some("stop".into()),
                    usage: None,
                },
            ],
        ])
        .await;
        let abort = AbortSignal::default();
        let result = agent
            .handle_query(&session_id, "hi", "test/model-a", vec![], &abort, None)
            .await
            .unwrap();
        assert_eq!(result, "recovered");
    }

    #[tokio::test]
    async fn repeated_identical_tool_call_trips_loop_detection_and_the_run_continues() {
        let repeated_call = vec![
            Frame::ToolCall {
                id: "call_1".into(),
                name: "noop".into(),
                args: serde_json::json!({"x": 1}),
            },
            Frame::Finish {
                finish_reason: Some("tool_calls".into()),
                usage: None,
            },
        ];
        let mut scripts = vec![repeated_call; 5];
        scripts.push(vec![
            Frame::TextDelta("done".into()),
            Frame::Finish {
                finish_reason: Some("stop".into()),
                usage: None,
            },
        ]);
        let (agent, session_id) = setup(scripts).await;
        agent
            .environment
            .register_tool(crate::tools::tool("noop", "does nothing").handler(|_args, _ctx| async move {
                Ok(crate::tools::ToolResult::ok("ok"))
            }));
        let abort = AbortSignal::default();
        let result = agent
            .handle_query(&session_id, "hi", "test/model-a", vec![], &abort, None)
            .await
            .unwrap();
        assert_eq!(result, "done");

        let session = agent.environment.get_session(&session_id).await.unwrap();
        let history = session.to_history();
        assert!(history
            .iter()
            .any(|m| m.content.to_display_string().contains("Doom loop detected")));
    }

    #[tokio::test]
    async fn abort_before_first_iteration_is_reported() {
        let (agent, session_id) = setup(vec![]).await;
        let abort = AbortSignal::default();
        abort.abort();
        let result = agent
            .handle_query(&session_id, "hi", "test/model-a", vec![], &abort, None)
            .await;
        assert!(matches!(result, Err(Error::Aborted)));
    }

    #[tokio::test]
    async fn on_message_added_observes_every_appended_message() {
        let (agent, session_id) = setup(vec![vec![
            Frame::TextDelta("ack".into()),
            Frame::Finish {
                finish_reason: Some("stop".into()),
                usage: None,
            },
        ]])
        .await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let cb: OnMessageAdded = Arc::new(move |msg| {
            seen2.lock().unwrap().push(msg.role);
        });
        let abort = AbortSignal::default();
        agent
            .handle_query(&session_id, "hi", "test/model-a", vec![], &abort, Some(cb))
            .await
            .unwrap();
        let roles = seen.lock().unwrap().clone();
        assert_eq!(roles, vec![crate::types::Role::User, crate::types::Role::Assistant]);
    }
}
