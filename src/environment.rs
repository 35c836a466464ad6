//! The Environment: tool dispatcher composing admission control, timeouts,
//! recovery, metrics, and the LLM Gateway behind one façade.
//!
//! `handle_action` is the dispatch algorithm: resolve the tool, acquire a
//! concurrency slot, run it under its timeout (abort-aware), and on failure
//! ask the Recovery Manager what to do next rather than giving up
//! immediately. The slot is always released before the next attempt or
//! return, success or failure.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::abort::AbortSignal;
use crate::agent_loop::{AgentLoop, OnMessageAdded};
use crate::concurrency::ConcurrencyManager;
use crate::config::RuntimeConfig;
use crate::error::Error;
use crate::gateway::{ChatRequest, Gateway, GatewayOutput, InvokeMetadata, ToolDefinition};
use crate::metrics::{Metrics, ToolMetricsSnapshot};
use crate::recovery::{RecoveryAction, RecoveryManager};
use crate::retry::BackoffPolicy;
use crate::session::{Session, SessionManager, SessionStore};
use crate::stream::{EventBus, StreamEvent};
use crate::timeout_mgr::TimeoutManager;
use crate::tools::{timed, Action, Tool, ToolContext, ToolRegistry, ToolResult};

/// Bound on how many times `handle_action` will honor a `Retry` or
/// `Fallback` recovery decision for a single logical action, so a
/// misconfigured always-retry strategy can't loop forever.
const MAX_RECOVERY_ATTEMPTS: u32 = 5;

pub struct Environment {
    pub tools: Arc<ToolRegistry>,
    pub concurrency: Arc<ConcurrencyManager>,
    pub timeouts: Arc<TimeoutManager>,
    pub recovery: Arc<RecoveryManager>,
    pub metrics: Arc<Metrics>,
    pub sessions: Arc<SessionManager>,
    pub events: Arc<EventBus>,
    pub gateway: Arc<Gateway>,
    backoff: BackoffPolicy,
}

impl Environment {
    pub fn new(store: Arc<dyn SessionStore>, gateway: Arc<Gateway>) -> Self {
        let events = Arc::new(EventBus::new());
        Environment {
            tools: Arc::new(ToolRegistry::new()),
            concurrency: Arc::new(ConcurrencyManager::new()),
            timeouts: Arc::new(TimeoutManager::new()),
            recovery: Arc::new(RecoveryManager::new()),
            metrics: Arc::new(Metrics::new()),
            sessions: Arc::new(SessionManager::new(store, events.clone())),
            events,
            gateway,
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn register_tool(&self, tool: Arc<dyn Tool>) -> Arc<dyn Tool> {
        self.tools.register(tool).tool
    }

    pub async fn create_session(&self, title: &str, directory: Option<PathBuf>) -> crate::error::Result<Session> {
        self.sessions.create(title, directory).await
    }

    pub async fn get_session(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).await
    }

    pub async fn delete_session(&self, id: &str) -> crate::error::Result<()> {
        self.sessions.delete(id).await
    }

    pub async fn subscribe(&self, handler: Arc<dyn crate::stream::StreamHandler>) -> crate::stream::SubscriptionToken {
        self.events.subscribe(handler).await
    }

    pub async fn unsubscribe(&self, token: crate::stream::SubscriptionToken) -> bool {
        self.events.unsubscribe(token).await
    }

    pub fn tool_metrics(&self, tool_name: &str) -> ToolMetricsSnapshot {
        self.metrics.snapshot(tool_name)
    }

    /// Entry point for one user turn: builds an Agent Loop over this
    /// Environment and delegates to it. Takes `environment` explicitly
    /// (rather than `&self`) since the Agent Loop needs to share ownership
    /// of it across iterations.
    #[allow(clippy::too_many_arguments)]
    pub async fn handle_query(
        environment: Arc<Self>,
        config: RuntimeConfig,
        session_id: &str,
        user_input: &str,
        model: &str,
        tools: Vec<ToolDefinition>,
        abort: &AbortSignal,
        on_message_added: Option<OnMessageAdded>,
    ) -> crate::error::Result<String> {
        AgentLoop::new(environment, config)
            .handle_query(session_id, user_input, model, tools, abort, on_message_added)
            .await
    }

    /// Drive one LLM turn through the Gateway, scoped to `session_id`.
    pub async fn invoke_llm(
        &self,
        model: &str,
        request: ChatRequest,
        session_id: &str,
        abort: &AbortSignal,
    ) -> crate::error::Result<(GatewayOutput, InvokeMetadata)> {
        self.gateway.invoke(model, request, session_id, abort, &self.events).await
    }

    /// Dispatch one tool [`Action`]: resolve, admit, run under timeout, and
    /// apply the Recovery Manager's decision on failure until the action
    /// succeeds, is skipped, is propagated, or the recovery-attempt bound
    /// is reached.
    pub async fn handle_action(&self, action: Action, session_id: &str, abort: &AbortSignal) -> ToolResult {
        let tool_call_id = action.action_id.clone().unwrap_or_default();

        if !self.tools.contains(&action.tool_name) {
            let message = format!("Tool not found: {}", action.tool_name);
            log::warn!("dispatch rejected for session {session_id}: {message}");
            self.emit_error(session_id, &message, Some(&action.tool_name)).await;
            return ToolResult::failure(message);
        }

        let mut current = action;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let outcome = self.try_once(&current, session_id, abort).await;

            match outcome {
                Ok(result) if result.success => {
                    self.events
                        .emit(StreamEvent::ToolResult {
                            session_id: session_id.to_string(),
                            tool_name: current.tool_name.clone(),
                            tool_result: serde_json::json!(result.output.as_text()),
                            tool_call_id: tool_call_id.clone(),
                            metadata: None,
                        })
                        .await;
                    return result;
                }
                Ok(failed) => {
                    let err = Error::tool(failed.error.clone().unwrap_or_default());
                    match self.apply_recovery(&err, &current, attempt, abort).await {
                        RecoveryAction::Retry { delay } => {
                            if attempt >= MAX_RECOVERY_ATTEMPTS {
                                self.emit_error(session_id, &err.to_string(), Some(&current.tool_name)).await;
                                return failed;
                            }
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = abort.cancelled() => return ToolResult::failure(Error::aborted().to_string()),
                            }
                            continue;
                        }
                        RecoveryAction::Fallback { tool_name } => {
                            if attempt >= MAX_RECOVERY_ATTEMPTS || !self.tools.contains(&tool_name) {
                                self.emit_error(session_id, &err.to_string(), Some(&current.tool_name)).await;
                                return failed;
                            }
                            log::debug!("falling back from '{}' to '{tool_name}' after: {err}", current.tool_name);
                            current.tool_name = tool_name;
                            continue;
                        }
                        RecoveryAction::Skip { value } => {
                            return ToolResult::ok(value);
                        }
                        RecoveryAction::Propagate => {
                            self.emit_error(session_id, &err.to_string(), Some(&current.tool_name)).await;
                            return failed;
                        }
                    }
                }
                Err(err) => {
                    self.emit_error(session_id, &err.to_string(), Some(&current.tool_name)).await;
                    return ToolResult::failure(err.to_string());
                }
            }
        }
    }

    async fn try_once(&self, action: &Action, session_id: &str, abort: &AbortSignal) -> crate::error::Result<ToolResult> {
        let start = Instant::now();
        let slot = match self.concurrency.acquire(&action.tool_name).await {
            Ok(slot) => slot,
            Err(err) => {
                self.metrics.record_slot_rejection(&action.tool_name);
                return Ok(ToolResult::failure(err.to_string()));
            }
        };

        let Some(tool) = self.tools.get(&action.tool_name) else {
            drop(slot);
            return Err(Error::tool(format!("Tool not found: {}", action.tool_name)));
        };

        let ctx = ToolContext::new(session_id, abort.clone());
        let execution = tool.execute(action.arguments.clone(), &ctx);
        let outcome = self
            .timeouts
            .run(&action.tool_name, action.metadata.timeout_override, abort, execution)
            .await;
        drop(slot);

        let result = match outcome {
            Ok(result) => timed(start, result),
            Err(Error::Timeout) => {
                self.metrics.record_timeout(&action.tool_name);
                timed(start, ToolResult::failure("Request timeout"))
            }
            Err(err) => return Err(err),
        };

        self.metrics
            .record_call(&action.tool_name, result.success, result.metadata.duration.unwrap_or_default());
        Ok(result)
    }

    async fn apply_recovery(&self, err: &Error, action: &Action, attempt: u32, abort: &AbortSignal) -> RecoveryAction {
        self.recovery.record_failure(&action.tool_name, Duration::from_secs(300));
        if !crate::error::is_retryable_error(err) {
            return RecoveryAction::Propagate;
        }
        let _ = abort;
        let decision = self.recovery.decide(err, action);
        if matches!(decision, RecoveryAction::Retry { .. }) {
            return RecoveryAction::Retry {
                delay: self.backoff.delay_with_jitter(attempt),
            };
        }
        decision
    }

    async fn emit_error(&self, session_id: &str, message: &str, tool_name: Option<&str>) {
        self.events
            .emit(StreamEvent::Error {
                session_id: session_id.to_string(),
                message: message.to_string(),
                tool_name: tool_name.map(str::to_string),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Gateway, ProviderRegistry};
    use crate::session::InMemorySessionStore;
    use crate::tools::tool;

    fn environment() -> Environment {
        let gateway = Arc::new(Gateway::new(ProviderRegistry::new()));
        Environment::new(Arc::new(InMemorySessionStore::new()), gateway)
    }

    #[tokio::test]
    async fn unknown_tool_fails_without_panicking() {
        let env = environment();
        let abort = AbortSignal::default();
        let result = env.handle_action(Action::new("ghost", serde_json::json!({})), "s1", &abort).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Tool not found"));
    }

    #[tokio::test]
    async fn successful_tool_call_emits_tool_result_event() {
        let env = environment();
        env.register_tool(tool("echo", "echoes").handler(|args, _ctx| async move { Ok(ToolResult::ok(args.to_string())) }));
        let abort = AbortSignal::default();
        let result = env
            .handle_action(Action::new("echo", serde_json::json!({"x": 1})), "s1", &abort)
            .await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn fallback_recovery_switches_tools() {
        let env = environment();
        env.register_tool(tool("primary", "fails").handler(|_args, _ctx| async move { Ok(ToolResult::failure("boom")) }));
        env.register_tool(tool("secondary", "succeeds").handler(|_args, _ctx| async move { Ok(ToolResult::ok("ok")) }));
        env.recovery.set_strategy(
            "primary",
            crate::recovery::RecoveryStrategy::Fallback {
                tool_name: "secondary".into(),
            },
        );
        let abort = AbortSignal::default();
        let result = env
            .handle_action(Action::new("primary", serde_json::json!({})), "s1", &abort)
            .await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn skip_recovery_returns_default_value() {
        let env = environment();
        env.register_tool(tool("flaky", "fails").handler(|_args, _ctx| async move { Ok(ToolResult::failure("boom")) }));
        env.recovery.set_strategy(
            "flaky",
            crate::recovery::RecoveryStrategy::Skip {
                value: crate::types::ToolOutput::Text("default".into()),
            },
        );
        let abort = AbortSignal::default();
        let result = env
            .handle_action(Action::new("flaky", serde_json::json!({})), "s1", &abort)
            .await;
        assert!(result.success);
        assert_eq!(result.output.as_text(), "default");
    }

    #[tokio::test]
    async fn handle_query_delegates_to_the_agent_loop() {
        use crate::gateway::test_adapter::ScriptedAdapter;
        use crate::gateway::Frame;

        let mut registry = ProviderRegistry::new();
        registry.register(
            "test",
            Arc::new(ScriptedAdapter::new(vec![vec![
                Frame::TextDelta("hi there".into()),
                Frame::Finish {
                    finish_reason: Some("stop".into()),
                    usage: None,
                },
            ]])),
        );
        let gateway = Arc::new(Gateway::new(registry));
        let env = Arc::new(Environment::new(Arc::new(InMemorySessionStore::new()), gateway));
        let session = env.create_session("chat", None).await.unwrap();
        let config = RuntimeConfig {
            model: "test/model-a".into(),
            base_url: "unused".into(),
            ..RuntimeConfig::default()
        };
        let abort = AbortSignal::default();
        let reply = Environment::handle_query(env, config, &session.id, "hi", "test/model-a", vec![], &abort, None)
            .await
            .unwrap();
        assert_eq!(reply, "hi there");
    }
}
