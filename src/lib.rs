//! # Agent Execution Core
//!
//! A streaming-first execution core for building conversational LLM agents
//! against local OpenAI-compatible servers (LM Studio, Ollama, llama.cpp,
//! vLLM). Four subsystems compose into one runtime:
//!
//! - [`agent_loop`] — the iterative LLM/tool loop that drives one user turn
//!   to completion, with loop detection and bounded error retries.
//! - [`environment`] — the tool dispatcher: admission control, timeouts,
//!   recovery strategies, and metrics around every tool invocation.
//! - [`gateway`] — the LLM Gateway: a uniform streaming interface over
//!   provider-specific wire formats.
//! - [`session`] and [`abort`] — conversation history storage and
//!   cooperative cancellation.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use agent_core::{
//!     AbortSignal, AgentLoop, Environment, Gateway, InMemorySessionStore,
//!     OpenAiCompatibleAdapter, ProviderRegistry, RuntimeConfigBuilder, tool, ToolResult,
//! };
//!
//! #[tokio::main]
//! async fn main() -> agent_core::Result<()> {
//!     let config = RuntimeConfigBuilder::new()
//!         .model("lmstudio/qwen2.5-32b-instruct")
//!         .base_url("http://localhost:1234/v1")
//!         .system_prompt("You are a helpful assistant.")
//!         .build()?;
//!
//!     let mut registry = ProviderRegistry::new();
//!     registry.register("lmstudio", Arc::new(OpenAiCompatibleAdapter::new(config.base_url.clone(), config.api_key.clone())));
//!     let gateway = Arc::new(Gateway::new(registry));
//!
//!     let environment = Arc::new(Environment::new(Arc::new(InMemorySessionStore::new()), gateway));
//!     environment.register_tool(
//!         tool("echo", "echoes its input").handler(|args, _ctx| async move { Ok(ToolResult::ok(args.to_string())) }),
//!     );
//!
//!     let session = environment.create_session("chat", None).await?;
//!     let agent = AgentLoop::new(environment, config.clone());
//!     let abort = AbortSignal::default();
//!     let reply = agent
//!         .handle_query(&session.id, "Hello!", &config.model, vec![], &abort, None)
//!         .await?;
//!     println!("{reply}");
//!     Ok(())
//! }
//! ```

mod abort;
mod agent_loop;
mod concurrency;
mod config;
mod context;
mod environment;
mod error;
pub mod gateway;
mod metrics;
mod prompts;
mod recovery;
pub mod retry;
mod session;
mod stream;
mod timeout_mgr;
mod tools;
mod types;

pub use abort::{AbortManager, AbortSignal};
pub use agent_loop::{AgentLoop, OnMessageAdded};
pub use concurrency::ConcurrencyManager;
pub use config::{get_base_url, get_model, Provider, RuntimeConfig, RuntimeConfigBuilder};
pub use context::{estimate_tokens, is_approaching_limit, truncate_messages};
pub use environment::Environment;
pub use error::{is_retryable_error, is_retryable_message, Error, Result};
pub use gateway::model::{parse_model, CapabilityRegistry, ModelCapabilities};
pub use gateway::openai_compatible::OpenAiCompatibleAdapter;
pub use gateway::test_adapter::ScriptedAdapter;
pub use gateway::{
    ChatRequest, Frame, Gateway, GatewayOutput, InvokeMetadata, ProviderAdapter, ProviderRegistry, ToolCallRequest,
    ToolDefinition, Usage, RESERVED_TOOL_NAMES,
};
pub use metrics::{Metrics, ToolMetricsSnapshot};
pub use prompts::{BehaviorSpec, PromptStore};
pub use recovery::{RecoveryAction, RecoveryManager, RecoveryStrategy};
pub use session::{InMemorySessionStore, Session, SessionManager, SessionStore};
pub use stream::{EventBus, StreamEvent, StreamHandler, SubscriptionToken};
pub use timeout_mgr::TimeoutManager;
pub use tools::{tool, Action, ActionMetadata, ClosureTool, Tool, ToolBuilder, ToolContext, ToolLimits, ToolRegistry, ToolResult};
pub use types::{ContentPart, Message, MessageContent, Role, ToolOutput};

/// Re-exports enough to wire up an agent runtime with a single `use`.
pub mod prelude {
    pub use crate::{
        tool, AbortSignal, Action, AgentLoop, ChatRequest, Environment, Error, Gateway, InMemorySessionStore, Message,
        MessageContent, OpenAiCompatibleAdapter, ProviderRegistry, Result, Role, RuntimeConfig, RuntimeConfigBuilder,
        Session, StreamEvent, Tool, ToolDefinition, ToolOutput, ToolResult,
    };
}
