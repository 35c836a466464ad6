//! Tool definition, registry, and execution contract.
//!
//! Tools vary in argument shape, so rather than subclassing we resolve by
//! name at dispatch time against a `HashMap<String, Arc<dyn Tool>>` and let
//! each tool validate its own JSON-Schema-typed arguments.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use crate::abort::AbortSignal;
use crate::error::Result;
use crate::types::ToolOutput;

/// Arguments and routing for one tool invocation.
#[derive(Debug, Clone)]
pub struct Action {
    pub tool_name: String,
    pub arguments: Value,
    pub action_id: Option<String>,
    pub metadata: ActionMetadata,
}

impl Action {
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Action {
            tool_name: tool_name.into(),
            arguments,
            action_id: None,
            metadata: ActionMetadata::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.action_id = Some(id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.metadata.timeout_override = Some(timeout);
        self
    }
}

/// Per-action metadata overrides. Currently only an optional per-action
/// timeout, read off the action rather than looked up from the tool.
#[derive(Debug, Clone, Default)]
pub struct ActionMetadata {
    pub timeout_override: Option<Duration>,
}

/// Result of executing one [`Action`].
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub success: bool,
    pub output: ToolOutput,
    pub error: Option<String>,
    pub metadata: ToolResultMetadata,
}

#[derive(Debug, Clone, Default)]
pub struct ToolResultMetadata {
    pub duration: Option<Duration>,
    pub provider_hints: HashMap<String, Value>,
}

impl ToolResult {
    pub fn ok(output: impl Into<ToolOutput>) -> Self {
        ToolResult {
            success: true,
            output: output.into(),
            error: None,
            metadata: ToolResultMetadata::default(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        ToolResult {
            success: false,
            output: ToolOutput::Text(String::new()),
            error: Some(error),
            metadata: ToolResultMetadata::default(),
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.metadata.duration = Some(duration);
        self
    }
}

/// Context handed to a tool executor for one invocation.
#[derive(Clone)]
pub struct ToolContext {
    pub workdir: Option<PathBuf>,
    pub session_id: String,
    pub user_id: Option<String>,
    pub abort: AbortSignal,
    pub message_id: Option<String>,
    pub metadata: HashMap<String, Value>,
}

impl ToolContext {
    pub fn new(session_id: impl Into<String>, abort: AbortSignal) -> Self {
        ToolContext {
            workdir: None,
            session_id: session_id.into(),
            user_id: None,
            abort,
            message_id: None,
            metadata: HashMap::new(),
        }
    }
}

/// A registered tool: name, description, JSON-Schema parameters, and an
/// async executor. An exception/panic-free executor is expected to return
/// `Err` rather than panic; the dispatcher converts either into a failed
/// [`ToolResult`].
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult>;
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<ToolResult>> + Send>>;
type Handler = Arc<dyn Fn(Value, ToolContext) -> HandlerFuture + Send + Sync>;

/// A tool built from a plain async closure, for tests and simple built-ins.
pub struct ClosureTool {
    name: String,
    description: String,
    schema: Value,
    handler: Handler,
}

#[async_trait]
impl Tool for ClosureTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        (self.handler)(args, ctx.clone()).await
    }
}

/// Fluent builder for [`ClosureTool`], mirroring the convenience
/// `tool(name, description)` entry point.
pub struct ToolBuilder {
    name: String,
    description: String,
    schema: Value,
}

pub fn tool(name: impl Into<String>, description: impl Into<String>) -> ToolBuilder {
    ToolBuilder {
        name: name.into(),
        description: description.into(),
        schema: serde_json::json!({"type": "object", "properties": {}}),
    }
}

impl ToolBuilder {
    /// Provide the full JSON-Schema parameters object directly.
    pub fn schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    pub fn handler<F, Fut>(self, handler: F) -> Arc<ClosureTool>
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResult>> + Send + 'static,
    {
        Arc::new(ClosureTool {
            name: self.name,
            description: self.description,
            schema: self.schema,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        })
    }
}

/// Per-tool overrides understood by the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct ToolLimits {
    pub concurrency: Option<usize>,
    pub timeout: Option<Duration>,
}

/// Registry of available tools, keyed by unique name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

/// Outcome of [`ToolRegistry::register`].
pub struct RegisterOutcome {
    pub tool: Arc<dyn Tool>,
    pub is_new: bool,
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry {
            tools: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, tool: Arc<dyn Tool>) -> RegisterOutcome {
        let mut tools = self.tools.write().expect("tool registry poisoned");
        let is_new = !tools.contains_key(tool.name());
        tools.insert(tool.name().to_string(), tool.clone());
        RegisterOutcome { tool, is_new }
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.write().expect("tool registry poisoned").remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().expect("tool registry poisoned").get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().expect("tool registry poisoned").contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.read().expect("tool registry poisoned").keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.read().expect("tool registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Record execution start time and wrap the produced [`ToolResult`] with its
/// wall-clock duration. Small enough to inline at each call site but kept as
/// a free function so the timing convention stays consistent.
pub(crate) fn timed(start: Instant, mut result: ToolResult) -> ToolResult {
    result.metadata.duration.get_or_insert(start.elapsed());
    result
}
