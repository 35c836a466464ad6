//! Behavior specs: the resolved prompt + tool permission set for an agent id.
//!
//! Loaded lazily and cached; `refresh()` invalidates the cache so the next
//! resolution recomputes the combined prompt.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::error::{Error, Result};

/// Environment-wide rules plus one agent's own prompt, combined.
#[derive(Debug, Clone)]
pub struct BehaviorSpec {
    pub env_name: String,
    pub agent_id: String,
    pub env_rules: String,
    pub agent_prompt: String,
    pub combined_prompt: String,
    pub allowed_tools: Option<HashSet<String>>,
    pub denied_tools: HashSet<String>,
}

impl BehaviorSpec {
    fn build(env_name: &str, agent_id: &str, env_rules: &str, agent_prompt: &str) -> Self {
        let combined_prompt = if env_rules.is_empty() {
            agent_prompt.to_string()
        } else {
            format!("{env_rules}\n\n{agent_prompt}")
        };
        BehaviorSpec {
            env_name: env_name.to_string(),
            agent_id: agent_id.to_string(),
            env_rules: env_rules.to_string(),
            agent_prompt: agent_prompt.to_string(),
            combined_prompt,
            allowed_tools: None,
            denied_tools: HashSet::new(),
        }
    }

    /// True if `tool_name` may be used under this spec: denied always wins;
    /// an allow-list, if present, is otherwise authoritative.
    pub fn tool_is_allowed(&self, tool_name: &str) -> bool {
        if self.denied_tools.contains(tool_name) {
            return false;
        }
        match &self.allowed_tools {
            Some(allowed) => allowed.contains(tool_name),
            None => true,
        }
    }
}

#[derive(Clone)]
struct AgentEntry {
    prompt: String,
    allowed_tools: Option<HashSet<String>>,
    denied_tools: HashSet<String>,
}

/// Source of prompts and per-agent tool permissions, with a resolved-spec
/// cache invalidated by `refresh`.
pub struct PromptStore {
    env_name: String,
    env_rules: RwLock<String>,
    agents: RwLock<HashMap<String, AgentEntry>>,
    cache: RwLock<HashMap<String, BehaviorSpec>>,
}

impl PromptStore {
    pub fn new(env_name: impl Into<String>, env_rules: impl Into<String>) -> Self {
        PromptStore {
            env_name: env_name.into(),
            env_rules: RwLock::new(env_rules.into()),
            agents: RwLock::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_agent(
        &self,
        agent_id: impl Into<String>,
        prompt: impl Into<String>,
        allowed_tools: Option<HashSet<String>>,
        denied_tools: HashSet<String>,
    ) {
        let agent_id = agent_id.into();
        self.agents.write().expect("prompt store poisoned").insert(
            agent_id.clone(),
            AgentEntry {
                prompt: prompt.into(),
                allowed_tools,
                denied_tools,
            },
        );
        self.cache.write().expect("prompt store poisoned").remove(&agent_id);
    }

    /// Invalidate the resolved-spec cache for every agent.
    pub fn refresh(&self) {
        self.cache.write().expect("prompt store poisoned").clear();
    }

    /// Resolve (and cache) the [`BehaviorSpec`] for `agent_id`.
    pub fn resolve(&self, agent_id: &str) -> Result<BehaviorSpec> {
        if let Some(cached) = self.cache.read().expect("prompt store poisoned").get(agent_id) {
            return Ok(cached.clone());
        }

        let agents = self.agents.read().expect("prompt store poisoned");
        let entry = agents
            .get(agent_id)
            .ok_or_else(|| Error::invalid_input(format!("Unknown agent id: {agent_id}")))?;
        let env_rules = self.env_rules.read().expect("prompt store poisoned").clone();

        let mut spec = BehaviorSpec::build(&self.env_name, agent_id, &env_rules, &entry.prompt);
        spec.allowed_tools = entry.allowed_tools.clone();
        spec.denied_tools = entry.denied_tools.clone();

        self.cache
            .write()
            .expect("prompt store poisoned")
            .insert(agent_id.to_string(), spec.clone());
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_prompt_joins_env_rules_and_agent_prompt() {
        let store = PromptStore::new("env", "be safe");
        store.register_agent("system", "you are helpful", None, HashSet::new());
        let spec = store.resolve("system").unwrap();
        assert_eq!(spec.combined_prompt, "be safe\n\nyou are helpful");
    }

    #[test]
    fn denied_tool_wins_over_allow_list() {
        let mut allowed = HashSet::new();
        allowed.insert("bash".to_string());
        let mut denied = HashSet::new();
        denied.insert("bash".to_string());

        let store = PromptStore::new("env", "");
        store.register_agent("system", "prompt", Some(allowed), denied);
        let spec = store.resolve("system").unwrap();
        assert!(!spec.tool_is_allowed("bash"));
    }

    #[test]
    fn refresh_forces_recompute() {
        let store = PromptStore::new("env", "v1");
        store.register_agent("system", "prompt", None, HashSet::new());
        let first = store.resolve("system").unwrap();
        assert_eq!(first.env_rules, "v1");

        // Mutate rules directly then refresh; the cached spec should update.
        *store.env_rules.write().unwrap() = "v2".to_string();
        store.refresh();
        let second = store.resolve("system").unwrap();
        assert_eq!(second.env_rules, "v2");
    }
}
