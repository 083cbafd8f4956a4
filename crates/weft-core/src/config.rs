use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeftError};

/// Top-level Weft configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    #[serde(default)]
    pub tools: Vec<ToolConfig>,
    /// Canned tool calls per agent id, replayed by the scripted agent.
    #[serde(default)]
    pub script: HashMap<String, Vec<ScriptStep>>,
}

/// Driver limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Agent turns a single node may take before it is failed.
    #[serde(default = "default_max_turns_per_node")]
    pub max_turns_per_node: usize,
    /// Default timeout for ordinary tool handlers.
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// Timeout for a single agent turn.
    #[serde(default = "default_turn_timeout_secs")]
    pub turn_timeout_secs: u64,
    /// Capacity of the engine event bus.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_turns_per_node: default_max_turns_per_node(),
            tool_timeout_secs: default_tool_timeout_secs(),
            turn_timeout_secs: default_turn_timeout_secs(),
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_max_turns_per_node() -> usize { 25 }
fn default_tool_timeout_secs() -> u64 { 30 }
fn default_turn_timeout_secs() -> u64 { 120 }
fn default_event_capacity() -> usize { 256 }

/// Snapshot storage backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Json,
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Database file (sqlite) or directory (json). Defaults under `~/.weft`.
    #[serde(default)]
    pub path: Option<String>,
}

impl StoreConfig {
    /// Resolve the storage location for the configured backend (expands `~/`).
    pub fn resolved_path(&self) -> PathBuf {
        let raw = match (&self.path, self.backend) {
            (Some(p), _) => p.clone(),
            (None, StoreBackend::Json) => "~/.weft/runs".to_string(),
            (None, _) => "~/.weft/runs.db".to_string(),
        };
        expand_home(&raw)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing` env-filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String { "weft=info,warn".to_string() }

/// An agent declared in config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub model: Option<String>,
}

/// How the driver treats a config-declared tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKindConfig {
    #[default]
    Ordinary,
    Delegate,
    AskHuman,
    Handoff,
}

/// A tool declared in config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub kind: ToolKindConfig,
    /// Target agent for delegate tools.
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub input_schema: Option<serde_json::Value>,
    /// Reply template for ordinary tools, with `{field}` placeholders.
    #[serde(default)]
    pub reply: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// One canned tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptStep {
    pub tool: String,
    #[serde(default = "empty_args")]
    pub args: serde_json::Value,
}

fn empty_args() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| WeftError::ConfigNotFound(path.display().to_string()))?;

        Self::parse(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| WeftError::Config(e.to_string()))
    }
}

/// Expand `${ENV_VAR}` references. Unset variables and an unterminated
/// `${` are left exactly as written.
fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(len) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..len];
        match std::env::var(name) {
            Ok(value) => out.push_str(&value),
            Err(_) => out.push_str(&rest[start..start + 2 + len + 1]),
        }
        rest = &after[len + 1..];
    }
    out.push_str(rest);
    out
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var("HOME").ok().map(PathBuf::from) {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_WEFT_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_WEFT_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_WEFT_VAR");
    }

    #[test]
    fn test_expand_env_vars_unterminated() {
        assert_eq!(expand_env_vars("key = \"${WEFT_OPEN"), "key = \"${WEFT_OPEN");
        std::env::set_var("TEST_WEFT_HALF", "x");
        assert_eq!(expand_env_vars("${TEST_WEFT_HALF}-${TEST_WEFT_HALF"), "x-${TEST_WEFT_HALF");
        std::env::remove_var("TEST_WEFT_HALF");
        assert_eq!(expand_env_vars("cost = \"$5\" and $last"), "cost = \"$5\" and $last");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_WEFT_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_WEFT_VAR}\"");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.engine.max_turns_per_node, 25);
        assert_eq!(config.engine.tool_timeout_secs, 30);
        assert_eq!(config.engine.turn_timeout_secs, 120);
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.log.filter, "weft=info,warn");
        assert!(config.agents.is_empty());
        assert!(config.script.is_empty());
    }

    #[test]
    fn test_agents_tools_and_script() {
        let toml_str = r#"
[[agents]]
id = "research_manager"
tools = ["route_to_research_agent", "ask_master", "handoff"]
model = "claude-sonnet-4-20250514"

[[tools]]
name = "route_to_research_agent"
kind = "delegate"
target = "research_agent"

[[tools]]
name = "search_web"
reply = "Search results for: {query}"
input_schema = { type = "object", properties = { query = { type = "string" } }, required = ["query"] }

[[script.research_manager]]
tool = "route_to_research_agent"
args = { request = "look it up" }

[[script.research_manager]]
tool = "handoff"
"#;
        let config = AppConfig::parse(toml_str).unwrap();
        assert_eq!(config.agents[0].tools.len(), 3);
        assert_eq!(config.tools[0].kind, ToolKindConfig::Delegate);
        assert_eq!(config.tools[1].kind, ToolKindConfig::Ordinary);
        assert_eq!(
            config.tools[1].input_schema.as_ref().unwrap()["required"][0],
            "query"
        );
        let steps = &config.script["research_manager"];
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].args["request"], "look it up");
        assert!(steps[1].args.as_object().unwrap().is_empty());
    }

    #[test]
    fn test_store_path_defaults_per_backend() {
        let json = StoreConfig {
            backend: StoreBackend::Json,
            path: None,
        };
        assert!(json.resolved_path().ends_with(".weft/runs"));

        let explicit = StoreConfig {
            backend: StoreBackend::Sqlite,
            path: Some("/tmp/weft.db".into()),
        };
        assert_eq!(explicit.resolved_path(), PathBuf::from("/tmp/weft.db"));
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        assert!(matches!(
            AppConfig::parse("[engine\nmax_turns_per_node = 3"),
            Err(WeftError::Config(_))
        ));
    }
}
