use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{ConfigError, env_bool, env_f64, env_optional, env_u64};

pub(crate) const DEFAULT_PERSONA: &str = "\
You are Jarvis: a composed British valet-style personal assistant. \
Always address the user as 'sir'. \
Be crisp, precise, and courteous. Prefer short sentences with understated confidence. \
Avoid slang. Offer succinct confirmations like 'Very well, sir.' or 'At once, sir.' when appropriate. \
Use the web_search tool only for current events or facts that require the internet. \
Never use web_search for mathematics, unit conversions, or symbolic work; do them yourself.";

fn default_names() -> Vec<String> {
    ["jarvis", "jervis", "jarvish", "jarvz"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_true() -> bool {
    true
}

fn default_confirm_timeout() -> u64 {
    20
}

fn default_wake_window() -> u64 {
    25
}

fn default_inference_url() -> String {
    "http://127.0.0.1:11434/api/chat".to_string()
}

fn default_model() -> String {
    "qwen2.5:7b".to_string()
}

fn default_probe_timeout() -> u64 {
    15
}

fn default_tool_timeout() -> u64 {
    30
}

fn default_direct_timeout() -> u64 {
    20
}

fn default_fallback_timeout() -> u64 {
    30
}

fn default_memory_turns() -> usize {
    10
}

fn default_user_id() -> String {
    "owner".to_string()
}

fn default_namespace() -> String {
    "personal".to_string()
}

fn default_agent_id() -> String {
    "aethervoice-desktop".to_string()
}

fn default_search_gap() -> f64 {
    2.0
}

fn default_search_results() -> usize {
    5
}

fn default_persona() -> String {
    DEFAULT_PERSONA.to_string()
}

/// Settings read from `<workspace>/config.json`, then overridden from the environment.
/// Upper bound for every timeout and window, in seconds.
const MAX_WINDOW_SECS: u64 = 86_400;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AssistantConfig {
    #[serde(default = "default_names")]
    pub(crate) names: Vec<String>,
    #[serde(default = "default_true")]
    pub(crate) require_name: bool,
    #[serde(default)]
    pub(crate) legacy_keyword_triggers: bool,
    #[serde(default = "default_confirm_timeout")]
    pub(crate) confirm_timeout_secs: u64,
    #[serde(default = "default_wake_window")]
    pub(crate) wake_window_secs: u64,
    #[serde(default = "default_inference_url")]
    pub(crate) inference_url: String,
    #[serde(default = "default_model")]
    pub(crate) model: String,
    #[serde(default = "default_probe_timeout")]
    pub(crate) probe_timeout_secs: u64,
    #[serde(default = "default_tool_timeout")]
    pub(crate) tool_timeout_secs: u64,
    #[serde(default = "default_direct_timeout")]
    pub(crate) direct_timeout_secs: u64,
    #[serde(default = "default_fallback_timeout")]
    pub(crate) fallback_timeout_secs: u64,
    #[serde(default = "default_memory_turns")]
    pub(crate) memory_turns: usize,
    #[serde(default = "default_true")]
    pub(crate) enable_memory: bool,
    #[serde(default)]
    pub(crate) memory_db: Option<PathBuf>,
    #[serde(default = "default_user_id")]
    pub(crate) user_id: String,
    #[serde(default = "default_namespace")]
    pub(crate) namespace: String,
    #[serde(default = "default_agent_id")]
    pub(crate) agent_id: String,
    #[serde(default = "default_search_gap")]
    pub(crate) search_min_gap_secs: f64,
    #[serde(default = "default_search_results")]
    pub(crate) search_max_results: usize,
    #[serde(default)]
    pub(crate) hud_url: Option<String>,
    #[serde(default = "default_persona")]
    pub(crate) persona: String,
    #[serde(default)]
    pub(crate) disable_llm: bool,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            names: default_names(),
            require_name: true,
            legacy_keyword_triggers: false,
            confirm_timeout_secs: default_confirm_timeout(),
            wake_window_secs: default_wake_window(),
            inference_url: default_inference_url(),
            model: default_model(),
            probe_timeout_secs: default_probe_timeout(),
            tool_timeout_secs: default_tool_timeout(),
            direct_timeout_secs: default_direct_timeout(),
            fallback_timeout_secs: default_fallback_timeout(),
            memory_turns: default_memory_turns(),
            enable_memory: true,
            memory_db: None,
            user_id: default_user_id(),
            namespace: default_namespace(),
            agent_id: default_agent_id(),
            search_min_gap_secs: default_search_gap(),
            search_max_results: default_search_results(),
            hud_url: None,
            persona: default_persona(),
            disable_llm: false,
        }
    }
}

impl AssistantConfig {
    pub(crate) fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// File layer first (missing or unparseable file means defaults), then env overrides.
    pub(crate) fn load(workspace: &Path) -> Result<Self, ConfigError> {
        let path = workspace.join("config.json");
        let mut config = match fs::read_to_string(&path) {
            Ok(raw) => match Self::from_json_str(&raw) {
                Ok(config) => config,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "ignoring unparseable config");
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => return Err(err.into()),
        };
        config.apply_env()?;
        if config.memory_db.is_none() {
            config.memory_db = Some(workspace.join("memory.sqlite"));
        }
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.require_name = env_bool("AETHERVOICE_REQUIRE_NAME", self.require_name);
        self.legacy_keyword_triggers =
            env_bool("AETHERVOICE_LEGACY_TRIGGERS", self.legacy_keyword_triggers);
        self.enable_memory = env_bool("AETHERVOICE_ENABLE_MEMORY", self.enable_memory);
        self.disable_llm = env_bool("AETHERVOICE_NO_LLM", self.disable_llm);
        self.search_min_gap_secs = env_f64("AETHERVOICE_SEARCH_MIN_GAP", self.search_min_gap_secs)?;

        let host = env_optional("OLLAMA_HOST");
        let port = env_optional("OLLAMA_PORT");
        if host.is_some() || port.is_some() {
            let host = host.unwrap_or_else(|| "127.0.0.1".to_string());
            let port = env_u64("OLLAMA_PORT", 11434)?;
            self.inference_url = format!("http://{host}:{port}/api/chat");
        }
        if let Some(url) = env_optional("AETHERVOICE_INFERENCE_URL") {
            self.inference_url = url;
        }
        if let Some(model) = env_optional("OLLAMA_MODEL") {
            self.model = model;
        }
        if let Some(url) = env_optional("AETHERVOICE_HUD_URL") {
            self.hud_url = Some(url);
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.names.iter().all(|n| n.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                name: "names".to_string(),
            });
        }
        let windows = [
            ("confirm_timeout_secs", self.confirm_timeout_secs),
            ("wake_window_secs", self.wake_window_secs),
            ("probe_timeout_secs", self.probe_timeout_secs),
            ("tool_timeout_secs", self.tool_timeout_secs),
            ("direct_timeout_secs", self.direct_timeout_secs),
            ("fallback_timeout_secs", self.fallback_timeout_secs),
        ];
        if let Some((name, _)) = windows.iter().find(|(_, secs)| *secs > MAX_WINDOW_SECS) {
            return Err(ConfigError::Invalid {
                name: name.to_string(),
            });
        }
        if !(self.search_min_gap_secs.is_finite() && self.search_min_gap_secs >= 0.0) {
            return Err(ConfigError::Invalid {
                name: "search_min_gap_secs".to_string(),
            });
        }
        Ok(())
    }

    /// Aliases lower-cased, primary name first.
    pub(crate) fn normalized_names(&self) -> Vec<String> {
        self.names
            .iter()
            .map(|n| n.trim().to_lowercase())
            .filter(|n| !n.is_empty())
            .collect()
    }

    pub(crate) fn search_min_gap(&self) -> Duration {
        Duration::from_secs_f64(self.search_min_gap_secs)
    }
}
