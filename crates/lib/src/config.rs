//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.relay/config.json`) and environment.
//! Missing sections fall back to defaults, including the built-in bot table.

use crate::platform::Platform;
use crate::workflow::{RequestKind, WorkflowSettings};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Userbot bridge connection.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Polling and deadline tuning.
    #[serde(default)]
    pub timing: TimingConfig,

    /// Platform -> interaction kind, ranked bots, keywords, choice preferences.
    #[serde(default = "default_platforms")]
    pub platforms: BTreeMap<Platform, PlatformConfig>,

    /// Reply fragments that mean "the bot rejected the request", for every bot.
    #[serde(default = "default_error_signatures")]
    pub error_signatures: Vec<String>,

    /// Per-bot overrides keyed by peer name (e.g. "@embedybot").
    #[serde(default)]
    pub agents: BTreeMap<String, AgentConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            timing: TimingConfig::default(),
            platforms: default_platforms(),
            error_signatures: default_error_signatures(),
            agents: BTreeMap::new(),
        }
    }
}

/// Userbot bridge URL and auth.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    /// Bridge base URL (default "http://127.0.0.1:8765"). Overridden by RELAY_BRIDGE_URL env.
    #[serde(default = "default_bridge_url")]
    pub base_url: String,

    /// Bearer token for the bridge. Overridden by RELAY_BRIDGE_TOKEN env.
    pub token: Option<String>,

    /// Per-request HTTP timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Max events fetched per poll.
    #[serde(default = "default_poll_limit")]
    pub poll_limit: usize,
}

fn default_bridge_url() -> String {
    "http://127.0.0.1:8765".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_poll_limit() -> usize {
    20
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: default_bridge_url(),
            token: None,
            request_timeout_ms: default_request_timeout_ms(),
            poll_limit: default_poll_limit(),
        }
    }
}

/// Empirically tuned timings. None of these is a protocol constant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_aggregation_budget_ms")]
    pub aggregation_budget_ms: u64,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_reply_timeout_ms() -> u64 {
    30_000
}

fn default_probe_timeout_ms() -> u64 {
    3_000
}

fn default_aggregation_budget_ms() -> u64 {
    60_000
}

fn default_max_rounds() -> u32 {
    3
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            reply_timeout_ms: default_reply_timeout_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            aggregation_budget_ms: default_aggregation_budget_ms(),
            max_rounds: default_max_rounds(),
        }
    }
}

/// How one platform's requests are relayed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformConfig {
    pub kind: RequestKind,
    /// Candidate bots, tried in order until one succeeds.
    pub agents: Vec<String>,
    /// Words in a bot reply that mark it as content for this platform.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Choice label substrings per negotiation round, best first.
    #[serde(default)]
    pub preferences: Vec<Vec<String>>,
}

/// Per-bot overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Extra error fragments for this bot (added to the global list).
    #[serde(default)]
    pub error_signatures: Vec<String>,
    /// Reply deadline for this bot, replacing timing.replyTimeoutMs.
    pub reply_timeout_ms: Option<u64>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_platforms() -> BTreeMap<Platform, PlatformConfig> {
    let quality = strings(&["1080", "720", "480", "360"]);
    BTreeMap::from([
        (
            Platform::Tiktok,
            PlatformConfig {
                kind: RequestKind::Aggregated,
                agents: strings(&["@downloader_tiktok_bot", "@best_tiktok_downloader_bot"]),
                keywords: strings(&["tiktok"]),
                preferences: vec![strings(&["video", "media", "photo"]), quality.clone()],
            },
        ),
        (
            Platform::Reddit,
            PlatformConfig {
                kind: RequestKind::Simple,
                agents: strings(&["@reddit_download_bot"]),
                keywords: strings(&["reddit"]),
                preferences: Vec::new(),
            },
        ),
        (
            Platform::Twitter,
            PlatformConfig {
                kind: RequestKind::Aggregated,
                agents: strings(&["@twitterimage_bot", "@embedybot"]),
                keywords: strings(&["twitter", "x.com"]),
                preferences: vec![strings(&["media", "video", "photo"])],
            },
        ),
        (
            Platform::Youtube,
            PlatformConfig {
                kind: RequestKind::Negotiated,
                agents: strings(&["@embedybot"]),
                keywords: strings(&["youtube", "youtu.be"]),
                preferences: vec![strings(&["video", "media"]), quality],
            },
        ),
    ])
}

fn default_error_signatures() -> Vec<String> {
    strings(&[
        "error",
        "invalid link",
        "not found",
        "unsupported",
        "could not",
        "couldn't",
        "failed",
    ])
}

impl Config {
    pub fn platform(&self, platform: Platform) -> Option<&PlatformConfig> {
        self.platforms.get(&platform)
    }

    /// Keywords of every configured platform.
    pub fn platform_keywords(&self) -> Vec<String> {
        self.platforms
            .values()
            .flat_map(|p| p.keywords.iter().cloned())
            .collect()
    }

    /// Global error signatures plus the bot's own.
    pub fn error_signatures_for(&self, agent: &str) -> Vec<String> {
        let mut sigs = self.error_signatures.clone();
        if let Some(a) = self.agents.get(agent) {
            sigs.extend(a.error_signatures.iter().cloned());
        }
        sigs
    }

    /// Workflow timings for `agent` with the platform's choice preferences.
    pub fn workflow_settings(&self, platform: &PlatformConfig, agent: &str) -> WorkflowSettings {
        let t = &self.timing;
        let reply_timeout_ms = self
            .agents
            .get(agent)
            .and_then(|a| a.reply_timeout_ms)
            .unwrap_or(t.reply_timeout_ms);
        WorkflowSettings {
            poll_interval: Duration::from_millis(t.poll_interval_ms.max(1)),
            reply_timeout: Duration::from_millis(reply_timeout_ms),
            probe_timeout: Duration::from_millis(t.probe_timeout_ms),
            aggregation_budget: Duration::from_millis(t.aggregation_budget_ms),
            max_rounds: t.max_rounds,
            preferences: platform.preferences.clone(),
        }
    }
}

fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve the bridge URL: env RELAY_BRIDGE_URL overrides config.
pub fn resolve_bridge_url(config: &Config) -> String {
    env_override("RELAY_BRIDGE_URL").unwrap_or_else(|| config.transport.base_url.trim().to_string())
}

/// Resolve the bridge token: env RELAY_BRIDGE_TOKEN overrides config.
pub fn resolve_bridge_token(config: &Config) -> Option<String> {
    env_override("RELAY_BRIDGE_TOKEN").or_else(|| {
        config
            .transport
            .token
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("RELAY_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".relay").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path, RELAY_CONFIG_PATH, or the default. Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_gives_builtin_table() {
        let config: Config = serde_json::from_str("{}").expect("parse");
        let tiktok = config.platform(Platform::Tiktok).expect("tiktok");
        assert_eq!(tiktok.kind, RequestKind::Aggregated);
        assert_eq!(
            tiktok.agents,
            vec!["@downloader_tiktok_bot", "@best_tiktok_downloader_bot"]
        );
        assert_eq!(
            config.platform(Platform::Youtube).map(|p| p.agents.clone()),
            Some(vec!["@embedybot".to_string()])
        );
        assert_eq!(config.timing.max_rounds, 3);
        assert_eq!(config.transport.poll_limit, 20);
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let raw = r#"{
            "timing": { "pollIntervalMs": 250 },
            "platforms": { "reddit": { "kind": "simple", "agents": ["@a", "@b"] } },
            "agents": { "@a": { "errorSignatures": ["nope"], "replyTimeoutMs": 5000 } }
        }"#;
        let config: Config = serde_json::from_str(raw).expect("parse");
        assert_eq!(config.timing.poll_interval_ms, 250);
        assert_eq!(config.timing.reply_timeout_ms, 30_000);
        assert!(config.platform(Platform::Tiktok).is_none());
        let reddit = config.platform(Platform::Reddit).expect("reddit");
        let s = config.workflow_settings(reddit, "@a");
        assert_eq!(s.reply_timeout, Duration::from_secs(5));
        assert_eq!(s.poll_interval, Duration::from_millis(250));
        assert_eq!(config.workflow_settings(reddit, "@b").reply_timeout, Duration::from_secs(30));
        assert!(config.error_signatures_for("@a").contains(&"nope".to_string()));
        assert!(!config.error_signatures_for("@b").contains(&"nope".to_string()));
    }

    #[test]
    fn default_config_round_trips_through_json() {
        let json = serde_json::to_string_pretty(&Config::default()).expect("serialize");
        let back: Config = serde_json::from_str(&json).expect("parse");
        assert_eq!(back.platforms.len(), Platform::ALL.len());
        assert!(back.platform_keywords().contains(&"youtu.be".to_string()));
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let path = std::env::temp_dir().join("relay-config-missing").join("config.json");
        let (config, used) = load_config(Some(path.clone())).expect("load");
        assert_eq!(used, path);
        assert_eq!(config.platforms.len(), 4);
    }
}
