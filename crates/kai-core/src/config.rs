//! Configuration loading and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level KAI Assist configuration, loaded from a JSON5 file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub realtime: Option<RealtimeConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub knowledge: Option<KnowledgeConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticketing: Option<TicketingConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub call: Option<CallConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Public host (and optional path prefix) the telephony provider reaches
    /// us on, used to build the media stream URL in TwiML responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
}

fn default_port() -> u16 {
    5050
}

/// Realtime speech-model connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default = "default_realtime_url")]
    pub url: String,

    #[serde(default = "default_realtime_model")]
    pub model: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_realtime_key_env")]
    pub api_key_env: Option<String>,

    #[serde(default = "default_voice")]
    pub voice: String,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Audio encoding used on both legs: "g711_ulaw", "g711_alaw" or "pcm16".
    #[serde(default = "default_audio_format")]
    pub audio_format: String,

    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,

    /// System instructions override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: default_realtime_url(),
            model: default_realtime_model(),
            api_key: None,
            api_key_env: default_realtime_key_env(),
            voice: default_voice(),
            temperature: default_temperature(),
            audio_format: default_audio_format(),
            transcription_model: default_transcription_model(),
            instructions: None,
        }
    }
}

impl RealtimeConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }

    /// Full connection URL including the model query parameter.
    pub fn connect_url(&self) -> String {
        let sep = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{sep}model={}", self.url, self.model)
    }
}

fn default_realtime_url() -> String {
    "wss://api.openai.com/v1/realtime".into()
}

fn default_realtime_model() -> String {
    "gpt-4o-realtime-preview-2024-12-17".into()
}

fn default_realtime_key_env() -> Option<String> {
    Some("OPENAI_API_KEY".into())
}

fn default_voice() -> String {
    "alloy".into()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_audio_format() -> String {
    "g711_ulaw".into()
}

fn default_transcription_model() -> String {
    "whisper-1".into()
}

/// Knowledge-retrieval backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    pub base_url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl KnowledgeConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

fn default_top_k() -> usize {
    3
}

/// Ticketing backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketingConfig {
    pub base_url: String,

    pub username: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    pub requester_id: String,

    #[serde(default = "default_ticket_channel")]
    pub channel: String,

    #[serde(default = "default_one")]
    pub channel_id: String,

    #[serde(default = "default_priority")]
    pub priority_id: String,

    #[serde(default = "default_one")]
    pub type_id: String,
}

impl TicketingConfig {
    pub fn resolve_password(&self) -> Option<String> {
        resolve_secret_field(&self.password, &self.password_env)
    }
}

fn default_ticket_channel() -> String {
    "MAIL".into()
}

fn default_one() -> String {
    "1".into()
}

fn default_priority() -> String {
    "3".into()
}

/// Per-call behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    /// How long to let the farewell play before the stream is stopped.
    #[serde(default = "default_farewell_delay_ms")]
    pub farewell_delay_ms: u64,

    /// How long to wait for the telephony `start` event.
    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,

    /// Greet the caller as soon as the model session is ready.
    #[serde(default = "default_true")]
    pub greeting: bool,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            farewell_delay_ms: default_farewell_delay_ms(),
            start_timeout_secs: default_start_timeout_secs(),
            greeting: true,
        }
    }
}

fn default_farewell_delay_ms() -> u64 {
    3000
}

fn default_start_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "kai_gateway=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> crate::error::Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| crate::error::KaiError::Config(e.to_string()))?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .into_owned())
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw)?;

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::KaiError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file location.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn server_port(&self) -> u16 {
        self.server.as_ref().map(|s| s.port).unwrap_or(5050)
    }

    pub fn bind_addr(&self) -> String {
        self.server
            .as_ref()
            .and_then(|s| s.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    /// Realtime settings, falling back to defaults when the block is absent.
    pub fn realtime(&self) -> RealtimeConfig {
        self.realtime.clone().unwrap_or_default()
    }

    pub fn call(&self) -> CallConfig {
        self.call.clone().unwrap_or_default()
    }

    pub fn farewell_delay(&self) -> Duration {
        Duration::from_millis(self.call().farewell_delay_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.call().start_timeout_secs)
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if self.realtime().resolve_api_key().is_none() {
            errors.push("Realtime model has no API key configured".to_string());
        }

        match &self.knowledge {
            None => warnings.push(
                "No knowledge backend configured; every search will report no information"
                    .to_string(),
            ),
            Some(k) if k.base_url.is_empty() => {
                errors.push("Knowledge backend base_url is empty".to_string())
            }
            Some(_) => {}
        }

        match &self.ticketing {
            None => warnings.push(
                "No ticketing backend configured; transcripts will only be logged".to_string(),
            ),
            Some(t) if t.resolve_password().is_none() => warnings.push(format!(
                "Ticketing user '{}' has no password configured",
                t.username
            )),
            Some(_) => {}
        }

        if let Some(server) = &self.server {
            if server.port == 0 {
                errors.push("Server port cannot be 0".to_string());
            }
            if server.public_url.is_none() {
                warnings.push(
                    "server.public_url is not set; the TwiML webhook will use the Host header"
                        .to_string(),
                );
            }
        }

        (warnings, errors)
    }
}

/// Base directory for KAI Assist data: `~/.kai_assist/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kai_assist")
}
