//! TOML Configuration File Support
//!
//! Centralized configuration for the proxy and the terminal host, read from
//! `~/.config/sass-gpt/sass.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied by the caller through [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! The configuration file lives at `$XDG_CONFIG_HOME/sass-gpt/sass.toml`
//! (typically `~/.config/sass-gpt/sass.toml`).
//!
//! # Example Configuration
//!
//! ```toml
//! [provider]
//! base_url = "https://api.openai.com/v1"
//! model = "gpt-4o"
//! request_timeout_secs = 60
//!
//! [server]
//! bind = "127.0.0.1"
//! port = 3000
//!
//! [streaming]
//! flush_interval_ms = 50
//!
//! [limits]
//! max_message_bytes = 32768
//!
//! [personas.grandma.typing]
//! base_delay_ms = 90
//! sentence_end_ms = [250, 550]
//! digression_probability = 0.08
//!
//! [personas.exec.generation]
//! temperature = 0.8
//! ```
//!
//! The API key is normally supplied through `OPENAI_API_KEY` rather than the
//! file.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::DEFAULT_BASE_URL;
use crate::persona::{Persona, PersonaProfile, PersonaTable, DEFAULT_MODEL};
use crate::reveal::{Digression, JitterRange, PauseRange};
use crate::validation::ChatLimits;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Completion provider settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Provider API key
    pub api_key: Option<String>,
    /// API root, e.g. `https://api.openai.com/v1`
    pub base_url: String,
    /// Model identifier
    pub model: String,
    /// Whole-request timeout, streaming included
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout_secs: 60,
        }
    }
}

impl ProviderConfig {
    /// The API key, if it looks usable
    #[must_use]
    pub fn usable_api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| is_valid_api_key(k))
    }
}

/// Whether a key is present and shaped like an OpenAI secret key
#[must_use]
pub fn is_valid_api_key(key: &str) -> bool {
    let key = key.trim();
    key.starts_with("sk-") && key.len() > 3
}

/// HTTP listener settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Interface to bind
    pub bind: String,
    /// TCP port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl ServerConfig {
    /// Parsed listen address
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind, self.port)
            .parse()
            .map_err(|e| ConfigError::ValidationError(format!("server.bind: {e}")))
    }
}

/// Streaming pipeline settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamingConfig {
    /// Minimum time between transcript writes
    pub flush_interval_ms: u64,
    /// Capacity of the controller's event channel
    pub channel_capacity: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 50,
            channel_capacity: 100,
        }
    }
}

impl StreamingConfig {
    /// Flush interval as a duration
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// Complete configuration
#[derive(Clone, Debug)]
pub struct SassConfig {
    /// Provider settings
    pub provider: ProviderConfig,
    /// Listener settings
    pub server: ServerConfig,
    /// Streaming settings
    pub streaming: StreamingConfig,
    /// Input limits
    pub limits: ChatLimits,
    /// Persona typing and sampling tables
    pub personas: PersonaTable,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    /// Source of configuration values
    source: ConfigSource,
}

impl Default for SassConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            server: ServerConfig::default(),
            streaming: StreamingConfig::default(),
            limits: ChatLimits::default(),
            personas: PersonaTable::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl SassConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check every value is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.personas
            .validate()
            .map_err(ConfigError::ValidationError)?;
        if self.streaming.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "streaming.channel_capacity must be positive".to_string(),
            ));
        }
        if self.limits.max_message_bytes == 0 || self.limits.max_history_messages == 0 {
            return Err(ConfigError::ValidationError(
                "limits must be positive".to_string(),
            ));
        }
        if self.provider.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "provider.request_timeout_secs must be positive".to_string(),
            ));
        }
        self.server.socket_addr()?;
        Ok(())
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Provider section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderToml {
    /// API key (prefer the environment)
    pub api_key: Option<String>,
    /// API root
    pub base_url: Option<String>,
    /// Model identifier
    pub model: Option<String>,
    /// Request timeout in seconds
    pub request_timeout_secs: Option<u64>,
}

/// Server section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Interface to bind
    pub bind: Option<String>,
    /// TCP port
    pub port: Option<u16>,
}

/// Streaming section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingToml {
    /// Minimum time between transcript writes
    pub flush_interval_ms: Option<u64>,
    /// Controller event channel capacity
    pub channel_capacity: Option<usize>,
}

/// Limits section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsToml {
    /// Maximum bytes per message
    pub max_message_bytes: Option<usize>,
    /// Maximum messages per request
    pub max_history_messages: Option<usize>,
}

/// `[personas.<slug>.typing]`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TypingToml {
    /// Base delay per character
    pub base_delay_ms: Option<f64>,
    /// `[min, max]` jitter multiplier
    pub jitter: Option<[f64; 2]>,
    /// `[min, max]` pause after `.`, `!`, `?`
    pub sentence_end_ms: Option<[f64; 2]>,
    /// `[min, max]` pause after `,`
    pub comma_ms: Option<[f64; 2]>,
    /// Digression chance per character (0 disables)
    pub digression_probability: Option<f64>,
    /// `[min, max]` digression pause
    pub digression_ms: Option<[f64; 2]>,
}

/// `[personas.<slug>.generation]`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationToml {
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Nucleus sampling mass
    pub top_p: Option<f32>,
    /// Maximum output tokens
    pub max_tokens: Option<u32>,
}

/// `[personas.<slug>]`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaToml {
    /// Typing cadence overrides
    pub typing: TypingToml,
    /// Sampling overrides
    pub generation: GenerationToml,
}

/// Personas section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PersonasToml {
    /// The teenager
    pub teenager: Option<PersonaToml>,
    /// The grandma
    pub grandma: Option<PersonaToml>,
    /// The intellectual
    pub intellectual: Option<PersonaToml>,
    /// The exec
    pub exec: Option<PersonaToml>,
}

impl PersonasToml {
    fn get(&self, persona: Persona) -> Option<&PersonaToml> {
        match persona {
            Persona::Teenager => self.teenager.as_ref(),
            Persona::Grandma => self.grandma.as_ref(),
            Persona::Intellectual => self.intellectual.as_ref(),
            Persona::Exec => self.exec.as_ref(),
        }
    }
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SassToml {
    /// Provider configuration section
    pub provider: ProviderToml,
    /// Server configuration section
    pub server: ServerToml,
    /// Streaming configuration section
    pub streaming: StreamingToml,
    /// Limits configuration section
    pub limits: LimitsToml,
    /// Persona tables
    pub personas: PersonasToml,
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/sass-gpt/sass.toml` or
/// `~/.config/sass-gpt/sass.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("sass-gpt").join("sass.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be read or parsed,
/// or if the merged values are invalid. A missing config file is not an
/// error (defaults are used).
pub fn load_config() -> Result<SassConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if the merged values are invalid.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<SassConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration using `env` to look up environment variables
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<SassConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    // Start with defaults
    let mut config = SassConfig::default();

    // Try to load from file
    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: SassToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    // Apply environment variables (overrides file values)
    apply_env_config(&mut config, env);

    config.validate()?;
    Ok(config)
}

fn pause(range: [f64; 2]) -> PauseRange {
    PauseRange::new(range[0], range[1])
}

fn apply_persona_toml(profile: &mut PersonaProfile, toml: &PersonaToml) {
    let typing = &mut profile.typing;
    if let Some(base) = toml.typing.base_delay_ms {
        typing.base_delay_ms = base;
    }
    if let Some([min, max]) = toml.typing.jitter {
        typing.jitter = JitterRange::new(min, max);
    }
    if let Some(range) = toml.typing.sentence_end_ms {
        typing.sentence_end = pause(range);
    }
    if let Some(range) = toml.typing.comma_ms {
        typing.comma = pause(range);
    }
    match (toml.typing.digression_probability, toml.typing.digression_ms) {
        (Some(p), _) if p <= 0.0 => typing.digression = None,
        (Some(probability), range) => {
            let pause = range
                .map(pause)
                .or(typing.digression.map(|d| d.pause))
                .unwrap_or(PauseRange::new(300.0, 700.0));
            typing.digression = Some(Digression { probability, pause });
        }
        (None, Some(range)) => {
            if let Some(d) = typing.digression.as_mut() {
                d.pause = pause(range);
            }
        }
        (None, None) => {}
    }

    let generation = &mut profile.generation;
    if let Some(t) = toml.generation.temperature {
        generation.temperature = t;
    }
    if let Some(p) = toml.generation.top_p {
        generation.top_p = p;
    }
    if let Some(n) = toml.generation.max_tokens {
        generation.max_tokens = n;
    }
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut SassConfig, toml: &SassToml) {
    // Provider settings
    if let Some(ref key) = toml.provider.api_key {
        config.provider.api_key = Some(key.clone());
    }
    if let Some(ref url) = toml.provider.base_url {
        config.provider.base_url.clone_from(url);
    }
    if let Some(ref model) = toml.provider.model {
        config.provider.model.clone_from(model);
    }
    if let Some(secs) = toml.provider.request_timeout_secs {
        config.provider.request_timeout_secs = secs;
    }

    // Server settings
    if let Some(ref bind) = toml.server.bind {
        config.server.bind.clone_from(bind);
    }
    if let Some(port) = toml.server.port {
        config.server.port = port;
    }

    // Streaming settings
    if let Some(ms) = toml.streaming.flush_interval_ms {
        config.streaming.flush_interval_ms = ms;
    }
    if let Some(capacity) = toml.streaming.channel_capacity {
        config.streaming.channel_capacity = capacity;
    }

    // Limits
    if let Some(bytes) = toml.limits.max_message_bytes {
        config.limits.max_message_bytes = bytes;
    }
    if let Some(count) = toml.limits.max_history_messages {
        config.limits.max_history_messages = count;
    }

    // Personas
    for persona in Persona::ALL {
        if let Some(overrides) = toml.personas.get(persona) {
            apply_persona_toml(config.personas.get_mut(persona), overrides);
        }
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config<F>(config: &mut SassConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = env("OPENAI_API_KEY") {
        config.provider.api_key = Some(key);
        config.source = ConfigSource::Env;
    }
    if let Some(url) = env("SASS_OPENAI_BASE_URL") {
        config.provider.base_url = url;
        config.source = ConfigSource::Env;
    }
    if let Some(model) = env("SASS_MODEL") {
        config.provider.model = model;
        config.source = ConfigSource::Env;
    }
    if let Some(bind) = env("SASS_BIND") {
        config.server.bind = bind;
        config.source = ConfigSource::Env;
    }
    if let Some(port) = env("SASS_PORT") {
        match port.parse::<u16>() {
            Ok(p) => {
                config.server.port = p;
                config.source = ConfigSource::Env;
            }
            Err(e) => tracing::warn!(value = %port, error = %e, "Ignoring invalid SASS_PORT"),
        }
    }
    if let Some(interval) = env("SASS_FLUSH_INTERVAL_MS") {
        match interval.parse::<u64>() {
            Ok(ms) => {
                config.streaming.flush_interval_ms = ms;
                config.source = ConfigSource::Env;
            }
            Err(e) => {
                tracing::warn!(value = %interval, error = %e, "Ignoring invalid SASS_FLUSH_INTERVAL_MS");
            }
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// API key override
    pub api_key: Option<String>,
    /// Provider base URL override
    pub base_url: Option<String>,
    /// Model override
    pub model: Option<String>,
    /// Bind address override
    pub bind: Option<String>,
    /// Port override
    pub port: Option<u16>,
    /// Flush interval override
    pub flush_interval_ms: Option<u64>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set API key override
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set base URL override
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set model override
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set bind address override
    #[must_use]
    pub fn with_bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = Some(bind.into());
        self
    }

    /// Set port override
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set flush interval override
    #[must_use]
    pub fn with_flush_interval_ms(mut self, ms: u64) -> Self {
        self.flush_interval_ms = Some(ms);
        self
    }

    fn is_empty(&self) -> bool {
        self.api_key.is_none()
            && self.base_url.is_none()
            && self.model.is_none()
            && self.bind.is_none()
            && self.port.is_none()
            && self.flush_interval_ms.is_none()
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut SassConfig) {
        if self.is_empty() {
            return;
        }
        config.source = ConfigSource::Cli;

        if let Some(ref key) = self.api_key {
            config.provider.api_key = Some(key.clone());
        }
        if let Some(ref url) = self.base_url {
            config.provider.base_url.clone_from(url);
        }
        if let Some(ref model) = self.model {
            config.provider.model.clone_from(model);
        }
        if let Some(ref bind) = self.bind {
            config.server.bind.clone_from(bind);
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(ms) = self.flush_interval_ms {
            config.streaming.flush_interval_ms = ms;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_toml(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    // =========================================================================
    // Default Configuration Tests
    // =========================================================================

    #[test]
    fn test_default_config() {
        let config = SassConfig::default();

        assert_eq!(config.provider.model, "gpt-4o");
        assert_eq!(config.provider.base_url, "https://api.openai.com/v1");
        assert!(config.provider.api_key.is_none());
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.streaming.flush_interval(), Duration::from_millis(50));
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("sass-gpt/sass.toml"));
        }
    }

    // =========================================================================
    // TOML Parsing Tests
    // =========================================================================

    #[test]
    fn test_parse_valid_toml() {
        let file = write_toml(
            r#"
[provider]
model = "gpt-4o-mini"
request_timeout_secs = 30

[server]
bind = "0.0.0.0"
port = 8080

[streaming]
flush_interval_ms = 25

[limits]
max_history_messages = 50

[personas.grandma.typing]
base_delay_ms = 90
sentence_end_ms = [250, 550]

[personas.exec.generation]
temperature = 0.5
"#,
        );

        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();

        assert_eq!(config.provider.model, "gpt-4o-mini");
        assert_eq!(config.provider.request_timeout_secs, 30);
        assert_eq!(config.server.socket_addr().unwrap().port(), 8080);
        assert_eq!(config.streaming.flush_interval_ms, 25);
        assert_eq!(config.limits.max_history_messages, 50);

        let grandma = config.personas.typing(Persona::Grandma);
        assert!((grandma.base_delay_ms - 90.0).abs() < f64::EPSILON);
        assert_eq!(grandma.sentence_end, PauseRange::new(250.0, 550.0));
        // untouched fields keep their defaults
        assert_eq!(grandma.comma, PauseRange::new(100.0, 200.0));
        assert!(grandma.digression.is_some());

        let exec = config.personas.get(Persona::Exec).generation;
        assert!((exec.temperature - 0.5).abs() < f32::EPSILON);
        assert_eq!(exec.max_tokens, 4096);

        assert_eq!(config.source(), ConfigSource::File);
        assert_eq!(config.config_file_path, Some(file.path().to_path_buf()));
    }

    #[test]
    fn test_digression_can_be_enabled_and_disabled() {
        let file = write_toml(
            r"
[personas.teenager.typing]
digression_probability = 0.1
digression_ms = [100, 200]

[personas.grandma.typing]
digression_probability = 0
",
        );
        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();
        assert_eq!(
            config.personas.typing(Persona::Teenager).digression,
            Some(Digression {
                probability: 0.1,
                pause: PauseRange::new(100.0, 200.0)
            })
        );
        assert!(config.personas.typing(Persona::Grandma).digression.is_none());
    }

    #[test]
    fn test_parse_empty_toml() {
        let file = write_toml("");
        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();
        assert_eq!(config.personas, PersonaTable::default());
        assert_eq!(config.source(), ConfigSource::File);
    }

    #[test]
    fn test_missing_file_graceful() {
        let path = PathBuf::from("/nonexistent/sass-gpt/sass.toml");
        let config = load_config_with_env(Some(path), no_env).unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_malformed_toml_error() {
        let file = write_toml("[provider\nmodel = ");
        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_unknown_persona_section_rejected() {
        let file = write_toml("[personas.pirate.typing]\nbase_delay_ms = 10\n");
        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_invalid_range_rejected() {
        let file = write_toml("[personas.exec.typing]\ncomma_ms = [80, 20]\n");
        let err = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap_err();
        match err {
            ConfigError::ValidationError(msg) => {
                assert!(msg.contains("personas.exec.typing"), "{msg}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    // =========================================================================
    // Priority Tests
    // =========================================================================

    #[test]
    fn test_env_overrides_file() {
        let file = write_toml("[provider]\nmodel = \"file-model\"\n[server]\nport = 4000\n");
        let env: HashMap<&str, &str> = [
            ("SASS_MODEL", "env-model"),
            ("SASS_PORT", "5000"),
            ("OPENAI_API_KEY", "sk-env"),
        ]
        .into_iter()
        .collect();

        let config = load_config_with_env(Some(file.path().to_path_buf()), |k| {
            env.get(k).map(|v| (*v).to_string())
        })
        .unwrap();

        assert_eq!(config.provider.model, "env-model");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.provider.usable_api_key(), Some("sk-env"));
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_invalid_env_value_ignored() {
        let config = load_config_with_env(None, |k| {
            (k == "SASS_PORT").then(|| "not-a-port".to_string())
        })
        .unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_cli_overrides_env() {
        let mut config = SassConfig::default();
        config.provider.model = "env-model".to_string();
        config.set_source(ConfigSource::Env);

        ConfigOverrides::new().with_model("cli-model").apply(&mut config);

        assert_eq!(config.provider.model, "cli-model");
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_config_overrides_empty_no_change() {
        let mut config = SassConfig::default();
        ConfigOverrides::new().apply(&mut config);
        assert_eq!(config.source(), ConfigSource::Default);
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn test_config_overrides_apply() {
        let mut config = SassConfig::default();
        ConfigOverrides::new()
            .with_bind("0.0.0.0")
            .with_port(9999)
            .with_flush_interval_ms(10)
            .with_api_key("sk-cli")
            .apply(&mut config);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.streaming.flush_interval_ms, 10);
        assert_eq!(config.provider.usable_api_key(), Some("sk-cli"));
    }

    // =========================================================================
    // API Key Tests
    // =========================================================================

    #[test]
    fn test_api_key_shape() {
        assert!(is_valid_api_key("sk-abc123"));
        assert!(is_valid_api_key("sk-proj-abc"));
        assert!(!is_valid_api_key(""));
        assert!(!is_valid_api_key("sk-"));
        assert!(!is_valid_api_key("pk-abc"));

        let mut provider = ProviderConfig::default();
        assert!(provider.usable_api_key().is_none());
        provider.api_key = Some("nope".to_string());
        assert!(provider.usable_api_key().is_none());
    }

    #[test]
    fn test_config_source_display() {
        assert_eq!(ConfigSource::Cli.to_string(), "CLI");
        assert_eq!(ConfigSource::Env.to_string(), "environment");
        assert_eq!(ConfigSource::File.to_string(), "config file");
        assert_eq!(ConfigSource::Default.to_string(), "default");
    }
}
