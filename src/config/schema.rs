use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
#[cfg(unix)]
use tokio::fs::File;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

const CONFIG_FILE_NAME: &str = "config.toml";

// ── Top-level config ──────────────────────────────────────────────

/// Top-level Florentine configuration, loaded from `config.toml`.
///
/// Resolution order: `--config-dir` → `FLORENTINE_CONFIG_DIR` env → `~/.florentine/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to config.toml - computed at load time, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,
    /// API key for the selected provider. Overridden by `AI_MODEL_KEY`, `FLORENTINE_API_KEY` or `API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Base URL override for the provider API. Overridden by `AI_MODEL_ENDPOINT`.
    #[serde(default)]
    pub api_url: Option<String>,
    /// Provider ID or alias (`"deepseek"`, `"openai"`, `"custom:<url>"`). Default: `"deepseek"`.
    #[serde(default = "default_provider")]
    pub default_provider: String,
    /// Model used for narrative turns and events. Default: `"deepseek-chat"`.
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Narrative sampling temperature (0.0–2.0). Default: `0.7`.
    #[serde(default = "default_temperature")]
    pub default_temperature: f64,

    /// HTTP server settings (`[gateway]`).
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Streaming limits for conversation turns (`[stream]`).
    #[serde(default)]
    pub stream: StreamConfig,

    /// Game event generation (`[events]`).
    #[serde(default)]
    pub events: EventsConfig,
}

fn default_provider() -> String {
    "deepseek".into()
}

fn default_model() -> String {
    "deepseek-chat".into()
}

fn default_temperature() -> f64 {
    0.7
}

// ── Gateway ─────────────────────────────────────────────────────

/// Gateway server configuration (`[gateway]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway host (default: 127.0.0.1)
    #[serde(default = "default_gateway_host")]
    pub host: String,
    /// Gateway port (default: 8000, the port the browser client posts to)
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Directory with the browser client to serve at `/`. `~` is expanded.
    #[serde(default)]
    pub static_dir: Option<String>,
    /// Largest accepted request body.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Deadline for non-streaming routes.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_gateway_host() -> String {
    "127.0.0.1".into()
}

fn default_gateway_port() -> u16 {
    8000
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            static_dir: None,
            max_body_bytes: default_max_body_bytes(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl GatewayConfig {
    /// `static_dir` with `~` and `$VARS` expanded.
    pub fn resolved_static_dir(&self) -> Option<PathBuf> {
        let raw = self.static_dir.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        let expanded = shellexpand::full(raw)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| shellexpand::tilde(raw).into_owned());
        Some(PathBuf::from(expanded))
    }
}

// ── Streaming ───────────────────────────────────────────────────

/// Streaming limits (`[stream]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_first_fragment_timeout_secs")]
    pub first_fragment_timeout_secs: u64,
    #[serde(default = "default_total_timeout_secs")]
    pub total_timeout_secs: u64,
    /// Fragments buffered per turn for a slow client.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_first_fragment_timeout_secs() -> u64 {
    30
}

fn default_total_timeout_secs() -> u64 {
    300
}

fn default_channel_capacity() -> usize {
    64
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            first_fragment_timeout_secs: default_first_fragment_timeout_secs(),
            total_timeout_secs: default_total_timeout_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

// ── Events ──────────────────────────────────────────────────────

/// Game event generation (`[events]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_random_event_temperature")]
    pub random_event_temperature: f64,
    #[serde(default = "default_event_choice_temperature")]
    pub event_choice_temperature: f64,
}

fn default_random_event_temperature() -> f64 {
    0.8
}

fn default_event_choice_temperature() -> f64 {
    0.7
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            random_event_temperature: default_random_event_temperature(),
            event_choice_temperature: default_event_choice_temperature(),
        }
    }
}

// ── Config impl ──────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        let config_dir = default_config_dir().unwrap_or_else(|_| PathBuf::from(".florentine"));

        Self {
            config_path: config_dir.join(CONFIG_FILE_NAME),
            api_key: None,
            api_url: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            gateway: GatewayConfig::default(),
            stream: StreamConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

fn default_config_dir() -> Result<PathBuf> {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(".florentine"))
}

/// Where `config.toml` lives, and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigResolutionSource {
    CliFlag,
    EnvConfigDir,
    DefaultConfigDir,
}

impl ConfigResolutionSource {
    const fn as_str(self) -> &'static str {
        match self {
            Self::CliFlag => "--config-dir",
            Self::EnvConfigDir => "FLORENTINE_CONFIG_DIR",
            Self::DefaultConfigDir => "default",
        }
    }
}

fn resolve_config_dir(cli_dir: Option<&Path>) -> Result<(PathBuf, ConfigResolutionSource)> {
    if let Some(dir) = cli_dir {
        return Ok((expand_path(dir), ConfigResolutionSource::CliFlag));
    }
    if let Ok(dir) = std::env::var("FLORENTINE_CONFIG_DIR") {
        if !dir.trim().is_empty() {
            return Ok((
                expand_path(Path::new(dir.trim())),
                ConfigResolutionSource::EnvConfigDir,
            ));
        }
    }
    Ok((default_config_dir()?, ConfigResolutionSource::DefaultConfigDir))
}

fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(&raw).into_owned())
}

fn env_non_empty(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

impl Config {
    /// Load `config.toml`, creating it with defaults on first run.
    pub async fn load_or_init(cli_dir: Option<&Path>) -> Result<Self> {
        let (config_dir, resolution_source) = resolve_config_dir(cli_dir)?;
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        fs::create_dir_all(&config_dir).await.with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let initialized = !config_path.exists();
        let mut config = if initialized {
            let mut config = Config::default();
            config.config_path = config_path.clone();
            config.save().await?;
            config
        } else {
            // Warn if config file is world-readable (may contain API keys)
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(meta) = fs::metadata(&config_path).await {
                    if meta.permissions().mode() & 0o004 != 0 {
                        tracing::warn!(
                            "Config file {:?} is world-readable (mode {:o}). \
                             Consider restricting with: chmod 600 {:?}",
                            config_path,
                            meta.permissions().mode() & 0o777,
                            config_path,
                        );
                    }
                }
            }

            let contents = fs::read_to_string(&config_path)
                .await
                .context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.config_path = config_path.clone();
            config
        };

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!(
            path = %config.config_path.display(),
            source = resolution_source.as_str(),
            initialized,
            "Config loaded"
        );
        Ok(config)
    }

    /// Validate configuration values that would cause runtime failures.
    pub fn validate(&self) -> Result<()> {
        if self.default_provider.trim().is_empty() {
            anyhow::bail!("default_provider must not be empty");
        }
        if self.default_model.trim().is_empty() {
            anyhow::bail!("default_model must not be empty");
        }
        for (name, value) in [
            ("default_temperature", self.default_temperature),
            (
                "events.random_event_temperature",
                self.events.random_event_temperature,
            ),
            (
                "events.event_choice_temperature",
                self.events.event_choice_temperature,
            ),
        ] {
            if !(0.0..=2.0).contains(&value) {
                anyhow::bail!("{name} must be between 0.0 and 2.0 (got {value})");
            }
        }

        // Gateway
        if self.gateway.host.trim().is_empty() {
            anyhow::bail!("gateway.host must not be empty");
        }
        if self.gateway.max_body_bytes == 0 {
            anyhow::bail!("gateway.max_body_bytes must be greater than 0");
        }
        if self.gateway.request_timeout_secs == 0 {
            anyhow::bail!("gateway.request_timeout_secs must be greater than 0");
        }

        // Stream
        if self.stream.first_fragment_timeout_secs == 0 {
            anyhow::bail!("stream.first_fragment_timeout_secs must be greater than 0");
        }
        if self.stream.total_timeout_secs == 0 {
            anyhow::bail!("stream.total_timeout_secs must be greater than 0");
        }
        if self.stream.channel_capacity == 0 {
            anyhow::bail!("stream.channel_capacity must be greater than 0");
        }

        Ok(())
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        // API key: AI_MODEL_KEY (legacy deployment name), FLORENTINE_API_KEY or API_KEY
        if let Some(key) = env_non_empty(&["AI_MODEL_KEY", "FLORENTINE_API_KEY", "API_KEY"]) {
            self.api_key = Some(key);
        }

        // Endpoint: AI_MODEL_ENDPOINT or FLORENTINE_API_URL
        if let Some(url) = env_non_empty(&["AI_MODEL_ENDPOINT", "FLORENTINE_API_URL"]) {
            self.api_url = Some(url);
        }

        if let Some(provider) = env_non_empty(&["FLORENTINE_PROVIDER"]) {
            self.default_provider = provider;
        }

        if let Some(model) = env_non_empty(&["FLORENTINE_MODEL"]) {
            self.default_model = model;
        }

        // Gateway port: FLORENTINE_GATEWAY_PORT or PORT
        if let Some(port_str) = env_non_empty(&["FLORENTINE_GATEWAY_PORT", "PORT"]) {
            match port_str.parse::<u16>() {
                Ok(port) => self.gateway.port = port,
                Err(_) => tracing::warn!(value = %port_str, "Ignoring invalid gateway port override"),
            }
        }

        // Gateway host: FLORENTINE_GATEWAY_HOST or HOST
        if let Some(host) = env_non_empty(&["FLORENTINE_GATEWAY_HOST", "HOST"]) {
            self.gateway.host = host;
        }

        if let Some(dir) = env_non_empty(&["FLORENTINE_STATIC_DIR"]) {
            self.gateway.static_dir = Some(dir);
        }

        // Temperature: FLORENTINE_TEMPERATURE
        if let Some(temp_str) = env_non_empty(&["FLORENTINE_TEMPERATURE"]) {
            if let Ok(temp) = temp_str.parse::<f64>() {
                if (0.0..=2.0).contains(&temp) {
                    self.default_temperature = temp;
                }
            }
        }
    }

    pub async fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let parent_dir = self
            .config_path
            .parent()
            .context("Config path must have a parent directory")?;

        fs::create_dir_all(parent_dir).await.with_context(|| {
            format!(
                "Failed to create config directory: {}",
                parent_dir.display()
            )
        })?;

        let file_name = self
            .config_path
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or(CONFIG_FILE_NAME);
        let temp_path = parent_dir.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));

        let mut temp_file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to create temporary config file: {}",
                    temp_path.display()
                )
            })?;
        temp_file
            .write_all(toml_str.as_bytes())
            .await
            .context("Failed to write temporary config contents")?;
        temp_file
            .sync_all()
            .await
            .context("Failed to fsync temporary config file")?;
        drop(temp_file);

        // Restrict permissions before the file becomes visible (may contain API keys)
        #[cfg(unix)]
        {
            use std::{fs::Permissions, os::unix::fs::PermissionsExt};
            let _ = fs::set_permissions(&temp_path, Permissions::from_mode(0o600)).await;
        }

        if let Err(e) = fs::rename(&temp_path, &self.config_path).await {
            let _ = fs::remove_file(&temp_path).await;
            anyhow::bail!("Failed to atomically replace config file: {e}");
        }

        sync_directory(parent_dir).await?;
        Ok(())
    }

    /// `api_key` for display, keeping only the last four characters.
    pub fn masked_api_key(&self) -> String {
        match self.api_key.as_deref() {
            None | Some("") => "(not set)".into(),
            Some(key) => {
                let tail: String = key
                    .chars()
                    .rev()
                    .take(4)
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect();
                format!("****{tail}")
            }
        }
    }
}

async fn sync_directory(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let dir = File::open(path)
            .await
            .with_context(|| format!("Failed to open directory for fsync: {}", path.display()))?;
        dir.sync_all()
            .await
            .with_context(|| format!("Failed to fsync directory metadata: {}", path.display()))?;
        Ok(())
    }

    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}
