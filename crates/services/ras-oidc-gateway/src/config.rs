//! Gateway configuration
//!
//! Sources, lowest precedence first:
//! - Built-in defaults
//! - Configuration file (`gateway.toml`, or `GATEWAY_CONFIG_FILE`)
//! - Environment variables with the `GATEWAY__` prefix, e.g. `GATEWAY__SERVER__PORT`
//! - Legacy variables (`OAUTH_CALLBACK_URL`, `AUTHORIZED_URL`, `SESSION_SECRET`, ...)

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File};
use ras_identity_oidc::{OidcConfig, ProviderConfig};
use ras_identity_session::{CookieMode, DEFAULT_COOKIE_NAME, DEFAULT_SECRET, SessionConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, info, warn};
use url::Url;

/// Main configuration struct for the gateway
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,

    /// Login flow settings
    pub oidc: OidcSettings,

    /// Session cookie settings
    pub session: SessionSettings,

    pub logging: LoggingConfig,

    /// Identity providers keyed by the name used in `/login/{name}`
    pub providers: HashMap<String, ProviderConfig>,
}

/// Server network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to (default: 127.0.0.1)
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to bind to (default: 3000)
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OidcSettings {
    /// Public base URL of this gateway; providers redirect to `{base}/auth/{name}`
    #[serde(default = "default_callback_base_url")]
    pub callback_base_url: String,

    /// Where the browser goes after a successful login
    #[serde(default = "default_post_login_url")]
    pub post_login_url: String,

    #[serde(default = "default_state_ttl")]
    pub state_ttl_seconds: u64,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,

    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_clock_leeway")]
    pub clock_leeway_seconds: u64,

    /// JWKS lifetime when the provider sends no usable Cache-Control
    #[serde(default = "default_jwks_max_age")]
    pub jwks_default_max_age_seconds: u64,

    #[serde(default = "default_jwks_forced_refresh")]
    pub jwks_forced_refresh_seconds: u64,

    /// How often expired login states and sessions are swept
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// HMAC key for session reference tokens
    #[serde(default = "default_session_secret")]
    pub secret: String,

    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    #[serde(default)]
    pub cookie_mode: CookieMode,

    #[serde(default = "default_true")]
    pub http_only: bool,

    #[serde(default = "default_true")]
    pub secure: bool,

    #[serde(default)]
    pub domain: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter string
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json, compact)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Whether to include target module
    #[serde(default = "default_true")]
    pub target: bool,

    #[serde(default)]
    pub line_numbers: bool,

    #[serde(default)]
    pub thread_ids: bool,
}

// Default value functions
fn default_host() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn default_port() -> u16 {
    3000
}

fn default_true() -> bool {
    true
}

fn default_callback_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_post_login_url() -> String {
    "http://localhost:3000/".to_string()
}

fn default_state_ttl() -> u64 {
    600 // 10 minutes
}

fn default_http_timeout() -> u64 {
    5
}

fn default_retry_backoff() -> u64 {
    250
}

fn default_clock_leeway() -> u64 {
    60
}

fn default_jwks_max_age() -> u64 {
    300
}

fn default_jwks_forced_refresh() -> u64 {
    30
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_session_secret() -> String {
    DEFAULT_SECRET.to_string()
}

fn default_cookie_name() -> String {
    DEFAULT_COOKIE_NAME.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for OidcSettings {
    fn default() -> Self {
        Self {
            callback_base_url: default_callback_base_url(),
            post_login_url: default_post_login_url(),
            state_ttl_seconds: default_state_ttl(),
            http_timeout_seconds: default_http_timeout(),
            retry_backoff_ms: default_retry_backoff(),
            clock_leeway_seconds: default_clock_leeway(),
            jwks_default_max_age_seconds: default_jwks_max_age(),
            jwks_forced_refresh_seconds: default_jwks_forced_refresh(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            secret: default_session_secret(),
            cookie_name: default_cookie_name(),
            cookie_mode: CookieMode::default(),
            http_only: true,
            secure: true,
            domain: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: true,
            line_numbers: false,
            thread_ids: false,
        }
    }
}

impl Config {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self> {
        let config_path =
            std::env::var("GATEWAY_CONFIG_FILE").unwrap_or_else(|_| "gateway.toml".to_string());
        Self::load_from(Path::new(&config_path))
    }

    /// Load using a specific config file path. A missing file is not an error.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if config_path.exists() {
            info!("Loading configuration from {}", config_path.display());
            builder = builder.add_source(File::from(config_path));
        } else {
            debug!(
                "No config file found at {}, using defaults",
                config_path.display()
            );
        }

        builder = builder.add_source(
            Environment::with_prefix("GATEWAY")
                .separator("__") // GATEWAY__OIDC__POST_LOGIN_URL
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut settings: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        settings.apply_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;

        Ok(settings)
    }

    /// Apply the flat environment variables the service has always read
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("HOST") {
            info!("Using HOST environment variable");
            self.server.host = host.parse().context("Invalid HOST value")?;
        }

        if let Some(port) = lookup("PORT") {
            info!("Using PORT environment variable");
            self.server.port = port.parse().context("Invalid PORT value")?;
        }

        if let Some(callback) = lookup("OAUTH_CALLBACK_URL") {
            info!("Using OAUTH_CALLBACK_URL environment variable");
            self.oidc.callback_base_url = callback_base(&callback);
        }

        if let Some(url) = lookup("AUTHORIZED_URL") {
            info!("Using AUTHORIZED_URL environment variable");
            self.oidc.post_login_url = url;
        }

        if let Some(secret) = lookup("SESSION_SECRET").or_else(|| lookup("FLASK_SECRET")) {
            info!("Using session secret from environment");
            self.session.secret = secret;
        }

        if let Some(client_id) = lookup("GOOGLE_CLIENT_ID") {
            info!("Using GOOGLE_CLIENT_ID environment variable");
            let client_secret = lookup("GOOGLE_CLIENT_SECRET").unwrap_or_default();
            let google = self
                .providers
                .entry("google".to_string())
                .or_insert_with(|| ProviderConfig::google("", ""));
            google.client_id = client_id;
            if !client_secret.is_empty() {
                google.client_secret = client_secret;
            }
        }

        if let Some(log_level) = lookup("RUST_LOG") {
            info!("Using RUST_LOG environment variable");
            self.logging.level = log_level;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.session.secret.is_empty() {
            anyhow::bail!("Session secret cannot be empty");
        }

        if !cfg!(debug_assertions) && self.session.secret == DEFAULT_SECRET {
            anyhow::bail!("Session secret must be changed from default in production");
        }

        if self.session.secret == DEFAULT_SECRET {
            warn!("Using default session secret - this is insecure for production!");
        }

        if self.session.cookie_name.is_empty() {
            anyhow::bail!("Session cookie name cannot be empty");
        }

        Url::parse(&self.oidc.callback_base_url).with_context(|| {
            format!(
                "Invalid callback base URL '{}'",
                self.oidc.callback_base_url
            )
        })?;
        Url::parse(&self.oidc.post_login_url)
            .with_context(|| format!("Invalid post-login URL '{}'", self.oidc.post_login_url))?;

        if self.oidc.state_ttl_seconds == 0 {
            anyhow::bail!("State TTL must be greater than 0");
        }

        if self.oidc.http_timeout_seconds == 0 {
            anyhow::bail!("HTTP timeout must be greater than 0");
        }

        if self.oidc.sweep_interval_seconds == 0 {
            anyhow::bail!("Sweep interval must be greater than 0");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        let level_lower = self.logging.level.to_lowercase();
        if !self.has_filter_directives() && !valid_levels.contains(&level_lower.as_str()) {
            anyhow::bail!(
                "Invalid log level '{}'. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            );
        }

        let valid_formats = ["pretty", "json", "compact"];
        let format_lower = self.logging.format.to_lowercase();
        if !valid_formats.contains(&format_lower.as_str()) {
            anyhow::bail!(
                "Invalid log format '{}'. Must be one of: {:?}",
                self.logging.format,
                valid_formats
            );
        }

        if self.providers.is_empty() {
            anyhow::bail!("At least one identity provider must be configured");
        }

        for (name, provider) in &self.providers {
            if provider.client_id.trim().is_empty() {
                anyhow::bail!("Provider '{}' has no client_id", name);
            }
        }

        Ok(())
    }

    /// Get the socket address for the server
    pub fn socket_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::from((self.server.host, self.server.port))
    }

    /// Get the log filter string for tracing
    pub fn log_filter(&self) -> String {
        if self.has_filter_directives() {
            self.logging.level.clone()
        } else {
            format!(
                "ras_oidc_gateway={lvl},ras_identity_oidc={lvl},ras_identity_session={lvl},tower_http={lvl},{lvl}",
                lvl = self.logging.level
            )
        }
    }

    fn has_filter_directives(&self) -> bool {
        self.logging.level.contains('=') || self.logging.level.contains(',')
    }

    /// Settings for the OIDC client. Provider names come from the table keys.
    pub fn oidc_config(&self) -> OidcConfig {
        let providers = self
            .providers
            .iter()
            .map(|(name, provider)| {
                let mut provider = provider.clone();
                provider.name = name.clone();
                (name.clone(), provider)
            })
            .collect();

        OidcConfig {
            providers,
            callback_base_url: self.oidc.callback_base_url.clone(),
            state_ttl_seconds: self.oidc.state_ttl_seconds,
            http_timeout_seconds: self.oidc.http_timeout_seconds,
            retry_backoff_ms: self.oidc.retry_backoff_ms,
            clock_leeway_seconds: self.oidc.clock_leeway_seconds,
            jwks_default_max_age_seconds: self.oidc.jwks_default_max_age_seconds,
            jwks_forced_refresh_seconds: self.oidc.jwks_forced_refresh_seconds,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            secret: self.session.secret.clone(),
            cookie_name: self.session.cookie_name.clone(),
            cookie_mode: self.session.cookie_mode,
            http_only: self.session.http_only,
            secure: self.session.secure,
            domain: self.session.domain.clone(),
            min_lifetime_seconds: self.oidc.clock_leeway_seconds as i64,
            ..SessionConfig::default()
        }
    }
}

/// `OAUTH_CALLBACK_URL` historically held the full callback URL
/// (`https://host/auth/google`); reduce it to the base.
fn callback_base(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    match trimmed.rfind("/auth/") {
        Some(idx) => trimmed[..idx].to_string(),
        None => trimmed.to_string(),
    }
}
