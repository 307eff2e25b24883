//! Service configuration.
//!
//! Non-secret settings (bind address, database path, provider endpoints) come
//! from a TOML file. Client credentials and the token encryption key come from
//! environment variables only and are required at startup.

use serde::Deserialize;

/// Complete credlink configuration (TOML file)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub provider: ProviderEndpoints,
    #[serde(default)]
    pub oauth_state: StateConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the API server to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// When false, all requests act on behalf of the "default" user
    /// (local development only)
    #[serde(default = "default_auth_enabled")]
    pub auth_enabled: bool,
    /// Shared secret required to mint sessions via POST /api/sessions.
    /// None disables the session endpoint guard.
    #[serde(default)]
    pub session_admin_token: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_auth_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            auth_enabled: default_auth_enabled(),
            session_admin_token: None,
        }
    }
}

/// Credential storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database holding encrypted connections
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "connections.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// External provider endpoints (the OAuth2 authorization server)
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEndpoints {
    /// Authorization (consent screen) URL
    #[serde(default)]
    pub auth_url: String,
    /// Token exchange endpoint URL
    #[serde(default)]
    pub token_url: String,
    /// OAuth scopes requested at authorization
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Timeout for calls to the token endpoint (seconds)
    #[serde(default = "default_provider_timeout")]
    pub timeout_seconds: u64,
}

fn default_provider_timeout() -> u64 {
    10
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            auth_url: String::new(),
            token_url: String::new(),
            scopes: Vec::new(),
            timeout_seconds: default_provider_timeout(),
        }
    }
}

/// CSRF state lifetime configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    /// How long a pending authorization state remains valid (seconds)
    #[serde(default = "default_state_ttl")]
    pub ttl_seconds: i64,
    /// How often expired states are swept (seconds)
    #[serde(default = "default_state_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
}

fn default_state_ttl() -> i64 {
    600
}

fn default_state_cleanup_interval() -> u64 {
    60
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_state_ttl(),
            cleanup_interval_seconds: default_state_cleanup_interval(),
        }
    }
}

/// Configuration errors that abort startup
#[derive(Debug, PartialEq)]
pub enum ConfigError {
    /// Required environment variable is not set
    MissingVar(&'static str),
    /// Environment variable is set but unusable
    InvalidVar(&'static str, String),
    /// TOML file setting is missing or unusable
    InvalidSetting(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVar(var) => {
                write!(f, "required environment variable {} is not set", var)
            }
            ConfigError::InvalidVar(var, reason) => {
                write!(f, "environment variable {} is invalid: {}", var, reason)
            }
            ConfigError::InvalidSetting(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Secrets loaded from the environment.
///
/// Missing any of the first four is a fatal startup error, not a per-request
/// failure. The encryption key itself is validated when the cipher is built.
#[derive(Clone)]
pub struct Secrets {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub token_encryption_key: String,
    pub expiry_buffer_seconds: i64,
}

const ENV_CLIENT_ID: &str = "CREDLINK_CLIENT_ID";
const ENV_CLIENT_SECRET: &str = "CREDLINK_CLIENT_SECRET";
const ENV_REDIRECT_URI: &str = "CREDLINK_REDIRECT_URI";
const ENV_ENCRYPTION_KEY: &str = "CREDLINK_TOKEN_ENCRYPTION_KEY";
const ENV_EXPIRY_BUFFER: &str = "CREDLINK_EXPIRY_BUFFER_SECONDS";

fn require_var(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingVar(name)),
    }
}

impl Secrets {
    /// Load secrets from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let expiry_buffer_seconds = match std::env::var(ENV_EXPIRY_BUFFER) {
            Ok(value) => value.parse::<i64>().map_err(|e| {
                ConfigError::InvalidVar(ENV_EXPIRY_BUFFER, format!("not an integer: {}", e))
            })?,
            Err(_) => 60,
        };

        Ok(Self {
            client_id: require_var(ENV_CLIENT_ID)?,
            client_secret: require_var(ENV_CLIENT_SECRET)?,
            redirect_uri: require_var(ENV_REDIRECT_URI)?,
            token_encryption_key: require_var(ENV_ENCRYPTION_KEY)?,
            expiry_buffer_seconds,
        })
    }
}

/// Provider endpoints plus client credentials, assembled at startup.
///
/// Deliberately does not derive Debug: the client secret must never end up in
/// logs.
#[derive(Clone)]
pub struct ProviderConfig {
    pub auth_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl ProviderConfig {
    /// Combine TOML endpoints with environment credentials.
    pub fn assemble(endpoints: &ProviderEndpoints, secrets: &Secrets) -> Result<Self, ConfigError> {
        if endpoints.auth_url.trim().is_empty() {
            return Err(ConfigError::InvalidSetting(
                "provider.auth_url is not set".to_string(),
            ));
        }
        if endpoints.token_url.trim().is_empty() {
            return Err(ConfigError::InvalidSetting(
                "provider.token_url is not set".to_string(),
            ));
        }

        Ok(Self {
            auth_url: endpoints.auth_url.clone(),
            token_url: endpoints.token_url.clone(),
            scopes: endpoints.scopes.clone(),
            client_id: secrets.client_id.clone(),
            client_secret: secrets.client_secret.clone(),
            redirect_uri: secrets.redirect_uri.clone(),
        })
    }

    /// Build the authorization URL the user is redirected to.
    pub fn build_auth_url(&self, state: &str) -> String {
        let scopes = self.scopes.join(" ");
        format!(
            "{}?client_id={}&redirect_uri={}&scope={}&state={}&response_type=code",
            self.auth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&scopes),
            urlencoding::encode(state)
        )
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> anyhow::Result<ServiceConfig> {
    let contents = std::fs::read_to_string(path)?;
    let config: ServiceConfig = toml::from_str(&contents)?;
    Ok(config)
}
