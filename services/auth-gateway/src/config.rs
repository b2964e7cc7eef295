//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The proxy secret is loaded from AUTH_GATEWAY_PROXY_SECRET or
//! proxy_secret_file, never stored in the TOML directly.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use oauth::ReplayPolicy;

pub const PROXY_SECRET_ENV: &str = "AUTH_GATEWAY_PROXY_SECRET";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub api_keys: ApiKeysConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
}

/// Listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    File,
}

#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Required for the file backend
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub code_ttl_secs: u64,
    pub access_token_ttl_secs: u64,
    pub refresh_token_ttl_secs: u64,
    pub allow_plain_pkce: bool,
    pub on_replay: ReplayPolicy,
    pub purge_interval_secs: u64,
    pub purge_retention_secs: u64,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            code_ttl_secs: oauth::constants::DEFAULT_CODE_TTL.as_secs(),
            access_token_ttl_secs: oauth::constants::DEFAULT_ACCESS_TOKEN_TTL.as_secs(),
            refresh_token_ttl_secs: oauth::constants::DEFAULT_REFRESH_TOKEN_TTL.as_secs(),
            allow_plain_pkce: true,
            on_replay: ReplayPolicy::RevokeTokens,
            purge_interval_secs: 300,
            purge_retention_secs: 3600,
        }
    }
}

impl OAuthConfig {
    pub fn code_ttl(&self) -> Duration {
        Duration::from_secs(self.code_ttl_secs)
    }

    pub fn access_token_ttl(&self) -> Duration {
        Duration::from_secs(self.access_token_ttl_secs)
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_token_ttl_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }

    pub fn purge_retention(&self) -> Duration {
        Duration::from_secs(self.purge_retention_secs)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ApiKeysConfig {
    /// 0 means keys never expire unless a policy says otherwise
    pub default_max_age_secs: u64,
    pub default_grace_period_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for ApiKeysConfig {
    fn default() -> Self {
        Self {
            default_max_age_secs: 90 * 24 * 3600,
            default_grace_period_secs: 7 * 24 * 3600,
            sweep_interval_secs: 60,
        }
    }
}

impl ApiKeysConfig {
    pub fn policy_defaults(&self) -> api_keys::PolicyDefaults {
        api_keys::PolicyDefaults {
            max_age: (self.default_max_age_secs > 0)
                .then(|| Duration::from_secs(self.default_max_age_secs)),
            grace_period: Duration::from_secs(self.default_grace_period_secs),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// How the authenticated subject reaches `/oauth/authorize`
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Header set by the login front-end carrying the subject id
    pub subject_header: String,
    #[serde(skip)]
    pub proxy_secret: Option<Secret<String>>,
    /// Path to a file containing the proxy secret (alternative to the env var)
    pub proxy_secret_file: Option<PathBuf>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            subject_header: "x-authenticated-subject".into(),
            proxy_secret: None,
            proxy_secret_file: None,
        }
    }
}

fn default_max_connections() -> usize {
    1000
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Proxy secret resolution order:
    /// 1. AUTH_GATEWAY_PROXY_SECRET env var
    /// 2. proxy_secret_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        let env_secret = std::env::var(PROXY_SECRET_ENV)
            .ok()
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty());
        if let Some(secret) = env_secret {
            config.identity.proxy_secret = Some(Secret::new(secret));
        } else if let Some(ref secret_file) = config.identity.proxy_secret_file {
            let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read proxy_secret_file {}: {e}",
                    secret_file.display()
                ))
            })?;
            let secret = secret.trim().to_owned();
            if !secret.is_empty() {
                config.identity.proxy_secret = Some(Secret::new(secret));
            }
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if self.store.backend == StoreBackend::File && self.store.path.is_none() {
            return Err(common::Error::Config(
                "store.path is required for the file backend".into(),
            ));
        }

        let oauth = &self.oauth;
        let max_code_ttl = oauth::constants::MAX_CODE_TTL.as_secs();
        if oauth.code_ttl_secs == 0 || oauth.code_ttl_secs > max_code_ttl {
            return Err(common::Error::Config(format!(
                "code_ttl_secs must be between 1 and {max_code_ttl}"
            )));
        }
        if oauth.access_token_ttl_secs == 0 {
            return Err(common::Error::Config(
                "access_token_ttl_secs must be greater than 0".into(),
            ));
        }
        if oauth.refresh_token_ttl_secs <= oauth.access_token_ttl_secs {
            return Err(common::Error::Config(
                "refresh_token_ttl_secs must exceed access_token_ttl_secs".into(),
            ));
        }
        if oauth.purge_interval_secs == 0 {
            return Err(common::Error::Config(
                "purge_interval_secs must be greater than 0".into(),
            ));
        }

        if self.api_keys.sweep_interval_secs == 0 {
            return Err(common::Error::Config(
                "sweep_interval_secs must be greater than 0".into(),
            ));
        }

        let header = &self.identity.subject_header;
        if header.is_empty()
            || !header
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        {
            return Err(common::Error::Config(format!(
                "subject_header must be a lowercase header name, got: {header:?}"
            )));
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("auth-gateway.toml")
    }
}
