//! Configuration manager for Shanyraq.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEFAULT_ADDRESS: &str = "0.0.0.0:8080";
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Domain name of current instance. Used as token issuer.
    pub url: String,
    /// Socket address the HTTP server binds to.
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to JsonWebToken configuration.
    #[serde(default, skip_serializing)]
    pub token: Token,
    /// Related to PostgreSQL configuration.
    #[serde(skip_serializing)]
    pub postgres: Option<Postgres>,
    /// Related to Argon2 configuration.
    #[serde(skip_serializing)]
    pub argon2: Option<Argon2>,
    /// Related to automatic mail sending.
    #[serde(skip_serializing)]
    pub mail: Option<Mail>,
    /// Related to logout revocation list.
    #[serde(default, skip_serializing)]
    pub revocation: Revocation,
}

fn default_address() -> String {
    DEFAULT_ADDRESS.to_owned()
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_owned(),
            url: "http://localhost".to_owned(),
            address: default_address(),
            version: VERSION.to_owned(),
            path: PathBuf::default(),
            token: Token::default(),
            postgres: None,
            argon2: None,
            mail: None,
            revocation: Revocation::default(),
        }
    }
}

/// PostgreSQL configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Postgres {
    /// Hostname:(?port) for PostgreSQL instance.
    pub address: String,
    /// Database name.
    pub database: Option<String>,
    /// Username credential to connect.
    pub username: Option<String>,
    /// Password credential to connect.
    pub password: Option<String>,
    /// Maximum pool connections.
    pub pool_size: Option<u32>,
}

/// Argon2 configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Argon2 {
    /// Memory used while hashing.
    pub memory_cost: u32,
    /// Iterations of hash.
    pub iterations: u32,
    /// Parallelism degree.
    pub parallelism: u32,
    /// Output hash length.
    pub hash_length: usize,
}

impl Default for Argon2 {
    fn default() -> Self {
        Self {
            memory_cost: 1024 * 64, // 64 MiB.
            iterations: 4,
            parallelism: 2,
            hash_length: 32,
        }
    }
}

/// Mail queue configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mail {
    /// `amqp://` URL of the RabbitMQ instance.
    pub address: String,
    /// RabbitMQ username to access queue.
    pub username: String,
    /// RabbitMQ password to access queue.
    pub password: String,
    /// Queue name to send mailing events.
    pub queue: String,
    /// Virtual host, `/` when unset.
    pub vhost: Option<String>,
    /// Maximum channels per connection.
    pub pool: Option<u16>,
}

/// Json Web Token configuration.
///
/// Either `secret` (HS256) or the PEM pair (ES256) must be set. The
/// `TOKEN_SECRET` environment variable overrides `secret`.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Token {
    pub secret: Option<String>,
    pub public_key_pem: Option<String>,
    pub private_key_pem: Option<String>,
    /// Update token audience.
    /// Default is `shanyraq`.
    pub audience: Option<String>,
    /// Access token lifetime in seconds.
    #[serde(default = "default_access_ttl")]
    pub access_ttl: u64,
    /// Refresh token lifetime in seconds.
    #[serde(default = "default_refresh_ttl")]
    pub refresh_ttl: u64,
}

fn default_access_ttl() -> u64 {
    60 * 15 // 15 minutes.
}

fn default_refresh_ttl() -> u64 {
    60 * 60 * 24 * 15 // 15 days.
}

impl Default for Token {
    fn default() -> Self {
        Self {
            secret: None,
            public_key_pem: None,
            private_key_pem: None,
            audience: None,
            access_ttl: default_access_ttl(),
            refresh_ttl: default_refresh_ttl(),
        }
    }
}

/// Revoked tokens configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Revocation {
    /// Seconds between two sweeps of expired entries.
    pub sweep_interval: u64,
}

impl Default for Revocation {
    fn default() -> Self {
        Self { sweep_interval: 60 }
    }
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Application version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Normalizes a URL string by ensuring it starts with a valid scheme
    /// (`http` or `https`).
    fn normalize_url(url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("http://") || url.starts_with("https://") {
                url.to_string()
            } else {
                format!("https://{url}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.to_string())
    }

    /// Parse a YAML document and fill derived fields.
    pub fn from_yaml(document: &str) -> Result<Self, ConfigError> {
        let mut config: Configuration = serde_yaml::from_str(document)?;
        config.finish()?;
        Ok(config)
    }

    fn finish(&mut self) -> Result<(), url::ParseError> {
        // set app version.
        self.version = VERSION.to_owned();

        // normalize URLs.
        self.url = Self::normalize_url(&self.url)?;

        if let Ok(secret) = std::env::var("TOKEN_SECRET") {
            if !secret.is_empty() {
                self.token.secret = Some(secret);
            }
        }

        Ok(())
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Result<Arc<Self>, ConfigError> {
        let file_path = if self.path.is_file() {
            self.path.clone()
        } else {
            Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        let document = match std::fs::read_to_string(&file_path) {
            Ok(document) => document,
            Err(err) => return Ok(Arc::new(self.error(err)?)),
        };

        match Self::from_yaml(&document) {
            Ok(config) => Ok(Arc::new(config)),
            Err(ConfigError::Yaml(err)) => Ok(Arc::new(self.error(err)?)),
            Err(err) => Err(err),
        }
    }

    /// Return a default configuration as fallback.
    fn error(
        &self,
        err: impl std::error::Error,
    ) -> Result<Self, url::ParseError> {
        tracing::error!(error = %err, "`config.yaml` file not found or invalid");
        let mut config = Self::default();
        config.finish()?;
        Ok(config)
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Url(#[from] url::ParseError),
}
