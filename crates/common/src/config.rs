use std::path::{Path, PathBuf};

use derive_more::{Display, Error, From};
use figment::{
    providers::{Env, Format, Toml},
    Figment, Provider,
};
use serde::Deserialize;

#[cfg(feature = "logging")]
use tracing_subscriber::filter::LevelFilter;

/// Configuration file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "meshctl.toml";

/// Port appended to mesh endpoints that do not specify one.
const DEFAULT_PORT: u16 = 9000;

/// Configuration loading errors.
#[derive(Debug, Display, From, Error)]
pub enum ConfigError {
    /// Unable to load the configuration using [`figment`].
    Figment(figment::Error),

    /// Explicitly requested configuration file does not exist.
    #[display(fmt = "config file not found: {}", "_0.display()")]
    NotFound(#[error(not(source))] PathBuf),

    /// Configuration values are present but unusable.
    #[display(fmt = "invalid configuration: {}", _0)]
    Invalid(#[error(not(source))] &'static str),
}

/// Implementation of [`serde`]'s deserializer for [`FromStr`] types.
///
/// [`FromStr`]: std::str::FromStr
#[cfg(feature = "logging")]
fn deserialize_from_str<'de, T, D>(deserializer: D) -> Result<T, D::Error>
where
    T: std::str::FromStr,
    T::Err: std::error::Error,
    D: serde::de::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    std::str::FromStr::from_str(&s).map_err(serde::de::Error::custom)
}

/// Logging configuration.
#[cfg(feature = "logging")]
#[derive(Debug, Deserialize)]
pub struct Logging {
    /// Log level.
    #[serde(deserialize_with = "deserialize_from_str")]
    pub level: LevelFilter,
}

#[cfg(feature = "logging")]
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::WARN,
        }
    }
}

/// CLI configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Mesh gateway address, `host[:port]` or a full `ws://` URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Shared secret presented to the mesh gateway.
    #[serde(default)]
    pub secret: String,

    /// Serverless tool name commands are addressed to.
    #[serde(default = "default_tool")]
    pub tool: String,

    /// Number of mesh zones expected to answer a command.
    #[serde(default = "default_mesh")]
    pub mesh: u32,

    /// Stop waiting as soon as a zone reports an error.
    #[serde(default = "default_fail_fast")]
    pub fail_fast: bool,

    /// Response deadline for bounded commands, in seconds.
    #[serde(default = "default_deadline")]
    pub deadline: u64,

    /// Interval between `logs` request re-announcements, in seconds.
    #[serde(default = "default_republish_interval")]
    pub republish_interval: u64,

    /// Logging configuration.
    #[cfg(feature = "logging")]
    #[serde(default)]
    pub logging: Logging,
}

// Built-in defaults, overridden by the config file, the environment and flags.
fn default_endpoint() -> String {
    format!("localhost:{DEFAULT_PORT}")
}

fn default_tool() -> String {
    String::from("my_first_llm_tool")
}

fn default_mesh() -> u32 {
    3
}

fn default_fail_fast() -> bool {
    true
}

fn default_deadline() -> u64 {
    15
}

fn default_republish_interval() -> u64 {
    15
}

impl Config {
    /// Load configuration with `flag > environment > file > default` precedence.
    ///
    /// `overrides` carries values given explicitly on the command line. A missing
    /// default config file is not an error, a missing explicit one is.
    /// See [`Env`] for more details on how to use environment variables configuration.
    ///
    /// [`Env`]: figment::providers::Env
    pub fn new(path: Option<&Path>, overrides: impl Provider) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound(path.to_owned())),
            Some(path) => path.to_owned(),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config: Self = Figment::new()
            .merge(Toml::file(file))
            .merge(Env::prefixed("MESHCTL_").split("__"))
            .merge(overrides)
            .extract()?;

        config.validate()?;

        Ok(config)
    }

    /// Reject values the client cannot operate with.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.tool.trim().is_empty() {
            return Err(ConfigError::Invalid("tool name must not be empty"));
        }

        if self.mesh == 0 {
            return Err(ConfigError::Invalid("mesh zone count must be at least 1"));
        }

        if self.deadline == 0 || self.republish_interval == 0 {
            return Err(ConfigError::Invalid("durations must be positive"));
        }

        Ok(())
    }

    /// Mesh endpoint as a WebSocket base URL.
    pub fn endpoint_url(&self) -> String {
        normalize_endpoint(&self.endpoint)
    }
}

/// Ensure the endpoint has a scheme and a port.
///
/// An empty endpoint falls back to the default one.
pub fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');

    let endpoint = if endpoint.is_empty() {
        default_endpoint()
    } else {
        endpoint.to_owned()
    };

    let (scheme, authority) = match endpoint.split_once("://") {
        Some((scheme, rest)) => (scheme.to_owned(), rest.to_owned()),
        None => (String::from("ws"), endpoint),
    };

    let (host, path) = match authority.split_once('/') {
        Some((host, path)) => (host, format!("/{path}")),
        None => (authority.as_str(), String::new()),
    };

    // Bracketed IPv6 hosts carry colons of their own.
    let has_port = match host.rsplit_once(']') {
        Some((_, tail)) => tail.starts_with(':'),
        None => host.contains(':'),
    };

    if has_port {
        format!("{scheme}://{host}{path}")
    } else {
        format!("{scheme}://{host}:{DEFAULT_PORT}{path}")
    }
}
