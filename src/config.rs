use once_cell::sync::Lazy;
use regex::Regex;
use secrecy::SecretString;
use serde::Deserialize;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: &str = "27017";
pub const DEFAULT_AUTH_DATABASE: &str = "admin";
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_POOL_SIZE: u32 = 100;
pub const DEFAULT_MAX_CONNECTING: u32 = 2;

pub const ENV_HOST: &str = "MONGO_HOST";
pub const ENV_PORT: &str = "MONGO_PORT";
pub const ENV_USERNAME: &str = "MONGO_USR";
pub const ENV_PASSWORD: &str = "MONGO_PWD";
pub const ENV_CERTIFICATE: &str = "MONGODB_CERT";

static SOCKS_PROXY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^socks5h?://.*:\d+$").expect("Invalid socks proxy regex"));

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed parsing pem file: {0}")]
    Certificate(String),

    #[error("The proxy URL is not a valid socks url: {0}")]
    InvalidProxy(String),

    #[error("Invalid read preference '{0}'. Valid values: primary, primaryPreferred, secondary, secondaryPreferred, nearest")]
    InvalidReadPreference(String),

    #[error("Missing required setting '{attribute}'. Set it in the provider block or through the {env} environment variable")]
    MissingSetting {
        attribute: &'static str,
        env: &'static str,
    },

    #[error("Setting '{attribute}' must be a non-negative number, got {value}")]
    InvalidNumber { attribute: &'static str, value: i64 },

    #[error("Failed to read configuration file {path}: {message}")]
    File { path: String, message: String },
}

impl ConfigError {
    /// Provider attribute the error refers to, if any.
    pub fn attribute(&self) -> Option<&'static str> {
        match self {
            ConfigError::Certificate(_) => Some("certificate"),
            ConfigError::InvalidProxy(_) => Some("proxy"),
            ConfigError::InvalidReadPreference(_) => Some("read_preference"),
            ConfigError::MissingSetting { attribute, .. } => Some(*attribute),
            ConfigError::InvalidNumber { attribute, .. } => Some(*attribute),
            ConfigError::File { .. } => None,
        }
    }
}

/// Read preference modes accepted by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPreferenceMode {
    Primary,
    PrimaryPreferred,
    Secondary,
    #[default]
    SecondaryPreferred,
    Nearest,
}

impl ReadPreferenceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadPreferenceMode::Primary => "primary",
            ReadPreferenceMode::PrimaryPreferred => "primaryPreferred",
            ReadPreferenceMode::Secondary => "secondary",
            ReadPreferenceMode::SecondaryPreferred => "secondaryPreferred",
            ReadPreferenceMode::Nearest => "nearest",
        }
    }
}

impl Display for ReadPreferenceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadPreferenceMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(ReadPreferenceMode::Primary),
            "primaryPreferred" => Ok(ReadPreferenceMode::PrimaryPreferred),
            "secondary" => Ok(ReadPreferenceMode::Secondary),
            "secondaryPreferred" => Ok(ReadPreferenceMode::SecondaryPreferred),
            "nearest" => Ok(ReadPreferenceMode::Nearest),
            _ => Err(ConfigError::InvalidReadPreference(s.to_string())),
        }
    }
}

/// Check a practitioner-supplied proxy URL against the accepted socks form.
pub fn validate_proxy_url(proxy: &str) -> Result<(), ConfigError> {
    if SOCKS_PROXY_REGEX.is_match(proxy) {
        Ok(())
    } else {
        Err(ConfigError::InvalidProxy(proxy.to_string()))
    }
}

/// Environment lookup that treats empty variables as unset.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

/// Provider settings as declared by the practitioner.
///
/// Every field is optional: unset values fall back to the environment and then
/// to built-in defaults when the settings are resolved into a [`ClientConfig`].
/// Field names match the Terraform provider attributes, so the same shape is
/// accepted from a JSON file by the command line.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderSettings {
    pub host: Option<String>,
    pub port: Option<String>,
    pub certificate: Option<String>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub auth_database: Option<String>,
    pub replica_set: Option<String>,
    pub replica_set_hosts: Option<String>,
    pub insecure_skip_verify: Option<bool>,
    pub ssl: Option<bool>,
    pub direct: Option<bool>,
    pub retrywrites: Option<bool>,
    pub proxy: Option<String>,
    pub timeout: Option<i64>,
    pub connect_timeout: Option<i64>,
    pub server_selection_timeout: Option<i64>,
    pub read_preference: Option<String>,
    pub max_pool_size: Option<i64>,
    pub max_connecting: Option<i64>,
}

impl ProviderSettings {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::File {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| ConfigError::File {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Validate the values that were set explicitly.
    ///
    /// Unset values are not checked here; they are resolved later and may come
    /// from the environment.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if let Some(proxy) = self.proxy.as_deref().filter(|p| !p.is_empty()) {
            if let Err(e) = validate_proxy_url(proxy) {
                errors.push(e);
            }
        }
        if let Some(read_preference) = &self.read_preference {
            if let Err(e) = read_preference.parse::<ReadPreferenceMode>() {
                errors.push(e);
            }
        }
        for (attribute, value) in [
            ("timeout", self.timeout),
            ("connect_timeout", self.connect_timeout),
            ("server_selection_timeout", self.server_selection_timeout),
            ("max_pool_size", self.max_pool_size),
            ("max_connecting", self.max_connecting),
        ] {
            if let Some(value) = value.filter(|v| *v < 0) {
                errors.push(ConfigError::InvalidNumber { attribute, value });
            }
        }

        errors
    }

    /// Resolve against the process environment.
    pub fn resolve(self) -> Result<ClientConfig, ConfigError> {
        self.resolve_with(process_env)
    }

    /// Resolve the settings, consulting `env` for unset values.
    pub fn resolve_with<F>(self, env: F) -> Result<ClientConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(e) = self.validate().into_iter().next() {
            return Err(e);
        }

        let username = self
            .username
            .or_else(|| env(ENV_USERNAME))
            .ok_or(ConfigError::MissingSetting {
                attribute: "username",
                env: ENV_USERNAME,
            })?;
        let password = self
            .password
            .or_else(|| env(ENV_PASSWORD).map(SecretString::from))
            .ok_or(ConfigError::MissingSetting {
                attribute: "password",
                env: ENV_PASSWORD,
            })?;

        let read_preference = match self.read_preference {
            Some(mode) => mode.parse()?,
            None => ReadPreferenceMode::default(),
        };

        Ok(ClientConfig {
            host: self
                .host
                .or_else(|| env(ENV_HOST))
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: self
                .port
                .or_else(|| env(ENV_PORT))
                .unwrap_or_else(|| DEFAULT_PORT.to_string()),
            username,
            password,
            auth_database: self
                .auth_database
                .unwrap_or_else(|| DEFAULT_AUTH_DATABASE.to_string()),
            ssl: self.ssl.unwrap_or(false),
            insecure_skip_verify: self.insecure_skip_verify.unwrap_or(false),
            replica_set: non_empty(self.replica_set),
            replica_set_hosts: non_empty(self.replica_set_hosts),
            retry_writes: self.retrywrites.unwrap_or(true),
            certificate: non_empty(self.certificate.or_else(|| env(ENV_CERTIFICATE))),
            direct: self.direct.unwrap_or(false),
            proxy: non_empty(self.proxy),
            timeout_ms: as_u64(self.timeout, DEFAULT_TIMEOUT_MS),
            connect_timeout_ms: as_u64(self.connect_timeout, DEFAULT_CONNECT_TIMEOUT_MS),
            server_selection_timeout_ms: self
                .server_selection_timeout
                .filter(|ms| *ms > 0)
                .map(|ms| ms as u64),
            read_preference,
            max_pool_size: as_u32(self.max_pool_size, DEFAULT_MAX_POOL_SIZE),
            max_connecting: as_u32(self.max_connecting, DEFAULT_MAX_CONNECTING),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

// Negative values are rejected by `validate` before these run.
fn as_u64(value: Option<i64>, default: u64) -> u64 {
    value.map(|v| v.max(0) as u64).unwrap_or(default)
}

fn non_zero_millis(millis: u64) -> Option<Duration> {
    (millis > 0).then(|| Duration::from_millis(millis))
}

fn as_u32(value: Option<i64>, default: u32) -> u32 {
    value
        .map(|v| v.clamp(0, u32::MAX as i64) as u32)
        .unwrap_or(default)
}

/// Fully resolved connection options. Built once per provider configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: String,
    pub username: String,
    pub password: SecretString,
    pub auth_database: String,
    pub ssl: bool,
    pub insecure_skip_verify: bool,
    pub replica_set: Option<String>,
    pub replica_set_hosts: Option<String>,
    pub retry_writes: bool,
    pub certificate: Option<String>,
    pub direct: bool,
    pub proxy: Option<String>,
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub server_selection_timeout_ms: Option<u64>,
    pub read_preference: ReadPreferenceMode,
    pub max_pool_size: u32,
    pub max_connecting: u32,
}

impl ClientConfig {
    /// Deadline applied to every administrative command. A zero timeout means none.
    pub fn operation_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.timeout_ms)
    }

    /// Deadline for the initial connect and ping.
    pub fn init_deadline(&self) -> Option<Duration> {
        non_zero_millis(self.timeout_ms.saturating_add(self.connect_timeout_ms))
    }

    /// Seed hosts (without ports) the client will dial.
    pub fn seed_hosts(&self) -> Vec<String> {
        match &self.replica_set_hosts {
            Some(hosts) => hosts
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(|h| strip_port(h).to_string())
                .collect(),
            None => vec![self.host.clone()],
        }
    }

    /// Combinations that are passed through unchanged but have no defined behavior.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.proxy.is_some() && self.certificate.is_some() && self.replica_set_hosts.is_some()
        {
            warnings.push(
                "proxy, certificate and replica_set_hosts are set together; \
                 this combination is passed to the driver without further validation"
                    .to_string(),
            );
        }
        if self.direct && self.seed_hosts().len() > 1 {
            warnings.push(
                "direct is set with several replica_set_hosts; the driver only accepts a single seed for direct connections"
                    .to_string(),
            );
        }
        warnings
    }
}

fn strip_port(host: &str) -> &str {
    // [::1]:27017
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}
