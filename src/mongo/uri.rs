//! Connection URI construction.
//!
//! Parameters are appended in a fixed order so the rendered URI is stable for a
//! given configuration. Two renderings exist: the canonical one (what users see
//! in logs and `uri` output) and the driver one, which spells the legacy
//! options the way the Rust driver parses them.

use crate::config::{ClientConfig, ReadPreferenceMode};
use std::fmt::Display;

pub const SCHEME: &str = "mongodb://";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UriParam {
    RetryWrites(bool),
    Ssl,
    ReplicaSet(String),
    DirectConnect,
    Timeout(u64),
    ConnectTimeout(u64),
    ServerSelectionTimeout(u64),
    MaxPoolSize(u32),
    MaxConnecting(u32),
    ReadPreference(ReadPreferenceMode),
}

impl UriParam {
    fn canonical(&self) -> Option<String> {
        Some(match self {
            UriParam::RetryWrites(enabled) => format!("retrywrites={}", enabled),
            UriParam::Ssl => "ssl=true".to_string(),
            UriParam::ReplicaSet(name) => format!("replicaSet={}", name),
            UriParam::DirectConnect => "connect=direct".to_string(),
            UriParam::Timeout(ms) => format!("timeoutMS={}", ms),
            UriParam::ConnectTimeout(ms) => format!("connectTimeoutMS={}", ms),
            UriParam::ServerSelectionTimeout(ms) => format!("serverSelectionTimeoutMS={}", ms),
            UriParam::MaxPoolSize(size) => format!("maxPoolSize={}", size),
            UriParam::MaxConnecting(count) => format!("maxConnecting={}", count),
            UriParam::ReadPreference(mode) => format!("readPreference={}", mode),
        })
    }

    fn driver(&self) -> Option<String> {
        match self {
            UriParam::DirectConnect => Some("directConnection=true".to_string()),
            // Enforced as a per-command deadline instead.
            UriParam::Timeout(_) => None,
            other => other.canonical(),
        }
    }
}

/// A `mongodb://` URI with its query parameters kept in insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionUri {
    hosts: String,
    params: Vec<UriParam>,
}

impl ConnectionUri {
    pub fn new(hosts: impl Into<String>) -> Self {
        Self {
            hosts: hosts.into(),
            params: Vec::new(),
        }
    }

    pub fn push(&mut self, param: UriParam) -> &mut Self {
        self.params.push(param);
        self
    }

    pub fn hosts(&self) -> &str {
        &self.hosts
    }

    pub fn params(&self) -> &[UriParam] {
        &self.params
    }

    pub fn has(&self, param: &UriParam) -> bool {
        self.params.contains(param)
    }

    /// Rendering accepted by `ClientOptions::parse`.
    pub fn to_driver_string(&self) -> String {
        render(&self.hosts, self.params.iter().filter_map(UriParam::driver))
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        let hosts = match &config.replica_set_hosts {
            Some(hosts) => hosts.clone(),
            None => format!("{}:{}", config.host, config.port),
        };
        let mut uri = ConnectionUri::new(hosts);

        uri.push(UriParam::RetryWrites(config.retry_writes));

        if config.ssl {
            uri.push(UriParam::Ssl);
        }

        if let Some(replica_set) = config.replica_set.as_ref().filter(|_| !config.direct) {
            uri.push(UriParam::ReplicaSet(replica_set.clone()));
        }

        if config.direct {
            uri.push(UriParam::DirectConnect);
        }

        uri.push(UriParam::Timeout(config.timeout_ms));
        uri.push(UriParam::ConnectTimeout(config.connect_timeout_ms));

        if let Some(ms) = config.server_selection_timeout_ms {
            uri.push(UriParam::ServerSelectionTimeout(ms));
        }

        uri.push(UriParam::MaxPoolSize(config.max_pool_size));
        uri.push(UriParam::MaxConnecting(config.max_connecting));

        if config.replica_set_hosts.is_some() {
            uri.push(UriParam::ReadPreference(config.read_preference));
        }

        uri
    }
}

impl Display for ConnectionUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&render(
            &self.hosts,
            self.params.iter().filter_map(UriParam::canonical),
        ))
    }
}

fn render(hosts: &str, params: impl Iterator<Item = String>) -> String {
    let mut arguments = String::new();
    for param in params {
        arguments.push_str(if arguments.is_empty() { "/?" } else { "&" });
        arguments.push_str(&param);
    }
    format!("{}{}{}", SCHEME, hosts, arguments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSettings;
    use secrecy::SecretString;

    fn config(settings: ProviderSettings) -> ClientConfig {
        ProviderSettings {
            username: Some("root".to_string()),
            password: Some(SecretString::from("secret")),
            ..settings
        }
        .resolve_with(|_| None)
        .unwrap()
    }

    #[test]
    fn test_default_uri() {
        let uri = ConnectionUri::from_config(&config(ProviderSettings::default()));
        assert_eq!(
            uri.to_string(),
            "mongodb://127.0.0.1:27017/?retrywrites=true&timeoutMS=10000&connectTimeoutMS=30000&maxPoolSize=100&maxConnecting=2"
        );
    }

    #[test]
    fn test_ssl_adds_parameter() {
        let uri = ConnectionUri::from_config(&config(ProviderSettings {
            ssl: Some(true),
            ..Default::default()
        }));
        assert!(uri.has(&UriParam::Ssl));
        assert!(uri.to_string().contains("&ssl=true&"));
    }

    #[test]
    fn test_replica_set_without_direct() {
        let uri = ConnectionUri::from_config(&config(ProviderSettings {
            replica_set: Some("rs0".to_string()),
            ..Default::default()
        }));
        assert!(uri.to_string().contains("replicaSet=rs0"));
        assert!(!uri.to_string().contains("connect=direct"));
    }

    #[test]
    fn test_direct_suppresses_replica_set() {
        let uri = ConnectionUri::from_config(&config(ProviderSettings {
            replica_set: Some("rs0".to_string()),
            direct: Some(true),
            ..Default::default()
        }));
        let rendered = uri.to_string();
        assert!(rendered.contains("connect=direct"));
        assert!(!rendered.contains("replicaSet"));
    }

    #[test]
    fn test_parameter_order() {
        let uri = ConnectionUri::from_config(&config(ProviderSettings {
            retrywrites: Some(false),
            ssl: Some(true),
            replica_set: Some("rs0".to_string()),
            server_selection_timeout: Some(5_000),
            replica_set_hosts: Some("a:27017,b:27017".to_string()),
            read_preference: Some("nearest".to_string()),
            ..Default::default()
        }));
        assert_eq!(
            uri.to_string(),
            "mongodb://a:27017,b:27017/?retrywrites=false&ssl=true&replicaSet=rs0&timeoutMS=10000&connectTimeoutMS=30000&serverSelectionTimeoutMS=5000&maxPoolSize=100&maxConnecting=2&readPreference=nearest"
        );
    }

    #[test]
    fn test_read_preference_only_with_replica_hosts() {
        let uri = ConnectionUri::from_config(&config(ProviderSettings {
            read_preference: Some("primary".to_string()),
            ..Default::default()
        }));
        assert!(!uri.to_string().contains("readPreference"));
    }

    #[test]
    fn test_driver_rendering() {
        let uri = ConnectionUri::from_config(&config(ProviderSettings {
            direct: Some(true),
            ..Default::default()
        }));
        assert_eq!(
            uri.to_driver_string(),
            "mongodb://127.0.0.1:27017/?retrywrites=true&directConnection=true&connectTimeoutMS=30000&maxPoolSize=100&maxConnecting=2"
        );
    }
}
