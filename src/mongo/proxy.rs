use crate::config::{validate_proxy_url, ConfigError};
use mongodb::options::Socks5Proxy;
use std::fmt::Display;
use url::Url;

pub const DEFAULT_SOCKS_PORT: u16 = 1080;

const ENV_ALL_PROXY: [&str; 2] = ["ALL_PROXY", "all_proxy"];
const ENV_NO_PROXY: [&str; 2] = ["NO_PROXY", "no_proxy"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxySource {
    Explicit,
    Environment(&'static str),
}

impl Display for ProxySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxySource::Explicit => write!(f, "provider configuration"),
            ProxySource::Environment(name) => write!(f, "{} environment variable", name),
        }
    }
}

/// SOCKS5 endpoint every connection is tunnelled through.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub host: String,
    pub port: u16,
    pub credentials: Option<(String, String)>,
    pub source: ProxySource,
}

// Keeps the proxy password out of logs.
impl std::fmt::Debug for ProxyEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.credentials.as_ref().map(|(user, _)| user))
            .field("source", &self.source)
            .finish()
    }
}

impl Display for ProxyEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "socks5://{}:{} (from {})", self.host, self.port, self.source)
    }
}

impl ProxyEndpoint {
    pub fn to_driver(&self) -> Socks5Proxy {
        let builder = Socks5Proxy::builder()
            .host(self.host.clone())
            .port(self.port);
        match &self.credentials {
            Some(credentials) => builder.authentication(credentials.clone()).build(),
            None => builder.build(),
        }
    }
}

/// Parse a `socks5://` or `socks5h://` URL.
pub fn parse_proxy_url(raw: &str, source: ProxySource) -> Result<ProxyEndpoint, ConfigError> {
    let invalid = || ConfigError::InvalidProxy(raw.to_string());

    let url = Url::parse(raw).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "socks5" | "socks5h") {
        return Err(invalid());
    }
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(invalid)?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();

    let credentials = if url.username().is_empty() {
        None
    } else {
        Some((
            url.username().to_string(),
            url.password().unwrap_or_default().to_string(),
        ))
    };

    Ok(ProxyEndpoint {
        host,
        port: url.port().unwrap_or(DEFAULT_SOCKS_PORT),
        credentials,
        source,
    })
}

/// Pick the proxy for a connection to `seed_hosts`.
///
/// An explicit URL always wins and must be valid. Otherwise `ALL_PROXY` (then
/// `all_proxy`) is used unless every seed host is listed in `NO_PROXY`. An
/// unusable environment value is logged and ignored.
pub fn resolve_proxy<F>(
    explicit: Option<&str>,
    seed_hosts: &[String],
    env: F,
) -> Result<Option<ProxyEndpoint>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = explicit.filter(|p| !p.is_empty()) {
        validate_proxy_url(raw)?;
        return parse_proxy_url(raw, ProxySource::Explicit).map(Some);
    }

    let Some((name, raw)) = ENV_ALL_PROXY
        .iter()
        .find_map(|name| env(name).map(|value| (*name, value)))
    else {
        return Ok(None);
    };

    let no_proxy = ENV_NO_PROXY.iter().find_map(|name| env(name));
    if let Some(no_proxy) = no_proxy.as_deref() {
        if !seed_hosts.is_empty() && seed_hosts.iter().all(|h| bypasses_proxy(no_proxy, h)) {
            tracing::debug!("All seed hosts match NO_PROXY, connecting directly");
            return Ok(None);
        }
    }

    match parse_proxy_url(&raw, ProxySource::Environment(name)) {
        Ok(endpoint) => Ok(Some(endpoint)),
        Err(e) => {
            tracing::warn!("Ignoring {}: {}. Connecting directly", name, e);
            Ok(None)
        }
    }
}

/// Whether `host` is excluded from proxying by a `NO_PROXY` list.
pub fn bypasses_proxy(no_proxy: &str, host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    no_proxy
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .any(|entry| {
            if entry == "*" {
                return true;
            }
            let entry = strip_entry_port(entry).to_ascii_lowercase();
            match entry.strip_prefix('.') {
                Some(domain) => host == domain || host.ends_with(&format!(".{}", domain)),
                None => host == entry || host.ends_with(&format!(".{}", entry)),
            }
        })
}

fn strip_entry_port(entry: &str) -> &str {
    if let Some(rest) = entry.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match entry.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            name
        }
        _ => entry,
    }
}
