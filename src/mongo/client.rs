use crate::admin::service::{AdminError, CommandRunner};
use crate::config::{process_env, ClientConfig, ConfigError};
use crate::mongo::proxy::{resolve_proxy, ProxyEndpoint};
use crate::mongo::tls::{tls_settings, CaBundle};
use crate::mongo::uri::ConnectionUri;
use async_trait::async_trait;
use mongodb::bson::{doc, Document};
use mongodb::options::{ClientOptions, Credential};
use mongodb::Client;
use secrecy::ExposeSecret;
use std::time::Duration;
use thiserror::Error;

pub const APP_NAME: &str = "terraform-provider-mongodb";

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to build MongoDB client: {0}")]
    Driver(String),

    #[error("MongoDB server is not reachable: {0}")]
    Ping(String),

    #[error("Timed out after {0:?} waiting for the MongoDB server")]
    DeadlineElapsed(Duration),
}

/// Driver options assembled from a [`ClientConfig`], plus whatever has to
/// outlive them.
#[derive(Debug)]
pub struct PreparedOptions {
    pub uri: ConnectionUri,
    pub options: ClientOptions,
    pub proxy: Option<ProxyEndpoint>,
    pub ca_bundle: Option<CaBundle>,
}

impl PreparedOptions {
    pub async fn build<F>(config: &ClientConfig, env: F) -> Result<Self, ConnectError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Certificate and proxy errors surface before any network activity.
        let ca_bundle = config
            .certificate
            .as_deref()
            .map(CaBundle::from_pem)
            .transpose()?;
        let proxy = resolve_proxy(config.proxy.as_deref(), &config.seed_hosts(), env)?;

        let uri = ConnectionUri::from_config(config);
        let mut options = ClientOptions::parse(uri.to_driver_string())
            .await
            .map_err(|e| ConnectError::Driver(e.to_string()))?;

        options.app_name = Some(APP_NAME.to_string());
        options.credential = Some(
            Credential::builder()
                .username(config.username.clone())
                .password(config.password.expose_secret().to_string())
                .source(config.auth_database.clone())
                .build(),
        );
        if let Some(tls) = tls_settings(config.ssl, config.insecure_skip_verify, ca_bundle.as_ref())
        {
            options.tls = Some(tls);
        }
        options.socks5_proxy = proxy.as_ref().map(ProxyEndpoint::to_driver);

        Ok(Self {
            uri,
            options,
            proxy,
            ca_bundle,
        })
    }
}

/// A connected client with the per-command deadline from the provider config.
#[derive(Debug)]
pub struct MongoConnection {
    client: Client,
    uri: ConnectionUri,
    operation_timeout: Option<Duration>,
    // Referenced by the client's TLS options; removed from disk on drop.
    _ca_bundle: Option<CaBundle>,
}

impl MongoConnection {
    pub async fn connect(config: &ClientConfig) -> Result<Self, ConnectError> {
        Self::connect_with_env(config, process_env).await
    }

    pub async fn connect_with_env<F>(config: &ClientConfig, env: F) -> Result<Self, ConnectError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let prepared = PreparedOptions::build(config, env).await?;
        tracing::info!("Connecting to {}", prepared.uri);
        if let Some(proxy) = &prepared.proxy {
            tracing::info!("Using SOCKS5 proxy {}", proxy);
        }

        let client = Client::with_options(prepared.options)
            .map_err(|e| ConnectError::Driver(e.to_string()))?;

        let admin = client.database("admin");
        let ping = admin.run_command(doc! { "ping": 1 });
        match within(config.init_deadline(), ping).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(ConnectError::Ping(e.to_string())),
            Err(deadline) => return Err(ConnectError::DeadlineElapsed(deadline)),
        }
        tracing::debug!("Ping succeeded");

        Ok(Self {
            client,
            uri: prepared.uri,
            operation_timeout: config.operation_timeout(),
            _ca_bundle: prepared.ca_bundle,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn uri(&self) -> &ConnectionUri {
        &self.uri
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout
    }
}

#[async_trait]
impl CommandRunner for MongoConnection {
    async fn run_command(&self, database: &str, command: Document) -> Result<Document, AdminError> {
        let name = command.keys().next().cloned().unwrap_or_default();
        tracing::debug!("Running {} on {}", name, database);

        within(
            self.operation_timeout,
            self.client.database(database).run_command(command),
        )
        .await
        .map_err(AdminError::DeadlineElapsed)?
        .map_err(AdminError::from)
    }
}

/// Await `future`, bounded by `deadline` when there is one.
async fn within<F>(deadline: Option<Duration>, future: F) -> Result<F::Output, Duration>
where
    F: std::future::IntoFuture,
{
    match deadline {
        Some(deadline) => tokio::time::timeout(deadline, future)
            .await
            .map_err(|_| deadline),
        None => Ok(future.await),
    }
}
