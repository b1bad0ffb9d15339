// Re-export modules for testing and external use
pub mod config;

pub mod mongo {
    pub mod client;
    pub mod proxy;
    pub mod tls;
    pub mod uri;

    // Re-export commonly used items
    pub use client::{ConnectError, MongoConnection, PreparedOptions};
    pub use proxy::{resolve_proxy, ProxyEndpoint, ProxySource};
    pub use tls::CaBundle;
    pub use uri::{ConnectionUri, UriParam};
}

pub mod admin {
    pub mod command;
    pub mod id;
    pub mod model;
    pub mod service;

    pub use id::{decode_id, encode_id, IdError};
    pub use model::{DbRole, DbUser, Privilege, PrivilegeDto, PrivilegeResource, RoleRef};
    pub use service::{AdminError, AdminService, CommandRunner};
}

pub mod shared {
    pub mod logging;
}

#[cfg(feature = "terraform")]
pub mod provider;

// Re-export commonly used types for easier testing and external use
pub use admin::{AdminService, CommandRunner};
pub use config::{ClientConfig, ConfigError, ProviderSettings};
pub use mongo::{ConnectionUri, MongoConnection};
#[cfg(feature = "terraform")]
pub use provider::MongoProvider;

/// Name Terraform addresses the provider by.
pub const PROVIDER_NAME: &str = "mongodb";
