//! Terraform plugin surface: provider configuration and the two resources.

pub mod role;
pub mod user;

use crate::admin::id::decode_id;
use crate::admin::model::RoleRef;
use crate::admin::service::AdminService;
use crate::config::{ConfigError, ProviderSettings, DEFAULT_AUTH_DATABASE};
use crate::mongo::client::{ConnectError, MongoConnection};
use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use tf_provider::schema::{
    Attribute, AttributeConstraint, AttributeType, Block, Description, NestedBlock, Schema,
};
use tf_provider::value::{Value, ValueBool, ValueEmpty, ValueList, ValueNumber, ValueString};
use tf_provider::{map, AttributePath, Diagnostics, DynamicDataSource, DynamicResource, Provider};
use tokio::sync::RwLock;

pub use role::RoleResource;
pub use user::UserResource;

/// Connection shared between the provider and its resources.
///
/// Resources are handed out before `configure` runs, so they hold the slot and
/// look the connection up on every call.
pub type ConnectionSlot = Arc<RwLock<Option<Arc<MongoConnection>>>>;

pub type Admin = AdminService<Arc<MongoConnection>>;

pub(crate) async fn admin(slot: &ConnectionSlot, diags: &mut Diagnostics) -> Option<Admin> {
    match slot.read().await.as_ref() {
        Some(connection) => Some(AdminService::new(connection.clone())),
        None => {
            diags.root_error(
                "Provider is not configured",
                "The MongoDB connection is only available after the provider has been configured",
            );
            None
        }
    }
}

pub(crate) fn string_of(value: &ValueString<'_>) -> Option<String> {
    value.as_ref_option().map(|s| s.to_string())
}

pub(crate) fn decode_import_id(id: &str, diags: &mut Diagnostics) -> Option<(String, String)> {
    match decode_id(id) {
        Ok(parts) => Some(parts),
        Err(e) => {
            diags.root_error("Invalid import id", e.to_string());
            None
        }
    }
}

pub(crate) fn known<'a>(value: impl Into<String>) -> ValueString<'a> {
    Value::Value(Cow::Owned(value.into()))
}

/// Whether both slices hold the same elements, ignoring order.
pub(crate) fn same_elements<T: PartialEq>(left: &[T], right: &[T]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    let mut used = vec![false; right.len()];
    left.iter().all(|item| {
        match (0..right.len()).find(|&i| !used[i] && right[i] == *item) {
            Some(i) => {
                used[i] = true;
                true
            }
            None => false,
        }
    })
}

/// `role` / `inherited_role` block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBlock<'a> {
    #[serde(borrow = "'a")]
    pub role: ValueString<'a>,
    pub db: ValueString<'a>,
}

impl RoleBlock<'_> {
    pub(crate) fn schema(description: &str) -> NestedBlock {
        NestedBlock::List(Block {
            description: Description::plain(description),
            attributes: map! {
                "role" => Attribute {
                    attr_type: AttributeType::String,
                    description: Description::plain("Name of the role"),
                    constraint: AttributeConstraint::Required,
                    ..Default::default()
                },
                "db" => Attribute {
                    attr_type: AttributeType::String,
                    description: Description::plain("Database the role is defined in. Defaults to admin"),
                    constraint: AttributeConstraint::OptionalComputed,
                    ..Default::default()
                },
            },
            ..Default::default()
        })
    }
}

pub(crate) fn fill_role_defaults(blocks: &mut ValueList<RoleBlock<'_>>) {
    if let Some(blocks) = blocks.as_mut_option() {
        for block in blocks.iter_mut() {
            if block.db.is_null() {
                block.db = known(DEFAULT_AUTH_DATABASE);
            }
        }
    }
}

pub(crate) fn role_refs(blocks: &ValueList<RoleBlock<'_>>) -> Vec<RoleRef> {
    blocks
        .as_ref_option()
        .map(|blocks| {
            blocks
                .iter()
                .map(|block| {
                    RoleRef::new(
                        string_of(&block.role).unwrap_or_default(),
                        string_of(&block.db).unwrap_or_else(|| DEFAULT_AUTH_DATABASE.to_string()),
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Roles read back from the server, in declaration order when nothing changed.
pub(crate) fn refreshed_role_blocks<'a>(
    declared: &ValueList<RoleBlock<'a>>,
    actual: Vec<RoleRef>,
) -> ValueList<RoleBlock<'a>> {
    if same_elements(&role_refs(declared), &actual) {
        return declared.clone();
    }
    if actual.is_empty() && declared.is_null() {
        return Value::Null;
    }
    Value::Value(
        actual
            .into_iter()
            .map(|r| RoleBlock {
                role: known(r.role),
                db: known(r.db),
            })
            .collect(),
    )
}

/// Provider configuration as sent by Terraform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig<'a> {
    #[serde(borrow = "'a")]
    pub host: ValueString<'a>,
    pub port: ValueString<'a>,
    pub certificate: ValueString<'a>,
    pub username: ValueString<'a>,
    pub password: ValueString<'a>,
    pub auth_database: ValueString<'a>,
    pub replica_set: ValueString<'a>,
    pub replica_set_hosts: ValueString<'a>,
    pub insecure_skip_verify: ValueBool,
    pub ssl: ValueBool,
    pub direct: ValueBool,
    pub retrywrites: ValueBool,
    pub proxy: ValueString<'a>,
    pub timeout: ValueNumber,
    pub connect_timeout: ValueNumber,
    pub server_selection_timeout: ValueNumber,
    pub read_preference: ValueString<'a>,
    pub max_pool_size: ValueNumber,
    pub max_connecting: ValueNumber,
}

impl ProviderConfig<'_> {
    /// Known values only; unknown and null attributes are left unset.
    pub fn settings(&self) -> ProviderSettings {
        ProviderSettings {
            host: string_of(&self.host),
            port: string_of(&self.port),
            certificate: string_of(&self.certificate),
            username: string_of(&self.username),
            password: string_of(&self.password).map(SecretString::from),
            auth_database: string_of(&self.auth_database),
            replica_set: string_of(&self.replica_set),
            replica_set_hosts: string_of(&self.replica_set_hosts),
            insecure_skip_verify: self.insecure_skip_verify.as_ref_option().copied(),
            ssl: self.ssl.as_ref_option().copied(),
            direct: self.direct.as_ref_option().copied(),
            retrywrites: self.retrywrites.as_ref_option().copied(),
            proxy: string_of(&self.proxy),
            timeout: self.timeout.as_ref_option().copied(),
            connect_timeout: self.connect_timeout.as_ref_option().copied(),
            server_selection_timeout: self.server_selection_timeout.as_ref_option().copied(),
            read_preference: string_of(&self.read_preference),
            max_pool_size: self.max_pool_size.as_ref_option().copied(),
            max_connecting: self.max_connecting.as_ref_option().copied(),
        }
    }
}

fn report_config_error(diags: &mut Diagnostics, error: &ConfigError) {
    match error.attribute() {
        Some(attribute) => diags.error(
            "Invalid provider configuration",
            error.to_string(),
            AttributePath::new(attribute),
        ),
        None => diags.root_error("Invalid provider configuration", error.to_string()),
    }
}

#[derive(Debug, Default, Clone)]
pub struct MongoProvider {
    connection: ConnectionSlot,
}

impl MongoProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_slot(&self) -> ConnectionSlot {
        self.connection.clone()
    }
}

fn optional(attr_type: AttributeType, description: &str) -> Attribute {
    Attribute {
        attr_type,
        description: Description::plain(description),
        constraint: AttributeConstraint::Optional,
        ..Default::default()
    }
}

#[async_trait]
impl Provider for MongoProvider {
    type Config<'a> = ProviderConfig<'a>;
    type MetaState<'a> = ValueEmpty;

    fn schema(&self, _diags: &mut Diagnostics) -> Option<Schema> {
        Some(Schema {
            version: 1,
            block: Block {
                description: Description::plain("Manage MongoDB users and roles"),
                attributes: map! {
                    "host" => optional(AttributeType::String, "Server address. Defaults to MONGO_HOST, then 127.0.0.1"),
                    "port" => optional(AttributeType::String, "Server port. Defaults to MONGO_PORT, then 27017"),
                    "certificate" => optional(AttributeType::String, "PEM-encoded CA bundle trusted for TLS. Defaults to MONGODB_CERT"),
                    "username" => optional(AttributeType::String, "User to authenticate as. Defaults to MONGO_USR"),
                    "password" => Attribute {
                        sensitive: true,
                        ..optional(AttributeType::String, "Password of the user. Defaults to MONGO_PWD")
                    },
                    "auth_database" => optional(AttributeType::String, "Database the user authenticates against. Defaults to admin"),
                    "replica_set" => optional(AttributeType::String, "Replica set name"),
                    "replica_set_hosts" => optional(AttributeType::String, "Comma separated host:port list of the replica set members"),
                    "insecure_skip_verify" => optional(AttributeType::Bool, "Accept invalid server certificates"),
                    "ssl" => optional(AttributeType::Bool, "Connect with TLS"),
                    "direct" => optional(AttributeType::Bool, "Connect directly to the host instead of discovering the topology"),
                    "retrywrites" => optional(AttributeType::Bool, "Retry writes once on transient errors. Defaults to true"),
                    "proxy" => optional(AttributeType::String, "socks5:// or socks5h:// proxy URL. Defaults to ALL_PROXY, then all_proxy"),
                    "timeout" => optional(AttributeType::Number, "Milliseconds a single operation may take. Defaults to 10000"),
                    "connect_timeout" => optional(AttributeType::Number, "Milliseconds to wait for a connection. Defaults to 30000"),
                    "server_selection_timeout" => optional(AttributeType::Number, "Milliseconds to wait for a suitable server"),
                    "read_preference" => optional(AttributeType::String, "Read preference used with replica_set_hosts. Defaults to secondaryPreferred"),
                    "max_pool_size" => optional(AttributeType::Number, "Maximum number of pooled connections. Defaults to 100"),
                    "max_connecting" => optional(AttributeType::Number, "Maximum number of connections being established at once. Defaults to 2"),
                },
                ..Default::default()
            },
        })
    }

    async fn validate<'a>(&self, diags: &mut Diagnostics, config: Self::Config<'a>) -> Option<()> {
        for error in config.settings().validate() {
            report_config_error(diags, &error);
        }
        Some(())
    }

    async fn configure<'a>(
        &self,
        diags: &mut Diagnostics,
        terraform_version: String,
        config: Self::Config<'a>,
    ) -> Option<()> {
        tracing::info!("Configuring provider for Terraform {}", terraform_version);

        let client_config = match config.settings().resolve() {
            Ok(client_config) => client_config,
            Err(e) => {
                report_config_error(diags, &e);
                return None;
            }
        };
        for warning in client_config.warnings() {
            diags.root_warning("Untested connection settings", warning);
        }

        match MongoConnection::connect(&client_config).await {
            Ok(connection) => {
                *self.connection.write().await = Some(Arc::new(connection));
                Some(())
            }
            Err(ConnectError::Config(e)) => {
                report_config_error(diags, &e);
                None
            }
            Err(e) => {
                diags.root_error("Failed to initialize MongoDB client", e.to_string());
                None
            }
        }
    }

    fn get_resources(
        &self,
        _diags: &mut Diagnostics,
    ) -> Option<HashMap<String, Box<dyn DynamicResource>>> {
        Some(map! {
            "db_user" => UserResource::new(self.connection_slot()),
            "db_role" => RoleResource::new(self.connection_slot()),
        })
    }

    fn get_data_sources(
        &self,
        _diags: &mut Diagnostics,
    ) -> Option<HashMap<String, Box<dyn DynamicDataSource>>> {
        Some(map! {})
    }
}
