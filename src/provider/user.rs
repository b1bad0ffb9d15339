use crate::admin::id::encode_id;
use crate::admin::model::{DbUser, UserInfo};
use crate::config::DEFAULT_AUTH_DATABASE;
use crate::provider::{
    admin, decode_import_id, fill_role_defaults, known, refreshed_role_blocks, role_refs,
    same_elements, string_of, ConnectionSlot, RoleBlock,
};
use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tf_provider::schema::{
    Attribute, AttributeConstraint, AttributeType, Block, Description, Schema,
};
use tf_provider::value::{Value, ValueEmpty, ValueList, ValueString};
use tf_provider::{map, AttributePath, Diagnostics, Resource};

/// `mongodb_db_user` attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserState<'a> {
    #[serde(borrow = "'a")]
    pub id: ValueString<'a>,
    pub auth_database: ValueString<'a>,
    pub name: ValueString<'a>,
    pub password: ValueString<'a>,
    pub auth_mechanisms: ValueList<ValueString<'a>>,
    pub role: ValueList<RoleBlock<'a>>,
}

impl UserState<'_> {
    pub fn database(&self) -> String {
        string_of(&self.auth_database).unwrap_or_else(|| DEFAULT_AUTH_DATABASE.to_string())
    }

    pub fn name(&self) -> String {
        string_of(&self.name).unwrap_or_default()
    }

    fn mechanisms(&self) -> Vec<String> {
        self.auth_mechanisms
            .as_ref_option()
            .map(|m| m.iter().filter_map(string_of).collect())
            .unwrap_or_default()
    }

    pub fn to_user(&self) -> DbUser {
        DbUser {
            name: self.name(),
            password: string_of(&self.password)
                .filter(|p| !p.is_empty())
                .map(SecretString::from),
            roles: role_refs(&self.role),
            mechanisms: self.mechanisms(),
        }
    }

    fn fill_defaults(&mut self) {
        if self.auth_database.is_null() {
            self.auth_database = known(DEFAULT_AUTH_DATABASE);
        }
        fill_role_defaults(&mut self.role);
    }

    /// Merge what the server reports. The password is never read back.
    fn refresh(mut self, info: UserInfo) -> Self {
        self.id = known(encode_id(&info.db, &info.user));
        self.name = known(info.user);
        self.auth_database = known(info.db);
        self.role = refreshed_role_blocks(&self.role, info.roles);
        // Server-side mechanisms only matter when they were declared.
        if !self.auth_mechanisms.is_null() && !same_elements(&self.mechanisms(), &info.mechanisms)
        {
            self.auth_mechanisms = Value::Value(info.mechanisms.into_iter().map(known).collect());
        }
        self
    }
}

#[derive(Debug, Clone)]
pub struct UserResource {
    connection: ConnectionSlot,
}

impl UserResource {
    pub fn new(connection: ConnectionSlot) -> Self {
        Self { connection }
    }

    async fn read_user<'a>(
        &self,
        diags: &mut Diagnostics,
        state: UserState<'a>,
    ) -> Option<Value<UserState<'a>>> {
        let service = admin(&self.connection, diags).await?;
        let (database, name) = (state.database(), state.name());

        match service.get_user(&database, &name).await {
            Ok(Some(info)) => Some(Value::Value(state.refresh(info))),
            Ok(None) => {
                tracing::info!("User {}.{} no longer exists", database, name);
                Some(Value::Null)
            }
            Err(e) => {
                diags.root_error(format!("Failed to read user {}.{}", database, name), e.to_string());
                None
            }
        }
    }
}

#[async_trait]
impl Resource for UserResource {
    type State<'a> = Value<UserState<'a>>;
    type PrivateState<'a> = ValueEmpty;
    type ProviderMetaState<'a> = ValueEmpty;

    fn schema(&self, _diags: &mut Diagnostics) -> Option<Schema> {
        Some(Schema {
            version: 1,
            block: Block {
                version: 1,
                description: Description::plain("MongoDB database user"),
                attributes: map! {
                    "id" => Attribute {
                        attr_type: AttributeType::String,
                        description: Description::plain("Base64 of <auth_database>.<name>"),
                        constraint: AttributeConstraint::Computed,
                        ..Default::default()
                    },
                    "auth_database" => Attribute {
                        attr_type: AttributeType::String,
                        description: Description::plain("Database the user is created in. Defaults to admin"),
                        constraint: AttributeConstraint::OptionalComputed,
                        ..Default::default()
                    },
                    "name" => Attribute {
                        attr_type: AttributeType::String,
                        description: Description::plain("User name"),
                        constraint: AttributeConstraint::Required,
                        ..Default::default()
                    },
                    "password" => Attribute {
                        attr_type: AttributeType::String,
                        description: Description::plain("User password"),
                        constraint: AttributeConstraint::Optional,
                        sensitive: true,
                        ..Default::default()
                    },
                    "auth_mechanisms" => Attribute {
                        attr_type: AttributeType::List(AttributeType::String.into()),
                        description: Description::plain("SCRAM mechanisms, e.g. SCRAM-SHA-256"),
                        constraint: AttributeConstraint::Optional,
                        ..Default::default()
                    },
                },
                blocks: map! {
                    "role" => RoleBlock::schema("Role granted to the user"),
                },
                ..Default::default()
            },
        })
    }

    async fn read<'a>(
        &self,
        diags: &mut Diagnostics,
        state: Self::State<'a>,
        private_state: Self::PrivateState<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<(Self::State<'a>, Self::PrivateState<'a>)> {
        match state {
            Value::Value(state) => Some((self.read_user(diags, state).await?, private_state)),
            other => Some((other, private_state)),
        }
    }

    async fn plan_create<'a>(
        &self,
        _diags: &mut Diagnostics,
        proposed_state: Self::State<'a>,
        _config_state: Self::State<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<(Self::State<'a>, Self::PrivateState<'a>)> {
        let mut state = match proposed_state {
            Value::Value(state) => state,
            other => return Some((other, Default::default())),
        };
        state.fill_defaults();
        state.id = Value::Unknown;
        Some((Value::Value(state), Default::default()))
    }

    async fn plan_update<'a>(
        &self,
        _diags: &mut Diagnostics,
        prior_state: Self::State<'a>,
        proposed_state: Self::State<'a>,
        _config_state: Self::State<'a>,
        prior_private_state: Self::PrivateState<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<(Self::State<'a>, Self::PrivateState<'a>, Vec<AttributePath>)> {
        let (prior, mut state) = match (prior_state, proposed_state) {
            (Value::Value(prior), Value::Value(state)) => (prior, state),
            (_, other) => return Some((other, prior_private_state, vec![])),
        };
        state.fill_defaults();

        let mut replace = Vec::new();
        if state.name != prior.name {
            replace.push(AttributePath::new("name"));
        }
        if state.auth_database != prior.auth_database {
            replace.push(AttributePath::new("auth_database"));
        }
        state.id = if replace.is_empty() {
            prior.id
        } else {
            Value::Unknown
        };

        Some((Value::Value(state), prior_private_state, replace))
    }

    async fn plan_destroy<'a>(
        &self,
        _diags: &mut Diagnostics,
        _prior_state: Self::State<'a>,
        prior_private_state: Self::PrivateState<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<Self::PrivateState<'a>> {
        Some(prior_private_state)
    }

    async fn create<'a>(
        &self,
        diags: &mut Diagnostics,
        planned_state: Self::State<'a>,
        _config_state: Self::State<'a>,
        planned_private_state: Self::PrivateState<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<(Self::State<'a>, Self::PrivateState<'a>)> {
        let mut state = planned_state.as_option()?;
        let service = admin(&self.connection, diags).await?;
        let database = state.database();

        if let Err(e) = service.create_user(&database, &state.to_user()).await {
            diags.root_error(
                format!("Failed to create user {}.{}", database, state.name()),
                e.to_string(),
            );
            return None;
        }

        state.id = known(encode_id(&database, &state.name()));
        Some((Value::Value(state), planned_private_state))
    }

    async fn update<'a>(
        &self,
        diags: &mut Diagnostics,
        _prior_state: Self::State<'a>,
        planned_state: Self::State<'a>,
        _config_state: Self::State<'a>,
        planned_private_state: Self::PrivateState<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<(Self::State<'a>, Self::PrivateState<'a>)> {
        let mut state = planned_state.as_option()?;
        let service = admin(&self.connection, diags).await?;
        let database = state.database();

        if let Err(e) = service.update_user(&database, &state.to_user()).await {
            diags.root_error(
                format!("Failed to update user {}.{}", database, state.name()),
                e.to_string(),
            );
            return None;
        }

        state.id = known(encode_id(&database, &state.name()));
        Some((Value::Value(state), planned_private_state))
    }

    async fn destroy<'a>(
        &self,
        diags: &mut Diagnostics,
        prior_state: Self::State<'a>,
        _planned_private_state: Self::PrivateState<'a>,
        _provider_meta_state: Self::ProviderMetaState<'a>,
    ) -> Option<()> {
        let state = prior_state.as_option()?;
        let service = admin(&self.connection, diags).await?;
        let (database, name) = (state.database(), state.name());

        if let Err(e) = service.drop_user(&database, &name).await {
            diags.root_error(format!("Failed to drop user {}.{}", database, name), e.to_string());
            return None;
        }
        Some(())
    }

    async fn import<'a>(
        &self,
        diags: &mut Diagnostics,
        id: String,
    ) -> Option<(Self::State<'a>, Self::PrivateState<'a>)> {
        let (database, name) = decode_import_id(&id, diags)?;
        let state = UserState {
            id: known(id),
            auth_database: known(database.clone()),
            name: known(name.clone()),
            ..Default::default()
        };

        match self.read_user(diags, state).await? {
            Value::Value(state) => Some((Value::Value(state), Default::default())),
            _ => {
                diags.root_error(
                    "Cannot import non-existent user",
                    format!("No user {} exists in database {}", name, database),
                );
                None
            }
        }
    }
}
