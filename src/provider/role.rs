use crate::admin::command::normalize_actions;
use crate::admin::id::encode_id;
use crate::admin::model::{DbRole, PrivilegeDto, RoleInfo};
use crate::config::DEFAULT_AUTH_DATABASE;
use crate::provider::{
    admin, decode_import_id, fill_role_defaults, known, refreshed_role_blocks, role_refs,
    same_elements, string_of, ConnectionSlot, RoleBlock,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tf_provider::schema::{
    Attribute, AttributeConstraint, AttributeType, Block, Description, NestedBlock, Schema,
};
use tf_provider::value::{Value, ValueEmpty, ValueList, ValueString};
use tf_provider::{map, AttributePath, Diagnostics, Resource};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegeBlock<'a> {
    #[serde(borrow = "'a")]
    pub db: ValueString<'a>,
    pub collection: ValueString<'a>,
    pub actions: ValueList<ValueString<'a>>,
}

impl PrivilegeBlock<'_> {
    fn schema() -> NestedBlock {
        NestedBlock::List(Block {
            description: Description::plain("Actions allowed on a namespace"),
            attributes: map! {
                "db" => Attribute {
                    attr_type: AttributeType::String,
                    description: Description::plain("Database of the resource"),
                    constraint: AttributeConstraint::Required,
                    ..Default::default()
                },
                "collection" => Attribute {
                    attr_type: AttributeType::String,
                    description: Description::plain("Collection of the resource. Empty for every collection"),
                    constraint: AttributeConstraint::Required,
                    ..Default::default()
                },
                "actions" => Attribute {
                    attr_type: AttributeType::List(AttributeType::String.into()),
                    description: Description::plain("Privilege actions, e.g. find or insert"),
                    constraint: AttributeConstraint::Required,
                    ..Default::default()
                },
            },
            ..Default::default()
        })
    }

    fn to_dto(&self) -> PrivilegeDto {
        PrivilegeDto {
            db: string_of(&self.db).unwrap_or_default(),
            collection: string_of(&self.collection).unwrap_or_default(),
            actions: self
                .actions
                .as_ref_option()
                .map(|actions| actions.iter().filter_map(string_of).collect())
                .unwrap_or_default(),
        }
    }
}

fn privilege_dtos(blocks: &ValueList<PrivilegeBlock<'_>>) -> Vec<PrivilegeDto> {
    blocks
        .as_ref_option()
        .map(|blocks| blocks.iter().map(PrivilegeBlock::to_dto).collect())
        .unwrap_or_default()
}

fn normalized(dtos: &[PrivilegeDto]) -> Vec<PrivilegeDto> {
    dtos.iter()
        .map(|dto| PrivilegeDto {
            actions: normalize_actions(&dto.actions),
            ..dto.clone()
        })
        .collect()
}

/// `mongodb_db_role` attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleState<'a> {
    #[serde(borrow = "'a")]
    pub id: ValueString<'a>,
    pub database: ValueString<'a>,
    pub name: ValueString<'a>,
    pub privilege: ValueList<PrivilegeBlock<'a>>,
    pub inherited_role: ValueList<RoleBlock<'a>>,
}

impl RoleState<'_> {
    pub fn database(&self) -> String {
        string_of(&self.database).unwrap_or_else(|| DEFAULT_AUTH_DATABASE.to_string())
    }

    pub fn name(&self) -> String {
        string_of(&self.name).unwrap_or_default()
    }

    pub fn to_role(&self) -> DbRole {
        DbRole {
            name: self.name(),
            roles: role_refs(&self.inherited_role),
            privileges: privilege_dtos(&self.privilege),
        }
    }

    fn fill_defaults(&mut self) {
        if self.database.is_null() {
            self.database = known(DEFAULT_AUTH_DATABASE);
        }
        fill_role_defaults(&mut self.inherited_role);
    }

    fn refresh(mut self, info: RoleInfo) -> Self {
        self.id = known(encode_id(&info.db, &info.role));
        self.name = known(info.role.clone());
        self.database = known(info.db.clone());
        self.inherited_role = refreshed_role_blocks(&self.inherited_role, info.roles.clone());

        let actual = info.privilege_dtos();
        let unchanged = same_elements(
            &normalized(&privilege_dtos(&self.privilege)),
            &normalized(&actual),
        );
        if !unchanged && !(actual.is_empty() && self.privilege.is_null()) {
            self.privilege = Value::Value(
                actual
                    .into_iter()
                    .map(|dto| PrivilegeBlock {
                        db: known(dto.db),
                        collection: known(dto.collection),
                        actions: Value::Value(dto.actions.into_iter().map(known).collect()),
                    })
                    .collect(),
            );
        }
        self
    }
}

#[derive(Debug, Clone)]
pub struct RoleResource {
    connection: ConnectionSlot,
}

impl RoleResource {
    pub fn new(connection: ConnectionSlot) -> Self {
        Self { connection }
    }

    async fn read_role<'a>(
        &self,
        diags: &mut Diagnostics,
        state: RoleState<'a>,
    ) -> Option<Value<RoleState<'a>>> {
        let service = admin(&self.connection, diags).await?;
        let (database, name) = (state.database(), state.name());

        match service.get_role(&database, &name).await {
            Ok(Some(info)) => Some(Value::Value(state.refresh(info))),
            Ok(None) => {
                tracing::info!("Role {}.{} no longer exists", database, name);
                Some(Value::Null)
            }
            Err(e) => {
                diags.root_error(format!("Failed to read role {}.{}", database, name), e.to_string());
                None
            }
        }
    }
}

#[async_trait]
impl Resource for RoleResource {
    type State<'a> = Value<RoleState<'a>>;
    type PrivateState<'a> = ValueEmpty;
    type ProviderMetaState<'a> = ValueEmpty;

    fn schema(&self, _diags: &mut Diagnostics) -> Option<Schema> {
        Some(Schema {
            version: 1,
            block: Block {
                version: 1,
                description: Description::plain("MongoDB user-defined role"),
                attributes: map! {
                    "id" => Attribute {
                        attr_type: AttributeType::String,
                        description: Description::plain("Base64 of <database>.<name>"),
                        constraint: AttributeConstraint::Computed,
                        ..Default::default()
                    },
                    "database" => Attribute {
                        attr_type: AttributeType::String,
                        description: Description::plain("Database the role is defined in. Defaults to admin"),
                        constraint: AttributeConstraint::OptionalComputed,
                        ..Default::default()
                    },
                    "name" => Attribute {
                        attr_type: AttributeType::String,
                        description: Description::plain("Role name"),
                        constraint: AttributeConstraint::Required,
                        ..Default::default()
                    },
                },
                blocks: map! {
                    "privilege" => PrivilegeBlock::schema(),
                    "inherited_role" => RoleBlock::schema("Role whose privileges this role inherits"),
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
            Value::Value(state) => Some((self.read_role(diags, state).await?, private_state)),
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
        if state.database != prior.database {
            replace.push(AttributePath::new("database"));
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

        if let Err(e) = service.create_role(&database, &state.to_role()).await {
            diags.root_error(
                format!("Failed to create role {}.{}", database, state.name()),
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

        if let Err(e) = service.update_role(&database, &state.to_role()).await {
            diags.root_error(
                format!("Failed to update role {}.{}", database, state.name()),
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

        if let Err(e) = service.drop_role(&database, &name).await {
            diags.root_error(format!("Failed to drop role {}.{}", database, name), e.to_string());
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
        let state = RoleState {
            id: known(id),
            database: known(database.clone()),
            name: known(name.clone()),
            ..Default::default()
        };

        match self.read_role(diags, state).await? {
            Value::Value(state) => Some((Value::Value(state), Default::default())),
            _ => {
                diags.root_error(
                    "Cannot import non-existent role",
                    format!("No role {} exists in database {}", name, database),
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::model::{Privilege, PrivilegeResource, RoleRef};

    fn declared() -> RoleState<'static> {
        RoleState {
            name: known("writer"),
            privilege: Value::Value(vec![PrivilegeBlock {
                db: known("app"),
                collection: known("orders"),
                actions: Value::Value(vec![known("update"), known("insert")]),
            }]),
            inherited_role: Value::Value(vec![RoleBlock {
                role: known("read"),
                db: known("app"),
            }]),
            ..Default::default()
        }
    }

    fn server_view() -> RoleInfo {
        RoleInfo {
            role: "writer".to_string(),
            db: "admin".to_string(),
            roles: vec![RoleRef::new("read", "app")],
            privileges: vec![Privilege {
                resource: PrivilegeResource::namespace("app", "orders"),
                actions: vec!["insert".to_string(), "update".to_string()],
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_to_role() {
        let role = declared().to_role();
        assert_eq!(role.name, "writer");
        assert_eq!(role.roles, vec![RoleRef::new("read", "app")]);
        assert_eq!(role.privileges[0].actions, vec!["update", "insert"]);
    }

    #[test]
    fn test_refresh_ignores_action_order() {
        let refreshed = declared().refresh(server_view());
        assert_eq!(refreshed.privilege, declared().privilege);
        assert_eq!(refreshed.inherited_role, declared().inherited_role);
        assert_eq!(string_of(&refreshed.id), Some(encode_id("admin", "writer")));
    }

    #[test]
    fn test_refresh_reports_privilege_drift() {
        let mut info = server_view();
        info.privileges[0].actions.push("remove".to_string());

        let refreshed = declared().refresh(info);
        let privileges = privilege_dtos(&refreshed.privilege);
        assert_eq!(privileges[0].actions, vec!["insert", "update", "remove"]);
    }

    #[test]
    fn test_refresh_keeps_null_blocks_when_server_has_none() {
        let state = RoleState {
            name: known("empty"),
            ..Default::default()
        };
        let info = RoleInfo {
            role: "empty".to_string(),
            db: "admin".to_string(),
            ..Default::default()
        };

        let refreshed = state.refresh(info);
        assert!(refreshed.privilege.is_null());
        assert!(refreshed.inherited_role.is_null());
    }

    #[tokio::test]
    async fn test_plan_update_replaces_on_database_change() {
        let resource = RoleResource::new(Default::default());
        let mut diags = Diagnostics::default();
        let mut prior = declared();
        prior.fill_defaults();
        let mut proposed = prior.clone();
        proposed.database = known("reporting");

        let (_, _, replace) = resource
            .plan_update(
                &mut diags,
                Value::Value(prior),
                Value::Value(proposed),
                Value::Null,
                Default::default(),
                Default::default(),
            )
            .await
            .unwrap();

        assert_eq!(replace, vec![AttributePath::new("database")]);
    }

    #[tokio::test]
    async fn test_import_rejects_malformed_id() {
        let resource = RoleResource::new(Default::default());
        let mut diags = Diagnostics::default();

        let result = resource.import(&mut diags, "%%%".to_string()).await;

        assert!(result.is_none());
        assert_eq!(diags.errors.len(), 1);
    }
}
