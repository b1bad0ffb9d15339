use mongodb::bson::{doc, Bson};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// A role granted to a user or inherited by a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRef {
    pub role: String,
    pub db: String,
}

impl RoleRef {
    pub fn new(role: impl Into<String>, db: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            db: db.into(),
        }
    }
}

impl From<RoleRef> for Bson {
    fn from(role: RoleRef) -> Bson {
        Bson::Document(doc! {
            "role": role.role,
            "db": role.db,
        })
    }
}

/// User payload for `createUser` / `updateUser`.
#[derive(Debug, Clone, Default)]
pub struct DbUser {
    pub name: String,
    pub password: Option<SecretString>,
    pub roles: Vec<RoleRef>,
    pub mechanisms: Vec<String>,
}

/// Privilege as declared in a role resource.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PrivilegeDto {
    pub db: String,
    pub collection: String,
    pub actions: Vec<String>,
}

/// Resource a privilege applies to.
///
/// Built-in privileges may target the cluster or any resource instead of a
/// namespace, which is why every field is optional on the way back.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PrivilegeResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<bool>,
    #[serde(default, rename = "anyResource", skip_serializing_if = "Option::is_none")]
    pub any_resource: Option<bool>,
}

impl PrivilegeResource {
    pub fn namespace(db: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            db: Some(db.into()),
            collection: Some(collection.into()),
            ..Default::default()
        }
    }
}

/// Privilege in wire form: `{resource: {db, collection}, actions: [..]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Privilege {
    pub resource: PrivilegeResource,
    #[serde(default)]
    pub actions: Vec<String>,
}

impl From<Privilege> for Bson {
    fn from(privilege: Privilege) -> Bson {
        let mut resource = mongodb::bson::Document::new();
        if let Some(db) = privilege.resource.db {
            resource.insert("db", db);
        }
        if let Some(collection) = privilege.resource.collection {
            resource.insert("collection", collection);
        }
        if let Some(cluster) = privilege.resource.cluster {
            resource.insert("cluster", cluster);
        }
        if let Some(any_resource) = privilege.resource.any_resource {
            resource.insert("anyResource", any_resource);
        }
        Bson::Document(doc! {
            "resource": resource,
            "actions": privilege.actions,
        })
    }
}

/// Role payload for `createRole` / `updateRole`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DbRole {
    pub name: String,
    pub roles: Vec<RoleRef>,
    pub privileges: Vec<PrivilegeDto>,
}

/// Reply of `usersInfo`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsersInfo {
    #[serde(default)]
    pub users: Vec<UserInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserInfo {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub db: String,
    #[serde(default)]
    pub roles: Vec<RoleRef>,
    #[serde(default)]
    pub mechanisms: Vec<String>,
}

/// Reply of `rolesInfo` with `showPrivileges: true`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RolesInfo {
    #[serde(default)]
    pub roles: Vec<RoleInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleInfo {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub db: String,
    #[serde(default)]
    pub roles: Vec<RoleRef>,
    #[serde(default)]
    pub privileges: Vec<Privilege>,
    #[serde(rename = "isBuiltin", default)]
    pub is_builtin: bool,
}

impl RoleInfo {
    /// Namespace privileges in declaration form. Cluster and any-resource
    /// privileges have no such form and are skipped.
    pub fn privilege_dtos(&self) -> Vec<PrivilegeDto> {
        self.privileges
            .iter()
            .filter_map(|p| {
                Some(PrivilegeDto {
                    db: p.resource.db.clone()?,
                    collection: p.resource.collection.clone()?,
                    actions: p.actions.clone(),
                })
            })
            .collect()
    }
}
