//! Command documents for user and role management.
//!
//! Field order matters to the server (the command name must come first) and to
//! anyone diffing payloads, so documents are built by explicit insertion.

use crate::admin::model::{DbRole, DbUser, Privilege, PrivilegeDto, PrivilegeResource, RoleRef};
use mongodb::bson::{doc, Bson, Document};
use secrecy::ExposeSecret;

pub const CREATE_ROLE: &str = "createRole";
pub const UPDATE_ROLE: &str = "updateRole";

/// Sorted copy of `actions`. Duplicates are kept.
pub fn normalize_actions(actions: &[String]) -> Vec<String> {
    let mut sorted = actions.to_vec();
    sorted.sort();
    sorted
}

pub fn privileges_from_dto(dtos: &[PrivilegeDto]) -> Vec<Privilege> {
    dtos.iter()
        .map(|dto| Privilege {
            resource: PrivilegeResource::namespace(dto.db.clone(), dto.collection.clone()),
            actions: normalize_actions(&dto.actions),
        })
        .collect()
}

fn role_array(roles: &[RoleRef]) -> Vec<Bson> {
    roles.iter().map(Bson::from).collect()
}

/// `{<verb>: role, privileges: [..], roles: [..]}` for `createRole` and `updateRole`.
pub fn role_management_command(
    verb: &str,
    role: &str,
    roles: &[RoleRef],
    privileges: &[Privilege],
) -> Document {
    let mut command = Document::new();
    command.insert(verb, role);
    command.insert(
        "privileges",
        privileges.iter().map(Bson::from).collect::<Vec<_>>(),
    );
    command.insert("roles", role_array(roles));
    command
}

pub fn create_role_command(role: &DbRole) -> Document {
    role_management_command(
        CREATE_ROLE,
        &role.name,
        &role.roles,
        &privileges_from_dto(&role.privileges),
    )
}

pub fn update_role_command(role: &DbRole) -> Document {
    role_management_command(
        UPDATE_ROLE,
        &role.name,
        &role.roles,
        &privileges_from_dto(&role.privileges),
    )
}

fn user_command(verb: &str, user: &DbUser, always_send_roles: bool) -> Document {
    let mut command = Document::new();
    command.insert(verb, user.name.as_str());
    if always_send_roles || !user.roles.is_empty() {
        command.insert("roles", role_array(&user.roles));
    }
    if let Some(password) = user
        .password
        .as_ref()
        .map(|p| p.expose_secret())
        .filter(|p| !p.is_empty())
    {
        command.insert("pwd", password);
    }
    if !user.mechanisms.is_empty() {
        command.insert("mechanisms", user.mechanisms.clone());
    }
    command
}

/// `createUser` with `roles`, `pwd` and `mechanisms` only when non-empty.
pub fn create_user_command(user: &DbUser) -> Document {
    user_command("createUser", user, false)
}

/// `updateUser`. Roles are always sent so that removed grants are revoked.
pub fn update_user_command(user: &DbUser) -> Document {
    user_command("updateUser", user, true)
}

pub fn users_info_command(name: &str, db: &str) -> Document {
    doc! { "usersInfo": { "user": name, "db": db } }
}

pub fn roles_info_command(role: &str, db: &str) -> Document {
    doc! {
        "rolesInfo": { "role": role, "db": db },
        "showPrivileges": true,
    }
}

pub fn drop_user_command(name: &str) -> Document {
    doc! { "dropUser": name }
}

pub fn drop_role_command(name: &str) -> Document {
    doc! { "dropRole": name }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn keys(document: &Document) -> Vec<&str> {
        document.keys().map(String::as_str).collect()
    }

    #[test]
    fn test_normalize_actions_sorts() {
        let actions = strings(&["find", "update", "remove", "insert"]);
        assert_eq!(
            normalize_actions(&actions),
            strings(&["find", "insert", "remove", "update"])
        );
    }

    #[test]
    fn test_normalize_actions_is_idempotent_and_keeps_duplicates() {
        let actions = strings(&["update", "find", "find"]);
        let once = normalize_actions(&actions);
        assert_eq!(once, strings(&["find", "find", "update"]));
        assert_eq!(normalize_actions(&once), once);
        assert!(normalize_actions(&[]).is_empty());
    }

    #[test]
    fn test_privileges_from_dto_keeps_order() {
        let dtos = vec![
            PrivilegeDto {
                db: "test".to_string(),
                collection: "test".to_string(),
                actions: strings(&["find", "update", "remove", "insert"]),
            },
            PrivilegeDto {
                db: "test".to_string(),
                collection: "test2".to_string(),
                actions: strings(&["update", "find"]),
            },
        ];

        let privileges = privileges_from_dto(&dtos);

        assert_eq!(privileges.len(), 2);
        assert_eq!(privileges[0].resource, PrivilegeResource::namespace("test", "test"));
        assert_eq!(
            privileges[0].actions,
            strings(&["find", "insert", "remove", "update"])
        );
        assert_eq!(privileges[1].resource, PrivilegeResource::namespace("test", "test2"));
        assert_eq!(privileges[1].actions, strings(&["find", "update"]));
    }

    #[test]
    fn test_role_management_command_field_order() {
        let privileges = privileges_from_dto(&[PrivilegeDto {
            db: "app".to_string(),
            collection: "orders".to_string(),
            actions: strings(&["insert", "find"]),
        }]);
        let roles = vec![RoleRef::new("read", "app")];

        let command = role_management_command(CREATE_ROLE, "orders-writer", &roles, &privileges);

        assert_eq!(keys(&command), vec!["createRole", "privileges", "roles"]);
        assert_eq!(command.get_str("createRole").unwrap(), "orders-writer");
        assert_eq!(
            command,
            doc! {
                "createRole": "orders-writer",
                "privileges": [{
                    "resource": { "db": "app", "collection": "orders" },
                    "actions": ["find", "insert"],
                }],
                "roles": [{ "role": "read", "db": "app" }],
            }
        );
    }

    #[test]
    fn test_update_role_uses_same_shape() {
        let role = DbRole {
            name: "auditor".to_string(),
            roles: vec![],
            privileges: vec![],
        };
        let command = update_role_command(&role);
        assert_eq!(keys(&command), vec!["updateRole", "privileges", "roles"]);
        assert!(command.get_array("privileges").unwrap().is_empty());
        assert!(command.get_array("roles").unwrap().is_empty());
        assert_eq!(
            keys(&create_role_command(&role)),
            vec!["createRole", "privileges", "roles"]
        );
    }

    #[test]
    fn test_create_user_omits_empty_fields() {
        let user = DbUser {
            name: "reporting".to_string(),
            ..Default::default()
        };
        assert_eq!(create_user_command(&user), doc! { "createUser": "reporting" });

        let user = DbUser {
            name: "reporting".to_string(),
            password: Some(SecretString::from("")),
            ..Default::default()
        };
        assert_eq!(keys(&create_user_command(&user)), vec!["createUser"]);
    }

    #[test]
    fn test_create_user_field_order() {
        let user = DbUser {
            name: "app".to_string(),
            password: Some(SecretString::from("s3cret")),
            roles: vec![RoleRef::new("readWrite", "app"), RoleRef::new("read", "reporting")],
            mechanisms: strings(&["SCRAM-SHA-256"]),
        };

        let command = create_user_command(&user);

        assert_eq!(keys(&command), vec!["createUser", "roles", "pwd", "mechanisms"]);
        assert_eq!(command.get_str("pwd").unwrap(), "s3cret");
        assert_eq!(command.get_array("roles").unwrap().len(), 2);
    }

    #[test]
    fn test_update_user_always_sends_roles() {
        let user = DbUser {
            name: "app".to_string(),
            ..Default::default()
        };
        let command = update_user_command(&user);
        assert_eq!(keys(&command), vec!["updateUser", "roles"]);
        assert!(command.get_array("roles").unwrap().is_empty());
    }

    #[test]
    fn test_info_commands() {
        assert_eq!(
            users_info_command("alice", "admin"),
            doc! { "usersInfo": { "user": "alice", "db": "admin" } }
        );
        let command = roles_info_command("reader", "app");
        assert_eq!(keys(&command), vec!["rolesInfo", "showPrivileges"]);
        assert!(command.get_bool("showPrivileges").unwrap());
    }

    #[test]
    fn test_drop_commands() {
        assert_eq!(drop_user_command("alice"), doc! { "dropUser": "alice" });
        assert_eq!(drop_role_command("reader"), doc! { "dropRole": "reader" });
    }
}
