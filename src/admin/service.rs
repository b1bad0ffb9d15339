use crate::admin::command;
use crate::admin::model::{DbRole, DbUser, RoleInfo, RolesInfo, UserInfo, UsersInfo};
use async_trait::async_trait;
use mongodb::bson::{from_document, Document};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdminError {
    #[error("{0}")]
    Command(String),

    #[error("Unexpected {command} response: {message}")]
    Decode {
        command: &'static str,
        message: String,
    },

    #[error("Command did not complete within {0:?}")]
    DeadlineElapsed(Duration),
}

impl From<mongodb::error::Error> for AdminError {
    fn from(error: mongodb::error::Error) -> Self {
        AdminError::Command(error.to_string())
    }
}

/// Runs a single database command and returns the raw reply.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run_command(&self, database: &str, command: Document) -> Result<Document, AdminError>;
}

#[async_trait]
impl<T: CommandRunner + ?Sized> CommandRunner for Arc<T> {
    async fn run_command(&self, database: &str, command: Document) -> Result<Document, AdminError> {
        (**self).run_command(database, command).await
    }
}

/// User and role administration against one deployment.
pub struct AdminService<R> {
    runner: R,
}

impl<R: CommandRunner> AdminService<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub async fn create_user(&self, database: &str, user: &DbUser) -> Result<(), AdminError> {
        tracing::info!("Creating user {}.{}", database, user.name);
        self.runner
            .run_command(database, command::create_user_command(user))
            .await?;
        Ok(())
    }

    /// Look a user up. `None` when the user does not exist.
    pub async fn get_user(&self, database: &str, name: &str) -> Result<Option<UserInfo>, AdminError> {
        tracing::debug!("Reading user {}.{}", database, name);
        let reply = self
            .runner
            .run_command(database, command::users_info_command(name, database))
            .await?;
        let info: UsersInfo = decode("usersInfo", reply)?;
        Ok(info.users.into_iter().next())
    }

    pub async fn update_user(&self, database: &str, user: &DbUser) -> Result<(), AdminError> {
        tracing::info!("Updating user {}.{}", database, user.name);
        self.runner
            .run_command(database, command::update_user_command(user))
            .await?;
        Ok(())
    }

    pub async fn drop_user(&self, database: &str, name: &str) -> Result<(), AdminError> {
        tracing::info!("Dropping user {}.{}", database, name);
        self.runner
            .run_command(database, command::drop_user_command(name))
            .await?;
        Ok(())
    }

    pub async fn create_role(&self, database: &str, role: &DbRole) -> Result<(), AdminError> {
        tracing::info!("Creating role {}.{}", database, role.name);
        self.runner
            .run_command(database, command::create_role_command(role))
            .await?;
        Ok(())
    }

    /// Look a role up with its privileges. `None` when the role does not exist.
    pub async fn get_role(&self, database: &str, name: &str) -> Result<Option<RoleInfo>, AdminError> {
        tracing::debug!("Reading role {}.{}", database, name);
        let reply = self
            .runner
            .run_command(database, command::roles_info_command(name, database))
            .await?;
        let info: RolesInfo = decode("rolesInfo", reply)?;
        Ok(info.roles.into_iter().next())
    }

    pub async fn update_role(&self, database: &str, role: &DbRole) -> Result<(), AdminError> {
        tracing::info!("Updating role {}.{}", database, role.name);
        self.runner
            .run_command(database, command::update_role_command(role))
            .await?;
        Ok(())
    }

    pub async fn drop_role(&self, database: &str, name: &str) -> Result<(), AdminError> {
        tracing::info!("Dropping role {}.{}", database, name);
        self.runner
            .run_command(database, command::drop_role_command(name))
            .await?;
        Ok(())
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    command: &'static str,
    reply: Document,
) -> Result<T, AdminError> {
    from_document(reply).map_err(|e| AdminError::Decode {
        command,
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::model::{PrivilegeDto, RoleRef};
    use mongodb::bson::doc;
    use secrecy::SecretString;
    use std::sync::Mutex;

    /// Records every command and answers with canned replies in order.
    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<(String, Document)>>,
        replies: Mutex<Vec<Result<Document, AdminError>>>,
    }

    impl RecordingRunner {
        fn replying(replies: Vec<Result<Document, AdminError>>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                replies: Mutex::new(replies),
            }
        }

        fn calls(&self) -> Vec<(String, Document)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run_command(
            &self,
            database: &str,
            command: Document,
        ) -> Result<Document, AdminError> {
            self.calls
                .lock()
                .unwrap()
                .push((database.to_string(), command));
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                Ok(doc! { "ok": 1 })
            } else {
                replies.remove(0)
            }
        }
    }

    #[tokio::test]
    async fn test_create_user_runs_against_auth_database() {
        let service = AdminService::new(RecordingRunner::default());
        let user = DbUser {
            name: "app".to_string(),
            password: Some(SecretString::from("pw")),
            roles: vec![RoleRef::new("readWrite", "app")],
            mechanisms: vec![],
        };

        service.create_user("admin", &user).await.unwrap();

        let calls = service.runner().calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "admin");
        assert_eq!(calls[0].1.get_str("createUser").unwrap(), "app");
    }

    #[tokio::test]
    async fn test_get_user_found_and_missing() {
        let runner = RecordingRunner::replying(vec![
            Ok(doc! {
                "users": [{ "_id": "admin.app", "user": "app", "db": "admin", "roles": [] }],
                "ok": 1,
            }),
            Ok(doc! { "users": [], "ok": 1 }),
        ]);
        let service = AdminService::new(runner);

        let found = service.get_user("admin", "app").await.unwrap();
        assert_eq!(found.map(|u| u.user), Some("app".to_string()));

        let missing = service.get_user("admin", "gone").await.unwrap();
        assert!(missing.is_none());

        let calls = service.runner().calls();
        assert_eq!(
            calls[1].1,
            doc! { "usersInfo": { "user": "gone", "db": "admin" } }
        );
    }

    #[tokio::test]
    async fn test_get_role_requests_privileges() {
        let runner = RecordingRunner::replying(vec![Ok(doc! {
            "roles": [{
                "role": "reader",
                "db": "app",
                "roles": [],
                "privileges": [{ "resource": { "db": "app", "collection": "c" }, "actions": ["find"] }],
            }],
            "ok": 1,
        })]);
        let service = AdminService::new(runner);

        let role = service.get_role("app", "reader").await.unwrap().unwrap();

        assert_eq!(role.privilege_dtos().len(), 1);
        let calls = service.runner().calls();
        assert!(calls[0].1.get_bool("showPrivileges").unwrap());
    }

    #[tokio::test]
    async fn test_role_lifecycle_commands() {
        let service = AdminService::new(RecordingRunner::default());
        let role = DbRole {
            name: "writer".to_string(),
            roles: vec![],
            privileges: vec![PrivilegeDto {
                db: "app".to_string(),
                collection: "orders".to_string(),
                actions: vec!["update".to_string(), "insert".to_string()],
            }],
        };

        service.create_role("app", &role).await.unwrap();
        service.update_role("app", &role).await.unwrap();
        service.drop_role("app", "writer").await.unwrap();

        let verbs: Vec<String> = service
            .runner()
            .calls()
            .iter()
            .map(|(_, command)| command.keys().next().cloned().unwrap_or_default())
            .collect();
        assert_eq!(verbs, vec!["createRole", "updateRole", "dropRole"]);
    }

    #[tokio::test]
    async fn test_command_error_is_verbatim() {
        let runner = RecordingRunner::replying(vec![Err(AdminError::Command(
            "Command failed with error 51003 (Location51003): 'User \"app@admin\" already exists'"
                .to_string(),
        ))]);
        let service = AdminService::new(runner);

        let err = service
            .create_user(
                "admin",
                &DbUser {
                    name: "app".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();

        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn test_malformed_reply_is_decode_error() {
        let runner = RecordingRunner::replying(vec![Ok(doc! { "users": "nope", "ok": 1 })]);
        let service = AdminService::new(runner);

        let err = service.get_user("admin", "app").await.unwrap_err();
        assert!(matches!(err, AdminError::Decode { command: "usersInfo", .. }));
    }
}
