use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::gateway::{Mapping, TableGateway};
use crate::users::entity::User;
use crate::users::password::{hash_password, verify_password};

/// Failures surfaced by the user store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user {0} not found")]
    NotFound(i64),
    #[error("username {0} is already taken")]
    DuplicateUsername(String),
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        StoreError::Storage(format!("{err:#}"))
    }
}

fn by_id(id: i64) -> Mapping {
    let mut criteria = Mapping::new();
    criteria.insert("id".into(), Value::from(id));
    criteria
}

fn by_username(username: &str) -> Mapping {
    let mut criteria = Mapping::new();
    criteria.insert("username".into(), Value::from(username));
    criteria
}

/// User persistence over a [`TableGateway`]. Owns password hashing, so
/// plaintext never reaches the table.
#[derive(Clone)]
pub struct UserStore {
    table: Arc<dyn TableGateway>,
}

impl UserStore {
    pub fn new(table: Arc<dyn TableGateway>) -> Self {
        Self { table }
    }

    /// Every user, ordered by id.
    pub async fn fetch_all(&self) -> Result<Vec<User>, StoreError> {
        let rows = self.table.select(None).await?;
        Ok(rows.iter().map(User::from_mapping).collect())
    }

    pub async fn get_user(&self, id: i64) -> Result<User, StoreError> {
        let rows = self.table.select(Some(&by_id(id))).await?;
        rows.first()
            .map(User::from_mapping)
            .ok_or(StoreError::NotFound(id))
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let rows = self.table.select(Some(&by_username(username))).await?;
        Ok(rows.first().map(User::from_mapping))
    }

    /// Persists the user: inserts when the id is unset (or zero), updates
    /// the existing row otherwise.
    pub async fn save_user(&self, user: &User) -> Result<(), StoreError> {
        match user.id {
            None | Some(0) => self.create(user).await,
            Some(id) => self.update(id, user).await,
        }
    }

    async fn create(&self, user: &User) -> Result<(), StoreError> {
        let username = user.username.clone().unwrap_or_default();
        if self.get_user_by_username(&username).await?.is_some() {
            return Err(StoreError::DuplicateUsername(username));
        }
        let hash = hash_password(user.password.as_deref().unwrap_or_default())
            .map_err(|e| StoreError::Hash(format!("{e:#}")))?;

        let mut data = Mapping::new();
        data.insert("username".into(), Value::from(username));
        data.insert(
            "email".into(),
            user.email.clone().map_or(Value::Null, Value::from),
        );
        data.insert("password".into(), Value::from(hash));
        data.insert("role".into(), Value::from(user.role.clone()));
        data.insert("active".into(), Value::from(user.active));
        self.table.insert(&data).await?;
        Ok(())
    }

    async fn update(&self, id: i64, user: &User) -> Result<(), StoreError> {
        // Surface a missing row before writing anything.
        self.get_user(id).await?;

        // A rename must not collide with another account.
        if let Some(username) = user.username.as_deref() {
            if let Some(found) = self.get_user_by_username(username).await? {
                if found.id != Some(id) {
                    return Err(StoreError::DuplicateUsername(username.to_string()));
                }
            }
        }

        // Absent username/email leave the stored values alone, like the
        // empty-password rule below.
        let mut data = Mapping::new();
        if let Some(username) = user.username.clone() {
            data.insert("username".into(), Value::from(username));
        }
        if let Some(email) = user.email.clone() {
            data.insert("email".into(), Value::from(email));
        }
        data.insert("role".into(), Value::from(user.role.clone()));
        data.insert("active".into(), Value::from(user.active));
        // An empty password means "keep the stored hash".
        if let Some(plain) = user.password.as_deref().filter(|p| !p.is_empty()) {
            let hash =
                hash_password(plain).map_err(|e| StoreError::Hash(format!("{e:#}")))?;
            data.insert("password".into(), Value::from(hash));
        }
        self.table.update(&data, &by_id(id)).await?;
        Ok(())
    }

    /// Checks a username/password pair. Unknown usernames, wrong
    /// passwords and inactive accounts all come back as `false`, so the
    /// caller cannot tell them apart.
    pub async fn verify_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<bool, StoreError> {
        let Some(user) = self.get_user_by_username(username).await? else {
            return Ok(false);
        };
        let hash = user.password.unwrap_or_default();
        let verified = verify_password(password, &hash).unwrap_or_else(|err| {
            warn!("Unreadable password hash for user {username}: {err:#}");
            false
        });
        Ok(verified && user.active)
    }

    /// Removes the user. Deleting an unknown id is a no-op.
    pub async fn delete_user(&self, id: i64) -> Result<(), StoreError> {
        self.table.delete(&by_id(id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryTable;

    fn store() -> (UserStore, Arc<MemoryTable>) {
        let table = Arc::new(MemoryTable::new());
        (UserStore::new(table.clone()), table)
    }

    fn new_user(username: &str, password: &str) -> User {
        User {
            username: Some(username.to_string()),
            password: Some(password.to_string()),
            ..User::default()
        }
    }

    #[tokio::test]
    async fn create_assigns_id_and_hashes_the_password() {
        let (store, _) = store();
        store
            .save_user(&new_user("ana", "secreto"))
            .await
            .expect("create");

        let users = store.fetch_all().await.expect("fetch all");
        assert_eq!(users.len(), 1);
        let ana = &users[0];
        assert_eq!(ana.id, Some(1));
        assert_eq!(ana.username.as_deref(), Some("ana"));
        assert_eq!(ana.role, "user");
        assert!(ana.active);
        assert!(ana.created_at.is_some());
        assert!(ana.password.as_deref().unwrap().starts_with("$argon2"));
    }

    #[tokio::test]
    async fn zero_id_saves_as_create() {
        let (store, _) = store();
        let mut user = new_user("ana", "secreto");
        user.id = Some(0);
        store.save_user(&user).await.expect("create");
        let ana = store.get_user(1).await.expect("get");
        assert_eq!(ana.username.as_deref(), Some("ana"));
    }

    #[tokio::test]
    async fn create_rejects_a_taken_username() {
        let (store, _) = store();
        store
            .save_user(&new_user("ana", "secreto"))
            .await
            .expect("create");
        let err = store
            .save_user(&new_user("ana", "otra-clave"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateUsername(name) if name == "ana"));
    }

    #[tokio::test]
    async fn update_rewrites_profile_fields_in_place() {
        let (store, _) = store();
        store
            .save_user(&new_user("ana", "secreto"))
            .await
            .expect("create");

        let mut ana = store.get_user(1).await.expect("get");
        ana.email = Some("ana@example.com".to_string());
        ana.role = "admin".to_string();
        ana.password = None;
        store.save_user(&ana).await.expect("update");

        let ana = store.get_user(1).await.expect("get");
        assert_eq!(ana.id, Some(1));
        assert_eq!(ana.email.as_deref(), Some("ana@example.com"));
        assert_eq!(ana.role, "admin");
    }

    #[tokio::test]
    async fn update_of_unknown_id_is_not_found_and_writes_nothing() {
        let (store, _) = store();
        let mut user = new_user("ana", "secreto");
        user.id = Some(99);
        let err = store.save_user(&user).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(99)));
        assert!(store.fetch_all().await.expect("fetch all").is_empty());
    }

    #[tokio::test]
    async fn rename_to_a_taken_username_is_rejected() {
        let (store, _) = store();
        store
            .save_user(&new_user("ana", "secreto"))
            .await
            .expect("create ana");
        store
            .save_user(&new_user("bruno", "secreto"))
            .await
            .expect("create bruno");

        let mut bruno = store.get_user(2).await.expect("get");
        bruno.username = Some("ana".to_string());
        bruno.password = None;
        let err = store.save_user(&bruno).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateUsername(name) if name == "ana"));

        // Both rows keep their original names.
        let names: Vec<_> = store
            .fetch_all()
            .await
            .expect("fetch all")
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, [Some("ana".to_string()), Some("bruno".to_string())]);
    }

    #[tokio::test]
    async fn update_without_username_keeps_the_stored_one() {
        let (store, _) = store();
        store
            .save_user(&new_user("ana", "secreto"))
            .await
            .expect("create");

        let mut ana = store.get_user(1).await.expect("get");
        ana.username = None;
        ana.email = Some("ana@example.com".to_string());
        ana.password = None;
        store.save_user(&ana).await.expect("update");

        let ana = store.get_user(1).await.expect("get");
        assert_eq!(ana.username.as_deref(), Some("ana"));
        assert_eq!(ana.email.as_deref(), Some("ana@example.com"));
        assert!(store
            .verify_credentials("ana", "secreto")
            .await
            .expect("verify"));
    }

    #[tokio::test]
    async fn empty_password_on_update_keeps_the_stored_hash() {
        let (store, _) = store();
        store
            .save_user(&new_user("ana", "secreto"))
            .await
            .expect("create");
        let before = store.get_user(1).await.expect("get").password;

        let mut ana = store.get_user(1).await.expect("get");
        ana.password = Some(String::new());
        store.save_user(&ana).await.expect("update");

        let after = store.get_user(1).await.expect("get").password;
        assert_eq!(before, after);
        assert!(store
            .verify_credentials("ana", "secreto")
            .await
            .expect("verify"));
    }

    #[tokio::test]
    async fn new_password_on_update_replaces_the_hash() {
        let (store, _) = store();
        store
            .save_user(&new_user("ana", "secreto"))
            .await
            .expect("create");

        let mut ana = store.get_user(1).await.expect("get");
        ana.password = Some("nueva-clave".to_string());
        store.save_user(&ana).await.expect("update");

        assert!(!store
            .verify_credentials("ana", "secreto")
            .await
            .expect("verify old"));
        assert!(store
            .verify_credentials("ana", "nueva-clave")
            .await
            .expect("verify new"));
    }

    #[tokio::test]
    async fn verify_credentials_collapses_all_failures_to_false() {
        let (store, _) = store();
        store
            .save_user(&new_user("ana", "secreto"))
            .await
            .expect("create");

        assert!(store
            .verify_credentials("ana", "secreto")
            .await
            .expect("correct pair"));
        assert!(!store
            .verify_credentials("ana", "equivocada")
            .await
            .expect("wrong password"));
        assert!(!store
            .verify_credentials("nadie", "secreto")
            .await
            .expect("unknown username"));

        let mut ana = store.get_user(1).await.expect("get");
        ana.active = false;
        ana.password = None;
        store.save_user(&ana).await.expect("deactivate");
        assert!(!store
            .verify_credentials("ana", "secreto")
            .await
            .expect("inactive account"));
    }

    #[tokio::test]
    async fn unreadable_stored_hash_verifies_as_false() {
        let (store, table) = store();
        let mut row = Mapping::new();
        row.insert("username".into(), Value::from("ana"));
        row.insert("password".into(), Value::from("not-a-phc-string"));
        table.insert(&row).await.expect("seed row");

        assert!(!store
            .verify_credentials("ana", "secreto")
            .await
            .expect("verify"));
    }

    #[tokio::test]
    async fn delete_user_is_idempotent() {
        let (store, _) = store();
        store
            .save_user(&new_user("ana", "secreto"))
            .await
            .expect("create");

        store.delete_user(1).await.expect("delete");
        assert!(store.fetch_all().await.expect("fetch all").is_empty());
        store.delete_user(1).await.expect("delete again");
    }

    #[tokio::test]
    async fn get_user_names_the_missing_id() {
        let (store, _) = store();
        let err = store.get_user(7).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(7)));
        assert_eq!(err.to_string(), "user 7 not found");

        assert!(store
            .get_user_by_username("nadie")
            .await
            .expect("lookup")
            .is_none());
    }
}
