//! User lookups against the users service.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common::UserId;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::http;
use crate::error::Result;

/// The parts of a user record the orders service reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// Trait for user lookups.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Returns the user, or `None` if it does not exist.
    async fn find_user(&self, user_id: UserId) -> Result<Option<User>>;
}

/// In-memory user directory for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserDirectory {
    users: Arc<RwLock<HashMap<UserId, User>>>,
}

impl InMemoryUserDirectory {
    /// Creates a new empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a user.
    pub fn add_user(&self, user_id: UserId, name: impl Into<String>) {
        let name = name.into();
        let email = format!("{}@example.com", name.to_lowercase().replace(' ', "."));
        self.users
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(user_id, User { name, email });
    }

    /// Removes a user.
    pub fn remove_user(&self, user_id: UserId) {
        self.users
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&user_id);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_user(&self, user_id: UserId) -> Result<Option<User>> {
        Ok(self
            .users
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&user_id)
            .cloned())
    }
}

/// Users service client: `GET {base_url}/{id}`.
#[derive(Debug, Clone)]
pub struct HttpUserDirectory {
    client: Client,
    base_url: String,
}

impl HttpUserDirectory {
    const SERVICE: &'static str = "users";

    /// Creates a client for the users service.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http::client(Self::SERVICE, timeout)?,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    #[tracing::instrument(skip(self))]
    async fn find_user(&self, user_id: UserId) -> Result<Option<User>> {
        let url = http::resource_url(&self.base_url, user_id);
        http::get_optional(&self.client, Self::SERVICE, &url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_find_remove() {
        let users = InMemoryUserDirectory::new();
        users.add_user(UserId::new(1), "John Doe");

        let user = users.find_user(UserId::new(1)).await.unwrap().unwrap();
        assert_eq!(user.name, "John Doe");
        assert_eq!(user.email, "john.doe@example.com");

        users.remove_user(UserId::new(1));
        assert!(users.find_user(UserId::new(1)).await.unwrap().is_none());
    }

    #[test]
    fn test_user_record_tolerates_foreign_fields() {
        let user: User =
            serde_json::from_str(r#"{"_id": "65f0", "name": "Jane", "email": "j@x.io", "age": 30}"#)
                .unwrap();
        assert_eq!(user.name, "Jane");
    }
}
