//! Identity boundary: platform handle → internal user id.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Resolves and registers users by platform identity.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Internal id for a platform identity, if registered.
    async fn find_user(&self, platform: &str, platform_id: &str) -> Result<Option<String>>;

    /// Register a new user and return its internal id.
    async fn register_user(&self, platform: &str, platform_id: &str, username: &str)
        -> Result<String>;
}

/// Resolve a user, registering them on first sight.
pub async fn resolve_or_register(
    identity: &dyn IdentityProvider,
    platform: &str,
    platform_id: &str,
    username: &str,
) -> Result<String> {
    if let Some(user) = identity.find_user(platform, platform_id).await? {
        return Ok(user);
    }
    if username.trim().is_empty() {
        return Err(Error::Identity(format!(
            "cannot register {}:{} without a username",
            platform, platform_id
        )));
    }
    let user = identity.register_user(platform, platform_id, username).await?;
    tracing::info!(%platform, %platform_id, %username, user_id = %user, "registered user on first vote");
    Ok(user)
}

#[derive(Debug, Default)]
struct Directory {
    next_id: u64,
    by_platform: HashMap<(String, String), String>,
    usernames: HashMap<String, String>,
}

/// In-memory identity directory.
#[derive(Debug, Default)]
pub struct MemoryIdentity {
    directory: RwLock<Directory>,
}

impl MemoryIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Display name of a registered user.
    pub async fn username(&self, user_id: &str) -> Option<String> {
        self.directory.read().await.usernames.get(user_id).cloned()
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentity {
    async fn find_user(&self, platform: &str, platform_id: &str) -> Result<Option<String>> {
        let directory = self.directory.read().await;
        Ok(directory
            .by_platform
            .get(&(platform.to_string(), platform_id.to_string()))
            .cloned())
    }

    async fn register_user(
        &self,
        platform: &str,
        platform_id: &str,
        username: &str,
    ) -> Result<String> {
        let mut directory = self.directory.write().await;
        let key = (platform.to_string(), platform_id.to_string());
        if let Some(existing) = directory.by_platform.get(&key) {
            return Ok(existing.clone());
        }
        directory.next_id += 1;
        let user_id = format!("user-{}", directory.next_id);
        directory.by_platform.insert(key, user_id.clone());
        directory.usernames.insert(user_id.clone(), username.to_string());
        Ok(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registers_once_per_platform_identity() {
        let identity = MemoryIdentity::new();
        let a = resolve_or_register(&identity, "discord", "42", "alice").await.unwrap();
        let again = resolve_or_register(&identity, "discord", "42", "").await.unwrap();
        let other = resolve_or_register(&identity, "twitch", "42", "alice").await.unwrap();

        assert_eq!(a, again);
        assert_ne!(a, other);
        assert_eq!(identity.username(&a).await.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn unknown_user_needs_a_name() {
        let identity = MemoryIdentity::new();
        let result = resolve_or_register(&identity, "discord", "7", "  ").await;
        assert!(matches!(result, Err(Error::Identity(_))));
    }
}
