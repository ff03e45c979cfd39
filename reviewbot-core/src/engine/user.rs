//! User activity management.

use std::sync::Arc;

use tracing::info;

use crate::error::EngineError;
use crate::model::{User, UserId};
use crate::store::UserStore;

/// Toggles user eligibility for new assignments. Inactivity never removes
/// assignments a user already holds.
pub struct UserEngine {
    users: Arc<dyn UserStore>,
}

impl UserEngine {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    pub async fn set_active(&self, id: UserId, is_active: bool) -> Result<User, EngineError> {
        let mut user = self
            .users
            .find_user(id)
            .await?
            .ok_or_else(|| EngineError::user_not_found(id))?;

        user.is_active = is_active;
        self.users.upsert_user(user.clone()).await?;
        info!("Set user {} active = {}", id, is_active);
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, UserStore};

    #[tokio::test]
    async fn test_set_active_toggles_the_flag() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_user(User {
                id: UserId(1),
                username: "alice".to_string(),
                team_name: "infra".to_string(),
                is_active: true,
            })
            .await
            .unwrap();
        let engine = UserEngine::new(store.clone());

        let user = engine.set_active(UserId(1), false).await.unwrap();
        assert!(!user.is_active);

        let stored = store.find_user(UserId(1)).await.unwrap().unwrap();
        assert!(!stored.is_active);
        assert_eq!(stored.username, "alice");
    }

    #[tokio::test]
    async fn test_set_active_unknown_user_fails() {
        let store = Arc::new(MemoryStore::new());
        let engine = UserEngine::new(store);

        let err = engine.set_active(UserId(9), true).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }
}
