//! Role checks.
//!
//! Every public operation resolves the caller's role in the target store
//! once, before it opens a transaction, and asks the role matrix in
//! [`tendero_core::auth`] whether the permission is granted. Callers with no
//! membership in the store are refused the same way as callers whose role
//! lacks the permission. A store that does not exist is `NotFound` for
//! everyone.

use tracing::warn;

use crate::error::{EngineError, EngineResult};
use crate::Engine;
use tendero_core::{Permission, Role};

impl Engine {
    /// Returns the caller's role if it grants `permission` in `store_id`.
    ///
    /// ## Errors
    /// * `NotFound` - no such store
    /// * `Unauthorized` - not a member, or the role lacks `permission`
    pub async fn authorize(
        &self,
        store_id: &str,
        user_id: &str,
        permission: Permission,
    ) -> EngineResult<Role> {
        let role = self.db.stores().member_role(store_id, user_id).await?;

        match role {
            Some(role) if role.allows(permission) => Ok(role),
            None if self.db.stores().get_by_id(store_id).await?.is_none() => {
                Err(EngineError::not_found("Store", store_id))
            }
            _ => {
                warn!(
                    store_id = %store_id,
                    user_id = %user_id,
                    role = role.map(|r| r.as_str()).unwrap_or("none"),
                    permission = permission.as_str(),
                    "Permission denied"
                );
                Err(EngineError::Unauthorized {
                    user_id: user_id.to_string(),
                    store_id: store_id.to_string(),
                    action: permission.as_str(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use crate::test_support::{engine, seed_store, OWNER};
    use tendero_core::{Permission, Role};

    #[tokio::test]
    async fn test_assistant_cannot_manage_catalog() {
        let engine = engine().await;
        let store = seed_store(&engine).await;
        engine
            .add_member(OWNER, &store.id, "assistant-1", Role::Assistant)
            .await
            .unwrap();

        assert_eq!(
            engine.authorize(&store.id, "assistant-1", Permission::Sell).await.unwrap(),
            Role::Assistant
        );

        let err = engine
            .authorize(&store.id, "assistant-1", Permission::ManageCatalog)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn test_strangers_are_unauthorized() {
        let engine = engine().await;
        let store = seed_store(&engine).await;

        let err = engine
            .authorize(&store.id, "someone-else", Permission::Sell)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn test_unknown_store_is_not_found() {
        let engine = engine().await;

        let err = engine
            .authorize("no-such-store", OWNER, Permission::Sell)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
