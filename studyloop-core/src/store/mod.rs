//! Policy state persistence
//!
//! Backends only implement raw `fetch` and `save`; the provided `load`
//! and `reset` give every backend the same recovery semantics: a missing,
//! unreadable or corrupt record loads as a fresh prior state and never
//! fails the caller.

mod json;
mod memory;
mod migrations;
mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{StorageBackend, StorageConfig};
use crate::error::StoreError;
use crate::policy::{PolicyState, Prior, RawPolicyState};

pub use json::JsonFilePolicyStore;
pub use memory::MemoryPolicyStore;
pub use sqlite::SqlitePolicyStore;

/// Storage of one [`PolicyState`] per user
///
/// `save` must replace the whole record atomically. Serializing the
/// load-update-save cycle for a user is the caller's job; the router
/// does it with a per-user lock.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Prior used for fresh and repaired state
    fn prior(&self) -> Prior;

    /// Read the stored record, if any
    async fn fetch(&self, user_id: &str) -> Result<Option<RawPolicyState>, StoreError>;

    /// Persist a full state, replacing any previous record
    async fn save(&self, user_id: &str, state: &PolicyState) -> Result<(), StoreError>;

    /// Load a user's state, falling back to the prior on any problem
    async fn load(&self, user_id: &str) -> PolicyState {
        let prior = self.prior();
        match self.fetch(user_id).await {
            Ok(Some(raw)) => {
                let (state, repairs) = raw.normalize(prior);
                for repair in &repairs {
                    warn!(user_id, %repair, "Repaired persisted policy state");
                }
                state
            }
            Ok(None) => {
                debug!(user_id, "No policy state stored, using prior");
                PolicyState::with_prior(prior)
            }
            Err(e) => {
                warn!(user_id, error = %e, "Policy state unreadable, using prior");
                PolicyState::with_prior(prior)
            }
        }
    }

    /// Overwrite a user's state with the prior and persist it
    async fn reset(&self, user_id: &str) -> Result<PolicyState, StoreError> {
        let state = PolicyState::with_prior(self.prior());
        self.save(user_id, &state).await?;
        Ok(state)
    }
}

/// Open the backend selected by configuration
pub fn open_store(config: &StorageConfig, prior: Prior) -> Result<Arc<dyn PolicyStore>, StoreError> {
    let store: Arc<dyn PolicyStore> = match config.backend {
        StorageBackend::Memory => Arc::new(MemoryPolicyStore::with_prior(prior)),
        StorageBackend::Json => Arc::new(JsonFilePolicyStore::new(config.resolved_path()).with_prior(prior)),
        StorageBackend::Sqlite => Arc::new(SqlitePolicyStore::open(config.resolved_path())?.with_prior(prior)),
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_store_is_object_safe() {
        fn _takes_boxed(_: Box<dyn PolicyStore>) {}
    }

    #[test]
    fn test_open_memory_store() {
        let config = StorageConfig {
            backend: StorageBackend::Memory,
            path: None,
        };
        assert!(open_store(&config, Prior::default()).is_ok());
    }
}
