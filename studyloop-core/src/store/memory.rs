//! In-memory policy store
//!
//! Records are kept as serialized JSON so loads go through the same
//! decode-and-normalize path as the durable backends.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::policy::{PolicyState, Prior, RawPolicyState};

use super::PolicyStore;

#[derive(Debug, Default)]
pub struct MemoryPolicyStore {
    records: RwLock<HashMap<String, String>>,
    prior: Prior,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prior(prior: Prior) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            prior,
        }
    }

    /// Store a raw record verbatim (used to seed legacy or corrupt data)
    pub async fn insert_raw(&self, user_id: &str, record: impl Into<String>) {
        self.records
            .write()
            .await
            .insert(user_id.to_string(), record.into());
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    fn prior(&self) -> Prior {
        self.prior
    }

    async fn fetch(&self, user_id: &str) -> Result<Option<RawPolicyState>, StoreError> {
        let records = self.records.read().await;
        match records.get(user_id) {
            Some(text) => Ok(Some(serde_json::from_str(text)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, user_id: &str, state: &PolicyState) -> Result<(), StoreError> {
        let text = serde_json::to_string(state)?;
        self.records.write().await.insert(user_id.to_string(), text);
        Ok(())
    }
}
