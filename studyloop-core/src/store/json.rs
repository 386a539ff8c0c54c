//! One JSON document per user in a directory
//!
//! Saves write a uniquely named sibling temp file and rename it over the
//! target, so a concurrent reader sees either the old or the new record,
//! never a partial one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::debug;

use crate::error::StoreError;
use crate::policy::{PolicyState, Prior, RawPolicyState};

use super::PolicyStore;

#[derive(Debug)]
pub struct JsonFilePolicyStore {
    dir: PathBuf,
    prior: Prior,
    write_seq: AtomicU64,
}

impl JsonFilePolicyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            prior: Prior::default(),
            write_seq: AtomicU64::new(0),
        }
    }

    pub fn with_prior(mut self, prior: Prior) -> Self {
        self.prior = prior;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding a user's record
    pub fn path_for(&self, user_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(user_id)))
    }
}

/// Encode a user id as a safe file stem (`[A-Za-z0-9_-]` kept, the rest as `%XX`)
fn file_stem(user_id: &str) -> String {
    let mut stem = String::with_capacity(user_id.len());
    for byte in user_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("%{byte:02X}"));
        }
    }
    if stem.is_empty() {
        stem.push_str("%00");
    }
    stem
}

#[async_trait]
impl PolicyStore for JsonFilePolicyStore {
    fn prior(&self) -> Prior {
        self.prior
    }

    async fn fetch(&self, user_id: &str) -> Result<Option<RawPolicyState>, StoreError> {
        let path = self.path_for(user_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, user_id: &str, state: &PolicyState) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(user_id);
        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("json.tmp-{}-{seq}", std::process::id()));

        let bytes = serde_json::to_vec_pretty(state)?;
        if let Err(e) = tokio::fs::write(&tmp, &bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(user_id, path = %path.display(), "Saved policy state");
        Ok(())
    }
}
