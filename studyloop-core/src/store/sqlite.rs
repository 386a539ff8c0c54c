//! SQLite-backed policy store
//!
//! One `rl_state` row per username. Maps and history are JSON text
//! columns; `survey_completed` is stored as 0/1. Saves are a single
//! upsert statement, so a record is always replaced whole.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use crate::error::StoreError;
use crate::policy::{PolicyState, Prior, RawPolicyState, iso8601};

use super::PolicyStore;
use super::migrations::Migrator;

const UPSERT: &str = "
    INSERT INTO rl_state (
        username, mode_alpha, mode_beta, mode_history, survey_completed,
        initial_preference, total_sessions, last_updated, created_at, updated_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
    ON CONFLICT(username) DO UPDATE SET
        mode_alpha = excluded.mode_alpha,
        mode_beta = excluded.mode_beta,
        mode_history = excluded.mode_history,
        survey_completed = excluded.survey_completed,
        initial_preference = excluded.initial_preference,
        total_sessions = excluded.total_sessions,
        last_updated = excluded.last_updated,
        updated_at = excluded.updated_at";

const SELECT: &str = "
    SELECT mode_alpha, mode_beta, mode_history, survey_completed,
           initial_preference, total_sessions, last_updated
    FROM rl_state WHERE username = ?1";

struct Row {
    mode_alpha: String,
    mode_beta: String,
    mode_history: String,
    survey_completed: i64,
    initial_preference: Option<String>,
    total_sessions: i64,
    last_updated: Option<String>,
}

impl Row {
    fn decode(self) -> Result<RawPolicyState, StoreError> {
        let last_updated = match self.last_updated {
            None => None,
            Some(text) => Some(
                iso8601::parse(&text)
                    .ok_or_else(|| StoreError::Corrupt(format!("last_updated {text:?}")))?,
            ),
        };
        Ok(RawPolicyState {
            mode_alpha: serde_json::from_str(&self.mode_alpha)?,
            mode_beta: serde_json::from_str(&self.mode_beta)?,
            mode_history: serde_json::from_str(&self.mode_history)?,
            survey_completed: self.survey_completed != 0,
            initial_preference: self.initial_preference,
            total_sessions: self.total_sessions,
            last_updated,
        })
    }
}

pub struct SqlitePolicyStore {
    conn: Arc<Mutex<Connection>>,
    prior: Prior,
}

impl SqlitePolicyStore {
    /// Open or create a database at path, running migrations
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::init(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        Migrator::new(&conn).migrate()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            prior: Prior::default(),
        })
    }

    pub fn with_prior(mut self, prior: Prior) -> Self {
        self.prior = prior;
        self
    }

    /// Run a closure against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::Task("sqlite connection lock poisoned".into()))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Usernames with a stored record
    pub async fn users(&self) -> Result<Vec<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT username FROM rl_state ORDER BY username")?;
            let users = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(users)
        })
        .await
    }
}

#[async_trait]
impl PolicyStore for SqlitePolicyStore {
    fn prior(&self) -> Prior {
        self.prior
    }

    async fn fetch(&self, user_id: &str) -> Result<Option<RawPolicyState>, StoreError> {
        let user_id = user_id.to_string();
        let row = self
            .with_conn(move |conn| {
                let row = conn
                    .query_row(SELECT, [&user_id], |row| {
                        Ok(Row {
                            mode_alpha: row.get(0)?,
                            mode_beta: row.get(1)?,
                            mode_history: row.get(2)?,
                            survey_completed: row.get(3)?,
                            initial_preference: row.get(4)?,
                            total_sessions: row.get(5)?,
                            last_updated: row.get(6)?,
                        })
                    })
                    .optional()?;
                Ok(row)
            })
            .await?;
        row.map(Row::decode).transpose()
    }

    async fn save(&self, user_id: &str, state: &PolicyState) -> Result<(), StoreError> {
        let user_id = user_id.to_string();
        let mode_alpha = serde_json::to_string(&state.mode_success)?;
        let mode_beta = serde_json::to_string(&state.mode_failure)?;
        let mode_history = serde_json::to_string(&state.history)?;
        let survey_completed = i64::from(state.survey_completed);
        let initial_preference = state.initial_preference.map(|m| m.as_str().to_string());
        let total_sessions = i64::try_from(state.total_sessions).unwrap_or(i64::MAX);
        let last_updated = state.last_updated.as_ref().map(iso8601::format);
        let now = iso8601::format(&Utc::now());

        self.with_conn(move |conn| {
            conn.execute(
                UPSERT,
                rusqlite::params![
                    user_id,
                    mode_alpha,
                    mode_beta,
                    mode_history,
                    survey_completed,
                    initial_preference,
                    total_sessions,
                    last_updated,
                    now,
                ],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Feedback, HistoryEntry, ModeId};
    use tempfile::TempDir;

    fn sample_state() -> PolicyState {
        let mut state = PolicyState::new();
        state.mode_success.insert(ModeId::Quiz, 3.5);
        state.mode_failure.insert(ModeId::Interactive, 2.25);
        state.history.push(HistoryEntry {
            mode: ModeId::Quiz,
            feedback: Feedback::Binary(true),
            timestamp: Utc::now(),
        });
        state.survey_completed = true;
        state.initial_preference = Some(ModeId::Flashcard);
        state.total_sessions = 7;
        state.last_updated = Some(Utc::now());
        state
    }

    #[tokio::test]
    async fn test_round_trip_in_memory() {
        let store = SqlitePolicyStore::open_in_memory().unwrap();
        let state = sample_state();
        store.save("alice", &state).await.unwrap();
        assert_eq!(store.load("alice").await, state);
    }

    #[tokio::test]
    async fn test_upsert_replaces_record() {
        let store = SqlitePolicyStore::open_in_memory().unwrap();
        store.save("alice", &sample_state()).await.unwrap();
        store.save("alice", &PolicyState::new()).await.unwrap();

        assert_eq!(store.load("alice").await, PolicyState::new());
        assert_eq!(store.users().await.unwrap(), vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("db/policies.db");
        let state = sample_state();
        {
            let store = SqlitePolicyStore::open(&path).unwrap();
            store.save("bob", &state).await.unwrap();
        }
        let store = SqlitePolicyStore::open(&path).unwrap();
        assert_eq!(store.load("bob").await, state);
    }

    #[tokio::test]
    async fn test_corrupt_json_column_loads_prior() {
        let store = SqlitePolicyStore::open_in_memory().unwrap();
        store.save("alice", &sample_state()).await.unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE rl_state SET mode_alpha = 'oops' WHERE username = 'alice'",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        assert!(store.fetch("alice").await.is_err());
        assert_eq!(store.load("alice").await, PolicyState::new());
    }

    #[tokio::test]
    async fn test_opens_database_written_by_earlier_service() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("app.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(super::super::migrations::LEGACY_SCHEMA).unwrap();
            conn.execute(
                "INSERT INTO rl_state VALUES ('amy',
                 '{\"quiz\": 4.0, \"flashcard\": 1.0, \"interactive\": 1.0}',
                 '{\"quiz\": 1.0, \"flashcard\": 1.0, \"interactive\": 1.0}',
                 '[]', '{}', '{\"notes.pdf\": \"abc\"}', 1, 'quiz', 2,
                 '2025-05-04T10:11:12.123456', '2025-05-01T08:00:00', '2025-05-04T10:11:12')",
                [],
            )
            .unwrap();
        }

        let store = SqlitePolicyStore::open(&path).unwrap();
        let loaded = store.load("amy").await;
        assert_eq!(loaded.success(ModeId::Quiz), 4.0);
        assert_eq!(loaded.total_sessions, 2);
        assert_eq!(loaded.initial_preference, Some(ModeId::Quiz));

        let mut updated = loaded.clone();
        updated.total_sessions = 3;
        store.save("amy", &updated).await.unwrap();
        let newcomer = sample_state();
        store.save("newcomer", &newcomer).await.unwrap();
        drop(store);

        let store = SqlitePolicyStore::open(&path).unwrap();
        assert_eq!(store.load("amy").await.total_sessions, 3);
        assert_eq!(store.load("newcomer").await, newcomer);

        let file_mapping: String = store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT file_mapping FROM rl_state WHERE username = 'amy'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(file_mapping, "{\"notes.pdf\": \"abc\"}");
    }

    #[tokio::test]
    async fn test_missing_user_is_none() {
        let store = SqlitePolicyStore::open_in_memory().unwrap();
        assert!(store.fetch("ghost").await.unwrap().is_none());
    }
}
