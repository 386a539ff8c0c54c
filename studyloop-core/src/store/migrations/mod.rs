//! Schema migrations for the SQLite policy store
//!
//! Version progress lives in `PRAGMA user_version`. A database written by
//! the earlier service already has an `rl_state` table at version
//! 0, with two extra NOT NULL columns (`chunk_performance`,
//! `file_mapping`) this store never writes; the legacy step rebuilds that
//! table so those columns default to `'{}'` and existing rows survive.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::StoreError;

/// Columns only the earlier service populates
const LEGACY_COLUMNS: [&str; 2] = ["chunk_performance", "file_mapping"];

enum Step {
    Sql(&'static str),
    /// Runs `sql` only when `needed` reports the schema calls for it
    When {
        needed: fn(&Connection) -> Result<bool, StoreError>,
        sql: &'static str,
    },
}

/// Each schema version, applied in order
const MIGRATIONS: &[(&str, Step)] = &[
    ("v001_rl_state", Step::Sql(include_str!("v001_rl_state.sql"))),
    (
        "v002_updated_index",
        Step::Sql(include_str!("v002_updated_index.sql")),
    ),
    (
        "v003_legacy_defaults",
        Step::When {
            needed: has_legacy_columns_without_default,
            sql: include_str!("v003_legacy_defaults.sql"),
        },
    ),
];

/// Whether `rl_state` carries the legacy columns as NOT NULL with no default
fn has_legacy_columns_without_default(conn: &Connection) -> Result<bool, StoreError> {
    let mut stmt =
        conn.prepare("SELECT name, \"notnull\", dflt_value FROM pragma_table_info('rl_state')")?;
    let columns = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let legacy: Vec<_> = columns
        .iter()
        .filter(|(name, _, _)| LEGACY_COLUMNS.contains(&name.as_str()))
        .collect();
    Ok(legacy.len() == LEGACY_COLUMNS.len()
        && legacy
            .iter()
            .any(|(_, not_null, default)| *not_null != 0 && default.is_none()))
}

/// `rl_state` as the earlier service created it
#[cfg(test)]
pub(crate) const LEGACY_SCHEMA: &str = "
    CREATE TABLE rl_state (
        username TEXT PRIMARY KEY,
        mode_alpha TEXT NOT NULL,
        mode_beta TEXT NOT NULL,
        mode_history TEXT NOT NULL,
        chunk_performance TEXT NOT NULL,
        file_mapping TEXT NOT NULL,
        survey_completed INTEGER NOT NULL DEFAULT 0,
        initial_preference TEXT,
        total_sessions INTEGER NOT NULL DEFAULT 0,
        last_updated TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );";

pub struct Migrator<'a> {
    conn: &'a Connection,
}

impl<'a> Migrator<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn current_version(&self) -> Result<i32, StoreError> {
        Ok(self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?)
    }

    pub fn target_version(&self) -> i32 {
        MIGRATIONS.len() as i32
    }

    /// Apply every pending step, each in its own transaction with its version bump
    pub fn migrate(&self) -> Result<(), StoreError> {
        let current = self.current_version()?;
        for (version, (name, step)) in (1..).zip(MIGRATIONS.iter()) {
            if version <= current {
                continue;
            }
            let failed = |e: rusqlite::Error| StoreError::Migration(format!("{name}: {e}"));

            let tx = self.conn.unchecked_transaction().map_err(failed)?;
            let sql = match step {
                Step::Sql(sql) => Some(*sql),
                Step::When { needed, sql } => needed(&*tx)?.then_some(*sql),
            };
            match sql {
                Some(sql) => {
                    info!(version, name, "Running policy store migration");
                    tx.execute_batch(sql).map_err(failed)?;
                }
                None => debug!(version, name, "Migration not needed for this schema"),
            }
            tx.pragma_update(None, "user_version", version)
                .map_err(failed)?;
            tx.commit().map_err(failed)?;
        }
        Ok(())
    }
}
