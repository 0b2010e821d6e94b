//! Preference repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide get/upsert/delete over the `preferences` table.
//! - Keep SQL and column encodings inside the persistence boundary.
//!
//! # Invariants
//! - `upsert_preference` is idempotent: writing the same row twice leaves
//!   exactly one row with that content.
//! - `ignore_list` is stored as a JSON array of identity id strings.

use crate::db::{ConnectionPool, DbError};
use crate::model::identity::IdentityId;
use crate::model::preference::{NotificationChannel, Preference};
use rusqlite::{params, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const PREFERENCE_SELECT_SQL: &str = "SELECT
    identity_id,
    notifications_enabled,
    ignore_list,
    channel,
    sound_key
FROM preferences";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for preference persistence.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    InvalidData(String),
}

impl RepoError {
    /// Whether the failure came from pool saturation rather than SQLite.
    pub fn is_pool_timeout(&self) -> bool {
        matches!(self, Self::Db(DbError::PoolTimeout { .. }))
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted preference: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Durable storage for per-identity preferences.
///
/// Implementations are shared with worker threads.
pub trait PreferenceRepository: Send + Sync {
    fn get_preference(&self, id: IdentityId) -> RepoResult<Option<Preference>>;
    fn upsert_preference(&self, preference: &Preference) -> RepoResult<()>;
    /// Returns whether a row existed.
    fn delete_preference(&self, id: IdentityId) -> RepoResult<bool>;
    fn count_preferences(&self) -> RepoResult<u64>;
}

/// SQLite-backed preference repository over a connection pool.
#[derive(Clone)]
pub struct SqlitePreferenceRepository {
    pool: ConnectionPool,
}

impl SqlitePreferenceRepository {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}

impl PreferenceRepository for SqlitePreferenceRepository {
    fn get_preference(&self, id: IdentityId) -> RepoResult<Option<Preference>> {
        let conn = self.pool.acquire()?;
        let mut stmt =
            conn.prepare_cached(&format!("{PREFERENCE_SELECT_SQL} WHERE identity_id = ?1;"))?;
        let row = stmt
            .query_row([id.to_string()], read_raw_row)
            .optional()?;

        row.map(RawPreferenceRow::into_preference).transpose()
    }

    fn upsert_preference(&self, preference: &Preference) -> RepoResult<()> {
        let ignore_list = encode_ignore_list(&preference.ignore_list)?;
        let conn = self.pool.acquire()?;
        conn.execute(
            "INSERT INTO preferences (
                identity_id,
                notifications_enabled,
                ignore_list,
                channel,
                sound_key
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(identity_id) DO UPDATE SET
                notifications_enabled = excluded.notifications_enabled,
                ignore_list = excluded.ignore_list,
                channel = excluded.channel,
                sound_key = excluded.sound_key,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![
                preference.identity_id.to_string(),
                bool_to_int(preference.notifications_enabled),
                ignore_list,
                preference.channel.as_db_str(),
                preference.sound_key.as_deref(),
            ],
        )?;
        Ok(())
    }

    fn delete_preference(&self, id: IdentityId) -> RepoResult<bool> {
        let conn = self.pool.acquire()?;
        let changed = conn.execute(
            "DELETE FROM preferences WHERE identity_id = ?1;",
            [id.to_string()],
        )?;
        Ok(changed > 0)
    }

    fn count_preferences(&self) -> RepoResult<u64> {
        let conn = self.pool.acquire()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM preferences;", [], |row| row.get(0))?;
        u64::try_from(count)
            .map_err(|_| RepoError::InvalidData(format!("negative row count `{count}`")))
    }
}

/// Column values as stored, before domain validation.
struct RawPreferenceRow {
    identity_id: String,
    notifications_enabled: i64,
    ignore_list: String,
    channel: String,
    sound_key: Option<String>,
}

fn read_raw_row(row: &Row<'_>) -> rusqlite::Result<RawPreferenceRow> {
    Ok(RawPreferenceRow {
        identity_id: row.get("identity_id")?,
        notifications_enabled: row.get("notifications_enabled")?,
        ignore_list: row.get("ignore_list")?,
        channel: row.get("channel")?,
        sound_key: row.get("sound_key")?,
    })
}

impl RawPreferenceRow {
    fn into_preference(self) -> RepoResult<Preference> {
        let identity_id = Uuid::parse_str(&self.identity_id).map_err(|_| {
            RepoError::InvalidData(format!(
                "invalid uuid value `{}` in preferences.identity_id",
                self.identity_id
            ))
        })?;

        let notifications_enabled = match self.notifications_enabled {
            0 => false,
            1 => true,
            other => {
                return Err(RepoError::InvalidData(format!(
                    "invalid notifications_enabled value `{other}`"
                )));
            }
        };

        let channel = NotificationChannel::from_db_str(&self.channel).ok_or_else(|| {
            RepoError::InvalidData(format!("invalid channel `{}`", self.channel))
        })?;

        Ok(Preference {
            identity_id,
            notifications_enabled,
            ignore_list: decode_ignore_list(&self.ignore_list)?,
            channel,
            sound_key: self.sound_key,
        })
    }
}

fn encode_ignore_list(ignore_list: &BTreeSet<IdentityId>) -> RepoResult<String> {
    serde_json::to_string(ignore_list)
        .map_err(|err| RepoError::InvalidData(format!("cannot encode ignore list: {err}")))
}

fn decode_ignore_list(value: &str) -> RepoResult<BTreeSet<IdentityId>> {
    serde_json::from_str(value)
        .map_err(|err| RepoError::InvalidData(format!("invalid ignore_list `{value}`: {err}")))
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
