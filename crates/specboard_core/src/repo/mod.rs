//! Entity store: persistence of the ownership hierarchy.
//!
//! # Responsibility
//! - Define per-entity data access contracts (`ProjectStore`,
//!   `SpecificationStore`, `ItemStore`, `OwnershipStore`, `UserStore`).
//! - Keep SQL details behind one SQLite implementation, `SqliteEntityStore`.
//!
//! # Invariants
//! - Write paths apply the constraint rules before SQL mutations.
//! - Only live (`is_deleted=0`) rows are returned unless explicitly asked.
//! - Store methods never open or commit transactions; callers own the
//!   transaction scope so multi-step mutations stay atomic.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::constraints::ValidationError;
use crate::model::entities::{EntityRef, UserId};
use rusqlite::{Connection, ErrorCode};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub mod item_repo;
pub mod ownership;
pub mod project_repo;
pub mod spec_repo;

pub use item_repo::ItemStore;
pub use ownership::{OwnershipPath, OwnershipStore};
pub use project_repo::{ProjectStore, UserStore};
pub use spec_repo::SpecificationStore;

pub type RepoResult<T> = Result<T, RepoError>;

/// Errors from entity store operations.
#[derive(Debug)]
pub enum RepoError {
    /// Write-time constraint check failed.
    Validation(ValidationError),
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Target row does not exist or is soft-deleted.
    NotFound(EntityRef),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
}

impl RepoError {
    /// Whether SQLite refused the operation because another connection
    /// holds a conflicting lock.
    pub fn is_lock_contention(&self) -> bool {
        matches!(
            self.sqlite_failure(),
            Some(err) if matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        )
    }

    /// Whether a unique index rejected the write.
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self.sqlite_failure(),
            Some(err) if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        )
    }

    fn sqlite_failure(&self) -> Option<&rusqlite::ffi::Error> {
        match self {
            Self::Db(DbError::Sqlite(rusqlite::Error::SqliteFailure(err, _))) => Some(err),
            _ => None,
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(target) => write!(f, "{target} not found"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "entity store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "entity store requires table `{table}`")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for RepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
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

/// SQLite-backed entity store.
///
/// Borrows either a plain connection or an open transaction (which derefs to
/// `Connection`); every method runs inside whatever scope the caller opened.
pub struct SqliteEntityStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteEntityStore<'conn> {
    /// Creates a store from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }

    /// Wraps a connection already verified by `try_new`.
    pub(crate) fn unchecked(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub(crate) fn conn(&self) -> &'conn Connection {
        self.conn
    }
}

const REQUIRED_TABLES: &[&str] = &["users", "projects", "specifications", "bullet_items"];

fn ensure_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in REQUIRED_TABLES {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(RepoError::MissingRequiredTable(table));
        }
    }

    Ok(())
}

pub(crate) fn parse_flag(value: i64, column: &'static str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid flag value `{other}` in {column}"
        ))),
    }
}

pub(crate) fn parse_user_id(value: &str, column: &'static str) -> RepoResult<UserId> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}
