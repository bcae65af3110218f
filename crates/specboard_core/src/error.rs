//! Caller-facing error taxonomy.
//!
//! # Invariants
//! - Every failure path of a coordinator operation maps to exactly one
//!   `CoreError` variant; nothing is committed when one is returned.
//! - Only `Conflict` is retryable. The core never retries on its own.

use crate::identity::AuthError;
use crate::model::constraints::ValidationError;
use crate::model::entities::{EntityKind, EntityRef, SpecId};
use crate::repo::RepoError;
use crate::service::locks::LockTimeout;
use crate::service::ordering::{OrderingError, ReorderError};
use crate::service::ownership::AccessError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug)]
pub enum CoreError {
    /// Entity or one of its ancestors is missing or soft-deleted.
    NotFound(EntityRef),
    /// Live entity owned by another user.
    Forbidden(EntityRef),
    Validation(ValidationError),
    /// Specification already holds `limit` live items.
    LimitExceeded { spec_id: SpecId, limit: usize },
    /// Insert position outside `0..=live_count`.
    InvalidOrder { position: i64, live_count: usize },
    InvalidReorder(ReorderError),
    /// Lock wait timed out or a concurrent writer won; safe to retry.
    Conflict(String),
    /// Caller deadline passed before commit.
    DeadlineExceeded,
    Auth(AuthError),
    /// Persistence failure, not retryable.
    Storage(RepoError),
}

impl CoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(target) => match target.kind {
                EntityKind::Project => "PRJ001",
                EntityKind::Specification => "SPEC001",
                EntityKind::BulletItem => "ITEM003",
            },
            Self::Forbidden(_) => "PRJ002",
            Self::Validation(_) => "VAL001",
            Self::LimitExceeded { .. } => "ITEM001",
            Self::InvalidOrder { .. } | Self::InvalidReorder(_) => "ITEM002",
            Self::Conflict(_) => "SYS003",
            Self::DeadlineExceeded => "SYS004",
            Self::Auth(AuthError::Expired) => "AUTH002",
            Self::Auth(_) => "AUTH001",
            Self::Storage(_) => "SYS001",
        }
    }
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(target) => write!(f, "{target} not found"),
            Self::Forbidden(target) => write!(f, "access to {target} is forbidden"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::LimitExceeded { spec_id, limit } => write!(
                f,
                "specification {spec_id} already holds the maximum of {limit} bullet items"
            ),
            Self::InvalidOrder {
                position,
                live_count,
            } => write!(f, "position {position} is outside 0..={live_count}"),
            Self::InvalidReorder(err) => write!(f, "invalid reorder: {err}"),
            Self::Conflict(message) => write!(f, "conflict: {message}"),
            Self::DeadlineExceeded => write!(f, "request deadline exceeded"),
            Self::Auth(err) => write!(f, "{err}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
        }
    }
}

impl Error for CoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::InvalidReorder(err) => Some(err),
            Self::Auth(err) => Some(err),
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for CoreError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(target) => Self::NotFound(target),
            RepoError::Validation(err) => Self::from(err),
            err if err.is_lock_contention() || err.is_unique_violation() => {
                Self::Conflict(err.to_string())
            }
            err => Self::Storage(err),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::from(RepoError::from(value))
    }
}

impl From<ValidationError> for CoreError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<AccessError> for CoreError {
    fn from(value: AccessError) -> Self {
        match value {
            AccessError::NotFound(target) => Self::NotFound(target),
            AccessError::Forbidden(target) => Self::Forbidden(target),
            AccessError::Store(err) => Self::from(err),
        }
    }
}

impl From<OrderingError> for CoreError {
    fn from(value: OrderingError) -> Self {
        match value {
            OrderingError::NotFound(target) => Self::NotFound(target),
            OrderingError::Validation(err) => Self::Validation(err),
            OrderingError::LimitExceeded { spec_id, limit } => {
                Self::LimitExceeded { spec_id, limit }
            }
            OrderingError::InvalidPosition {
                position,
                live_count,
            } => Self::InvalidOrder {
                position,
                live_count,
            },
            OrderingError::InvalidReorder(err) => Self::InvalidReorder(err),
            OrderingError::InvariantViolated { spec_id, orders } => {
                Self::Storage(RepoError::InvalidData(format!(
                    "specification {spec_id} would commit non-dense orders {orders:?}"
                )))
            }
            OrderingError::Store(err) => Self::from(err),
        }
    }
}

impl From<LockTimeout> for CoreError {
    fn from(value: LockTimeout) -> Self {
        Self::Conflict(value.to_string())
    }
}

impl From<AuthError> for CoreError {
    fn from(value: AuthError) -> Self {
        Self::Auth(value)
    }
}
