//! Ownership resolver.
//!
//! # Responsibility
//! - Authorize one user against any entity by walking to its owning project.
//!
//! # Invariants
//! - Missing or soft-deleted targets (or ancestors) yield `NotFound` for every
//!   caller, so existence never leaks through `Forbidden`.
//! - `Forbidden` is returned only for a live target owned by someone else.

use crate::model::entities::{EntityRef, ProjectId, SpecId, UserId};
use crate::repo::{OwnershipStore, RepoError};
use log::debug;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Authorization failure.
#[derive(Debug)]
pub enum AccessError {
    NotFound(EntityRef),
    Forbidden(EntityRef),
    Store(RepoError),
}

impl Display for AccessError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(target) => write!(f, "{target} not found"),
            Self::Forbidden(target) => write!(f, "access to {target} is forbidden"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for AccessError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for AccessError {
    fn from(value: RepoError) -> Self {
        Self::Store(value)
    }
}

/// Live target the caller is allowed to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorizedTarget {
    pub target: EntityRef,
    pub project_id: ProjectId,
    /// Owning specification for specification and bullet item targets.
    pub spec_id: Option<SpecId>,
}

/// Resolves ownership over any `OwnershipStore`.
pub struct OwnershipResolver<'s, S: OwnershipStore> {
    store: &'s S,
}

impl<'s, S: OwnershipStore> OwnershipResolver<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    /// Returns the live ancestry of `target` when `user_id` owns it.
    pub fn authorize(
        &self,
        user_id: UserId,
        target: EntityRef,
    ) -> Result<AuthorizedTarget, AccessError> {
        let Some(path) = self.store.resolve_live_path(target)? else {
            debug!(
                "event=authorize module=ownership status=denied reason=not_found target={}",
                target
            );
            return Err(AccessError::NotFound(target));
        };

        if path.owner_user_id != user_id {
            debug!(
                "event=authorize module=ownership status=denied reason=forbidden target={}",
                target
            );
            return Err(AccessError::Forbidden(target));
        }

        Ok(AuthorizedTarget {
            target,
            project_id: path.project_id,
            spec_id: path.spec_id,
        })
    }
}
