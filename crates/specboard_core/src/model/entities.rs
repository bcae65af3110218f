//! Ownership hierarchy entities.
//!
//! # Responsibility
//! - Define read models for `User -> Project -> Specification -> BulletItem`.
//! - Provide typed references used by authorization and error reporting.
//!
//! # Invariants
//! - `Project::owner_user_id` never changes after creation.
//! - Soft delete is the only deletion path; `is_deleted` is the tombstone.
//! - A child is live only when it and every ancestor are live.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Opaque external identity of one user.
pub type UserId = Uuid;
/// Integer primary key of `projects`.
pub type ProjectId = i64;
/// Integer primary key of `specifications`.
pub type SpecId = i64;
/// Integer primary key of `bullet_items`.
pub type ItemId = i64;

/// Hierarchy level of an addressable entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Project,
    Specification,
    BulletItem,
}

impl EntityKind {
    /// Stable lowercase name used in logs and error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Specification => "specification",
            Self::BulletItem => "bullet_item",
        }
    }
}

/// Typed pointer to one entity in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: i64,
}

impl EntityRef {
    pub fn project(id: ProjectId) -> Self {
        Self {
            kind: EntityKind::Project,
            id,
        }
    }

    pub fn specification(id: SpecId) -> Self {
        Self {
            kind: EntityKind::Specification,
            id,
        }
    }

    pub fn bullet_item(id: ItemId) -> Self {
        Self {
            kind: EntityKind::BulletItem,
            id,
        }
    }
}

impl Display for EntityRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind.as_str(), self.id)
    }
}

/// Externally authenticated user, upserted on each successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,
    /// Lowercased, trimmed address.
    pub email: String,
    pub display_name: String,
    /// Epoch ms.
    pub created_at: i64,
    /// Epoch ms of the latest successful authentication.
    pub last_login: Option<i64>,
}

/// Top-level container exclusively owned by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub project_id: ProjectId,
    pub title: String,
    pub owner_user_id: UserId,
    pub created_at: i64,
    pub updated_at: i64,
    pub is_deleted: bool,
}

impl Project {
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.owner_user_id == user_id
    }
}

/// Specification text belonging to exactly one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Specification {
    pub spec_id: SpecId,
    pub project_id: ProjectId,
    pub content: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub is_deleted: bool,
}

/// One ordered entry of a specification.
///
/// Live items of a specification always carry orders `0..N-1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulletItem {
    pub item_id: ItemId,
    pub spec_id: SpecId,
    pub content: String,
    pub order: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub is_deleted: bool,
}

/// Row counts touched by a cascading soft delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeSummary {
    pub specifications: usize,
    pub bullet_items: usize,
}
