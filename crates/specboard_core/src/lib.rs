//! Core domain logic for specboard.
//!
//! Owns the `Project -> Specification -> BulletItem` hierarchy: ownership
//! checks, dense item ordering, cascading soft delete and the transactional
//! coordinator that ties them together. This crate is the single source of
//! truth for those invariants.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use cache::{InMemoryReadCache, NoopCache, ReadCache};
pub use config::{ConfigError, CoreConfig};
pub use db::{open_db, open_db_in_memory, open_db_with_busy_timeout, DbError};
pub use error::{CoreError, CoreResult};
pub use identity::{AuthError, IdentityVerifier, StaticIdentityVerifier, VerifiedIdentity};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::constraints::{ValidationError, MAX_BULLET_ITEMS};
pub use model::entities::{
    BulletItem, CascadeSummary, EntityKind, EntityRef, ItemId, Project, ProjectId, SpecId,
    Specification, User, UserId,
};
pub use repo::{RepoError, RepoResult, SqliteEntityStore};
pub use service::coordinator::{Coordinator, CoreRuntime};
pub use service::locks::{LockKey, SpecLocks};
pub use service::ordering::{DenseOrderViolation, ReorderError};
pub use service::scope::RequestScope;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
