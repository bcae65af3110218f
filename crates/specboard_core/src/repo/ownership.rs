//! Single-query ownership path lookup.
//!
//! Resolves any entity to its owning project in one joined read. A path is
//! returned only when the target and every ancestor are live.

use super::{parse_user_id, RepoResult, SqliteEntityStore};
use crate::model::entities::{EntityKind, EntityRef, ItemId, ProjectId, SpecId, UserId};
use rusqlite::OptionalExtension;

/// Live ancestry of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnershipPath {
    pub owner_user_id: UserId,
    pub project_id: ProjectId,
    /// Set for specifications and bullet items.
    pub spec_id: Option<SpecId>,
    /// Set for bullet items.
    pub item_id: Option<ItemId>,
}

/// Read path used by the ownership resolver.
pub trait OwnershipStore {
    /// Returns `None` when the target or any ancestor is missing or deleted.
    fn resolve_live_path(&self, target: EntityRef) -> RepoResult<Option<OwnershipPath>>;
}

impl OwnershipStore for SqliteEntityStore<'_> {
    fn resolve_live_path(&self, target: EntityRef) -> RepoResult<Option<OwnershipPath>> {
        let sql = match target.kind {
            EntityKind::Project => {
                "SELECT p.owner_user_id, p.project_id, NULL, NULL
                 FROM projects p
                 WHERE p.project_id = ?1
                   AND p.is_deleted = 0;"
            }
            EntityKind::Specification => {
                "SELECT p.owner_user_id, p.project_id, s.spec_id, NULL
                 FROM specifications s
                 INNER JOIN projects p ON p.project_id = s.project_id
                 WHERE s.spec_id = ?1
                   AND s.is_deleted = 0
                   AND p.is_deleted = 0;"
            }
            EntityKind::BulletItem => {
                "SELECT p.owner_user_id, p.project_id, s.spec_id, b.item_id
                 FROM bullet_items b
                 INNER JOIN specifications s ON s.spec_id = b.spec_id
                 INNER JOIN projects p ON p.project_id = s.project_id
                 WHERE b.item_id = ?1
                   AND b.is_deleted = 0
                   AND s.is_deleted = 0
                   AND p.is_deleted = 0;"
            }
        };

        let row = self
            .conn()
            .query_row(sql, [target.id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, ProjectId>(1)?,
                    row.get::<_, Option<SpecId>>(2)?,
                    row.get::<_, Option<ItemId>>(3)?,
                ))
            })
            .optional()?;

        row.map(|(owner, project_id, spec_id, item_id)| {
            Ok(OwnershipPath {
                owner_user_id: parse_user_id(&owner, "projects.owner_user_id")?,
                project_id,
                spec_id,
                item_id,
            })
        })
        .transpose()
    }
}
