//! Specification persistence.
//!
//! # Invariants
//! - A specification is inserted only under a live project.
//! - Specification soft delete cascades to its live bullet items in the
//!   caller's transaction; orders of the tombstoned items are left as-is.

use super::{parse_flag, RepoError, RepoResult, SqliteEntityStore};
use crate::model::constraints::validate_specification_content;
use crate::model::entities::{CascadeSummary, EntityRef, ProjectId, SpecId, Specification};
use rusqlite::{params, Row};

const SPEC_SELECT_SQL: &str = "SELECT
    spec_id,
    project_id,
    content,
    created_at,
    updated_at,
    is_deleted
FROM specifications";

/// Repository interface for specifications.
pub trait SpecificationStore {
    fn insert_specification(&self, project_id: ProjectId, content: &str)
        -> RepoResult<Specification>;
    fn get_specification(
        &self,
        spec_id: SpecId,
        include_deleted: bool,
    ) -> RepoResult<Option<Specification>>;
    /// Live specifications of one project, oldest first.
    fn list_live_specifications(&self, project_id: ProjectId) -> RepoResult<Vec<Specification>>;
    /// Ids of live specifications of one project, ascending.
    fn live_specification_ids(&self, project_id: ProjectId) -> RepoResult<Vec<SpecId>>;
    /// Ids of every specification that is live together with its project.
    fn all_live_specification_ids(&self) -> RepoResult<Vec<SpecId>>;
    fn update_specification_content(
        &self,
        spec_id: SpecId,
        content: &str,
    ) -> RepoResult<Specification>;
    /// Soft-deletes one live specification with its live bullet items.
    fn soft_delete_specification(&self, spec_id: SpecId) -> RepoResult<CascadeSummary>;
}

impl SpecificationStore for SqliteEntityStore<'_> {
    fn insert_specification(
        &self,
        project_id: ProjectId,
        content: &str,
    ) -> RepoResult<Specification> {
        let content = validate_specification_content(content)?;
        let inserted = self.conn().execute(
            "INSERT INTO specifications (project_id, content)
             SELECT project_id, ?2
             FROM projects
             WHERE project_id = ?1
               AND is_deleted = 0;",
            params![project_id, content],
        )?;
        if inserted == 0 {
            return Err(RepoError::NotFound(EntityRef::project(project_id)));
        }
        let spec_id = self.conn().last_insert_rowid();
        self.get_specification(spec_id, false)?
            .ok_or(RepoError::NotFound(EntityRef::specification(spec_id)))
    }

    fn get_specification(
        &self,
        spec_id: SpecId,
        include_deleted: bool,
    ) -> RepoResult<Option<Specification>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SPEC_SELECT_SQL}
             WHERE spec_id = ?1
               AND (?2 = 1 OR is_deleted = 0);"
        ))?;
        let mut rows = stmt.query(params![spec_id, i64::from(include_deleted)])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_spec_row(row)?));
        }
        Ok(None)
    }

    fn list_live_specifications(&self, project_id: ProjectId) -> RepoResult<Vec<Specification>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SPEC_SELECT_SQL}
             WHERE project_id = ?1
               AND is_deleted = 0
             ORDER BY created_at ASC, spec_id ASC;"
        ))?;
        let mut rows = stmt.query([project_id])?;
        let mut specs = Vec::new();
        while let Some(row) = rows.next()? {
            specs.push(parse_spec_row(row)?);
        }
        Ok(specs)
    }

    fn live_specification_ids(&self, project_id: ProjectId) -> RepoResult<Vec<SpecId>> {
        let mut stmt = self.conn().prepare(
            "SELECT spec_id
             FROM specifications
             WHERE project_id = ?1
               AND is_deleted = 0
             ORDER BY spec_id ASC;",
        )?;
        let ids = stmt
            .query_map([project_id], |row| row.get(0))?
            .collect::<Result<Vec<SpecId>, _>>()?;
        Ok(ids)
    }

    fn all_live_specification_ids(&self) -> RepoResult<Vec<SpecId>> {
        let mut stmt = self.conn().prepare(
            "SELECT s.spec_id
             FROM specifications s
             INNER JOIN projects p ON p.project_id = s.project_id
             WHERE s.is_deleted = 0
               AND p.is_deleted = 0
             ORDER BY s.spec_id ASC;",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<SpecId>, _>>()?;
        Ok(ids)
    }

    fn update_specification_content(
        &self,
        spec_id: SpecId,
        content: &str,
    ) -> RepoResult<Specification> {
        let content = validate_specification_content(content)?;
        let changed = self.conn().execute(
            "UPDATE specifications
             SET content = ?2,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE spec_id = ?1
               AND is_deleted = 0;",
            params![spec_id, content],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(EntityRef::specification(spec_id)));
        }
        self.get_specification(spec_id, false)?
            .ok_or(RepoError::NotFound(EntityRef::specification(spec_id)))
    }

    fn soft_delete_specification(&self, spec_id: SpecId) -> RepoResult<CascadeSummary> {
        let changed = self.conn().execute(
            "UPDATE specifications
             SET is_deleted = 1,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE spec_id = ?1
               AND is_deleted = 0;",
            [spec_id],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(EntityRef::specification(spec_id)));
        }

        let bullet_items = self.conn().execute(
            "UPDATE bullet_items
             SET is_deleted = 1,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE spec_id = ?1
               AND is_deleted = 0;",
            [spec_id],
        )?;

        Ok(CascadeSummary {
            specifications: 1,
            bullet_items,
        })
    }
}

fn parse_spec_row(row: &Row<'_>) -> RepoResult<Specification> {
    Ok(Specification {
        spec_id: row.get("spec_id")?,
        project_id: row.get("project_id")?,
        content: row.get("content")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        is_deleted: parse_flag(row.get("is_deleted")?, "specifications.is_deleted")?,
    })
}
