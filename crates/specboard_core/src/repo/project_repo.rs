//! User and project persistence.
//!
//! # Invariants
//! - `projects.owner_user_id` is written once at insert; a schema trigger
//!   rejects any later change.
//! - Project soft delete cascades to live specifications and their live
//!   bullet items in the caller's transaction, without renumbering orders.

use super::{parse_flag, parse_user_id, RepoError, RepoResult, SqliteEntityStore};
use crate::model::constraints::{
    normalize_email, validate_display_name, validate_project_title, ValidationError,
};
use crate::model::entities::{CascadeSummary, EntityRef, Project, ProjectId, User, UserId};
use rusqlite::{params, OptionalExtension, Row};

const PROJECT_SELECT_SQL: &str = "SELECT
    project_id,
    title,
    owner_user_id,
    created_at,
    updated_at,
    is_deleted
FROM projects";

/// Repository interface for externally authenticated users.
pub trait UserStore {
    /// Inserts or refreshes one user and stamps `last_login`.
    fn upsert_user(&self, user_id: UserId, email: &str, display_name: &str) -> RepoResult<User>;
    fn get_user(&self, user_id: UserId) -> RepoResult<Option<User>>;
}

/// Repository interface for projects.
pub trait ProjectStore {
    fn insert_project(&self, owner_user_id: UserId, title: &str) -> RepoResult<Project>;
    fn get_project(&self, project_id: ProjectId, include_deleted: bool)
        -> RepoResult<Option<Project>>;
    /// Live projects of one owner, newest first.
    fn list_live_projects(&self, owner_user_id: UserId) -> RepoResult<Vec<Project>>;
    fn update_project_title(&self, project_id: ProjectId, title: &str) -> RepoResult<Project>;
    /// Soft-deletes one live project with its live descendants.
    fn soft_delete_project(&self, project_id: ProjectId) -> RepoResult<CascadeSummary>;
}

impl UserStore for SqliteEntityStore<'_> {
    fn upsert_user(&self, user_id: UserId, email: &str, display_name: &str) -> RepoResult<User> {
        let email = normalize_email(email)?;
        let display_name = validate_display_name(display_name)?;

        self.conn().execute(
            "INSERT INTO users (user_id, email, display_name, last_login)
             VALUES (?1, ?2, ?3, (strftime('%s', 'now') * 1000))
             ON CONFLICT(user_id) DO UPDATE SET
                email = excluded.email,
                display_name = excluded.display_name,
                last_login = excluded.last_login;",
            params![user_id.to_string(), email, display_name],
        )
        .map_err(|err| match RepoError::from(err) {
            // `users.email` is the only unique key left once `user_id` conflicts are upserted.
            err if err.is_unique_violation() => {
                RepoError::Validation(ValidationError::EmailTaken(email.clone()))
            }
            err => err,
        })?;

        self.get_user(user_id)?
            .ok_or_else(|| RepoError::InvalidData(format!("user {user_id} missing after upsert")))
    }

    fn get_user(&self, user_id: UserId) -> RepoResult<Option<User>> {
        let row = self
            .conn()
            .query_row(
                "SELECT user_id, email, display_name, created_at, last_login
                 FROM users
                 WHERE user_id = ?1;",
                [user_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, Option<i64>>(4)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, email, display_name, created_at, last_login)| {
            Ok(User {
                user_id: parse_user_id(&id, "users.user_id")?,
                email,
                display_name,
                created_at,
                last_login,
            })
        })
        .transpose()
    }
}

impl ProjectStore for SqliteEntityStore<'_> {
    fn insert_project(&self, owner_user_id: UserId, title: &str) -> RepoResult<Project> {
        let title = validate_project_title(title)?;
        self.conn().execute(
            "INSERT INTO projects (title, owner_user_id) VALUES (?1, ?2);",
            params![title, owner_user_id.to_string()],
        )?;
        let project_id = self.conn().last_insert_rowid();
        self.get_project(project_id, false)?
            .ok_or(RepoError::NotFound(EntityRef::project(project_id)))
    }

    fn get_project(
        &self,
        project_id: ProjectId,
        include_deleted: bool,
    ) -> RepoResult<Option<Project>> {
        let mut stmt = self.conn().prepare(&format!(
            "{PROJECT_SELECT_SQL}
             WHERE project_id = ?1
               AND (?2 = 1 OR is_deleted = 0);"
        ))?;
        let mut rows = stmt.query(params![project_id, i64::from(include_deleted)])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_project_row(row)?));
        }
        Ok(None)
    }

    fn list_live_projects(&self, owner_user_id: UserId) -> RepoResult<Vec<Project>> {
        let mut stmt = self.conn().prepare(&format!(
            "{PROJECT_SELECT_SQL}
             WHERE owner_user_id = ?1
               AND is_deleted = 0
             ORDER BY updated_at DESC, project_id DESC;"
        ))?;
        let mut rows = stmt.query([owner_user_id.to_string()])?;
        let mut projects = Vec::new();
        while let Some(row) = rows.next()? {
            projects.push(parse_project_row(row)?);
        }
        Ok(projects)
    }

    fn update_project_title(&self, project_id: ProjectId, title: &str) -> RepoResult<Project> {
        let title = validate_project_title(title)?;
        let changed = self.conn().execute(
            "UPDATE projects
             SET title = ?2,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE project_id = ?1
               AND is_deleted = 0;",
            params![project_id, title],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(EntityRef::project(project_id)));
        }
        self.get_project(project_id, false)?
            .ok_or(RepoError::NotFound(EntityRef::project(project_id)))
    }

    fn soft_delete_project(&self, project_id: ProjectId) -> RepoResult<CascadeSummary> {
        let changed = self.conn().execute(
            "UPDATE projects
             SET is_deleted = 1,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE project_id = ?1
               AND is_deleted = 0;",
            [project_id],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(EntityRef::project(project_id)));
        }

        // Items first: the spec filter below still sees the specs as live.
        let bullet_items = self.conn().execute(
            "UPDATE bullet_items
             SET is_deleted = 1,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE is_deleted = 0
               AND spec_id IN (
                 SELECT spec_id
                 FROM specifications
                 WHERE project_id = ?1
                   AND is_deleted = 0
               );",
            [project_id],
        )?;
        let specifications = self.conn().execute(
            "UPDATE specifications
             SET is_deleted = 1,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE project_id = ?1
               AND is_deleted = 0;",
            [project_id],
        )?;

        Ok(CascadeSummary {
            specifications,
            bullet_items,
        })
    }
}

fn parse_project_row(row: &Row<'_>) -> RepoResult<Project> {
    let owner_text: String = row.get("owner_user_id")?;
    Ok(Project {
        project_id: row.get("project_id")?,
        title: row.get("title")?,
        owner_user_id: parse_user_id(&owner_text, "projects.owner_user_id")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        is_deleted: parse_flag(row.get("is_deleted")?, "projects.is_deleted")?,
    })
}
