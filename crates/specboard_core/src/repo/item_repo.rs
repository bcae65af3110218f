//! Bullet item persistence primitives.
//!
//! # Responsibility
//! - Row-level reads and writes the ordering engine composes into
//!   insert/delete/reorder operations.
//!
//! # Invariants
//! - Live listings are ordered by `item_order ASC`.
//! - `(spec_id, item_order)` is unique among live rows (partial unique
//!   index); each `set_item_order` call is checked against it immediately,
//!   so callers must sequence updates to avoid transient collisions.
//! - Settled orders are `0..MAX_BULLET_ITEMS`; negative orders down to
//!   `-MAX_BULLET_ITEMS` are reserved for reorder placeholders.

use super::{parse_flag, RepoError, RepoResult, SqliteEntityStore};
use crate::model::constraints::{
    validate_item_content, validate_order, ValidationError, MAX_BULLET_ITEMS,
};
use crate::model::entities::{BulletItem, EntityRef, ItemId, SpecId};
use rusqlite::{params, Row};

const ITEM_SELECT_SQL: &str = "SELECT
    item_id,
    spec_id,
    content,
    item_order,
    created_at,
    updated_at,
    is_deleted
FROM bullet_items";

/// Repository interface for bullet items.
pub trait ItemStore {
    /// Live items of one specification ordered by `order`.
    fn live_items(&self, spec_id: SpecId) -> RepoResult<Vec<BulletItem>>;
    fn get_item(&self, item_id: ItemId, include_deleted: bool) -> RepoResult<Option<BulletItem>>;
    /// Inserts one live item at an order slot the caller already freed.
    fn insert_item_at(&self, spec_id: SpecId, content: &str, order: i64)
        -> RepoResult<BulletItem>;
    /// Rewrites the order of one live item.
    fn set_item_order(&self, item_id: ItemId, order: i64) -> RepoResult<()>;
    fn update_item_content(&self, item_id: ItemId, content: &str) -> RepoResult<BulletItem>;
    /// Tombstones one live item without touching its siblings.
    fn soft_delete_item(&self, item_id: ItemId) -> RepoResult<()>;
}

impl ItemStore for SqliteEntityStore<'_> {
    fn live_items(&self, spec_id: SpecId) -> RepoResult<Vec<BulletItem>> {
        let mut stmt = self.conn().prepare(&format!(
            "{ITEM_SELECT_SQL}
             WHERE spec_id = ?1
               AND is_deleted = 0
             ORDER BY item_order ASC, item_id ASC;"
        ))?;
        let mut rows = stmt.query([spec_id])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_item_row(row)?);
        }
        Ok(items)
    }

    fn get_item(&self, item_id: ItemId, include_deleted: bool) -> RepoResult<Option<BulletItem>> {
        let mut stmt = self.conn().prepare(&format!(
            "{ITEM_SELECT_SQL}
             WHERE item_id = ?1
               AND (?2 = 1 OR is_deleted = 0);"
        ))?;
        let mut rows = stmt.query(params![item_id, i64::from(include_deleted)])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_item_row(row)?));
        }
        Ok(None)
    }

    fn insert_item_at(
        &self,
        spec_id: SpecId,
        content: &str,
        order: i64,
    ) -> RepoResult<BulletItem> {
        let content = validate_item_content(content)?;
        validate_order(order)?;
        let inserted = self.conn().execute(
            "INSERT INTO bullet_items (spec_id, content, item_order)
             SELECT spec_id, ?2, ?3
             FROM specifications
             WHERE spec_id = ?1
               AND is_deleted = 0;",
            params![spec_id, content, order],
        )?;
        if inserted == 0 {
            return Err(RepoError::NotFound(EntityRef::specification(spec_id)));
        }
        let item_id = self.conn().last_insert_rowid();
        self.get_item(item_id, false)?
            .ok_or(RepoError::NotFound(EntityRef::bullet_item(item_id)))
    }

    fn set_item_order(&self, item_id: ItemId, order: i64) -> RepoResult<()> {
        let bound = MAX_BULLET_ITEMS as i64;
        if !(-bound..bound).contains(&order) {
            return Err(ValidationError::OrderOutOfRange { order }.into());
        }
        let changed = self.conn().execute(
            "UPDATE bullet_items
             SET item_order = ?2,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE item_id = ?1
               AND is_deleted = 0;",
            params![item_id, order],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(EntityRef::bullet_item(item_id)));
        }
        Ok(())
    }

    fn update_item_content(&self, item_id: ItemId, content: &str) -> RepoResult<BulletItem> {
        let content = validate_item_content(content)?;
        let changed = self.conn().execute(
            "UPDATE bullet_items
             SET content = ?2,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE item_id = ?1
               AND is_deleted = 0;",
            params![item_id, content],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(EntityRef::bullet_item(item_id)));
        }
        self.get_item(item_id, false)?
            .ok_or(RepoError::NotFound(EntityRef::bullet_item(item_id)))
    }

    fn soft_delete_item(&self, item_id: ItemId) -> RepoResult<()> {
        let changed = self.conn().execute(
            "UPDATE bullet_items
             SET is_deleted = 1,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE item_id = ?1
               AND is_deleted = 0;",
            [item_id],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(EntityRef::bullet_item(item_id)));
        }
        Ok(())
    }
}

fn parse_item_row(row: &Row<'_>) -> RepoResult<BulletItem> {
    Ok(BulletItem {
        item_id: row.get("item_id")?,
        spec_id: row.get("spec_id")?,
        content: row.get("content")?,
        order: row.get("item_order")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        is_deleted: parse_flag(row.get("is_deleted")?, "bullet_items.is_deleted")?,
    })
}
