//! Ordering engine for bullet items.
//!
//! # Responsibility
//! - Insert, delete and permute bullet items of one specification while
//!   keeping live orders densely packed.
//!
//! # Invariants
//! - Before and after every operation the live orders of a specification are
//!   exactly `{0, .., N-1}` with `N <= MAX_BULLET_ITEMS`.
//! - Each individual row update keeps `(spec_id, order)` unique among live
//!   rows: inserts shift highest order first, deletes close the gap lowest
//!   order first, reorders stage every row on a distinct negative
//!   placeholder before writing final orders.
//! - All input checks run before the first write. The engine never commits;
//!   the caller's transaction decides whether a run becomes visible.
//!
//! # See also
//! - `service::coordinator` for locking and transaction scope.

use crate::model::constraints::{
    validate_item_capacity, validate_item_content, ValidationError, MAX_BULLET_ITEMS,
};
use crate::model::entities::{BulletItem, EntityRef, ItemId, SpecId};
use crate::repo::{ItemStore, RepoError, RepoResult, SpecificationStore};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type OrderingResult<T> = Result<T, OrderingError>;

/// Reason a reorder map is not a bijection onto `0..N`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReorderError {
    /// Id is not a live item of the specification.
    UnknownItem(ItemId),
    /// Id appears more than once.
    DuplicateItem(ItemId),
    /// Live item has no target order.
    MissingItem(ItemId),
    /// Two items target the same order.
    DuplicateTarget(i64),
    /// Target order is outside `0..live_count`.
    TargetOutOfRange { order: i64, live_count: usize },
}

impl Display for ReorderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownItem(id) => write!(f, "item {id} is not a live item of the specification"),
            Self::DuplicateItem(id) => write!(f, "item {id} appears more than once"),
            Self::MissingItem(id) => write!(f, "item {id} has no target order"),
            Self::DuplicateTarget(order) => write!(f, "order {order} is assigned twice"),
            Self::TargetOutOfRange { order, live_count } => write!(
                f,
                "order {order} is outside 0..{live_count}"
            ),
        }
    }
}

impl Error for ReorderError {}

/// Ordering engine failure.
#[derive(Debug)]
pub enum OrderingError {
    NotFound(EntityRef),
    Validation(ValidationError),
    LimitExceeded { spec_id: SpecId, limit: usize },
    InvalidPosition { position: i64, live_count: usize },
    InvalidReorder(ReorderError),
    /// Live orders are not dense; the transaction must not commit.
    InvariantViolated { spec_id: SpecId, orders: Vec<i64> },
    Store(RepoError),
}

impl Display for OrderingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(target) => write!(f, "{target} not found"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::LimitExceeded { spec_id, limit } => write!(
                f,
                "specification {spec_id} already holds the maximum of {limit} bullet items"
            ),
            Self::InvalidPosition {
                position,
                live_count,
            } => write!(f, "position {position} is outside 0..={live_count}"),
            Self::InvalidReorder(err) => write!(f, "invalid reorder: {err}"),
            Self::InvariantViolated { spec_id, orders } => write!(
                f,
                "specification {spec_id} has non-dense live orders {orders:?}"
            ),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for OrderingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::InvalidReorder(err) => Some(err),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for OrderingError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(target) => Self::NotFound(target),
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::Store(other),
        }
    }
}

impl From<ReorderError> for OrderingError {
    fn from(value: ReorderError) -> Self {
        Self::InvalidReorder(value)
    }
}

/// Specification whose live orders are not `0..N`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenseOrderViolation {
    pub spec_id: SpecId,
    /// Live orders as stored, ascending.
    pub orders: Vec<i64>,
}

/// Ordering operations over any `ItemStore`.
pub struct OrderingEngine<'s, S: ItemStore> {
    store: &'s S,
}

impl<'s, S: ItemStore> OrderingEngine<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    /// Inserts one item at `requested_position`, or appends when `None`.
    ///
    /// Siblings at or after the position move up by one.
    pub fn insert(
        &self,
        spec_id: SpecId,
        content: &str,
        requested_position: Option<i64>,
    ) -> OrderingResult<BulletItem> {
        let content = validate_item_content(content).map_err(OrderingError::Validation)?;
        let items = self.store.live_items(spec_id)?;
        let live_count = items.len();
        validate_item_capacity(live_count).map_err(|_| OrderingError::LimitExceeded {
            spec_id,
            limit: MAX_BULLET_ITEMS,
        })?;

        let position = requested_position.unwrap_or(live_count as i64);
        if !(0..=live_count as i64).contains(&position) {
            return Err(OrderingError::InvalidPosition {
                position,
                live_count,
            });
        }

        for item in items.iter().rev().filter(|item| item.order >= position) {
            self.store.set_item_order(item.item_id, item.order + 1)?;
        }
        Ok(self.store.insert_item_at(spec_id, &content, position)?)
    }

    /// Soft-deletes one live item and closes the gap it leaves.
    ///
    /// Returns the item as it was before deletion, flagged deleted.
    pub fn delete(&self, item_id: ItemId) -> OrderingResult<BulletItem> {
        let target = self
            .store
            .get_item(item_id, false)?
            .ok_or(OrderingError::NotFound(EntityRef::bullet_item(item_id)))?;
        let siblings = self.store.live_items(target.spec_id)?;

        self.store.soft_delete_item(item_id)?;
        for item in siblings.iter().filter(|item| item.order > target.order) {
            self.store.set_item_order(item.item_id, item.order - 1)?;
        }

        Ok(BulletItem {
            is_deleted: true,
            ..target
        })
    }

    /// Applies a full permutation of the live items of `spec_id`.
    ///
    /// Returns the live items in their new order.
    pub fn reorder(
        &self,
        spec_id: SpecId,
        assignments: &[(ItemId, i64)],
    ) -> OrderingResult<Vec<BulletItem>> {
        let items = self.store.live_items(spec_id)?;
        let live_ids = items.iter().map(|item| item.item_id).collect::<Vec<_>>();
        validate_reorder(&live_ids, assignments)?;

        for (index, (item_id, _)) in assignments.iter().enumerate() {
            self.store.set_item_order(*item_id, placeholder_order(index))?;
        }
        for (item_id, order) in assignments {
            self.store.set_item_order(*item_id, *order)?;
        }

        Ok(self.store.live_items(spec_id)?)
    }

    /// Fails with `InvariantViolated` unless live orders of `spec_id` are dense.
    pub fn verify_dense(&self, spec_id: SpecId) -> OrderingResult<()> {
        let orders = self
            .store
            .live_items(spec_id)?
            .into_iter()
            .map(|item| item.order)
            .collect::<Vec<_>>();
        if is_dense(&orders) {
            Ok(())
        } else {
            Err(OrderingError::InvariantViolated { spec_id, orders })
        }
    }
}

/// Checks that `live_ids -> order` in `assignments` is a bijection onto
/// `0..live_ids.len()`.
pub fn validate_reorder(
    live_ids: &[ItemId],
    assignments: &[(ItemId, i64)],
) -> Result<(), ReorderError> {
    let live_count = live_ids.len();
    let live = live_ids.iter().copied().collect::<HashSet<_>>();
    let mut seen_ids = HashSet::with_capacity(assignments.len());
    let mut seen_orders = HashSet::with_capacity(assignments.len());

    for (item_id, order) in assignments {
        if !live.contains(item_id) {
            return Err(ReorderError::UnknownItem(*item_id));
        }
        if !seen_ids.insert(*item_id) {
            return Err(ReorderError::DuplicateItem(*item_id));
        }
        if !(0..live_count as i64).contains(order) {
            return Err(ReorderError::TargetOutOfRange {
                order: *order,
                live_count,
            });
        }
        if !seen_orders.insert(*order) {
            return Err(ReorderError::DuplicateTarget(*order));
        }
    }

    if let Some(missing) = live_ids.iter().find(|id| !seen_ids.contains(*id)) {
        return Err(ReorderError::MissingItem(*missing));
    }
    Ok(())
}

/// Whether `orders` (any order) is exactly `{0, .., len-1}` within the item cap.
pub fn is_dense(orders: &[i64]) -> bool {
    if orders.len() > MAX_BULLET_ITEMS {
        return false;
    }
    let mut sorted = orders.to_vec();
    sorted.sort_unstable();
    sorted
        .iter()
        .enumerate()
        .all(|(index, order)| *order == index as i64)
}

/// Scans every live specification and reports those with non-dense orders.
pub fn audit_dense_order<S>(store: &S) -> RepoResult<Vec<DenseOrderViolation>>
where
    S: ItemStore + SpecificationStore,
{
    let mut violations = Vec::new();
    for spec_id in store.all_live_specification_ids()? {
        let orders = store
            .live_items(spec_id)?
            .into_iter()
            .map(|item| item.order)
            .collect::<Vec<_>>();
        if !is_dense(&orders) {
            violations.push(DenseOrderViolation { spec_id, orders });
        }
    }
    Ok(violations)
}

fn placeholder_order(index: usize) -> i64 {
    -(index as i64 + 1)
}
