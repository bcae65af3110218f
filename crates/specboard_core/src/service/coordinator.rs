//! Transaction coordinator: the public entry point of the core.
//!
//! # Responsibility
//! - Authorize, lock, validate and mutate in one atomic unit per call.
//! - Serve reads from a consistent snapshot without taking locks.
//!
//! # Invariants
//! - Writes to one specification are serialized by its `SpecLocks` slot;
//!   project renames, specification creation and project cascades
//!   serialize on the project slot.
//! - Authorization is checked twice: once unlocked to pick lock keys and
//!   again inside the write transaction, so a target deleted while waiting
//!   is reported as `NotFound`.
//! - Touched specifications are checked for dense orders before commit. Any
//!   error, including an expired deadline, drops the transaction
//!   uncommitted.
//! - Cache entries are invalidated only after a successful commit.
//!
//! # See also
//! - `service::ordering` for the order-preserving item mutations.

use crate::cache::{InMemoryReadCache, NoopCache, ReadCache};
use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::identity::{AuthError, IdentityVerifier};
use crate::model::entities::{
    BulletItem, CascadeSummary, EntityRef, ItemId, Project, ProjectId, SpecId, Specification, User,
};
use crate::repo::{ItemStore, ProjectStore, SpecificationStore, SqliteEntityStore, UserStore};
use crate::service::locks::{LockKey, LockSet, LockTimeout, SpecLocks};
use crate::service::ordering::{audit_dense_order, DenseOrderViolation, OrderingEngine};
use crate::service::ownership::{AuthorizedTarget, OwnershipResolver};
use crate::service::scope::RequestScope;
use log::{debug, info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Process-wide state shared by every coordinator.
///
/// Cheap to clone; clones share the same lock registry and cache.
#[derive(Clone)]
pub struct CoreRuntime {
    locks: Arc<SpecLocks>,
    cache: Arc<dyn ReadCache>,
    config: CoreConfig,
}

impl CoreRuntime {
    pub fn new(config: CoreConfig) -> Self {
        Self {
            locks: Arc::new(SpecLocks::new()),
            cache: Arc::new(NoopCache),
            config,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ReadCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Installs an `InMemoryReadCache` whose entries live for
    /// `config.cache_ttl`.
    pub fn with_configured_cache(self) -> Self {
        let cache = Arc::new(InMemoryReadCache::new(self.config.cache_ttl));
        self.with_cache(cache)
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn locks(&self) -> &SpecLocks {
        &self.locks
    }

    /// Binds the runtime to one migrated connection.
    ///
    /// Each worker thread uses its own connection; a `Coordinator` is not
    /// shared between threads.
    pub fn coordinator<'conn>(&self, conn: &'conn Connection) -> CoreResult<Coordinator<'conn>> {
        SqliteEntityStore::try_new(conn)?;
        Ok(Coordinator {
            conn,
            runtime: self.clone(),
        })
    }
}

impl Default for CoreRuntime {
    fn default() -> Self {
        Self::new(CoreConfig::default())
    }
}

/// Which lock slots a mutation holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockPlan {
    /// Project slot of the target.
    Project,
    /// Specification slot of the target.
    Specification,
    /// Project slot, then every live specification slot of the project.
    ProjectCascade,
}

/// Result of a mutation body plus the specifications whose items it touched.
struct Mutation<T> {
    value: T,
    touched: Vec<SpecId>,
    /// Touched specifications were soft-deleted.
    retired: bool,
}

impl<T> Mutation<T> {
    fn untouched(value: T) -> Self {
        Self::touching(value, Vec::new())
    }

    fn touching(value: T, touched: Vec<SpecId>) -> Self {
        Self {
            value,
            touched,
            retired: false,
        }
    }

    fn retiring(value: T, deleted: Vec<SpecId>) -> Self {
        Self {
            value,
            touched: deleted,
            retired: true,
        }
    }
}

/// Per-connection facade over the ownership hierarchy.
pub struct Coordinator<'conn> {
    conn: &'conn Connection,
    runtime: CoreRuntime,
}

impl<'conn> Coordinator<'conn> {
    /// Verifies `credential` and records the user.
    ///
    /// Returns the stored user and an unbounded scope for it.
    pub fn authenticate(
        &self,
        verifier: &dyn IdentityVerifier,
        credential: &str,
    ) -> CoreResult<(User, RequestScope)> {
        let identity = verifier.verify(credential).map_err(|err| {
            warn!(
                "event=authenticate module=coordinator status=rejected reason={}",
                auth_reason(&err)
            );
            CoreError::Auth(err)
        })?;
        let scope = RequestScope::new(identity.user_id);
        let user = self.commit_scope(&scope, |store| {
            Ok(Mutation::untouched(store.upsert_user(
                identity.user_id,
                &identity.email,
                &identity.display_name,
            )?))
        })?;
        info!(
            "event=authenticate module=coordinator status=ok user_id={}",
            user.user_id
        );
        Ok((user, scope))
    }

    pub fn create_project(&self, scope: &RequestScope, title: &str) -> CoreResult<Project> {
        let started_at = Instant::now();
        let result = scope.ensure_active().and_then(|()| {
            self.commit_scope(scope, |store| {
                if store.get_user(scope.user_id())?.is_none() {
                    return Err(CoreError::Auth(AuthError::InvalidCredential));
                }
                Ok(Mutation::untouched(
                    store.insert_project(scope.user_id(), title)?,
                ))
            })
        });
        log_outcome("create_project", None, started_at, &result);
        result
    }

    pub fn get_project(&self, scope: &RequestScope, project_id: ProjectId) -> CoreResult<Project> {
        self.read(scope, EntityRef::project(project_id), |store, _| {
            live(store.get_project(project_id, false)?, EntityRef::project(project_id))
        })
    }

    /// Live projects owned by the caller, most recently updated first.
    pub fn list_projects(&self, scope: &RequestScope) -> CoreResult<Vec<Project>> {
        scope.ensure_active()?;
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Deferred)?;
        let projects = SqliteEntityStore::unchecked(&tx).list_live_projects(scope.user_id())?;
        tx.commit()?;
        Ok(projects)
    }

    pub fn rename_project(
        &self,
        scope: &RequestScope,
        project_id: ProjectId,
        title: &str,
    ) -> CoreResult<Project> {
        self.mutate(
            scope,
            "rename_project",
            EntityRef::project(project_id),
            LockPlan::Project,
            |store, _| Ok(Mutation::untouched(store.update_project_title(project_id, title)?)),
        )
    }

    /// Soft-deletes the project with every live specification and item.
    pub fn delete_project(
        &self,
        scope: &RequestScope,
        project_id: ProjectId,
    ) -> CoreResult<CascadeSummary> {
        self.mutate(
            scope,
            "delete_project",
            EntityRef::project(project_id),
            LockPlan::ProjectCascade,
            |store, _| {
                let touched = store.live_specification_ids(project_id)?;
                let summary = store.soft_delete_project(project_id)?;
                Ok(Mutation::retiring(summary, touched))
            },
        )
    }

    pub fn create_specification(
        &self,
        scope: &RequestScope,
        project_id: ProjectId,
        content: &str,
    ) -> CoreResult<Specification> {
        self.mutate(
            scope,
            "create_specification",
            EntityRef::project(project_id),
            LockPlan::Project,
            |store, _| {
                Ok(Mutation::untouched(
                    store.insert_specification(project_id, content)?,
                ))
            },
        )
    }

    pub fn get_specification(
        &self,
        scope: &RequestScope,
        spec_id: SpecId,
    ) -> CoreResult<Specification> {
        self.read(scope, EntityRef::specification(spec_id), |store, _| {
            live(
                store.get_specification(spec_id, false)?,
                EntityRef::specification(spec_id),
            )
        })
    }

    /// Live specifications of the project, oldest first.
    pub fn list_specifications(
        &self,
        scope: &RequestScope,
        project_id: ProjectId,
    ) -> CoreResult<Vec<Specification>> {
        self.read(scope, EntityRef::project(project_id), |store, _| {
            Ok(store.list_live_specifications(project_id)?)
        })
    }

    pub fn update_specification(
        &self,
        scope: &RequestScope,
        spec_id: SpecId,
        content: &str,
    ) -> CoreResult<Specification> {
        self.mutate(
            scope,
            "update_specification",
            EntityRef::specification(spec_id),
            LockPlan::Specification,
            |store, _| {
                Ok(Mutation::untouched(
                    store.update_specification_content(spec_id, content)?,
                ))
            },
        )
    }

    /// Soft-deletes the specification with its live items.
    pub fn delete_specification(
        &self,
        scope: &RequestScope,
        spec_id: SpecId,
    ) -> CoreResult<CascadeSummary> {
        self.mutate(
            scope,
            "delete_specification",
            EntityRef::specification(spec_id),
            LockPlan::Specification,
            |store, _| {
                let summary = store.soft_delete_specification(spec_id)?;
                Ok(Mutation::retiring(summary, vec![spec_id]))
            },
        )
    }

    /// Inserts one item at `position` (append when `None`), shifting later
    /// items down by one.
    pub fn insert_item(
        &self,
        scope: &RequestScope,
        spec_id: SpecId,
        content: &str,
        position: Option<i64>,
    ) -> CoreResult<BulletItem> {
        self.mutate(
            scope,
            "insert_item",
            EntityRef::specification(spec_id),
            LockPlan::Specification,
            |store, _| {
                let item = OrderingEngine::new(store).insert(spec_id, content, position)?;
                Ok(Mutation::touching(item, vec![spec_id]))
            },
        )
    }

    pub fn get_item(&self, scope: &RequestScope, item_id: ItemId) -> CoreResult<BulletItem> {
        self.read(scope, EntityRef::bullet_item(item_id), |store, _| {
            live(store.get_item(item_id, false)?, EntityRef::bullet_item(item_id))
        })
    }

    /// Live items of the specification in order.
    ///
    /// Served from the read cache when it holds a fresh entry.
    pub fn list_items(&self, scope: &RequestScope, spec_id: SpecId) -> CoreResult<Vec<BulletItem>> {
        let cache = Arc::clone(&self.runtime.cache);
        // Read before the snapshot starts; a commit landing after it bumps the
        // generation and the put below is dropped.
        let generation = cache.generation(spec_id);
        self.read(scope, EntityRef::specification(spec_id), |store, _| {
            if let Some(items) = cache.get_items(spec_id) {
                debug!(
                    "event=list_items module=coordinator status=ok source=cache spec_id={}",
                    spec_id
                );
                return Ok(items);
            }
            let items = store.live_items(spec_id)?;
            cache.put_items(spec_id, generation, items.clone());
            Ok(items)
        })
    }

    /// Replaces item content; order is unchanged.
    pub fn update_item(
        &self,
        scope: &RequestScope,
        item_id: ItemId,
        content: &str,
    ) -> CoreResult<BulletItem> {
        self.mutate(
            scope,
            "update_item",
            EntityRef::bullet_item(item_id),
            LockPlan::Specification,
            |store, target| {
                let item = store.update_item_content(item_id, content)?;
                Ok(Mutation::touching(item, target.spec_id.into_iter().collect()))
            },
        )
    }

    /// Soft-deletes one item and closes the gap it leaves.
    pub fn delete_item(&self, scope: &RequestScope, item_id: ItemId) -> CoreResult<BulletItem> {
        self.mutate(
            scope,
            "delete_item",
            EntityRef::bullet_item(item_id),
            LockPlan::Specification,
            |store, _| {
                let item = OrderingEngine::new(store).delete(item_id)?;
                let spec_id = item.spec_id;
                Ok(Mutation::touching(item, vec![spec_id]))
            },
        )
    }

    /// Applies a full permutation `item_id -> new order` of the live items.
    pub fn reorder_items(
        &self,
        scope: &RequestScope,
        spec_id: SpecId,
        assignments: &[(ItemId, i64)],
    ) -> CoreResult<Vec<BulletItem>> {
        self.mutate(
            scope,
            "reorder_items",
            EntityRef::specification(spec_id),
            LockPlan::Specification,
            |store, _| {
                let items = OrderingEngine::new(store).reorder(spec_id, assignments)?;
                Ok(Mutation::touching(items, vec![spec_id]))
            },
        )
    }

    /// Scans all live specifications for non-dense orders.
    pub fn audit_dense_order(&self) -> CoreResult<Vec<DenseOrderViolation>> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Deferred)?;
        let violations = audit_dense_order(&SqliteEntityStore::unchecked(&tx))?;
        tx.commit()?;
        if !violations.is_empty() {
            warn!(
                "event=audit_dense_order module=coordinator status=violations count={}",
                violations.len()
            );
        }
        Ok(violations)
    }

    fn mutate<T>(
        &self,
        scope: &RequestScope,
        operation: &'static str,
        target: EntityRef,
        plan: LockPlan,
        body: impl FnOnce(&SqliteEntityStore<'_>, AuthorizedTarget) -> CoreResult<Mutation<T>>,
    ) -> CoreResult<T> {
        let started_at = Instant::now();
        let result = self.mutate_locked(scope, target, plan, body);
        log_outcome(operation, Some(target), started_at, &result);
        result
    }

    fn mutate_locked<T>(
        &self,
        scope: &RequestScope,
        target: EntityRef,
        plan: LockPlan,
        body: impl FnOnce(&SqliteEntityStore<'_>, AuthorizedTarget) -> CoreResult<Mutation<T>>,
    ) -> CoreResult<T> {
        scope.ensure_active()?;
        let unlocked = SqliteEntityStore::unchecked(self.conn);
        let authorized = OwnershipResolver::new(&unlocked).authorize(scope.user_id(), target)?;
        let _locks = self.lock(scope, plan, &authorized)?;

        self.commit_scope(scope, |store| {
            let authorized = OwnershipResolver::new(store).authorize(scope.user_id(), target)?;
            body(store, authorized)
        })
    }

    fn lock(
        &self,
        scope: &RequestScope,
        plan: LockPlan,
        authorized: &AuthorizedTarget,
    ) -> CoreResult<LockSet<'_>> {
        let project_key = LockKey::Project(authorized.project_id);
        match plan {
            LockPlan::Project => self.acquire(scope, &[project_key]),
            LockPlan::Specification => {
                let key = authorized
                    .spec_id
                    .map(LockKey::Specification)
                    .unwrap_or(project_key);
                self.acquire(scope, &[key])
            }
            LockPlan::ProjectCascade => {
                // New specifications need the project slot, so the id list
                // read after taking it is complete.
                let project_lock = self.acquire(scope, &[project_key])?;
                let spec_keys = SqliteEntityStore::unchecked(self.conn)
                    .live_specification_ids(authorized.project_id)?
                    .into_iter()
                    .map(LockKey::Specification)
                    .collect::<Vec<_>>();
                self.bounded_wait(scope, |wait| project_lock.extend(&spec_keys, wait))
            }
        }
    }

    fn acquire(&self, scope: &RequestScope, keys: &[LockKey]) -> CoreResult<LockSet<'_>> {
        self.bounded_wait(scope, |wait| self.runtime.locks.acquire(keys, wait))
    }

    /// Runs one lock wait capped by both the lock timeout and the deadline.
    fn bounded_wait<'a>(
        &self,
        scope: &RequestScope,
        take: impl FnOnce(Duration) -> Result<LockSet<'a>, LockTimeout>,
    ) -> CoreResult<LockSet<'a>> {
        let lock_timeout = self.runtime.config.lock_timeout;
        let (wait, deadline_bound) = match scope.remaining() {
            Some(remaining) if remaining < lock_timeout => (remaining, true),
            _ => (lock_timeout, false),
        };

        take(wait).map_err(|timeout| {
            warn!(
                "event=lock_wait module=coordinator status=timeout key={} waited_ms={} deadline_bound={}",
                timeout.key,
                timeout.waited.as_millis(),
                deadline_bound
            );
            if deadline_bound {
                CoreError::DeadlineExceeded
            } else {
                CoreError::from(timeout)
            }
        })
    }

    /// Runs `body` in one `BEGIN IMMEDIATE` transaction and commits it.
    fn commit_scope<T>(
        &self,
        scope: &RequestScope,
        body: impl FnOnce(&SqliteEntityStore<'_>) -> CoreResult<Mutation<T>>,
    ) -> CoreResult<T> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let store = SqliteEntityStore::unchecked(&tx);
        let Mutation {
            value,
            touched,
            retired,
        } = body(&store)?;

        let engine = OrderingEngine::new(&store);
        for spec_id in &touched {
            engine.verify_dense(*spec_id)?;
        }
        scope.ensure_active()?;
        tx.commit()?;

        for spec_id in touched {
            if retired {
                self.runtime.cache.retire_specification(spec_id);
            } else {
                self.runtime.cache.invalidate_specification(spec_id);
            }
        }
        Ok(value)
    }

    fn read<T>(
        &self,
        scope: &RequestScope,
        target: EntityRef,
        body: impl FnOnce(&SqliteEntityStore<'_>, AuthorizedTarget) -> CoreResult<T>,
    ) -> CoreResult<T> {
        scope.ensure_active()?;
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Deferred)?;
        let store = SqliteEntityStore::unchecked(&tx);
        let authorized = OwnershipResolver::new(&store).authorize(scope.user_id(), target)?;
        let value = body(&store, authorized)?;
        tx.commit()?;
        Ok(value)
    }
}

fn live<T>(row: Option<T>, target: EntityRef) -> CoreResult<T> {
    row.ok_or(CoreError::NotFound(target))
}

fn auth_reason(err: &AuthError) -> &'static str {
    match err {
        AuthError::InvalidCredential => "invalid_credential",
        AuthError::Expired => "expired",
        AuthError::Unavailable(_) => "unavailable",
    }
}

fn log_outcome<T>(
    operation: &'static str,
    target: Option<EntityRef>,
    started_at: Instant,
    result: &CoreResult<T>,
) {
    let (kind, id) = target
        .map(|target| (target.kind.as_str(), target.id))
        .unwrap_or(("none", 0));
    let duration_ms = started_at.elapsed().as_millis();
    match result {
        Ok(_) => info!(
            "event={} module=coordinator status=ok target_kind={} target_id={} duration_ms={}",
            operation, kind, id, duration_ms
        ),
        Err(err) if err.is_retryable() => warn!(
            "event={} module=coordinator status=conflict target_kind={} target_id={} duration_ms={} error_code={}",
            operation,
            kind,
            id,
            duration_ms,
            err.code()
        ),
        Err(err) => info!(
            "event={} module=coordinator status=rejected target_kind={} target_id={} duration_ms={} error_code={}",
            operation,
            kind,
            id,
            duration_ms,
            err.code()
        ),
    }
}
