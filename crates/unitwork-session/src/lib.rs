//! Unit-of-work sessions over a transactional store.
//!
//! A [`Database`] wraps a store and hands out short-lived [`Session`]s. Each
//! session tracks entity instances through the lifecycle states Detached,
//! Unchanged, Added, Modified and Deleted, keeps one canonical handle per
//! (type, key) in an identity map, detects modifications against serialized
//! snapshots, and flushes everything in one store transaction on
//! [`Session::commit`].
//!
//! Commit is all-or-nothing: validation runs before the store is touched,
//! and a concurrency-token mismatch rolls the transaction back with tracked
//! states left as they were, so the caller can reload and retry.

pub mod change_tracker;
pub mod flush;
pub mod identity_map;
pub mod registry;

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use unitwork_core::{
    DynEntity, Entity, EntityState, ErasedEntity, Error, FieldInfo, Filter, LinkPair, Order,
    RelationInfo, Result, Row, SelectedRow, Store, StoreErrorKind, ValidationError, Value,
    find_relation, validate_row,
};

pub use change_tracker::{ChangeTracker, EntryId};
pub use flush::{FlushPlan, LinkOp, PendingOp};
pub use identity_map::{EntityRef, IdentityMap};
pub use registry::AttachmentRegistry;

/// Tunables for a session.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Promote snapshot-dirty Unchanged entities to Modified at commit.
    /// With this off, only explicit attach/add/remove calls produce work.
    pub auto_detect_changes: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_detect_changes: true,
        }
    }
}

/// A handle to a store plus the attachment registry its sessions share.
pub struct Database<S: Store> {
    store: Arc<Mutex<S>>,
    registry: Arc<AttachmentRegistry>,
}

impl<S: Store> Database<S> {
    /// Wrap a store.
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            registry: Arc::new(AttachmentRegistry::new()),
        }
    }

    /// Open a session with default configuration.
    pub fn session(&self) -> Session<S> {
        self.session_with(SessionConfig::default())
    }

    /// Open a session with explicit configuration.
    pub fn session_with(&self, config: SessionConfig) -> Session<S> {
        let id = self.registry.next_session_id();
        tracing::debug!(session = id, "Opening session");
        Session {
            id,
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            config,
            entries: BTreeMap::new(),
            by_ptr: HashMap::new(),
            by_key: HashMap::new(),
            identity: IdentityMap::new(),
            tracker: ChangeTracker::new(),
            next_entry: 0,
        }
    }

    /// Run a closure against the locked store. Test and tooling hook.
    pub fn with_store<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&lock(&self.store))
    }
}

impl<S: Store> Clone for Database<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
        }
    }
}

/// Lock a tracked entity for reading.
pub fn read<E>(handle: &EntityRef<E>) -> RwLockReadGuard<'_, E> {
    handle.read().unwrap_or_else(PoisonError::into_inner)
}

/// Lock a tracked entity for writing.
pub fn write<E>(handle: &EntityRef<E>) -> RwLockWriteGuard<'_, E> {
    handle.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn ptr_of<T>(handle: &Arc<T>) -> usize {
    Arc::as_ptr(handle) as *const () as usize
}

// Validate a graph member and every keyless member reachable beneath it,
// accumulating rather than short-circuiting.
fn validate_graph(member: &dyn ErasedEntity, errors: &mut ValidationError) {
    errors.extend(validate_row(
        member.table(),
        member.key(),
        member.fields(),
        &member.to_row(),
    ));
    for rel in member.relations() {
        for kid in member.related_new(rel.name) {
            validate_graph(kid.as_ref(), errors);
        }
    }
}

/// A declarative query: predicate, ordering terms and eager-loaded relations.
#[derive(Debug, Clone)]
pub struct Query {
    filter: Filter,
    order: Vec<Order>,
    includes: Vec<&'static str>,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            filter: Filter::All,
            order: Vec::new(),
            includes: Vec::new(),
        }
    }
}

impl Query {
    /// Query matching every row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the predicate.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Append an ascending ordering term.
    #[must_use]
    pub fn order_by(mut self, column: &'static str) -> Self {
        self.order.push(Order::asc(column));
        self
    }

    /// Append a descending ordering term.
    #[must_use]
    pub fn order_by_desc(mut self, column: &'static str) -> Self {
        self.order.push(Order::desc(column));
        self
    }

    /// Eager-load a relation on every materialized entity.
    #[must_use]
    pub fn include(mut self, relation: &'static str) -> Self {
        self.includes.push(relation);
        self
    }
}

// Object-safe view over one tracked handle. Mutation goes through the
// handle's RwLock, so the slot itself is shared.
trait EntitySlot: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn key(&self) -> Option<i64>;
    fn set_key(&self, key: i64);
    fn token(&self) -> Option<u64>;
    fn set_token(&self, token: u64);
    fn fields(&self) -> &'static [FieldInfo];
    fn relations(&self) -> &'static [RelationInfo];
    fn row(&self) -> Vec<(&'static str, Value)>;
    fn snapshot(&self) -> Result<Vec<u8>>;
    fn related_keys(&self, relation: &str) -> Vec<i64>;
    fn graph_children(&self) -> Vec<(&'static RelationInfo, Vec<DynEntity>)>;
    fn adopt_related_keys(&self, relation: &str, keys: &[i64]);
    fn install_identity(&self, map: &mut IdentityMap, key: i64);
}

struct Slot<E: Entity> {
    arc: EntityRef<E>,
}

impl<E: Entity> EntitySlot for Slot<E> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn key(&self) -> Option<i64> {
        read(&self.arc).key()
    }

    fn set_key(&self, key: i64) {
        write(&self.arc).set_key(key);
    }

    fn token(&self) -> Option<u64> {
        read(&self.arc).token()
    }

    fn set_token(&self, token: u64) {
        write(&self.arc).set_token(token);
    }

    fn fields(&self) -> &'static [FieldInfo] {
        E::fields()
    }

    fn relations(&self) -> &'static [RelationInfo] {
        E::RELATIONS
    }

    fn row(&self) -> Vec<(&'static str, Value)> {
        read(&self.arc).to_row()
    }

    fn snapshot(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&*read(&self.arc)).map_err(|e| Error::Serde(e.to_string()))
    }

    fn related_keys(&self, relation: &str) -> Vec<i64> {
        read(&self.arc).related_keys(relation)
    }

    fn graph_children(&self) -> Vec<(&'static RelationInfo, Vec<DynEntity>)> {
        let guard = read(&self.arc);
        E::RELATIONS
            .iter()
            .map(|rel| (rel, guard.related_new(rel.name)))
            .filter(|(_, kids)| !kids.is_empty())
            .collect()
    }

    fn adopt_related_keys(&self, relation: &str, keys: &[i64]) {
        write(&self.arc).adopt_related_keys(relation, keys);
    }

    fn install_identity(&self, map: &mut IdentityMap, key: i64) {
        map.insert::<E>(key, &self.arc);
    }
}

struct TrackedEntry {
    ptr: usize,
    tid: TypeId,
    table: &'static str,
    state: EntityState,
    slot: Box<dyn EntitySlot>,
}

type GraphChildren = BTreeMap<EntryId, Vec<(&'static RelationInfo, Vec<DynEntity>)>>;

#[derive(Default)]
struct CommitEffects {
    inserted: Vec<(EntryId, i64, u64)>,
    updated: Vec<(EntryId, u64)>,
    deleted: Vec<EntryId>,
    adopted: Vec<(EntryId, &'static str, Vec<i64>)>,
}

/// A unit of work: tracked entities, their states, and one commit.
pub struct Session<S: Store> {
    id: u64,
    store: Arc<Mutex<S>>,
    registry: Arc<AttachmentRegistry>,
    config: SessionConfig,
    entries: BTreeMap<EntryId, TrackedEntry>,
    by_ptr: HashMap<usize, EntryId>,
    by_key: HashMap<(TypeId, i64), EntryId>,
    identity: IdentityMap,
    tracker: ChangeTracker,
    next_entry: u64,
}

impl<S: Store> Session<S> {
    /// This session's identifier, unique per database.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of tracked entities.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.entries.len()
    }

    /// Whether a commit would flush anything.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.entries.iter().any(|(&id, entry)| match entry.state {
            EntityState::Added | EntityState::Modified | EntityState::Deleted => true,
            EntityState::Unchanged => {
                self.config.auto_detect_changes
                    && entry
                        .slot
                        .snapshot()
                        .map_or(true, |bytes| self.tracker.is_dirty(id, &bytes))
            }
            EntityState::Detached => false,
        })
    }

    /// Begin tracking `entity` in `state`, consuming it.
    ///
    /// If the key is already tracked, the tracked instance is overwritten
    /// with this entity's values and retagged; the tracked handle is
    /// returned either way.
    pub fn attach<E: Entity>(&mut self, entity: E, state: EntityState) -> Result<EntityRef<E>> {
        if let Some(key) = entity.key() {
            if let Some(&id) = self.by_key.get(&(TypeId::of::<E>(), key)) {
                let arc = self.arc_of::<E>(id)?;
                *write(&arc) = entity;
                self.retag(id, state)?;
                return Ok(arc);
            }
        }
        let handle = Arc::new(RwLock::new(entity));
        self.attach_handle(&handle, state)
    }

    /// Begin tracking an existing handle in `state`.
    ///
    /// Fails with an attachment conflict when another live session already
    /// tracks this instance, and with a custom error when a different
    /// instance with the same key is tracked here.
    pub fn attach_handle<E: Entity>(
        &mut self,
        handle: &EntityRef<E>,
        state: EntityState,
    ) -> Result<EntityRef<E>> {
        if state == EntityState::Detached {
            return Err(Error::Custom(
                "cannot attach in the Detached state".to_string(),
            ));
        }
        let ptr = ptr_of(handle);
        if let Some(&id) = self.by_ptr.get(&ptr) {
            self.retag(id, state)?;
            return Ok(handle.clone());
        }
        let key = read(handle).key();
        if key.is_none() && state != EntityState::Added {
            return Err(Error::Custom(format!(
                "cannot attach a keyless {} instance as {state}",
                E::TABLE
            )));
        }
        if let Some(key) = key {
            if self.by_key.contains_key(&(TypeId::of::<E>(), key)) {
                return Err(Error::Custom(format!(
                    "{} key {key} is already tracked by a different instance",
                    E::TABLE
                )));
            }
        }
        self.registry.claim(self.id, ptr, E::TABLE, key)?;

        self.next_entry += 1;
        let id = EntryId(self.next_entry);
        if state == EntityState::Unchanged {
            let bytes =
                serde_json::to_vec(&*read(handle)).map_err(|e| Error::Serde(e.to_string()))?;
            self.tracker.snapshot(id, bytes);
        }
        self.entries.insert(
            id,
            TrackedEntry {
                ptr,
                tid: TypeId::of::<E>(),
                table: E::TABLE,
                state,
                slot: Box::new(Slot {
                    arc: handle.clone(),
                }),
            },
        );
        self.by_ptr.insert(ptr, id);
        if let Some(key) = key {
            self.by_key.insert((TypeId::of::<E>(), key), id);
            self.identity.insert(key, handle);
        }
        tracing::debug!(session = self.id, table = E::TABLE, ?key, %state, "Tracking entity");
        Ok(handle.clone())
    }

    /// Track a new entity for insertion at the next commit.
    ///
    /// Keyless members of its relations ride along: they are inserted in
    /// the same commit and linked to this entity (graph add).
    pub fn add<E: Entity>(&mut self, entity: E) -> Result<EntityRef<E>> {
        self.attach(entity, EntityState::Added)
    }

    /// Mark a tracked entity for deletion, or attach an untracked one as
    /// Deleted. Removing an Added entity just evicts it.
    pub fn remove<E: Entity>(&mut self, handle: &EntityRef<E>) -> Result<()> {
        let ptr = ptr_of(handle);
        let Some(&id) = self.by_ptr.get(&ptr) else {
            self.attach_handle(handle, EntityState::Deleted)?;
            return Ok(());
        };
        self.retag(id, EntityState::Deleted)
    }

    /// Fetch one entity by key, consulting the identity map first.
    pub fn find<E: Entity>(&mut self, key: i64) -> Result<Option<EntityRef<E>>> {
        if let Some(handle) = self.identity.get::<E>(key) {
            tracing::trace!(session = self.id, table = E::TABLE, key, "Identity map hit");
            return Ok(Some(handle));
        }
        let fetched = {
            let store = lock(&self.store);
            store.get(E::TABLE, key)?
        };
        let Some((token, row)) = fetched else {
            tracing::trace!(session = self.id, table = E::TABLE, key, "Not found");
            return Ok(None);
        };
        let mut entity = E::from_row(&row)?;
        entity.set_key(key);
        entity.set_token(token);
        let handle = Arc::new(RwLock::new(entity));
        self.attach_handle(&handle, EntityState::Unchanged).map(Some)
    }

    /// Run a query and materialize matching rows as tracked entities.
    ///
    /// Rows already tracked come back as their identity-map handle with
    /// their in-memory values intact (includes are skipped for those).
    pub fn query<E: Entity>(&mut self, query: Query) -> Result<QueryIter<'_, S, E>> {
        let rows = {
            let store = lock(&self.store);
            store.select(E::TABLE, &query.filter, &query.order)?
        };
        tracing::debug!(
            session = self.id,
            table = E::TABLE,
            rows = rows.len(),
            "Query executed"
        );
        Ok(QueryIter {
            session: self,
            rows: rows.into_iter(),
            includes: query.includes,
            _entity: PhantomData,
        })
    }

    /// All tracked entities of one type, with their states, in attach order.
    #[must_use]
    pub fn local<E: Entity>(&self) -> Vec<(EntityState, EntityRef<E>)> {
        self.entries
            .values()
            .filter(|entry| entry.tid == TypeId::of::<E>())
            .filter_map(|entry| {
                entry
                    .slot
                    .as_any()
                    .downcast_ref::<Slot<E>>()
                    .map(|slot| (entry.state, slot.arc.clone()))
            })
            .collect()
    }

    /// The lifecycle state of an instance, Detached when untracked.
    #[must_use]
    pub fn state_of<E: Entity>(&self, handle: &EntityRef<E>) -> EntityState {
        self.by_ptr
            .get(&ptr_of(handle))
            .and_then(|id| self.entries.get(id))
            .map_or(EntityState::Detached, |entry| entry.state)
    }

    /// Load the members of a relation into the entity's collection and
    /// track each member.
    ///
    /// Membership is the union of committed join rows and pairs implied by
    /// this session's tracked entities, so it reads the same from either
    /// side of the relation.
    pub fn load_related<E: Entity, R: Entity>(
        &mut self,
        handle: &EntityRef<E>,
        relation: &str,
    ) -> Result<Vec<EntityRef<R>>> {
        let rel = find_relation(E::RELATIONS, relation)
            .ok_or_else(|| Error::Custom(format!("unknown relation '{relation}'")))?;
        if rel.target_table != R::TABLE {
            return Err(Error::Custom(format!(
                "relation '{relation}' targets {}, not {}",
                rel.target_table,
                R::TABLE
            )));
        }
        let Some(key) = read(handle).key() else {
            return Ok(Vec::new());
        };

        let member_keys = self.relation_member_keys(rel, key)?;
        let mut handles = Vec::with_capacity(member_keys.len());
        let mut members = Vec::with_capacity(member_keys.len());
        for member_key in member_keys {
            if let Some(member) = self.find::<R>(member_key)? {
                {
                    let guard = read(&member);
                    members.push(SelectedRow {
                        key: member_key,
                        token: guard.token().unwrap_or(0),
                        row: Row::from_pairs(&guard.to_row()),
                    });
                }
                handles.push(member);
            }
        }

        // Installing the collection must not make a clean entity look dirty.
        let entry_id = self.by_ptr.get(&ptr_of(handle)).copied();
        let was_clean = match entry_id.and_then(|id| self.entries.get(&id).map(|e| (id, e))) {
            Some((id, entry)) if entry.state == EntityState::Unchanged => {
                !self.tracker.is_dirty(id, &entry.slot.snapshot()?)
            }
            _ => false,
        };
        write(handle).set_related(relation, &members)?;
        if was_clean {
            if let Some(id) = entry_id {
                if let Some(entry) = self.entries.get(&id) {
                    let bytes = entry.slot.snapshot()?;
                    self.tracker.snapshot(id, bytes);
                }
            }
        }
        tracing::debug!(
            session = self.id,
            table = E::TABLE,
            key,
            relation,
            members = handles.len(),
            "Loaded relation"
        );
        Ok(handles)
    }

    /// Flush every pending change in one store transaction.
    ///
    /// Order inside the transaction: join-table unlinks, deletes, inserts
    /// (with graph children), link additions, updates. Validation runs
    /// before the store is touched; a token mismatch rolls everything back
    /// and leaves tracked states untouched.
    #[tracing::instrument(level = "debug", skip(self), fields(session = self.id))]
    pub fn commit(&mut self) -> Result<()> {
        self.detect_changes()?;
        let mut children = self.collect_graph_children();
        self.validate_pending(&children)?;
        let plan = self.build_plan()?;
        if plan.is_empty() {
            tracing::trace!("Nothing to flush");
            return Ok(());
        }

        let effects = {
            let mut store = lock(&self.store);
            store.begin()?;
            match self.run_plan(&mut store, &plan, &mut children) {
                Ok(effects) => {
                    store.commit()?;
                    effects
                }
                Err(err) => {
                    if let Err(rb) = store.rollback() {
                        tracing::warn!(error = %rb, "Rollback failed");
                    }
                    return Err(err);
                }
            }
        };

        let (inserted, updated, deleted) = (
            effects.inserted.len(),
            effects.updated.len(),
            effects.deleted.len(),
        );
        self.apply_effects(effects)?;
        tracing::info!(inserted, updated, deleted, "Commit complete");
        Ok(())
    }

    fn arc_of<E: Entity>(&self, id: EntryId) -> Result<EntityRef<E>> {
        self.entries
            .get(&id)
            .and_then(|entry| entry.slot.as_any().downcast_ref::<Slot<E>>())
            .map(|slot| slot.arc.clone())
            .ok_or_else(|| Error::Custom("tracked entry type mismatch".to_string()))
    }

    fn retag(&mut self, id: EntryId, state: EntityState) -> Result<()> {
        let current = match self.entries.get(&id) {
            Some(entry) => entry.state,
            None => return Ok(()),
        };
        if current == EntityState::Added && state == EntityState::Deleted {
            // Never persisted, nothing to delete.
            self.evict(id);
            return Ok(());
        }
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.state = state;
            if state == EntityState::Unchanged {
                let bytes = entry.slot.snapshot()?;
                self.tracker.snapshot(id, bytes);
            }
        }
        Ok(())
    }

    fn evict(&mut self, id: EntryId) {
        if let Some(entry) = self.entries.remove(&id) {
            self.by_ptr.remove(&entry.ptr);
            if let Some(key) = entry.slot.key() {
                self.by_key.remove(&(entry.tid, key));
                self.identity.remove(entry.tid, key);
            }
            self.registry.release(self.id, entry.ptr);
            self.tracker.clear(id);
        }
    }

    fn detect_changes(&mut self) -> Result<()> {
        if !self.config.auto_detect_changes {
            return Ok(());
        }
        let mut promote = Vec::new();
        for (&id, entry) in &self.entries {
            if entry.state == EntityState::Unchanged {
                let bytes = entry.slot.snapshot()?;
                if self.tracker.is_dirty(id, &bytes) {
                    promote.push(id);
                }
            }
        }
        for id in promote {
            if let Some(entry) = self.entries.get_mut(&id) {
                tracing::trace!(session = self.id, table = entry.table, entry = %id, "Detected changes");
                entry.state = EntityState::Modified;
            }
        }
        Ok(())
    }

    fn collect_graph_children(&self) -> GraphChildren {
        let mut children = GraphChildren::new();
        for (&id, entry) in &self.entries {
            if matches!(entry.state, EntityState::Added | EntityState::Modified) {
                let kids = entry.slot.graph_children();
                if !kids.is_empty() {
                    children.insert(id, kids);
                }
            }
        }
        children
    }

    fn validate_pending(&self, children: &GraphChildren) -> Result<()> {
        let mut errors = ValidationError::new();
        for entry in self.entries.values() {
            if matches!(entry.state, EntityState::Added | EntityState::Modified) {
                errors.extend(validate_row(
                    entry.table,
                    entry.slot.key(),
                    entry.slot.fields(),
                    &entry.slot.row(),
                ));
            }
        }
        for relations in children.values() {
            for (_, kids) in relations {
                for kid in kids {
                    validate_graph(kid.as_ref(), &mut errors);
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            tracing::debug!(
                session = self.id,
                violations = errors.violations.len(),
                "Validation failed"
            );
            Err(errors.into())
        }
    }

    fn build_plan(&self) -> Result<FlushPlan> {
        let mut plan = FlushPlan::new();
        for (&id, entry) in &self.entries {
            match entry.state {
                EntityState::Deleted => {
                    let (key, token) = self.key_and_token(entry)?;
                    for rel in entry.slot.relations() {
                        plan.unlinks.push(LinkOp::UnlinkAll {
                            table: rel.link_table,
                            column: rel.local_column,
                            key,
                        });
                    }
                    plan.deletes.push(PendingOp::Delete {
                        entry: id,
                        table: entry.table,
                        key,
                        token,
                    });
                }
                EntityState::Added => {
                    plan.inserts.push(PendingOp::Insert {
                        entry: id,
                        table: entry.table,
                        row: entry.slot.row(),
                    });
                }
                EntityState::Modified => {
                    let (key, token) = self.key_and_token(entry)?;
                    let bytes = entry.slot.snapshot()?;
                    let changed = self.tracker.changed_fields(id, &bytes, entry.slot.fields());
                    let row = entry.slot.row();
                    let set: Vec<(&'static str, Value)> = entry
                        .slot
                        .fields()
                        .iter()
                        .filter(|f| !f.key && changed.contains(&f.name))
                        .filter_map(|f| {
                            row.iter()
                                .find(|(col, _)| *col == f.column)
                                .map(|(col, value)| (*col, value.clone()))
                        })
                        .collect();
                    plan.updates.push(PendingOp::Update {
                        entry: id,
                        table: entry.table,
                        key,
                        token,
                        set,
                    });
                }
                EntityState::Unchanged | EntityState::Detached => {}
            }
        }
        Ok(plan)
    }

    fn key_and_token(&self, entry: &TrackedEntry) -> Result<(i64, u64)> {
        let key = entry.slot.key().ok_or_else(|| {
            Error::Custom(format!("{} entity has no key to flush against", entry.table))
        })?;
        let token = entry.slot.token().ok_or_else(|| {
            Error::store(
                StoreErrorKind::MissingToken,
                format!("{} key {key} has no concurrency token", entry.table),
            )
        })?;
        Ok((key, token))
    }

    fn run_plan(
        &self,
        store: &mut S,
        plan: &FlushPlan,
        children: &mut GraphChildren,
    ) -> Result<CommitEffects> {
        let mut effects = CommitEffects::default();

        for op in &plan.unlinks {
            let LinkOp::UnlinkAll { table, column, key } = op;
            store.unlink_all(table, column, *key)?;
        }
        for op in &plan.deletes {
            let PendingOp::Delete {
                entry,
                table,
                key,
                token,
            } = op
            else {
                continue;
            };
            if store.delete(table, *key, *token)? == 0 {
                tracing::debug!(table, key, token, "Delete hit a stale token");
                return Err(Error::conflict(*table, *key, *token));
            }
            effects.deleted.push(*entry);
        }

        for op in &plan.inserts {
            let PendingOp::Insert { entry, table, row } = op else {
                continue;
            };
            let (key, token) = store.insert(table, row)?;
            tracing::trace!(table, key, "Inserted row");
            if let Some(tracked) = self.entries.get(entry) {
                for rel in tracked.slot.relations() {
                    for member in tracked.slot.related_keys(rel.name) {
                        store.link(rel.link_table, rel.local_column, key, rel.remote_column, member)?;
                    }
                }
            }
            self.insert_children(store, *entry, key, children, &mut effects)?;
            effects.inserted.push((*entry, key, token));
        }

        for op in &plan.updates {
            let PendingOp::Update {
                entry,
                table,
                key,
                token,
                set,
            } = op
            else {
                continue;
            };
            self.insert_children(store, *entry, *key, children, &mut effects)?;
            if let Some(tracked) = self.entries.get(entry) {
                for rel in tracked.slot.relations() {
                    let desired = tracked.slot.related_keys(rel.name);
                    if desired.is_empty() {
                        continue;
                    }
                    let existing =
                        store.links(rel.link_table, rel.local_column, *key, rel.remote_column)?;
                    for member in desired {
                        if !existing.contains(&member) {
                            store.link(
                                rel.link_table,
                                rel.local_column,
                                *key,
                                rel.remote_column,
                                member,
                            )?;
                        }
                    }
                }
            }
            if set.is_empty() {
                continue;
            }
            match store.update(table, *key, *token, set)? {
                Some(next) => effects.updated.push((*entry, next)),
                None => {
                    tracing::debug!(table, key, token, "Update hit a stale token");
                    return Err(Error::conflict(*table, *key, *token));
                }
            }
        }

        Ok(effects)
    }

    // Insert the keyless relation members captured for `entry`, linking each
    // to the parent, and recurse into the members they carry themselves so
    // the whole reachable subgraph lands in the same transaction.
    fn insert_children(
        &self,
        store: &mut S,
        entry: EntryId,
        parent_key: i64,
        children: &mut GraphChildren,
        effects: &mut CommitEffects,
    ) -> Result<()> {
        let Some(relations) = children.get_mut(&entry) else {
            return Ok(());
        };
        for (rel, kids) in relations.iter_mut() {
            let mut assigned = Vec::with_capacity(kids.len());
            for kid in kids.iter_mut() {
                let kid_key = Self::insert_child_graph(store, kid.as_mut())?;
                store.link(
                    rel.link_table,
                    rel.local_column,
                    parent_key,
                    rel.remote_column,
                    kid_key,
                )?;
                assigned.push(kid_key);
            }
            effects.adopted.push((entry, rel.name, assigned));
        }
        Ok(())
    }

    // Insert one graph member, link its persisted relation members, then
    // insert and link its keyless members depth-first. Collections are
    // owned values, so the recursion bottoms out where a branch carries no
    // keyless members.
    fn insert_child_graph(store: &mut S, kid: &mut dyn ErasedEntity) -> Result<i64> {
        let (key, _) = store.insert(kid.table(), &kid.to_row())?;
        tracing::trace!(table = kid.table(), key, "Inserted graph member");
        kid.set_key(key);
        for rel in kid.relations() {
            for member in kid.related_keys(rel.name) {
                store.link(rel.link_table, rel.local_column, key, rel.remote_column, member)?;
            }
            let mut fresh = kid.related_new(rel.name);
            let mut assigned = Vec::with_capacity(fresh.len());
            for member in fresh.iter_mut() {
                let member_key = Self::insert_child_graph(store, member.as_mut())?;
                store.link(
                    rel.link_table,
                    rel.local_column,
                    key,
                    rel.remote_column,
                    member_key,
                )?;
                assigned.push(member_key);
            }
            kid.adopt_related_keys(rel.name, &assigned);
        }
        Ok(key)
    }

    fn apply_effects(&mut self, effects: CommitEffects) -> Result<()> {
        for (id, key, token) in &effects.inserted {
            let Some(entry) = self.entries.get_mut(id) else {
                continue;
            };
            entry.slot.set_key(*key);
            entry.slot.set_token(*token);
            entry.state = EntityState::Unchanged;
            self.by_key.insert((entry.tid, *key), *id);
            entry.slot.install_identity(&mut self.identity, *key);
        }
        for (id, relation, keys) in &effects.adopted {
            if let Some(entry) = self.entries.get(id) {
                entry.slot.adopt_related_keys(relation, keys);
            }
        }
        for (id, token) in &effects.updated {
            if let Some(entry) = self.entries.get_mut(id) {
                entry.slot.set_token(*token);
                entry.state = EntityState::Unchanged;
            }
        }
        // Entries whose only changes were relation additions.
        for entry in self.entries.values_mut() {
            if entry.state == EntityState::Modified {
                entry.state = EntityState::Unchanged;
            }
        }
        for id in &effects.deleted {
            self.evict(*id);
        }
        let mut snapshots = Vec::with_capacity(self.entries.len());
        for (&id, entry) in &self.entries {
            snapshots.push((id, entry.slot.snapshot()?));
        }
        for (id, bytes) in snapshots {
            self.tracker.snapshot(id, bytes);
        }
        Ok(())
    }

    // Committed join rows for `column = key`, unioned with the pairs implied
    // by tracked entities' in-memory collections.
    fn relation_member_keys(&self, rel: &RelationInfo, key: i64) -> Result<Vec<i64>> {
        let mut keys: BTreeSet<i64> = {
            let store = lock(&self.store);
            store
                .links(rel.link_table, rel.local_column, key, rel.remote_column)?
                .into_iter()
                .collect()
        };
        for entry in self.entries.values() {
            if entry.state == EntityState::Deleted {
                continue;
            }
            for tracked_rel in entry.slot.relations() {
                if tracked_rel.link_table != rel.link_table {
                    continue;
                }
                let Some(local) = entry.slot.key() else {
                    continue;
                };
                for member in entry.slot.related_keys(tracked_rel.name) {
                    let pair = LinkPair::new(tracked_rel, local, member);
                    if let Some(other) = pair.other_end(rel.link_table, rel.local_column, key) {
                        keys.insert(other);
                    }
                }
            }
        }
        Ok(keys.into_iter().collect())
    }

    fn materialize<E: Entity>(
        &mut self,
        selected: SelectedRow,
        includes: &[&'static str],
    ) -> Result<EntityRef<E>> {
        if let Some(handle) = self.identity.get::<E>(selected.key) {
            return Ok(handle);
        }
        let mut entity = E::from_row(&selected.row)?;
        entity.set_key(selected.key);
        entity.set_token(selected.token);
        for relation in includes {
            let members = self.relation_members(E::RELATIONS, relation, selected.key)?;
            entity.set_related(relation, &members)?;
        }
        let handle = Arc::new(RwLock::new(entity));
        self.attach_handle(&handle, EntityState::Unchanged)
    }

    fn relation_members(
        &self,
        relations: &'static [RelationInfo],
        relation: &str,
        key: i64,
    ) -> Result<Vec<SelectedRow>> {
        let rel = find_relation(relations, relation)
            .ok_or_else(|| Error::Custom(format!("unknown relation '{relation}'")))?;
        let member_keys = self.relation_member_keys(rel, key)?;
        let store = lock(&self.store);
        let mut members = Vec::with_capacity(member_keys.len());
        for member_key in member_keys {
            if let Some((token, row)) = store.get(rel.target_table, member_key)? {
                members.push(SelectedRow {
                    key: member_key,
                    token,
                    row,
                });
            }
        }
        Ok(members)
    }
}

impl<S: Store> Drop for Session<S> {
    fn drop(&mut self) {
        self.registry.release_session(self.id);
        tracing::debug!(session = self.id, "Session closed");
    }
}

/// Lazily materializing result iterator returned by [`Session::query`].
pub struct QueryIter<'s, S: Store, E: Entity> {
    session: &'s mut Session<S>,
    rows: std::vec::IntoIter<SelectedRow>,
    includes: Vec<&'static str>,
    _entity: PhantomData<E>,
}

impl<S: Store, E: Entity> Iterator for QueryIter<'_, S, E> {
    type Item = Result<EntityRef<E>>;

    fn next(&mut self) -> Option<Self::Item> {
        let selected = self.rows.next()?;
        Some(self.session.materialize::<E>(selected, &self.includes))
    }
}
