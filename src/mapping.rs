use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use log::{debug, trace, warn};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::MappingConfig;
use crate::conflict::actions::{
    make_changed_in_memory_items_dirty, resolved_conflict_actions,
    resurrection_conflicts_from_resolved, Action, ResurrectAction,
};
use crate::conflict::detection::{plan_fetch, Disposition};
use crate::conflict::resolution::{Conflict, ConflictResolver, Resolved};
use crate::data_store::item_id::{CommitId, DbId, IdFactory, ItemId};
use crate::data_store::mapped_item::{MappedItem, ID_FIELD};
use crate::data_store::mapped_table::MappedTable;
use crate::errors::{Result, SpineDbError};
use crate::item_type::ItemType;
use crate::status::Status;
use crate::storage::{CommitInfo, Storage, StorageMutation};
use crate::value::{Record, Value};

/// Spinedb prelude
pub mod prelude {
    pub use crate::config::*;
    pub use crate::conflict::actions::*;
    pub use crate::conflict::detection::*;
    pub use crate::conflict::resolution::*;
    pub use crate::data_store::item_id::*;
    pub use crate::data_store::mapped_item::*;
    pub use crate::errors::*;
    pub use crate::item_type::*;
    pub use crate::mapping::*;
    pub use crate::memory_storage::*;
    pub use crate::status::*;
    pub use crate::storage::*;
    pub use crate::value::*;
}

/// Counts of what a fetch did to the mapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchReport {
    /// Rows that became new committed items.
    pub added: usize,
    /// Committed items overwritten from a changed row.
    pub refreshed: usize,
    /// Pending additions that took over the id of a matching row.
    pub adopted: usize,
    /// Items dropped because their row is gone.
    pub evicted: usize,
    /// Conflicts handed to the resolver.
    pub conflicts: usize,
    /// Rows ignored because they reference rows that are not mapped.
    pub skipped: usize,
}

impl FetchReport {
    fn merge(&mut self, other: FetchReport) {
        self.added += other.added;
        self.refreshed += other.refreshed;
        self.adopted += other.adopted;
        self.evicted += other.evicted;
        self.conflicts += other.conflicts;
        self.skipped += other.skipped;
    }
}

/// Pending items of one type, by the kind of write they are waiting for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtyItems {
    pub to_add: Vec<ItemId>,
    pub to_update: Vec<ItemId>,
    pub to_remove: Vec<ItemId>,
}

impl DirtyItems {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_update.is_empty() && self.to_remove.is_empty()
    }
}

/// A staged, in-memory view of a Spine database.
///
/// Client code adds, updates, removes and restores items against the
/// mapping; nothing reaches the database until [`commit_session`] is called.
/// Fetching reconciles the mapping with what other sessions committed in the
/// meantime, resolving conflicts with the configured policy or with a
/// resolver passed by the caller.
///
/// [`commit_session`]: DatabaseMapping::commit_session
///
/// # Examples
///
/// ```
/// use spinedb::prelude::*;
/// use std::sync::Arc;
///
/// let storage = Arc::new(MemoryStorage::new());
/// let mut db_map = DatabaseMapping::new(storage, MappingConfig::default()).unwrap();
/// let base = db_map
///     .add_item(ItemType::Alternative, record([("name", Value::from("base"))]))
///     .unwrap();
/// db_map.commit_session("Add base alternative").unwrap();
/// assert!(db_map.get_item(ItemType::Alternative, base).unwrap().is_committed());
/// ```
pub struct DatabaseMapping {
    storage: Arc<dyn Storage>,
    config: MappingConfig,
    id_factory: IdFactory,
    tables: HashMap<ItemType, MappedTable>,
    fetched: BTreeSet<ItemType>,
    known_commit_count: u64,
}

impl DatabaseMapping {
    /// Creates a mapping over `storage`.
    ///
    /// Every commit already present in the storage counts as known, so a
    /// fresh mapping has no external commits.
    pub fn new(storage: Arc<dyn Storage>, config: MappingConfig) -> Result<Self> {
        let known_commit_count = storage.commit_count()?;
        Ok(Self {
            storage,
            config,
            id_factory: IdFactory::new(),
            tables: HashMap::new(),
            fetched: BTreeSet::new(),
            known_commit_count,
        })
    }

    pub fn config(&self) -> &MappingConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn mapped_table(&self, item_type: ItemType) -> Option<&MappedTable> {
        self.tables.get(&item_type)
    }

    fn table_mut(&mut self, item_type: ItemType) -> &mut MappedTable {
        self.tables
            .entry(item_type)
            .or_insert_with(|| MappedTable::new(item_type))
    }

    /// Returns an item, removed or not.
    pub fn get_item(&self, item_type: ItemType, id: ItemId) -> Option<&MappedItem> {
        self.mapped_table(item_type)?.get(id)
    }

    /// Finds a live item by the values of its type's first unique key.
    pub fn find_item(&self, item_type: ItemType, key: &[Value]) -> Option<&MappedItem> {
        self.mapped_table(item_type)?.find_by_key(key)
    }

    /// Live items of a type in creation order.
    pub fn items(&self, item_type: ItemType) -> Vec<&MappedItem> {
        self.mapped_table(item_type)
            .map(|table| table.iter().filter(|item| !item.removed()).collect())
            .unwrap_or_default()
    }

    fn require_item(&self, item_type: ItemType, id: ItemId) -> Result<&MappedItem> {
        self.get_item(item_type, id)
            .ok_or(SpineDbError::ItemNotFound { item_type, id })
    }

    /// Adds a new item. It is written to the database on the next commit.
    ///
    /// Optional fields left out get their default value. Reference fields
    /// must hold [`Value::Ref`]s to live items.
    ///
    /// # Errors
    ///
    /// `InvalidField` for fields the type does not have, `MissingField` for
    /// required fields left out, `InvalidReference` for dangling references
    /// and `UniqueViolation` if a live item already holds a unique key.
    pub fn add_item(&mut self, item_type: ItemType, fields: Record) -> Result<ItemId> {
        if let Some(field) = fields.keys().find(|field| !item_type.is_field(field)) {
            return Err(SpineDbError::InvalidField {
                item_type,
                field: field.clone(),
            });
        }
        let content: Record = item_type
            .fields()
            .iter()
            .map(|field| {
                let value = fields
                    .get(*field)
                    .cloned()
                    .unwrap_or_else(|| item_type.default_value(field));
                (field.to_string(), value)
            })
            .collect();
        self.check_content(item_type, &content, None)?;

        let id = self.id_factory.next_id();
        self.table_mut(item_type)
            .insert(MappedItem::new(id, item_type, content));
        trace!("Added {} {}", item_type, id);
        Ok(id)
    }

    /// Merges `changes` into an item.
    ///
    /// A committed item becomes `ToUpdate`; changing it back to its committed
    /// content makes it `Committed` again. Changes equal to the current
    /// content do nothing.
    pub fn update_item(&mut self, item_type: ItemType, id: ItemId, changes: Record) -> Result<()> {
        let item = self.require_item(item_type, id)?;
        if item.removed() {
            return Err(SpineDbError::InvalidStatus {
                item_type,
                id,
                message: "cannot update a removed item".to_string(),
            });
        }
        if let Some(field) = changes.keys().find(|field| !item_type.is_field(field)) {
            return Err(SpineDbError::InvalidField {
                item_type,
                field: field.clone(),
            });
        }
        let mut merged = item.content().clone();
        merged.extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.check_content(item_type, &merged, Some(id))?;

        let table = self.table_mut(item_type);
        if let Some(mut item) = table.take(id) {
            if item.apply_changes(&changes) {
                trace!("Updated {} {}, now {}", item_type, id, item.status());
            }
            table.insert(item);
        }
        Ok(())
    }

    /// Removes an item together with every item that references it.
    ///
    /// Returns the items that were removed by this call; removing an item
    /// that is already removed returns nothing.
    pub fn remove_item(&mut self, item_type: ItemType, id: ItemId) -> Result<Vec<(ItemType, ItemId)>> {
        self.require_item(item_type, id)?;
        let mut removed = Vec::new();
        let mut pending = vec![(item_type, id, None)];
        while let Some((item_type, id, source)) = pending.pop() {
            let table = self.table_mut(item_type);
            let Some(mut item) = table.take(id) else {
                continue;
            };
            let newly_removed = item.mark_removed(source);
            table.insert(item);
            if !newly_removed {
                continue;
            }
            trace!("Removed {} {}", item_type, id);
            removed.push((item_type, id));
            for (referrer_type, referrer) in self.live_referrers(item_type, id) {
                pending.push((referrer_type, referrer, Some((item_type, id))));
            }
        }
        Ok(removed)
    }

    /// Restores a removed item and the items whose removal it caused.
    ///
    /// # Errors
    ///
    /// `InvalidStatus` if an item it references is removed, and
    /// `UniqueViolation` if a live item took over one of its unique keys.
    pub fn restore_item(&mut self, item_type: ItemType, id: ItemId) -> Result<Vec<(ItemType, ItemId)>> {
        let item = self.require_item(item_type, id)?;
        if !item.removed() {
            return Ok(Vec::new());
        }
        self.check_restorable(item)?;

        let mut restored = Vec::new();
        let mut pending = vec![(item_type, id)];
        while let Some((item_type, id)) = pending.pop() {
            let cascaded = self.cascade_removed_from(item_type, id);
            let table = self.table_mut(item_type);
            let Some(mut item) = table.take(id) else {
                continue;
            };
            item.restore();
            table.insert(item);
            trace!("Restored {} {}", item_type, id);
            restored.push((item_type, id));
            for (referrer_type, referrer) in cascaded {
                match self.get_item(referrer_type, referrer).map(|r| self.check_restorable(r)) {
                    Some(Ok(())) => pending.push((referrer_type, referrer)),
                    Some(Err(e)) => warn!("Not restoring {} {}: {}", referrer_type, referrer, e),
                    None => {}
                }
            }
        }
        Ok(restored)
    }

    fn check_restorable(&self, item: &MappedItem) -> Result<()> {
        let item_type = item.item_type();
        for (ref_type, ref_id) in item.referenced_items() {
            if self.get_item(ref_type, ref_id).is_none_or(MappedItem::removed) {
                return Err(SpineDbError::InvalidStatus {
                    item_type,
                    id: item.id(),
                    message: format!("referenced {ref_type} {ref_id} is removed"),
                });
            }
        }
        if let Some(key) = self
            .mapped_table(item_type)
            .and_then(|table| table.unique_collision(item.content(), Some(item.id())))
        {
            return Err(SpineDbError::UniqueViolation { item_type, key });
        }
        Ok(())
    }

    /// Items referencing the given one that are not removed.
    fn live_referrers(&self, item_type: ItemType, id: ItemId) -> Vec<(ItemType, ItemId)> {
        self.referrers(item_type, id, |item| !item.removed())
    }

    /// Removed items whose removal cascaded from the given one.
    fn cascade_removed_from(&self, item_type: ItemType, id: ItemId) -> Vec<(ItemType, ItemId)> {
        self.referrers(item_type, id, |item| {
            item.removed() && item.removal_source() == Some((item_type, id))
        })
    }

    fn referrers(
        &self,
        item_type: ItemType,
        id: ItemId,
        filter: impl Fn(&MappedItem) -> bool,
    ) -> Vec<(ItemType, ItemId)> {
        item_type
            .referrer_types()
            .filter_map(|referrer_type| self.mapped_table(referrer_type))
            .flat_map(|table| table.iter())
            .filter(|item| item.references_item(item_type, id) && filter(item))
            .map(|item| (item.item_type(), item.id()))
            .collect()
    }

    fn check_content(&self, item_type: ItemType, content: &Record, exclude: Option<ItemId>) -> Result<()> {
        if let Some(field) = item_type
            .required_fields()
            .iter()
            .find(|field| content.get(**field).is_none_or(Value::is_null))
        {
            return Err(SpineDbError::MissingField {
                item_type,
                field: field.to_string(),
            });
        }
        for (field, ref_type) in item_type.references() {
            let valid = match content.get(*field) {
                None | Some(Value::Null) => true,
                Some(Value::Ref(ref_id)) => self
                    .get_item(*ref_type, *ref_id)
                    .is_some_and(|item| !item.removed()),
                Some(_) => false,
            };
            if !valid {
                return Err(SpineDbError::InvalidReference {
                    item_type,
                    field: field.to_string(),
                });
            }
        }
        if let Some(key) = self
            .mapped_table(item_type)
            .and_then(|table| table.unique_collision(content, exclude))
        {
            return Err(SpineDbError::UniqueViolation { item_type, key });
        }
        Ok(())
    }

    /// Pending items grouped by type, in dependency order.
    ///
    /// Items added and removed within the session are left out since
    /// committing them writes nothing.
    pub fn dirty_items(&self) -> Vec<(ItemType, DirtyItems)> {
        ItemType::ALL
            .into_iter()
            .filter_map(|item_type| {
                let table = self.mapped_table(item_type)?;
                let mut dirty = DirtyItems::default();
                for item in table.iter() {
                    match item.status() {
                        Status::ToAdd => dirty.to_add.push(item.id()),
                        Status::ToUpdate => dirty.to_update.push(item.id()),
                        Status::ToRemove if item.db_id().is_some() => {
                            dirty.to_remove.push(item.id())
                        }
                        _ => {}
                    }
                }
                (!dirty.is_empty()).then_some((item_type, dirty))
            })
            .collect()
    }

    /// Whether any item has a pending write.
    pub fn has_uncommitted_changes(&self) -> bool {
        !self.dirty_items().is_empty()
    }

    /// Whether someone else committed since this mapping last synchronized.
    pub fn has_external_commits(&self) -> Result<bool> {
        Ok(self.storage.commit_count()? > self.known_commit_count)
    }

    /// Fetches a table, resolving conflicts with the configured policy.
    pub fn fetch_all(&mut self, item_type: ItemType) -> Result<FetchReport> {
        let mut policy = self.config.conflict_policy;
        self.fetch_all_with(item_type, &mut policy)
    }

    /// Fetches a table and reconciles it with the mapping.
    ///
    /// Unless disabled in the configuration, the tables the table references
    /// are fetched first if they have not been fetched yet, so that
    /// references in the fetched rows can be resolved.
    pub fn fetch_all_with<R>(&mut self, item_type: ItemType, resolver: &mut R) -> Result<FetchReport>
    where
        R: ConflictResolver + ?Sized,
    {
        let mut report = FetchReport::default();
        if self.config.fetch_referenced_types {
            for dependency in dependencies_of(item_type) {
                if !self.fetched.contains(&dependency) {
                    report.merge(self.fetch_table(dependency, resolver)?);
                }
            }
        }
        report.merge(self.fetch_table(item_type, resolver)?);
        Ok(report)
    }

    /// Re-fetches every table fetched so far, in dependency order.
    pub fn refresh_session(&mut self) -> Result<FetchReport> {
        let mut policy = self.config.conflict_policy;
        self.refresh_session_with(&mut policy)
    }

    pub fn refresh_session_with<R>(&mut self, resolver: &mut R) -> Result<FetchReport>
    where
        R: ConflictResolver + ?Sized,
    {
        let commit_count = self.storage.commit_count()?;
        let mut report = FetchReport::default();
        let fetched: Vec<ItemType> = self.fetched.iter().copied().collect();
        for item_type in fetched {
            report.merge(self.fetch_table(item_type, resolver)?);
        }
        self.known_commit_count = self.known_commit_count.max(commit_count);
        debug!("Refreshed session: {:?}", report);
        Ok(report)
    }

    fn fetch_table<R>(&mut self, item_type: ItemType, resolver: &mut R) -> Result<FetchReport>
    where
        R: ConflictResolver + ?Sized,
    {
        let mut report = FetchReport::default();
        let mut rows = Vec::new();
        for row in self.storage.fetch(item_type)? {
            match self.to_item_space(item_type, row) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    warn!("Skipping {} row: {}", item_type, e);
                    report.skipped += 1;
                }
            }
        }

        let plan = plan_fetch(self.table_mut(item_type), rows);
        self.fetched.insert(item_type);
        if plan.is_quiet() {
            trace!("{} is up to date ({} rows skipped)", item_type, report.skipped);
            return Ok(report);
        }
        let mut conflicts = Vec::with_capacity(plan.conflict_count());
        for disposition in plan.dispositions {
            match disposition {
                Disposition::New(row) => {
                    let id = self.id_factory.next_id();
                    self.table_mut(item_type)
                        .insert(MappedItem::from_db(id, item_type, row));
                    report.added += 1;
                }
                Disposition::Refresh { id, row } => {
                    let table = self.table_mut(item_type);
                    if let Some(mut item) = table.take(id) {
                        item.adopt_row(&row);
                        table.insert(item);
                        report.refreshed += 1;
                    }
                }
                Disposition::AdoptDbId { id, row } => {
                    let table = self.table_mut(item_type);
                    if let Some(mut item) = table.take(id) {
                        item.adopt_db_identity(&row);
                        trace!("{} {} adopted row {:?}, now {}", item_type, id, item.db_id(), item.status());
                        table.insert(item);
                        report.adopted += 1;
                    }
                }
                Disposition::Unchanged(_) => {}
                Disposition::Vanished(id) => {
                    report.evicted += self.evict(item_type, id);
                }
                Disposition::Conflict { id, in_db, conflict_type } => {
                    if let Some(item) = self.table_mut(item_type).take(id) {
                        trace!("{:?} conflict on {} {}", conflict_type, item_type, id);
                        conflicts.push(Conflict::new(item, in_db));
                    }
                }
            }
        }

        if !conflicts.is_empty() {
            report.conflicts = conflicts.len();
            report.evicted += self.resolve_conflicts(item_type, conflicts, resolver)?;
        }
        debug!("Fetched {}: {:?}", item_type, report);
        Ok(report)
    }

    /// Runs one resolution pass and puts every item back into its table.
    ///
    /// Returns how many items were evicted because their row is gone. If the
    /// resolver breaks its contract, the items are put back untouched.
    fn resolve_conflicts<R>(
        &mut self,
        item_type: ItemType,
        conflicts: Vec<Conflict>,
        resolver: &mut R,
    ) -> Result<usize>
    where
        R: ConflictResolver + ?Sized,
    {
        let originals: HashMap<ItemId, MappedItem> = conflicts
            .iter()
            .map(|conflict| (conflict.in_memory.id(), conflict.in_memory.clone()))
            .collect();
        let mut resolved = resolver.resolve(conflicts);
        if let Err(message) = check_resolution_contract(&originals, &resolved) {
            warn!("Discarding resolution of {} conflicts on {}: {}", originals.len(), item_type, message);
            let table = self.table_mut(item_type);
            for item in originals.into_values() {
                table.insert(item);
            }
            return Err(SpineDbError::ResolutionContract(message));
        }

        make_changed_in_memory_items_dirty(&mut resolved);
        let resurrected: HashSet<ItemId> = resurrection_conflicts_from_resolved(&resolved)
            .into_iter()
            .map(|r| r.in_memory.id())
            .collect();
        let (resurrections, others): (Vec<Resolved>, Vec<Resolved>) = resolved
            .into_iter()
            .partition(|r| resurrected.contains(&r.in_memory.id()));
        let actions = resurrections
            .into_iter()
            .map(|r| Action::Resurrect(ResurrectAction::new(r)))
            .chain(resolved_conflict_actions(others));

        let mut evicted = 0;
        let mut gone = Vec::new();
        for action in actions {
            let id = action.in_memory().id();
            match action.apply() {
                Some(item) => {
                    trace!("Resolved {} {} to {}", item_type, id, item.status());
                    self.table_mut(item_type).insert(item);
                }
                None => {
                    evicted += 1;
                    gone.push(id);
                }
            }
        }
        for id in gone {
            evicted += self.evict_referrers(item_type, id);
        }
        Ok(evicted)
    }

    /// Drops an item and, transitively, everything that references it.
    fn evict(&mut self, item_type: ItemType, id: ItemId) -> usize {
        match self.table_mut(item_type).take(id) {
            Some(item) => {
                trace!("Evicted {} {} ({})", item_type, id, item.status());
                1 + self.evict_referrers(item_type, id)
            }
            None => 0,
        }
    }

    fn evict_referrers(&mut self, item_type: ItemType, id: ItemId) -> usize {
        let referrers = self.referrers(item_type, id, |_| true);
        let mut evicted = 0;
        for (referrer_type, referrer) in referrers {
            if self
                .get_item(referrer_type, referrer)
                .is_some_and(MappedItem::is_dirty)
            {
                warn!(
                    "Dropping pending {} {} whose {} is gone",
                    referrer_type, referrer, item_type
                );
            }
            evicted += self.evict(referrer_type, referrer);
        }
        evicted
    }

    /// Rewrites reference fields of a storage row from database ids to item ids.
    fn to_item_space(&self, item_type: ItemType, mut row: Record) -> Result<Record> {
        for (field, ref_type) in item_type.references() {
            let Some(value) = row.get_mut(*field) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let ref_id = value
                .as_integer()
                .map(DbId::new)
                .and_then(|db_id| self.mapped_table(*ref_type)?.item_id_for_db_id(db_id))
                .ok_or_else(|| SpineDbError::InvalidReference {
                    item_type,
                    field: field.to_string(),
                })?;
            *value = Value::Ref(ref_id);
        }
        Ok(row)
    }

    /// Builds the storage row of an item, rewriting references to database ids.
    fn to_db_space(&self, item: &MappedItem, db_id: DbId, new_ids: &HashMap<ItemId, DbId>) -> Result<Record> {
        let item_type = item.item_type();
        let mut row = item.content().clone();
        for (field, ref_type) in item_type.references() {
            let Some(value) = row.get_mut(*field) else {
                continue;
            };
            let Some(ref_id) = value.as_ref_id() else {
                continue;
            };
            let ref_db_id = self
                .get_item(*ref_type, ref_id)
                .and_then(MappedItem::db_id)
                .or_else(|| new_ids.get(&ref_id).copied())
                .ok_or_else(|| SpineDbError::InvalidReference {
                    item_type,
                    field: field.to_string(),
                })?;
            *value = Value::Integer(ref_db_id.get());
        }
        row.insert(ID_FIELD.to_string(), Value::Integer(db_id.get()));
        Ok(row)
    }

    /// Writes every pending change to the database as one commit.
    ///
    /// If the configuration allows it and other sessions committed in the
    /// meantime, the session is refreshed first so that conflicts are
    /// resolved before writing. Removals go first, in reverse dependency
    /// order, then updates, then additions.
    ///
    /// # Errors
    ///
    /// `EmptyCommitMessage` for a blank comment, `NothingToCommit` when there
    /// is nothing to write, `UniqueViolation` when a conflict resolution left
    /// two live items with the same unique key, and any storage error. The
    /// mapping is left unchanged when the storage rejects the commit.
    pub fn commit_session(&mut self, comment: &str) -> Result<CommitId> {
        if comment.trim().is_empty() {
            return Err(SpineDbError::EmptyCommitMessage);
        }
        if self.config.refresh_before_commit && self.has_external_commits()? {
            self.refresh_session()?;
        }
        let dirty = self.dirty_items();
        if dirty.is_empty() {
            return Err(SpineDbError::NothingToCommit);
        }
        for (item_type, _) in &dirty {
            if let Some(key) = self.mapped_table(*item_type).and_then(MappedTable::shared_unique_key) {
                warn!("Refusing to commit two {} items with {}", item_type, key);
                return Err(SpineDbError::UniqueViolation {
                    item_type: *item_type,
                    key,
                });
            }
        }

        let mut new_ids: HashMap<ItemId, DbId> = HashMap::new();
        for (item_type, items) in &dirty {
            if items.to_add.is_empty() {
                continue;
            }
            let db_ids = self.storage.reserve_ids(*item_type, items.to_add.len())?;
            new_ids.extend(items.to_add.iter().copied().zip(db_ids));
        }

        let mut mutations = Vec::new();
        for (item_type, items) in dirty.iter().rev() {
            for id in &items.to_remove {
                if let Some(db_id) = self.get_item(*item_type, *id).and_then(MappedItem::db_id) {
                    mutations.push(StorageMutation::Delete {
                        item_type: *item_type,
                        db_id,
                    });
                }
            }
        }
        for (item_type, items) in &dirty {
            for id in &items.to_update {
                let item = self.require_item(*item_type, *id)?;
                let db_id = item.db_id().ok_or_else(|| SpineDbError::InvalidStatus {
                    item_type: *item_type,
                    id: *id,
                    message: "updated item has no database id".to_string(),
                })?;
                mutations.push(StorageMutation::Update {
                    item_type: *item_type,
                    row: self.to_db_space(item, db_id, &new_ids)?,
                });
            }
        }
        for (item_type, items) in &dirty {
            for id in &items.to_add {
                let item = self.require_item(*item_type, *id)?;
                let Some(db_id) = new_ids.get(id).copied() else {
                    continue;
                };
                mutations.push(StorageMutation::Insert {
                    item_type: *item_type,
                    row: self.to_db_space(item, db_id, &new_ids)?,
                });
            }
        }

        let mutation_count = mutations.len();
        let commit = CommitInfo::new(comment, self.config.user.clone());
        let commit_id = self.storage.apply_mutations(commit, mutations)?;

        for (item_type, items) in &dirty {
            let table = self.table_mut(*item_type);
            for id in items.to_update.iter().chain(&items.to_add) {
                if let Some(mut item) = table.take(*id) {
                    let db_id = new_ids.get(id).copied().or(item.db_id());
                    if let Some(db_id) = db_id {
                        item.mark_committed(db_id, commit_id);
                    }
                    table.insert(item);
                }
            }
        }
        for table in self.tables.values_mut() {
            for id in table.ids() {
                if table.get(id).is_some_and(MappedItem::removed) {
                    table.take(id);
                }
            }
        }
        if commit_id.get() as u64 == self.known_commit_count + 1 {
            self.known_commit_count += 1;
        }
        debug!("Committed {} mutations as commit {}", mutation_count, commit_id);
        Ok(commit_id)
    }

    /// Discards every pending change.
    ///
    /// Additions are dropped, updates revert to the committed content and
    /// removals are undone. Items that were bound to a new row while pending
    /// come back with that row's content.
    pub fn rollback_session(&mut self) -> Result<()> {
        let any_dirty = self
            .tables
            .values()
            .any(|table| table.iter().any(MappedItem::is_dirty));
        if !any_dirty {
            return Err(SpineDbError::NothingToRollback);
        }
        for table in self.tables.values_mut() {
            for id in table.ids() {
                let Some(mut item) = table.take(id) else {
                    continue;
                };
                let was_removed = item.restore();
                match item.status() {
                    Status::ToAdd | Status::AddedAndRemoved => {
                        trace!("Rolled back addition of {} {}", item.item_type(), id);
                        continue;
                    }
                    Status::Committed if !was_removed => {}
                    _ => {
                        if !item.revert_to_backup() {
                            if let Some(row) = item.synced().cloned() {
                                item.adopt_row(&row);
                            }
                            item.set_status(Status::Committed);
                        }
                    }
                }
                table.insert(item);
            }
        }
        debug!("Rolled back session");
        Ok(())
    }

    /// Drops the given tables and every table that depends on them,
    /// discarding their uncommitted changes.
    pub fn reset(&mut self, item_types: &[ItemType]) {
        let mut doomed: BTreeSet<ItemType> = item_types.iter().copied().collect();
        for item_type in ItemType::ALL {
            if item_type.referenced_types().any(|t| doomed.contains(&t)) {
                doomed.insert(item_type);
            }
        }
        for item_type in doomed {
            self.tables.remove(&item_type);
            self.fetched.remove(&item_type);
        }
    }
}

/// Types `item_type` references, directly or not, in dependency order.
fn dependencies_of(item_type: ItemType) -> Vec<ItemType> {
    let mut needed: BTreeSet<ItemType> = item_type.referenced_types().collect();
    for candidate in ItemType::ALL.into_iter().rev() {
        if needed.contains(&candidate) {
            needed.extend(candidate.referenced_types());
        }
    }
    let mut dependencies: Vec<ItemType> = needed.into_iter().collect();
    dependencies.sort_by_key(|t| t.rank());
    dependencies
}

fn check_resolution_contract(
    originals: &HashMap<ItemId, MappedItem>,
    resolved: &[Resolved],
) -> std::result::Result<(), String> {
    if resolved.len() != originals.len() {
        return Err(format!(
            "expected {} resolved conflicts, got {}",
            originals.len(),
            resolved.len()
        ));
    }
    let mut seen = HashSet::new();
    for r in resolved {
        let id = r.in_memory.id();
        if !seen.insert(id) {
            return Err(format!("conflict on item {id} resolved twice"));
        }
        if originals.get(&id) != Some(&r.in_memory) {
            return Err(format!("item {id} was not one of the conflicting items"));
        }
    }
    Ok(())
}
