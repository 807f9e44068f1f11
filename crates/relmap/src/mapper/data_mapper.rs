//! Per-instance entity state.

use super::EntityMapper;
use crate::cast::Cast;
use crate::entity::{Record, Related};
use crate::key::KeyValue;
use crate::manager::EntityManager;
use crate::relation::{RelationKind, RelationLoader};
use relmap_core::{
    ColumnMap, Error, NotFoundKind, Result, StateErrorKind, UnsupportedError, Value,
};
use relmap_query::{Expr, QueryStatement};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;

/// Eager loaders handed to a data mapper, keyed by relation cache key.
pub type LoaderMap = HashMap<String, Rc<RelationLoader>>;

#[derive(Clone)]
struct PendingLink {
    relation: String,
    entity: Record,
    link: bool,
}

/// Column state, dirty set, relation cache and lifecycle flags of one entity.
///
/// `raw_columns` is the source of truth. `columns` memoizes the cast and
/// getter-applied view and is invalidated whenever the raw value changes.
///
/// A data mapper is confined to one thread; its caches use `RefCell` and no
/// borrow is held while user callbacks (getters, setters, relation hooks) run.
pub struct DataMapper {
    manager: EntityManager,
    mapper: Rc<EntityMapper>,
    raw_columns: RefCell<ColumnMap>,
    columns: RefCell<ColumnMap>,
    modified: RefCell<BTreeSet<String>>,
    relations: RefCell<HashMap<String, Related>>,
    loaders: RefCell<LoaderMap>,
    pending_links: RefCell<Vec<PendingLink>>,
    is_new: Cell<bool>,
    read_only: bool,
    deleted: Cell<bool>,
    refresh: Cell<bool>,
}

impl DataMapper {
    /// Build the state of one entity.
    ///
    /// A new entity starts empty and is mass-filled from `columns`, which marks
    /// every accepted column dirty. A fetched entity takes `columns` as-is.
    pub fn new(
        manager: EntityManager,
        mapper: Rc<EntityMapper>,
        columns: ColumnMap,
        loaders: LoaderMap,
        read_only: bool,
        is_new: bool,
    ) -> Result<Self> {
        let fill = is_new && !columns.is_empty();
        let data = Self {
            manager,
            mapper,
            raw_columns: RefCell::new(if fill { ColumnMap::new() } else { columns.clone() }),
            columns: RefCell::new(ColumnMap::new()),
            modified: RefCell::new(BTreeSet::new()),
            relations: RefCell::new(HashMap::new()),
            loaders: RefCell::new(loaders),
            pending_links: RefCell::new(Vec::new()),
            is_new: Cell::new(is_new),
            read_only,
            deleted: Cell::new(false),
            refresh: Cell::new(false),
        };
        if fill {
            data.fill(columns)?;
        }
        Ok(data)
    }

    pub fn entity_manager(&self) -> &EntityManager {
        &self.manager
    }

    pub fn entity_mapper(&self) -> &Rc<EntityMapper> {
        &self.mapper
    }

    pub fn is_new(&self) -> bool {
        self.is_new.get()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.get()
    }

    /// Will the next access re-fetch the row?
    pub fn is_stale(&self) -> bool {
        self.refresh.get()
    }

    pub fn was_modified(&self) -> bool {
        !self.modified.borrow().is_empty() || !self.pending_links.borrow().is_empty()
    }

    pub fn get_raw_columns(&self) -> ColumnMap {
        self.raw_columns.borrow().clone()
    }

    pub fn get_modified_columns(&self) -> Vec<String> {
        self.modified.borrow().iter().cloned().collect()
    }

    pub fn pending_link_count(&self) -> usize {
        self.pending_links.borrow().len()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.borrow().contains_key(name) || self.raw_columns.borrow().contains_key(name)
    }

    /// Is `name` (or the relation behind a `prefix:name` key) declared?
    pub fn has_relation(&self, name: &str) -> bool {
        self.mapper.get_relation(relation_name(name)).is_some()
    }

    fn ensure_not_deleted(&self) -> Result<()> {
        if self.deleted.get() {
            Err(Error::state(StateErrorKind::Deleted))
        } else {
            Ok(())
        }
    }

    fn is_primary_key(&self, name: &str) -> bool {
        let primary_key = self.mapper.get_primary_key();
        !primary_key.is_composite() && primary_key.columns().first().is_some_and(|pk| pk == name)
    }

    /// Read a column through its cast and getter; the result is memoized.
    ///
    /// The single primary-key column is cast but never passed to a getter.
    pub fn get_column(&self, name: &str) -> Result<Value> {
        self.hydrate()?;
        self.ensure_not_deleted()?;

        if let Some(value) = self.columns.borrow().get(name) {
            return Ok(value.clone());
        }

        let mut value = self
            .raw_columns
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(NotFoundKind::Column, name))?;

        if let Some(tag) = self.mapper.get_casts().get(name) {
            value = tag
                .parse::<Cast>()?
                .get(value, self.manager.date_format())?;
        }

        if !self.is_primary_key(name) {
            if let Some(getter) = self.mapper.get_getter(name) {
                value = getter(value, self);
            }
        }

        self.columns
            .borrow_mut()
            .insert(name.to_string(), value.clone());
        Ok(value)
    }

    /// Write a column: setter first, then cast, then mark it dirty.
    pub fn set_column(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        if self.read_only {
            return Err(Error::state(StateErrorKind::ReadOnly));
        }
        self.ensure_not_deleted()?;
        self.hydrate()?;
        self.ensure_not_deleted()?;

        let mut value = value.into();
        if let Some(setter) = self.mapper.get_setter(name) {
            value = setter(value, self);
        }
        if let Some(tag) = self.mapper.get_casts().get(name) {
            value = tag
                .parse::<Cast>()?
                .set(value, self.manager.date_format())?;
        }

        self.modified.borrow_mut().insert(name.to_string());
        self.columns.borrow_mut().remove(name);
        self.raw_columns
            .borrow_mut()
            .insert(name.to_string(), value);
        Ok(())
    }

    /// Drop the memoized view of `name`, and with `also_raw` the raw value too.
    pub fn clear_column(&self, name: &str, also_raw: bool) {
        self.columns.borrow_mut().remove(name);
        if also_raw {
            self.raw_columns.borrow_mut().remove(name);
        }
    }

    /// Write a raw value, bypassing setter and cast. The column is still dirty.
    pub fn set_raw_column(&self, name: &str, value: Value) {
        self.modified.borrow_mut().insert(name.to_string());
        self.columns.borrow_mut().remove(name);
        self.raw_columns
            .borrow_mut()
            .insert(name.to_string(), value);
    }

    pub(crate) fn remove_raw_columns(&self, names: &[String]) {
        let mut raw = self.raw_columns.borrow_mut();
        for name in names {
            raw.remove(name);
        }
    }

    /// Resolve a relation.
    ///
    /// `name` may carry a `prefix:` to cache the same relation under a
    /// distinct key. Each cache key gets its own slot and its own loader.
    pub fn get_related(&self, name: &str) -> Result<Related> {
        self.ensure_not_deleted()?;
        if let Some(related) = self.relations.borrow().get(name) {
            return Ok(related.clone());
        }

        let relation = self
            .mapper
            .get_relation(relation_name(name))
            .ok_or_else(|| Error::not_found(NotFoundKind::Relation, relation_name(name)))?;

        self.hydrate()?;
        self.ensure_not_deleted()?;

        if let Some(related) = self.relations.borrow().get(name) {
            return Ok(related.clone());
        }

        let loader = self.loaders.borrow().get(name).cloned();
        let related = match loader {
            Some(loader) => loader.get_result(self)?,
            None => {
                tracing::debug!(
                    entity = self.mapper.entity_type().short_name(),
                    relation = name,
                    "Lazy-loading relation"
                );
                relation.get_result(self, None)?
            }
        };

        self.relations
            .borrow_mut()
            .insert(name.to_string(), related.clone());
        Ok(related)
    }

    /// Point a to-one relation at `entity`.
    ///
    /// `BelongsTo` accepts `None` to detach. Has-relations require an entity
    /// and update that entity's foreign key columns.
    pub fn set_related(&self, name: &str, entity: Option<&Record>) -> Result<()> {
        self.ensure_not_deleted()?;
        let relation = self
            .mapper
            .get_relation(name)
            .ok_or_else(|| Error::not_found(NotFoundKind::Relation, name))?;

        let supported = match relation.kind() {
            RelationKind::BelongsTo => true,
            RelationKind::HasOne | RelationKind::HasMany => entity.is_some(),
            RelationKind::ShareOne | RelationKind::ShareMany => false,
        };
        if !supported {
            return Err(unsupported("set_related", name));
        }

        relation.add_related_entity(self, entity)?;
        self.relations.borrow_mut().remove(name);
        Ok(())
    }

    /// Drop a cached relation result, and with `also_loaders` its eager loader.
    pub fn clear_related(&self, name: &str, also_loaders: bool) {
        self.relations.borrow_mut().remove(name);
        if also_loaders {
            self.loaders.borrow_mut().remove(name);
        }
    }

    /// Relations resolved so far, by cache key.
    pub fn loaded_relations(&self) -> Vec<(String, Related)> {
        let mut loaded: Vec<_> = self
            .relations
            .borrow()
            .iter()
            .map(|(name, related)| (name.clone(), related.clone()))
            .collect();
        loaded.sort_by(|a, b| a.0.cmp(&b.0));
        loaded
    }

    /// Queue a junction insert; runs after the owner is persisted.
    pub fn link(&self, name: &str, entity: &Record) -> Result<()> {
        self.queue_link(name, entity, true)
    }

    /// Queue a junction delete; runs after the owner is persisted.
    pub fn unlink(&self, name: &str, entity: &Record) -> Result<()> {
        self.queue_link(name, entity, false)
    }

    fn queue_link(&self, name: &str, entity: &Record, link: bool) -> Result<()> {
        self.ensure_not_deleted()?;
        let relation = self
            .mapper
            .get_relation(name)
            .ok_or_else(|| Error::not_found(NotFoundKind::Relation, name))?;
        if !relation.kind().is_share() {
            return Err(unsupported(if link { "link" } else { "unlink" }, name));
        }
        self.pending_links.borrow_mut().push(PendingLink {
            relation: name.to_string(),
            entity: entity.clone(),
            link,
        });
        Ok(())
    }

    /// Mass assignment honoring the fillable/guarded lists.
    pub fn fill(&self, columns: ColumnMap) -> Result<()> {
        let fillable = self.mapper.get_fillable();
        let guarded = self.mapper.get_guarded();
        for (name, value) in columns {
            let accepted = if !fillable.is_empty() {
                fillable.contains(&name)
            } else {
                !guarded.contains(&name)
            };
            if accepted {
                self.set_column(&name, value)?;
            }
        }
        Ok(())
    }

    /// Re-fetch the row on the next access.
    pub fn refresh(&self) {
        self.refresh.set(true);
    }

    fn hydrate(&self) -> Result<()> {
        if !self.refresh.get() {
            return Ok(());
        }

        let mut statement = QueryStatement::new();
        statement.from(self.mapper.get_table());
        for (column, value) in self
            .mapper
            .get_primary_key()
            .value_map(&self.raw_columns.borrow())
        {
            statement.filter(Expr::col(column).eq(value));
        }
        let (sql, params) = statement.to_select_sql(self.manager.dialect());

        match self.manager.fetch_one(&sql, &params)? {
            None => {
                tracing::debug!(
                    entity = self.mapper.entity_type().short_name(),
                    "Row vanished during hydration, marking deleted"
                );
                self.deleted.set(true);
            }
            Some(row) => {
                *self.raw_columns.borrow_mut() = row;
                self.columns.borrow_mut().clear();
                self.relations.borrow_mut().clear();
                self.loaders.borrow_mut().clear();
                self.refresh.set(false);
            }
        }
        Ok(())
    }

    /// Record a successful insert that produced `id`.
    pub fn mark_as_saved(&self, id: KeyValue) -> Result<()> {
        let primary_key = self.mapper.get_primary_key().clone();
        {
            let mut raw = self.raw_columns.borrow_mut();
            let mut columns = self.columns.borrow_mut();
            for column in primary_key.columns() {
                raw.insert(column.clone(), id.get(column));
                columns.remove(column);
            }
        }
        self.refresh.set(true);
        self.is_new.set(false);
        self.modified.borrow_mut().clear();
        tracing::debug!(
            entity = self.mapper.entity_type().short_name(),
            id = %id,
            "Entity saved"
        );

        self.execute_pending_linkage()
    }

    /// Record a successful update, stamping `updated_at` when given.
    pub fn mark_as_updated(&self, updated_at: Option<Value>) -> Result<()> {
        if let Some(updated_at) = updated_at {
            let (_, column) = self.mapper.get_timestamp_columns();
            self.columns.borrow_mut().remove(column);
            self.raw_columns
                .borrow_mut()
                .insert(column.to_string(), updated_at);
        }
        self.modified.borrow_mut().clear();
        self.relations.borrow_mut().clear();
        tracing::debug!(
            entity = self.mapper.entity_type().short_name(),
            "Entity updated"
        );

        self.execute_pending_linkage()
    }

    /// Terminal: every later access fails.
    pub fn mark_as_deleted(&self) {
        self.deleted.set(true);
        tracing::debug!(
            entity = self.mapper.entity_type().short_name(),
            "Entity deleted"
        );
    }

    /// Run queued link/unlink operations in order, then empty the queue.
    pub fn execute_pending_linkage(&self) -> Result<()> {
        let pending = self.pending_links.borrow().clone();
        if pending.is_empty() {
            return Ok(());
        }
        for item in &pending {
            let relation = self
                .mapper
                .get_relation(&item.relation)
                .ok_or_else(|| Error::not_found(NotFoundKind::Relation, item.relation.as_str()))?;
            if item.link {
                relation.link(self, &item.entity)?;
            } else {
                relation.unlink(self, &item.entity)?;
            }
        }
        self.pending_links.borrow_mut().clear();
        self.relations.borrow_mut().retain(|name, _| {
            !pending
                .iter()
                .any(|item| relation_name(name) == item.relation)
        });
        Ok(())
    }
}

impl fmt::Debug for DataMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataMapper")
            .field("entity", &self.mapper.entity_type().short_name())
            .field("raw_columns", &self.raw_columns.borrow())
            .field("modified", &self.modified.borrow())
            .field("is_new", &self.is_new.get())
            .field("read_only", &self.read_only)
            .field("deleted", &self.deleted.get())
            .field("refresh", &self.refresh.get())
            .finish_non_exhaustive()
    }
}

/// `prefix:name` → `name`.
fn relation_name(key: &str) -> &str {
    key.split_once(':').map_or(key, |(_, name)| name)
}

fn unsupported(operation: &'static str, relation: &str) -> Error {
    Error::Unsupported(UnsupportedError {
        operation,
        relation: relation.to_string(),
    })
}
