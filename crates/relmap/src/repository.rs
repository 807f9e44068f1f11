//! Persistence lifecycle of one entity type.
//!
//! The repository owns the write path (insert, update, delete) and wraps
//! each write in a transaction. Query shaping (`with`, `order_by`, `limit`,
//! `filters`) applies to the next query only and then resets.

use crate::entity::{Entity, Record};
use crate::key::KeyValue;
use crate::manager::EntityManager;
use crate::mapper::{DataMapper, events};
use crate::query::{EntityQuery, NamedFilter, QueryBuilder, With};
use relmap_core::{ColumnMap, Error, Result, StateErrorKind, Value};
use relmap_query::{Assignment, Expr, InsertStatement, OrderDirection, QueryStatement};
use std::fmt;
use std::marker::PhantomData;

pub struct Repository<T: Entity> {
    manager: EntityManager,
    with: Vec<With>,
    immediate: bool,
    order: Option<(Vec<String>, OrderDirection)>,
    window: Option<(u64, u64)>,
    filters: Vec<NamedFilter>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Repository<T> {
    pub fn new(manager: EntityManager) -> Self {
        Self {
            manager,
            with: Vec::new(),
            immediate: false,
            order: None,
            window: None,
            filters: Vec::new(),
            _entity: PhantomData,
        }
    }

    pub fn entity_manager(&self) -> &EntityManager {
        &self.manager
    }

    // ==================== Query shaping ====================

    /// Eager-load `items` on the next query.
    pub fn with<I, W>(&mut self, items: I, immediate: bool) -> &mut Self
    where
        I: IntoIterator<Item = W>,
        W: Into<With>,
    {
        self.with = items.into_iter().map(Into::into).collect();
        self.immediate = immediate;
        self
    }

    pub fn order_by<I, S>(&mut self, columns: I, direction: OrderDirection) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.order = Some((columns.into_iter().map(Into::into).collect(), direction));
        self
    }

    pub fn limit(&mut self, offset: u64, limit: u64) -> &mut Self {
        self.window = Some((offset, limit));
        self
    }

    pub fn filters<I, F>(&mut self, filters: I) -> &mut Self
    where
        I: IntoIterator<Item = F>,
        F: Into<NamedFilter>,
    {
        self.filters = filters.into_iter().map(Into::into).collect();
        self
    }

    /// A query over `T` carrying the pending shaping, which is then reset.
    pub fn query(&mut self) -> Result<EntityQuery> {
        let mut query = self.manager.query::<T>();
        query.with(std::mem::take(&mut self.with), self.immediate);
        self.immediate = false;

        if let Some((columns, direction)) = self.order.take() {
            query.order_by(columns, direction);
        }
        if let Some((offset, limit)) = self.window.take() {
            query.offset(offset).limit(limit);
        }
        if !self.filters.is_empty() {
            query.filter(std::mem::take(&mut self.filters))?;
        }
        Ok(query)
    }

    // ==================== Lookups ====================

    /// New, unsaved entity mass-filled from `columns`.
    pub fn create(&self, columns: ColumnMap) -> Result<T> {
        self.manager.create::<T>(columns)
    }

    pub fn all(&mut self, columns: &[&str]) -> Result<Vec<T>> {
        self.query()?.all_as::<T>(columns)
    }

    pub fn find(&mut self, id: impl Into<KeyValue>) -> Result<Option<T>> {
        self.query()?
            .find(id, &[])?
            .map(Record::cast::<T>)
            .transpose()
    }

    /// First entity whose columns equal `conditions`.
    pub fn find_by(&mut self, conditions: ColumnMap) -> Result<Option<T>> {
        let mut query = self.query()?;
        for (column, value) in conditions {
            query.where_eq(&column, value);
        }
        query.get_as::<T>(&[])
    }

    pub fn find_all(&mut self, ids: Vec<KeyValue>) -> Result<Vec<T>> {
        self.query()?
            .find_all(ids, &[])?
            .into_iter()
            .map(Record::cast::<T>)
            .collect()
    }

    pub fn find_all_by(&mut self, conditions: ColumnMap) -> Result<Vec<T>> {
        let mut query = self.query()?;
        for (column, value) in conditions {
            query.where_eq(&column, value);
        }
        query.all_as::<T>(&[])
    }

    // ==================== Persistence ====================

    /// Insert a new entity or update a persisted one.
    pub fn save(&self, entity: &T) -> Result<bool> {
        if entity.record().data_mapper().is_new() {
            Ok(self.insert(entity)?.is_some())
        } else {
            self.update(entity)
        }
    }

    /// Insert a new entity; returns its primary key.
    ///
    /// `Ok(None)` means the primary-key generator declined to produce a key
    /// and nothing was written.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = std::any::type_name::<T>()))]
    pub fn insert(&self, entity: &T) -> Result<Option<KeyValue>> {
        let data = entity.record().data_mapper();
        let mapper = data.entity_mapper();

        if data.is_deleted() {
            return Err(Error::state(StateErrorKind::Deleted));
        }
        if !data.is_new() {
            return Err(Error::state(StateErrorKind::AlreadySaved));
        }

        let id = self.manager.transaction(|| {
            let mut columns = data.get_raw_columns();

            let generated = match mapper.get_primary_key_generator() {
                Some(generator) => match generator(data) {
                    Some(id) => Some(id),
                    None => return Ok(None),
                },
                None => None,
            };
            if let Some(id) = &generated {
                for column in mapper.get_primary_key().columns() {
                    columns.insert(column.clone(), id.get(column));
                }
            }

            if mapper.has_timestamp() {
                let (created_at, updated_at) = mapper.get_timestamp_columns();
                columns.insert(created_at.to_string(), self.manager.now());
                columns.insert(updated_at.to_string(), Value::Null);
            }

            let (sql, params) =
                InsertStatement::new(mapper.get_table(), columns).to_sql(self.manager.dialect());
            self.manager.execute(&sql, &params)?;

            let id = match generated {
                Some(id) => id,
                None => KeyValue::Scalar(
                    self.manager
                        .connection()
                        .last_insert_id(Some(mapper.get_sequence()))?,
                ),
            };
            data.mark_as_saved(id.clone())?;
            Ok(Some(id))
        })?;

        if id.is_some() {
            dispatch(data, events::SAVE)?;
        }
        Ok(id)
    }

    /// Write the modified columns of a persisted entity.
    ///
    /// An unmodified entity is a successful no-op. `Ok(false)` means the
    /// UPDATE matched no row.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = std::any::type_name::<T>()))]
    pub fn update(&self, entity: &T) -> Result<bool> {
        let data = entity.record().data_mapper();
        let mapper = data.entity_mapper();

        if data.is_deleted() {
            return Err(Error::state(StateErrorKind::Deleted));
        }
        if data.is_new() {
            return Err(Error::state(StateErrorKind::Unsaved));
        }
        if !data.was_modified() {
            return Ok(true);
        }

        let modified = data.get_modified_columns();
        if modified.is_empty() {
            // Only junction changes are pending.
            return self
                .manager
                .transaction(|| data.execute_pending_linkage().map(|()| true));
        }

        let updated = self.manager.transaction(|| {
            let raw = data.get_raw_columns();
            let mut assignments: Vec<(String, Assignment)> = modified
                .iter()
                .map(|column| {
                    let value = raw.get(column).cloned().unwrap_or(Value::Null);
                    (column.clone(), Assignment::Set(value))
                })
                .collect();

            let updated_at = if mapper.has_timestamp() {
                let (_, column) = mapper.get_timestamp_columns();
                let now = self.manager.now();
                assignments.retain(|(name, _)| name != column);
                assignments.push((column.to_string(), Assignment::Set(now.clone())));
                Some(now)
            } else {
                None
            };

            let statement = primary_key_filter(data, &raw);
            let (sql, params) =
                statement.to_update_sql(self.manager.dialect(), mapper.get_table(), &assignments);
            if self.manager.execute(&sql, &params)? == 0 {
                tracing::debug!(table = mapper.get_table(), "Update matched no row");
                return Ok(false);
            }

            data.mark_as_updated(updated_at)?;
            Ok(true)
        })?;

        if updated {
            dispatch(data, events::UPDATE)?;
        }
        Ok(updated)
    }

    /// Delete a persisted entity; soft-deletes unless `force` is set or the
    /// schema has no soft delete. `Ok(false)` means no row was affected.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = std::any::type_name::<T>(), force = force))]
    pub fn delete(&self, entity: &T, force: bool) -> Result<bool> {
        let data = entity.record().data_mapper();

        let deleted = self.manager.transaction(|| {
            if data.is_deleted() {
                return Err(Error::state(StateErrorKind::Deleted));
            }
            if data.is_new() {
                return Err(Error::state(StateErrorKind::Unsaved));
            }

            let mut query = EntityQuery::new(self.manager.clone(), data.entity_mapper().clone());
            let key = data.entity_mapper().get_primary_key().value_map(&data.get_raw_columns());
            for (column, value) in key {
                query.where_eq(&column, value);
            }
            Ok(query.delete(force, &[])? > 0)
        })?;

        if !deleted {
            return Ok(false);
        }

        // Handlers still see a live entity; it is marked deleted afterwards.
        dispatch(data, events::DELETE)?;
        data.mark_as_deleted();
        Ok(true)
    }
}

impl<T: Entity> fmt::Debug for Repository<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &std::any::type_name::<T>())
            .field("with", &self.with)
            .field("immediate", &self.immediate)
            .field("order", &self.order)
            .field("window", &self.window)
            .field("filters", &self.filters)
            .finish_non_exhaustive()
    }
}

/// `WHERE pk = ...` for the entity's current key.
fn primary_key_filter(data: &DataMapper, raw: &ColumnMap) -> QueryStatement {
    let mut statement = QueryStatement::new();
    for (column, value) in data.entity_mapper().get_primary_key().value_map(raw) {
        statement.filter(Expr::col(column).eq(value));
    }
    statement
}

fn dispatch(data: &DataMapper, event: &str) -> Result<()> {
    let handlers = data.entity_mapper().get_event_handlers(event);
    if !handlers.is_empty() {
        tracing::debug!(event, handlers = handlers.len(), "Dispatching lifecycle event");
    }
    for handler in handlers {
        handler(data)?;
    }
    Ok(())
}
