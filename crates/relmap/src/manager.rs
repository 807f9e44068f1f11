//! The entity manager.
//!
//! Owns the connection, the date format and the schema cache. Every mapper is
//! built on first use from its entity's `map_entity` function and cached per
//! manager, so two managers never share schema state.

use crate::cast;
use crate::entity::{Entity, EntityType, Record};
use crate::mapper::{DataMapper, EntityMapper};
use crate::query::EntityQuery;
use crate::repository::Repository;
use relmap_core::{ColumnMap, Connection, Dialect, Error, Result, Value};
use serde::Deserialize;
use std::any::TypeId;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Host-tunable manager settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Overrides the connection's date format (chrono `strftime` syntax).
    pub date_format: Option<String>,
    /// Default soft-delete column for new mappers.
    pub soft_delete_column: String,
    /// Default creation timestamp column for new mappers.
    pub created_at_column: String,
    /// Default update timestamp column for new mappers.
    pub updated_at_column: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            date_format: None,
            soft_delete_column: "deleted_at".to_string(),
            created_at_column: "created_at".to_string(),
            updated_at_column: "updated_at".to_string(),
        }
    }
}

struct ManagerInner {
    connection: Rc<dyn Connection>,
    date_format: String,
    config: ManagerConfig,
    mappers: RefCell<HashMap<TypeId, Rc<EntityMapper>>>,
    registry: RefCell<HashMap<String, EntityType>>,
    transaction_depth: Cell<u32>,
}

/// Cheap, cloneable handle to the ORM state of one unit of work.
#[derive(Clone)]
pub struct EntityManager {
    inner: Rc<ManagerInner>,
}

impl EntityManager {
    pub fn new(connection: Rc<dyn Connection>) -> Self {
        Self::with_config(connection, ManagerConfig::default())
    }

    pub fn with_config(connection: Rc<dyn Connection>, config: ManagerConfig) -> Self {
        let date_format = config
            .date_format
            .clone()
            .unwrap_or_else(|| connection.date_format().to_string());
        Self {
            inner: Rc::new(ManagerInner {
                connection,
                date_format,
                config,
                mappers: RefCell::new(HashMap::new()),
                registry: RefCell::new(HashMap::new()),
                transaction_depth: Cell::new(0),
            }),
        }
    }

    pub fn connection(&self) -> &dyn Connection {
        self.inner.connection.as_ref()
    }

    pub fn dialect(&self) -> Dialect {
        self.inner.connection.dialect()
    }

    pub fn date_format(&self) -> &str {
        &self.inner.date_format
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Current time as stored by timestamp and soft-delete columns.
    pub fn now(&self) -> Value {
        cast::now()
    }

    /// Schema of `T`, built and cached on first use.
    pub fn entity_mapper<T: Entity>(&self) -> Rc<EntityMapper> {
        self.entity_mapper_for(EntityType::of::<T>())
    }

    pub fn entity_mapper_for(&self, entity: EntityType) -> Rc<EntityMapper> {
        if let Some(mapper) = self.inner.mappers.borrow().get(&entity.id()) {
            return Rc::clone(mapper);
        }

        let mut mapper = EntityMapper::new(entity, &self.inner.config);
        entity.map(&mut mapper);
        tracing::debug!(
            entity = entity.short_name(),
            table = mapper.get_table(),
            "Built entity mapper"
        );

        Rc::clone(
            self.inner
                .mappers
                .borrow_mut()
                .entry(entity.id())
                .or_insert_with(|| Rc::new(mapper)),
        )
    }

    /// Make `T` reachable by its type name and its entity name.
    pub fn register<T: Entity>(&self) -> Rc<EntityMapper> {
        let entity = EntityType::of::<T>();
        let mapper = self.entity_mapper_for(entity);
        let mut registry = self.inner.registry.borrow_mut();
        registry.insert(entity.short_name().to_string(), entity);
        registry.insert(mapper.get_name().to_string(), entity);
        mapper
    }

    /// Schema registered under `name`.
    pub fn entity_mapper_named(&self, name: &str) -> Result<Rc<EntityMapper>> {
        let entity = self.inner.registry.borrow().get(name).copied();
        entity
            .map(|entity| self.entity_mapper_for(entity))
            .ok_or_else(|| Error::config(format!("No entity registered as [{name}]")))
    }

    /// New query over `T`.
    pub fn query<T: Entity>(&self) -> EntityQuery {
        EntityQuery::new(self.clone(), self.entity_mapper::<T>())
    }

    /// New query over the entity registered under `name`.
    pub fn query_named(&self, name: &str) -> Result<EntityQuery> {
        Ok(EntityQuery::new(self.clone(), self.entity_mapper_named(name)?))
    }

    pub fn repository<T: Entity>(&self) -> Repository<T> {
        Repository::new(self.clone())
    }

    /// New, unsaved `T` mass-filled from `columns`.
    pub fn create<T: Entity>(&self, columns: ColumnMap) -> Result<T> {
        let data = DataMapper::new(
            self.clone(),
            self.entity_mapper::<T>(),
            columns,
            HashMap::new(),
            false,
            true,
        )?;
        Ok(T::from_record(Record::new(data)))
    }

    /// Run `f` inside a transaction.
    ///
    /// Nested calls join the outermost transaction. The outermost call commits
    /// when `f` succeeds and rolls back when it fails; the error of `f` is
    /// returned unchanged.
    pub fn transaction<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let depth = self.inner.transaction_depth.get();
        let connection = self.connection();

        if depth == 0 {
            connection.begin()?;
            tracing::debug!("Transaction begin");
        }

        self.inner.transaction_depth.set(depth + 1);
        let result = f();
        self.inner.transaction_depth.set(depth);

        if depth > 0 {
            return result;
        }

        match result {
            Ok(value) => {
                connection.commit()?;
                tracing::debug!("Transaction commit");
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback_error) = connection.rollback() {
                    tracing::warn!(
                        error = %error,
                        rollback_error = %rollback_error,
                        "Rollback failed"
                    );
                } else {
                    tracing::debug!(error = %error, "Transaction rollback");
                }
                Err(error)
            }
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.inner.transaction_depth.get() > 0
    }

    // ==================== Statement execution ====================

    pub(crate) fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<ColumnMap>> {
        tracing::trace!(sql = %sql, params = params.len(), "Executing query");
        Ok(self
            .connection()
            .query(sql, params)?
            .into_iter()
            .map(|row| row.into_column_map())
            .collect())
    }

    pub(crate) fn fetch_one(&self, sql: &str, params: &[Value]) -> Result<Option<ColumnMap>> {
        tracing::trace!(sql = %sql, params = params.len(), "Executing single-row query");
        Ok(self
            .connection()
            .query_one(sql, params)?
            .map(|row| row.into_column_map()))
    }

    pub(crate) fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        tracing::trace!(sql = %sql, params = params.len(), "Executing statement");
        self.connection().execute(sql, params)
    }

    pub(crate) fn scalar(&self, sql: &str, params: &[Value]) -> Result<Value> {
        tracing::trace!(sql = %sql, params = params.len(), "Executing scalar query");
        self.connection().column(sql, params)
    }
}

impl fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityManager")
            .field("dialect", &self.dialect())
            .field("date_format", &self.inner.date_format)
            .field("mappers", &self.inner.mappers.borrow().len())
            .field("transaction_depth", &self.inner.transaction_depth.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: ManagerConfig =
            serde_json::from_str(r#"{"date_format": "%d/%m/%Y", "soft_delete_column": "removed"}"#)
                .unwrap();
        assert_eq!(config.date_format.as_deref(), Some("%d/%m/%Y"));
        assert_eq!(config.soft_delete_column, "removed");
        assert_eq!(config.created_at_column, "created_at");
        assert_eq!(config.updated_at_column, "updated_at");

        let empty: ManagerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, ManagerConfig::default());
    }
}
