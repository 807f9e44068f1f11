//! Queries bound to one entity mapper.

use super::{Query, QueryBuilder};
use crate::entity::{Entity, Record};
use crate::key::KeyValue;
use crate::manager::EntityManager;
use crate::mapper::{DataMapper, EntityMapper, LoaderMap};
use crate::relation::LoaderOptions;
use relmap_core::{ColumnMap, Error, Result, Value};
use relmap_query::{Aggregate, Assignment, Expr, QueryStatement};
use std::fmt;
use std::rc::Rc;

/// Where an entity query reads from.
///
/// The default scope reads the mapper's table and marks records read-only as
/// soon as the query joins anything. A locked scope (junction queries) reads
/// from a fixed table and tolerates up to `join_allowance` joins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryScope {
    locked_table: Option<String>,
    join_allowance: usize,
}

impl QueryScope {
    pub fn locked(table: impl Into<String>, join_allowance: usize) -> Self {
        Self {
            locked_table: Some(table.into()),
            join_allowance,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked_table.is_some()
    }

    fn is_read_only(&self, joins: usize) -> bool {
        joins > self.join_allowance
    }
}

/// One named filter application.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedFilter {
    pub name: String,
    pub argument: Option<Value>,
}

impl From<&str> for NamedFilter {
    fn from(name: &str) -> Self {
        Self {
            name: name.to_string(),
            argument: None,
        }
    }
}

impl From<String> for NamedFilter {
    fn from(name: String) -> Self {
        Self {
            name,
            argument: None,
        }
    }
}

impl<V: Into<Value>> From<(&str, V)> for NamedFilter {
    fn from((name, argument): (&str, V)) -> Self {
        Self {
            name: name.to_string(),
            argument: Some(argument.into()),
        }
    }
}

/// A query over one entity that materializes records.
///
/// Terminal operations compile a copy of the statement, so the same query can
/// be run more than once.
#[derive(Clone)]
pub struct EntityQuery {
    manager: EntityManager,
    mapper: Rc<EntityMapper>,
    query: Query,
    scope: QueryScope,
}

impl QueryBuilder for EntityQuery {
    fn query_mut(&mut self) -> &mut Query {
        &mut self.query
    }
}

impl EntityQuery {
    pub fn new(manager: EntityManager, mapper: Rc<EntityMapper>) -> Self {
        Self::with_scope(manager, mapper, QueryScope::default())
    }

    pub fn with_scope(manager: EntityManager, mapper: Rc<EntityMapper>, scope: QueryScope) -> Self {
        Self {
            manager,
            mapper,
            query: Query::new(),
            scope,
        }
    }

    pub fn entity_mapper(&self) -> &Rc<EntityMapper> {
        &self.mapper
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Do records from this query refuse writes?
    pub fn is_read_only(&self) -> bool {
        self.scope.is_read_only(self.query.statement.joins().len())
    }

    /// Apply named filters declared on the mapper, in order.
    pub fn filter<I, F>(&mut self, filters: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = F>,
        F: Into<NamedFilter>,
    {
        for filter in filters {
            let NamedFilter { name, argument } = filter.into();
            let callback = self.mapper.get_filter(&name).cloned().ok_or_else(|| {
                Error::config(format!(
                    "Unknown filter [{name}] on [{}]",
                    self.mapper.entity_type().short_name()
                ))
            })?;
            callback(&mut self.query, argument.as_ref());
        }
        Ok(self)
    }

    fn table(&self) -> &str {
        self.scope
            .locked_table
            .as_deref()
            .unwrap_or(self.mapper.get_table())
    }

    fn apply_soft_delete(&self, statement: &mut QueryStatement) {
        if !self.mapper.has_soft_delete() {
            return;
        }
        let column = Expr::qualified(self.mapper.get_table(), self.mapper.get_soft_delete_column());
        if !self.query.with_soft_deleted {
            statement.filter(column.is_null());
        } else if self.query.only_soft_deleted {
            statement.filter(column.is_not_null());
        }
    }

    /// The statement as executed: table, requested columns (plus the primary
    /// key in the default scope) and the soft-delete constraint.
    fn prepared(&self, columns: &[&str]) -> QueryStatement {
        let mut statement = self.query.statement.clone();
        if !statement.has_tables() {
            statement.from(self.table());
        }
        for column in columns {
            statement.column(*column);
        }
        if !self.scope.is_locked() && !columns.is_empty() {
            for pk in self.mapper.get_primary_key().columns() {
                if !statement.selects(pk) {
                    statement.column(pk.as_str());
                }
            }
        }
        self.apply_soft_delete(&mut statement);
        statement
    }

    /// Eager loaders for the declared `with` paths over `rows`.
    fn relation_loaders(&self, rows: &[ColumnMap]) -> Result<LoaderMap> {
        let mut loaders = LoaderMap::new();
        if self.query.with.is_empty() || rows.is_empty() {
            return Ok(loaders);
        }

        let attributes = self.query.with_attributes();
        for (name, callback) in &attributes.with {
            let relation = self.mapper.get_relation(name).ok_or_else(|| {
                Error::config(format!(
                    "Cannot eager load unknown relation [{name}] of [{}]",
                    self.mapper.entity_type().short_name()
                ))
            })?;
            let loader = relation.get_loader(
                &self.manager,
                &self.mapper,
                LoaderOptions {
                    results: rows,
                    callback: callback.clone(),
                    with: attributes.nested(name),
                    immediate: self.query.immediate,
                },
            )?;
            loaders.insert(name.clone(), Rc::new(loader));
        }
        Ok(loaders)
    }

    fn materialize(&self, row: ColumnMap, loaders: LoaderMap) -> Result<Record> {
        let data = DataMapper::new(
            self.manager.clone(),
            Rc::clone(&self.mapper),
            row,
            loaders,
            self.is_read_only(),
            false,
        )?;
        Ok(Record::new(data))
    }

    /// First matching record.
    #[tracing::instrument(level = "debug", skip(self), fields(table = self.mapper.get_table()))]
    pub fn get(&self, columns: &[&str]) -> Result<Option<Record>> {
        let (sql, params) = self.prepared(columns).to_select_sql(self.manager.dialect());
        let Some(row) = self.manager.fetch_one(&sql, &params)? else {
            return Ok(None);
        };
        let loaders = self.relation_loaders(std::slice::from_ref(&row))?;
        self.materialize(row, loaders).map(Some)
    }

    /// Every matching record. Declared `with` paths are loaded in one query
    /// per relation for the whole result set.
    #[tracing::instrument(level = "debug", skip(self), fields(table = self.mapper.get_table()))]
    pub fn all(&self, columns: &[&str]) -> Result<Vec<Record>> {
        let (sql, params) = self.prepared(columns).to_select_sql(self.manager.dialect());
        let rows = self.manager.fetch_all(&sql, &params)?;
        let loaders = self.relation_loaders(&rows)?;
        tracing::debug!(rows = rows.len(), eager = loaders.len(), "Fetched records");
        rows.into_iter()
            .map(|row| self.materialize(row, loaders.clone()))
            .collect()
    }

    pub fn get_as<T: Entity>(&self, columns: &[&str]) -> Result<Option<T>> {
        self.get(columns)?.map(Record::cast::<T>).transpose()
    }

    pub fn all_as<T: Entity>(&self, columns: &[&str]) -> Result<Vec<T>> {
        self.all(columns)?
            .into_iter()
            .map(Record::cast::<T>)
            .collect()
    }

    /// Record by primary key. A scalar matches the first key column, a map
    /// matches each of its columns.
    pub fn find(&self, id: impl Into<KeyValue>, columns: &[&str]) -> Result<Option<Record>> {
        let mut query = self.clone();
        match id.into() {
            KeyValue::Scalar(value) => {
                if let Some(pk) = self.mapper.get_primary_key().columns().first() {
                    query.where_eq(pk, value);
                }
            }
            KeyValue::Map(key) => {
                for (column, value) in key {
                    query.where_eq(&column, value);
                }
            }
        }
        query.get(columns)
    }

    /// Records by a list of primary keys.
    pub fn find_all(&self, ids: Vec<KeyValue>, columns: &[&str]) -> Result<Vec<Record>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = self.clone();
        let pk = self.mapper.get_primary_key();
        if ids.iter().all(|id| id.as_scalar().is_some()) {
            if let Some(column) = pk.columns().first() {
                query.where_in(column, ids.iter().map(|id| id.get(column)));
            }
        } else {
            for column in pk.columns() {
                query.where_in(column, ids.iter().map(|id| id.get(column)));
            }
        }
        query.all(columns)
    }

    fn stamp_update(&self, assignments: &mut Vec<(String, Assignment)>) {
        if self.mapper.has_timestamp() {
            let (_, updated_at) = self.mapper.get_timestamp_columns();
            assignments.retain(|(column, _)| column != updated_at);
            assignments.push((updated_at.to_string(), Assignment::Set(self.manager.now())));
        }
    }

    fn run_update(&self, mut assignments: Vec<(String, Assignment)>) -> Result<u64> {
        self.stamp_update(&mut assignments);
        let (sql, params) = self.query.statement.to_update_sql(
            self.manager.dialect(),
            self.mapper.get_table(),
            &assignments,
        );
        self.manager.transaction(|| self.manager.execute(&sql, &params))
    }

    /// Bulk update of the matching rows; returns the affected row count.
    #[tracing::instrument(level = "debug", skip(self, columns), fields(table = self.mapper.get_table()))]
    pub fn update(&self, columns: ColumnMap) -> Result<u64> {
        let assignments = columns
            .into_iter()
            .map(|(column, value)| (column, Assignment::Set(value)))
            .collect();
        self.run_update(assignments)
    }

    pub fn increment(&self, column: &str, by: impl Into<Value>) -> Result<u64> {
        self.run_update(vec![(column.to_string(), Assignment::Increment(by.into()))])
    }

    pub fn decrement(&self, column: &str, by: impl Into<Value>) -> Result<u64> {
        self.run_update(vec![(column.to_string(), Assignment::Decrement(by.into()))])
    }

    /// Delete the matching rows; returns the affected row count.
    ///
    /// With soft delete active and `force` unset the rows are stamped instead
    /// of removed. `tables` names the tables to delete from when joining.
    #[tracing::instrument(level = "debug", skip(self, tables), fields(table = self.mapper.get_table()))]
    pub fn delete(&self, force: bool, tables: &[String]) -> Result<u64> {
        let dialect = self.manager.dialect();
        let table = self.mapper.get_table();
        let statement = &self.query.statement;

        let (sql, params) = if !force && self.mapper.has_soft_delete() {
            let assignments = [(
                self.mapper.get_soft_delete_column().to_string(),
                Assignment::Set(self.manager.now()),
            )];
            statement.to_update_sql(dialect, table, &assignments)
        } else {
            statement.to_delete_sql(dialect, table, tables)
        };

        self.manager.transaction(|| self.manager.execute(&sql, &params))
    }

    fn aggregate(&self, function: Aggregate, column: &str, distinct: bool) -> Result<Value> {
        let mut statement = self.query.statement.clone();
        if !statement.has_tables() {
            statement.from(self.table());
        }
        self.apply_soft_delete(&mut statement);
        let (sql, params) = statement.to_aggregate_sql(self.manager.dialect(), function, column, distinct);
        self.manager.scalar(&sql, &params)
    }

    pub fn count(&self, column: &str, distinct: bool) -> Result<i64> {
        Ok(self
            .aggregate(Aggregate::Count, column, distinct)?
            .as_i64()
            .unwrap_or(0))
    }

    pub fn avg(&self, column: &str, distinct: bool) -> Result<Value> {
        self.aggregate(Aggregate::Avg, column, distinct)
    }

    pub fn sum(&self, column: &str, distinct: bool) -> Result<Value> {
        self.aggregate(Aggregate::Sum, column, distinct)
    }

    pub fn min(&self, column: &str, distinct: bool) -> Result<Value> {
        self.aggregate(Aggregate::Min, column, distinct)
    }

    pub fn max(&self, column: &str, distinct: bool) -> Result<Value> {
        self.aggregate(Aggregate::Max, column, distinct)
    }

    /// First value of `name` among the matching rows.
    pub fn column(&self, name: &str) -> Result<Value> {
        let mut statement = self.query.statement.clone();
        if !statement.has_tables() {
            statement.from(self.table());
        }
        statement.column(name);
        self.apply_soft_delete(&mut statement);
        let (sql, params) = statement.to_select_sql(self.manager.dialect());
        self.manager.scalar(&sql, &params)
    }
}

impl fmt::Debug for EntityQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityQuery")
            .field("entity", &self.mapper.entity_type().short_name())
            .field("query", &self.query)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}
