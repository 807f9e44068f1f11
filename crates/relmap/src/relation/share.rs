//! A junction table links owner and related rows.
//!
//! Queries run against the junction table joined to the related table. The
//! scope locks the FROM clause to the junction so the related table is only
//! reachable through the join, and records stay writable despite the join.

use super::{
    LoaderOptions, Relation, RelationLoader, collect_keys, constrain_key, constrain_keys,
    empty_result, has_null,
};
use crate::entity::{Record, Related};
use crate::key::{ForeignKey, Junction};
use crate::manager::EntityManager;
use crate::mapper::{DataMapper, EntityMapper};
use crate::query::{EntityQuery, QueryBuilder, QueryCallback, QueryScope};
use relmap_core::{ColumnMap, Result, Value};
use relmap_query::{Expr, InsertStatement, Join, QueryStatement};
use std::rc::Rc;

/// `SELECT related.* FROM junction JOIN related ON junction.fk = related.pk`
fn junction_query(manager: &EntityManager, related: &Rc<EntityMapper>, junction: &Junction) -> EntityQuery {
    let table = related.get_table();
    let mut query = EntityQuery::with_scope(
        manager.clone(),
        Rc::clone(related),
        QueryScope::locked(junction.table(), 1),
    );

    let on = junction
        .columns()
        .iter()
        .map(|(pk, column)| Expr::qualified(junction.table(), column).eq(Expr::qualified(table, pk)))
        .reduce(|left, right| left.and(right));
    if let Some(on) = on {
        query.join(Join::inner(table, on));
    }
    query.query_mut().statement.column(format!("{table}.*"));
    query
}

pub(super) fn get_result(
    relation: &Relation,
    owner: &DataMapper,
    callback: Option<&QueryCallback>,
) -> Result<Related> {
    let many = relation.kind().is_many();
    let manager = owner.entity_manager();
    let related = relation.related_mapper(manager);
    let junction = relation.resolve_junction(owner.entity_mapper(), &related);
    let foreign_key = relation.resolve_foreign_key(owner.entity_mapper(), &related);

    let key = foreign_key.value_map(&owner.get_raw_columns());
    if has_null(&key) {
        return Ok(empty_result(many));
    }

    let mut query = junction_query(manager, &related, junction);
    constrain_key(&mut query, junction.table(), key);
    relation.apply_callbacks(&mut query, callback);

    Ok(if many {
        Related::Many(query.all(&[])?)
    } else {
        Related::One(query.get(&[])?)
    })
}

/// Alias under which the junction's owner column is selected for indexing.
fn link_alias(index: usize, target: &str) -> String {
    format!("__link{index}_{target}")
}

pub(super) fn get_loader(
    relation: &Relation,
    manager: &EntityManager,
    owner: &EntityMapper,
    options: LoaderOptions<'_>,
) -> Result<RelationLoader> {
    let many = relation.kind().is_many();
    let related = relation.related_mapper(manager);
    let junction = relation.resolve_junction(owner, &related);
    let foreign_key = relation.resolve_foreign_key(owner, &related);

    let hidden: Vec<String> = foreign_key
        .columns()
        .iter()
        .enumerate()
        .map(|(index, (_, target))| link_alias(index, target))
        .collect();
    // Owner column -> hidden alias, so related rows index under the alias.
    let link_key = ForeignKey::new(
        foreign_key
            .columns()
            .iter()
            .zip(&hidden)
            .map(|((candidate, _), alias)| (candidate.clone(), alias.clone())),
    );

    let ids = collect_keys(options.results.iter().map(|row| foreign_key.value_map(row)));

    let mut query = junction_query(manager, &related, junction);
    if !constrain_keys(&mut query, junction.table(), ids) {
        return Ok(RelationLoader::empty(link_key, false, many));
    }
    for ((_, target), alias) in foreign_key.columns().iter().zip(&hidden) {
        query
            .query_mut()
            .statement
            .column_as(format!("{}.{target}", junction.table()), alias.clone());
    }
    query.with(options.with, options.immediate);
    relation.apply_callbacks(&mut query, options.callback.as_ref());

    RelationLoader::new(query, link_key, false, many, hidden, options.immediate)
}

/// Junction row values: owner side from the foreign key, related side from
/// the junction columns.
fn junction_values(relation: &Relation, owner: &DataMapper, entity: &Record) -> (String, ColumnMap) {
    let related = entity.data_mapper();
    let junction = relation.resolve_junction(owner.entity_mapper(), related.entity_mapper());
    let foreign_key = relation.resolve_foreign_key(owner.entity_mapper(), related.entity_mapper());

    let mut values = foreign_key.value_map(&owner.get_raw_columns());
    let related_raw = related.get_raw_columns();
    for (pk, column) in junction.columns() {
        values.insert(
            column.clone(),
            related_raw.get(pk).cloned().unwrap_or(Value::Null),
        );
    }
    (junction.table().to_string(), values)
}

pub(super) fn link(relation: &Relation, owner: &DataMapper, entity: &Record) -> Result<()> {
    let manager = owner.entity_manager();
    let (table, values) = junction_values(relation, owner, entity);
    let (sql, params) = InsertStatement::new(table.as_str(), values).to_sql(manager.dialect());
    manager.execute(&sql, &params)?;
    tracing::debug!(junction = %table, "Linked entities");
    Ok(())
}

pub(super) fn unlink(relation: &Relation, owner: &DataMapper, entity: &Record) -> Result<()> {
    let manager = owner.entity_manager();
    let (table, values) = junction_values(relation, owner, entity);
    let mut statement = QueryStatement::new();
    for (column, value) in values {
        statement.filter(Expr::col(column).eq(value));
    }
    let (sql, params) = statement.to_delete_sql(manager.dialect(), &table, &[]);
    manager.execute(&sql, &params)?;
    tracing::debug!(junction = %table, "Unlinked entities");
    Ok(())
}
