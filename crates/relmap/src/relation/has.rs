//! The related rows hold the foreign key.

use super::{
    LoaderOptions, Relation, RelationLoader, collect_keys, constrain_key, constrain_keys,
    empty_result, has_null,
};
use crate::entity::{Record, Related};
use crate::manager::EntityManager;
use crate::mapper::{DataMapper, EntityMapper};
use crate::query::{EntityQuery, QueryBuilder, QueryCallback};
use relmap_core::Result;

pub(super) fn get_result(
    relation: &Relation,
    owner: &DataMapper,
    callback: Option<&QueryCallback>,
) -> Result<Related> {
    let many = relation.kind().is_many();
    let manager = owner.entity_manager();
    let related = relation.related_mapper(manager);
    let foreign_key = relation.resolve_foreign_key(owner.entity_mapper(), &related);

    let key = foreign_key.value_map(&owner.get_raw_columns());
    if has_null(&key) {
        return Ok(empty_result(many));
    }

    let mut query = EntityQuery::new(manager.clone(), related.clone());
    constrain_key(&mut query, related.get_table(), key);
    relation.apply_callbacks(&mut query, callback);

    Ok(if many {
        Related::Many(query.all(&[])?)
    } else {
        Related::One(query.get(&[])?)
    })
}

pub(super) fn get_loader(
    relation: &Relation,
    manager: &EntityManager,
    owner: &EntityMapper,
    options: LoaderOptions<'_>,
) -> Result<RelationLoader> {
    let many = relation.kind().is_many();
    let related = relation.related_mapper(manager);
    let foreign_key = relation.resolve_foreign_key(owner, &related).clone();

    let ids = collect_keys(options.results.iter().map(|row| foreign_key.value_map(row)));

    let mut query = EntityQuery::new(manager.clone(), related.clone());
    if !constrain_keys(&mut query, related.get_table(), ids) {
        return Ok(RelationLoader::empty(foreign_key, false, many));
    }
    query.with(options.with, options.immediate);
    relation.apply_callbacks(&mut query, options.callback.as_ref());

    RelationLoader::new(query, foreign_key, false, many, Vec::new(), options.immediate)
}

/// Point the related entity's foreign key columns at the owner.
pub(super) fn add_related_entity(
    relation: &Relation,
    owner: &DataMapper,
    entity: &Record,
) -> Result<()> {
    let related = entity.data_mapper();
    let foreign_key = relation.resolve_foreign_key(owner.entity_mapper(), related.entity_mapper());
    for (column, value) in foreign_key.value_map(&owner.get_raw_columns()) {
        related.set_column(&column, value)?;
    }
    Ok(())
}
