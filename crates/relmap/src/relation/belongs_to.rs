//! The owner row holds the foreign key.

use super::{LoaderOptions, Relation, RelationLoader, collect_keys, constrain_key, constrain_keys, has_null};
use crate::entity::{Record, Related};
use crate::manager::EntityManager;
use crate::mapper::{DataMapper, EntityMapper};
use crate::query::{EntityQuery, QueryBuilder, QueryCallback};
use relmap_core::{ColumnMap, Result};

pub(super) fn get_result(
    relation: &Relation,
    owner: &DataMapper,
    callback: Option<&QueryCallback>,
) -> Result<Related> {
    let manager = owner.entity_manager();
    let related = relation.related_mapper(manager);
    let foreign_key = relation.resolve_foreign_key(owner.entity_mapper(), &related);

    let key = foreign_key.inverse_value_map(&owner.get_raw_columns());
    if has_null(&key) {
        return Ok(Related::One(None));
    }

    let mut query = EntityQuery::new(manager.clone(), related.clone());
    constrain_key(&mut query, related.get_table(), key);
    relation.apply_callbacks(&mut query, callback);
    Ok(Related::One(query.get(&[])?))
}

pub(super) fn get_loader(
    relation: &Relation,
    manager: &EntityManager,
    owner: &EntityMapper,
    options: LoaderOptions<'_>,
) -> Result<RelationLoader> {
    let related = relation.related_mapper(manager);
    let foreign_key = relation.resolve_foreign_key(owner, &related).clone();

    let ids = collect_keys(
        options
            .results
            .iter()
            .map(|row| foreign_key.inverse_value_map(row)),
    );

    let mut query = EntityQuery::new(manager.clone(), related.clone());
    if !constrain_keys(&mut query, related.get_table(), ids) {
        return Ok(RelationLoader::empty(foreign_key, true, false));
    }
    query.with(options.with, options.immediate);
    relation.apply_callbacks(&mut query, options.callback.as_ref());

    RelationLoader::new(query, foreign_key, true, false, Vec::new(), options.immediate)
}

/// Copy the related entity's key into the owner's foreign key columns.
/// Detaching (`None`) writes NULL into them.
pub(super) fn add_related_entity(
    relation: &Relation,
    owner: &DataMapper,
    entity: Option<&Record>,
) -> Result<()> {
    let related = match entity {
        Some(entity) => entity.data_mapper().entity_mapper().clone(),
        None => relation.related_mapper(owner.entity_manager()),
    };
    let foreign_key = relation.resolve_foreign_key(owner.entity_mapper(), &related);

    let columns = entity.map_or_else(ColumnMap::new, |entity| {
        entity.data_mapper().get_raw_columns()
    });
    for (column, value) in foreign_key.value_map(&columns) {
        owner.set_column(&column, value)?;
    }
    Ok(())
}
