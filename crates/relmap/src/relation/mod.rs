//! Relation resolvers.
//!
//! A [`Relation`] is declared on the owner's schema and knows how to resolve
//! the related entities of one owner (`get_result`), of many owners at once
//! (`get_loader`, one query for the whole batch) and how to attach an entity to
//! the owner. The per-kind strategies live in the submodules:
//!
//! - `belongs_to`: the owner row holds the foreign key
//! - `has`: the related rows hold the foreign key (`HasOne`, `HasMany`)
//! - `share`: a junction table links both sides (`ShareOne`, `ShareMany`)

mod belongs_to;
mod has;
mod loader;
mod share;

pub use loader::RelationLoader;

use crate::entity::{EntityType, Record, Related};
use crate::key::{ForeignKey, Junction};
use crate::manager::EntityManager;
use crate::mapper::{DataMapper, EntityMapper};
use crate::query::{EntityQuery, Query, QueryBuilder, QueryCallback, With};
use relmap_core::{ColumnMap, Error, Result, UnsupportedError, Value};
use relmap_query::Expr;
use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    BelongsTo,
    HasOne,
    HasMany,
    ShareOne,
    ShareMany,
}

impl RelationKind {
    /// Does the relation resolve to a list?
    pub const fn is_many(self) -> bool {
        matches!(self, RelationKind::HasMany | RelationKind::ShareMany)
    }

    /// Is the relation backed by a junction table?
    pub const fn is_share(self) -> bool {
        matches!(self, RelationKind::ShareOne | RelationKind::ShareMany)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            RelationKind::BelongsTo => "belongs_to",
            RelationKind::HasOne => "has_one",
            RelationKind::HasMany => "has_many",
            RelationKind::ShareOne => "share_one",
            RelationKind::ShareMany => "share_many",
        }
    }
}

/// Inputs of a batched load.
pub struct LoaderOptions<'a> {
    /// Raw rows of the owners being loaded.
    pub results: &'a [ColumnMap],
    /// Call-site customization of the related query.
    pub callback: Option<QueryCallback>,
    /// Nested eager loads below this relation.
    pub with: Vec<With>,
    /// Run the batched query now instead of on first access.
    pub immediate: bool,
}

/// A declared relation.
pub struct Relation {
    kind: RelationKind,
    related: EntityType,
    foreign_key: OnceCell<ForeignKey>,
    junction: OnceCell<Junction>,
    hook: Option<QueryCallback>,
}

impl Relation {
    pub(crate) fn new(kind: RelationKind, related: EntityType) -> Self {
        Self {
            kind,
            related,
            foreign_key: OnceCell::new(),
            junction: OnceCell::new(),
            hook: None,
        }
    }

    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    pub fn related(&self) -> EntityType {
        self.related
    }

    /// Use an explicit foreign key instead of the naming convention.
    pub fn foreign_key(&mut self, foreign_key: ForeignKey) -> &mut Self {
        self.foreign_key = OnceCell::from(foreign_key);
        self
    }

    /// Use an explicit junction table (share relations).
    pub fn junction(&mut self, junction: Junction) -> &mut Self {
        self.junction = OnceCell::from(junction);
        self
    }

    /// Customize every query this relation issues.
    pub fn query<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&mut Query) + 'static,
    {
        self.hook = Some(Rc::new(hook));
        self
    }

    /// The foreign key, derived on first use.
    ///
    /// `BelongsTo` defaults to the related entity's foreign key, every other
    /// kind to the owner's.
    pub(crate) fn resolve_foreign_key(
        &self,
        owner: &EntityMapper,
        related: &EntityMapper,
    ) -> &ForeignKey {
        self.foreign_key.get_or_init(|| match self.kind {
            RelationKind::BelongsTo => related.get_foreign_key().clone(),
            _ => owner.get_foreign_key().clone(),
        })
    }

    /// The junction, derived on first use from both table names and the
    /// related entity's foreign key.
    pub(crate) fn resolve_junction(&self, owner: &EntityMapper, related: &EntityMapper) -> &Junction {
        self.junction.get_or_init(|| {
            Junction::new(
                Junction::default_table(owner.get_table(), related.get_table()),
                related.get_foreign_key().columns().iter().cloned(),
            )
        })
    }

    /// The relation hook first, then the call-site callback.
    fn apply_callbacks(&self, query: &mut EntityQuery, callback: Option<&QueryCallback>) {
        if let Some(hook) = &self.hook {
            hook(query.query_mut());
        }
        if let Some(callback) = callback {
            callback(query.query_mut());
        }
    }

    fn related_mapper(&self, manager: &EntityManager) -> Rc<EntityMapper> {
        manager.entity_mapper_for(self.related)
    }

    /// Resolve the relation for one owner.
    pub fn get_result(&self, owner: &DataMapper, callback: Option<&QueryCallback>) -> Result<Related> {
        match self.kind {
            RelationKind::BelongsTo => belongs_to::get_result(self, owner, callback),
            RelationKind::HasOne | RelationKind::HasMany => has::get_result(self, owner, callback),
            RelationKind::ShareOne | RelationKind::ShareMany => {
                share::get_result(self, owner, callback)
            }
        }
    }

    /// Build the batched loader answering this relation for every owner in
    /// `options.results` with a single query.
    pub fn get_loader(
        &self,
        manager: &EntityManager,
        owner: &EntityMapper,
        options: LoaderOptions<'_>,
    ) -> Result<RelationLoader> {
        tracing::debug!(
            owner = owner.entity_type().short_name(),
            related = self.related.short_name(),
            kind = self.kind.as_str(),
            owners = options.results.len(),
            "Building relation loader"
        );
        match self.kind {
            RelationKind::BelongsTo => belongs_to::get_loader(self, manager, owner, options),
            RelationKind::HasOne | RelationKind::HasMany => {
                has::get_loader(self, manager, owner, options)
            }
            RelationKind::ShareOne | RelationKind::ShareMany => {
                share::get_loader(self, manager, owner, options)
            }
        }
    }

    /// Attach `entity` to `owner` by copying key columns.
    pub fn add_related_entity(&self, owner: &DataMapper, entity: Option<&Record>) -> Result<()> {
        if let Some(entity) = entity {
            self.check_related(entity)?;
        }
        match (self.kind, entity) {
            (RelationKind::BelongsTo, _) => belongs_to::add_related_entity(self, owner, entity),
            (RelationKind::HasOne | RelationKind::HasMany, Some(entity)) => {
                has::add_related_entity(self, owner, entity)
            }
            _ => Err(self.unsupported("add_related_entity")),
        }
    }

    /// Insert the junction row linking `owner` and `entity`.
    pub fn link(&self, owner: &DataMapper, entity: &Record) -> Result<()> {
        if !self.kind.is_share() {
            return Err(self.unsupported("link"));
        }
        self.check_related(entity)?;
        share::link(self, owner, entity)
    }

    /// Delete the junction row linking `owner` and `entity`.
    pub fn unlink(&self, owner: &DataMapper, entity: &Record) -> Result<()> {
        if !self.kind.is_share() {
            return Err(self.unsupported("unlink"));
        }
        self.check_related(entity)?;
        share::unlink(self, owner, entity)
    }

    fn check_related(&self, entity: &Record) -> Result<()> {
        if entity.entity_type() == self.related {
            Ok(())
        } else {
            Err(Error::config(format!(
                "Relation to [{}] cannot take a [{}]",
                self.related.short_name(),
                entity.entity_type().short_name()
            )))
        }
    }

    fn unsupported(&self, operation: &'static str) -> Error {
        Error::Unsupported(UnsupportedError {
            operation,
            relation: self.kind.as_str().to_string(),
        })
    }
}

impl fmt::Debug for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relation")
            .field("kind", &self.kind)
            .field("related", &self.related)
            .field("foreign_key", &self.foreign_key.get())
            .field("junction", &self.junction.get())
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

/// Does the key contain a NULL component? Such a key never matches a row.
fn has_null(key: &ColumnMap) -> bool {
    key.values().any(Value::is_null)
}

fn empty_result(many: bool) -> Related {
    if many {
        Related::Many(Vec::new())
    } else {
        Related::One(None)
    }
}

/// Collect each key column's values across the owner rows.
fn collect_keys(keys: impl IntoIterator<Item = ColumnMap>) -> BTreeMap<String, Vec<Value>> {
    let mut ids: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for key in keys {
        for (column, value) in key {
            let values = ids.entry(column).or_default();
            if !value.is_null() && !values.contains(&value) {
                values.push(value);
            }
        }
    }
    ids
}

/// Constrain `table.column` to the collected values: `=` for one value, `IN`
/// otherwise. Returns `false` when a column has no usable value, in which case
/// no row can match and the caller skips the query.
fn constrain_keys(query: &mut EntityQuery, table: &str, ids: BTreeMap<String, Vec<Value>>) -> bool {
    if ids.is_empty() || ids.values().any(Vec::is_empty) {
        return false;
    }
    for (column, mut values) in ids {
        let target = Expr::qualified(table, column);
        if values.len() == 1 {
            query.where_(target.eq(values.remove(0)));
        } else {
            query.where_(target.in_list(values));
        }
    }
    true
}

/// `table.column = value` for every key column.
fn constrain_key(query: &mut EntityQuery, table: &str, key: ColumnMap) {
    for (column, value) in key {
        query.where_(Expr::qualified(table, column).eq(value));
    }
}
