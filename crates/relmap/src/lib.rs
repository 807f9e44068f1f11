//! relmap - a data-mapper ORM with dirty tracking and batched relation loading.
//!
//! Entities are thin handles over a [`DataMapper`] that tracks raw column
//! values, modified columns, resolved relations and lifecycle flags. Schemas
//! are declared once per entity type through a fluent [`EntityMapper`] and
//! cached per [`EntityManager`].
//!
//! - Typed access through casts, getters and setters
//! - Relations: belongs-to, has-one, has-many and many-to-many through a junction
//! - Eager loading with one query per relation for a whole result set
//! - Soft delete, timestamps, named filters and lifecycle events
//!
//! # Quick Start
//!
//! ```ignore
//! use relmap::prelude::*;
//!
//! struct User(Record);
//!
//! impl Entity for User {
//!     fn map_entity(mapper: &mut EntityMapper) {
//!         mapper.casts([("age", "?int")]);
//!         mapper.relation("posts").has_many::<Post>();
//!     }
//!     fn from_record(record: Record) -> Self { User(record) }
//!     fn record(&self) -> &Record { &self.0 }
//! }
//!
//! fn example(connection: Rc<dyn Connection>) -> Result<()> {
//!     let manager = EntityManager::new(connection);
//!     let users = manager.repository::<User>();
//!
//!     let mut columns = ColumnMap::new();
//!     columns.insert("name".into(), "alice".into());
//!     let alice = users.create(columns)?;
//!     users.save(&alice)?;
//!
//!     let mut query = manager.query::<User>();
//!     query.with(["posts"], false);
//!     for user in query.all_as::<User>(&[])? {
//!         println!("{}", user.related_many::<Post>("posts")?.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod cast;
pub mod entity;
pub mod key;
pub mod manager;
pub mod mapper;
pub mod query;
pub mod relation;
pub mod repository;

pub use cast::{Cast, CastKind};
pub use entity::{Assign, Entity, EntityType, Field, Record, Related};
pub use key::{ForeignKey, Junction, KeyValue, PrimaryKey};
pub use manager::{EntityManager, ManagerConfig};
pub use mapper::{
    ColumnTransform, DataMapper, EntityMapper, EventHandler, LoaderMap, PrimaryKeyGenerator,
    QueryFilter, RelationFactory, events,
};
pub use query::{
    EntityQuery, NamedFilter, Query, QueryBuilder, QueryCallback, QueryScope, With, WithAttributes,
};
pub use relation::{LoaderOptions, Relation, RelationKind, RelationLoader};
pub use repository::Repository;

pub use relmap_core::{
    ColumnMap, Connection, DEFAULT_DATE_FORMAT, Dialect, Error, Result, Row, StateErrorKind, Value,
};
pub use relmap_query::{Expr, Join, JoinType, OrderBy, OrderDirection, QueryStatement};

/// Everything needed to declare and use entities.
///
/// ```ignore
/// use relmap::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Assign, ColumnMap, Connection, Dialect, Entity, EntityManager, EntityMapper, EntityQuery,
        Error, Expr, Field, ForeignKey, Join, Junction, KeyValue, OrderDirection, PrimaryKey,
        Query, QueryBuilder, Record, Related, Repository, Result, Value, With, events,
    };
}
