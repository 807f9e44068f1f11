//! Schema descriptors and per-instance state.

mod data_mapper;
mod entity_mapper;

pub use data_mapper::{DataMapper, LoaderMap};
pub use entity_mapper::{
    ColumnTransform, EntityMapper, EventHandler, PrimaryKeyGenerator, QueryFilter,
    RelationFactory, events,
};
