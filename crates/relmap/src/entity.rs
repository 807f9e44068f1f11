//! The entity surface.
//!
//! Application types implement [`Entity`] by wrapping a [`Record`], the shared
//! handle to the entity's [`DataMapper`]. Every field access goes through the
//! record: `get` dispatches to a relation first and to a column otherwise, `set`
//! routes entities to relation updates and plain values to column writes.
//!
//! ```ignore
//! struct User(Record);
//!
//! impl Entity for User {
//!     fn map_entity(mapper: &mut EntityMapper) {
//!         mapper.casts([("id", "int")]);
//!         mapper.relation("posts").has_many::<Post>();
//!     }
//!     fn from_record(record: Record) -> Self { User(record) }
//!     fn record(&self) -> &Record { &self.0 }
//! }
//! ```

use crate::mapper::{DataMapper, EntityMapper};
use relmap_core::{ColumnMap, Error, NotFoundKind, Result, Value};
use serde::ser::{Error as _, Serialize, Serializer};
use std::any::TypeId;
use std::fmt;
use std::rc::Rc;

/// A mapped domain type.
pub trait Entity: Sized + 'static {
    /// Declare the schema of this entity type.
    fn map_entity(mapper: &mut EntityMapper);

    /// Wrap a record produced by the ORM.
    fn from_record(record: Record) -> Self;

    /// The record backing this entity.
    fn record(&self) -> &Record;

    /// Read a relation or a column.
    fn get(&self, name: &str) -> Result<Field> {
        self.record().get(name)
    }

    /// Write a relation or a column.
    fn set(&self, name: &str, value: impl Into<Assign>) -> Result<()> {
        self.record().set(name, value)
    }

    /// Is `name` a declared relation or a known column?
    fn has(&self, name: &str) -> bool {
        self.record().has(name)
    }

    /// Drop the cached relation and the column value named `name`.
    fn unset(&self, name: &str) {
        self.record().unset(name);
    }

    /// Read a column through its cast and getter.
    fn column(&self, name: &str) -> Result<Value> {
        self.record().data_mapper().get_column(name)
    }

    /// Read a to-one relation as a concrete entity.
    fn related_one<T: Entity>(&self, name: &str) -> Result<Option<T>> {
        match self.record().data_mapper().get_related(name)? {
            Related::One(record) => record.map(Record::cast::<T>).transpose(),
            Related::Many(records) => records.into_iter().next().map(Record::cast::<T>).transpose(),
        }
    }

    /// Read a to-many relation as concrete entities.
    fn related_many<T: Entity>(&self, name: &str) -> Result<Vec<T>> {
        self.record()
            .data_mapper()
            .get_related(name)?
            .into_records()
            .into_iter()
            .map(Record::cast::<T>)
            .collect()
    }

    /// Queue a junction row insert for a many-to-many relation.
    fn link<E: Entity>(&self, name: &str, entity: &E) -> Result<()> {
        self.record().data_mapper().link(name, entity.record())
    }

    /// Queue a junction row delete for a many-to-many relation.
    fn unlink<E: Entity>(&self, name: &str, entity: &E) -> Result<()> {
        self.record().data_mapper().unlink(name, entity.record())
    }

    fn to_json(&self) -> Result<serde_json::Value> {
        self.record().to_json()
    }
}

/// Type identity of an entity, used as the schema registry key.
#[derive(Clone, Copy)]
pub struct EntityType {
    id: TypeId,
    name: &'static str,
    map: fn(&mut EntityMapper),
}

impl EntityType {
    pub fn of<T: Entity>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            map: T::map_entity,
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type name without its module path.
    pub fn short_name(&self) -> &'static str {
        let base = self.name.split('<').next().unwrap_or(self.name);
        base.rsplit("::").next().unwrap_or(base)
    }

    pub(crate) fn map(&self, mapper: &mut EntityMapper) {
        (self.map)(mapper);
    }
}

impl PartialEq for EntityType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EntityType {}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EntityType").field(&self.name).finish()
    }
}

/// Shared, type-erased handle to an entity's data mapper.
#[derive(Clone)]
pub struct Record(Rc<DataMapper>);

impl Record {
    pub(crate) fn new(data: DataMapper) -> Self {
        Record(Rc::new(data))
    }

    pub fn data_mapper(&self) -> &DataMapper {
        &self.0
    }

    pub fn entity_type(&self) -> EntityType {
        self.0.entity_mapper().entity_type()
    }

    pub fn is<T: Entity>(&self) -> bool {
        self.entity_type().id() == TypeId::of::<T>()
    }

    /// Convert into a concrete entity.
    pub fn cast<T: Entity>(self) -> Result<T> {
        if self.is::<T>() {
            Ok(T::from_record(self))
        } else {
            Err(Error::config(format!(
                "Record of [{}] is not a [{}]",
                self.entity_type().short_name(),
                std::any::type_name::<T>()
            )))
        }
    }

    /// Do both handles point at the same entity instance?
    pub fn ptr_eq(&self, other: &Record) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn get(&self, name: &str) -> Result<Field> {
        let data = self.data_mapper();
        if data.has_relation(name) {
            return data.get_related(name).map(Field::Related);
        }
        match data.get_column(name) {
            Ok(value) => Ok(Field::Column(value)),
            Err(Error::NotFound(_)) => Err(Error::not_found(NotFoundKind::ColumnOrRelation, name)),
            Err(e) => Err(e),
        }
    }

    pub fn set(&self, name: &str, value: impl Into<Assign>) -> Result<()> {
        let data = self.data_mapper();
        let value = value.into();
        if !data.has_relation(name) {
            return match value {
                Assign::Value(value) => data.set_column(name, value),
                Assign::Entity(_) | Assign::Entities(_) => {
                    Err(Error::not_found(NotFoundKind::Relation, name))
                }
            };
        }
        match value {
            Assign::Entity(entity) => data.set_related(name, entity.as_ref()),
            Assign::Value(Value::Null) => data.set_related(name, None),
            Assign::Entities(entities) => entities
                .iter()
                .try_for_each(|entity| data.link(name, entity)),
            Assign::Value(_) => Err(Error::config(format!(
                "Relation [{name}] can only be assigned entities"
            ))),
        }
    }

    pub fn has(&self, name: &str) -> bool {
        let data = self.data_mapper();
        data.has_relation(name) || data.has_column(name)
    }

    pub fn unset(&self, name: &str) {
        let data = self.data_mapper();
        data.clear_related(name, false);
        data.clear_column(name, true);
    }

    /// JSON object of the columns (casts and getters applied) and every
    /// relation already loaded. Serializing never fetches a relation.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let data = self.data_mapper();
        let mut object = serde_json::Map::new();
        for name in data.get_raw_columns().keys() {
            object.insert(name.clone(), data.get_column(name)?.to_json());
        }
        for (name, related) in data.loaded_relations() {
            object.insert(name, related.to_json()?);
        }
        Ok(serde_json::Value::Object(object))
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json()
            .map_err(S::Error::custom)?
            .serialize(serializer)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let columns: Vec<_> = self
            .data_mapper()
            .get_raw_columns()
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        write!(
            f,
            "[{}({})]",
            self.entity_type().short_name(),
            columns.join(", ")
        )
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("entity", &self.entity_type().short_name())
            .field("columns", &self.data_mapper().get_raw_columns())
            .field("is_new", &self.data_mapper().is_new())
            .finish_non_exhaustive()
    }
}

/// Result of reading a field by name.
#[derive(Debug, Clone)]
pub enum Field {
    Column(Value),
    Related(Related),
}

impl Field {
    pub fn into_value(self) -> Option<Value> {
        match self {
            Field::Column(value) => Some(value),
            Field::Related(_) => None,
        }
    }

    pub fn into_related(self) -> Option<Related> {
        match self {
            Field::Column(_) => None,
            Field::Related(related) => Some(related),
        }
    }
}

/// A resolved relation.
#[derive(Debug, Clone)]
pub enum Related {
    One(Option<Record>),
    Many(Vec<Record>),
}

impl Related {
    pub fn one(&self) -> Option<&Record> {
        match self {
            Related::One(record) => record.as_ref(),
            Related::Many(records) => records.first(),
        }
    }

    pub fn many(&self) -> &[Record] {
        match self {
            Related::One(Some(record)) => std::slice::from_ref(record),
            Related::One(None) => &[],
            Related::Many(records) => records,
        }
    }

    pub fn into_records(self) -> Vec<Record> {
        match self {
            Related::One(record) => record.into_iter().collect(),
            Related::Many(records) => records,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.many().is_empty()
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        match self {
            Related::One(None) => Ok(serde_json::Value::Null),
            Related::One(Some(record)) => record.to_json(),
            Related::Many(records) => records
                .iter()
                .map(Record::to_json)
                .collect::<Result<Vec<_>>>()
                .map(serde_json::Value::Array),
        }
    }
}

/// Right-hand side of a field write.
#[derive(Debug, Clone)]
pub enum Assign {
    Value(Value),
    Entity(Option<Record>),
    Entities(Vec<Record>),
}

impl From<Value> for Assign {
    fn from(value: Value) -> Self {
        Assign::Value(value)
    }
}

impl From<bool> for Assign {
    fn from(value: bool) -> Self {
        Assign::Value(Value::Bool(value))
    }
}

impl From<i32> for Assign {
    fn from(value: i32) -> Self {
        Assign::Value(Value::from(value))
    }
}

impl From<i64> for Assign {
    fn from(value: i64) -> Self {
        Assign::Value(Value::Int(value))
    }
}

impl From<f64> for Assign {
    fn from(value: f64) -> Self {
        Assign::Value(Value::Float(value))
    }
}

impl From<&str> for Assign {
    fn from(value: &str) -> Self {
        Assign::Value(Value::from(value))
    }
}

impl From<String> for Assign {
    fn from(value: String) -> Self {
        Assign::Value(Value::Text(value))
    }
}

impl From<serde_json::Value> for Assign {
    fn from(value: serde_json::Value) -> Self {
        Assign::Value(Value::Json(value))
    }
}

impl From<ColumnMap> for Assign {
    fn from(value: ColumnMap) -> Self {
        let object = value
            .into_iter()
            .map(|(name, value)| (name, value.to_json()))
            .collect();
        Assign::Value(Value::Json(serde_json::Value::Object(object)))
    }
}

impl From<Record> for Assign {
    fn from(record: Record) -> Self {
        Assign::Entity(Some(record))
    }
}

impl From<&Record> for Assign {
    fn from(record: &Record) -> Self {
        Assign::Entity(Some(record.clone()))
    }
}

impl From<Option<Record>> for Assign {
    fn from(record: Option<Record>) -> Self {
        Assign::Entity(record)
    }
}

impl From<Vec<Record>> for Assign {
    fn from(records: Vec<Record>) -> Self {
        Assign::Entities(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BlogPost(Record);

    impl Entity for BlogPost {
        fn map_entity(_mapper: &mut EntityMapper) {}

        fn from_record(record: Record) -> Self {
            BlogPost(record)
        }

        fn record(&self) -> &Record {
            &self.0
        }
    }

    #[test]
    fn test_entity_type_names() {
        let ty = EntityType::of::<BlogPost>();
        assert_eq!(ty.short_name(), "BlogPost");
        assert!(ty.name().ends_with("::BlogPost"));
        assert_eq!(ty, EntityType::of::<BlogPost>());
        assert_eq!(format!("{ty:?}"), format!("EntityType({:?})", ty.name()));
    }

    #[test]
    fn test_assign_conversions() {
        assert!(matches!(Assign::from(3), Assign::Value(Value::Int(3))));
        assert!(matches!(Assign::from(None::<Record>), Assign::Entity(None)));
        assert!(matches!(Assign::from(Vec::<Record>::new()), Assign::Entities(v) if v.is_empty()));

        let mut map = ColumnMap::new();
        map.insert("foo".to_string(), Value::from("bar"));
        assert!(matches!(
            Assign::from(map),
            Assign::Value(Value::Json(json)) if json == serde_json::json!({"foo": "bar"})
        ));
    }

    #[test]
    fn test_related_views() {
        let empty = Related::One(None);
        assert!(empty.is_empty());
        assert!(empty.one().is_none());
        assert_eq!(empty.to_json().unwrap(), serde_json::Value::Null);
        assert_eq!(
            Related::Many(Vec::new()).to_json().unwrap(),
            serde_json::json!([])
        );
    }
}
