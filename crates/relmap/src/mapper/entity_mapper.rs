//! Per-type schema descriptor.
//!
//! An `EntityMapper` is filled once by the entity's `map_entity` function and is
//! read-only afterwards. Derived defaults (name, table, sequence, keys) are
//! computed on first read and cached; explicit values set during registration
//! always win.

use super::DataMapper;
use crate::entity::{Entity, EntityType};
use crate::key::{ForeignKey, KeyValue, PrimaryKey};
use crate::manager::ManagerConfig;
use crate::query::Query;
use crate::relation::{Relation, RelationKind};
use regex::Regex;
use relmap_core::{Result, Value};
use std::cell::OnceCell;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::rc::Rc;
use std::sync::OnceLock;

/// Column getter or setter: receives the value and the owning data mapper.
pub type ColumnTransform = Rc<dyn Fn(Value, &DataMapper) -> Value>;

/// Produces the primary key of a new entity before it is inserted.
pub type PrimaryKeyGenerator = Rc<dyn Fn(&DataMapper) -> Option<KeyValue>>;

/// Named query filter; the second argument is the optional filter argument.
pub type QueryFilter = Rc<dyn Fn(&mut Query, Option<&Value>)>;

/// Lifecycle event handler.
pub type EventHandler = Rc<dyn Fn(&DataMapper) -> Result<()>>;

/// Lifecycle events dispatched by the repository.
pub mod events {
    pub const SAVE: &str = "save";
    pub const UPDATE: &str = "update";
    pub const DELETE: &str = "delete";
}

pub struct EntityMapper {
    entity: EntityType,
    name: OnceCell<String>,
    table: OnceCell<String>,
    sequence: OnceCell<String>,
    primary_key: OnceCell<PrimaryKey>,
    foreign_key: OnceCell<ForeignKey>,
    primary_key_generator: Option<PrimaryKeyGenerator>,
    casts: HashMap<String, String>,
    fillable: Vec<String>,
    guarded: Vec<String>,
    getters: HashMap<String, ColumnTransform>,
    setters: HashMap<String, ColumnTransform>,
    relations: HashMap<String, Relation>,
    filters: HashMap<String, QueryFilter>,
    soft_delete: bool,
    soft_delete_column: String,
    timestamp: bool,
    timestamp_columns: (String, String),
    events: HashMap<String, Vec<EventHandler>>,
}

impl EntityMapper {
    pub fn new(entity: EntityType, config: &ManagerConfig) -> Self {
        Self {
            entity,
            name: OnceCell::new(),
            table: OnceCell::new(),
            sequence: OnceCell::new(),
            primary_key: OnceCell::new(),
            foreign_key: OnceCell::new(),
            primary_key_generator: None,
            casts: HashMap::new(),
            fillable: Vec::new(),
            guarded: Vec::new(),
            getters: HashMap::new(),
            setters: HashMap::new(),
            relations: HashMap::new(),
            filters: HashMap::new(),
            soft_delete: false,
            soft_delete_column: config.soft_delete_column.clone(),
            timestamp: false,
            timestamp_columns: (
                config.created_at_column.clone(),
                config.updated_at_column.clone(),
            ),
            events: HashMap::new(),
        }
    }

    // ==================== Registration ====================

    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = OnceCell::from(name.into());
        self
    }

    pub fn table(&mut self, table: impl Into<String>) -> &mut Self {
        self.table = OnceCell::from(table.into());
        self
    }

    pub fn sequence(&mut self, sequence: impl Into<String>) -> &mut Self {
        self.sequence = OnceCell::from(sequence.into());
        self
    }

    pub fn primary_key<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = OnceCell::from(PrimaryKey::new(columns));
        self
    }

    /// Foreign key other entities use to reference this one.
    pub fn foreign_key(&mut self, foreign_key: ForeignKey) -> &mut Self {
        self.foreign_key = OnceCell::from(foreign_key);
        self
    }

    pub fn primary_key_generator<F>(&mut self, generator: F) -> &mut Self
    where
        F: Fn(&DataMapper) -> Option<KeyValue> + 'static,
    {
        self.primary_key_generator = Some(Rc::new(generator));
        self
    }

    /// Declare column casts (`column → tag`). Tags are validated on use.
    pub fn casts<I, K, V>(&mut self, casts: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.casts
            .extend(casts.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn fillable<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fillable = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn guarded<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.guarded = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn getter<F>(&mut self, column: impl Into<String>, getter: F) -> &mut Self
    where
        F: Fn(Value, &DataMapper) -> Value + 'static,
    {
        self.getters.insert(column.into(), Rc::new(getter));
        self
    }

    pub fn setter<F>(&mut self, column: impl Into<String>, setter: F) -> &mut Self
    where
        F: Fn(Value, &DataMapper) -> Value + 'static,
    {
        self.setters.insert(column.into(), Rc::new(setter));
        self
    }

    /// Start declaring the relation `name`.
    pub fn relation(&mut self, name: impl Into<String>) -> RelationFactory<'_> {
        RelationFactory {
            mapper: self,
            name: name.into(),
        }
    }

    pub fn filter<F>(&mut self, name: impl Into<String>, filter: F) -> &mut Self
    where
        F: Fn(&mut Query, Option<&Value>) + 'static,
    {
        self.filters.insert(name.into(), Rc::new(filter));
        self
    }

    /// Enable soft delete; `None` keeps the configured column name.
    pub fn use_soft_delete(&mut self, value: bool, column: Option<&str>) -> &mut Self {
        self.soft_delete = value;
        if let Some(column) = column {
            self.soft_delete_column = column.to_string();
        }
        self
    }

    /// Enable timestamps; `None` keeps the configured column names.
    pub fn use_timestamp(&mut self, value: bool, columns: Option<(&str, &str)>) -> &mut Self {
        self.timestamp = value;
        if let Some((created, updated)) = columns {
            self.timestamp_columns = (created.to_string(), updated.to_string());
        }
        self
    }

    /// Register a handler for a lifecycle event (see [`events`]).
    pub fn on<F>(&mut self, event: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&DataMapper) -> Result<()> + 'static,
    {
        self.events
            .entry(event.into())
            .or_default()
            .push(Rc::new(handler));
        self
    }

    // ==================== Lookup ====================

    pub fn entity_type(&self) -> EntityType {
        self.entity
    }

    /// Entity name; defaults to the snake-cased type name.
    pub fn get_name(&self) -> &str {
        self.name
            .get_or_init(|| snake_case(self.entity.short_name()))
    }

    /// Table name; defaults to the entity name plus `s`.
    pub fn get_table(&self) -> &str {
        self.table.get_or_init(|| format!("{}s", self.get_name()))
    }

    /// Sequence name; defaults to `{table}_{pk}_seq`.
    pub fn get_sequence(&self) -> &str {
        self.sequence.get_or_init(|| {
            let pk = self
                .get_primary_key()
                .columns()
                .first()
                .cloned()
                .unwrap_or_default();
            format!("{}_{}_seq", self.get_table(), pk)
        })
    }

    pub fn get_primary_key(&self) -> &PrimaryKey {
        self.primary_key.get_or_init(PrimaryKey::default)
    }

    /// Foreign key referencing this entity; defaults to `{pk: name_pk}`.
    pub fn get_foreign_key(&self) -> &ForeignKey {
        self.foreign_key.get_or_init(|| {
            let name = self.get_name();
            ForeignKey::new(
                self.get_primary_key()
                    .columns()
                    .iter()
                    .map(|pk| (pk.clone(), format!("{name}_{pk}"))),
            )
        })
    }

    pub fn get_primary_key_generator(&self) -> Option<&PrimaryKeyGenerator> {
        self.primary_key_generator.as_ref()
    }

    pub fn get_casts(&self) -> &HashMap<String, String> {
        &self.casts
    }

    pub fn get_fillable(&self) -> &[String] {
        &self.fillable
    }

    pub fn get_guarded(&self) -> &[String] {
        &self.guarded
    }

    pub fn get_getter(&self, column: &str) -> Option<&ColumnTransform> {
        self.getters.get(column)
    }

    pub fn get_setter(&self, column: &str) -> Option<&ColumnTransform> {
        self.setters.get(column)
    }

    pub fn get_relations(&self) -> &HashMap<String, Relation> {
        &self.relations
    }

    pub fn get_relation(&self, name: &str) -> Option<&Relation> {
        self.relations.get(name)
    }

    pub fn get_filters(&self) -> &HashMap<String, QueryFilter> {
        &self.filters
    }

    pub fn get_filter(&self, name: &str) -> Option<&QueryFilter> {
        self.filters.get(name)
    }

    /// Soft delete is only active when its column is cast `?date`.
    pub fn has_soft_delete(&self) -> bool {
        self.soft_delete
            && self.casts.get(&self.soft_delete_column).map(String::as_str) == Some("?date")
    }

    pub fn get_soft_delete_column(&self) -> &str {
        &self.soft_delete_column
    }

    /// Timestamps are only active when created is cast `date` and updated `?date`.
    pub fn has_timestamp(&self) -> bool {
        let (created, updated) = &self.timestamp_columns;
        self.timestamp
            && self.casts.get(created).map(String::as_str) == Some("date")
            && self.casts.get(updated).map(String::as_str) == Some("?date")
    }

    pub fn get_timestamp_columns(&self) -> (&str, &str) {
        (&self.timestamp_columns.0, &self.timestamp_columns.1)
    }

    pub fn get_event_handlers(&self, event: &str) -> &[EventHandler] {
        self.events.get(event).map_or(&[], Vec::as_slice)
    }
}

impl fmt::Debug for EntityMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut relations: Vec<_> = self.relations.keys().collect();
        relations.sort();
        f.debug_struct("EntityMapper")
            .field("entity", &self.entity)
            .field("table", &self.get_table())
            .field("primary_key", self.get_primary_key())
            .field("casts", &self.casts)
            .field("relations", &relations)
            .field("soft_delete", &self.has_soft_delete())
            .field("timestamp", &self.has_timestamp())
            .finish_non_exhaustive()
    }
}

/// Declares one relation on an [`EntityMapper`].
pub struct RelationFactory<'a> {
    mapper: &'a mut EntityMapper,
    name: String,
}

impl<'a> RelationFactory<'a> {
    fn declare(self, kind: RelationKind, related: EntityType) -> &'a mut Relation {
        let relation = Relation::new(kind, related);
        match self.mapper.relations.entry(self.name) {
            Entry::Occupied(mut entry) => {
                entry.insert(relation);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(relation),
        }
    }

    /// The owner holds the foreign key to `T`.
    pub fn belongs_to<T: Entity>(self) -> &'a mut Relation {
        self.declare(RelationKind::BelongsTo, EntityType::of::<T>())
    }

    /// One `T` row holds the foreign key to the owner.
    pub fn has_one<T: Entity>(self) -> &'a mut Relation {
        self.declare(RelationKind::HasOne, EntityType::of::<T>())
    }

    /// Many `T` rows hold the foreign key to the owner.
    pub fn has_many<T: Entity>(self) -> &'a mut Relation {
        self.declare(RelationKind::HasMany, EntityType::of::<T>())
    }

    /// One `T` reached through a junction table.
    pub fn share_one<T: Entity>(self) -> &'a mut Relation {
        self.declare(RelationKind::ShareOne, EntityType::of::<T>())
    }

    /// Many `T` reached through a junction table.
    pub fn share_many<T: Entity>(self) -> &'a mut Relation {
        self.declare(RelationKind::ShareMany, EntityType::of::<T>())
    }
}

/// `BlogPost` → `blog_post`.
pub(crate) fn snake_case(name: &str) -> String {
    static BOUNDARY: OnceLock<Option<Regex>> = OnceLock::new();
    let boundary = BOUNDARY.get_or_init(|| Regex::new("([^A-Z])([A-Z])").ok());
    let split = match boundary {
        Some(regex) => regex.replace_all(name, "${1}_${2}").into_owned(),
        None => name.to_string(),
    };
    split.to_lowercase().replace('-', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Record;

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

    fn mapper() -> EntityMapper {
        EntityMapper::new(EntityType::of::<BlogPost>(), &ManagerConfig::default())
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("BlogPost"), "blog_post");
        assert_eq!(snake_case("User"), "user");
        assert_eq!(snake_case("my-Thing"), "my_thing");
    }

    #[test]
    fn test_derived_defaults() {
        let m = mapper();
        assert_eq!(m.get_name(), "blog_post");
        assert_eq!(m.get_table(), "blog_posts");
        assert_eq!(m.get_sequence(), "blog_posts_id_seq");
        assert_eq!(m.get_primary_key().columns(), ["id".to_string()]);
        assert_eq!(
            m.get_foreign_key(),
            &ForeignKey::new([("id", "blog_post_id")])
        );
    }

    #[test]
    fn test_explicit_values_win() {
        let mut m = mapper();
        m.name("article").table("posts").primary_key(["a", "b"]);
        assert_eq!(m.get_table(), "posts");
        assert_eq!(m.get_sequence(), "posts_a_seq");
        assert_eq!(
            m.get_foreign_key(),
            &ForeignKey::new([("a", "article_a"), ("b", "article_b")])
        );
    }

    #[test]
    fn test_soft_delete_requires_nullable_date_cast() {
        let mut m = mapper();
        m.use_soft_delete(true, None);
        assert!(!m.has_soft_delete());
        m.casts([("deleted_at", "date")]);
        assert!(!m.has_soft_delete());
        m.casts([("deleted_at", "?date")]);
        assert!(m.has_soft_delete());

        m.use_soft_delete(true, Some("removed"));
        assert!(!m.has_soft_delete());
        assert_eq!(m.get_soft_delete_column(), "removed");
    }

    #[test]
    fn test_timestamp_requires_exact_casts() {
        let mut m = mapper();
        m.use_timestamp(true, None)
            .casts([("created_at", "date"), ("updated_at", "date")]);
        assert!(!m.has_timestamp());
        m.casts([("updated_at", "?date")]);
        assert!(m.has_timestamp());
        assert_eq!(m.get_timestamp_columns(), ("created_at", "updated_at"));
    }

    #[test]
    fn test_config_defaults_flow_into_columns() {
        let config = ManagerConfig {
            soft_delete_column: "removed_on".to_string(),
            ..ManagerConfig::default()
        };
        let m = EntityMapper::new(EntityType::of::<BlogPost>(), &config);
        assert_eq!(m.get_soft_delete_column(), "removed_on");
    }

    #[test]
    fn test_relations_and_events() {
        let mut m = mapper();
        m.relation("author").belongs_to::<BlogPost>();
        m.relation("comments").has_many::<BlogPost>();
        m.on(events::SAVE, |_| Ok(())).on(events::SAVE, |_| Ok(()));

        assert_eq!(m.get_relations().len(), 2);
        assert_eq!(
            m.get_relation("author").map(Relation::kind),
            Some(RelationKind::BelongsTo)
        );
        assert_eq!(m.get_event_handlers(events::SAVE).len(), 2);
        assert!(m.get_event_handlers(events::DELETE).is_empty());
    }
}
