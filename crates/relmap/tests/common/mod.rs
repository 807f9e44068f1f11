//! Shared fixtures: a recording connection and a small blog schema.

#![allow(dead_code)]

use relmap::prelude::*;
use relmap::{DataMapper, Row, StateErrorKind};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// One executed statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Executed {
    pub sql: String,
    pub params: Vec<Value>,
}

struct Response {
    fragment: String,
    params: Option<Vec<Value>>,
    rows: Vec<Row>,
}

/// A `Connection` that records every statement and answers queries from
/// canned responses.
///
/// A response is registered for a SQL fragment, optionally narrowed to exact
/// parameters; a query receives the rows of the first matching response, or
/// no rows at all.
#[derive(Default)]
pub struct MockConnection {
    statements: RefCell<Vec<Executed>>,
    responses: RefCell<Vec<Response>>,
    affected: Cell<u64>,
    last_insert_id: Cell<i64>,
    transactions: RefCell<Vec<&'static str>>,
    fail_on: RefCell<Option<String>>,
}

impl MockConnection {
    pub fn new() -> Rc<Self> {
        let connection = Self::default();
        connection.affected.set(1);
        connection.last_insert_id.set(1);
        Rc::new(connection)
    }

    pub fn respond<I>(&self, fragment: &str, rows: I)
    where
        I: IntoIterator<Item = Row>,
    {
        self.responses.borrow_mut().push(Response {
            fragment: fragment.to_string(),
            params: None,
            rows: rows.into_iter().collect(),
        });
    }

    /// Like `respond`, but only for queries bound to exactly `params`.
    pub fn respond_for<I>(&self, fragment: &str, params: Vec<Value>, rows: I)
    where
        I: IntoIterator<Item = Row>,
    {
        self.responses.borrow_mut().push(Response {
            fragment: fragment.to_string(),
            params: Some(params),
            rows: rows.into_iter().collect(),
        });
    }

    pub fn set_affected(&self, rows: u64) {
        self.affected.set(rows);
    }

    pub fn set_last_insert_id(&self, id: i64) {
        self.last_insert_id.set(id);
    }

    /// Make every statement containing `fragment` fail.
    pub fn fail_on(&self, fragment: &str) {
        *self.fail_on.borrow_mut() = Some(fragment.to_string());
    }

    pub fn statements(&self) -> Vec<Executed> {
        self.statements.borrow().clone()
    }

    pub fn sql(&self) -> Vec<String> {
        self.statements.borrow().iter().map(|s| s.sql.clone()).collect()
    }

    /// Statements whose SQL starts with `prefix`.
    pub fn matching(&self, prefix: &str) -> Vec<Executed> {
        self.statements
            .borrow()
            .iter()
            .filter(|s| s.sql.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn transactions(&self) -> Vec<&'static str> {
        self.transactions.borrow().clone()
    }

    pub fn clear(&self) {
        self.statements.borrow_mut().clear();
        self.transactions.borrow_mut().clear();
    }

    fn record(&self, sql: &str, params: &[Value]) -> Result<()> {
        self.statements.borrow_mut().push(Executed {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        match self.fail_on.borrow().as_deref() {
            Some(fragment) if sql.contains(fragment) => Err(Error::query(sql, "mock failure")),
            _ => Ok(()),
        }
    }
}

impl Connection for MockConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.record(sql, params)?;
        Ok(self
            .responses
            .borrow()
            .iter()
            .find(|response| {
                sql.contains(response.fragment.as_str())
                    && response.params.as_deref().is_none_or(|p| p == params)
            })
            .map(|response| response.rows.clone())
            .unwrap_or_default())
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.record(sql, params)?;
        Ok(self.affected.get())
    }

    fn last_insert_id(&self, _sequence: Option<&str>) -> Result<Value> {
        Ok(Value::Int(self.last_insert_id.get()))
    }

    fn begin(&self) -> Result<()> {
        self.transactions.borrow_mut().push("begin");
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.transactions.borrow_mut().push("commit");
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        self.transactions.borrow_mut().push("rollback");
        Ok(())
    }
}

pub fn manager(connection: &Rc<MockConnection>) -> EntityManager {
    EntityManager::new(Rc::clone(connection) as Rc<dyn Connection>)
}

pub fn row<const N: usize>(pairs: [(&str, Value); N]) -> Row {
    Row::from_pairs(pairs)
}

pub fn columns<const N: usize>(pairs: [(&str, Value); N]) -> ColumnMap {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

pub fn is_state(error: &Error, kind: StateErrorKind) -> bool {
    error.state_kind() == Some(kind)
}

thread_local! {
    /// Lifecycle events seen by the fixtures, as `entity:event`.
    pub static EVENTS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

pub fn take_events() -> Vec<String> {
    EVENTS.with(|events| std::mem::take(&mut *events.borrow_mut()))
}

fn track(event: &'static str) -> impl Fn(&DataMapper) -> Result<()> {
    move |data| {
        let entity = data.entity_mapper().get_name().to_string();
        EVENTS.with(|events| events.borrow_mut().push(format!("{entity}:{event}")));
        Ok(())
    }
}

// ==================== Fixtures ====================

/// Soft-deleting, timestamped user with every relation kind.
#[derive(Debug)]
pub struct User(Record);

impl Entity for User {
    fn map_entity(mapper: &mut EntityMapper) {
        mapper
            .casts([
                ("id", "int"),
                ("age", "?int"),
                ("settings", "?json-assoc"),
                ("created_at", "date"),
                ("updated_at", "?date"),
                ("deleted_at", "?date"),
            ])
            .guarded(["id"])
            .use_soft_delete(true, None)
            .use_timestamp(true, None)
            .setter("email", |value, _| match value {
                Value::Text(text) => Value::Text(text.trim().to_lowercase()),
                other => other,
            })
            .filter("adults", |query, _| {
                query.where_(Expr::col("age").ge(18));
            })
            .filter("named", |query, name| {
                if let Some(name) = name {
                    query.where_eq("name", name.clone());
                }
            })
            .on(events::SAVE, track(events::SAVE))
            .on(events::UPDATE, track(events::UPDATE))
            .on(events::DELETE, track(events::DELETE));
        mapper.relation("posts").has_many::<Post>();
        mapper.relation("profile").has_one::<Profile>();
        mapper.relation("roles").share_many::<Role>();
    }

    fn from_record(record: Record) -> Self {
        User(record)
    }

    fn record(&self) -> &Record {
        &self.0
    }
}

pub struct Post(Record);

impl Entity for Post {
    fn map_entity(mapper: &mut EntityMapper) {
        mapper.casts([("id", "int"), ("user_id", "?int")]);
        mapper.relation("author").belongs_to::<User>();
    }

    fn from_record(record: Record) -> Self {
        Post(record)
    }

    fn record(&self) -> &Record {
        &self.0
    }
}

pub struct Role(Record);

impl Entity for Role {
    fn map_entity(mapper: &mut EntityMapper) {
        mapper.relation("users").share_many::<User>();
    }

    fn from_record(record: Record) -> Self {
        Role(record)
    }

    fn record(&self) -> &Record {
        &self.0
    }
}

/// Hard-deleting entity with a defaulting getter.
pub struct Profile(Record);

impl Entity for Profile {
    fn map_entity(mapper: &mut EntityMapper) {
        mapper
            .getter("bio", |value, _| match value {
                Value::Null => Value::from(""),
                other => other,
            })
            .on(events::DELETE, track(events::DELETE));
        mapper.relation("user").belongs_to::<User>();
    }

    fn from_record(record: Record) -> Self {
        Profile(record)
    }

    fn record(&self) -> &Record {
        &self.0
    }
}
