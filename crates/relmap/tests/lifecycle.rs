//! Entity state: dirty tracking, hydration, casts and the deleted lockout.

mod common;

use common::{MockConnection, Post, Role, User, columns, is_state, manager, row, take_events};
use relmap::prelude::*;
use relmap::{DataMapper, LoaderMap, StateErrorKind};
use std::cell::Cell;

thread_local! {
    static TITLE_READS: Cell<usize> = const { Cell::new(0) };
}

struct BlogPost(Record);

impl Entity for BlogPost {
    fn map_entity(mapper: &mut EntityMapper) {
        mapper.getter("title", |value, _| {
            TITLE_READS.with(|reads| reads.set(reads.get() + 1));
            match value {
                Value::Text(text) => Value::Text(text.to_uppercase()),
                other => other,
            }
        });
    }

    fn from_record(record: Record) -> Self {
        BlogPost(record)
    }

    fn record(&self) -> &Record {
        &self.0
    }
}

#[test]
fn test_default_table_is_pluralized_snake_case() {
    let conn = MockConnection::new();
    let manager = manager(&conn);
    let mapper = manager.entity_mapper::<BlogPost>();
    assert_eq!(mapper.get_name(), "blog_post");
    assert_eq!(mapper.get_table(), "blog_posts");
    assert_eq!(mapper.get_sequence(), "blog_posts_id_seq");
    assert_eq!(mapper.get_primary_key().columns(), ["id"]);
}

#[test]
fn test_foreign_key_reads_in_three_directions() {
    let key = ForeignKey::new([("user_id", "id")]);
    let row = columns([("user_id", Value::Int(5)), ("id", Value::Int(10))]);
    assert_eq!(key.value(&row, false), KeyValue::Scalar(Value::Int(5)));
    assert_eq!(key.inverse_value(&row, false), KeyValue::Scalar(Value::Int(10)));
    assert_eq!(key.extract_value(&row, false), KeyValue::Scalar(Value::Int(10)));
}

#[test]
fn test_new_mapper_marks_every_filled_column_dirty() {
    let conn = MockConnection::new();
    let manager = manager(&conn);
    let data = DataMapper::new(
        manager.clone(),
        manager.entity_mapper::<Post>(),
        columns([("foo", Value::from("bar")), ("id", Value::Int(1))]),
        LoaderMap::new(),
        false,
        true,
    )
    .unwrap();

    assert_eq!(data.get_modified_columns().len(), 2);
    assert_eq!(data.get_raw_columns().len(), 2);
    assert!(data.was_modified());
}

#[test]
fn test_persisted_mapper_starts_clean() {
    let conn = MockConnection::new();
    let manager = manager(&conn);
    let data = DataMapper::new(
        manager.clone(),
        manager.entity_mapper::<Post>(),
        columns([("id", Value::Int(1)), ("title", Value::from("hello"))]),
        LoaderMap::new(),
        false,
        false,
    )
    .unwrap();
    assert!(!data.was_modified());

    data.set_column("title", "changed").unwrap();
    assert!(data.was_modified());
    assert_eq!(data.get_modified_columns(), ["title"]);

    data.mark_as_updated(None).unwrap();
    assert!(!data.was_modified());
}

#[test]
fn test_mark_as_saved_then_one_hydration() {
    let conn = MockConnection::new();
    conn.respond(
        "SELECT * FROM \"posts\" WHERE \"id\" = ?1",
        [row([("id", Value::Int(10)), ("foo", Value::from("fresh"))])],
    );
    let manager = manager(&conn);
    let data = DataMapper::new(
        manager.clone(),
        manager.entity_mapper::<Post>(),
        columns([("foo", Value::from("bar"))]),
        LoaderMap::new(),
        false,
        true,
    )
    .unwrap();

    data.mark_as_saved(KeyValue::from(10)).unwrap();
    assert_eq!(data.get_raw_columns()["id"], Value::Int(10));
    assert!(!data.is_new());
    assert!(data.get_modified_columns().is_empty());
    assert!(data.is_stale());
    assert!(conn.statements().is_empty());

    assert_eq!(data.get_column("foo").unwrap(), Value::from("fresh"));
    assert_eq!(data.get_column("foo").unwrap(), Value::from("fresh"));
    let selects = conn.matching("SELECT");
    assert_eq!(selects.len(), 1);
    assert_eq!(selects[0].params, [Value::Int(10)]);
    assert!(!data.is_stale());
}

#[test]
fn test_hydration_of_vanished_row_marks_deleted() {
    let conn = MockConnection::new();
    let manager = manager(&conn);
    let data = DataMapper::new(
        manager.clone(),
        manager.entity_mapper::<Post>(),
        columns([("id", Value::Int(4))]),
        LoaderMap::new(),
        false,
        false,
    )
    .unwrap();

    data.refresh();
    let err = data.get_column("id").unwrap_err();
    assert!(is_state(&err, StateErrorKind::Deleted));
    assert!(data.is_deleted());
}

#[test]
fn test_getter_result_is_memoized() {
    TITLE_READS.with(|reads| reads.set(0));
    let conn = MockConnection::new();
    let manager = manager(&conn);
    let post = manager
        .create::<BlogPost>(columns([("title", Value::from("draft"))]))
        .unwrap();

    assert_eq!(post.column("title").unwrap(), Value::from("DRAFT"));
    assert_eq!(post.column("title").unwrap(), Value::from("DRAFT"));
    assert_eq!(TITLE_READS.with(Cell::get), 1);

    post.set("title", "final").unwrap();
    assert_eq!(post.column("title").unwrap(), Value::from("FINAL"));
    assert_eq!(TITLE_READS.with(Cell::get), 2);
}

#[test]
fn test_setter_runs_before_cast() {
    let conn = MockConnection::new();
    let manager = manager(&conn);
    let user = manager
        .create::<User>(columns([
            ("email", Value::from("  Alice@Example.COM ")),
            ("age", Value::from("42")),
        ]))
        .unwrap();

    let raw = user.record().data_mapper().get_raw_columns();
    assert_eq!(raw["email"], Value::from("alice@example.com"));
    assert_eq!(raw["age"], Value::Int(42));
}

#[test]
fn test_guarded_columns_are_skipped_by_fill() {
    let conn = MockConnection::new();
    let manager = manager(&conn);
    let user = manager
        .create::<User>(columns([("id", Value::Int(99)), ("name", Value::from("eve"))]))
        .unwrap();

    assert!(!user.has("id"));
    assert!(user.has("name"));
    assert!(user.has("posts"));
}

#[test]
fn test_json_assoc_round_trip_through_entity() {
    let conn = MockConnection::new();
    let manager = manager(&conn);
    let user = manager.create::<User>(ColumnMap::new()).unwrap();

    user.set("settings", r#"{"foo":"bar"}"#).unwrap();
    assert_eq!(
        user.record().data_mapper().get_raw_columns()["settings"],
        Value::Json(serde_json::json!({"foo": "bar"}))
    );
    assert_eq!(user.column("settings").unwrap(), Value::from(r#"{"foo":"bar"}"#));
}

#[test]
fn test_deleted_mapper_rejects_every_access() {
    let conn = MockConnection::new();
    let manager = manager(&conn);
    let data = DataMapper::new(
        manager.clone(),
        manager.entity_mapper::<Post>(),
        columns([("id", Value::Int(1)), ("user_id", Value::Int(2))]),
        LoaderMap::new(),
        false,
        false,
    )
    .unwrap();
    data.mark_as_deleted();

    let errors = [
        data.get_column("id").unwrap_err(),
        data.set_column("id", 3).unwrap_err(),
        data.get_related("author").unwrap_err(),
        data.set_related("author", None).unwrap_err(),
    ];
    for err in &errors {
        assert!(is_state(err, StateErrorKind::Deleted), "{err}");
    }
    assert!(conn.statements().is_empty());
}

#[test]
fn test_unknown_column_and_relation_are_not_found() {
    let conn = MockConnection::new();
    let manager = manager(&conn);
    let post = manager.create::<Post>(ColumnMap::new()).unwrap();

    assert!(post.get("missing").unwrap_err().is_not_found());
    assert!(
        post.record()
            .data_mapper()
            .get_related("missing")
            .unwrap_err()
            .is_not_found()
    );
}

#[test]
fn test_unset_clears_column_and_relation() {
    let conn = MockConnection::new();
    let manager = manager(&conn);
    let post = manager
        .create::<Post>(columns([("title", Value::from("x")), ("user_id", Value::Null)]))
        .unwrap();

    assert!(post.related_one::<User>("author").unwrap().is_none());
    assert_eq!(post.record().data_mapper().loaded_relations().len(), 1);

    post.unset("title");
    post.unset("author");
    assert!(!post.has("title"));
    assert!(post.record().data_mapper().loaded_relations().is_empty());
}

#[test]
fn test_display_and_json() {
    let conn = MockConnection::new();
    let manager = manager(&conn);
    let post = manager
        .create::<Post>(columns([("id", Value::Int(3)), ("title", Value::from("hi"))]))
        .unwrap();

    assert_eq!(post.record().to_string(), "[Post(id=3, title=hi)]");
    assert_eq!(
        post.to_json().unwrap(),
        serde_json::json!({"id": 3, "title": "hi"})
    );
    assert_eq!(
        serde_json::to_value(post.record()).unwrap(),
        serde_json::json!({"id": 3, "title": "hi"})
    );
}

#[test]
fn test_link_on_unsaved_owner_runs_once_after_save() {
    take_events();
    let conn = MockConnection::new();
    conn.respond(
        "FROM \"roles\"",
        [row([("id", Value::Int(3)), ("name", Value::from("admin"))])],
    );
    conn.set_last_insert_id(7);
    let manager = manager(&conn);

    let role = manager
        .query::<Role>()
        .get_as::<Role>(&[])
        .unwrap()
        .unwrap();
    let user = manager
        .create::<User>(columns([("name", Value::from("alice"))]))
        .unwrap();

    user.link("roles", &role).unwrap();
    assert_eq!(user.record().data_mapper().pending_link_count(), 1);
    assert!(conn.matching("INSERT").is_empty());

    assert!(manager.repository::<User>().save(&user).unwrap());

    let data = user.record().data_mapper();
    assert_eq!(data.pending_link_count(), 0);
    assert!(!data.is_new());
    assert_eq!(data.get_raw_columns()["id"], Value::Int(7));

    let inserts = conn.matching("INSERT INTO \"users\"");
    assert_eq!(inserts.len(), 1);
    assert_eq!(
        inserts[0].sql,
        "INSERT INTO \"users\" (\"created_at\", \"name\", \"updated_at\") VALUES (?1, ?2, ?3)"
    );
    assert!(matches!(inserts[0].params[0], Value::Timestamp(_)));
    assert_eq!(inserts[0].params[2], Value::Null);

    let links = conn.matching("INSERT INTO \"roles_users\"");
    assert_eq!(links.len(), 1);
    assert_eq!(
        links[0].sql,
        "INSERT INTO \"roles_users\" (\"role_id\", \"user_id\") VALUES (?1, ?2)"
    );
    assert_eq!(links[0].params, [Value::Int(3), Value::Int(7)]);

    assert_eq!(conn.transactions(), ["begin", "commit"]);
    assert_eq!(take_events(), ["user:save"]);
}
