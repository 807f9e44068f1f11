//! Entity queries: soft-delete scoping, bulk writes, aggregates, registry.

mod common;

use common::{MockConnection, Post, User, columns, is_state, manager, row};
use relmap::prelude::*;
use relmap::StateErrorKind;

#[test]
fn test_soft_delete_scoping() {
    let conn = MockConnection::new();
    let manager = manager(&conn);

    manager.query::<User>().all(&[]).unwrap();
    manager.query::<User>().with_deleted(true).all(&[]).unwrap();
    manager.query::<User>().only_deleted().all(&[]).unwrap();
    manager.query::<Post>().all(&[]).unwrap();

    assert_eq!(
        conn.sql(),
        [
            "SELECT * FROM \"users\" WHERE \"users\".\"deleted_at\" IS NULL",
            "SELECT * FROM \"users\"",
            "SELECT * FROM \"users\" WHERE \"users\".\"deleted_at\" IS NOT NULL",
            "SELECT * FROM \"posts\"",
        ]
    );
}

#[test]
fn test_bulk_update_stamps_updated_at() {
    let conn = MockConnection::new();
    conn.set_affected(3);
    let manager = manager(&conn);

    let mut query = manager.query::<User>();
    query.where_eq("name", "bob");
    let affected = query.update(columns([("age", Value::Int(30))])).unwrap();
    assert_eq!(affected, 3);

    let statement = &conn.statements()[0];
    assert_eq!(
        statement.sql,
        "UPDATE \"users\" SET \"age\" = ?1, \"updated_at\" = ?2 WHERE \"name\" = ?3"
    );
    assert_eq!(statement.params[0], Value::Int(30));
    assert!(matches!(statement.params[1], Value::Timestamp(_)));
    assert_eq!(conn.transactions(), ["begin", "commit"]);
}

#[test]
fn test_increment_and_decrement() {
    let conn = MockConnection::new();
    let manager = manager(&conn);

    let mut query = manager.query::<Post>();
    query.where_eq("id", 1);
    query.increment("views", 2).unwrap();
    query.decrement("views", 1).unwrap();

    assert_eq!(
        conn.sql(),
        [
            "UPDATE \"posts\" SET \"views\" = \"views\" + ?1 WHERE \"id\" = ?2",
            "UPDATE \"posts\" SET \"views\" = \"views\" - ?1 WHERE \"id\" = ?2",
        ]
    );
}

#[test]
fn test_bulk_delete_honors_soft_delete() {
    let conn = MockConnection::new();
    let manager = manager(&conn);

    let mut query = manager.query::<User>();
    query.where_eq("name", "bob");
    query.delete(false, &[]).unwrap();
    query.delete(true, &[]).unwrap();

    let sql = conn.sql();
    assert_eq!(
        sql[0],
        "UPDATE \"users\" SET \"deleted_at\" = ?1 WHERE \"name\" = ?2"
    );
    assert_eq!(sql[1], "DELETE FROM \"users\" WHERE \"name\" = ?1");
}

#[test]
fn test_aggregates() {
    let conn = MockConnection::new();
    conn.respond("COUNT(", [row([("n", Value::Int(7))])]);
    conn.respond("SUM(", [row([("n", Value::Float(12.5))])]);
    let manager = manager(&conn);

    let query = manager.query::<User>();
    assert_eq!(query.count("id", false).unwrap(), 7);
    assert_eq!(query.count("age", true).unwrap(), 7);
    assert_eq!(query.sum("age", false).unwrap(), Value::Float(12.5));
    assert_eq!(query.max("age", false).unwrap(), Value::Null);

    assert_eq!(
        conn.sql(),
        [
            "SELECT COUNT(\"id\") FROM \"users\" WHERE \"users\".\"deleted_at\" IS NULL",
            "SELECT COUNT(DISTINCT \"age\") FROM \"users\" WHERE \"users\".\"deleted_at\" IS NULL",
            "SELECT SUM(\"age\") FROM \"users\" WHERE \"users\".\"deleted_at\" IS NULL",
            "SELECT MAX(\"age\") FROM \"users\" WHERE \"users\".\"deleted_at\" IS NULL",
        ]
    );
}

#[test]
fn test_column_reads_first_value() {
    let conn = MockConnection::new();
    conn.respond("SELECT \"name\"", [row([("name", Value::from("alice"))])]);
    let manager = manager(&conn);

    let name = manager.query::<Post>().column("name").unwrap();
    assert_eq!(name, Value::from("alice"));
    assert_eq!(conn.sql(), ["SELECT \"name\" FROM \"posts\""]);
}

#[test]
fn test_joined_results_are_read_only() {
    let conn = MockConnection::new();
    conn.respond("FROM \"users\"", [row([("id", Value::Int(1))])]);
    let manager = manager(&conn);

    let mut query = manager.query::<User>();
    query.join(Join::inner(
        "posts",
        Expr::qualified("posts", "user_id").eq(Expr::qualified("users", "id")),
    ));
    assert!(query.is_read_only());

    let user = query.get(&[]).unwrap().unwrap();
    let data = user.data_mapper();
    assert!(data.is_read_only());
    assert_eq!(data.get_column("id").unwrap(), Value::Int(1));
    let err = data.set_column("name", "x").unwrap_err();
    assert!(is_state(&err, StateErrorKind::ReadOnly));

    assert!(!manager.query::<User>().is_read_only());
}

#[test]
fn test_first_record_only() {
    let conn = MockConnection::new();
    conn.respond(
        "FROM \"posts\"",
        [row([("id", Value::Int(1))]), row([("id", Value::Int(2))])],
    );
    let manager = manager(&conn);

    let post = manager.query::<Post>().get_as::<Post>(&[]).unwrap().unwrap();
    assert_eq!(post.column("id").unwrap(), Value::Int(1));
    assert!(manager.query::<User>().get(&[]).unwrap().is_none());
}

#[test]
fn test_registry_lookups() {
    let conn = MockConnection::new();
    let manager = manager(&conn);

    assert!(manager.entity_mapper_named("post").is_err());
    let mapper = manager.register::<Post>();
    assert_eq!(mapper.get_table(), "posts");
    assert_eq!(manager.entity_mapper_named("Post").unwrap().get_table(), "posts");

    manager.query_named("post").unwrap().all(&[]).unwrap();
    assert_eq!(conn.sql(), ["SELECT * FROM \"posts\""]);

    let err = manager.query_named("comment").unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_mappers_are_cached_per_manager() {
    let conn = MockConnection::new();
    let first = manager(&conn);
    let second = manager(&conn);

    let a = first.entity_mapper::<User>();
    let b = first.entity_mapper::<User>();
    let c = second.entity_mapper::<User>();
    assert!(std::rc::Rc::ptr_eq(&a, &b));
    assert!(!std::rc::Rc::ptr_eq(&a, &c));
}

#[test]
fn test_bulk_writes_keep_joins() {
    let conn = MockConnection::new();
    let manager = manager(&conn);

    let mut query = manager.query::<User>();
    query.join(Join::inner(
        "roles_users",
        Expr::qualified("roles_users", "user_id").eq(Expr::qualified("users", "id")),
    ));
    query.where_eq("roles_users.role_id", 3);
    query.update(columns([("age", Value::Int(40))])).unwrap();
    query.delete(false, &[]).unwrap();

    let join = "INNER JOIN \"roles_users\" ON \"roles_users\".\"user_id\" = \"users\".\"id\"";
    let statements = conn.statements();
    assert_eq!(
        statements[0].sql,
        format!(
            "UPDATE \"users\" {join} SET \"age\" = ?1, \"updated_at\" = ?2 WHERE \"roles_users\".\"role_id\" = ?3"
        )
    );
    assert_eq!(statements[0].params[2], Value::Int(3));
    assert_eq!(
        statements[1].sql,
        format!(
            "UPDATE \"users\" {join} SET \"deleted_at\" = ?1 WHERE \"roles_users\".\"role_id\" = ?2"
        )
    );
}

#[test]
fn test_bulk_update_overrides_supplied_stamp() {
    let conn = MockConnection::new();
    let manager = manager(&conn);

    let query = manager.query::<User>();
    query
        .update(columns([("updated_at", Value::from("1999-01-01")), ("age", Value::Int(1))]))
        .unwrap();

    let statement = &conn.statements()[0];
    assert_eq!(
        statement.sql,
        "UPDATE \"users\" SET \"age\" = ?1, \"updated_at\" = ?2"
    );
    assert!(matches!(statement.params[1], Value::Timestamp(_)));
}

#[test]
fn test_empty_key_list_matches_nothing() {
    let conn = MockConnection::new();
    let manager = manager(&conn);

    let mut query = manager.query::<User>();
    query.where_in("id", Vec::<i64>::new());
    assert!(query.all(&[]).unwrap().is_empty());

    assert_eq!(
        conn.sql(),
        ["SELECT * FROM \"users\" WHERE 1 = 0 AND \"users\".\"deleted_at\" IS NULL"]
    );
    assert!(conn.statements()[0].params.is_empty());
}

#[test]
fn test_nested_transaction_rolls_back_once() {
    let conn = MockConnection::new();
    conn.fail_on("INSERT INTO \"users\"");
    let manager = manager(&conn);
    let user = manager
        .create::<User>(columns([("name", Value::from("eve"))]))
        .unwrap();

    let err = manager
        .transaction(|| {
            let mut query = manager.query::<User>();
            query.where_eq("name", "bob");
            query.increment("age", 1)?;
            manager.repository::<User>().save(&user)
        })
        .unwrap_err();

    assert!(matches!(err, Error::Query(_)));
    assert_eq!(conn.transactions(), ["begin", "rollback"]);
    assert_eq!(conn.matching("UPDATE").len(), 1);
    assert!(user.record().data_mapper().is_new());

    conn.clear();
    let affected = manager
        .transaction(|| manager.transaction(|| manager.query::<User>().increment("age", 1)))
        .unwrap();
    assert_eq!(affected, 1);
    assert_eq!(conn.transactions(), ["begin", "commit"]);
}
