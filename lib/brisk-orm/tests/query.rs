//! Conditions compiled against generated entity mappings.
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use brisk_orm::{Order, Query};
use common::{MockDriver, Post, User, connected};
use serde_json::json;

#[tokio::test]
async fn property_names_become_columns() {
    let driver = MockDriver::new();
    let orm = connected(&driver).await;
    let users = orm.dao::<User>().unwrap();

    let q = Query::new()
        .like_right("userName", "bo")
        .or()
        .ge("age", 18)
        .order_by(Order::Asc, ["userName"]);

    assert_eq!(
        q.to_sql_string(users.mapping(), false),
        " where user_name like binary 'bo%' or age >= 18 order by user_name ASC"
    );
}

#[tokio::test]
async fn relations_are_not_columns() {
    let driver = MockDriver::new();
    let orm = connected(&driver).await;
    let posts = orm.dao::<Post>().unwrap();

    // unmapped names pass through unchanged
    let q = Query::new().is_not_null("authorId").eq("author", 1);
    assert_eq!(
        q.to_sql_string(posts.mapping(), true),
        " where _is_delete = 0 and (author_id is not null and author = 1)"
    );
}

#[tokio::test]
async fn partial_entities_drive_some_and_every_eq() {
    let driver = MockDriver::new();
    let orm = connected(&driver).await;
    let users = orm.dao::<User>().unwrap();

    let partial = json!({"userName": "bob", "age": null, "id": 3});
    let every = Query::new().every_eq(&partial).unwrap();
    let some = Query::new().eq("age", 40).or().some_eq(&partial).unwrap();

    assert_eq!(
        every.to_where_sql_string(users.mapping()),
        "(user_name = 'bob' and id = 3)"
    );
    assert_eq!(
        some.to_where_sql_string(users.mapping()),
        "age = 40 or (user_name = 'bob' or id = 3)"
    );
}

#[tokio::test]
async fn dangling_connectors_are_dropped() {
    let driver = MockDriver::new();
    let orm = connected(&driver).await;
    let users = orm.dao::<User>().unwrap();

    users
        .list_query(&Query::new().eq("id", 1).or(), None)
        .await
        .unwrap();
    users.list_query(&Query::new().or(), None).await.unwrap();

    assert_eq!(
        driver.statements(),
        vec!["select * from user where id = 1", "select * from user"]
    );
}
