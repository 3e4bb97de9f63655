//! Relation hydration through registered selects.
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use brisk_orm::{OrmError, Param, Selection, Value, find_by_id};
use common::{MockDriver, Post, User, connected, post_row, user_row};
use serde_json::json;

#[tokio::test]
async fn relations_resolve_two_levels_deep() {
    let driver = MockDriver::new();
    driver.rows("select * from user where id = 1", json!([user_row(1, "bob")]));
    driver.rows(
        "select * from post where author_id = 1",
        json!([post_row(10, "hello", 1), post_row(11, "again", 1)]),
    );
    let orm = connected(&driver).await;
    let users = orm.dao::<User>().unwrap();
    orm.dao::<Post>().unwrap();

    let bob = users.find_by_primary_key(1, None).await.unwrap().unwrap();

    let posts = bob.posts.unwrap();
    assert_eq!(posts.len(), 2);
    let author = posts[0].author.as_ref().unwrap();
    assert_eq!(author.user_name, "bob");
    // the third level is not resolved
    assert_eq!(author.posts, None);

    assert_eq!(
        driver.statements(),
        vec![
            "select * from user where id = 1 limit 0, 1",
            "select * from post where author_id = 1 and _is_delete = 0",
            "select * from user where id = 1",
            "select * from user where id = 1",
        ]
    );
}

#[tokio::test]
async fn depth_zero_skips_relations() {
    let driver = MockDriver::new();
    driver.rows("select * from user where id = 1", json!([user_row(1, "bob")]));
    let orm = connected(&driver).await;
    orm.dao::<User>().unwrap();

    let select = orm.select_fn(&find_by_id("User")).unwrap();
    let found = select
        .call_with_depth(
            vec![Param::Raw("id".to_string()), Param::Literal(Value::Int(1))],
            None,
            0,
        )
        .await
        .unwrap();

    assert_eq!(
        found,
        Selection::One(Some(json!({"id": 1, "userName": "bob"})))
    );
    assert_eq!(driver.statements(), vec!["select * from user where id = 1"]);
}

#[tokio::test]
async fn unregistered_relation_targets_fail() {
    let driver = MockDriver::new();
    driver.rows("select * from user where id = 1", json!([user_row(1, "bob")]));
    let orm = connected(&driver).await;
    let users = orm.dao::<User>().unwrap();

    let err = users.find_by_primary_key(1, None).await.unwrap_err();
    assert!(matches!(err, OrmError::NotRegistered(_)));
}

#[tokio::test]
async fn null_keys_leave_relations_unset() {
    let driver = MockDriver::new();
    driver.rows(
        "select * from user",
        json!([{"id": null, "user_name": "ghost", "age": 40}]),
    );
    let orm = connected(&driver).await;
    let users = orm.dao::<User>().unwrap();
    orm.dao::<Post>().unwrap();

    let all = users.list(None).await.unwrap();

    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, None);
    assert_eq!(all[0].age, Some(40));
    assert_eq!(all[0].posts, None);
    assert_eq!(driver.statements(), vec!["select * from user"]);
}
