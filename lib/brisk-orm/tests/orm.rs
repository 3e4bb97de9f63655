//! Lifecycle, hooks and transactions.
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use brisk_orm::{HookPosition, Orm, OrmError};
use common::{Event, MockDriver, User, connected, options};
use parking_lot::Mutex;

#[tokio::test]
async fn operations_before_connect_fail() {
    let driver = MockDriver::new();
    let orm = Orm::new(driver.connector());
    let users = orm.dao::<User>().unwrap();

    assert!(!orm.is_connected());
    assert!(matches!(
        orm.execute("select 1", None).await,
        Err(OrmError::NotConnected)
    ));
    assert!(matches!(users.count(None).await, Err(OrmError::NotConnected)));
    assert!(matches!(
        orm.start_transaction().await,
        Err(OrmError::NotConnected)
    ));
    assert!(driver.events().is_empty());
}

#[tokio::test]
async fn destroyed_pools_reject_everything() {
    let driver = MockDriver::new();
    let orm = connected(&driver).await;
    let users = orm.dao::<User>().unwrap();

    orm.destroy().await.unwrap();

    assert_eq!(driver.events(), vec![Event::Close]);
    assert!(!orm.is_connected());
    assert!(matches!(users.list(None).await, Err(OrmError::PoolClosed)));
    assert!(matches!(
        orm.transaction("after", None, |_| async { Ok(()) }).await,
        Err(OrmError::PoolClosed)
    ));
    assert!(matches!(
        orm.connect(options()).await,
        Err(OrmError::PoolClosed)
    ));
}

#[tokio::test]
async fn connecting_twice_is_an_error() {
    let driver = MockDriver::new();
    let orm = connected(&driver).await;
    assert!(matches!(
        orm.connect(options()).await,
        Err(OrmError::Connection(_))
    ));
    assert!(orm.is_connected());
}

#[tokio::test]
async fn hooks_run_by_priority_around_the_pool() {
    let driver = MockDriver::new();
    let orm = Orm::new(driver.connector());
    let log: Arc<Mutex<Vec<String>>> = Arc::default();

    for (position, priority, label) in [
        (HookPosition::AfterConn, 1, "after 1"),
        (HookPosition::BeforeConn, 5, "before 5"),
        (HookPosition::AfterConn, -3, "after -3"),
        (HookPosition::BeforeConn, -1, "before -1"),
        (HookPosition::BeforeConn, 5, "before 5 again"),
    ] {
        let log = log.clone();
        orm.add_hook(position, priority, move |orm: Orm| {
            let log = log.clone();
            async move {
                log.lock()
                    .push(format!("{} connected={}", label, orm.is_connected()));
                Ok(())
            }
        });
    }

    orm.connect(options()).await.unwrap();

    assert_eq!(
        *log.lock(),
        vec![
            "before -1 connected=false",
            "before 5 connected=false",
            "before 5 again connected=false",
            "after -3 connected=true",
            "after 1 connected=true",
        ]
    );
}

#[tokio::test]
async fn failing_before_hooks_abort_the_connect() {
    let driver = MockDriver::new();
    let orm = Orm::new(driver.connector());
    orm.add_hook(HookPosition::BeforeConn, 0, |_| async {
        Err(OrmError::Validation("not today".to_string()))
    });

    assert!(matches!(
        orm.connect(options()).await,
        Err(OrmError::Validation(_))
    ));
    assert!(!orm.is_connected());
}

#[tokio::test]
async fn transactions_commit_on_success() {
    let driver = MockDriver::new();
    let orm = connected(&driver).await;

    let affected = orm
        .transaction("insert", None, |tx| async move {
            let output = tx.query("insert into user (id) values (1)").await?;
            Ok(output.affected_rows)
        })
        .await
        .unwrap();

    assert_eq!(affected, 1);
    assert_eq!(
        driver.events(),
        vec![
            Event::Begin,
            Event::TxQuery("insert into user (id) values (1)".to_string()),
            Event::Commit,
            Event::Release,
        ]
    );
}

#[tokio::test]
async fn transactions_roll_back_on_error() {
    let driver = MockDriver::new();
    let orm = connected(&driver).await;

    let result: Result<(), OrmError> = orm
        .transaction("insert", None, |tx| async move {
            tx.query("insert into user (id) values (1)").await?;
            Err(OrmError::Validation("boom".to_string()))
        })
        .await;

    assert!(matches!(result, Err(OrmError::Validation(m)) if m == "boom"));
    assert_eq!(
        driver.events(),
        vec![
            Event::Begin,
            Event::TxQuery("insert into user (id) values (1)".to_string()),
            Event::Rollback,
            Event::Release,
        ]
    );
}

#[tokio::test]
async fn nested_transactions_join_the_parent() {
    let driver = MockDriver::new();
    let orm = connected(&driver).await;

    let inner_orm = orm.clone();
    orm.transaction("outer", None, |tx| async move {
        inner_orm
            .transaction("inner", Some(&tx), |inner| async move {
                inner.query("update user set age = 1").await.map(|_| ())
            })
            .await
    })
    .await
    .unwrap();

    assert_eq!(
        driver.events(),
        vec![
            Event::Begin,
            Event::TxQuery("update user set age = 1".to_string()),
            Event::Commit,
            Event::Release,
        ]
    );
}

#[tokio::test]
async fn ended_contexts_are_closed() {
    let driver = MockDriver::new();
    let orm = connected(&driver).await;

    let tx = orm.start_transaction().await.unwrap();
    tx.end().await.unwrap();

    assert!(tx.is_ended().await);
    assert!(matches!(
        tx.query("select 1").await,
        Err(OrmError::ContextClosed)
    ));
    assert!(matches!(tx.end().await, Err(OrmError::ContextClosed)));
}
