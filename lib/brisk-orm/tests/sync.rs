//! Schema synchronization against a scripted live schema.
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use brisk_orm::{
    AutoSyncConfig, ColumnMeta, ColumnType, Orm, OrmError, PropertyDescriptor, PropertyKind,
    TableMeta, TypeDescriptor,
};
use common::{Event, MockDriver, options};
use serde_json::json;

fn table(entity: &str, name: &str) -> TypeDescriptor {
    TypeDescriptor::new(entity)
        .table(TableMeta::new(name))
        .property(PropertyDescriptor::column(
            "id",
            PropertyKind::Number,
            ColumnMeta::primary_key("id").auto_increment(),
        ))
        .property(PropertyDescriptor::column(
            "label",
            PropertyKind::String,
            ColumnMeta::new("label").length(32).unique_key("label"),
        ))
}

/// Live tables `a` and `b`; `b` has an extra column and a primary key.
fn live_schema() -> MockDriver {
    let driver = MockDriver::new();
    driver.rows(
        "show tables",
        json!([{"Tables_in_test": "a"}, {"Tables_in_test": "b"}]),
    );
    driver.rows(
        "desc `b`",
        json!([{"Field": "id"}, {"Field": "legacy"}]),
    );
    driver.rows(
        "show index from `b`",
        json!([
            {"Key_name": "PRIMARY", "Non_unique": 0},
            {"Key_name": "old_label", "Non_unique": 0},
            {"Key_name": "by_legacy", "Non_unique": 1},
        ]),
    );
    driver.rows(
        "select constraint_name as name from information_schema.table_constraints",
        json!([{"name": "fk_old"}]),
    );
    driver
}

async fn connect(driver: &MockDriver, config: AutoSyncConfig) -> Orm {
    let orm = Orm::new(driver.connector());
    orm.register_entity(table("B", "b"));
    orm.register_entity(table("C", "c"));
    orm.connect(options().auto_sync(config)).await.unwrap();
    orm
}

fn position(statements: &[String], prefix: &str) -> Option<usize> {
    statements.iter().position(|s| s.starts_with(prefix))
}

#[tokio::test]
async fn missing_tables_are_created_and_shared_tables_updated() {
    let driver = live_schema();
    let orm = connect(
        &driver,
        AutoSyncConfig {
            enable_update_table: true,
            ..Default::default()
        },
    )
    .await;

    let report = orm.auto_sync(None).await.unwrap();

    assert!(report.deleted.is_empty());
    assert_eq!(report.created, vec!["c"]);
    assert_eq!(report.updated, vec!["b"]);

    let statements = driver.statements();
    assert_eq!(position(&statements, "drop table"), None);
    let create = position(&statements, "create table `c`").unwrap();
    let alter = position(&statements, "alter table `b`").unwrap();
    assert!(create < alter);
}

#[tokio::test]
async fn alter_reconciles_columns_and_keys() {
    let driver = live_schema();
    let orm = connect(
        &driver,
        AutoSyncConfig {
            enable_update_table: true,
            ..Default::default()
        },
    )
    .await;
    orm.auto_sync(None).await.unwrap();

    let statements = driver.statements();
    let alter = &statements[position(&statements, "alter table `b`").unwrap()];
    assert!(alter.contains("drop column `legacy`"));
    assert!(alter.contains("modify column `id` int not null auto_increment"));
    assert!(alter.contains("add column `label` varchar(32) null"));
    assert!(alter.contains("drop primary key, add primary key (`id`)"));
    assert!(alter.contains("drop index `old_label`"));
    assert!(!alter.contains("drop index `by_legacy`"));
    assert!(alter.contains("add unique index `"));
    assert!(alter.contains("drop foreign key `fk_old`"));
    assert!(alter.ends_with(
        "engine = InnoDB, character set = utf8, collate = utf8_general_ci"
    ));
}

#[tokio::test]
async fn deletes_run_first_and_only_when_enabled() {
    let driver = live_schema();
    let orm = connect(
        &driver,
        AutoSyncConfig {
            enable_delete_table: true,
            ..Default::default()
        },
    )
    .await;

    let report = orm.auto_sync(None).await.unwrap();

    assert_eq!(report.deleted, vec!["a"]);
    assert_eq!(report.created, vec!["c"]);
    assert!(report.updated.is_empty());

    let statements = driver.statements();
    let drop = position(&statements, "drop table `a`").unwrap();
    let create = position(&statements, "create table `c`").unwrap();
    assert!(drop < create);
    assert_eq!(position(&statements, "alter table"), None);
}

#[tokio::test]
async fn excluded_tables_are_never_touched() {
    let driver = live_schema();
    let orm = connect(
        &driver,
        AutoSyncConfig {
            enable_delete_table: true,
            enable_update_table: true,
            expect_tables: vec!["a".to_string()],
            ..Default::default()
        },
    )
    .await;
    orm.add_global_auto_sync_expect(["c"]);

    let report = orm.auto_sync(None).await.unwrap();

    assert!(report.deleted.is_empty());
    assert!(report.created.is_empty());
    assert_eq!(report.updated, vec!["b"]);
}

#[tokio::test]
async fn sync_runs_in_one_transaction() {
    let driver = live_schema();
    let orm = connect(&driver, AutoSyncConfig::default()).await;

    orm.auto_sync(None).await.unwrap();

    let events = driver.events();
    assert_eq!(events.first(), Some(&Event::Begin));
    assert_eq!(events[events.len() - 2], Event::Commit);
    assert_eq!(events.last(), Some(&Event::Release));
    assert!(
        events
            .iter()
            .all(|e| !matches!(e, Event::Query(_)))
    );
}

#[tokio::test]
async fn failures_roll_the_sync_back() {
    let driver = live_schema();
    driver.fail("create table `c`", "disk full");
    let orm = connect(&driver, AutoSyncConfig::default()).await;

    let err = orm.auto_sync(None).await.unwrap_err();

    assert!(matches!(err, OrmError::Database(_)));
    let events = driver.events();
    assert!(events.contains(&Event::Rollback));
    assert!(!events.contains(&Event::Commit));
}

#[tokio::test]
async fn enabled_sync_runs_on_connect() {
    let driver = live_schema();
    connect(
        &driver,
        AutoSyncConfig {
            enable: true,
            ..Default::default()
        },
    )
    .await;

    let statements = driver.statements();
    assert_eq!(statements.first().map(String::as_str), Some("show tables"));
    assert!(position(&statements, "create table `c`").is_some());
}

#[tokio::test]
async fn disabled_sync_stays_quiet_on_connect() {
    let driver = live_schema();
    connect(&driver, AutoSyncConfig::default()).await;
    assert!(driver.statements().is_empty());
}

#[tokio::test]
async fn referenced_tables_are_created_first() {
    let driver = MockDriver::new();
    let orm = Orm::new(driver.connector());
    orm.register_entity(
        table("Child", "child").property(PropertyDescriptor::column(
            "parentId",
            PropertyKind::Number,
            ColumnMeta::new("parent_id")
                .column_type(ColumnType::BigInt)
                .foreign_key("Parent", "id", Default::default()),
        )),
    );
    orm.register_entity(table("Parent", "parent"));
    orm.connect(options()).await.unwrap();

    let report = orm.auto_sync(None).await.unwrap();

    assert_eq!(report.created, vec!["parent", "child"]);
    let statements = driver.statements();
    let child = &statements[position(&statements, "create table `child`").unwrap()];
    assert!(child.contains("foreign key (`parent_id`) references `parent` (`id`)"));
}

#[tokio::test]
async fn create_statements_come_back_from_the_server() {
    let driver = MockDriver::new();
    driver.rows(
        "show create table `b`",
        json!([{"Table": "b", "Create Table": "CREATE TABLE `b` (`id` int)"}]),
    );
    let orm = Orm::new(driver.connector());
    orm.connect(options()).await.unwrap();

    assert_eq!(
        orm.get_create_table_sql("b", None).await.unwrap(),
        "CREATE TABLE `b` (`id` int)"
    );
    assert!(orm.get_create_table_sql("missing", None).await.is_err());
}
