//! Brisk ORM - metadata-driven relational persistence.
//!
//! Entity types describe themselves with a [`TypeDescriptor`], usually through
//! `#[derive(Entity)]`. Registering a type derives its [`TableDescriptor`],
//! which drives both schema synchronization and the generated data-access
//! surface.
//!
//! # Core Concepts
//!
//! - **Orm**: process-scoped runtime holding the pool, the metadata registry,
//!   operations registered by id and the connect hooks.
//! - **Query**: a fluent condition tree compiled against an entity's
//!   property-to-column mapping.
//! - **Dao**: count, list, page, find, save, update and cascading delete
//!   operations generated per entity.
//! - **Soft delete**: tables flagged `soft_delete` get an `_is_delete` column;
//!   deletes become updates and reads skip flagged rows.
//!
//! # Drivers
//!
//! The core formats SQL itself and runs it through the [`QueryExecutor`],
//! [`TransactionExecutor`] and [`Connector`] traits. `brisk-orm-mysql`
//! provides the MySQL implementation.

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

mod config;
mod context;
mod crud;
mod dao;
mod entity;
mod error;
pub mod escape;
mod executor;
mod mapping;
mod metadata;
mod orm;
mod query;
mod sync;
mod value;

pub use config::{AutoSyncConfig, ConnectOptions, ConnectionConfig, DEFAULT_MAX_CONNECTIONS};
pub use context::TransactionContext;
pub use crud::{
    CascadeVisited, DEFAULT_RELATION_DEPTH, DeleteFn, DeleteOperation, DeleteResult, EntityTarget,
    InsertFn, OperationResult, RelationCount, ResultOption, SelectFn, Selection, UpdateFn,
    ValueColumn,
};
pub use dao::{Dao, Page, delete_query_id, find_by_id, find_list_by_id, list_query_id};
pub use entity::{
    ColumnMeta, Entity, ForeignKeyRef, PropertyDescriptor, PropertyKind, RelationMeta, TableMeta,
    TypeDescriptor,
};
pub use error::OrmError;
pub use executor::{Connector, QueryExecutor, QueryOutput, Row, TransactionExecutor};
pub use mapping::{ComplexMapping, EntityMapping, MappingTarget};
pub use metadata::{
    ColumnDescriptor, ColumnType, DEFAULT_CHARSET, DEFAULT_COLLATE, DEFAULT_ENGINE, DeleteValue,
    ForeignAction, ForeignKeyDescriptor, SOFT_DELETE_COLUMN, TableDescriptor,
};
pub use orm::{HookFuture, HookPosition, Orm, RelativeTable};
pub use query::{Order, Query};
pub use sync::{
    SyncReport, column_sql, create_table_sql, foreign_key_sql, primary_key_sql, unique_key_sql,
};
pub use value::{GeometryPoint, Param, Value};

// Re-export derive macro
pub use brisk_orm_derive::Entity;
