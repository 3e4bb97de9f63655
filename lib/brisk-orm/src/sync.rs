//! Schema synchronization.
//!
//! DDL is rendered by pure functions from [`TableDescriptor`]s. The [`Orm`]
//! methods run it against the live schema, and [`Orm::auto_sync`] reconciles
//! every registered table inside one transaction.

use std::collections::HashSet;

use tracing::{error, info};
use uuid::Uuid;

use crate::escape::{escape, escape_id, escape_string};
use crate::{
    ColumnDescriptor, ForeignKeyDescriptor, Orm, OrmError, QueryOutput, Row, TableDescriptor,
    TransactionContext,
};

/// Tables touched by one synchronization run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub deleted: Vec<String>,
    pub created: Vec<String>,
    pub updated: Vec<String>,
}

fn type_decorate(column: &ColumnDescriptor) -> String {
    let Some(length) = column.length.or_else(|| column.column_type.default_length()) else {
        return String::new();
    };
    match column
        .precision
        .or_else(|| column.column_type.default_precision())
    {
        Some(precision) => format!("({}, {})", length, precision),
        None => format!("({})", length),
    }
}

/// Column definition as used by `create table` and `alter table`.
pub fn column_sql(column: &ColumnDescriptor) -> String {
    let mut parts = vec![
        format!(
            "{} {}{}",
            escape_id(&column.name),
            column.column_type.as_str(),
            type_decorate(column)
        ),
        if column.not_null { "not null" } else { "null" }.to_string(),
    ];
    if let Some(default) = column.default.as_ref().filter(|v| !v.is_null()) {
        parts.push(format!("default {}", escape(default)));
    }
    if column.auto_increment {
        parts.push("auto_increment".to_string());
    }
    parts.join(" ")
}

/// Empty when there are no key columns.
pub fn primary_key_sql(columns: &[String]) -> String {
    if columns.is_empty() {
        return String::new();
    }
    format!("primary key ({})", id_list(columns))
}

pub fn unique_key_sql(columns: &[String]) -> String {
    format!("unique key {} ({})", constraint_name(), id_list(columns))
}

pub fn foreign_key_sql(column: &str, foreign_key: &ForeignKeyDescriptor) -> String {
    format!(
        "constraint {} foreign key ({}) references {} ({}) on delete {} on update {}",
        constraint_name(),
        escape_id(column),
        escape_id(&foreign_key.target_table),
        escape_id(&foreign_key.target_column),
        foreign_key.action.as_sql(),
        foreign_key.action.as_sql()
    )
}

pub fn create_table_sql(table: &TableDescriptor) -> String {
    let mut definitions: Vec<String> = table.columns.iter().map(column_sql).collect();
    if !table.primary_keys.is_empty() {
        definitions.push(primary_key_sql(&table.primary_keys));
    }
    definitions.extend(table.unique_keys.values().map(|cols| unique_key_sql(cols)));
    definitions.extend(
        table
            .foreign_keys
            .iter()
            .map(|(column, fk)| foreign_key_sql(column, fk)),
    );
    format!(
        "create table {} (\n  {}\n) engine={} charset={} collate={}",
        escape_id(&table.name),
        definitions.join(",\n  "),
        table.engine,
        table.charset,
        table.collate
    )
}

fn id_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| escape_id(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn constraint_name() -> String {
    escape_id(&Uuid::new_v4().to_string())
}

fn string_field<'a>(row: &'a Row, key: &str) -> Option<&'a str> {
    row.get(key).and_then(|v| v.as_str())
}

fn is_unique_index(row: &Row) -> bool {
    match row.get("Non_unique") {
        Some(serde_json::Value::Number(n)) => n.as_u64() == Some(0),
        Some(serde_json::Value::String(s)) => s == "0",
        Some(serde_json::Value::Bool(b)) => !b,
        _ => false,
    }
}

/// Declared tables ordered so foreign-key targets come before their dependents.
fn creation_order<'a>(tables: &[&'a TableDescriptor]) -> Vec<&'a TableDescriptor> {
    let names: HashSet<&str> = tables.iter().map(|t| t.name.as_str()).collect();
    let mut done: HashSet<&str> = HashSet::new();
    let mut ordered = Vec::with_capacity(tables.len());
    let mut pending: Vec<&TableDescriptor> = tables.to_vec();

    while !pending.is_empty() {
        let (ready, blocked): (Vec<_>, Vec<_>) = pending.into_iter().partition(|t| {
            t.foreign_keys.values().all(|fk| {
                fk.target_table == t.name
                    || !names.contains(fk.target_table.as_str())
                    || done.contains(fk.target_table.as_str())
            })
        });
        if ready.is_empty() {
            // cycle: keep declaration order for the rest
            ordered.extend(blocked);
            break;
        }
        for table in ready {
            done.insert(table.name.as_str());
            ordered.push(table);
        }
        pending = blocked;
    }
    ordered
}

impl Orm {
    /// Names of every table in the current database.
    pub async fn get_all_table(
        &self,
        ctx: Option<&TransactionContext>,
    ) -> Result<Vec<String>, OrmError> {
        let output = self
            .execute("show tables", ctx)
            .await
            .inspect_err(|e| error!(error = %e, "show tables error"))?;
        Ok(output
            .rows
            .iter()
            .filter_map(|row| row.values().next())
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect())
    }

    pub async fn create_table(
        &self,
        table: &TableDescriptor,
        ctx: Option<&TransactionContext>,
    ) -> Result<QueryOutput, OrmError> {
        let sql = create_table_sql(table);
        info!(table = %table.name, sql = %sql, "create table");
        self.execute(&sql, ctx)
            .await
            .inspect_err(|e| error!(error = %e, table = %table.name, "create table error"))
    }

    pub async fn delete_table(
        &self,
        name: &str,
        ctx: Option<&TransactionContext>,
    ) -> Result<QueryOutput, OrmError> {
        info!(table = name, "drop table");
        self.execute(&format!("drop table {}", escape_id(name)), ctx)
            .await
            .inspect_err(|e| error!(error = %e, table = name, "drop table error"))
    }

    /// The server's own `create table` statement for `name`.
    pub async fn get_create_table_sql(
        &self,
        name: &str,
        ctx: Option<&TransactionContext>,
    ) -> Result<String, OrmError> {
        let output = self
            .execute(&format!("show create table {}", escape_id(name)), ctx)
            .await
            .inspect_err(|e| error!(error = %e, table = name, "show create table error"))?;
        output
            .rows
            .first()
            .and_then(|row| string_field(row, "Create Table"))
            .map(str::to_string)
            .ok_or_else(|| OrmError::Database(format!("no create statement for table {}", name)))
    }

    /// Bring an existing table in line with its descriptor.
    ///
    /// Columns are dropped, modified or added by name. Unique indexes and
    /// foreign keys are dropped by name and recreated from the descriptor;
    /// the primary key is dropped when present and re-added when declared.
    pub async fn update_table(
        &self,
        table: &TableDescriptor,
        ctx: Option<&TransactionContext>,
    ) -> Result<QueryOutput, OrmError> {
        self.update_table_inner(table, ctx)
            .await
            .inspect_err(|e| error!(error = %e, table = %table.name, "update table error"))
    }

    async fn update_table_inner(
        &self,
        table: &TableDescriptor,
        ctx: Option<&TransactionContext>,
    ) -> Result<QueryOutput, OrmError> {
        let name = escape_id(&table.name);

        let live_columns: Vec<String> = self
            .execute(&format!("desc {}", name), ctx)
            .await?
            .rows
            .iter()
            .filter_map(|row| string_field(row, "Field").map(str::to_string))
            .collect();
        let declared: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();

        let mut clauses: Vec<String> = Vec::new();
        for column in live_columns.iter().filter(|c| !declared.contains(&c.as_str())) {
            clauses.push(format!("drop column {}", escape_id(column)));
        }
        for column in &table.columns {
            if live_columns.contains(&column.name) {
                clauses.push(format!("modify column {}", column_sql(column)));
            }
        }
        for column in &table.columns {
            if !live_columns.contains(&column.name) {
                clauses.push(format!("add column {}", column_sql(column)));
            }
        }

        let indexes = self
            .execute(&format!("show index from {}", name), ctx)
            .await?
            .rows;
        let has_primary = indexes
            .iter()
            .any(|row| string_field(row, "Key_name") == Some("PRIMARY"));
        if has_primary {
            clauses.push("drop primary key".to_string());
        }
        if !table.primary_keys.is_empty() {
            clauses.push(format!("add {}", primary_key_sql(&table.primary_keys)));
        }

        let mut unique_indexes: Vec<&str> = Vec::new();
        for key in indexes
            .iter()
            .filter(|row| is_unique_index(row))
            .filter_map(|row| string_field(row, "Key_name"))
        {
            if key != "PRIMARY" && !unique_indexes.contains(&key) {
                unique_indexes.push(key);
            }
        }
        for key in unique_indexes {
            clauses.push(format!("drop index {}", escape_id(key)));
        }
        for columns in table.unique_keys.values() {
            clauses.push(format!(
                "add unique index {}({})",
                constraint_name(),
                id_list(columns)
            ));
        }

        let constraints = self
            .execute(
                &format!(
                    "select constraint_name as name from information_schema.table_constraints \
                     where table_schema = database() and table_name = {} \
                     and constraint_type = 'FOREIGN KEY'",
                    escape_string(&table.name)
                ),
                ctx,
            )
            .await?
            .rows;
        for constraint in constraints.iter().filter_map(|row| string_field(row, "name")) {
            clauses.push(format!("drop foreign key {}", escape_id(constraint)));
        }
        for (column, fk) in &table.foreign_keys {
            clauses.push(format!("add {}", foreign_key_sql(column, fk)));
        }

        clauses.push(format!(
            "engine = {}, character set = {}, collate = {}",
            table.engine, table.charset, table.collate
        ));

        let sql = format!("alter table {}\n{}", name, clauses.join(",\n"));
        info!(table = %table.name, sql = %sql, "update table");
        self.execute(&sql, ctx).await
    }

    /// Reconcile the registered tables with the live schema.
    ///
    /// Runs in one transaction, joining `ctx` when given: surplus tables are
    /// dropped (when enabled), then missing tables are created, then shared
    /// tables are altered (when enabled). Excluded tables are never touched.
    pub async fn auto_sync(
        &self,
        ctx: Option<&TransactionContext>,
    ) -> Result<SyncReport, OrmError> {
        let orm = self.clone();
        self.transaction("brisk_orm_auto_sync", ctx, |tx| async move {
            orm.sync_in(&tx).await
        })
        .await
    }

    async fn sync_in(&self, tx: &TransactionContext) -> Result<SyncReport, OrmError> {
        let config = self.auto_sync_config();
        let live = self.get_all_table(Some(tx)).await?;
        let declared = self.tables();
        let excluded = |name: &str| config.expect_tables.iter().any(|t| t == name);

        let to_delete: Vec<&String> = live
            .iter()
            .filter(|name| !declared.iter().any(|t| &t.name == *name))
            .collect();
        let to_create: Vec<&TableDescriptor> = declared
            .iter()
            .filter(|t| !live.contains(&t.name))
            .map(|t| t.as_ref())
            .collect();
        let to_update: Vec<&TableDescriptor> = declared
            .iter()
            .filter(|t| live.contains(&t.name))
            .map(|t| t.as_ref())
            .collect();
        info!(
            delete = ?to_delete,
            create = ?to_create.iter().map(|t| &t.name).collect::<Vec<_>>(),
            update = ?to_update.iter().map(|t| &t.name).collect::<Vec<_>>(),
            "sync plan"
        );

        let mut report = SyncReport::default();
        if config.enable_delete_table {
            for name in to_delete.into_iter().filter(|n| !excluded(n)) {
                self.delete_table(name, Some(tx)).await?;
                report.deleted.push(name.clone());
            }
        }
        for table in creation_order(&to_create) {
            if excluded(&table.name) {
                continue;
            }
            self.create_table(table, Some(tx)).await?;
            report.created.push(table.name.clone());
        }
        if config.enable_update_table {
            for table in to_update.into_iter().filter(|t| !excluded(&t.name)) {
                self.update_table(table, Some(tx)).await?;
                report.updated.push(table.name.clone());
            }
        }
        Ok(report)
    }
}
