//! Generated data-access surface for one entity.
//!
//! [`Orm::dao`] consumes an entity's complete descriptor and synthesizes
//! every operation up front: counts, lists, pages and finds (each with no
//! filter, a [`Query`], every-field-equals and some-field-equals variants),
//! saves, full and partial updates, and cascading deletes.
//!
//! For soft-delete entities reads exclude flagged rows and deletes become
//! updates of the delete-value columns.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crud::{DeleteFn, InsertFn, SelectFn, UpdateFn};
use crate::escape::{escape, format};
use crate::metadata::SOFT_DELETE_COLUMN;
use crate::{
    CascadeVisited, DeleteOperation, DeleteResult, Entity, EntityMapping, EntityTarget, OperationResult, Orm,
    OrmError, Param, Query, RelationCount, ResultOption, TableDescriptor, TransactionContext,
    TypeDescriptor, Value, ValueColumn,
};

pub fn find_by_id(entity: &str) -> String {
    format!("__INNER__FIND__BY__{}", entity)
}

pub fn find_list_by_id(entity: &str) -> String {
    format!("__INNER__FIND__LIST__BY__{}", entity)
}

pub fn list_query_id(entity: &str) -> String {
    format!("__INNER__LIST__QUERY__{}", entity)
}

pub fn delete_query_id(entity: &str) -> String {
    format!("__INNER__DELETE__QUERY__{}", entity)
}

/// Zero-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page: u64,
    pub page_size: u64,
}

impl Page {
    pub fn new(page: u64, page_size: u64) -> Self {
        Self { page, page_size }
    }

    fn offset(&self) -> u64 {
        self.page.saturating_mul(self.page_size)
    }
}

struct PrimaryKey {
    property: String,
    column: String,
}

struct DaoInner {
    orm: Orm,
    entity: String,
    table: Arc<TableDescriptor>,
    target: EntityTarget,
    primary_key: Option<PrimaryKey>,
    /// Property-backed columns, in declaration order.
    columns: Vec<ValueColumn>,

    count: Arc<SelectFn>,
    count_query: Arc<SelectFn>,
    list: Arc<SelectFn>,
    list_query: Arc<SelectFn>,
    page: Arc<SelectFn>,
    page_query: Arc<SelectFn>,
    find_by_primary_key: Option<Arc<SelectFn>>,
    find_query: Arc<SelectFn>,
    find_by: Arc<SelectFn>,
    find_list_by: Arc<SelectFn>,
    save: InsertFn,
    save_or_update: InsertFn,
    update_by_primary_key: Option<UpdateFn>,
    update_query: UpdateFn,
    delete_query: Arc<DeleteFn>,
}

/// Operations over the table of `T`.
pub struct Dao<T> {
    inner: Arc<DaoInner>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Dao<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl Orm {
    /// Register `T` and build its Dao.
    ///
    /// Returns `None` when `T` declares no table. The Dao's relation selects
    /// and its cascading delete are registered by id.
    pub fn dao<T: Entity>(&self) -> Option<Dao<T>> {
        let ty = T::descriptor();
        let table = self.register_entity(ty.clone())?;
        let dao = Dao::<T>::build(self, &ty, table);
        self.register_delete(delete_query_id(&ty.name), Arc::new(dao.clone()));
        debug!(entity = %ty.name, table = %dao.inner.table.name, "dao registered");
        Some(dao)
    }
}

fn set_clause(columns: &[ValueColumn], table: &TableDescriptor) -> String {
    columns
        .iter()
        .filter_map(|c| table.column_for_property(&c.property))
        .map(|c| format!("{} = ?", c.name))
        .collect::<Vec<_>>()
        .join(",")
}

impl<T: Entity> Dao<T> {
    fn build(orm: &Orm, ty: &TypeDescriptor, table: Arc<TableDescriptor>) -> Self {
        let name = &table.name;
        let soft = table.soft_delete;
        let live_where = if soft {
            format!(" where {} = 0", SOFT_DELETE_COLUMN)
        } else {
            String::new()
        };
        let live_and = if soft {
            format!(" and {} = 0", SOFT_DELETE_COLUMN)
        } else {
            String::new()
        };

        let target = EntityTarget::new(EntityMapping::from_descriptors(ty, &table), soft);
        let columns = ValueColumn::from_columns(table.property_columns());
        let primary_key = ty.primary_key().map(|(p, c)| PrimaryKey {
            property: p.key.clone(),
            column: c.db_name.clone(),
        });
        let t = || Some(target.clone());

        let count = orm.get_select(
            format!("select count(*) from {}{}", name, live_where),
            t(),
            ResultOption::count(),
            None,
            &[],
        );
        let count_query = orm.get_select(
            format!("select count(*) from {} ?", name),
            t(),
            ResultOption::count(),
            None,
            &[0],
        );
        let list = orm.get_select(
            format!("select * from {}{}", name, live_where),
            t(),
            ResultOption::list(),
            None,
            &[],
        );
        let list_query = orm.get_select(
            format!("select * from {} ?", name),
            t(),
            ResultOption::list(),
            Some(&list_query_id(&ty.name)),
            &[0],
        );
        let page = orm.get_select(
            format!("select * from {}{} limit ?, ?", name, live_where),
            t(),
            ResultOption::list(),
            None,
            &[],
        );
        let page_query = orm.get_select(
            format!("select * from {} ? limit ?, ?", name),
            t(),
            ResultOption::list(),
            None,
            &[0],
        );
        let find_by_primary_key = primary_key.as_ref().map(|pk| {
            orm.get_select(
                format!(
                    "select * from {} where {} = ?{} limit 0, 1",
                    name, pk.column, live_and
                ),
                t(),
                ResultOption::default(),
                None,
                &[],
            )
        });
        let find_query = orm.get_select(
            format!("select * from {} ? limit 0, 1", name),
            t(),
            ResultOption::default(),
            None,
            &[0],
        );
        let find_by = orm.get_select(
            format!("select * from {} where ? = ?{}", name, live_and),
            t(),
            ResultOption::default(),
            Some(&find_by_id(&ty.name)),
            &[0],
        );
        let find_list_by = orm.get_select(
            format!("select * from {} where ? = ?{}", name, live_and),
            t(),
            ResultOption::list(),
            Some(&find_list_by_id(&ty.name)),
            &[0],
        );

        let column_list = table
            .property_columns()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let save = orm.get_insert(
            format!("insert into {} ({}) values ?", name, column_list),
            columns.clone(),
        );
        let save_or_update = orm.get_insert(
            format!("replace into {} ({}) values ?", name, column_list),
            columns.clone(),
        );

        let non_key: Vec<ValueColumn> = columns
            .iter()
            .filter(|c| primary_key.as_ref().is_none_or(|pk| pk.property != c.property))
            .cloned()
            .collect();
        let update_by_primary_key = primary_key.as_ref().map(|pk| {
            let mut bound = non_key.clone();
            bound.extend(columns.iter().filter(|c| c.property == pk.property).cloned());
            orm.get_update(
                format!(
                    "update {} set {} where {} = ?{}",
                    name,
                    set_clause(&non_key, &table),
                    pk.column,
                    live_and
                ),
                bound,
                None,
                &[],
            )
        });
        let update_query = orm.get_update(
            format!("update {} set {} ?", name, set_clause(&non_key, &table)),
            non_key,
            t(),
            &[1],
        );
        let delete_query = orm.get_delete(format!("delete from {} ?", name), t(), &[0], None);

        Self {
            inner: Arc::new(DaoInner {
                orm: orm.clone(),
                entity: ty.name.clone(),
                table,
                target,
                primary_key,
                columns,
                count,
                count_query,
                list,
                list_query,
                page,
                page_query,
                find_by_primary_key,
                find_query,
                find_by,
                find_list_by,
                save,
                save_or_update,
                update_by_primary_key,
                update_query,
                delete_query,
            }),
            _marker: PhantomData,
        }
    }

    pub fn table(&self) -> &TableDescriptor {
        &self.inner.table
    }

    pub fn mapping(&self) -> &EntityMapping {
        &self.inner.target.mapping
    }

    fn primary_key(&self) -> Result<&PrimaryKey, OrmError> {
        self.inner
            .primary_key
            .as_ref()
            .ok_or_else(|| OrmError::no_primary_key(&self.inner.table.name))
    }

    // ---- count ----

    pub async fn count(&self, ctx: Option<&TransactionContext>) -> Result<u64, OrmError> {
        Ok(self.inner.count.call(vec![], ctx).await?.into_count())
    }

    pub async fn count_query(
        &self,
        query: &Query,
        ctx: Option<&TransactionContext>,
    ) -> Result<u64, OrmError> {
        Ok(self
            .inner
            .count_query
            .call(vec![query.into()], ctx)
            .await?
            .into_count())
    }

    pub async fn count_every_eq(
        &self,
        partial: &(impl Serialize + Sync),
        ctx: Option<&TransactionContext>,
    ) -> Result<u64, OrmError> {
        let query = Query::new().every_eq(partial)?;
        self.count_query(&query, ctx).await
    }

    pub async fn count_some_eq(
        &self,
        partial: &(impl Serialize + Sync),
        ctx: Option<&TransactionContext>,
    ) -> Result<u64, OrmError> {
        let query = Query::new().some_eq(partial)?;
        self.count_query(&query, ctx).await
    }

    // ---- list ----

    pub async fn list(&self, ctx: Option<&TransactionContext>) -> Result<Vec<T>, OrmError> {
        self.inner.list.call(vec![], ctx).await?.into_list()
    }

    pub async fn list_query(
        &self,
        query: &Query,
        ctx: Option<&TransactionContext>,
    ) -> Result<Vec<T>, OrmError> {
        self.inner
            .list_query
            .call(vec![query.into()], ctx)
            .await?
            .into_list()
    }

    pub async fn list_every_eq(
        &self,
        partial: &(impl Serialize + Sync),
        ctx: Option<&TransactionContext>,
    ) -> Result<Vec<T>, OrmError> {
        let query = Query::new().every_eq(partial)?;
        self.list_query(&query, ctx).await
    }

    pub async fn list_some_eq(
        &self,
        partial: &(impl Serialize + Sync),
        ctx: Option<&TransactionContext>,
    ) -> Result<Vec<T>, OrmError> {
        let query = Query::new().some_eq(partial)?;
        self.list_query(&query, ctx).await
    }

    // ---- page ----

    pub async fn page(
        &self,
        page: Page,
        ctx: Option<&TransactionContext>,
    ) -> Result<Vec<T>, OrmError> {
        self.inner
            .page
            .call(vec![page.offset().into(), page.page_size.into()], ctx)
            .await?
            .into_list()
    }

    pub async fn page_query(
        &self,
        query: &Query,
        page: Page,
        ctx: Option<&TransactionContext>,
    ) -> Result<Vec<T>, OrmError> {
        self.inner
            .page_query
            .call(
                vec![query.into(), page.offset().into(), page.page_size.into()],
                ctx,
            )
            .await?
            .into_list()
    }

    pub async fn page_every_eq(
        &self,
        partial: &(impl Serialize + Sync),
        page: Page,
        ctx: Option<&TransactionContext>,
    ) -> Result<Vec<T>, OrmError> {
        let query = Query::new().every_eq(partial)?;
        self.page_query(&query, page, ctx).await
    }

    pub async fn page_some_eq(
        &self,
        partial: &(impl Serialize + Sync),
        page: Page,
        ctx: Option<&TransactionContext>,
    ) -> Result<Vec<T>, OrmError> {
        let query = Query::new().some_eq(partial)?;
        self.page_query(&query, page, ctx).await
    }

    // ---- find ----

    pub async fn find_by_primary_key(
        &self,
        key: impl Into<Value> + Send,
        ctx: Option<&TransactionContext>,
    ) -> Result<Option<T>, OrmError> {
        let select = self
            .inner
            .find_by_primary_key
            .as_ref()
            .ok_or_else(|| OrmError::no_primary_key(&self.inner.table.name))?;
        select
            .call(vec![Param::Literal(key.into())], ctx)
            .await?
            .into_one()
    }

    pub async fn find_query(
        &self,
        query: &Query,
        ctx: Option<&TransactionContext>,
    ) -> Result<Option<T>, OrmError> {
        self.inner
            .find_query
            .call(vec![query.into()], ctx)
            .await?
            .into_one()
    }

    pub async fn find_every_eq(
        &self,
        partial: &(impl Serialize + Sync),
        ctx: Option<&TransactionContext>,
    ) -> Result<Option<T>, OrmError> {
        let query = Query::new().every_eq(partial)?;
        self.find_query(&query, ctx).await
    }

    pub async fn find_some_eq(
        &self,
        partial: &(impl Serialize + Sync),
        ctx: Option<&TransactionContext>,
    ) -> Result<Option<T>, OrmError> {
        let query = Query::new().some_eq(partial)?;
        self.find_query(&query, ctx).await
    }

    /// First row whose `column` equals `value`.
    pub async fn find_by(
        &self,
        column: &str,
        value: impl Into<Value> + Send,
        ctx: Option<&TransactionContext>,
    ) -> Result<Option<T>, OrmError> {
        self.inner
            .find_by
            .call(vec![Param::Raw(column.to_string()), Param::Literal(value.into())], ctx)
            .await?
            .into_one()
    }

    /// Every row whose `column` equals `value`.
    pub async fn find_list_by(
        &self,
        column: &str,
        value: impl Into<Value> + Send,
        ctx: Option<&TransactionContext>,
    ) -> Result<Vec<T>, OrmError> {
        self.inner
            .find_list_by
            .call(vec![Param::Raw(column.to_string()), Param::Literal(value.into())], ctx)
            .await?
            .into_list()
    }

    // ---- save ----

    pub async fn save(
        &self,
        item: &T,
        ctx: Option<&TransactionContext>,
    ) -> Result<OperationResult, OrmError> {
        self.inner.save.call(item, ctx).await
    }

    pub async fn save_all(
        &self,
        items: &[T],
        ctx: Option<&TransactionContext>,
    ) -> Result<OperationResult, OrmError> {
        self.inner.save.call_all(items, ctx).await
    }

    /// `replace into`: insert, or overwrite the row with the same key.
    pub async fn save_or_update(
        &self,
        item: &T,
        ctx: Option<&TransactionContext>,
    ) -> Result<OperationResult, OrmError> {
        self.inner.save_or_update.call(item, ctx).await
    }

    pub async fn save_or_update_all(
        &self,
        items: &[T],
        ctx: Option<&TransactionContext>,
    ) -> Result<OperationResult, OrmError> {
        self.inner.save_or_update.call_all(items, ctx).await
    }

    // ---- update ----

    /// Write every column of `item` to the row with its primary key.
    pub async fn update_by_primary_key(
        &self,
        item: &T,
        ctx: Option<&TransactionContext>,
    ) -> Result<OperationResult, OrmError> {
        let update = self
            .inner
            .update_by_primary_key
            .as_ref()
            .ok_or_else(|| OrmError::no_primary_key(&self.inner.table.name))?;
        update.call(item, vec![], ctx).await
    }

    /// Write every non-key column of `item` to the rows matching `query`.
    pub async fn update_query(
        &self,
        item: &T,
        query: &Query,
        ctx: Option<&TransactionContext>,
    ) -> Result<OperationResult, OrmError> {
        self.inner
            .update_query
            .call(item, vec![query.into()], ctx)
            .await
    }

    pub async fn update_every_eq(
        &self,
        item: &T,
        partial: &(impl Serialize + Sync),
        ctx: Option<&TransactionContext>,
    ) -> Result<OperationResult, OrmError> {
        let query = Query::new().every_eq(partial)?;
        self.update_query(item, &query, ctx).await
    }

    pub async fn update_some_eq(
        &self,
        item: &T,
        partial: &(impl Serialize + Sync),
        ctx: Option<&TransactionContext>,
    ) -> Result<OperationResult, OrmError> {
        let query = Query::new().some_eq(partial)?;
        self.update_query(item, &query, ctx).await
    }

    fn part_columns(&self, part: &[&str]) -> Vec<ValueColumn> {
        self.inner
            .columns
            .iter()
            .filter(|c| part.contains(&c.property.as_str()))
            .filter(|c| {
                self.inner
                    .primary_key
                    .as_ref()
                    .is_none_or(|pk| pk.property != c.property)
            })
            .cloned()
            .collect()
    }

    /// Write only the `part` properties of `data` to the row with its key.
    pub async fn update_part_by_primary_key(
        &self,
        part: &[&str],
        data: &(impl Serialize + Sync),
        ctx: Option<&TransactionContext>,
    ) -> Result<OperationResult, OrmError> {
        let pk = self.primary_key()?;
        let table = &self.inner.table;
        let columns = self.part_columns(part);
        let live_and = if table.soft_delete {
            format!(" and {} = 0", SOFT_DELETE_COLUMN)
        } else {
            String::new()
        };
        let sql = format!(
            "update {} set {} where {} = ?{}",
            table.name,
            set_clause(&columns, table),
            pk.column,
            live_and
        );
        let mut bound = columns;
        bound.extend(
            self.inner
                .columns
                .iter()
                .filter(|c| c.property == pk.property)
                .cloned(),
        );
        self.inner
            .orm
            .get_update(sql, bound, None, &[])
            .call(data, vec![], ctx)
            .await
    }

    /// Write only the `part` properties of `data` to the rows matching `query`.
    pub async fn update_part_query(
        &self,
        part: &[&str],
        data: &(impl Serialize + Sync),
        query: &Query,
        ctx: Option<&TransactionContext>,
    ) -> Result<OperationResult, OrmError> {
        let table = &self.inner.table;
        let columns = self.part_columns(part);
        let sql = format!("update {} set {} ?", table.name, set_clause(&columns, table));
        self.inner
            .orm
            .get_update(sql, columns, Some(self.inner.target.clone()), &[1])
            .call(data, vec![query.into()], ctx)
            .await
    }

    pub async fn update_part_every_eq(
        &self,
        part: &[&str],
        data: &(impl Serialize + Sync),
        partial: &(impl Serialize + Sync),
        ctx: Option<&TransactionContext>,
    ) -> Result<OperationResult, OrmError> {
        let query = Query::new().every_eq(partial)?;
        self.update_part_query(part, data, &query, ctx).await
    }

    pub async fn update_part_some_eq(
        &self,
        part: &[&str],
        data: &(impl Serialize + Sync),
        partial: &(impl Serialize + Sync),
        ctx: Option<&TransactionContext>,
    ) -> Result<OperationResult, OrmError> {
        let query = Query::new().some_eq(partial)?;
        self.update_part_query(part, data, &query, ctx).await
    }

    // ---- delete ----

    pub async fn delete_by_primary_key(
        &self,
        key: impl Into<Value> + Send,
        force: bool,
        ctx: Option<&TransactionContext>,
    ) -> Result<DeleteResult, OrmError> {
        let query = Query::new().eq(self.primary_key()?.property.clone(), key);
        self.delete_query(query, force, ctx).await
    }

    /// Delete the rows matching `query` and, first, their CASCADE dependents.
    ///
    /// Runs in one transaction, joining `ctx` when given. When dependents
    /// exist and `force` is false the transaction is rolled back and an
    /// unsuccessful result describing them is returned.
    ///
    /// With a caller's `ctx` that rollback undoes everything issued on `ctx`
    /// so far, not just this delete, and statements issued on `ctx`
    /// afterwards run without a transaction. Callers that continue after an
    /// unsuccessful result should end `ctx` and start a new one.
    pub async fn delete_query(
        &self,
        query: Query,
        force: bool,
        ctx: Option<&TransactionContext>,
    ) -> Result<DeleteResult, OrmError> {
        self.delete_visiting(query, force, &CascadeVisited::new(), ctx)
            .await
    }

    async fn delete_visiting(
        &self,
        query: Query,
        force: bool,
        visited: &CascadeVisited,
        ctx: Option<&TransactionContext>,
    ) -> Result<DeleteResult, OrmError> {
        let dao = self.clone();
        self.inner
            .orm
            .transaction("deleteQuery", ctx, |tx| async move {
                dao.delete_in(query, force, visited, &tx).await
            })
            .await
    }

    pub async fn delete_every_eq(
        &self,
        partial: &(impl Serialize + Sync),
        force: bool,
        ctx: Option<&TransactionContext>,
    ) -> Result<DeleteResult, OrmError> {
        let query = Query::new().every_eq(partial)?;
        self.delete_query(query, force, ctx).await
    }

    pub async fn delete_some_eq(
        &self,
        partial: &(impl Serialize + Sync),
        force: bool,
        ctx: Option<&TransactionContext>,
    ) -> Result<DeleteResult, OrmError> {
        let query = Query::new().some_eq(partial)?;
        self.delete_query(query, force, ctx).await
    }

    async fn delete_in(
        &self,
        mut query: Query,
        force: bool,
        visited: &CascadeVisited,
        tx: &TransactionContext,
    ) -> Result<DeleteResult, OrmError> {
        let orm = &self.inner.orm;
        let table = &self.inner.table;
        let relatives = orm.relatives(&table.name);

        let mut relations: Vec<RelationCount> = Vec::new();
        if !relatives.is_empty() {
            let doomed = self.doomed_rows(&query, tx).await?;
            let total = doomed.len();
            let rows = doomed
                .into_iter()
                .filter(|row| visited.claim(&table.name, self.row_key(row)))
                .collect::<Vec<_>>();
            if rows.len() < total {
                if rows.is_empty() {
                    debug!(table = %table.name, "rows already claimed by this cascade, skipped");
                    return Ok(DeleteResult {
                        success: true,
                        count: 0,
                        relations,
                    });
                }
                if let Some(narrowed) = self.key_scope(&rows) {
                    query = narrowed;
                }
            }
            for relative in relatives {
                let mut values: Vec<Value> = Vec::new();
                for row in &rows {
                    if let Some(v) = row.get(&relative.target_column).filter(|v| !v.is_null()) {
                        let v = Value::from_json(v.clone());
                        if !values.contains(&v) {
                            values.push(v);
                        }
                    }
                }
                if values.is_empty() {
                    continue;
                }
                let Ok(dependent) = orm.delete_operation(&delete_query_id(&relative.source_entity))
                else {
                    debug!(table = %relative.source_table, "no delete registered for dependent, skipped");
                    continue;
                };

                let scope = if values.len() == 1 {
                    Query::new().eq(relative.source_property.clone(), values.remove(0))
                } else {
                    Query::new().r#in(relative.source_property.clone(), values)
                };
                let result = dependent
                    .cascade_delete(scope, force, visited, Some(tx))
                    .await?;
                if !result.success {
                    relations.push(RelationCount {
                        table: relative.source_table.clone(),
                        count: result.count,
                    });
                    relations.extend(result.relations);
                    return Ok(DeleteResult {
                        success: false,
                        count: 0,
                        relations,
                    });
                }
                if result.count > 0 {
                    relations.push(RelationCount {
                        table: relative.source_table.clone(),
                        count: result.count,
                    });
                }
                relations.extend(result.relations);
            }
        }

        let local = self.local_delete(query, tx).await?;

        if !force && relations.iter().any(|r| r.count > 0) {
            tx.rollback("deleteQuery").await?;
            return Ok(DeleteResult {
                success: false,
                count: local.affected_rows,
                relations,
            });
        }

        Ok(DeleteResult {
            success: local.success,
            count: local.affected_rows,
            relations,
        })
    }

    /// Identity of a row within its table: the primary key value, or the
    /// whole row when the table has none.
    fn row_key(&self, row: &crate::Row) -> String {
        match self
            .inner
            .primary_key
            .as_ref()
            .and_then(|pk| row.get(&pk.column))
        {
            Some(key) => key.to_string(),
            None => serde_json::Value::Object(row.clone()).to_string(),
        }
    }

    /// A query selecting exactly `rows` by primary key.
    fn key_scope(&self, rows: &[crate::Row]) -> Option<Query> {
        let pk = self.inner.primary_key.as_ref()?;
        let mut keys = rows
            .iter()
            .filter_map(|row| row.get(&pk.column))
            .map(|v| Value::from_json(v.clone()))
            .collect::<Vec<_>>();
        Some(if keys.len() == 1 {
            Query::new().eq(pk.property.clone(), keys.remove(0))
        } else {
            Query::new().r#in(pk.property.clone(), keys)
        })
    }

    async fn doomed_rows(
        &self,
        query: &Query,
        tx: &TransactionContext,
    ) -> Result<Vec<crate::Row>, OrmError> {
        let target = &self.inner.target;
        let sql = format(
            &format!("select * from {} ?", self.inner.table.name),
            &[Param::Raw(query.to_sql_string(&target.mapping, target.soft_delete))],
        );
        Ok(self.inner.orm.execute(&sql, Some(tx)).await?.rows)
    }

    async fn local_delete(
        &self,
        query: Query,
        tx: &TransactionContext,
    ) -> Result<OperationResult, OrmError> {
        let table = &self.inner.table;
        if !table.soft_delete {
            return self.inner.delete_query.call(vec![query.into()], Some(tx)).await;
        }
        let sets = table
            .columns
            .iter()
            .filter_map(|c| {
                c.delete_value
                    .as_ref()
                    .map(|d| format!("{} = {}", c.name, escape(&d.resolve())))
            })
            .collect::<Vec<_>>()
            .join(",");
        self.inner
            .orm
            .get_delete(
                format!("update {} set {} ?", table.name, sets),
                Some(self.inner.target.clone()),
                &[0],
                None,
            )
            .call(vec![query.into()], Some(tx))
            .await
    }

    pub fn entity_name(&self) -> &str {
        &self.inner.entity
    }
}

#[async_trait]
impl<T: Entity> DeleteOperation for Dao<T> {
    async fn cascade_delete(
        &self,
        query: Query,
        force: bool,
        visited: &CascadeVisited,
        ctx: Option<&TransactionContext>,
    ) -> Result<DeleteResult, OrmError> {
        self.delete_visiting(query, force, visited, ctx).await
    }
}
