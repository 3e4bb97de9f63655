//! Process-scoped state: pool, registries and hooks.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::escape::format;
use crate::{
    AutoSyncConfig, ConnectOptions, Connector, DeleteOperation, ForeignAction, OrmError, Param,
    QueryExecutor, QueryOutput, SelectFn, TableDescriptor, TransactionContext, TypeDescriptor,
};

pub type HookFuture = BoxFuture<'static, Result<(), OrmError>>;
type HookHandler = Arc<dyn Fn(Orm) -> HookFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPosition {
    BeforeConn,
    AfterConn,
}

struct Hook {
    position: HookPosition,
    priority: i32,
    handler: HookHandler,
}

enum PoolState {
    Pending,
    Open(Arc<dyn QueryExecutor>),
    Closed,
}

/// A table whose CASCADE foreign key points at another table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelativeTable {
    pub source_entity: String,
    pub source_table: String,
    /// Foreign-key property of the source entity.
    pub source_property: String,
    pub target_property: String,
    pub target_column: String,
}

struct OrmInner {
    connector: Arc<dyn Connector>,
    pool: RwLock<PoolState>,
    types: RwLock<HashMap<String, TypeDescriptor>>,
    tables: RwLock<HashMap<String, Arc<TableDescriptor>>>,
    selects: RwLock<HashMap<String, Arc<SelectFn>>>,
    deletes: RwLock<HashMap<String, Arc<dyn DeleteOperation>>>,
    relatives: RwLock<HashMap<String, Vec<RelativeTable>>>,
    hooks: RwLock<Vec<Hook>>,
    auto_sync: RwLock<AutoSyncConfig>,
    expect_tables: RwLock<Vec<String>>,
}

/// Handle to the persistence runtime. Cheap to clone.
///
/// Registries are populated while entities and Daos are registered and are
/// only read afterwards. Locks are never held across an await point.
#[derive(Clone)]
pub struct Orm {
    inner: Arc<OrmInner>,
}

impl std::fmt::Debug for Orm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orm").finish_non_exhaustive()
    }
}

impl Orm {
    /// Create a runtime that opens its pool through `connector`.
    ///
    /// The schema synchronizer is installed as the priority-0 after-connect
    /// hook; it only runs when [`AutoSyncConfig::enable`] is set.
    pub fn new(connector: impl Connector + 'static) -> Self {
        let orm = Self {
            inner: Arc::new(OrmInner {
                connector: Arc::new(connector),
                pool: RwLock::new(PoolState::Pending),
                types: RwLock::new(HashMap::new()),
                tables: RwLock::new(HashMap::new()),
                selects: RwLock::new(HashMap::new()),
                deletes: RwLock::new(HashMap::new()),
                relatives: RwLock::new(HashMap::new()),
                hooks: RwLock::new(Vec::new()),
                auto_sync: RwLock::new(AutoSyncConfig::default()),
                expect_tables: RwLock::new(Vec::new()),
            }),
        };
        orm.add_hook(HookPosition::AfterConn, 0, |orm: Orm| async move {
            if orm.auto_sync_config().enable {
                orm.auto_sync(None).await?;
            }
            Ok(())
        });
        orm
    }

    // ---- lifecycle ----

    /// Run before-connect hooks, create the pool, then run after-connect hooks.
    pub async fn connect(&self, options: ConnectOptions) -> Result<(), OrmError> {
        match &*self.inner.pool.read() {
            PoolState::Pending => {}
            PoolState::Open(_) => return Err(OrmError::Connection("already connected".into())),
            PoolState::Closed => return Err(OrmError::PoolClosed),
        }
        *self.inner.auto_sync.write() = options.auto_sync.clone();

        self.run_hooks(HookPosition::BeforeConn).await?;

        let pool = self
            .inner
            .connector
            .create_pool(&options)
            .await
            .inspect_err(|e| error!(error = %e, "create pool error"))?;
        *self.inner.pool.write() = PoolState::Open(pool);
        info!(max_connections = options.max_connections, "connection pool created");

        self.run_hooks(HookPosition::AfterConn).await
    }

    /// Close the pool. Every later operation fails with [`OrmError::PoolClosed`].
    pub async fn destroy(&self) -> Result<(), OrmError> {
        let state = std::mem::replace(&mut *self.inner.pool.write(), PoolState::Closed);
        self.inner.selects.write().clear();
        self.inner.deletes.write().clear();
        self.inner.hooks.write().clear();
        match state {
            PoolState::Open(pool) => {
                info!("connection pool closed");
                pool.close().await
            }
            PoolState::Pending | PoolState::Closed => Ok(()),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(&*self.inner.pool.read(), PoolState::Open(_))
    }

    pub(crate) fn pool(&self) -> Result<Arc<dyn QueryExecutor>, OrmError> {
        match &*self.inner.pool.read() {
            PoolState::Pending => Err(OrmError::NotConnected),
            PoolState::Open(pool) => Ok(pool.clone()),
            PoolState::Closed => Err(OrmError::PoolClosed),
        }
    }

    // ---- hooks ----

    /// Register a connect hook. Hooks of one position run sequentially in
    /// ascending priority; equal priorities keep registration order.
    pub fn add_hook<F, Fut>(&self, position: HookPosition, priority: i32, handler: F)
    where
        F: Fn(Orm) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), OrmError>> + Send + 'static,
    {
        let handler: HookHandler = Arc::new(move |orm| handler(orm).boxed());
        self.inner.hooks.write().push(Hook {
            position,
            priority,
            handler,
        });
    }

    async fn run_hooks(&self, position: HookPosition) -> Result<(), OrmError> {
        let mut hooks: Vec<(i32, HookHandler)> = self
            .inner
            .hooks
            .read()
            .iter()
            .filter(|h| h.position == position)
            .map(|h| (h.priority, h.handler.clone()))
            .collect();
        hooks.sort_by_key(|(priority, _)| *priority);

        for (priority, handler) in hooks {
            debug!(?position, priority, "running hook");
            handler(self.clone())
                .await
                .inspect_err(|e| error!(error = %e, ?position, priority, "hook error"))?;
        }
        Ok(())
    }

    // ---- statements ----

    /// Format `sql` with `params` and run it, on `ctx` when given.
    pub async fn query(
        &self,
        sql: &str,
        params: &[Param],
        ctx: Option<&TransactionContext>,
    ) -> Result<QueryOutput, OrmError> {
        let sql = format(sql, params);
        self.execute(&sql, ctx)
            .await
            .inspect_err(|e| error!(error = %e, "query error"))
    }

    /// Run an already formatted statement.
    pub async fn execute(
        &self,
        sql: &str,
        ctx: Option<&TransactionContext>,
    ) -> Result<QueryOutput, OrmError> {
        debug!(sql, "execute");
        match ctx {
            Some(ctx) => ctx.query(sql).await,
            None => self.pool()?.query(sql).await,
        }
    }

    // ---- transactions ----

    /// Reserve a connection and begin a transaction on it.
    pub async fn start_transaction(&self) -> Result<TransactionContext, OrmError> {
        let pool = self.pool()?;
        TransactionContext::start(&pool).await
    }

    /// Run `handler` inside a transaction.
    ///
    /// With a `parent` the handler joins it and the parent's owner decides
    /// the outcome. Otherwise a new transaction is committed on success or
    /// rolled back under `name` on failure, and always ended.
    pub async fn transaction<R, F, Fut>(
        &self,
        name: &str,
        parent: Option<&TransactionContext>,
        handler: F,
    ) -> Result<R, OrmError>
    where
        F: FnOnce(TransactionContext) -> Fut,
        Fut: Future<Output = Result<R, OrmError>>,
    {
        if let Some(parent) = parent {
            return handler(parent.clone()).await;
        }

        let ctx = self.start_transaction().await?;
        let result = match handler(ctx.clone()).await {
            Ok(value) => ctx.commit().await.map(|()| value),
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            error!(transaction = name, error = %e, "transaction error");
            if let Err(rollback) = ctx.rollback(name).await {
                error!(transaction = name, error = %rollback, "rollback error");
            }
        }

        match (result, ctx.end().await) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(end)) => Err(end),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(end)) => {
                warn!(transaction = name, error = %end, "end after failure");
                Err(e)
            }
        }
    }

    // ---- metadata registry ----

    /// Register an entity type and derive its table, if it declares one.
    ///
    /// Tables of already registered entities whose foreign keys point at
    /// this type are derived again so registration order does not matter.
    pub fn register_entity(&self, ty: TypeDescriptor) -> Option<Arc<TableDescriptor>> {
        let name = ty.name.clone();
        self.inner.types.write().insert(name.clone(), ty.clone());
        let table = self.derive_table(&ty);

        let dependents: Vec<TypeDescriptor> = self
            .inner
            .types
            .read()
            .values()
            .filter(|t| {
                t.name != name
                    && t.column_properties().any(|(_, c)| {
                        c.foreign_key
                            .as_ref()
                            .is_some_and(|fk| fk.target_entity == name)
                    })
            })
            .cloned()
            .collect();
        for dependent in &dependents {
            self.derive_table(dependent);
        }

        table
    }

    fn derive_table(&self, ty: &TypeDescriptor) -> Option<Arc<TableDescriptor>> {
        let resolve = |name: &str| self.inner.types.read().get(name).cloned();
        let table = Arc::new(TableDescriptor::from_type(ty, &resolve)?);
        self.inner
            .tables
            .write()
            .insert(table.name.clone(), table.clone());

        for (property, column) in ty.column_properties() {
            let (Some(fk_ref), Some(fk)) =
                (&column.foreign_key, table.foreign_keys.get(&column.db_name))
            else {
                continue;
            };
            if fk.action != ForeignAction::Cascade {
                continue;
            }
            self.add_relative(
                &fk.target_table,
                RelativeTable {
                    source_entity: ty.name.clone(),
                    source_table: table.name.clone(),
                    source_property: property.key.clone(),
                    target_property: fk_ref.target_property.clone(),
                    target_column: fk.target_column.clone(),
                },
            );
        }

        debug!(table = %table.name, entity = %ty.name, "table registered");
        Some(table)
    }

    fn add_relative(&self, target_table: &str, relative: RelativeTable) {
        let mut relatives = self.inner.relatives.write();
        let edges = relatives.entry(target_table.to_string()).or_default();
        if !edges.iter().any(|e| {
            e.source_table == relative.source_table && e.source_property == relative.source_property
        }) {
            edges.push(relative);
        }
    }

    pub fn type_descriptor(&self, entity: &str) -> Option<TypeDescriptor> {
        self.inner.types.read().get(entity).cloned()
    }

    pub fn table(&self, table_name: &str) -> Option<Arc<TableDescriptor>> {
        self.inner.tables.read().get(table_name).cloned()
    }

    pub fn table_for_entity(&self, entity: &str) -> Option<Arc<TableDescriptor>> {
        let table_name = self.type_descriptor(entity)?.table_name()?.to_string();
        self.table(&table_name)
    }

    /// Every registered table, ordered by name.
    pub fn tables(&self) -> Vec<Arc<TableDescriptor>> {
        let mut tables: Vec<_> = self.inner.tables.read().values().cloned().collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        tables
    }

    /// Tables holding a CASCADE foreign key into `target_table`.
    pub fn relatives(&self, target_table: &str) -> Vec<RelativeTable> {
        self.inner
            .relatives
            .read()
            .get(target_table)
            .cloned()
            .unwrap_or_default()
    }

    // ---- operation registry ----

    pub fn register_select(&self, id: impl Into<String>, select: Arc<SelectFn>) {
        self.inner.selects.write().insert(id.into(), select);
    }

    pub fn select_fn(&self, id: &str) -> Result<Arc<SelectFn>, OrmError> {
        self.inner
            .selects
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| OrmError::NotRegistered(format!("select {}", id)))
    }

    pub fn register_delete(&self, id: impl Into<String>, delete: Arc<dyn DeleteOperation>) {
        self.inner.deletes.write().insert(id.into(), delete);
    }

    pub fn delete_operation(&self, id: &str) -> Result<Arc<dyn DeleteOperation>, OrmError> {
        self.inner
            .deletes
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| OrmError::NotRegistered(format!("delete {}", id)))
    }

    // ---- auto sync configuration ----

    /// Effective synchronizer configuration, including global exclusions.
    pub fn auto_sync_config(&self) -> AutoSyncConfig {
        let mut config = self.inner.auto_sync.read().clone();
        for table in self.inner.expect_tables.read().iter() {
            if !config.expect_tables.contains(table) {
                config.expect_tables.push(table.clone());
            }
        }
        config
    }

    /// Replace the global exclusion list.
    pub fn set_global_auto_sync_expect<I, S>(&self, tables: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.inner.expect_tables.write() = tables.into_iter().map(Into::into).collect();
    }

    /// Extend the global exclusion list.
    pub fn add_global_auto_sync_expect<I, S>(&self, tables: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner
            .expect_tables
            .write()
            .extend(tables.into_iter().map(Into::into));
    }
}
