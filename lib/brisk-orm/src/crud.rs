//! CRUD operation factory.
//!
//! Each factory method binds a statement template to an entity mapping and
//! returns an operation object. Calls take positional [`Param`]s and an
//! optional [`TransactionContext`]. A [`Param::Query`] argument is compiled
//! against the bound mapping; a literal at one of the raw positions is
//! spliced unescaped.
//!
//! Selects hydrate rows into JSON objects keyed by property name. Relation
//! properties are resolved through selects registered by id, down to a
//! caller-bounded depth.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::error;

use crate::escape::format;
use crate::{
    ColumnDescriptor, ColumnType, EntityMapping, GeometryPoint, MappingTarget, Orm, OrmError,
    Param, Query, QueryOutput, Row, TransactionContext, Value,
};

/// Relation levels resolved by a select unless the caller says otherwise.
pub const DEFAULT_RELATION_DEPTH: u32 = 2;

/// Mapping and soft-delete flag of the entity an operation works on.
#[derive(Debug, Clone)]
pub struct EntityTarget {
    pub mapping: Arc<EntityMapping>,
    pub soft_delete: bool,
}

impl EntityTarget {
    pub fn new(mapping: EntityMapping, soft_delete: bool) -> Self {
        Self {
            mapping: Arc::new(mapping),
            soft_delete,
        }
    }
}

/// Shape of a select result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultOption {
    pub is_list: bool,
    pub is_count: bool,
    pub aggregation: bool,
    pub depth: u32,
}

impl Default for ResultOption {
    fn default() -> Self {
        Self {
            is_list: false,
            is_count: false,
            aggregation: false,
            depth: DEFAULT_RELATION_DEPTH,
        }
    }
}

impl ResultOption {
    pub fn list() -> Self {
        Self {
            is_list: true,
            ..Self::default()
        }
    }

    pub fn count() -> Self {
        Self {
            is_count: true,
            ..Self::default()
        }
    }

    pub fn aggregation() -> Self {
        Self {
            aggregation: true,
            ..Self::default()
        }
    }

    pub fn depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }
}

/// Result of a select.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Scalar(serde_json::Value),
    One(Option<serde_json::Value>),
    List(Vec<serde_json::Value>),
}

impl Selection {
    pub fn into_one<T: DeserializeOwned>(self) -> Result<Option<T>, OrmError> {
        let value = match self {
            Selection::Scalar(v) => Some(v),
            Selection::One(v) => v,
            Selection::List(vs) => vs.into_iter().next(),
        };
        value.map(deserialize).transpose()
    }

    pub fn into_list<T: DeserializeOwned>(self) -> Result<Vec<T>, OrmError> {
        let values = match self {
            Selection::Scalar(v) => vec![v],
            Selection::One(v) => v.into_iter().collect(),
            Selection::List(vs) => vs,
        };
        values.into_iter().map(deserialize).collect()
    }

    /// Numeric scalar, e.g. a `count(*)`.
    pub fn into_count(self) -> u64 {
        match self {
            Selection::Scalar(v) | Selection::One(Some(v)) => match &v {
                serde_json::Value::Number(n) => n.as_u64().unwrap_or_default(),
                serde_json::Value::String(s) => s.parse().unwrap_or_default(),
                _ => 0,
            },
            Selection::One(None) => 0,
            Selection::List(vs) => vs.len() as u64,
        }
    }

    fn into_json(self) -> Option<serde_json::Value> {
        match self {
            Selection::Scalar(v) => (!v.is_null()).then_some(v),
            Selection::One(v) => v,
            Selection::List(vs) => Some(serde_json::Value::Array(vs)),
        }
    }
}

fn deserialize<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, OrmError> {
    serde_json::from_value(value).map_err(|e| OrmError::Deserialization(e.to_string()))
}

/// Outcome of an insert, update or delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationResult {
    /// The driver reported no field-count mismatch.
    pub success: bool,
    pub affected_rows: u64,
    pub insert_id: Option<u64>,
}

impl From<QueryOutput> for OperationResult {
    fn from(output: QueryOutput) -> Self {
        Self {
            success: output.is_success(),
            affected_rows: output.affected_rows,
            insert_id: output.last_insert_id,
        }
    }
}

/// Rows of a dependent table touched by a cascading delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationCount {
    pub table: String,
    pub count: u64,
}

/// Outcome of a delete that may cascade.
///
/// `success` is false when dependents exist and the delete was not forced;
/// the transaction was then rolled back and `relations` lists what would
/// have been removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteResult {
    pub success: bool,
    pub count: u64,
    pub relations: Vec<RelationCount>,
}

impl DeleteResult {
    /// Rows removed across dependent tables.
    pub fn relation_count(&self) -> u64 {
        self.relations.iter().map(|r| r.count).sum()
    }
}

impl From<OperationResult> for DeleteResult {
    fn from(result: OperationResult) -> Self {
        Self {
            success: result.success,
            count: result.affected_rows,
            relations: Vec::new(),
        }
    }
}

/// Rows already claimed by the cascading delete in progress, keyed by table
/// and row key.
///
/// A cascade that reaches a claimed row again leaves it to the level that
/// claimed it, so self-referencing and cyclic CASCADE keys terminate.
#[derive(Debug, Default)]
pub struct CascadeVisited {
    rows: Mutex<HashSet<(String, String)>>,
}

impl CascadeVisited {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a row. False when it was claimed before.
    pub fn claim(&self, table: &str, key: String) -> bool {
        self.rows.lock().insert((table.to_string(), key))
    }
}

/// A delete-by-query operation addressable by id.
#[async_trait]
pub trait DeleteOperation: Send + Sync {
    /// Delete the rows matching `query` as one step of a cascade, skipping
    /// rows already in `visited`.
    async fn cascade_delete(
        &self,
        query: Query,
        force: bool,
        visited: &CascadeVisited,
        ctx: Option<&TransactionContext>,
    ) -> Result<DeleteResult, OrmError>;
}

/// A column written from an entity property.
#[derive(Debug, Clone)]
pub struct ValueColumn {
    pub property: String,
    pub column_type: ColumnType,
    pub default: Option<Value>,
}

impl ValueColumn {
    /// Value columns for the property-backed columns in `columns`.
    pub fn from_columns<'a>(columns: impl IntoIterator<Item = &'a ColumnDescriptor>) -> Vec<Self> {
        columns
            .into_iter()
            .filter_map(|c| {
                c.property.as_ref().map(|property| ValueColumn {
                    property: property.clone(),
                    column_type: c.column_type,
                    default: c.default.clone(),
                })
            })
            .collect()
    }

    fn value(&self, data: &serde_json::Map<String, serde_json::Value>) -> Result<Value, OrmError> {
        let value = match data.get(&self.property) {
            None | Some(serde_json::Value::Null) => {
                return Ok(self.default.clone().unwrap_or(Value::Null));
            }
            Some(value) => value,
        };
        match self.column_type {
            ColumnType::Geometry => Ok(Value::Point(serde_json::from_value::<GeometryPoint>(
                value.clone(),
            )?)),
            ColumnType::Datetime => Ok(datetime_value(value)),
            _ => match value {
                serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                    Ok(Value::String(serde_json::to_string(value)?))
                }
                other => Ok(Value::from_json(other.clone())),
            },
        }
    }
}

fn datetime_value(value: &serde_json::Value) -> Value {
    if let Some(s) = value.as_str() {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Value::Datetime(dt.naive_utc());
        }
        if let Ok(dt) = s.parse::<NaiveDateTime>() {
            return Value::Datetime(dt);
        }
    }
    Value::from_json(value.clone())
}

fn entity_object<T: Serialize + ?Sized>(
    data: &T,
) -> Result<serde_json::Map<String, serde_json::Value>, OrmError> {
    match serde_json::to_value(data)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(OrmError::Validation(format!(
            "expected an entity object, got {}",
            other
        ))),
    }
}

fn row_values(
    data: &serde_json::Map<String, serde_json::Value>,
    columns: &[ValueColumn],
) -> Result<Vec<Value>, OrmError> {
    columns.iter().map(|c| c.value(data)).collect()
}

/// Resolve query and raw arguments into spliceable fragments.
fn prepare_args(
    args: Vec<Param>,
    raw_positions: &[usize],
    offset: usize,
    target: Option<&EntityTarget>,
) -> Vec<Param> {
    args.into_iter()
        .enumerate()
        .map(|(index, arg)| match arg {
            Param::Query(query) => Param::Raw(match target {
                Some(t) => query.to_sql_string(&t.mapping, t.soft_delete),
                None => query.to_sql_string(&EntityMapping::new(), false),
            }),
            Param::Literal(value) if raw_positions.contains(&(index + offset)) => {
                Param::Raw(value.to_raw_string())
            }
            other => other,
        })
        .collect()
}

pub struct SelectFn {
    orm: Orm,
    sql: String,
    target: Option<EntityTarget>,
    option: ResultOption,
    raw_positions: Vec<usize>,
}

impl SelectFn {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Run with the configured relation depth.
    pub async fn call(
        &self,
        args: Vec<Param>,
        ctx: Option<&TransactionContext>,
    ) -> Result<Selection, OrmError> {
        self.call_with_depth(args, ctx, self.option.depth).await
    }

    /// Run resolving relations `depth` levels deep.
    pub fn call_with_depth<'a>(
        &'a self,
        args: Vec<Param>,
        ctx: Option<&'a TransactionContext>,
        depth: u32,
    ) -> BoxFuture<'a, Result<Selection, OrmError>> {
        async move {
            self.run(args, ctx, depth)
                .await
                .inspect_err(|e| error!(error = %e, sql = %self.sql, "select error"))
        }
        .boxed()
    }

    async fn run(
        &self,
        args: Vec<Param>,
        ctx: Option<&TransactionContext>,
        depth: u32,
    ) -> Result<Selection, OrmError> {
        let params = prepare_args(args, &self.raw_positions, 0, self.target.as_ref());
        let sql = format(&self.sql, &params);
        let output = self.orm.execute(&sql, ctx).await?;

        if self.option.is_count {
            let count = output
                .rows
                .first()
                .and_then(|row| row.get("count(*)").or_else(|| row.values().next()))
                .cloned()
                .unwrap_or_else(|| serde_json::Value::from(0));
            return Ok(Selection::Scalar(count));
        }
        if self.option.aggregation {
            let value = output
                .rows
                .first()
                .and_then(|row| row.values().next())
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            return Ok(Selection::Scalar(value));
        }

        let rows: Vec<Row> = if self.option.is_list {
            output.rows
        } else {
            output.rows.into_iter().take(1).collect()
        };

        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            values.push(self.hydrate(row, ctx, depth).await?);
        }

        if self.option.is_list {
            Ok(Selection::List(values))
        } else {
            Ok(Selection::One(values.into_iter().next()))
        }
    }

    async fn hydrate(
        &self,
        row: Row,
        ctx: Option<&TransactionContext>,
        depth: u32,
    ) -> Result<serde_json::Value, OrmError> {
        let Some(target) = &self.target else {
            return Ok(serde_json::Value::Object(row));
        };

        let mut entity = serde_json::Map::new();
        for (property, mapping) in target.mapping.iter() {
            match mapping {
                MappingTarget::Column(column) => {
                    if let Some(value) = row.get(column).filter(|v| !v.is_null()) {
                        entity.insert(property.clone(), value.clone());
                    }
                }
                MappingTarget::Complex(complex) => {
                    if depth == 0 {
                        continue;
                    }
                    let Some(key) = row.get(&complex.source_column).filter(|v| !v.is_null())
                    else {
                        continue;
                    };
                    let key = Param::Literal(Value::from_json(key.clone()));
                    let args = match &complex.target_column {
                        Some(column) => vec![Param::Raw(column.clone()), key],
                        None => vec![key],
                    };
                    let select = self.orm.select_fn(&complex.select_id)?;
                    let related = select.call_with_depth(args, ctx, depth - 1).await?;
                    if let Some(value) = related.into_json() {
                        entity.insert(property.clone(), value);
                    }
                }
            }
        }
        Ok(serde_json::Value::Object(entity))
    }
}

pub struct InsertFn {
    orm: Orm,
    sql: String,
    columns: Vec<ValueColumn>,
}

impl InsertFn {
    pub async fn call<T: Serialize + Sync>(
        &self,
        item: &T,
        ctx: Option<&TransactionContext>,
    ) -> Result<OperationResult, OrmError> {
        self.call_all(std::slice::from_ref(item), ctx).await
    }

    /// Insert every item with one multi-row statement.
    pub async fn call_all<T: Serialize + Sync>(
        &self,
        items: &[T],
        ctx: Option<&TransactionContext>,
    ) -> Result<OperationResult, OrmError> {
        if items.is_empty() {
            return Ok(OperationResult {
                success: true,
                ..Default::default()
            });
        }
        let rows = items
            .iter()
            .map(|item| row_values(&entity_object(item)?, &self.columns).map(Value::List))
            .collect::<Result<Vec<_>, OrmError>>()
            .inspect_err(|e| error!(error = %e, "insert error"))?;

        let sql = format(&self.sql, &[Param::Literal(Value::List(rows))]);
        self.orm
            .execute(&sql, ctx)
            .await
            .map(OperationResult::from)
            .inspect_err(|e| error!(error = %e, sql = %self.sql, "insert error"))
    }
}

pub struct UpdateFn {
    orm: Orm,
    sql: String,
    columns: Vec<ValueColumn>,
    target: Option<EntityTarget>,
    raw_positions: Vec<usize>,
}

impl UpdateFn {
    /// Bind the columns' values from `data`, then the remaining `args`.
    ///
    /// Raw positions count `data` as position 0.
    pub async fn call<T: Serialize + Sync + ?Sized>(
        &self,
        data: &T,
        args: Vec<Param>,
        ctx: Option<&TransactionContext>,
    ) -> Result<OperationResult, OrmError> {
        let values = entity_object(data)
            .and_then(|object| row_values(&object, &self.columns))
            .inspect_err(|e| error!(error = %e, "update error"))?;

        let mut params: Vec<Param> = values.into_iter().map(Param::Literal).collect();
        params.extend(prepare_args(args, &self.raw_positions, 1, self.target.as_ref()));

        let sql = format(&self.sql, &params);
        self.orm
            .execute(&sql, ctx)
            .await
            .map(OperationResult::from)
            .inspect_err(|e| error!(error = %e, sql = %self.sql, "update error"))
    }
}

pub struct DeleteFn {
    orm: Orm,
    sql: String,
    target: Option<EntityTarget>,
    raw_positions: Vec<usize>,
}

impl DeleteFn {
    pub async fn call(
        &self,
        args: Vec<Param>,
        ctx: Option<&TransactionContext>,
    ) -> Result<OperationResult, OrmError> {
        let params = prepare_args(args, &self.raw_positions, 0, self.target.as_ref());
        let sql = format(&self.sql, &params);
        self.orm
            .execute(&sql, ctx)
            .await
            .map(OperationResult::from)
            .inspect_err(|e| error!(error = %e, sql = %self.sql, "delete error"))
    }
}

/// A plain registered delete has no dependents of its own, so `force` and
/// `visited` have nothing to act on: the statement always runs.
#[async_trait]
impl DeleteOperation for DeleteFn {
    async fn cascade_delete(
        &self,
        query: Query,
        _force: bool,
        _visited: &CascadeVisited,
        ctx: Option<&TransactionContext>,
    ) -> Result<DeleteResult, OrmError> {
        self.call(vec![query.into()], ctx).await.map(DeleteResult::from)
    }
}

impl Orm {
    /// A select over `sql`. With an `id` it is registered for relation
    /// hydration and lookup through [`Orm::select_fn`].
    pub fn get_select(
        &self,
        sql: impl Into<String>,
        target: Option<EntityTarget>,
        option: ResultOption,
        id: Option<&str>,
        raw_positions: &[usize],
    ) -> Arc<SelectFn> {
        let select = Arc::new(SelectFn {
            orm: self.clone(),
            sql: sql.into(),
            target,
            option,
            raw_positions: raw_positions.to_vec(),
        });
        if let Some(id) = id {
            self.register_select(id, select.clone());
        }
        select
    }

    /// An insert whose single `?` receives the rows built from `columns`.
    pub fn get_insert(&self, sql: impl Into<String>, columns: Vec<ValueColumn>) -> InsertFn {
        InsertFn {
            orm: self.clone(),
            sql: sql.into(),
            columns,
        }
    }

    pub fn get_update(
        &self,
        sql: impl Into<String>,
        columns: Vec<ValueColumn>,
        target: Option<EntityTarget>,
        raw_positions: &[usize],
    ) -> UpdateFn {
        UpdateFn {
            orm: self.clone(),
            sql: sql.into(),
            columns,
            target,
            raw_positions: raw_positions.to_vec(),
        }
    }

    /// A delete over `sql`. With an `id` it is registered for cascades.
    pub fn get_delete(
        &self,
        sql: impl Into<String>,
        target: Option<EntityTarget>,
        raw_positions: &[usize],
        id: Option<&str>,
    ) -> Arc<DeleteFn> {
        let delete = Arc::new(DeleteFn {
            orm: self.clone(),
            sql: sql.into(),
            target,
            raw_positions: raw_positions.to_vec(),
        });
        if let Some(id) = id {
            self.register_delete(id, delete.clone());
        }
        delete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(v: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        v.as_object().cloned().unwrap()
    }

    fn column(property: &str, column_type: ColumnType) -> ValueColumn {
        ValueColumn {
            property: property.to_string(),
            column_type,
            default: None,
        }
    }

    #[test]
    fn missing_values_take_defaults() {
        let mut c = column("age", ColumnType::Int);
        c.default = Some(Value::Int(18));
        assert_eq!(c.value(&object(json!({}))).unwrap(), Value::Int(18));
        assert_eq!(
            column("age", ColumnType::Int).value(&object(json!({"age": null}))).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn objects_become_json_text() {
        let c = column("tags", ColumnType::Json);
        assert_eq!(
            c.value(&object(json!({"tags": ["a", "b"]}))).unwrap(),
            Value::String("[\"a\",\"b\"]".to_string())
        );
    }

    #[test]
    fn geometry_columns_keep_points() {
        let c = column("location", ColumnType::Geometry);
        let v = c
            .value(&object(json!({"location": {"longitude": 1.5, "latitude": 2.5}})))
            .unwrap();
        assert_eq!(v, Value::Point(GeometryPoint::new(1.5, 2.5)));
    }

    #[test]
    fn datetimes_parse_rfc3339() {
        let c = column("createdAt", ColumnType::Datetime);
        let v = c
            .value(&object(json!({"createdAt": "2024-01-02T03:04:05Z"})))
            .unwrap();
        assert!(matches!(v, Value::Datetime(_)));
        assert_eq!(crate::escape::escape(&v), "'2024-01-02 03:04:05.000'");
    }

    #[test]
    fn rows_are_claimed_once_per_table() {
        let visited = CascadeVisited::new();
        assert!(visited.claim("category", "1".to_string()));
        assert!(!visited.claim("category", "1".to_string()));
        assert!(visited.claim("post", "1".to_string()));
    }

    #[test]
    fn raw_positions_skip_escaping() {
        let args = prepare_args(
            vec![Param::from("name"), Param::from("bob")],
            &[0],
            0,
            None,
        );
        assert_eq!(format("where ? = ?", &args), "where name = 'bob'");
    }

    #[test]
    fn queries_compile_with_the_target_mapping() {
        let target = EntityTarget::new(EntityMapping::new().column("userName", "user_name"), true);
        let args = prepare_args(
            vec![Query::new().eq("userName", "bob").into()],
            &[],
            0,
            Some(&target),
        );
        assert_eq!(
            format("select * from user ?", &args),
            "select * from user  where _is_delete = 0 and (user_name = 'bob')"
        );
    }

    #[test]
    fn selections_convert() {
        let one = Selection::One(Some(json!({"a": 1})));
        let list: Vec<serde_json::Value> = one.into_list().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(Selection::Scalar(json!(7)).into_count(), 7);
        assert_eq!(Selection::One(None).into_one::<i64>().unwrap(), None);
    }
}
