//! Condition tree compiler.
//!
//! A [`Query`] is an ordered list of conditions, connectors and nested
//! sub-queries built fluently at the call site and compiled to a SQL fragment
//! (`where`, `group by`, `order by`) against an [`EntityMapping`].
//!
//! Conditions with a null operand are dropped, so optional filters can be
//! chained without branching:
//!
//! ```
//! use brisk_orm::{EntityMapping, Query};
//!
//! let name: Option<&str> = None;
//! let query = Query::new().eq("age", 3).eq("name", name);
//! assert_eq!(query.to_where_sql_string(&EntityMapping::new()), "age = 3");
//! ```

use serde::Serialize;

use crate::escape::escape;
use crate::metadata::SOFT_DELETE_COLUMN;
use crate::{EntityMapping, OrmError, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Between,
    NotBetween,
    Like,
    NotLike,
    LikeLeft,
    LikeRight,
    NotLikeLeft,
    NotLikeRight,
    IsNull,
    IsNotNull,
    In,
    NotIn,
    JsonContains,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Connector {
    And,
    Or,
}

impl Connector {
    fn as_str(&self) -> &'static str {
        match self {
            Connector::And => "and",
            Connector::Or => "or",
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl Order {
    fn as_str(&self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone)]
struct Condition {
    field: String,
    operator: Operator,
    value: Value,
    value2: Value,
}

#[derive(Debug, Clone)]
enum Item {
    Condition(Condition),
    Connector(Connector),
    Sub(Query),
}

/// A condition tree plus grouping and ordering.
#[derive(Debug, Clone, Default)]
pub struct Query {
    items: Vec<Item>,
    group_by: Vec<String>,
    order_by: Vec<String>,
    order: Order,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, field: String, operator: Operator, value: Value, value2: Value) -> Self {
        self.items.push(Item::Condition(Condition {
            field,
            operator,
            value,
            value2,
        }));
        self.items.push(Item::Connector(Connector::And));
        self
    }

    fn one(self, field: impl Into<String>, value: impl Into<Value>, operator: Operator) -> Self {
        let value = value.into();
        if value.is_null() {
            return self;
        }
        self.push(field.into(), operator, value, Value::Null)
    }

    fn two(
        self,
        field: impl Into<String>,
        value: impl Into<Value>,
        value2: impl Into<Value>,
        operator: Operator,
    ) -> Self {
        let (value, value2) = (value.into(), value2.into());
        if value.is_null() || value2.is_null() {
            return self;
        }
        self.push(field.into(), operator, value, value2)
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.one(field, value, Operator::Eq)
    }

    pub fn ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.one(field, value, Operator::Ne)
    }

    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.one(field, value, Operator::Gt)
    }

    pub fn ge(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.one(field, value, Operator::Ge)
    }

    pub fn lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.one(field, value, Operator::Lt)
    }

    pub fn le(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.one(field, value, Operator::Le)
    }

    pub fn between(
        self,
        field: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.two(field, low, high, Operator::Between)
    }

    pub fn not_between(
        self,
        field: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.two(field, low, high, Operator::NotBetween)
    }

    /// `like binary '%value%'`
    pub fn like(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.one(field, value, Operator::Like)
    }

    pub fn not_like(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.one(field, value, Operator::NotLike)
    }

    /// `like binary '%value'`
    pub fn like_left(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.one(field, value, Operator::LikeLeft)
    }

    /// `like binary 'value%'`
    pub fn like_right(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.one(field, value, Operator::LikeRight)
    }

    pub fn not_like_left(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.one(field, value, Operator::NotLikeLeft)
    }

    pub fn not_like_right(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.one(field, value, Operator::NotLikeRight)
    }

    pub fn is_null(self, field: impl Into<String>) -> Self {
        self.push(field.into(), Operator::IsNull, Value::Null, Value::Null)
    }

    pub fn is_not_null(self, field: impl Into<String>) -> Self {
        self.push(field.into(), Operator::IsNotNull, Value::Null, Value::Null)
    }

    pub fn r#in(self, field: impl Into<String>, values: impl Into<Value>) -> Self {
        self.one(field, values, Operator::In)
    }

    pub fn not_in(self, field: impl Into<String>, values: impl Into<Value>) -> Self {
        self.one(field, values, Operator::NotIn)
    }

    /// `json_contains(field, value)` with `value` JSON-encoded.
    pub fn includes(self, field: impl Into<String>, value: serde_json::Value) -> Self {
        if value.is_null() {
            return self;
        }
        self.push(
            field.into(),
            Operator::JsonContains,
            Value::String(value.to_string()),
            Value::Null,
        )
    }

    /// Append a parenthesized sub-tree.
    pub fn nested(mut self, sub: impl FnOnce(Query) -> Query) -> Self {
        self.items.push(Item::Sub(sub(Query::new())));
        self.items.push(Item::Connector(Connector::And));
        self
    }

    fn connect(mut self, connector: Connector) -> Self {
        if matches!(self.items.last(), Some(Item::Connector(_))) {
            self.items.pop();
        }
        if !self.items.is_empty() {
            self.items.push(Item::Connector(connector));
        }
        self
    }

    /// Join the next condition with `or`.
    pub fn or(self) -> Self {
        self.connect(Connector::Or)
    }

    /// Join the next condition with `and`.
    pub fn and(self) -> Self {
        self.connect(Connector::And)
    }

    /// `or (sub)`
    pub fn or_nested(self, sub: impl FnOnce(Query) -> Query) -> Self {
        self.or().nested(sub)
    }

    /// `and (sub)`
    pub fn and_nested(self, sub: impl FnOnce(Query) -> Query) -> Self {
        self.and().nested(sub)
    }

    /// `(a = .. and b = ..)` over the non-null fields of `partial`.
    pub fn every_eq(self, partial: &impl Serialize) -> Result<Self, OrmError> {
        let fields = object_fields(partial)?;
        Ok(self.nested(|sub| {
            fields
                .into_iter()
                .fold(sub, |q, (key, value)| q.eq(key, value))
        }))
    }

    /// `(a = .. or b = ..)` over the non-null fields of `partial`.
    pub fn some_eq(self, partial: &impl Serialize) -> Result<Self, OrmError> {
        let fields = object_fields(partial)?;
        Ok(self.nested(|sub| {
            fields
                .into_iter()
                .fold(sub, |q, (key, value)| q.or().eq(key, value))
        }))
    }

    pub fn group_by<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for field in fields {
            let field = field.into();
            if !self.group_by.contains(&field) {
                self.group_by.push(field);
            }
        }
        self
    }

    /// Order by `fields`; the direction applies to every ordered field.
    pub fn order_by<I, S>(mut self, order: Order, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.order = order;
        for field in fields {
            let field = field.into();
            if !self.order_by.contains(&field) {
                self.order_by.push(field);
            }
        }
        self
    }

    /// True when no condition would be emitted.
    pub fn is_empty(&self) -> bool {
        self.to_where_sql_string(&EntityMapping::new()).is_empty()
    }

    /// The full clause: ` where ..`, ` group by ..`, ` order by ..`.
    ///
    /// With `soft_delete` the condition is scoped to live rows.
    pub fn to_sql_string(&self, mapping: &EntityMapping, soft_delete: bool) -> String {
        let mut sql = String::new();

        let mut conditions = self.to_where_sql_string(mapping);
        if soft_delete {
            conditions = if conditions.is_empty() {
                format!("{} = 0", SOFT_DELETE_COLUMN)
            } else {
                format!("{} = 0 and ({})", SOFT_DELETE_COLUMN, conditions)
            };
        }
        if !conditions.is_empty() {
            sql.push_str(" where ");
            sql.push_str(&conditions);
        }

        if !self.group_by.is_empty() {
            let keys: Vec<&str> = self
                .group_by
                .iter()
                .map(|k| mapping.column_name(k))
                .collect();
            sql.push_str(" group by ");
            sql.push_str(&keys.join(","));
        }

        if !self.order_by.is_empty() {
            let keys: Vec<String> = self
                .order_by
                .iter()
                .map(|k| format!("{} {}", mapping.column_name(k), self.order.as_str()))
                .collect();
            sql.push_str(" order by ");
            sql.push_str(&keys.join(","));
        }

        sql
    }

    /// The bare condition, without the `where` keyword.
    pub fn to_where_sql_string(&self, mapping: &EntityMapping) -> String {
        let mut sql = String::new();
        let mut connector = Connector::And;

        for item in &self.items {
            let fragment = match item {
                Item::Connector(c) => {
                    connector = *c;
                    continue;
                }
                Item::Condition(condition) => condition_sql(condition, mapping),
                Item::Sub(sub) => {
                    let inner = sub.to_where_sql_string(mapping);
                    if inner.is_empty() {
                        continue;
                    }
                    format!("({})", inner)
                }
            };
            if !sql.is_empty() {
                sql.push(' ');
                sql.push_str(connector.as_str());
                sql.push(' ');
            }
            sql.push_str(&fragment);
            connector = Connector::And;
        }

        sql
    }
}

fn object_fields(partial: &impl Serialize) -> Result<Vec<(String, Value)>, OrmError> {
    match serde_json::to_value(partial)? {
        serde_json::Value::Object(map) => Ok(map
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k, Value::from_json(v)))
            .collect()),
        serde_json::Value::Null => Ok(Vec::new()),
        other => Err(OrmError::Validation(format!(
            "expected an object of fields, got {}",
            other
        ))),
    }
}

fn like_pattern(value: &Value, left: bool, right: bool) -> String {
    let text = value.to_raw_string();
    let pattern = format!(
        "{}{}{}",
        if left { "%" } else { "" },
        text,
        if right { "%" } else { "" }
    );
    escape(&Value::String(pattern))
}

fn list_sql(value: &Value) -> Option<String> {
    match value {
        Value::List(items) if items.is_empty() => None,
        other => Some(escape(other)),
    }
}

fn condition_sql(condition: &Condition, mapping: &EntityMapping) -> String {
    let column = mapping.column_name(&condition.field);
    let (v1, v2) = (&condition.value, &condition.value2);
    match condition.operator {
        Operator::Eq => format!("{} = {}", column, escape(v1)),
        Operator::Ne => format!("{} <> {}", column, escape(v1)),
        Operator::Gt => format!("{} > {}", column, escape(v1)),
        Operator::Ge => format!("{} >= {}", column, escape(v1)),
        Operator::Lt => format!("{} < {}", column, escape(v1)),
        Operator::Le => format!("{} <= {}", column, escape(v1)),
        Operator::Between => format!("{} between {} and {}", column, escape(v1), escape(v2)),
        Operator::NotBetween => {
            format!("{} not between {} and {}", column, escape(v1), escape(v2))
        }
        Operator::Like => format!("{} like binary {}", column, like_pattern(v1, true, true)),
        Operator::NotLike => {
            format!("{} not like binary {}", column, like_pattern(v1, true, true))
        }
        Operator::LikeLeft => format!("{} like binary {}", column, like_pattern(v1, true, false)),
        Operator::LikeRight => format!("{} like binary {}", column, like_pattern(v1, false, true)),
        Operator::NotLikeLeft => {
            format!("{} not like binary {}", column, like_pattern(v1, true, false))
        }
        Operator::NotLikeRight => {
            format!("{} not like binary {}", column, like_pattern(v1, false, true))
        }
        Operator::IsNull => format!("{} is null", column),
        Operator::IsNotNull => format!("{} is not null", column),
        Operator::In => match list_sql(v1) {
            Some(list) => format!("{} in ({})", column, list),
            None => "1 = 0".to_string(),
        },
        Operator::NotIn => match list_sql(v1) {
            Some(list) => format!("{} not in ({})", column, list),
            None => "1 = 1".to_string(),
        },
        Operator::JsonContains => format!("json_contains({}, {})", column, escape(v1)),
    }
}
