//! Values bound into statements.
//!
//! [`Value`] is a literal that gets escaped before it is spliced into SQL.
//! [`Param`] is what the CRUD functions accept positionally: a literal, a raw
//! fragment that bypasses escaping, or a condition tree compiled on demand.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Query;

/// A value that can be bound to a `?` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Datetime(NaiveDateTime),
    Date(NaiveDate),
    Time(NaiveTime),
    /// Objects are stored as their JSON text.
    Json(serde_json::Value),
    Point(GeometryPoint),
    /// Expands to `a, b, c`; a list of lists expands to `(a, b), (c, d)`.
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Convert a JSON value, keeping scalars scalar and objects as JSON.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::UInt(u)
                } else {
                    Value::Float(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            object @ serde_json::Value::Object(_) => Value::Json(object),
        }
    }

    /// Render the value as raw SQL text without quoting.
    ///
    /// Used when a plain value sits in a raw-fragment position, e.g. a column
    /// name passed to `where ? = ?`.
    pub fn to_raw_string(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            other => crate::escape::escape(other),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::String(s.clone())
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::UInt(n as u64)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::UInt(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(dt: NaiveDateTime) -> Self {
        Value::Datetime(dt)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::Datetime(dt.naive_utc())
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl From<NaiveTime> for Value {
    fn from(t: NaiveTime) -> Self {
        Value::Time(t)
    }
}

impl From<GeometryPoint> for Value {
    fn from(p: GeometryPoint) -> Self {
        Value::Point(p)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::from_json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

/// A geographic point stored in a GEOMETRY column (WGS84 by default).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryPoint {
    pub longitude: f64,
    pub latitude: f64,
    #[serde(default = "GeometryPoint::default_srid")]
    pub srid: u32,
}

impl GeometryPoint {
    /// Declared type name used by entity descriptors.
    pub const TYPE_NAME: &'static str = "GeometryPoint";

    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
            srid: Self::default_srid(),
        }
    }

    fn default_srid() -> u32 {
        4326
    }

    /// SQL literal constructing this point server-side.
    pub fn to_sql_string(&self) -> String {
        format!(
            "st_geomfromtext('point({} {})', {})",
            self.longitude, self.latitude, self.srid
        )
    }
}

impl Default for GeometryPoint {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// A positional argument of a generated statement.
#[derive(Debug, Clone)]
pub enum Param {
    /// Escaped before splicing.
    Literal(Value),
    /// Spliced verbatim.
    Raw(String),
    /// Compiled against the entity mapping, then spliced verbatim.
    Query(Box<Query>),
}

impl From<Value> for Param {
    fn from(v: Value) -> Self {
        Param::Literal(v)
    }
}

impl From<Query> for Param {
    fn from(q: Query) -> Self {
        Param::Query(Box::new(q))
    }
}

impl From<&Query> for Param {
    fn from(q: &Query) -> Self {
        Param::Query(Box::new(q.clone()))
    }
}

macro_rules! literal_param {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Param {
                fn from(v: $ty) -> Self {
                    Param::Literal(v.into())
                }
            }
        )*
    };
}

literal_param!(&str, String, &String, i32, i64, u32, u64, f64, bool, NaiveDateTime, NaiveDate);
