//! Table descriptors derived from entity descriptors.
//!
//! [`TableDescriptor::from_type`] is the second half of the two-phase build:
//! it consumes a complete [`TypeDescriptor`] and produces the immutable table
//! description used by the synchronizer and the CRUD factory.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::warn;

use crate::{GeometryPoint, OrmError, PropertyKind, TypeDescriptor, Value};

/// Synthetic column flagging soft-deleted rows.
pub const SOFT_DELETE_COLUMN: &str = "_is_delete";

pub const DEFAULT_CHARSET: &str = "utf8";
pub const DEFAULT_COLLATE: &str = "utf8_general_ci";
pub const DEFAULT_ENGINE: &str = "InnoDB";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Int,
    BigInt,
    Double,
    Float,
    Varchar,
    Text,
    Json,
    Datetime,
    Date,
    Time,
    TinyInt,
    Geometry,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Int => "int",
            ColumnType::BigInt => "bigint",
            ColumnType::Double => "double",
            ColumnType::Float => "float",
            ColumnType::Varchar => "varchar",
            ColumnType::Text => "text",
            ColumnType::Json => "json",
            ColumnType::Datetime => "datetime",
            ColumnType::Date => "date",
            ColumnType::Time => "time",
            ColumnType::TinyInt => "tinyint",
            ColumnType::Geometry => "geometry",
        }
    }

    /// Length used when the column declares none.
    pub fn default_length(&self) -> Option<u32> {
        match self {
            ColumnType::Varchar => Some(255),
            ColumnType::TinyInt => Some(1),
            ColumnType::Datetime => Some(3),
            ColumnType::BigInt => Some(30),
            _ => None,
        }
    }

    /// Decimal places used when the column declares none.
    pub fn default_precision(&self) -> Option<u32> {
        match self {
            ColumnType::Double => Some(4),
            ColumnType::Float => Some(2),
            _ => None,
        }
    }

    /// Column type for a declared property kind.
    pub fn from_kind(kind: &PropertyKind) -> Self {
        match kind {
            PropertyKind::String => ColumnType::Varchar,
            PropertyKind::Number => ColumnType::Int,
            PropertyKind::Boolean => ColumnType::TinyInt,
            PropertyKind::Date => ColumnType::Datetime,
            PropertyKind::Array | PropertyKind::Object => ColumnType::Json,
            PropertyKind::Named(name) if name == GeometryPoint::TYPE_NAME => ColumnType::Geometry,
            PropertyKind::Named(_) => ColumnType::Json,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = OrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "int" => Ok(ColumnType::Int),
            "bigint" => Ok(ColumnType::BigInt),
            "double" => Ok(ColumnType::Double),
            "float" => Ok(ColumnType::Float),
            "varchar" => Ok(ColumnType::Varchar),
            "text" => Ok(ColumnType::Text),
            "json" => Ok(ColumnType::Json),
            "datetime" => Ok(ColumnType::Datetime),
            "date" => Ok(ColumnType::Date),
            "time" => Ok(ColumnType::Time),
            "tinyint" => Ok(ColumnType::TinyInt),
            "geometry" => Ok(ColumnType::Geometry),
            other => Err(OrmError::Validation(format!("unknown column type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ForeignAction {
    #[default]
    Cascade,
    SetNull,
    NoAction,
}

impl ForeignAction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ForeignAction::Cascade => "CASCADE",
            ForeignAction::SetNull => "SET NULL",
            ForeignAction::NoAction => "NO ACTION",
        }
    }
}

impl FromStr for ForeignAction {
    type Err = OrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('_', " ").as_str() {
            "CASCADE" => Ok(ForeignAction::Cascade),
            "SET NULL" => Ok(ForeignAction::SetNull),
            "NO ACTION" => Ok(ForeignAction::NoAction),
            other => Err(OrmError::Validation(format!("unknown foreign key action: {}", other))),
        }
    }
}

/// Value written in place of a physical delete.
#[derive(Clone)]
pub enum DeleteValue {
    Literal(Value),
    Producer(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl DeleteValue {
    pub fn literal(v: impl Into<Value>) -> Self {
        DeleteValue::Literal(v.into())
    }

    pub fn producer(f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        DeleteValue::Producer(Arc::new(f))
    }

    /// Evaluate the value for one statement.
    pub fn resolve(&self) -> Value {
        match self {
            DeleteValue::Literal(v) => v.clone(),
            DeleteValue::Producer(f) => f(),
        }
    }
}

impl fmt::Debug for DeleteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeleteValue::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            DeleteValue::Producer(_) => f.write_str("Producer(..)"),
        }
    }
}

impl From<Value> for DeleteValue {
    fn from(v: Value) -> Self {
        DeleteValue::Literal(v)
    }
}

#[derive(Debug, Clone)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Entity property backing this column; `None` for synthetic columns.
    pub property: Option<String>,
    pub column_type: ColumnType,
    pub length: Option<u32>,
    pub precision: Option<u32>,
    pub not_null: bool,
    pub auto_increment: bool,
    pub default: Option<Value>,
    pub delete_value: Option<DeleteValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDescriptor {
    pub target_table: String,
    pub target_column: String,
    pub action: ForeignAction,
}

#[derive(Debug, Clone)]
pub struct TableDescriptor {
    pub name: String,
    pub charset: String,
    pub collate: String,
    pub engine: String,
    pub soft_delete: bool,
    pub columns: Vec<ColumnDescriptor>,
    pub primary_keys: Vec<String>,
    pub unique_keys: BTreeMap<String, Vec<String>>,
    pub foreign_keys: BTreeMap<String, ForeignKeyDescriptor>,
}

impl TableDescriptor {
    /// Build the table description for `ty`.
    ///
    /// `resolve` looks up other entity descriptors by name so foreign keys can
    /// be expressed against table and column names. Returns `None` when the
    /// type declares no table.
    pub fn from_type(
        ty: &TypeDescriptor,
        resolve: &dyn Fn(&str) -> Option<TypeDescriptor>,
    ) -> Option<Self> {
        let meta = ty.meta.as_ref()?;
        let mut table = TableDescriptor {
            name: meta.table_name.clone(),
            charset: meta.charset.clone().unwrap_or_else(|| DEFAULT_CHARSET.to_string()),
            collate: meta.collate.clone().unwrap_or_else(|| DEFAULT_COLLATE.to_string()),
            engine: meta.engine.clone().unwrap_or_else(|| DEFAULT_ENGINE.to_string()),
            soft_delete: meta.soft_delete,
            columns: Vec::new(),
            primary_keys: Vec::new(),
            unique_keys: BTreeMap::new(),
            foreign_keys: BTreeMap::new(),
        };

        for (property, column) in ty.column_properties() {
            let column_type = column
                .column_type
                .unwrap_or_else(|| ColumnType::from_kind(&property.kind));

            if column.is_primary_key {
                table.primary_keys.push(column.db_name.clone());
            }
            for group in &column.unique_keys {
                table
                    .unique_keys
                    .entry(group.clone())
                    .or_default()
                    .push(column.db_name.clone());
            }
            if let Some(fk) = &column.foreign_key {
                match resolve_foreign_key(ty, &fk.target_entity, &fk.target_property, resolve) {
                    Some((target_table, target_column)) => {
                        table.foreign_keys.insert(
                            column.db_name.clone(),
                            ForeignKeyDescriptor {
                                target_table,
                                target_column,
                                action: fk.action,
                            },
                        );
                    }
                    None => warn!(
                        table = %table.name,
                        column = %column.db_name,
                        target = %fk.target_entity,
                        "foreign key target not resolvable, skipped"
                    ),
                }
            }

            table.columns.push(ColumnDescriptor {
                name: column.db_name.clone(),
                property: Some(property.key.clone()),
                column_type,
                length: column.length,
                precision: column.precision,
                not_null: column.not_null,
                auto_increment: column.auto_increment,
                default: column.default.clone(),
                delete_value: column.delete_value.clone(),
            });
        }

        if table.soft_delete {
            table.columns.push(ColumnDescriptor {
                name: SOFT_DELETE_COLUMN.to_string(),
                property: None,
                column_type: ColumnType::TinyInt,
                length: Some(1),
                precision: None,
                not_null: true,
                auto_increment: false,
                default: Some(Value::Int(0)),
                delete_value: Some(DeleteValue::Literal(Value::Int(1))),
            });
        }

        Some(table)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column backing the entity property `key`.
    pub fn column_for_property(&self, key: &str) -> Option<&ColumnDescriptor> {
        self.columns
            .iter()
            .find(|c| c.property.as_deref() == Some(key))
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Columns written by inserts and full updates.
    pub fn property_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|c| c.property.is_some())
    }
}

fn resolve_foreign_key(
    ty: &TypeDescriptor,
    target_entity: &str,
    target_property: &str,
    resolve: &dyn Fn(&str) -> Option<TypeDescriptor>,
) -> Option<(String, String)> {
    let target = if target_entity == ty.name {
        ty.clone()
    } else {
        resolve(target_entity)?
    };
    let table = target.table_name()?.to_string();
    let column = target.find_property(target_property)?.db_name()?.to_string();
    Some((table, column))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ColumnMeta, PropertyDescriptor, TableMeta};

    fn role() -> TypeDescriptor {
        TypeDescriptor::new("Role")
            .table(TableMeta::new("role"))
            .property(PropertyDescriptor::column(
                "id",
                PropertyKind::Number,
                ColumnMeta::primary_key("role_id").auto_increment(),
            ))
    }

    fn user() -> TypeDescriptor {
        TypeDescriptor::new("User")
            .table(TableMeta::new("user").soft_delete())
            .property(PropertyDescriptor::column(
                "id",
                PropertyKind::Number,
                ColumnMeta::primary_key("id"),
            ))
            .property(PropertyDescriptor::column(
                "name",
                PropertyKind::String,
                ColumnMeta::new("user_name").unique_key("name").unique_key("login"),
            ))
            .property(PropertyDescriptor::column(
                "email",
                PropertyKind::String,
                ColumnMeta::new("email").unique_key("login"),
            ))
            .property(PropertyDescriptor::column(
                "roleId",
                PropertyKind::Number,
                ColumnMeta::new("role_id").foreign_key("Role", "id", ForeignAction::Cascade),
            ))
            .property(PropertyDescriptor::column(
                "location",
                PropertyKind::Named(GeometryPoint::TYPE_NAME.to_string()),
                ColumnMeta::new("location"),
            ))
            .property(PropertyDescriptor::column(
                "tags",
                PropertyKind::Array,
                ColumnMeta::new("tags"),
            ))
            .property(PropertyDescriptor::plain("scratch", PropertyKind::String))
    }

    fn resolver(name: &str) -> Option<TypeDescriptor> {
        (name == "Role").then(role)
    }

    #[test]
    fn kinds_map_to_column_types() {
        let table = TableDescriptor::from_type(&user(), &resolver).unwrap();
        let ty = |name: &str| table.column(name).unwrap().column_type;
        assert_eq!(ty("id"), ColumnType::Int);
        assert_eq!(ty("user_name"), ColumnType::Varchar);
        assert_eq!(ty("location"), ColumnType::Geometry);
        assert_eq!(ty("tags"), ColumnType::Json);
        assert!(table.column("scratch").is_none());
    }

    #[test]
    fn soft_delete_adds_flag_column() {
        let table = TableDescriptor::from_type(&user(), &resolver).unwrap();
        let flag = table.column(SOFT_DELETE_COLUMN).unwrap();
        assert_eq!(flag.column_type, ColumnType::TinyInt);
        assert!(flag.not_null);
        assert_eq!(flag.default, Some(Value::Int(0)));
        assert_eq!(flag.delete_value.as_ref().map(|d| d.resolve()), Some(Value::Int(1)));
        assert!(flag.property.is_none());
    }

    #[test]
    fn unique_groups_collect_columns() {
        let table = TableDescriptor::from_type(&user(), &resolver).unwrap();
        assert_eq!(table.unique_keys["name"], vec!["user_name"]);
        assert_eq!(table.unique_keys["login"], vec!["user_name", "email"]);
    }

    #[test]
    fn foreign_keys_resolve_to_table_and_column() {
        let table = TableDescriptor::from_type(&user(), &resolver).unwrap();
        assert_eq!(
            table.foreign_keys["role_id"],
            ForeignKeyDescriptor {
                target_table: "role".to_string(),
                target_column: "role_id".to_string(),
                action: ForeignAction::Cascade,
            }
        );
    }

    #[test]
    fn unresolved_foreign_keys_are_skipped() {
        let table = TableDescriptor::from_type(&user(), &|_| None).unwrap();
        assert!(table.foreign_keys.is_empty());
        assert!(table.column("role_id").is_some());
    }

    #[test]
    fn types_without_table_yield_none() {
        let bean = TypeDescriptor::new("Bean")
            .property(PropertyDescriptor::plain("a", PropertyKind::String));
        assert!(TableDescriptor::from_type(&bean, &|_| None).is_none());
    }

    #[test]
    fn table_options_default() {
        let table = TableDescriptor::from_type(&role(), &|_| None).unwrap();
        assert_eq!(table.charset, "utf8");
        assert_eq!(table.collate, "utf8_general_ci");
        assert_eq!(table.engine, "InnoDB");
        assert_eq!(table.primary_keys, vec!["role_id"]);
    }

    #[test]
    fn parse_column_type_and_action() {
        assert_eq!("BIGINT".parse::<ColumnType>().unwrap(), ColumnType::BigInt);
        assert!("blob".parse::<ColumnType>().is_err());
        assert_eq!("set_null".parse::<ForeignAction>().unwrap(), ForeignAction::SetNull);
        assert_eq!(ForeignAction::NoAction.as_sql(), "NO ACTION");
    }
}
