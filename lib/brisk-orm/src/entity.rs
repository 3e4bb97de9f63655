//! Entity descriptors.
//!
//! A [`TypeDescriptor`] is the plain-data description of an entity type: its
//! table options and, per property, the declared kind plus optional column or
//! relation metadata. It is produced once per type, either by
//! `#[derive(Entity)]` or by hand with the builder methods below, and is then
//! consumed by [`crate::Orm::register_entity`] and [`crate::Orm::dao`].
//!
//! # Example
//!
//! ```text
//! #[derive(Serialize, Deserialize, Entity)]
//! #[table(name = "user", soft_delete)]
//! pub struct User {
//!     #[primary_key(auto_increment)]
//!     pub id: Option<i64>,
//!     #[column(name = "user_name", length = 64, unique_key = "name")]
//!     pub name: String,
//!     #[foreign_key(entity = "Role", property = "id")]
//!     pub role_id: Option<i64>,
//!     #[relation(entity = "Post", source = "id", target = "author_id", many)]
//!     pub posts: Option<Vec<Post>>,
//! }
//! ```

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{ColumnType, DeleteValue, ForeignAction, Value};

/// Types with persistence metadata.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The complete descriptor for this type.
    fn descriptor() -> TypeDescriptor;
}

/// Declared kind of a property, used to derive a column type when none is given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyKind {
    String,
    Number,
    Boolean,
    Date,
    Array,
    Object,
    /// A named inner type such as [`crate::GeometryPoint`].
    Named(String),
}

/// Table-level options.
#[derive(Debug, Clone)]
pub struct TableMeta {
    pub table_name: String,
    pub charset: Option<String>,
    pub collate: Option<String>,
    pub engine: Option<String>,
    pub soft_delete: bool,
}

impl TableMeta {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            charset: None,
            collate: None,
            engine: None,
            soft_delete: false,
        }
    }

    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    pub fn collate(mut self, collate: impl Into<String>) -> Self {
        self.collate = Some(collate.into());
        self
    }

    pub fn engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = Some(engine.into());
        self
    }

    pub fn soft_delete(mut self) -> Self {
        self.soft_delete = true;
        self
    }
}

/// Reference from a foreign-key property to a property of another entity.
#[derive(Debug, Clone)]
pub struct ForeignKeyRef {
    pub target_entity: String,
    pub target_property: String,
    pub action: ForeignAction,
}

/// Column metadata attached to a property.
#[derive(Debug, Clone, Default)]
pub struct ColumnMeta {
    pub db_name: String,
    pub column_type: Option<ColumnType>,
    pub is_primary_key: bool,
    /// Unique-key groups this column belongs to.
    pub unique_keys: Vec<String>,
    pub foreign_key: Option<ForeignKeyRef>,
    pub not_null: bool,
    pub default: Option<Value>,
    pub delete_value: Option<DeleteValue>,
    pub auto_increment: bool,
    pub length: Option<u32>,
    pub precision: Option<u32>,
}

impl ColumnMeta {
    pub fn new(db_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            ..Default::default()
        }
    }

    /// A primary key column; always `not null`.
    pub fn primary_key(db_name: impl Into<String>) -> Self {
        Self {
            is_primary_key: true,
            not_null: true,
            ..Self::new(db_name)
        }
    }

    pub fn column_type(mut self, column_type: ColumnType) -> Self {
        self.column_type = Some(column_type);
        self
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn delete_value(mut self, value: DeleteValue) -> Self {
        self.delete_value = Some(value);
        self
    }

    pub fn unique_key(mut self, group: impl Into<String>) -> Self {
        self.unique_keys.push(group.into());
        self
    }

    pub fn foreign_key(
        mut self,
        target_entity: impl Into<String>,
        target_property: impl Into<String>,
        action: ForeignAction,
    ) -> Self {
        self.foreign_key = Some(ForeignKeyRef {
            target_entity: target_entity.into(),
            target_property: target_property.into(),
            action,
        });
        self
    }
}

/// A one-to-one or one-to-many relation resolved through a registered select.
#[derive(Debug, Clone)]
pub struct RelationMeta {
    pub entity: String,
    /// Column of this table whose value is the lookup key.
    pub source_column: String,
    /// Column of the related table matched against the key.
    pub target_column: String,
    pub many: bool,
}

#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    pub key: String,
    pub kind: PropertyKind,
    pub column: Option<ColumnMeta>,
    pub relation: Option<RelationMeta>,
}

impl PropertyDescriptor {
    /// A property persisted as a column.
    pub fn column(key: impl Into<String>, kind: PropertyKind, column: ColumnMeta) -> Self {
        Self {
            key: key.into(),
            kind,
            column: Some(column),
            relation: None,
        }
    }

    /// A property hydrated from another entity.
    pub fn relation(key: impl Into<String>, relation: RelationMeta) -> Self {
        Self {
            key: key.into(),
            kind: PropertyKind::Object,
            column: None,
            relation: Some(relation),
        }
    }

    /// A property with no persistence metadata.
    pub fn plain(key: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            key: key.into(),
            kind,
            column: None,
            relation: None,
        }
    }

    /// Column name if the property is persisted.
    pub fn db_name(&self) -> Option<&str> {
        self.column.as_ref().map(|c| c.db_name.as_str())
    }
}

/// Pre-resolved description of an entity type.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    pub name: String,
    pub meta: Option<TableMeta>,
    pub properties: Vec<PropertyDescriptor>,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            meta: None,
            properties: Vec::new(),
        }
    }

    pub fn table(mut self, meta: TableMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn property(mut self, property: PropertyDescriptor) -> Self {
        self.properties.push(property);
        self
    }

    pub fn table_name(&self) -> Option<&str> {
        self.meta.as_ref().map(|m| m.table_name.as_str())
    }

    pub fn soft_delete(&self) -> bool {
        self.meta.as_ref().is_some_and(|m| m.soft_delete)
    }

    pub fn find_property(&self, key: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.key == key)
    }

    /// Properties persisted as columns, in declaration order.
    pub fn column_properties(&self) -> impl Iterator<Item = (&PropertyDescriptor, &ColumnMeta)> {
        self.properties
            .iter()
            .filter_map(|p| p.column.as_ref().map(|c| (p, c)))
    }

    /// The first primary key property and its column.
    pub fn primary_key(&self) -> Option<(&PropertyDescriptor, &ColumnMeta)> {
        self.column_properties().find(|(_, c)| c.is_primary_key)
    }
}
