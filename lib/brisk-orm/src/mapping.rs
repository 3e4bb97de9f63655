use std::collections::BTreeMap;

use crate::{TableDescriptor, TypeDescriptor};

/// A property resolved by invoking a registered select.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplexMapping {
    /// Column of the current row whose value is passed to the select.
    pub source_column: String,
    /// When set, passed as a raw column name ahead of the value.
    pub target_column: Option<String>,
    pub select_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingTarget {
    Column(String),
    Complex(ComplexMapping),
}

/// Property name to column (or relation) mapping of one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityMapping {
    entries: BTreeMap<String, MappingTarget>,
}

impl EntityMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mapping for a registered entity: one column entry per persisted
    /// property, one complex entry per relation.
    pub fn from_descriptors(ty: &TypeDescriptor, table: &TableDescriptor) -> Self {
        let mut mapping = Self::new();
        for column in table.property_columns() {
            if let Some(key) = &column.property {
                mapping = mapping.column(key.clone(), column.name.clone());
            }
        }
        for property in &ty.properties {
            if let Some(relation) = &property.relation {
                let select_id = if relation.many {
                    crate::dao::find_list_by_id(&relation.entity)
                } else {
                    crate::dao::find_by_id(&relation.entity)
                };
                mapping = mapping.complex(
                    property.key.clone(),
                    ComplexMapping {
                        source_column: relation.source_column.clone(),
                        target_column: Some(relation.target_column.clone()),
                        select_id,
                    },
                );
            }
        }
        mapping
    }

    pub fn column(mut self, property: impl Into<String>, column: impl Into<String>) -> Self {
        self.entries
            .insert(property.into(), MappingTarget::Column(column.into()));
        self
    }

    pub fn complex(mut self, property: impl Into<String>, complex: ComplexMapping) -> Self {
        self.entries
            .insert(property.into(), MappingTarget::Complex(complex));
        self
    }

    pub fn get(&self, property: &str) -> Option<&MappingTarget> {
        self.entries.get(property)
    }

    /// Column for `property`, or the property name itself when unmapped.
    pub fn column_name<'a>(&'a self, property: &'a str) -> &'a str {
        match self.entries.get(property) {
            Some(MappingTarget::Column(column)) => column,
            _ => property,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MappingTarget)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
