//! Ontology types: object types, their properties, and table mappings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Object types every ontology carries for its own bookkeeping. They are
/// never chosen as a metric's business process.
pub const SYSTEM_OBJECT_TYPES: &[&str] = &[
    "workspace",
    "database",
    "table",
    "column",
    "mapping",
    "AtomicMetric",
    "MetricDefinition",
];

/// A business object type, e.g. `Order` or `Customer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectType {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub base_type: Option<String>,
    #[serde(default)]
    pub properties: Vec<Property>,
}

impl ObjectType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            description: None,
            base_type: None,
            properties: Vec::new(),
        }
    }

    pub fn is_system(&self) -> bool {
        is_system_type(&self.name)
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }
}

pub fn is_system_type(name: &str) -> bool {
    SYSTEM_OBJECT_TYPES.contains(&name)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    #[serde(default = "default_data_type")]
    pub data_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_data_type() -> String {
    "string".to_string()
}

/// Mapping of one table's columns onto an object type's properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMapping {
    pub object_type: String,
    pub table_name: String,
    /// Column name → property name.
    #[serde(default)]
    pub column_property_map: BTreeMap<String, String>,
}

impl TableMapping {
    pub fn new(object_type: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            table_name: table_name.into(),
            column_property_map: BTreeMap::new(),
        }
    }

    pub fn with_column(mut self, column: impl Into<String>, property: impl Into<String>) -> Self {
        self.column_property_map.insert(column.into(), property.into());
        self
    }
}

/// Ontology document: object types and their table mappings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ontology {
    #[serde(default)]
    pub object_types: Vec<ObjectType>,
    #[serde(default)]
    pub mappings: Vec<TableMapping>,
}
