//! Schema model: column and table definitions.
//!
//! Composite column types are represented as a tagged variant and validated
//! once, when a table definition is constructed, rather than re-parsed on
//! every access.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};

/// The four child columns a geopoint decomposes into, in declaration order.
pub const GEOPOINT_CHILDREN: [&str; 4] = ["latitude", "longitude", "altitude", "accuracy"];

/// Scalar types accepted for geopoint child columns.
const NUMERIC_TYPES: [&str; 2] = ["number", "integer"];

/// A column's element type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnType {
    /// A plain scalar type (`string`, `number`, `integer`, `rowpath`, ...).
    Scalar {
        /// Type name.
        type_name: String,
    },
    /// A composite type flattened into child columns by the storage layer.
    Composite {
        /// Type name (e.g. `geopoint`).
        type_name: String,
        /// Element keys of the child columns, in order.
        children: Vec<String>,
    },
}

impl ColumnType {
    /// Creates a scalar type.
    pub fn scalar(type_name: impl Into<String>) -> Self {
        ColumnType::Scalar {
            type_name: type_name.into(),
        }
    }

    /// Creates a composite type.
    pub fn composite(type_name: impl Into<String>, children: Vec<String>) -> Self {
        ColumnType::Composite {
            type_name: type_name.into(),
            children,
        }
    }

    /// Returns the type name.
    pub fn type_name(&self) -> &str {
        match self {
            ColumnType::Scalar { type_name } => type_name,
            ColumnType::Composite { type_name, .. } => type_name,
        }
    }

    /// Returns the child element keys, empty for scalars.
    pub fn children(&self) -> &[String] {
        match self {
            ColumnType::Scalar { .. } => &[],
            ColumnType::Composite { children, .. } => children,
        }
    }
}

/// Definition of one stored column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    /// Storage column key, unique within the table.
    pub element_key: String,
    /// Display/logical name.
    pub element_name: String,
    /// Element type, with composite decomposition when applicable.
    pub element_type: ColumnType,
}

impl ColumnDefinition {
    /// Creates a column definition.
    pub fn new(
        element_key: impl Into<String>,
        element_name: impl Into<String>,
        element_type: ColumnType,
    ) -> Self {
        Self {
            element_key: element_key.into(),
            element_name: element_name.into(),
            element_type,
        }
    }

    /// Returns true if values of this column reference row attachments.
    pub fn is_attachment_column(&self) -> bool {
        matches!(self.element_type.type_name(), "rowpath" | "mimeUri")
    }
}

/// Definition of a table's column structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    /// Table identifier.
    pub table_id: String,
    /// Version token for the column structure; `None` before first sync.
    pub schema_etag: Option<String>,
    /// Column definitions, in declaration order.
    pub columns: Vec<ColumnDefinition>,
}

impl TableDefinition {
    /// Creates a table definition, validating composite columns.
    ///
    /// A geopoint column must declare exactly the four child columns
    /// `latitude`, `longitude`, `altitude`, `accuracy` (or zero children,
    /// in which case the children must be declared separately and the
    /// column is rejected here); each child must exist in the column list
    /// with a numeric scalar type. Any other arity is rejected.
    pub fn new(table_id: impl Into<String>, columns: Vec<ColumnDefinition>) -> ProtocolResult<Self> {
        let table_id = table_id.into();
        if table_id.is_empty() {
            return Err(ProtocolError::InvalidTable {
                table_id,
                message: "table id must not be empty".into(),
            });
        }

        let mut seen = std::collections::HashSet::new();
        for col in &columns {
            if col.element_key.is_empty() {
                return Err(ProtocolError::InvalidColumn {
                    element_key: col.element_key.clone(),
                    message: "element key must not be empty".into(),
                });
            }
            if !seen.insert(col.element_key.as_str()) {
                return Err(ProtocolError::InvalidColumn {
                    element_key: col.element_key.clone(),
                    message: "duplicate element key".into(),
                });
            }
        }

        for col in &columns {
            if col.element_type.type_name() == "geopoint" {
                validate_geopoint(col, &columns)?;
            }
        }

        Ok(Self {
            table_id,
            schema_etag: None,
            columns,
        })
    }

    /// Structural column-by-column comparison: key, name, type, children.
    ///
    /// ETags are deliberately not compared; this is how a client decides
    /// whether a server's re-declared schema is in fact identical.
    pub fn structurally_equal(&self, other: &TableDefinition) -> bool {
        self.table_id == other.table_id
            && self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(other.columns.iter())
                .all(|(a, b)| {
                    a.element_key == b.element_key
                        && a.element_name == b.element_name
                        && a.element_type == b.element_type
                })
    }

    /// Element keys of columns whose values reference row attachments.
    pub fn attachment_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.is_attachment_column())
            .map(|c| c.element_key.as_str())
            .collect()
    }

    /// Returns true if any column references row attachments.
    pub fn has_attachment_columns(&self) -> bool {
        self.columns.iter().any(|c| c.is_attachment_column())
    }
}

fn validate_geopoint(col: &ColumnDefinition, all: &[ColumnDefinition]) -> ProtocolResult<()> {
    let children = col.element_type.children();
    if children.len() != GEOPOINT_CHILDREN.len() {
        return Err(ProtocolError::InvalidColumn {
            element_key: col.element_key.clone(),
            message: format!(
                "geopoint requires exactly {} child columns, got {}",
                GEOPOINT_CHILDREN.len(),
                children.len()
            ),
        });
    }

    for (child_key, expected_name) in children.iter().zip(GEOPOINT_CHILDREN.iter()) {
        let child = all.iter().find(|c| &c.element_key == child_key).ok_or_else(|| {
            ProtocolError::InvalidColumn {
                element_key: col.element_key.clone(),
                message: format!("geopoint child column '{child_key}' is not declared"),
            }
        })?;
        if child.element_name != *expected_name {
            return Err(ProtocolError::InvalidColumn {
                element_key: col.element_key.clone(),
                message: format!(
                    "geopoint child '{child_key}' must be named '{expected_name}', got '{}'",
                    child.element_name
                ),
            });
        }
        match &child.element_type {
            ColumnType::Scalar { type_name } if NUMERIC_TYPES.contains(&type_name.as_str()) => {}
            other => {
                return Err(ProtocolError::InvalidColumn {
                    element_key: col.element_key.clone(),
                    message: format!(
                        "geopoint child '{child_key}' must be numeric, got '{}'",
                        other.type_name()
                    ),
                });
            }
        }
    }
    Ok(())
}

/// A server-side table listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableResource {
    /// Table identifier.
    pub table_id: String,
    /// Current schema epoch.
    pub schema_etag: String,
    /// Token for the table's row content as of the last accepted change-set.
    pub data_etag: Option<String>,
}
