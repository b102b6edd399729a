//! Schema model: the column-level contract a dataset must honor.
//!
//! A `SchemaSpec` is created once (by inference or by hand in the registry
//! file) and is immutable for the duration of a pipeline run. Column types
//! are a closed enum so the validator can match exhaustively; adding a new
//! type category is a compiler-enforced change, not a string comparison.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while constructing or loading a schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Duplicate column name in schema: {0}")]
    DuplicateColumn(String),

    #[error("Entity key column '{0}' is not part of the schema")]
    UnknownEntityKey(String),

    #[error("Tie-break column '{0}' is not part of the schema")]
    UnknownTieBreak(String),
}

/// Inferred or declared type of one column.
///
/// `Text` is the universal fallback: any value is a valid text value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Datetime,
    Integer,
    Float,
    Uuid,
    Categorical,
    Text,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Datetime => "datetime",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Uuid => "uuid",
            ColumnType::Categorical => "categorical",
            ColumnType::Text => "text",
        }
    }
}

/// One column of a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,

    #[serde(rename = "type")]
    pub column_type: ColumnType,

    #[serde(default)]
    pub nullable: bool,

    /// Datetime format pattern (chrono strftime) when `column_type` is
    /// `Datetime` and a single pattern matched every sampled value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_pattern: Option<String>,

    /// Closed set of observed values when `column_type` is `Categorical`.
    /// Sorted, so two inference runs over the same sample are identical.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<Vec<String>>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
            format_pattern: None,
            domain: None,
        }
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn with_format(mut self, pattern: impl Into<String>) -> Self {
        self.format_pattern = Some(pattern.into());
        self
    }

    pub fn with_domain(mut self, domain: Vec<String>) -> Self {
        self.domain = Some(domain);
        self
    }
}

/// Declares that one column is expected to be unique per row for a
/// key-based downstream consumer, and which column breaks ties when
/// duplicates have to be renamed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityKeySpec {
    /// Column holding the entity key (e.g. a ticker symbol).
    pub column: String,

    /// Column used to order duplicate keys before suffixing. Values that
    /// parse as dates order chronologically, anything else orders
    /// lexicographically.
    pub tie_break: String,
}

/// Ordered list of column specs plus schema-level annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSpec {
    pub columns: Vec<ColumnSpec>,

    /// Optional unique-key declaration for key-based consumers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_key: Option<EntityKeySpec>,

    /// Warnings attached during inference (e.g. a column that fell back
    /// to text). Informational; never blocks anything on its own.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl SchemaSpec {
    /// Build a schema, enforcing column-name uniqueness and entity-key
    /// reference validity.
    pub fn new(columns: Vec<ColumnSpec>) -> Result<Self, SchemaError> {
        let mut seen = std::collections::HashSet::new();
        for col in &columns {
            if !seen.insert(col.name.as_str()) {
                return Err(SchemaError::DuplicateColumn(col.name.clone()));
            }
        }
        Ok(Self {
            columns,
            entity_key: None,
            warnings: Vec::new(),
        })
    }

    pub fn with_entity_key(mut self, key: EntityKeySpec) -> Result<Self, SchemaError> {
        if self.column(&key.column).is_none() {
            return Err(SchemaError::UnknownEntityKey(key.column));
        }
        if self.column(&key.tie_break).is_none() {
            return Err(SchemaError::UnknownTieBreak(key.tie_break));
        }
        self.entity_key = Some(key);
        Ok(self)
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Look up a column spec by name.
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Re-check the invariants after deserializing from a registry file.
    pub fn verify(&self) -> Result<(), SchemaError> {
        let mut seen = std::collections::HashSet::new();
        for col in &self.columns {
            if !seen.insert(col.name.as_str()) {
                return Err(SchemaError::DuplicateColumn(col.name.clone()));
            }
        }
        if let Some(key) = &self.entity_key {
            if self.column(&key.column).is_none() {
                return Err(SchemaError::UnknownEntityKey(key.column.clone()));
            }
            if self.column(&key.tie_break).is_none() {
                return Err(SchemaError::UnknownTieBreak(key.tie_break.clone()));
            }
        }
        Ok(())
    }
}
