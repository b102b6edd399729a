//! Schema Contract System for Datapact
//!
//! A contract binds one output dataset to a column-level schema. This crate
//! owns the schema side of that contract:
//!
//! - [`spec`]: the schema model (`SchemaSpec`, `ColumnSpec`, `ColumnType`)
//! - [`infer`]: deriving a schema from a sampled dataset
//! - [`validate`]: checking a produced dataset against a schema
//!
//! Everything here is pure: no file I/O beyond what the caller hands in,
//! no clocks, no subprocesses. Inference never fails (it degrades to a
//! warning-annotated text column) and validation never fails either — it
//! reports, and the orchestrator decides what to do with the report.

pub mod dataset;
pub mod infer;
pub mod spec;
pub mod validate;

pub use dataset::{Dataset, DatasetError};
pub use infer::{infer_schema, InferOptions};
pub use spec::{ColumnSpec, ColumnType, EntityKeySpec, SchemaError, SchemaSpec};
pub use validate::{validate, ValidationIssue, ValidationLevel, ValidationReport};
