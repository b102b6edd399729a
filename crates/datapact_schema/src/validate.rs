//! Schema validation: check a produced dataset against a `SchemaSpec`.
//!
//! Validation reports every problem it finds in a single pass and returns
//! a worst-level-wins report; it never aborts at the first issue. An
//! `Error` level means the dataset must not be published. A `Warning`
//! level publishes with a logged caveat.
//!
//! The one place validation rewrites data is duplicate entity-key
//! disambiguation: when the schema declares an entity key and duplicates
//! are present, keys are suffixed with ascending integers ordered by the
//! tie-break column. The rewrite is surfaced as a warning, never applied
//! silently.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::dataset::Dataset;
use crate::infer::{matching_datetime_pattern, DATETIME_PATTERNS};
use crate::spec::{ColumnSpec, ColumnType, SchemaSpec};

/// Severity of a validation outcome. Ordered so `max` picks the worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidationLevel {
    Success,
    Warning,
    Error,
}

impl ValidationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationLevel::Success => "SUCCESS",
            ValidationLevel::Warning => "WARNING",
            ValidationLevel::Error => "ERROR",
        }
    }
}

/// One finding, attached to a column when it concerns one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub level: ValidationLevel,
    /// `None` for dataset-level findings (e.g. zero rows).
    pub column: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    fn error(column: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            level: ValidationLevel::Error,
            column: column.map(str::to_string),
            message: message.into(),
        }
    }

    fn warning(column: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            level: ValidationLevel::Warning,
            column: column.map(str::to_string),
            message: message.into(),
        }
    }
}

/// Outcome of validating one dataset against one schema.
///
/// Created fresh on every call and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub level: ValidationLevel,
    pub issues: Vec<ValidationIssue>,
    /// Present when entity-key disambiguation rewrote the dataset; this is
    /// the version that should be published.
    pub rewritten: Option<Dataset>,
}

impl ValidationReport {
    pub fn is_publishable(&self) -> bool {
        self.level != ValidationLevel::Error
    }

    /// Issues at WARNING level and above, for run summaries.
    pub fn notable_issues(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.level >= ValidationLevel::Warning)
    }
}

/// Validate `dataset` against `schema`.
pub fn validate(dataset: &Dataset, schema: &SchemaSpec) -> ValidationReport {
    let mut issues = Vec::new();

    if dataset.is_empty() {
        issues.push(ValidationIssue::error(None, "dataset has zero rows"));
    }

    for column in &schema.columns {
        match dataset.column_index(&column.name) {
            Some(idx) => check_column(dataset, column, idx, &mut issues),
            None if !column.nullable => {
                issues.push(ValidationIssue::error(
                    Some(&column.name),
                    "missing required column",
                ));
            }
            None => {
                issues.push(ValidationIssue::warning(
                    Some(&column.name),
                    "nullable column absent from dataset",
                ));
            }
        }
    }

    let rewritten = disambiguate_entity_keys(dataset, schema, &mut issues);

    let level = issues
        .iter()
        .map(|i| i.level)
        .max()
        .unwrap_or(ValidationLevel::Success);

    debug!(
        level = level.as_str(),
        issues = issues.len(),
        "validation complete"
    );

    ValidationReport {
        level,
        issues,
        rewritten,
    }
}

fn check_column(
    dataset: &Dataset,
    column: &ColumnSpec,
    idx: usize,
    issues: &mut Vec<ValidationIssue>,
) {
    let mut missing_required = 0usize;
    let mut unparseable = 0usize;
    let mut out_of_domain: Vec<String> = Vec::new();

    for row in 0..dataset.row_count() {
        let value = dataset.cell(row, idx).unwrap_or("").trim();
        if value.is_empty() {
            if !column.nullable {
                missing_required += 1;
            }
            continue;
        }

        if !cell_matches_type(value, column) {
            unparseable += 1;
        }

        if column.column_type == ColumnType::Categorical {
            if let Some(domain) = &column.domain {
                if !domain.iter().any(|d| d == value) && !out_of_domain.contains(&value.to_string())
                {
                    out_of_domain.push(value.to_string());
                }
            }
        }
    }

    if missing_required > 0 {
        issues.push(ValidationIssue::error(
            Some(&column.name),
            "missing required value",
        ));
    }
    if unparseable > 0 {
        issues.push(ValidationIssue::error(
            Some(&column.name),
            format!(
                "{} value(s) not parseable as {}",
                unparseable,
                column.column_type.as_str()
            ),
        ));
    }
    if !out_of_domain.is_empty() {
        issues.push(ValidationIssue::warning(
            Some(&column.name),
            format!("value(s) outside categorical domain: {}", out_of_domain.join(", ")),
        ));
    }
}

fn cell_matches_type(value: &str, column: &ColumnSpec) -> bool {
    match column.column_type {
        ColumnType::Datetime => match &column.format_pattern {
            Some(pattern) => parses_datetime(value, pattern),
            None => DATETIME_PATTERNS.iter().any(|p| parses_datetime(value, p)),
        },
        ColumnType::Integer => value.parse::<i64>().is_ok(),
        ColumnType::Float => value.parse::<f64>().is_ok(),
        ColumnType::Uuid => crate::infer::is_uuid(value),
        // Domain membership is a separate, warning-level check.
        ColumnType::Categorical => true,
        ColumnType::Text => true,
    }
}

fn parses_datetime(value: &str, pattern: &str) -> bool {
    if pattern.contains("%:z") {
        chrono::DateTime::parse_from_str(value, pattern).is_ok()
            || chrono::DateTime::parse_from_rfc3339(value).is_ok()
    } else if pattern.contains("%H") {
        chrono::NaiveDateTime::parse_from_str(value, pattern).is_ok()
    } else {
        chrono::NaiveDate::parse_from_str(value, pattern).is_ok()
    }
}

/// Sort key for tie-break values: timestamps order chronologically and
/// before non-timestamps, everything else orders lexicographically.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum TieKey {
    Time(i64),
    Text(String),
}

fn tie_key(value: &str) -> TieKey {
    if let Some(pattern) = matching_datetime_pattern(value) {
        let millis = if pattern.contains("%:z") {
            chrono::DateTime::parse_from_rfc3339(value)
                .or_else(|_| chrono::DateTime::parse_from_str(value, pattern))
                .map(|dt| dt.timestamp_millis())
                .ok()
        } else if pattern.contains("%H") {
            chrono::NaiveDateTime::parse_from_str(value, pattern)
                .map(|dt| dt.and_utc().timestamp_millis())
                .ok()
        } else {
            chrono::NaiveDate::parse_from_str(value, pattern)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc().timestamp_millis())
        };
        if let Some(ms) = millis {
            return TieKey::Time(ms);
        }
    }
    TieKey::Text(value.to_string())
}

/// Deterministically rename duplicate entity keys.
///
/// Rows sharing a key are ordered by the tie-break column ascending (the
/// earliest occurrence gets suffix `1`), with the full row content as a
/// final tie-break so the result does not depend on input row order.
fn disambiguate_entity_keys(
    dataset: &Dataset,
    schema: &SchemaSpec,
    issues: &mut Vec<ValidationIssue>,
) -> Option<Dataset> {
    let key_spec = schema.entity_key.as_ref()?;
    let key_idx = dataset.column_index(&key_spec.column)?;
    let tie_idx = dataset.column_index(&key_spec.tie_break)?;

    let mut by_key: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for row in 0..dataset.row_count() {
        let key = dataset.cell(row, key_idx).unwrap_or("").trim().to_string();
        if !key.is_empty() {
            by_key.entry(key).or_default().push(row);
        }
    }

    let duplicates: Vec<(&String, &Vec<usize>)> =
        by_key.iter().filter(|(_, rows)| rows.len() > 1).collect();
    if duplicates.is_empty() {
        return None;
    }

    let mut rewritten = dataset.clone();
    let mut renamed = Vec::new();
    for (key, rows) in duplicates {
        let mut ordered: Vec<usize> = rows.clone();
        ordered.sort_by_cached_key(|&row| {
            let tie = dataset.cell(row, tie_idx).unwrap_or("").trim().to_string();
            (tie_key(&tie), dataset.rows[row].join("\u{1f}"))
        });

        for (i, &row) in ordered.iter().enumerate() {
            let new_key = format!("{}{}", key, i + 1);
            if let Some(cell) = rewritten.rows.get_mut(row).and_then(|r| r.get_mut(key_idx)) {
                *cell = new_key.clone();
            }
            renamed.push(new_key);
        }
    }

    issues.push(ValidationIssue::warning(
        Some(&key_spec.column),
        format!("duplicate entity keys renamed: {}", renamed.join(", ")),
    ));

    Some(rewritten)
}
