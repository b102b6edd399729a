//! Schema inference: derive a `SchemaSpec` from a sampled dataset.
//!
//! Type precedence per column, checked against every non-empty sampled
//! value: uuid -> datetime -> integer -> float -> categorical -> text.
//! Inference is total: a column that matches no typed rule falls back to
//! text with a schema-level warning, it never produces an error.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::dataset::Dataset;
use crate::spec::{ColumnSpec, ColumnType, SchemaSpec};

/// Datetime patterns probed in order. The first pattern that parses every
/// sampled value wins and is recorded on the column spec.
pub const DATETIME_PATTERNS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d",
];

/// Tuning knobs for inference.
#[derive(Debug, Clone)]
pub struct InferOptions {
    /// Maximum distinct values for a column to qualify as categorical.
    pub categorical_limit: usize,
    /// Minimum sampled (non-empty) values before the categorical rule is
    /// considered at all; tiny samples stay text.
    pub min_categorical_rows: usize,
}

impl Default for InferOptions {
    fn default() -> Self {
        Self {
            categorical_limit: 20,
            min_categorical_rows: 10,
        }
    }
}

/// 8-4-4-4-12 hex UUID check, shared with the validator.
pub(crate) fn is_uuid(value: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
            .expect("uuid pattern is valid")
    })
    .is_match(value)
}

/// Returns the first datetime pattern that parses `value`, if any.
pub fn matching_datetime_pattern(value: &str) -> Option<&'static str> {
    DATETIME_PATTERNS
        .iter()
        .find(|p| parses_with_pattern(value, p))
        .copied()
}

fn parses_with_pattern(value: &str, pattern: &str) -> bool {
    if pattern.contains("%:z") {
        chrono::DateTime::parse_from_str(value, pattern).is_ok()
            || chrono::DateTime::parse_from_rfc3339(value).is_ok()
    } else if pattern.contains("%H") {
        chrono::NaiveDateTime::parse_from_str(value, pattern).is_ok()
    } else {
        chrono::NaiveDate::parse_from_str(value, pattern).is_ok()
    }
}

/// Infer a schema from a sampled dataset.
///
/// Pure function of its input: the same sample always yields the same
/// spec, including warning order and categorical domain order.
pub fn infer_schema(sample: &Dataset, options: &InferOptions) -> SchemaSpec {
    let mut columns = Vec::with_capacity(sample.headers.len());
    let mut warnings = Vec::new();

    for (idx, name) in sample.headers.iter().enumerate() {
        let mut values: Vec<&str> = Vec::new();
        let mut nullable = false;
        for row in &sample.rows {
            match row.get(idx).map(|v| v.trim()) {
                Some("") | None => nullable = true,
                Some(v) => values.push(v),
            }
        }

        let spec = infer_column(name, &values, nullable, options, &mut warnings);
        debug!(
            column = name.as_str(),
            inferred = spec.column_type.as_str(),
            nullable = spec.nullable,
            "inferred column type"
        );
        columns.push(spec);
    }

    // Headers came from one CSV row; duplicates degrade to text columns
    // rather than failing inference.
    match SchemaSpec::new(columns) {
        Ok(mut schema) => {
            schema.warnings = warnings;
            schema
        }
        Err(err) => {
            let mut schema = SchemaSpec {
                columns: sample
                    .headers
                    .iter()
                    .enumerate()
                    .map(|(i, h)| ColumnSpec::new(format!("{}_{}", h, i), ColumnType::Text))
                    .collect(),
                entity_key: None,
                warnings,
            };
            schema
                .warnings
                .push(format!("Header conflict, columns renamed: {}", err));
            schema
        }
    }
}

fn infer_column(
    name: &str,
    values: &[&str],
    nullable: bool,
    options: &InferOptions,
    warnings: &mut Vec<String>,
) -> ColumnSpec {
    if values.is_empty() {
        warnings.push(format!("Column '{}' has no sampled values", name));
        return ColumnSpec::new(name, ColumnType::Text).nullable(true);
    }

    if values.iter().all(|v| is_uuid(v)) {
        return ColumnSpec::new(name, ColumnType::Uuid).nullable(nullable);
    }

    for pattern in DATETIME_PATTERNS {
        if values.iter().all(|v| parses_with_pattern(v, pattern)) {
            return ColumnSpec::new(name, ColumnType::Datetime)
                .nullable(nullable)
                .with_format(*pattern);
        }
    }

    if values.iter().all(|v| v.parse::<i64>().is_ok()) {
        return ColumnSpec::new(name, ColumnType::Integer).nullable(nullable);
    }

    if values.iter().all(|v| v.parse::<f64>().is_ok()) {
        return ColumnSpec::new(name, ColumnType::Float).nullable(nullable);
    }

    if values.len() >= options.min_categorical_rows {
        let distinct: BTreeSet<&str> = values.iter().copied().collect();
        if distinct.len() <= options.categorical_limit {
            let domain = distinct.into_iter().map(str::to_string).collect();
            return ColumnSpec::new(name, ColumnType::Categorical)
                .nullable(nullable)
                .with_domain(domain);
        }
    }

    warnings.push(format!(
        "Column '{}' matched no typed rule, falling back to text",
        name
    ));
    ColumnSpec::new(name, ColumnType::Text).nullable(nullable)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(headers: &[&str], rows: &[&[&str]]) -> Dataset {
        Dataset::new(
            headers.iter().map(|h| h.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|v| v.to_string()).collect())
                .collect(),
        )
    }

    #[test]
    fn test_infer_datetime_date_only() {
        let ds = sample(&["Date"], &[&["2024-01-10"], &["2024-03-02"]]);
        let schema = infer_schema(&ds, &InferOptions::default());
        assert_eq!(schema.columns[0].column_type, ColumnType::Datetime);
        assert_eq!(schema.columns[0].format_pattern.as_deref(), Some("%Y-%m-%d"));
        assert!(!schema.columns[0].nullable);
    }

    #[test]
    fn test_infer_integer_before_float() {
        let ds = sample(&["N", "X"], &[&["1", "1.5"], &["-3", "2"]]);
        let schema = infer_schema(&ds, &InferOptions::default());
        assert_eq!(schema.columns[0].column_type, ColumnType::Integer);
        assert_eq!(schema.columns[1].column_type, ColumnType::Float);
    }

    #[test]
    fn test_infer_uuid() {
        let ds = sample(
            &["Id"],
            &[
                &["550e8400-e29b-41d4-a716-446655440000"],
                &["6fa459ea-ee8a-3ca4-894e-db77e160355e"],
            ],
        );
        let schema = infer_schema(&ds, &InferOptions::default());
        assert_eq!(schema.columns[0].column_type, ColumnType::Uuid);
    }

    #[test]
    fn test_nullable_on_any_empty_value() {
        let ds = sample(&["PnL"], &[&["1.5"], &[""], &["2.0"]]);
        let schema = infer_schema(&ds, &InferOptions::default());
        assert_eq!(schema.columns[0].column_type, ColumnType::Float);
        assert!(schema.columns[0].nullable);
    }

    #[test]
    fn test_categorical_with_sorted_domain() {
        let rows: Vec<Vec<String>> = (0..12)
            .map(|i| vec![if i % 2 == 0 { "short" } else { "long" }.to_string()])
            .collect();
        let ds = Dataset::new(vec!["Side".to_string()], rows);
        let schema = infer_schema(&ds, &InferOptions::default());
        assert_eq!(schema.columns[0].column_type, ColumnType::Categorical);
        assert_eq!(
            schema.columns[0].domain.as_deref(),
            Some(&["long".to_string(), "short".to_string()][..])
        );
    }

    #[test]
    fn test_small_sample_not_categorical() {
        let ds = sample(&["Side"], &[&["long"], &["short"]]);
        let schema = infer_schema(&ds, &InferOptions::default());
        assert_eq!(schema.columns[0].column_type, ColumnType::Text);
    }

    #[test]
    fn test_mixed_values_fall_back_to_text_with_warning() {
        let rows: Vec<Vec<String>> = (0..30).map(|i| vec![format!("name-{}", i)]).collect();
        let ds = Dataset::new(vec!["Name".to_string()], rows);
        let schema = infer_schema(&ds, &InferOptions::default());
        assert_eq!(schema.columns[0].column_type, ColumnType::Text);
        assert!(schema.warnings.iter().any(|w| w.contains("Name")));
    }

    #[test]
    fn test_all_empty_column_is_nullable_text() {
        let ds = sample(&["Note"], &[&[""], &[""]]);
        let schema = infer_schema(&ds, &InferOptions::default());
        assert_eq!(schema.columns[0].column_type, ColumnType::Text);
        assert!(schema.columns[0].nullable);
        assert!(!schema.warnings.is_empty());
    }

    #[test]
    fn test_inference_is_deterministic() {
        let ds = sample(
            &["Date", "PnL"],
            &[&["2024-01-10", "1.5"], &["2024-01-11", "-0.3"]],
        );
        let a = infer_schema(&ds, &InferOptions::default());
        let b = infer_schema(&ds, &InferOptions::default());
        assert_eq!(a, b);
    }
}
