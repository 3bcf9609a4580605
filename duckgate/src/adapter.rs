// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Streaming result adapter
//!
//! Turns whatever the engine returned (all rows at once, or chunks pulled on
//! demand) into one uniform, forward-only sequence of non-empty row batches
//! with a schema fixed before the first row is read.

use crate::engine::{EngineError, RawChunks, RawField, RawResult, RawRow, RawRows};
use crate::error::{Error, Result};
use crate::value::Value;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Rows per batch when nothing else is configured
pub const DEFAULT_BATCH_SIZE: usize = 2048;

/// Column descriptor exposed to consumers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaField {
    pub name: String,
    /// Normalized kind, see [`normalize_type`]
    #[serde(rename = "type")]
    pub data_type: String,
    /// Type name as the engine reports it
    pub database_type: String,
}

impl SchemaField {
    pub fn new(name: impl Into<String>, database_type: impl Into<String>) -> Self {
        let database_type = database_type.into();
        Self {
            name: name.into(),
            data_type: normalize_type(&database_type).to_string(),
            database_type,
        }
    }
}

impl From<&RawField> for SchemaField {
    fn from(field: &RawField) -> Self {
        SchemaField::new(field.name.clone(), field.database_type.clone())
    }
}

/// Collapse an engine type name into a small set of kinds
pub fn normalize_type(database_type: &str) -> &'static str {
    let upper = database_type.trim().to_ascii_uppercase();
    if upper.ends_with(']') || upper.starts_with("LIST") {
        return "list";
    }
    let base = upper
        .split(|c: char| c == '(' || c == '<')
        .next()
        .unwrap_or_default()
        .trim();

    match base {
        "VARCHAR" | "CHAR" | "BPCHAR" | "TEXT" | "STRING" | "UUID" | "JSON" | "ENUM" => "string",
        "TINYINT" | "SMALLINT" | "INTEGER" | "INT" | "BIGINT" | "HUGEINT" | "UTINYINT"
        | "USMALLINT" | "UINTEGER" | "UBIGINT" | "UHUGEINT" | "INT1" | "INT2" | "INT4"
        | "INT8" | "SIGNED" | "LONG" | "SHORT" => "integer",
        "FLOAT" | "FLOAT4" | "REAL" | "DOUBLE" | "FLOAT8" | "DOUBLE PRECISION" => "float",
        "DECIMAL" | "NUMERIC" => "decimal",
        "BOOLEAN" | "BOOL" | "LOGICAL" => "boolean",
        "DATE" => "date",
        "TIME" | "TIME WITH TIME ZONE" | "TIMETZ" => "time",
        "INTERVAL" => "interval",
        "BLOB" | "BYTEA" | "BINARY" | "VARBINARY" | "BIT" | "BITSTRING" => "binary",
        "STRUCT" | "MAP" | "UNION" => "struct",
        "NULL" => "null",
        other if other.starts_with("TIMESTAMP") || other == "DATETIME" => "timestamp",
        _ => "other",
    }
}

/// Single result row
///
/// Holds values by column name and in schema order. When a result has
/// duplicate column names the named lookup sees the last one; positional
/// access still sees every column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub values: HashMap<String, Value>,
    pub positional_values: Vec<Value>,
}

impl Row {
    /// Create a new empty row
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a row from positional values; missing trailing cells are null
    pub fn from_positional(mut cells: Vec<Value>, schema: &[SchemaField]) -> Self {
        if cells.len() < schema.len() {
            cells.resize(schema.len(), Value::Null);
        }
        let values = schema
            .iter()
            .zip(cells.iter())
            .map(|(field, value)| (field.name.clone(), value.clone()))
            .collect();
        Self {
            values,
            positional_values: cells,
        }
    }

    /// Build a row from `(column, value)` pairs in column order
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut row = Row::new();
        for (name, value) in pairs {
            let value = value.into();
            row.values.insert(name.into(), value.clone());
            row.positional_values.push(value);
        }
        row
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn get_at(&self, index: usize) -> Option<&Value> {
        self.positional_values.get(index)
    }

    pub fn len(&self) -> usize {
        self.positional_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional_values.is_empty()
    }

    /// The row as a JSON object keyed by column name
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.values
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
        )
    }

    /// Deserialize the row into `T` through its JSON object form
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.to_json())
            .map_err(|e| Error::EngineExecution(format!("Failed to deserialize row: {}", e)))
    }
}

/// One chunk of rows
pub type RowBatch = Vec<Row>;

enum BatchSource {
    /// Whole result, handed out once
    Whole(Option<Vec<RawRow>>),
    Chunked {
        chunks: RawChunks,
        pending: VecDeque<RawRow>,
        drained: bool,
    },
}

/// Lazy, fused sequence of row batches over one engine result
pub struct AdaptedResult {
    schema: Vec<SchemaField>,
    source: BatchSource,
    batch_size: usize,
    exhausted: bool,
}

impl AdaptedResult {
    pub fn schema(&self) -> &[SchemaField] {
        &self.schema
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Next non-empty batch, or `None` once the result is exhausted
    ///
    /// A mid-stream engine failure is returned once and ends the sequence.
    pub fn next_batch(&mut self) -> Option<Result<RowBatch>> {
        if self.exhausted {
            return None;
        }
        match self.pull() {
            Ok(Some(rows)) => Some(Ok(self.to_rows(rows))),
            Ok(None) => {
                self.finish();
                None
            }
            Err(e) => {
                self.finish();
                Some(Err(Error::from(e)))
            }
        }
    }

    fn pull(&mut self) -> std::result::Result<Option<Vec<RawRow>>, EngineError> {
        let batch_size = self.batch_size;
        match &mut self.source {
            BatchSource::Whole(rows) => Ok(rows.take().filter(|rows| !rows.is_empty())),
            BatchSource::Chunked {
                chunks,
                pending,
                drained,
            } => {
                while !*drained && pending.len() < batch_size {
                    match chunks.next() {
                        Some(chunk) => pending.extend(chunk?),
                        None => *drained = true,
                    }
                }
                if pending.is_empty() {
                    return Ok(None);
                }
                let take = pending.len().min(batch_size);
                Ok(Some(pending.drain(..take).collect()))
            }
        }
    }

    fn to_rows(&self, rows: Vec<RawRow>) -> RowBatch {
        rows.into_iter()
            .map(|cells| Row::from_positional(cells, &self.schema))
            .collect()
    }

    fn finish(&mut self) {
        self.exhausted = true;
        self.source = BatchSource::Whole(None);
    }
}

impl Iterator for AdaptedResult {
    type Item = Result<RowBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch()
    }
}

/// Adapts raw engine results into batch sequences
#[derive(Debug, Clone, Copy)]
pub struct ResultAdapter {
    batch_size: usize,
}

impl ResultAdapter {
    /// A zero batch size is treated as one row per batch
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn adapt(&self, raw: RawResult) -> AdaptedResult {
        let schema = raw.fields.iter().map(SchemaField::from).collect();
        let source = match raw.rows {
            RawRows::Materialized(rows) => BatchSource::Whole(Some(rows)),
            RawRows::Streaming(chunks) => BatchSource::Chunked {
                chunks,
                pending: VecDeque::new(),
                drained: false,
            },
        };
        AdaptedResult {
            schema,
            source,
            batch_size: self.batch_size,
            exhausted: false,
        }
    }
}

impl Default for ResultAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

/// Drain a result and return its first column rendered as text
pub(crate) fn first_column(raw: RawResult) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for batch in ResultAdapter::default().adapt(raw) {
        for row in batch? {
            match row.get_at(0) {
                Some(Value::Text(s)) => names.push(s.clone()),
                Some(Value::Null) | None => {}
                Some(other) => names.push(other.to_string()),
            }
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn fields() -> Vec<RawField> {
        vec![RawField::new("n", "BIGINT")]
    }

    fn numbered(range: std::ops::Range<i64>) -> Vec<RawRow> {
        range.map(|n| vec![Value::Integer(n)]).collect()
    }

    fn streaming(chunk_sizes: &[usize]) -> RawResult {
        let mut next = 0i64;
        let chunks: Vec<std::result::Result<Vec<RawRow>, EngineError>> = chunk_sizes
            .iter()
            .map(|size| {
                let chunk = numbered(next..next + *size as i64);
                next += *size as i64;
                Ok(chunk)
            })
            .collect();
        RawResult::streaming(fields(), Box::new(chunks.into_iter()))
    }

    fn batch_lengths(result: AdaptedResult) -> Vec<usize> {
        result.map(|b| b.unwrap().len()).collect()
    }

    #[test]
    fn test_normalize_type() {
        assert_eq!(normalize_type("VARCHAR"), "string");
        assert_eq!(normalize_type("BIGINT"), "integer");
        assert_eq!(normalize_type("DECIMAL(18,3)"), "decimal");
        assert_eq!(normalize_type("TIMESTAMP WITH TIME ZONE"), "timestamp");
        assert_eq!(normalize_type("INTEGER[]"), "list");
        assert_eq!(normalize_type("STRUCT(a INTEGER)"), "struct");
        assert_eq!(normalize_type("double"), "float");
        assert_eq!(normalize_type("GEOMETRY"), "other");
    }

    #[test]
    fn test_schema_is_available_before_rows() {
        let adapted = ResultAdapter::new(10).adapt(streaming(&[3]));
        assert_eq!(adapted.schema(), &[SchemaField::new("n", "BIGINT")]);
        assert_eq!(adapted.schema()[0].data_type, "integer");
    }

    #[test]
    fn test_streaming_rows_are_regrouped() {
        let adapted = ResultAdapter::new(4).adapt(streaming(&[3, 0, 5, 2]));
        assert_eq!(batch_lengths(adapted), vec![4, 4, 2]);
    }

    #[test]
    fn test_streaming_order_is_preserved() {
        let adapted = ResultAdapter::new(3).adapt(streaming(&[2, 2, 2]));
        let seen: Vec<i64> = adapted
            .flat_map(|b| b.unwrap())
            .map(|row| row.get("n").and_then(Value::as_i64).unwrap())
            .collect();
        assert_eq!(seen, (0..6).collect::<Vec<_>>());
    }

    #[test]
    fn test_materialized_result_is_one_batch() {
        let raw = RawResult::materialized(fields(), numbered(0..5000));
        assert_eq!(batch_lengths(ResultAdapter::new(16).adapt(raw)), vec![5000]);
    }

    #[test]
    fn test_empty_results_emit_no_batches() {
        let whole = ResultAdapter::default().adapt(RawResult::materialized(fields(), vec![]));
        assert!(batch_lengths(whole).is_empty());

        let chunked = ResultAdapter::default().adapt(streaming(&[0, 0]));
        assert!(batch_lengths(chunked).is_empty());
    }

    #[test]
    fn test_exhaustion_is_fused() {
        let mut adapted = ResultAdapter::new(2).adapt(streaming(&[1]));
        assert!(adapted.next_batch().is_some());
        assert!(adapted.next_batch().is_none());
        assert!(adapted.next_batch().is_none());
        assert!(adapted.is_exhausted());
    }

    #[test]
    fn test_mid_stream_failure_surfaces_once() {
        let chunks: Vec<std::result::Result<Vec<RawRow>, EngineError>> = vec![
            Ok(numbered(0..2)),
            Err(EngineError::Failed("Out of Memory Error".into())),
            Ok(numbered(2..4)),
        ];
        let raw = RawResult::streaming(fields(), Box::new(chunks.into_iter()));
        let mut adapted = ResultAdapter::new(10).adapt(raw);

        let err = adapted.next_batch().unwrap().unwrap_err();
        assert_eq!(err, Error::EngineExecution("Out of Memory Error".into()));
        assert!(adapted.next_batch().is_none());
    }

    #[test]
    fn test_short_rows_are_padded_with_null() {
        let schema = vec![SchemaField::new("a", "INTEGER"), SchemaField::new("b", "VARCHAR")];
        let row = Row::from_positional(vec![Value::Integer(1)], &schema);
        assert_eq!(row.get("b"), Some(&Value::Null));
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn test_row_deserialize() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct Trip {
            city: String,
            riders: i64,
        }

        let row = Row::from_pairs([("city", Value::from("Oslo")), ("riders", Value::from(12i64))]);
        assert_eq!(
            row.deserialize::<Trip>().unwrap(),
            Trip {
                city: "Oslo".into(),
                riders: 12
            }
        );
        assert!(row.deserialize::<Vec<i64>>().is_err());
    }

    #[test]
    fn test_schema_field_wire_names() {
        let json = serde_json::to_value(SchemaField::new("greeting", "VARCHAR")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "greeting", "type": "string", "databaseType": "VARCHAR"})
        );
    }
}
