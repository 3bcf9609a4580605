// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! DuckDB-backed engine (feature `duckdb-backend`)
//!
//! Statements run in DuckDB's streaming mode and their chunks are pulled one
//! at a time. An interrupt goes to DuckDB itself through the connection's
//! native interrupt handle and is also checked between chunks.

use super::{
    Credentials, Engine, EngineError, EngineFactory, InterruptHandle, RawField, RawResult, RawRow,
    IN_MEMORY_DATABASE,
};
use crate::value::Value;
use duckdb::arrow::array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Date32Array, Float32Array, Float64Array,
    Int16Array, Int32Array, Int64Array, Int8Array, LargeStringArray, StringArray,
    TimestampMicrosecondArray, UInt16Array, UInt32Array, UInt8Array,
};
use duckdb::arrow::datatypes::{DataType, TimeUnit};
use duckdb::arrow::record_batch::RecordBatch;
use duckdb::arrow::util::display::{ArrayFormatter, FormatOptions};
use duckdb::types::Value as DuckValue;
use duckdb::{
    params_from_iter, Config as DuckConfig, Connection, InterruptHandle as NativeInterrupt,
};
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Setting used to hand the remote-service token to DuckDB
const TOKEN_SETTING: &str = "motherduck_token";

impl From<duckdb::Error> for EngineError {
    fn from(err: duckdb::Error) -> Self {
        EngineError::Failed(err.to_string())
    }
}

/// Opens DuckDB connections, optionally running setup SQL on each
#[derive(Debug, Clone, Default)]
pub struct DuckDbEngineFactory {
    init_sql: Option<String>,
}

impl DuckDbEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statements executed once on every new connection (extensions, settings)
    pub fn with_init_sql(mut self, sql: impl Into<String>) -> Self {
        self.init_sql = Some(sql.into());
        self
    }
}

impl EngineFactory for DuckDbEngineFactory {
    fn connect(&self, credentials: &Credentials) -> Result<Box<dyn Engine>, EngineError> {
        let mut config = DuckConfig::default();
        if let Some(token) = credentials.token.as_deref() {
            config = config.with(TOKEN_SETTING, token)?;
        }

        let database = credentials.database.trim();
        let conn = if database.is_empty() || database == IN_MEMORY_DATABASE {
            Connection::open_in_memory_with_flags(config)?
        } else {
            Connection::open_with_flags(database, config)?
        };

        if let Some(sql) = self.init_sql.as_deref().filter(|s| !s.trim().is_empty()) {
            conn.execute_batch(sql)?;
        }

        info!("Opened DuckDB connection to '{}'", credentials.database);
        let interrupt = Arc::new(DuckDbInterrupt {
            native: conn.interrupt_handle(),
            requested: AtomicBool::new(false),
        });
        Ok(Box::new(DuckDbEngine {
            conn: Some(conn),
            interrupt,
        }))
    }
}

/// Interrupts the running statement inside DuckDB and flags the drain loop
struct DuckDbInterrupt {
    native: Arc<NativeInterrupt>,
    requested: AtomicBool,
}

impl DuckDbInterrupt {
    fn take(&self) -> bool {
        self.requested.swap(false, Ordering::SeqCst)
    }

    /// An engine failure caused by our interrupt reads as `Interrupted`
    fn classify(&self, err: duckdb::Error) -> EngineError {
        let message = err.to_string();
        if self.take() || message.contains("INTERRUPT") {
            EngineError::Interrupted
        } else {
            EngineError::Failed(message)
        }
    }
}

impl InterruptHandle for DuckDbInterrupt {
    fn interrupt(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.native.interrupt();
    }
}

/// A live DuckDB connection
pub struct DuckDbEngine {
    conn: Option<Connection>,
    interrupt: Arc<DuckDbInterrupt>,
}

impl DuckDbEngine {
    fn run(&mut self, sql: &str, parameters: &[Value]) -> Result<RawResult, EngineError> {
        let conn = self.conn.as_ref().ok_or(EngineError::Closed)?;
        let result = drain(conn, &self.interrupt, sql, parameters);
        // A late interrupt must not hit the next statement
        self.interrupt.take();
        result
    }
}

/// Execute in streaming mode and pull chunks one at a time, checking for an
/// interrupt before each pull
fn drain(
    conn: &Connection,
    interrupt: &DuckDbInterrupt,
    sql: &str,
    parameters: &[Value],
) -> Result<RawResult, EngineError> {
    let mut stmt = conn.prepare(sql).map_err(|e| interrupt.classify(e))?;
    // The arrow iterator panics on fetch errors; chunks are stepped directly below
    drop(
        stmt.stream_arrow(params_from_iter(parameters.iter().map(to_duck_value)))
            .map_err(|e| interrupt.classify(e))?,
    );
    let schema = stmt.schema();

    let mut chunks: Vec<Vec<RawRow>> = Vec::new();
    loop {
        if interrupt.take() {
            return Err(EngineError::Interrupted);
        }
        match stmt.step() {
            Ok(Some(array)) => chunks.push(batch_rows(&RecordBatch::from(&array))),
            Ok(None) => break,
            Err(e) => return Err(interrupt.classify(e)),
        }
    }
    debug!("DuckDB statement produced {} chunks", chunks.len());

    let fields = schema
        .fields()
        .iter()
        .map(|field| RawField::new(field.name().clone(), database_type_name(field.data_type())))
        .collect();
    Ok(RawResult::streaming(fields, Box::new(chunks.into_iter().map(Ok))))
}

impl Engine for DuckDbEngine {
    fn execute(&mut self, sql: &str) -> Result<RawResult, EngineError> {
        self.run(sql, &[])
    }

    fn execute_prepared(
        &mut self,
        sql: &str,
        parameters: &[Value],
    ) -> Result<RawResult, EngineError> {
        self.run(sql, parameters)
    }

    fn interrupt_handle(&self) -> Arc<dyn InterruptHandle> {
        self.interrupt.clone()
    }

    fn close(&mut self) -> Result<(), EngineError> {
        match self.conn.take() {
            Some(conn) => conn.close().map_err(|(_, err)| EngineError::from(err)),
            None => Ok(()),
        }
    }
}

fn to_duck_value(value: &Value) -> DuckValue {
    match value {
        Value::Null => DuckValue::Null,
        Value::Boolean(b) => DuckValue::Boolean(*b),
        Value::Integer(n) => DuckValue::BigInt(*n),
        Value::Float(n) => DuckValue::Double(*n),
        Value::Text(s) => DuckValue::Text(s.clone()),
        Value::Blob(bytes) => DuckValue::Blob(bytes.clone()),
        Value::Date(_) | Value::Timestamp(_) => DuckValue::Text(value.to_string()),
        Value::List(_) => DuckValue::Text(value.to_json().to_string()),
    }
}

fn batch_rows(batch: &RecordBatch) -> Vec<RawRow> {
    let columns = batch.columns();
    (0..batch.num_rows())
        .map(|row| columns.iter().map(|column| cell(column, row)).collect())
        .collect()
}

macro_rules! downcast_value {
    ($array:expr, $ty:ty, $row:expr, $wrap:expr) => {
        $array
            .as_any()
            .downcast_ref::<$ty>()
            .map(|a| a.value($row))
            .map($wrap)
    };
}

fn cell(array: &ArrayRef, row: usize) -> Value {
    if array.is_null(row) {
        return Value::Null;
    }
    let converted = match array.data_type() {
        DataType::Boolean => downcast_value!(array, BooleanArray, row, Value::Boolean),
        DataType::Int8 => downcast_value!(array, Int8Array, row, |v| Value::Integer(v as i64)),
        DataType::Int16 => downcast_value!(array, Int16Array, row, |v| Value::Integer(v as i64)),
        DataType::Int32 => downcast_value!(array, Int32Array, row, |v| Value::Integer(v as i64)),
        DataType::Int64 => downcast_value!(array, Int64Array, row, Value::Integer),
        DataType::UInt8 => downcast_value!(array, UInt8Array, row, |v| Value::Integer(v as i64)),
        DataType::UInt16 => downcast_value!(array, UInt16Array, row, |v| Value::Integer(v as i64)),
        DataType::UInt32 => downcast_value!(array, UInt32Array, row, |v| Value::Integer(v as i64)),
        DataType::Float32 => downcast_value!(array, Float32Array, row, |v| Value::Float(v as f64)),
        DataType::Float64 => downcast_value!(array, Float64Array, row, Value::Float),
        DataType::Utf8 => {
            downcast_value!(array, StringArray, row, |v: &str| Value::Text(v.to_string()))
        }
        DataType::LargeUtf8 => {
            downcast_value!(array, LargeStringArray, row, |v: &str| Value::Text(v.to_string()))
        }
        DataType::Binary => {
            downcast_value!(array, BinaryArray, row, |v: &[u8]| Value::Blob(v.to_vec()))
        }
        DataType::Date32 => array
            .as_any()
            .downcast_ref::<Date32Array>()
            .and_then(|a| a.value_as_date(row))
            .map(Value::Date),
        DataType::Timestamp(TimeUnit::Microsecond, None) => array
            .as_any()
            .downcast_ref::<TimestampMicrosecondArray>()
            .and_then(|a| a.value_as_datetime(row))
            .map(Value::Timestamp),
        _ => None,
    };
    converted.unwrap_or_else(|| formatted(array, row))
}

/// Fallback for types without a dedicated cell representation
fn formatted(array: &ArrayRef, row: usize) -> Value {
    let options = FormatOptions::default();
    match ArrayFormatter::try_new(array.as_ref(), &options) {
        Ok(formatter) => Value::Text(formatter.value(row).to_string()),
        Err(_) => Value::Null,
    }
}

/// Map an arrow type back to the DuckDB type name it came from
pub fn database_type_name(data_type: &DataType) -> String {
    match data_type {
        DataType::Null => "NULL".to_string(),
        DataType::Boolean => "BOOLEAN".to_string(),
        DataType::Int8 => "TINYINT".to_string(),
        DataType::Int16 => "SMALLINT".to_string(),
        DataType::Int32 => "INTEGER".to_string(),
        DataType::Int64 => "BIGINT".to_string(),
        DataType::UInt8 => "UTINYINT".to_string(),
        DataType::UInt16 => "USMALLINT".to_string(),
        DataType::UInt32 => "UINTEGER".to_string(),
        DataType::UInt64 => "UBIGINT".to_string(),
        DataType::Float16 | DataType::Float32 => "FLOAT".to_string(),
        DataType::Float64 => "DOUBLE".to_string(),
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => "VARCHAR".to_string(),
        DataType::Binary | DataType::LargeBinary | DataType::BinaryView => "BLOB".to_string(),
        DataType::FixedSizeBinary(16) => "UUID".to_string(),
        DataType::Date32 | DataType::Date64 => "DATE".to_string(),
        DataType::Time32(_) | DataType::Time64(_) => "TIME".to_string(),
        DataType::Timestamp(_, None) => "TIMESTAMP".to_string(),
        DataType::Timestamp(_, Some(_)) => "TIMESTAMP WITH TIME ZONE".to_string(),
        DataType::Interval(_) | DataType::Duration(_) => "INTERVAL".to_string(),
        DataType::Decimal128(precision, scale) | DataType::Decimal256(precision, scale) => {
            format!("DECIMAL({},{})", precision, scale)
        }
        DataType::List(field) | DataType::LargeList(field) => {
            format!("{}[]", database_type_name(field.data_type()))
        }
        DataType::FixedSizeList(field, size) => {
            format!("{}[{}]", database_type_name(field.data_type()), size)
        }
        DataType::Struct(_) => "STRUCT".to_string(),
        DataType::Map(_, _) => "MAP".to_string(),
        DataType::Union(_, _) => "UNION".to_string(),
        DataType::Dictionary(_, value) => database_type_name(value),
        other => format!("{:?}", other).to_uppercase(),
    }
}
