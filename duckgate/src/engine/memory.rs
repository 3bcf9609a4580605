// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Scripted in-process engine
//!
//! `MemoryEngine` answers statements from a script registered on its factory.
//! It understands the handful of statements duckgate issues on its own
//! (keyword catalog, `CREATE OR REPLACE VIEW`, `SHOW TABLES`) and records
//! every call so callers can observe exactly what reached the engine.

use super::{
    Credentials, Engine, EngineError, EngineFactory, InterruptHandle, RawField, RawResult, RawRow,
    RESERVED_KEYWORDS_SQL, SHOW_TABLES_SQL,
};
use crate::value::Value;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const CREATE_VIEW_PREFIX: &str = "CREATE OR REPLACE VIEW ";

/// Upper bound for statements registered with [`MemoryEngineFactory::with_blocking`]
const BLOCKING_LIMIT: Duration = Duration::from_secs(30);

/// Reserved keywords reported when no custom set is configured
const DEFAULT_RESERVED: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "asymmetric", "both",
    "case", "cast", "check", "collate", "column", "constraint", "create", "default",
    "deferrable", "desc", "describe", "distinct", "do", "else", "end", "except", "false",
    "fetch", "for", "foreign", "from", "grant", "group", "having", "in", "initially",
    "intersect", "into", "lateral", "leading", "limit", "not", "null", "offset", "on", "only",
    "or", "order", "pivot", "placing", "primary", "qualify", "references", "returning",
    "select", "show", "some", "summarize", "symmetric", "table", "then", "to", "trailing",
    "true", "union", "unique", "unpivot", "using", "variadic", "when", "where", "window",
    "with",
];

/// Canned result for a scripted statement
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedResult {
    fields: Vec<RawField>,
    rows: Vec<RawRow>,
    chunk_size: Option<usize>,
}

impl ScriptedResult {
    /// Result with the given `(name, database type)` columns and no rows
    pub fn new<I, N, T>(fields: I) -> Self
    where
        I: IntoIterator<Item = (N, T)>,
        N: Into<String>,
        T: Into<String>,
    {
        Self {
            fields: fields
                .into_iter()
                .map(|(name, ty)| RawField::new(name, ty))
                .collect(),
            rows: Vec::new(),
            chunk_size: None,
        }
    }

    pub fn empty() -> Self {
        Self {
            fields: Vec::new(),
            rows: Vec::new(),
            chunk_size: None,
        }
    }

    pub fn row<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.rows.push(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn rows(mut self, rows: impl IntoIterator<Item = RawRow>) -> Self {
        self.rows.extend(rows);
        self
    }

    /// Deliver rows lazily in chunks of `chunk_size` instead of all at once
    pub fn streamed_in_chunks_of(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size.max(1));
        self
    }

    fn to_raw(&self) -> RawResult {
        match self.chunk_size {
            Some(size) => {
                let chunks: Vec<Vec<RawRow>> =
                    self.rows.chunks(size).map(|chunk| chunk.to_vec()).collect();
                RawResult::streaming(self.fields.clone(), Box::new(chunks.into_iter().map(Ok)))
            }
            None => RawResult::materialized(self.fields.clone(), self.rows.clone()),
        }
    }

    fn to_raw_failing(&self, message: &str) -> RawResult {
        let size = self.chunk_size.unwrap_or(usize::MAX);
        let chunks: Vec<Result<Vec<RawRow>, EngineError>> = self
            .rows
            .chunks(size.max(1))
            .map(|chunk| Ok(chunk.to_vec()))
            .chain(std::iter::once(Err(EngineError::Failed(message.to_string()))))
            .collect();
        RawResult::streaming(self.fields.clone(), Box::new(chunks.into_iter()))
    }
}

#[derive(Debug, Clone)]
enum Script {
    Respond(ScriptedResult),
    Fail(String),
    /// Hold the statement for up to `duration`, then answer with `then`
    Stall {
        duration: Duration,
        then: ScriptedResult,
    },
    /// Stream the rows, then fail
    FailMidStream {
        result: ScriptedResult,
        message: String,
    },
}

/// A statement as it reached the engine
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedStatement {
    pub sql: String,
    pub parameters: Vec<Value>,
    pub prepared: bool,
}

struct Shared {
    scripts: Mutex<HashMap<String, Script>>,
    reserved: Mutex<Vec<String>>,
    catalog_failure: Mutex<Option<String>>,
    connect_failure: Mutex<Option<String>>,
    missing_sources: Mutex<Vec<String>>,
    views: Mutex<BTreeMap<String, String>>,
    executed: Mutex<Vec<ExecutedStatement>>,
    connects: AtomicUsize,
    interrupts: AtomicUsize,
    closes: AtomicUsize,
    ignore_interrupts: AtomicBool,
}

impl Default for Shared {
    fn default() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            reserved: Mutex::new(DEFAULT_RESERVED.iter().map(|s| s.to_string()).collect()),
            catalog_failure: Mutex::new(None),
            connect_failure: Mutex::new(None),
            missing_sources: Mutex::new(Vec::new()),
            views: Mutex::new(BTreeMap::new()),
            executed: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            interrupts: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            ignore_interrupts: AtomicBool::new(false),
        }
    }
}

fn normalize(sql: &str) -> String {
    sql.trim().trim_end_matches(';').trim_end().to_string()
}

/// Factory for scripted engines
///
/// All connections opened by one factory share the script, the view registry
/// and the counters exposed through [`EngineRecorder`].
#[derive(Clone, Default)]
pub struct MemoryEngineFactory {
    shared: Arc<Shared>,
}

impl MemoryEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `sql` with `result`
    pub fn with_result(self, sql: &str, result: ScriptedResult) -> Self {
        self.script(sql, Script::Respond(result))
    }

    /// Fail `sql` with `message`
    pub fn with_failure(self, sql: &str, message: impl Into<String>) -> Self {
        self.script(sql, Script::Fail(message.into()))
    }

    /// Hold `sql` until it is interrupted
    pub fn with_blocking(self, sql: &str) -> Self {
        self.script(
            sql,
            Script::Stall {
                duration: BLOCKING_LIMIT,
                then: ScriptedResult::empty(),
            },
        )
    }

    /// Hold `sql` for `duration` (or until interrupted), then answer with `result`
    pub fn with_delay(self, sql: &str, duration: Duration, result: ScriptedResult) -> Self {
        self.script(
            sql,
            Script::Stall {
                duration,
                then: result,
            },
        )
    }

    /// Stream the rows of `result`, then fail with `message`
    pub fn with_stream_failure(
        self,
        sql: &str,
        result: ScriptedResult,
        message: impl Into<String>,
    ) -> Self {
        self.script(
            sql,
            Script::FailMidStream {
                result,
                message: message.into(),
            },
        )
    }

    pub fn with_reserved_keywords<I, S>(self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.shared.reserved.lock() = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Make the keyword catalog query fail
    pub fn with_catalog_failure(self, message: impl Into<String>) -> Self {
        *self.shared.catalog_failure.lock() = Some(message.into());
        self
    }

    pub fn with_connect_failure(self, message: impl Into<String>) -> Self {
        *self.shared.connect_failure.lock() = Some(message.into());
        self
    }

    /// Views reading `path` fail as if the file did not exist
    pub fn with_missing_source(self, path: impl Into<String>) -> Self {
        self.shared.missing_sources.lock().push(path.into());
        self
    }

    /// Count interrupts but never deliver them to running statements
    pub fn ignoring_interrupts(self) -> Self {
        self.shared.ignore_interrupts.store(true, Ordering::SeqCst);
        self
    }

    pub fn recorder(&self) -> EngineRecorder {
        EngineRecorder {
            shared: self.shared.clone(),
        }
    }

    fn script(self, sql: &str, script: Script) -> Self {
        self.shared.scripts.lock().insert(normalize(sql), script);
        self
    }
}

impl EngineFactory for MemoryEngineFactory {
    fn connect(&self, credentials: &Credentials) -> Result<Box<dyn Engine>, EngineError> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.shared.connect_failure.lock().clone() {
            return Err(EngineError::Failed(message));
        }
        log::debug!("Opening scripted engine for database '{}'", credentials.database);
        Ok(Box::new(MemoryEngine {
            shared: self.shared.clone(),
            interrupt: Arc::new(MemoryInterrupt {
                shared: self.shared.clone(),
                pending: Mutex::new(false),
                signal: Condvar::new(),
            }),
            closed: false,
        }))
    }
}

/// Read-only view of what scripted engines have been asked to do
#[derive(Clone)]
pub struct EngineRecorder {
    shared: Arc<Shared>,
}

impl EngineRecorder {
    pub fn executed(&self) -> Vec<ExecutedStatement> {
        self.shared.executed.lock().clone()
    }

    /// How many times `sql` reached an engine
    pub fn executions_of(&self, sql: &str) -> usize {
        let wanted = normalize(sql);
        self.shared
            .executed
            .lock()
            .iter()
            .filter(|stmt| normalize(&stmt.sql) == wanted)
            .count()
    }

    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn interrupt_count(&self) -> usize {
        self.shared.interrupts.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    /// Provisioned views, name to definition
    pub fn views(&self) -> BTreeMap<String, String> {
        self.shared.views.lock().clone()
    }
}

struct MemoryInterrupt {
    shared: Arc<Shared>,
    pending: Mutex<bool>,
    signal: Condvar,
}

impl MemoryInterrupt {
    /// Wait up to `duration` for an interrupt; true if one arrived
    fn wait(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut pending = self.pending.lock();
        loop {
            if *pending {
                *pending = false;
                return true;
            }
            if self.signal.wait_until(&mut pending, deadline).timed_out() {
                let hit = *pending;
                *pending = false;
                return hit;
            }
        }
    }

    fn clear(&self) {
        *self.pending.lock() = false;
    }
}

impl InterruptHandle for MemoryInterrupt {
    fn interrupt(&self) {
        self.shared.interrupts.fetch_add(1, Ordering::SeqCst);
        if self.shared.ignore_interrupts.load(Ordering::SeqCst) {
            return;
        }
        *self.pending.lock() = true;
        self.signal.notify_all();
    }
}

/// A scripted engine connection
pub struct MemoryEngine {
    shared: Arc<Shared>,
    interrupt: Arc<MemoryInterrupt>,
    closed: bool,
}

impl MemoryEngine {
    fn run(
        &mut self,
        sql: &str,
        parameters: &[Value],
        prepared: bool,
    ) -> Result<RawResult, EngineError> {
        if self.closed {
            return Err(EngineError::Closed);
        }
        self.shared.executed.lock().push(ExecutedStatement {
            sql: sql.to_string(),
            parameters: parameters.to_vec(),
            prepared,
        });
        let result = self.dispatch(&normalize(sql));
        self.interrupt.clear();
        result
    }

    fn dispatch(&self, sql: &str) -> Result<RawResult, EngineError> {
        let script = self.shared.scripts.lock().get(sql).cloned();
        if let Some(script) = script {
            return self.play(script);
        }
        if sql.eq_ignore_ascii_case(RESERVED_KEYWORDS_SQL) {
            return self.reserved_keywords();
        }
        if sql.eq_ignore_ascii_case(SHOW_TABLES_SQL) {
            return Ok(self.show_tables());
        }
        if let Some((name, definition)) = parse_create_view(sql) {
            return self.create_view(name, definition);
        }
        Err(EngineError::Failed(format!(
            "Parser Error: no scripted result for statement \"{}\"",
            sql
        )))
    }

    fn play(&self, script: Script) -> Result<RawResult, EngineError> {
        match script {
            Script::Respond(result) => Ok(result.to_raw()),
            Script::Fail(message) => Err(EngineError::Failed(message)),
            Script::Stall { duration, then } => {
                if self.interrupt.wait(duration) {
                    Err(EngineError::Interrupted)
                } else {
                    Ok(then.to_raw())
                }
            }
            Script::FailMidStream { result, message } => Ok(result.to_raw_failing(&message)),
        }
    }

    fn reserved_keywords(&self) -> Result<RawResult, EngineError> {
        if let Some(message) = self.shared.catalog_failure.lock().clone() {
            return Err(EngineError::Failed(message));
        }
        let rows = self
            .shared
            .reserved
            .lock()
            .iter()
            .map(|keyword| vec![Value::Text(keyword.clone())])
            .collect();
        Ok(RawResult::materialized(
            vec![RawField::new("keyword_name", "VARCHAR")],
            rows,
        ))
    }

    fn show_tables(&self) -> RawResult {
        let rows = self
            .shared
            .views
            .lock()
            .keys()
            .map(|name| vec![Value::Text(name.clone())])
            .collect();
        RawResult::materialized(vec![RawField::new("name", "VARCHAR")], rows)
    }

    fn create_view(&self, name: &str, definition: &str) -> Result<RawResult, EngineError> {
        let lowered = name.to_ascii_lowercase();
        if self.shared.reserved.lock().iter().any(|k| *k == lowered) {
            return Err(EngineError::Failed(format!(
                "Parser Error: syntax error at or near \"{}\"",
                name
            )));
        }
        if let Some(path) = self
            .shared
            .missing_sources
            .lock()
            .iter()
            .find(|path| definition.contains(path.as_str()))
        {
            return Err(EngineError::Failed(format!(
                "IO Error: No files found that match the pattern \"{}\"",
                path
            )));
        }
        self.shared
            .views
            .lock()
            .insert(lowered, definition.to_string());
        Ok(RawResult::empty())
    }
}

fn parse_create_view(sql: &str) -> Option<(&str, &str)> {
    let head = sql.get(..CREATE_VIEW_PREFIX.len())?;
    if !head.eq_ignore_ascii_case(CREATE_VIEW_PREFIX) {
        return None;
    }
    let (name, definition) = sql[CREATE_VIEW_PREFIX.len()..].split_once(" AS ")?;
    Some((name.trim(), definition.trim()))
}

impl Engine for MemoryEngine {
    fn execute(&mut self, sql: &str) -> Result<RawResult, EngineError> {
        self.run(sql, &[], false)
    }

    fn execute_prepared(
        &mut self,
        sql: &str,
        parameters: &[Value],
    ) -> Result<RawResult, EngineError> {
        self.run(sql, parameters, true)
    }

    fn interrupt_handle(&self) -> Arc<dyn InterruptHandle> {
        self.interrupt.clone()
    }

    fn close(&mut self) -> Result<(), EngineError> {
        self.closed = true;
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
