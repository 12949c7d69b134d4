//! Running compiled statements and decoding their results
//!
//! Setup and the main query form one retriable unit: after a transient failure
//! the connection is re-established, any partially created tables are dropped and
//! the whole unit runs again. Cleanup always runs, and its failures are only
//! logged.

use chrono::NaiveDate;
use octofhir_ehrql_diagnostics::Diagnostic;
use octofhir_ehrql_ir::Dataset;
use octofhir_ehrql_types::{EhrqlType, PATIENT_ID, ResultRow, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::compiler::{CompiledDataset, SqlEngine};
use crate::config::EngineConfig;
use crate::dialect::Dialect;
use crate::error::{DatabaseError, ExecResult, ExecutionError, SqlError};
use crate::generated::{GeneratedTable, ReifyMode, Statement};
use crate::resolver::split_around;
use crate::sql_ast::{BinaryOperator, Expr, Select};
use crate::writer::{query_to_sql, statement_to_sql};

/// A value as returned by a database driver
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl RawValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
        }
    }

    /// Convert to a value of the declared type
    pub fn decode(self, ty: &EhrqlType, column: &str) -> ExecResult<Value> {
        let unexpected = |found: &RawValue| ExecutionError::UnexpectedValue {
            column: column.to_string(),
            expected: ty.to_string(),
            found: found.type_name().to_string(),
        };
        Ok(match (self, ty) {
            (Self::Null, _) => Value::Null,
            (Self::Integer(i), EhrqlType::Int) => Value::Int(i),
            (Self::Real(f), EhrqlType::Int) if f.fract() == 0.0 => Value::Int(f as i64),
            (Self::Integer(i), EhrqlType::Float) => Value::Float(i as f64),
            (Self::Real(f), EhrqlType::Float) => Value::Float(f),
            (Self::Integer(i @ (0 | 1)), EhrqlType::Bool) => Value::Bool(i == 1),
            (Self::Text(s), EhrqlType::Str) => Value::Str(s),
            (Self::Text(s), EhrqlType::Code(system)) => Value::code(system.clone(), s),
            (Self::Text(s), EhrqlType::Date) => match NaiveDate::parse_from_str(&s, "%Y-%m-%d") {
                Ok(date) => Value::Date(date),
                Err(_) => return Err(unexpected(&Self::Text(s))),
            },
            (other, _) => return Err(unexpected(&other)),
        })
    }
}

/// A database session able to run SQL text
pub trait Connection {
    /// Run a statement that returns no rows
    fn execute(&mut self, sql: &str) -> Result<(), DatabaseError>;

    /// Run a query and return every row
    fn query(&mut self, sql: &str) -> Result<Vec<Vec<RawValue>>, DatabaseError>;

    /// Replace the session after a failure; session-scoped state is lost
    fn reconnect(&mut self) -> Result<(), DatabaseError>;
}

/// Exponential backoff for transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.retry_backoff_ms),
        )
    }

    /// Delay before retry number `attempt` (zero-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Run `operation`, retrying transient failures
    ///
    /// With `reconnect`, the connection is replaced before each retry.
    pub fn run<C, T>(
        &self,
        connection: &mut C,
        description: &str,
        reconnect: bool,
        mut operation: impl FnMut(&mut C) -> Result<T, DatabaseError>,
    ) -> ExecResult<T>
    where
        C: Connection + ?Sized,
    {
        let mut attempt = 0;
        loop {
            let err = match operation(connection) {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_transient() => return Err(err.into()),
                Err(err) => err,
            };
            if attempt >= self.max_retries {
                return Err(ExecutionError::RetriesExhausted {
                    attempts: attempt + 1,
                    last: err,
                });
            }
            let delay = self.delay(attempt);
            log::warn!(
                "{} failed ({}), retrying in {:?} ({}/{})",
                description,
                err,
                delay,
                attempt + 1,
                self.max_retries
            );
            std::thread::sleep(delay);
            if reconnect {
                if let Err(err) = connection.reconnect() {
                    log::warn!("Reconnect failed: {}", err);
                }
            }
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

// === Execution ===

fn render(dialect: &dyn Dialect, statements: &[Statement]) -> ExecResult<Vec<String>> {
    Ok(statements
        .iter()
        .map(|statement| statement_to_sql(dialect, statement))
        .collect::<Result<_, _>>()?)
}

fn run_all<C: Connection + ?Sized>(connection: &mut C, statements: &[String]) -> Result<(), DatabaseError> {
    for sql in statements {
        log::trace!("Executing: {}", sql);
        connection.execute(sql)?;
    }
    Ok(())
}

/// Best-effort teardown; failures are logged as warnings and returned
fn run_cleanup<C: Connection + ?Sized>(connection: &mut C, statements: &[String]) -> Vec<Diagnostic> {
    let mut warnings = Vec::new();
    for sql in statements {
        if let Err(err) = connection.execute(sql) {
            let warning = Diagnostic::warning(
                ExecutionError::Database(err.clone()).code(),
                format!("cleanup statement failed: {err}"),
            )
            .with_help(sql.clone());
            log::warn!("{}", warning);
            warnings.push(warning);
        }
    }
    warnings
}

/// Run a compiled dataset and decode one row per patient
pub fn execute<C: Connection + ?Sized>(
    dialect: &dyn Dialect,
    config: &EngineConfig,
    compiled: &CompiledDataset,
    connection: &mut C,
) -> ExecResult<Vec<ResultRow>> {
    let (setup, main, cleanup) = split_around(&compiled.statements, &compiled.main)
        .ok_or_else(|| SqlError::internal("main statement missing from the plan"))?;
    let setup = render(dialect, setup)?;
    let cleanup = render(dialect, cleanup)?;
    let main = statement_to_sql(dialect, main)?;
    let retry = RetryPolicy::from_config(config);

    let result = match &compiled.results_table {
        None => retry.run(connection, "Dataset query", true, |c| {
            let rows = run_all(c, &setup).and_then(|()| c.query(&main));
            if rows.is_err() {
                run_cleanup(c, &cleanup);
            }
            rows
        }),
        Some(table) => retry
            .run(connection, "Dataset setup", true, |c| {
                let done = run_all(c, &setup);
                if done.is_err() {
                    run_cleanup(c, &cleanup);
                }
                done
            })
            .and_then(|()| {
                let fetcher = BatchFetcher {
                    dialect,
                    batch_size: config.batch_size.unwrap_or(usize::MAX),
                    unique_key: true,
                    retry,
                    // session-scoped temporary tables do not survive a reconnect
                    reconnect: table.mode() == ReifyMode::CreateTableAs,
                };
                fetcher.fetch(connection, table, PATIENT_ID)
            }),
    };
    run_cleanup(connection, &cleanup);

    let rows = result?;
    log::info!("Fetched {} result rows", rows.len());
    rows.into_iter()
        .map(|row| decode_row(row, &compiled.columns))
        .collect()
}

fn decode_row(row: Vec<RawValue>, columns: &[(String, EhrqlType)]) -> ExecResult<ResultRow> {
    if row.len() != columns.len() {
        return Err(SqlError::internal(format!(
            "expected {} result columns, found {}",
            columns.len(),
            row.len()
        ))
        .into());
    }
    let mut values = row.into_iter().zip(columns);
    let patient_id = match values.next() {
        Some((raw, (name, ty))) => match raw.decode(ty, name)? {
            Value::Int(id) => id,
            other => {
                return Err(ExecutionError::UnexpectedValue {
                    column: name.clone(),
                    expected: "patient id".to_string(),
                    found: other.type_name(),
                });
            }
        },
        None => return Err(SqlError::internal("empty result row").into()),
    };
    let mut result = ResultRow::new(patient_id);
    for (raw, (name, ty)) in values {
        let value = raw.decode(ty, name)?;
        result.values.insert(name.clone(), value);
    }
    Ok(result)
}

/// Pages through a table ordered by an integer key
pub struct BatchFetcher<'d> {
    pub dialect: &'d dyn Dialect,
    pub batch_size: usize,
    /// Whether each key appears on at most one row
    pub unique_key: bool,
    pub retry: RetryPolicy,
    pub reconnect: bool,
}

impl BatchFetcher<'_> {
    fn batch_query(&self, table: &Arc<GeneratedTable>, key: &str, after: Option<i64>) -> ExecResult<String> {
        let source = table.to_ref();
        let mut select = table
            .column_names()
            .fold(Select::from(source.clone()), |s, name| s.column(source.column(name), name));
        if let Some(after) = after {
            select = select.filter(Expr::binary(
                BinaryOperator::Gt,
                source.column(key),
                Expr::literal(after),
            ));
        }
        let select = select
            .order_by(source.column(key), false)
            .limit(self.batch_size as u64);
        Ok(query_to_sql(self.dialect, &select.into())?)
    }

    /// Every row of `table`, fetched `batch_size` rows at a time
    pub fn fetch<C: Connection + ?Sized>(
        &self,
        connection: &mut C,
        table: &Arc<GeneratedTable>,
        key: &str,
    ) -> ExecResult<Vec<Vec<RawValue>>> {
        let Some(key_index) = table.column_names().position(|name| name == key) else {
            return Err(SqlError::internal(format!("{} has no column {key}", table.name())).into());
        };
        let key_of = |row: &[RawValue]| match row.get(key_index) {
            Some(RawValue::Integer(k)) => Ok(*k),
            other => Err(ExecutionError::UnexpectedValue {
                column: key.to_string(),
                expected: "integer key".to_string(),
                found: other.map_or("nothing", RawValue::type_name).to_string(),
            }),
        };

        let mut rows = Vec::new();
        let mut after = None;
        loop {
            let sql = self.batch_query(table, key, after)?;
            let mut batch = self
                .retry
                .run(connection, "Batch fetch", self.reconnect, |c| c.query(&sql))?;
            log::debug!("Fetched batch of {} rows after key {:?}", batch.len(), after);

            let complete = batch.len() < self.batch_size;
            if !complete && !self.unique_key {
                // the final key may continue into the next batch
                let Some(last) = batch.last() else { break };
                let last_key = key_of(last.as_slice())?;
                let mut kept = batch.len();
                while kept > 0 && key_of(batch[kept - 1].as_slice())? == last_key {
                    kept -= 1;
                }
                if kept == 0 {
                    return Err(ExecutionError::BatchSizeTooSmall {
                        batch_size: self.batch_size,
                        key: last_key.to_string(),
                    });
                }
                batch.truncate(kept);
            }
            if let Some(last) = batch.last() {
                after = Some(key_of(last.as_slice())?);
            }
            rows.extend(batch);
            if complete {
                break;
            }
        }
        Ok(rows)
    }
}

impl SqlEngine {
    /// Compile a dataset, run it and return one row per patient in the population
    pub fn get_results<C: Connection + ?Sized>(
        &self,
        dataset: &Dataset,
        connection: &mut C,
    ) -> ExecResult<Vec<ResultRow>> {
        let compiled = self.compile(dataset)?;
        execute(self.dialect(), self.config(), &compiled, connection)
    }
}
