//! SQLite connection backed by rusqlite

use rusqlite::types::ValueRef;
use std::path::{Path, PathBuf};

use crate::error::DatabaseError;
use crate::retrieval::{Connection, RawValue};

/// Lock contention clears up on its own; everything else is permanent
fn database_error(err: rusqlite::Error) -> DatabaseError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ) =>
        {
            DatabaseError::transient(err.to_string())
        }
        _ => DatabaseError::permanent(err.to_string()),
    }
}

fn raw_value(value: ValueRef<'_>) -> RawValue {
    match value {
        ValueRef::Null => RawValue::Null,
        ValueRef::Integer(i) => RawValue::Integer(i),
        ValueRef::Real(f) => RawValue::Real(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            RawValue::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

pub struct SqliteConnection {
    /// None for in-memory databases, which cannot be reopened
    path: Option<PathBuf>,
    inner: rusqlite::Connection,
}

impl SqliteConnection {
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Ok(Self {
            path: None,
            inner: rusqlite::Connection::open_in_memory().map_err(database_error)?,
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let path = path.as_ref().to_path_buf();
        let inner = rusqlite::Connection::open(&path).map_err(database_error)?;
        Ok(Self {
            path: Some(path),
            inner,
        })
    }

    /// Underlying rusqlite connection, for loading data
    pub fn inner(&self) -> &rusqlite::Connection {
        &self.inner
    }
}

impl Connection for SqliteConnection {
    fn execute(&mut self, sql: &str) -> Result<(), DatabaseError> {
        self.inner.execute_batch(sql).map_err(database_error)
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Vec<RawValue>>, DatabaseError> {
        let mut statement = self.inner.prepare(sql).map_err(database_error)?;
        let width = statement.column_count();
        let mut rows = statement.query([]).map_err(database_error)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(database_error)? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(raw_value(row.get_ref(i).map_err(database_error)?));
            }
            out.push(values);
        }
        Ok(out)
    }

    fn reconnect(&mut self) -> Result<(), DatabaseError> {
        if let Some(path) = &self.path {
            log::debug!("Reopening {}", path.display());
            self.inner = rusqlite::Connection::open(path).map_err(database_error)?;
        }
        Ok(())
    }
}
