//! Shared fixtures: a small patients/events schema and matching SQLite data

#![allow(dead_code)]

use octofhir_ehrql_ir::types::{Column, EhrqlType, TableSchema};
use octofhir_ehrql_ir::{BinaryFn, Frame, Series};
use octofhir_ehrql_model::DirectTableProvider;
use octofhir_ehrql_sql::{Connection, EngineConfig, SqlEngine, SqliteConnection};
use std::sync::Arc;

pub fn patients() -> Frame {
    Frame::select_patient_table(
        "patients",
        TableSchema::new([
            ("date_of_birth", Column::new(EhrqlType::Date)),
            ("sex", Column::new(EhrqlType::Str)),
        ])
        .unwrap(),
    )
}

pub fn events() -> Frame {
    Frame::select_table(
        "events",
        TableSchema::new([
            ("date", Column::new(EhrqlType::Date)),
            ("code", Column::new(EhrqlType::Str)),
            ("value", Column::new(EhrqlType::Int)),
        ])
        .unwrap(),
    )
}

pub fn int(value: i64) -> Series {
    Series::literal(value).unwrap()
}

pub fn binary(op: BinaryFn, lhs: &Series, rhs: &Series) -> Series {
    Series::binary(op, lhs, rhs).unwrap()
}

/// Patient 3 has no events; patient 4 has no patients row
pub fn database() -> SqliteConnection {
    let mut connection = SqliteConnection::open_in_memory().unwrap();
    connection
        .execute(
            "CREATE TABLE patients (patient_id INTEGER, date_of_birth TEXT, sex TEXT);
             INSERT INTO patients VALUES
                (1, '1980-05-01', 'F'), (2, '1990-01-31', 'M'), (3, NULL, 'F');
             CREATE TABLE events (patient_id INTEGER, date TEXT, code TEXT, value INTEGER);
             INSERT INTO events VALUES
                (1, '2020-01-01', 'a', 10), (1, '2020-01-05', 'b', 20), (1, '2020-03-01', 'a', NULL),
                (2, '2021-06-01', 'c', 5),
                (4, '2019-01-01', 'a', 1);",
        )
        .unwrap();
    connection
}

pub fn engine(dialect: &str, config: EngineConfig) -> SqlEngine {
    SqlEngine::for_dialect(dialect, Arc::new(DirectTableProvider::new()), config).unwrap()
}
