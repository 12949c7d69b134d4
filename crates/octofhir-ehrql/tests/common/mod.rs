//! Shared fixtures: one set of rows loaded into both engines

#![allow(dead_code)]

use octofhir_ehrql::sql::Connection;
use octofhir_ehrql::{
    BinaryFn, Column, DirectTableProvider, EhrqlType, EngineConfig, Frame, InMemoryDatabase,
    InMemoryEngine, ResultRow, Series, SqlEngine, SqliteConnection, TableSchema, Value,
    ir::FrameKind,
};
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
            ("score", Column::new(EhrqlType::Float)),
        ])
        .unwrap(),
    )
}

pub fn int(value: i64) -> Series {
    Series::literal(value).unwrap()
}

pub fn text(value: &str) -> Series {
    Series::literal(value).unwrap()
}

pub fn binary(op: BinaryFn, lhs: &Series, rhs: &Series) -> Series {
    Series::binary(op, lhs, rhs).unwrap()
}

fn event(
    patient_id: i64,
    date: (i32, u32, u32),
    code: &str,
    value: Option<i64>,
    score: Option<f64>,
) -> (i64, Vec<Value>) {
    (
        patient_id,
        vec![
            Value::date(date.0, date.1, date.2),
            Value::str(code),
            value.map_or(Value::Null, Value::Int),
            score.map_or(Value::Null, Value::Float),
        ],
    )
}

/// Rows for every fixture table.
///
/// Patient 3 has no events, patient 4 has no patients row, patient 1 has two
/// events with code "a" (one with a null value) and patient 5 has two events on
/// the same day.
pub fn fixture() -> Vec<(Frame, Vec<(i64, Vec<Value>)>)> {
    vec![
        (
            patients(),
            vec![
                (1, vec![Value::date(1980, 5, 1), Value::str("F")]),
                (2, vec![Value::date(1990, 1, 31), Value::str("M")]),
                (3, vec![Value::Null, Value::str("F")]),
                (5, vec![Value::date(2000, 2, 29), Value::str("M")]),
            ],
        ),
        (
            events(),
            vec![
                event(1, (2020, 1, 1), "a", Some(10), Some(0.5)),
                event(1, (2020, 1, 5), "b", Some(20), None),
                event(1, (2020, 3, 1), "a", None, Some(2.25)),
                event(2, (2021, 6, 1), "c", Some(5), Some(1.0)),
                event(4, (2019, 1, 1), "a", Some(1), None),
                event(5, (2022, 12, 31), "d", Some(-7), Some(-1.5)),
                event(5, (2022, 12, 31), "e", Some(3), None),
            ],
        ),
    ]
}

pub fn in_memory_database() -> InMemoryDatabase {
    fixture()
        .into_iter()
        .fold(InMemoryDatabase::new(), |db, (frame, rows)| {
            db.with_table(&frame, rows).unwrap()
        })
}

fn sql_type(ty: &EhrqlType) -> &'static str {
    match ty {
        EhrqlType::Int | EhrqlType::Bool => "INTEGER",
        EhrqlType::Float => "REAL",
        _ => "TEXT",
    }
}

fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => i64::from(*b).to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => format!("{f:?}"),
        Value::Str(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
        other => panic!("no SQLite literal for {other}"),
    }
}

pub fn sqlite_database() -> SqliteConnection {
    let mut connection = SqliteConnection::open_in_memory().unwrap();
    let mut script = String::new();
    for (frame, rows) in fixture() {
        let (FrameKind::SelectTable { name, schema } | FrameKind::SelectPatientTable { name, schema }) =
            frame.kind()
        else {
            panic!("fixture frames select tables");
        };
        let columns: Vec<String> = schema
            .iter()
            .map(|(column, spec)| format!("{column} {}", sql_type(&spec.ty)))
            .collect();
        script.push_str(&format!(
            "CREATE TABLE {name} (patient_id INTEGER, {});\n",
            columns.join(", ")
        ));
        for (patient_id, values) in rows {
            let values: Vec<String> = values.iter().map(sql_literal).collect();
            script.push_str(&format!(
                "INSERT INTO {name} VALUES ({patient_id}, {});\n",
                values.join(", ")
            ));
        }
    }
    connection.execute(&script).unwrap();
    connection
}

pub fn sql_engine(config: EngineConfig) -> SqlEngine {
    SqlEngine::for_dialect("sqlite", Arc::new(DirectTableProvider::new()), config).unwrap()
}

pub fn in_memory_results(dataset: &octofhir_ehrql::Dataset) -> Vec<ResultRow> {
    let db = in_memory_database();
    InMemoryEngine::new(&db).get_results(dataset).unwrap()
}

pub fn sqlite_results(dataset: &octofhir_ehrql::Dataset, config: EngineConfig) -> Vec<ResultRow> {
    sql_engine(config)
        .get_results(dataset, &mut sqlite_database())
        .unwrap()
}

pub fn column_values(rows: &[ResultRow], name: &str) -> Vec<Value> {
    rows.iter()
        .map(|row| row.get(name).cloned().unwrap_or(Value::Null))
        .collect()
}
