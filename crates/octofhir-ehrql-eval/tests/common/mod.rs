//! Shared fixtures: a small patients/events schema and matching in-memory data

#![allow(dead_code)]

use octofhir_ehrql_eval::InMemoryDatabase;
use octofhir_ehrql_ir::types::{Column, EhrqlType, ResultRow, TableSchema, Value};
use octofhir_ehrql_ir::{BinaryFn, Frame, Series};

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

fn event(patient_id: i64, date: (i32, u32, u32), code: &str, value: Option<i64>) -> (i64, Vec<Value>) {
    (
        patient_id,
        vec![
            Value::date(date.0, date.1, date.2),
            Value::str(code),
            value.map_or(Value::Null, Value::Int),
        ],
    )
}

/// Patient 3 has no events; patient 4 has no patients row
pub fn database() -> InMemoryDatabase {
    InMemoryDatabase::new()
        .with_table(
            &patients(),
            [
                (1, vec![Value::date(1980, 5, 1), Value::str("F")]),
                (2, vec![Value::date(1990, 1, 31), Value::str("M")]),
                (3, vec![Value::Null, Value::str("F")]),
            ],
        )
        .unwrap()
        .with_table(
            &events(),
            [
                event(1, (2020, 1, 1), "a", Some(10)),
                event(1, (2020, 1, 5), "b", Some(20)),
                event(1, (2020, 3, 1), "a", None),
                event(2, (2021, 6, 1), "c", Some(5)),
                event(4, (2019, 1, 1), "a", Some(1)),
            ],
        )
        .unwrap()
}

pub fn ids(rows: &[ResultRow]) -> Vec<i64> {
    rows.iter().map(|row| row.patient_id).collect()
}

pub fn column_values(rows: &[ResultRow], name: &str) -> Vec<Value> {
    rows.iter()
        .map(|row| row.get(name).cloned().unwrap_or(Value::Null))
        .collect()
}
