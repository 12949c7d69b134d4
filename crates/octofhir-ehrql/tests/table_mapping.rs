//! Logical tables resolved through a mapped provider against SQLite

mod common;

use common::{column_values, events, in_memory_results, patients, sqlite_database};
use octofhir_ehrql::sql::Connection;
use octofhir_ehrql::{Dataset, EngineConfig, MappedTableProvider, SqlEngine, Value};
use pretty_assertions::assert_eq;
use std::sync::Arc;

const MAPPINGS: &str = r#"{
    "patients": {
        "kind": "mapped",
        "name": "demographics",
        "patient_id": "pid",
        "columns": {"date_of_birth": "dob", "sex": "gender"}
    },
    "events": {
        "kind": "query",
        "sql": "SELECT patient_id, date, code, value, score FROM events WHERE code <> 'e'"
    }
}"#;

fn summary() -> Dataset {
    Dataset::new(events().exists_for_patient().unwrap())
        .unwrap()
        .with_variable("n", events().count_for_patient().unwrap())
        .unwrap()
        .with_variable("sex", patients().column("sex").unwrap())
        .unwrap()
}

#[test]
fn test_mapped_tables_read_renamed_columns() {
    let mut connection = sqlite_database();
    connection
        .execute(
            "CREATE TABLE demographics AS \
             SELECT patient_id AS pid, date_of_birth AS dob, sex AS gender FROM patients",
        )
        .unwrap();
    let provider = MappedTableProvider::from_json(MAPPINGS).unwrap();
    let engine = SqlEngine::for_dialect("sqlite", Arc::new(provider), EngineConfig::new())
        .unwrap_or_else(|err| panic!("{err}"));

    let rows = engine.get_results(&summary(), &mut connection).unwrap();

    let ids: Vec<i64> = rows.iter().map(|row| row.patient_id).collect();
    assert_eq!(ids, vec![1, 2, 4, 5]);
    // the mapping query drops patient 5's "e" event
    assert_eq!(
        column_values(&rows, "n"),
        vec![Value::Int(3), Value::Int(1), Value::Int(1), Value::Int(1)]
    );
    assert_eq!(
        column_values(&rows, "sex"),
        column_values(&in_memory_results(&summary()), "sex")
    );
}

#[test]
fn test_unmapped_table_is_a_provider_error() {
    let mut connection = sqlite_database();
    let provider = MappedTableProvider::new();
    let engine = SqlEngine::for_dialect("sqlite", Arc::new(provider), EngineConfig::new())
        .unwrap_or_else(|err| panic!("{err}"));
    let err: octofhir_ehrql::EhrqlError = engine
        .get_results(&summary(), &mut connection)
        .unwrap_err()
        .into();
    assert_eq!(err.code(), octofhir_ehrql::diagnostics::EHQL0203);
}

#[test]
fn test_direct_fallback_covers_unmapped_tables() {
    let mut connection = sqlite_database();
    let provider = MappedTableProvider::new().with_direct_fallback();
    let engine = SqlEngine::for_dialect("sqlite", Arc::new(provider), EngineConfig::new())
        .unwrap_or_else(|err| panic!("{err}"));
    let rows = engine.get_results(&summary(), &mut connection).unwrap();
    assert_eq!(rows, in_memory_results(&summary()));
}
