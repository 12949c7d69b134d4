//! End-to-end runs against an in-memory SQLite database

mod common;

use common::{binary, database, engine, events, int, patients};
use octofhir_ehrql_ir::types::{EhrqlType, ResultRow, Value};
use octofhir_ehrql_ir::{BinaryFn, Dataset, Series, UnaryFn};
use octofhir_ehrql_sql::{
    BatchFetcher, Connection, DatabaseError, EngineConfig, ExecutionError, GeneratedTable,
    RawValue, ReifyMode, RetryPolicy, SqliteConnection, SqliteDialect, TableDefinition,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rstest::rstest;
use std::time::Duration;

fn column_values(rows: &[ResultRow], name: &str) -> Vec<Value> {
    rows.iter().map(|row| row.get(name).cloned().unwrap_or(Value::Null)).collect()
}

fn summary_dataset() -> Dataset {
    let date = events().column("date").unwrap();
    let last = events().sort_by(&date).unwrap().last_for_patient().unwrap();
    Dataset::new(events().exists_for_patient().unwrap())
        .unwrap()
        .with_variable("n", events().count_for_patient().unwrap())
        .unwrap()
        .with_variable("total", events().column("value").unwrap().sum_for_patient().unwrap())
        .unwrap()
        .with_variable("last_code", last.column("code").unwrap())
        .unwrap()
        .with_variable("dob", patients().column("date_of_birth").unwrap())
        .unwrap()
}

// ============================================================================
// Reification modes
// ============================================================================

#[rstest]
#[case(ReifyMode::TempTable)]
#[case(ReifyMode::CreateTableAs)]
#[case(ReifyMode::Cte)]
#[case(ReifyMode::Subquery)]
fn test_summary_in_every_mode(#[case] mode: ReifyMode) {
    let engine = engine("sqlite", EngineConfig::new().with_reification(mode));
    let rows = engine.get_results(&summary_dataset(), &mut database()).unwrap();

    let ids: Vec<i64> = rows.iter().map(|row| row.patient_id).collect();
    assert_eq!(ids, vec![1, 2, 4]);
    assert_eq!(column_values(&rows, "n"), vec![Value::Int(3), Value::Int(1), Value::Int(1)]);
    assert_eq!(
        column_values(&rows, "total"),
        vec![Value::Int(30), Value::Int(5), Value::Int(1)]
    );
    assert_eq!(
        column_values(&rows, "last_code"),
        vec![Value::str("a"), Value::str("c"), Value::str("a")]
    );
    assert_eq!(
        column_values(&rows, "dob"),
        vec![Value::date(1980, 5, 1), Value::date(1990, 1, 31), Value::Null]
    );
}

#[test]
fn test_materialized_tables_are_dropped() {
    let engine = engine("sqlite", EngineConfig::new().with_reification(ReifyMode::CreateTableAs));
    let mut connection = database();
    engine.get_results(&summary_dataset(), &mut connection).unwrap();
    let leftover = connection
        .query("SELECT name FROM sqlite_master WHERE name LIKE 'tmp_%'")
        .unwrap();
    assert!(leftover.is_empty());
}

// ============================================================================
// Functions
// ============================================================================

#[test]
fn test_patient_population_with_dates_and_predicates() {
    let sex = patients().column("sex").unwrap();
    let population = binary(BinaryFn::Eq, &sex, &Series::literal("F").unwrap());
    let dob = patients().column("date_of_birth").unwrap();
    let index_date = Series::literal(Value::date(2021, 1, 1)).unwrap();
    let dataset = Dataset::new(population)
        .unwrap()
        .with_variable("has_events", events().exists_for_patient().unwrap())
        .unwrap()
        .with_variable("age", binary(BinaryFn::DateDifferenceInYears, &dob, &index_date))
        .unwrap()
        .with_variable("birth_month", Series::unary(UnaryFn::ToFirstOfMonth, &dob).unwrap())
        .unwrap();

    let rows = engine("sqlite", EngineConfig::new())
        .get_results(&dataset, &mut database())
        .unwrap();
    assert_eq!(rows.iter().map(|r| r.patient_id).collect::<Vec<_>>(), vec![1, 3]);
    assert_eq!(
        column_values(&rows, "has_events"),
        vec![Value::Bool(true), Value::Bool(false)]
    );
    assert_eq!(column_values(&rows, "age"), vec![Value::Int(40), Value::Null]);
    assert_eq!(
        column_values(&rows, "birth_month"),
        vec![Value::date(1980, 5, 1), Value::Null]
    );
}

#[rstest]
#[case(100)]
#[case(2)]
fn test_membership_in_literal_sets(#[case] max_in_list_size: usize) {
    let code = events().column("code").unwrap();
    let codes = Series::set(
        EhrqlType::Str,
        [Value::str("a"), Value::str("c"), Value::str("z")],
    )
    .unwrap();
    let matching = events().filter(&code.is_in(&codes).unwrap()).unwrap();
    let dataset = Dataset::new(events().exists_for_patient().unwrap())
        .unwrap()
        .with_variable("matches", matching.count_for_patient().unwrap())
        .unwrap();

    let config = EngineConfig::new().with_max_in_list_size(max_in_list_size);
    let rows = engine("sqlite", config).get_results(&dataset, &mut database()).unwrap();
    assert_eq!(
        column_values(&rows, "matches"),
        vec![Value::Int(2), Value::Int(1), Value::Int(1)]
    );
}

#[test]
fn test_membership_in_per_patient_sets() {
    let value = events().column("value").unwrap();
    let big = events().filter(&binary(BinaryFn::Gt, &value, &int(5))).unwrap();
    let big_codes = big.column("code").unwrap().combine_as_set().unwrap();
    let date = events().column("date").unwrap();
    let last_code = events()
        .sort_by(&date)
        .unwrap()
        .last_for_patient()
        .unwrap()
        .column("code")
        .unwrap();
    let dataset = Dataset::new(events().exists_for_patient().unwrap())
        .unwrap()
        .with_variable("repeat", last_code.is_in(&big_codes).unwrap())
        .unwrap();

    let rows = engine("sqlite", EngineConfig::new())
        .get_results(&dataset, &mut database())
        .unwrap();
    assert_eq!(
        column_values(&rows, "repeat"),
        vec![Value::Bool(true), Value::Bool(false), Value::Bool(false)]
    );
}

#[test]
fn test_episodes_and_means() {
    let date = events().column("date").unwrap();
    let value = events().column("value").unwrap();
    let dataset = Dataset::new(events().exists_for_patient().unwrap())
        .unwrap()
        .with_variable("episodes", date.count_episodes_for_patient(7).unwrap())
        .unwrap()
        .with_variable("mean", value.mean_for_patient().unwrap())
        .unwrap()
        .with_variable("codes", events().column("code").unwrap().count_distinct_for_patient().unwrap())
        .unwrap();

    let rows = engine("sqlite", EngineConfig::new())
        .get_results(&dataset, &mut database())
        .unwrap();
    assert_eq!(
        column_values(&rows, "episodes"),
        vec![Value::Int(2), Value::Int(1), Value::Int(1)]
    );
    assert_eq!(
        column_values(&rows, "mean"),
        vec![Value::Float(15.0), Value::Float(5.0), Value::Float(1.0)]
    );
    assert_eq!(
        column_values(&rows, "codes"),
        vec![Value::Int(2), Value::Int(1), Value::Int(1)]
    );
}

#[test]
fn test_episodes_across_a_month_boundary() {
    let mut connection = database();
    connection
        .execute(
            "INSERT INTO events VALUES
                (7, '2021-01-01', 'x', NULL), (7, '2021-01-02', 'x', NULL),
                (7, '2021-01-10', 'x', NULL), (7, '2021-01-11', 'x', NULL),
                (7, '2021-02-09', 'x', NULL);",
        )
        .unwrap();
    let date = events().column("date").unwrap();
    let dataset = Dataset::new(events().exists_for_patient().unwrap())
        .unwrap()
        .with_variable("episodes", date.count_episodes_for_patient(5).unwrap())
        .unwrap();

    let rows = engine("sqlite", EngineConfig::new())
        .get_results(&dataset, &mut connection)
        .unwrap();
    let patient = rows.iter().find(|row| row.patient_id == 7).unwrap();
    assert_eq!(patient.get("episodes"), Some(&Value::Int(3)));
}

// ============================================================================
// Batching
// ============================================================================

/// Delegates to SQLite and counts queries
struct CountingConnection {
    inner: SqliteConnection,
    queries: usize,
}

impl Connection for CountingConnection {
    fn execute(&mut self, sql: &str) -> Result<(), DatabaseError> {
        self.inner.execute(sql)
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Vec<RawValue>>, DatabaseError> {
        self.queries += 1;
        self.inner.query(sql)
    }

    fn reconnect(&mut self) -> Result<(), DatabaseError> {
        self.inner.reconnect()
    }
}

#[test]
fn test_results_are_fetched_in_batches() {
    let engine = engine("sqlite", EngineConfig::new().with_batch_size(2));
    let mut connection = CountingConnection {
        inner: database(),
        queries: 0,
    };
    let rows = engine.get_results(&summary_dataset(), &mut connection).unwrap();
    assert_eq!(rows.iter().map(|r| r.patient_id).collect::<Vec<_>>(), vec![1, 2, 4]);
    // one full batch, then a short one
    assert_eq!(connection.queries, 2);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_batch_size_does_not_change_results(batch_size in 1usize..6) {
        let unbatched = engine("sqlite", EngineConfig::new())
            .get_results(&summary_dataset(), &mut database())
            .unwrap();
        let batched = engine("sqlite", EngineConfig::new().with_batch_size(batch_size))
            .get_results(&summary_dataset(), &mut database())
            .unwrap();
        prop_assert_eq!(batched, unbatched);
    }
}

fn events_table() -> std::sync::Arc<GeneratedTable> {
    GeneratedTable::new(
        "events".to_string(),
        "events".to_string(),
        None,
        vec![
            ("patient_id".to_string(), EhrqlType::Int),
            ("value".to_string(), EhrqlType::Int),
        ],
        TableDefinition::Rows(vec![]),
        ReifyMode::CreateTableAs,
    )
}

fn fetcher(batch_size: usize) -> BatchFetcher<'static> {
    BatchFetcher {
        dialect: &SqliteDialect,
        batch_size,
        unique_key: false,
        retry: RetryPolicy::new(0, Duration::ZERO),
        reconnect: false,
    }
}

#[test]
fn test_non_unique_keys_never_split_across_batches() {
    let rows = fetcher(4)
        .fetch(&mut database(), &events_table(), "patient_id")
        .unwrap();
    assert_eq!(rows.len(), 5);
    let keys: Vec<_> = rows.iter().map(|row| row[0].clone()).collect();
    assert_eq!(keys, [1, 1, 1, 2, 4].map(RawValue::Integer).to_vec());
}

#[test]
fn test_batch_smaller_than_one_key_fails() {
    let err = fetcher(2)
        .fetch(&mut database(), &events_table(), "patient_id")
        .unwrap_err();
    assert_eq!(
        err,
        ExecutionError::BatchSizeTooSmall {
            batch_size: 2,
            key: "1".to_string()
        }
    );
}

#[test]
fn test_unique_keys_page_in_full_batches() {
    let mut connection = CountingConnection {
        inner: database(),
        queries: 0,
    };
    connection
        .execute(
            "CREATE TABLE numbers AS WITH RECURSIVE n(patient_id) AS \
             (SELECT 1 UNION ALL SELECT patient_id + 1 FROM n WHERE patient_id < 130) \
             SELECT patient_id, patient_id * 10 AS value FROM n",
        )
        .unwrap();
    let table = GeneratedTable::new(
        "numbers".to_string(),
        "numbers".to_string(),
        None,
        vec![
            ("patient_id".to_string(), EhrqlType::Int),
            ("value".to_string(), EhrqlType::Int),
        ],
        TableDefinition::Rows(vec![]),
        ReifyMode::CreateTableAs,
    );
    let fetcher = BatchFetcher {
        unique_key: true,
        ..fetcher(50)
    };

    let rows = fetcher.fetch(&mut connection, &table, "patient_id").unwrap();

    // 50, 50, then a short page of 30
    assert_eq!(connection.queries, 3);
    let keys: Vec<_> = rows.iter().map(|row| row[0].clone()).collect();
    assert_eq!(keys, (1..=130).map(RawValue::Integer).collect::<Vec<_>>());
}
