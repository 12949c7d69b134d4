//! The SQL engine and the in-memory engine must agree on every dataset

mod common;

use common::{
    binary, column_values, events, in_memory_results, int, patients, sqlite_results, text,
};
use octofhir_ehrql::{
    BinaryFn, Column, Dataset, EhrqlType, EngineConfig, Frame, InlineRow, ReifyMode, Series,
    TableSchema, UnaryFn, Value,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rstest::rstest;

fn unary(op: UnaryFn, operand: &Series) -> Series {
    Series::unary(op, operand).unwrap()
}

fn date(year: i32, month: u32, day: u32) -> Series {
    Series::literal(Value::date(year, month, day)).unwrap()
}

fn has_events() -> Dataset {
    Dataset::new(events().exists_for_patient().unwrap()).unwrap()
}

fn registered_patients() -> Dataset {
    let sex = patients().column("sex").unwrap();
    Dataset::new(unary(UnaryFn::Not, &sex.is_null().unwrap())).unwrap()
}

fn first_by_date() -> Frame {
    let date = events().column("date").unwrap();
    events().sort_by(&date).unwrap().first_for_patient().unwrap()
}

// ============================================================================
// Scenarios
// ============================================================================

fn summary() -> Dataset {
    let date = events().column("date").unwrap();
    let last = events().sort_by(&date).unwrap().last_for_patient().unwrap();
    has_events()
        .with_variable("n", events().count_for_patient().unwrap())
        .unwrap()
        .with_variable("total", events().column("value").unwrap().sum_for_patient().unwrap())
        .unwrap()
        .with_variable("last_code", last.column("code").unwrap())
        .unwrap()
        .with_variable("dob", patients().column("date_of_birth").unwrap())
        .unwrap()
}

fn demographics() -> Dataset {
    let dob = patients().column("date_of_birth").unwrap();
    let index_date = date(2023, 1, 1);
    registered_patients()
        .with_variable("age", binary(BinaryFn::DateDifferenceInYears, &dob, &index_date))
        .unwrap()
        .with_variable(
            "months_old",
            binary(BinaryFn::DateDifferenceInMonths, &dob, &index_date),
        )
        .unwrap()
        .with_variable(
            "days_old",
            binary(BinaryFn::DateDifferenceInDays, &dob, &index_date),
        )
        .unwrap()
        .with_variable("birth_year", unary(UnaryFn::YearFromDate, &dob))
        .unwrap()
        .with_variable("birth_month", unary(UnaryFn::MonthFromDate, &dob))
        .unwrap()
        .with_variable("birth_day", unary(UnaryFn::DayFromDate, &dob))
        .unwrap()
        .with_variable("birth_year_start", unary(UnaryFn::ToFirstOfYear, &dob))
        .unwrap()
        .with_variable("birth_month_start", unary(UnaryFn::ToFirstOfMonth, &dob))
        .unwrap()
        .with_variable("plus_month", binary(BinaryFn::DateAddMonths, &dob, &int(1)))
        .unwrap()
        .with_variable("plus_year", binary(BinaryFn::DateAddYears, &dob, &int(1)))
        .unwrap()
        .with_variable("minus_days", binary(BinaryFn::DateAddDays, &dob, &int(-60)))
        .unwrap()
}

fn arithmetic() -> Dataset {
    let value = first_by_date().column("value").unwrap();
    let score = first_by_date().column("score").unwrap();
    has_events()
        .with_variable("negated", unary(UnaryFn::Negate, &value))
        .unwrap()
        .with_variable("doubled", binary(BinaryFn::Multiply, &value, &int(2)))
        .unwrap()
        .with_variable("less_three", binary(BinaryFn::Subtract, &value, &int(3)))
        .unwrap()
        .with_variable("quarter", binary(BinaryFn::TrueDivide, &value, &int(4)))
        .unwrap()
        .with_variable("third", binary(BinaryFn::FloorDivide, &value, &int(3)))
        .unwrap()
        .with_variable("by_zero", binary(BinaryFn::TrueDivide, &value, &int(0)))
        .unwrap()
        .with_variable("as_float", unary(UnaryFn::CastToFloat, &value))
        .unwrap()
        .with_variable("score_as_int", unary(UnaryFn::CastToInt, &score))
        .unwrap()
        .with_variable(
            "biggest",
            Series::maximum_of(&[value.clone(), int(0), binary(BinaryFn::Add, &value, &int(1))])
                .unwrap(),
        )
        .unwrap()
        .with_variable("smallest", Series::minimum_of(&[value, int(4)]).unwrap())
        .unwrap()
}

fn logic() -> Dataset {
    let max = events().column("value").unwrap().max_for_patient().unwrap();
    let big = binary(BinaryFn::Gt, &max, &int(5));
    let dob = patients().column("date_of_birth").unwrap();
    let no_dob = dob.is_null().unwrap();
    let young = binary(BinaryFn::Gt, &dob, &date(1985, 1, 1));
    let sex = patients().column("sex").unwrap();
    registered_patients()
        .with_variable("big_and_no_dob", binary(BinaryFn::And, &big, &no_dob))
        .unwrap()
        .with_variable("big_or_young", binary(BinaryFn::Or, &big, &young))
        .unwrap()
        .with_variable("not_big", unary(UnaryFn::Not, &big))
        .unwrap()
        .with_variable("not_male", binary(BinaryFn::Ne, &sex, &text("M")))
        .unwrap()
        .with_variable("female", binary(BinaryFn::StringContains, &sex, &text("F")))
        .unwrap()
}

fn aggregates() -> Dataset {
    let value = events().column("value").unwrap();
    let score = events().column("score").unwrap();
    let date = events().column("date").unwrap();
    let code = events().column("code").unwrap();
    registered_patients()
        .with_variable("has_events", events().exists_for_patient().unwrap())
        .unwrap()
        .with_variable("n", events().count_for_patient().unwrap())
        .unwrap()
        .with_variable("lowest", value.min_for_patient().unwrap())
        .unwrap()
        .with_variable("highest", value.max_for_patient().unwrap())
        .unwrap()
        .with_variable("total", value.sum_for_patient().unwrap())
        .unwrap()
        .with_variable("score_total", score.sum_for_patient().unwrap())
        .unwrap()
        .with_variable("average", value.mean_for_patient().unwrap())
        .unwrap()
        .with_variable("codes", code.count_distinct_for_patient().unwrap())
        .unwrap()
        .with_variable("episodes", date.count_episodes_for_patient(30).unwrap())
        .unwrap()
        .with_variable("latest", date.max_for_patient().unwrap())
        .unwrap()
}

fn membership() -> Dataset {
    let code = events().column("code").unwrap();
    let wanted = Series::set(
        EhrqlType::Str,
        [Value::str("a"), Value::str("c"), Value::str("e")],
    )
    .unwrap();
    let nothing = Series::set(EhrqlType::Str, []).unwrap();
    let matching = events().filter(&code.is_in(&wanted).unwrap()).unwrap();
    let codes = code.combine_as_set().unwrap();
    let first_code = first_by_date().column("code").unwrap();
    has_events()
        .with_variable("matching", matching.count_for_patient().unwrap())
        .unwrap()
        .with_variable("has_b", text("b").is_in(&codes).unwrap())
        .unwrap()
        .with_variable("first_is_wanted", first_code.is_in(&wanted).unwrap())
        .unwrap()
        .with_variable("in_nothing", first_code.is_in(&nothing).unwrap())
        .unwrap()
}

fn picks() -> Dataset {
    let date = events().column("date").unwrap();
    let code = events().column("code").unwrap();
    let by_code_then_date = events().sort_by(&date).unwrap().sort_by(&code).unwrap();
    let by_code = events().sort_by(&code).unwrap();
    has_events()
        .with_variable(
            "last_by_code_value",
            by_code_then_date.last_for_patient().unwrap().column("value").unwrap(),
        )
        .unwrap()
        .with_variable(
            "first_by_code_value",
            by_code.first_for_patient().unwrap().column("value").unwrap(),
        )
        .unwrap()
        .with_variable("first_value", first_by_date().column("value").unwrap())
        .unwrap()
        .with_variable("first_score", first_by_date().column("score").unwrap())
        .unwrap()
}

fn case_when() -> Dataset {
    let total = events().column("value").unwrap().sum_for_patient().unwrap();
    let high = binary(BinaryFn::Gt, &total, &int(25));
    let mid = binary(BinaryFn::Gt, &total, &int(2));
    let bucket = Series::case(
        vec![(high.clone(), text("high")), (mid, text("mid"))],
        Some(text("low")),
    )
    .unwrap();
    let only_high = Series::case(vec![(high, text("high"))], None).unwrap();
    has_events()
        .with_variable("bucket", bucket)
        .unwrap()
        .with_variable("only_high", only_high)
        .unwrap()
}

fn inline_table() -> Dataset {
    let scores = Frame::inline_patient_table(
        TableSchema::new([
            ("score", Column::new(EhrqlType::Int)),
            ("label", Column::new(EhrqlType::Str)),
        ])
        .unwrap(),
        [
            InlineRow::new(1, [Value::Int(7), Value::str("it's")]),
            InlineRow::new(3, [Value::Null, Value::str("none")]),
            InlineRow::new(6, [Value::Int(9), Value::Null]),
        ],
    )
    .unwrap();
    let label = scores.column("label").unwrap();
    Dataset::new(unary(UnaryFn::Not, &label.is_null().unwrap()))
        .unwrap()
        .with_variable("score", scores.column("score").unwrap())
        .unwrap()
        .with_variable("sex", patients().column("sex").unwrap())
        .unwrap()
        .with_variable("n", events().count_for_patient().unwrap())
        .unwrap()
}

fn lineage() -> Dataset {
    let value = events().column("value").unwrap();
    let big = events().filter(&binary(BinaryFn::Gt, &value, &int(2))).unwrap();
    let doubled = binary(BinaryFn::Add, &value, &big.column("value").unwrap());
    let dob = patients().column("date_of_birth").unwrap();
    let date = events().column("date").unwrap();
    let age_at_event = binary(BinaryFn::DateDifferenceInYears, &dob, &date);
    let adult_events = big
        .filter(&binary(BinaryFn::Ge, &age_at_event, &int(22)))
        .unwrap();
    has_events()
        .with_variable("doubled_total", doubled.sum_for_patient().unwrap())
        .unwrap()
        .with_variable("adult_big_events", adult_events.count_for_patient().unwrap())
        .unwrap()
}

// ============================================================================
// Agreement
// ============================================================================

#[rstest]
fn test_engines_agree(
    #[values(
        summary,
        demographics,
        arithmetic,
        logic,
        aggregates,
        membership,
        picks,
        case_when,
        inline_table,
        lineage
    )]
    scenario: fn() -> Dataset,
    #[values(
        ReifyMode::TempTable,
        ReifyMode::CreateTableAs,
        ReifyMode::Cte,
        ReifyMode::Subquery
    )]
    mode: ReifyMode,
) {
    let dataset = scenario();
    let expected = in_memory_results(&dataset);
    let actual = sqlite_results(&dataset, EngineConfig::new().with_reification(mode));
    assert_eq!(actual, expected);
}

#[rstest]
#[case(summary)]
#[case(aggregates)]
#[case(picks)]
fn test_batched_results_agree(#[case] scenario: fn() -> Dataset) {
    let dataset = scenario();
    let config = EngineConfig::new().with_batch_size(2);
    assert_eq!(sqlite_results(&dataset, config), in_memory_results(&dataset));
}

#[test]
fn test_membership_table_agrees_with_in_list() {
    let dataset = membership();
    let expected = in_memory_results(&dataset);
    let config = EngineConfig::new().with_max_in_list_size(1);
    assert_eq!(sqlite_results(&dataset, config), expected);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_thresholds_agree(gap in 0i64..120, floor in -10i64..30) {
        let date = events().column("date").unwrap();
        let value = events().column("value").unwrap();
        let above = events().filter(&binary(BinaryFn::Ge, &value, &int(floor))).unwrap();
        let dataset = has_events()
            .with_variable("episodes", date.count_episodes_for_patient(gap).unwrap())
            .unwrap()
            .with_variable("above", above.count_for_patient().unwrap())
            .unwrap();
        prop_assert_eq!(
            sqlite_results(&dataset, EngineConfig::new()),
            in_memory_results(&dataset)
        );
    }
}

// ============================================================================
// Expected values
// ============================================================================

#[test]
fn test_picks_resolve_ties_deterministically() {
    let rows = in_memory_results(&picks());
    let ids: Vec<i64> = rows.iter().map(|row| row.patient_id).collect();
    assert_eq!(ids, vec![1, 2, 4, 5]);
    // most recent sort (code) is primary
    assert_eq!(
        column_values(&rows, "last_by_code_value"),
        vec![Value::Int(20), Value::Int(5), Value::Int(1), Value::Int(3)]
    );
    // patient 1's two "a" rows tie on code; the null value sorts first
    assert_eq!(
        column_values(&rows, "first_by_code_value"),
        vec![Value::Null, Value::Int(5), Value::Int(1), Value::Int(-7)]
    );
    // patient 5's events share a date; score then value break the tie
    assert_eq!(
        column_values(&rows, "first_value"),
        vec![Value::Int(10), Value::Int(5), Value::Int(1), Value::Int(3)]
    );
}

#[test]
fn test_demographics_calendar_rules() {
    let rows = in_memory_results(&demographics());
    let ids: Vec<i64> = rows.iter().map(|row| row.patient_id).collect();
    assert_eq!(ids, vec![1, 2, 3, 5]);
    assert_eq!(
        column_values(&rows, "plus_month"),
        vec![
            Value::date(1980, 6, 1),
            Value::date(1990, 3, 1),
            Value::Null,
            Value::date(2000, 3, 29)
        ]
    );
    assert_eq!(
        column_values(&rows, "plus_year"),
        vec![
            Value::date(1981, 5, 1),
            Value::date(1991, 1, 31),
            Value::Null,
            Value::date(2001, 3, 1)
        ]
    );
    assert_eq!(
        column_values(&rows, "age"),
        vec![Value::Int(42), Value::Int(32), Value::Null, Value::Int(22)]
    );
}

#[test]
fn test_logic_keeps_nulls() {
    let rows = in_memory_results(&logic());
    // patient 3 has neither events nor a date of birth
    assert_eq!(rows[2].patient_id, 3);
    assert_eq!(rows[2].get("big_and_no_dob"), Some(&Value::Null));
    assert_eq!(rows[2].get("big_or_young"), Some(&Value::Null));
    assert_eq!(rows[2].get("not_big"), Some(&Value::Null));
    assert_eq!(rows[2].get("female"), Some(&Value::Bool(true)));
    // patient 1: big, dob known
    assert_eq!(rows[0].get("big_and_no_dob"), Some(&Value::Bool(false)));
    assert_eq!(rows[0].get("big_or_young"), Some(&Value::Bool(true)));
}
