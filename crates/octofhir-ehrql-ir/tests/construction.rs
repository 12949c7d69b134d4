//! Construction-time validation of the query model

use octofhir_ehrql_ir::types::{Column, EhrqlType, TableSchema, Value};
use octofhir_ehrql_ir::{
    Aggregate, BinaryFn, Domain, Frame, QueryModelError, Series, UnaryFn,
};
use proptest::prelude::*;
use rstest::rstest;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

fn events() -> Frame {
    Frame::select_table(
        "events",
        TableSchema::new([
            ("date", Column::new(EhrqlType::Date)),
            ("value", Column::new(EhrqlType::Int)),
            ("flag", Column::new(EhrqlType::Bool)),
            ("code", Column::new(EhrqlType::code("snomedct"))),
        ])
        .unwrap(),
    )
}

fn medications() -> Frame {
    Frame::select_table(
        "medications",
        TableSchema::new([("value", Column::new(EhrqlType::Int))]).unwrap(),
    )
}

fn patients() -> Frame {
    Frame::select_patient_table(
        "patients",
        TableSchema::new([("date_of_birth", Column::new(EhrqlType::Date))]).unwrap(),
    )
}

fn int(v: i64) -> Series {
    Series::literal(v).unwrap()
}

fn value_gt(frame: &Frame, threshold: i64) -> Series {
    let value = frame.column("value").unwrap();
    Series::binary(BinaryFn::Gt, &value, &int(threshold)).unwrap()
}

fn hash_of<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

// ============================================================================
// Domains
// ============================================================================

#[test]
fn test_diverging_filter_lineages_raise_domain_error() {
    let over_10 = events().filter(&value_gt(&events(), 10)).unwrap();
    let over_20 = events().filter(&value_gt(&events(), 20)).unwrap();
    let a = over_10.column("value").unwrap();
    let b = over_20.column("value").unwrap();

    let err = Series::binary(BinaryFn::Add, &a, &b).unwrap_err();
    assert!(matches!(err, QueryModelError::DomainMismatch(_)));
    assert_eq!(err.code().to_string(), "EHQL0001");
}

#[test]
fn test_different_tables_raise_domain_error() {
    let a = events().column("value").unwrap();
    let b = medications().column("value").unwrap();
    assert!(matches!(
        Series::binary(BinaryFn::Eq, &a, &b),
        Err(QueryModelError::DomainMismatch(_))
    ));
}

#[test]
fn test_ancestor_lineage_combines_into_descendant_domain() {
    let filtered = events().filter(&value_gt(&events(), 10)).unwrap();
    let base_value = events().column("value").unwrap();
    let filtered_value = filtered.column("value").unwrap();

    let sum = Series::binary(BinaryFn::Add, &base_value, &filtered_value).unwrap();
    assert_eq!(sum.domain(), &Domain::Rows(filtered.clone()));

    // and the other way round
    let sum = Series::binary(BinaryFn::Add, &filtered_value, &base_value).unwrap();
    assert_eq!(sum.domain(), &Domain::Rows(filtered));
}

#[test]
fn test_patient_series_combine_with_anything() {
    let dob = patients().column("date_of_birth").unwrap();
    let date = events().column("date").unwrap();
    let age = Series::binary(BinaryFn::DateDifferenceInYears, &dob, &date).unwrap();
    assert_eq!(age.domain(), &Domain::Rows(events()));
    assert!(!age.is_one_row_per_patient());
}

#[test]
fn test_filter_chaining_with_ancestor_condition() {
    let first = events().filter(&value_gt(&events(), 10)).unwrap();
    // condition drawn from the unfiltered table
    let second = first.filter(&value_gt(&events(), 20)).unwrap();
    assert_eq!(second.filter_conditions().len(), 2);
    assert_eq!(second.root(), &events());
}

#[test]
fn test_filter_with_descendant_condition_is_rejected() {
    let filtered = events().filter(&value_gt(&events(), 10)).unwrap();
    let err = events().filter(&value_gt(&filtered, 20)).unwrap_err();
    assert!(matches!(err, QueryModelError::DescendantCondition(_)));
}

#[test]
fn test_filter_with_patient_condition() {
    let dob = patients().column("date_of_birth").unwrap();
    let born = Series::unary(UnaryFn::IsNull, &dob).unwrap();
    assert!(events().filter(&born).is_ok());
}

#[test]
fn test_patient_frame_cannot_be_filtered() {
    let dob = patients().column("date_of_birth").unwrap();
    let condition = Series::unary(UnaryFn::IsNull, &dob).unwrap();
    assert!(matches!(
        patients().filter(&condition),
        Err(QueryModelError::PatientFrame(_))
    ));
}

// ============================================================================
// Sorting and picking
// ============================================================================

#[test]
fn test_pick_requires_sort() {
    assert!(matches!(
        events().first_for_patient(),
        Err(QueryModelError::UnsortedPick)
    ));
    let filtered = events().filter(&value_gt(&events(), 0)).unwrap();
    assert!(matches!(
        filtered.last_for_patient(),
        Err(QueryModelError::UnsortedPick)
    ));
}

#[test]
fn test_sort_survives_later_filter() {
    let date = events().column("date").unwrap();
    let sorted = events().sort_by(&date).unwrap();
    let filtered = sorted.filter(&value_gt(&events(), 0)).unwrap();
    let picked = filtered.first_for_patient().unwrap();
    assert!(picked.is_patient_frame());
    assert!(picked.column("value").unwrap().is_one_row_per_patient());
}

#[rstest]
#[case("flag")]
fn test_sort_by_boolean_is_rejected(#[case] column: &str) {
    let key = events().column(column).unwrap();
    assert!(matches!(
        events().sort_by(&key),
        Err(QueryModelError::InvalidSort(_))
    ));
}

#[test]
fn test_unknown_column() {
    let err = events().column("nope").unwrap_err();
    assert_eq!(
        err,
        QueryModelError::UnknownColumn {
            table: "events".to_string(),
            column: "nope".to_string()
        }
    );
}

// ============================================================================
// Aggregates and types
// ============================================================================

#[test]
fn test_aggregate_rejects_one_row_per_patient_input() {
    let dob = patients().column("date_of_birth").unwrap();
    assert!(matches!(
        dob.max_for_patient(),
        Err(QueryModelError::AggregateOfPatientSeries(_))
    ));
    let date = events().column("date").unwrap();
    let first = events().sort_by(&date).unwrap().first_for_patient().unwrap();
    assert!(matches!(
        first.count_for_patient(),
        Err(QueryModelError::AggregateOfPatientSeries(_))
    ));
}

#[test]
fn test_aggregate_result_types() {
    let value = events().column("value").unwrap();
    let date = events().column("date").unwrap();

    let count = events().count_for_patient().unwrap();
    assert_eq!(count.ty(), &EhrqlType::Int);
    assert!(!count.is_nullable());

    let mean = value.mean_for_patient().unwrap();
    assert_eq!(mean.ty(), &EhrqlType::Float);
    assert!(mean.is_nullable());

    let codes = events().column("code").unwrap().combine_as_set().unwrap();
    assert_eq!(codes.ty(), &EhrqlType::set_of(EhrqlType::code("snomedct")));

    assert_eq!(date.count_episodes_for_patient(5).unwrap().ty(), &EhrqlType::Int);
    assert!(value.count_episodes_for_patient(5).is_err());
    assert!(date.count_episodes_for_patient(-1).is_err());
    assert!(date.sum_for_patient().is_err());
}

#[test]
fn test_division_always_returns_float() {
    let count = events().count_for_patient().unwrap();
    let ratio = Series::binary(BinaryFn::TrueDivide, &count, &int(2)).unwrap();
    assert_eq!(ratio.ty(), &EhrqlType::Float);
}

#[test]
fn test_membership_requires_matching_set_type() {
    let code = events().column("code").unwrap();
    let snomed = Series::set(
        EhrqlType::code("snomedct"),
        [Value::code("snomedct", "123")],
    )
    .unwrap();
    let ctv3 = Series::set(EhrqlType::code("ctv3"), [Value::code("ctv3", "X")]).unwrap();
    assert!(code.is_in(&snomed).is_ok());
    assert!(matches!(
        code.is_in(&ctv3),
        Err(QueryModelError::TypeMismatch { .. })
    ));
}

#[test]
fn test_membership_against_per_patient_set() {
    let code = events().column("code").unwrap();
    let codes = events().column("code").unwrap().combine_as_set().unwrap();
    let matched = code.is_in(&codes).unwrap();
    assert_eq!(matched.domain(), &Domain::Rows(events()));
}

#[test]
fn test_case_requires_consistent_types() {
    let value = events().column("value").unwrap();
    let big = value_gt(&events(), 10);
    assert!(Series::case(vec![(big.clone(), int(1))], Some(int(0))).is_ok());
    assert!(Series::case(vec![(big.clone(), int(1))], Some(Series::literal(true).unwrap())).is_err());
    assert!(Series::case(vec![(value.clone(), int(1))], None).is_err());
    assert!(Series::case(vec![], None).is_err());
}

#[test]
fn test_maximum_of_requires_orderable_arguments() {
    let flag = events().column("flag").unwrap();
    assert!(Series::maximum_of(&[flag]).is_err());
    assert!(Series::maximum_of(&[]).is_err());
    let a = events().column("value").unwrap();
    assert_eq!(Series::minimum_of(&[a, int(3)]).unwrap().ty(), &EhrqlType::Int);
}

// ============================================================================
// Structural identity
// ============================================================================

#[test]
fn test_typed_set_literals_are_type_strict() {
    let bools = Series::set(EhrqlType::Bool, [Value::Bool(true)]).unwrap();
    let ints = Series::set(EhrqlType::Int, [Value::Int(1)]).unwrap();
    assert_ne!(bools, ints);
    assert_ne!(Series::literal(true).unwrap(), Series::literal(1i64).unwrap());
}

#[test]
fn test_aggregate_nodes_compare_structurally() {
    let a = Series::aggregate(Aggregate::Sum(events().column("value").unwrap())).unwrap();
    let b = events().column("value").unwrap().sum_for_patient().unwrap();
    assert_eq!(a, b);
    assert_eq!(hash_of(&a), hash_of(&b));
    assert_ne!(a, events().column("value").unwrap().max_for_patient().unwrap());
}

fn build(threshold: i64, column: &str, op: BinaryFn) -> Series {
    let filtered = events().filter(&value_gt(&events(), threshold)).unwrap();
    let lhs = filtered.column(column).unwrap();
    Series::binary(op, &lhs, &int(threshold)).unwrap()
}

proptest! {
    #[test]
    fn prop_structurally_identical_nodes_agree(threshold in -1000i64..1000, pick in 0usize..3) {
        let ops = [BinaryFn::Add, BinaryFn::Subtract, BinaryFn::Lt];
        let a = build(threshold, "value", ops[pick]);
        let b = build(threshold, "value", ops[pick]);
        prop_assert!(!a.ptr_eq(&b));
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn prop_structurally_distinct_nodes_differ(a in -1000i64..1000, b in -1000i64..1000) {
        prop_assume!(a != b);
        let left = build(a, "value", BinaryFn::Add);
        let right = build(b, "value", BinaryFn::Add);
        prop_assert_ne!(&left, &right);
        prop_assert_ne!(hash_of(&left), hash_of(&right));
    }
}
