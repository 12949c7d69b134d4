//! Aggregates over one patient's values
//!
//! Callers pass only the non-null values; a patient with no rows (or only null
//! values) never reaches these functions and gets the aggregate's default instead.

use chrono::NaiveDate;
use octofhir_ehrql_ir::Aggregate;
use octofhir_ehrql_types::{EhrqlType, TypedSet, Value, dates};

use crate::error::{EvalError, EvalResult};

/// Result for a patient with no non-null input values
pub fn default_for(aggregate: &Aggregate, ty: &EhrqlType) -> Value {
    match aggregate {
        Aggregate::Exists { .. } => Value::Bool(false),
        Aggregate::Count { .. } | Aggregate::CountDistinct(_) | Aggregate::CountEpisodes { .. } => {
            Value::Int(0)
        }
        Aggregate::CombineAsSet(_) => match ty.element_type() {
            Some(element) => Value::Set(TypedSet::empty(element.clone())),
            None => Value::Null,
        },
        Aggregate::Min(_) | Aggregate::Max(_) | Aggregate::Sum(_) | Aggregate::Mean(_) => {
            Value::Null
        }
    }
}

pub fn minimum(values: &[Value]) -> Value {
    values.iter().min().cloned().unwrap_or(Value::Null)
}

pub fn maximum(values: &[Value]) -> Value {
    values.iter().max().cloned().unwrap_or(Value::Null)
}

/// Sum of ints or floats; an overflowing integer sum is null
pub fn sum(values: &[Value]) -> EvalResult<Value> {
    let mut int_total: Option<i64> = Some(0);
    let mut float_total = 0.0;
    let mut is_float = false;
    for value in values {
        match value {
            Value::Int(i) => int_total = int_total.and_then(|total| total.checked_add(*i)),
            Value::Float(f) => {
                is_float = true;
                float_total += f;
            }
            other => {
                return Err(EvalError::type_mismatch(
                    "sum_for_patient",
                    "numeric",
                    other.type_name(),
                ));
            }
        }
    }
    if values.is_empty() {
        return Ok(Value::Null);
    }
    Ok(if is_float {
        Value::Float(float_total)
    } else {
        int_total.map_or(Value::Null, Value::Int)
    })
}

/// Arithmetic mean as a float
pub fn mean(values: &[Value]) -> EvalResult<Value> {
    if values.is_empty() {
        return Ok(Value::Null);
    }
    let mut total = 0.0;
    for value in values {
        total += match value {
            Value::Int(i) => *i as f64,
            Value::Float(f) => *f,
            other => {
                return Err(EvalError::type_mismatch(
                    "mean_for_patient",
                    "numeric",
                    other.type_name(),
                ));
            }
        };
    }
    Ok(Value::Float(total / values.len() as f64))
}

pub fn count_distinct(values: &[Value]) -> Value {
    let mut distinct: Vec<&Value> = values.iter().collect();
    distinct.sort();
    distinct.dedup();
    Value::Int(distinct.len() as i64)
}

pub fn combine_as_set(element_type: &EhrqlType, values: &[Value]) -> EvalResult<Value> {
    Ok(Value::Set(TypedSet::new(
        element_type.clone(),
        values.iter().cloned(),
    )?))
}

/// Number of episodes: runs of dates where each date is within
/// `maximum_gap_days` of the one before it
pub fn count_episodes(values: &[Value], maximum_gap_days: i64) -> EvalResult<Value> {
    let mut dates_seen: Vec<NaiveDate> = Vec::with_capacity(values.len());
    for value in values {
        match value {
            Value::Date(date) => dates_seen.push(*date),
            other => {
                return Err(EvalError::type_mismatch(
                    "count_episodes_for_patient",
                    "date",
                    other.type_name(),
                ));
            }
        }
    }
    dates_seen.sort();
    let mut episodes = 0;
    let mut previous: Option<NaiveDate> = None;
    for date in dates_seen {
        match previous {
            Some(prev) if dates::days_between(prev, date) <= maximum_gap_days => {}
            _ => episodes += 1,
        }
        previous = Some(date);
    }
    Ok(Value::Int(episodes))
}
