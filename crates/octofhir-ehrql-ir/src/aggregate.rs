//! Aggregations from many rows per patient to one row per patient

use octofhir_ehrql_types::EhrqlType;

use crate::{Frame, IrResult, QueryModelError, Series};

/// Aggregate operations. All group by patient id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Aggregate {
    /// Whether the patient has any rows; never null
    Exists { source: Frame },
    /// Number of rows for the patient; never null
    Count { source: Frame },
    Min(Series),
    Max(Series),
    Sum(Series),
    Mean(Series),
    /// Number of distinct non-null values; never null
    CountDistinct(Series),
    /// Distinct non-null values as a set
    CombineAsSet(Series),
    /// Runs of dates separated from the next run by more than `maximum_gap_days`;
    /// never null
    CountEpisodes {
        series: Series,
        maximum_gap_days: i64,
    },
}

impl Aggregate {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Exists { .. } => "exists_for_patient",
            Self::Count { .. } => "count_for_patient",
            Self::Min(_) => "minimum_for_patient",
            Self::Max(_) => "maximum_for_patient",
            Self::Sum(_) => "sum_for_patient",
            Self::Mean(_) => "mean_for_patient",
            Self::CountDistinct(_) => "count_distinct_for_patient",
            Self::CombineAsSet(_) => "combine_as_set",
            Self::CountEpisodes { .. } => "count_episodes_for_patient",
        }
    }

    /// The aggregated series, or None for frame aggregates
    pub fn series(&self) -> Option<&Series> {
        match self {
            Self::Exists { .. } | Self::Count { .. } => None,
            Self::Min(s)
            | Self::Max(s)
            | Self::Sum(s)
            | Self::Mean(s)
            | Self::CountDistinct(s)
            | Self::CombineAsSet(s)
            | Self::CountEpisodes { series: s, .. } => Some(s),
        }
    }

    /// The frame whose rows are aggregated
    pub fn source_frame(&self) -> Option<&Frame> {
        match self {
            Self::Exists { source } | Self::Count { source } => Some(source),
            _ => self.series().and_then(|s| s.domain().frame()),
        }
    }

    /// Aggregates that report 0/false rather than null for patients without rows
    pub fn is_count_like(&self) -> bool {
        matches!(
            self,
            Self::Exists { .. }
                | Self::Count { .. }
                | Self::CountDistinct(_)
                | Self::CountEpisodes { .. }
        )
    }

    /// Validate the input and infer the result type
    pub(crate) fn infer_type(&self) -> IrResult<EhrqlType> {
        if let Self::Exists { source } | Self::Count { source } = self {
            if source.is_patient_frame() {
                return Err(QueryModelError::AggregateOfPatientSeries(source.to_string()));
            }
            return Ok(if matches!(self, Self::Exists { .. }) {
                EhrqlType::Bool
            } else {
                EhrqlType::Int
            });
        }

        let Some(series) = self.series() else {
            return Err(QueryModelError::AggregateOfPatientSeries(self.name().to_string()));
        };
        if series.is_one_row_per_patient() {
            return Err(QueryModelError::AggregateOfPatientSeries(format!(
                "{} input",
                self.name()
            )));
        }
        let ty = series.ty();
        let mismatch = |expected: &str| {
            Err(QueryModelError::type_mismatch(
                self.name(),
                expected,
                ty.to_string(),
            ))
        };
        if ty.is_set() {
            return mismatch("a non-set type");
        }
        match self {
            Self::Min(_) | Self::Max(_) => {
                if ty.is_orderable() {
                    Ok(ty.clone())
                } else {
                    mismatch("an orderable type")
                }
            }
            Self::Sum(_) => {
                if ty.is_numeric() {
                    Ok(ty.clone())
                } else {
                    mismatch("int or float")
                }
            }
            Self::Mean(_) => {
                if ty.is_numeric() {
                    Ok(EhrqlType::Float)
                } else {
                    mismatch("int or float")
                }
            }
            Self::CountDistinct(_) => Ok(EhrqlType::Int),
            Self::CombineAsSet(_) => Ok(EhrqlType::set_of(ty.clone())),
            Self::CountEpisodes {
                maximum_gap_days, ..
            } => {
                if *maximum_gap_days < 0 {
                    return Err(QueryModelError::InvalidLiteral(format!(
                        "maximum gap of {maximum_gap_days} days"
                    )));
                }
                match ty {
                    EhrqlType::Date => Ok(EhrqlType::Int),
                    _ => mismatch("date"),
                }
            }
            Self::Exists { .. } | Self::Count { .. } => Ok(EhrqlType::Int),
        }
    }
}
