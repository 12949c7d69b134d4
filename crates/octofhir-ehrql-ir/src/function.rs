//! Scalar functions and their typing rules

use octofhir_ehrql_types::EhrqlType;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{IrResult, QueryModelError, Series};

/// Single-operand functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryFn {
    // === Logic ===
    Not,
    IsNull,

    // === Numeric ===
    Negate,
    CastToInt,
    CastToFloat,

    // === Dates ===
    YearFromDate,
    MonthFromDate,
    DayFromDate,
    ToFirstOfYear,
    ToFirstOfMonth,
}

impl UnaryFn {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Not => "not",
            Self::IsNull => "is_null",
            Self::Negate => "negate",
            Self::CastToInt => "as_int",
            Self::CastToFloat => "as_float",
            Self::YearFromDate => "year",
            Self::MonthFromDate => "month",
            Self::DayFromDate => "day",
            Self::ToFirstOfYear => "to_first_of_year",
            Self::ToFirstOfMonth => "to_first_of_month",
        }
    }

    /// Result type for the given operand type
    pub fn result_type(&self, operand: &EhrqlType) -> IrResult<EhrqlType> {
        let mismatch = |expected: &str| {
            Err(QueryModelError::type_mismatch(
                self.name(),
                expected,
                operand.to_string(),
            ))
        };
        match self {
            Self::Not => match operand {
                EhrqlType::Bool => Ok(EhrqlType::Bool),
                _ => mismatch("bool"),
            },
            Self::IsNull => match operand {
                EhrqlType::Set(_) => mismatch("a non-set value"),
                _ => Ok(EhrqlType::Bool),
            },
            Self::Negate => match operand {
                EhrqlType::Int | EhrqlType::Float => Ok(operand.clone()),
                _ => mismatch("int or float"),
            },
            Self::CastToInt | Self::CastToFloat => match operand {
                EhrqlType::Int | EhrqlType::Float | EhrqlType::Bool => {
                    Ok(if *self == Self::CastToInt {
                        EhrqlType::Int
                    } else {
                        EhrqlType::Float
                    })
                }
                _ => mismatch("int, float or bool"),
            },
            Self::YearFromDate | Self::MonthFromDate | Self::DayFromDate => match operand {
                EhrqlType::Date => Ok(EhrqlType::Int),
                _ => mismatch("date"),
            },
            Self::ToFirstOfYear | Self::ToFirstOfMonth => match operand {
                EhrqlType::Date => Ok(EhrqlType::Date),
                _ => mismatch("date"),
            },
        }
    }
}

/// Two-operand functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryFn {
    // === Comparison ===
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    // === Logic ===
    And,
    Or,

    // === Arithmetic ===
    Add,
    Subtract,
    Multiply,
    /// Always returns a float; division by zero gives null
    TrueDivide,
    /// Integer result rounded towards negative infinity; division by zero gives null
    FloorDivide,

    // === Dates ===
    DateAddYears,
    DateAddMonths,
    DateAddDays,
    /// Whole years from lhs to rhs
    DateDifferenceInYears,
    DateDifferenceInMonths,
    DateDifferenceInDays,

    // === Strings and sets ===
    StringContains,
    /// Membership of lhs in the set-valued rhs
    In,
}

impl BinaryFn {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "and",
            Self::Or => "or",
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::TrueDivide => "/",
            Self::FloorDivide => "//",
            Self::DateAddYears => "add_years",
            Self::DateAddMonths => "add_months",
            Self::DateAddDays => "add_days",
            Self::DateDifferenceInYears => "difference_in_years",
            Self::DateDifferenceInMonths => "difference_in_months",
            Self::DateDifferenceInDays => "difference_in_days",
            Self::StringContains => "contains",
            Self::In => "is_in",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge
        )
    }

    /// Result type for the given operand types
    pub fn result_type(&self, lhs: &EhrqlType, rhs: &EhrqlType) -> IrResult<EhrqlType> {
        let mismatch = |expected: String| {
            Err(QueryModelError::type_mismatch(
                self.name(),
                expected,
                format!("({lhs}, {rhs})"),
            ))
        };
        match self {
            Self::Eq | Self::Ne => {
                if lhs == rhs && !lhs.is_set() {
                    Ok(EhrqlType::Bool)
                } else {
                    mismatch(format!("({lhs}, {lhs})"))
                }
            }
            Self::Lt | Self::Le | Self::Gt | Self::Ge => {
                if lhs == rhs && lhs.is_orderable() {
                    Ok(EhrqlType::Bool)
                } else {
                    mismatch("two values of the same orderable type".to_string())
                }
            }
            Self::And | Self::Or => match (lhs, rhs) {
                (EhrqlType::Bool, EhrqlType::Bool) => Ok(EhrqlType::Bool),
                _ => mismatch("(bool, bool)".to_string()),
            },
            Self::Add | Self::Subtract | Self::Multiply => {
                if lhs == rhs && lhs.is_numeric() {
                    Ok(lhs.clone())
                } else {
                    mismatch("two values of the same numeric type".to_string())
                }
            }
            Self::TrueDivide | Self::FloorDivide => {
                if lhs.is_numeric() && rhs.is_numeric() {
                    Ok(if *self == Self::TrueDivide {
                        EhrqlType::Float
                    } else {
                        EhrqlType::Int
                    })
                } else {
                    mismatch("(numeric, numeric)".to_string())
                }
            }
            Self::DateAddYears | Self::DateAddMonths | Self::DateAddDays => match (lhs, rhs) {
                (EhrqlType::Date, EhrqlType::Int) => Ok(EhrqlType::Date),
                _ => mismatch("(date, int)".to_string()),
            },
            Self::DateDifferenceInYears
            | Self::DateDifferenceInMonths
            | Self::DateDifferenceInDays => match (lhs, rhs) {
                (EhrqlType::Date, EhrqlType::Date) => Ok(EhrqlType::Int),
                _ => mismatch("(date, date)".to_string()),
            },
            Self::StringContains => match (lhs, rhs) {
                (EhrqlType::Str, EhrqlType::Str) => Ok(EhrqlType::Bool),
                _ => mismatch("(str, str)".to_string()),
            },
            Self::In => match rhs {
                EhrqlType::Set(element) if element.as_ref() == lhs => Ok(EhrqlType::Bool),
                _ => mismatch(format!("({lhs}, set<{lhs}>)")),
            },
        }
    }
}

impl fmt::Display for BinaryFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Scalar function applied row-wise
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Function {
    Unary {
        op: UnaryFn,
        operand: Series,
    },
    Binary {
        op: BinaryFn,
        lhs: Series,
        rhs: Series,
    },
    /// Largest non-null argument (null only if all arguments are null)
    MaximumOf(Vec<Series>),
    /// Smallest non-null argument (null only if all arguments are null)
    MinimumOf(Vec<Series>),
    /// First matching `(condition, value)`, else the default (or null)
    Case {
        cases: Vec<(Series, Series)>,
        default: Option<Series>,
    },
}

impl Function {
    /// Operands in evaluation order
    pub fn arguments(&self) -> Vec<&Series> {
        match self {
            Self::Unary { operand, .. } => vec![operand],
            Self::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            Self::MaximumOf(args) | Self::MinimumOf(args) => args.iter().collect(),
            Self::Case { cases, default } => cases
                .iter()
                .flat_map(|(condition, value)| [condition, value])
                .chain(default.iter())
                .collect(),
        }
    }

    /// Infer the result type, validating operand types
    pub(crate) fn infer_type(&self) -> IrResult<EhrqlType> {
        match self {
            Self::Unary { op, operand } => op.result_type(operand.ty()),
            Self::Binary { op, lhs, rhs } => op.result_type(lhs.ty(), rhs.ty()),
            Self::MaximumOf(args) | Self::MinimumOf(args) => {
                let name = if matches!(self, Self::MaximumOf(_)) {
                    "maximum_of"
                } else {
                    "minimum_of"
                };
                let Some(first) = args.first() else {
                    return Err(QueryModelError::type_mismatch(
                        name,
                        "at least one argument",
                        "none",
                    ));
                };
                let ty = first.ty();
                if !ty.is_orderable() {
                    return Err(QueryModelError::type_mismatch(name, "orderable type", ty.to_string()));
                }
                if let Some(other) = args.iter().find(|a| a.ty() != ty) {
                    return Err(QueryModelError::type_mismatch(
                        name,
                        ty.to_string(),
                        other.ty().to_string(),
                    ));
                }
                Ok(ty.clone())
            }
            Self::Case { cases, default } => {
                let Some((_, first)) = cases.first() else {
                    return Err(QueryModelError::type_mismatch(
                        "case",
                        "at least one case",
                        "none",
                    ));
                };
                let ty = first.ty();
                if ty.is_set() {
                    return Err(QueryModelError::type_mismatch("case value", "a non-set value", ty.to_string()));
                }
                for (condition, value) in cases {
                    if condition.ty() != &EhrqlType::Bool {
                        return Err(QueryModelError::type_mismatch(
                            "case condition",
                            "bool",
                            condition.ty().to_string(),
                        ));
                    }
                    if value.ty() != ty {
                        return Err(QueryModelError::type_mismatch(
                            "case value",
                            ty.to_string(),
                            value.ty().to_string(),
                        ));
                    }
                }
                if let Some(default) = default {
                    if default.ty() != ty {
                        return Err(QueryModelError::type_mismatch(
                            "case default",
                            ty.to_string(),
                            default.ty().to_string(),
                        ));
                    }
                }
                Ok(ty.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(BinaryFn::TrueDivide, EhrqlType::Int, EhrqlType::Int, EhrqlType::Float)]
    #[case(BinaryFn::FloorDivide, EhrqlType::Float, EhrqlType::Int, EhrqlType::Int)]
    #[case(BinaryFn::Add, EhrqlType::Int, EhrqlType::Int, EhrqlType::Int)]
    #[case(BinaryFn::DateAddMonths, EhrqlType::Date, EhrqlType::Int, EhrqlType::Date)]
    #[case(BinaryFn::DateDifferenceInYears, EhrqlType::Date, EhrqlType::Date, EhrqlType::Int)]
    #[case(BinaryFn::Lt, EhrqlType::Date, EhrqlType::Date, EhrqlType::Bool)]
    #[case(BinaryFn::In, EhrqlType::Str, EhrqlType::set_of(EhrqlType::Str), EhrqlType::Bool)]
    fn test_binary_result_types(
        #[case] op: BinaryFn,
        #[case] lhs: EhrqlType,
        #[case] rhs: EhrqlType,
        #[case] expected: EhrqlType,
    ) {
        assert_eq!(op.result_type(&lhs, &rhs).unwrap(), expected);
    }

    #[rstest]
    #[case(BinaryFn::Add, EhrqlType::Int, EhrqlType::Float)]
    #[case(BinaryFn::Eq, EhrqlType::Bool, EhrqlType::Int)]
    #[case(BinaryFn::Lt, EhrqlType::Bool, EhrqlType::Bool)]
    #[case(BinaryFn::In, EhrqlType::Int, EhrqlType::set_of(EhrqlType::Bool))]
    #[case(BinaryFn::In, EhrqlType::code("snomedct"), EhrqlType::set_of(EhrqlType::code("ctv3")))]
    #[case(BinaryFn::Eq, EhrqlType::code("snomedct"), EhrqlType::Str)]
    #[case(BinaryFn::DateAddDays, EhrqlType::Date, EhrqlType::Float)]
    fn test_binary_type_errors(#[case] op: BinaryFn, #[case] lhs: EhrqlType, #[case] rhs: EhrqlType) {
        let err = op.result_type(&lhs, &rhs).unwrap_err();
        assert!(matches!(err, QueryModelError::TypeMismatch { .. }));
    }

    #[test]
    fn test_unary_result_types() {
        assert_eq!(UnaryFn::IsNull.result_type(&EhrqlType::Date).unwrap(), EhrqlType::Bool);
        assert_eq!(UnaryFn::YearFromDate.result_type(&EhrqlType::Date).unwrap(), EhrqlType::Int);
        assert_eq!(UnaryFn::CastToFloat.result_type(&EhrqlType::Int).unwrap(), EhrqlType::Float);
        assert!(UnaryFn::Not.result_type(&EhrqlType::Int).is_err());
        assert!(UnaryFn::Negate.result_type(&EhrqlType::Str).is_err());
    }
}
