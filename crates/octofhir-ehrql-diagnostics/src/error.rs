//! ehrQL error types

use crate::ErrorCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Error - the query cannot be built or run
    Error,
    /// Warning - a best-effort step failed without affecting results
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// A diagnostic message with context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Severity level
    pub severity: Severity,
    /// Error code
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
    /// Additional context or help
    pub help: Option<String>,
}

impl Diagnostic {
    /// Create a new error diagnostic
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code,
            message: message.into(),
            help: None,
        }
    }

    /// Create a new warning diagnostic
    pub fn warning(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code,
            message: message.into(),
            help: None,
        }
    }

    /// Set help text
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} - {}", self.severity, self.code, self.message)?;
        if let Some(help) = &self.help {
            write!(f, " ({help})")?;
        }
        Ok(())
    }
}

/// Main ehrQL error type
///
/// Each layer has its own precise error enum; all of them convert into this one so
/// callers driving a whole pipeline can use a single `Result`.
#[derive(Debug, Clone, Error)]
pub enum EhrqlError {
    /// Query model construction error (domain or type)
    #[error("{code}: {message}")]
    Construction { code: ErrorCode, message: String },

    /// Schema or data validation error
    #[error("{code}: {message}")]
    Validation {
        code: ErrorCode,
        message: String,
        column: Option<String>,
    },

    /// Compilation error
    #[error("{code}: {message}")]
    Compilation {
        code: ErrorCode,
        message: String,
        dialect: Option<String>,
    },

    /// Database execution error
    #[error("{code}: {message}")]
    Execution {
        code: ErrorCode,
        message: String,
        transient: bool,
    },

    /// In-memory evaluation error
    #[error("{code}: {message}")]
    Evaluation { code: ErrorCode, message: String },

    /// Multiple errors collected
    #[error("Multiple errors: {}", .0.len())]
    Multiple(Vec<EhrqlError>),
}

impl EhrqlError {
    /// Create a construction error
    pub fn construction(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Construction {
            code,
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Validation {
            code,
            message: message.into(),
            column: None,
        }
    }

    /// Create a compilation error
    pub fn compilation(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Compilation {
            code,
            message: message.into(),
            dialect: None,
        }
    }

    /// Create an execution error
    pub fn execution(code: ErrorCode, message: impl Into<String>, transient: bool) -> Self {
        Self::Execution {
            code,
            message: message.into(),
            transient,
        }
    }

    /// Create an evaluation error
    pub fn evaluation(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Evaluation {
            code,
            message: message.into(),
        }
    }

    /// Attach the offending column to a validation error
    pub fn with_column(mut self, name: impl Into<String>) -> Self {
        if let Self::Validation { column, .. } = &mut self {
            *column = Some(name.into());
        }
        self
    }

    /// Attach the dialect name to a compilation error
    pub fn with_dialect(mut self, name: impl Into<String>) -> Self {
        if let Self::Compilation { dialect, .. } = &mut self {
            *dialect = Some(name.into());
        }
        self
    }

    /// Get the error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Construction { code, .. } => *code,
            Self::Validation { code, .. } => *code,
            Self::Compilation { code, .. } => *code,
            Self::Execution { code, .. } => *code,
            Self::Evaluation { code, .. } => *code,
            Self::Multiple(errors) => errors
                .first()
                .map(|e| e.code())
                .unwrap_or(ErrorCode::new(0)),
        }
    }

    /// Whether retrying the failed operation could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Execution { transient: true, .. })
    }

    /// Convert to a diagnostic
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            Self::Construction { code, message } | Self::Evaluation { code, message } => {
                let diag = Diagnostic::error(*code, message.clone());
                match code.info().help {
                    Some(help) => diag.with_help(help),
                    None => diag,
                }
            }
            Self::Validation { code, message, column } => {
                let diag = Diagnostic::error(*code, message.clone());
                match column {
                    Some(column) => diag.with_help(format!("column '{column}'")),
                    None => diag,
                }
            }
            Self::Compilation { code, message, dialect } => {
                let diag = Diagnostic::error(*code, message.clone());
                match dialect {
                    Some(dialect) => diag.with_help(format!("dialect '{dialect}'")),
                    None => diag,
                }
            }
            Self::Execution { code, message, .. } => Diagnostic::error(*code, message.clone()),
            Self::Multiple(errors) => match errors.first() {
                Some(first) => first.to_diagnostic(),
                None => Diagnostic::error(ErrorCode::new(0), "Unknown error"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EHQL0001, EHQL0100, EHQL0200, EHQL0300};

    #[test]
    fn test_error_display_includes_code() {
        let err = EhrqlError::construction(EHQL0001, "cannot combine series");
        assert_eq!(err.to_string(), "EHQL0001: cannot combine series");
        assert_eq!(err.code(), EHQL0001);
    }

    #[test]
    fn test_transient_flag() {
        assert!(EhrqlError::execution(EHQL0300, "locked", true).is_transient());
        assert!(!EhrqlError::execution(EHQL0300, "syntax", false).is_transient());
        assert!(!EhrqlError::construction(EHQL0001, "x").is_transient());
    }

    #[test]
    fn test_diagnostic_context() {
        let diag = EhrqlError::validation(EHQL0100, "value out of range")
            .with_column("age")
            .to_diagnostic();
        assert_eq!(diag.help.as_deref(), Some("column 'age'"));

        let diag = EhrqlError::compilation(EHQL0200, "no temp tables")
            .with_dialect("trino")
            .to_diagnostic();
        assert_eq!(diag.to_string(), "error: EHQL0200 - no temp tables (dialect 'trino')");
    }

    #[test]
    fn test_multiple_uses_first_code() {
        let err = EhrqlError::Multiple(vec![
            EhrqlError::validation(EHQL0100, "a"),
            EhrqlError::construction(EHQL0001, "b"),
        ]);
        assert_eq!(err.code(), EHQL0100);
        assert_eq!(EhrqlError::Multiple(vec![]).code(), ErrorCode::new(0));
    }
}
