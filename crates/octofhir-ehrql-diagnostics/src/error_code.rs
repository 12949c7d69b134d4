//! ehrQL error codes following a structured numbering system
//!
//! Error code ranges:
//! - EHQL0001-EHQL0099: Query model construction errors (domain, type)
//! - EHQL0100-EHQL0199: Schema and data validation errors
//! - EHQL0200-EHQL0299: Compilation errors (unsupported operations, internal)
//! - EHQL0300-EHQL0399: Execution errors (database, retrieval)
//! - EHQL0400-EHQL0499: In-memory evaluation errors

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

/// Error code identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorCode(u16);

impl ErrorCode {
    /// Create a new error code
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Get the numeric code
    pub const fn code(&self) -> u16 {
        self.0
    }

    /// Get error information for this code
    pub fn info(&self) -> &'static ErrorInfo {
        ERROR_INFO.get(&self.0).unwrap_or(&UNKNOWN_ERROR)
    }

    /// Check if this is a construction error (0001-0099)
    pub const fn is_construction_error(&self) -> bool {
        self.0 >= 1 && self.0 < 100
    }

    /// Check if this is a schema/validation error (0100-0199)
    pub const fn is_validation_error(&self) -> bool {
        self.0 >= 100 && self.0 < 200
    }

    /// Check if this is a compilation error (0200-0299)
    pub const fn is_compilation_error(&self) -> bool {
        self.0 >= 200 && self.0 < 300
    }

    /// Check if this is an execution error (0300-0399)
    pub const fn is_execution_error(&self) -> bool {
        self.0 >= 300 && self.0 < 400
    }

    /// Check if this is an in-memory evaluation error (0400-0499)
    pub const fn is_evaluation_error(&self) -> bool {
        self.0 >= 400 && self.0 < 500
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EHQL{:04}", self.0)
    }
}

/// Information about an error code
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    /// Short description of the error
    pub description: &'static str,
    /// Detailed help text
    pub help: Option<&'static str>,
}

impl ErrorInfo {
    const fn new(description: &'static str) -> Self {
        Self {
            description,
            help: None,
        }
    }

    const fn with_help(mut self, help: &'static str) -> Self {
        self.help = Some(help);
        self
    }
}

static UNKNOWN_ERROR: ErrorInfo = ErrorInfo::new("Unknown error");

static ERROR_INFO: LazyLock<HashMap<u16, ErrorInfo>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    // Construction errors (0001-0099)
    map.insert(1, ErrorInfo::new("Domain mismatch")
        .with_help("Many-rows-per-patient series can only be combined when drawn from the same frame or one of its ancestors"));
    map.insert(2, ErrorInfo::new("Type mismatch"));
    map.insert(3, ErrorInfo::new("Invalid sort key")
        .with_help("Sort keys must be orderable and may not be boolean"));
    map.insert(4, ErrorInfo::new("Pick from unsorted frame")
        .with_help("Apply sort_by before picking the first or last row for each patient"));
    map.insert(5, ErrorInfo::new("Aggregate of one-row-per-patient series"));
    map.insert(6, ErrorInfo::new("Unknown column"));
    map.insert(7, ErrorInfo::new("Invalid operation on patient frame"));
    map.insert(8, ErrorInfo::new("Condition from descendant domain")
        .with_help("Filter and sort conditions must come from the frame itself, one of its ancestors, or the patient domain"));
    map.insert(9, ErrorInfo::new("Invalid dataset definition"));
    map.insert(10, ErrorInfo::new("Invalid literal"));
    map.insert(11, ErrorInfo::new("Table already registered"));

    // Schema and validation errors (0100-0199)
    map.insert(100, ErrorInfo::new("Constraint violation"));
    map.insert(101, ErrorInfo::new("Value does not match column type"));
    map.insert(102, ErrorInfo::new("Invalid schema"));
    map.insert(103, ErrorInfo::new("Invalid row shape"));

    // Compilation errors (0200-0299)
    map.insert(200, ErrorInfo::new("Operation not supported by dialect"));
    map.insert(201, ErrorInfo::new("Unknown dialect"));
    map.insert(202, ErrorInfo::new("Internal compiler error")
        .with_help("This indicates a broken invariant in the query model"));
    map.insert(203, ErrorInfo::new("Unknown table"));
    map.insert(204, ErrorInfo::new("Invalid configuration"));

    // Execution errors (0300-0399)
    map.insert(300, ErrorInfo::new("Transient database error"));
    map.insert(301, ErrorInfo::new("Permanent database error"));
    map.insert(302, ErrorInfo::new("Retries exhausted"));
    map.insert(303, ErrorInfo::new("Batch size too small")
        .with_help("The batch size must exceed the largest number of rows sharing a single key"));
    map.insert(304, ErrorInfo::new("Unexpected result value"));

    // Evaluation errors (0400-0499)
    map.insert(400, ErrorInfo::new("Unknown table in database"));
    map.insert(401, ErrorInfo::new("Row mismatch between columns")
        .with_help("Combining columns with different row sets indicates an upstream domain error"));
    map.insert(402, ErrorInfo::new("Internal evaluation error"));

    map
});

// Construction errors
pub const EHQL0001: ErrorCode = ErrorCode::new(1);
pub const EHQL0002: ErrorCode = ErrorCode::new(2);
pub const EHQL0003: ErrorCode = ErrorCode::new(3);
pub const EHQL0004: ErrorCode = ErrorCode::new(4);
pub const EHQL0005: ErrorCode = ErrorCode::new(5);
pub const EHQL0006: ErrorCode = ErrorCode::new(6);
pub const EHQL0007: ErrorCode = ErrorCode::new(7);
pub const EHQL0008: ErrorCode = ErrorCode::new(8);
pub const EHQL0009: ErrorCode = ErrorCode::new(9);
pub const EHQL0010: ErrorCode = ErrorCode::new(10);
pub const EHQL0011: ErrorCode = ErrorCode::new(11);

// Schema and validation errors
pub const EHQL0100: ErrorCode = ErrorCode::new(100);
pub const EHQL0101: ErrorCode = ErrorCode::new(101);
pub const EHQL0102: ErrorCode = ErrorCode::new(102);
pub const EHQL0103: ErrorCode = ErrorCode::new(103);

// Compilation errors
pub const EHQL0200: ErrorCode = ErrorCode::new(200);
pub const EHQL0201: ErrorCode = ErrorCode::new(201);
pub const EHQL0202: ErrorCode = ErrorCode::new(202);
pub const EHQL0203: ErrorCode = ErrorCode::new(203);
pub const EHQL0204: ErrorCode = ErrorCode::new(204);

// Execution errors
pub const EHQL0300: ErrorCode = ErrorCode::new(300);
pub const EHQL0301: ErrorCode = ErrorCode::new(301);
pub const EHQL0302: ErrorCode = ErrorCode::new(302);
pub const EHQL0303: ErrorCode = ErrorCode::new(303);
pub const EHQL0304: ErrorCode = ErrorCode::new(304);

// Evaluation errors
pub const EHQL0400: ErrorCode = ErrorCode::new(400);
pub const EHQL0401: ErrorCode = ErrorCode::new(401);
pub const EHQL0402: ErrorCode = ErrorCode::new(402);
