//! Engine configuration

use serde::{Deserialize, Serialize};

use crate::error::{CompileResult, SqlError};
use crate::generated::ReifyMode;

/// Tunables for compiling and running datasets against a database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Literal sets larger than this are loaded into a membership table
    pub max_in_list_size: usize,
    /// Overrides the dialect's default mechanism for intermediate tables
    pub reification: Option<ReifyMode>,
    /// Page results in batches of this many patients
    pub batch_size: Option<usize>,
    pub max_retries: u32,
    /// First retry delay; doubled on each further attempt
    pub retry_backoff_ms: u64,
    /// Rows per INSERT when loading inline tables
    pub insert_batch_size: usize,
    /// Restrict per-patient intermediate tables to the population
    pub narrow_to_population: bool,
    /// Schema holding cross-session tables
    pub temp_schema: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_in_list_size: 100,
            reification: None,
            batch_size: None,
            max_retries: 3,
            retry_backoff_ms: 1000,
            insert_batch_size: 100,
            narrow_to_population: true,
            temp_schema: None,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> CompileResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| SqlError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CompileResult<()> {
        if self.batch_size == Some(0) {
            return Err(SqlError::Config("batch_size must be positive".to_string()));
        }
        if self.insert_batch_size == 0 {
            return Err(SqlError::Config(
                "insert_batch_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_reification(mut self, mode: ReifyMode) -> Self {
        self.reification = Some(mode);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_max_in_list_size(mut self, size: usize) -> Self {
        self.max_in_list_size = size;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, backoff_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff_ms = backoff_ms;
        self
    }
}
