//! Row and byte caps applied to backend results.

use crate::error::BackendError;
use crate::outcome::ResultSet;

pub const DEFAULT_MAX_ROWS: usize = 100_000;
pub const DEFAULT_MAX_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultLimits {
    pub max_rows: usize,
    pub max_bytes: usize,
}

impl Default for ResultLimits {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

impl ResultLimits {
    /// Fail with `ResultTooLarge` when `rows` is over the row cap.
    pub fn check_rows(&self, rows: usize) -> Result<(), BackendError> {
        if rows > self.max_rows {
            return Err(BackendError::too_large(format!(
                "{} rows exceeds the cap of {}",
                rows, self.max_rows
            )));
        }
        Ok(())
    }

    /// Fail with `ResultTooLarge` when `bytes` is over the byte cap. Adapters call
    /// this with a running total while rows are still arriving.
    pub fn check_bytes(&self, bytes: usize) -> Result<(), BackendError> {
        if bytes > self.max_bytes {
            return Err(BackendError::too_large(format!(
                "~{} bytes exceeds the cap of {}",
                bytes, self.max_bytes
            )));
        }
        Ok(())
    }

    pub fn check(&self, result: &ResultSet) -> Result<(), BackendError> {
        self.check_rows(result.row_count())?;
        self.check_bytes(result.approximate_bytes())
    }
}
