use thiserror::Error;

/// Core error types shared by the OctoFHIR extraction crates
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid FHIR date: {0}")]
    InvalidDate(String),

    #[error("Invalid FHIR DateTime: {0}")]
    InvalidDateTime(String),
}

impl CoreError {
    /// Create a new InvalidDate error
    pub fn invalid_date(date: impl Into<String>) -> Self {
        Self::InvalidDate(date.into())
    }

    /// Create a new InvalidDateTime error
    pub fn invalid_date_time(datetime: impl Into<String>) -> Self {
        Self::InvalidDateTime(datetime.into())
    }
}

/// Convenience result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_date_error() {
        let err = CoreError::invalid_date("1990-13-01");
        assert_eq!(err.to_string(), "Invalid FHIR date: 1990-13-01");
    }

    #[test]
    fn test_result_type_usage() {
        fn ok_function() -> Result<String> {
            Ok("success".to_string())
        }

        fn err_function() -> Result<String> {
            Err(CoreError::invalid_date_time("bad"))
        }

        assert!(ok_function().is_ok());
        assert!(matches!(err_function(), Err(CoreError::InvalidDateTime(_))));
    }
}
