use thiserror::Error;

/// Top-level error type for the Converse client.
///
/// Each variant names the subsystem that failed. Subsystem crates define their
/// own error types and implement `From<ConverseError>` so that the `?` operator
/// works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConverseError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dictation error: {0}")]
    Dictation(String),

    #[error("Speech backend error: {0}")]
    Speech(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for ConverseError {
    fn from(err: toml::de::Error) -> Self {
        ConverseError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for ConverseError {
    fn from(err: toml::ser::Error) -> Self {
        ConverseError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for ConverseError {
    fn from(err: serde_json::Error) -> Self {
        ConverseError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Converse operations.
pub type Result<T> = std::result::Result<T, ConverseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let cases: Vec<(ConverseError, &str)> = vec![
            (
                ConverseError::Config("bad key".to_string()),
                "Configuration error: bad key",
            ),
            (
                ConverseError::Dictation("not listening".to_string()),
                "Dictation error: not listening",
            ),
            (
                ConverseError::Speech("not-allowed".to_string()),
                "Speech backend error: not-allowed",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ConverseError = io_err.into();
        assert!(matches!(err, ConverseError::Io(_)));
        assert!(err.to_string().starts_with("I/O error:"));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let converse_err: ConverseError = err.unwrap_err().into();
        assert!(matches!(converse_err, ConverseError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let converse_err: ConverseError = err.unwrap_err().into();
        assert!(matches!(converse_err, ConverseError::Serialization(_)));
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<String> {
            let io_result: std::result::Result<i32, std::io::Error> = Ok(42);
            let value = io_result?;
            Ok(value.to_string())
        }

        assert_eq!(inner().unwrap(), "42");
    }
}
