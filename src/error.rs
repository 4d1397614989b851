use serde::Serialize;

/// Crate-wide error type. Every fallible function returns `Result<T, AppError>`.
/// Serializes as `{ error, kind }` so HTTP glue can hand it straight to clients.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("AI runtime error: {0}")]
    Runtime(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database",
            AppError::Pool(_) => "pool",
            AppError::NotFound(_) => "not_found",
            AppError::Validation(_) => "validation",
            AppError::Io(_) => "io",
            AppError::Serde(_) => "serde",
            AppError::Config(_) => "config",
            AppError::Runtime(_) => "runtime",
            AppError::Timeout(_) => "timeout",
            AppError::Internal(_) => "internal",
        }
    }

    /// Failures talking to the AI runtime. The poller swallows these per
    /// session; storage errors are never in this class.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Runtime(_) | AppError::Timeout(_))
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("error", &self.to_string())?;
        s.serialize_field("kind", self.kind())?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_error_and_kind() {
        let err = AppError::NotFound("Protocol p1".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "not_found");
        assert_eq!(json["error"], "Not found: Protocol p1");
    }

    #[test]
    fn test_transient_classification() {
        assert!(AppError::Runtime("connection refused".into()).is_transient());
        assert!(AppError::Timeout("fetch".into()).is_transient());
        assert!(!AppError::Validation("bad".into()).is_transient());
        assert!(!AppError::Database(rusqlite::Error::QueryReturnedNoRows).is_transient());
    }
}
