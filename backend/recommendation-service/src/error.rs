use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    /// An isbn or user_id that is not part of the current snapshot
    #[error("Not found: {0}")]
    NotFound(String),

    /// A source row that cannot be turned into a rating
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Writing the new snapshot failed; the previous one is still in place
    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Errors that abort the whole run
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AppError::NotFound(_) | AppError::MalformedInput(_))
    }
}

// Implement conversions from other error types
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::Database(format!("migration failed: {}", err))
    }
}

impl From<envy::Error> for AppError {
    fn from(err: envy::Error) -> Self {
        AppError::Configuration(err.to_string())
    }
}

impl From<prometheus::Error> for AppError {
    fn from(err: prometheus::Error) -> Self {
        AppError::Internal(format!("metrics error: {}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors_are_not_fatal() {
        assert!(!AppError::NotFound("isbn 123".into()).is_fatal());
        assert!(!AppError::MalformedInput("rating 'abc'".into()).is_fatal());
        assert!(AppError::Persistence("commit failed".into()).is_fatal());
        assert!(AppError::Database("connection refused".into()).is_fatal());
    }

    #[test]
    fn test_sqlx_error_maps_to_database() {
        let err: AppError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, AppError::Database(_)));
    }
}
