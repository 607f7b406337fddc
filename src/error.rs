use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already publishing: {0}")]
    AlreadyPublishing(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Numeric code carried in error frames sent back to a client.
    pub fn wire_code(&self) -> u32 {
        match self {
            AppError::NotFound(_) => 404,
            AppError::AlreadyPublishing(_) => 409,
            AppError::Malformed(_) | AppError::Serialization(_) => 400,
            AppError::Engine(_) => 502,
            AppError::Io(_) | AppError::Config(_) => 500,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        AppError::NotFound(what.into())
    }

    pub fn engine(reason: impl std::fmt::Display) -> Self {
        AppError::Engine(reason.to_string())
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_match_taxonomy() {
        assert_eq!(AppError::not_found("peer").wire_code(), 404);
        assert_eq!(AppError::AlreadyPublishing("x".into()).wire_code(), 409);
        assert_eq!(AppError::Malformed("bad".into()).wire_code(), 400);
        assert_eq!(AppError::engine("rejected").wire_code(), 502);
    }
}
