/// Shared error type used across all TARSy crates.
///
/// The HTTP layer maps each kind to a status code deterministically;
/// everything it does not recognise becomes an opaque 500.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    #[error("not found")]
    NotFound,

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("session is not in a cancellable state")]
    NotCancellable,

    #[error("a chat response is already being generated for this session")]
    ChatExecutionActive,

    #[error("service is shutting down")]
    ShuttingDown,

    #[error("database: {0}")]
    Database(String),

    #[error("llm: {0}")]
    Llm(String),

    #[error("mcp: {0}")]
    Mcp(String),

    #[error("config: {0}")]
    Config(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a field-level validation failure.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_display_includes_field() {
        let err = Error::validation("data", "data field is required");
        assert_eq!(err.to_string(), "data: data field is required");
    }

    #[test]
    fn chat_active_message_matches_api_contract() {
        // The 409 body for a concurrent chat must contain this phrase.
        assert!(Error::ChatExecutionActive
            .to_string()
            .contains("already being generated"));
    }
}
