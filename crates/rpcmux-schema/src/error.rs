/// Errors raised while compiling schemas or validating arguments.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The schema is not a valid JSON Schema.
    #[error("failed to compile schema: {0}")]
    CompileFailed(String),

    /// The arguments do not match the method's schema.
    #[error("invalid args for {method}: {message}")]
    ValidationFailed { method: String, message: String },

    /// Schema text or arguments are not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// Method names are non-empty and limited to `[A-Za-z0-9._-]`.
    #[error("invalid method name: {0:?}")]
    InvalidMethodName(String),
}

pub type Result<T> = std::result::Result<T, SchemaError>;
