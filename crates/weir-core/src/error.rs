use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeirError {
    // Materialization errors: fatal to the attempt, raised before launch
    #[error("materialization failed: {0}")]
    Materialize(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    // Execution errors: launch-time faults; a non-zero exit is not an
    // error, it is a Failed outcome
    #[error("failed to launch job process: {0}")]
    Launch(String),

    #[error("job process error: {0}")]
    Execution(String),

    // Collection errors
    #[error("produced artifact `{name}` has no declared {kind} entry")]
    UndeclaredArtifact { name: String, kind: String },

    #[error("collection failed: {0}")]
    Collect(String),

    // Lifecycle errors
    #[error("action `{action}` not allowed while node status is `{status}`")]
    IllegalAction { action: String, status: String },

    #[error("node validation failed: {0}")]
    Validation(String),

    // Store errors
    #[error("resource store error: {0}")]
    Store(String),

    // Config errors
    #[error("config error: {0}")]
    Config(String),

    #[error("config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WeirError>;
