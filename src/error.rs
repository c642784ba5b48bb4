use thiserror::Error;

#[derive(Error, Debug)]
pub enum SqlGateError {
    #[error("LLM transport error: {0}")]
    Transport(String),

    #[error("LLM request timed out")]
    Timeout,

    #[error("LLM returned an empty completion")]
    EmptyCompletion,

    #[error("LLM API error: {0}")]
    Api(String),

    #[error("Structured output error: {0}")]
    StructuredOutput(String),

    #[error("SQL render error: {0}")]
    Render(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SqlGateError>;
