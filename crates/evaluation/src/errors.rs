use thiserror::Error;

pub type Result<T> = std::result::Result<T, EvaluationError>;

#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed input: {0}")]
    ConfigFormat(String),

    #[error("invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("tensor `{name}` holds {elements} elements, expected a single scalar")]
    NonScalarTensor { name: String, elements: usize },

    #[error("evaluation epoch finished with an empty loss list")]
    EmptyLoss,

    #[error("metric logging failed: {0}")]
    Logging(String),
}

impl EvaluationError {
    pub fn logging(message: impl Into<String>) -> Self {
        Self::Logging(message.into())
    }
}

impl From<toml::de::Error> for EvaluationError {
    fn from(value: toml::de::Error) -> Self {
        EvaluationError::ConfigFormat(value.to_string())
    }
}

impl From<serde_json::Error> for EvaluationError {
    fn from(value: serde_json::Error) -> Self {
        EvaluationError::ConfigFormat(value.to_string())
    }
}
