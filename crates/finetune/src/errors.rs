use thiserror::Error;

#[derive(Error, Debug)]
pub enum FinetuneError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Tokenizer(#[from] thai_tokenizer::Error),

    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("unsupported dataset `{0}`; expected one of `wisesight_sentiment`, `wongnai_reviews`, `generated_reviews_enth`")]
    UnsupportedDataset(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("initialization failed: {0}")]
    Initialization(String),

    #[error("fine-tuning failed: {0}")]
    Runtime(String),
}

impl FinetuneError {
    pub fn initialization(message: impl Into<String>) -> Self {
        Self::Initialization(message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }

    pub fn dataset(message: impl Into<String>) -> Self {
        Self::Dataset(message.into())
    }
}

pub type Result<T> = std::result::Result<T, FinetuneError>;
