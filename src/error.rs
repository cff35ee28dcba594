use thiserror::Error;

/// Main error type for the trading framework
#[derive(Error, Debug)]
pub enum NeuralError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    // Authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),

    // Market data errors
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("No data for symbols {symbols:?} in {start} - {end} time range")]
    MissingSymbols {
        symbols: Vec<String>,
        start: String,
        end: String,
    },

    // Trading errors
    #[error("Trade constraint violated: {0}")]
    TradeConstraintViolation(String),

    #[error("Order submission failed: {0}")]
    OrderSubmission(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for NeuralError
pub type Result<T> = std::result::Result<T, NeuralError>;

impl NeuralError {
    pub fn validation(msg: impl Into<String>) -> Self {
        NeuralError::Validation(msg.into())
    }
}
