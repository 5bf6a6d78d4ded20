use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeftError {
    // Graph errors
    #[error("Workflow contains a cycle - cannot execute")]
    GraphCycle,

    #[error("Invalid workflow graph: {0}")]
    Graph(String),

    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM rate limited: {0}")]
    RateLimited(String),

    // Tool errors
    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    // Gateway errors
    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Provider not connected: {0}. Connect it in Settings.")]
    ProviderNotConnected(String),

    #[error("Connect {provider} in Settings to use this tool.")]
    MissingCredential { provider: String },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WeftError {
    /// Whether this failure is transient and worth retrying with backoff.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, WeftError::RateLimited(_))
    }
}

pub type Result<T> = std::result::Result<T, WeftError>;
