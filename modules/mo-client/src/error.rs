use thiserror::Error;

pub type Result<T> = std::result::Result<T, MoError>;

#[derive(Debug, Error)]
pub enum MoError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("GraphQL error: {0}")]
    GraphQl(String),

    #[error("Authentication failed: {0}")]
    Auth(String),
}

impl From<reqwest::Error> for MoError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            MoError::Parse(err.to_string())
        } else {
            MoError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for MoError {
    fn from(err: serde_json::Error) -> Self {
        MoError::Parse(err.to_string())
    }
}
