use thiserror::Error;

/// Error type for client operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("wallet is not connected")]
    NotConnected,
    #[error("wallet is on chain {actual}, expected chain {expected}")]
    WrongNetwork { expected: u64, actual: u64 },
    #[error("only the contract owner can {action}")]
    NotOwner { action: &'static str },
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("abi error: {0}")]
    Abi(#[from] lottery_abi::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("{action} failed: {message}")]
    Submission {
        action: &'static str,
        message: String,
    },
}

/// Result type for client operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<alloy::transports::TransportError> for Error {
    fn from(err: alloy::transports::TransportError) -> Self {
        match err.as_error_resp() {
            Some(payload) => Error::Rpc {
                code: payload.code,
                message: payload.message.to_string(),
            },
            None => Error::Transport(err.to_string()),
        }
    }
}
