use thiserror::Error;

pub type Result<T> = std::result::Result<T, AscendError>;

#[derive(Error, Debug)]
pub enum AscendError {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    #[error("Outcome not found: {id}")]
    OutcomeNotFound { id: i64 },

    #[error("Outcome {id} payout is {status}, not claimed by this coordinator")]
    PayoutNotClaimed { id: i64, status: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Session {id} is {status}, not active or playing")]
    SessionNotLive { id: String, status: String },

    #[error("Session {id} has already ended")]
    SessionEnded { id: String },

    #[error("Account {account} already has a live session")]
    AccountInUse { account: String },

    #[error("Invalid payout destination: {0}")]
    InvalidDestination(String),

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("Server is full: {active} of {max} sessions live")]
    ServerFull { active: u64, max: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AscendError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::Transfer(msg.into())
    }

    pub fn invalid_destination(msg: impl Into<String>) -> Self {
        Self::InvalidDestination(msg.into())
    }

    pub fn session_not_found(id: impl Into<String>) -> Self {
        Self::SessionNotFound { id: id.into() }
    }

    /// True when the underlying SQLite error is a constraint violation
    /// (unique index, CHECK clause).
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            AscendError::Storage(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}
