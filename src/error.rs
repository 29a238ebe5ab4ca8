use std::fmt;
use thiserror::Error;

/// Failures raised by an exchange client. The variant decides how the
/// engine reacts.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Timeout, rate limit, connectivity or server-side failure.
    #[error("transient exchange error: {0}")]
    Transient(String),

    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    /// The exchange understood the request and refused it.
    #[error("rejected by exchange (code {code:?}): {message}")]
    Rejected { code: Option<i64>, message: String },

    #[error("unexpected exchange payload: {0}")]
    Decode(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ExchangeError::Decode(e.to_string())
        } else if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
            ExchangeError::Transient(e.to_string())
        } else {
            ExchangeError::Other(e.into())
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(e: serde_json::Error) -> Self {
        ExchangeError::Decode(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PositionError {
    #[error("cannot open a position that is not flat")]
    NotFlat,
    #[error("cannot close a position that is not long")]
    NotLong,
    #[error("invalid position quantity {0}")]
    InvalidQuantity(f64),
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid parameters: {0}")]
pub struct ValidationError(pub String);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("initial bar window unavailable: {0}")]
    Initialization(#[source] ExchangeError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Position(#[from] PositionError),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("bot for {0} is already running")]
    AlreadyRunning(String),

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Initialization,
    Transient,
    NotFound,
    Validation,
    Unclassified,
}

/// What the engine does after an error of a given kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// The instrument's loop ends and is not restarted.
    StopInstrument,
    /// Abandon the current tick; the next one runs after the normal delay.
    SkipTick,
}

impl ErrorKind {
    pub fn policy(self) -> ErrorPolicy {
        match self {
            ErrorKind::Initialization => ErrorPolicy::StopInstrument,
            ErrorKind::Transient
            | ErrorKind::NotFound
            | ErrorKind::Validation
            | ErrorKind::Unclassified => ErrorPolicy::SkipTick,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Initialization => write!(f, "initialization"),
            ErrorKind::Transient => write!(f, "transient"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Unclassified => write!(f, "unclassified"),
        }
    }
}

impl ExchangeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExchangeError::Transient(_) => ErrorKind::Transient,
            ExchangeError::SymbolNotFound(_) => ErrorKind::NotFound,
            ExchangeError::Rejected { .. } => ErrorKind::Validation,
            ExchangeError::Decode(_) | ExchangeError::Other(_) => ErrorKind::Unclassified,
        }
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Initialization(_) => ErrorKind::Initialization,
            EngineError::Exchange(e) => e.kind(),
            EngineError::Position(_) => ErrorKind::Unclassified,
        }
    }
}
