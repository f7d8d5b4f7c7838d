//! Error types for the sync engine.
//!
//! Three layers:
//! - [`CalendarError`]: what the remote provider said
//! - [`StoreError`]: what the sync record database said
//! - [`SyncError`]: what the orchestrator hands back to its caller
//!
//! All three classify into an [`ErrorKind`] so callers can decide on retries
//! and HTTP status codes without matching individual variants.

use thiserror::Error;

/// Coarse classification shared by every error the engine returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The remote object does not exist.
    NotFound,
    /// Credentials are missing, invalid or expired.
    AuthFailure,
    /// Network trouble, rate limiting or a 5xx; retrying may succeed.
    Transient,
    /// The event payload is malformed.
    Validation,
    /// An explicit event ID is already taken.
    Conflict,
    /// The sync record database could not be used.
    StorageUnavailable,
    /// Anything else the provider rejected.
    Other,
}

impl ErrorKind {
    /// HTTP status a REST front end should answer with.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::AuthFailure => 401,
            ErrorKind::Validation => 422,
            ErrorKind::Conflict => 409,
            ErrorKind::Transient | ErrorKind::StorageUnavailable => 503,
            ErrorKind::Other => 502,
        }
    }
}

#[derive(Error, Debug)]
pub enum CalendarError {
    #[error("Authentication required")]
    AuthRequired,

    #[error("Token expired")]
    TokenExpired,

    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("Invalid event data: {0}")]
    InvalidEventData(String),

    #[error("Conflict: event ID already exists")]
    Conflict,

    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl CalendarError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AuthRequired | Self::TokenExpired => ErrorKind::AuthFailure,
            Self::RateLimited(_) | Self::ServerError { .. } | Self::NetworkError(_) => {
                ErrorKind::Transient
            }
            Self::EventNotFound(_) => ErrorKind::NotFound,
            Self::InvalidEventData(_) => ErrorKind::Validation,
            Self::Conflict => ErrorKind::Conflict,
            Self::ApiError(_) => ErrorKind::Other,
        }
    }

    /// User-friendly error message for UI display.
    pub fn user_message(&self) -> String {
        match self {
            Self::AuthRequired => "Please sign in to your Google account".to_string(),
            Self::TokenExpired => "Your session has expired. Please sign in again.".to_string(),
            Self::RateLimited(secs) => format!("Too many requests. Please wait {} seconds.", secs),
            Self::EventNotFound(_) => "Event not found".to_string(),
            Self::InvalidEventData(msg) => format!("Invalid event: {}", msg),
            Self::Conflict => "An event with this ID already exists.".to_string(),
            Self::ServerError { .. } => {
                "The calendar service is having trouble. Please try again later.".to_string()
            }
            Self::ApiError(msg) => format!("Calendar error: {}", msg),
            Self::NetworkError(_) => "Network error. Check your connection.".to_string(),
        }
    }

    /// Whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

pub type CalendarResult<T> = Result<T, CalendarError>;

/// Sync record database failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt sync record: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("corrupt") => {
                StoreError::Corrupt(e.to_string())
            }
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..) => StoreError::Corrupt(e.to_string()),
            _ => StoreError::Unavailable(e.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Error returned by the sync orchestrator.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] CalendarError),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("Invalid event data: {0}")]
    Validation(String),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Remote(e) => e.kind(),
            SyncError::Storage(_) => ErrorKind::StorageUnavailable,
            SyncError::Validation(_) => ErrorKind::Validation,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn user_message(&self) -> String {
        match self {
            SyncError::Remote(e) => e.user_message(),
            SyncError::Storage(_) => "Sync records are unavailable. Please try again.".to_string(),
            SyncError::Validation(msg) => format!("Invalid event: {}", msg),
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
