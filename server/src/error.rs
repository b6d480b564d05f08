use shared::{BudgetView, ErrorCode};
use thiserror::Error;

/// Failure of a backing store (grid or accounts)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateFault {
    /// Not a finite whole number
    NotInteger,
    /// Whole number outside `[0, grid_size)`
    OutOfBounds,
}

/// Why a placement was rejected
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaceError {
    #[error("Connection is not authenticated")]
    NotAuthenticated,

    #[error("Invalid coordinates ({0:?})")]
    InvalidCoordinates(CoordinateFault),

    #[error("Color must be # followed by six hex digits")]
    InvalidColor,

    #[error("Account not found")]
    UserNotFound,

    #[error("No turns remaining")]
    NoTurns(BudgetView),

    #[error("Cooling down for another {wait_ms}ms")]
    Cooldown { wait_ms: u64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PlaceError {
    /// Wire code reported to the requesting connection
    pub fn code(&self) -> ErrorCode {
        match self {
            PlaceError::NotAuthenticated => ErrorCode::NotAuth,
            PlaceError::InvalidCoordinates(CoordinateFault::NotInteger) => {
                ErrorCode::InvalidCoords
            }
            PlaceError::InvalidCoordinates(CoordinateFault::OutOfBounds) => ErrorCode::OutOfBounds,
            PlaceError::InvalidColor => ErrorCode::InvalidColor,
            PlaceError::UserNotFound => ErrorCode::UserNotFound,
            PlaceError::NoTurns(_) => ErrorCode::NoTurns,
            PlaceError::Cooldown { .. } => ErrorCode::Cooldown,
            PlaceError::Store(_) => ErrorCode::Server,
        }
    }

    /// Budget metadata that lets the client self-correct after exhaustion
    pub fn budget(&self) -> Option<BudgetView> {
        match self {
            PlaceError::NoTurns(view) => Some(*view),
            PlaceError::Cooldown { wait_ms } => Some(BudgetView::Cooldown { left_ms: *wait_ms }),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Username and password required")]
    Missing,

    #[error("Username already taken")]
    Exists,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AuthError::Missing => ErrorCode::Missing,
            AuthError::Exists => ErrorCode::Exists,
            AuthError::InvalidCredentials => ErrorCode::InvalidCredentials,
            AuthError::Store(_) => ErrorCode::Server,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid server configuration: {0}")]
    Invalid(&'static str),
}
