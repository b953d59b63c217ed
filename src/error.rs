// Error types shared by the reservation client components

use thiserror::Error;

use crate::queue::QueuedOperation;

// Caller-fixable input problems, raised before any network, queue or cache access
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    RequiredField { field: String },

    #[error("Check-out must be after check-in")]
    InvalidDateRange,

    #[error("Check-in date cannot be in the past")]
    CheckInInPast,

    #[error("Stay of {nights} nights exceeds the maximum of {max} nights")]
    StayTooLong { nights: i64, max: u32 },

    #[error("Occupant count must be at least 1, got {0}")]
    InvalidOccupants(u32),

    #[error("Amount {amount} is outside the allowed range 0..={max}")]
    AmountOutOfRange { amount: f64, max: f64 },

    #[error("Amount {amount} has more than {max_decimals} decimal places for {currency}")]
    InvalidDecimals {
        amount: f64,
        currency: String,
        max_decimals: u32,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("Invalid rate: {0}")]
    InvalidRate(String),

    #[error("Status transition from {from} to {to} is not allowed")]
    InvalidStatusTransition { from: String, to: String },
}

impl ValidationError {
    // Stable identifier for UI layers that map errors to messages
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::RequiredField { .. } => "REQUIRED_FIELD",
            ValidationError::InvalidDateRange => "INVALID_DATE_RANGE",
            ValidationError::CheckInInPast => "CHECK_IN_IN_PAST",
            ValidationError::StayTooLong { .. } => "STAY_TOO_LONG",
            ValidationError::InvalidOccupants(_) => "INVALID_OCCUPANTS",
            ValidationError::AmountOutOfRange { .. } => "AMOUNT_OUT_OF_RANGE",
            ValidationError::InvalidDecimals { .. } => "INVALID_DECIMALS",
            ValidationError::InvalidAmount(_) => "INVALID_AMOUNT",
            ValidationError::UnsupportedCurrency(_) => "UNSUPPORTED_CURRENCY",
            ValidationError::InvalidRate(_) => "INVALID_RATE",
            ValidationError::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
        }
    }
}

// Failures of the HTTP transport, reported after the retry policy gave up
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("API error: {status} - {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Failed to encode request: {0}")]
    Encode(String),
}

impl TransportError {
    // Network-level failures: the request may never have reached the server
    pub fn is_network(&self) -> bool {
        matches!(self, TransportError::Network(_) | TransportError::Timeout(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(0)
        } else if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            TransportError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

// An offline operation that hit its retry ceiling and was dead-lettered
#[derive(Error, Debug, Clone)]
#[error("Queued {} operation {} exhausted {} retries: {last_error}", .operation.kind(), .operation.id, .operation.retry_count)]
pub struct QueueExhaustedError {
    pub operation: QueuedOperation,
    pub last_error: String,
}

// Errors returned by the reservation client facade
#[derive(Error, Debug)]
pub enum ReservationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    QueueExhausted(#[from] QueueExhaustedError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Reservation not found: {0}")]
    NotFound(String),
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Initialization error: {0}")]
    InitError(String),
}

impl From<StorageError> for ClientError {
    fn from(err: StorageError) -> Self {
        ClientError::InitError(err.to_string())
    }
}
