use thiserror::Error;

/// The storage medium refused to make staged writes durable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("storage commit failed: {reason}")]
pub struct StorageFault {
    pub reason: String,
}

impl StorageFault {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("byte range {begin}..{end} is outside the {capacity}-byte store")]
    OutOfRange {
        begin: usize,
        end: usize,
        capacity: usize,
    },
    #[error("{field} holds at most {max} bytes, got {len}")]
    FieldOverflow {
        field: &'static str,
        max: usize,
        len: usize,
    },
    #[error("store capacity {capacity} is below the {required}-byte record")]
    TooSmall { capacity: usize, required: usize },
    #[error(transparent)]
    Fault(#[from] StorageFault),
}

/// Failure reported by the radio driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("radio {operation} failed: {reason}")]
pub struct LinkError {
    pub operation: &'static str,
    pub reason: String,
}

impl LinkError {
    pub fn new(operation: &'static str, reason: impl Into<String>) -> Self {
        Self {
            operation,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransmitError {
    #[error("transmitter busy")]
    Busy,
    #[error("transmit failed: {0}")]
    Hardware(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid bridge config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Why a submitted credential pair was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("ssid is empty")]
    EmptySsid,
    #[error("password is empty")]
    EmptyPassword,
    #[error(transparent)]
    TooLong(StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProvisionError {
    #[error("cannot {operation} while {state}")]
    InvalidTransition {
        state: &'static str,
        operation: &'static str,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Link(#[from] LinkError),
}
