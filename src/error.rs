use thiserror::Error;
use uuid::Uuid;

/// Failures raised by a ledger store or one of its transactions.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The idempotency key already exists; the event was applied before.
    #[error("Idempotency record {0} already exists")]
    DuplicateKey(Uuid),
    #[error("Store operation timed out: {0}")]
    Timeout(String),
    #[error("Store connection failed: {0}")]
    Connection(String),
    /// An error reported by the store engine together with its native code.
    #[error("Store error {code}: {message}")]
    Store { code: i32, message: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Applying the delta would take the balance outside the representable range.
    #[error("Balance of account {0} would overflow")]
    Overflow(Uuid),
    #[error("Internal store error: {0}")]
    Internal(String),
}

/// Failures raised by a message receiver.
#[derive(Error, Debug)]
pub enum ReceiverError {
    /// The message is no longer leased by this consumer.
    #[error("Lease lost for message {0}")]
    LeaseLost(Uuid),
    #[error("Receiver unavailable: {0}")]
    Unavailable(String),
    #[error("Receiver operation timed out: {0}")]
    Timeout(String),
}

/// Reasons a message body cannot be turned into a transaction event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedMessage {
    #[error("Message body is empty")]
    EmptyBody,
    #[error("Message body is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("Required field `{0}` is missing")]
    MissingField(&'static str),
    #[error("Field `{0}` must not be the nil UUID")]
    NilIdentifier(&'static str),
    #[error("Unknown message type `{0}`")]
    UnknownKind(String),
    #[error("Invalid amount `{0}`")]
    InvalidAmount(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Retry backoff table must not be empty")]
    EmptyBackoff,
    #[error("`{0}` must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("`ack_attempts` must be at least 1")]
    ZeroAckAttempts,
}

#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] MalformedMessage),
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Receiver error: {0}")]
    Receiver(#[from] ReceiverError),
}

pub type Result<T, E = ProcessingError> = std::result::Result<T, E>;

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for LedgerError {
    fn from(err: rocksdb::Error) -> Self {
        use rocksdb::ErrorKind;

        match err.kind() {
            ErrorKind::TimedOut => LedgerError::Timeout(err.into_string()),
            ErrorKind::IOError
            | ErrorKind::Busy
            | ErrorKind::TryAgain
            | ErrorKind::ShutdownInProgress => LedgerError::Connection(err.into_string()),
            _ => LedgerError::Internal(err.into_string()),
        }
    }
}
