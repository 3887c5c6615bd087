//! Separates failures worth retrying from failures that will never succeed.

use crate::error::{LedgerError, ProcessingError, ReceiverError};
use std::io::ErrorKind;

/// Store error codes known to mean "try again later": database unavailable or
/// login refused while it starts, service busy or throttled, and client-side
/// timeout. Every store-engine error is retried; these are the ones expected
/// to clear on their own.
pub const TRANSIENT_STORE_CODES: &[i32] = &[
    4060, 40197, 40501, 40613, 10928, 10929, 49918, 49919, 49920, -2,
];

const TRANSIENT_IO_KINDS: &[ErrorKind] = &[
    ErrorKind::TimedOut,
    ErrorKind::ConnectionRefused,
    ErrorKind::ConnectionReset,
    ErrorKind::ConnectionAborted,
    ErrorKind::NotConnected,
    ErrorKind::BrokenPipe,
    ErrorKind::Interrupted,
    ErrorKind::WouldBlock,
];

/// Returns `true` when retrying the failed operation later may succeed.
///
/// Anything not recognised as transient is permanent.
pub fn is_transient(error: &ProcessingError) -> bool {
    match error {
        ProcessingError::Ledger(err) => is_transient_ledger(err),
        ProcessingError::Receiver(err) => is_transient_receiver(err),
        ProcessingError::Malformed(_) => false,
    }
}

pub fn is_transient_ledger(error: &LedgerError) -> bool {
    match error {
        LedgerError::Timeout(_) | LedgerError::Connection(_) => true,
        LedgerError::Store { .. } => true,
        LedgerError::Io(err) => TRANSIENT_IO_KINDS.contains(&err.kind()),
        LedgerError::DuplicateKey(_)
        | LedgerError::Overflow(_)
        | LedgerError::Serialization(_)
        | LedgerError::Internal(_) => false,
    }
}

pub fn is_transient_receiver(error: &ReceiverError) -> bool {
    match error {
        ReceiverError::Timeout(_) | ReceiverError::Unavailable(_) => true,
        ReceiverError::LeaseLost(_) => false,
    }
}
