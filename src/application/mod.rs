//! Application layer: the message processing engine and its collaborators.
//!
//! `MessageWorker` pulls one message at a time, decodes it, claims its event id
//! in the ledger and applies the balance change, then settles the message with
//! the receiver. `classifier` decides between retrying and dead-lettering, and
//! `lease` keeps the message leased while the ledger work runs.

pub mod classifier;
pub mod engine;
pub mod lease;
