//! Domain types and the ports the engine consumes.
//!
//! Queue transport and ledger storage are external collaborators; this layer
//! only describes their contracts.

pub mod account;
pub mod clock;
pub mod message;
pub mod ports;
pub mod transaction;
