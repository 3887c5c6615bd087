//! Adapters for the ports in [`crate::domain::ports`].

pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
