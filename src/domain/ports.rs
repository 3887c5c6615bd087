use super::account::{Account, IdempotencyRecord};
use super::message::EventMessage;
use crate::error::{LedgerError, ReceiverError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// The queue as seen by a consumer.
///
/// None of these calls block indefinitely; `next` returns `None` when nothing
/// is available and callers are expected to poll.
#[async_trait]
pub trait MessageReceiver: Send + Sync {
    async fn next(&self) -> Result<Option<EventMessage>, ReceiverError>;

    /// Removes the message from the pending set. Completing an already
    /// completed message succeeds.
    async fn complete(&self, message: &EventMessage) -> Result<(), ReceiverError>;

    /// Puts the message back at the front of the queue and bumps its attempt counter.
    async fn abandon(&self, message: &EventMessage) -> Result<(), ReceiverError>;

    /// Hides the message until `not_before` and bumps its attempt counter.
    async fn reschedule(
        &self,
        message: &EventMessage,
        not_before: DateTime<Utc>,
    ) -> Result<(), ReceiverError>;

    /// Moves the message to the inspection channel. It is never retried.
    async fn dead_letter(&self, message: &EventMessage) -> Result<(), ReceiverError>;

    /// Capability query for lease renewal. Receivers without leases keep the default.
    fn lease_renewal(self: Arc<Self>) -> Option<Arc<dyn LeaseRenewingReceiver>> {
        None
    }
}

/// A receiver whose messages are held under a renewable lease.
#[async_trait]
pub trait LeaseRenewingReceiver: MessageReceiver {
    fn default_lease_duration(&self) -> Duration;

    async fn renew_lease(&self, message: &EventMessage) -> Result<(), ReceiverError>;
}

pub type ReceiverRef = Arc<dyn MessageReceiver>;

/// Transactional session factory over the ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn begin(&self) -> Result<LedgerTransactionBox, LedgerError>;
}

/// One open store transaction, owned exclusively by a single processing attempt.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Inserts the record, failing with [`LedgerError::DuplicateKey`] if its
    /// event id is already present. There is no separate existence check.
    async fn insert_idempotency_record(
        &mut self,
        record: &IdempotencyRecord,
    ) -> Result<(), LedgerError>;

    /// Atomically adds `delta` to the balance of `account_id` and returns the
    /// number of rows affected (0 when the account does not exist).
    async fn adjust_balance(&mut self, account_id: Uuid, delta: Decimal)
    -> Result<u64, LedgerError>;

    async fn commit(self: Box<Self>) -> Result<(), LedgerError>;

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError>;
}

pub type LedgerStoreRef = Arc<dyn LedgerStore>;
pub type LedgerTransactionBox = Box<dyn LedgerTransaction>;

/// Account administration used by hosts for seeding and reporting.
#[async_trait]
pub trait AccountRegistry: Send + Sync {
    /// Creates the account if it does not exist. Returns `false` if it already did.
    async fn open_account(&self, account: Account) -> Result<bool, LedgerError>;
    async fn account(&self, id: Uuid) -> Result<Option<Account>, LedgerError>;
    async fn accounts(&self) -> Result<Vec<Account>, LedgerError>;
}

pub type AccountRegistryRef = Arc<dyn AccountRegistry>;
