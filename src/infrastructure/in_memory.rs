use crate::domain::account::{Account, IdempotencyRecord};
use crate::domain::clock::{ClockRef, SystemClock};
use crate::domain::message::EventMessage;
use crate::domain::ports::{
    AccountRegistry, LeaseRenewingReceiver, LedgerStore, LedgerTransaction, LedgerTransactionBox,
    MessageReceiver,
};
use crate::error::{LedgerError, ReceiverError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(30);

#[derive(Default)]
struct QueueState {
    ready: VecDeque<EventMessage>,
    scheduled: Vec<(EventMessage, DateTime<Utc>)>,
    leased: HashMap<Uuid, EventMessage>,
    completed: Vec<EventMessage>,
    dead_letters: Vec<EventMessage>,
    renewals: HashMap<Uuid, u32>,
}

impl QueueState {
    /// Moves every scheduled message whose deadline has passed to the back of the queue.
    fn promote_due(&mut self, now: DateTime<Utc>) {
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.scheduled)
            .into_iter()
            .partition(|(_, not_before)| *not_before <= now);
        self.scheduled = waiting;
        self.ready.extend(due.into_iter().map(|(message, _)| message));
    }

    /// Takes the message out of the leased set, failing if this consumer no longer holds it.
    fn release(&mut self, message: &EventMessage) -> Result<EventMessage, ReceiverError> {
        self.leased
            .remove(&message.id)
            .ok_or(ReceiverError::LeaseLost(message.id))
    }
}

/// A lease-based queue held in memory.
///
/// Messages handed out by `next` stay leased until they are settled. Settling
/// a message whose lease was lost fails with [`ReceiverError::LeaseLost`].
/// Leases never lapse on their own: they end only through
/// [`InMemoryReceiver::expire_lease`], and `lease_duration` only sets the
/// renewal period. Completed, dead-lettered and renewal records are kept for
/// the receiver's lifetime. Used as the test double and by the demo host.
#[derive(Clone)]
pub struct InMemoryReceiver {
    state: Arc<Mutex<QueueState>>,
    clock: ClockRef,
    lease_duration: Duration,
}

impl Default for InMemoryReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryReceiver {
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            clock: Arc::new(SystemClock),
            lease_duration: DEFAULT_LEASE_DURATION,
        }
    }

    pub fn with_clock(mut self, clock: ClockRef) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    pub async fn enqueue(&self, messages: impl IntoIterator<Item = EventMessage>) {
        self.state.lock().await.ready.extend(messages);
    }

    pub async fn completed(&self) -> Vec<EventMessage> {
        self.state.lock().await.completed.clone()
    }

    pub async fn dead_letters(&self) -> Vec<EventMessage> {
        self.state.lock().await.dead_letters.clone()
    }

    pub async fn scheduled(&self) -> Vec<(EventMessage, DateTime<Utc>)> {
        self.state.lock().await.scheduled.clone()
    }

    pub async fn renewal_count(&self, message_id: Uuid) -> u32 {
        let state = self.state.lock().await;
        state.renewals.get(&message_id).copied().unwrap_or(0)
    }

    /// True when nothing is queued, scheduled, or leased.
    pub async fn is_drained(&self) -> bool {
        let state = self.state.lock().await;
        state.ready.is_empty() && state.scheduled.is_empty() && state.leased.is_empty()
    }

    /// Simulates lease expiry: the message becomes available to other consumers
    /// and the current holder can no longer settle it.
    pub async fn expire_lease(&self, message_id: Uuid) -> bool {
        let mut state = self.state.lock().await;
        match state.leased.remove(&message_id) {
            Some(message) => {
                state.ready.push_back(message);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl MessageReceiver for InMemoryReceiver {
    async fn next(&self) -> Result<Option<EventMessage>, ReceiverError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.promote_due(now);

        let Some(message) = state.ready.pop_front() else {
            return Ok(None);
        };
        state.leased.insert(message.id, message.clone());
        Ok(Some(message))
    }

    async fn complete(&self, message: &EventMessage) -> Result<(), ReceiverError> {
        let mut state = self.state.lock().await;
        match state.release(message) {
            Ok(held) => {
                state.completed.push(held);
                Ok(())
            }
            Err(_) if state.completed.iter().any(|m| m.id == message.id) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn abandon(&self, message: &EventMessage) -> Result<(), ReceiverError> {
        let mut state = self.state.lock().await;
        let mut held = state.release(message)?;
        held.processing_count += 1;
        state.ready.push_front(held);
        Ok(())
    }

    async fn reschedule(
        &self,
        message: &EventMessage,
        not_before: DateTime<Utc>,
    ) -> Result<(), ReceiverError> {
        let mut state = self.state.lock().await;
        let mut held = state.release(message)?;
        held.processing_count += 1;
        state.scheduled.push((held, not_before));
        Ok(())
    }

    async fn dead_letter(&self, message: &EventMessage) -> Result<(), ReceiverError> {
        let mut state = self.state.lock().await;
        let held = state.release(message)?;
        state.dead_letters.push(held);
        Ok(())
    }

    fn lease_renewal(self: Arc<Self>) -> Option<Arc<dyn LeaseRenewingReceiver>> {
        Some(self)
    }
}

#[async_trait]
impl LeaseRenewingReceiver for InMemoryReceiver {
    fn default_lease_duration(&self) -> Duration {
        self.lease_duration
    }

    async fn renew_lease(&self, message: &EventMessage) -> Result<(), ReceiverError> {
        let mut state = self.state.lock().await;
        if !state.leased.contains_key(&message.id) {
            return Err(ReceiverError::LeaseLost(message.id));
        }
        *state.renewals.entry(message.id).or_default() += 1;
        Ok(())
    }
}

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<Uuid, Decimal>,
    records: HashMap<Uuid, IdempotencyRecord>,
}

/// An in-memory ledger with serializable transactions.
///
/// `begin` takes the ledger lock and the transaction keeps it until commit or
/// rollback, so transactions never interleave. Writes are staged and only
/// become visible on commit.
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn balance(&self, account_id: Uuid) -> Option<Decimal> {
        self.state.lock().await.accounts.get(&account_id).copied()
    }

    pub async fn idempotency_record(&self, event_id: Uuid) -> Option<IdempotencyRecord> {
        self.state.lock().await.records.get(&event_id).cloned()
    }

    pub async fn record_count(&self) -> usize {
        self.state.lock().await.records.len()
    }

    /// Deletes an account together with its idempotency records.
    pub async fn remove_account(&self, account_id: Uuid) -> bool {
        let mut state = self.state.lock().await;
        if state.accounts.remove(&account_id).is_none() {
            return false;
        }
        state.records.retain(|_, record| record.account_id != account_id);
        true
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn begin(&self) -> Result<LedgerTransactionBox, LedgerError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        Ok(Box::new(InMemoryTransaction {
            state: guard,
            records: Vec::new(),
            deltas: HashMap::new(),
        }))
    }
}

#[async_trait]
impl AccountRegistry for InMemoryLedger {
    async fn open_account(&self, account: Account) -> Result<bool, LedgerError> {
        let mut state = self.state.lock().await;
        if state.accounts.contains_key(&account.id) {
            return Ok(false);
        }
        state.accounts.insert(account.id, account.balance);
        Ok(true)
    }

    async fn account(&self, id: Uuid) -> Result<Option<Account>, LedgerError> {
        Ok(self.balance(id).await.map(|balance| Account::new(id, balance)))
    }

    async fn accounts(&self) -> Result<Vec<Account>, LedgerError> {
        let state = self.state.lock().await;
        let mut accounts: Vec<Account> = state
            .accounts
            .iter()
            .map(|(id, balance)| Account::new(*id, *balance))
            .collect();
        accounts.sort_by_key(|account| account.id);
        Ok(accounts)
    }
}

struct InMemoryTransaction {
    state: OwnedMutexGuard<LedgerState>,
    records: Vec<IdempotencyRecord>,
    deltas: HashMap<Uuid, Decimal>,
}

#[async_trait]
impl LedgerTransaction for InMemoryTransaction {
    async fn insert_idempotency_record(
        &mut self,
        record: &IdempotencyRecord,
    ) -> Result<(), LedgerError> {
        let taken = self.state.records.contains_key(&record.event_id)
            || self.records.iter().any(|r| r.event_id == record.event_id);
        if taken {
            return Err(LedgerError::DuplicateKey(record.event_id));
        }
        self.records.push(record.clone());
        Ok(())
    }

    async fn adjust_balance(
        &mut self,
        account_id: Uuid,
        delta: Decimal,
    ) -> Result<u64, LedgerError> {
        let Some(balance) = self.state.accounts.get(&account_id).copied() else {
            return Ok(0);
        };
        let staged = self.deltas.get(&account_id).copied().unwrap_or_default();
        let total = staged
            .checked_add(delta)
            .filter(|total| balance.checked_add(*total).is_some())
            .ok_or(LedgerError::Overflow(account_id))?;
        self.deltas.insert(account_id, total);
        Ok(1)
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        let InMemoryTransaction {
            mut state,
            records,
            deltas,
        } = *self;
        // Resolve every new balance before touching state so a failure applies nothing.
        let mut balances = Vec::with_capacity(deltas.len());
        for (account_id, delta) in deltas {
            let balance = state.accounts.get(&account_id).ok_or_else(|| {
                LedgerError::Internal(format!("account {account_id} vanished mid-transaction"))
            })?;
            let updated = balance
                .checked_add(delta)
                .ok_or(LedgerError::Overflow(account_id))?;
            balances.push((account_id, updated));
        }
        state.accounts.extend(balances);
        for record in records {
            state.records.insert(record.event_id, record);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError> {
        Ok(())
    }
}
