#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledger_inbox::domain::account::{Account, IdempotencyRecord};
use ledger_inbox::domain::message::EventMessage;
use ledger_inbox::domain::ports::{
    AccountRegistry, LeaseRenewingReceiver, LedgerStore, LedgerTransaction, LedgerTransactionBox,
    MessageReceiver,
};
use ledger_inbox::error::{LedgerError, ReceiverError};
use ledger_inbox::infrastructure::in_memory::{InMemoryLedger, InMemoryReceiver};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const ACCOUNT: &str = "7d445724-24ec-4d52-aa7a-ff2bac9f191d";

pub fn account_id() -> Uuid {
    Uuid::parse_str(ACCOUNT).unwrap()
}

pub fn transaction_body(event_id: Uuid, kind: &str, account: &str, amount: &str) -> String {
    format!(
        r#"{{"id":"{event_id}","messageType":"{kind}","bankAccountId":"{account}","amount":{amount}}}"#
    )
}

pub fn credit(event_id: Uuid, amount: &str) -> EventMessage {
    EventMessage::new(transaction_body(event_id, "Credit", ACCOUNT, amount))
}

pub async fn ledger_with_account(balance: Decimal) -> InMemoryLedger {
    let ledger = InMemoryLedger::new();
    ledger
        .open_account(Account::new(account_id(), balance))
        .await
        .unwrap();
    ledger
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOp {
    Begin,
    Insert,
    Adjust,
    Commit,
}

struct Fault {
    op: LedgerOp,
    remaining: u32,
    make: fn() -> LedgerError,
}

#[derive(Default)]
struct FaultPlan {
    faults: Mutex<Vec<Fault>>,
    stalls: Mutex<Vec<(LedgerOp, Duration)>>,
}

impl FaultPlan {
    fn take(&self, op: LedgerOp) -> Option<LedgerError> {
        let mut faults = self.faults.lock().unwrap();
        let fault = faults.iter_mut().find(|f| f.op == op && f.remaining > 0)?;
        fault.remaining -= 1;
        Some((fault.make)())
    }

    fn stall_for(&self, op: LedgerOp) -> Option<Duration> {
        let stalls = self.stalls.lock().unwrap();
        stalls.iter().find(|(o, _)| *o == op).map(|(_, d)| *d)
    }

    async fn enter(&self, op: LedgerOp) -> Result<(), LedgerError> {
        if let Some(stall) = self.stall_for(op) {
            tokio::time::sleep(stall).await;
        }
        match self.take(op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Wraps the in-memory ledger and injects failures or delays into chosen operations.
#[derive(Clone)]
pub struct FlakyLedger {
    inner: InMemoryLedger,
    plan: Arc<FaultPlan>,
}

impl FlakyLedger {
    pub fn new(inner: InMemoryLedger) -> Self {
        Self {
            inner,
            plan: Arc::default(),
        }
    }

    pub fn fail(&self, op: LedgerOp, times: u32, make: fn() -> LedgerError) {
        self.plan.faults.lock().unwrap().push(Fault {
            op,
            remaining: times,
            make,
        });
    }

    pub fn stall(&self, op: LedgerOp, by: Duration) {
        self.plan.stalls.lock().unwrap().push((op, by));
    }
}

#[async_trait]
impl LedgerStore for FlakyLedger {
    async fn begin(&self) -> Result<LedgerTransactionBox, LedgerError> {
        self.plan.enter(LedgerOp::Begin).await?;
        let inner = self.inner.begin().await?;
        Ok(Box::new(FlakyTransaction {
            inner,
            plan: Arc::clone(&self.plan),
        }))
    }
}

struct FlakyTransaction {
    inner: LedgerTransactionBox,
    plan: Arc<FaultPlan>,
}

#[async_trait]
impl LedgerTransaction for FlakyTransaction {
    async fn insert_idempotency_record(
        &mut self,
        record: &IdempotencyRecord,
    ) -> Result<(), LedgerError> {
        self.plan.enter(LedgerOp::Insert).await?;
        self.inner.insert_idempotency_record(record).await
    }

    async fn adjust_balance(
        &mut self,
        account_id: Uuid,
        delta: Decimal,
    ) -> Result<u64, LedgerError> {
        self.plan.enter(LedgerOp::Adjust).await?;
        self.inner.adjust_balance(account_id, delta).await
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        self.plan.enter(LedgerOp::Commit).await?;
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError> {
        self.inner.rollback().await
    }
}

/// A receiver without lease support that can fail selected calls.
///
/// A failed `complete` also expires the lease in the wrapped receiver, the way
/// a real broker would hand the message to the next consumer.
pub struct FaultyReceiver {
    pub inner: Arc<InMemoryReceiver>,
    next_failures: AtomicU32,
    complete_failures: AtomicU32,
    complete_error: fn(Uuid) -> ReceiverError,
    dead_letter_failures: AtomicU32,
    reschedule_failures: AtomicU32,
}

impl FaultyReceiver {
    pub fn new(inner: Arc<InMemoryReceiver>) -> Self {
        Self {
            inner,
            next_failures: AtomicU32::new(0),
            complete_failures: AtomicU32::new(0),
            complete_error: ReceiverError::LeaseLost,
            dead_letter_failures: AtomicU32::new(0),
            reschedule_failures: AtomicU32::new(0),
        }
    }

    pub fn failing_next(self, times: u32) -> Self {
        self.next_failures.store(times, Ordering::SeqCst);
        self
    }

    pub fn failing_complete(mut self, times: u32, error: fn(Uuid) -> ReceiverError) -> Self {
        self.complete_failures.store(times, Ordering::SeqCst);
        self.complete_error = error;
        self
    }

    pub fn failing_dead_letter(self, times: u32) -> Self {
        self.dead_letter_failures.store(times, Ordering::SeqCst);
        self
    }

    pub fn failing_reschedule(self, times: u32) -> Self {
        self.reschedule_failures.store(times, Ordering::SeqCst);
        self
    }
}

fn consume(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl MessageReceiver for FaultyReceiver {
    async fn next(&self) -> Result<Option<EventMessage>, ReceiverError> {
        if consume(&self.next_failures) {
            return Err(ReceiverError::Unavailable("broker offline".to_string()));
        }
        self.inner.next().await
    }

    async fn complete(&self, message: &EventMessage) -> Result<(), ReceiverError> {
        if consume(&self.complete_failures) {
            let err = (self.complete_error)(message.id);
            if matches!(err, ReceiverError::LeaseLost(_)) {
                self.inner.expire_lease(message.id).await;
            }
            return Err(err);
        }
        self.inner.complete(message).await
    }

    async fn abandon(&self, message: &EventMessage) -> Result<(), ReceiverError> {
        self.inner.abandon(message).await
    }

    async fn reschedule(
        &self,
        message: &EventMessage,
        not_before: DateTime<Utc>,
    ) -> Result<(), ReceiverError> {
        if consume(&self.reschedule_failures) {
            return Err(ReceiverError::Unavailable("scheduler offline".to_string()));
        }
        self.inner.reschedule(message, not_before).await
    }

    async fn dead_letter(&self, message: &EventMessage) -> Result<(), ReceiverError> {
        if consume(&self.dead_letter_failures) {
            return Err(ReceiverError::Unavailable("dead-letter queue offline".to_string()));
        }
        self.inner.dead_letter(message).await
    }
}

/// A lease-capable receiver whose renewals always fail.
pub struct UnrenewableReceiver {
    pub inner: Arc<InMemoryReceiver>,
    pub attempts: AtomicU32,
}

impl UnrenewableReceiver {
    pub fn new(inner: Arc<InMemoryReceiver>) -> Self {
        Self {
            inner,
            attempts: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl MessageReceiver for UnrenewableReceiver {
    async fn next(&self) -> Result<Option<EventMessage>, ReceiverError> {
        self.inner.next().await
    }

    async fn complete(&self, message: &EventMessage) -> Result<(), ReceiverError> {
        self.inner.complete(message).await
    }

    async fn abandon(&self, message: &EventMessage) -> Result<(), ReceiverError> {
        self.inner.abandon(message).await
    }

    async fn reschedule(
        &self,
        message: &EventMessage,
        not_before: DateTime<Utc>,
    ) -> Result<(), ReceiverError> {
        self.inner.reschedule(message, not_before).await
    }

    async fn dead_letter(&self, message: &EventMessage) -> Result<(), ReceiverError> {
        self.inner.dead_letter(message).await
    }

    fn lease_renewal(self: Arc<Self>) -> Option<Arc<dyn LeaseRenewingReceiver>> {
        Some(self)
    }
}

#[async_trait]
impl LeaseRenewingReceiver for UnrenewableReceiver {
    fn default_lease_duration(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn renew_lease(&self, _message: &EventMessage) -> Result<(), ReceiverError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(ReceiverError::Unavailable("lease service offline".to_string()))
    }
}
