use super::transaction::{TransactionEvent, TransactionKind};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted account. The engine only ever changes `balance` through the
/// store's atomic adjustment, never by reading and writing it back.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Account {
    pub id: Uuid,
    pub balance: Decimal,
}

impl Account {
    pub fn new(id: Uuid, balance: Decimal) -> Self {
        Self { id, balance }
    }
}

/// Audit row keyed by event id. Inserting it a second time must fail with a
/// uniqueness violation; that failure is how duplicates are detected.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct IdempotencyRecord {
    pub event_id: Uuid,
    pub account_id: Uuid,
    pub amount: Decimal,
    pub kind: TransactionKind,
    pub processed_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn for_event(event: &TransactionEvent, processed_at: DateTime<Utc>) -> Self {
        Self {
            event_id: event.id,
            account_id: event.account_id,
            amount: event.amount,
            kind: event.kind,
            processed_at,
        }
    }
}
