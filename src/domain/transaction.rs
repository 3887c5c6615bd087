use crate::error::MalformedMessage;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The only two kinds of balance mutation the consumer understands.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
pub enum TransactionKind {
    Credit,
    Debit,
}

impl TransactionKind {
    /// Applies the kind's sign to an amount.
    pub fn signed(self, amount: Decimal) -> Decimal {
        match self {
            TransactionKind::Credit => amount,
            TransactionKind::Debit => -amount,
        }
    }
}

impl FromStr for TransactionKind {
    type Err = MalformedMessage;

    /// Case-insensitive and tolerant of surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = s.trim();
        if kind.eq_ignore_ascii_case("credit") {
            Ok(TransactionKind::Credit)
        } else if kind.eq_ignore_ascii_case("debit") {
            Ok(TransactionKind::Debit)
        } else {
            Err(MalformedMessage::UnknownKind(kind.to_string()))
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Credit => f.write_str("Credit"),
            TransactionKind::Debit => f.write_str("Debit"),
        }
    }
}

/// A decoded and validated business event.
///
/// Only exists for the duration of one processing attempt; the engine never
/// persists it except as an idempotency record.
#[derive(Debug, PartialEq, Clone)]
pub struct TransactionEvent {
    pub id: Uuid,
    pub kind: TransactionKind,
    pub account_id: Uuid,
    pub amount: Decimal,
}

impl TransactionEvent {
    /// The balance change this event represents: positive for credits, negative for debits.
    pub fn signed_delta(&self) -> Decimal {
        self.kind.signed(self.amount)
    }
}
