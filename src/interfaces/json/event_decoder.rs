use crate::domain::transaction::{TransactionEvent, TransactionKind};
use crate::error::MalformedMessage;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Map, Number, Value};
use std::str::FromStr;
use uuid::Uuid;

/// Raw payload shape after field names have been lower-cased.
#[derive(Debug, Deserialize)]
struct RawTransactionEvent {
    id: Option<Uuid>,
    #[serde(rename = "messagetype")]
    message_type: Option<String>,
    #[serde(rename = "bankaccountid")]
    bank_account_id: Option<Uuid>,
    amount: Option<Number>,
}

/// Decodes and validates a message body.
///
/// Field names are matched case-insensitively. Every failure is reported as a
/// [`MalformedMessage`], which the engine always dead-letters.
pub fn decode_event(body: &str) -> Result<TransactionEvent, MalformedMessage> {
    if body.trim().is_empty() {
        return Err(MalformedMessage::EmptyBody);
    }

    let value: Value =
        serde_json::from_str(body).map_err(|e| MalformedMessage::InvalidJson(e.to_string()))?;
    let Value::Object(fields) = value else {
        return Err(MalformedMessage::InvalidJson(
            "expected a JSON object".to_string(),
        ));
    };

    let fields = fold_keys(fields);
    // Absent and null are different: only an absent amount defaults to zero.
    if fields.get("amount").is_some_and(Value::is_null) {
        return Err(MalformedMessage::InvalidAmount("null".to_string()));
    }
    let raw: RawTransactionEvent = serde_json::from_value(Value::Object(fields))
        .map_err(|e| MalformedMessage::InvalidJson(e.to_string()))?;

    let id = required_id(raw.id, "id")?;
    let account_id = required_id(raw.bank_account_id, "bankAccountId")?;
    let kind: TransactionKind = raw
        .message_type
        .ok_or(MalformedMessage::MissingField("messageType"))?
        .parse()?;
    // An absent amount decodes as zero, matching the producer's default.
    let amount = match raw.amount {
        Some(number) => parse_amount(&number)?,
        None => Decimal::ZERO,
    };

    Ok(TransactionEvent {
        id,
        kind,
        account_id,
        amount,
    })
}

fn fold_keys(fields: Map<String, Value>) -> Map<String, Value> {
    fields
        .into_iter()
        .map(|(key, value)| (key.to_ascii_lowercase(), value))
        .collect()
}

fn required_id(id: Option<Uuid>, field: &'static str) -> Result<Uuid, MalformedMessage> {
    match id {
        None => Err(MalformedMessage::MissingField(field)),
        Some(id) if id.is_nil() => Err(MalformedMessage::NilIdentifier(field)),
        Some(id) => Ok(id),
    }
}

/// Parses the literal JSON text of the number so no binary float is involved.
fn parse_amount(number: &Number) -> Result<Decimal, MalformedMessage> {
    let text = number.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| MalformedMessage::InvalidAmount(text))
}
