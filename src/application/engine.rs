use super::classifier::{is_transient, is_transient_receiver};
use super::lease::LeaseRenewal;
use crate::config::WorkerConfig;
use crate::domain::account::IdempotencyRecord;
use crate::domain::clock::{ClockRef, SystemClock};
use crate::domain::message::EventMessage;
use crate::domain::ports::{LedgerStoreRef, LedgerTransactionBox, ReceiverRef};
use crate::domain::transaction::TransactionEvent;
use crate::error::{LedgerError, MalformedMessage, Result};
use crate::interfaces::json::event_decoder::decode_event;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Why a message was moved to the dead-letter channel.
#[derive(Debug, Clone, PartialEq)]
pub enum DeadLetterReason {
    Malformed(MalformedMessage),
    UnknownAccount(Uuid),
    /// A processing failure the classifier did not consider transient.
    Permanent(String),
}

/// How a single processed message was settled.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Completed,
    /// The event had already been applied; the message was acknowledged.
    Duplicate,
    DeadLettered(DeadLetterReason),
    Rescheduled {
        delay: Duration,
        not_before: DateTime<Utc>,
    },
    /// The transaction committed but the message could not be acknowledged.
    /// It will be redelivered once its lease expires and absorbed as a duplicate.
    CompletionDeferred,
}

enum ApplyOutcome {
    Applied,
    Duplicate,
    UnknownAccount,
}

/// The message processing engine.
///
/// Runs one message at a time through decode, claim, apply and settle.
/// Correctness across several workers sharing a receiver and a ledger rests on
/// the ledger's unique idempotency key and its atomic balance adjustment.
pub struct MessageWorker {
    receiver: ReceiverRef,
    ledger: LedgerStoreRef,
    clock: ClockRef,
    config: WorkerConfig,
}

impl MessageWorker {
    pub fn new(receiver: ReceiverRef, ledger: LedgerStoreRef, config: WorkerConfig) -> Self {
        Self {
            receiver,
            ledger,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_clock(mut self, clock: ClockRef) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Runs until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// The signal is checked before each iteration and interrupts the idle and
    /// fault pauses. A message that is already being processed is always
    /// finished first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Message worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let pause = match self.run_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => self.config.idle_poll_interval,
                Err(e) => {
                    error!(error = %e, "Message worker iteration failed, pausing");
                    self.config.fault_pause
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Message worker stopped");
    }

    /// Pulls and processes at most one message. `Ok(None)` means the queue was empty.
    pub async fn run_once(&self) -> Result<Option<Disposition>> {
        let Some(message) = self.receiver.next().await? else {
            return Ok(None);
        };
        debug!(
            message_id = %message.id,
            attempt = message.processing_count,
            "Fetched message"
        );
        self.process(message).await.map(Some)
    }

    /// Drives one message to a settled state.
    ///
    /// Returns an error only when the receiver refused to dead-letter or
    /// reschedule the message.
    pub async fn process(&self, message: EventMessage) -> Result<Disposition> {
        let event = match decode_event(&message.body) {
            Ok(event) => event,
            Err(reason) => {
                warn!(message_id = %message.id, %reason, "Dead-lettering malformed message");
                self.dead_letter(&message).await?;
                return Ok(Disposition::DeadLettered(DeadLetterReason::Malformed(
                    reason,
                )));
            }
        };

        let renewal = Arc::clone(&self.receiver).lease_renewal().map(|receiver| {
            LeaseRenewal::start(receiver, message.clone(), self.config.min_renewal_interval)
        });

        let outcome = self.apply(&event).await;

        if let Some(renewal) = renewal {
            let renewals = renewal.stop().await;
            debug!(message_id = %message.id, renewals, "Lease renewal stopped");
        }

        match outcome {
            Ok(ApplyOutcome::Applied) => {
                info!(
                    message_id = %message.id,
                    event_id = %event.id,
                    account_id = %event.account_id,
                    kind = %event.kind,
                    amount = %event.amount,
                    "Transaction applied"
                );
                Ok(self.acknowledge(&message).await)
            }
            Ok(ApplyOutcome::Duplicate) => {
                info!(
                    message_id = %message.id,
                    event_id = %event.id,
                    "Event already applied, acknowledging duplicate"
                );
                match self.acknowledge(&message).await {
                    Disposition::Completed => Ok(Disposition::Duplicate),
                    other => Ok(other),
                }
            }
            Ok(ApplyOutcome::UnknownAccount) => {
                warn!(
                    message_id = %message.id,
                    event_id = %event.id,
                    account_id = %event.account_id,
                    "Dead-lettering event for unknown account"
                );
                self.dead_letter(&message).await?;
                Ok(Disposition::DeadLettered(DeadLetterReason::UnknownAccount(
                    event.account_id,
                )))
            }
            Err(err) if is_transient(&err) => {
                let delay = self.config.retry.delay_for(message.processing_count);
                let not_before = deadline(self.clock.now(), delay);
                warn!(
                    message_id = %message.id,
                    event_id = %event.id,
                    attempt = message.processing_count,
                    delay_secs = delay.as_secs(),
                    error = %err,
                    "Transient failure, rescheduling"
                );
                self.reschedule(&message, not_before).await?;
                Ok(Disposition::Rescheduled { delay, not_before })
            }
            Err(err) => {
                warn!(
                    message_id = %message.id,
                    event_id = %event.id,
                    error = %err,
                    "Permanent failure, dead-lettering"
                );
                self.dead_letter(&message).await?;
                Ok(Disposition::DeadLettered(DeadLetterReason::Permanent(
                    err.to_string(),
                )))
            }
        }
    }

    /// Claims the event and applies it inside one ledger transaction.
    async fn apply(&self, event: &TransactionEvent) -> Result<ApplyOutcome> {
        let mut tx = self.bounded(self.ledger.begin()).await?;

        let record = IdempotencyRecord::for_event(event, self.clock.now());
        let claimed = self.bounded(tx.insert_idempotency_record(&record)).await;
        match claimed {
            Ok(()) => {}
            Err(LedgerError::DuplicateKey(_)) => {
                self.discard(tx).await;
                return Ok(ApplyOutcome::Duplicate);
            }
            Err(e) => {
                self.discard(tx).await;
                return Err(e.into());
            }
        }

        let adjusted = self
            .bounded(tx.adjust_balance(event.account_id, event.signed_delta()))
            .await;
        match adjusted {
            Ok(0) => {
                self.discard(tx).await;
                return Ok(ApplyOutcome::UnknownAccount);
            }
            Ok(_) => {}
            Err(e) => {
                self.discard(tx).await;
                return Err(e.into());
            }
        }

        self.bounded(tx.commit()).await?;
        Ok(ApplyOutcome::Applied)
    }

    /// Applies the store timeout to a single ledger call.
    async fn bounded<T>(
        &self,
        operation: impl Future<Output = Result<T, LedgerError>>,
    ) -> Result<T, LedgerError> {
        tokio::time::timeout(self.config.store_timeout, operation)
            .await
            .map_err(|_| {
                LedgerError::Timeout(format!(
                    "no response within {}s",
                    self.config.store_timeout.as_secs_f64()
                ))
            })?
    }

    async fn discard(&self, tx: LedgerTransactionBox) {
        if let Err(e) = self.bounded(tx.rollback()).await {
            warn!(error = %e, "Rollback failed");
        }
    }

    /// Acknowledges a message whose effect is already committed.
    ///
    /// Transient receiver failures are retried. If acknowledgment still fails
    /// the message is left alone: redelivery will hit the duplicate path.
    async fn acknowledge(&self, message: &EventMessage) -> Disposition {
        let mut attempt = 1;
        loop {
            match self.receiver.complete(message).await {
                Ok(()) => return Disposition::Completed,
                Err(e) if attempt < self.config.ack_attempts && is_transient_receiver(&e) => {
                    debug!(message_id = %message.id, attempt, error = %e, "Acknowledgment failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(self.config.ack_retry_delay).await;
                }
                Err(e) => {
                    warn!(
                        message_id = %message.id,
                        error = %e,
                        "Could not acknowledge committed message, leaving it for redelivery"
                    );
                    return Disposition::CompletionDeferred;
                }
            }
        }
    }

    /// A failure here is returned to the loop untouched. The message stays
    /// leased and comes back through lease expiry, never ahead of its backoff.
    async fn dead_letter(&self, message: &EventMessage) -> Result<()> {
        self.receiver
            .dead_letter(message)
            .await
            .inspect_err(|e| error!(message_id = %message.id, error = %e, "Dead-lettering failed"))?;
        Ok(())
    }

    async fn reschedule(&self, message: &EventMessage, not_before: DateTime<Utc>) -> Result<()> {
        self.receiver
            .reschedule(message, not_before)
            .await
            .inspect_err(|e| error!(message_id = %message.id, error = %e, "Rescheduling failed"))?;
        Ok(())
    }
}

fn deadline(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
