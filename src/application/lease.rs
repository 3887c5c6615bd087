//! Background lease renewal for the message currently being processed.

use crate::domain::message::EventMessage;
use crate::domain::ports::LeaseRenewingReceiver;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Renewal period for a lease: a third of its duration, never below `floor`.
pub fn renewal_interval(lease: Duration, floor: Duration) -> Duration {
    (lease / 3).max(floor)
}

/// A running renewal loop scoped to one in-flight message.
///
/// The loop sleeps one period, renews, and repeats until [`LeaseRenewal::stop`]
/// is called. Renewal failures are logged and otherwise ignored.
pub struct LeaseRenewal {
    stop: watch::Sender<bool>,
    handle: JoinHandle<u32>,
}

impl LeaseRenewal {
    pub fn start(
        receiver: Arc<dyn LeaseRenewingReceiver>,
        message: EventMessage,
        min_interval: Duration,
    ) -> Self {
        let interval = renewal_interval(receiver.default_lease_duration(), min_interval);
        let (stop, mut stopped) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut renewals = 0u32;
            loop {
                tokio::select! {
                    biased;
                    _ = stopped.changed() => break,
                    _ = tokio::time::sleep(interval) => {
                        match receiver.renew_lease(&message).await {
                            Ok(()) => {
                                renewals += 1;
                                debug!(message_id = %message.id, renewals, "Lease renewed");
                            }
                            Err(e) => {
                                warn!(message_id = %message.id, error = %e, "Lease renewal failed");
                            }
                        }
                    }
                }
            }
            renewals
        });

        Self { stop, handle }
    }

    /// Requests cancellation and waits until the loop has exited, so no renewal
    /// can race the finalization that follows. Returns the number of renewals.
    pub async fn stop(self) -> u32 {
        // A send error only means the loop already exited.
        let _ = self.stop.send(true);
        match self.handle.await {
            Ok(renewals) => renewals,
            Err(e) => {
                warn!(error = %e, "Lease renewal task did not shut down cleanly");
                0
            }
        }
    }
}
