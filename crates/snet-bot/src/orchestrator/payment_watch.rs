//! Waits for a requested payment to land on-chain.

use super::Orchestrator;
use call_store::SessionKey;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const PAYMENT_EXPIRED: &str = "Payment expired. Send the command again to retry.";
pub const PAYMENT_FAILED: &str =
    "Payment transaction failed or did not match the request. Send the command again to retry.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Paid,
    Reverted,
    /// The payment left `pending` by other means.
    Abandoned,
}

impl Orchestrator {
    pub(super) async fn watch_payment(self: Arc<Self>, session: SessionKey, payment_id: Uuid) {
        let timeout = self.config.payment_timeout;

        match tokio::time::timeout(timeout, self.await_payment(payment_id)).await {
            Ok(Outcome::Paid) => self.on_paid(&session, payment_id).await,
            Ok(Outcome::Reverted) => self.expire(&session, payment_id, PAYMENT_FAILED).await,
            Ok(Outcome::Abandoned) => debug!("Stopped watching payment {}", payment_id),
            Err(_) => {
                info!("Payment {} not received within {:?}", payment_id, timeout);
                self.expire(&session, payment_id, PAYMENT_EXPIRED).await;
            }
        }
    }

    async fn await_payment(&self, payment_id: Uuid) -> Outcome {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let Some(state) = self.payments.get(payment_id).await else {
                return Outcome::Abandoned;
            };
            if !state.is_pending() {
                return Outcome::Abandoned;
            }
            let Some(tx_hash) = state.tx_hash else {
                continue;
            };

            match self
                .services
                .confirmer
                .transfer_status(&tx_hash, &state.uri)
                .await
            {
                Ok(Some(true)) => return Outcome::Paid,
                Ok(Some(false)) => {
                    warn!("Payment transaction {} rejected", tx_hash);
                    return Outcome::Reverted;
                }
                Ok(None) => debug!("Transaction {} not mined yet", tx_hash),
                Err(e) => warn!("Receipt lookup for {} failed: {}", tx_hash, e),
            }
        }
    }

    async fn on_paid(&self, session: &SessionKey, payment_id: Uuid) {
        if let Err(e) = self.payments.mark_paid(payment_id).await {
            warn!("Payment {} not marked paid: {}", payment_id, e);
            return;
        }

        let next = self
            .sessions
            .update(session, |state| {
                if state.payment_id != payment_id {
                    return None;
                }
                state.begin_collecting();
                Some(state.current_field().cloned())
            })
            .await;

        match next {
            Ok(Some(Some(field))) => self.prompt(session, &field).await,
            Ok(Some(None)) => {
                if let Some(state) = self.sessions.remove(session).await {
                    self.dispatch(session, state).await;
                }
            }
            Ok(None) | Err(_) => info!("Session for payment {} is gone", payment_id),
        }
    }

    /// Only the caller that actually expires the payment notifies.
    async fn expire(&self, session: &SessionKey, payment_id: Uuid, notice: &str) {
        if let Err(e) = self.payments.mark_expired(payment_id).await {
            debug!("Payment {} not expired: {}", payment_id, e);
            return;
        }

        if let Some(state) = self.sessions.get(session).await {
            if state.payment_id == payment_id {
                self.sessions.remove(session).await;
            }
        }

        if let Err(e) = self.services.messenger.send(&session.room_id, notice).await {
            error!("Failed to send payment notice: {}", e);
        }
    }
}
