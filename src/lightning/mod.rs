//! Lightning Adapter
//!
//! Wraps the consumed Lightning client with payment timeouts, path-failure
//! retries and advisory cancellation. Hold-invoices are keyed by preimage
//! hash; the adapter re-exposes the client's event stream so the nursery can
//! react to `invoice.paid`, `htlc.accepted` and friends.

pub mod invoice;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

/// Terminal payment failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentFailureReason {
    NoRoute,
    Timeout,
    InvoiceAlreadyPaid,
    IncorrectPaymentDetails,
}

impl std::fmt::Display for PaymentFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NoRoute => "NO_ROUTE",
            Self::Timeout => "TIMEOUT",
            Self::InvoiceAlreadyPaid => "INVOICE_ALREADY_PAID",
            Self::IncorrectPaymentDetails => "INCORRECT_PAYMENT_DETAILS",
        };
        write!(f, "{}", s)
    }
}

/// Lightning errors
#[derive(Debug, Error)]
pub enum LightningError {
    #[error("payment failed: {0}")]
    PaymentFailed(PaymentFailureReason),

    /// Transient path failure, worth retrying with a different route
    #[error("path failure: {0}")]
    PathFailure(String),

    #[error("payment cancelled")]
    Cancelled,

    #[error("invalid invoice: {0}")]
    InvalidInvoice(String),

    #[error("invoice not found for hash {0}")]
    InvoiceNotFound(String),

    #[error("RPC error: {0}")]
    Rpc(String),
}

/// Result of a successful outgoing payment
#[derive(Debug, Clone, Copy)]
pub struct PaymentResult {
    pub preimage: [u8; 32],
    pub routing_fee_msat: u64,
}

/// Events the Lightning node pushes at the engine
#[derive(Debug, Clone)]
pub enum InvoiceEvent {
    /// Payer locked the HTLC of a hold-invoice
    Paid { preimage_hash: [u8; 32] },
    /// Hold-invoice settled with the released preimage
    Settled {
        preimage_hash: [u8; 32],
        preimage: [u8; 32],
    },
    /// Outgoing payment failed terminally
    FailedToPay {
        preimage_hash: [u8; 32],
        reason: PaymentFailureReason,
    },
    /// Incoming HTLC accepted on a hold-invoice
    HtlcAccepted {
        preimage_hash: [u8; 32],
        amount_msat: u64,
        expiry: u64,
    },
    /// Static channel backup snapshot
    ChannelBackup(Vec<u8>),
}

/// Raw Lightning client, consumed. Must support hold-invoices.
#[async_trait]
pub trait LightningClient: Send + Sync {
    /// Attempt to pay a BOLT11 invoice once
    async fn pay_invoice(&self, bolt11: &str) -> Result<PaymentResult, LightningError>;

    /// Create a hold-invoice keyed by the preimage hash
    async fn add_hold_invoice(
        &self,
        preimage_hash: [u8; 32],
        amount_msat: u64,
        expiry_secs: u64,
        memo: &str,
    ) -> Result<String, LightningError>;

    /// Release the preimage of a hold-invoice, settling it
    async fn settle_invoice(&self, preimage: [u8; 32]) -> Result<(), LightningError>;

    /// Cancel a hold-invoice, releasing the payer's HTLC
    async fn cancel_invoice(&self, preimage_hash: [u8; 32]) -> Result<(), LightningError>;

    /// Subscribe to invoice and channel events
    fn subscribe(&self) -> broadcast::Receiver<InvoiceEvent>;
}

/// Adapter adding timeout, retry and cancellation on top of the raw client
pub struct LightningAdapter {
    client: Arc<dyn LightningClient>,
    max_retries: u32,
    retry_delay: Duration,
}

impl LightningAdapter {
    pub fn new(client: Arc<dyn LightningClient>, max_retries: u32) -> Self {
        Self {
            client,
            max_retries,
            retry_delay: Duration::from_millis(500),
        }
    }

    /// Pay an invoice, retrying transient path failures up to the configured
    /// budget. `cancel` is advisory: a payment that completes despite a
    /// cancellation signal is still reported as paid.
    pub async fn pay_invoice(
        &self,
        bolt11: &str,
        timeout: Duration,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<PaymentResult, LightningError> {
        let attempts = async {
            let mut attempt = 0u32;
            loop {
                match self.client.pay_invoice(bolt11).await {
                    Ok(result) => return Ok(result),
                    Err(LightningError::PathFailure(reason)) => {
                        attempt += 1;
                        if attempt >= self.max_retries {
                            warn!(attempts = attempt, %reason, "payment retries exhausted");
                            return Err(LightningError::PaymentFailed(
                                PaymentFailureReason::NoRoute,
                            ));
                        }
                        debug!(attempt, %reason, "retrying payment after path failure");
                        tokio::time::sleep(self.retry_delay).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        tokio::select! {
            result = tokio::time::timeout(timeout, attempts) => match result {
                Ok(inner) => inner,
                Err(_) => Err(LightningError::PaymentFailed(PaymentFailureReason::Timeout)),
            },
            _ = cancel.changed() => Err(LightningError::Cancelled),
        }
    }

    pub async fn add_hold_invoice(
        &self,
        preimage_hash: [u8; 32],
        amount_msat: u64,
        expiry_secs: u64,
        memo: &str,
    ) -> Result<String, LightningError> {
        self.client
            .add_hold_invoice(preimage_hash, amount_msat, expiry_secs, memo)
            .await
    }

    pub async fn settle_invoice(&self, preimage: [u8; 32]) -> Result<(), LightningError> {
        self.client.settle_invoice(preimage).await
    }

    pub async fn cancel_invoice(&self, preimage_hash: [u8; 32]) -> Result<(), LightningError> {
        self.client.cancel_invoice(preimage_hash).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InvoiceEvent> {
        self.client.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyClient {
        failures_before_success: u32,
        attempts: AtomicU32,
        events: broadcast::Sender<InvoiceEvent>,
    }

    impl FlakyClient {
        fn new(failures_before_success: u32) -> Self {
            let (events, _) = broadcast::channel(8);
            Self {
                failures_before_success,
                attempts: AtomicU32::new(0),
                events,
            }
        }
    }

    #[async_trait]
    impl LightningClient for FlakyClient {
        async fn pay_invoice(&self, _bolt11: &str) -> Result<PaymentResult, LightningError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures_before_success {
                Err(LightningError::PathFailure("temporary channel failure".into()))
            } else {
                Ok(PaymentResult {
                    preimage: [9u8; 32],
                    routing_fee_msat: 1_000,
                })
            }
        }

        async fn add_hold_invoice(
            &self,
            _preimage_hash: [u8; 32],
            _amount_msat: u64,
            _expiry_secs: u64,
            _memo: &str,
        ) -> Result<String, LightningError> {
            Ok("lnbcrt1".to_string())
        }

        async fn settle_invoice(&self, _preimage: [u8; 32]) -> Result<(), LightningError> {
            Ok(())
        }

        async fn cancel_invoice(&self, _preimage_hash: [u8; 32]) -> Result<(), LightningError> {
            Ok(())
        }

        fn subscribe(&self) -> broadcast::Receiver<InvoiceEvent> {
            self.events.subscribe()
        }
    }

    fn no_cancel() -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        std::mem::forget(tx);
        rx
    }

    #[tokio::test]
    async fn test_retries_path_failures() {
        let adapter = LightningAdapter::new(Arc::new(FlakyClient::new(2)), 3);

        let result = adapter
            .pay_invoice("lnbcrt1", Duration::from_secs(10), no_cancel())
            .await
            .unwrap();
        assert_eq!(result.preimage, [9u8; 32]);
    }

    #[tokio::test]
    async fn test_exhausted_retries_become_no_route() {
        let adapter = LightningAdapter::new(Arc::new(FlakyClient::new(10)), 3);

        let err = adapter
            .pay_invoice("lnbcrt1", Duration::from_secs(10), no_cancel())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LightningError::PaymentFailed(PaymentFailureReason::NoRoute)
        ));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_payment() {
        let adapter = LightningAdapter::new(Arc::new(FlakyClient::new(100)), 1_000);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            adapter
                .pay_invoice("lnbcrt1", Duration::from_secs(30), rx)
                .await
        });
        tx.send(true).unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, LightningError::Cancelled));
    }
}
