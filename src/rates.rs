//! Fee & Rate Oracle Interface
//!
//! The nursery consumes rates, service fees and the zero-conf risk cap from a
//! provider it does not implement. Fee-rate estimation is likewise a black
//! box, typically backed by the chain client's smart-fee call.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::chain::client::ChainClient;
use crate::types::{OrderSide, Pair};

/// Rate oracle errors
#[derive(Debug, Error)]
pub enum RateError {
    #[error("pair not supported: {0}")]
    PairNotSupported(String),

    #[error("rate unavailable: {0}")]
    Unavailable(String),

    #[error("amount below fees: {0} sat")]
    AmountBelowFees(i64),
}

/// Quote/base conversion and fee schedule per pair
pub trait RateProvider: Send + Sync {
    /// Chain units per Lightning unit for the given pair and side
    fn rate(&self, pair: &Pair, side: OrderSide) -> Result<f64, RateError>;

    /// Flat fee in satoshis of the chain currency
    fn base_fee(&self, currency: &str) -> u64;

    /// Service fee as a fraction of the converted amount
    fn percentage_fee(&self, pair: &Pair) -> f64;

    /// Maximum amount accepted zero-conf, in satoshis of the chain currency
    fn zero_conf_cap(&self, currency: &str) -> u64;
}

/// On-chain fee-rate estimator, consumed as a black box
#[async_trait]
pub trait FeeEstimator: Send + Sync {
    /// Current recommended fee rate in sat/vB
    async fn sat_per_vbyte(&self, currency: &str) -> Result<f64, RateError>;
}

/// Fee estimator backed by the chain client's smart-fee call
pub struct ChainFeeEstimator {
    clients: HashMap<String, Arc<dyn ChainClient>>,
    /// Confirmation target passed to the estimator
    target: u16,
}

impl ChainFeeEstimator {
    pub fn new(target: u16) -> Self {
        Self {
            clients: HashMap::new(),
            target,
        }
    }

    pub fn add_currency(mut self, currency: impl Into<String>, client: Arc<dyn ChainClient>) -> Self {
        self.clients.insert(currency.into(), client);
        self
    }
}

#[async_trait]
impl FeeEstimator for ChainFeeEstimator {
    async fn sat_per_vbyte(&self, currency: &str) -> Result<f64, RateError> {
        let client = self
            .clients
            .get(currency)
            .ok_or_else(|| RateError::Unavailable(format!("no chain client for {}", currency)))?;
        client
            .estimate_fee(self.target)
            .await
            .map_err(|e| RateError::Unavailable(e.to_string()))
    }
}

/// Service fee in satoshis for a converted amount
pub fn percentage_fee_sats(converted_amount: u64, fraction: f64) -> u64 {
    (converted_amount as f64 * fraction).round() as u64
}

/// What the user must lock on-chain for a submarine swap:
/// `ceil(invoiceAmount * rate) + baseFee + percentageFee`
pub fn submarine_expected_amount(
    invoice_amount: u64,
    rate: f64,
    base_fee: u64,
    percentage_fee: u64,
) -> u64 {
    let converted = (invoice_amount as f64 * rate).ceil() as u64;
    converted + base_fee + percentage_fee
}

/// What the service locks on-chain for a reverse swap:
/// `floor(invoiceAmount * rate) - (baseFee + percentageFee)`, at least 1 sat
pub fn reverse_onchain_amount(
    invoice_amount: u64,
    rate: f64,
    base_fee: u64,
    percentage_fee: u64,
) -> Result<u64, RateError> {
    let converted = (invoice_amount as f64 * rate).floor() as i64;
    let amount = converted - (base_fee + percentage_fee) as i64;
    if amount < 1 {
        return Err(RateError::AmountBelowFees(amount));
    }
    Ok(amount as u64)
}
