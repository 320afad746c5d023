//! Swap Nursery
//!
//! Orchestrates the full lifecycle of every live swap. Chain events,
//! Lightning events and block heights arrive on one loop; each piece of work
//! is a short-lived task serialized per swap by a named lock, so a
//! transaction event and a block event for the same swap can never
//! interleave. Every transition is persisted before it is emitted on the
//! event bus.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bitcoin::consensus::encode::{deserialize, serialize_hex};
use bitcoin::script::Instruction;
use bitcoin::secp256k1::PublicKey;
use bitcoin::{Address, OutPoint, ScriptBuf, Transaction, TxIn, Txid};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::chain::builder::{construct_claim, construct_refund, BuilderError, LockupOutput};
use crate::chain::client::{ChainClient, ChainError};
use crate::chain::observer::{ChainEvent, ChainObserver};
use crate::config::Config;
use crate::lightning::invoice::{
    amount_msat_from_bolt11, payment_hash_from_bolt11, time_until_expiry,
};
use crate::lightning::{InvoiceEvent, LightningAdapter, LightningError};
use crate::rates::{
    percentage_fee_sats, reverse_onchain_amount, submarine_expected_amount, FeeEstimator,
    RateError, RateProvider,
};
use crate::script::{
    lockup_address, lockup_script_pubkey, reverse_script, submarine_script, OutputType,
    ScriptError,
};
use crate::storage::{StorageError, SwapRepository};
use crate::types::{
    generate_swap_id, unix_now, OrderSide, Pair, ReverseSwap, Swap, SwapStatus, TransactionInfo,
};
use crate::wallet::{Wallet, WalletError};

use super::cache::SwapCache;
use super::events::{EventBus, SwapUpdate};
use super::locks::LockMap;

/// Sequence values below this signal replaceability
const RBF_SEQUENCE_THRESHOLD: u32 = 0xFFFF_FFFE;

/// Broadcast retry budget for transient RPC failures
const BROADCAST_ATTEMPTS: u32 = 3;

/// Nursery errors
#[derive(Debug, Error)]
pub enum NurseryError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Lightning(#[from] LightningError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Builder(#[from] BuilderError),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Rate(#[from] RateError),
}

/// Nursery tuning knobs, derived from the engine configuration
#[derive(Debug, Clone)]
pub struct NurseryConfig {
    pub network: bitcoin::Network,
    /// Blocks added to the tip for a new swap's timeout height
    pub timeout_delta: u32,
    /// A new swap's timeout must exceed tip by more than this
    pub min_timeout_delta: u32,
    /// Ceiling on a single Lightning payment attempt
    pub payment_timeout: Duration,
    /// Expiry of created hold-invoices
    pub invoice_expiry_secs: u64,
}

impl NurseryConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            network: config.network.bitcoin_network(),
            timeout_delta: config.timeout_delta,
            min_timeout_delta: config.min_timeout_delta,
            payment_timeout: Duration::from_secs(config.payment_timeout_secs),
            invoice_expiry_secs: 3_600,
        }
    }
}

/// Request to create a submarine swap
#[derive(Debug, Clone)]
pub struct CreateSwap {
    pub pair: Pair,
    pub order_side: OrderSide,
    /// Invoice the service pays once the lockup confirms
    pub invoice: String,
    /// User's key for the CLTV refund branch (hex, compressed)
    pub refund_public_key: String,
    pub accept_zero_conf: bool,
    pub output_type: OutputType,
}

/// Request to create a reverse swap
#[derive(Debug, Clone)]
pub struct CreateReverseSwap {
    pub pair: Pair,
    pub order_side: OrderSide,
    /// Amount of the hold-invoice in satoshis
    pub invoice_amount: u64,
    /// SHA256 hash of the user-held preimage (hex, 32 bytes)
    pub preimage_hash: String,
    /// User's key for the preimage claim branch (hex, compressed)
    pub claim_public_key: String,
    pub output_type: OutputType,
}

/// The swap lifecycle orchestrator
pub struct SwapNursery {
    config: NurseryConfig,
    repository: Arc<dyn SwapRepository>,
    chain: Arc<dyn ChainClient>,
    observer: Arc<ChainObserver>,
    lightning: Arc<LightningAdapter>,
    wallet: Arc<dyn Wallet>,
    rates: Arc<dyn RateProvider>,
    fee_estimator: Arc<dyn FeeEstimator>,
    bus: EventBus,
    locks: LockMap,
    cache: SwapCache,
    /// Advisory cancellation tokens for in-flight payments
    cancellations: Mutex<HashMap<String, watch::Sender<bool>>>,
    shutdown: watch::Sender<bool>,
}

impl SwapNursery {
    /// Wire the nursery to its collaborators. Nothing is loaded yet; call
    /// [`SwapNursery::recover`] before [`SwapNursery::run`].
    #[allow(clippy::too_many_arguments)]
    pub fn init(
        config: NurseryConfig,
        repository: Arc<dyn SwapRepository>,
        chain: Arc<dyn ChainClient>,
        observer: Arc<ChainObserver>,
        lightning: Arc<LightningAdapter>,
        wallet: Arc<dyn Wallet>,
        rates: Arc<dyn RateProvider>,
        fee_estimator: Arc<dyn FeeEstimator>,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            config,
            repository,
            chain,
            observer,
            lightning,
            wallet,
            rates,
            fee_estimator,
            bus: EventBus::default(),
            locks: LockMap::new(),
            cache: SwapCache::new(),
            cancellations: Mutex::new(HashMap::new()),
            shutdown,
        })
    }

    /// Subscribe to swap updates, successes and failures
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<super::events::SwapEvent> {
        self.bus.subscribe()
    }

    /// Stop the event loop
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Create a submarine swap and start watching for its funding
    pub async fn create_swap(&self, request: CreateSwap) -> Result<Swap, NurseryError> {
        let payment_hash = payment_hash_from_bolt11(&request.invoice)?;
        let invoice_amount_msat = amount_msat_from_bolt11(&request.invoice)?
            .ok_or_else(|| NurseryError::Validation("invoice must carry an amount".into()))?;
        let invoice_amount = invoice_amount_msat / 1_000;

        if time_until_expiry(&request.invoice)?.is_none() {
            return Err(NurseryError::Validation("invoice is already expired".into()));
        }

        let refund_public_key = PublicKey::from_str(&request.refund_public_key)
            .map_err(|e| NurseryError::Validation(format!("invalid refund public key: {}", e)))?;

        let chain_currency = request.pair.chain_currency(request.order_side).to_string();
        let rate = self.rates.rate(&request.pair, request.order_side)?;
        let base_fee = self.rates.base_fee(&chain_currency);
        let converted = (invoice_amount as f64 * rate).ceil() as u64;
        let percentage_fee =
            percentage_fee_sats(converted, self.rates.percentage_fee(&request.pair));
        let expected_amount =
            submarine_expected_amount(invoice_amount, rate, base_fee, percentage_fee);

        let tip = self.chain.get_blockchain_info().await?.blocks as u32;
        let timeout_block_height = tip + self.config.timeout_delta;
        debug_assert!(timeout_block_height > tip + self.config.min_timeout_delta);

        let key_index = self.wallet.next_key_index();
        let service_keys = self.wallet.derive_keypair(key_index)?;

        let redeem_script = submarine_script(
            &payment_hash,
            &service_keys.public_key,
            &refund_public_key,
            timeout_block_height,
        );
        let address = lockup_address(&redeem_script, request.output_type, self.config.network)?;
        let script_pubkey = lockup_script_pubkey(&redeem_script, request.output_type);

        let now = unix_now();
        let swap = Swap {
            id: generate_swap_id(),
            pair: request.pair,
            order_side: request.order_side,
            invoice: request.invoice,
            preimage_hash: hex::encode(payment_hash),
            redeem_script: redeem_script.to_hex_string(),
            lockup_address: address.to_string(),
            output_type: request.output_type,
            key_index,
            expected_amount,
            accept_zero_conf: request.accept_zero_conf,
            timeout_block_height,
            status: SwapStatus::SwapCreated,
            lockup_transaction: None,
            onchain_amount: None,
            miner_fee: None,
            percentage_fee,
            creation_height: tip,
            created_at: now,
            updated_at: now,
        };

        self.repository.insert_swap(&swap).await?;
        self.observer.register_output(&script_pubkey);
        self.cache
            .insert_swap(swap.clone(), script_pubkey.to_hex_string());

        info!(
            id = %swap.id,
            lockup_address = %swap.lockup_address,
            expected_amount,
            timeout_block_height,
            "created submarine swap"
        );
        self.bus
            .publish_update(&swap.id, SwapUpdate::status_only(SwapStatus::SwapCreated));

        Ok(swap)
    }

    /// Create a reverse swap: hold-invoice first, then broadcast the lockup
    pub async fn create_reverse_swap(
        &self,
        request: CreateReverseSwap,
    ) -> Result<ReverseSwap, NurseryError> {
        let preimage_hash: [u8; 32] = hex::decode(&request.preimage_hash)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| {
                NurseryError::Validation("preimage hash must be 32 hex-encoded bytes".into())
            })?;

        let claim_public_key = PublicKey::from_str(&request.claim_public_key)
            .map_err(|e| NurseryError::Validation(format!("invalid claim public key: {}", e)))?;

        let chain_currency = request.pair.chain_currency(request.order_side).to_string();
        let rate = self.rates.rate(&request.pair, request.order_side)?;
        let base_fee = self.rates.base_fee(&chain_currency);
        let converted = (request.invoice_amount as f64 * rate).floor() as u64;
        let percentage_fee =
            percentage_fee_sats(converted, self.rates.percentage_fee(&request.pair));
        let onchain_amount =
            reverse_onchain_amount(request.invoice_amount, rate, base_fee, percentage_fee)?;

        let tip = self.chain.get_blockchain_info().await?.blocks as u32;
        let timeout_block_height = tip + self.config.timeout_delta;

        let key_index = self.wallet.next_key_index();
        let service_keys = self.wallet.derive_keypair(key_index)?;

        let redeem_script = reverse_script(
            &preimage_hash,
            &claim_public_key,
            &service_keys.public_key,
            timeout_block_height,
        );
        let address = lockup_address(&redeem_script, request.output_type, self.config.network)?;
        let script_pubkey = lockup_script_pubkey(&redeem_script, request.output_type);

        let id = generate_swap_id();
        let invoice = self
            .lightning
            .add_hold_invoice(
                preimage_hash,
                request.invoice_amount * 1_000,
                self.config.invoice_expiry_secs,
                &format!("Reverse swap {}", id),
            )
            .await?;

        let now = unix_now();
        let mut swap = ReverseSwap {
            id,
            pair: request.pair,
            order_side: request.order_side,
            invoice,
            preimage_hash: request.preimage_hash,
            preimage: None,
            claim_public_key: request.claim_public_key,
            redeem_script: redeem_script.to_hex_string(),
            lockup_address: address.to_string(),
            output_type: request.output_type,
            key_index,
            invoice_amount: request.invoice_amount,
            onchain_amount,
            timeout_block_height,
            status: SwapStatus::SwapCreated,
            lockup_transaction: None,
            miner_fee: None,
            percentage_fee,
            creation_height: tip,
            created_at: now,
            updated_at: now,
        };

        self.repository.insert_reverse_swap(&swap).await?;
        self.observer.register_output(&script_pubkey);
        self.cache
            .insert_reverse_swap(swap.clone(), script_pubkey.to_hex_string());

        info!(
            id = %swap.id,
            lockup_address = %swap.lockup_address,
            onchain_amount,
            timeout_block_height,
            "created reverse swap"
        );
        self.bus
            .publish_update(&swap.id, SwapUpdate::status_only(SwapStatus::SwapCreated));

        // Broadcast the lockup right away; a rejected broadcast fails the swap.
        let fee_rate = self.fee_estimator.sat_per_vbyte(&chain_currency).await?;
        match self
            .wallet
            .send_to_address(&swap.lockup_address, onchain_amount, fee_rate, false)
            .await
        {
            Ok((tx, vout)) => {
                let txid = tx.compute_txid();
                self.observer.register_input(OutPoint { txid, vout });
                self.cache
                    .register_lockup_outpoint(&swap.id, OutPoint { txid, vout });

                swap.lockup_transaction = Some(TransactionInfo {
                    id: txid.to_string(),
                    vout,
                    hex: Some(serialize_hex(&tx)),
                });
                swap.set_status(SwapStatus::TransactionMempool);
                self.repository.update_reverse_swap(&swap).await?;
                self.cache.store_reverse_swap(swap.clone());

                info!(id = %swap.id, %txid, "reverse swap lockup broadcast");
                self.bus.publish_update(
                    &swap.id,
                    SwapUpdate {
                        status: SwapStatus::TransactionMempool,
                        transaction: swap.lockup_transaction.clone(),
                        preimage: None,
                    },
                );
            }
            Err(e) => {
                error!(id = %swap.id, error = %e, "reverse swap lockup broadcast failed");
                swap.set_status(SwapStatus::TransactionFailed);
                self.repository.update_reverse_swap(&swap).await?;
                self.bus.publish_update(
                    &swap.id,
                    SwapUpdate::status_only(SwapStatus::TransactionFailed),
                );
                self.bus
                    .publish_failure(&swap.id, true, "lockup broadcast failed");
                self.finalize_reverse_swap(&swap.id);
                let _ = self.lightning.cancel_invoice(preimage_hash).await;
            }
        }

        Ok(swap)
    }

    // ------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------

    /// Reload every non-terminal swap from the repository, re-register its
    /// filters and replay chain history from the oldest creation height.
    pub async fn recover(&self) -> Result<(), NurseryError> {
        let swaps = self.repository.get_pending_swaps().await?;
        let reverse_swaps = self.repository.get_pending_reverse_swaps().await?;

        let mut rescan_from: Option<u32> = None;
        let mut track = |height: u32| {
            rescan_from = Some(rescan_from.map_or(height, |h| h.min(height)));
        };

        for swap in &swaps {
            let script_pubkey = self.swap_script_pubkey(&swap.redeem_script, swap.output_type)?;
            self.observer.register_output(&script_pubkey);
            self.cache
                .insert_swap(swap.clone(), script_pubkey.to_hex_string());
            track(swap.creation_height);
        }

        for swap in &reverse_swaps {
            let script_pubkey = self.swap_script_pubkey(&swap.redeem_script, swap.output_type)?;
            self.observer.register_output(&script_pubkey);
            self.cache
                .insert_reverse_swap(swap.clone(), script_pubkey.to_hex_string());

            if let Some(info) = &swap.lockup_transaction {
                if let Ok(txid) = Txid::from_str(&info.id) {
                    let outpoint = OutPoint {
                        txid,
                        vout: info.vout,
                    };
                    self.observer.register_input(outpoint);
                    self.cache.register_lockup_outpoint(&swap.id, outpoint);
                }
            }
            track(swap.creation_height);
        }

        info!(
            swaps = swaps.len(),
            reverse_swaps = reverse_swaps.len(),
            "recovered pending swaps"
        );

        if let Some(height) = rescan_from {
            self.observer.rescan(self.chain.as_ref(), height as u64).await?;
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Event loop
    // ------------------------------------------------------------------

    /// Drive the nursery until shutdown. Chain events arrive on `chain_events`
    /// in observer order; Lightning events come from the adapter subscription.
    pub async fn run(self: Arc<Self>, mut chain_events: mpsc::UnboundedReceiver<ChainEvent>) {
        let mut invoice_events = Some(self.lightning.subscribe());
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("nursery shutting down");
                    break;
                }
                event = chain_events.recv() => match event {
                    Some(ChainEvent::Transaction { tx, confirmed }) => {
                        self.dispatch_transaction(tx, confirmed);
                    }
                    Some(ChainEvent::Block { height }) => {
                        self.dispatch_block(height);
                    }
                    None => {
                        warn!("chain event channel closed");
                        break;
                    }
                },
                event = recv_invoice_event(&mut invoice_events) => {
                    let nursery = self.clone();
                    tokio::spawn(async move {
                        nursery.handle_invoice_event(event).await;
                    });
                }
            }
        }
    }

    fn dispatch_transaction(self: &Arc<Self>, tx: Transaction, confirmed: bool) {
        // Output matches: lockup funding (submarine) or own-lockup updates
        // (reverse). Input matches: the user's claim spend of a reverse
        // lockup. One transaction can match several swaps.
        let mut matched: Vec<(String, bool)> = Vec::new();
        for output in &tx.output {
            if let Some(entry) = self.cache.match_output(&output.script_pubkey.to_hex_string()) {
                if !matched.contains(&entry) {
                    matched.push(entry);
                }
            }
        }

        for (id, is_reverse) in matched {
            let nursery = self.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = if is_reverse {
                    nursery.handle_reverse_lockup(&id, &tx, confirmed).await
                } else {
                    nursery.handle_swap_funding(&id, &tx, confirmed).await
                };
                if let Err(e) = result {
                    error!(id = %id, error = %e, "transaction handler failed");
                }
            });
        }

        for input in &tx.input {
            if let Some(id) = self.cache.match_input(&input.previous_output) {
                let nursery = self.clone();
                let input = input.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = nursery.handle_reverse_claim(&id, &tx, &input).await {
                        error!(id = %id, error = %e, "claim handler failed");
                    }
                });
            }
        }
    }

    fn dispatch_block(self: &Arc<Self>, height: u64) {
        let expired_swaps: Vec<String> = self
            .cache
            .all_swaps()
            .into_iter()
            .filter(|s| u64::from(s.timeout_block_height) <= height)
            .map(|s| s.id)
            .collect();
        let expired_reverse: Vec<String> = self
            .cache
            .all_reverse_swaps()
            .into_iter()
            .filter(|s| u64::from(s.timeout_block_height) <= height)
            .map(|s| s.id)
            .collect();

        // Cancel in-flight payments before taking the locks their payment
        // tasks are holding.
        {
            let cancellations = self.cancellations.lock().unwrap();
            for id in &expired_swaps {
                if let Some(token) = cancellations.get(id) {
                    let _ = token.send(true);
                }
            }
        }

        for id in expired_swaps {
            let nursery = self.clone();
            tokio::spawn(async move {
                if let Err(e) = nursery.expire_swap(&id).await {
                    error!(id = %id, error = %e, "swap expiry failed");
                }
            });
        }
        for id in expired_reverse {
            let nursery = self.clone();
            tokio::spawn(async move {
                if let Err(e) = nursery.expire_reverse_swap(&id).await {
                    error!(id = %id, error = %e, "reverse swap expiry failed");
                }
            });
        }
    }

    // ------------------------------------------------------------------
    // Submarine flow
    // ------------------------------------------------------------------

    async fn handle_swap_funding(
        &self,
        id: &str,
        tx: &Transaction,
        confirmed: bool,
    ) -> Result<(), NurseryError> {
        let _guard = self.locks.acquire(&LockMap::swap_key(id)).await;

        let Some(mut swap) = self.cache.get_swap(id) else {
            return Ok(());
        };
        if swap.status.is_terminal(false) {
            return Ok(());
        }

        let script_pubkey = self.swap_script_pubkey(&swap.redeem_script, swap.output_type)?;
        let Some((vout, value)) = find_output(tx, &script_pubkey) else {
            return Ok(());
        };
        let txid = tx.compute_txid();

        if swap.lockup_transaction.is_none() {
            swap.set_lockup_transaction(
                TransactionInfo {
                    id: txid.to_string(),
                    vout,
                    hex: Some(serialize_hex(tx)),
                },
                value,
            );
        }

        if swap.status == SwapStatus::SwapCreated {
            swap.set_status(SwapStatus::TransactionMempool);
            if self.repository.update_swap(&swap).await? {
                info!(id = %swap.id, %txid, value, "lockup transaction in mempool");
                self.bus.publish_update(
                    &swap.id,
                    SwapUpdate {
                        status: SwapStatus::TransactionMempool,
                        transaction: swap.lockup_transaction.clone(),
                        preimage: None,
                    },
                );
            }
            self.cache.store_swap(swap.clone());
        }

        let zero_conf = !confirmed
            && swap.status == SwapStatus::TransactionMempool
            && self.accepts_zero_conf(&swap, tx, value).await;

        if !(confirmed || zero_conf) {
            return Ok(());
        }

        if swap.status == SwapStatus::TransactionMempool {
            swap.set_status(SwapStatus::TransactionConfirmed);
            if self.repository.update_swap(&swap).await? {
                info!(id = %swap.id, zero_conf, "lockup transaction confirmed");
                self.bus.publish_update(
                    &swap.id,
                    SwapUpdate::status_only(SwapStatus::TransactionConfirmed),
                );
            }
            self.cache.store_swap(swap.clone());
        }

        if swap.status != SwapStatus::TransactionConfirmed {
            return Ok(());
        }

        if value < swap.expected_amount {
            warn!(
                id = %swap.id,
                value,
                expected = swap.expected_amount,
                "lockup underfunded, not paying invoice"
            );
            return Ok(());
        }

        self.pay_and_claim(swap).await
    }

    /// Zero-conf acceptance policy: value within the per-pair risk cap, no
    /// RBF signalling, and the funding pays at least the estimator fee rate.
    async fn accepts_zero_conf(&self, swap: &Swap, tx: &Transaction, value: u64) -> bool {
        if !swap.accept_zero_conf {
            return false;
        }
        if value < swap.expected_amount {
            return false;
        }

        let chain_currency = swap.pair.chain_currency(swap.order_side);
        if value > self.rates.zero_conf_cap(chain_currency) {
            debug!(id = %swap.id, value, "zero-conf rejected: above risk cap");
            return false;
        }

        if tx
            .input
            .iter()
            .any(|input| input.sequence.0 < RBF_SEQUENCE_THRESHOLD)
        {
            debug!(id = %swap.id, "zero-conf rejected: transaction signals RBF");
            return false;
        }

        let min_rate = match self.fee_estimator.sat_per_vbyte(chain_currency).await {
            Ok(rate) => rate,
            Err(e) => {
                warn!(id = %swap.id, error = %e, "zero-conf rejected: no fee estimate");
                return false;
            }
        };
        match self.transaction_fee_rate(tx).await {
            Ok(rate) if rate >= min_rate => true,
            Ok(rate) => {
                debug!(id = %swap.id, rate, min_rate, "zero-conf rejected: fee rate too low");
                false
            }
            Err(e) => {
                warn!(id = %swap.id, error = %e, "zero-conf rejected: cannot compute fee rate");
                false
            }
        }
    }

    async fn transaction_fee_rate(&self, tx: &Transaction) -> Result<f64, NurseryError> {
        let mut input_total = 0u64;
        for input in &tx.input {
            let hex = self
                .chain
                .get_raw_transaction(&input.previous_output.txid.to_string())
                .await?;
            let raw = hex::decode(&hex)
                .map_err(|e| NurseryError::Validation(format!("invalid tx hex: {}", e)))?;
            let prev: Transaction = deserialize(&raw)
                .map_err(|e| NurseryError::Validation(format!("invalid tx: {}", e)))?;
            let output = prev
                .output
                .get(input.previous_output.vout as usize)
                .ok_or_else(|| NurseryError::Validation("prevout index out of range".into()))?;
            input_total += output.value.to_sat();
        }

        let output_total: u64 = tx.output.iter().map(|o| o.value.to_sat()).sum();
        let fee = input_total.saturating_sub(output_total);
        Ok(fee as f64 / tx.vsize() as f64)
    }

    /// Pay the invoice and, on success, claim the lockup. Runs with the swap
    /// lock held; expiry cancels the payment through the advisory token.
    async fn pay_and_claim(&self, mut swap: Swap) -> Result<(), NurseryError> {
        swap.set_status(SwapStatus::InvoicePending);
        if self.repository.update_swap(&swap).await? {
            self.bus.publish_update(
                &swap.id,
                SwapUpdate::status_only(SwapStatus::InvoicePending),
            );
        }
        self.cache.store_swap(swap.clone());

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.cancellations
            .lock()
            .unwrap()
            .insert(swap.id.clone(), cancel_tx);

        let timeout = match time_until_expiry(&swap.invoice) {
            Ok(Some(remaining)) => remaining.min(self.config.payment_timeout),
            _ => self.config.payment_timeout,
        };

        info!(id = %swap.id, ?timeout, "paying invoice");
        let payment = self
            .lightning
            .pay_invoice(&swap.invoice, timeout, cancel_rx)
            .await;
        self.cancellations.lock().unwrap().remove(&swap.id);

        match payment {
            Ok(result) => {
                let got_hash = crate::script::sha256_preimage(&result.preimage);
                if hex::encode(got_hash) != swap.preimage_hash {
                    error!(id = %swap.id, "payment preimage does not match the invoice hash");
                    return Err(NurseryError::Validation("preimage hash mismatch".into()));
                }

                swap.set_status(SwapStatus::InvoicePaid);
                if self.repository.update_swap(&swap).await? {
                    info!(id = %swap.id, fee_msat = result.routing_fee_msat, "invoice paid");
                    self.bus.publish_update(
                        &swap.id,
                        SwapUpdate {
                            status: SwapStatus::InvoicePaid,
                            transaction: None,
                            preimage: Some(hex::encode(result.preimage)),
                        },
                    );
                }
                self.cache.store_swap(swap.clone());

                self.claim_swap(swap, result.preimage).await
            }
            Err(LightningError::Cancelled) => {
                debug!(id = %swap.id, "payment cancelled, expiry takes over");
                Ok(())
            }
            Err(LightningError::PaymentFailed(reason)) => {
                warn!(id = %swap.id, %reason, "invoice payment failed");
                swap.set_status(SwapStatus::InvoiceFailedToPay);
                if self.repository.update_swap(&swap).await? {
                    self.bus.publish_update(
                        &swap.id,
                        SwapUpdate::status_only(SwapStatus::InvoiceFailedToPay),
                    );
                    self.bus
                        .publish_failure(&swap.id, false, &reason.to_string());
                }
                self.finalize_swap(&swap.id);
                Ok(())
            }
            Err(e) => {
                // Transient adapter trouble: leave the swap in InvoicePending,
                // the timeout scheduler is the backstop.
                error!(id = %swap.id, error = %e, "payment attempt errored, swap stuck");
                Ok(())
            }
        }
    }

    async fn claim_swap(&self, mut swap: Swap, preimage: [u8; 32]) -> Result<(), NurseryError> {
        let lockup = self.lockup_output_of_swap(&swap)?;
        let keys = self.wallet.derive_keypair(swap.key_index)?;
        let destination = self.new_destination_script().await?;
        let chain_currency = swap.pair.chain_currency(swap.order_side).to_string();
        let fee_rate = self.fee_estimator.sat_per_vbyte(&chain_currency).await?;

        let spend = construct_claim(&lockup, &keys, &preimage, &destination, fee_rate)?;
        let claim_txid = self.broadcast_with_retry(&spend.tx, &swap.id).await?;

        swap.miner_fee = Some(spend.fee);
        swap.set_status(SwapStatus::TransactionClaimed);
        if self.repository.update_swap(&swap).await? {
            info!(id = %swap.id, %claim_txid, fee = spend.fee, "lockup claimed");
            self.bus.publish_update(
                &swap.id,
                SwapUpdate {
                    status: SwapStatus::TransactionClaimed,
                    transaction: Some(TransactionInfo {
                        id: claim_txid,
                        vout: 0,
                        hex: Some(serialize_hex(&spend.tx)),
                    }),
                    preimage: None,
                },
            );
            self.bus.publish_success(&swap.id, false);
        }
        self.finalize_swap(&swap.id);
        Ok(())
    }

    async fn expire_swap(&self, id: &str) -> Result<(), NurseryError> {
        let _guard = self.locks.acquire(&LockMap::swap_key(id)).await;

        let Some(mut swap) = self.cache.get_swap(id) else {
            return Ok(());
        };
        if swap.status.is_terminal(false) {
            return Ok(());
        }

        warn!(id = %swap.id, height = swap.timeout_block_height, "submarine swap expired");
        swap.set_status(SwapStatus::SwapExpired);
        if self.repository.update_swap(&swap).await? {
            self.bus
                .publish_update(&swap.id, SwapUpdate::status_only(SwapStatus::SwapExpired));
            self.bus.publish_failure(&swap.id, false, "swap expired");
        }
        // The user holds the refund branch; nothing to broadcast on our side.
        self.finalize_swap(id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reverse flow
    // ------------------------------------------------------------------

    async fn handle_reverse_lockup(
        &self,
        id: &str,
        tx: &Transaction,
        confirmed: bool,
    ) -> Result<(), NurseryError> {
        let _guard = self.locks.acquire(&LockMap::reverse_swap_key(id)).await;

        let Some(mut swap) = self.cache.get_reverse_swap(id) else {
            return Ok(());
        };
        if swap.status.is_terminal(true) || !confirmed {
            return Ok(());
        }

        // Only our own lockup can pay this script; ignore anything else.
        let txid = tx.compute_txid().to_string();
        if swap
            .lockup_transaction
            .as_ref()
            .is_some_and(|info| info.id != txid)
        {
            warn!(id = %swap.id, %txid, "unexpected transaction paying reverse lockup script");
            return Ok(());
        }

        if swap.status == SwapStatus::TransactionMempool {
            swap.set_status(SwapStatus::TransactionConfirmed);
            if self.repository.update_reverse_swap(&swap).await? {
                info!(id = %swap.id, %txid, "reverse lockup confirmed");
                self.bus.publish_update(
                    &swap.id,
                    SwapUpdate::status_only(SwapStatus::TransactionConfirmed),
                );
            }
            self.cache.store_reverse_swap(swap);
        }
        Ok(())
    }

    /// The user's claim spend reveals the preimage; settle the hold-invoice
    /// with it.
    async fn handle_reverse_claim(
        &self,
        id: &str,
        tx: &Transaction,
        input: &TxIn,
    ) -> Result<(), NurseryError> {
        let _guard = self.locks.acquire(&LockMap::reverse_swap_key(id)).await;

        let Some(mut swap) = self.cache.get_reverse_swap(id) else {
            return Ok(());
        };
        if swap.status.is_terminal(true) {
            return Ok(());
        }

        let Some(preimage) = extract_preimage(input) else {
            warn!(id = %swap.id, "spend of reverse lockup carries no preimage (refund?)");
            return Ok(());
        };

        let got_hash = crate::script::sha256_preimage(&preimage);
        if hex::encode(got_hash) != swap.preimage_hash {
            warn!(id = %swap.id, "spend revealed a preimage that does not match");
            return Ok(());
        }

        info!(
            id = %swap.id,
            claim_txid = %tx.compute_txid(),
            "preimage revealed on-chain, settling hold-invoice"
        );
        self.lightning.settle_invoice(preimage).await?;

        swap.set_preimage(hex::encode(preimage));
        swap.set_status(SwapStatus::InvoiceSettled);
        if self.repository.update_reverse_swap(&swap).await? {
            self.bus.publish_update(
                &swap.id,
                SwapUpdate {
                    status: SwapStatus::InvoiceSettled,
                    transaction: None,
                    preimage: swap.preimage.clone(),
                },
            );
            self.bus.publish_success(&swap.id, true);
        }
        self.finalize_reverse_swap(id);
        Ok(())
    }

    async fn expire_reverse_swap(&self, id: &str) -> Result<(), NurseryError> {
        let _guard = self.locks.acquire(&LockMap::reverse_swap_key(id)).await;

        let Some(mut swap) = self.cache.get_reverse_swap(id) else {
            return Ok(());
        };
        if swap.status.is_terminal(true) {
            return Ok(());
        }

        // A swap already in SwapExpired had its refund broadcast fail; retry
        // the refund without repeating the transition.
        if swap.status != SwapStatus::SwapExpired {
            warn!(id = %swap.id, height = swap.timeout_block_height, "reverse swap expired");
            swap.set_status(SwapStatus::SwapExpired);
            if self.repository.update_reverse_swap(&swap).await? {
                self.bus
                    .publish_update(&swap.id, SwapUpdate::status_only(SwapStatus::SwapExpired));
            }
            self.cache.store_reverse_swap(swap.clone());

            if let Ok(hash) = decode_hash(&swap.preimage_hash) {
                if let Err(e) = self.lightning.cancel_invoice(hash).await {
                    warn!(id = %swap.id, error = %e, "failed to cancel hold-invoice");
                }
            }
        }

        // Refund our own lockup through the CLTV branch.
        let lockup = self.lockup_output_of_reverse(&swap)?;
        let keys = self.wallet.derive_keypair(swap.key_index)?;
        let destination = self.new_destination_script().await?;
        let chain_currency = swap.pair.chain_currency(swap.order_side).to_string();
        let fee_rate = self.fee_estimator.sat_per_vbyte(&chain_currency).await?;

        let spend = construct_refund(
            &lockup,
            &keys,
            swap.timeout_block_height,
            &destination,
            fee_rate,
        )?;
        let refund_txid = self.broadcast_with_retry(&spend.tx, &swap.id).await?;

        swap.set_status(SwapStatus::TransactionRefunded);
        if self.repository.update_reverse_swap(&swap).await? {
            info!(id = %swap.id, %refund_txid, "reverse swap refunded");
            self.bus.publish_update(
                &swap.id,
                SwapUpdate {
                    status: SwapStatus::TransactionRefunded,
                    transaction: Some(TransactionInfo {
                        id: refund_txid,
                        vout: 0,
                        hex: Some(serialize_hex(&spend.tx)),
                    }),
                    preimage: None,
                },
            );
            self.bus.publish_failure(&swap.id, true, "swap expired");
        }
        self.finalize_reverse_swap(id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lightning events
    // ------------------------------------------------------------------

    async fn handle_invoice_event(&self, event: InvoiceEvent) {
        match event {
            InvoiceEvent::HtlcAccepted {
                preimage_hash,
                amount_msat,
                ..
            } => {
                if let Err(e) = self
                    .handle_hold_invoice_paid(preimage_hash, Some(amount_msat))
                    .await
                {
                    error!(hash = %hex::encode(preimage_hash), error = %e, "hold-invoice handler failed");
                }
            }
            InvoiceEvent::Paid { preimage_hash } => {
                if let Err(e) = self.handle_hold_invoice_paid(preimage_hash, None).await {
                    error!(hash = %hex::encode(preimage_hash), error = %e, "hold-invoice handler failed");
                }
            }
            InvoiceEvent::Settled { preimage_hash, .. } => {
                debug!(hash = %hex::encode(preimage_hash), "hold-invoice settled");
            }
            InvoiceEvent::FailedToPay {
                preimage_hash,
                reason,
            } => {
                if let Err(e) = self.handle_failed_payment(preimage_hash, reason).await {
                    error!(hash = %hex::encode(preimage_hash), error = %e, "failure handler errored");
                }
            }
            InvoiceEvent::ChannelBackup(bytes) => {
                debug!(size = bytes.len(), "received channel backup");
            }
        }
    }

    async fn handle_hold_invoice_paid(
        &self,
        preimage_hash: [u8; 32],
        amount_msat: Option<u64>,
    ) -> Result<(), NurseryError> {
        let hash_hex = hex::encode(preimage_hash);
        let Some(swap) = self.cache.get_reverse_swap_by_preimage_hash(&hash_hex) else {
            // Never settle an invoice without a live swap behind it.
            warn!(hash = %hash_hex, "HTLC accepted for unknown preimage hash");
            return Ok(());
        };

        let _guard = self.locks.acquire(&LockMap::reverse_swap_key(&swap.id)).await;
        let Some(mut swap) = self.cache.get_reverse_swap(&swap.id) else {
            return Ok(());
        };

        if swap.status != SwapStatus::TransactionConfirmed {
            debug!(
                id = %swap.id,
                status = %swap.status,
                "HTLC accepted before lockup confirmation, ignoring"
            );
            return Ok(());
        }

        if let Some(amount_msat) = amount_msat {
            if amount_msat < swap.invoice_amount * 1_000 {
                warn!(
                    id = %swap.id,
                    amount_msat,
                    expected_msat = swap.invoice_amount * 1_000,
                    "HTLC underpays the hold-invoice"
                );
                return Ok(());
            }
        }

        swap.set_status(SwapStatus::InvoicePaid);
        if self.repository.update_reverse_swap(&swap).await? {
            info!(id = %swap.id, "hold-invoice HTLC locked");
            self.bus
                .publish_update(&swap.id, SwapUpdate::status_only(SwapStatus::InvoicePaid));
        }
        self.cache.store_reverse_swap(swap);
        Ok(())
    }

    async fn handle_failed_payment(
        &self,
        preimage_hash: [u8; 32],
        reason: crate::lightning::PaymentFailureReason,
    ) -> Result<(), NurseryError> {
        let hash_hex = hex::encode(preimage_hash);
        let Some(swap) = self.cache.get_swap_by_preimage_hash(&hash_hex) else {
            return Ok(());
        };

        let _guard = self.locks.acquire(&LockMap::swap_key(&swap.id)).await;
        let Some(mut swap) = self.cache.get_swap(&swap.id) else {
            return Ok(());
        };
        if swap.status != SwapStatus::InvoicePending {
            return Ok(());
        }

        warn!(id = %swap.id, %reason, "node reported terminal payment failure");
        swap.set_status(SwapStatus::InvoiceFailedToPay);
        if self.repository.update_swap(&swap).await? {
            self.bus.publish_update(
                &swap.id,
                SwapUpdate::status_only(SwapStatus::InvoiceFailedToPay),
            );
            self.bus
                .publish_failure(&swap.id, false, &reason.to_string());
        }
        self.finalize_swap(&swap.id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------

    async fn broadcast_with_retry(
        &self,
        tx: &Transaction,
        id: &str,
    ) -> Result<String, NurseryError> {
        let hex = serialize_hex(tx);
        let mut delay = Duration::from_millis(500);

        for attempt in 1..=BROADCAST_ATTEMPTS {
            match self.chain.send_raw_transaction(&hex).await {
                Ok(txid) => return Ok(txid),
                Err(e) if e.is_transient() && attempt < BROADCAST_ATTEMPTS => {
                    warn!(id = %id, attempt, error = %e, "broadcast failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => {
                    error!(id = %id, error = %e, "broadcast failed");
                    return Err(e.into());
                }
            }
        }
        unreachable!("loop returns on final attempt")
    }

    fn swap_script_pubkey(
        &self,
        redeem_script_hex: &str,
        output_type: OutputType,
    ) -> Result<ScriptBuf, NurseryError> {
        let script = ScriptBuf::from_hex(redeem_script_hex)
            .map_err(|e| NurseryError::Validation(format!("stored redeem script invalid: {}", e)))?;
        Ok(lockup_script_pubkey(&script, output_type))
    }

    fn lockup_output_of_swap(&self, swap: &Swap) -> Result<LockupOutput, NurseryError> {
        let info = swap
            .lockup_transaction
            .as_ref()
            .ok_or_else(|| NurseryError::Validation("swap has no lockup transaction".into()))?;
        let value = swap
            .onchain_amount
            .ok_or_else(|| NurseryError::Validation("swap has no on-chain amount".into()))?;
        self.lockup_output(info, value, &swap.redeem_script, swap.output_type)
    }

    fn lockup_output_of_reverse(&self, swap: &ReverseSwap) -> Result<LockupOutput, NurseryError> {
        let info = swap
            .lockup_transaction
            .as_ref()
            .ok_or_else(|| NurseryError::Validation("swap has no lockup transaction".into()))?;
        self.lockup_output(info, swap.onchain_amount, &swap.redeem_script, swap.output_type)
    }

    fn lockup_output(
        &self,
        info: &TransactionInfo,
        value: u64,
        redeem_script_hex: &str,
        output_type: OutputType,
    ) -> Result<LockupOutput, NurseryError> {
        let txid = Txid::from_str(&info.id)
            .map_err(|e| NurseryError::Validation(format!("stored txid invalid: {}", e)))?;
        let redeem_script = ScriptBuf::from_hex(redeem_script_hex)
            .map_err(|e| NurseryError::Validation(format!("stored redeem script invalid: {}", e)))?;

        Ok(LockupOutput {
            outpoint: OutPoint {
                txid,
                vout: info.vout,
            },
            value,
            redeem_script,
            output_type,
        })
    }

    async fn new_destination_script(&self) -> Result<ScriptBuf, NurseryError> {
        let address = self.wallet.get_new_address(OutputType::Bech32).await?;
        let address = Address::from_str(&address)
            .map_err(|e| NurseryError::Validation(format!("wallet address invalid: {}", e)))?
            .require_network(self.config.network)
            .map_err(|e| NurseryError::Validation(format!("wallet address network: {}", e)))?;
        Ok(address.script_pubkey())
    }

    /// Drop a terminal submarine swap from memory and the filters
    fn finalize_swap(&self, id: &str) {
        let (script, _) = self.cache.remove(id);
        if let Some(script) = script {
            if let Ok(script) = ScriptBuf::from_hex(&script) {
                self.observer.unregister_output(&script);
            }
        }
        self.locks.remove(&LockMap::swap_key(id));
        self.cancellations.lock().unwrap().remove(id);
    }

    /// Drop a terminal reverse swap from memory and the filters
    fn finalize_reverse_swap(&self, id: &str) {
        let (script, outpoint) = self.cache.remove(id);
        if let Some(script) = script {
            if let Ok(script) = ScriptBuf::from_hex(&script) {
                self.observer.unregister_output(&script);
            }
        }
        if let Some(outpoint) = outpoint {
            self.observer.unregister_input(&outpoint);
        }
        self.locks.remove(&LockMap::reverse_swap_key(id));
    }
}

/// Receive the next invoice event. Once the stream closes this parks forever
/// so the select loop keeps draining chain events without spinning.
async fn recv_invoice_event(
    receiver: &mut Option<tokio::sync::broadcast::Receiver<InvoiceEvent>>,
) -> InvoiceEvent {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        match receiver.as_mut() {
            None => std::future::pending::<()>().await,
            Some(rx) => match rx.recv().await {
                Ok(event) => return event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "invoice event stream lagged");
                }
                Err(RecvError::Closed) => {
                    warn!("invoice event stream closed");
                    *receiver = None;
                }
            },
        }
    }
}

/// First output paying `script_pubkey`, with its value in satoshis
fn find_output(tx: &Transaction, script_pubkey: &ScriptBuf) -> Option<(u32, u64)> {
    tx.output
        .iter()
        .position(|out| &out.script_pubkey == script_pubkey)
        .map(|vout| (vout as u32, tx.output[vout].value.to_sat()))
}

/// Pull a 32-byte secret out of a claim spend's witness or scriptSig
fn extract_preimage(input: &TxIn) -> Option<[u8; 32]> {
    for item in input.witness.iter() {
        if let Ok(preimage) = <[u8; 32]>::try_from(item) {
            return Some(preimage);
        }
    }
    for instruction in input.script_sig.instructions().flatten() {
        if let Instruction::PushBytes(bytes) = instruction {
            if let Ok(preimage) = <[u8; 32]>::try_from(bytes.as_bytes()) {
                return Some(preimage);
            }
        }
    }
    None
}

fn decode_hash(hex_str: &str) -> Result<[u8; 32], NurseryError> {
    hex::decode(hex_str)
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| NurseryError::Validation("stored preimage hash invalid".into()))
}
