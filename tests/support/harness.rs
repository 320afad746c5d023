//! Test harness: the real engine wired to mock collaborators.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::{deserialize, serialize_hex};
use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, CompressedPublicKey, Network, OutPoint, ScriptBuf, Sequence, Transaction,
    TxIn, TxOut, Txid, Witness,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use swapd::chain::{
    BlockchainInfo, ChainCapabilities, ChainClient, ChainError, ChainObserver, VerboseBlock,
};
use swapd::lightning::{
    InvoiceEvent, LightningAdapter, LightningClient, LightningError, PaymentFailureReason,
    PaymentResult,
};
use swapd::rates::{FeeEstimator, RateError, RateProvider};
use swapd::script::OutputType;
use swapd::swap::{NurseryConfig, SwapEvent, SwapNursery};
use swapd::types::{OrderSide, Pair};
use swapd::wallet::{KeyProvider, SwapKeypair, Wallet, WalletError};
use swapd::{MemoryRepository, SwapRepository};

/// Wait for the next bus event, failing loudly on silence
pub async fn next_event(rx: &mut broadcast::Receiver<SwapEvent>) -> SwapEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a swap event")
        .expect("event bus closed")
}

/// Build a real, signed BOLT11 invoice committing to `preimage`
pub fn test_invoice(preimage: [u8; 32], amount_msat: u64) -> String {
    use lightning_invoice::{Currency, InvoiceBuilder, PaymentSecret};

    let secp = Secp256k1::new();
    let node_key = SecretKey::from_slice(&[0x51; 32]).unwrap();
    let payment_hash = sha256::Hash::hash(&preimage);

    InvoiceBuilder::new(Currency::Regtest)
        .description("swap".to_string())
        .payment_hash(payment_hash)
        .payment_secret(PaymentSecret([0x42; 32]))
        .amount_milli_satoshis(amount_msat)
        .current_timestamp()
        .min_final_cltv_expiry_delta(80)
        .build_signed(|hash| secp.sign_ecdsa_recoverable(hash, &node_key))
        .expect("invoice construction")
        .to_string()
}

// ---------------------------------------------------------------------------
// Mock chain daemon
// ---------------------------------------------------------------------------

pub struct MockChain {
    height: AtomicU64,
    raw_txs: Mutex<HashMap<String, String>>,
    blocks: Mutex<HashMap<u64, VerboseBlock>>,
    broadcasts: Mutex<Vec<Transaction>>,
}

impl MockChain {
    pub fn new(height: u64) -> Self {
        Self {
            height: AtomicU64::new(height),
            raw_txs: Mutex::new(HashMap::new()),
            blocks: Mutex::new(HashMap::new()),
            broadcasts: Mutex::new(Vec::new()),
        }
    }

    /// Create a confirmed parent transaction with one output of `value` sats
    /// and make it fetchable, so fee-rate checks on its children work.
    pub fn seed_spendable_output(&self, value: u64) -> Txid {
        let mut entropy = [0u8; 32];
        entropy[..8].copy_from_slice(&rand::random::<u64>().to_le_bytes());

        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: Txid::from_byte_array(entropy),
                    vout: 0,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(value),
                script_pubkey: ScriptBuf::from_bytes(vec![0x00, 0x14, 0xAA]),
            }],
        };

        let txid = tx.compute_txid();
        self.raw_txs
            .lock()
            .unwrap()
            .insert(txid.to_string(), serialize_hex(&tx));
        txid
    }

    /// Record a mined block, advancing the tip if needed
    pub fn add_block(&self, height: u64, txs: Vec<Transaction>) {
        let block = VerboseBlock {
            hash: block_hash_at(height),
            height,
            tx: txs.iter().map(serialize_hex).collect(),
        };
        self.blocks.lock().unwrap().insert(height, block);
        self.height.fetch_max(height, Ordering::SeqCst);
    }

    pub fn broadcasts(&self) -> Vec<Transaction> {
        self.broadcasts.lock().unwrap().clone()
    }
}

fn block_hash_at(height: u64) -> String {
    format!("blockhash{:08}", height)
}

#[async_trait]
impl ChainClient for MockChain {
    async fn get_blockchain_info(&self) -> Result<BlockchainInfo, ChainError> {
        let blocks = self.height.load(Ordering::SeqCst);
        Ok(BlockchainInfo {
            chain: "regtest".to_string(),
            blocks,
            best_block_hash: block_hash_at(blocks),
        })
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, ChainError> {
        Ok(block_hash_at(height))
    }

    async fn get_block(&self, hash: &str) -> Result<VerboseBlock, ChainError> {
        let height: u64 = hash
            .strip_prefix("blockhash")
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(|| ChainError::Rpc {
                code: -5,
                message: format!("block not found: {}", hash),
            })?;

        Ok(self
            .blocks
            .lock()
            .unwrap()
            .get(&height)
            .cloned()
            .unwrap_or(VerboseBlock {
                hash: hash.to_string(),
                height,
                tx: vec![],
            }))
    }

    async fn get_raw_transaction(&self, txid: &str) -> Result<String, ChainError> {
        self.raw_txs
            .lock()
            .unwrap()
            .get(txid)
            .cloned()
            .ok_or_else(|| ChainError::Rpc {
                code: -5,
                message: format!("transaction not found: {}", txid),
            })
    }

    async fn send_raw_transaction(&self, hex: &str) -> Result<String, ChainError> {
        let raw = hex::decode(hex).map_err(|e| ChainError::InvalidResponse(e.to_string()))?;
        let tx: Transaction =
            deserialize(&raw).map_err(|e| ChainError::InvalidResponse(e.to_string()))?;
        let txid = tx.compute_txid();

        self.raw_txs
            .lock()
            .unwrap()
            .insert(txid.to_string(), hex.to_string());
        self.broadcasts.lock().unwrap().push(tx);
        Ok(txid.to_string())
    }

    async fn estimate_fee(&self, _target: u16) -> Result<f64, ChainError> {
        Ok(3.0)
    }

    fn capabilities(&self) -> ChainCapabilities {
        ChainCapabilities::default()
    }
}

// ---------------------------------------------------------------------------
// Mock Lightning node
// ---------------------------------------------------------------------------

pub struct MockLightning {
    events: broadcast::Sender<InvoiceEvent>,
    payment_preimage: Mutex<Option<[u8; 32]>>,
    fail_payments: AtomicBool,
    pay_count: AtomicU32,
    settled: Mutex<Vec<[u8; 32]>>,
    cancelled: Mutex<Vec<[u8; 32]>>,
}

impl MockLightning {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            events,
            payment_preimage: Mutex::new(None),
            fail_payments: AtomicBool::new(false),
            pay_count: AtomicU32::new(0),
            settled: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
        }
    }

    pub fn set_payment_preimage(&self, preimage: [u8; 32]) {
        *self.payment_preimage.lock().unwrap() = Some(preimage);
    }

    pub fn fail_payments(&self) {
        self.fail_payments.store(true, Ordering::SeqCst);
    }

    pub fn pay_count(&self) -> u32 {
        self.pay_count.load(Ordering::SeqCst)
    }

    pub fn settled_preimages(&self) -> Vec<[u8; 32]> {
        self.settled.lock().unwrap().clone()
    }

    pub fn cancelled_hashes(&self) -> Vec<[u8; 32]> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn send_event(&self, event: InvoiceEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl LightningClient for MockLightning {
    async fn pay_invoice(&self, _bolt11: &str) -> Result<PaymentResult, LightningError> {
        self.pay_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_payments.load(Ordering::SeqCst) {
            return Err(LightningError::PaymentFailed(PaymentFailureReason::NoRoute));
        }
        let preimage = self
            .payment_preimage
            .lock()
            .unwrap()
            .expect("test must configure a payment preimage");
        Ok(PaymentResult {
            preimage,
            routing_fee_msat: 1_000,
        })
    }

    async fn add_hold_invoice(
        &self,
        preimage_hash: [u8; 32],
        _amount_msat: u64,
        _expiry_secs: u64,
        _memo: &str,
    ) -> Result<String, LightningError> {
        Ok(format!("lnbcrt_hold_{}", hex::encode(preimage_hash)))
    }

    async fn settle_invoice(&self, preimage: [u8; 32]) -> Result<(), LightningError> {
        self.settled.lock().unwrap().push(preimage);
        Ok(())
    }

    async fn cancel_invoice(&self, preimage_hash: [u8; 32]) -> Result<(), LightningError> {
        self.cancelled.lock().unwrap().push(preimage_hash);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<InvoiceEvent> {
        self.events.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Mock wallet
// ---------------------------------------------------------------------------

pub struct MockWallet {
    provider: KeyProvider,
    next_index: AtomicU32,
    fundings: Mutex<Vec<Transaction>>,
}

impl MockWallet {
    pub fn new() -> Self {
        Self {
            provider: KeyProvider::from_seed(Network::Regtest, &[0x07; 32]).unwrap(),
            next_index: AtomicU32::new(0),
            fundings: Mutex::new(Vec::new()),
        }
    }

    pub fn last_funding_transaction(&self) -> Option<Transaction> {
        self.fundings.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Wallet for MockWallet {
    fn derive_keypair(&self, index: u32) -> Result<SwapKeypair, WalletError> {
        self.provider.derive(index)
    }

    fn next_key_index(&self) -> u32 {
        self.next_index.fetch_add(1, Ordering::SeqCst)
    }

    async fn get_new_address(&self, _output_type: OutputType) -> Result<String, WalletError> {
        let keys = self.provider.derive(999_999)?;
        let address = Address::p2wpkh(&CompressedPublicKey(keys.public_key), Network::Regtest);
        Ok(address.to_string())
    }

    async fn send_to_address(
        &self,
        address: &str,
        amount: u64,
        _fee_rate: f64,
        _send_all: bool,
    ) -> Result<(Transaction, u32), WalletError> {
        let address = Address::from_str(address)
            .map_err(|e| WalletError::InvalidAddress(e.to_string()))?
            .assume_checked();

        let mut entropy = [0u8; 32];
        entropy[..8].copy_from_slice(&rand::random::<u64>().to_le_bytes());

        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: Txid::from_byte_array(entropy),
                    vout: 0,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(amount),
                script_pubkey: address.script_pubkey(),
            }],
        };

        self.fundings.lock().unwrap().push(tx.clone());
        Ok((tx, 0))
    }

    async fn get_balance(&self) -> Result<u64, WalletError> {
        Ok(10_000_000)
    }
}

// ---------------------------------------------------------------------------
// Mock rate oracle & fee estimator
// ---------------------------------------------------------------------------

pub struct MockRates {
    pub rate: f64,
    pub base_fee: u64,
    pub percentage: f64,
    pub zero_conf_cap: u64,
}

impl RateProvider for MockRates {
    fn rate(&self, _pair: &Pair, _side: OrderSide) -> Result<f64, RateError> {
        Ok(self.rate)
    }

    fn base_fee(&self, _currency: &str) -> u64 {
        self.base_fee
    }

    fn percentage_fee(&self, _pair: &Pair) -> f64 {
        self.percentage
    }

    fn zero_conf_cap(&self, _currency: &str) -> u64 {
        self.zero_conf_cap
    }
}

pub struct MockFees;

#[async_trait]
impl FeeEstimator for MockFees {
    async fn sat_per_vbyte(&self, _currency: &str) -> Result<f64, RateError> {
        Ok(3.0)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct HarnessOptions {
    pub repository: Option<Arc<dyn SwapRepository>>,
    pub percentage_fee: f64,
    /// Blocks pre-mined before start, replayed by `recover()`'s rescan
    pub confirmed_transactions: Vec<(u64, Transaction)>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            repository: None,
            percentage_fee: 0.01,
            confirmed_transactions: Vec::new(),
        }
    }
}

pub struct Harness {
    pub nursery: Arc<SwapNursery>,
    pub observer: Arc<ChainObserver>,
    pub chain: Arc<MockChain>,
    pub lightning: Arc<MockLightning>,
    pub wallet: Arc<MockWallet>,
    pub repository: Arc<dyn SwapRepository>,
    run_handle: JoinHandle<()>,
}

impl Harness {
    pub async fn start(options: HarnessOptions) -> Self {
        let repository = options
            .repository
            .unwrap_or_else(|| Arc::new(MemoryRepository::new()));

        let chain = Arc::new(MockChain::new(1_000));
        for (height, tx) in options.confirmed_transactions {
            chain.add_block(height, vec![tx]);
        }

        let (observer, chain_events) = ChainObserver::new();
        let observer = Arc::new(observer);
        let lightning = Arc::new(MockLightning::new());
        let adapter = Arc::new(LightningAdapter::new(
            lightning.clone() as Arc<dyn LightningClient>,
            3,
        ));
        let wallet = Arc::new(MockWallet::new());
        let rates = Arc::new(MockRates {
            rate: 1.0,
            base_fee: 500,
            percentage: options.percentage_fee,
            zero_conf_cap: 1_000_000,
        });

        let config = NurseryConfig {
            network: Network::Regtest,
            timeout_delta: 50,
            min_timeout_delta: 20,
            payment_timeout: Duration::from_secs(5),
            invoice_expiry_secs: 3_600,
        };

        let nursery = SwapNursery::init(
            config,
            repository.clone(),
            chain.clone() as Arc<dyn ChainClient>,
            observer.clone(),
            adapter,
            wallet.clone() as Arc<dyn Wallet>,
            rates,
            Arc::new(MockFees),
        );

        let run_handle = tokio::spawn(nursery.clone().run(chain_events));

        // Let the event loop come up before tests feed notifications
        tokio::task::yield_now().await;

        Self {
            nursery,
            observer,
            chain,
            lightning,
            wallet,
            repository,
            run_handle,
        }
    }

    /// Compressed public key the tests hand in as the user's key
    pub fn user_public_key(&self) -> String {
        let secp = Secp256k1::new();
        let key = SecretKey::from_slice(&[0xAB; 32]).unwrap();
        PublicKey::from_secret_key(&secp, &key).to_string()
    }

    /// Stop the event loop, simulating a process kill
    pub async fn shutdown(self) {
        self.nursery.shutdown();
        let _ = self.run_handle.await;
    }
}
