//! Wallet Interface
//!
//! The engine consumes a wallet for refund/claim key derivation, destination
//! addresses and reverse-swap lockup funding. `KeyProvider` supplies the
//! BIP32 derivation every implementation shares.

use async_trait::async_trait;
use bitcoin::bip32::{ChildNumber, Xpriv};
use bitcoin::secp256k1::{All, PublicKey, Secp256k1, SecretKey};
use bitcoin::{Network, Transaction};
use thiserror::Error;

use crate::script::OutputType;

/// Wallet errors
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("key derivation failed: {0}")]
    Derivation(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("insufficient balance: need {required} sats, have {available} sats")]
    InsufficientBalance { required: u64, available: u64 },

    #[error("send failed: {0}")]
    Send(String),
}

/// A derived keypair for signing swap inputs
#[derive(Debug, Clone, Copy)]
pub struct SwapKeypair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

/// Wallet operations the nursery depends on
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Derive the keypair at the given index
    fn derive_keypair(&self, index: u32) -> Result<SwapKeypair, WalletError>;

    /// Reserve the next unused derivation index
    fn next_key_index(&self) -> u32;

    /// Fresh wallet-owned address for claim/refund outputs
    async fn get_new_address(&self, output_type: OutputType) -> Result<String, WalletError>;

    /// Fund `address` with `amount` satoshis, returning the transaction and
    /// the vout paying the address
    async fn send_to_address(
        &self,
        address: &str,
        amount: u64,
        fee_rate: f64,
        send_all: bool,
    ) -> Result<(Transaction, u32), WalletError>;

    /// Confirmed wallet balance in satoshis
    async fn get_balance(&self) -> Result<u64, WalletError>;
}

/// BIP32 keypair derivation from a master key
pub struct KeyProvider {
    master: Xpriv,
    secp: Secp256k1<All>,
}

impl KeyProvider {
    pub fn new(master: Xpriv) -> Self {
        Self {
            master,
            secp: Secp256k1::new(),
        }
    }

    /// Create a provider from raw seed bytes
    pub fn from_seed(network: Network, seed: &[u8]) -> Result<Self, WalletError> {
        let master =
            Xpriv::new_master(network, seed).map_err(|e| WalletError::Derivation(e.to_string()))?;
        Ok(Self::new(master))
    }

    /// Derive the keypair at `m/<index>`
    pub fn derive(&self, index: u32) -> Result<SwapKeypair, WalletError> {
        let child = ChildNumber::from_normal_idx(index)
            .map_err(|e| WalletError::Derivation(e.to_string()))?;
        let derived = self
            .master
            .derive_priv(&self.secp, &[child])
            .map_err(|e| WalletError::Derivation(e.to_string()))?;

        let secret_key = derived.private_key;
        let public_key = PublicKey::from_secret_key(&self.secp, &secret_key);
        Ok(SwapKeypair {
            secret_key,
            public_key,
        })
    }
}
