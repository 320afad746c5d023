//! Swap Entities
//!
//! Types for tracking swaps through their lifecycle. A submarine swap moves
//! on-chain coins into a Lightning payment; a reverse swap moves a Lightning
//! payment into on-chain coins. Both progress through the same status set,
//! with direction-specific branches.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::script::OutputType;

/// Which side of the pair the order is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

impl std::str::FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            _ => Err(format!("unknown order side: {}", s)),
        }
    }
}

/// A trading pair like `LTC/BTC`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pair {
    pub base: String,
    pub quote: String,
}

impl Pair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }

    /// Currency whose chain the swap locks coins on
    pub fn chain_currency(&self, side: OrderSide) -> &str {
        match side {
            OrderSide::Buy => &self.base,
            OrderSide::Sell => &self.quote,
        }
    }

    /// Currency the Lightning leg settles in
    pub fn lightning_currency(&self, side: OrderSide) -> &str {
        match side {
            OrderSide::Buy => &self.quote,
            OrderSide::Sell => &self.base,
        }
    }
}

impl std::fmt::Display for Pair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl std::str::FromStr for Pair {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s
            .split_once('/')
            .ok_or_else(|| format!("malformed pair: {}", s))?;
        if base.is_empty() || quote.is_empty() {
            return Err(format!("malformed pair: {}", s));
        }
        Ok(Self::new(base, quote))
    }
}

/// Status of a swap through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapStatus {
    /// Swap registered, waiting for the lockup transaction
    SwapCreated,
    /// Lockup transaction seen unconfirmed
    TransactionMempool,
    /// Lockup transaction confirmed (or accepted zero-conf)
    TransactionConfirmed,
    /// Invoice payment attempt in flight (submarine)
    InvoicePending,
    /// Invoice paid (submarine) or payer's HTLC accepted (reverse)
    InvoicePaid,
    /// Claim transaction broadcast (submarine, terminal success)
    TransactionClaimed,
    /// Lightning payment failed terminally (submarine, terminal)
    InvoiceFailedToPay,
    /// Timeout block height reached
    SwapExpired,
    /// Hold-invoice settled after on-chain claim (reverse, terminal success)
    InvoiceSettled,
    /// Lockup broadcast rejected (reverse, terminal)
    TransactionFailed,
    /// Service refunded its own lockup (reverse, terminal)
    TransactionRefunded,
}

impl SwapStatus {
    /// Whether this status ends the swap's lifecycle
    pub fn is_terminal(&self, is_reverse: bool) -> bool {
        match self {
            Self::TransactionClaimed
            | Self::InvoiceFailedToPay
            | Self::InvoiceSettled
            | Self::TransactionFailed
            | Self::TransactionRefunded => true,
            // A reverse swap still has to refund itself after expiry.
            Self::SwapExpired => !is_reverse,
            _ => false,
        }
    }

    /// Whether `next` is a legal successor of `self`.
    ///
    /// Transitions are monotone along the lifecycle DAG; `SwapExpired` is the
    /// one override that may interrupt any non-terminal status.
    pub fn can_transition_to(&self, next: SwapStatus, is_reverse: bool) -> bool {
        if self.is_terminal(is_reverse) {
            return false;
        }
        if next == Self::SwapExpired {
            return true;
        }
        match (self, next) {
            (Self::SwapCreated, Self::TransactionMempool) => true,
            (Self::SwapCreated, Self::TransactionFailed) => is_reverse,
            (Self::TransactionMempool, Self::TransactionConfirmed) => true,
            (Self::TransactionConfirmed, Self::InvoicePending) => !is_reverse,
            (Self::TransactionConfirmed, Self::InvoicePaid) => true,
            // The on-chain claim can be observed before the HTLC event
            // reaches us.
            (Self::TransactionConfirmed, Self::InvoiceSettled) => is_reverse,
            (Self::InvoicePending, Self::InvoicePaid) => !is_reverse,
            (Self::InvoicePending, Self::InvoiceFailedToPay) => !is_reverse,
            (Self::InvoicePaid, Self::TransactionClaimed) => !is_reverse,
            (Self::InvoicePaid, Self::InvoiceSettled) => is_reverse,
            (Self::SwapExpired, Self::TransactionRefunded) => is_reverse,
            _ => false,
        }
    }
}

impl std::fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SwapCreated => "swap.created",
            Self::TransactionMempool => "transaction.mempool",
            Self::TransactionConfirmed => "transaction.confirmed",
            Self::InvoicePending => "invoice.pending",
            Self::InvoicePaid => "invoice.paid",
            Self::TransactionClaimed => "transaction.claimed",
            Self::InvoiceFailedToPay => "invoice.failedToPay",
            Self::SwapExpired => "swap.expired",
            Self::InvoiceSettled => "invoice.settled",
            Self::TransactionFailed => "transaction.failed",
            Self::TransactionRefunded => "transaction.refunded",
        };
        write!(f, "{}", s)
    }
}

impl Serialize for SwapStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SwapStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl std::str::FromStr for SwapStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "swap.created" => Ok(Self::SwapCreated),
            "transaction.mempool" => Ok(Self::TransactionMempool),
            "transaction.confirmed" => Ok(Self::TransactionConfirmed),
            "invoice.pending" => Ok(Self::InvoicePending),
            "invoice.paid" => Ok(Self::InvoicePaid),
            "transaction.claimed" => Ok(Self::TransactionClaimed),
            "invoice.failedToPay" => Ok(Self::InvoiceFailedToPay),
            "swap.expired" => Ok(Self::SwapExpired),
            "invoice.settled" => Ok(Self::InvoiceSettled),
            "transaction.failed" => Ok(Self::TransactionFailed),
            "transaction.refunded" => Ok(Self::TransactionRefunded),
            _ => Err(format!("unknown status: {}", s)),
        }
    }
}

/// Lockup transaction details, recorded once the transaction is seen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInfo {
    pub id: String,
    pub vout: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hex: Option<String>,
}

/// A submarine swap: user locks on-chain, service pays the invoice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Swap {
    /// Unique 16-hex-char identifier
    pub id: String,
    pub pair: Pair,
    pub order_side: OrderSide,
    /// BOLT11 invoice the service will pay
    pub invoice: String,
    /// SHA256 payment hash the invoice commits to (hex, 32 bytes)
    pub preimage_hash: String,
    /// HTLC redeem script (hex)
    pub redeem_script: String,
    pub lockup_address: String,
    pub output_type: OutputType,
    /// Derivation index of the service's refund key
    pub key_index: u32,
    /// Minimum on-chain credit required (satoshis)
    pub expected_amount: u64,
    pub accept_zero_conf: bool,
    /// Absolute height after which the user may refund themselves
    pub timeout_block_height: u32,
    pub status: SwapStatus,
    pub lockup_transaction: Option<TransactionInfo>,
    pub onchain_amount: Option<u64>,
    pub miner_fee: Option<u64>,
    /// Service fee taken on top of the converted amount (satoshis)
    pub percentage_fee: u64,
    /// Chain tip at creation, rescans start here
    pub creation_height: u32,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Swap {
    pub fn set_status(&mut self, status: SwapStatus) {
        self.status = status;
        self.touch();
    }

    /// Record the observed lockup transaction
    pub fn set_lockup_transaction(&mut self, info: TransactionInfo, onchain_amount: u64) {
        self.lockup_transaction = Some(info);
        self.onchain_amount = Some(onchain_amount);
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = unix_now();
    }
}

/// A reverse swap: user pays a hold-invoice, service locks on-chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseSwap {
    pub id: String,
    pub pair: Pair,
    pub order_side: OrderSide,
    /// Hold-invoice the user pays
    pub invoice: String,
    /// SHA256 payment hash committing the hold-invoice (hex, 32 bytes)
    pub preimage_hash: String,
    /// Revealed by the user's on-chain claim (hex, 32 bytes)
    pub preimage: Option<String>,
    /// Claim key provided by the user (hex, compressed)
    pub claim_public_key: String,
    pub redeem_script: String,
    pub lockup_address: String,
    pub output_type: OutputType,
    /// Derivation index of the service's refund key
    pub key_index: u32,
    /// What the hold-invoice asks for (satoshis)
    pub invoice_amount: u64,
    /// What the service locks on-chain (satoshis)
    pub onchain_amount: u64,
    pub timeout_block_height: u32,
    pub status: SwapStatus,
    /// The service's own lockup transaction
    pub lockup_transaction: Option<TransactionInfo>,
    pub miner_fee: Option<u64>,
    pub percentage_fee: u64,
    pub creation_height: u32,
    pub created_at: u64,
    pub updated_at: u64,
}

impl ReverseSwap {
    pub fn set_status(&mut self, status: SwapStatus) {
        self.status = status;
        self.touch();
    }

    pub fn set_lockup_transaction(&mut self, info: TransactionInfo, miner_fee: u64) {
        self.lockup_transaction = Some(info);
        self.miner_fee = Some(miner_fee);
        self.touch();
    }

    pub fn set_preimage(&mut self, preimage_hex: String) {
        self.preimage = Some(preimage_hex);
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = unix_now();
    }
}

/// Generate an opaque 16-hex-char swap identifier
pub fn generate_swap_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_parsing() {
        let pair: Pair = "LTC/BTC".parse().unwrap();
        assert_eq!(pair.base, "LTC");
        assert_eq!(pair.quote, "BTC");
        assert_eq!(pair.to_string(), "LTC/BTC");

        assert!("LTCBTC".parse::<Pair>().is_err());
        assert!("/BTC".parse::<Pair>().is_err());
    }

    #[test]
    fn test_pair_currencies() {
        let pair = Pair::new("LTC", "BTC");
        assert_eq!(pair.chain_currency(OrderSide::Sell), "BTC");
        assert_eq!(pair.chain_currency(OrderSide::Buy), "LTC");
        assert_eq!(pair.lightning_currency(OrderSide::Sell), "LTC");
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            SwapStatus::SwapCreated,
            SwapStatus::TransactionMempool,
            SwapStatus::TransactionConfirmed,
            SwapStatus::InvoicePending,
            SwapStatus::InvoicePaid,
            SwapStatus::TransactionClaimed,
            SwapStatus::InvoiceFailedToPay,
            SwapStatus::SwapExpired,
            SwapStatus::InvoiceSettled,
            SwapStatus::TransactionFailed,
            SwapStatus::TransactionRefunded,
        ] {
            assert_eq!(status.to_string().parse::<SwapStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_submarine_progression() {
        use SwapStatus::*;

        assert!(SwapCreated.can_transition_to(TransactionMempool, false));
        assert!(TransactionMempool.can_transition_to(TransactionConfirmed, false));
        assert!(TransactionConfirmed.can_transition_to(InvoicePending, false));
        assert!(InvoicePending.can_transition_to(InvoicePaid, false));
        assert!(InvoicePaid.can_transition_to(TransactionClaimed, false));

        // No backward transitions
        assert!(!TransactionConfirmed.can_transition_to(TransactionMempool, false));
        assert!(!InvoicePaid.can_transition_to(InvoicePending, false));

        // Expiry overrides any non-terminal status
        assert!(TransactionMempool.can_transition_to(SwapExpired, false));
        assert!(InvoicePending.can_transition_to(SwapExpired, false));

        // Terminal states stay terminal
        assert!(!TransactionClaimed.can_transition_to(SwapExpired, false));
        assert!(!InvoiceFailedToPay.can_transition_to(InvoicePending, false));
        assert!(!SwapExpired.can_transition_to(TransactionRefunded, false));
    }

    #[test]
    fn test_reverse_progression() {
        use SwapStatus::*;

        assert!(SwapCreated.can_transition_to(TransactionMempool, true));
        assert!(SwapCreated.can_transition_to(TransactionFailed, true));
        assert!(TransactionMempool.can_transition_to(TransactionConfirmed, true));
        assert!(TransactionConfirmed.can_transition_to(InvoicePaid, true));
        assert!(InvoicePaid.can_transition_to(InvoiceSettled, true));

        // Expiry is not terminal for reverse swaps: the refund follows.
        assert!(SwapExpired.can_transition_to(TransactionRefunded, true));
        assert!(SwapExpired.is_terminal(false));
        assert!(!SwapExpired.is_terminal(true));

        // Submarine-only edges are illegal on the reverse side
        assert!(!TransactionConfirmed.can_transition_to(InvoicePending, true));
        assert!(!InvoicePaid.can_transition_to(TransactionClaimed, true));
    }

    #[test]
    fn test_swap_id_format() {
        let id = generate_swap_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(generate_swap_id(), generate_swap_id());
    }
}
