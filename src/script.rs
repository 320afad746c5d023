//! HTLC Redeem Scripts and Lockup Addresses
//!
//! Builds the hash-timelocked scripts both swap directions lock coins into,
//! and encodes them as addresses in the output type recorded per swap.
//!
//! The submarine claim branch is gated on `RIPEMD160(SHA256(preimage))` for
//! script compactness; the invoice itself commits to `SHA256(preimage)`. The
//! reverse claim branch checks the full SHA256 digest because the claimant
//! reveals the raw 32-byte secret on-chain.

use bitcoin::hashes::{ripemd160, sha256, Hash};
use bitcoin::opcodes::all as opcodes;
use bitcoin::script::Builder;
use bitcoin::secp256k1::PublicKey;
use bitcoin::{Address, Network, ScriptBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Script errors
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("script type not found: {0}")]
    ScriptTypeNotFound(String),

    #[error("address encoding failed: {0}")]
    AddressEncoding(String),
}

/// How the redeem script is wrapped into a lockup output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    /// Native P2WSH
    Bech32,
    /// P2SH-wrapped P2WSH, the default lockup encoding
    Compatibility,
    /// Plain P2SH
    Legacy,
}

impl Default for OutputType {
    fn default() -> Self {
        Self::Compatibility
    }
}

impl std::fmt::Display for OutputType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Bech32 => "bech32",
            Self::Compatibility => "compatibility",
            Self::Legacy => "legacy",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for OutputType {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bech32" => Ok(Self::Bech32),
            "compatibility" => Ok(Self::Compatibility),
            "legacy" => Ok(Self::Legacy),
            _ => Err(ScriptError::ScriptTypeNotFound(s.to_string())),
        }
    }
}

/// Redeem script for a submarine swap.
///
/// ```text
/// OP_HASH160 <RIPEMD160(paymentHash)> OP_EQUAL
/// OP_IF
///   <claimPubKey>
/// OP_ELSE
///   <timeoutBlockHeight> OP_CLTV OP_DROP <refundPubKey>
/// OP_ENDIF
/// OP_CHECKSIG
/// ```
pub fn submarine_script(
    payment_hash: &[u8; 32],
    claim_pubkey: &PublicKey,
    refund_pubkey: &PublicKey,
    timeout_block_height: u32,
) -> ScriptBuf {
    let hash = ripemd160::Hash::hash(payment_hash);

    Builder::new()
        .push_opcode(opcodes::OP_HASH160)
        .push_slice(hash.to_byte_array())
        .push_opcode(opcodes::OP_EQUAL)
        .push_opcode(opcodes::OP_IF)
        .push_slice(claim_pubkey.serialize())
        .push_opcode(opcodes::OP_ELSE)
        .push_int(timeout_block_height as i64)
        .push_opcode(opcodes::OP_CLTV)
        .push_opcode(opcodes::OP_DROP)
        .push_slice(refund_pubkey.serialize())
        .push_opcode(opcodes::OP_ENDIF)
        .push_opcode(opcodes::OP_CHECKSIG)
        .into_script()
}

/// Redeem script for a reverse swap.
///
/// ```text
/// OP_SIZE <32> OP_EQUAL
/// OP_IF
///   OP_SHA256 <paymentHash> OP_EQUALVERIFY <claimPubKey>
/// OP_ELSE
///   OP_DROP <timeoutBlockHeight> OP_CLTV OP_DROP <refundPubKey>
/// OP_ENDIF
/// OP_CHECKSIG
/// ```
pub fn reverse_script(
    payment_hash: &[u8; 32],
    claim_pubkey: &PublicKey,
    refund_pubkey: &PublicKey,
    timeout_block_height: u32,
) -> ScriptBuf {
    Builder::new()
        .push_opcode(opcodes::OP_SIZE)
        .push_int(32)
        .push_opcode(opcodes::OP_EQUAL)
        .push_opcode(opcodes::OP_IF)
        .push_opcode(opcodes::OP_SHA256)
        .push_slice(payment_hash)
        .push_opcode(opcodes::OP_EQUALVERIFY)
        .push_slice(claim_pubkey.serialize())
        .push_opcode(opcodes::OP_ELSE)
        .push_opcode(opcodes::OP_DROP)
        .push_int(timeout_block_height as i64)
        .push_opcode(opcodes::OP_CLTV)
        .push_opcode(opcodes::OP_DROP)
        .push_slice(refund_pubkey.serialize())
        .push_opcode(opcodes::OP_ENDIF)
        .push_opcode(opcodes::OP_CHECKSIG)
        .into_script()
}

/// Encode the redeem script as a lockup address
pub fn lockup_address(
    redeem_script: &ScriptBuf,
    output_type: OutputType,
    network: Network,
) -> Result<Address, ScriptError> {
    match output_type {
        OutputType::Bech32 => Ok(Address::p2wsh(redeem_script, network)),
        OutputType::Compatibility => Address::p2sh(&redeem_script.to_p2wsh(), network)
            .map_err(|e| ScriptError::AddressEncoding(e.to_string())),
        OutputType::Legacy => Address::p2sh(redeem_script, network)
            .map_err(|e| ScriptError::AddressEncoding(e.to_string())),
    }
}

/// The scriptPubKey the lockup address pays to, used for output filtering
pub fn lockup_script_pubkey(redeem_script: &ScriptBuf, output_type: OutputType) -> ScriptBuf {
    match output_type {
        OutputType::Bech32 => redeem_script.to_p2wsh(),
        OutputType::Compatibility => redeem_script.to_p2wsh().to_p2sh(),
        OutputType::Legacy => redeem_script.to_p2sh(),
    }
}

/// SHA256 of a 32-byte preimage, the digest an invoice commits to
pub fn sha256_preimage(preimage: &[u8; 32]) -> [u8; 32] {
    sha256::Hash::hash(preimage).to_byte_array()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::{Secp256k1, SecretKey};

    fn test_keys() -> (PublicKey, PublicKey) {
        let secp = Secp256k1::new();
        let claim = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let refund = SecretKey::from_slice(&[0x22; 32]).unwrap();
        (
            PublicKey::from_secret_key(&secp, &claim),
            PublicKey::from_secret_key(&secp, &refund),
        )
    }

    #[test]
    fn test_submarine_script_structure() {
        let (claim, refund) = test_keys();
        let preimage = [0x42u8; 32];
        let payment_hash = sha256_preimage(&preimage);

        let script = submarine_script(&payment_hash, &claim, &refund, 700_000);
        let asm = script.to_asm_string();

        assert!(asm.starts_with("OP_HASH160"));
        assert!(asm.contains("OP_IF"));
        assert!(asm.contains("OP_CLTV"));
        assert!(asm.ends_with("OP_CHECKSIG"));

        // The script commits to RIPEMD160(SHA256(preimage)), not the raw payment hash
        let hash160 = ripemd160::Hash::hash(&payment_hash);
        assert!(asm.contains(&hash160.to_string()));
        assert!(!asm.contains(&hex::encode(payment_hash)));
    }

    #[test]
    fn test_reverse_script_structure() {
        let (claim, refund) = test_keys();
        let preimage = [0x42u8; 32];
        let payment_hash = sha256_preimage(&preimage);

        let script = reverse_script(&payment_hash, &claim, &refund, 700_000);
        let asm = script.to_asm_string();

        // The claim branch checks the full SHA256 digest with a size guard
        assert!(asm.starts_with("OP_SIZE"));
        assert!(asm.contains("OP_SHA256"));
        assert!(asm.contains(&hex::encode(payment_hash)));
        assert!(asm.ends_with("OP_CHECKSIG"));
    }

    #[test]
    fn test_lockup_address_types() {
        let (claim, refund) = test_keys();
        let payment_hash = sha256_preimage(&[7u8; 32]);
        let script = submarine_script(&payment_hash, &claim, &refund, 500_000);

        let bech32 = lockup_address(&script, OutputType::Bech32, Network::Regtest).unwrap();
        let compat = lockup_address(&script, OutputType::Compatibility, Network::Regtest).unwrap();
        let legacy = lockup_address(&script, OutputType::Legacy, Network::Regtest).unwrap();

        assert!(bech32.to_string().starts_with("bcrt1"));
        assert_ne!(compat.to_string(), legacy.to_string());

        // Addresses pay to the same scripts the filter registration derives
        for output_type in [OutputType::Bech32, OutputType::Compatibility, OutputType::Legacy] {
            let addr = lockup_address(&script, output_type, Network::Regtest).unwrap();
            assert_eq!(
                addr.script_pubkey(),
                lockup_script_pubkey(&script, output_type)
            );
        }
    }

    #[test]
    fn test_output_type_roundtrip() {
        for output_type in [OutputType::Bech32, OutputType::Compatibility, OutputType::Legacy] {
            assert_eq!(
                output_type.to_string().parse::<OutputType>().unwrap(),
                output_type
            );
        }
        assert!("p2tr".parse::<OutputType>().is_err());
    }
}
