//! Claim & Refund Transaction Builder
//!
//! Spends a lockup output to a wallet-owned address. One input, one output;
//! the claim path reveals the preimage, the refund path relies on the CLTV
//! branch with `nLockTime` set to the timeout height.
//!
//! Fees are `vsize * feeRate` with a 2 sat/vB floor. The transaction is
//! assembled twice: once with a placeholder signature to measure its virtual
//! size, then signed for real over the final output value.

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash as _;
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::{All, Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness,
};
use thiserror::Error;

use crate::script::OutputType;
use crate::wallet::SwapKeypair;

/// Relay floor applied to every claim/refund
pub const MIN_FEE_RATE: f64 = 2.0;

const DUST_LIMIT: u64 = 546;

/// Sequence enabling CLTV evaluation on the refund path
const REFUND_SEQUENCE: Sequence = Sequence(0xFFFF_FFFE);

/// Builder errors
#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("insufficient lockup amount: {value} sats cannot cover {required} sats")]
    InsufficientAmount { value: u64, required: u64 },

    #[error("invalid timeout height: {0}")]
    InvalidTimeout(u32),

    #[error("signing failed: {0}")]
    Signing(String),
}

/// The lockup output being spent
#[derive(Debug, Clone)]
pub struct LockupOutput {
    pub outpoint: OutPoint,
    pub value: u64,
    pub redeem_script: ScriptBuf,
    pub output_type: OutputType,
}

/// A built spending transaction with its fee
#[derive(Debug, Clone)]
pub struct SpendingTransaction {
    pub tx: Transaction,
    pub fee: u64,
}

/// Build the claim transaction revealing `preimage`
pub fn construct_claim(
    lockup: &LockupOutput,
    keys: &SwapKeypair,
    preimage: &[u8; 32],
    destination: &ScriptBuf,
    fee_rate: f64,
) -> Result<SpendingTransaction, BuilderError> {
    construct_spend(
        lockup,
        keys,
        Some(preimage),
        LockTime::ZERO,
        Sequence::MAX,
        destination,
        fee_rate,
    )
}

/// Build the refund transaction for the CLTV branch
pub fn construct_refund(
    lockup: &LockupOutput,
    keys: &SwapKeypair,
    timeout_block_height: u32,
    destination: &ScriptBuf,
    fee_rate: f64,
) -> Result<SpendingTransaction, BuilderError> {
    let lock_time = LockTime::from_height(timeout_block_height)
        .map_err(|_| BuilderError::InvalidTimeout(timeout_block_height))?;

    construct_spend(
        lockup,
        keys,
        None,
        lock_time,
        REFUND_SEQUENCE,
        destination,
        fee_rate,
    )
}

fn construct_spend(
    lockup: &LockupOutput,
    keys: &SwapKeypair,
    preimage: Option<&[u8; 32]>,
    lock_time: LockTime,
    sequence: Sequence,
    destination: &ScriptBuf,
    fee_rate: f64,
) -> Result<SpendingTransaction, BuilderError> {
    let fee_rate = fee_rate.max(MIN_FEE_RATE);
    let secp = Secp256k1::new();

    let mut tx = Transaction {
        version: Version::TWO,
        lock_time,
        input: vec![TxIn {
            previous_output: lockup.outpoint,
            script_sig: ScriptBuf::new(),
            sequence,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(lockup.value),
            script_pubkey: destination.clone(),
        }],
    };

    // Measuring pass with a maximum-length placeholder signature.
    let placeholder_sig = vec![0u8; 73];
    attach_unlock(&mut tx, lockup, &placeholder_sig, preimage)?;
    let vsize = tx.vsize() as f64;
    let fee = (vsize * fee_rate).ceil() as u64;

    let required = fee + DUST_LIMIT;
    if lockup.value < required {
        return Err(BuilderError::InsufficientAmount {
            value: lockup.value,
            required,
        });
    }

    // Final pass over the real output value.
    tx.output[0].value = Amount::from_sat(lockup.value - fee);
    tx.input[0].script_sig = ScriptBuf::new();
    tx.input[0].witness = Witness::new();

    let signature = sign_input(&secp, &tx, lockup, keys)?;
    attach_unlock(&mut tx, lockup, &signature, preimage)?;

    Ok(SpendingTransaction { tx, fee })
}

fn sign_input(
    secp: &Secp256k1<All>,
    tx: &Transaction,
    lockup: &LockupOutput,
    keys: &SwapKeypair,
) -> Result<Vec<u8>, BuilderError> {
    let mut cache = SighashCache::new(tx);

    let sighash = match lockup.output_type {
        OutputType::Bech32 | OutputType::Compatibility => cache
            .p2wsh_signature_hash(
                0,
                &lockup.redeem_script,
                Amount::from_sat(lockup.value),
                EcdsaSighashType::All,
            )
            .map_err(|e| BuilderError::Signing(e.to_string()))?
            .to_byte_array(),
        OutputType::Legacy => cache
            .legacy_signature_hash(0, &lockup.redeem_script, EcdsaSighashType::All.to_u32())
            .map_err(|e| BuilderError::Signing(e.to_string()))?
            .to_byte_array(),
    };

    let message = Message::from_digest(sighash);
    let signature = secp.sign_ecdsa(&message, &keys.secret_key);

    let mut bytes = signature.serialize_der().to_vec();
    bytes.push(EcdsaSighashType::All.to_u32() as u8);
    Ok(bytes)
}

/// Attach `<signature> <preimage | empty> <redeemScript>` as witness or
/// scriptSig, depending on the lockup output type.
fn attach_unlock(
    tx: &mut Transaction,
    lockup: &LockupOutput,
    signature: &[u8],
    preimage: Option<&[u8; 32]>,
) -> Result<(), BuilderError> {
    match lockup.output_type {
        OutputType::Bech32 => {
            tx.input[0].witness = unlock_witness(lockup, signature, preimage);
        }
        OutputType::Compatibility => {
            tx.input[0].witness = unlock_witness(lockup, signature, preimage);
            // Nested spend: the scriptSig pushes the P2WSH program.
            let program = push_bytes(lockup.redeem_script.to_p2wsh().as_bytes())?;
            tx.input[0].script_sig = Builder::new().push_slice(program).into_script();
        }
        OutputType::Legacy => {
            let mut builder = Builder::new().push_slice(push_bytes(signature)?);
            builder = match preimage {
                Some(preimage) => builder.push_slice(preimage),
                None => builder.push_slice(PushBytesBuf::new()),
            };
            let script = push_bytes(lockup.redeem_script.as_bytes())?;
            tx.input[0].script_sig = builder.push_slice(script).into_script();
        }
    }
    Ok(())
}

fn unlock_witness(
    lockup: &LockupOutput,
    signature: &[u8],
    preimage: Option<&[u8; 32]>,
) -> Witness {
    let mut witness = Witness::new();
    witness.push(signature);
    match preimage {
        Some(preimage) => witness.push(preimage),
        None => witness.push([0u8; 0]),
    }
    witness.push(lockup.redeem_script.as_bytes());
    witness
}

fn push_bytes(bytes: &[u8]) -> Result<PushBytesBuf, BuilderError> {
    PushBytesBuf::try_from(bytes.to_vec())
        .map_err(|_| BuilderError::Signing("push data too large".to_string()))
}
