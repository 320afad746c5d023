//! BOLT11 Invoice Helpers

use std::str::FromStr;
use std::time::{Duration, SystemTime};

use bitcoin::hashes::Hash;
use lightning_invoice::Bolt11Invoice;

use super::LightningError;

fn parse(invoice: &str) -> Result<Bolt11Invoice, LightningError> {
    Bolt11Invoice::from_str(invoice)
        .map_err(|e| LightningError::InvalidInvoice(format!("{:?}", e)))
}

/// SHA256 payment hash the invoice commits to
pub fn payment_hash_from_bolt11(invoice: &str) -> Result<[u8; 32], LightningError> {
    Ok(parse(invoice)?.payment_hash().to_byte_array())
}

/// Invoice amount in millisatoshis, if one is encoded
pub fn amount_msat_from_bolt11(invoice: &str) -> Result<Option<u64>, LightningError> {
    Ok(parse(invoice)?.amount_milli_satoshis())
}

/// Time remaining until the invoice expires, `None` once it has
pub fn time_until_expiry(invoice: &str) -> Result<Option<Duration>, LightningError> {
    let invoice = parse(invoice)?;
    let Some(expires_at) = invoice.expires_at() else {
        return Ok(None);
    };
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0));
    Ok(expires_at.checked_sub(now))
}

/// Whether the invoice's expiry has passed
pub fn is_expired_bolt11(invoice: &str) -> Result<bool, LightningError> {
    Ok(time_until_expiry(invoice)?.is_none())
}
