//! Webhook payload authentication: hex HMAC-SHA256 over the raw body.

use hmac::{Hmac, Mac, NewMac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(thiserror::Error, Debug)]
pub enum SignatureError {
    #[error("Signature is not valid hex: {0}")]
    Malformed(#[from] hex::FromHexError),
    #[error("Signature does not match payload")]
    Mismatch,
}

pub fn sign(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time verification of a hex signature against the raw payload.
pub fn verify(secret: &[u8], payload: &[u8], signature: &str) -> Result<(), SignatureError> {
    let decoded = hex::decode(signature.trim())?;
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(payload);
    mac.verify(&decoded).map_err(|_| SignatureError::Mismatch)
}
