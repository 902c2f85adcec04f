//! Wire codec: JSON envelopes plus an HMAC-SHA256 request signature
//!
//! The signature covers `JSON({id, method, context})` computed from the typed
//! struct, so field order on the wire does not matter.

use hmac::{Hmac, Mac};
use log::debug;
use sha2::Sha256;

use crate::{CoreError, Envelope, SignedRequest, UnsignedRequest};

type HmacSha256 = Hmac<Sha256>;

pub fn encode(envelope: &Envelope) -> Result<String, CoreError> {
    Ok(serde_json::to_string(envelope)?)
}

/// Decode one inbound message. Embedded surfaces emit plenty of traffic that
/// is not ours, so anything that does not parse is dropped.
pub fn decode(raw: &str) -> Option<Envelope> {
    match serde_json::from_str::<Envelope>(raw) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            debug!("Dropping non-protocol message: {}", e);
            None
        }
    }
}

pub fn sign(secret: &[u8], request: &UnsignedRequest) -> Result<String, CoreError> {
    let mac = request_mac(secret, request)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub fn sign_request(secret: &[u8], request: UnsignedRequest) -> Result<SignedRequest, CoreError> {
    let signature = sign(secret, &request)?;
    Ok(SignedRequest { request, signature })
}

pub fn verify(secret: &[u8], request: &SignedRequest) -> bool {
    let Ok(expected) = hex::decode(&request.signature) else {
        return false;
    };
    match request_mac(secret, &request.request) {
        Ok(mac) => mac.verify_slice(&expected).is_ok(),
        Err(_) => false,
    }
}

fn request_mac(secret: &[u8], request: &UnsignedRequest) -> Result<HmacSha256, CoreError> {
    let payload = serde_json::to_vec(request)?;
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| CoreError::InvalidSecret(e.to_string()))?;
    mac.update(&payload);
    Ok(mac)
}
