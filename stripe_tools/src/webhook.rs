//! Webhook signature verification.
//!
//! Stripe signs each webhook delivery with a header of the form `t=<unix seconds>,v1=<hex signature>[,v1=...]`.
//! The signature is the HMAC-SHA256 of `"{t}.{raw body}"` keyed with the endpoint's signing secret. Several `v1`
//! entries may be present during secret rotation; any one of them matching is sufficient.

use hmac::{Hmac, Mac};
use log::*;
use sha2::Sha256;

use crate::StripeApiError;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

type HmacSha256 = Hmac<Sha256>;

fn mac_for(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, StripeApiError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| StripeApiError::Initialization(format!("Invalid webhook secret. {e}")))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Produces a signature header for `payload`. Used by tests and local tooling that replay events.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String, StripeApiError> {
    let sig = mac_for(secret, timestamp, payload)?.finalize().into_bytes();
    Ok(format!("t={timestamp},v1={}", hex::encode(sig)))
}

/// Checks `header` against `payload`. `now` is the current unix time in seconds.
pub fn verify_signature(
    secret: &str,
    header: &str,
    payload: &[u8],
    tolerance: i64,
    now: i64,
) -> Result<(), StripeApiError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => {
                timestamp = Some(v.parse::<i64>().map_err(|_| StripeApiError::MalformedSignature(header.into()))?)
            },
            Some(("v1", v)) => signatures.push(v.to_string()),
            Some(_) => {},
            None => return Err(StripeApiError::MalformedSignature(header.into())),
        }
    }
    let timestamp = timestamp.ok_or_else(|| StripeApiError::MalformedSignature(header.into()))?;
    if signatures.is_empty() {
        return Err(StripeApiError::MalformedSignature(header.into()));
    }
    if (now - timestamp).abs() > tolerance {
        warn!("💳️ Webhook timestamp {timestamp} is too far from now ({now})");
        return Err(StripeApiError::TimestampOutOfTolerance(tolerance));
    }
    let matched = signatures.iter().filter_map(|s| hex::decode(s).ok()).any(|sig| {
        mac_for(secret, timestamp, payload).map(|mac| mac.verify_slice(&sig).is_ok()).unwrap_or(false)
    });
    if matched {
        Ok(())
    } else {
        Err(StripeApiError::SignatureMismatch)
    }
}
