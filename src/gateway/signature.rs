//! Webhook signature verification.
//!
//! The gateway signs each notification with HMAC-SHA256 over
//! `"{timestamp}.{raw body}"` using the shared endpoint secret and sends
//! `t=<unix seconds>,v1=<hex digest>` in the signature header. More than one
//! `v1` entry may be present while secrets are being rolled.

use crate::errors::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Name of the header carrying the signature
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Default replay window
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(300);

/// Verifies notification signatures against the shared secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance: Duration,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret", &"<redacted>")
            .field("tolerance", &self.tolerance)
            .finish()
    }
}

impl WebhookVerifier {
    /// Creates a verifier for `secret` with the given replay window.
    #[must_use]
    pub const fn new(secret: String, tolerance: Duration) -> Self {
        Self { secret, tolerance }
    }

    /// Checks `header` against `payload`, with `now_unix` as the current time.
    ///
    /// # Errors
    /// [`Error::InvalidSignature`] when the header is missing parts, the
    /// timestamp is outside the tolerance window, or no `v1` digest matches.
    pub fn verify(&self, payload: &str, header: &str, now_unix: i64) -> Result<()> {
        let parsed = parse_header(header)?;

        let age = now_unix
            .checked_sub(parsed.timestamp)
            .map(i64::unsigned_abs);
        if !age.is_some_and(|age| age <= self.tolerance.as_secs()) {
            warn!(
                timestamp = parsed.timestamp,
                now = now_unix,
                "Webhook timestamp outside tolerance"
            );
            return Err(invalid("timestamp outside tolerance window"));
        }

        let signed_payload = format!("{}.{payload}", parsed.timestamp);
        for candidate in &parsed.signatures {
            let Ok(expected) = hex::decode(candidate) else {
                continue;
            };
            let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
                .map_err(|_| invalid("webhook secret is not a usable HMAC key"))?;
            mac.update(signed_payload.as_bytes());
            if mac.verify_slice(&expected).is_ok() {
                return Ok(());
            }
        }

        Err(invalid("no matching v1 signature"))
    }

    /// Produces a header value for `payload` signed at `timestamp`.
    ///
    /// Used to sign fixtures; the gateway does this on its side.
    pub fn sign(&self, payload: &str, timestamp: i64) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| invalid("webhook secret is not a usable HMAC key"))?;
        mac.update(format!("{timestamp}.{payload}").as_bytes());
        Ok(format!(
            "t={timestamp},v1={}",
            hex::encode(mac.finalize().into_bytes())
        ))
    }
}

struct ParsedHeader {
    timestamp: i64,
    signatures: Vec<String>,
}

fn parse_header(header: &str) -> Result<ParsedHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => signatures.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| invalid("missing timestamp"))?;
    if signatures.is_empty() {
        return Err(invalid("missing v1 signature"));
    }
    Ok(ParsedHeader {
        timestamp,
        signatures,
    })
}

fn invalid(reason: &str) -> Error {
    Error::InvalidSignature {
        reason: reason.to_string(),
    }
}
