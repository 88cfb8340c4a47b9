// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Webhook signature verification.
//!
//! Inbound requests carry an `X-Hub-Signature-256` header of the form
//! `sha256=<hex digest>`, an HMAC-SHA256 over the exact payload bytes keyed
//! with the shared webhook secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Verify a claimed `sha256=<hex>` signature over `payload`.
///
/// Returns `false` when the signature is absent, of a different length than
/// the expected digest string, or does not match. The comparison is
/// constant-time so an attacker cannot recover the digest byte-by-byte from
/// response timing. Never panics.
pub fn verify_signature(payload: &[u8], signature: Option<&str>, secret: &[u8]) -> bool {
    let Some(signature) = signature else {
        return false;
    };

    // HMAC accepts keys of any length, but stay non-panicking regardless.
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    let digest = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

    let expected = digest.as_bytes();
    let claimed = signature.as_bytes();
    if expected.len() != claimed.len() {
        return false;
    }
    expected.ct_eq(claimed).into()
}
