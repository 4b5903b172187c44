// ABOUTME: SHAKE-128 derivation primitive (C1) — the only place key bytes are computed
// ABOUTME: Pure, deterministic function over (length, id, version, mainKey, salt)
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Derivation primitive: `K = XOF(id ‖ mainKey ‖ version ‖ salt)`.
//!
//! Absorption order is fixed by the specification and MUST NOT change: `id` as a
//! little-endian u64, then `main_key` verbatim, then `version` as a little-endian u64,
//! then `salt` verbatim. Changing the order would silently re-key every tenant.

use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake128;

/// Derive `length` bytes from the tenant `main_key`, a key `id`, a `version`, and the
/// key record's `salt`. Pure and deterministic: identical inputs always produce
/// identical output, and the same inputs with a smaller `length` produce a prefix of
/// the output for a larger `length` (XOF prefix property).
#[must_use]
pub fn derive(length: usize, id: u64, version: u64, main_key: &[u8], salt: &[u8]) -> Vec<u8> {
    let mut hasher = Shake128::default();
    hasher.update(&id.to_le_bytes());
    hasher.update(main_key);
    hasher.update(&version.to_le_bytes());
    hasher.update(salt);

    let mut reader = hasher.finalize_xof();
    let mut out = vec![0u8; length];
    reader.read(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zeros(n: usize) -> Vec<u8> {
        vec![0u8; n]
    }

    #[test]
    fn s1_derive_determinism() {
        let mk = zeros(32);
        let salt = zeros(32);
        let a = derive(16, 1, 1, &mk, &salt);
        let b = derive(16, 1, 1, &mk, &salt);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn s2_length_prefix() {
        let mk = zeros(32);
        let salt = zeros(32);
        let long = derive(32, 1, 1, &mk, &salt);
        let short = derive(16, 1, 1, &mk, &salt);
        assert_eq!(&long[..16], short.as_slice());
    }

    #[test]
    fn sensitivity_to_id() {
        let mk = zeros(32);
        let salt = zeros(32);
        let a = derive(32, 1, 1, &mk, &salt);
        let b = derive(32, 2, 1, &mk, &salt);
        assert_ne!(a, b);
    }

    #[test]
    fn sensitivity_to_version() {
        let mk = zeros(32);
        let salt = zeros(32);
        let a = derive(32, 1, 1, &mk, &salt);
        let b = derive(32, 1, 2, &mk, &salt);
        assert_ne!(a, b);
    }

    #[test]
    fn sensitivity_to_main_key() {
        let salt = zeros(32);
        let a = derive(32, 1, 1, &zeros(32), &salt);
        let mut mk2 = zeros(32);
        mk2[0] = 1;
        let b = derive(32, 1, 1, &mk2, &salt);
        assert_ne!(a, b);
    }

    #[test]
    fn sensitivity_to_salt() {
        let mk = zeros(32);
        let a = derive(32, 1, 1, &mk, &zeros(32));
        let mut salt2 = zeros(32);
        salt2[0] = 1;
        let b = derive(32, 1, 1, &mk, &salt2);
        assert_ne!(a, b);
    }

    #[test]
    fn zero_length_is_empty() {
        assert!(derive(0, 1, 1, &zeros(32), &zeros(32)).is_empty());
    }
}
