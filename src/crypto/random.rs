// ABOUTME: CSPRNG random source (C2) — main-key and salt generation
// ABOUTME: Failure is non-retried and propagated as Unknown
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Random source: `randomBytes(n)` from the operating system CSPRNG.

use crate::errors::KeeperError;
use rand::rngs::OsRng;
use rand::RngCore;

/// Produce `n` cryptographically strong random bytes. Used for new main-keys (32
/// bytes) and new key-record salts (32 bytes). The OS CSPRNG does not fail in
/// practice; if it does, the failure is surfaced as [`KeeperError::unknown`] rather
/// than retried.
pub fn random_bytes(n: usize) -> Result<Vec<u8>, KeeperError> {
    let mut buf = vec![0u8; n];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| KeeperError::unknown(format!("CSPRNG failure: {e}")))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_requested_length() {
        let bytes = random_bytes(32).expect("CSPRNG available in test environment");
        assert_eq!(bytes.len(), 32);
    }

    #[test]
    fn two_calls_differ() {
        let a = random_bytes(32).expect("CSPRNG available in test environment");
        let b = random_bytes(32).expect("CSPRNG available in test environment");
        assert_ne!(a, b);
    }
}
