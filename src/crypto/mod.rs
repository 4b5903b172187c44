// ABOUTME: Cryptographic primitives for the keeper core
// ABOUTME: SHAKE-128 derivation (C1) and the CSPRNG random source (C2)
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Cryptographic primitives for the keeper core

/// SHAKE-128 derivation primitive
pub mod derive;
/// CSPRNG random source
pub mod random;

pub use derive::derive;
pub use random::random_bytes;
