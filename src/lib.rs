// ABOUTME: Main library entry point for the keeper multi-tenant key service
// ABOUTME: Wires derivation, persistence, keeper registry, instance manager, and both HTTP servers
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

#![recursion_limit = "256"]
#![deny(unsafe_code)]

//! # keeper
//!
//! A multi-tenant cryptographic key service. Clients authenticated by mutual TLS obtain
//! symmetric key material for named key IDs, with deterministic, time-versioned rotation.
//! A separate web-admin surface manages users, tenants ("instances"), and per-tenant key
//! records.
//!
//! ## Architecture
//!
//! - [`crypto`]: the SHAKE-128 derivation primitive and the CSPRNG random source.
//! - [`clock`]: an injectable clock so version math is deterministic in tests.
//! - [`model`]: `Instance`, `KeyRecord`, `KeyInfo`, `User`.
//! - [`persistence`]: the abstract storage port plus SQLite, PostgreSQL, and in-memory backends.
//! - [`keeper`]: the per-tenant `Keeper` trait, its real (`safer`) and stub (`example`) kinds,
//!   and the keeper registry.
//! - [`manager`]: the instance catalog, dispatch, and admin operations.
//! - [`inner_server`]: the mutually-authenticated admission server.
//! - [`web_admin`]: the plaintext JWT-authenticated admin collaborator.
//! - [`config`]: environment/file/CLI configuration loading.
//! - [`logging`]: structured logging setup.
//! - [`errors`]: the stable wire error taxonomy.

/// Configuration loading from environment, file, and CLI flags
pub mod config;

/// Cryptographic primitives: SHAKE-128 derivation and CSPRNG random source
pub mod crypto;

/// Injectable wall-clock abstraction
pub mod clock;

/// Unified error taxonomy with stable wire codes
pub mod errors;

/// mTLS admission server (`/api/inner/key`, `/api/inner/version`)
pub mod inner_server;

/// Per-tenant keeper: derivation, versioning, and key-record lifecycle
pub mod keeper;

/// Production logging and structured output
pub mod logging;

/// Tenant catalog, dispatch, and admin operations
pub mod manager;

/// Data model: `Instance`, `KeyRecord`, `KeyInfo`, `User`
pub mod model;

/// Abstract persistence port and its concrete backends
pub mod persistence;

/// Test utilities: fixed clock and in-memory persistence, re-exported for integration tests
#[cfg(any(test, feature = "testing"))]
pub mod test_utils;

/// Miscellaneous helpers (UUID parsing, TLS config loading)
pub mod utils;

/// Plaintext JWT-authenticated web admin collaborator
pub mod web_admin;
