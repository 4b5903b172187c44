// ABOUTME: Keeper trait (C4) and keeper registry (C5) — per-tenant key derivation service
// ABOUTME: Concrete kinds: `safer` (real derivation) and the built-in `Example` stub
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! A Keeper is the per-tenant object that turns `(id, version)` pairs into derived key
//! material. The Instance manager (C6) owns exactly one Keeper per tenant and dispatches
//! every request through the [`Keeper`] trait; callers never see the concrete kind.

pub mod example;
pub mod registry;
pub mod safer;

use crate::errors::KeeperResult;
use crate::model::{DistributeRequest, KeyInfo};
use async_trait::async_trait;

pub use example::ExampleKeeper;
pub use registry::KeeperRegistry;
pub use safer::SaferKeeper;

/// Per-tenant key derivation service (§4.4). Every method is scoped to the tenant the
/// Keeper was constructed for; there is no cross-tenant operation.
#[async_trait]
pub trait Keeper: Send + Sync {
    /// Register a new key id under this tenant and return its initial `KeyInfo`
    /// (`version = 1`).
    async fn distribute_key(&self, request: DistributeRequest) -> KeeperResult<KeyInfo>;

    /// Look up a key by id and version. `version == 0` resolves to the current version.
    /// `version` greater than the current version is rejected as `InvalidRequest` rather
    /// than fabricated.
    async fn get_key_info(&self, id: u64, version: u64) -> KeeperResult<KeyInfo>;

    /// Equivalent to `get_key_info(id, 0)`.
    async fn get_latest_version_key(&self, id: u64) -> KeeperResult<KeyInfo> {
        self.get_key_info(id, 0).await
    }

    /// List keys registered under this tenant, paged. When `content` is `false` the
    /// derived key material is omitted (`key_hex` left empty) to avoid needlessly
    /// computing it for listing views.
    async fn filter_keys(
        &self,
        offset: i64,
        limit: i64,
        content: bool,
    ) -> KeeperResult<(Vec<KeyInfo>, i64)>;

    /// Delete a single key record. A missing id is not an error.
    async fn destroy_key(&self, id: u64) -> KeeperResult<()>;

    /// Delete every key record and the tenant's MainKey, atomically. Further calls on
    /// this Keeper after `destroy` succeeds are undefined; the Instance manager evicts
    /// the cache entry immediately after.
    async fn destroy(&self) -> KeeperResult<()>;
}
