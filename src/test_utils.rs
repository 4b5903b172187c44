// ABOUTME: Shared test fixtures (C14) — in-memory persistence and a ready-to-use manager
// ABOUTME: Only compiled under `cfg(test)` or the `testing` feature; never part of the release binary
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Every test module in this crate so far (`manager`, `inner_server`, `web_admin`) hand-rolls
//! its own `Arc<InstanceManager>` builder backed by [`MemoryPersistence`]. This module gives
//! integration tests outside the crate (`tests/`) the same fixture without duplicating the
//! bootstrap sequence, mirroring the reference stack's `tests/common/mod.rs` fixture helpers.

pub use crate::clock::FixedClock;
pub use crate::persistence::MemoryPersistence;

use crate::clock::Clock;
use crate::errors::KeeperResult;
use crate::keeper::registry::KeeperRegistry;
use crate::manager::InstanceManager;
use crate::model::{User, ROOT_USERNAME};
use crate::persistence::Persistence;
use chrono::{TimeZone, Utc};
use std::sync::Arc;

/// An instant far enough in the past that rotation-window math in tests has headroom
/// to advance forward without overflowing `DateTime<Utc>`.
#[must_use]
pub fn fixed_epoch() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().map_or_else(Utc::now, |dt| dt)
}

/// Build an `InstanceManager` backed by a fresh in-memory persistence store, the
/// built-in keeper registry, and a `FixedClock` pinned at [`fixed_epoch`]. The `default`
/// tenant and `root` user both exist when this returns, per the startup sequence in
/// [`InstanceManager::start`].
///
/// # Errors
///
/// Returns an error if startup fails, which would indicate a bug in the fixture itself.
pub async fn test_manager() -> KeeperResult<Arc<InstanceManager>> {
    let persistence: Arc<dyn Persistence> = Arc::new(MemoryPersistence::new());
    let registry = Arc::new(KeeperRegistry::with_builtins());
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(fixed_epoch()));
    InstanceManager::start(persistence, registry, clock).await
}

/// Fetch the bootstrapped `root` user from a manager built by [`test_manager`].
///
/// # Errors
///
/// Returns an error if the persistence query fails, or if `root` was never bootstrapped
/// (which would indicate a bug in [`InstanceManager::start`], not in the caller).
pub async fn test_root_user(manager: &Arc<InstanceManager>) -> KeeperResult<User> {
    manager
        .persistence()
        .find_user_by_name(ROOT_USERNAME)
        .await?
        .ok_or_else(|| crate::errors::KeeperError::unknown("root user not bootstrapped"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manager_bootstraps_default_tenant_and_root() {
        let manager = test_manager().await.expect("fixture starts");
        let root = test_root_user(&manager).await.expect("root exists");
        assert!(root.is_root());
        assert!(manager.dispatch(crate::model::DEFAULT_IDENTIFIER).is_ok());
    }
}
