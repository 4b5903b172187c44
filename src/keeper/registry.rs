// ABOUTME: Keeper registry (C5) — kind name to factory mapping, first-registered is default
// ABOUTME: Grounded in original_source/keeper/keeper.go's RegisterKeeper/NewKeeper dispatch
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use super::{ExampleKeeper, Keeper, SaferKeeper};
use crate::clock::Clock;
use crate::errors::{KeeperError, KeeperResult};
use crate::persistence::Persistence;
use async_trait::async_trait;
use std::sync::Arc;

/// The built-in stub kind, always registered first unless the caller registers real
/// kinds before calling [`KeeperRegistry::with_builtins`].
pub const EXAMPLE_KIND: &str = "Example";

/// The real derivation kind (§4.4).
pub const SAFER_KIND: &str = "safer";

/// Builds a [`Keeper`] for a tenant given its persisted identity and the process-wide
/// persistence/clock handles. Implemented per keeper kind.
#[async_trait]
pub trait KeeperFactory: Send + Sync {
    /// Construct (bootstrapping state as needed) the Keeper for `identifier`.
    async fn build(
        &self,
        identifier: &str,
        persistence: Arc<dyn Persistence>,
        clock: Arc<dyn Clock>,
    ) -> KeeperResult<Arc<dyn Keeper>>;
}

struct ExampleFactory;

#[async_trait]
impl KeeperFactory for ExampleFactory {
    async fn build(
        &self,
        _identifier: &str,
        _persistence: Arc<dyn Persistence>,
        _clock: Arc<dyn Clock>,
    ) -> KeeperResult<Arc<dyn Keeper>> {
        Ok(Arc::new(ExampleKeeper))
    }
}

struct SaferFactory;

#[async_trait]
impl KeeperFactory for SaferFactory {
    async fn build(
        &self,
        identifier: &str,
        persistence: Arc<dyn Persistence>,
        clock: Arc<dyn Clock>,
    ) -> KeeperResult<Arc<dyn Keeper>> {
        let keeper = SaferKeeper::bootstrap(identifier, persistence, clock).await?;
        Ok(Arc::new(keeper))
    }
}

/// Process-wide `kind -> factory` mapping (§4.5). Insertion order is significant: the
/// first kind ever registered becomes [`KeeperRegistry::default_kind`], which is the kind
/// used to bootstrap the `default` tenant.
pub struct KeeperRegistry {
    kinds: Vec<(String, Arc<dyn KeeperFactory>)>,
}

impl KeeperRegistry {
    /// An empty registry with no kinds registered.
    #[must_use]
    pub fn new() -> Self {
        Self { kinds: Vec::new() }
    }

    /// A registry with the real `safer` kind registered first (making it the default)
    /// and the built-in `Example` stub registered second.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(SAFER_KIND, Arc::new(SaferFactory));
        registry.register(EXAMPLE_KIND, Arc::new(ExampleFactory));
        registry
    }

    /// Register a keeper kind. Re-registering an existing name replaces its factory
    /// without changing its position (and therefore without changing the default if it
    /// was already first).
    pub fn register(&mut self, kind: &str, factory: Arc<dyn KeeperFactory>) {
        if let Some(slot) = self.kinds.iter_mut().find(|(name, _)| name == kind) {
            slot.1 = factory;
        } else {
            self.kinds.push((kind.to_owned(), factory));
        }
    }

    /// The first-registered kind name, used to bootstrap the `default` tenant. `None`
    /// if nothing has been registered yet.
    #[must_use]
    pub fn default_kind(&self) -> Option<&str> {
        self.kinds.first().map(|(name, _)| name.as_str())
    }

    /// Build a Keeper of the named `kind` for `identifier`. `InvalidKeeper` if the kind
    /// is not registered.
    pub async fn build(
        &self,
        kind: &str,
        identifier: &str,
        persistence: Arc<dyn Persistence>,
        clock: Arc<dyn Clock>,
    ) -> KeeperResult<Arc<dyn Keeper>> {
        let factory = self
            .kinds
            .iter()
            .find(|(name, _)| name == kind)
            .map(|(_, factory)| factory.clone())
            .ok_or_else(|| KeeperError::invalid_keeper(kind))?;
        factory.build(identifier, persistence, clock).await
    }
}

impl Default for KeeperRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::persistence::MemoryPersistence;

    #[test]
    fn first_registered_kind_is_default() {
        let registry = KeeperRegistry::with_builtins();
        assert_eq!(registry.default_kind(), Some(SAFER_KIND));
    }

    #[tokio::test]
    async fn unknown_kind_is_rejected() {
        let registry = KeeperRegistry::with_builtins();
        let persistence: Arc<dyn Persistence> = Arc::new(MemoryPersistence::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let err = registry
            .build("does-not-exist", "acme", persistence, clock)
            .await
            .unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::Request);
    }

    #[tokio::test]
    async fn safer_kind_builds_a_working_keeper() {
        let registry = KeeperRegistry::with_builtins();
        let persistence: Arc<dyn Persistence> = Arc::new(MemoryPersistence::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let keeper = registry
            .build(SAFER_KIND, "acme", persistence, clock)
            .await
            .expect("safer kind is registered");
        let err = keeper.get_key_info(1, 0).await.unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::NoSuchKey);
    }
}
