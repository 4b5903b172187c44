// ABOUTME: Instance manager (C6) — tenant catalog, default-tenant invariant, dispatch, ACL
// ABOUTME: Grounded in original_source/logic/{manager,instance,user}.go's Manager type
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! The Instance manager is the single entry point both HTTP servers dispatch through. It
//! owns the tenant catalog, the keeper registry, and the frozen-user short-circuit set.

use crate::clock::Clock;
use crate::errors::{KeeperError, KeeperResult};
use crate::keeper::{Keeper, KeeperRegistry};
use crate::model::instance::is_valid_identifier;
use crate::model::{Instance, User, DEFAULT_IDENTIFIER, ROOT_USERNAME};
use crate::persistence::{NewInstance, NewUser, Persistence};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

/// A tenant's catalog row paired with its live Keeper.
struct Tenant {
    instance: Instance,
    keeper: Arc<dyn Keeper>,
}

/// Owns the tenant catalog and dispatches every request to the right Keeper (§4.6).
/// Constructed once per process via [`InstanceManager::start`]; callers hold it behind
/// an `Arc`, never as a global singleton.
pub struct InstanceManager {
    persistence: Arc<dyn Persistence>,
    registry: Arc<KeeperRegistry>,
    clock: Arc<dyn Clock>,
    tenants: DashMap<String, Tenant>,
    frozen_users: RwLock<HashSet<i64>>,
}

impl InstanceManager {
    /// Run the startup sequence (§4.6): migrate, load instances (default-first), bootstrap
    /// `default` if missing, construct every tenant's Keeper, bootstrap the `root` user.
    /// Fails if the `default` tenant cannot be produced.
    pub async fn start(
        persistence: Arc<dyn Persistence>,
        registry: Arc<KeeperRegistry>,
        clock: Arc<dyn Clock>,
    ) -> KeeperResult<Arc<Self>> {
        persistence.migrate().await?;

        let default_kind = registry
            .default_kind()
            .ok_or_else(|| KeeperError::unknown("no keeper kind registered"))?
            .to_owned();

        let root = Self::bootstrap_root_user(&persistence).await?;

        let mut instances = persistence.list_instances().await?;
        instances.sort_by_key(|i| if i.is_default() { 0 } else { 1 });
        let has_default = instances.iter().any(Instance::is_default);
        if !has_default {
            let created = persistence
                .create_instance_row(NewInstance {
                    identifier: DEFAULT_IDENTIFIER.to_owned(),
                    keeper_kind: default_kind,
                    users: root.acl_token(),
                    d_safe_level: 0,
                    ips: String::new(),
                })
                .await?;
            instances.insert(0, created);
        }

        let manager = Arc::new(Self {
            persistence,
            registry,
            clock,
            tenants: DashMap::new(),
            frozen_users: RwLock::new(HashSet::new()),
        });

        for instance in instances {
            manager.construct_and_insert(instance).await?;
        }

        if !manager.tenants.contains_key(DEFAULT_IDENTIFIER) {
            return Err(KeeperError::unknown("default tenant failed to construct"));
        }

        Ok(manager)
    }

    async fn bootstrap_root_user(persistence: &Arc<dyn Persistence>) -> KeeperResult<User> {
        if let Some(existing) = persistence.find_user_by_name(ROOT_USERNAME).await? {
            return Ok(existing);
        }
        persistence
            .create_user(NewUser {
                name: ROOT_USERNAME.to_owned(),
                passwd_hash: crate::model::user::hash_password(ROOT_USERNAME),
                level: 0,
            })
            .await
    }

    async fn construct_and_insert(&self, instance: Instance) -> KeeperResult<()> {
        let keeper = self
            .registry
            .build(
                &instance.keeper_kind,
                &instance.identifier,
                self.persistence.clone(),
                self.clock.clone(),
            )
            .await?;
        let identifier = instance.identifier.clone();
        self.tenants.insert(identifier, Tenant { instance, keeper });
        Ok(())
    }

    /// Resolve `identifier` to its live Keeper, enforcing the dispatch invariant (§4.6):
    /// `NoSuchInstance` if unknown, `InstanceFrozen` if frozen.
    pub fn dispatch(&self, identifier: &str) -> KeeperResult<Arc<dyn Keeper>> {
        let tenant = self
            .tenants
            .get(identifier)
            .ok_or_else(|| KeeperError::no_such_instance(identifier))?;
        if tenant.instance.is_frozen {
            return Err(KeeperError::instance_frozen(identifier));
        }
        Ok(tenant.keeper.clone())
    }

    /// `true` if `user_id` is in the in-memory frozen-user set (session short-circuit,
    /// §5/§4.12 — checked before touching persistence).
    #[must_use]
    pub fn is_user_frozen(&self, user_id: i64) -> bool {
        #[allow(clippy::unwrap_used)] // poisoned only on a prior panic while holding the lock
        self.frozen_users.read().unwrap().contains(&user_id)
    }

    /// A snapshot of every tenant's catalog row.
    #[must_use]
    pub fn list_instances(&self) -> Vec<Instance> {
        self.tenants.iter().map(|entry| entry.instance.clone()).collect()
    }

    /// The catalog row for `identifier`, if known.
    #[must_use]
    pub fn find_instance(&self, identifier: &str) -> Option<Instance> {
        self.tenants.get(identifier).map(|entry| entry.instance.clone())
    }

    /// Non-root users may only act on instances whose `users` CSV contains their id as
    /// an exact segment; root acts on everything (§4.6 User ACL).
    #[must_use]
    pub fn authorize(&self, actor: &User, identifier: &str) -> bool {
        if actor.is_root() {
            return true;
        }
        self.tenants
            .get(identifier)
            .is_some_and(|entry| entry.instance.has_user(&actor.acl_token()))
    }

    /// Create a new tenant, validating the identifier and rejecting duplicates, then
    /// constructing its Keeper. The creating user's id is added to the tenant's `users`.
    pub async fn create_instance(
        &self,
        identifier: &str,
        keeper_kind: &str,
        creator: &User,
    ) -> KeeperResult<Instance> {
        if !is_valid_identifier(identifier) {
            return Err(KeeperError::invalid_request(
                "identifier must match ^[\\w.+-]+$",
            ));
        }
        if self.tenants.contains_key(identifier) {
            return Err(KeeperError::instance_exist(identifier));
        }

        let row = self
            .persistence
            .create_instance_row(NewInstance {
                identifier: identifier.to_owned(),
                keeper_kind: keeper_kind.to_owned(),
                users: creator.acl_token(),
                d_safe_level: 0,
                ips: String::new(),
            })
            .await?;

        if let Err(err) = self.construct_and_insert(row.clone()).await {
            let _ = self.persistence.delete_instance_by_identifier(identifier).await;
            return Err(err);
        }
        Ok(row)
    }

    /// Freeze or unfreeze a tenant. Rejects on the `default` tenant.
    pub async fn set_instance_frozen(&self, identifier: &str, frozen: bool) -> KeeperResult<()> {
        if identifier == DEFAULT_IDENTIFIER {
            return Err(KeeperError::invalid_request("the default instance cannot be frozen"));
        }
        let mut tenant = self
            .tenants
            .get_mut(identifier)
            .ok_or_else(|| KeeperError::no_such_instance(identifier))?;
        self.persistence.update_instance_frozen(identifier, frozen).await?;
        tenant.instance.is_frozen = frozen;
        Ok(())
    }

    /// Destroy a tenant: delete its catalog row and all Keeper state transactionally,
    /// then evict the in-memory entry. Rejects on `default`.
    pub async fn destroy_instance(&self, identifier: &str) -> KeeperResult<()> {
        if identifier == DEFAULT_IDENTIFIER {
            return Err(KeeperError::invalid_request("the default instance cannot be destroyed"));
        }
        let keeper = self
            .tenants
            .get(identifier)
            .map(|entry| entry.keeper.clone())
            .ok_or_else(|| KeeperError::no_such_instance(identifier))?;
        keeper.destroy().await?;
        self.persistence.delete_instance_by_identifier(identifier).await?;
        self.tenants.remove(identifier);
        Ok(())
    }

    /// Freeze every non-default instance this user belongs to, then mark the user
    /// frozen in the in-memory short-circuit set (§4.6).
    pub async fn freeze_user(&self, user_id: i64) -> KeeperResult<()> {
        let token = user_id.to_string();
        let identifiers: Vec<String> = self
            .tenants
            .iter()
            .filter(|entry| !entry.instance.is_default() && entry.instance.has_user(&token))
            .map(|entry| entry.key().clone())
            .collect();
        for identifier in identifiers {
            self.set_instance_frozen(&identifier, true).await?;
        }
        self.persistence.update_user_frozen(user_id, true).await?;
        #[allow(clippy::unwrap_used)] // poisoned only on a prior panic while holding the lock
        self.frozen_users.write().unwrap().insert(user_id);
        Ok(())
    }

    /// Unfreeze a user: removes them from the short-circuit set. Instance-level freezes
    /// set by [`InstanceManager::freeze_user`] are left as an explicit admin decision.
    pub async fn unfreeze_user(&self, user_id: i64) -> KeeperResult<()> {
        self.persistence.update_user_frozen(user_id, false).await?;
        #[allow(clippy::unwrap_used)] // poisoned only on a prior panic while holding the lock
        self.frozen_users.write().unwrap().remove(&user_id);
        Ok(())
    }

    /// Access to the persistence handle for collaborators (web admin user management)
    /// that operate outside the tenant dispatch path.
    #[must_use]
    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.persistence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::keeper::registry::SAFER_KIND;
    use crate::persistence::MemoryPersistence;

    async fn manager() -> Arc<InstanceManager> {
        let persistence: Arc<dyn Persistence> = Arc::new(MemoryPersistence::new());
        let registry = Arc::new(KeeperRegistry::with_builtins());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        InstanceManager::start(persistence, registry, clock)
            .await
            .expect("startup succeeds")
    }

    #[tokio::test]
    async fn law11_default_instance_always_exists_after_startup() {
        let manager = manager().await;
        assert!(manager.find_instance(DEFAULT_IDENTIFIER).is_some());
    }

    #[tokio::test]
    async fn law12_duplicate_identifier_is_rejected() {
        let manager = manager().await;
        let root = manager
            .persistence()
            .find_user_by_name(ROOT_USERNAME)
            .await
            .expect("query succeeds")
            .expect("bootstrapped");
        manager
            .create_instance("acme", SAFER_KIND, &root)
            .await
            .expect("fresh identifier");
        let err = manager.create_instance("acme", SAFER_KIND, &root).await.unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::InstanceExist);
    }

    #[tokio::test]
    async fn dispatch_rejects_unknown_and_frozen_tenants() {
        let manager = manager().await;
        let err = manager.dispatch("ghost").unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::Request);

        let root = manager
            .persistence()
            .find_user_by_name(ROOT_USERNAME)
            .await
            .expect("query succeeds")
            .expect("bootstrapped");
        manager.create_instance("acme", SAFER_KIND, &root).await.expect("fresh identifier");
        manager.set_instance_frozen("acme", true).await.expect("freeze succeeds");
        let err = manager.dispatch("acme").unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::InstanceFrozen);
    }

    #[tokio::test]
    async fn default_instance_cannot_be_frozen_or_destroyed() {
        let manager = manager().await;
        assert!(manager.set_instance_frozen(DEFAULT_IDENTIFIER, true).await.is_err());
        assert!(manager.destroy_instance(DEFAULT_IDENTIFIER).await.is_err());
    }

    #[tokio::test]
    async fn non_root_user_is_scoped_to_their_own_instances() {
        let manager = manager().await;
        let member = manager
            .persistence()
            .create_user(NewUser {
                name: "alice".to_owned(),
                passwd_hash: crate::model::user::hash_password("secret"),
                level: 1,
            })
            .await
            .expect("fresh username");
        manager.create_instance("acme", SAFER_KIND, &member).await.expect("fresh identifier");
        assert!(manager.authorize(&member, "acme"));
        assert!(!manager.authorize(&member, DEFAULT_IDENTIFIER));
    }
}
