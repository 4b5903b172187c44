// ABOUTME: In-memory persistence backend for C14 test tooling
// ABOUTME: A Mutex-guarded set of maps behind the Persistence trait, no database required
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use super::{MainKeyRow, NewInstance, NewKeyRecord, NewUser, Persistence};
use crate::errors::KeeperError;
use crate::errors::KeeperResult;
use crate::model::{Instance, KeyRecord, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Default)]
struct State {
    instances: BTreeMap<i64, Instance>,
    next_instance_id: i64,
    main_keys: BTreeMap<String, Vec<u8>>,
    keys: BTreeMap<(String, u64), KeyRecord>,
    users: BTreeMap<i64, User>,
    next_user_id: i64,
}

/// Fully in-process persistence backend. Intended for fast unit tests of C1/C4/C6;
/// never used in production.
#[derive(Default)]
pub struct MemoryPersistence {
    state: Mutex<State>,
}

impl MemoryPersistence {
    /// Build an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::unwrap_used)] // in-memory test double; poisoning is a test bug
    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn migrate(&self) -> KeeperResult<()> {
        Ok(())
    }

    async fn find_instance_by_identifier(
        &self,
        identifier: &str,
    ) -> KeeperResult<Option<Instance>> {
        Ok(self
            .lock()
            .instances
            .values()
            .find(|i| i.identifier == identifier)
            .cloned())
    }

    async fn create_instance_row(&self, new: NewInstance) -> KeeperResult<Instance> {
        let mut state = self.lock();
        if state.instances.values().any(|i| i.identifier == new.identifier) {
            return Err(KeeperError::instance_exist(&new.identifier));
        }
        state.next_instance_id += 1;
        let id = state.next_instance_id;
        let instance = Instance {
            id,
            identifier: new.identifier,
            keeper_kind: new.keeper_kind,
            users: new.users,
            d_safe_level: new.d_safe_level,
            ips: new.ips,
            is_frozen: false,
            created_at: Utc::now(),
        };
        state.instances.insert(id, instance.clone());
        Ok(instance)
    }

    async fn list_instances(&self) -> KeeperResult<Vec<Instance>> {
        Ok(self.lock().instances.values().cloned().collect())
    }

    async fn delete_instance_by_identifier(&self, identifier: &str) -> KeeperResult<()> {
        self.lock().instances.retain(|_, i| i.identifier != identifier);
        Ok(())
    }

    async fn update_instance_frozen(&self, identifier: &str, frozen: bool) -> KeeperResult<()> {
        let mut state = self.lock();
        if let Some(instance) = state
            .instances
            .values_mut()
            .find(|i| i.identifier == identifier)
        {
            instance.is_frozen = frozen;
        }
        Ok(())
    }

    async fn update_instance_users(&self, identifier: &str, users: &str) -> KeeperResult<()> {
        let mut state = self.lock();
        if let Some(instance) = state
            .instances
            .values_mut()
            .find(|i| i.identifier == identifier)
        {
            instance.users = users.to_owned();
        }
        Ok(())
    }

    async fn find_main_key(&self, identifier: &str) -> KeeperResult<Option<MainKeyRow>> {
        Ok(self
            .lock()
            .main_keys
            .get(identifier)
            .map(|key| MainKeyRow {
                identifier: identifier.to_owned(),
                key: key.clone(),
            }))
    }

    async fn create_main_key(&self, identifier: &str, key: &[u8]) -> KeeperResult<()> {
        let mut state = self.lock();
        if state.main_keys.contains_key(identifier) {
            return Err(KeeperError::unknown("main key already exists"));
        }
        state.main_keys.insert(identifier.to_owned(), key.to_vec());
        Ok(())
    }

    async fn delete_main_key(&self, identifier: &str) -> KeeperResult<()> {
        self.lock().main_keys.remove(identifier);
        Ok(())
    }

    async fn create_key_row(&self, new: NewKeyRecord) -> KeeperResult<()> {
        let mut state = self.lock();
        let key = (new.identifier.clone(), new.id);
        if state.keys.contains_key(&key) {
            return Err(KeeperError::invalid_request("key id already exists"));
        }
        state.keys.insert(
            key,
            KeyRecord {
                id: new.id,
                identifier: new.identifier,
                length: new.length,
                algorithm: new.algorithm,
                rotation: new.rotation,
                salt: new.salt,
                created_at: new.created_at,
            },
        );
        Ok(())
    }

    async fn find_key(&self, identifier: &str, id: u64) -> KeeperResult<Option<KeyRecord>> {
        Ok(self
            .lock()
            .keys
            .get(&(identifier.to_owned(), id))
            .cloned())
    }

    async fn list_keys_for_tenant(
        &self,
        identifier: &str,
        offset: i64,
        limit: i64,
    ) -> KeeperResult<(Vec<KeyRecord>, i64)> {
        let state = self.lock();
        let mut rows: Vec<KeyRecord> = state
            .keys
            .values()
            .filter(|k| k.identifier == identifier)
            .cloned()
            .collect();
        rows.sort_by_key(|k| k.id);
        let total = rows.len() as i64;
        let offset = offset.max(0) as usize;
        let page: Vec<KeyRecord> = if limit == 0 {
            rows.into_iter().skip(offset).collect()
        } else {
            rows.into_iter().skip(offset).take(limit as usize).collect()
        };
        Ok((page, total))
    }

    async fn delete_key(&self, identifier: &str, id: u64) -> KeeperResult<()> {
        self.lock().keys.remove(&(identifier.to_owned(), id));
        Ok(())
    }

    async fn delete_all_keys_for_tenant(&self, identifier: &str) -> KeeperResult<()> {
        self.lock().keys.retain(|(ident, _), _| ident != identifier);
        Ok(())
    }

    async fn destroy_tenant(&self, identifier: &str) -> KeeperResult<()> {
        let mut state = self.lock();
        state.main_keys.remove(identifier);
        state.keys.retain(|(ident, _), _| ident != identifier);
        Ok(())
    }

    async fn find_user_by_name(&self, name: &str) -> KeeperResult<Option<User>> {
        Ok(self.lock().users.values().find(|u| u.name == name).cloned())
    }

    async fn find_user_by_id(&self, id: i64) -> KeeperResult<Option<User>> {
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn create_user(&self, new: NewUser) -> KeeperResult<User> {
        let mut state = self.lock();
        if state.users.values().any(|u| u.name == new.name) {
            return Err(KeeperError::user_exist(&new.name));
        }
        state.next_user_id += 1;
        let id = state.next_user_id;
        let now = Utc::now();
        let user = User {
            id,
            name: new.name,
            passwd_hash: new.passwd_hash,
            level: new.level,
            is_frozen: false,
            last_login: None,
            last_ip: None,
            created_at: now,
            updated_at: now,
        };
        state.users.insert(id, user.clone());
        Ok(user)
    }

    async fn list_users(&self) -> KeeperResult<Vec<User>> {
        Ok(self.lock().users.values().cloned().collect())
    }

    async fn update_user_frozen(&self, id: i64, frozen: bool) -> KeeperResult<()> {
        let mut state = self.lock();
        if let Some(user) = state.users.get_mut(&id) {
            user.is_frozen = frozen;
            user.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_password_hash(&self, id: i64, passwd_hash: &str) -> KeeperResult<()> {
        let mut state = self.lock();
        if let Some(user) = state.users.get_mut(&id) {
            user.passwd_hash = passwd_hash.to_owned();
            user.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn touch_login(&self, id: i64, ip: &str, at: DateTime<Utc>) -> KeeperResult<()> {
        let mut state = self.lock();
        if let Some(user) = state.users.get_mut(&id) {
            user.last_login = Some(at);
            user.last_ip = Some(ip.to_owned());
        }
        Ok(())
    }
}
