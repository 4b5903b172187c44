// ABOUTME: Abstract persistence port (C3) — the only interface the keeper core sees
// ABOUTME: Concrete backends: SQLite (default), PostgreSQL, and an in-memory test double
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! The keeper core never talks to a database driver directly. Every Keeper and the
//! Instance manager hold a `Arc<dyn Persistence>` and go through this trait, mirroring
//! the reference stack's `DatabaseProvider` abstraction (`database_plugins::mod`) but
//! scoped to exactly the operations §4.3 names.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "sqlite")]
mod sqlite;

use crate::errors::KeeperResult;
use crate::model::{Instance, KeyRecord, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::MemoryPersistence;
#[cfg(feature = "postgres")]
pub use postgres::PostgresPersistence;
#[cfg(feature = "sqlite")]
pub use sqlite::SqlitePersistence;

/// A freshly-generated tenant MainKey row, as returned by `find_main_key` /
/// inserted by `create_main_key`.
#[derive(Debug, Clone)]
pub struct MainKeyRow {
    /// Tenant id this key belongs to.
    pub identifier: String,
    /// 32 raw secret bytes.
    pub key: Vec<u8>,
}

/// Fields required to insert a new `Instance` row. `id` is assigned by the backend.
#[derive(Debug, Clone)]
pub struct NewInstance {
    /// Tenant identifier.
    pub identifier: String,
    /// Keeper kind name.
    pub keeper_kind: String,
    /// Initial CSV user membership.
    pub users: String,
    /// Opaque safety level, carried through unchanged.
    pub d_safe_level: i64,
    /// Opaque IP allow-list, carried through unchanged.
    pub ips: String,
}

/// Fields required to insert a new `KeyRecord` row.
#[derive(Debug, Clone)]
pub struct NewKeyRecord {
    /// Client-chosen key id.
    pub id: u64,
    /// Owning tenant.
    pub identifier: String,
    /// Derived length in bytes.
    pub length: u32,
    /// Algorithm name.
    pub algorithm: String,
    /// Rotation period in whole seconds.
    pub rotation: u64,
    /// 32 bytes of per-key randomness.
    pub salt: Vec<u8>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Fields required to insert a new `User` row.
#[derive(Debug, Clone)]
pub struct NewUser {
    /// Unique username.
    pub name: String,
    /// SHA-256 hex digest of the password.
    pub passwd_hash: String,
    /// Privilege level; `0` denotes root.
    pub level: i64,
}

/// The abstract persistence port consumed by the keeper core (§4.3).
///
/// Implementations run schema migration exactly once per process, guarded by a
/// one-shot latch (`migrate`); every other method assumes the schema already exists.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Run schema migration. Idempotent; safe to call multiple times, but the core
    /// only ever calls it through the one-shot latch in [`crate::manager::InstanceManager`]
    /// and [`crate::keeper::safer::SaferKeeper`] construction.
    async fn migrate(&self) -> KeeperResult<()>;

    // -- instances -----------------------------------------------------

    /// Find an instance row by identifier.
    async fn find_instance_by_identifier(&self, identifier: &str)
        -> KeeperResult<Option<Instance>>;

    /// Insert a new instance row, returning the assigned id.
    async fn create_instance_row(&self, new: NewInstance) -> KeeperResult<Instance>;

    /// List every instance, ordered by id ascending.
    async fn list_instances(&self) -> KeeperResult<Vec<Instance>>;

    /// Delete the instance row by identifier.
    async fn delete_instance_by_identifier(&self, identifier: &str) -> KeeperResult<()>;

    /// Update the frozen flag for an instance.
    async fn update_instance_frozen(&self, identifier: &str, frozen: bool) -> KeeperResult<()>;

    /// Persist a user-membership change for the instance (add/remove from the CSV).
    async fn update_instance_users(&self, identifier: &str, users: &str) -> KeeperResult<()>;

    // -- main keys (t_safer_instances) ----------------------------------

    /// Find the tenant MainKey row, if bootstrapped.
    async fn find_main_key(&self, identifier: &str) -> KeeperResult<Option<MainKeyRow>>;

    /// Insert a new MainKey row. Fails if one already exists for `identifier`.
    async fn create_main_key(&self, identifier: &str, key: &[u8]) -> KeeperResult<()>;

    /// Delete the MainKey row for `identifier`, as part of `Destroy`.
    async fn delete_main_key(&self, identifier: &str) -> KeeperResult<()>;

    // -- key records (t_safer_keys) --------------------------------------

    /// Insert a new key record. Fails on `(identifier, id)` collision.
    async fn create_key_row(&self, new: NewKeyRecord) -> KeeperResult<()>;

    /// Load a single key record.
    async fn find_key(&self, identifier: &str, id: u64) -> KeeperResult<Option<KeyRecord>>;

    /// List key records for a tenant, paged. `offset < 0` coerces to `0`; `limit == 0`
    /// means "no limit". Returns the page and the total row count ignoring paging.
    async fn list_keys_for_tenant(
        &self,
        identifier: &str,
        offset: i64,
        limit: i64,
    ) -> KeeperResult<(Vec<KeyRecord>, i64)>;

    /// Delete a single key record. Missing rows are not an error (§4.4).
    async fn delete_key(&self, identifier: &str, id: u64) -> KeeperResult<()>;

    /// Delete every key record for a tenant, as part of `Destroy`.
    async fn delete_all_keys_for_tenant(&self, identifier: &str) -> KeeperResult<()>;

    /// Delete the MainKey row and every key record for a tenant in one transaction
    /// (§4.4 `Destroy`, §5 atomicity, S5).
    async fn destroy_tenant(&self, identifier: &str) -> KeeperResult<()>;

    // -- users (t_manager_users, collaborator) ---------------------------

    /// Find a user account by username.
    async fn find_user_by_name(&self, name: &str) -> KeeperResult<Option<User>>;

    /// Find a user account by id.
    async fn find_user_by_id(&self, id: i64) -> KeeperResult<Option<User>>;

    /// Insert a new user account.
    async fn create_user(&self, new: NewUser) -> KeeperResult<User>;

    /// List every user account.
    async fn list_users(&self) -> KeeperResult<Vec<User>>;

    /// Update the frozen flag for a user.
    async fn update_user_frozen(&self, id: i64, frozen: bool) -> KeeperResult<()>;

    /// Update a user's password hash.
    async fn update_password_hash(&self, id: i64, passwd_hash: &str) -> KeeperResult<()>;

    /// Record a successful login.
    async fn touch_login(&self, id: i64, ip: &str, at: DateTime<Utc>) -> KeeperResult<()>;
}
