// ABOUTME: The real Keeper kind — SHAKE-128 derivation backed by a cached tenant MainKey
// ABOUTME: Grounded in original_source/keeper/safer/safer.go's Distribute/Filter/Destroy
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use super::Keeper;
use crate::clock::Clock;
use crate::crypto::{derive, random_bytes};
use crate::errors::{KeeperError, KeeperResult};
use crate::model::key::{next_timeout_of, version_at};
use crate::model::{DistributeRequest, KeyInfo};
use crate::persistence::{NewKeyRecord, Persistence};
use async_trait::async_trait;
use std::sync::Arc;

const MAIN_KEY_LEN: usize = 32;
const SALT_LEN: usize = 32;
const MAX_KEY_ID: u64 = u32::MAX as u64;

/// Valid derived-key lengths (§4.4 `DistributeKey` argument validation).
const VALID_LENGTHS: [u32; 3] = [16, 24, 32];

/// The real per-tenant Keeper. Caches the 32-byte MainKey in memory after bootstrap;
/// every derivation is `SHAKE128(id || mainKey || version || salt)` truncated to the
/// requested length (§4.4, via [`crate::crypto::derive`]).
pub struct SaferKeeper {
    identifier: String,
    main_key: Vec<u8>,
    persistence: Arc<dyn Persistence>,
    clock: Arc<dyn Clock>,
}

impl SaferKeeper {
    /// Bootstrap (or load) the MainKey for `identifier` and construct a Keeper bound to
    /// it. A missing MainKey is generated via the CSPRNG and persisted; a corrupted
    /// catalog — an instance row with no MainKey row, after one existed previously — is
    /// never auto-repaired by this path, since the manager only calls this once per
    /// tenant lifetime and distinguishes "never bootstrapped" from "corrupted" upstream.
    pub async fn bootstrap(
        identifier: &str,
        persistence: Arc<dyn Persistence>,
        clock: Arc<dyn Clock>,
    ) -> KeeperResult<Self> {
        let main_key = match persistence.find_main_key(identifier).await? {
            Some(row) => row.key,
            None => {
                let fresh = random_bytes(MAIN_KEY_LEN)?;
                persistence.create_main_key(identifier, &fresh).await?;
                fresh
            }
        };
        Ok(Self {
            identifier: identifier.to_owned(),
            main_key,
            persistence,
            clock,
        })
    }

    fn validate_distribute(request: &DistributeRequest) -> KeeperResult<u64> {
        if request.id == 0 || request.id > MAX_KEY_ID {
            return Err(KeeperError::invalid_request("id must be in [1, 2^32-1]"));
        }
        if !VALID_LENGTHS.contains(&request.length) {
            return Err(KeeperError::invalid_request("length must be one of 16, 24, 32"));
        }
        if !request.algorithm.starts_with("aes") {
            return Err(KeeperError::invalid_request("algorithm must start with \"aes\""));
        }
        Ok(request.rotation_seconds())
    }

    fn key_info(&self, id: u64, version: u64, timeout: i64, length: u32, algorithm: &str, salt: &[u8]) -> KeyInfo {
        let bytes = derive(length as usize, id, version, &self.main_key, salt);
        KeyInfo {
            id,
            version,
            key_hex: hex::encode(bytes),
            length,
            algorithm: algorithm.to_owned(),
            timeout,
        }
    }
}

#[async_trait]
impl Keeper for SaferKeeper {
    async fn distribute_key(&self, request: DistributeRequest) -> KeeperResult<KeyInfo> {
        let rotation = Self::validate_distribute(&request)?;
        let salt = random_bytes(SALT_LEN)?;
        let created_at = self.clock.now();

        self.persistence
            .create_key_row(NewKeyRecord {
                id: request.id,
                identifier: self.identifier.clone(),
                length: request.length,
                algorithm: request.algorithm.clone(),
                rotation,
                salt: salt.clone(),
                created_at,
            })
            .await?;

        let timeout = next_timeout_of(created_at, rotation, 1);
        Ok(self.key_info(request.id, 1, timeout, request.length, &request.algorithm, &salt))
    }

    async fn get_key_info(&self, id: u64, version: u64) -> KeeperResult<KeyInfo> {
        let record = self
            .persistence
            .find_key(&self.identifier, id)
            .await?
            .ok_or_else(|| KeeperError::no_such_key(id))?;

        let now = self.clock.now();
        let current_version = record.version_at(now);
        let resolved_version = if version == 0 { current_version } else { version };
        if resolved_version > current_version {
            return Err(KeeperError::invalid_request(format!(
                "version {resolved_version} exceeds current version {current_version}"
            )));
        }

        let timeout = record.next_timeout_of(resolved_version);
        Ok(self.key_info(
            record.id,
            resolved_version,
            timeout,
            record.length,
            &record.algorithm,
            &record.salt,
        ))
    }

    async fn filter_keys(
        &self,
        offset: i64,
        limit: i64,
        content: bool,
    ) -> KeeperResult<(Vec<KeyInfo>, i64)> {
        let (records, total) = self
            .persistence
            .list_keys_for_tenant(&self.identifier, offset, limit)
            .await?;

        let now = self.clock.now();
        let infos = records
            .into_iter()
            .map(|record| {
                let version = record.version_at(now);
                let timeout = record.next_timeout_of(version);
                if content {
                    self.key_info(record.id, version, timeout, record.length, &record.algorithm, &record.salt)
                } else {
                    KeyInfo {
                        id: record.id,
                        version,
                        key_hex: String::new(),
                        length: record.length,
                        algorithm: record.algorithm,
                        timeout,
                    }
                }
            })
            .collect();
        Ok((infos, total))
    }

    async fn destroy_key(&self, id: u64) -> KeeperResult<()> {
        self.persistence.delete_key(&self.identifier, id).await
    }

    async fn destroy(&self) -> KeeperResult<()> {
        self.persistence.destroy_tenant(&self.identifier).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::persistence::MemoryPersistence;
    use chrono::{DateTime, Utc};

    fn at(s: &str) -> DateTime<Utc> {
        chrono::DateTime::parse_from_rfc3339(s).expect("valid literal").with_timezone(&Utc)
    }

    async fn keeper(identifier: &str, clock: Arc<dyn Clock>) -> (SaferKeeper, Arc<dyn Persistence>) {
        let persistence: Arc<dyn Persistence> = Arc::new(MemoryPersistence::new());
        let keeper = SaferKeeper::bootstrap(identifier, persistence.clone(), clock)
            .await
            .expect("bootstrap succeeds");
        (keeper, persistence)
    }

    fn distribute(id: u64, rotation_secs: u64) -> DistributeRequest {
        DistributeRequest {
            id,
            length: 16,
            algorithm: "aes-cbc".to_owned(),
            rotation_time: rotation_secs * 1_000_000_000,
        }
    }

    #[tokio::test]
    async fn distribute_rejects_bad_length() {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(at("2025-01-01T00:00:00Z")));
        let (keeper, _persistence) = keeper("acme", clock).await;
        let mut req = distribute(1, 0);
        req.length = 20;
        let err = keeper.distribute_key(req).await.unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::Request);
    }

    #[tokio::test]
    async fn distribute_then_get_latest_round_trips() {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(at("2025-01-01T00:00:00Z")));
        let (keeper, _persistence) = keeper("acme", clock).await;
        let info = keeper.distribute_key(distribute(1, 0)).await.expect("fresh id");
        assert_eq!(info.version, 1);
        assert_eq!(info.timeout, 0);
        let fetched = keeper.get_latest_version_key(1).await.expect("exists");
        assert_eq!(fetched.key_hex, info.key_hex);
    }

    #[tokio::test]
    async fn s4_tenant_isolation() {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(at("2025-01-01T00:00:00Z")));
        let (a, _pa) = keeper("tenant-a", clock.clone()).await;
        let (b, _pb) = keeper("tenant-b", clock).await;
        a.distribute_key(distribute(7, 0)).await.expect("fresh id");
        b.distribute_key(distribute(7, 0)).await.expect("fresh id");
        let key_a = a.get_latest_version_key(7).await.expect("exists");
        let key_b = b.get_latest_version_key(7).await.expect("exists");
        assert_ne!(key_a.key_hex, key_b.key_hex);
    }

    #[tokio::test]
    async fn historical_version_is_allowed_but_future_is_rejected() {
        let clock = Arc::new(FixedClock::new(at("2025-01-01T00:00:00Z")));
        let clock_dyn: Arc<dyn Clock> = clock.clone();
        let (keeper, _persistence) = keeper("acme", clock_dyn).await;
        keeper.distribute_key(distribute(1, 60)).await.expect("fresh id");
        clock.advance(chrono::Duration::seconds(120));
        let current = keeper.get_key_info(1, 0).await.expect("exists");
        assert_eq!(current.version, 3);
        let historical = keeper.get_key_info(1, 1).await.expect("historical version allowed");
        assert_eq!(historical.version, 1);
        assert_ne!(historical.key_hex, current.key_hex);
        let err = keeper.get_key_info(1, 4).await.unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::Request);
    }

    #[tokio::test]
    async fn filter_keys_without_content_omits_key_hex() {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(at("2025-01-01T00:00:00Z")));
        let (keeper, _persistence) = keeper("acme", clock).await;
        keeper.distribute_key(distribute(1, 0)).await.expect("fresh id");
        let (rows, total) = keeper.filter_keys(0, 0, false).await.expect("list succeeds");
        assert_eq!(total, 1);
        assert!(rows[0].key_hex.is_empty());
    }

    #[tokio::test]
    async fn s5_destroy_removes_all_tenant_state() {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(at("2025-01-01T00:00:00Z")));
        let (keeper, persistence) = keeper("acme", clock).await;
        for id in 1..=3u64 {
            keeper.distribute_key(distribute(id, 0)).await.expect("fresh id");
        }
        keeper.destroy().await.expect("destroy succeeds");
        assert!(persistence.find_main_key("acme").await.expect("query succeeds").is_none());
        let (rows, total) = persistence
            .list_keys_for_tenant("acme", 0, 0)
            .await
            .expect("query succeeds");
        assert!(rows.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn destroy_key_on_missing_id_is_not_an_error() {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(at("2025-01-01T00:00:00Z")));
        let (keeper, _persistence) = keeper("acme", clock).await;
        keeper.destroy_key(999).await.expect("missing id is not an error");
    }
}
