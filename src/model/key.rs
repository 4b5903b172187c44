// ABOUTME: KeyRecord/KeyInfo model and the versionAt/nextTimeoutOf pure functions (§4.4)
// ABOUTME: Grounded in original_source/keeper/safer/model.go's ModelKey version math
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The version number is clamped to this ceiling per §4.4.
const MAX_VERSION: u64 = u32::MAX as u64;

/// A registered key under a tenant (`t_safer_keys`). Composite primary key is
/// `(identifier, id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Client-chosen id, unique within the tenant, range `[1, 2^32-1]`.
    pub id: u64,
    /// Tenant id (part of the composite primary key).
    pub identifier: String,
    /// Derived key length in bytes, one of 16/24/32.
    pub length: u32,
    /// Opaque algorithm name; must begin with `"aes"`.
    pub algorithm: String,
    /// Rotation period in whole seconds; `0` disables rotation.
    pub rotation: u64,
    /// 32 bytes of per-key randomness, fixed at creation.
    pub salt: Vec<u8>,
    /// Creation timestamp; the origin of all version math.
    pub created_at: DateTime<Utc>,
}

impl KeyRecord {
    /// `versionAt(t)` — §4.4. `rotation == 0` always yields version 1.
    #[must_use]
    pub fn version_at(&self, t: DateTime<Utc>) -> u64 {
        version_at(self.created_at, self.rotation, t)
    }

    /// `nextTimeoutOf(v)` — §4.4. `rotation == 0` always yields `0`.
    #[must_use]
    pub fn next_timeout_of(&self, version: u64) -> i64 {
        next_timeout_of(self.created_at, self.rotation, version)
    }

    /// `nextTimeoutAt(t) = nextTimeoutOf(versionAt(t))`.
    #[must_use]
    pub fn next_timeout_at(&self, t: DateTime<Utc>) -> i64 {
        self.next_timeout_of(self.version_at(t))
    }
}

/// `versionAt(t)`: `rotation == 0 -> 1`; otherwise
/// `1 + floor(floor((t - created_at) / 1s) / rotation)`, clamped to `2^32-1`.
#[must_use]
pub fn version_at(created_at: DateTime<Utc>, rotation: u64, t: DateTime<Utc>) -> u64 {
    if rotation == 0 {
        return 1;
    }
    let passed_seconds = (t - created_at).num_seconds().max(0) as u64;
    let v = 1 + passed_seconds / rotation;
    v.min(MAX_VERSION)
}

/// `nextTimeoutOf(v)`: `rotation == 0 -> 0`; otherwise the Unix timestamp of
/// `created_at + v * rotation` seconds.
#[must_use]
pub fn next_timeout_of(created_at: DateTime<Utc>, rotation: u64, version: u64) -> i64 {
    if rotation == 0 {
        return 0;
    }
    created_at.timestamp() + (version as i64) * (rotation as i64)
}

/// Computed, never-persisted view of a key at a point in time (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyInfo {
    /// Key id.
    pub id: u64,
    /// Version this `key` was derived under.
    pub version: u64,
    /// Hex-encoded derived bytes. Empty when content was not requested (`FilterKeys`).
    #[serde(rename = "key")]
    pub key_hex: String,
    /// Derived length in bytes.
    pub length: u32,
    /// Algorithm name, passed through unchanged.
    pub algorithm: String,
    /// Unix timestamp at which `version` expires; `0` means "never" (no rotation).
    pub timeout: i64,
}

/// Inner-server request body: `{"id": uint, "version": uint}`. `version == 0` means
/// "current".
#[derive(Debug, Clone, Deserialize)]
pub struct KeyRequest {
    /// Key id to look up.
    pub id: u64,
    /// Requested version; `0` resolves to the current version.
    #[serde(default)]
    pub version: u64,
}

/// Inner-server request body for `DistributeKey`. `rotation_time` is transmitted in
/// nanoseconds but persisted and interpreted as whole seconds (§4.8); fractional
/// seconds truncate toward zero.
#[derive(Debug, Clone, Deserialize)]
pub struct DistributeRequest {
    /// Client-chosen key id, must be in `[1, 2^32-1]`.
    pub id: u64,
    /// Desired derived length in bytes; must be one of 16/24/32.
    pub length: u32,
    /// Algorithm name; must begin with `"aes"`.
    pub algorithm: String,
    /// Rotation period, nanoseconds on the wire.
    #[serde(rename = "rotationTime", default)]
    pub rotation_time: u64,
}

impl DistributeRequest {
    /// Rotation period truncated to whole seconds, per §4.8.
    #[must_use]
    pub fn rotation_seconds(&self) -> u64 {
        self.rotation_time / 1_000_000_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(s: &str) -> DateTime<Utc> {
        chrono::DateTime::parse_from_rfc3339(s)
            .expect("valid literal in test")
            .with_timezone(&Utc)
    }

    #[test]
    fn law4_no_rotation() {
        let created = at("2025-01-01T00:00:00Z");
        assert_eq!(version_at(created, 0, at("2030-01-01T00:00:00Z")), 1);
        assert_eq!(next_timeout_of(created, 0, 1), 0);
    }

    #[test]
    fn law5_version_at_creation_is_one() {
        let created = at("2025-01-01T00:00:00Z");
        assert_eq!(version_at(created, 60, created), 1);
    }

    #[test]
    fn s3_rotation_window() {
        let created = at("2025-01-01T00:00:00Z");
        assert_eq!(version_at(created, 60, at("2025-01-01T00:00:59Z")), 1);
        assert_eq!(version_at(created, 60, at("2025-01-01T00:01:00Z")), 2);
        assert_eq!(
            next_timeout_of(created, 60, 2),
            at("2025-01-01T00:02:00Z").timestamp()
        );
    }

    #[test]
    fn law6_and_7_window_boundaries() {
        let created = at("2025-01-01T00:00:00Z");
        let rotation = 60u64;
        for k in 1..=5u64 {
            let just_before = created + chrono::Duration::seconds((k * rotation) as i64)
                - chrono::Duration::nanoseconds(1);
            assert_eq!(version_at(created, rotation, just_before), k);
            let at_boundary = created + chrono::Duration::seconds((k * rotation) as i64);
            assert_eq!(version_at(created, rotation, at_boundary), 1 + k);
        }
    }

    #[test]
    fn law8_monotone_non_decreasing() {
        let created = at("2025-01-01T00:00:00Z");
        let mut last = version_at(created, 30, created);
        for secs in (0..3600).step_by(7) {
            let t = created + chrono::Duration::seconds(secs);
            let v = version_at(created, 30, t);
            assert!(v >= last);
            last = v;
        }
    }

    #[test]
    fn law9_saturates_at_u32_max() {
        let created = Utc.timestamp_opt(0, 0).single().expect("valid epoch");
        let far_future = created + chrono::Duration::days(365 * 300);
        assert_eq!(version_at(created, 1, far_future), MAX_VERSION);
    }

    #[test]
    fn law10_next_timeout_equals_created_plus_v_times_rotation() {
        let created = at("2025-06-01T00:00:00Z");
        let rotation = 3600u64;
        let v = 5u64;
        assert_eq!(
            next_timeout_of(created, rotation, v),
            created.timestamp() + (v * rotation) as i64
        );
    }

    #[test]
    fn distribute_request_truncates_rotation_to_whole_seconds() {
        let req = DistributeRequest {
            id: 1,
            length: 16,
            algorithm: "aes-cbc".to_owned(),
            rotation_time: 2_999_999_999,
        };
        assert_eq!(req.rotation_seconds(), 2);
    }
}
