// ABOUTME: Instance (tenant catalog entry) model and CSV user-membership helpers
// ABOUTME: Grounded in original_source/model/instance.go's AddUser/DeleteUser/HasUser
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The reserved identifier that always exists after manager startup.
pub const DEFAULT_IDENTIFIER: &str = "default";

/// Tenant catalog entry (`t_manager_instances`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    /// Row id.
    pub id: i64,
    /// Globally unique tenant identifier, matches `^[\w.+-]+$`.
    pub identifier: String,
    /// Name of the registered Keeper kind backing this tenant.
    pub keeper_kind: String,
    /// Comma-separated user id membership list. No member contains a comma.
    pub users: String,
    /// Opaque tenant safety level, carried through from the original schema.
    pub d_safe_level: i64,
    /// Opaque allow-listed IP set, carried through from the original schema.
    pub ips: String,
    /// Whether the tenant is currently frozen.
    pub is_frozen: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Instance {
    /// `true` if this is the reserved `default` tenant, which can never be frozen or
    /// destroyed.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.identifier == DEFAULT_IDENTIFIER
    }

    /// Authoritative membership check: the CSV is split on `,` and compared
    /// segment-for-segment. A SQL `LIKE` pre-filter upstream of this check is only an
    /// optimization; this is the check that decides ACL outcomes, avoiding the
    /// substring false positive of id `"1"` matching id `"10"`.
    #[must_use]
    pub fn has_user(&self, user_id: &str) -> bool {
        self.users.split(',').any(|segment| segment == user_id)
    }

    /// Add `user_id` to the CSV if not already present. No-op if already a member.
    pub fn add_user(&mut self, user_id: &str) {
        if self.has_user(user_id) {
            return;
        }
        if self.users.is_empty() {
            self.users = user_id.to_owned();
        } else {
            self.users.push(',');
            self.users.push_str(user_id);
        }
    }

    /// Remove `user_id` from the CSV if present.
    pub fn delete_user(&mut self, user_id: &str) {
        self.users = self
            .users
            .split(',')
            .filter(|segment| *segment != user_id)
            .collect::<Vec<_>>()
            .join(",");
    }
}

/// `^[\w.+-]+$` — validates a candidate tenant identifier. Go's `\w` (and
/// `original_source`'s validation) is ASCII-only (`[0-9A-Za-z_]`), so this rejects
/// Unicode letters/digits that `char::is_alphanumeric` would otherwise admit.
#[must_use]
pub fn is_valid_identifier(identifier: &str) -> bool {
    !identifier.is_empty()
        && identifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '+' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(users: &str) -> Instance {
        Instance {
            id: 1,
            identifier: "acme".to_owned(),
            keeper_kind: "safer".to_owned(),
            users: users.to_owned(),
            d_safe_level: 0,
            ips: String::new(),
            is_frozen: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn has_user_is_exact_segment_match() {
        let inst = instance("1,10,2");
        assert!(inst.has_user("1"));
        assert!(inst.has_user("10"));
        assert!(!inst.has_user("100"));
        assert!(!inst.has_user("0"));
    }

    #[test]
    fn add_user_is_idempotent() {
        let mut inst = instance("1");
        inst.add_user("1");
        assert_eq!(inst.users, "1");
        inst.add_user("2");
        assert_eq!(inst.users, "1,2");
    }

    #[test]
    fn delete_user_removes_exact_segment_only() {
        let mut inst = instance("1,10,2");
        inst.delete_user("1");
        assert_eq!(inst.users, "10,2");
    }

    #[test]
    fn identifier_validation() {
        assert!(is_valid_identifier("default"));
        assert!(is_valid_identifier("acme-corp.v2+beta"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("has space"));
        assert!(!is_valid_identifier("has/slash"));
        assert!(!is_valid_identifier("café"));
        assert!(!is_valid_identifier("π"));
    }

    #[test]
    fn default_is_reserved() {
        let mut inst = instance("root");
        assert!(!inst.is_default());
        inst.identifier = DEFAULT_IDENTIFIER.to_owned();
        assert!(inst.is_default());
    }
}
