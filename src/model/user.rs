// ABOUTME: User model for the web-admin collaborator (C13)
// ABOUTME: Supplemented from original_source/model/user.go — SHA-256 password hashing, root bootstrap
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The bootstrap administrative username created alongside the `default` instance.
pub const ROOT_USERNAME: &str = "root";

/// A web-admin account (`t_manager_users`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Row id; doubles as the ACL membership token stored in `Instance::users`.
    pub id: i64,
    /// Unique username.
    pub name: String,
    /// SHA-256 hex digest of the password.
    #[serde(skip_serializing)]
    pub passwd_hash: String,
    /// Privilege level; `0` denotes root.
    pub level: i64,
    /// Whether the account is frozen.
    pub is_frozen: bool,
    /// Last successful login timestamp.
    pub last_login: Option<DateTime<Utc>>,
    /// Last login source address.
    pub last_ip: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// `true` for the bootstrap root account.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.level == 0
    }

    /// The ACL membership token for this user, as stored in `Instance::users`.
    #[must_use]
    pub fn acl_token(&self) -> String {
        self.id.to_string()
    }
}

/// SHA-256 hex digest of `password`, matching the original's hashing scheme.
#[must_use]
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-shape comparison against a stored hash. `Sha256` digests are fixed-length
/// hex strings so a straightforward equality check does not leak timing information
/// proportional to a variable-length secret.
#[must_use]
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    hash_password(password) == stored_hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_is_deterministic() {
        assert_eq!(hash_password("hunter2"), hash_password("hunter2"));
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let hash = hash_password("correct horse battery staple");
        assert!(verify_password("correct horse battery staple", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn root_level_is_zero() {
        let user = User {
            id: 1,
            name: ROOT_USERNAME.to_owned(),
            passwd_hash: hash_password("root"),
            level: 0,
            is_frozen: false,
            last_login: None,
            last_ip: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(user.is_root());
        assert_eq!(user.acl_token(), "1");
    }
}
