// ABOUTME: Centralized error handling and the stable wire error taxonomy
// ABOUTME: Defines KeeperError, its numeric wire codes, and the axum response envelope
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! # Unified Error Handling System
//!
//! `KeeperError` is the single error type threaded through the keeper core. Its wire
//! representation is the numeric code table from the specification (`ErrorCode`); every
//! HTTP response on both the inner and web-admin servers uses the same envelope shape.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Stable numeric error codes surfaced on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    /// Internal/unexpected error; details are redacted on the wire.
    Unknown = 10000,
    /// Key id not found in tenant.
    NoSuchKey = 10001,
    /// Malformed or invalid argument; also covers `InvalidKeeper`/`NoSuchInstance`.
    Request = 10002,
    /// ACL refused the operation.
    PermissionDeny = 10003,
    /// Credential mismatch.
    WrongPasswd = 10004,
    /// Session owner is frozen.
    UserFrozen = 10005,
    /// Missing or invalid session token.
    NeedLogin = 10006,
    /// Duplicate username.
    UserExist = 10007,
    /// Duplicate tenant identifier.
    InstanceExist = 10008,
    /// Tenant is frozen.
    InstanceFrozen = 10009,
    /// Operation unsupported by the configured Keeper kind.
    KeeperSupport = 10010,
}

impl ErrorCode {
    /// `HTTP` status code for this error. Every taxonomy error maps to 500 except
    /// malformed requests, which the edge rejects with 400 before reaching the core.
    #[must_use]
    pub const fn http_status(self) -> StatusCode {
        match self {
            Self::Request => StatusCode::BAD_REQUEST,
            Self::NeedLogin => StatusCode::UNAUTHORIZED,
            Self::PermissionDeny | Self::UserFrozen | Self::InstanceFrozen => {
                StatusCode::FORBIDDEN
            }
            Self::NoSuchKey => StatusCode::NOT_FOUND,
            Self::WrongPasswd | Self::UserExist | Self::InstanceExist => StatusCode::CONFLICT,
            Self::Unknown | Self::KeeperSupport => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The numeric code placed on the wire.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

/// The keeper core's single error type. Carries a stable wire code and a message that
/// is sanitized before leaving the process for `Unknown` variants (§7 propagation policy).
#[derive(Debug, Clone, Error)]
#[error("{code:?}: {message}")]
pub struct KeeperError {
    /// Stable wire code.
    pub code: ErrorCode,
    /// Human-readable detail. Only exposed verbatim for non-`Unknown` codes.
    pub message: String,
}

impl KeeperError {
    /// Build a new error.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Message safe to place on the wire. `Unknown` is always redacted; every other
    /// code's message is considered safe since it is constructed from validated inputs.
    #[must_use]
    pub fn sanitized_message(&self) -> String {
        match self.code {
            ErrorCode::Unknown => "unknown error".to_owned(),
            _ => self.message.clone(),
        }
    }

    /// Unknown/internal error. Full detail is logged; the wire only ever sees "unknown error".
    #[must_use]
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unknown, message)
    }

    /// Key id not found under the dispatched tenant.
    #[must_use]
    pub fn no_such_key(id: u64) -> Self {
        Self::new(ErrorCode::NoSuchKey, format!("no such key: {id}"))
    }

    /// Malformed or invalid request argument.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Request, message)
    }

    /// Unknown keeper kind requested from the registry.
    #[must_use]
    pub fn invalid_keeper(kind: &str) -> Self {
        Self::new(ErrorCode::Request, format!("no such keeper kind: {kind}"))
    }

    /// Dispatched `identifier` does not name a known tenant.
    #[must_use]
    pub fn no_such_instance(identifier: &str) -> Self {
        Self::new(
            ErrorCode::Request,
            format!("no such instance: {identifier}"),
        )
    }

    /// ACL check failed.
    #[must_use]
    pub fn permission_deny() -> Self {
        Self::new(ErrorCode::PermissionDeny, "permission denied")
    }

    /// Login credential mismatch.
    #[must_use]
    pub fn wrong_passwd() -> Self {
        Self::new(ErrorCode::WrongPasswd, "wrong username or password")
    }

    /// Session owner is frozen.
    #[must_use]
    pub fn user_frozen() -> Self {
        Self::new(ErrorCode::UserFrozen, "user is frozen")
    }

    /// Missing or invalid session token.
    #[must_use]
    pub fn need_login() -> Self {
        Self::new(ErrorCode::NeedLogin, "login required")
    }

    /// Duplicate username on creation.
    #[must_use]
    pub fn user_exist(name: &str) -> Self {
        Self::new(ErrorCode::UserExist, format!("user already exists: {name}"))
    }

    /// Duplicate tenant identifier on creation.
    #[must_use]
    pub fn instance_exist(identifier: &str) -> Self {
        Self::new(
            ErrorCode::InstanceExist,
            format!("instance already exists: {identifier}"),
        )
    }

    /// Dispatched tenant is frozen.
    #[must_use]
    pub fn instance_frozen(identifier: &str) -> Self {
        Self::new(
            ErrorCode::InstanceFrozen,
            format!("instance is frozen: {identifier}"),
        )
    }

    /// Operation unsupported by the configured Keeper kind.
    #[must_use]
    pub fn keeper_not_support(op: &str) -> Self {
        Self::new(
            ErrorCode::KeeperSupport,
            format!("operation not supported by this keeper kind: {op}"),
        )
    }
}

/// Result alias used throughout the keeper core.
pub type KeeperResult<T> = Result<T, KeeperError>;

/// Wire envelope shared by every response on both servers (§4.8).
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    /// Stable numeric code; `0` on success.
    pub code: u32,
    /// Human-readable message; `"success"` on success.
    pub msg: String,
    /// Payload, flattened into the envelope under its own key by callers.
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub payload: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    /// Build a success envelope wrapping `payload`.
    pub fn ok(payload: T) -> Self {
        Self {
            code: 0,
            msg: "success".to_owned(),
            payload: Some(payload),
        }
    }
}

impl KeeperError {
    /// The wire envelope for this error (§4.8): stable code, sanitized message, no payload.
    #[must_use]
    pub fn to_envelope(&self) -> Envelope<()> {
        tracing::warn!(code = ?self.code, detail = %self.message, "request failed");
        Envelope::<()> {
            code: self.code.as_u32(),
            msg: self.sanitized_message(),
            payload: None,
        }
    }
}

impl IntoResponse for KeeperError {
    /// Differentiated HTTP statuses for the web-admin collaborator, whose exact wire
    /// contract is unspecified. The inner server (§4.8, S6) instead always answers
    /// failures with HTTP 500 and uses [`KeeperError::to_envelope`] directly.
    fn into_response(self) -> Response {
        let status = self.code.http_status();
        (status, Json(self.to_envelope())).into_response()
    }
}

/// Conversion from `sqlx::Error`. Persistence errors surface as `Unknown` on the wire
/// but are logged with their driver-level detail (§7).
impl From<sqlx::Error> for KeeperError {
    fn from(error: sqlx::Error) -> Self {
        Self::unknown(format!("persistence error: {error}"))
    }
}

/// Conversion from `sqlx::migrate::MigrateError`, used during one-shot schema migration.
impl From<sqlx::migrate::MigrateError> for KeeperError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        Self::unknown(format!("migration error: {error}"))
    }
}

/// Conversion from `std::io::Error`, used when loading certificate/key material.
impl From<std::io::Error> for KeeperError {
    fn from(error: std::io::Error) -> Self {
        Self::unknown(format!("IO error: {error}"))
    }
}

/// Conversion from JWT validation/encoding failures.
impl From<jsonwebtoken::errors::Error> for KeeperError {
    fn from(error: jsonwebtoken::errors::Error) -> Self {
        Self::need_login_with_detail(error.to_string())
    }
}

impl KeeperError {
    fn need_login_with_detail(detail: String) -> Self {
        Self::new(ErrorCode::NeedLogin, detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_is_redacted_on_the_wire() {
        let err = KeeperError::unknown("sqlite: disk I/O error at /var/lib/keeper/db");
        assert_eq!(err.sanitized_message(), "unknown error");
        assert!(err.message.contains("disk I/O error"));
    }

    #[test]
    fn non_unknown_messages_pass_through() {
        let err = KeeperError::no_such_key(7);
        assert_eq!(err.sanitized_message(), "no such key: 7");
    }

    #[test]
    fn wire_codes_match_the_specification() {
        assert_eq!(ErrorCode::Unknown.as_u32(), 10000);
        assert_eq!(ErrorCode::NoSuchKey.as_u32(), 10001);
        assert_eq!(ErrorCode::Request.as_u32(), 10002);
        assert_eq!(ErrorCode::PermissionDeny.as_u32(), 10003);
        assert_eq!(ErrorCode::WrongPasswd.as_u32(), 10004);
        assert_eq!(ErrorCode::UserFrozen.as_u32(), 10005);
        assert_eq!(ErrorCode::NeedLogin.as_u32(), 10006);
        assert_eq!(ErrorCode::UserExist.as_u32(), 10007);
        assert_eq!(ErrorCode::InstanceExist.as_u32(), 10008);
        assert_eq!(ErrorCode::InstanceFrozen.as_u32(), 10009);
        assert_eq!(ErrorCode::KeeperSupport.as_u32(), 10010);
    }
}
