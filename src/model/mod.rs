// ABOUTME: Data model for the keeper core — Instance, KeyRecord, KeyInfo, User
// ABOUTME: Mirrors the logical tables of §6: t_manager_instances, t_safer_keys, t_manager_users
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Data model shared by the keeper core and both HTTP servers.

pub mod instance;
pub mod key;
pub mod user;

pub use instance::{Instance, DEFAULT_IDENTIFIER};
pub use key::{DistributeRequest, KeyInfo, KeyRecord, KeyRequest};
pub use user::{User, ROOT_USERNAME};
