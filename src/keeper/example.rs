// ABOUTME: Built-in null-object Keeper kind, registered as "Example"
// ABOUTME: Fails every call with KeeperNotSupport; used for registry tests and as a typed stub
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use super::Keeper;
use crate::errors::{KeeperError, KeeperResult};
use crate::model::{DistributeRequest, KeyInfo};
use async_trait::async_trait;

/// Typed null object: every operation returns `KeeperNotSupport`. Registered under the
/// `"Example"` kind so the registry always has at least one entry, even before any real
/// kind is registered by the binary's wiring.
#[derive(Debug, Default)]
pub struct ExampleKeeper;

#[async_trait]
impl Keeper for ExampleKeeper {
    async fn distribute_key(&self, _request: DistributeRequest) -> KeeperResult<KeyInfo> {
        Err(KeeperError::keeper_not_support("DistributeKey"))
    }

    async fn get_key_info(&self, _id: u64, _version: u64) -> KeeperResult<KeyInfo> {
        Err(KeeperError::keeper_not_support("GetKeyInfo"))
    }

    async fn filter_keys(
        &self,
        _offset: i64,
        _limit: i64,
        _content: bool,
    ) -> KeeperResult<(Vec<KeyInfo>, i64)> {
        Err(KeeperError::keeper_not_support("FilterKeys"))
    }

    async fn destroy_key(&self, _id: u64) -> KeeperResult<()> {
        Err(KeeperError::keeper_not_support("DestroyKey"))
    }

    async fn destroy(&self) -> KeeperResult<()> {
        Err(KeeperError::keeper_not_support("Destroy"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_call_is_unsupported() {
        let keeper = ExampleKeeper;
        let err = keeper.get_key_info(1, 0).await.unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::KeeperSupport);
    }
}
