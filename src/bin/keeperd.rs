// ABOUTME: Process entry point — wires configuration, persistence, and both HTTP servers
// ABOUTME: Grounded in original_source/main.go's startup sequence (config, db, servers)
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Startup order mirrors the reference `main.go`: load configuration, initialize
//! logging, open the persistence backend, construct the keeper registry and instance
//! manager, bootstrap the JWT signing key, then run the mTLS admission server and the
//! web-admin collaborator concurrently. Any failure in this sequence is fatal (§6 exit
//! codes) — there is nothing sensible to degrade to without a working persistence layer.

use keeper::clock::SystemClock;
use keeper::config::{Config, DbKind};
use keeper::keeper::registry::KeeperRegistry;
use keeper::logging::LoggingConfig;
use keeper::manager::InstanceManager;
use keeper::persistence::Persistence;
use keeper::web_admin::JwtSecret;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

fn main() -> ExitCode {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("fatal: failed to start async runtime: {error}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("fatal: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Config::load()?;
    LoggingConfig::from_env().init()?;

    let persistence: Arc<dyn Persistence> = match config.db_kind {
        DbKind::Sqlite => connect_sqlite(&config.database_url()).await?,
        DbKind::Postgres => connect_postgres(&config.database_url()).await?,
    };

    let registry = Arc::new(KeeperRegistry::with_builtins());
    let clock = Arc::new(SystemClock);
    let manager = InstanceManager::start(persistence, registry, clock).await?;
    let jwt = Arc::new(JwtSecret::load_or_generate(config.jwt_secret.as_deref())?);

    let inner_addr = parse_listen_addr(&config.host)?;
    let web_addr = parse_listen_addr(&config.web)?;

    let inner = keeper::inner_server::serve(
        manager.clone(),
        inner_addr,
        &config.cert_self,
        &config.cert_private,
        &config.cert_ca,
    );
    let web = keeper::web_admin::serve(manager, jwt, config.user_max_age_secs, web_addr);

    tokio::try_join!(run_until_error(inner), run_until_error(web))?;
    Ok(())
}

#[cfg(feature = "sqlite")]
async fn connect_sqlite(url: &str) -> anyhow::Result<Arc<dyn Persistence>> {
    let persistence = keeper::persistence::SqlitePersistence::connect(url).await?;
    Ok(Arc::new(persistence))
}

#[cfg(not(feature = "sqlite"))]
async fn connect_sqlite(_url: &str) -> anyhow::Result<Arc<dyn Persistence>> {
    anyhow::bail!("built without the \"sqlite\" feature")
}

#[cfg(feature = "postgres")]
async fn connect_postgres(url: &str) -> anyhow::Result<Arc<dyn Persistence>> {
    let persistence = keeper::persistence::PostgresPersistence::connect(url).await?;
    Ok(Arc::new(persistence))
}

#[cfg(not(feature = "postgres"))]
async fn connect_postgres(_url: &str) -> anyhow::Result<Arc<dyn Persistence>> {
    anyhow::bail!("built without the \"postgres\" feature")
}

async fn run_until_error(
    task: impl std::future::Future<Output = keeper::errors::KeeperResult<()>>,
) -> anyhow::Result<()> {
    task.await.map_err(Into::into)
}

/// Parse a Go-`net.Listen`-style address (`":7709"`, `"0.0.0.0:7709"`, `"127.0.0.1:8080"`)
/// into a [`SocketAddr`], defaulting an empty host to all interfaces.
fn parse_listen_addr(raw: &str) -> anyhow::Result<SocketAddr> {
    let normalized = if let Some(port) = raw.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        raw.to_owned()
    };
    normalized
        .parse()
        .map_err(|error| anyhow::anyhow!("invalid listen address {raw:?}: {error}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_port_binds_all_interfaces() {
        let addr = parse_listen_addr(":7709").expect("valid");
        assert_eq!(addr.to_string(), "0.0.0.0:7709");
    }

    #[test]
    fn explicit_host_is_preserved() {
        let addr = parse_listen_addr("127.0.0.1:8080").expect("valid");
        assert_eq!(addr.to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn malformed_address_is_rejected() {
        assert!(parse_listen_addr("not-an-address").is_err());
    }
}
