// ABOUTME: Configuration surface (C11, ambient) — CLI flags, environment, and config file
// ABOUTME: Precedence: CLI flag > environment variable > config file > built-in default
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Grounded in `original_source/main.go`'s `pflag`/`viper` surface (`host`, `web`,
//! `log.*`, `cert.*`), re-expressed with `clap` for CLI parsing and `toml` for the
//! optional config file, matching the reference stack's hand-rolled `ServerConfig::from_env`
//! pattern (`src/config/environment.rs`) of reading one field at a time with an explicit
//! default rather than a generic deserialization framework.

use crate::errors::{KeeperError, KeeperResult};
use clap::Parser;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug, Default)]
#[command(name = "keeperd", about = "Multi-tenant cryptographic key service")]
struct Cli {
    /// Inner mTLS listener address
    #[arg(short = 'H', long)]
    host: Option<String>,
    /// Web admin listener address
    #[arg(short = 'w', long)]
    web: Option<String>,
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long = "log")]
    log_level: Option<String>,
    /// Configuration file path
    #[arg(short = 'c', long, default_value = "./config.toml")]
    config: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    host: Option<String>,
    web: Option<String>,
    log: Option<FileLogConfig>,
    cert: Option<FileCertConfig>,
    db: Option<FileDbConfig>,
    user: Option<FileUserConfig>,
    jwt: Option<FileJwtConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct FileLogConfig {
    level: Option<String>,
    dir: Option<String>,
    date: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct FileCertConfig {
    ca: Option<String>,
    #[serde(rename = "self")]
    self_: Option<String>,
    private: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileDbConfig {
    #[serde(rename = "type")]
    kind: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    name: Option<String>,
    user: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileUserConfig {
    #[serde(rename = "maxAge")]
    max_age: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct FileJwtConfig {
    secret: Option<String>,
}

/// Supported persistence drivers (§9 "db.type driver set" — `mysql` is dropped).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    /// Embedded SQLite, the default.
    Sqlite,
    /// Standalone PostgreSQL server.
    Postgres,
}

/// Resolved configuration, after applying CLI > env > file > default precedence.
#[derive(Debug, Clone)]
pub struct Config {
    /// Inner mTLS listener address, e.g. `:7709` or `0.0.0.0:7709`.
    pub host: String,
    /// Web admin listener address, e.g. `:8080`.
    pub web: String,
    /// Log level passed to [`crate::logging::LoggingConfig`].
    pub log_level: String,
    /// Log file directory (file rotation naming, carried from the original surface).
    pub log_dir: String,
    /// Number of days of rotated log files to retain.
    pub log_retain_days: u32,
    /// CA bundle path used to verify client certificates.
    pub cert_ca: PathBuf,
    /// Server certificate path presented to mTLS clients.
    pub cert_self: PathBuf,
    /// Server private key path.
    pub cert_private: PathBuf,
    /// Persistence driver.
    pub db_kind: DbKind,
    /// Database host (ignored for `sqlite`).
    pub db_host: String,
    /// Database port (ignored for `sqlite`).
    pub db_port: u16,
    /// For `sqlite`, a filesystem path; for `postgres`, the database name.
    pub db_name: String,
    /// Database user (ignored for `sqlite`).
    pub db_user: String,
    /// Database password (ignored for `sqlite`).
    pub db_password: String,
    /// Session lifetime in seconds for JWTs issued by the web admin collaborator.
    pub user_max_age_secs: u64,
    /// Optional explicit JWT signing secret; if unset, a CSPRNG-generated secret is
    /// used for the process lifetime (§9 redesign).
    pub jwt_secret: Option<String>,
}

impl Config {
    /// Load configuration by merging CLI flags, environment variables, an optional
    /// config file, and built-in defaults, in that precedence order. Invalid or
    /// missing required configuration is a fatal initialization error.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> KeeperResult<Self> {
        let cli = Cli::parse();
        Self::load_from(&cli)
    }

    fn load_from(cli: &Cli) -> KeeperResult<Self> {
        let file = load_file_config(&cli.config)?;

        let host = pick(cli.host.clone(), "KEEPER_HOST", file.host.clone(), ":7709");
        let web = pick(cli.web.clone(), "KEEPER_WEB", file.web.clone(), ":8080");
        let log_level = pick(
            cli.log_level.clone(),
            "RUST_LOG",
            file.log.as_ref().and_then(|l| l.level.clone()),
            "info",
        );
        let log_dir = pick(
            None,
            "KEEPER_LOG_DIR",
            file.log.as_ref().and_then(|l| l.dir.clone()),
            "log",
        );
        let log_retain_days = pick_parsed(
            "KEEPER_LOG_DATE",
            file.log.as_ref().and_then(|l| l.date),
            5,
        );

        let cert_ca = PathBuf::from(pick(
            None,
            "KEEPER_CERT_CA",
            file.cert.as_ref().and_then(|c| c.ca.clone()),
            "cert/ca.crt",
        ));
        let cert_self = PathBuf::from(pick(
            None,
            "KEEPER_CERT_SELF",
            file.cert.as_ref().and_then(|c| c.self_.clone()),
            "cert/server.crt",
        ));
        let cert_private = PathBuf::from(pick(
            None,
            "KEEPER_CERT_PRIVATE",
            file.cert.as_ref().and_then(|c| c.private.clone()),
            "cert/server_key.pem",
        ));

        let db_kind_raw = pick(
            None,
            "KEEPER_DB_TYPE",
            file.db.as_ref().and_then(|d| d.kind.clone()),
            "sqlite",
        );
        let db_kind = match db_kind_raw.as_str() {
            "sqlite" => DbKind::Sqlite,
            "postgres" => DbKind::Postgres,
            other => {
                return Err(KeeperError::invalid_request(format!(
                    "unsupported db.type {other:?}: expected \"sqlite\" or \"postgres\""
                )))
            }
        };
        let db_host = pick(None, "KEEPER_DB_HOST", file.db.as_ref().and_then(|d| d.host.clone()), "localhost");
        let db_port = pick_parsed("KEEPER_DB_PORT", file.db.as_ref().and_then(|d| d.port), 5432);
        let db_name = pick(
            None,
            "KEEPER_DB_NAME",
            file.db.as_ref().and_then(|d| d.name.clone()),
            "keeper.db",
        );
        let db_user = pick(None, "KEEPER_DB_USER", file.db.as_ref().and_then(|d| d.user.clone()), "keeper");
        let db_password = pick(
            None,
            "KEEPER_DB_PASSWORD",
            file.db.as_ref().and_then(|d| d.password.clone()),
            "",
        );

        let user_max_age_secs = pick_parsed(
            "KEEPER_USER_MAX_AGE",
            file.user.as_ref().and_then(|u| u.max_age),
            86_400,
        );

        let jwt_secret = env::var("KEEPER_JWT_SECRET")
            .ok()
            .or_else(|| file.jwt.as_ref().and_then(|j| j.secret.clone()));

        Ok(Self {
            host,
            web,
            log_level,
            log_dir,
            log_retain_days,
            cert_ca,
            cert_self,
            cert_private,
            db_kind,
            db_host,
            db_port,
            db_name,
            db_user,
            db_password,
            user_max_age_secs,
            jwt_secret,
        })
    }

    /// The `sqlx` connection URL for the configured database driver.
    #[must_use]
    pub fn database_url(&self) -> String {
        match self.db_kind {
            DbKind::Sqlite => format!("sqlite://{}?mode=rwc", self.db_name),
            DbKind::Postgres => format!(
                "postgres://{}:{}@{}:{}/{}",
                self.db_user, self.db_password, self.db_host, self.db_port, self.db_name
            ),
        }
    }
}

fn load_file_config(path: &Path) -> KeeperResult<FileConfig> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let raw = std::fs::read_to_string(path)?;
    toml::from_str(&raw)
        .map_err(|error| KeeperError::unknown(format!("invalid config file {path:?}: {error}")))
}

fn pick(cli: Option<String>, env_key: &str, file: Option<String>, default: &str) -> String {
    cli.or_else(|| env::var(env_key).ok())
        .or(file)
        .unwrap_or_else(|| default.to_owned())
}

fn pick_parsed<T: std::str::FromStr>(env_key: &str, file: Option<T>, default: T) -> T {
    env::var(env_key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .or(file)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let cli = Cli {
            host: None,
            web: None,
            log_level: None,
            config: PathBuf::from("/nonexistent/keeper-config-test.toml"),
        };
        let config = Config::load_from(&cli).expect("defaults always load");
        assert_eq!(config.host, ":7709");
        assert_eq!(config.web, ":8080");
        assert_eq!(config.db_kind, DbKind::Sqlite);
    }

    #[test]
    fn cli_flag_overrides_default() {
        let cli = Cli {
            host: Some(":9999".to_owned()),
            web: None,
            log_level: None,
            config: PathBuf::from("/nonexistent/keeper-config-test.toml"),
        };
        let config = Config::load_from(&cli).expect("defaults always load");
        assert_eq!(config.host, ":9999");
    }

    #[test]
    fn unknown_db_type_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[db]\ntype = \"mysql\"\n").expect("write succeeds");
        let cli = Cli {
            host: None,
            web: None,
            log_level: None,
            config: path,
        };
        let err = Config::load_from(&cli).unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::Request);
    }
}
