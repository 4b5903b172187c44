// ABOUTME: Logging configuration and structured logging setup for observability and debugging
// ABOUTME: Configures log levels, formatters, and output destinations for comprehensive system logging
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! Production-ready logging configuration with structured output (C12).

use anyhow::Result;
use serde_json::json;
use std::env;
use std::io;
use tracing::{info, warn};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Service name reported in structured logs and startup banners.
pub const SERVICE_NAME: &str = "keeper";

/// Logging configuration.
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)] // mirrors the independent knobs tracing-subscriber exposes
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty, compact)
    pub format: LogFormat,
    /// Include source file and line numbers
    pub include_location: bool,
    /// Include thread information
    pub include_thread: bool,
    /// Include span information for tracing
    pub include_spans: bool,
    /// Service name for structured logging
    pub service_name: String,
    /// Service version
    pub service_version: String,
    /// Environment (development, staging, production)
    pub environment: String,
}

/// Log output format options.
#[derive(Debug, Clone)]
pub enum LogFormat {
    /// `JSON` format for production logging
    Json,
    /// Pretty format for development
    Pretty,
    /// Compact format for space-constrained environments
    Compact,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Pretty,
            include_location: false,
            include_thread: false,
            include_spans: false,
            service_name: SERVICE_NAME.into(),
            service_version: env!("CARGO_PKG_VERSION").to_owned(),
            environment: "development".into(),
        }
    }
}

impl LoggingConfig {
    /// Build a logging configuration from environment variables, falling back to
    /// development defaults for anything unset.
    #[must_use]
    pub fn from_env() -> Self {
        let level = env::var("RUST_LOG").unwrap_or_else(|_| "info".into());

        let format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("compact") => LogFormat::Compact,
            _ => LogFormat::Pretty,
        };

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into());
        let is_production = environment == "production";

        Self {
            level,
            format,
            include_location: is_production || env::var("LOG_INCLUDE_LOCATION").is_ok(),
            include_thread: is_production || env::var("LOG_INCLUDE_THREAD").is_ok(),
            include_spans: is_production || env::var("LOG_INCLUDE_SPANS").is_ok(),
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| SERVICE_NAME.into()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_owned()),
            environment,
        }
    }

    /// Initialize the global tracing subscriber.
    ///
    /// # Errors
    ///
    /// Returns an error if the tracing subscriber fails to initialize.
    pub fn init(&self) -> Result<()> {
        let env_filter = env::var("RUST_LOG")
            .map_or_else(|_| EnvFilter::new(&self.level), |raw| EnvFilter::new(raw))
            .add_directive(
                "hyper=warn"
                    .parse()
                    .unwrap_or_else(|_| tracing::Level::WARN.into()),
            )
            .add_directive(
                "sqlx=warn"
                    .parse()
                    .unwrap_or_else(|_| tracing::Level::WARN.into()),
            )
            .add_directive(
                "tower_http=info"
                    .parse()
                    .unwrap_or_else(|_| tracing::Level::INFO.into()),
            )
            .add_directive(
                format!("keeper={}", self.level)
                    .parse()
                    .unwrap_or_else(|_| tracing::Level::INFO.into()),
            );

        let registry = tracing_subscriber::registry().with(env_filter);

        match self.format {
            LogFormat::Json => {
                let layer = fmt::layer()
                    .with_file(self.include_location)
                    .with_line_number(self.include_location)
                    .with_thread_ids(self.include_thread)
                    .with_thread_names(self.include_thread)
                    .with_target(true)
                    .with_writer(io::stdout)
                    .with_span_events(self.span_events())
                    .json();
                registry.with(layer).init();
            }
            LogFormat::Pretty => {
                let layer = fmt::layer()
                    .with_file(self.include_location)
                    .with_line_number(self.include_location)
                    .with_thread_ids(self.include_thread)
                    .with_thread_names(self.include_thread)
                    .with_target(true)
                    .with_writer(io::stdout)
                    .with_span_events(self.span_events());
                registry.with(layer).init();
            }
            LogFormat::Compact => {
                let layer = fmt::layer()
                    .compact()
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(false)
                    .with_thread_names(false)
                    .with_target(false)
                    .with_writer(io::stdout)
                    .with_span_events(FmtSpan::NONE);
                registry.with(layer).init();
            }
        }

        self.log_startup_info();
        Ok(())
    }

    fn span_events(&self) -> FmtSpan {
        if self.include_spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }

    fn log_startup_info(&self) {
        info!(
            service.name = %self.service_name,
            service.version = %self.service_version,
            environment = %self.environment,
            log.level = %self.level,
            log.format = ?self.format,
            "keeper starting up"
        );

        let config_summary = json!({
            "service": {
                "name": self.service_name,
                "version": self.service_version,
                "environment": self.environment
            },
            "logging": {
                "level": self.level,
                "format": format!("{:?}", self.format),
            }
        });
        info!("configuration loaded: {}", config_summary);
    }
}

/// Initialize logging with default (development) configuration.
///
/// # Errors
///
/// Returns an error if logging initialization fails.
pub fn init_default() -> Result<()> {
    LoggingConfig::default().init()
}

/// Initialize logging from environment variables.
///
/// # Errors
///
/// Returns an error if logging initialization fails.
pub fn init_from_env() -> Result<()> {
    LoggingConfig::from_env().init()
}

/// Domain-specific structured logging helpers, used from the admission and web-admin
/// servers rather than calling `tracing` macros ad hoc at every call site.
pub struct AppLogger;

impl AppLogger {
    /// Log a web-admin authentication event (login attempt, logout).
    pub fn log_auth_event(username: &str, event: &str, success: bool) {
        info!(
            user.name = %username,
            auth.event = %event,
            auth.success = %success,
            "authentication event"
        );
    }

    /// Log an inner-server key request dispatch.
    pub fn log_key_request(identifier: &str, op: &str, success: bool, duration_ms: u64) {
        info!(
            tenant.identifier = %identifier,
            key.op = %op,
            key.success = %success,
            key.duration_ms = %duration_ms,
            "key operation"
        );
    }

    /// Log a tenant admin lifecycle event (create/freeze/destroy instance).
    pub fn log_tenant_event(identifier: &str, event: &str, actor: &str) {
        info!(
            tenant.identifier = %identifier,
            tenant.event = %event,
            actor.name = %actor,
            "tenant lifecycle event"
        );
    }

    /// Log a security-relevant event (ACL denial, frozen access, TLS rejection).
    pub fn log_security_event(event_type: &str, severity: &str, details: &str) {
        warn!(
            security.event = %event_type,
            security.severity = %severity,
            security.details = %details,
            "security event"
        );
    }
}
