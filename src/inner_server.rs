// ABOUTME: mTLS admission server (C7) — the two-route /api/inner surface
// ABOUTME: Grounded in original_source/inner.go's getRunner/InnerServer wiring
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! The inner server is the only listener that ever sees client mTLS certificates. It
//! exposes exactly two routes (§4.7, §6): `POST /api/inner/key` and
//! `POST /api/inner/version`. Every request passes through a fixed middleware chain —
//! request-id tagging, panic recovery, access logging, then keeper-binding (§4.6
//! dispatch) — before reaching a handler that talks only to the bound [`Keeper`].

use crate::errors::{Envelope, KeeperError};
use crate::keeper::Keeper;
use crate::logging::AppLogger;
use crate::manager::InstanceManager;
use crate::model::{KeyInfo, KeyRequest};
use crate::utils::tls::build_mtls_server_config;
use axum::extract::{Request, State};
use axum::http::{HeaderName, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Extension, Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use serde::Serialize;
use std::any::Any;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::Span;

/// The header carrying the dispatched tenant identifier (§4.6, §6).
const IDENTIFIER_HEADER: &str = "identifier";
const REQUEST_ID_HEADER: &str = "x-request-id";

/// The dispatched tenant identifier, stashed as a request extension by [`bind_keeper`]
/// so handlers can log it without re-parsing the header.
#[derive(Clone)]
struct DispatchedIdentifier(String);

/// Build the inner-server router, without binding a listener. Split out from
/// [`serve`] so integration tests can drive it with `tower::ServiceExt::oneshot`
/// against a plaintext connector instead of standing up a real TLS socket.
#[must_use]
pub fn router(manager: Arc<InstanceManager>) -> Router {
    let request_id_header = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .route("/api/inner/key", post(handle_key))
        .route("/api/inner/version", post(handle_version))
        .layer(middleware::from_fn_with_state(manager.clone(), bind_keeper))
        .layer(
            ServiceBuilder::new()
                .layer(CatchPanicLayer::custom(handle_panic))
                .layer(SetRequestIdLayer::new(
                    request_id_header.clone(),
                    MakeRequestUuid,
                ))
                .layer(
                    TraceLayer::new_for_http().make_span_with(|request: &Request| {
                        tracing::info_span!(
                            "inner_request",
                            method = %request.method(),
                            path = %request.uri().path(),
                            tenant.identifier = tracing::field::Empty,
                        )
                    }),
                )
                .layer(PropagateRequestIdLayer::new(request_id_header)),
        )
        .with_state(manager)
}

/// Run the mTLS admission server on `addr` until the process is terminated. Requires
/// and verifies the client certificate against `cert_ca`'s trust anchor; presents
/// `cert_self`/`cert_private` as the server identity (§4.7).
///
/// # Errors
///
/// Returns an error if the certificate material cannot be loaded or the listener
/// cannot be bound.
pub async fn serve(
    manager: Arc<InstanceManager>,
    addr: SocketAddr,
    cert_self: &Path,
    cert_private: &Path,
    cert_ca: &Path,
) -> crate::errors::KeeperResult<()> {
    let tls_config = build_mtls_server_config(cert_self, cert_private, cert_ca)?;
    let rustls_config = RustlsConfig::from_config(Arc::new(tls_config));
    let app = router(manager);

    tracing::info!(%addr, "inner mTLS admission server listening");
    axum_server::bind_rustls(addr, rustls_config)
        .serve(app.into_make_service())
        .await
        .map_err(|error| KeeperError::unknown(format!("inner server failed: {error}")))
}

/// Keeper-binding middleware (§4.6 dispatch): resolves the `identifier` header to a
/// live Keeper, rejecting unknown or frozen tenants before any handler runs.
async fn bind_keeper(
    State(manager): State<Arc<InstanceManager>>,
    request: Request,
    next: Next,
) -> Response {
    let identifier = request
        .headers()
        .get(IDENTIFIER_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned();

    match manager.dispatch(&identifier) {
        Ok(keeper) => {
            Span::current().record("tenant.identifier", tracing::field::display(&identifier));
            let mut request = request;
            request.extensions_mut().insert(keeper);
            request
                .extensions_mut()
                .insert(DispatchedIdentifier(identifier));
            next.run(request).await
        }
        Err(error) => inner_error_response(&error),
    }
}

fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic with no message".to_owned());
    inner_error_response(&KeeperError::unknown(format!(
        "request handler panicked: {detail}"
    )))
}

/// Every failure on the inner surface answers HTTP 500 with the wire error code in the
/// body (§4.8, S6) — unlike the web-admin collaborator, the inner contract does not
/// differentiate HTTP status by error kind.
fn inner_error_response(error: &KeeperError) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(error.to_envelope())).into_response()
}

#[derive(Serialize)]
struct KeyPayload {
    key: KeyInfo,
}

async fn handle_key(
    Extension(keeper): Extension<Arc<dyn Keeper>>,
    Extension(DispatchedIdentifier(identifier)): Extension<DispatchedIdentifier>,
    Json(body): Json<KeyRequest>,
) -> Response {
    let started = Instant::now();
    let result = keeper.get_key_info(body.id, body.version).await;
    let success = result.is_ok();
    AppLogger::log_key_request(&identifier, "get_key", success, duration_ms(started));
    match result {
        Ok(info) => Json(Envelope::ok(KeyPayload { key: info })).into_response(),
        Err(error) => inner_error_response(&error),
    }
}

async fn handle_version(
    Extension(keeper): Extension<Arc<dyn Keeper>>,
    Extension(DispatchedIdentifier(identifier)): Extension<DispatchedIdentifier>,
    Json(body): Json<KeyRequest>,
) -> Response {
    let started = Instant::now();
    let result = keeper.get_latest_version_key(body.id).await;
    let success = result.is_ok();
    AppLogger::log_key_request(&identifier, "get_latest_version", success, duration_ms(started));
    match result {
        Ok(info) => Json(Envelope::ok(KeyPayload { key: info })).into_response(),
        Err(error) => inner_error_response(&error),
    }
}

fn duration_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::keeper::registry::{KeeperRegistry, SAFER_KIND};
    use crate::model::{DistributeRequest, DEFAULT_IDENTIFIER, ROOT_USERNAME};
    use crate::persistence::{MemoryPersistence, Persistence};
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use tower::ServiceExt;

    async fn manager_with_distributed_key() -> Arc<InstanceManager> {
        let persistence: Arc<dyn Persistence> = Arc::new(MemoryPersistence::new());
        let registry = Arc::new(KeeperRegistry::with_builtins());
        let clock: Arc<dyn crate::clock::Clock> = Arc::new(SystemClock);
        let manager = InstanceManager::start(persistence.clone(), registry, clock)
            .await
            .expect("startup succeeds");
        let root = persistence
            .find_user_by_name(ROOT_USERNAME)
            .await
            .expect("query succeeds")
            .expect("bootstrapped");
        manager
            .create_instance("acme", SAFER_KIND, &root)
            .await
            .expect("fresh identifier");
        let keeper = manager.dispatch("acme").expect("dispatchable");
        keeper
            .distribute_key(DistributeRequest {
                id: 1,
                length: 16,
                algorithm: "aes-cbc".to_owned(),
                rotation_time: 0,
            })
            .await
            .expect("fresh id");
        manager
    }

    #[tokio::test]
    async fn s6_unknown_identifier_returns_500_with_request_code() {
        let manager = manager_with_distributed_key().await;
        let app = router(manager);
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/api/inner/key")
            .header("identifier", "ghost")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"id":1,"version":0}"#))
            .expect("valid request");
        let response = app.oneshot(request).await.expect("service call succeeds");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("readable body");
        let value: serde_json::Value = serde_json::from_slice(&body).expect("valid json");
        assert_eq!(value["code"], 10002);
    }

    #[tokio::test]
    async fn valid_identifier_but_missing_key_returns_500_with_no_such_key_code() {
        let manager = manager_with_distributed_key().await;
        let app = router(manager);
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/api/inner/key")
            .header("identifier", DEFAULT_IDENTIFIER)
            .header("content-type", "application/json")
            .body(Body::from(r#"{"id":999,"version":0}"#))
            .expect("valid request");
        let response = app.oneshot(request).await.expect("service call succeeds");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("readable body");
        let value: serde_json::Value = serde_json::from_slice(&body).expect("valid json");
        assert_eq!(value["code"], 10001);
    }

    #[tokio::test]
    async fn key_lookup_succeeds_for_distributed_key() {
        let manager = manager_with_distributed_key().await;
        let app = router(manager);
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/api/inner/key")
            .header("identifier", "acme")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"id":1,"version":0}"#))
            .expect("valid request");
        let response = app.oneshot(request).await.expect("service call succeeds");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn version_endpoint_returns_latest() {
        let manager = manager_with_distributed_key().await;
        let app = router(manager);
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/api/inner/version")
            .header("identifier", "acme")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"id":1}"#))
            .expect("valid request");
        let response = app.oneshot(request).await.expect("service call succeeds");
        assert_eq!(response.status(), StatusCode::OK);
    }
}
