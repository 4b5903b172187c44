// ABOUTME: Web admin collaborator (C13) — plaintext JSON API behind JWT session auth
// ABOUTME: Session claims, instance/key CRUD, and user freeze/password routes under /api/web
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! The web admin server is a separate plaintext listener from the mTLS admission server
//! (§4.7). It never touches certificate material; every route (other than login) is
//! gated by a bearer JWT validated against the process-wide [`JwtSecret`], and every
//! admin operation is delegated straight into [`InstanceManager`] or a dispatched
//! [`Keeper`] — this module adds no authority the core does not already define.

use crate::crypto::random::random_bytes;
use crate::errors::{Envelope, KeeperError, KeeperResult};
use crate::keeper::Keeper;
use crate::logging::AppLogger;
use crate::manager::InstanceManager;
use crate::model::user::{hash_password, verify_password};
use crate::model::{DistributeRequest, Instance, KeyInfo, User};
use axum::extract::{ConnectInfo, Path, Query, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderName};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Session claims carried in the JWT issued by `POST /api/web/login` (§4.12): subject
/// user id, display name, root flag, and expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    sub: i64,
    name: String,
    #[serde(rename = "isRoot")]
    is_root: bool,
    exp: i64,
}

/// Lazily bootstrapped HS256 signing key for web-admin session tokens (§5, §9). A
/// configured secret is used verbatim; otherwise 32 CSPRNG bytes are generated once at
/// process startup. There is no fallback to a fixed constant — a CSPRNG failure here is
/// a fatal startup error, propagated by `?` out of [`Self::load_or_generate`].
pub struct JwtSecret {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtSecret {
    /// Build the signing key from an operator-configured secret, or generate one.
    ///
    /// # Errors
    ///
    /// Returns an error if no secret was configured and the CSPRNG fails.
    pub fn load_or_generate(configured: Option<&str>) -> KeeperResult<Self> {
        let bytes: zeroize::Zeroizing<Vec<u8>> = zeroize::Zeroizing::new(match configured {
            Some(secret) if !secret.is_empty() => secret.as_bytes().to_vec(),
            _ => random_bytes(32)?,
        });
        Ok(Self {
            encoding: EncodingKey::from_secret(&bytes),
            decoding: DecodingKey::from_secret(&bytes),
            validation: Validation::new(Algorithm::HS256),
        })
    }

    fn sign(&self, claims: &Claims) -> KeeperResult<String> {
        let token = encode(&Header::new(Algorithm::HS256), claims, &self.encoding)?;
        Ok(token)
    }

    fn verify(&self, token: &str) -> KeeperResult<Claims> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)?;
        Ok(data.claims)
    }
}

#[derive(Clone)]
struct WebAdminState {
    manager: Arc<InstanceManager>,
    jwt: Arc<JwtSecret>,
    max_age_secs: i64,
}

/// Build the web-admin router, without binding a listener. `max_age_secs` is the
/// session lifetime for issued JWTs (`user.maxAge`).
#[must_use]
pub fn router(manager: Arc<InstanceManager>, jwt: Arc<JwtSecret>, max_age_secs: u64) -> Router {
    let state = WebAdminState {
        manager,
        jwt,
        max_age_secs: max_age_secs.max(60) as i64,
    };
    let request_id_header = HeaderName::from_static(REQUEST_ID_HEADER);

    let authenticated = Router::new()
        .route("/api/web/logout", post(handle_logout))
        .route(
            "/api/web/instances",
            get(handle_list_instances).post(handle_create_instance),
        )
        .route(
            "/api/web/instances/:identifier/freeze",
            post(handle_freeze_instance),
        )
        .route(
            "/api/web/instances/:identifier",
            delete(handle_destroy_instance),
        )
        .route(
            "/api/web/instances/:identifier/keys",
            get(handle_list_keys).post(handle_distribute_key),
        )
        .route(
            "/api/web/instances/:identifier/keys/:id",
            delete(handle_destroy_key),
        )
        .route("/api/web/users/:id/freeze", post(handle_freeze_user))
        .route("/api/web/users/:id/password", post(handle_change_password))
        .layer(middleware::from_fn_with_state(state.clone(), require_session));

    Router::new()
        .route("/api/web/login", post(handle_login))
        .merge(authenticated)
        .layer(
            ServiceBuilder::new()
                .layer(CatchPanicLayer::custom(handle_panic))
                .layer(SetRequestIdLayer::new(
                    request_id_header.clone(),
                    MakeRequestUuid,
                ))
                .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
                    tracing::info_span!(
                        "web_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                }))
                .layer(PropagateRequestIdLayer::new(request_id_header)),
        )
        .with_state(state)
}

/// Run the web-admin server on `addr` until the process is terminated.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound.
pub async fn serve(
    manager: Arc<InstanceManager>,
    jwt: Arc<JwtSecret>,
    max_age_secs: u64,
    addr: SocketAddr,
) -> KeeperResult<()> {
    let app = router(manager, jwt, max_age_secs);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "web admin server listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|error| KeeperError::unknown(format!("web admin server failed: {error}")))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_owned)
}

/// Session middleware (§4.12): rejects with `NeedLogin` on a missing/invalid/expired
/// token, and short-circuits with `UserFrozen` against the in-memory frozen-user set
/// without touching persistence.
async fn require_session(
    State(state): State<WebAdminState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(request.headers()) else {
        return KeeperError::need_login().into_response();
    };
    let claims = match state.jwt.verify(&token) {
        Ok(claims) => claims,
        Err(_) => return KeeperError::need_login().into_response(),
    };
    if state.manager.is_user_frozen(claims.sub) {
        return KeeperError::user_frozen().into_response();
    }
    request.extensions_mut().insert(claims);
    next.run(request).await
}

fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic with no message".to_owned());
    KeeperError::unknown(format!("request handler panicked: {detail}")).into_response()
}

fn empty_ok() -> Response {
    Json(Envelope::<()> {
        code: 0,
        msg: "success".to_owned(),
        payload: None,
    })
    .into_response()
}

async fn actor_user(state: &WebAdminState, claims: &Claims) -> KeeperResult<User> {
    state
        .manager
        .persistence()
        .find_user_by_id(claims.sub)
        .await?
        .ok_or_else(KeeperError::need_login)
}

#[derive(Deserialize)]
struct LoginRequest {
    name: String,
    passwd: String,
}

#[derive(Serialize)]
struct LoginPayload {
    token: String,
}

async fn handle_login(
    State(state): State<WebAdminState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Json(body): Json<LoginRequest>,
) -> Response {
    let ip = connect_info.map_or_else(String::new, |ConnectInfo(addr)| addr.to_string());
    match login(&state, &body, &ip).await {
        Ok(token) => Json(Envelope::ok(LoginPayload { token })).into_response(),
        Err(error) => error.into_response(),
    }
}

async fn login(state: &WebAdminState, body: &LoginRequest, ip: &str) -> KeeperResult<String> {
    let user = state
        .manager
        .persistence()
        .find_user_by_name(&body.name)
        .await?
        .ok_or_else(KeeperError::wrong_passwd)?;
    if !verify_password(&body.passwd, &user.passwd_hash) {
        AppLogger::log_auth_event(&body.name, "login", false);
        return Err(KeeperError::wrong_passwd());
    }
    if user.is_frozen || state.manager.is_user_frozen(user.id) {
        AppLogger::log_security_event("frozen_login_attempt", "warn", &body.name);
        return Err(KeeperError::user_frozen());
    }
    let exp = Utc::now() + chrono::Duration::seconds(state.max_age_secs);
    let claims = Claims {
        sub: user.id,
        name: user.name.clone(),
        is_root: user.is_root(),
        exp: exp.timestamp(),
    };
    let token = state.jwt.sign(&claims)?;
    state
        .manager
        .persistence()
        .touch_login(user.id, ip, Utc::now())
        .await?;
    AppLogger::log_auth_event(&user.name, "login", true);
    Ok(token)
}

async fn handle_logout(Extension(claims): Extension<Claims>) -> Response {
    AppLogger::log_auth_event(&claims.name, "logout", true);
    empty_ok()
}

#[derive(Serialize)]
struct InstancesPayload {
    instances: Vec<Instance>,
}

async fn handle_list_instances(
    State(state): State<WebAdminState>,
    Extension(claims): Extension<Claims>,
) -> Response {
    let instances = state
        .manager
        .list_instances()
        .into_iter()
        .filter(|instance| claims.is_root || instance.has_user(&claims.sub.to_string()))
        .collect();
    Json(Envelope::ok(InstancesPayload { instances })).into_response()
}

#[derive(Deserialize)]
struct CreateInstanceRequest {
    identifier: String,
    keeper: String,
}

#[derive(Serialize)]
struct InstancePayload {
    instance: Instance,
}

async fn handle_create_instance(
    State(state): State<WebAdminState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<CreateInstanceRequest>,
) -> Response {
    let actor = match actor_user(&state, &claims).await {
        Ok(user) => user,
        Err(error) => return error.into_response(),
    };
    match state
        .manager
        .create_instance(&body.identifier, &body.keeper, &actor)
        .await
    {
        Ok(instance) => {
            AppLogger::log_tenant_event(&instance.identifier, "create", &actor.name);
            Json(Envelope::ok(InstancePayload { instance })).into_response()
        }
        Err(error) => error.into_response(),
    }
}

#[derive(Deserialize)]
struct FreezeInstanceRequest {
    #[serde(rename = "isFrozen")]
    is_frozen: bool,
}

async fn handle_freeze_instance(
    State(state): State<WebAdminState>,
    Extension(claims): Extension<Claims>,
    Path(identifier): Path<String>,
    Json(body): Json<FreezeInstanceRequest>,
) -> Response {
    let actor = match actor_user(&state, &claims).await {
        Ok(user) => user,
        Err(error) => return error.into_response(),
    };
    if !state.manager.authorize(&actor, &identifier) {
        return KeeperError::permission_deny().into_response();
    }
    match state.manager.set_instance_frozen(&identifier, body.is_frozen).await {
        Ok(()) => {
            let event = if body.is_frozen { "freeze" } else { "unfreeze" };
            AppLogger::log_tenant_event(&identifier, event, &actor.name);
            empty_ok()
        }
        Err(error) => error.into_response(),
    }
}

async fn handle_destroy_instance(
    State(state): State<WebAdminState>,
    Extension(claims): Extension<Claims>,
    Path(identifier): Path<String>,
) -> Response {
    let actor = match actor_user(&state, &claims).await {
        Ok(user) => user,
        Err(error) => return error.into_response(),
    };
    if !state.manager.authorize(&actor, &identifier) {
        return KeeperError::permission_deny().into_response();
    }
    match state.manager.destroy_instance(&identifier).await {
        Ok(()) => {
            AppLogger::log_tenant_event(&identifier, "destroy", &actor.name);
            empty_ok()
        }
        Err(error) => error.into_response(),
    }
}

#[derive(Deserialize)]
struct KeysQuery {
    #[serde(default)]
    offset: i64,
    #[serde(default)]
    limit: i64,
    #[serde(default)]
    content: bool,
}

#[derive(Serialize)]
struct KeysPayload {
    keys: Vec<KeyInfo>,
    total: i64,
}

async fn handle_list_keys(
    State(state): State<WebAdminState>,
    Extension(claims): Extension<Claims>,
    Path(identifier): Path<String>,
    Query(query): Query<KeysQuery>,
) -> Response {
    let actor = match actor_user(&state, &claims).await {
        Ok(user) => user,
        Err(error) => return error.into_response(),
    };
    if !state.manager.authorize(&actor, &identifier) {
        return KeeperError::permission_deny().into_response();
    }
    let keeper = match state.manager.dispatch(&identifier) {
        Ok(keeper) => keeper,
        Err(error) => return error.into_response(),
    };
    match keeper.filter_keys(query.offset, query.limit, query.content).await {
        Ok((keys, total)) => Json(Envelope::ok(KeysPayload { keys, total })).into_response(),
        Err(error) => error.into_response(),
    }
}

#[derive(Serialize)]
struct KeyPayload {
    key: KeyInfo,
}

async fn handle_distribute_key(
    State(state): State<WebAdminState>,
    Extension(claims): Extension<Claims>,
    Path(identifier): Path<String>,
    Json(body): Json<DistributeRequest>,
) -> Response {
    let actor = match actor_user(&state, &claims).await {
        Ok(user) => user,
        Err(error) => return error.into_response(),
    };
    if !state.manager.authorize(&actor, &identifier) {
        return KeeperError::permission_deny().into_response();
    }
    let keeper = match state.manager.dispatch(&identifier) {
        Ok(keeper) => keeper,
        Err(error) => return error.into_response(),
    };
    match keeper.distribute_key(body).await {
        Ok(info) => Json(Envelope::ok(KeyPayload { key: info })).into_response(),
        Err(error) => error.into_response(),
    }
}

async fn handle_destroy_key(
    State(state): State<WebAdminState>,
    Extension(claims): Extension<Claims>,
    Path((identifier, id)): Path<(String, u64)>,
) -> Response {
    let actor = match actor_user(&state, &claims).await {
        Ok(user) => user,
        Err(error) => return error.into_response(),
    };
    if !state.manager.authorize(&actor, &identifier) {
        return KeeperError::permission_deny().into_response();
    }
    let keeper = match state.manager.dispatch(&identifier) {
        Ok(keeper) => keeper,
        Err(error) => return error.into_response(),
    };
    match keeper.destroy_key(id).await {
        Ok(()) => empty_ok(),
        Err(error) => error.into_response(),
    }
}

#[derive(Deserialize)]
struct FreezeUserRequest {
    #[serde(rename = "isFrozen")]
    is_frozen: bool,
}

/// Freezing another user's account is restricted to root, since the membership model
/// carries only a root/non-root distinction (§4.6 User ACL) rather than the tiered
/// privilege levels a richer admin hierarchy would need.
async fn handle_freeze_user(
    State(state): State<WebAdminState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<i64>,
    Json(body): Json<FreezeUserRequest>,
) -> Response {
    if !claims.is_root {
        return KeeperError::permission_deny().into_response();
    }
    if user_id == claims.sub {
        return KeeperError::invalid_request("cannot freeze your own session").into_response();
    }
    let result = if body.is_frozen {
        state.manager.freeze_user(user_id).await
    } else {
        state.manager.unfreeze_user(user_id).await
    };
    match result {
        Ok(()) => {
            AppLogger::log_security_event(
                "user_freeze",
                "warn",
                &format!("user {user_id} set is_frozen={}", body.is_frozen),
            );
            empty_ok()
        }
        Err(error) => error.into_response(),
    }
}

#[derive(Deserialize)]
struct ChangePasswordRequest {
    #[serde(default, rename = "oldPassword")]
    old_password: String,
    #[serde(rename = "newPassword")]
    new_password: String,
}

/// Self-service password change verifies the old password first; root changing another
/// user's password does not need it (§4.12).
async fn handle_change_password(
    State(state): State<WebAdminState>,
    Extension(claims): Extension<Claims>,
    Path(target_id): Path<i64>,
    Json(body): Json<ChangePasswordRequest>,
) -> Response {
    if target_id == claims.sub {
        let self_user = match state.manager.persistence().find_user_by_id(claims.sub).await {
            Ok(Some(user)) => user,
            Ok(None) => return KeeperError::need_login().into_response(),
            Err(error) => return error.into_response(),
        };
        if !verify_password(&body.old_password, &self_user.passwd_hash) {
            return KeeperError::wrong_passwd().into_response();
        }
    } else if !claims.is_root {
        return KeeperError::permission_deny().into_response();
    }
    match state
        .manager
        .persistence()
        .update_password_hash(target_id, &hash_password(&body.new_password))
        .await
    {
        Ok(()) => empty_ok(),
        Err(error) => error.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, SystemClock};
    use crate::keeper::registry::{KeeperRegistry, SAFER_KIND};
    use crate::persistence::{MemoryPersistence, Persistence};
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use tower::ServiceExt;

    async fn test_manager() -> Arc<InstanceManager> {
        let persistence: Arc<dyn Persistence> = Arc::new(MemoryPersistence::new());
        let registry = Arc::new(KeeperRegistry::with_builtins());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        InstanceManager::start(persistence, registry, clock)
            .await
            .expect("startup succeeds")
    }

    fn test_jwt() -> Arc<JwtSecret> {
        Arc::new(JwtSecret::load_or_generate(Some("test-only-fixed-secret-32bytes!")).expect("fixed secret"))
    }

    async fn login_as_root(manager: Arc<InstanceManager>, jwt: Arc<JwtSecret>) -> (Router, String) {
        let app = router(manager, jwt, 3600);
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/api/web/login")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"name":"root","passwd":"root"}"#))
            .expect("valid request");
        let response = app.clone().oneshot(request).await.expect("service call succeeds");
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("readable body");
        let value: serde_json::Value = serde_json::from_slice(&body).expect("valid json");
        let token = value["token"].as_str().expect("token present").to_owned();
        (app, token)
    }

    #[tokio::test]
    async fn login_succeeds_with_bootstrap_root_credentials() {
        let manager = test_manager().await;
        let (_app, token) = login_as_root(manager, test_jwt()).await;
        assert!(!token.is_empty());
    }

    #[tokio::test]
    async fn login_rejects_wrong_password() {
        let manager = test_manager().await;
        let app = router(manager, test_jwt(), 3600);
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/api/web/login")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"name":"root","passwd":"wrong"}"#))
            .expect("valid request");
        let response = app.oneshot(request).await.expect("service call succeeds");
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn authenticated_route_rejects_missing_bearer_token() {
        let manager = test_manager().await;
        let app = router(manager, test_jwt(), 3600);
        let request = HttpRequest::builder()
            .method("GET")
            .uri("/api/web/instances")
            .body(Body::empty())
            .expect("valid request");
        let response = app.oneshot(request).await.expect("service call succeeds");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn root_can_create_and_list_instances() {
        let manager = test_manager().await;
        let (app, token) = login_as_root(manager, test_jwt()).await;

        let create = HttpRequest::builder()
            .method("POST")
            .uri("/api/web/instances")
            .header("authorization", format!("Bearer {token}"))
            .header("content-type", "application/json")
            .body(Body::from(format!(
                r#"{{"identifier":"acme","keeper":"{SAFER_KIND}"}}"#
            )))
            .expect("valid request");
        let response = app.clone().oneshot(create).await.expect("service call succeeds");
        assert_eq!(response.status(), StatusCode::OK);

        let list = HttpRequest::builder()
            .method("GET")
            .uri("/api/web/instances")
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .expect("valid request");
        let response = app.oneshot(list).await.expect("service call succeeds");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn non_root_cannot_freeze_other_users() {
        let manager = test_manager().await;
        let jwt = test_jwt();
        manager
            .persistence()
            .create_user(crate::persistence::NewUser {
                name: "alice".to_owned(),
                passwd_hash: hash_password("secret"),
                level: 1,
            })
            .await
            .expect("fresh username");
        let app = router(manager.clone(), jwt.clone(), 3600);
        let login_request = HttpRequest::builder()
            .method("POST")
            .uri("/api/web/login")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"name":"alice","passwd":"secret"}"#))
            .expect("valid request");
        let response = app.clone().oneshot(login_request).await.expect("service call succeeds");
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("readable body");
        let value: serde_json::Value = serde_json::from_slice(&body).expect("valid json");
        let token = value["token"].as_str().expect("token present").to_owned();

        let freeze_request = HttpRequest::builder()
            .method("POST")
            .uri("/api/web/users/1/freeze")
            .header("authorization", format!("Bearer {token}"))
            .header("content-type", "application/json")
            .body(Body::from(r#"{"isFrozen":true}"#))
            .expect("valid request");
        let response = app.oneshot(freeze_request).await.expect("service call succeeds");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
