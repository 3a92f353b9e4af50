use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{self, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use entity::role;
use platform_authz::{AuthzError, MenuItem, ResolvedRole, accessible_menu};
use platform_db::{DbError, DbPool, RoleCache, SeedOptions, SeedReport};
use sea_orm::{ConnectionTrait, Statement};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, instrument};

use crate::config::AppConfig;

/// Header carrying the acting admin's role name, set by the upstream session
/// layer.
pub const ROLE_HEADER: &str = "x-admin-role";

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<AppConfig>,
    pub cache: Arc<RoleCache>,
}

#[derive(Clone, Debug)]
pub struct ServeConfig {
    addr: SocketAddr,
}

impl ServeConfig {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::from((host, port)),
        }
    }
}

pub async fn serve(config: ServeConfig, state: AppState) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;

    info!(%config.addr, "masthead listening");
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;
    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed = origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();
    let allow_origin = if allowed.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(allowed)
    };
    CorsLayer::new()
        .allow_headers([
            http::header::CONTENT_TYPE,
            HeaderName::from_static(ROLE_HEADER),
        ])
        .allow_methods([Method::POST, Method::GET])
        .allow_origin(allow_origin)
}

pub fn build_router(state: AppState) -> Router {
    let request_id = MakeRequestUuid;
    let header_name = HeaderName::from_static("x-request-id");
    Router::new()
        .route("/health", get(health_handler))
        .route("/roles", get(list_roles_handler))
        .route("/roles/{name}", get(role_handler))
        .route("/roles/{name}/menu", get(menu_handler))
        .route("/authorize", post(authorize_handler))
        .route("/seed", post(seed_handler))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(header_name.clone(), request_id))
                .layer(PropagateRequestIdLayer::new(header_name))
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&state.config.cors_allowed_origins)),
        )
        .with_state(state)
}

async fn list_roles_handler(State(state): State<AppState>) -> HttpResult<Json<Vec<role::Model>>> {
    Ok(Json(platform_db::list_roles(&state.pool).await?))
}

async fn role_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> HttpResult<Json<ResolvedRole>> {
    let role = find_role(&state, &name).await?;
    Ok(Json(role.as_ref().clone()))
}

async fn menu_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> HttpResult<Json<Vec<MenuItem>>> {
    let role = find_role(&state, &name).await?;
    Ok(Json(accessible_menu(&role)))
}

#[derive(Debug, Deserialize)]
struct AuthorizeRequest {
    role: String,
    #[serde(default)]
    permission: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct AuthorizeResponse {
    role: String,
    permission: Option<String>,
    allowed: bool,
}

#[instrument(name = "http.authorize", skip_all, fields(role = %request.role))]
async fn authorize_handler(
    State(state): State<AppState>,
    Json(request): Json<AuthorizeRequest>,
) -> HttpResult<Json<AuthorizeResponse>> {
    let allowed = state
        .cache
        .resolve(&state.pool, &request.role)
        .await?
        .is_some_and(|role| role.has_permission(request.permission.as_deref()));
    Ok(Json(AuthorizeResponse {
        role: request.role,
        permission: request.permission,
        allowed,
    }))
}

/// Re-seed from the configured catalog. The acting role must be allowed to
/// manage roles.
#[instrument(name = "http.seed", skip_all)]
async fn seed_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> HttpResult<Json<SeedReport>> {
    let acting = acting_role(&state, &headers).await?;
    acting.require_role_management()?;

    let catalog = state
        .config
        .load_catalog(None)
        .map_err(HttpError::internal)?;
    let report = platform_db::seed(
        &state.pool,
        &catalog,
        SeedOptions {
            role_metadata: state.config.role_metadata,
            prune: false,
        },
    )
    .await?;
    state.cache.invalidate_all().await;
    info!(acting = %acting.name, "catalog re-seeded over HTTP");
    Ok(Json(report))
}

async fn acting_role(state: &AppState, headers: &HeaderMap) -> HttpResult<Arc<ResolvedRole>> {
    let name = headers
        .get(ROLE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| HttpError::new(StatusCode::UNAUTHORIZED, "missing acting role"))?;
    state
        .cache
        .resolve(&state.pool, name)
        .await?
        .ok_or_else(|| HttpError::new(StatusCode::FORBIDDEN, "no role assigned"))
}

async fn find_role(state: &AppState, name: &str) -> HttpResult<Arc<ResolvedRole>> {
    state
        .cache
        .resolve(&state.pool, name)
        .await?
        .ok_or_else(|| HttpError::new(StatusCode::NOT_FOUND, "role not found"))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let backend = state.pool.get_database_backend();
    let db_ok = state
        .pool
        .execute(Statement::from_string(backend, "SELECT 1".to_string()))
        .await
        .is_ok();
    Json(HealthResponse {
        ok: db_ok,
        db_ok,
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    db_ok: bool,
    version: &'static str,
}

type HttpResult<T> = Result<T, HttpError>;

#[derive(Debug)]
struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    fn new(status: StatusCode, msg: &str) -> Self {
        Self {
            status,
            message: msg.to_string(),
        }
    }

    fn internal(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

impl From<DbError> for HttpError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Authz(err) => err.into(),
            other => Self::internal(other.into()),
        }
    }
}

impl From<AuthzError> for HttpError {
    fn from(err: AuthzError) -> Self {
        let status = match err {
            AuthzError::Denied { .. } => StatusCode::FORBIDDEN,
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        signal(SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    ctrl_c.await;

    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use migration::{Migrator, MigratorTrait};
    use platform_authz::Catalog;
    use sea_orm::{Database, DatabaseBackend};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    async fn seeded_state() -> AppState {
        let pool = Database::connect("sqlite::memory:").await.unwrap();
        pool.execute(Statement::from_string(
            DatabaseBackend::Sqlite,
            "PRAGMA foreign_keys = ON;".to_string(),
        ))
        .await
        .unwrap();
        Migrator::up(&pool, None).await.unwrap();
        platform_db::seed(&pool, &Catalog::builtin().unwrap(), SeedOptions::default())
            .await
            .unwrap();
        AppState {
            pool,
            config: Arc::new(AppConfig::default()),
            cache: Arc::new(RoleCache::new(true)),
        }
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn authorize(role: &str, permission: Option<&str>) -> Request<Body> {
        Request::post("/authorize")
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "role": role, "permission": permission }).to_string(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn authorize_is_capability_driven() {
        let router = build_router(seeded_state().await);

        let (status, body) = send(router.clone(), authorize("Master Admin", Some("anything.at_all"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["allowed"], json!(true));

        let (_, body) = send(router.clone(), authorize("Reviewers", Some("content.approve"))).await;
        assert_eq!(body["allowed"], json!(true));

        let (_, body) = send(router.clone(), authorize("Reviewers", Some("content.create"))).await;
        assert_eq!(body["allowed"], json!(false));

        let (_, body) = send(router.clone(), authorize("Reviewers", None)).await;
        assert_eq!(body["allowed"], json!(false));

        let (status, body) = send(router, authorize("Interns", Some("content.read"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["allowed"], json!(false));
    }

    #[tokio::test]
    async fn role_lookup_and_menu() {
        let router = build_router(seeded_state().await);

        let (status, body) = send(
            router.clone(),
            Request::get("/roles/Contributors").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["access_level"], json!(3));
        assert_eq!(body["permissions"].as_array().unwrap().len(), 4);

        let (_, body) = send(
            router.clone(),
            Request::get("/roles/Contributors/menu").body(Body::empty()).unwrap(),
        )
        .await;
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Dashboard", "Articles", "Media"]);

        let (status, _) = send(
            router.clone(),
            Request::get("/roles/Nobody").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = send(router, Request::get("/roles").body(Body::empty()).unwrap()).await;
        let roles = body.as_array().unwrap();
        assert_eq!(roles.len(), 10);
        assert_eq!(roles[0]["name"], json!("Master Admin"));
    }

    #[tokio::test]
    async fn seeding_requires_role_management() {
        let state = seeded_state().await;
        let router = build_router(state.clone());

        let (status, _) = send(
            router.clone(),
            Request::post("/seed").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(
            router.clone(),
            Request::post("/seed")
                .header(ROLE_HEADER, "Staff Writers")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(state.cache.len().await, 1);

        let (status, body) = send(
            router,
            Request::post("/seed")
                .header(ROLE_HEADER, "Webmaster")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["roles_created"], json!(0));
        assert!(state.cache.is_empty().await);
    }

    #[tokio::test]
    async fn health_reports_database() {
        let router = build_router(seeded_state().await);
        let (status, body) = send(router, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["db_ok"], json!(true));
    }
}
