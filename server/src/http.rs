use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    Extension, Json, Router,
    extract::{Path, Query, Request, State},
    http::{self, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header::AUTHORIZATION},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use chrono::{DateTime, FixedOffset};
use entity::cases;
use platform_api::{ApiError, ApiResult};
use platform_gate::{Admission, Caller, Engine, GateError, UsageSummary};
use sea_orm::{ActiveValue::Set, EntityTrait, QueryOrder};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;

const IDEMPOTENCY_KEY: &str = "idempotency-key";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub config: Arc<AppConfig>,
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(%addr, "tenant gate listening");
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
            http::header::AUTHORIZATION,
            HeaderName::from_static(IDEMPOTENCY_KEY),
        ])
        .allow_methods([Method::POST, Method::GET])
        .allow_origin(allow_origin)
}

pub fn build_router(state: AppState) -> Router {
    let request_id = MakeRequestUuid;
    let header_name = HeaderName::from_static("x-request-id");

    let protected = Router::new()
        .route("/cases", get(list_cases).post(create_case))
        .route("/cases/{id}", get(get_case))
        .route("/analyses", post(run_analysis))
        .route("/usage", get(usage_handler))
        .route("/credits/top-up", post(top_up_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_caller));

    Router::new()
        .route("/health", get(health_handler))
        .route("/shared/{case_id}", get(shared_case_handler))
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(header_name.clone(), request_id))
                .layer(PropagateRequestIdLayer::new(header_name))
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&state.config.cors_allowed_origins)),
        )
        .with_state(state)
}

/// Resolves the bearer credential and stores the [`Caller`] for handlers.
async fn require_caller(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> ApiResult<Response> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let caller = state.engine.authenticate_header(header).await?;
    request.extensions_mut().insert(caller);
    Ok(next.run(request).await)
}

fn idempotency_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(IDEMPOTENCY_KEY)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    db_ok: bool,
    audit_failures: u64,
    version: &'static str,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_ok = state.engine.db().ping().await.is_ok();
    Json(HealthResponse {
        ok: db_ok,
        db_ok,
        audit_failures: state.engine.audit_failures(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Serialize)]
struct CaseView {
    id: Uuid,
    title: String,
    assigned_user_id: Option<Uuid>,
    client_user_id: Option<Uuid>,
    created_at: DateTime<FixedOffset>,
}

impl From<cases::Model> for CaseView {
    fn from(model: cases::Model) -> Self {
        Self {
            id: model.id,
            title: model.title,
            assigned_user_id: model.assigned_user_id,
            client_user_id: model.client_user_id,
            created_at: model.created_at,
        }
    }
}

async fn list_cases(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<Json<Vec<CaseView>>> {
    state.engine.admit(&caller, "case.read", "cases", None).await?;
    let txn = state.engine.tenant_txn(&caller).await?;
    let rows = state
        .engine
        .scope(&caller)
        .select::<cases::Entity>()
        .order_by_asc(cases::Column::CreatedAt)
        .all(&txn)
        .await
        .map_err(|err| ApiError::internal(err.into()))?;
    txn.commit().await.map_err(|err| ApiError::internal(err.into()))?;
    Ok(Json(rows.into_iter().map(CaseView::from).collect()))
}

async fn get_case(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CaseView>> {
    state
        .engine
        .admit(&caller, "case.read", &format!("case:{id}"), None)
        .await?;
    let txn = state.engine.tenant_txn(&caller).await?;
    let case = state
        .engine
        .scope(&caller)
        .find_by_id::<cases::Entity, _, _>(&txn, id)
        .await
        .map_err(GateError::from)?;
    txn.commit().await.map_err(|err| ApiError::internal(err.into()))?;
    Ok(Json(case.into()))
}

#[derive(Debug, Deserialize)]
struct CreateCase {
    title: String,
    #[serde(default)]
    assigned_user_id: Option<Uuid>,
    #[serde(default)]
    client_user_id: Option<Uuid>,
}

async fn create_case(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(input): Json<CreateCase>,
) -> ApiResult<(StatusCode, Json<CaseView>)> {
    let title = input.title.trim();
    if title.is_empty() {
        return Err(ApiError::InvalidInput("title must not be empty".into()));
    }
    state.engine.admit(&caller, "case.create", "cases", None).await?;
    let model = cases::ActiveModel {
        id: Set(Uuid::new_v4()),
        title: Set(title.to_string()),
        assigned_user_id: Set(input.assigned_user_id),
        client_user_id: Set(input.client_user_id),
        created_at: Set(state.engine.now().fixed_offset()),
        ..Default::default()
    };
    let txn = state.engine.tenant_txn(&caller).await?;
    let case = state
        .engine
        .scope(&caller)
        .insert(&txn, model)
        .await
        .map_err(GateError::from)?;
    txn.commit().await.map_err(|err| ApiError::internal(err.into()))?;
    Ok((StatusCode::CREATED, Json(case.into())))
}

#[derive(Debug, Deserialize)]
struct RunAnalysis {
    case_id: Uuid,
}

#[derive(Debug, Serialize)]
struct AnalysisResponse {
    case_id: Uuid,
    #[serde(flatten)]
    admission: Admission,
}

async fn run_analysis(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    headers: HeaderMap,
    Json(input): Json<RunAnalysis>,
) -> ApiResult<Json<AnalysisResponse>> {
    // Metering only starts once the case is known to exist in scope.
    let txn = state.engine.tenant_txn(&caller).await?;
    state
        .engine
        .scope(&caller)
        .find_by_id::<cases::Entity, _, _>(&txn, input.case_id)
        .await
        .map_err(GateError::from)?;
    txn.commit().await.map_err(|err| ApiError::internal(err.into()))?;

    let resource = format!("case:{}", input.case_id);
    let admission = state
        .engine
        .admit(&caller, "site_analysis.run", &resource, idempotency_key(&headers))
        .await?;

    Ok(Json(AnalysisResponse {
        case_id: input.case_id,
        admission,
    }))
}

async fn usage_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<Json<UsageSummary>> {
    Ok(Json(state.engine.usage_summary(&caller).await?))
}

#[derive(Debug, Deserialize)]
struct TopUp {
    credit_type: String,
    amount: i64,
}

#[derive(Debug, Serialize)]
struct BalanceResponse {
    credit_type: String,
    balance: i64,
}

async fn top_up_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(input): Json<TopUp>,
) -> ApiResult<Json<BalanceResponse>> {
    let balance = state
        .engine
        .top_up(&caller, &input.credit_type, input.amount)
        .await?;
    Ok(Json(BalanceResponse {
        credit_type: input.credit_type,
        balance,
    }))
}

#[derive(Debug, Deserialize)]
struct ShareQuery {
    token: String,
}

#[derive(Debug, Serialize)]
struct SharedCaseView {
    id: Uuid,
    title: String,
}

/// Unauthenticated, read-only view of exactly the case the token names.
async fn shared_case_handler(
    State(state): State<AppState>,
    Path(case_id): Path<Uuid>,
    Query(query): Query<ShareQuery>,
) -> ApiResult<Json<SharedCaseView>> {
    state
        .engine
        .verify_share_token(&query.token, &case_id.to_string())
        .await?;
    let case = cases::Entity::find_by_id(case_id)
        .one(state.engine.db())
        .await
        .map_err(|err| ApiError::internal(err.into()))?
        .ok_or(GateError::ScopeViolation)?;
    Ok(Json(SharedCaseView {
        id: case.id,
        title: case.title,
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    ctrl_c.await;

    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    };
}
