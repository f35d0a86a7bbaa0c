// src/api.rs
//! Read-only HTTP API over stored rates.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::ingest::types::{Currency, ExchangeRate, RateType, Source};
use crate::storage::{Page, RateQuery, RateStore};

pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: u32 = 500;

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn RateStore>,
}

pub fn router(store: Arc<dyn RateStore>) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/v1/rates/{base}", get(rates_for_base))
        .route("/v1/rates/{base}/{target}", get(rates_for_pair))
        .route("/v1/rates/{base}/{target}/history", get(history_for_pair))
        .route("/v1/sources", get(sources))
        .route("/v1/currencies", get(currencies))
        .layer(CorsLayer::very_permissive())
        .with_state(AppState { store })
}

/// JSON error body: `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    /// Storage details are logged, not returned.
    fn internal(what: &str, err: anyhow::Error) -> Self {
        tracing::debug!(target: "api", error = ?err, "{what}");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: what.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
struct RatesParams {
    as_of: Option<String>,
    from: Option<String>,
    to: Option<String>,
    limit: Option<String>,
    offset: Option<String>,
    source: Option<String>,
    #[serde(rename = "type")]
    rate_type: Option<String>,
}

#[derive(Serialize)]
struct ListResponse<T> {
    results: Vec<T>,
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn parse_currency(raw: &str) -> Result<Currency, ApiError> {
    raw.parse::<Currency>()
        .map_err(|e| ApiError::bad_request(e.to_string()))
}

fn parse_time(raw: Option<&str>, name: &str) -> Result<Option<DateTime<Utc>>, ApiError> {
    raw.map(|v| {
        DateTime::parse_from_rfc3339(v)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| ApiError::bad_request(format!("invalid {name} (must be RFC3339)")))
    })
    .transpose()
}

/// Missing or zero limit means the default; larger values are clamped.
fn parse_paging(p: &RatesParams) -> Result<(u32, u64), ApiError> {
    let limit = match non_empty(&p.limit) {
        None => DEFAULT_LIMIT,
        Some(v) => v
            .parse::<u32>()
            .map_err(|_| ApiError::bad_request("invalid limit"))?,
    };
    let limit = match limit {
        0 => DEFAULT_LIMIT,
        n => n.min(MAX_LIMIT),
    };
    let offset = match non_empty(&p.offset) {
        None => 0,
        Some(v) => v
            .parse::<u64>()
            .map_err(|_| ApiError::bad_request("invalid offset"))?,
    };
    Ok((limit, offset))
}

fn build_query(base: Currency, target: Option<Currency>, p: &RatesParams) -> Result<RateQuery, ApiError> {
    let mut q = RateQuery::new(base);
    q.target = target;
    q.source = non_empty(&p.source).map(Source::from);
    q.rate_type = non_empty(&p.rate_type)
        .map(|v| v.parse::<RateType>().map_err(|_| ApiError::bad_request("invalid type")))
        .transpose()?;
    Ok(q)
}

async fn latest_page(
    store: &dyn RateStore,
    q: RateQuery,
    p: &RatesParams,
) -> Result<Json<Page<ExchangeRate>>, ApiError> {
    let as_of = parse_time(non_empty(&p.as_of), "as_of")?.unwrap_or_else(Utc::now);
    let (limit, offset) = parse_paging(p)?;
    store
        .rates_as_of(&q, as_of, limit, offset)
        .await
        .map(Json)
        .map_err(|e| ApiError::internal("unable to fetch rates", e))
}

async fn rates_for_pair(
    State(state): State<AppState>,
    Path((base, target)): Path<(String, String)>,
    Query(p): Query<RatesParams>,
) -> Result<Json<Page<ExchangeRate>>, ApiError> {
    let base = parse_currency(&base)?;
    let target = parse_currency(&target)?;
    let q = build_query(base, Some(target), &p)?;
    latest_page(state.store.as_ref(), q, &p).await
}

async fn rates_for_base(
    State(state): State<AppState>,
    Path(base): Path<String>,
    Query(p): Query<RatesParams>,
) -> Result<Json<Page<ExchangeRate>>, ApiError> {
    let base = parse_currency(&base)?;
    let q = build_query(base, None, &p)?;
    latest_page(state.store.as_ref(), q, &p).await
}

/// Every observation in `[from, to]`, oldest first. `to` defaults to now and
/// `from` to one day before `to`.
async fn history_for_pair(
    State(state): State<AppState>,
    Path((base, target)): Path<(String, String)>,
    Query(p): Query<RatesParams>,
) -> Result<Json<Page<ExchangeRate>>, ApiError> {
    let base = parse_currency(&base)?;
    let target = parse_currency(&target)?;
    let q = build_query(base, Some(target), &p)?;

    let to = parse_time(non_empty(&p.to), "to")?.unwrap_or_else(Utc::now);
    let from = parse_time(non_empty(&p.from), "from")?.unwrap_or(to - chrono::Duration::days(1));
    if from > to {
        return Err(ApiError::bad_request("invalid range (from is after to)"));
    }
    let (limit, offset) = parse_paging(&p)?;

    state
        .store
        .rates_in_range(&q, from, to, limit, offset)
        .await
        .map(Json)
        .map_err(|e| ApiError::internal("unable to fetch rates", e))
}

async fn sources(State(state): State<AppState>) -> Result<Json<ListResponse<Source>>, ApiError> {
    let results = state
        .store
        .list_sources()
        .await
        .map_err(|e| ApiError::internal("unable to fetch sources", e))?;
    Ok(Json(ListResponse { results }))
}

async fn currencies(State(state): State<AppState>) -> Result<Json<ListResponse<Currency>>, ApiError> {
    let results = state
        .store
        .list_currencies()
        .await
        .map_err(|e| ApiError::internal("unable to fetch currencies", e))?;
    Ok(Json(ListResponse { results }))
}
