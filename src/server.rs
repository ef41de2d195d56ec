// HTTP surface: one route per marketplace, a fan-out search, health and admin clear.
// Listing routes always answer 200. When the resilience layer had to fall back,
// the body carries sample data with `success: false` and the reason in `error`.

use std::{collections::BTreeMap, convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::{rejection::QueryRejection, ConnectInfo, FromRequestParts, Query, State},
    http::{request::Parts, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    orchestrator::{
        Admission, ClearReport, FetchOutcome, FetchRequest, OutcomeSource, ResilientFetcher,
    },
    product::{Product, SearchQuery, Site},
    rate_limiter::DEFAULT_CLIENT_ID,
    sample::sample_listings,
    sources::ListingSource,
};

#[derive(Clone)]
pub struct AppState {
    pub fetcher: Arc<ResilientFetcher<Vec<Product>>>,
    sources: Arc<Vec<Arc<dyn ListingSource>>>,
    // How long a site route may queue behind the rate limiter
    pub max_wait: Duration,
}

impl AppState {
    pub fn new(
        fetcher: Arc<ResilientFetcher<Vec<Product>>>,
        sources: Vec<Arc<dyn ListingSource>>,
        max_wait: Duration,
    ) -> Self {
        Self {
            fetcher,
            sources: Arc::new(sources),
            max_wait,
        }
    }

    fn source(&self, site: Site) -> Option<&Arc<dyn ListingSource>> {
        self.sources.iter().find(|s| s.site() == site)
    }
}

// Caller identity for rate limiting.
// First `X-Forwarded-For` hop, else the peer address, else the shared default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientId(pub String);

impl ClientId {
    fn from_headers(headers: &HeaderMap) -> Option<String> {
        headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}

impl<S> FromRequestParts<S> for ClientId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = Self::from_headers(&parts.headers)
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string());
        Ok(ClientId(id))
    }
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub current_page: u32,
    pub items_per_page: u32,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct ListingResponse {
    pub success: bool,
    pub data: Vec<Product>,
    pub count: usize,
    pub pagination: Pagination,
    pub source: Site,
    pub message: String,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SiteSummary {
    pub count: usize,
    pub origin: &'static str,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub success: bool,
    pub data: Vec<Product>,
    pub count: usize,
    pub sites: BTreeMap<&'static str, SiteSummary>,
    pub message: String,
}

fn origin(source: &OutcomeSource) -> &'static str {
    match source {
        OutcomeSource::Cached => "cached",
        OutcomeSource::Fresh => "fresh",
        OutcomeSource::Degraded(_) => "fallback",
    }
}

fn bad_request(rejection: QueryRejection) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "success": false, "error": rejection.body_text() })),
    )
        .into_response()
}

async fn fetch_site(
    state: &AppState,
    source: &Arc<dyn ListingSource>,
    query: &SearchQuery,
    client_id: &str,
    admission: Admission,
) -> FetchOutcome<Vec<Product>> {
    let site = source.site();
    let cache_key = query.cache_key(site);
    let request = FetchRequest::new(&cache_key, client_id, site.as_str()).with_admission(admission);
    let fallback_count = query.items_per_page as usize;

    let outcome = state
        .fetcher
        .fetch(
            &request,
            || source.search(query),
            || sample_listings(site, fallback_count),
        )
        .await;

    tracing::info!(
        site = %site,
        client_id,
        count = outcome.value.len(),
        origin = origin(&outcome.source),
        "listing search served"
    );
    outcome
}

async fn site_listings(
    site: Site,
    state: AppState,
    client: ClientId,
    query: Result<Query<SearchQuery>, QueryRejection>,
) -> Response {
    let query = match query {
        Ok(Query(query)) => query.normalized(),
        Err(rejection) => return bad_request(rejection),
    };
    let Some(source) = state.source(site) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": format!("{site} is not configured") })),
        )
            .into_response();
    };

    let admission = Admission::Wait {
        max_wait: state.max_wait,
    };
    let outcome = fetch_site(&state, source, &query, &client.0, admission).await;

    let count = outcome.value.len();
    let error = outcome.warning();
    let message = match &outcome.source {
        OutcomeSource::Fresh => format!("Found {count} {site} listings"),
        OutcomeSource::Cached => format!("Found {count} {site} listings (cached)"),
        OutcomeSource::Degraded(_) => format!("Showing {count} sample {site} listings"),
    };

    Json(ListingResponse {
        success: !outcome.is_degraded(),
        pagination: Pagination {
            current_page: query.page,
            items_per_page: query.items_per_page,
            has_more: !outcome.is_degraded() && count >= query.items_per_page as usize,
        },
        count,
        data: outcome.value,
        source: site,
        message,
        error,
    })
    .into_response()
}

async fn vinted(
    State(state): State<AppState>,
    client: ClientId,
    query: Result<Query<SearchQuery>, QueryRejection>,
) -> Response {
    site_listings(Site::Vinted, state, client, query).await
}

async fn ebay(
    State(state): State<AppState>,
    client: ClientId,
    query: Result<Query<SearchQuery>, QueryRejection>,
) -> Response {
    site_listings(Site::Ebay, state, client, query).await
}

async fn vestiaire(
    State(state): State<AppState>,
    client: ClientId,
    query: Result<Query<SearchQuery>, QueryRejection>,
) -> Response {
    site_listings(Site::Vestiaire, state, client, query).await
}

// Fans out to every site at once; a busy client gets fallbacks instead of queueing
async fn search_all(
    State(state): State<AppState>,
    client: ClientId,
    query: Result<Query<SearchQuery>, QueryRejection>,
) -> Response {
    let query = match query {
        Ok(Query(query)) => query.normalized(),
        Err(rejection) => return bad_request(rejection),
    };

    let outcomes = join_all(
        state
            .sources
            .iter()
            .map(|source| fetch_site(&state, source, &query, &client.0, Admission::Reject)),
    )
    .await;

    let mut data = Vec::new();
    let mut sites = BTreeMap::new();
    let mut degraded = 0;
    for (source, outcome) in state.sources.iter().zip(outcomes) {
        if outcome.is_degraded() {
            degraded += 1;
        }
        sites.insert(
            source.site().as_str(),
            SiteSummary {
                count: outcome.value.len(),
                origin: origin(&outcome.source),
                error: outcome.warning(),
            },
        );
        data.extend(outcome.value);
    }

    let count = data.len();
    Json(SearchResponse {
        success: degraded < sites.len(),
        message: format!(
            "Found {count} listings across {} sites ({degraded} degraded)",
            sites.len()
        ),
        data,
        count,
        sites,
    })
    .into_response()
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.fetcher.health())
}

#[derive(Debug, Serialize)]
struct ClearResponse {
    success: bool,
    message: &'static str,
    #[serde(flatten)]
    report: ClearReport,
}

async fn clear_cache(State(state): State<AppState>) -> impl IntoResponse {
    Json(ClearResponse {
        success: true,
        message: "Cache cleared and rate limits reset",
        report: state.fetcher.clear(),
    })
}

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(vinted))
        .route("/vinted", get(vinted))
        .route("/ebay", get(ebay))
        .route("/vestiaire", get(vestiaire))
        .route("/search", get(search_all))
        .route("/health", get(health))
        .route("/cache/clear", get(clear_cache).post(clear_cache))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors())
        .with_state(state)
}
