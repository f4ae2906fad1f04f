/// file: src/api.rs
/// description: HTTP router, auth/resource checks, and all dealfinder handlers.
/// HTTP API.
///
/// Route map:
///   POST   /api/auth/register
///   POST   /api/auth/login
///   POST   /api/auth/refresh
///   GET    /api/auth/user
///   GET    /api/products/search?q=
///   GET    /api/products/recommended
///   GET    /api/products/similar/{id}
///   GET    /api/products/{id}
///   GET    /api/user/search-history
///   GET    /api/user/search-history/query/{id}
///   DELETE /api/user/search-history/{id}
///   DELETE /api/user/clear/search-history
///   GET    /api/user/favorites
///   POST   /api/user/favorites
///   DELETE /api/user/favorites/{id}
///   GET    /health
use axum::{
    Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::{delete, get, post},
};
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use sysinfo::{CpuRefreshKind, RefreshKind, System};
use tracing::warn;

use crate::auth::{AuthService, AuthedUser, bearer_token};
use crate::cache::ProductCache;
use crate::config::Config;
use crate::database::DbClient;
use crate::models::*;
use crate::scraper::Scraper;

/// How many items the similar/recommended samplers hand back.
const SIMILAR_SAMPLE: usize = 4;
const RECOMMENDED_SAMPLE: usize = 8;
/// How many recent distinct query terms feed the recommendation re-scrape.
const RECOMMENDED_QUERY_TERMS: i64 = 3;

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

/// Cached resource snapshot refreshed every 5 s in the background.
/// Stored as packed u64: high 32 bits = cpu_millipct, low 32 bits = ram_millipct.
#[derive(Clone)]
pub struct ResourceSnapshot(Arc<AtomicU64>);

impl ResourceSnapshot {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU64::new(0)))
    }

    fn store(&self, cpu_frac: f64, ram_frac: f64) {
        let cpu = (cpu_frac * 1_000.0) as u64;
        let ram = (ram_frac * 1_000.0) as u64;
        self.0.store((cpu << 32) | ram, Ordering::Relaxed);
    }

    fn load(&self) -> (f64, f64) {
        let packed = self.0.load(Ordering::Relaxed);
        let cpu = (packed >> 32) as f64 / 1_000.0;
        let ram = (packed & 0xFFFF_FFFF) as f64 / 1_000.0;
        (cpu, ram)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: DbClient,
    pub cache: ProductCache,
    pub scraper: Arc<Scraper>,
    pub auth: AuthService,
    pub cfg: Arc<Config>,
    pub resources: ResourceSnapshot,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        // health
        .route("/health", get(health_handler))
        // auth
        .route("/api/auth/register", post(register_handler))
        .route("/api/auth/login", post(login_handler))
        .route("/api/auth/refresh", post(refresh_handler))
        .route("/api/auth/user", get(current_user_handler))
        // products
        .route("/api/products/search", get(search_handler))
        .route("/api/products/recommended", get(recommended_handler))
        .route("/api/products/similar/{id}", get(similar_handler))
        .route("/api/products/{id}", get(product_detail_handler))
        // search history
        .route("/api/user/search-history", get(history_list_handler))
        .route(
            "/api/user/search-history/query/{id}",
            get(history_results_handler),
        )
        .route(
            "/api/user/search-history/{id}",
            delete(history_delete_handler),
        )
        .route(
            "/api/user/clear/search-history",
            delete(history_clear_handler),
        )
        // favorites
        .route(
            "/api/user/favorites",
            get(favorites_list_handler).post(favorites_create_handler),
        )
        .route(
            "/api/user/favorites/{id}",
            delete(favorites_delete_handler),
        )
        .with_state(state)
}

// ---------------------------------------------------------------------------
// auth helpers
// ---------------------------------------------------------------------------

fn require_user(headers: &HeaderMap, state: &AppState) -> Result<AuthedUser, AppError> {
    let token = bearer_token(headers).ok_or(AppError::Unauthorized)?;
    state.auth.verify_access(token)
}

/// Anonymous callers are fine for the public search path; a valid token just
/// switches history recording on.
fn optional_user(headers: &HeaderMap, state: &AppState) -> Option<AuthedUser> {
    bearer_token(headers).and_then(|t| state.auth.verify_access(t).ok())
}

// ---------------------------------------------------------------------------
// resource gate (cpu / ram) — reads from pre-computed background snapshot
// ---------------------------------------------------------------------------

fn check_resources(state: &AppState) -> Result<(), AppError> {
    let (cpu, ram) = state.resources.load();
    let cfg = &state.cfg;

    if cpu > cfg.resource.max_cpu {
        return Err(AppError::ResourceLimit(format!(
            "CPU usage {:.0}% exceeds limit {:.0}%",
            cpu * 100.0,
            cfg.resource.max_cpu * 100.0
        )));
    }
    if ram > cfg.resource.max_ram {
        return Err(AppError::ResourceLimit(format!(
            "RAM usage {:.0}% exceeds limit {:.0}%",
            ram * 100.0,
            cfg.resource.max_ram * 100.0
        )));
    }
    Ok(())
}

/// Spawns a background task that refreshes CPU/RAM metrics every 5 seconds.
pub fn spawn_resource_monitor(snapshot: ResourceSnapshot) {
    tokio::spawn(async move {
        let mut sys = System::new_with_specifics(
            RefreshKind::everything().with_cpu(CpuRefreshKind::everything()),
        );
        loop {
            sys.refresh_cpu_all();
            sys.refresh_memory();

            let cpu = sys.global_cpu_usage() as f64 / 100.0;
            let total_mem = sys.total_memory() as f64;
            let used_mem = sys.used_memory() as f64;
            let ram = if total_mem > 0.0 {
                used_mem / total_mem
            } else {
                0.0
            };
            snapshot.store(cpu, ram);

            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        }
    });
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = state.db.ping().await;
    let redis_ok = state.cache.ping().await;

    let overall = if db_ok.is_ok() && redis_ok.is_ok() {
        "ok"
    } else {
        "degraded"
    };

    let body = HealthResponse {
        status: overall.to_string(),
        services: ServiceHealth {
            database: ComponentStatus {
                healthy: db_ok.is_ok(),
                error: db_ok.err().map(|e| e.to_string()),
            },
            redis: ComponentStatus {
                healthy: redis_ok.is_ok(),
                error: redis_ok.err().map(|e| e.to_string()),
            },
        },
    };

    let status = if overall == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

// ---------------------------------------------------------------------------
// POST /api/auth/register
// ---------------------------------------------------------------------------

async fn register_handler(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let username = req.username.trim();
    if username.is_empty() {
        return Err(AppError::BadRequest("username must not be empty".into()));
    }
    if req.email.trim().is_empty() {
        return Err(AppError::BadRequest("email must not be empty".into()));
    }
    if req.password.len() < 8 {
        return Err(AppError::BadRequest(
            "password must be at least 8 characters".into(),
        ));
    }

    let hash = crate::auth::hash_password(&req.password);
    let user = state
        .db
        .create_user(username, req.email.trim(), &hash)
        .await?;
    let (token, refresh) = state.auth.issue_pair(&user)?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            refresh,
            user: UserInfo::from(&user),
        }),
    ))
}

// ---------------------------------------------------------------------------
// POST /api/auth/login
// ---------------------------------------------------------------------------

async fn login_handler(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state
        .db
        .get_user_by_username(req.username.trim())
        .await?
        .ok_or(AppError::Unauthorized)?;

    if !crate::auth::verify_password(&req.password, &user.password_hash) {
        return Err(AppError::Unauthorized);
    }

    let (token, refresh) = state.auth.issue_pair(&user)?;
    Ok(Json(AuthResponse {
        token,
        refresh,
        user: UserInfo::from(&user),
    }))
}

// ---------------------------------------------------------------------------
// POST /api/auth/refresh
// ---------------------------------------------------------------------------

async fn refresh_handler(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let subject = state.auth.verify_refresh(&req.refresh)?;
    let token = state.auth.issue_access(&subject)?;
    Ok(Json(RefreshResponse { token }))
}

// ---------------------------------------------------------------------------
// GET /api/auth/user
// ---------------------------------------------------------------------------

async fn current_user_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let authed = require_user(&headers, &state)?;
    let user = state.db.get_user(authed.id).await?;
    Ok(Json(UserInfo::from(&user)))
}

// ---------------------------------------------------------------------------
// GET /api/products/search?q=  — the aggregation pipeline, write-through cache
// ---------------------------------------------------------------------------

async fn search_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, AppError> {
    let query = params.q.as_deref().map(str::trim).unwrap_or_default();
    if query.is_empty() {
        return Err(AppError::BadRequest(
            "Please provide a search query".into(),
        ));
    }
    check_resources(&state)?;

    let products = state.scraper.search(query).await;

    // Write-through: detail lookups resolve against these entries for the
    // cache TTL. A cache hiccup shouldn't kill the search response.
    if let Err(e) = state.cache.store_batch(&products).await {
        warn!(error = %e, "product cache write failed");
    }

    if let Some(user) = optional_user(&headers, &state) {
        state.db.insert_search(user.id, query).await?;
    }

    Ok(Json(products))
}

// ---------------------------------------------------------------------------
// GET /api/products/{id}
// ---------------------------------------------------------------------------

async fn product_detail_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let product = state
        .cache
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("product {id}")))?;

    Ok(Json(product.into_detail()))
}

// ---------------------------------------------------------------------------
// GET /api/products/similar/{id}
// ---------------------------------------------------------------------------

async fn similar_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    check_resources(&state)?;

    // Seed the re-scrape with the product's own name while its cache entry
    // is still live; after expiry fall back to an unseeded scrape.
    let seed = state
        .cache
        .get(&id)
        .await
        .ok()
        .flatten()
        .map(|p| p.name)
        .unwrap_or_default();

    let mut products = state.scraper.search(&seed).await;
    products.retain(|p| p.id != id);

    let sample = sample_products(products, SIMILAR_SAMPLE);
    if let Err(e) = state.cache.store_batch(&sample).await {
        warn!(error = %e, "product cache write failed");
    }

    Ok(Json(sample))
}

// ---------------------------------------------------------------------------
// GET /api/products/recommended — deduplicated re-scrape of recent queries
// ---------------------------------------------------------------------------

async fn recommended_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let user = require_user(&headers, &state)?;
    check_resources(&state)?;

    let mut terms = state
        .db
        .recent_queries(user.id, RECOMMENDED_QUERY_TERMS)
        .await?;
    if terms.is_empty() {
        // No history yet — an unseeded scrape still yields browsable items.
        terms.push(String::new());
    }

    let mut merged = Vec::new();
    for term in &terms {
        merged.extend(state.scraper.search(term).await);
    }

    let sample = sample_products(merged, RECOMMENDED_SAMPLE);
    if let Err(e) = state.cache.store_batch(&sample).await {
        warn!(error = %e, "product cache write failed");
    }

    Ok(Json(sample))
}

fn sample_products(mut products: Vec<Product>, n: usize) -> Vec<Product> {
    products.shuffle(&mut rand::rng());
    products.truncate(n);
    products
}

// ---------------------------------------------------------------------------
// GET /api/user/search-history
// ---------------------------------------------------------------------------

async fn history_list_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let user = require_user(&headers, &state)?;
    let rows = state.db.list_searches(user.id).await?;
    let entries: Vec<SearchHistoryEntry> = rows.iter().map(SearchHistoryEntry::from).collect();
    Ok(Json(entries))
}

// ---------------------------------------------------------------------------
// GET /api/user/search-history/query/{id} — lazily materialized results
// ---------------------------------------------------------------------------

async fn history_results_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user = require_user(&headers, &state)?;
    let row = state.db.get_search(id, user.id).await?;

    let results: Vec<Product> = match row.results {
        Some(stored) => serde_json::from_value(stored)?,
        None => {
            // First view of this history entry: run the pipeline now and
            // persist what it returned.
            check_resources(&state)?;
            let products = state.scraper.search(&row.query).await;
            if let Err(e) = state.cache.store_batch(&products).await {
                warn!(error = %e, "product cache write failed");
            }
            let json = serde_json::to_value(&products)?;
            state.db.set_search_results(id, user.id, &json).await?;
            products
        }
    };

    Ok(Json(SearchHistoryResultResponse {
        query: row.query,
        results,
    }))
}

// ---------------------------------------------------------------------------
// DELETE /api/user/search-history/{id}
// DELETE /api/user/clear/search-history
// ---------------------------------------------------------------------------

async fn history_delete_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user = require_user(&headers, &state)?;
    state.db.delete_search(id, user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn history_clear_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let user = require_user(&headers, &state)?;
    let n = state.db.clear_searches(user.id).await?;
    tracing::debug!(count = n, "search history cleared");
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// GET /api/user/favorites
// POST /api/user/favorites
// DELETE /api/user/favorites/{id}
// ---------------------------------------------------------------------------

async fn favorites_list_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let user = require_user(&headers, &state)?;
    let rows = state.db.list_favorites(user.id).await?;
    let favorites: Vec<FavoriteResponse> = rows.into_iter().map(FavoriteResponse::from).collect();
    Ok(Json(favorites))
}

async fn favorites_create_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<FavoriteCreateRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = require_user(&headers, &state)?;

    // Resolve the product: persisted table first, then the transient cache,
    // then the result set the client echoed back. Scraped listings only
    // reach the products table through this path.
    let product = match state.db.get_product(&req.product_id).await? {
        Some(p) => p,
        None => match state.cache.get(&req.product_id).await? {
            Some(p) => p,
            None => req
                .search_data
                .iter()
                .find(|p| p.id == req.product_id)
                .cloned()
                .ok_or_else(|| {
                    AppError::BadRequest(
                        "Product does not exist in results or database".into(),
                    )
                })?,
        },
    };

    state.db.upsert_product(&product).await?;
    let favorite = state.db.insert_favorite(user.id, &product.id).await?;

    Ok((StatusCode::CREATED, Json(FavoriteResponse::from(favorite))))
}

async fn favorites_delete_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user = require_user(&headers, &state)?;
    state.db.delete_favorite(id, user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: &str) -> Product {
        Product {
            id: id.to_owned(),
            name: format!("item {id}"),
            price: 999,
            image: None,
            source: "Jumia Kenya".to_owned(),
            url: format!("https://example.com/{id}"),
            rating: 4.1,
        }
    }

    #[test]
    fn sampler_caps_and_preserves_membership() {
        let pool: Vec<Product> = (0..20).map(|i| product(&format!("p{i}"))).collect();
        let ids: std::collections::HashSet<_> = pool.iter().map(|p| p.id.clone()).collect();

        let sample = sample_products(pool, SIMILAR_SAMPLE);
        assert_eq!(sample.len(), SIMILAR_SAMPLE);
        assert!(sample.iter().all(|p| ids.contains(&p.id)));
    }

    #[test]
    fn sampler_returns_everything_when_pool_is_small() {
        let pool = vec![product("a"), product("b")];
        let sample = sample_products(pool, RECOMMENDED_SAMPLE);
        assert_eq!(sample.len(), 2);
    }

    #[test]
    fn resource_snapshot_round_trips_fractions() {
        let snap = ResourceSnapshot::new();
        snap.store(0.42, 0.87);
        let (cpu, ram) = snap.load();
        assert!((cpu - 0.42).abs() < 0.01);
        assert!((ram - 0.87).abs() < 0.01);
    }
}
