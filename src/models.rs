/// file: src/models.rs
/// description: Domain models, request/response schemas, and AppError mapping.
/// Domain types, API shapes, and DB row types for dealfinder.
///
/// The JSON field names match what the web client already consumes from the
/// search/favorites/history endpoints, so existing frontends work without
/// modification.
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("scraper error: {0}")]
    Scraper(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("timeout")]
    Timeout,

    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::InvalidUrl(_) | AppError::Serialization(_) | AppError::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            AppError::Timeout => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            AppError::ResourceLimit(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        #[derive(Serialize)]
        struct Body {
            success: bool,
            error: String,
        }

        (
            status,
            Json(Body {
                success: false,
                error: message,
            }),
        )
            .into_response()
    }
}

// ---------------------------------------------------------------------------
// Product — the unified listing schema every source normalizes into
// ---------------------------------------------------------------------------

/// One scraped listing. `id` is generated at scrape time (first 8 chars of a
/// v4 UUID) and is the key for the transient cache, detail lookup, and
/// favorites.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: String,
    pub name: String,
    /// Integer amount in KES.
    pub price: i64,
    pub image: Option<String>,
    /// Human-readable site label, e.g. "Jumia Kenya".
    pub source: String,
    pub url: String,
    /// Synthetic rating in [3.0, 5.0), 1 decimal. The sites don't expose
    /// ratings on search results but the client contract requires the field.
    pub rating: f64,
}

impl Product {
    /// Detail enrichment returned by GET /api/products/{id}.
    pub fn into_detail(self) -> ProductDetail {
        let description = format!(
            "This is a detailed description of {}, listed on {}.",
            self.name, self.source
        );

        let mut specs = BTreeMap::new();
        specs.insert("Source".to_owned(), self.source.clone());
        specs.insert("Price (KES)".to_owned(), self.price.to_string());
        specs.insert("Rating".to_owned(), format!("{:.1}", self.rating));
        if let Ok(parsed) = url::Url::parse(&self.url)
            && let Some(host) = parsed.host_str()
        {
            specs.insert("Listed on".to_owned(), host.to_owned());
        }

        ProductDetail {
            product: self,
            description,
            specs,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductDetail {
    #[serde(flatten)]
    pub product: Product,
    pub description: String,
    pub specs: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// DB row types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// Always fetched through user-scoped queries, so the row doesn't carry the
/// owner id.
#[derive(Debug, Clone)]
pub struct SearchHistoryRow {
    pub id: i64,
    pub query: String,
    pub results: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FavoriteRow {
    pub id: i64,
    pub product: Product,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// HTTP request shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: Option<String>,
}

/// POST /api/user/favorites. `search_data` is the client's current result set,
/// echoed back so a product that has already fallen out of the cache can still
/// be favorited.
#[derive(Debug, Clone, Deserialize)]
pub struct FavoriteCreateRequest {
    pub product_id: String,
    #[serde(default)]
    pub search_data: Vec<Product>,
}

// ---------------------------------------------------------------------------
// HTTP response shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct UserInfo {
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

impl From<&UserRow> for UserInfo {
    fn from(row: &UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username.clone(),
            email: row.email.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    /// Access token (short-lived).
    pub token: String,
    /// Refresh token (long-lived).
    pub refresh: String,
    pub user: UserInfo,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct SearchHistoryEntry {
    pub id: i64,
    pub query: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&SearchHistoryRow> for SearchHistoryEntry {
    fn from(row: &SearchHistoryRow) -> Self {
        Self {
            id: row.id,
            query: row.query.clone(),
            timestamp: row.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchHistoryResultResponse {
    pub query: String,
    pub results: Vec<Product>,
}

#[derive(Debug, Serialize)]
pub struct FavoriteResponse {
    pub id: i64,
    pub product: Product,
    pub timestamp: DateTime<Utc>,
}

impl From<FavoriteRow> for FavoriteResponse {
    fn from(row: FavoriteRow) -> Self {
        Self {
            id: row.id,
            product: row.product,
            timestamp: row.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub services: ServiceHealth,
}

#[derive(Debug, Serialize)]
pub struct ServiceHealth {
    pub database: ComponentStatus,
    pub redis: ComponentStatus,
}

#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_product() -> Product {
        Product {
            id: "ab12cd34".to_owned(),
            name: "Wireless Mouse".to_owned(),
            price: 1499,
            image: Some("https://img.example.com/mouse.jpg".to_owned()),
            source: "Jumia Kenya".to_owned(),
            url: "https://www.jumia.co.ke/wireless-mouse.html".to_owned(),
            rating: 4.3,
        }
    }

    #[test]
    fn detail_enrichment_carries_listing_fields() {
        let detail = sample_product().into_detail();
        assert!(detail.description.contains("Wireless Mouse"));
        assert_eq!(detail.specs.get("Source").unwrap(), "Jumia Kenya");
        assert_eq!(detail.specs.get("Price (KES)").unwrap(), "1499");
        assert_eq!(detail.specs.get("Listed on").unwrap(), "www.jumia.co.ke");
    }

    #[test]
    fn detail_serializes_flattened() {
        let detail = sample_product().into_detail();
        let v = serde_json::to_value(&detail).unwrap();
        // Flattened product fields sit beside the enrichment.
        assert_eq!(v["id"], "ab12cd34");
        assert_eq!(v["price"], 1499);
        assert!(v["description"].is_string());
        assert!(v["specs"].is_object());
    }

    #[test]
    fn product_round_trips_through_json() {
        let p = sample_product();
        let v = serde_json::to_value(&p).unwrap();
        let back: Product = serde_json::from_value(v).unwrap();
        assert_eq!(back, p);
    }
}
