/// file: src/config.rs
/// description: Typed environment configuration with strict fail-fast parsing.
use std::net::SocketAddr;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    pub scraper: ScraperConfig,
    pub proxy: ProxyConfig,
    pub resource: ResourceConfig,
}

impl Config {
    /// Load from environment (dotenv + real env).
    ///
    /// This loader is intentionally fail-fast: required settings must be
    /// provided by environment/.env so production deployments are explicit.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Config {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            redis: RedisConfig::from_env()?,
            auth: AuthConfig::from_env()?,
            scraper: ScraperConfig::from_env()?,
            proxy: ProxyConfig::from_env(),
            resource: ResourceConfig::from_env()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_allow_origins: Vec<String>,
}

impl ServerConfig {
    fn from_env() -> anyhow::Result<Self> {
        let cors_allow_origins = env_opt("CORS_ALLOW_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToOwned::to_owned)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Ok(Self {
            host: env_required_str("HOST")?,
            port: env_required_u16("PORT")?,
            cors_allow_origins,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

// ---------------------------------------------------------------------------
// Database (PostgreSQL)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub max_connections: usize,
}

impl DatabaseConfig {
    fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            host: env_required_str("POSTGRES_HOST")?,
            port: env_required_u16("POSTGRES_PORT")?,
            database: env_required_str("POSTGRES_DB")?,
            user: env_required_str("POSTGRES_USER")?,
            password: env_required_str("POSTGRES_PASSWORD")?,
            max_connections: env_required_usize("DATABASE_MAX_CONNECTIONS")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Redis (transient product cache)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    /// TTL for cached scraped products. Product detail lookups only resolve
    /// while the entry lives, so this bounds how long a result page stays
    /// clickable.
    pub product_ttl_seconds: u64,
}

impl RedisConfig {
    fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            url: env_required_str("REDIS_URL")?,
            product_ttl_seconds: env_required_u64("PRODUCT_CACHE_TTL_SECONDS")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Auth (JWT)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub access_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
}

impl AuthConfig {
    fn from_env() -> anyhow::Result<Self> {
        let secret = env_required_str("JWT_SECRET")?;
        if secret.len() < 16 {
            return Err(anyhow::anyhow!("JWT_SECRET must be at least 16 bytes"));
        }
        Ok(Self {
            jwt_secret: secret,
            jwt_issuer: env_required_str("JWT_ISSUER")?,
            access_ttl_seconds: env_required_i64("ACCESS_TOKEN_TTL_SECONDS")?,
            refresh_ttl_seconds: env_required_i64("REFRESH_TOKEN_TTL_SECONDS")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Scraper
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub user_agent: String,
    pub request_timeout_seconds: u64,
    /// Enabled source names (comma-separated in SCRAPER_SOURCES, e.g.
    /// "jumia,kilimall,jiji"). Resolved against the source registry at
    /// startup; unknown names abort the boot.
    pub sources: Vec<String>,
    /// Hard cap on aggregated results per search.
    pub max_results: usize,
    /// Extra settle time after navigation for browser-rendered sources.
    pub browser_page_wait_ms: u64,
}

impl ScraperConfig {
    fn from_env() -> anyhow::Result<Self> {
        let sources = env_required_str("SCRAPER_SOURCES")?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_ascii_lowercase)
            .collect::<Vec<_>>();
        if sources.is_empty() {
            return Err(anyhow::anyhow!(
                "SCRAPER_SOURCES must name at least one source"
            ));
        }

        Ok(Self {
            user_agent: env_required_str("SCRAPER_USER_AGENT")?,
            request_timeout_seconds: env_required_u64("SCRAPER_REQUEST_TIMEOUT_SECONDS")?,
            sources,
            max_results: env_required_usize("SCRAPER_MAX_RESULTS")?,
            browser_page_wait_ms: env_required_u64("BROWSER_PAGE_WAIT_MS")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Proxy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub server: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyConfig {
    fn from_env() -> Self {
        Self {
            server: env_opt("PROXY_SERVER"),
            username: env_opt("PROXY_USERNAME"),
            password: env_opt("PROXY_PASSWORD"),
        }
    }
}

// ---------------------------------------------------------------------------
// Resource limits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ResourceConfig {
    /// Reject new scrapes when CPU fraction exceeds this (0.0–1.0).
    pub max_cpu: f64,
    /// Reject new scrapes when RAM fraction exceeds this (0.0–1.0).
    pub max_ram: f64,
}

impl ResourceConfig {
    fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            max_cpu: env_required_f64("MAX_CPU")?,
            max_ram: env_required_f64("MAX_RAM")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Env-reading helpers
// ---------------------------------------------------------------------------

fn env_required_str(key: &str) -> anyhow::Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("Missing required env var: {key}"))
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_required_u16(key: &str) -> anyhow::Result<u16> {
    let raw = env_required_str(key)?;
    raw.parse()
        .map_err(|_| anyhow::anyhow!("Invalid u16 value for env var {key}: {raw}"))
}

fn env_required_u64(key: &str) -> anyhow::Result<u64> {
    let raw = env_required_str(key)?;
    raw.parse()
        .map_err(|_| anyhow::anyhow!("Invalid u64 value for env var {key}: {raw}"))
}

fn env_required_i64(key: &str) -> anyhow::Result<i64> {
    let raw = env_required_str(key)?;
    raw.parse()
        .map_err(|_| anyhow::anyhow!("Invalid i64 value for env var {key}: {raw}"))
}

fn env_required_usize(key: &str) -> anyhow::Result<usize> {
    let raw = env_required_str(key)?;
    raw.parse()
        .map_err(|_| anyhow::anyhow!("Invalid usize value for env var {key}: {raw}"))
}

fn env_required_f64(key: &str) -> anyhow::Result<f64> {
    let raw = env_required_str(key)?;
    raw.parse()
        .map_err(|_| anyhow::anyhow!("Invalid f64 value for env var {key}: {raw}"))
}
