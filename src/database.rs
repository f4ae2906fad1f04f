/// file: src/database.rs
/// description: PostgreSQL pool setup and user/search/favorite data access layer.
/// Database layer — deadpool_postgres pool + all SQL operations.
///
/// The DDL is embedded in `migrations/001_initial.sql`. Every per-user query
/// carries a `user_id` predicate so ownership is enforced in SQL, not in
/// handler code.
use crate::config::DatabaseConfig;
use crate::models::{AppError, FavoriteRow, Product, SearchHistoryRow, UserRow};
use deadpool_postgres::{
    Config as PoolConfig, ManagerConfig, Pool, PoolConfig as DeadpoolPoolConfig, RecyclingMethod,
    Runtime,
};
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Pool construction
// ---------------------------------------------------------------------------

pub fn build_pool(cfg: &DatabaseConfig) -> anyhow::Result<Pool> {
    let mut pc = PoolConfig::new();
    pc.host = Some(cfg.host.clone());
    pc.port = Some(cfg.port);
    pc.dbname = Some(cfg.database.clone());
    pc.user = Some(cfg.user.clone());
    if !cfg.password.is_empty() {
        pc.password = Some(cfg.password.clone());
    }
    pc.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    pc.pool = Some(DeadpoolPoolConfig::new(cfg.max_connections));

    pc.create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| anyhow::anyhow!("Failed to create DB pool: {e}"))
}

// ---------------------------------------------------------------------------
// Column-list constants
// ---------------------------------------------------------------------------

const USER_COLS: &str = "id, username, email, password_hash";

const SH_COLS: &str = "id, query, results, created_at";

/// favorites joined against products; product columns are aliased with a
/// `product_` prefix so the mapper can't confuse the two id columns.
const FAV_COLS: &str = "f.id, f.created_at, \
     p.id AS product_id, p.name AS product_name, p.price AS product_price, \
     p.image AS product_image, p.source AS product_source, p.url AS product_url, \
     p.rating AS product_rating";

// ---------------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------------

fn map_user_row(row: &Row) -> UserRow {
    UserRow {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
    }
}

fn map_search_row(row: &Row) -> SearchHistoryRow {
    SearchHistoryRow {
        id: row.get("id"),
        query: row.get("query"),
        results: row.get("results"),
        created_at: row.get("created_at"),
    }
}

fn map_favorite_row(row: &Row) -> FavoriteRow {
    FavoriteRow {
        id: row.get("id"),
        created_at: row.get("created_at"),
        product: Product {
            id: row.get("product_id"),
            name: row.get("product_name"),
            price: row.get("product_price"),
            image: row.get("product_image"),
            source: row.get("product_source"),
            url: row.get("product_url"),
            rating: row.get("product_rating"),
        },
    }
}

// ---------------------------------------------------------------------------
// DbClient
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct DbClient {
    pool: Pool,
}

impl DbClient {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    // ── Liveness ────────────────────────────────────────────────────────────

    pub async fn ping(&self) -> Result<(), AppError> {
        let conn = self.pool.get().await?;
        conn.execute("SELECT 1", &[]).await?;
        Ok(())
    }

    // ── Users ───────────────────────────────────────────────────────────────

    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<UserRow, AppError> {
        let conn = self.pool.get().await?;
        let sql = format!(
            "INSERT INTO users (username, email, password_hash) \
             VALUES ($1, $2, $3) \
             RETURNING {USER_COLS}"
        );
        let row = conn
            .query_one(&sql, &[&username, &email, &password_hash])
            .await
            .map_err(|e| {
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    AppError::BadRequest(format!("username `{username}` is already taken"))
                } else {
                    AppError::Postgres(e)
                }
            })?;
        Ok(map_user_row(&row))
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>, AppError> {
        let conn = self.pool.get().await?;
        let sql = format!("SELECT {USER_COLS} FROM users WHERE username = $1");
        let rows = conn.query(&sql, &[&username]).await?;
        Ok(rows.first().map(map_user_row))
    }

    pub async fn get_user(&self, id: Uuid) -> Result<UserRow, AppError> {
        let conn = self.pool.get().await?;
        let sql = format!("SELECT {USER_COLS} FROM users WHERE id = $1");
        let rows = conn.query(&sql, &[&id]).await?;
        rows.first()
            .map(map_user_row)
            .ok_or(AppError::NotFound(id.to_string()))
    }

    // ── Search history ──────────────────────────────────────────────────────

    pub async fn insert_search(
        &self,
        user_id: Uuid,
        query: &str,
    ) -> Result<SearchHistoryRow, AppError> {
        let conn = self.pool.get().await?;
        let sql = format!(
            "INSERT INTO search_history (user_id, query) \
             VALUES ($1, $2) \
             RETURNING {SH_COLS}"
        );
        let row = conn.query_one(&sql, &[&user_id, &query]).await?;
        Ok(map_search_row(&row))
    }

    pub async fn list_searches(&self, user_id: Uuid) -> Result<Vec<SearchHistoryRow>, AppError> {
        let conn = self.pool.get().await?;
        let sql = format!(
            "SELECT {SH_COLS} FROM search_history \
             WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC"
        );
        let rows = conn.query(&sql, &[&user_id]).await?;
        Ok(rows.iter().map(map_search_row).collect())
    }

    pub async fn get_search(&self, id: i64, user_id: Uuid) -> Result<SearchHistoryRow, AppError> {
        let conn = self.pool.get().await?;
        let sql = format!("SELECT {SH_COLS} FROM search_history WHERE id = $1 AND user_id = $2");
        let rows = conn.query(&sql, &[&id, &user_id]).await?;
        rows.first()
            .map(map_search_row)
            .ok_or(AppError::NotFound(id.to_string()))
    }

    /// Persist the (re-)scraped results JSON onto a history row.
    pub async fn set_search_results(
        &self,
        id: i64,
        user_id: Uuid,
        results: &serde_json::Value,
    ) -> Result<(), AppError> {
        let conn = self.pool.get().await?;
        let n = conn
            .execute(sql_set_search_results(), &[&id, &user_id, &results])
            .await?;
        if n == 0 {
            return Err(AppError::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn delete_search(&self, id: i64, user_id: Uuid) -> Result<(), AppError> {
        let conn = self.pool.get().await?;
        let n = conn.execute(sql_delete_search(), &[&id, &user_id]).await?;
        if n == 0 {
            return Err(AppError::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn clear_searches(&self, user_id: Uuid) -> Result<u64, AppError> {
        let conn = self.pool.get().await?;
        let n = conn
            .execute("DELETE FROM search_history WHERE user_id = $1", &[&user_id])
            .await?;
        Ok(n)
    }

    /// Most recent distinct query terms, newest first — feeds the
    /// recommendation re-scrape.
    pub async fn recent_queries(&self, user_id: Uuid, limit: i64) -> Result<Vec<String>, AppError> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query(sql_recent_queries(), &[&user_id, &limit])
            .await?;
        Ok(rows.iter().map(|r| r.get("query")).collect())
    }

    // ── Products (persisted only when favorited) ────────────────────────────

    pub async fn upsert_product(&self, product: &Product) -> Result<(), AppError> {
        let conn = self.pool.get().await?;
        conn.execute(
            sql_upsert_product(),
            &[
                &product.id,
                &product.name,
                &product.price,
                &product.image,
                &product.source,
                &product.url,
                &product.rating,
            ],
        )
        .await?;
        Ok(())
    }

    pub async fn get_product(&self, id: &str) -> Result<Option<Product>, AppError> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query(
                "SELECT id, name, price, image, source, url, rating \
                 FROM products WHERE id = $1",
                &[&id],
            )
            .await?;
        Ok(rows.first().map(|row| Product {
            id: row.get("id"),
            name: row.get("name"),
            price: row.get("price"),
            image: row.get("image"),
            source: row.get("source"),
            url: row.get("url"),
            rating: row.get("rating"),
        }))
    }

    // ── Favorites ───────────────────────────────────────────────────────────

    /// Idempotent: favoriting the same product twice returns the existing row.
    pub async fn insert_favorite(
        &self,
        user_id: Uuid,
        product_id: &str,
    ) -> Result<FavoriteRow, AppError> {
        let conn = self.pool.get().await?;
        conn.execute(sql_insert_favorite(), &[&user_id, &product_id])
            .await?;

        let sql = format!(
            "SELECT {FAV_COLS} FROM favorites f \
             JOIN products p ON p.id = f.product_id \
             WHERE f.user_id = $1 AND f.product_id = $2"
        );
        let row = conn.query_one(&sql, &[&user_id, &product_id]).await?;
        Ok(map_favorite_row(&row))
    }

    pub async fn list_favorites(&self, user_id: Uuid) -> Result<Vec<FavoriteRow>, AppError> {
        let conn = self.pool.get().await?;
        let sql = format!(
            "SELECT {FAV_COLS} FROM favorites f \
             JOIN products p ON p.id = f.product_id \
             WHERE f.user_id = $1 \
             ORDER BY f.created_at DESC, f.id DESC"
        );
        let rows = conn.query(&sql, &[&user_id]).await?;
        Ok(rows.iter().map(map_favorite_row).collect())
    }

    pub async fn delete_favorite(&self, id: i64, user_id: Uuid) -> Result<(), AppError> {
        let conn = self.pool.get().await?;
        let n = conn
            .execute(sql_delete_favorite(), &[&id, &user_id])
            .await?;
        if n == 0 {
            return Err(AppError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SQL constants (kept as functions so the predicates are unit-testable)
// ---------------------------------------------------------------------------

fn sql_set_search_results() -> &'static str {
    "UPDATE search_history SET results = $3 WHERE id = $1 AND user_id = $2"
}

fn sql_delete_search() -> &'static str {
    "DELETE FROM search_history WHERE id = $1 AND user_id = $2"
}

fn sql_delete_favorite() -> &'static str {
    "DELETE FROM favorites WHERE id = $1 AND user_id = $2"
}

fn sql_insert_favorite() -> &'static str {
    "INSERT INTO favorites (user_id, product_id) \
     VALUES ($1, $2) \
     ON CONFLICT (user_id, product_id) DO NOTHING"
}

fn sql_upsert_product() -> &'static str {
    "INSERT INTO products (id, name, price, image, source, url, rating) \
     VALUES ($1, $2, $3, $4, $5, $6, $7) \
     ON CONFLICT (id) DO UPDATE SET \
       name = EXCLUDED.name, price = EXCLUDED.price, image = EXCLUDED.image, \
       source = EXCLUDED.source, url = EXCLUDED.url, rating = EXCLUDED.rating, \
       updated_at = now()"
}

fn sql_recent_queries() -> &'static str {
    "SELECT query FROM ( \
       SELECT DISTINCT ON (query) query, created_at \
       FROM search_history \
       WHERE user_id = $1 \
       ORDER BY query, created_at DESC \
     ) recent \
     ORDER BY created_at DESC \
     LIMIT $2"
}
