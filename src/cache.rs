/// file: src/cache.rs
/// description: Redis-backed write-through cache for scraped products.
/// Scraped listings are transient: every search writes its products here
/// under their generated ids, and detail lookup reads exactly these keys.
/// Once the TTL lapses the id stops resolving, which is the intended
/// lifecycle — stale listings shouldn't be clickable.
use crate::config::RedisConfig;
use crate::models::{AppError, Product};
use redis::aio::MultiplexedConnection;
use tracing::debug;

#[derive(Clone)]
pub struct ProductCache {
    conn: MultiplexedConnection,
    ttl_seconds: u64,
}

fn product_key(id: &str) -> String {
    format!("product:{id}")
}

impl ProductCache {
    pub async fn connect(cfg: &RedisConfig) -> Result<Self, AppError> {
        let client = redis::Client::open(cfg.url.as_str())?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            ttl_seconds: cfg.product_ttl_seconds,
        })
    }

    pub async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    /// Write-through after a scrape: one pipelined SETEX per product.
    pub async fn store_batch(&self, products: &[Product]) -> Result<(), AppError> {
        if products.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for product in products {
            let payload = serde_json::to_string(product)?;
            pipe.cmd("SETEX")
                .arg(product_key(&product.id))
                .arg(self.ttl_seconds)
                .arg(payload)
                .ignore();
        }

        let mut conn = self.conn.clone();
        pipe.query_async::<()>(&mut conn).await?;
        debug!(count = products.len(), "products cached");
        Ok(())
    }

    /// Detail lookup. `None` means the id never existed or its TTL lapsed —
    /// indistinguishable by design.
    pub async fn get(&self, id: &str) -> Result<Option<Product>, AppError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(product_key(id))
            .query_async(&mut conn)
            .await?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_by_product_id() {
        assert_eq!(product_key("ab12cd34"), "product:ab12cd34");
    }
}
