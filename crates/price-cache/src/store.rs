use analysis_core::AnalysisError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::keys::{bars_prefix, news_key, quote_key};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    stored_at INTEGER NOT NULL,
    ttl_secs INTEGER NOT NULL
)";

/// Longest TTL honoured; larger values are clamped (roughly 100 years)
const MAX_TTL_SECS: i64 = 100 * 365 * 24 * 60 * 60;

fn clamp_ttl_secs(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).min(MAX_TTL_SECS)
}

/// Internal cache entry with timestamp
#[derive(Clone)]
struct CacheEntry {
    payload: String,
    stored_at: DateTime<Utc>,
    ttl_secs: i64,
}

impl CacheEntry {
    fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::try_seconds(self.ttl_secs.clamp(0, MAX_TTL_SECS))
            .and_then(|ttl| self.stored_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

/// A value read back from the cache
#[derive(Debug, Clone)]
pub struct Cached<T> {
    pub value: T,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl<T> Cached<T> {
    pub fn age_secs(&self) -> i64 {
        (Utc::now() - self.stored_at).num_seconds().max(0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub memory_entries: usize,
    pub persisted_entries: Option<i64>,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub default_ttl_secs: u64,
}

pub struct PriceCache {
    memory: DashMap<String, CacheEntry>,
    pool: Option<SqlitePool>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PriceCache {
    /// Memory-only cache
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            memory: DashMap::new(),
            pool: None,
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cache backed by an existing SQLite pool. Creates the table if needed.
    pub async fn with_pool(pool: SqlitePool, default_ttl: Duration) -> Result<Self, AnalysisError> {
        sqlx::query(CREATE_TABLE)
            .execute(&pool)
            .await
            .map_err(|e| AnalysisError::DatabaseError(e.to_string()))?;

        let mut cache = Self::new(default_ttl);
        cache.pool = Some(pool);
        Ok(cache)
    }

    /// Open (creating if missing) the SQLite file behind `database_url`.
    pub async fn connect(database_url: &str, default_ttl: Duration) -> Result<Self, AnalysisError> {
        let pool = open_sqlite_pool(database_url).await?;
        Self::with_pool(pool, default_ttl).await
    }

    pub fn pool(&self) -> Option<&SqlitePool> {
        self.pool.as_ref()
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up a live entry. Expired, missing and undecodable entries are all
    /// reported as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<Cached<T>> {
        let now = Utc::now();

        let mut entry = None;
        let in_memory = self.memory.get(key).map(|r| r.value().clone());
        if let Some(e) = in_memory {
            if e.is_expired(now) {
                self.memory.remove(key);
            } else {
                entry = Some(e);
            }
        }

        if entry.is_none() {
            if let Some(pool) = &self.pool {
                match load_row(pool, key).await {
                    Ok(Some(e)) if !e.is_expired(now) => {
                        self.memory.insert(key.to_string(), e.clone());
                        entry = Some(e);
                    }
                    Ok(Some(_)) => {
                        if let Err(e) = delete_row(pool, key).await {
                            tracing::warn!("Failed to drop expired cache row {}: {}", key, e);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!("Cache read failed for {}: {}", key, e),
                }
            }
        }

        let Some(entry) = entry else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        match serde_json::from_str::<T>(&entry.payload) {
            Ok(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Cached {
                    value,
                    stored_at: entry.stored_at,
                    expires_at: entry.expires_at(),
                })
            }
            Err(e) => {
                tracing::warn!("Discarding undecodable cache entry {}: {}", key, e);
                self.memory.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), AnalysisError> {
        self.put_with_ttl(key, value, self.default_ttl).await
    }

    /// Store a value. Only serialization failures are returned; a failing
    /// SQLite write is logged and the entry stays memory-only.
    pub async fn put_with_ttl<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), AnalysisError> {
        let payload = serde_json::to_string(value).map_err(|e| AnalysisError::CacheError(e.to_string()))?;
        let entry = CacheEntry {
            payload,
            stored_at: Utc::now(),
            ttl_secs: clamp_ttl_secs(ttl),
        };

        if let Some(pool) = &self.pool {
            let result = sqlx::query(
                "INSERT INTO cache_entries (key, payload, stored_at, ttl_secs) VALUES (?, ?, ?, ?)
                 ON CONFLICT(key) DO UPDATE SET
                    payload = excluded.payload,
                    stored_at = excluded.stored_at,
                    ttl_secs = excluded.ttl_secs",
            )
            .bind(key)
            .bind(&entry.payload)
            .bind(entry.stored_at.timestamp())
            .bind(entry.ttl_secs)
            .execute(pool)
            .await;

            if let Err(e) = result {
                tracing::warn!("Cache write failed for {}: {}", key, e);
            }
        }

        self.memory.insert(key.to_string(), entry);
        Ok(())
    }

    pub async fn invalidate(&self, key: &str) {
        self.memory.remove(key);
        if let Some(pool) = &self.pool {
            if let Err(e) = delete_row(pool, key).await {
                tracing::warn!("Cache delete failed for {}: {}", key, e);
            }
        }
    }

    pub async fn invalidate_prefix(&self, prefix: &str) {
        self.memory.retain(|k, _| !k.starts_with(prefix));
        if let Some(pool) = &self.pool {
            let result = sqlx::query("DELETE FROM cache_entries WHERE substr(key, 1, ?) = ?")
                .bind(prefix.len() as i64)
                .bind(prefix)
                .execute(pool)
                .await;
            if let Err(e) = result {
                tracing::warn!("Cache prefix delete failed for {}: {}", prefix, e);
            }
        }
    }

    /// Drop every bar series, quote and news entry of one ticker
    pub async fn invalidate_symbol(&self, symbol: &str) {
        self.invalidate_prefix(&bars_prefix(symbol)).await;
        self.invalidate(&quote_key(symbol)).await;
        self.invalidate(&news_key(symbol)).await;
    }

    /// Remove expired entries from both layers. Returns how many were removed
    /// (an entry present in both layers counts twice).
    pub async fn purge_expired(&self) -> u64 {
        let now = Utc::now();
        let before = self.memory.len();
        self.memory.retain(|_, e| !e.is_expired(now));
        let mut removed = (before - self.memory.len()) as u64;

        if let Some(pool) = &self.pool {
            match sqlx::query("DELETE FROM cache_entries WHERE stored_at + ttl_secs <= ?")
                .bind(now.timestamp())
                .execute(pool)
                .await
            {
                Ok(done) => removed += done.rows_affected(),
                Err(e) => tracing::warn!("Cache purge failed: {}", e),
            }
        }

        if removed > 0 {
            tracing::debug!("Purged {} expired cache entries", removed);
        }
        removed
    }

    pub async fn clear(&self) {
        self.memory.clear();
        if let Some(pool) = &self.pool {
            if let Err(e) = sqlx::query("DELETE FROM cache_entries").execute(pool).await {
                tracing::warn!("Cache clear failed: {}", e);
            }
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let persisted_entries = match &self.pool {
            Some(pool) => sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM cache_entries")
                .fetch_one(pool)
                .await
                .ok(),
            None => None,
        };

        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        CacheStats {
            memory_entries: self.memory.len(),
            persisted_entries,
            hits,
            misses,
            hit_rate: if lookups > 0 { hits as f64 / lookups as f64 } else { 0.0 },
            default_ttl_secs: self.default_ttl.as_secs(),
        }
    }
}

/// Open a SQLite pool, creating the database file and its directory if missing.
pub async fn open_sqlite_pool(database_url: &str) -> Result<SqlitePool, AnalysisError> {
    let file_path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);
    let in_memory = file_path.starts_with(":memory:");
    if !in_memory {
        if let Some(parent) = Path::new(file_path).parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| AnalysisError::DatabaseError(e.to_string()))?;
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| AnalysisError::DatabaseError(e.to_string()))?
        .create_if_missing(true);

    // every connection to :memory: is a separate database
    SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { 5 })
        .connect_with(options)
        .await
        .map_err(|e| AnalysisError::DatabaseError(e.to_string()))
}

async fn load_row(pool: &SqlitePool, key: &str) -> Result<Option<CacheEntry>, sqlx::Error> {
    let row: Option<(String, i64, i64)> =
        sqlx::query_as("SELECT payload, stored_at, ttl_secs FROM cache_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;

    Ok(row.and_then(|(payload, stored_at, ttl_secs)| {
        DateTime::from_timestamp(stored_at, 0).map(|stored_at| CacheEntry {
            payload,
            stored_at,
            ttl_secs,
        })
    }))
}

async fn delete_row(pool: &SqlitePool, key: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM cache_entries WHERE key = ?")
        .bind(key)
        .execute(pool)
        .await?;
    Ok(())
}
