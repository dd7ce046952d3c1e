//! # Remote Cache Store
//!
//! Delegates storage and TTL enforcement to Redis. Entries are serialized into
//! an opaque payload and written with the configured TTL as the service-level
//! expiry.
//!
//! Any backend failure, including timeouts and corrupt payloads, degrades to a
//! plain cache miss. Operations are time-bounded and run on private copies of
//! the data; no in-process lock is ever held while a remote call is in flight.

use super::{cacheable_headers, digest_key, CacheStore, CachedResponse};
use crate::caching::CacheError;
use crate::core::config::CacheSettings;
use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tracing::{debug, warn};

const KEY_PREFIX: &str = "gw:v1:";

/// Remote cache backend.
///
/// The connection is established lazily on first use so a Redis that is down at
/// startup only costs misses, not a failed boot; `ConnectionManager` reconnects
/// on its own once established.
pub struct RedisStore {
    enabled: bool,
    ttl: Duration,
    max_bytes: usize,
    client: redis::Client,
    conn: Arc<OnceCell<ConnectionManager>>,
    operation_timeout: Duration,
}

impl RedisStore {
    /// Build the store. Only URL parsing can fail here; no I/O happens yet.
    pub fn new(settings: &CacheSettings) -> Result<Self, CacheError> {
        let client = redis::Client::open(settings.redis_url.as_str())?;
        Ok(Self {
            enabled: settings.enabled,
            ttl: settings.ttl,
            max_bytes: settings.max_bytes,
            client,
            conn: Arc::new(OnceCell::new()),
            operation_timeout: settings.operation_timeout,
        })
    }

    async fn connection(
        client: &redis::Client,
        cell: &OnceCell<ConnectionManager>,
    ) -> Result<ConnectionManager, CacheError> {
        let conn = cell
            .get_or_try_init(|| async {
                ConnectionManager::new(client.clone()).await.map_err(CacheError::from)
            })
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    fn key(&self, method: &Method, path: &str, raw_query: &str) -> String {
        format!("{KEY_PREFIX}{}", digest_key(method, path, raw_query))
    }

    async fn get(&self, key: &str) -> Option<CachedResponse> {
        if !self.enabled {
            return None;
        }

        let fetch = async {
            let mut conn = Self::connection(&self.client, &self.conn).await?;
            let raw: Option<Vec<u8>> = conn.get(key).await.map_err(CacheError::from)?;
            Ok::<_, CacheError>(raw)
        };

        let raw = match timeout(self.operation_timeout, fetch).await {
            Ok(Ok(Some(raw))) => raw,
            Ok(Ok(None)) => return None,
            Ok(Err(err)) => {
                warn!(%err, "redis get failed, treating as miss");
                return None;
            }
            Err(_) => {
                warn!("redis get timed out, treating as miss");
                return None;
            }
        };

        match RemotePayload::decode(&raw) {
            Ok(response) => Some(response),
            Err(err) => {
                // Corrupt entries are misses; Redis expiry disposes of them.
                warn!(%err, "corrupt cache payload, treating as miss");
                None
            }
        }
    }

    async fn set(&self, key: &str, status: StatusCode, headers: &HeaderMap, body: Bytes) {
        if !self.enabled {
            return;
        }
        if self.max_bytes > 0 && body.len() > self.max_bytes {
            return;
        }

        let payload = match RemotePayload::encode(status, &cacheable_headers(headers), &body) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(%err, "failed to serialize cache entry");
                return;
            }
        };

        // The write runs off the request path on a private copy: a stalled
        // backend must never delay the client-visible flush.
        let client = self.client.clone();
        let cell = Arc::clone(&self.conn);
        let key = key.to_string();
        let ttl_secs = self.ttl.as_secs().max(1);
        let op_timeout = self.operation_timeout;
        tokio::spawn(async move {
            let write = async {
                let mut conn = Self::connection(&client, &cell).await?;
                redis::cmd("SETEX")
                    .arg(&key)
                    .arg(ttl_secs)
                    .arg(&payload)
                    .query_async::<_, ()>(&mut conn)
                    .await
                    .map_err(CacheError::from)
            };
            match timeout(op_timeout, write).await {
                Ok(Ok(())) => debug!(key, "cached response in redis"),
                Ok(Err(err)) => warn!(%err, "redis set failed, entry dropped"),
                Err(_) => warn!("redis set timed out, entry dropped"),
            }
        });
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

/// Wire format for a stored entry. Header values that are not valid UTF-8 are
/// dropped at encode time.
#[derive(Debug, Serialize, Deserialize)]
struct RemotePayload {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl RemotePayload {
    fn encode(status: StatusCode, headers: &HeaderMap, body: &Bytes) -> Result<Vec<u8>, CacheError> {
        let headers = headers
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let payload = Self {
            status: status.as_u16(),
            headers,
            body: body.to_vec(),
        };
        Ok(serde_json::to_vec(&payload)?)
    }

    fn decode(raw: &[u8]) -> Result<CachedResponse, CacheError> {
        let payload: Self = serde_json::from_slice(raw)?;

        let status = StatusCode::from_u16(payload.status).map_err(|_| CacheError::Payload {
            message: format!("invalid status code {}", payload.status),
        })?;

        let mut headers = HeaderMap::with_capacity(payload.headers.len());
        for (name, value) in &payload.headers {
            let name: HeaderName = name.parse().map_err(|_| CacheError::Payload {
                message: format!("invalid header name {name:?}"),
            })?;
            let value = HeaderValue::from_str(value).map_err(|_| CacheError::Payload {
                message: "invalid header value".to_string(),
            })?;
            headers.append(name, value);
        }

        Ok(CachedResponse {
            status,
            headers,
            body: Bytes::from(payload.body),
            age: Duration::ZERO,
        })
    }
}
