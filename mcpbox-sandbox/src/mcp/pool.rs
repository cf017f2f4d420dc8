//! MCP session pool
//!
//! Sessions are keyed by `sha256(url | sorted auth headers)` and reused
//! across tool calls, saving the TCP+TLS handshake and initialize round
//! trip. Expired and broken sessions are closed and recreated
//! transparently; transient errors retry with exponential backoff.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mcpbox_resilience::{BackoffPolicy, Retryable};
use serde_json::{json, Value as JsonValue};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::mcp::client::{McpClient, McpClientError};

/// Retries per call for transient errors.
const MAX_RETRIES: u32 = 3;

/// Sessions older than this are replaced on next acquisition.
const SESSION_MAX_AGE: Duration = Duration::from_secs(300);

/// Pool capacity; LRU eviction on admit.
const MAX_POOL_SIZE: usize = 50;

fn pool_key(url: &str, auth_headers: &HashMap<String, String>) -> String {
    let mut sorted: Vec<(&String, &String)> = auth_headers.iter().collect();
    sorted.sort();
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(b"|");
    for (key, value) in sorted {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b";");
    }
    format!("{url}#{}", &hex::encode(hasher.finalize())[..16])
}

struct PoolEntry {
    url: String,
    created_at: Instant,
    last_used_at: Mutex<Instant>,
    /// Serialises all calls on this session.
    client: Mutex<McpClient>,
}

impl PoolEntry {
    fn new(url: &str, auth_headers: HashMap<String, String>) -> Self {
        Self {
            url: url.to_string(),
            created_at: Instant::now(),
            last_used_at: Mutex::new(Instant::now()),
            client: Mutex::new(McpClient::new(url, auth_headers)),
        }
    }

    fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    async fn touch(&self) {
        *self.last_used_at.lock().await = Instant::now();
    }

    async fn close(&self) {
        self.client.lock().await.close().await;
    }

    async fn call_tool(
        &self,
        tool_name: &str,
        arguments: &JsonValue,
    ) -> Result<JsonValue, McpClientError> {
        let mut client = self.client.lock().await;
        if !client.is_initialized() {
            client.initialize().await?;
        }
        self.touch().await;
        client.call_tool(tool_name, arguments).await
    }

    async fn list_tools(&self) -> Result<Vec<JsonValue>, McpClientError> {
        let mut client = self.client.lock().await;
        if !client.is_initialized() {
            client.initialize().await?;
        }
        self.touch().await;
        client.list_tools().await
    }

    async fn health_check(&self) -> JsonValue {
        let mut client = self.client.lock().await;
        let start = Instant::now();
        match client.initialize().await {
            Ok(_) => json!({
                "healthy": true,
                "latency_ms": start.elapsed().as_millis() as u64,
            }),
            Err(e) => json!({
                "healthy": false,
                "latency_ms": start.elapsed().as_millis() as u64,
                "error": e.to_string(),
            }),
        }
    }
}

/// Pool statistics for monitoring.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    pub pool_size: usize,
    pub max_size: usize,
    pub sessions: Vec<SessionStats>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionStats {
    pub url: String,
    pub age_seconds: f64,
    pub idle_seconds: f64,
}

/// Connection pool for external MCP server sessions.
pub struct McpSessionPool {
    entries: Mutex<HashMap<String, Arc<PoolEntry>>>,
    backoff: BackoffPolicy,
    max_age: Duration,
    max_size: usize,
}

impl Default for McpSessionPool {
    fn default() -> Self {
        Self::new(SESSION_MAX_AGE, MAX_POOL_SIZE)
    }
}

impl McpSessionPool {
    pub fn new(max_age: Duration, max_size: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            backoff: BackoffPolicy::session_pool(),
            max_age,
            max_size,
        }
    }

    async fn get_or_create(
        &self,
        url: &str,
        auth_headers: &HashMap<String, String>,
    ) -> Arc<PoolEntry> {
        let key = pool_key(url, auth_headers);
        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.get(&key) {
            if entry.age() > self.max_age {
                debug!(url, "expiring pooled session");
                let expired = entries.remove(&key).expect("entry present");
                drop(entries);
                expired.close().await;
                return self.admit(key, url, auth_headers.clone()).await;
            }
            return entry.clone();
        }
        drop(entries);
        self.admit(key, url, auth_headers.clone()).await
    }

    async fn admit(
        &self,
        key: String,
        url: &str,
        auth_headers: HashMap<String, String>,
    ) -> Arc<PoolEntry> {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.get(&key) {
            return existing.clone();
        }

        if entries.len() >= self.max_size {
            // Evict the least recently used entry
            let mut lru: Option<(String, Instant)> = None;
            for (key, entry) in entries.iter() {
                let last_used = *entry.last_used_at.lock().await;
                match &lru {
                    Some((_, best)) if last_used >= *best => {}
                    _ => lru = Some((key.clone(), last_used)),
                }
            }
            if let Some((lru_key, _)) = lru {
                if let Some(evicted) = entries.remove(&lru_key) {
                    debug!(url = %evicted.url, "evicted LRU pooled session");
                    tokio::spawn(async move { evicted.close().await });
                }
            }
        }

        let entry = Arc::new(PoolEntry::new(url, auth_headers));
        entries.insert(key, entry.clone());
        entry
    }

    async fn evict(&self, url: &str, auth_headers: &HashMap<String, String>) {
        let key = pool_key(url, auth_headers);
        let removed = self.entries.lock().await.remove(&key);
        if let Some(entry) = removed {
            entry.close().await;
        }
    }

    /// Call a tool with session reuse and retries.
    ///
    /// Transient errors (timeouts, connection resets, 429/502/503/504)
    /// retry with exponential backoff; everything else fails immediately.
    /// A failed session is evicted before the next attempt.
    pub async fn call_tool(
        &self,
        url: &str,
        tool_name: &str,
        arguments: &JsonValue,
        auth_headers: Option<&HashMap<String, String>>,
    ) -> JsonValue {
        let empty = HashMap::new();
        let headers = auth_headers.unwrap_or(&empty);
        let mut last_error: Option<McpClientError> = None;

        for attempt in 0..=MAX_RETRIES {
            let entry = self.get_or_create(url, headers).await;
            match entry.call_tool(tool_name, arguments).await {
                Ok(result) => return result,
                Err(e) => {
                    self.evict(url, headers).await;
                    let transient = e.is_retryable();
                    last_error = Some(e);

                    if !transient || attempt == MAX_RETRIES {
                        break;
                    }
                    let delay = self.backoff.delay_for_attempt(attempt);
                    warn!(
                        tool = tool_name,
                        url,
                        attempt = attempt + 1,
                        max = MAX_RETRIES + 1,
                        ?delay,
                        error = %last_error.as_ref().expect("just set"),
                        "transient error calling external tool, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        let message = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        error!(tool = tool_name, url, error = %message, "all retries exhausted");
        json!({"success": false, "error": message})
    }

    /// Discover tools with session reuse and retries.
    pub async fn discover_tools(
        &self,
        url: &str,
        auth_headers: Option<&HashMap<String, String>>,
    ) -> JsonValue {
        let empty = HashMap::new();
        let headers = auth_headers.unwrap_or(&empty);
        let mut last_error: Option<McpClientError> = None;

        for attempt in 0..=MAX_RETRIES {
            let entry = self.get_or_create(url, headers).await;
            match entry.list_tools().await {
                Ok(tools) => return json!({"success": true, "tools": tools}),
                Err(e) => {
                    self.evict(url, headers).await;
                    let transient = e.is_retryable();
                    last_error = Some(e);

                    if !transient || attempt == MAX_RETRIES {
                        break;
                    }
                    tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                }
            }
        }

        let message = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string());
        error!(url, error = %message, "tool discovery failed");
        json!({"success": false, "error": message, "tools": []})
    }

    /// Check connectivity to an external MCP server.
    pub async fn health_check(
        &self,
        url: &str,
        auth_headers: Option<&HashMap<String, String>>,
    ) -> JsonValue {
        let empty = HashMap::new();
        let headers = auth_headers.unwrap_or(&empty);
        let entry = self.get_or_create(url, headers).await;
        let result = entry.health_check().await;
        if result["healthy"] != json!(true) {
            self.evict(url, headers).await;
        }
        result
    }

    /// Evict every session for one source URL (after auth or URL changes).
    pub async fn evict_by_url(&self, url: &str) {
        let mut entries = self.entries.lock().await;
        let keys: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.url == url)
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            if let Some(entry) = entries.remove(&key) {
                debug!(url = %entry.url, "evicted pooled session for source");
                tokio::spawn(async move { entry.close().await });
            }
        }
    }

    pub async fn close_all(&self) {
        let mut entries = self.entries.lock().await;
        for (_, entry) in entries.drain() {
            entry.close().await;
        }
    }

    pub async fn stats(&self) -> PoolStats {
        let entries = self.entries.lock().await;
        let mut sessions = Vec::with_capacity(entries.len());
        for entry in entries.values() {
            let idle = entry.last_used_at.lock().await.elapsed();
            sessions.push(SessionStats {
                url: entry.url.clone(),
                age_seconds: entry.age().as_secs_f64(),
                idle_seconds: idle.as_secs_f64(),
            });
        }
        sessions.sort_by(|a, b| a.url.cmp(&b.url));
        PoolStats {
            pool_size: entries.len(),
            max_size: self.max_size,
            sessions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn pool_key_depends_on_url_and_auth() {
        let a = pool_key("http://one.example/mcp", &headers(&[("Authorization", "Bearer x")]));
        let b = pool_key("http://one.example/mcp", &headers(&[("Authorization", "Bearer y")]));
        let c = pool_key("http://two.example/mcp", &headers(&[("Authorization", "Bearer x")]));
        assert_ne!(a, b);
        assert_ne!(a, c);

        let again = pool_key("http://one.example/mcp", &headers(&[("Authorization", "Bearer x")]));
        assert_eq!(a, again);
    }

    #[test]
    fn pool_key_is_order_insensitive() {
        let a = pool_key("http://x/mcp", &headers(&[("A", "1"), ("B", "2")]));
        let b = pool_key("http://x/mcp", &headers(&[("B", "2"), ("A", "1")]));
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn pool_reuses_entries_and_tracks_stats() {
        let pool = McpSessionPool::new(Duration::from_secs(300), 10);
        let h = headers(&[]);
        let first = pool.get_or_create("http://a.example/mcp", &h).await;
        let second = pool.get_or_create("http://a.example/mcp", &h).await;
        assert!(Arc::ptr_eq(&first, &second));

        let stats = pool.stats().await;
        assert_eq!(stats.pool_size, 1);
        assert_eq!(stats.sessions[0].url, "http://a.example/mcp");
    }

    #[tokio::test]
    async fn expired_entries_are_replaced() {
        let pool = McpSessionPool::new(Duration::from_millis(10), 10);
        let h = headers(&[]);
        let first = pool.get_or_create("http://a.example/mcp", &h).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = pool.get_or_create("http://a.example/mcp", &h).await;
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(pool.stats().await.pool_size, 1);
    }

    #[tokio::test]
    async fn lru_eviction_bounds_the_pool() {
        let pool = McpSessionPool::new(Duration::from_secs(300), 2);
        let h = headers(&[]);
        pool.get_or_create("http://a.example/mcp", &h).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        pool.get_or_create("http://b.example/mcp", &h).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        pool.get_or_create("http://c.example/mcp", &h).await;

        let stats = pool.stats().await;
        assert_eq!(stats.pool_size, 2);
        assert!(!stats.sessions.iter().any(|s| s.url == "http://a.example/mcp"));
    }

    #[tokio::test]
    async fn evict_by_url_removes_all_matching_sessions() {
        let pool = McpSessionPool::new(Duration::from_secs(300), 10);
        pool.get_or_create("http://a.example/mcp", &headers(&[("Authorization", "Bearer 1")]))
            .await;
        pool.get_or_create("http://a.example/mcp", &headers(&[("Authorization", "Bearer 2")]))
            .await;
        pool.get_or_create("http://b.example/mcp", &headers(&[])).await;
        assert_eq!(pool.stats().await.pool_size, 3);

        pool.evict_by_url("http://a.example/mcp").await;
        let stats = pool.stats().await;
        assert_eq!(stats.pool_size, 1);
        assert_eq!(stats.sessions[0].url, "http://b.example/mcp");
    }
}
