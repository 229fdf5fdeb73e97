use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::error::{IngestError, IngestResult};
use crate::models::{Account, Platform};

/// One HTTP GET returning a JSON document.
#[async_trait::async_trait]
pub trait JsonTransport: Send + Sync {
    async fn get_json(&self, url: &str) -> IngestResult<Value>;
}

/// reqwest-backed transport that signs every request with the API key header
/// the upstream expects.
pub struct HttpTransport {
    client: Client,
    key_header: &'static str,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(
        key_header: &'static str,
        api_key: Option<String>,
        timeout: Duration,
        user_agent: &str,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent.to_string())
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            key_header,
            api_key,
        }
    }
}

#[async_trait::async_trait]
impl JsonTransport for HttpTransport {
    async fn get_json(&self, url: &str) -> IngestResult<Value> {
        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.header(self.key_header, key);
        }
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                IngestError::upstream(url, "request timed out")
            } else {
                IngestError::upstream(url, e)
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::upstream(url, format!("status {status}")));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| IngestError::upstream(url, format!("invalid json: {e}")))
    }
}

struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// Process-wide read-through cache of upstream responses keyed by URL.
#[derive(Default)]
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str) -> Option<Value> {
        let mut entries = self.entries.lock().ok()?;
        match entries.get(url) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(url);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, url: &str, value: Value, ttl: Duration) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                url.to_string(),
                CacheEntry {
                    value,
                    expires_at: Instant::now() + ttl,
                },
            );
        }
    }

    pub fn invalidate<'a, I>(&self, urls: I) -> usize
    where
        I: IntoIterator<Item = &'a String>,
    {
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        urls.into_iter()
            .filter(|url| entries.remove(url.as_str()).is_some())
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// State scoped to a single ingestion pass.
///
/// Records every URL fetched so a failed pass can evict what it cached,
/// remembers resolved accounts, and lets each aggregate's inactivity counter
/// move at most once.
#[derive(Default)]
pub struct IngestPass {
    touched: Mutex<Vec<String>>,
    drift_claims: Mutex<HashSet<String>>,
    accounts: Mutex<HashMap<(String, Platform), Account>>,
}

impl IngestPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_url(&self, url: &str) {
        if let Ok(mut touched) = self.touched.lock() {
            if !touched.iter().any(|u| u == url) {
                touched.push(url.to_string());
            }
        }
    }

    pub fn touched_urls(&self) -> Vec<String> {
        self.touched.lock().map(|t| t.clone()).unwrap_or_default()
    }

    /// True the first time it is called for `aggregate_key` in this pass.
    pub fn claim_drift_update(&self, aggregate_key: &str) -> bool {
        self.drift_claims
            .lock()
            .map(|mut claims| claims.insert(aggregate_key.to_string()))
            .unwrap_or(false)
    }

    pub fn remembered_account(&self, seo: &str, platform: Platform) -> Option<Account> {
        self.accounts
            .lock()
            .ok()?
            .get(&(seo.to_string(), platform))
            .cloned()
    }

    pub fn remember_account(&self, account: &Account) {
        if let Ok(mut accounts) = self.accounts.lock() {
            accounts.insert((account.seo.clone(), account.platform), account.clone());
        }
    }
}

/// Fetches upstream JSON through the shared cache and decodes it into typed
/// envelopes.
#[derive(Clone)]
pub struct RemoteFetcher {
    transport: Arc<dyn JsonTransport>,
    cache: Arc<ResponseCache>,
}

impl RemoteFetcher {
    pub fn new(transport: Arc<dyn JsonTransport>, cache: Arc<ResponseCache>) -> Self {
        Self { transport, cache }
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Raw JSON for `url`. A `ttl` of `None` bypasses the cache entirely.
    #[instrument(skip(self, pass))]
    pub async fn fetch_value(
        &self,
        pass: &IngestPass,
        url: &str,
        ttl: Option<Duration>,
    ) -> IngestResult<Value> {
        pass.record_url(url);
        if ttl.is_some() {
            if let Some(hit) = self.cache.get(url) {
                debug!(url, "response cache hit");
                return Ok(hit);
            }
        }
        let value = self.transport.get_json(url).await.inspect_err(|e| {
            warn!(url, error = %e, "upstream fetch failed");
        })?;
        if let Some(ttl) = ttl {
            self.cache.put(url, value.clone(), ttl);
        }
        Ok(value)
    }

    pub async fn fetch<T: DeserializeOwned>(
        &self,
        pass: &IngestPass,
        url: &str,
        ttl: Option<Duration>,
    ) -> IngestResult<T> {
        let value = self.fetch_value(pass, url, ttl).await?;
        serde_json::from_value(value)
            .map_err(|e| IngestError::upstream(url, format!("unexpected payload: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::test_support::ScriptedTransport;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Envelope {
        #[serde(rename = "ErrorCode")]
        error_code: i32,
    }

    #[tokio::test]
    async fn http_transport_sends_key_and_decodes_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/Platform/thing")
            .match_header("x-api-key", "secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ErrorCode":1,"Response":{"ok":true}}"#)
            .create_async()
            .await;

        let transport = HttpTransport::new(
            "X-API-Key",
            Some("secret".into()),
            Duration::from_secs(5),
            "gamestats-test",
        );
        let body = transport
            .get_json(&format!("{}/Platform/thing", server.url()))
            .await
            .expect("json body");
        assert_eq!(body["Response"]["ok"], true);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_is_upstream_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/down")
            .with_status(503)
            .create_async()
            .await;

        let transport = HttpTransport::new("X-API-Key", None, Duration::from_secs(5), "t");
        let err = transport
            .get_json(&format!("{}/down", server.url()))
            .await
            .expect_err("503 must fail");
        assert!(matches!(err, IngestError::UpstreamUnavailable { .. }));
    }

    #[tokio::test]
    async fn cached_responses_skip_the_network() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("http://t/a", json!({"ErrorCode": 1}));
        let fetcher = RemoteFetcher::new(transport.clone(), Arc::new(ResponseCache::new()));
        let pass = IngestPass::new();

        let ttl = Some(Duration::from_secs(60));
        let first: Envelope = fetcher.fetch(&pass, "http://t/a", ttl).await.expect("first");
        let second: Envelope = fetcher.fetch(&pass, "http://t/a", ttl).await.expect("second");
        assert_eq!(first.error_code, second.error_code);
        assert_eq!(transport.calls("http://t/a"), 1);
        assert_eq!(pass.touched_urls(), vec!["http://t/a".to_string()]);
    }

    #[tokio::test]
    async fn envelope_mismatch_is_upstream_unavailable() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond("http://t/b", json!({"unexpected": true}));
        let fetcher = RemoteFetcher::new(transport, Arc::new(ResponseCache::new()));
        let err = fetcher
            .fetch::<Envelope>(&IngestPass::new(), "http://t/b", None)
            .await
            .expect_err("missing envelope");
        assert!(matches!(err, IngestError::UpstreamUnavailable { .. }));
    }

    #[test]
    fn expired_entries_are_evicted_on_read() {
        let cache = ResponseCache::new();
        cache.put("u", json!(1), Duration::from_secs(0));
        assert!(cache.get("u").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn drift_claim_is_granted_once_per_aggregate() {
        let pass = IngestPass::new();
        assert!(pass.claim_drift_update("halo5:1"));
        assert!(!pass.claim_drift_update("halo5:1"));
        assert!(pass.claim_drift_update("halo5:2"));
    }
}
