use std::future::Future;
use std::sync::Arc;

use tracing::warn;

use crate::database_ops::fetch::{IngestPass, ResponseCache};
use crate::error::IngestResult;

/// Runs one ingestion pass. Atomicity of the aggregate write itself comes
/// from the store; on failure this evicts every response the pass fetched so a
/// retry sees fresh upstream data.
#[derive(Clone)]
pub struct TransactionalWriter {
    cache: Arc<ResponseCache>,
}

impl TransactionalWriter {
    pub fn new(cache: Arc<ResponseCache>) -> Self {
        Self { cache }
    }

    pub async fn run<T, F>(&self, pass: &IngestPass, work: F) -> IngestResult<T>
    where
        F: Future<Output = IngestResult<T>>,
    {
        match work.await {
            Ok(value) => Ok(value),
            Err(err) => {
                let touched = pass.touched_urls();
                let evicted = self.cache.invalidate(&touched);
                warn!(
                    error = %err,
                    touched = touched.len(),
                    evicted,
                    "ingest pass failed; cache entries invalidated"
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{IngestError, Missing};
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn failure_evicts_urls_touched_by_the_pass() {
        let cache = Arc::new(ResponseCache::new());
        cache.put("http://t/kept", json!(1), Duration::from_secs(60));
        cache.put("http://t/touched", json!(2), Duration::from_secs(60));
        let writer = TransactionalWriter::new(cache.clone());
        let pass = IngestPass::new();
        pass.record_url("http://t/touched");

        let result: IngestResult<()> = writer
            .run(&pass, async {
                Err(IngestError::NotFound(Missing::Match("x".into())))
            })
            .await;
        assert!(matches!(result, Err(IngestError::NotFound(_))));
        assert!(cache.get("http://t/touched").is_none());
        assert!(cache.get("http://t/kept").is_some());
    }

    #[tokio::test]
    async fn success_keeps_cache() {
        let cache = Arc::new(ResponseCache::new());
        cache.put("http://t/a", json!(1), Duration::from_secs(60));
        let writer = TransactionalWriter::new(cache.clone());
        let pass = IngestPass::new();
        pass.record_url("http://t/a");
        let value = writer.run(&pass, async { Ok(5) }).await.expect("ok");
        assert_eq!(value, 5);
        assert_eq!(cache.len(), 1);
    }
}
