//! Warm entries backed by upstream HTTP endpoints

use std::time::Duration;

use anyhow::Context;
use futures_util::FutureExt;
use serde_json::Value;
use shelfcache::{CacheOptions, WarmEntry};

use crate::config::WarmSource;

/// Upstream request deadline
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Build a warm entry that GETs `source.url` and caches the JSON body
pub fn warm_entry(client: &reqwest::Client, source: &WarmSource) -> WarmEntry {
    let client = client.clone();
    let url = source.url.clone();

    let mut options = CacheOptions::NONE;
    if let Some(secs) = source.ttl_secs {
        options = options.with_ttl(Duration::from_secs(secs.max(1)));
    }
    if let Some(prefix) = &source.prefix {
        options = options.with_prefix(prefix.clone());
    }

    WarmEntry::new(source.key.clone(), move || {
        let client = client.clone();
        let url = url.clone();
        async move {
            let response = client
                .get(&url)
                .timeout(FETCH_TIMEOUT)
                .send()
                .await
                .with_context(|| format!("request to {} failed", url))?
                .error_for_status()
                .with_context(|| format!("{} returned an error status", url))?;
            let body: Value = response
                .json()
                .await
                .with_context(|| format!("{} did not return JSON", url))?;
            Ok(body)
        }
        .boxed()
    })
    .with_options(options)
}

/// Warm entries for every configured source
pub fn warm_entries(client: &reqwest::Client, sources: &[WarmSource]) -> Vec<WarmEntry> {
    sources.iter().map(|source| warm_entry(client, source)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::{routing::get, Json, Router};
    use serde_json::json;
    use shelfcache::{Cache, Warmer, DEFAULT_WARM_INTERVAL};
    use tokio::net::TcpListener;

    async fn upstream() -> String {
        let app = Router::new()
            .route("/summary", get(|| async { Json(json!({ "total": 3 })) }))
            .route("/broken", get(|| async { "not json" }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn source(key: &str, url: String) -> WarmSource {
        WarmSource {
            key: key.to_string(),
            url,
            ttl_secs: Some(60),
            prefix: None,
        }
    }

    #[tokio::test]
    async fn test_sources_warm_cache() {
        let base = upstream().await;
        let cache = Arc::new(Cache::in_memory(10, 10));
        let entries = warm_entries(
            &reqwest::Client::new(),
            &[
                source("analytics:summary", format!("{}/summary", base)),
                source("broken", format!("{}/broken", base)),
            ],
        );
        let warmer = Warmer::new(cache.clone(), entries, DEFAULT_WARM_INTERVAL);

        let report = warmer.warm_pass().await;

        assert_eq!(report.warmed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(
            cache.get::<Value>("analytics:summary", &CacheOptions::NONE).await,
            Some(json!({ "total": 3 }))
        );
    }
}
