//! Remote dataset fetcher
//!
//! Retrieves GeoJSON FeatureCollections from static hosting. The primary
//! source gets a short timeout; on failure the optional fallback is tried.
//! Parsed documents are cached by primary URL for the rest of the session.
//!
//! Sources are either `http(s)://` URLs or local paths (`file://` prefix optional).

use chrono::{DateTime, Utc};
use geojson::{FeatureCollection, GeoJson};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::config::FetchConfig;
use crate::error::LayerError;

/// Timeout / retry policy applied to every source
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub timeout: Duration,
    /// Extra attempts per source after the first one
    pub retries: u32,
    /// Linear backoff unit: attempt n waits `backoff * n`
    pub backoff: Duration,
}

impl From<&FetchConfig> for FetchPolicy {
    fn from(config: &FetchConfig) -> Self {
        Self {
            timeout: config.timeout(),
            retries: config.retries,
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}

/// A parsed document plus where it actually came from
#[derive(Debug, Clone)]
pub struct Dataset {
    pub source: String,
    pub from_fallback: bool,
    pub fetched_at: DateTime<Utc>,
    pub collection: FeatureCollection,
}

pub struct DatasetFetcher {
    client: reqwest::Client,
    policy: FetchPolicy,
    cache: RwLock<HashMap<String, Arc<Dataset>>>,
}

impl DatasetFetcher {
    pub fn new(policy: FetchPolicy) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("JakartaEnvMap/0.1")
            .build()?;

        Ok(Self {
            client,
            policy,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Fetch `url`, falling back to `fallback`, reusing the session cache
    pub async fn fetch(&self, url: &str, fallback: Option<&str>) -> Result<Arc<Dataset>, LayerError> {
        if let Some(dataset) = self.cached(url).await {
            tracing::debug!("Dataset '{}' found in cache", url);
            return Ok(dataset);
        }
        self.fetch_fresh(url, fallback).await
    }

    /// Fetch bypassing the cache; a success replaces the cached entry
    pub async fn fetch_fresh(&self, url: &str, fallback: Option<&str>) -> Result<Arc<Dataset>, LayerError> {
        tracing::info!("Fetching dataset from {}", url);

        let (source, from_fallback, collection) = match self.load_with_retries(url).await {
            Ok(collection) => (url.to_string(), false, collection),
            Err(primary_err) => {
                let Some(fallback) = fallback else {
                    return Err(primary_err);
                };
                tracing::warn!("Primary source failed ({}), trying fallback {}", primary_err, fallback);
                match self.load_with_retries(fallback).await {
                    Ok(collection) => (fallback.to_string(), true, collection),
                    Err(fallback_err) => {
                        return Err(LayerError::fetch(
                            url,
                            format!("{}; fallback {}: {}", reason_of(&primary_err), fallback, reason_of(&fallback_err)),
                        ));
                    }
                }
            }
        };

        tracing::info!("Loaded {} features from {}", collection.features.len(), source);

        let dataset = Arc::new(Dataset {
            source,
            from_fallback,
            fetched_at: Utc::now(),
            collection,
        });

        {
            let mut cache = self.cache.write().await;
            cache.insert(url.to_string(), dataset.clone());
            tracing::debug!("Dataset '{}' cached", url);
        }

        Ok(dataset)
    }

    pub async fn cached(&self, url: &str) -> Option<Arc<Dataset>> {
        self.cache.read().await.get(url).cloned()
    }

    /// Fetch and write the document to `dest` so it can serve as a local fallback
    pub async fn download(&self, url: &str, dest: &Path) -> anyhow::Result<PathBuf> {
        let dataset = self.fetch_fresh(url, None).await?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let geojson = GeoJson::FeatureCollection(dataset.collection.clone());
        std::fs::write(dest, geojson.to_string())?;
        tracing::info!("Saved {} features to {:?}", dataset.collection.features.len(), dest);
        Ok(dest.to_path_buf())
    }

    async fn load_with_retries(&self, source: &str) -> Result<FeatureCollection, LayerError> {
        let mut attempt = 0;
        loop {
            match self.load_once(source).await {
                Ok(collection) => return Ok(collection),
                Err(err) if attempt < self.policy.retries && err.is_transient() => {
                    attempt += 1;
                    let wait = self.policy.backoff * attempt;
                    tracing::warn!("Attempt {} for {} failed: {}. Retrying in {:?}", attempt, source, err, wait);
                    tokio::time::sleep(wait).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn load_once(&self, source: &str) -> Result<FeatureCollection, LayerError> {
        let bytes = if is_remote(source) {
            let response = self
                .client
                .get(source)
                .timeout(self.policy.timeout)
                .send()
                .await
                .map_err(|e| LayerError::fetch(source, describe(&e, self.policy.timeout)))?;

            if !response.status().is_success() {
                return Err(LayerError::fetch(source, format!("status {}", response.status())));
            }

            response
                .bytes()
                .await
                .map_err(|e| LayerError::fetch(source, describe(&e, self.policy.timeout)))?
                .to_vec()
        } else {
            let path = local_path(source);
            match tokio::time::timeout(self.policy.timeout, tokio::fs::read(&path)).await {
                Ok(Ok(bytes)) => bytes,
                Ok(Err(e)) => return Err(LayerError::fetch(source, e)),
                Err(_) => return Err(LayerError::fetch(source, "timed out")),
            }
        };

        tracing::debug!("Read {} bytes from {}", bytes.len(), source);
        parse_collection(source, &bytes)
    }
}

/// Parse a GeoJSON document that must be a FeatureCollection
pub fn parse_collection(source: &str, bytes: &[u8]) -> Result<FeatureCollection, LayerError> {
    let geojson: GeoJson = serde_json::from_slice(bytes).map_err(|e| LayerError::Parse {
        url: source.to_string(),
        reason: e.to_string(),
    })?;

    match geojson {
        GeoJson::FeatureCollection(fc) => Ok(fc),
        _ => Err(LayerError::Parse {
            url: source.to_string(),
            reason: "GeoJSON must be a FeatureCollection".to_string(),
        }),
    }
}

fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

fn local_path(source: &str) -> PathBuf {
    PathBuf::from(source.strip_prefix("file://").unwrap_or(source))
}

fn describe(err: &reqwest::Error, timeout: Duration) -> String {
    if err.is_timeout() {
        format!("timed out after {:?}", timeout)
    } else {
        err.to_string()
    }
}

fn reason_of(err: &LayerError) -> String {
    match err {
        LayerError::Fetch { reason, .. } | LayerError::Parse { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::get, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DOC: &str = r#"{"type":"FeatureCollection","features":[
        {"type":"Feature","id":1,"geometry":{"type":"Point","coordinates":[106.8,-6.2]},
         "properties":{"nama_tps":"TPS Kemayoran"}}]}"#;

    fn quick_policy() -> FetchPolicy {
        FetchPolicy {
            timeout: Duration::from_millis(200),
            retries: 0,
            backoff: Duration::from_millis(10),
        }
    }

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn counted(State(hits): State<Arc<AtomicUsize>>) -> &'static str {
        hits.fetch_add(1, Ordering::SeqCst);
        DOC
    }

    fn test_app(hits: Arc<AtomicUsize>) -> Router {
        Router::new()
            .route("/ok.json", get(counted))
            .route(
                "/slow.json",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    DOC
                }),
            )
            .route("/broken.json", get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }))
            .route("/point.json", get(|| async { r#"{"type":"Point","coordinates":[1.0,2.0]}"# }))
            .with_state(hits)
    }

    #[tokio::test]
    async fn test_timeout_falls_back() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn(test_app(hits.clone())).await;
        let fetcher = DatasetFetcher::new(quick_policy()).unwrap();

        let primary = format!("{}/slow.json", base);
        let fallback = format!("{}/ok.json", base);
        let dataset = fetcher.fetch(&primary, Some(&fallback)).await.unwrap();

        assert!(dataset.from_fallback);
        assert_eq!(dataset.source, fallback);
        assert_eq!(dataset.collection.features.len(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        // cached under the primary URL
        assert!(fetcher.cached(&primary).await.is_some());
    }

    #[tokio::test]
    async fn test_both_sources_fail() {
        let base = spawn(test_app(Arc::new(AtomicUsize::new(0)))).await;
        let fetcher = DatasetFetcher::new(quick_policy()).unwrap();

        let err = fetcher
            .fetch(&format!("{}/broken.json", base), Some(&format!("{}/slow.json", base)))
            .await
            .unwrap_err();

        assert!(matches!(err, LayerError::Fetch { .. }));
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_cache_and_fresh_fetch() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn(test_app(hits.clone())).await;
        let fetcher = DatasetFetcher::new(quick_policy()).unwrap();
        let url = format!("{}/ok.json", base);

        fetcher.fetch(&url, None).await.unwrap();
        fetcher.fetch(&url, None).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        fetcher.fetch_fresh(&url, None).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let fetcher = DatasetFetcher::new(FetchPolicy {
            retries: 2,
            ..quick_policy()
        })
        .unwrap();

        let started = std::time::Instant::now();
        let err = fetcher.fetch("/definitely/not/here.json", None).await.unwrap_err();
        assert!(matches!(err, LayerError::Fetch { .. }));
        // 10ms + 20ms of backoff
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_rejects_non_collection() {
        let base = spawn(test_app(Arc::new(AtomicUsize::new(0)))).await;
        let fetcher = DatasetFetcher::new(quick_policy()).unwrap();

        let err = fetcher.fetch(&format!("{}/point.json", base), None).await.unwrap_err();
        assert!(matches!(err, LayerError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_local_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sampah.json");
        std::fs::write(&path, DOC).unwrap();

        let fetcher = DatasetFetcher::new(quick_policy()).unwrap();
        let source = format!("file://{}", path.display());
        let dataset = fetcher.fetch(&source, None).await.unwrap();
        assert!(!dataset.from_fallback);
        assert_eq!(dataset.collection.features.len(), 1);
    }
}
