use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::GeocodeError;

const GEOCODE_URL: &str = "https://dapi.kakao.com/v2/local/search/address.json";
const CONCURRENCY: usize = 4;
const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 500;

/// A resolved address: standardized form plus coordinates.
#[derive(Debug, Clone)]
pub struct Geocoded {
    pub addr_std: String,
    pub lat: f64,
    pub lng: f64,
}

/// Cache keyed by normalized address. Hydrated from the database at the
/// start of a run and written back at the end; injected everywhere it is
/// needed so tests can hand in a prefilled one.
#[derive(Debug, Default)]
pub struct GeocodeCache {
    entries: HashMap<String, Geocoded>,
    fresh: Vec<String>,
}

impl GeocodeCache {
    pub fn new(entries: HashMap<String, Geocoded>) -> Self {
        Self {
            entries,
            fresh: Vec::new(),
        }
    }

    pub fn get(&self, addr_norm: &str) -> Option<&Geocoded> {
        self.entries.get(addr_norm)
    }

    pub fn insert(&mut self, addr_norm: String, geocoded: Geocoded) {
        if self.entries.insert(addr_norm.clone(), geocoded).is_none() {
            self.fresh.push(addr_norm);
        }
    }

    /// Entries added since hydration, for persistence.
    pub fn fresh_entries(&self) -> impl Iterator<Item = (&str, &Geocoded)> {
        self.fresh
            .iter()
            .filter_map(|k| self.entries.get(k).map(|v| (k.as_str(), v)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct AddressResolver {
    client: reqwest::Client,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KakaoResponse {
    documents: Vec<KakaoDocument>,
}

#[derive(Debug, Deserialize)]
struct KakaoDocument {
    address_name: String,
    x: String,
    y: String,
}

impl AddressResolver {
    /// Reads `KAKAO_REST_API_KEY`. Without a key every lookup degrades to
    /// raw address + null coordinates instead of failing the batch.
    pub fn from_env() -> Self {
        let api_key = std::env::var("KAKAO_REST_API_KEY").ok();
        if api_key.is_none() {
            warn!("KAKAO_REST_API_KEY not set; addresses will not be geocoded");
        }
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }

    pub async fn resolve(&self, addr_norm: &str) -> Result<Geocoded, GeocodeError> {
        for attempt in 0..MAX_RETRIES {
            match self.resolve_once(addr_norm).await {
                Err(e) if e.is_retryable() && attempt + 1 < MAX_RETRIES => {
                    let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                    debug!(
                        "geocode retry {}/{} for `{}` in {:?}",
                        attempt + 1,
                        MAX_RETRIES,
                        addr_norm,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                other => return other,
            }
        }
        self.resolve_once(addr_norm).await
    }

    async fn resolve_once(&self, addr_norm: &str) -> Result<Geocoded, GeocodeError> {
        let key = self.api_key.as_deref().ok_or(GeocodeError::NoApiKey)?;
        let response = self
            .client
            .get(GEOCODE_URL)
            .header("Authorization", format!("KakaoAK {key}"))
            .query(&[("query", addr_norm)])
            .send()
            .await
            .map_err(|e| GeocodeError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeocodeError::Request(format!("HTTP {status}")));
        }

        let body: KakaoResponse = response
            .json()
            .await
            .map_err(|e| GeocodeError::Request(e.to_string()))?;

        let doc = body.documents.into_iter().next().ok_or(GeocodeError::NoMatch)?;
        let lng: f64 = doc.x.parse().map_err(|_| GeocodeError::NoMatch)?;
        let lat: f64 = doc.y.parse().map_err(|_| GeocodeError::NoMatch)?;
        Ok(Geocoded {
            addr_std: doc.address_name,
            lat,
            lng,
        })
    }
}

#[derive(Debug, Default)]
pub struct GeocodeStats {
    pub resolved: usize,
    pub failed: usize,
    pub failures: Vec<(String, String)>,
}

/// Resolve every address not already cached, at most one outbound call
/// per unique normalized address. The cache is the only mutable state
/// and it is written solely from this loop.
pub async fn resolve_all(
    resolver: Arc<AddressResolver>,
    cache: &mut GeocodeCache,
    addresses: impl IntoIterator<Item = String>,
) -> GeocodeStats {
    let pending: Vec<String> = addresses
        .into_iter()
        .filter(|a| !a.is_empty() && cache.get(a).is_none())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();

    let mut stats = GeocodeStats::default();
    if pending.is_empty() {
        return stats;
    }

    let semaphore = Arc::new(Semaphore::new(CONCURRENCY));
    let (tx, mut rx) = tokio::sync::mpsc::channel::<(String, Result<Geocoded, GeocodeError>)>(CONCURRENCY * 2);

    for addr in pending {
        let resolver = Arc::clone(&resolver);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();
        tokio::spawn(async move {
            let _permit = sem.acquire().await.expect("semaphore closed");
            let result = resolver.resolve(&addr).await;
            let _ = tx.send((addr, result)).await;
        });
    }
    drop(tx);

    while let Some((addr, result)) = rx.recv().await {
        match result {
            Ok(geocoded) => {
                cache.insert(addr, geocoded);
                stats.resolved += 1;
            }
            Err(e) => {
                stats.failed += 1;
                stats.failures.push((addr, e.to_string()));
            }
        }
    }
    // Arrival order depends on task scheduling; keep reports stable.
    stats.failures.sort();
    stats
}
