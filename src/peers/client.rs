//! HTTP client for one remote peer.
//!
//! A client is keyed by the peer's service name and dials lazily: the first
//! fetch resolves the service to an address (through the registry when one
//! is configured, otherwise from the name itself) and caches the base URL.
//! Resolution failures are not cached, so a peer that registers late is
//! picked up on the next fetch.
//!
//! One fetch runs under a single deadline covering resolution, every retry
//! attempt, and reading the response body. A peer that is slow, silent, or
//! down can therefore delay a lookup by at most the deadline before the
//! group falls back to its loader.

use super::protocol::{addr_from_service, encode_segment, BASE_PATH, FETCH_TIMEOUT};
use super::Fetcher;
use crate::registry;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::OnceCell;

pub struct Client {
    service: String,
    http: reqwest::Client,
    timeout: Duration,
    base_url: OnceCell<String>,
}

impl Client {
    /// Creates a client for `service` (e.g. `meshcache/10.0.0.2:8001`).
    /// No network activity happens until the first fetch.
    pub fn new(service: &str) -> Self {
        Self::with_timeout(service, FETCH_TIMEOUT)
    }

    /// Creates a client with a custom overall deadline per fetch.
    pub fn with_timeout(service: &str, timeout: Duration) -> Self {
        Self {
            service: service.to_string(),
            http: reqwest::Client::new(),
            timeout,
            base_url: OnceCell::new(),
        }
    }

    async fn base_url(&self) -> Result<&String> {
        self.base_url
            .get_or_try_init(|| async {
                let addr = match registry::endpoints_from_env() {
                    Some(endpoints) => registry::resolve(&endpoints, &self.service).await?,
                    None => addr_from_service(&self.service)
                        .ok_or_else(|| {
                            anyhow!("cannot derive peer address from service name {}", self.service)
                        })?
                        .to_string(),
                };
                tracing::debug!("resolved {} to {}", self.service, addr);
                Ok(format!("http://{}{}", addr, BASE_PATH))
            })
            .await
    }

    /// Retries transport failures with backoff. The caller bounds the whole
    /// loop with the fetch deadline; an attempt that hangs simply spends
    /// the remaining budget.
    async fn get_with_retry(&self, url: &str, attempts: usize) -> Result<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..attempts {
            let response = self.http.get(url).send().await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == attempts {
                        return Err(anyhow!(e));
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(anyhow!("retry attempts exhausted"))
    }
}

#[async_trait]
impl Fetcher for Client {
    async fn fetch(&self, group: &str, key: &str) -> Result<Vec<u8>> {
        let attempt = async {
            let base = self.base_url().await?;
            let url = format!("{}{}/{}", base, encode_segment(group), encode_segment(key));

            let response = self.get_with_retry(&url, 3).await?;
            if !response.status().is_success() {
                bail!(
                    "peer {} returned {} for {}/{}",
                    self.service,
                    response.status(),
                    group,
                    key
                );
            }

            Ok(response.bytes().await?.to_vec())
        };

        tokio::time::timeout(self.timeout, attempt)
            .await
            .map_err(|_| {
                anyhow!(
                    "peer {} did not answer for {}/{} within {:?}",
                    self.service,
                    group,
                    key,
                    self.timeout
                )
            })?
    }
}
