//! Service Registry Adapter
//!
//! Publishes this node's endpoint to etcd and resolves the endpoints other
//! nodes have published. The engine only depends on two capabilities:
//! registering `service → address` under a short lease that is renewed
//! until shutdown, and resolving a service name to a currently-advertised
//! address.
//!
//! ## Lease model
//! An endpoint lives under a 5 second lease. While the node is healthy the
//! keep-alive loop renews it well inside the TTL; when the node stops (or
//! dies) the lease is revoked (or expires) and the endpoint disappears from
//! the directory on its own. Nothing is ever unregistered by hand.
//!
//! Registry participation is opt-in: without `MESHCACHE_ETCD_ENDPOINTS` in
//! the environment a node serves and routes purely from its static peer
//! list.

use anyhow::{anyhow, Context, Result};
use etcd_client::{Client, ConnectOptions, GetOptions, PutOptions};
use std::time::Duration;
use tokio::sync::watch;

/// Lease lifetime for published endpoints.
const LEASE_TTL_SECS: i64 = 5;

/// How often the lease is renewed. Two renewals fit in one TTL so a single
/// missed round does not drop the endpoint.
const RENEW_INTERVAL: Duration = Duration::from_secs(2);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry endpoints from `MESHCACHE_ETCD_ENDPOINTS` (comma-separated).
/// `None` means the node runs standalone.
pub fn endpoints_from_env() -> Option<Vec<String>> {
    let raw = std::env::var("MESHCACHE_ETCD_ENDPOINTS").ok()?;
    let endpoints: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if endpoints.is_empty() {
        None
    } else {
        Some(endpoints)
    }
}

async fn connect(endpoints: &[String]) -> Result<Client> {
    let options = ConnectOptions::new().with_connect_timeout(CONNECT_TIMEOUT);
    Client::connect(endpoints, Some(options))
        .await
        .context("failed to connect to etcd")
}

/// A published endpoint plus the lease keeping it alive.
pub struct Registration {
    client: Client,
    lease_id: i64,
    service: String,
}

impl Registration {
    /// Grants a lease and publishes `service → addr` under it. A failure
    /// here means the node cannot participate in the fleet and start-up
    /// must abort.
    pub async fn publish(endpoints: &[String], service: &str, addr: &str) -> Result<Registration> {
        let mut client = connect(endpoints).await?;

        let lease = client
            .lease_grant(LEASE_TTL_SECS, None)
            .await
            .context("failed to grant registry lease")?;
        let lease_id = lease.id();

        let key = format!("{}/{}", service, addr);
        client
            .put(key, addr, Some(PutOptions::new().with_lease(lease_id)))
            .await
            .context("failed to publish endpoint")?;

        tracing::info!("registered {} -> {} under lease {}", service, addr, lease_id);
        Ok(Self {
            client,
            lease_id,
            service: service.to_string(),
        })
    }

    /// Renews the lease until `stop` fires or a renewal fails, then revokes
    /// it. Returns `Ok` on a requested stop and `Err` when the lease was
    /// lost, in which case the node is no longer discoverable.
    pub async fn keep_alive(mut self, stop: watch::Receiver<bool>) -> Result<()> {
        let outcome = self.renew_loop(stop).await;
        self.revoke().await;
        outcome
    }

    async fn renew_loop(&mut self, mut stop: watch::Receiver<bool>) -> Result<()> {
        let (mut keeper, mut responses) = self
            .client
            .lease_keep_alive(self.lease_id)
            .await
            .context("failed to open keep-alive stream")?;

        let mut ticker = tokio::time::interval(RENEW_INTERVAL);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    keeper
                        .keep_alive()
                        .await
                        .context("failed to renew registry lease")?;
                }
                message = responses.message() => {
                    match message {
                        Ok(Some(resp)) if resp.ttl() > 0 => {
                            tracing::debug!(
                                "lease {} renewed, ttl {}s",
                                self.lease_id,
                                resp.ttl()
                            );
                        }
                        Ok(Some(_)) => {
                            return Err(anyhow!("registry lease {} expired", self.lease_id));
                        }
                        Ok(None) => {
                            return Err(anyhow!("registry keep-alive stream closed"));
                        }
                        Err(e) => {
                            return Err(anyhow!(e).context("registry keep-alive failed"));
                        }
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        tracing::info!("revoking registration for {}", self.service);
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn revoke(&mut self) {
        if let Err(e) = self.client.lease_revoke(self.lease_id).await {
            tracing::warn!("failed to revoke lease {}: {}", self.lease_id, e);
        }
    }
}

/// Publishes `service → addr` and blocks renewing the lease until `stop`
/// fires or the lease is lost. The endpoint is revoked on the way out.
pub async fn register(
    endpoints: &[String],
    service: &str,
    addr: &str,
    stop: watch::Receiver<bool>,
) -> Result<()> {
    Registration::publish(endpoints, service, addr)
        .await?
        .keep_alive(stop)
        .await
}

/// Resolves `service` to one currently-advertised address.
pub async fn resolve(endpoints: &[String], service: &str) -> Result<String> {
    let mut client = connect(endpoints).await?;

    let prefix = format!("{}/", service);
    let response = client
        .get(prefix, Some(GetOptions::new().with_prefix()))
        .await
        .context("failed to query registry")?;

    let kv = response
        .kvs()
        .first()
        .ok_or_else(|| anyhow!("no endpoint advertised for service {}", service))?;
    Ok(kv.value_str()?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const TEST_ENDPOINTS: &[&str] = &["127.0.0.1:2379"];

    fn endpoints() -> Vec<String> {
        TEST_ENDPOINTS.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    #[ignore = "requires a running etcd at 127.0.0.1:2379"]
    async fn test_publish_then_resolve() {
        let endpoints = endpoints();
        let registration =
            Registration::publish(&endpoints, "meshcache-test/a", "127.0.0.1:6324")
                .await
                .expect("publish should succeed against a live etcd");

        let addr = resolve(&endpoints, "meshcache-test/a").await.unwrap();
        assert_eq!(addr, "127.0.0.1:6324");

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(registration.keep_alive(stop_rx));
        tokio::time::sleep(Duration::from_millis(100)).await;

        stop_tx.send(true).unwrap();
        handle.await.unwrap().expect("clean stop");

        // Revoked on exit, so the endpoint is gone immediately.
        assert!(resolve(&endpoints, "meshcache-test/a").await.is_err());
    }

    #[tokio::test]
    #[ignore = "requires a running etcd at 127.0.0.1:2379"]
    async fn test_lease_outlives_its_ttl_while_renewed() {
        let endpoints = endpoints();
        let (stop_tx, stop_rx) = watch::channel(false);
        let registrar = endpoints.clone();
        let handle = tokio::spawn(async move {
            register(&registrar, "meshcache-test/b", "127.0.0.1:6325", stop_rx).await
        });

        // Longer than the 5s lease TTL; renewal must keep it alive.
        tokio::time::sleep(Duration::from_secs(7)).await;
        let addr = resolve(&endpoints, "meshcache-test/b").await.unwrap();
        assert_eq!(addr, "127.0.0.1:6325");

        stop_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }
}
