//! Worker agent: register, heartbeat, deregister.

use anyhow::{Context, Result};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use gridway_protocol::control::{HeartbeatRequest, RegisterRequest, RegisterResponse};
use gridway_protocol::{LoadSnapshot, ModelDescriptor, SessionToken, WorkerCapabilities, WorkerId};

use crate::discovery;

/// Refresh the advertised inventory every this many heartbeats.
const INVENTORY_REFRESH_TICKS: u64 = 12;

/// Worker agent configuration (plain data).
pub struct AgentConfig {
    pub gateway_url: String,
    pub runtime_url: String,
    /// Address the gateway dials for inference; usually the runtime URL.
    pub advertise_url: String,
    pub worker_id: String,
    pub max_concurrency: u32,
    pub heartbeat_interval: Duration,
}

#[derive(Debug, Error)]
enum HeartbeatFailure {
    /// The gateway no longer recognizes this session; re-register.
    #[error("session rejected by gateway")]
    SessionLost,
    #[error("gateway unreachable: {0}")]
    Unreachable(String),
}

/// Active agent holding the current gateway session.
pub struct Agent {
    config: AgentConfig,
    client: reqwest::Client,
    token: Option<SessionToken>,
    inventory: Vec<ModelDescriptor>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            config,
            client,
            token: None,
            inventory: Vec::new(),
        }
    }

    /// Register, then heartbeat until shutdown. The initial registration
    /// fails fast; later session losses re-register in place.
    pub async fn run(&mut self, mut shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        self.register().await?;

        let mut ticks: u64 = 0;
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.heartbeat_interval) => {
                    ticks += 1;
                    if ticks % INVENTORY_REFRESH_TICKS == 0 {
                        self.refresh_inventory().await;
                    }
                    match self.heartbeat().await {
                        Ok(()) => {}
                        Err(HeartbeatFailure::SessionLost) => {
                            warn!("Gateway dropped our session, re-registering");
                            if let Err(e) = self.register().await {
                                warn!("Re-registration failed, will retry: {:#}", e);
                            }
                        }
                        Err(HeartbeatFailure::Unreachable(e)) => {
                            warn!("Heartbeat not delivered: {}", e);
                        }
                    }
                }
            }
        }

        self.deregister().await;
        info!("Agent stopped");
        Ok(())
    }

    async fn register(&mut self) -> Result<()> {
        let inventory = discovery::fetch_inventory(&self.client, &self.config.runtime_url)
            .await
            .context("Failed to discover model inventory")?;
        if inventory.is_empty() {
            warn!("Runtime reports no models; registering with an empty inventory");
        }

        let request = RegisterRequest {
            worker_id: WorkerId::from(self.config.worker_id.as_str()),
            address: self.config.advertise_url.clone(),
            capabilities: WorkerCapabilities {
                models: inventory.clone(),
                max_concurrency: self.config.max_concurrency,
                supports_streaming: true,
            },
        };

        let url = format!("{}/internal/workers", self.config.gateway_url.trim_end_matches('/'));
        let response: RegisterResponse = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to reach gateway")?
            .error_for_status()
            .context("Gateway refused registration")?
            .json()
            .await
            .context("Malformed registration response")?;

        info!(
            "Registered [{}] with {} models",
            self.config.worker_id,
            inventory.len()
        );
        self.token = Some(response.token);
        self.inventory = inventory;
        Ok(())
    }

    async fn heartbeat(&self) -> Result<(), HeartbeatFailure> {
        let Some(token) = self.token else {
            return Err(HeartbeatFailure::SessionLost);
        };
        let url = format!(
            "{}/internal/workers/{}/heartbeat",
            self.config.gateway_url.trim_end_matches('/'),
            self.config.worker_id
        );
        // Inference traffic flows gateway -> runtime directly; the load we
        // can observe here is advisory only.
        let request = HeartbeatRequest {
            token,
            load: LoadSnapshot { in_flight: 0 },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| HeartbeatFailure::Unreachable(e.to_string()))?;

        match response.status().as_u16() {
            200 => {
                debug!("Heartbeat acknowledged");
                Ok(())
            }
            404 | 409 => Err(HeartbeatFailure::SessionLost),
            status => Err(HeartbeatFailure::Unreachable(format!(
                "unexpected status {}",
                status
            ))),
        }
    }

    /// Re-read the runtime inventory; re-register when it changed so the
    /// gateway replaces our capabilities atomically.
    async fn refresh_inventory(&mut self) {
        let inventory =
            match discovery::fetch_inventory(&self.client, &self.config.runtime_url).await {
                Ok(inventory) => inventory,
                Err(e) => {
                    warn!("Inventory refresh failed: {:#}", e);
                    return;
                }
            };
        if inventory_signature(&inventory) == inventory_signature(&self.inventory) {
            return;
        }
        info!(
            "Model inventory changed ({} -> {} models), re-registering",
            self.inventory.len(),
            inventory.len()
        );
        if let Err(e) = self.register().await {
            warn!("Re-registration after inventory change failed: {:#}", e);
        }
    }

    async fn deregister(&self) {
        let url = format!(
            "{}/internal/workers/{}",
            self.config.gateway_url.trim_end_matches('/'),
            self.config.worker_id
        );
        match self.client.delete(&url).send().await {
            Ok(response) if response.status().is_success() => {
                info!("Deregistered [{}]", self.config.worker_id);
            }
            Ok(response) => {
                warn!("Deregistration returned status {}", response.status());
            }
            Err(e) => {
                warn!("Deregistration not delivered: {}", e);
            }
        }
    }
}

/// Stable identity of an inventory, ignoring volatile timestamps.
fn inventory_signature(models: &[ModelDescriptor]) -> Vec<(String, Option<u64>)> {
    let mut signature: Vec<(String, Option<u64>)> = models
        .iter()
        .map(|model| (model.name.clone(), model.size_bytes))
        .collect();
    signature.sort();
    signature
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn descriptor(name: &str, size: Option<u64>) -> ModelDescriptor {
        ModelDescriptor {
            name: name.to_string(),
            modified_at: Utc::now(),
            size_bytes: size,
            family: None,
        }
    }

    #[test]
    fn test_inventory_signature_ignores_timestamps() {
        let a = vec![descriptor("m1", Some(1)), descriptor("m2", None)];
        let mut b = vec![descriptor("m2", None), descriptor("m1", Some(1))];
        b[0].modified_at = Utc::now();
        assert_eq!(inventory_signature(&a), inventory_signature(&b));
    }

    #[test]
    fn test_inventory_signature_detects_changes() {
        let a = vec![descriptor("m1", Some(1))];
        let b = vec![descriptor("m1", Some(2))];
        assert_ne!(inventory_signature(&a), inventory_signature(&b));
    }
}
