use async_trait::async_trait;
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::cdp::{CdpSession, TargetInfo};
use crate::config::ConnectionConfig;
use crate::error::{ControlError, HarvestError};
use crate::traits::{Connector, ControlSurface};

/// Connects to the application's fixed local control endpoint.
pub struct RemoteControlClient {
    list_url: Url,
    http: reqwest::Client,
    retry_delay: Duration,
    command_timeout: Duration,
}

impl RemoteControlClient {
    pub fn new(port: u16, config: &ConnectionConfig) -> Result<Self, HarvestError> {
        let list_url = Url::parse(&format!("http://{}:{}/json/list", config.host, port))
            .map_err(|e| HarvestError::InvalidConfig(format!("control endpoint: {}", e)))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.command_timeout_ms))
            .build()
            .map_err(ControlError::from)?;

        Ok(Self {
            list_url,
            http,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            command_timeout: Duration::from_millis(config.command_timeout_ms),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.list_url
    }

    /// Connects and verifies a page answers a readiness query, retrying with a
    /// fixed delay.
    #[instrument(skip(self), fields(endpoint = %self.list_url))]
    pub async fn connect(&self, max_retries: u32) -> Result<CdpSession, HarvestError> {
        let attempts = max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.try_connect().await {
                Ok(session) => {
                    info!(
                        attempt,
                        target = %session.target().title,
                        "Remote control session established"
                    );
                    return Ok(session);
                }
                Err(e) => {
                    warn!(attempt, max = attempts, error = %e, "Connection attempt failed");
                    last_error = e.to_string();
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(HarvestError::ConnectionExhausted {
            attempts,
            last_error,
        })
    }

    async fn try_connect(&self) -> Result<CdpSession, ControlError> {
        let targets: Vec<TargetInfo> = self
            .http
            .get(self.list_url.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let target = targets
            .into_iter()
            .find(TargetInfo::is_controllable)
            .ok_or_else(|| ControlError::NoTarget(self.list_url.to_string()))?;

        let ws_url = target
            .web_socket_debugger_url
            .clone()
            .ok_or_else(|| ControlError::NoTarget(self.list_url.to_string()))?;
        debug!(target = %target.id, %ws_url, "Opening debugger socket");

        let (socket, _) = connect_async(ws_url.as_str()).await?;
        let session = CdpSession::new(socket, target, self.command_timeout);

        if session.ready().await? {
            Ok(session)
        } else {
            let _ = session.close().await;
            Err(ControlError::NotReady("document still loading".to_string()))
        }
    }

    pub async fn disconnect(&self, session: CdpSession) {
        if let Err(e) = session.close().await {
            warn!(error = %e, "Failed to close remote control session");
        }
    }
}

#[async_trait]
impl Connector for RemoteControlClient {
    type Surface = CdpSession;

    async fn connect(&self, max_retries: u32) -> Result<CdpSession, HarvestError> {
        RemoteControlClient::connect(self, max_retries).await
    }

    async fn disconnect(&self, surface: CdpSession) {
        RemoteControlClient::disconnect(self, surface).await
    }
}
