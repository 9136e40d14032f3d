use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use shared::types::{HealthReport, HealthStatus, ServiceRecord};
use crate::config::PollerConfig;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("failed to read response body: {0}")]
    Body(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("request cancelled")]
    Cancelled,
}

/// A completed HTTP exchange, whatever its status
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Outbound side of a health check. Errors are transport failures only;
/// an error status code is still an `Ok` reply.
#[async_trait]
pub trait HealthTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpReply, TransportError>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("health-monitord/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<HttpReply, TransportError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))?;

        Ok(HttpReply { status, body })
    }
}

/// Retry, timeout and classification settings for a single check
#[derive(Debug, Clone)]
pub struct ProbePolicy {
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub error_threshold: f64,
    pub health_path: String,
}

impl From<&PollerConfig> for ProbePolicy {
    fn from(config: &PollerConfig) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            max_retries: config.max_retries,
            error_threshold: config.error_threshold,
            health_path: config.health_path.clone(),
        }
    }
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self::from(&PollerConfig::default())
    }
}

/// Runs one health check and returns the updated copy of the record.
/// Never fails: every failure is folded into the returned health.
#[async_trait]
pub trait Probe: Send + Sync + 'static {
    async fn probe(&self, record: &ServiceRecord, cancel: &CancellationToken) -> ServiceRecord;
}

pub struct HealthProber<T> {
    transport: T,
    policy: ProbePolicy,
}

impl<T: HealthTransport> HealthProber<T> {
    pub fn new(transport: T, policy: ProbePolicy) -> Self {
        Self { transport, policy }
    }

    /// GET with the retry budget. Only transport failures are retried.
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<HttpReply, TransportError> {
        let timeout = self.policy.request_timeout;
        let mut last_err = TransportError::Cancelled;

        for attempt in 0..=self.policy.max_retries {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => Err(TransportError::Cancelled),
                r = tokio::time::timeout(timeout, self.transport.get(url)) => {
                    r.unwrap_or(Err(TransportError::Timeout(timeout)))
                }
            };

            match result {
                Ok(reply) => return Ok(reply),
                Err(TransportError::Cancelled) => return Err(TransportError::Cancelled),
                Err(e) => {
                    tracing::debug!("Attempt {} for {} failed: {}", attempt + 1, url, e);
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }
}

#[async_trait]
impl<T: HealthTransport + 'static> Probe for HealthProber<T> {
    async fn probe(&self, record: &ServiceRecord, cancel: &CancellationToken) -> ServiceRecord {
        let mut checked = record.clone();
        let now = Utc::now();

        // pessimistic until a usable report arrives
        checked.metrics.ready = false;
        checked.metrics.last_checked_at = Some(now);
        checked.metrics.last_polled_at = Some(now);

        let url = health_url(&record.endpoint, &self.policy.health_path);

        let reply = match self.fetch(&url, cancel).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::debug!("Service {} unreachable: {}", record.id, e);
                checked.metrics.health = HealthStatus::Dead;
                return checked;
            }
        };

        if !reply.status.is_success() {
            tracing::debug!("Service {} answered {}", record.id, reply.status);
            checked.metrics.health = HealthStatus::Unhealthy;
            return checked;
        }

        match serde_json::from_slice::<HealthReport>(&reply.body) {
            Ok(report) => apply_report(&mut checked, report, self.policy.error_threshold),
            Err(e) => {
                tracing::debug!("Service {} sent an unreadable health report: {}", record.id, e);
                checked.metrics.health = HealthStatus::Unhealthy;
            }
        }

        checked
    }
}

/// Fold a successful health report into the record.
/// Reported attributes overwrite existing keys; no key is ever removed.
pub fn apply_report(record: &mut ServiceRecord, report: HealthReport, error_threshold: f64) {
    let metrics = &mut record.metrics;
    metrics.ready = true;
    metrics.uptime_secs = report.uptime_sec;
    metrics.request_count = report.request_count;
    metrics.error_count = report.error_count;
    metrics.error_rate = if report.request_count > 0 {
        report.error_count as f64 / report.request_count as f64
    } else {
        0.0
    };

    metrics.health = if metrics.error_rate > error_threshold {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    record.attributes.extend(report.attributes);
}

fn health_url(endpoint: &str, path: &str) -> String {
    format!("{}{}", endpoint.trim_end_matches('/'), path)
}
