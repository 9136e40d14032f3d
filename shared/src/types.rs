use std::collections::HashMap;
use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use crate::protocol::{STATUS_DOWN, STATUS_UP};

/// Health classification of a monitored service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Responded successfully with an error rate at or below the threshold
    Healthy,
    /// Responded successfully but the error rate is above the threshold
    Degraded,
    /// Responded, but with a failing status or an unreadable body
    Unhealthy,
    /// Could not be reached at all
    Dead,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Dead => "dead",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest observation of a service. Only the most recent check is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// True only when the last check got a success status and a parseable body
    pub ready: bool,

    pub health: HealthStatus,

    /// Values reported by the service itself, passed through unchanged
    pub uptime_secs: u64,
    pub request_count: u64,
    pub error_count: u64,

    /// error_count / request_count, or 0 when no requests were reported
    pub error_rate: f64,

    /// Time of the last check attempt, successful or not
    pub last_checked_at: Option<DateTime<Utc>>,

    /// Time of the last poll; drives the due computation
    pub last_polled_at: Option<DateTime<Utc>>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            ready: false,
            health: HealthStatus::Unhealthy,
            uptime_secs: 0,
            request_count: 0,
            error_count: 0,
            error_rate: 0.0,
            last_checked_at: None,
            last_polled_at: None,
        }
    }
}

/// A registered service together with its latest metrics.
/// This is the canonical data model held by the monitor's directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Unique identifier chosen by the service, e.g. "svc1"
    pub id: String,

    /// Base address to probe, e.g. "http://localhost:9001"
    pub endpoint: String,

    /// Per-service poll cadence; 0 means the monitor default applies
    pub poll_interval_secs: u64,

    /// Seeded at registration, merged with every successful health report
    pub attributes: HashMap<String, String>,

    pub metrics: Metrics,
}

impl ServiceRecord {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            poll_interval_secs: 0,
            attributes: HashMap::new(),
            metrics: Metrics::default(),
        }
    }
}

/// Body of `POST /register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub id: String,

    #[serde(alias = "endpoint")]
    pub url: String,

    #[serde(default, alias = "poll_interval_secs")]
    pub poll_interval_sec: u64,

    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl From<RegistrationRequest> for ServiceRecord {
    fn from(req: RegistrationRequest) -> Self {
        Self {
            id: req.id,
            endpoint: req.url,
            poll_interval_secs: req.poll_interval_sec,
            attributes: req.attributes,
            metrics: Metrics::default(),
        }
    }
}

/// Body a probed service returns from its health endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub uptime_sec: u64,
    pub request_count: u64,
    pub error_count: u64,

    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// One entry of the `GET /metrics` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsView {
    pub service: String,
    /// "UP" when ready, "DOWN" otherwise
    pub status: String,
    pub health: HealthStatus,
    pub ready: bool,
    /// Human readable age of the last check, e.g. "4s ago"
    pub last_checked: String,
    pub error_rate: f64,
    pub uptime_sec: u64,
    pub attributes: HashMap<String, String>,
}

impl MetricsView {
    pub fn from_record(record: &ServiceRecord, now: DateTime<Utc>) -> Self {
        let status = if record.metrics.ready { STATUS_UP } else { STATUS_DOWN };

        Self {
            service: record.id.clone(),
            status: status.to_string(),
            health: record.metrics.health,
            ready: record.metrics.ready,
            last_checked: render_age(record.metrics.last_checked_at, now),
            error_rate: record.metrics.error_rate,
            uptime_sec: record.metrics.uptime_secs,
            attributes: record.attributes.clone(),
        }
    }
}

fn render_age(at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match at {
        Some(at) => format!("{}s ago", (now - at).num_seconds().max(0)),
        None => "never".to_string(),
    }
}
