//! Per-request outcomes and the shared stream they are appended to.

use reqwest::Method;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::errors::{ErrorCategory, TaskError};
use crate::metrics::{REQUEST_DURATION_SECONDS, REQUEST_FAILURES, REQUEST_TOTAL};

pub const LABEL_INFO: &str = "Info";
pub const LABEL_ISOCHRONE: &str = "Isochrone";
pub const LABEL_MATRIX: &str = "Matrix";
pub const LABEL_MATRIX_POST: &str = "Matrix POST";
pub const LABEL_ROUTE: &str = "Route";
pub const LABEL_ROUTE_ERRATIC: &str = "Route erratic";
pub const LABEL_VRP_OPTIMIZE: &str = "VRP complex Optimize";
pub const LABEL_VRP_SOLUTION: &str = "VRP complex Solution";

/// Result of one HTTP request. Immutable once created.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub label: &'static str,
    pub method: Method,
    pub latency: Duration,
    pub status: Option<u16>,
    pub error: Option<TaskError>,
    pub recorded_at: Instant,
}

impl RequestOutcome {
    pub fn success(label: &'static str, method: Method, latency: Duration, status: u16) -> Self {
        Self {
            label,
            method,
            latency,
            status: Some(status),
            error: None,
            recorded_at: Instant::now(),
        }
    }

    pub fn failure(
        label: &'static str,
        method: Method,
        latency: Duration,
        status: Option<u16>,
        error: TaskError,
    ) -> Self {
        Self {
            label,
            method,
            latency,
            status,
            error: Some(error),
            recorded_at: Instant::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn error_category(&self) -> Option<ErrorCategory> {
        self.error.as_ref().map(TaskError::category)
    }

    /// Statistics key, e.g. `"GET Route"`.
    pub fn key(&self) -> String {
        format!("{} {}", self.method, self.label)
    }
}

/// Cloneable handle virtual users append outcomes through.
///
/// Backed by an unbounded channel so recording never blocks a virtual user.
#[derive(Clone)]
pub struct OutcomeSink {
    tx: mpsc::UnboundedSender<RequestOutcome>,
    log_failures: bool,
}

impl OutcomeSink {
    pub fn channel(log_failures: bool) -> (Self, mpsc::UnboundedReceiver<RequestOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, log_failures }, rx)
    }

    /// Append an outcome and update the Prometheus metrics for it.
    pub fn record(&self, outcome: RequestOutcome) {
        REQUEST_TOTAL.with_label_values(&[outcome.label]).inc();
        REQUEST_DURATION_SECONDS
            .with_label_values(&[outcome.label])
            .observe(outcome.latency.as_secs_f64());

        if let Some(error) = &outcome.error {
            REQUEST_FAILURES
                .with_label_values(&[outcome.label, error.category().label()])
                .inc();
            if self.log_failures {
                warn!(
                    request = %outcome.key(),
                    error = %error,
                    "Request failed"
                );
            } else {
                debug!(
                    request = %outcome.key(),
                    error = %error,
                    "Request failed"
                );
            }
        }

        if self.tx.send(outcome).is_err() {
            debug!("Outcome collector is gone, dropping outcome");
        }
    }
}
