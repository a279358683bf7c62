//! Request builders for the single-request personas.
//!
//! Each persona task performs one request/response cycle, records exactly one
//! [`RequestOutcome`] and returns the failure (if any) to the caller.

use rand::Rng;
use reqwest::Method;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::errors::TaskError;
use crate::geo;
use crate::outcome::{
    OutcomeSink, RequestOutcome, LABEL_ISOCHRONE, LABEL_MATRIX, LABEL_MATRIX_POST, LABEL_ROUTE,
    LABEL_ROUTE_ERRATIC,
};

/// Longest body excerpt kept in a failure message.
const MAX_ERROR_BODY_CHARS: usize = 200;

/// A fully read HTTP response.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Failure text for a non-success reply: the JSON `message` field when
    /// present, otherwise a truncated body.
    pub fn error_message(&self) -> String {
        serde_json::from_str::<serde_json::Value>(&self.body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or_else(|| self.body.chars().take(MAX_ERROR_BODY_CHARS).collect())
    }
}

/// Target API: shared client, base URL and credentials.
#[derive(Debug, Clone)]
pub struct ApiTarget {
    pub client: reqwest::Client,
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl ApiTarget {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            api_key,
            timeout,
        }
    }

    /// Absolute URL for `path_and_query`, with `key=<api key>` appended when
    /// a key is configured.
    pub fn url(&self, path_and_query: &str) -> String {
        format!(
            "{}{}",
            self.base_url,
            with_api_key(path_and_query, self.api_key.as_deref())
        )
    }

    /// Send a request with the given timeout and read the whole body.
    ///
    /// The latency covers sending plus reading the body.
    pub async fn send(
        &self,
        request: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> (Duration, Result<HttpReply, TaskError>) {
        let start = Instant::now();
        let result = match request.timeout(timeout).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                match response.text().await {
                    Ok(body) => Ok(HttpReply { status, body }),
                    Err(e) => Err(TaskError::from_reqwest(e)),
                }
            }
            Err(e) => Err(TaskError::from_reqwest(e)),
        };
        (start.elapsed(), result)
    }

    /// Send a request and record a success for any 2xx reply.
    pub async fn send_and_record(
        &self,
        sink: &OutcomeSink,
        label: &'static str,
        method: Method,
        request: reqwest::RequestBuilder,
    ) -> Result<HttpReply, TaskError> {
        let (latency, result) = self.send(request, self.timeout).await;
        let (outcome, result) = match result {
            Ok(reply) if reply.is_success() => (
                RequestOutcome::success(label, method, latency, reply.status),
                Ok(reply),
            ),
            Ok(reply) => {
                let error = TaskError::Status {
                    status: reply.status,
                    message: reply.error_message(),
                };
                (
                    RequestOutcome::failure(label, method, latency, Some(reply.status), error.clone()),
                    Err(error),
                )
            }
            Err(error) => (
                RequestOutcome::failure(label, method, latency, None, error.clone()),
                Err(error),
            ),
        };

        debug!(
            request = %outcome.key(),
            status = ?outcome.status,
            latency_ms = latency.as_millis() as u64,
            "Request completed"
        );
        sink.record(outcome);
        result
    }
}

/// Append `key=<api key>` to a path that may already carry a query string.
pub fn with_api_key(path_and_query: &str, api_key: Option<&str>) -> String {
    match api_key {
        Some(key) => {
            let separator = if path_and_query.contains('?') { '&' } else { '?' };
            format!("{}{}key={}", path_and_query, separator, key)
        }
        None => path_and_query.to_string(),
    }
}

pub async fn isochrone<R: Rng + ?Sized>(
    target: &ApiTarget,
    sink: &OutcomeSink,
    rng: &mut R,
) -> Result<(), TaskError> {
    let (lat, lon) = geo::random_point(rng);
    let url = target.url(&format!("/isochrone?point={},{}", lat, lon));
    target
        .send_and_record(sink, LABEL_ISOCHRONE, Method::GET, target.client.get(url))
        .await
        .map(|_| ())
}

pub async fn matrix(
    target: &ApiTarget,
    sink: &OutcomeSink,
    points_query: &str,
) -> Result<(), TaskError> {
    let url = target.url(&format!("/matrix?{}", points_query));
    target
        .send_and_record(sink, LABEL_MATRIX, Method::GET, target.client.get(url))
        .await
        .map(|_| ())
}

#[derive(Debug, Serialize)]
pub struct MatrixRequest {
    /// `[lon, lat]` pairs.
    pub points: Vec<[f64; 2]>,
    pub out_arrays: Vec<&'static str>,
}

impl MatrixRequest {
    pub fn random<R: Rng + ?Sized>(rng: &mut R, num_points: usize) -> Self {
        let points = (0..num_points)
            .map(|_| {
                let (lat, lon) = geo::random_point(rng);
                [lon, lat]
            })
            .collect();
        Self {
            points,
            out_arrays: vec!["times"],
        }
    }
}

pub async fn matrix_post<R: Rng + ?Sized>(
    target: &ApiTarget,
    sink: &OutcomeSink,
    rng: &mut R,
    num_points: usize,
) -> Result<(), TaskError> {
    let body = MatrixRequest::random(rng, num_points);
    let request = target.client.post(target.url("/matrix")).json(&body);
    target
        .send_and_record(sink, LABEL_MATRIX_POST, Method::POST, request)
        .await
        .map(|_| ())
}

pub async fn route(
    target: &ApiTarget,
    sink: &OutcomeSink,
    points_query: &str,
) -> Result<(), TaskError> {
    let url = target.url(&format!("/route?{}", points_query));
    target
        .send_and_record(sink, LABEL_ROUTE, Method::GET, target.client.get(url))
        .await
        .map(|_| ())
}

/// Path with two malformed points for the erratic route persona.
pub fn erratic_route_path<R: Rng + ?Sized>(rng: &mut R) -> String {
    let [(lat1, lon1), (lat2, lon2)] = geo::erratic_route_points(rng);
    format!("/route?point={},{}&point={},{}", lat1, lon1, lat2, lon2)
}

/// Exercises the API's error paths; the outcome is recorded whatever the status.
pub async fn route_erratic<R: Rng + ?Sized>(
    target: &ApiTarget,
    sink: &OutcomeSink,
    rng: &mut R,
) -> Result<(), TaskError> {
    let url = target.url(&erratic_route_path(rng));
    target
        .send_and_record(sink, LABEL_ROUTE_ERRATIC, Method::GET, target.client.get(url))
        .await
        .map(|_| ())
}
