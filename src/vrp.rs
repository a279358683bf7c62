//! Asynchronous optimization jobs: submit, then poll until terminal.
//!
//! ```text
//!   submit ──ok──▶ Polling ──"finished"──▶ Finished
//!     │              │ ▲
//!     │              │ └── any other status (after poll_interval)
//!     ▼              ▼
//!   Failed ◀── 400 / unparsable / no status / transport error
//! ```
//!
//! The submit and every poll each record one outcome, labeled
//! "VRP complex Optimize" and "VRP complex Solution" respectively. Polling
//! has no overall deadline unless `max_polls` is configured; a stop request
//! is honored between polls, never in the middle of one.

use rand::Rng;
use reqwest::Method;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::VrpSettings;
use crate::errors::TaskError;
use crate::geo::{self, OptimizePayload};
use crate::metrics::{VRP_JOBS_TOTAL, VRP_POLLS_PER_JOB};
use crate::outcome::{OutcomeSink, RequestOutcome, LABEL_VRP_OPTIMIZE, LABEL_VRP_SOLUTION};
use crate::requests::{ApiTarget, HttpReply};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Submitted,
    Polling,
    Finished,
    Failed,
}

/// A server-side optimization job tracked by the controller.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: Instant,
    pub poll_count: u32,
}

impl Job {
    fn submitted(job_id: String) -> Self {
        Self {
            job_id,
            status: JobStatus::Submitted,
            created_at: Instant::now(),
            poll_count: 0,
        }
    }
}

/// How a job run ended.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// The solution reported `finished`.
    Finished(Job),
    /// The submit failed; no job id was obtained.
    SubmitFailed(TaskError),
    /// Polling hit a terminal error.
    PollFailed { job: Job, error: TaskError },
    /// The engine asked to stop while the job was still running.
    Cancelled(Job),
    /// The configured poll ceiling was reached.
    PollLimitReached(Job),
}

impl JobOutcome {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobOutcome::Finished(_))
    }

    pub fn job(&self) -> Option<&Job> {
        match self {
            JobOutcome::Finished(job)
            | JobOutcome::Cancelled(job)
            | JobOutcome::PollLimitReached(job)
            | JobOutcome::PollFailed { job, .. } => Some(job),
            JobOutcome::SubmitFailed(_) => None,
        }
    }

    fn metric_label(&self) -> &'static str {
        match self {
            JobOutcome::Finished(_) => "finished",
            JobOutcome::SubmitFailed(_) | JobOutcome::PollFailed { .. } => "failed",
            JobOutcome::Cancelled(_) => "cancelled",
            JobOutcome::PollLimitReached(_) => "poll_limit",
        }
    }
}

/// Result of interpreting one solution poll.
#[derive(Debug, Clone, PartialEq)]
enum PollStep {
    Finished,
    Pending(String),
    Terminal(TaskError),
}

/// Drives one optimization job through submit and polling.
pub struct AsyncJobController<'a> {
    target: &'a ApiTarget,
    settings: &'a VrpSettings,
    sink: &'a OutcomeSink,
}

impl<'a> AsyncJobController<'a> {
    pub fn new(target: &'a ApiTarget, settings: &'a VrpSettings, sink: &'a OutcomeSink) -> Self {
        Self {
            target,
            settings,
            sink,
        }
    }

    pub fn payload<R: Rng + ?Sized>(&self, rng: &mut R) -> OptimizePayload {
        geo::random_optimize_payload(
            rng,
            self.settings.max_profiles,
            self.settings.max_locations,
            &self.settings.profiles,
            self.settings.traffic_probability,
        )
    }

    /// Submit a random job and poll it until it reaches a terminal state.
    pub async fn run<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        cancel: &CancellationToken,
    ) -> JobOutcome {
        let payload = self.payload(rng);
        let outcome = match self.submit(&payload).await {
            Ok(job) => self.poll(job, cancel).await,
            Err(error) => JobOutcome::SubmitFailed(error),
        };

        VRP_JOBS_TOTAL
            .with_label_values(&[outcome.metric_label()])
            .inc();
        if let Some(job) = outcome.job() {
            VRP_POLLS_PER_JOB.observe(job.poll_count as f64);
        }
        outcome
    }

    /// POST the payload and extract the job id.
    pub async fn submit(&self, payload: &OptimizePayload) -> Result<Job, TaskError> {
        let request = self
            .target
            .client
            .post(self.target.url("/optimize"))
            .json(payload);
        let (latency, result) = self.target.send(request, self.settings.timeout).await;

        let (status, parsed) = match result {
            Ok(reply) => (Some(reply.status), interpret_submit(&reply)),
            Err(error) => (None, Err(error)),
        };

        match parsed {
            Ok(job_id) => {
                self.sink.record(RequestOutcome::success(
                    LABEL_VRP_OPTIMIZE,
                    Method::POST,
                    latency,
                    status.unwrap_or_default(),
                ));
                info!(job_id = %job_id, "Optimization job submitted");
                Ok(Job::submitted(job_id))
            }
            Err(error) => {
                self.sink.record(RequestOutcome::failure(
                    LABEL_VRP_OPTIMIZE,
                    Method::POST,
                    latency,
                    status,
                    error.clone(),
                ));
                Err(error)
            }
        }
    }

    /// Poll the job's solution endpoint until a terminal state.
    pub async fn poll(&self, mut job: Job, cancel: &CancellationToken) -> JobOutcome {
        job.status = JobStatus::Polling;
        let url = self.target.url(&format!("/solution/{}", job.job_id));

        loop {
            if cancel.is_cancelled() {
                debug!(job_id = %job.job_id, polls = job.poll_count, "Stop requested, abandoning job");
                return JobOutcome::Cancelled(job);
            }
            if let Some(max) = self.settings.max_polls {
                if job.poll_count >= max {
                    warn!(job_id = %job.job_id, max_polls = max, "Poll limit reached");
                    return JobOutcome::PollLimitReached(job);
                }
            }

            let request = self.target.client.get(&url);
            let (latency, result) = self.target.send(request, self.settings.timeout).await;
            job.poll_count += 1;

            let (status, step) = match result {
                Ok(reply) => (Some(reply.status), interpret_poll(&reply)),
                Err(error) => (None, PollStep::Terminal(error)),
            };

            match step {
                PollStep::Finished => {
                    self.sink.record(RequestOutcome::success(
                        LABEL_VRP_SOLUTION,
                        Method::GET,
                        latency,
                        status.unwrap_or_default(),
                    ));
                    job.status = JobStatus::Finished;
                    info!(
                        job_id = %job.job_id,
                        polls = job.poll_count,
                        elapsed_ms = job.created_at.elapsed().as_millis() as u64,
                        "Optimization job finished"
                    );
                    return JobOutcome::Finished(job);
                }
                PollStep::Terminal(error) => {
                    self.sink.record(RequestOutcome::failure(
                        LABEL_VRP_SOLUTION,
                        Method::GET,
                        latency,
                        status,
                        error.clone(),
                    ));
                    job.status = JobStatus::Failed;
                    warn!(job_id = %job.job_id, polls = job.poll_count, error = %error, "Optimization job failed");
                    return JobOutcome::PollFailed { job, error };
                }
                PollStep::Pending(state) => {
                    let outcome = match status {
                        Some(code) if (200..300).contains(&code) => {
                            RequestOutcome::success(LABEL_VRP_SOLUTION, Method::GET, latency, code)
                        }
                        _ => RequestOutcome::failure(
                            LABEL_VRP_SOLUTION,
                            Method::GET,
                            latency,
                            status,
                            TaskError::Status {
                                status: status.unwrap_or_default(),
                                message: format!("VRP solution returned status `{}`", state),
                            },
                        ),
                    };
                    self.sink.record(outcome);
                    debug!(job_id = %job.job_id, state = %state, polls = job.poll_count, "Job still running");
                }
            }

            // Bounds the client-side poll rate.
            tokio::select! {
                _ = tokio::time::sleep(effective_poll_interval(self.settings)) => {}
                _ = cancel.cancelled() => {}
            }
        }
    }
}

/// Job id from a submit reply, or the reason the submit failed.
fn interpret_submit(reply: &HttpReply) -> Result<String, TaskError> {
    if reply.body.trim().is_empty() {
        return Err(TaskError::Protocol(
            "VRP optimize failed, there was no response.".to_string(),
        ));
    }
    let data: Value = serde_json::from_str(&reply.body).map_err(|e| {
        TaskError::Protocol(format!(
            "VRP optimize failed, json decode error: {}\nCode: {}, Response text: {}",
            e, reply.status, reply.body
        ))
    })?;
    if !reply.is_success() {
        return Err(TaskError::Status {
            status: reply.status,
            message: format!("VRP optimize failed. {}", reply.error_message()),
        });
    }
    match data.get("job_id").and_then(Value::as_str) {
        Some(job_id) => Ok(job_id.to_string()),
        None => Err(TaskError::Protocol(format!(
            "VRP optimize failed, no `job_id` in response. Response: {}",
            data
        ))),
    }
}

fn interpret_poll(reply: &HttpReply) -> PollStep {
    let data: Value = match serde_json::from_str(&reply.body) {
        Ok(data) => data,
        Err(e) => {
            return PollStep::Terminal(TaskError::Protocol(format!(
                "VRP solution failed, json decode error: {}\nCode: {}, Response text: {}",
                e, reply.status, reply.body
            )))
        }
    };
    if reply.status == 400 {
        return PollStep::Terminal(TaskError::TerminalPoll(format!(
            "VRP solution failed, HTTP 400. {}",
            reply.body
        )));
    }
    match data.get("status").and_then(Value::as_str) {
        Some("finished") => PollStep::Finished,
        Some(other) => PollStep::Pending(other.to_string()),
        None => PollStep::Terminal(TaskError::Protocol(
            "VRP solution failed, no `status` in response.".to_string(),
        )),
    }
}

/// Poll interval actually used: never below the configured floor.
pub fn effective_poll_interval(settings: &VrpSettings) -> Duration {
    settings.poll_interval.max(crate::config::MIN_POLL_INTERVAL)
}
