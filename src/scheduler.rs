//! Lifecycle of a load-test run.
//!
//! - [`Scheduler::start`] draws a persona for every virtual user, spawns one
//!   task per user through a [`TaskTracker`] (staggered by the spawn rate) and
//!   a collector task that folds the outcome stream into statistics.
//! - The run ends when the duration elapses or a [`StopHandle`] is used; both
//!   cancel the same token.
//! - [`Scheduler::stop`] waits for every user to reach a safe point and
//!   returns the aggregated [`RunStatistics`].

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::client::build_client;
use crate::config::Config;
use crate::errors::{ConfigError, SchedulerError};
use crate::outcome::OutcomeSink;
use crate::report::{RunStatistics, StatsAggregator};
use crate::requests::ApiTarget;
use crate::worker::{run_worker, WorkerConfig};

/// Cloneable handle that ends a run early.
#[derive(Debug, Clone)]
pub struct StopHandle {
    cancel: CancellationToken,
}

impl StopHandle {
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            info!("Stop requested");
        }
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes once the run has been told to stop.
    pub async fn stopped(&self) {
        self.cancel.cancelled().await
    }
}

struct ActiveRun {
    cancel: CancellationToken,
    tracker: TaskTracker,
    collector: JoinHandle<StatsAggregator>,
    started_at: Instant,
}

pub struct Scheduler {
    config: Arc<Config>,
    target: ApiTarget,
    active: Option<ActiveRun>,
}

impl Scheduler {
    /// Validates the configuration and builds the shared HTTP client.
    pub fn new(config: Config) -> Result<Self, SchedulerError> {
        config.validate()?;
        let client = build_client(&config.to_client_config())?;
        let target = ApiTarget::new(
            client,
            config.base_url.clone(),
            config.api_key.clone(),
            config.request_timeout,
        );

        Ok(Self {
            config: Arc::new(config),
            target,
            active: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Handle for the current run, if one is active.
    pub fn stop_handle(&self) -> Option<StopHandle> {
        self.active.as_ref().map(|run| StopHandle {
            cancel: run.cancel.clone(),
        })
    }

    /// Spawn `user_count` virtual users, `spawn_rate` per second.
    ///
    /// Personas are drawn once per user here and never re-rolled. With a
    /// `duration`, the run stops by itself when it elapses.
    pub fn start(
        &mut self,
        user_count: usize,
        spawn_rate: f64,
        duration: Option<Duration>,
    ) -> Result<StopHandle, SchedulerError> {
        if self.active.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }
        if user_count == 0 {
            return Err(ConfigError::invalid("NUM_USERS", user_count, "must be > 0").into());
        }
        if !(spawn_rate.is_finite() && spawn_rate > 0.0) {
            return Err(
                ConfigError::invalid("SPAWN_RATE", spawn_rate, "must be a positive number").into(),
            );
        }
        let start_delays = (0..user_count)
            .map(|user_id| Duration::try_from_secs_f64(user_id as f64 / spawn_rate))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| {
                ConfigError::invalid("SPAWN_RATE", spawn_rate, "too small for the number of users")
            })?;
        self.config.personas.ensure_not_empty()?;

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut assignments = Vec::with_capacity(user_count);
        for _ in 0..user_count {
            let persona = self
                .config
                .personas
                .select(&mut rng)
                .ok_or(ConfigError::EmptyRegistry)?;
            assignments.push(persona);
        }

        let mut distribution: BTreeMap<&str, usize> = BTreeMap::new();
        for persona in &assignments {
            *distribution.entry(persona.name.as_str()).or_insert(0) += 1;
        }
        info!(
            users = user_count,
            spawn_rate,
            duration_secs = duration.map(|d| d.as_secs_f64()),
            personas = ?distribution,
            "Starting load test"
        );

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let (sink, mut rx) = OutcomeSink::channel(self.config.debug_failures);

        let collector = tokio::spawn(async move {
            let mut aggregator = StatsAggregator::new();
            while let Some(outcome) = rx.recv().await {
                aggregator.record(&outcome);
            }
            aggregator
        });

        for (user_id, (persona, start_delay)) in
            assignments.into_iter().zip(start_delays).enumerate()
        {
            tracker.spawn(run_worker(WorkerConfig {
                user_id,
                persona,
                target: self.target.clone(),
                config: Arc::clone(&self.config),
                sink: sink.clone(),
                cancel: cancel.clone(),
                start_delay,
            }));
        }
        // Workers hold the only senders; the collector ends once they exit.
        drop(sink);
        tracker.close();

        if let Some(duration) = duration {
            let timer_cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => {
                        info!(duration_secs = duration.as_secs_f64(), "Test duration elapsed");
                        timer_cancel.cancel();
                    }
                    _ = timer_cancel.cancelled() => {}
                }
            });
        }

        let handle = StopHandle {
            cancel: cancel.clone(),
        };
        self.active = Some(ActiveRun {
            cancel,
            tracker,
            collector,
            started_at: Instant::now(),
        });
        Ok(handle)
    }

    /// Raise the stop signal, wait for all users and aggregate their outcomes.
    ///
    /// In-flight requests finish or time out on their own; a VRP job being
    /// polled is abandoned at its next poll boundary.
    pub async fn stop(&mut self) -> Result<RunStatistics, SchedulerError> {
        let run = self.active.take().ok_or(SchedulerError::NotRunning)?;
        run.cancel.cancel();

        debug!(users = run.tracker.len(), "Waiting for virtual users to stop");
        run.tracker.wait().await;

        let aggregator = run
            .collector
            .await
            .map_err(|e| SchedulerError::Collector(e.to_string()))?;
        let stats = aggregator.finish(run.started_at.elapsed());

        info!(
            elapsed_secs = stats.elapsed.as_secs_f64(),
            requests = stats.total_requests(),
            failures = stats.total_failures(),
            "Load test stopped"
        );
        Ok(stats)
    }

    /// Wait for the duration timer or an external stop, then [`stop`](Self::stop).
    pub async fn wait(&mut self) -> Result<RunStatistics, SchedulerError> {
        let cancel = self
            .active
            .as_ref()
            .map(|run| run.cancel.clone())
            .ok_or(SchedulerError::NotRunning)?;
        cancel.cancelled().await;
        self.stop().await
    }

    /// Start with the configured users, spawn rate and duration, then wait.
    pub async fn run(&mut self) -> Result<RunStatistics, SchedulerError> {
        self.start(
            self.config.users,
            self.config.spawn_rate,
            Some(self.config.test_duration),
        )?;
        self.wait().await
    }
}
