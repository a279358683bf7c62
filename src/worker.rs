//! Virtual users and their paced iteration loop.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio::time::{self, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::errors::TaskError;
use crate::metrics::ACTIVE_VIRTUAL_USERS;
use crate::outcome::OutcomeSink;
use crate::persona::{Persona, PersonaKind};
use crate::points_query::resolve_points_query;
use crate::requests::{self, ApiTarget};
use crate::vrp::{AsyncJobController, JobOutcome};

/// Random source for one virtual user.
///
/// With a seed, user `n` always draws from `seed + n`, so a run's generated
/// traffic is reproducible regardless of task interleaving.
pub fn user_rng(seed: Option<u64>, user_id: usize) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(user_id as u64)),
        None => StdRng::from_entropy(),
    }
}

/// Everything a virtual user task needs, handed over at spawn time.
pub struct WorkerConfig {
    pub user_id: usize,
    pub persona: Arc<Persona>,
    pub target: ApiTarget,
    pub config: Arc<Config>,
    pub sink: OutcomeSink,
    pub cancel: CancellationToken,
    /// Delay before the first iteration (ramp-up).
    pub start_delay: Duration,
}

/// One simulated client bound to a single persona for its whole lifetime.
pub struct VirtualUser {
    id: usize,
    persona: Arc<Persona>,
    target: ApiTarget,
    config: Arc<Config>,
    sink: OutcomeSink,
    cancel: CancellationToken,
    rng: StdRng,
    points_query: Option<String>,
}

impl VirtualUser {
    pub fn new(worker: &WorkerConfig) -> Self {
        Self {
            id: worker.user_id,
            persona: Arc::clone(&worker.persona),
            target: worker.target.clone(),
            config: Arc::clone(&worker.config),
            sink: worker.sink.clone(),
            cancel: worker.cancel.clone(),
            rng: user_rng(worker.config.seed, worker.user_id),
            points_query: None,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    /// Run iterations until the stop signal is raised.
    ///
    /// Iteration N+1 starts no earlier than `pacing` after iteration N
    /// started; a long iteration is followed immediately by the next one.
    /// Returns the number of completed iterations.
    pub async fn run(mut self) -> u64 {
        let pacing = self.config.pacing_interval;
        let mut iterations = 0u64;

        ACTIVE_VIRTUAL_USERS.inc();
        debug!(user_id = self.id, persona = %self.persona.name, "Virtual user started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let iteration_start = Instant::now();
            if let Err(e) = self.run_iteration().await {
                debug!(
                    user_id = self.id,
                    persona = %self.persona.name,
                    error = %e,
                    "Iteration aborted"
                );
            }
            iterations += 1;

            tokio::select! {
                _ = time::sleep_until(iteration_start + pacing) => {}
                _ = self.cancel.cancelled() => break,
            }
        }

        ACTIVE_VIRTUAL_USERS.dec();
        debug!(
            user_id = self.id,
            persona = %self.persona.name,
            iterations,
            "Virtual user stopped"
        );
        iterations
    }

    /// One persona task. An error aborts the rest of the iteration only;
    /// the outcome for it has already been recorded.
    pub async fn run_iteration(&mut self) -> Result<(), TaskError> {
        let num_points = self.config.query_points_num;
        match self.persona.kind {
            PersonaKind::Isochrone => {
                requests::isochrone(&self.target, &self.sink, &mut self.rng).await
            }
            PersonaKind::Matrix => {
                let query = self.points_query().await?;
                requests::matrix(&self.target, &self.sink, &query).await
            }
            PersonaKind::MatrixPost => {
                requests::matrix_post(&self.target, &self.sink, &mut self.rng, num_points).await
            }
            PersonaKind::Route => {
                let query = self.points_query().await?;
                requests::route(&self.target, &self.sink, &query).await
            }
            PersonaKind::RouteInvalid => {
                requests::route_erratic(&self.target, &self.sink, &mut self.rng).await
            }
            PersonaKind::Vrp => {
                let controller =
                    AsyncJobController::new(&self.target, &self.config.vrp, &self.sink);
                match controller.run(&mut self.rng, &self.cancel).await {
                    JobOutcome::SubmitFailed(error) | JobOutcome::PollFailed { error, .. } => {
                        Err(error)
                    }
                    JobOutcome::Finished(_)
                    | JobOutcome::Cancelled(_)
                    | JobOutcome::PollLimitReached(_) => Ok(()),
                }
            }
        }
    }

    /// Cached after the first successful resolution.
    async fn points_query(&mut self) -> Result<String, TaskError> {
        if let Some(query) = &self.points_query {
            return Ok(query.clone());
        }
        let query = resolve_points_query(
            &self.target,
            &self.sink,
            self.config.query_points.as_deref(),
            self.config.query_points_num,
        )
        .await?;
        self.points_query = Some(query.clone());
        Ok(query)
    }
}

/// Task body for one virtual user: wait out the ramp-up delay, then loop.
pub async fn run_worker(worker: WorkerConfig) -> u64 {
    if !worker.start_delay.is_zero() {
        tokio::select! {
            _ = time::sleep(worker.start_delay) => {}
            _ = worker.cancel.cancelled() => {
                debug!(user_id = worker.user_id, "Stopped before ramp-up delay elapsed");
                return 0;
            }
        }
    }

    let user = VirtualUser::new(&worker);
    let iterations = user.run().await;
    info!(
        user_id = worker.user_id,
        persona = %worker.persona.name,
        iterations,
        "Virtual user finished"
    );
    iterations
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_seeded_users_are_reproducible() {
        let a: Vec<u32> = (0..5).map(|_| user_rng(Some(42), 3).gen()).collect();
        let b: Vec<u32> = (0..5).map(|_| user_rng(Some(42), 3).gen()).collect();
        assert_eq!(a, b);

        let mut first = user_rng(Some(42), 3);
        let mut other = user_rng(Some(42), 4);
        let x: u64 = first.gen();
        let y: u64 = other.gen();
        assert_ne!(x, y);
    }

    #[tokio::test]
    async fn test_cancelled_before_ramp_up_runs_nothing() {
        let mut config = Config::new("http://127.0.0.1:9");
        config.pacing_interval = Duration::from_millis(10);
        let config = Arc::new(config);
        let (sink, mut rx) = OutcomeSink::channel(false);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let worker = WorkerConfig {
            user_id: 0,
            persona: Arc::new(Persona::new(PersonaKind::Isochrone, 1.0)),
            target: ApiTarget::new(
                reqwest::Client::new(),
                config.base_url.clone(),
                None,
                Duration::from_secs(1),
            ),
            config,
            sink,
            cancel,
            start_delay: Duration::from_secs(5),
        };

        assert_eq!(run_worker(worker).await, 0);
        assert!(rx.try_recv().is_err());
    }
}
