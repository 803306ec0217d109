//! The supervisor: spawns the workers, arms the deadline, folds the report.

use std::sync::Arc;
use std::time::Instant;

use log::{debug, warn};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::RunConfig;
use crate::cookie::CookieRegistry;
use crate::error::Result;
use crate::plan::Plan;
use crate::report::Reporter;
use crate::stats::{RunReport, RunState};
use crate::transaction::Engine;
use crate::worker::Worker;

/// Drives one complete run: N workers against a shared plan, bounded by
/// repetitions, the wall clock, the failure budget, or an external shutdown.
#[derive(Debug)]
pub struct Runner {
    config: Arc<RunConfig>,
    plan: Arc<Plan>,
    shutdown: CancellationToken,
}

impl Runner {
    /// Prepare a run.
    pub fn new(config: RunConfig, plan: Plan) -> Runner {
        Runner {
            config: Arc::new(config),
            plan: Arc::new(plan),
            shutdown: CancellationToken::new(),
        }
    }

    /// A handle that ends the run early when cancelled; wire it to Ctrl-C
    /// or an orchestrator.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run to completion and fold the per-worker counters into a report.
    pub async fn run(self) -> Result<RunReport> {
        let engine = Engine::new(self.config.clone())?;
        let cookies = Arc::new(CookieRegistry::new(self.config.concurrency));
        let state = Arc::new(RunState::new(
            self.config.time_limit,
            self.config.failure_budget,
        ));
        let reporter = Arc::new(Reporter::new(&self.config));
        let base_seed = self.config.rng_seed.unwrap_or_else(rand::random);
        let started = Instant::now();

        debug!(
            "starting {} workers against {} urls",
            self.config.concurrency,
            self.plan.len()
        );

        let mut set = JoinSet::new();
        for id in 0..self.config.concurrency {
            let worker = Worker::new(
                id,
                base_seed.wrapping_add((id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)),
                engine.clone(),
                self.config.clone(),
                self.plan.clone(),
                cookies.clone(),
                state.clone(),
                reporter.clone(),
                self.shutdown.clone(),
            );
            set.spawn(worker.run());
        }

        if let Some(limit) = self.config.time_limit {
            let token = self.shutdown.clone();
            let deadline = self.shutdown.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(limit) => deadline.cancel(),
                    _ = token.cancelled() => {}
                }
            });
        }

        let mut workers = Vec::with_capacity(self.config.concurrency);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(stats) => workers.push(stats),
                Err(err) => warn!("worker task failed: {err}"),
            }
        }
        workers.sort_by_key(|stats| stats.id);

        let aborted = state.budget_exceeded();
        Ok(RunReport::assemble(workers, &state, started.elapsed(), aborted))
    }
}
