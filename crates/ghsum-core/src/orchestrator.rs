//! Batch orchestration: run many repository pipelines under shared budgets.
//!
//! At most `max_concurrent_repos` pipelines run at once; summary generation
//! is further bounded by the process-wide `GeneratorBudget`. One pipeline's
//! failure or panic never affects another.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{warn, Instrument};
use uuid::Uuid;

use crate::collab::GeneratorBudget;
use crate::domain::{BatchReport, ConfigError, PipelineStage, RepositoryTarget, RunOutcome};
use crate::obs::{batch_span, emit_batch_finished, emit_batch_started, pipeline_span};
use crate::pipeline::{PipelineDeps, PipelineSettings, RepositoryPipeline, RunFlags};
use crate::shutdown::{self, ShutdownReceiver};

/// Concurrency limits for a batch.
#[derive(Debug, Clone)]
pub struct Budgets {
    pub max_concurrent_repos: usize,
    pub generator: GeneratorBudget,
}

impl Budgets {
    pub fn new(max_concurrent_repos: usize, max_concurrent_llm: usize) -> Result<Self, ConfigError> {
        if max_concurrent_repos == 0 {
            return Err(ConfigError::InvalidBudget {
                name: "max_concurrent_repos",
            });
        }
        Ok(Self {
            max_concurrent_repos,
            generator: GeneratorBudget::new(max_concurrent_llm)?,
        })
    }

    /// Same generator budget, different repository budget.
    pub fn with_repos(&self, max_concurrent_repos: usize) -> Result<Self, ConfigError> {
        if max_concurrent_repos == 0 {
            return Err(ConfigError::InvalidBudget {
                name: "max_concurrent_repos",
            });
        }
        Ok(Self {
            max_concurrent_repos,
            generator: self.generator.clone(),
        })
    }
}

pub struct Orchestrator {
    deps: PipelineDeps,
    shutdown: ShutdownReceiver,
}

impl Orchestrator {
    pub fn new(deps: PipelineDeps) -> Self {
        Self {
            deps,
            shutdown: shutdown::never(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownReceiver) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn deps(&self) -> &PipelineDeps {
        &self.deps
    }

    /// Same collaborators and shutdown signal, different pipeline settings.
    pub fn with_settings(&self, settings: PipelineSettings) -> Self {
        let mut deps = self.deps.clone();
        deps.settings = settings;
        Self {
            deps,
            shutdown: self.shutdown.clone(),
        }
    }

    /// Run one pipeline per target and return one outcome per distinct
    /// repository, in input order.
    ///
    /// Only an invalid budget is an error; everything that goes wrong inside a
    /// pipeline is reported in its outcome.
    pub async fn run_batch(
        &self,
        targets: &[RepositoryTarget],
        budgets: &Budgets,
        flags: RunFlags,
    ) -> Result<BatchReport, ConfigError> {
        if budgets.max_concurrent_repos == 0 {
            return Err(ConfigError::InvalidBudget {
                name: "max_concurrent_repos",
            });
        }

        let batch_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        let targets = dedupe(targets);

        async {
            emit_batch_started(
                &batch_id,
                targets.len(),
                budgets.max_concurrent_repos,
                budgets.generator.capacity(),
            );

            let slots = Arc::new(Semaphore::new(budgets.max_concurrent_repos));
            let mut join_set = JoinSet::new();
            for (idx, target) in targets.iter().cloned().enumerate() {
                let span = pipeline_span(&target.id);
                let task = run_one(
                    self.deps.clone(),
                    target,
                    flags,
                    budgets.generator.clone(),
                    self.shutdown.clone(),
                    Arc::clone(&slots),
                );
                join_set.spawn(async move { (idx, task.await) }.instrument(span));
            }

            let mut slots_out: Vec<Option<RunOutcome>> = vec![None; targets.len()];
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((idx, outcome)) => slots_out[idx] = Some(outcome),
                    // Panics are caught inside the task; this is an abort.
                    Err(e) => warn!(error = %e, "pipeline task did not complete"),
                }
            }

            let outcomes = targets
                .iter()
                .zip(slots_out)
                .map(|(target, slot)| {
                    slot.unwrap_or_else(|| {
                        RunOutcome::failed(
                            target.id.clone(),
                            PipelineStage::Pending,
                            "pipeline task did not complete",
                            0,
                        )
                    })
                })
                .collect();

            let report = BatchReport {
                batch_id,
                started_at,
                elapsed_ms: clock.elapsed().as_millis() as u64,
                outcomes,
            };
            emit_batch_finished(&report);
            Ok(report)
        }
        .instrument(batch_span(&batch_id))
        .await
    }
}

async fn run_one(
    deps: PipelineDeps,
    target: RepositoryTarget,
    flags: RunFlags,
    generator: GeneratorBudget,
    shutdown: ShutdownReceiver,
    slots: Arc<Semaphore>,
) -> RunOutcome {
    let repo = target.id.clone();
    let clock = Instant::now();

    let mut waiter = shutdown.clone();
    let _slot = tokio::select! {
        biased;
        _ = shutdown::wait_for(&mut waiter) => {
            return RunOutcome::cancelled(repo, PipelineStage::Pending, 0);
        }
        slot = slots.acquire_owned() => slot.ok(),
    };

    let pipeline = RepositoryPipeline::new(deps, target, flags, generator, shutdown);
    let tracker = pipeline.tracker();
    match AssertUnwindSafe(pipeline.run()).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            let stage = tracker.current();
            let message = panic_message(panic.as_ref());
            warn!(stage = %stage, panic = %message, "pipeline panicked");
            RunOutcome::failed(
                repo,
                stage,
                format!("panic: {message}"),
                clock.elapsed().as_millis() as u64,
            )
        }
    }
}

/// Keep the first occurrence of each repository.
fn dedupe(targets: &[RepositoryTarget]) -> Vec<RepositoryTarget> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(targets.len());
    for target in targets {
        if seen.insert(target.id.clone()) {
            unique.push(target.clone());
        } else {
            warn!(repo = %target.id, "duplicate repository in batch, ignoring");
        }
    }
    unique
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
