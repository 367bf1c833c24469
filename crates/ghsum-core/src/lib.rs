//! ghsum core library
//!
//! Fetches recent GitHub activity for many repositories concurrently,
//! filters it, optionally summarizes it with a language model, publishes
//! artifacts and a feed, and records each repository's last successful run.
//!
//! - `pipeline`: per-repository stage machine
//! - `orchestrator`: batch fan-out under repository and generator budgets
//! - `scheduler`: cron groups firing batches
//! - `collab`: fetcher, generator and publisher seams

pub mod app;
pub mod collab;
pub mod config;
pub mod domain;
pub mod fakes;
pub mod obs;
pub mod orchestrator;
pub mod pipeline;
pub mod publish;
pub mod retry;
pub mod scheduler;
pub mod shutdown;
pub mod telemetry;

pub use app::ReportService;
pub use collab::{
    ActivityFetcher, GeneratorBudget, PublishFlags, PublishReceipt, PublishRequest, Publisher,
    SummaryGenerator,
};
pub use config::Config;
pub use domain::{
    ActivityItems, ActivityPayload, BatchReport, ConfigError, FetchError, FilterConfig,
    GenerateError, ItemKind, PipelineStage, PublishError, RepoId, RepositoryTarget, RunOutcome,
    RunStatus,
};
pub use orchestrator::{Budgets, Orchestrator};
pub use pipeline::{PipelineDeps, PipelineSettings, RepositoryPipeline, RunFlags};
pub use publish::OutputPublisher;
pub use retry::RetryPolicy;
pub use scheduler::{BatchRunner, ReportScheduler, ScheduleGroup};

pub use ghsum_state::{JsonRunStateStore, RunStateStore};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
