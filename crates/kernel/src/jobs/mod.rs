//! Durable job queue.
//!
//! Producers enqueue named jobs with JSON arguments. A drain claims the
//! highest-priority oldest job, signs a short-lived dispatch token for it and
//! hands it to a [`JobTrigger`]; the receiving [`JobRunner`] checks the token
//! and runs the registered handler. Jobs with an interval also run on a timer.

mod queue;
mod runner;
mod trigger;

pub use queue::{ClaimedJob, JobQueue};
pub use runner::JobRunner;
pub use trigger::{HttpJobTrigger, JobTrigger, LocalJobTrigger, PROCESS_PATH};

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Notify;

use crate::auth::AuthError;
use crate::plugin::RegistrationError;
use crate::state::AppState;
use crate::store::StoreError;

/// Errors raised while queueing, dispatching or running jobs.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job '{0}' is not registered")]
    UnknownJob(String),

    /// Bad signature, expired, or issued for another dispatch.
    #[error("invalid dispatch token")]
    InvalidToken,

    #[error("dispatch token was already used")]
    ReplayedToken,

    #[error("job trigger failed: {0}")]
    Trigger(String),

    #[error("job trigger request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Runs one job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, state: &AppState, args: Vec<Value>) -> anyhow::Result<Value>;
}

struct FnJob<F>(F);

#[async_trait]
impl<F> JobHandler for FnJob<F>
where
    F: Fn(&AppState, Vec<Value>) -> anyhow::Result<Value> + Send + Sync,
{
    async fn run(&self, state: &AppState, args: Vec<Value>) -> anyhow::Result<Value> {
        (self.0)(state, args)
    }
}

/// Wrap a synchronous function as a [`JobHandler`].
pub fn job_fn<F>(f: F) -> Arc<dyn JobHandler>
where
    F: Fn(&AppState, Vec<Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    Arc::new(FnJob(f))
}

/// A registered job.
#[derive(Clone)]
pub struct JobDefinition {
    pub name: String,
    /// Higher runs first.
    pub priority: i64,
    /// Run on this interval, in addition to queued runs.
    pub interval: Option<Duration>,
    pub handler: Arc<dyn JobHandler>,
}

impl JobDefinition {
    pub fn new(name: impl Into<String>, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            interval: None,
            handler,
        }
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn every(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }
}

impl std::fmt::Debug for JobDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDefinition")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Registered jobs by name.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: HashMap<String, Arc<JobDefinition>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job: JobDefinition) -> Result<(), RegistrationError> {
        if self.jobs.contains_key(&job.name) {
            return Err(RegistrationError::DuplicateJob(job.name));
        }
        self.jobs.insert(job.name.clone(), Arc::new(job));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<JobDefinition>> {
        self.jobs.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.jobs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn interval_jobs(&self) -> impl Iterator<Item = &Arc<JobDefinition>> {
        self.jobs.values().filter(|job| job.interval.is_some())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// What a trigger delivers to the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispatch {
    pub jti: String,
    pub name: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Claims of a dispatch token. Times are Unix seconds.
///
/// Unknown claims are refused so a session token never passes as one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchClaims {
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// Outcome of one job run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub success: bool,
    pub job: String,
    pub duration_ms: u64,
    /// Unix milliseconds.
    pub processed_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobResult {
    pub fn succeeded(job: &str, duration: Duration, output: Value) -> Self {
        Self {
            success: true,
            job: job.to_string(),
            duration_ms: millis(duration),
            processed_at: crate::query::now_millis(),
            output: Some(output),
            error: None,
        }
    }

    pub fn failed(job: &str, duration: Duration, error: impl Into<String>) -> Self {
        Self {
            success: false,
            job: job.to_string(),
            duration_ms: millis(duration),
            processed_at: crate::query::now_millis(),
            output: None,
            error: Some(error.into()),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Process-wide job state.
pub struct JobRuntime {
    /// Set while a drain runs; a second drain returns at once.
    pub(crate) draining: AtomicBool,
    /// Wakes the drain worker after an enqueue.
    pub(crate) wake: Notify,
    /// Dispatch ids already run, kept until their tokens expire.
    pub(crate) consumed: moka::sync::Cache<String, ()>,
}

impl JobRuntime {
    pub fn new(token_lifetime: Duration) -> Self {
        Self {
            draining: AtomicBool::new(false),
            wake: Notify::new(),
            consumed: moka::sync::Cache::builder()
                .time_to_live(token_lifetime + Duration::from_secs(60))
                .build(),
        }
    }
}

impl std::fmt::Debug for JobRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRuntime")
            .field("draining", &self.draining)
            .finish_non_exhaustive()
    }
}
