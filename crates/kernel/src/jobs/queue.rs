//! Enqueue, claim and drain.

use std::sync::atomic::Ordering as AtomicOrdering;
use std::time::Instant;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Dispatch, DispatchClaims, JobError, JobResult};
use crate::query::now_millis;
use crate::schema::{CREATED_AT_COLUMN, ID_COLUMN};
use crate::state::AppState;
use crate::store::{Condition, Record, SortDirection, StoreQuery};

const JOBS_TABLE: &str = "jobs";

/// A job taken off the queue by one drain.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedJob {
    pub id: String,
    pub name: String,
    pub args: Vec<Value>,
    /// The dispatch id written by the claim.
    pub jti: String,
}

/// Producer and drain side of the queue.
#[derive(Debug, Clone)]
pub struct JobQueue {
    state: AppState,
}

impl JobQueue {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Persist a job. Priority comes from the job's definition.
    pub async fn queue_job(&self, name: &str, args: Vec<Value>) -> Result<String, JobError> {
        let job = self
            .state
            .jobs()
            .get(name)
            .ok_or_else(|| JobError::UnknownJob(name.to_string()))?;

        let id = Uuid::now_v7().to_string();
        let mut row = Record::new();
        row.insert(ID_COLUMN.into(), Value::from(id.as_str()));
        row.insert("name".into(), Value::from(name));
        row.insert("args".into(), Value::Array(args));
        row.insert("jti".into(), Value::Null);
        row.insert("priority".into(), Value::from(job.priority));
        row.insert(CREATED_AT_COLUMN.into(), Value::from(now_millis()));
        self.state.store().insert(JOBS_TABLE, &row).await?;

        debug!(job = name, id = %id, "job queued");
        self.state.job_runtime().wake.notify_one();
        Ok(id)
    }

    /// Jobs waiting in the queue.
    pub async fn pending(&self) -> Result<u64, JobError> {
        Ok(self.state.store().count(&StoreQuery::new(JOBS_TABLE)).await?)
    }

    /// Claim the highest-priority, oldest unclaimed job.
    ///
    /// Only rows without a dispatch id are candidates, and the claim writes
    /// one guarded on it still being unset, so two drains never claim the
    /// same job. A lost race moves on to the next candidate.
    pub async fn claim_next(&self) -> Result<Option<ClaimedJob>, JobError> {
        let store = self.state.store();

        loop {
            let query = StoreQuery::new(JOBS_TABLE)
                .filter(Condition::eq("jti", Value::Null))
                .order_by("priority", SortDirection::Desc)
                .order_by(CREATED_AT_COLUMN, SortDirection::Asc)
                .order_by(ID_COLUMN, SortDirection::Asc)
                .limit(1);
            let Some(row) = store.select(&query).await?.into_iter().next() else {
                return Ok(None);
            };

            let id = row
                .get(ID_COLUMN)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let jti = Uuid::now_v7().to_string();

            let mut change = Record::new();
            change.insert("jti".into(), Value::from(jti.as_str()));
            let guard =
                Condition::eq(ID_COLUMN, id.as_str()).and(Condition::eq("jti", Value::Null));

            if store.update(JOBS_TABLE, &guard, &change).await? == 1 {
                let args = match row.get("args") {
                    Some(Value::Array(args)) => args.clone(),
                    Some(Value::Null) | None => Vec::new(),
                    Some(other) => vec![other.clone()],
                };
                return Ok(Some(ClaimedJob {
                    id,
                    name: row
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    args,
                    jti,
                }));
            }

            debug!(id = %id, "job claimed elsewhere, trying the next one");
            tokio::task::yield_now().await;
        }
    }

    /// Sign a dispatch token and hand the dispatch to the trigger. Trigger
    /// failures become failed results.
    async fn dispatch(&self, dispatch: Dispatch) -> JobResult {
        let started = Instant::now();
        let now = chrono::Utc::now().timestamp();
        let lifetime =
            i64::try_from(self.state.config().job_token_lifetime.as_secs()).unwrap_or(60);
        let claims = DispatchClaims {
            jti: dispatch.jti.clone(),
            iat: now,
            exp: now + lifetime,
        };

        let outcome = match self.state.jwt().sign(&claims) {
            Ok(token) => {
                self.state
                    .job_trigger()
                    .dispatch(&self.state, &token, &dispatch)
                    .await
            }
            Err(e) => Err(e.into()),
        };

        let result = outcome.unwrap_or_else(|e| {
            JobResult::failed(&dispatch.name, started.elapsed(), e.to_string())
        });
        if result.success {
            info!(job = %dispatch.name, duration_ms = result.duration_ms, "job processed");
        } else {
            warn!(
                job = %dispatch.name,
                duration_ms = result.duration_ms,
                error = result.error.as_deref().unwrap_or_default(),
                "job failed"
            );
        }
        result
    }

    /// Drain the queue: claim, dispatch and remove jobs until none remain or
    /// the drain limit is reached. Returns the results in processing order.
    ///
    /// Only one drain runs at a time; a concurrent call returns no results.
    pub async fn process_job_queue(&self) -> Result<Vec<JobResult>, JobError> {
        let runtime = self.state.job_runtime();
        if runtime
            .draining
            .compare_exchange(false, true, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
            .is_err()
        {
            debug!("job drain already running");
            return Ok(Vec::new());
        }

        let outcome = self.drain().await;
        runtime.draining.store(false, AtomicOrdering::Release);
        outcome
    }

    async fn drain(&self) -> Result<Vec<JobResult>, JobError> {
        let limit = self.state.config().job_drain_limit;
        let mut results = Vec::new();

        while results.len() < limit {
            let Some(job) = self.claim_next().await? else {
                break;
            };

            let result = self
                .dispatch(Dispatch {
                    jti: job.jti.clone(),
                    name: job.name.clone(),
                    args: job.args.clone(),
                })
                .await;

            self.state
                .store()
                .delete(JOBS_TABLE, &Condition::eq(ID_COLUMN, job.id.as_str()))
                .await?;
            results.push(result);
            tokio::task::yield_now().await;
        }

        if results.len() >= limit {
            warn!(limit, "job drain stopped at its limit");
        }
        Ok(results)
    }

    /// Run a job now, bypassing the queue.
    pub async fn process_job(&self, name: &str, args: Vec<Value>) -> Result<JobResult, JobError> {
        if self.state.jobs().get(name).is_none() {
            return Err(JobError::UnknownJob(name.to_string()));
        }
        Ok(self
            .dispatch(Dispatch {
                jti: Uuid::now_v7().to_string(),
                name: name.to_string(),
                args,
            })
            .await)
    }

    /// Background worker draining the queue whenever a job is queued.
    pub fn spawn_worker(&self) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = queue.process_job_queue().await {
                    warn!(error = %e, "job drain failed");
                }
                queue.state.job_runtime().wake.notified().await;
            }
        })
    }

    /// Start a timer for every job with an interval.
    pub fn start_interval_jobs(&self) -> Vec<JoinHandle<()>> {
        self.state
            .jobs()
            .interval_jobs()
            .filter_map(|job| {
                let period = job.interval.filter(|p| !p.is_zero())?;
                let name = job.name.clone();
                let queue = self.clone();
                info!(job = %name, every_secs = period.as_secs(), "interval job scheduled");

                Some(tokio::spawn(async move {
                    let mut ticker =
                        tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    loop {
                        ticker.tick().await;
                        if let Err(e) = queue.process_job(&name, Vec::new()).await {
                            warn!(job = %name, error = %e, "interval job failed");
                        }
                    }
                }))
            })
            .collect()
    }
}

