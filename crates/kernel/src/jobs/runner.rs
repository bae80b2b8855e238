//! Receiving side of a job dispatch.

use std::time::Instant;

use tracing::{debug, warn};

use super::{Dispatch, DispatchClaims, JobError, JobResult};
use crate::state::AppState;

/// Verifies dispatch tokens and runs handlers.
#[derive(Debug, Clone)]
pub struct JobRunner {
    state: AppState,
}

impl JobRunner {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Run one dispatch.
    ///
    /// The token must verify, carry the dispatch's `jti`, and not have been
    /// used before. Handler failures are reported in the result, not as an
    /// error.
    pub async fn execute(&self, token: &str, dispatch: Dispatch) -> Result<JobResult, JobError> {
        let claims = self
            .state
            .jwt()
            .verify::<DispatchClaims>(token)
            .filter(|claims| claims.jti == dispatch.jti)
            .ok_or(JobError::InvalidToken)?;

        let first_use = self
            .state
            .job_runtime()
            .consumed
            .entry(claims.jti.clone())
            .or_insert(())
            .is_fresh();
        if !first_use {
            warn!(job = %dispatch.name, "dispatch token replayed");
            return Err(JobError::ReplayedToken);
        }

        let job = self
            .state
            .jobs()
            .get(&dispatch.name)
            .cloned()
            .ok_or_else(|| JobError::UnknownJob(dispatch.name.clone()))?;

        let started = Instant::now();
        let result = match job.handler.run(&self.state, dispatch.args).await {
            Ok(output) => JobResult::succeeded(&job.name, started.elapsed(), output),
            Err(e) => JobResult::failed(&job.name, started.elapsed(), format!("{e:#}")),
        };
        debug!(job = %job.name, success = result.success, "job ran");
        Ok(result)
    }
}
