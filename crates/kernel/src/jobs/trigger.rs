//! Delivery of signed dispatches to a job runner.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{Dispatch, JobError, JobResult, JobRunner};
use crate::state::AppState;

/// Path of the runner endpoint, relative to the site URL.
pub const PROCESS_PATH: &str = "/api/jobs/process";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Hands a dispatch and its bearer token to a runner.
#[async_trait]
pub trait JobTrigger: Debug + Send + Sync + 'static {
    async fn dispatch(
        &self,
        state: &AppState,
        token: &str,
        dispatch: &Dispatch,
    ) -> Result<JobResult, JobError>;
}

/// Posts dispatches to `{site_url}/api/jobs/process`.
#[derive(Debug, Clone)]
pub struct HttpJobTrigger {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpJobTrigger {
    pub fn new(site_url: &str) -> Result<Self, JobError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}{PROCESS_PATH}", site_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl JobTrigger for HttpJobTrigger {
    async fn dispatch(
        &self,
        _state: &AppState,
        token: &str,
        dispatch: &Dispatch,
    ) -> Result<JobResult, JobError> {
        debug!(job = %dispatch.name, endpoint = %self.endpoint, "triggering job");
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(dispatch)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(JobError::Trigger(format!("runner answered {status}")));
        }
        Ok(response.json::<JobResult>().await?)
    }
}

/// Runs dispatches in this process.
#[derive(Debug, Clone, Default)]
pub struct LocalJobTrigger;

#[async_trait]
impl JobTrigger for LocalJobTrigger {
    async fn dispatch(
        &self,
        state: &AppState,
        token: &str,
        dispatch: &Dispatch,
    ) -> Result<JobResult, JobError> {
        JobRunner::new(state.clone())
            .execute(token, dispatch.clone())
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_site_url() {
        let trigger = HttpJobTrigger::new("https://example.test/").unwrap();
        assert_eq!(trigger.endpoint(), "https://example.test/api/jobs/process");
    }
}
