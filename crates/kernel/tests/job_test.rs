#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Job queue: priorities, draining, dispatch tokens.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use common::{TestApp, test_config};
use vellum_kernel::jobs::{
    Dispatch, JobDefinition, JobError, JobResult, JobRunner, JobTrigger, LocalJobTrigger, job_fn,
};
use vellum_kernel::plugin::{CLEAN_EXPIRED_TOKENS, Plugin, Registrar};
use vellum_kernel::{AppState, Config};

type Log = Arc<Mutex<Vec<Value>>>;

/// Jobs that record the arguments they ran with.
struct Mailer {
    log: Log,
}

impl Plugin for Mailer {
    fn name(&self) -> &str {
        "mailer"
    }

    fn register(&self, registrar: &mut Registrar) {
        let log = Arc::clone(&self.log);
        registrar.job(
            JobDefinition::new(
                "send-mail",
                job_fn(move |_state, args| {
                    log.lock().extend(args.iter().cloned());
                    Ok(json!({"sent": args.len()}))
                }),
            )
            .priority(5),
        );

        let log = Arc::clone(&self.log);
        registrar.job(
            JobDefinition::new(
                "send-digest",
                job_fn(move |_state, args| {
                    log.lock().extend(args);
                    Ok(Value::Null)
                }),
            )
            .priority(10),
        );

        registrar.job(JobDefinition::new(
            "explode",
            job_fn(|_state, _args| anyhow::bail!("mail server on fire")),
        ));
    }
}

/// Keeps every dispatch and its token, then runs it locally.
#[derive(Debug, Default)]
struct Recording {
    seen: Mutex<Vec<(String, Dispatch)>>,
}

#[async_trait]
impl JobTrigger for Recording {
    async fn dispatch(
        &self,
        state: &AppState,
        token: &str,
        dispatch: &Dispatch,
    ) -> Result<JobResult, JobError> {
        self.seen.lock().push((token.to_string(), dispatch.clone()));
        LocalJobTrigger.dispatch(state, token, dispatch).await
    }
}

async fn mailer_app(config: Config, trigger: Arc<dyn JobTrigger>) -> (TestApp, Log) {
    let log = Log::default();
    let app = TestApp::from_builder(
        AppState::builder(config)
            .trigger(trigger)
            .plugin(Mailer {
                log: Arc::clone(&log),
            }),
    )
    .await;
    (app, log)
}

#[tokio::test]
async fn higher_priority_then_older_runs_first() {
    let (app, log) = mailer_app(test_config(), Arc::new(LocalJobTrigger)).await;
    let queue = app.state.job_queue();

    queue.queue_job("send-mail", vec![json!(1)]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2)).await;
    queue.queue_job("send-digest", vec![json!(2)]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2)).await;
    queue.queue_job("send-mail", vec![json!(3)]).await.unwrap();
    assert_eq!(queue.pending().await.unwrap(), 3);

    let results = queue.process_job_queue().await.unwrap();
    let jobs: Vec<&str> = results.iter().map(|r| r.job.as_str()).collect();
    assert_eq!(jobs, vec!["send-digest", "send-mail", "send-mail"]);
    assert!(results.iter().all(|r| r.success));
    assert_eq!(results[1].output, Some(json!({"sent": 1})));

    assert_eq!(*log.lock(), vec![json!(2), json!(1), json!(3)]);
    assert_eq!(queue.pending().await.unwrap(), 0);
}

#[tokio::test]
async fn failures_are_reported_and_removed() {
    let (app, _log) = mailer_app(test_config(), Arc::new(LocalJobTrigger)).await;
    let queue = app.state.job_queue();
    queue.queue_job("explode", Vec::new()).await.unwrap();

    let results = queue.process_job_queue().await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert!(
        results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("mail server on fire")
    );
    assert_eq!(queue.pending().await.unwrap(), 0);
}

#[tokio::test]
async fn drains_stop_at_their_limit() {
    let config = Config {
        job_drain_limit: 2,
        ..test_config()
    };
    let (app, _log) = mailer_app(config, Arc::new(LocalJobTrigger)).await;
    let queue = app.state.job_queue();
    for n in 0..3 {
        queue.queue_job("send-mail", vec![json!(n)]).await.unwrap();
    }

    assert_eq!(queue.process_job_queue().await.unwrap().len(), 2);
    assert_eq!(queue.pending().await.unwrap(), 1);
    assert_eq!(queue.process_job_queue().await.unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_jobs_are_refused() {
    let (app, _log) = mailer_app(test_config(), Arc::new(LocalJobTrigger)).await;
    let queue = app.state.job_queue();

    let err = queue.queue_job("send-fax", Vec::new()).await.unwrap_err();
    assert!(matches!(err, JobError::UnknownJob(name) if name == "send-fax"));
    let err = queue.process_job("send-fax", Vec::new()).await.unwrap_err();
    assert!(matches!(err, JobError::UnknownJob(_)));
    assert_eq!(queue.pending().await.unwrap(), 0);
}

#[tokio::test]
async fn process_job_skips_the_queue() {
    let (app, log) = mailer_app(test_config(), Arc::new(LocalJobTrigger)).await;
    let result = app
        .state
        .job_queue()
        .process_job("send-mail", vec![json!("now")])
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(*log.lock(), vec![json!("now")]);
}

#[tokio::test]
async fn core_sweep_job_is_registered() {
    let (app, _log) = mailer_app(test_config(), Arc::new(LocalJobTrigger)).await;
    assert!(app.state.jobs().get(CLEAN_EXPIRED_TOKENS).is_some());

    let result = app
        .state
        .job_queue()
        .process_job(CLEAN_EXPIRED_TOKENS, Vec::new())
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.output, Some(json!({"removed": 0})));
}

#[tokio::test]
async fn dispatch_tokens_are_single_use() {
    let trigger = Arc::new(Recording::default());
    let (app, log) = mailer_app(test_config(), trigger.clone()).await;
    let queue = app.state.job_queue();
    queue.queue_job("send-mail", vec![json!("once")]).await.unwrap();
    queue.process_job_queue().await.unwrap();

    let (token, dispatch) = trigger.seen.lock()[0].clone();
    let runner = JobRunner::new(app.state.clone());

    let err = runner.execute(&token, dispatch.clone()).await.unwrap_err();
    assert!(matches!(err, JobError::ReplayedToken));

    // A token only covers the dispatch it was signed for.
    let forged = Dispatch {
        jti: "some-other-dispatch".to_string(),
        ..dispatch
    };
    let err = runner.execute(&token, forged).await.unwrap_err();
    assert!(matches!(err, JobError::InvalidToken));

    assert_eq!(*log.lock(), vec![json!("once")]);
}

#[tokio::test]
async fn session_tokens_cannot_run_jobs() {
    let app = TestApp::new().await;
    let user = app.create_user("worker@example.test", "long enough").await;
    let session = app
        .state
        .tokens()
        .issue(&common::id_of(&user), Duration::from_secs(3600))
        .await
        .unwrap();

    let dispatch = Dispatch {
        jti: session.claims.jti.clone(),
        name: CLEAN_EXPIRED_TOKENS.to_string(),
        args: Vec::new(),
    };
    let err = app
        .state
        .job_runner()
        .execute(&session.token, dispatch)
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::InvalidToken));
}

#[tokio::test]
async fn claimed_jobs_are_not_claimed_again() {
    let (app, _log) = mailer_app(test_config(), Arc::new(LocalJobTrigger)).await;
    let queue = app.state.job_queue();
    let id = queue.queue_job("send-mail", vec![json!(1)]).await.unwrap();

    let first = queue.claim_next().await.unwrap().unwrap();
    assert_eq!(first.id, id);
    assert!(queue.claim_next().await.unwrap().is_none());

    // The claimed job stays queued until its drain removes it.
    assert_eq!(queue.pending().await.unwrap(), 1);
}
