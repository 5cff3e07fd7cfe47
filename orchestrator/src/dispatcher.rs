//! Bounded worker pool that drives every agent job to a terminal state.
//!
//! `concurrency` workers pull jobs from one shared queue, so at most that
//! many start-agent calls are ever awaiting a response. A rate-limited job
//! waits out its backoff delay off-worker and is pushed back onto the queue;
//! a transiently failed job goes straight back. Cancellation stops workers
//! from taking new jobs and collects whatever is still queued or waiting as
//! pending, so the summary always accounts for every job.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_channel::Receiver;
use async_channel::Sender;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;
use uuid::Uuid;

use crate::backoff::BackoffPolicy;
use crate::error::ConfigError;
use crate::error::DispatchError;
use crate::error::ErrorClass;
use crate::error::StartAgentError;
use crate::error::TrackerError;
use crate::job::AgentJob;
use crate::job::JobState;
use crate::report::Summary;
use crate::spawner::AgentStarter;
use crate::tracker::OutcomeTracker;

/// Failure reason recorded when a job runs out of rate-limit retries.
pub const RATE_LIMIT_EXHAUSTED: &str = "rate_limit_exhausted";
/// Failure reason prefix when a job runs out of transient retries.
pub const TRANSIENT_EXHAUSTED: &str = "transient_retries_exhausted";
/// Failure reason prefix when a transient failure lands on the last attempt
/// while transient budget remains.
pub const MAX_ATTEMPTS_EXHAUSTED: &str = "max_attempts_exhausted";

pub const DEFAULT_CONCURRENCY: usize = 30;
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    pub agent_name: String,
    /// Upper bound on start-agent calls with unresolved responses.
    pub concurrency: usize,
    /// Per-attempt deadline; an attempt that misses it counts as transient.
    pub attempt_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl DispatchConfig {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            concurrency: DEFAULT_CONCURRENCY,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent_name.trim().is_empty() {
            return Err(ConfigError::Invalid("agent name must not be empty".into()));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.attempt_timeout.is_zero() {
            return Err(ConfigError::Invalid("attempt timeout must be positive".into()));
        }
        self.backoff.validate()
    }
}

/// What a run produced: the summary plus every job in id order.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub summary: Summary,
    pub jobs: Vec<AgentJob>,
}

pub struct AgentDispatcher {
    starter: Arc<dyn AgentStarter>,
    tracker: Arc<OutcomeTracker>,
    config: DispatchConfig,
}

impl AgentDispatcher {
    pub fn new(
        starter: Arc<dyn AgentStarter>,
        tracker: Arc<OutcomeTracker>,
        config: DispatchConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            starter,
            tracker,
            config,
        })
    }

    pub fn tracker(&self) -> &Arc<OutcomeTracker> {
        &self.tracker
    }

    /// Runs every job until it is terminal or `cancel` fires.
    ///
    /// Returns only once no worker and no pending retry is left running.
    pub async fn run(
        &self,
        jobs: Vec<AgentJob>,
        cancel: CancellationToken,
    ) -> Result<DispatchOutcome, DispatchError> {
        let total = jobs.len();
        self.tracker.register(&jobs).await;
        if total == 0 {
            return Ok(DispatchOutcome {
                summary: self.tracker.summarize().await,
                jobs,
            });
        }

        let span = tracing::info_span!("dispatch", run_id = %Uuid::new_v4(), jobs = total);
        let workers = self.config.concurrency.min(total);
        let (queue, receiver) = async_channel::unbounded();
        for job in jobs {
            // Unbounded and still open; cannot fail.
            let _ = queue.try_send(job);
        }

        let shared = Arc::new(Shared {
            starter: Arc::clone(&self.starter),
            tracker: Arc::clone(&self.tracker),
            agent_name: self.config.agent_name.clone(),
            attempt_timeout: self.config.attempt_timeout,
            backoff: self.config.backoff.clone(),
            cancel: cancel.child_token(),
            queue,
            remaining: AtomicUsize::new(total),
            parked: Mutex::new(Vec::new()),
            retries: TaskTracker::new(),
        });

        span.in_scope(|| {
            tracing::info!(workers, "starting agents (max {workers} concurrent)");
        });

        let mut pool = JoinSet::new();
        for worker_id in 0..workers {
            let task = worker(Arc::clone(&shared), receiver.clone())
                .instrument(tracing::debug_span!(parent: &span, "worker", worker_id));
            pool.spawn(task);
        }

        let mut finished = Vec::with_capacity(total);
        let mut failure: Option<DispatchError> = None;
        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(Ok(jobs)) => finished.extend(jobs),
                Ok(Err(err)) => {
                    shared.cancel.cancel();
                    failure.get_or_insert(err.into());
                }
                Err(err) => {
                    shared.cancel.cancel();
                    failure.get_or_insert(err.into());
                }
            }
        }

        shared.retries.close();
        shared.retries.wait().await;
        if let Some(err) = failure {
            return Err(err);
        }

        let mut pending = std::mem::take(&mut *shared.parked.lock().await);
        while let Ok(job) = receiver.try_recv() {
            pending.push(job);
        }
        if !pending.is_empty() {
            span.in_scope(|| {
                tracing::warn!(pending = pending.len(), "run stopped before every job finished");
            });
        }

        let mut jobs = finished;
        jobs.extend(pending);
        jobs.sort_by_key(|job| job.id);

        Ok(DispatchOutcome {
            summary: self.tracker.summarize().await,
            jobs,
        })
    }
}

struct Shared {
    starter: Arc<dyn AgentStarter>,
    tracker: Arc<OutcomeTracker>,
    agent_name: String,
    attempt_timeout: Duration,
    backoff: BackoffPolicy,
    cancel: CancellationToken,
    queue: Sender<AgentJob>,
    /// Jobs not yet terminal; the queue closes when this reaches zero.
    remaining: AtomicUsize,
    /// Jobs left pending because the run was cancelled while they waited.
    parked: Mutex<Vec<AgentJob>>,
    retries: TaskTracker,
}

enum Step {
    Finished(AgentJob),
    Retry { job: AgentJob, delay: Duration },
}

async fn worker(
    shared: Arc<Shared>,
    receiver: Receiver<AgentJob>,
) -> Result<Vec<AgentJob>, TrackerError> {
    let mut finished = Vec::new();
    loop {
        let job = tokio::select! {
            biased;
            () = shared.cancel.cancelled() => break,
            next = receiver.recv() => match next {
                Ok(job) => job,
                Err(_) => break,
            },
        };
        if shared.cancel.is_cancelled() {
            shared.park(job).await;
            break;
        }

        match shared.attempt(job).await? {
            Step::Finished(job) => {
                finished.push(job);
                shared.job_finished();
            }
            Step::Retry { job, delay } => shared.schedule_retry(job, delay),
        }
    }
    Ok(finished)
}

impl Shared {
    async fn attempt(&self, mut job: AgentJob) -> Result<Step, TrackerError> {
        job.attempt_count += 1;
        let attempt = job.attempt_count;
        let max_attempts = self.backoff.max_attempts;
        self.tracker
            .record(job.advance(
                JobState::Running,
                format!("attempt {attempt}/{max_attempts}"),
            ))
            .await?;

        let call = self.starter.start_agent(&job.room, &self.agent_name);
        let result = match tokio::time::timeout(self.attempt_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StartAgentError::Transient(format!(
                "no response within {:.1}s",
                self.attempt_timeout.as_secs_f64()
            ))),
        };

        let err = match result {
            Ok(started) => {
                let detail = match started.session_id {
                    Some(session_id) => format!("session {session_id}"),
                    None => "started".to_string(),
                };
                tracing::info!(job_id = %job.id, room = %job.room.name, attempt, "started agent");
                self.tracker
                    .record(job.advance(JobState::Succeeded, detail))
                    .await?;
                return Ok(Step::Finished(job));
            }
            Err(err) => err,
        };
        job.last_error = Some(err.to_string());

        match err.class() {
            ErrorClass::RateLimit => {
                self.tracker
                    .record(job.advance(JobState::RateLimited, err.to_string()))
                    .await?;
                if attempt >= max_attempts {
                    tracing::error!(job_id = %job.id, room = %job.room.name, attempt, "rate limit retries exhausted");
                    self.tracker
                        .record(job.advance(JobState::Failed, RATE_LIMIT_EXHAUSTED))
                        .await?;
                    return Ok(Step::Finished(job));
                }
                let retry_after = match &err {
                    StartAgentError::RateLimited { retry_after } => *retry_after,
                    _ => None,
                };
                let delay = self.backoff.delay_with_hint(attempt - 1, retry_after);
                tracing::warn!(
                    job_id = %job.id,
                    room = %job.room.name,
                    "rate limited, retrying in {:.1}s (attempt {attempt}/{max_attempts})",
                    delay.as_secs_f64()
                );
                self.tracker
                    .record(job.advance(
                        JobState::Pending,
                        format!("retry in {:.1}s", delay.as_secs_f64()),
                    ))
                    .await?;
                Ok(Step::Retry { job, delay })
            }
            ErrorClass::Transient => {
                job.transient_failures += 1;
                self.tracker
                    .record(job.advance(JobState::TransientFailure, err.to_string()))
                    .await?;
                let exhausted = if job.transient_failures > self.backoff.transient_retries {
                    Some(TRANSIENT_EXHAUSTED)
                } else if attempt >= max_attempts {
                    Some(MAX_ATTEMPTS_EXHAUSTED)
                } else {
                    None
                };
                if let Some(reason) = exhausted {
                    tracing::error!(job_id = %job.id, room = %job.room.name, error = %err, "{reason}");
                    self.tracker
                        .record(job.advance(JobState::Failed, format!("{reason}: {err}")))
                        .await?;
                    return Ok(Step::Finished(job));
                }
                tracing::warn!(job_id = %job.id, room = %job.room.name, error = %err, "transient failure, retrying");
                self.tracker
                    .record(job.advance(JobState::Pending, "immediate retry"))
                    .await?;
                Ok(Step::Retry {
                    job,
                    delay: Duration::ZERO,
                })
            }
            ErrorClass::Permanent => {
                tracing::error!(job_id = %job.id, room = %job.room.name, error = %err, "failed to start agent");
                self.tracker
                    .record(job.advance(JobState::PermanentFailure, err.to_string()))
                    .await?;
                self.tracker
                    .record(job.advance(JobState::Failed, err.to_string()))
                    .await?;
                Ok(Step::Finished(job))
            }
        }
    }

    fn job_finished(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.queue.close();
        }
    }

    fn schedule_retry(self: &Arc<Self>, job: AgentJob, delay: Duration) {
        let shared = Arc::clone(self);
        self.retries.spawn(async move {
            if !delay.is_zero() {
                tokio::select! {
                    () = shared.cancel.cancelled() => {
                        shared.park(job).await;
                        return;
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }
            if let Err(err) = shared.queue.try_send(job) {
                shared.park(err.into_inner()).await;
            }
        });
    }

    async fn park(&self, job: AgentJob) {
        self.parked.lock().await.push(job);
    }
}
