//! Append-only record of every job state transition.
//!
//! The tracker is shared by all dispatcher workers behind an `Arc`. Writes are
//! serialized through one lock so a record is never interleaved with another,
//! and each line is flushed to the optional log file through `tokio::fs` as
//! soon as it is recorded. The log is forensic only: runs are never resumed from it.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::Path;
use std::time::Instant;

use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::TrackerError;
use crate::job::AgentJob;
use crate::job::JobId;
use crate::job::JobState;
use crate::job::Transition;
use crate::report::FailureReason;
use crate::report::Summary;
use crate::truncation;

/// One line of the transition log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRecord {
    pub timestamp: DateTime<Utc>,
    pub job_id: JobId,
    pub room_name: String,
    pub from: JobState,
    pub to: JobState,
    pub attempt: u32,
    pub detail: String,
}

impl TransitionRecord {
    /// `<timestamp> <job_id> <room_name> <from>-><to> <detail>`
    pub fn log_line(&self) -> String {
        format!(
            "{} {} {} {}->{} {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.job_id,
            self.room_name,
            self.from,
            self.to,
            self.detail
        )
    }
}

/// Latest known state of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub room_name: String,
    pub state: JobState,
    pub attempts: u32,
    pub detail: String,
}

#[derive(Default)]
struct TrackerInner {
    records: Vec<TransitionRecord>,
    latest: BTreeMap<JobId, JobOutcome>,
    sink: Option<File>,
}

pub struct OutcomeTracker {
    started: Instant,
    inner: Mutex<TrackerInner>,
}

impl OutcomeTracker {
    /// A tracker that keeps records in memory only.
    pub fn in_memory() -> Self {
        Self {
            started: Instant::now(),
            inner: Mutex::new(TrackerInner::default()),
        }
    }

    /// A tracker that also appends every record to `path`.
    pub fn with_log_file(path: &Path) -> Result<Self, TrackerError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| TrackerError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            started: Instant::now(),
            inner: Mutex::new(TrackerInner {
                sink: Some(File::from_std(file)),
                ..TrackerInner::default()
            }),
        })
    }

    /// Makes the jobs known to the tracker so untouched jobs count as pending.
    pub async fn register(&self, jobs: &[AgentJob]) {
        let mut inner = self.inner.lock().await;
        for job in jobs {
            inner.latest.entry(job.id).or_insert_with(|| JobOutcome {
                room_name: job.room.name.clone(),
                state: job.state,
                attempts: job.attempt_count,
                detail: String::new(),
            });
        }
    }

    pub async fn record(&self, transition: Transition) -> Result<(), TrackerError> {
        self.record_at(transition, Utc::now()).await
    }

    pub async fn record_at(
        &self,
        transition: Transition,
        timestamp: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        let mut inner = self.inner.lock().await;
        if let Some(previous) = inner.latest.get(&transition.job_id)
            && previous.state.is_terminal()
        {
            return Err(TrackerError::DuplicateTerminal(transition.job_id));
        }

        let record = TransitionRecord {
            timestamp,
            job_id: transition.job_id,
            room_name: transition.room_name,
            from: transition.from,
            to: transition.to,
            attempt: transition.attempt,
            detail: truncation::detail(&transition.detail),
        };

        if let Some(sink) = inner.sink.as_mut() {
            let line = format!("{}\n", record.log_line());
            sink.write_all(line.as_bytes()).await?;
            sink.flush().await?;
        }

        inner.latest.insert(
            record.job_id,
            JobOutcome {
                room_name: record.room_name.clone(),
                state: record.to,
                attempts: record.attempt,
                detail: record.detail.clone(),
            },
        );
        inner.records.push(record);
        Ok(())
    }

    pub async fn records(&self) -> Vec<TransitionRecord> {
        self.inner.lock().await.records.clone()
    }

    pub async fn outcome(&self, job_id: JobId) -> Option<JobOutcome> {
        self.inner.lock().await.latest.get(&job_id).cloned()
    }

    /// Counts jobs by latest state. Anything not terminal is still pending.
    pub async fn summarize(&self) -> Summary {
        let inner = self.inner.lock().await;
        let mut summary = Summary {
            total: inner.latest.len(),
            elapsed: self.started.elapsed(),
            ..Summary::default()
        };
        for (job_id, outcome) in &inner.latest {
            match outcome.state {
                JobState::Succeeded => summary.succeeded += 1,
                JobState::Failed => {
                    summary.failed += 1;
                    summary.failures.push(FailureReason {
                        job_id: *job_id,
                        room_name: outcome.room_name.clone(),
                        reason: outcome.detail.clone(),
                    });
                }
                _ => summary.pending += 1,
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::RoomDescriptor;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn job(index: usize) -> AgentJob {
        AgentJob::new(
            JobId(index),
            RoomDescriptor {
                name: format!("room-{index}"),
                url: format!("https://example.daily.co/room-{index}"),
                token: None,
                expires_at: Utc::now(),
            },
        )
    }

    #[test]
    fn formats_log_line() {
        let record = TransitionRecord {
            timestamp: Utc
                .with_ymd_and_hms(2025, 3, 1, 12, 0, 0)
                .single()
                .expect("valid timestamp"),
            job_id: JobId(3),
            room_name: "concurrent-test-3".to_string(),
            from: JobState::Running,
            to: JobState::RateLimited,
            attempt: 1,
            detail: "retry in 1.1s".to_string(),
        };
        assert_eq!(
            record.log_line(),
            "2025-03-01T12:00:00.000Z job-0003 concurrent-test-3 Running->RateLimited retry in 1.1s"
        );
    }

    #[tokio::test]
    async fn rejects_second_terminal_report() {
        let tracker = OutcomeTracker::in_memory();
        let mut job = job(0);
        tracker.register(std::slice::from_ref(&job)).await;
        tracker
            .record(job.advance(JobState::Running, "attempt 1"))
            .await
            .expect("running");
        tracker
            .record(job.advance(JobState::Succeeded, "started"))
            .await
            .expect("succeeded");

        let duplicate = Transition {
            job_id: job.id,
            room_name: job.room.name.clone(),
            from: JobState::Running,
            to: JobState::Failed,
            attempt: 2,
            detail: "again".to_string(),
        };
        let err = tracker.record(duplicate).await.expect_err("duplicate terminal");
        assert!(matches!(err, TrackerError::DuplicateTerminal(JobId(0))));
        assert_eq!(tracker.records().await.len(), 2);
    }

    #[tokio::test]
    async fn summary_counts_untouched_jobs_as_pending() {
        let tracker = OutcomeTracker::in_memory();
        let mut jobs: Vec<AgentJob> = (0..3).map(job).collect();
        tracker.register(&jobs).await;

        tracker
            .record(jobs[0].advance(JobState::Running, "attempt 1"))
            .await
            .expect("record");
        tracker
            .record(jobs[0].advance(JobState::Succeeded, "started"))
            .await
            .expect("record");
        tracker
            .record(jobs[1].advance(JobState::Running, "attempt 1"))
            .await
            .expect("record");
        tracker
            .record(jobs[1].advance(JobState::PermanentFailure, "status 404"))
            .await
            .expect("record");
        tracker
            .record(jobs[1].advance(JobState::Failed, "status 404"))
            .await
            .expect("record");

        let summary = tracker.summarize().await;
        assert_eq!(
            (summary.total, summary.succeeded, summary.failed, summary.pending),
            (3, 1, 1, 1)
        );
        assert_eq!(summary.failures[0].room_name, "room-1");
        assert_eq!(summary.failures[0].reason, "status 404");
    }

    #[tokio::test]
    async fn concurrent_writers_produce_whole_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("agents.log");
        let tracker = Arc::new(OutcomeTracker::with_log_file(&path).expect("open log"));

        let mut handles = Vec::new();
        for index in 0..32 {
            let tracker = Arc::clone(&tracker);
            handles.push(tokio::spawn(async move {
                let mut job = job(index);
                tracker
                    .record(job.advance(JobState::Running, "attempt 1"))
                    .await
                    .expect("record");
                tracker
                    .record(job.advance(JobState::Succeeded, "started\nsession abc"))
                    .await
                    .expect("record");
            }));
        }
        for handle in handles {
            handle.await.expect("join");
        }

        let contents = std::fs::read_to_string(&path).expect("read log");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 64);
        assert_eq!(
            lines
                .iter()
                .filter(|line| line.contains("Running->Succeeded started session abc"))
                .count(),
            32
        );
    }

    #[tokio::test]
    async fn reopening_appends() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("agents.log");
        for _ in 0..2 {
            let tracker = OutcomeTracker::with_log_file(&path).expect("open log");
            let mut job = job(0);
            tracker
                .record(job.advance(JobState::Running, "attempt 1"))
                .await
                .expect("record");
        }
        let contents = std::fs::read_to_string(&path).expect("read log");
        assert_eq!(contents.lines().count(), 2);
    }
}
