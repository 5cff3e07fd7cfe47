//! Room descriptors, agent jobs and the job state machine.

use chrono::DateTime;
use chrono::Utc;
use std::fmt;

/// One provisioned room. Immutable once the provisioner hands it out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomDescriptor {
    /// Unique within a run: `{prefix}-{index}`.
    pub name: String,
    /// URL an agent uses to join the room.
    pub url: String,
    /// Optional meeting token for private rooms.
    pub token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Identifier of an [`AgentJob`]; the index of the room it was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub usize);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{:04}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    RateLimited,
    TransientFailure,
    PermanentFailure,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Succeeded)
                | (Running, RateLimited)
                | (Running, TransientFailure)
                | (Running, PermanentFailure)
                | (RateLimited, Pending)
                | (RateLimited, Failed)
                | (TransientFailure, Pending)
                | (TransientFailure, Failed)
                | (PermanentFailure, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "Pending",
            JobState::Running => "Running",
            JobState::Succeeded => "Succeeded",
            JobState::RateLimited => "RateLimited",
            JobState::TransientFailure => "TransientFailure",
            JobState::PermanentFailure => "PermanentFailure",
            JobState::Failed => "Failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change produced by [`AgentJob::advance`], ready for the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub job_id: JobId,
    pub room_name: String,
    pub from: JobState,
    pub to: JobState,
    /// Start-agent calls issued for the job when the change happened.
    pub attempt: u32,
    pub detail: String,
}

/// "Start one agent against one room", carried through to a terminal outcome.
///
/// Only the worker currently holding the job mutates it; jobs move between
/// workers by value through the dispatcher queue.
#[derive(Debug, Clone)]
pub struct AgentJob {
    pub id: JobId,
    pub room: RoomDescriptor,
    /// Start-agent calls issued so far, across every retry cause.
    pub attempt_count: u32,
    /// Transient failures seen so far; bounded separately from rate limits.
    pub transient_failures: u32,
    pub state: JobState,
    pub last_error: Option<String>,
}

impl AgentJob {
    pub fn new(id: JobId, room: RoomDescriptor) -> Self {
        Self {
            id,
            room,
            attempt_count: 0,
            transient_failures: 0,
            state: JobState::Pending,
            last_error: None,
        }
    }

    /// One job per descriptor, ids following provisioning order.
    pub fn from_rooms(rooms: Vec<RoomDescriptor>) -> Vec<AgentJob> {
        rooms
            .into_iter()
            .enumerate()
            .map(|(index, room)| AgentJob::new(JobId(index), room))
            .collect()
    }

    /// Moves the job to `to` and describes the change.
    pub fn advance(&mut self, to: JobState, detail: impl Into<String>) -> Transition {
        debug_assert!(
            self.state.can_transition_to(to),
            "illegal transition {} -> {to} for {}",
            self.state,
            self.id
        );
        let from = self.state;
        self.state = to;
        Transition {
            job_id: self.id,
            room_name: self.room.name.clone(),
            from,
            to,
            attempt: self.attempt_count,
            detail: detail.into(),
        }
    }
}
