//! Final run summary and its human-readable rendering.

use std::fmt;
use std::time::Duration;

use crate::job::JobId;

/// How many failure reasons the rendered summary lists.
pub const FAILURES_SHOWN: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReason {
    pub job_id: JobId,
    pub room_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Jobs that never reached a terminal state because the run was stopped.
    pub pending: usize,
    pub elapsed: Duration,
    /// Failed jobs in job order.
    pub failures: Vec<FailureReason>,
}

impl Summary {
    pub fn all_succeeded(&self) -> bool {
        self.succeeded == self.total
    }

    /// `succeeded + failed + pending == total`; every job is accounted for.
    pub fn is_balanced(&self) -> bool {
        self.succeeded + self.failed + self.pending == self.total
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(50);
        writeln!(f, "{rule}")?;
        writeln!(f, "SUMMARY")?;
        writeln!(f, "{rule}")?;
        writeln!(f, "Total agents: {}", self.total)?;
        writeln!(f, "Succeeded: {}", self.succeeded)?;
        writeln!(f, "Failed: {}", self.failed)?;
        if self.pending > 0 {
            writeln!(f, "Still pending (run stopped): {}", self.pending)?;
        }
        write!(f, "Dispatch time: {:.2}s", self.elapsed.as_secs_f64())?;

        if !self.failures.is_empty() {
            write!(f, "\nFailed rooms:")?;
            for failure in self.failures.iter().take(FAILURES_SHOWN) {
                write!(f, "\n  - {}: {}", failure.room_name, failure.reason)?;
            }
            let hidden = self.failures.len().saturating_sub(FAILURES_SHOWN);
            if hidden > 0 {
                write!(f, "\n  ... and {hidden} more (see transition log)")?;
            }
        }
        Ok(())
    }
}

/// Result of comparing the control plane's active sessions with the number
/// of agents this run started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub expected: usize,
    pub active: usize,
    pub cold_starts: usize,
    pub warm_starts: usize,
}

impl VerificationReport {
    pub fn verified(&self) -> bool {
        self.active >= self.expected
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Expected active sessions: {}", self.expected)?;
        writeln!(f, "Active sessions: {}", self.active)?;
        if self.verified() {
            writeln!(f, "Verification passed: all agents are running")?;
        } else {
            writeln!(
                f,
                "Verification warning: only {}/{} agents running",
                self.active, self.expected
            )?;
        }
        write!(
            f,
            "Sampled sessions: {} cold starts, {} warm starts",
            self.cold_starts, self.warm_starts
        )
    }
}
