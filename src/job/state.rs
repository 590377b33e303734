use std::fmt;

use crate::provider::RemoteJobId;

/// Errors raised by the job state machine itself
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("Illegal transition for batch {batch_id}: {from} -> {to}")]
    IllegalTransition {
        batch_id: usize,
        from: &'static str,
        to: &'static str,
    },
}

/// Lifecycle of one batch job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Uploading,
    Submitted { remote_id: RemoteJobId },
    Polling { remote_id: RemoteJobId },
    Succeeded,
    Failed { reason: String },
}

impl JobState {
    pub fn name(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Uploading => "uploading",
            JobState::Submitted { .. } => "submitted",
            JobState::Polling { .. } => "polling",
            JobState::Succeeded => "succeeded",
            JobState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed { .. })
    }

    /// Pending → Uploading → Submitted → Polling → Succeeded, with Failed
    /// reachable from any non-terminal state.
    pub fn can_transition_to(&self, next: &JobState) -> bool {
        if self.is_terminal() {
            return false;
        }

        match (self, next) {
            (_, JobState::Failed { .. }) => true,
            (JobState::Pending, JobState::Uploading) => true,
            (JobState::Uploading, JobState::Submitted { .. }) => true,
            (JobState::Submitted { remote_id: a }, JobState::Polling { remote_id: b }) => a == b,
            (JobState::Polling { .. }, JobState::Succeeded) => true,
            _ => false,
        }
    }

    pub fn remote_id(&self) -> Option<&RemoteJobId> {
        match self {
            JobState::Submitted { remote_id } | JobState::Polling { remote_id } => Some(remote_id),
            _ => None,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Submitted { remote_id } | JobState::Polling { remote_id } => {
                write!(f, "{} ({})", self.name(), remote_id)
            }
            JobState::Failed { reason } => write!(f, "failed: {}", reason),
            _ => f.write_str(self.name()),
        }
    }
}

/// Mutable bookkeeping for one batch, owned by its runner
#[derive(Debug, Clone)]
pub struct JobHandle {
    batch_id: usize,
    remote_id: Option<RemoteJobId>,
    state: JobState,
    attempts: u32,
    last_error: Option<String>,
}

impl JobHandle {
    pub fn new(batch_id: usize) -> Self {
        Self {
            batch_id,
            remote_id: None,
            state: JobState::Pending,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn batch_id(&self) -> usize {
        self.batch_id
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn remote_id(&self) -> Option<&RemoteJobId> {
        self.remote_id.as_ref()
    }

    /// Total provider calls spent on this batch, retries included
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn transition(&mut self, next: JobState) -> Result<(), JobError> {
        if !self.state.can_transition_to(&next) {
            return Err(JobError::IllegalTransition {
                batch_id: self.batch_id,
                from: self.state.name(),
                to: next.name(),
            });
        }

        if let Some(remote_id) = next.remote_id() {
            self.remote_id = Some(remote_id.clone());
        }
        if let JobState::Failed { reason } = &next {
            self.last_error = Some(reason.clone());
        }

        tracing::debug!("Batch {}: {} -> {}", self.batch_id, self.state, next);
        self.state = next;
        Ok(())
    }

    /// Move to Failed unless already terminal
    pub fn fail(&mut self, reason: impl Into<String>) {
        if !self.state.is_terminal() {
            let reason = reason.into();
            self.last_error = Some(reason.clone());
            self.state = JobState::Failed { reason };
        }
    }

    pub fn record_attempts(&mut self, attempts: u32) {
        self.attempts += attempts;
    }

    pub fn record_error(&mut self, error: impl fmt::Display) {
        self.last_error = Some(error.to_string());
    }
}
