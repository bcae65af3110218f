//! Per-request context: authenticated caller and optional deadline.

use crate::error::CoreError;
use crate::model::entities::UserId;
use std::time::{Duration, Instant};

/// Who is calling and until when the call may run.
///
/// Passed explicitly to every coordinator operation; there is no ambient
/// request state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestScope {
    user_id: UserId,
    deadline: Option<Instant>,
}

impl RequestScope {
    /// Scope without a deadline.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline relative to now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Fails with `DeadlineExceeded` once the deadline has passed.
    pub fn ensure_active(&self) -> Result<(), CoreError> {
        if self.is_expired() {
            return Err(CoreError::DeadlineExceeded);
        }
        Ok(())
    }
}
