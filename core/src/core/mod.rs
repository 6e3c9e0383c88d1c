pub mod breaker;
pub mod dispatcher;
pub mod progress;
pub mod requester;
pub mod retry;
pub mod speed;
pub mod work_list;

use std::fmt;
use std::time::Duration;

/// One person pending a refresh call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub id: String,
    pub name: String,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into() }
    }
}

/// Result of a single refresh attempt, consumed by the retry policy.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success { status: u16, elapsed: Duration, bytes: u64 },
    HttpFailure { status: u16, elapsed: Duration, bytes: u64 },
    TransportFailure(String),
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success { .. })
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::Success { status, .. } => write!(f, "status {}", status),
            AttemptOutcome::HttpFailure { status, .. } => write!(f, "status {}", status),
            AttemptOutcome::TransportFailure(reason) => write!(f, "{}", reason),
        }
    }
}

/// Terminal state of one work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Succeeded { attempts: u32 },
    GaveUp { attempts: u32 },
    Cancelled { attempts: u32 },
}

impl ItemOutcome {
    pub fn attempts(&self) -> u32 {
        match *self {
            ItemOutcome::Succeeded { attempts }
            | ItemOutcome::GaveUp { attempts }
            | ItemOutcome::Cancelled { attempts } => attempts,
        }
    }
}
