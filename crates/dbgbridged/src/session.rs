//! Bookkeeping for the debugging session behind the daemon.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use rand::Rng;
use time::OffsetDateTime;
use time::macros::format_description;

use crate::executor::ExecutionResult;

#[derive(Debug)]
struct Counters {
    last_command: Instant,
    last_execution: Option<Duration>,
    commands: u64,
    failures: u64,
    timeouts: u64,
    detached: u64,
}

/// Session identity and execution counters.
///
/// Owned by the server context and shared with the executor; every update
/// happens under one mutex.
#[derive(Debug)]
pub struct SessionState {
    id: String,
    started: Instant,
    counters: Mutex<Counters>,
}

/// Point-in-time copy of [`SessionState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Id generated when the session started.
    pub session_id: String,
    /// Time since the session started.
    pub uptime: Duration,
    /// Time since the last native call was recorded.
    pub since_last_command: Duration,
    /// Duration of the most recent native call.
    pub last_execution: Option<Duration>,
    /// Native calls recorded.
    pub commands: u64,
    /// Calls that reported a failure.
    pub failures: u64,
    /// Calls that ran past their deadline.
    pub timeouts: u64,
    /// Workers abandoned after ignoring an interrupt.
    pub detached: u64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::with_id(generate_session_id())
    }
}

impl SessionState {
    /// Starts a session with a freshly generated id.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a session under a caller-chosen id.
    #[must_use]
    pub fn with_id(id: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            id: id.into(),
            started: now,
            counters: Mutex::new(Counters {
                last_command: now,
                last_execution: None,
                commands: 0,
                failures: 0,
                timeouts: 0,
                detached: 0,
            }),
        }
    }

    /// Id reported in status and diagnostics output.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.id
    }

    /// Records the outcome of one execution.
    pub fn record_execution(&self, result: &ExecutionResult) {
        let mut counters = self.lock();
        counters.last_command = Instant::now();
        counters.last_execution = Some(result.elapsed);
        counters.commands += 1;
        if result.timed_out {
            counters.timeouts += 1;
        } else if result.failed {
            counters.failures += 1;
        }
    }

    /// Records a worker abandoned after ignoring its interrupt.
    pub fn record_detached(&self) {
        self.lock().detached += 1;
    }

    /// Copies the current counters.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let counters = self.lock();
        SessionSnapshot {
            session_id: self.id.clone(),
            uptime: self.started.elapsed(),
            since_last_command: counters.last_command.elapsed(),
            last_execution: counters.last_execution,
            commands: counters.commands,
            failures: counters.failures,
            timeouts: counters.timeouts,
            detached: counters.detached,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Builds an id such as `dbgbridge_session_20260118_093015_4821`.
#[must_use]
pub fn generate_session_id() -> String {
    let now = OffsetDateTime::now_utc();
    let stamp = now
        .format(format_description!("[year][month][day]_[hour][minute][second]"))
        .unwrap_or_else(|_| now.unix_timestamp().to_string());
    let suffix: u16 = rand::thread_rng().gen_range(1000..=9999);
    format!("dbgbridge_session_{stamp}_{suffix}")
}

/// Current UTC time as RFC 3339, used for response timestamps.
#[must_use]
pub fn timestamp() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}
