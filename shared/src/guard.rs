// ============================================================================
// Reentrancy Guard
// ============================================================================
//
// In-process "is a pass already running" cell. A single compare-and-swap
// moves the cell from Idle to Running and hands out a PassPermit; dropping
// the permit (normal return, error, or unwinding) moves it back to Idle.
//
// ============================================================================

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicU64, Ordering};

const IDLE: u8 = 0;
const RUNNING: u8 = 1;

#[derive(Debug)]
struct GuardState {
    pass: AtomicU8,
    passes_started: AtomicU64,
    /// Unix millis of the last started pass, 0 when none
    last_started_ms: AtomicI64,
}

/// Cheap to clone; clones share the same cell
#[derive(Debug, Clone)]
pub struct ReentrancyGuard {
    state: Arc<GuardState>,
}

impl Default for ReentrancyGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl ReentrancyGuard {
    pub fn new() -> Self {
        Self {
            state: Arc::new(GuardState {
                pass: AtomicU8::new(IDLE),
                passes_started: AtomicU64::new(0),
                last_started_ms: AtomicI64::new(0),
            }),
        }
    }

    /// Claim the cell; `None` when a pass is already running
    pub fn try_begin_pass(&self) -> Option<PassPermit> {
        self.state
            .pass
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;

        self.state.passes_started.fetch_add(1, Ordering::Relaxed);
        self.state
            .last_started_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);

        Some(PassPermit {
            state: self.state.clone(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.state.pass.load(Ordering::Acquire) == RUNNING
    }

    pub fn passes_started(&self) -> u64 {
        self.state.passes_started.load(Ordering::Relaxed)
    }

    pub fn last_started(&self) -> Option<DateTime<Utc>> {
        match self.state.last_started_ms.load(Ordering::Relaxed) {
            0 => None,
            millis => Utc.timestamp_millis_opt(millis).single(),
        }
    }
}

/// Proof that the holder owns the running pass
#[derive(Debug)]
#[must_use = "the pass ends as soon as the permit is dropped"]
pub struct PassPermit {
    state: Arc<GuardState>,
}

impl Drop for PassPermit {
    fn drop(&mut self) {
        self.state.pass.store(IDLE, Ordering::Release);
    }
}
