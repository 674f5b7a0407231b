use serde::{Deserialize, Serialize};

// ============================================================================
// IngestionOutcome - per-message result of one drain iteration
// ============================================================================

/// What the pipeline does with a lock token after its handler ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    /// Handled; the token is acknowledged
    Success,
    /// Handler failed or errored; the token is released for redelivery
    TransientFailure,
    /// Handler judged the payload permanently unprocessable; the token is rejected
    Rejected,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::TransientFailure => "transient_failure",
            OutcomeKind::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one handled message together with its originating lock token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionOutcome {
    pub kind: OutcomeKind,
    pub lock_token: String,
}

impl IngestionOutcome {
    pub fn new(kind: OutcomeKind, lock_token: impl Into<String>) -> Self {
        Self {
            kind,
            lock_token: lock_token.into(),
        }
    }
}

/// Lock tokens grouped by the settle call they belong to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettlePlan {
    pub acknowledge: Vec<String>,
    pub release: Vec<String>,
    pub reject: Vec<String>,
}

impl SettlePlan {
    /// Partition outcomes; every token lands in exactly one list, order preserved
    pub fn from_outcomes(outcomes: impl IntoIterator<Item = IngestionOutcome>) -> Self {
        let mut plan = SettlePlan::default();
        for outcome in outcomes {
            match outcome.kind {
                OutcomeKind::Success => plan.acknowledge.push(outcome.lock_token),
                OutcomeKind::TransientFailure => plan.release.push(outcome.lock_token),
                OutcomeKind::Rejected => plan.reject.push(outcome.lock_token),
            }
        }
        plan
    }

    pub fn len(&self) -> usize {
        self.acknowledge.len() + self.release.len() + self.reject.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// LockTokenResult - per-token result of a batched settle call
// ============================================================================

/// A token the broker refused to settle, with its reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedLockToken {
    pub lock_token: String,
    pub code: String,
    pub description: String,
}

/// Result of an acknowledge/release/reject call.
///
/// The call can succeed as a whole while individual tokens fail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockTokenResult {
    pub succeeded: Vec<String>,
    pub failed: Vec<FailedLockToken>,
}

impl LockTokenResult {
    pub fn all_succeeded(tokens: &[String]) -> Self {
        Self {
            succeeded: tokens.to_vec(),
            failed: Vec::new(),
        }
    }
}
