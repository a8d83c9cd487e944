use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-run state threaded through the step runner. One per test case run;
/// never shared between runs.
#[derive(Debug)]
pub struct ExecutionContext {
    run_id: Uuid,
    test_case_id: String,
    cancel: CancellationToken,
    consecutive_transport_failures: u32,
    attempts_by_step: BTreeMap<u32, u32>,
}

impl ExecutionContext {
    pub fn new(run_id: Uuid, test_case_id: impl Into<String>) -> Self {
        Self {
            run_id,
            test_case_id: test_case_id.into(),
            cancel: CancellationToken::new(),
            consecutive_transport_failures: 0,
            attempts_by_step: BTreeMap::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn test_case_id(&self) -> &str {
        &self.test_case_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn record_attempt(&mut self, step_index: u32) {
        *self.attempts_by_step.entry(step_index).or_default() += 1;
    }

    /// Strategy attempts made for a step so far.
    pub fn attempts(&self, step_index: u32) -> u32 {
        self.attempts_by_step.get(&step_index).copied().unwrap_or(0)
    }

    /// Counts a finished step toward the session-dead threshold and returns
    /// the current streak. Any step without a transport error resets it.
    pub fn note_step(&mut self, transport_failure: bool) -> u32 {
        if transport_failure {
            self.consecutive_transport_failures += 1;
        } else {
            self.consecutive_transport_failures = 0;
        }
        self.consecutive_transport_failures
    }

    pub fn consecutive_transport_failures(&self) -> u32 {
        self.consecutive_transport_failures
    }
}
