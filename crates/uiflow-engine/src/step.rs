use crate::artifacts::{ArtifactLayout, ScreenshotCapture};
use crate::bridge::Bridge;
use crate::context::ExecutionContext;
use crate::fallback::FallbackChain;
use std::fmt;
use std::path::Path;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};
use uiflow_common::error::{ErrorKind, ErrorRecord};
use uiflow_common::model::{StepDefinition, StepResult, StepStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Pending,
    ConditionCheck,
    Skipped,
    Running,
    Passed,
    Failed,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepState::Pending => "pending",
            StepState::ConditionCheck => "condition-check",
            StepState::Skipped => "skipped",
            StepState::Running => "running",
            StepState::Passed => "passed",
            StepState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// The session stopped answering. Carries the result of the step that
/// crossed the threshold so it can still be recorded.
#[derive(Debug, Error)]
#[error("Session dead after {consecutive} consecutive transport failures at step {}", step.step_index)]
pub struct SessionDead {
    pub step: StepResult,
    pub consecutive: u32,
}

/// Runs one step: gate, action with fallbacks, screenshot.
pub struct StepRunner<'a, B: Bridge + ?Sized> {
    bridge: &'a B,
    chain: &'a FallbackChain,
    capture: &'a ScreenshotCapture,
    layout: &'a ArtifactLayout,
    session_dead_after: u32,
}

impl<'a, B: Bridge + ?Sized> StepRunner<'a, B> {
    pub fn new(
        bridge: &'a B,
        chain: &'a FallbackChain,
        capture: &'a ScreenshotCapture,
        layout: &'a ArtifactLayout,
        session_dead_after: u32,
    ) -> Self {
        Self {
            bridge,
            chain,
            capture,
            layout,
            session_dead_after: session_dead_after.max(1),
        }
    }

    pub async fn run(
        &self,
        step: &StepDefinition,
        ctx: &mut ExecutionContext,
    ) -> Result<StepResult, SessionDead> {
        let started = Instant::now();
        let mut state = StepState::Pending;
        debug!(step = step.index, %state, description = %step.description);

        if let Some(check) = step.effective_condition() {
            state = transition(step.index, state, StepState::ConditionCheck);
            match self.chain.verifier().check_condition(&check, self.bridge).await {
                Ok(true) => {}
                Ok(false) => {
                    transition(step.index, state, StepState::Skipped);
                    info!(step = step.index, ?check, "condition not met, skipping");
                    let screenshot_path = if self.capture.capture_skipped() {
                        self.screenshot(step).await
                    } else {
                        None
                    };
                    ctx.note_step(false);
                    return Ok(StepResult {
                        step_index: step.index,
                        status: StepStatus::Skipped,
                        strategy_used: None,
                        duration_ms: elapsed_ms(started),
                        screenshot_path,
                        error: None,
                        captured_text: None,
                    });
                }
                Err(err) => {
                    transition(step.index, state, StepState::Failed);
                    let error = ErrorRecord::from(&err).with_detail(Some("condition check".into()));
                    return self
                        .finish(step, ctx, started, StepStatus::Failed, None, Some(error), None)
                        .await;
                }
            }
        }

        state = transition(step.index, state, StepState::Running);
        let outcome = self
            .chain
            .execute(&step.intent, &step.description, self.bridge, ctx, step.index)
            .await;

        let status = if outcome.success {
            transition(step.index, state, StepState::Passed);
            StepStatus::Passed
        } else {
            transition(step.index, state, StepState::Failed);
            StepStatus::Failed
        };
        self.finish(
            step,
            ctx,
            started,
            status,
            outcome.strategy_used.map(|s| s.to_string()),
            outcome.last_error,
            outcome.captured_text,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        step: &StepDefinition,
        ctx: &mut ExecutionContext,
        started: Instant,
        status: StepStatus,
        strategy_used: Option<String>,
        mut error: Option<ErrorRecord>,
        captured_text: Option<String>,
    ) -> Result<StepResult, SessionDead> {
        let screenshot_path = self.screenshot(step).await;

        let transport = error.as_ref().is_some_and(ErrorRecord::is_transport);
        let consecutive = ctx.note_step(transport);
        let dead = transport && consecutive >= self.session_dead_after;
        if dead && let Some(record) = error.as_mut() {
            record.detail = Some(record.message.clone());
            record.kind = ErrorKind::SessionDead;
            record.message = format!(
                "{} consecutive transport failures, abandoning run",
                consecutive
            );
        }

        let result = StepResult {
            step_index: step.index,
            status,
            strategy_used,
            duration_ms: elapsed_ms(started),
            screenshot_path,
            error,
            captured_text,
        };
        match &result.error {
            None => info!(step = step.index, strategy = ?result.strategy_used, "step passed"),
            Some(e) => warn!(step = step.index, error = %e, "step failed"),
        }

        if dead {
            return Err(SessionDead {
                step: result,
                consecutive,
            });
        }
        Ok(result)
    }

    /// Screenshots never change a step's outcome.
    async fn screenshot(&self, step: &StepDefinition) -> Option<String> {
        let path = self.layout.step_path(step.index, &step.description);
        match self.capture.capture(self.bridge, &path).await {
            Ok(captured) => Some(display_path(&captured.path)),
            Err(err) => {
                warn!(step = step.index, error = %err, "screenshot failed");
                None
            }
        }
    }
}

fn transition(step: u32, from: StepState, to: StepState) -> StepState {
    debug!(step, %from, %to, "step state");
    to
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn display_path(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
