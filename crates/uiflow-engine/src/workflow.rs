use crate::artifacts::{ArtifactLayout, ScreenshotCapture};
use crate::bridge::Bridge;
use crate::context::ExecutionContext;
use crate::fallback::{FallbackChain, StrategyTableError};
use crate::otp::OneTimeCodes;
use crate::step::StepRunner;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};
use uiflow_common::config::UiflowConfig;
use uiflow_common::model::{AbortReason, StepDefinition, TestCaseResult};
use uuid::Uuid;

/// Runs a test case's steps in order against one bridge session.
pub struct WorkflowExecutor<'a, B: Bridge + ?Sized> {
    bridge: &'a B,
    chain: FallbackChain,
    capture: ScreenshotCapture,
    session_dead_after: u32,
    cancel: CancellationToken,
    run_id: Option<Uuid>,
}

impl<'a, B: Bridge + ?Sized> WorkflowExecutor<'a, B> {
    pub fn new(
        bridge: &'a B,
        config: &UiflowConfig,
        codes: OneTimeCodes,
    ) -> Result<Self, StrategyTableError> {
        Ok(Self {
            bridge,
            chain: FallbackChain::new(config, codes)?,
            capture: ScreenshotCapture::new(config.screenshots.clone()),
            session_dead_after: config.execution.session_dead_after,
            cancel: CancellationToken::new(),
            run_id: None,
        })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Fixes the run id instead of generating one per run.
    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Never fails: every problem ends up in the returned result.
    pub async fn run(&self, test_case_id: &str, steps: &[StepDefinition]) -> TestCaseResult {
        let run_id = self.run_id.unwrap_or_else(Uuid::new_v4);
        let span = info_span!("run", %run_id, test_case = test_case_id);
        self.run_inner(run_id, test_case_id, steps)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        test_case_id: &str,
        steps: &[StepDefinition],
    ) -> TestCaseResult {
        let started_at = Utc::now();
        let mut ordered: Vec<&StepDefinition> = steps.iter().collect();
        ordered.sort_by_key(|s| s.index);
        info!(steps = ordered.len(), "starting test case");

        let mut ctx =
            ExecutionContext::new(run_id, test_case_id).with_cancellation(self.cancel.clone());
        let layout = ArtifactLayout::new(self.capture.root(), run_id, test_case_id);
        let runner = StepRunner::new(
            self.bridge,
            &self.chain,
            &self.capture,
            &layout,
            self.session_dead_after,
        );

        let mut results = Vec::with_capacity(ordered.len());
        let mut aborted = None;

        for step in ordered {
            if ctx.is_cancelled() {
                warn!(step = step.index, "run cancelled");
                aborted = Some(AbortReason::Cancelled {
                    before_step: step.index,
                });
                break;
            }

            match runner
                .run(step, &mut ctx)
                .instrument(info_span!("step", step = step.index))
                .await
            {
                Ok(result) => results.push(result),
                Err(dead) => {
                    error!(step = step.index, consecutive = dead.consecutive, "{}", dead);
                    aborted = Some(AbortReason::SessionDead {
                        after_step: step.index,
                        consecutive_failures: dead.consecutive,
                    });
                    results.push(dead.step);
                    break;
                }
            }
        }

        let overall_status = TestCaseResult::compute_status(&results, aborted.as_ref());
        let result = TestCaseResult {
            test_case_id: test_case_id.to_string(),
            run_id,
            steps: results,
            overall_status,
            started_at,
            completed_at: Utc::now(),
            aborted,
        };
        info!(status = ?result.overall_status, summary = %result.summary(), "test case finished");
        result
    }
}
