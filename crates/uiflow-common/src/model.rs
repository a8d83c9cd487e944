//! Test-case data model: what a step asks for and what a run produced.

use crate::error::ErrorRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Logical kind of a primitive action; keys the strategy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Fill,
    FillOneTimeCode,
    Click,
    Navigate,
    ReadText,
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntentKind::Fill => "fill",
            IntentKind::FillOneTimeCode => "fill_one_time_code",
            IntentKind::Click => "click",
            IntentKind::Navigate => "navigate",
            IntentKind::ReadText => "read_text",
        };
        f.write_str(s)
    }
}

/// What a primitive action is supposed to achieve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionIntent {
    /// Field `target` should end up containing exactly `value`.
    Fill { target: String, value: String },
    /// Field `target` should contain a freshly generated one-time code.
    FillOneTimeCode {
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret: Option<String>,
    },
    /// Click `target`; when `navigates_to` is set the URL must change to
    /// contain it.
    Click {
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        navigates_to: Option<String>,
    },
    /// Load `url`; the resulting URL must contain `expect_url` (defaults to
    /// `url`).
    Navigate {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expect_url: Option<String>,
    },
    ReadText { target: String },
}

impl ActionIntent {
    pub fn kind(&self) -> IntentKind {
        match self {
            ActionIntent::Fill { .. } => IntentKind::Fill,
            ActionIntent::FillOneTimeCode { .. } => IntentKind::FillOneTimeCode,
            ActionIntent::Click { .. } => IntentKind::Click,
            ActionIntent::Navigate { .. } => IntentKind::Navigate,
            ActionIntent::ReadText { .. } => IntentKind::ReadText,
        }
    }

    /// Selector for element intents, URL for navigation.
    pub fn target(&self) -> &str {
        match self {
            ActionIntent::Fill { target, .. }
            | ActionIntent::FillOneTimeCode { target, .. }
            | ActionIntent::Click { target, .. }
            | ActionIntent::ReadText { target } => target,
            ActionIntent::Navigate { url, .. } => url,
        }
    }

    /// Value the page should show after the action, when one is known
    /// statically.
    pub fn expected_value(&self) -> Option<&str> {
        match self {
            ActionIntent::Fill { value, .. } => Some(value),
            ActionIntent::Click { navigates_to, .. } => navigates_to.as_deref(),
            ActionIntent::Navigate { url, expect_url } => {
                Some(expect_url.as_deref().unwrap_or(url.trim_end_matches('/')))
            }
            ActionIntent::FillOneTimeCode { .. } | ActionIntent::ReadText { .. } => None,
        }
    }

    /// Whether `target()` names a DOM element.
    pub fn has_element_target(&self) -> bool {
        !matches!(self, ActionIntent::Navigate { .. })
    }
}

/// One concrete way of carrying out an intent. Each is implemented once
/// and composed into per-kind chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyId {
    NativeFill,
    FocusClearFill,
    TypeCharacters,
    ScriptAssign,
    NativeClick,
    ScriptClick,
    Navigate,
    ReadText,
}

impl StrategyId {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyId::NativeFill => "native fill",
            StrategyId::FocusClearFill => "focus+clear+fill",
            StrategyId::TypeCharacters => "character-by-character type",
            StrategyId::ScriptAssign => "script-injected value+event-dispatch",
            StrategyId::NativeClick => "native click",
            StrategyId::ScriptClick => "script click",
            StrategyId::Navigate => "navigate",
            StrategyId::ReadText => "read text",
        }
    }

    /// Kinds this strategy knows how to carry out.
    pub fn supports(&self, kind: IntentKind) -> bool {
        match self {
            StrategyId::NativeFill
            | StrategyId::FocusClearFill
            | StrategyId::TypeCharacters
            | StrategyId::ScriptAssign => {
                matches!(kind, IntentKind::Fill | IntentKind::FillOneTimeCode)
            }
            StrategyId::NativeClick | StrategyId::ScriptClick => kind == IntentKind::Click,
            StrategyId::Navigate => kind == IntentKind::Navigate,
            StrategyId::ReadText => kind == IntentKind::ReadText,
        }
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Predicate over page state that gates a conditional step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum ConditionCheck {
    ElementExists { selector: String },
    ElementAbsent { selector: String },
    UrlContains { substring: String },
    TextPresent { text: String },
}

/// One authored step of a test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StepDefinition {
    pub index: u32,
    pub description: String,
    pub intent: ActionIntent,
    #[serde(default)]
    pub is_conditional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_check: Option<ConditionCheck>,
}

impl StepDefinition {
    /// The check to run for a conditional step. Without an explicit one the
    /// step is gated on its own target element existing.
    pub fn effective_condition(&self) -> Option<ConditionCheck> {
        if !self.is_conditional {
            return None;
        }
        if let Some(check) = &self.condition_check {
            return Some(check.clone());
        }
        self.intent
            .has_element_target()
            .then(|| ConditionCheck::ElementExists {
                selector: self.intent.target().to_string(),
            })
    }
}

/// A test case as handed over by the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub steps: Vec<StepDefinition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_index: u32,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_used: Option<String>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
    /// Text returned by a read-text step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Passed,
    Failed,
}

/// Why a run stopped before its last step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AbortReason {
    SessionDead { after_step: u32, consecutive_failures: u32 },
    Cancelled { before_step: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub test_case_id: String,
    pub run_id: Uuid,
    pub steps: Vec<StepResult>,
    pub overall_status: OverallStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<AbortReason>,
}

impl TestCaseResult {
    /// Passed iff nothing aborted the run and every non-skipped step passed.
    pub fn compute_status(steps: &[StepResult], aborted: Option<&AbortReason>) -> OverallStatus {
        if aborted.is_some() {
            return OverallStatus::Failed;
        }
        let all_passed = steps
            .iter()
            .filter(|s| s.status != StepStatus::Skipped)
            .all(|s| s.status == StepStatus::Passed);
        if all_passed {
            OverallStatus::Passed
        } else {
            OverallStatus::Failed
        }
    }

    pub fn summary(&self) -> RunSummary {
        let count = |status| self.steps.iter().filter(|s| s.status == status).count();
        RunSummary {
            total: self.steps.len(),
            passed: count(StepStatus::Passed),
            failed: count(StepStatus::Failed),
            skipped: count(StepStatus::Skipped),
            duration_ms: (self.completed_at - self.started_at)
                .num_milliseconds()
                .max(0) as u64,
        }
    }

    /// Screenshot files produced by the run, in step order.
    pub fn screenshot_paths(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter_map(|s| s.screenshot_path.as_deref())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} steps: {} passed, {} failed, {} skipped in {}ms",
            self.total, self.passed, self.failed, self.skipped, self.duration_ms
        )
    }
}
