//! Ordered fallback strategies per intent kind.
//!
//! Each strategy is implemented once in `FallbackChain::apply`; the table
//! only decides which ones run for a kind and in what order.

use crate::bridge::Bridge;
use crate::context::ExecutionContext;
use crate::otp::OneTimeCodes;
use crate::script;
use crate::verifier::{Verdict, Verifier, probe_from};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uiflow_common::config::UiflowConfig;
use uiflow_common::error::{ErrorKind, ErrorRecord, TransportError};
use uiflow_common::model::{ActionIntent, IntentKind, StrategyId};
use uiflow_common::protocol::{Operation, RemoteResult};

#[derive(Debug, Error, PartialEq)]
pub enum StrategyTableError {
    #[error("No strategies configured for {0}")]
    EmptyChain(IntentKind),
    #[error("Strategy '{strategy}' cannot carry out {kind}")]
    Unsupported { kind: IntentKind, strategy: StrategyId },
    #[error("Strategy '{strategy}' listed twice for {kind}")]
    Duplicate { kind: IntentKind, strategy: StrategyId },
}

/// Intent kind -> strategies to try, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyTable {
    chains: BTreeMap<IntentKind, Vec<StrategyId>>,
}

impl Default for StrategyTable {
    fn default() -> Self {
        use StrategyId::*;
        let chains = BTreeMap::from([
            (
                IntentKind::Fill,
                vec![NativeFill, FocusClearFill, TypeCharacters, ScriptAssign],
            ),
            // Codes expire; few attempts, fastest reliable first.
            (IntentKind::FillOneTimeCode, vec![FocusClearFill, ScriptAssign]),
            (IntentKind::Click, vec![NativeClick, ScriptClick]),
            (IntentKind::Navigate, vec![Navigate]),
            (IntentKind::ReadText, vec![ReadText]),
        ]);
        Self { chains }
    }
}

impl StrategyTable {
    /// Defaults with the given kinds replaced.
    pub fn with_overrides(
        overrides: &BTreeMap<IntentKind, Vec<StrategyId>>,
    ) -> Result<Self, StrategyTableError> {
        let mut table = Self::default();
        for (kind, chain) in overrides {
            table.set(*kind, chain.clone())?;
        }
        Ok(table)
    }

    pub fn set(&mut self, kind: IntentKind, chain: Vec<StrategyId>) -> Result<(), StrategyTableError> {
        if chain.is_empty() {
            return Err(StrategyTableError::EmptyChain(kind));
        }
        for (i, strategy) in chain.iter().enumerate() {
            if !strategy.supports(kind) {
                return Err(StrategyTableError::Unsupported {
                    kind,
                    strategy: *strategy,
                });
            }
            if chain[..i].contains(strategy) {
                return Err(StrategyTableError::Duplicate {
                    kind,
                    strategy: *strategy,
                });
            }
        }
        self.chains.insert(kind, chain);
        Ok(())
    }

    pub fn chain_for(&self, kind: IntentKind) -> &[StrategyId] {
        self.chains.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// What happened to one strategy attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Verified,
    /// The remote primitive reported failure; verification was skipped.
    ActionFailed(String),
    /// The selector matched zero or several elements.
    Ambiguous(String),
    /// The primitive claimed success but the page disagrees.
    Rejected(Verdict),
    Transport(TransportError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub strategy: StrategyId,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainOutcome {
    pub success: bool,
    pub strategy_used: Option<StrategyId>,
    pub attempts: Vec<Attempt>,
    pub last_error: Option<ErrorRecord>,
    /// Text read by a read-text intent.
    pub captured_text: Option<String>,
}

impl ChainOutcome {
    fn new() -> Self {
        Self {
            success: false,
            strategy_used: None,
            attempts: Vec::new(),
            last_error: None,
            captured_text: None,
        }
    }

    pub fn transport_failure(&self) -> bool {
        self.last_error.as_ref().is_some_and(ErrorRecord::is_transport)
    }

    /// Keeps the newest failure, except that an ambiguous target is never
    /// replaced by a plain one.
    fn record_failure(&mut self, record: ErrorRecord) {
        let ambiguous = |e: &ErrorRecord| e.kind == ErrorKind::AmbiguousTarget;
        if self.last_error.as_ref().is_some_and(ambiguous) && !ambiguous(&record) {
            return;
        }
        self.last_error = Some(record);
    }
}

/// Result of carrying out one strategy, before verification.
enum Applied {
    Done(RemoteResult),
    Ambiguous(String),
}

impl From<RemoteResult> for Applied {
    fn from(result: RemoteResult) -> Self {
        Applied::Done(result)
    }
}

/// Runs the strategies for an intent until one is verified.
pub struct FallbackChain {
    table: StrategyTable,
    verifier: Verifier,
    codes: OneTimeCodes,
    settle_delay: Duration,
    wait_for_element_ms: u64,
}

impl FallbackChain {
    pub fn new(config: &UiflowConfig, codes: OneTimeCodes) -> Result<Self, StrategyTableError> {
        Ok(Self {
            table: StrategyTable::with_overrides(&config.strategies)?,
            verifier: Verifier::new(&config.execution),
            codes,
            settle_delay: config.execution.settle_delay(),
            wait_for_element_ms: config.execution.wait_for_element_ms,
        })
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    pub fn table(&self) -> &StrategyTable {
        &self.table
    }

    pub async fn execute<B: Bridge + ?Sized>(
        &self,
        intent: &ActionIntent,
        description: &str,
        bridge: &B,
        ctx: &mut ExecutionContext,
        step_index: u32,
    ) -> ChainOutcome {
        let mut outcome = ChainOutcome::new();

        for &strategy in self.table.chain_for(intent.kind()) {
            ctx.record_attempt(step_index);
            debug!(step = step_index, %strategy, "trying strategy");

            // One-time codes are generated right before each attempt.
            let resolved = match self.resolve(intent, description) {
                Ok(resolved) => resolved,
                Err(record) => {
                    warn!(step = step_index, error = %record, "cannot resolve intent");
                    outcome.attempts.push(Attempt {
                        strategy,
                        outcome: AttemptOutcome::ActionFailed(record.message.clone()),
                    });
                    outcome.last_error = Some(record);
                    return outcome;
                }
            };

            let result = match self.apply(strategy, &resolved, bridge).await {
                Ok(Applied::Done(result)) => result,
                Ok(Applied::Ambiguous(reason)) => {
                    info!(step = step_index, %strategy, %reason, "target is ambiguous");
                    outcome.record_failure(
                        ErrorRecord::new(ErrorKind::AmbiguousTarget, reason.clone())
                            .with_detail(Some(strategy.to_string())),
                    );
                    outcome.attempts.push(Attempt {
                        strategy,
                        outcome: AttemptOutcome::Ambiguous(reason),
                    });
                    continue;
                }
                Err(err) => {
                    warn!(step = step_index, %strategy, error = %err, "transport failure, abandoning chain");
                    outcome.last_error = Some(ErrorRecord::from(&err));
                    outcome.attempts.push(Attempt {
                        strategy,
                        outcome: AttemptOutcome::Transport(err),
                    });
                    return outcome;
                }
            };

            if !result.succeeded {
                let message = result.error_or(strategy_operation(strategy));
                info!(step = step_index, %strategy, error = %message, "strategy failed");
                outcome.record_failure(
                    ErrorRecord::new(ErrorKind::ActionFailed, format!("{}: {}", strategy, message))
                        .with_detail(result.error_detail.clone()),
                );
                outcome.attempts.push(Attempt {
                    strategy,
                    outcome: AttemptOutcome::ActionFailed(message),
                });
                continue;
            }

            if let ActionIntent::ReadText { .. } = resolved {
                outcome.captured_text = result.payload.as_text().map(str::to_string);
            }

            if !self.settle_delay.is_zero() {
                sleep(self.settle_delay).await;
            }

            let verdict = match self.verifier.verify(&resolved, bridge).await {
                Ok(verdict) => verdict,
                Err(err) => {
                    warn!(step = step_index, %strategy, error = %err, "transport failure during verification");
                    outcome.last_error = Some(ErrorRecord::from(&err));
                    outcome.attempts.push(Attempt {
                        strategy,
                        outcome: AttemptOutcome::Transport(err),
                    });
                    return outcome;
                }
            };

            if verdict.passed() {
                info!(step = step_index, %strategy, "strategy verified");
                outcome.attempts.push(Attempt {
                    strategy,
                    outcome: AttemptOutcome::Verified,
                });
                outcome.success = true;
                outcome.strategy_used = Some(strategy);
                outcome.last_error = None;
                return outcome;
            }

            info!(step = step_index, %strategy, %verdict, "strategy not verified");
            if let Some(record) = verdict.to_error() {
                outcome.record_failure(record.with_detail(Some(strategy.to_string())));
            }
            outcome.attempts.push(Attempt {
                strategy,
                outcome: AttemptOutcome::Rejected(verdict),
            });
        }

        if outcome.attempts.is_empty() {
            outcome.last_error = Some(ErrorRecord::new(
                ErrorKind::ActionFailed,
                format!("no strategies configured for {}", intent.kind()),
            ));
        }
        outcome
    }

    /// Replaces a one-time-code intent with a plain fill of a fresh code.
    fn resolve(&self, intent: &ActionIntent, description: &str) -> Result<ActionIntent, ErrorRecord> {
        match intent {
            ActionIntent::FillOneTimeCode { target, secret } => {
                let code = self
                    .codes
                    .fresh_code(secret.as_deref(), description)
                    .map_err(|e| ErrorRecord::new(ErrorKind::ActionFailed, e.to_string()))?;
                Ok(ActionIntent::Fill {
                    target: target.clone(),
                    value: code,
                })
            }
            other => Ok(other.clone()),
        }
    }

    async fn apply<B: Bridge + ?Sized>(
        &self,
        strategy: StrategyId,
        intent: &ActionIntent,
        bridge: &B,
    ) -> Result<Applied, TransportError> {
        match (strategy, intent) {
            (StrategyId::NativeFill, ActionIntent::Fill { target, value }) => {
                bridge.fill(target, value).await.map(Applied::from)
            }
            (StrategyId::FocusClearFill, ActionIntent::Fill { target, value }) => {
                match unique_element(bridge, &script::focus_and_clear(target), target).await? {
                    Applied::Done(cleared) if cleared.succeeded => {
                        bridge.fill(target, value).await.map(Applied::from)
                    }
                    other => Ok(other),
                }
            }
            (StrategyId::TypeCharacters, ActionIntent::Fill { target, value }) => {
                match unique_element(bridge, &script::focus_and_clear(target), target).await? {
                    Applied::Done(cleared) if cleared.succeeded => {
                        bridge.type_text(target, value).await.map(Applied::from)
                    }
                    other => Ok(other),
                }
            }
            (StrategyId::ScriptAssign, ActionIntent::Fill { target, value }) => {
                unique_element(bridge, &script::assign_value(target, value), target).await
            }
            (StrategyId::NativeClick, ActionIntent::Click { target, .. }) => {
                let visible = bridge.wait_for(target, self.wait_for_element_ms).await?;
                if !visible.succeeded {
                    return Ok(visible.into());
                }
                bridge.click(target).await.map(Applied::from)
            }
            (StrategyId::ScriptClick, ActionIntent::Click { target, .. }) => {
                unique_element(bridge, &script::click(target), target).await
            }
            (StrategyId::Navigate, ActionIntent::Navigate { url, .. }) => {
                bridge.navigate(url).await.map(Applied::from)
            }
            (StrategyId::ReadText, ActionIntent::ReadText { target }) => {
                bridge.read_text(target).await.map(Applied::from)
            }
            (strategy, intent) => Ok(RemoteResult::failed(format!(
                "strategy '{}' cannot carry out {}",
                strategy,
                intent.kind()
            ))
            .into()),
        }
    }
}

/// Runs a selector script; anything other than exactly one match is
/// reported as an ambiguous target.
async fn unique_element<B: Bridge + ?Sized>(
    bridge: &B,
    code: &str,
    selector: &str,
) -> Result<Applied, TransportError> {
    let result = bridge.evaluate(code).await?;
    Ok(match probe_from(&result) {
        Ok(probe) if probe.is_unique() => Applied::Done(result),
        Ok(probe) => Applied::Ambiguous(probe.ambiguity(selector)),
        Err(reason) => Applied::Done(RemoteResult::failed(reason)),
    })
}

fn strategy_operation(strategy: StrategyId) -> Operation {
    match strategy {
        StrategyId::NativeFill | StrategyId::FocusClearFill => Operation::Fill,
        StrategyId::TypeCharacters => Operation::Type,
        StrategyId::ScriptAssign | StrategyId::ScriptClick => Operation::EvaluateScript,
        StrategyId::NativeClick => Operation::Click,
        StrategyId::Navigate => Operation::Navigate,
        StrategyId::ReadText => Operation::ReadText,
    }
}
