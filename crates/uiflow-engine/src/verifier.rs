use crate::bridge::Bridge;
use crate::script::{self, ElementProbe};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};
use uiflow_common::config::ExecutionConfig;
use uiflow_common::error::{ErrorKind, ErrorRecord, TransportError};
use uiflow_common::model::{ActionIntent, ConditionCheck};
use uiflow_common::protocol::{Operation, Payload, RemoteResult};

/// Outcome of checking an action against the live page.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Verified,
    WrongValue { expected: String, actual: String },
    /// The selector did not resolve to exactly one element.
    AmbiguousTarget { reason: String },
    NotNavigated { expected: String, actual: String },
    /// The page could not be read back at all.
    ReadFailed { reason: String },
}

impl Verdict {
    pub fn passed(&self) -> bool {
        matches!(self, Verdict::Verified)
    }

    pub fn to_error(&self) -> Option<ErrorRecord> {
        let (kind, message) = match self {
            Verdict::Verified => return None,
            Verdict::AmbiguousTarget { reason } => (ErrorKind::AmbiguousTarget, reason.clone()),
            other => (ErrorKind::VerificationFailed, other.to_string()),
        };
        Some(ErrorRecord::new(kind, message))
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Verified => f.write_str("verified"),
            Verdict::WrongValue { expected, actual } => {
                write!(f, "expected value '{}' but field holds '{}'", expected, actual)
            }
            Verdict::AmbiguousTarget { reason } => f.write_str(reason),
            Verdict::NotNavigated { expected, actual } => {
                write!(f, "expected URL containing '{}' but page is at '{}'", expected, actual)
            }
            Verdict::ReadFailed { reason } => write!(f, "could not read page state: {}", reason),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TextProbe {
    #[serde(default)]
    present: bool,
}

/// Checks whether an action achieved its intent by reading the page.
///
/// Every check is a read; calling `verify` twice against an unchanged page
/// gives the same verdict.
#[derive(Debug, Clone)]
pub struct Verifier {
    navigation_timeout: Duration,
    navigation_poll: Duration,
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new(&ExecutionConfig::default())
    }
}

impl Verifier {
    pub fn new(config: &ExecutionConfig) -> Self {
        Self {
            navigation_timeout: config.navigation_timeout(),
            navigation_poll: config.navigation_poll(),
        }
    }

    pub async fn verify<B: Bridge + ?Sized>(
        &self,
        intent: &ActionIntent,
        bridge: &B,
    ) -> Result<Verdict, TransportError> {
        let verdict = match intent {
            ActionIntent::Fill { target, value } => self.verify_field(bridge, target, value).await?,
            ActionIntent::FillOneTimeCode { .. } => Verdict::ReadFailed {
                reason: "one-time code was not resolved before verification".into(),
            },
            ActionIntent::Click {
                navigates_to: None, ..
            } => Verdict::Verified,
            ActionIntent::Click {
                navigates_to: Some(expected),
                ..
            } => self.wait_for_url(bridge, expected).await?,
            ActionIntent::Navigate { .. } => {
                let expected = intent.expected_value().unwrap_or_default();
                self.check_url(bridge, expected).await?
            }
            ActionIntent::ReadText { target } => {
                let result = bridge.read_text(target).await?;
                if result.succeeded && result.payload.as_text().is_some() {
                    Verdict::Verified
                } else {
                    Verdict::ReadFailed {
                        reason: result.error_or(Operation::ReadText),
                    }
                }
            }
        };
        debug!(kind = %intent.kind(), target = intent.target(), %verdict, "verification");
        Ok(verdict)
    }

    async fn verify_field<B: Bridge + ?Sized>(
        &self,
        bridge: &B,
        selector: &str,
        expected: &str,
    ) -> Result<Verdict, TransportError> {
        let result = bridge.evaluate(&script::read_field(selector)).await?;
        let probe = match probe_from(&result) {
            Ok(probe) => probe,
            Err(reason) => return Ok(Verdict::ReadFailed { reason }),
        };
        if !probe.is_unique() {
            return Ok(Verdict::AmbiguousTarget {
                reason: probe.ambiguity(selector),
            });
        }
        let actual = probe.value.unwrap_or_default();
        if actual == expected {
            Ok(Verdict::Verified)
        } else {
            Ok(Verdict::WrongValue {
                expected: expected.to_string(),
                actual,
            })
        }
    }

    async fn current_url<B: Bridge + ?Sized>(
        &self,
        bridge: &B,
    ) -> Result<Result<String, String>, TransportError> {
        let result = bridge.evaluate(&script::location()).await?;
        if !result.succeeded {
            return Ok(Err(result.error_or(Operation::EvaluateScript)));
        }
        Ok(result
            .payload
            .as_text()
            .map(str::to_string)
            .ok_or_else(|| "location script returned no URL".to_string()))
    }

    async fn check_url<B: Bridge + ?Sized>(
        &self,
        bridge: &B,
        expected: &str,
    ) -> Result<Verdict, TransportError> {
        Ok(match self.current_url(bridge).await? {
            Ok(actual) if actual.contains(expected) => Verdict::Verified,
            Ok(actual) => Verdict::NotNavigated {
                expected: expected.to_string(),
                actual,
            },
            Err(reason) => Verdict::ReadFailed { reason },
        })
    }

    /// Polls the URL until it contains `expected` or the navigation timeout
    /// runs out.
    async fn wait_for_url<B: Bridge + ?Sized>(
        &self,
        bridge: &B,
        expected: &str,
    ) -> Result<Verdict, TransportError> {
        let deadline = Instant::now() + self.navigation_timeout;
        loop {
            let verdict = self.check_url(bridge, expected).await?;
            if verdict.passed() || Instant::now() >= deadline {
                return Ok(verdict);
            }
            sleep(self.navigation_poll).await;
        }
    }

    /// Evaluates a step gate. A remote failure reads as "condition false";
    /// only a broken transport is an error.
    pub async fn check_condition<B: Bridge + ?Sized>(
        &self,
        check: &ConditionCheck,
        bridge: &B,
    ) -> Result<bool, TransportError> {
        let holds = match check {
            ConditionCheck::ElementExists { selector } => {
                self.element_count(bridge, selector).await?.is_some_and(|n| n > 0)
            }
            ConditionCheck::ElementAbsent { selector } => {
                self.element_count(bridge, selector).await? == Some(0)
            }
            ConditionCheck::UrlContains { substring } => self
                .current_url(bridge)
                .await?
                .is_ok_and(|url| url.contains(substring.as_str())),
            ConditionCheck::TextPresent { text } => {
                let result = bridge.evaluate(&script::text_present(text)).await?;
                result.succeeded
                    && result
                        .payload
                        .as_value()
                        .and_then(script::parse_object::<TextProbe>)
                        .is_some_and(|p| p.present)
            }
        };
        debug!(?check, holds, "condition evaluated");
        Ok(holds)
    }

    async fn element_count<B: Bridge + ?Sized>(
        &self,
        bridge: &B,
        selector: &str,
    ) -> Result<Option<usize>, TransportError> {
        let result = bridge.evaluate(&script::count(selector)).await?;
        match probe_from(&result) {
            Ok(probe) if probe.error.is_none() => Ok(Some(probe.count)),
            Ok(probe) => {
                warn!(selector, "condition selector rejected: {}", probe.ambiguity(selector));
                Ok(None)
            }
            Err(reason) => {
                warn!(selector, %reason, "condition could not be evaluated");
                Ok(None)
            }
        }
    }
}

/// Parses the probe a selector script returns, or says why it could not.
pub(crate) fn probe_from(result: &RemoteResult) -> Result<ElementProbe, String> {
    if !result.succeeded {
        return Err(result.error_or(Operation::EvaluateScript));
    }
    match &result.payload {
        Payload::Value(value) => script::parse_object(value)
            .ok_or_else(|| format!("unexpected script result: {}", value)),
        other => Err(format!("unexpected payload: {:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use uiflow_common::protocol::RemoteCall;

    /// Answers every evaluate with the next canned value.
    struct ScriptedPage {
        answers: Mutex<Vec<Value>>,
        evaluations: Mutex<usize>,
    }

    impl ScriptedPage {
        fn new(answers: Vec<Value>) -> Self {
            Self {
                answers: Mutex::new(answers),
                evaluations: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl Bridge for ScriptedPage {
        async fn call(&self, call: RemoteCall) -> Result<RemoteResult, TransportError> {
            assert_eq!(call.operation(), Operation::EvaluateScript);
            *self.evaluations.lock().unwrap() += 1;
            let mut answers = self.answers.lock().unwrap();
            let answer = if answers.len() > 1 {
                answers.remove(0)
            } else {
                answers[0].clone()
            };
            Ok(RemoteResult::ok(Payload::Value(answer)))
        }
    }

    fn fill(value: &str) -> ActionIntent {
        ActionIntent::Fill {
            target: "#email".into(),
            value: value.into(),
        }
    }

    fn polling_verifier(timeout_ms: u64) -> Verifier {
        Verifier::new(&ExecutionConfig {
            navigation_timeout_ms: timeout_ms,
            navigation_poll_ms: 5,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_fill_matches_exactly() {
        let page = ScriptedPage::new(vec![json!("{\"count\":1,\"value\":\"user@example.com\"}")]);
        let verifier = Verifier::default();
        assert!(verifier.verify(&fill("user@example.com"), &page).await.unwrap().passed());

        let verdict = verifier.verify(&fill("User@example.com"), &page).await.unwrap();
        assert!(matches!(verdict, Verdict::WrongValue { .. }));
    }

    #[tokio::test]
    async fn test_multiple_matches_are_ambiguous_not_wrong() {
        let page = ScriptedPage::new(vec![json!({"count": 2})]);
        let verdict = Verifier::default().verify(&fill("x"), &page).await.unwrap();
        assert_eq!(
            verdict.to_error().unwrap().kind,
            ErrorKind::AmbiguousTarget
        );
    }

    #[tokio::test]
    async fn test_verification_is_repeatable() {
        let page = ScriptedPage::new(vec![json!({"count": 1, "value": ""})]);
        let verifier = Verifier::default();
        let first = verifier.verify(&fill("secret"), &page).await.unwrap();
        let second = verifier.verify(&fill("secret"), &page).await.unwrap();
        assert_eq!(first, second);
        assert!(!first.passed());
    }

    #[tokio::test]
    async fn test_click_without_navigation_trusts_bridge() {
        let page = ScriptedPage::new(vec![Value::Null]);
        let intent = ActionIntent::Click {
            target: "#ok".into(),
            navigates_to: None,
        };
        assert!(Verifier::default().verify(&intent, &page).await.unwrap().passed());
        assert_eq!(*page.evaluations.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_click_navigation_polls_until_url_changes() {
        let page = ScriptedPage::new(vec![
            json!("https://app.test/login"),
            json!("https://app.test/login"),
            json!("https://app.test/dashboard"),
        ]);
        let intent = ActionIntent::Click {
            target: "#submit".into(),
            navigates_to: Some("/dashboard".into()),
        };
        let verdict = polling_verifier(5_000).verify(&intent, &page).await.unwrap();
        assert!(verdict.passed());
        assert_eq!(*page.evaluations.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_click_navigation_times_out() {
        let page = ScriptedPage::new(vec![json!("https://app.test/login")]);
        let intent = ActionIntent::Click {
            target: "#submit".into(),
            navigates_to: Some("/dashboard".into()),
        };
        let verdict = polling_verifier(30).verify(&intent, &page).await.unwrap();
        assert!(matches!(verdict, Verdict::NotNavigated { .. }));
        assert_eq!(
            verdict.to_error().unwrap().kind,
            ErrorKind::VerificationFailed
        );
    }

    #[tokio::test]
    async fn test_conditions() {
        let verifier = Verifier::default();
        let present = ScriptedPage::new(vec![json!({"count": 1})]);
        let absent = ScriptedPage::new(vec![json!({"count": 0})]);
        let exists = ConditionCheck::ElementExists {
            selector: "#banner".into(),
        };
        let gone = ConditionCheck::ElementAbsent {
            selector: "#banner".into(),
        };

        assert!(verifier.check_condition(&exists, &present).await.unwrap());
        assert!(!verifier.check_condition(&exists, &absent).await.unwrap());
        assert!(verifier.check_condition(&gone, &absent).await.unwrap());

        let text = ScriptedPage::new(vec![json!("{\"present\":true}")]);
        let check = ConditionCheck::TextPresent {
            text: "Welcome".into(),
        };
        assert!(verifier.check_condition(&check, &text).await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_condition_selector_reads_false() {
        let page = ScriptedPage::new(vec![json!({"count": 0, "error": "SyntaxError"})]);
        let verifier = Verifier::default();
        let exists = ConditionCheck::ElementExists {
            selector: "##".into(),
        };
        let absent = ConditionCheck::ElementAbsent {
            selector: "##".into(),
        };
        assert!(!verifier.check_condition(&exists, &page).await.unwrap());
        assert!(!verifier.check_condition(&absent, &page).await.unwrap());
    }
}
