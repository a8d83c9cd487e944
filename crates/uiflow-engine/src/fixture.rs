//! Test cases handed over by the generator, as YAML or JSON files.

use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;
use uiflow_common::model::TestCase;

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("Failed to read test case: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse test case YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Failed to parse test case JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid test case: {0}")]
    Invalid(String),
}

pub async fn load_test_case(path: &Path) -> Result<TestCase, FixtureError> {
    let content = tokio::fs::read_to_string(path).await?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let case: TestCase = if is_json {
        serde_json::from_str(&content)?
    } else {
        serde_yaml::from_str(&content)?
    };
    validate(&case)?;
    Ok(case)
}

/// Structural checks only. Selectors and URLs stay untrusted until they
/// meet the page.
pub fn validate(case: &TestCase) -> Result<(), FixtureError> {
    if case.id.trim().is_empty() {
        return Err(FixtureError::Invalid("test case id is empty".into()));
    }
    if case.id.contains(['/', '\\']) || case.id.contains("..") {
        return Err(FixtureError::Invalid(format!(
            "test case id {:?} must not contain path separators or '..'",
            case.id
        )));
    }
    if case.steps.is_empty() {
        return Err(FixtureError::Invalid(format!(
            "test case {} has no steps",
            case.id
        )));
    }
    let mut seen = BTreeSet::new();
    for step in &case.steps {
        if !seen.insert(step.index) {
            return Err(FixtureError::Invalid(format!(
                "step index {} appears more than once",
                step.index
            )));
        }
        if step.intent.target().trim().is_empty() {
            return Err(FixtureError::Invalid(format!(
                "step {} has an empty target",
                step.index
            )));
        }
    }
    Ok(())
}
