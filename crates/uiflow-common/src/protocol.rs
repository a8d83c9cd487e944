use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Longest parameter value rendered in a call summary before eliding.
const SUMMARY_VALUE_LIMIT: usize = 40;
/// Longest full call summary.
const SUMMARY_LIMIT: usize = 120;

/// Primitive operations understood by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Health,
    Connect,
    Navigate,
    Click,
    Fill,
    Type,
    Screenshot,
    ReadText,
    EvaluateScript,
    WaitFor,
    Disconnect,
}

/// Which timeout budget an operation draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
    /// May trigger navigation or rendering.
    Action,
    /// Simple reads against the current page.
    Read,
    /// Health checks and teardown.
    Control,
}

impl Operation {
    /// Path segment on the bridge service.
    pub fn endpoint(&self) -> &'static str {
        match self {
            Operation::Health => "health",
            Operation::Connect => "connect",
            Operation::Navigate => "navigate",
            Operation::Click => "click",
            Operation::Fill => "fill",
            Operation::Type => "type",
            Operation::Screenshot => "screenshot",
            Operation::ReadText => "get_text",
            Operation::EvaluateScript => "evaluate",
            Operation::WaitFor => "wait_for",
            Operation::Disconnect => "disconnect",
        }
    }

    pub fn timeout_class(&self) -> TimeoutClass {
        match self {
            Operation::Connect
            | Operation::Navigate
            | Operation::Click
            | Operation::Fill
            | Operation::Type
            | Operation::Screenshot => TimeoutClass::Action,
            Operation::ReadText | Operation::EvaluateScript | Operation::WaitFor => {
                TimeoutClass::Read
            }
            Operation::Health | Operation::Disconnect => TimeoutClass::Control,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.endpoint())
    }
}

/// One request to the bridge. Built once, then only read.
#[derive(Debug, Clone)]
pub struct RemoteCall {
    operation: Operation,
    parameters: BTreeMap<String, Value>,
    issued_at: DateTime<Utc>,
    timeout: Duration,
}

impl RemoteCall {
    pub fn new(operation: Operation, timeout: Duration) -> Self {
        Self {
            operation,
            parameters: BTreeMap::new(),
            issued_at: Utc::now(),
            timeout,
        }
    }

    /// Adds a parameter. Only usable while the call is still being built.
    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn parameters(&self) -> &BTreeMap<String, Value> {
        &self.parameters
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Short, log-safe rendering of the parameters.
    pub fn summary(&self) -> String {
        let parts: Vec<String> = self
            .parameters
            .iter()
            .map(|(k, v)| {
                let rendered = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                format!("{}={}", k, truncate(&rendered, SUMMARY_VALUE_LIMIT))
            })
            .collect();
        truncate(&parts.join(" "), SUMMARY_LIMIT)
    }
}

fn truncate(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        return s.to_string();
    }
    let cut: String = s.chars().take(limit).collect();
    format!("{}…", cut)
}

// ============================================================
// Wire format
// ============================================================

/// Raw JSON body returned by the bridge for every POST endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pids: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentItem {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(
        rename = "mimeType",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub mime_type: Option<String>,
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".into(),
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn image(base64_data: impl Into<String>) -> Self {
        Self {
            kind: "image".into(),
            data: Some(base64_data.into()),
            mime_type: Some("image/png".into()),
            ..Default::default()
        }
    }
}

/// Bridges report their catalog either as bare names or as tool objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolEntry {
    Name(String),
    Described { name: String },
}

impl ToolEntry {
    pub fn name(&self) -> &str {
        match self {
            ToolEntry::Name(n) => n,
            ToolEntry::Described { name } => name,
        }
    }
}

// ============================================================
// Decoded results
// ============================================================

/// Result of one bridge call. `succeeded` is the remote tool's own claim.
#[derive(Debug, Clone)]
pub struct RemoteResult {
    pub succeeded: bool,
    pub payload: Payload,
    pub error_message: Option<String>,
    pub error_detail: Option<String>,
}

impl RemoteResult {
    pub fn ok(payload: Payload) -> Self {
        Self {
            succeeded: true,
            payload,
            error_message: None,
            error_detail: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            payload: Payload::None,
            error_message: Some(message.into()),
            error_detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.error_detail = Some(detail.into());
        self
    }

    /// Error message, or a generic one naming the operation.
    pub fn error_or(&self, operation: Operation) -> String {
        self.error_message
            .clone()
            .unwrap_or_else(|| format!("{} failed", operation))
    }
}

/// Operation-specific payloads, decoded at the bridge boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    None,
    Navigate(NavigateResult),
    Text(String),
    Screenshot(ScreenshotResult),
    Value(Value),
    Catalog(ToolCatalog),
}

impl Payload {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(t) => Some(t),
            Payload::Value(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Payload::Value(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NavigateResult {
    /// Final URL, when the bridge reports one.
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScreenshotResult {
    pub bytes: Option<Vec<u8>>,
    pub saved_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolCatalog {
    pub tools: BTreeSet<String>,
    pub pids: BTreeSet<u32>,
}
