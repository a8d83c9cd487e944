#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use uiflow_engine::bridge::Bridge;
use uiflow_engine::config::UiflowConfig;
use uiflow_engine::error::TransportError;
use uiflow_engine::model::{ActionIntent, StepDefinition};
use uiflow_engine::protocol::{
    NavigateResult, Operation, Payload, RemoteCall, RemoteResult, ScreenshotResult, ToolCatalog,
};
use uiflow_engine::script::{self, ScriptCall};

pub const SCREENSHOT_BYTES: usize = 6_000;

#[derive(Debug, Clone)]
pub struct Recorded {
    pub operation: Operation,
    pub params: BTreeMap<String, Value>,
    pub script: Option<ScriptCall>,
}

impl Recorded {
    pub fn mentions(&self, needle: &str) -> bool {
        self.params.values().any(|v| v.to_string().contains(needle))
    }
}

/// In-memory page the fake bridge acts on.
#[derive(Debug, Default)]
pub struct Page {
    pub url: String,
    /// Form fields by selector.
    pub fields: HashMap<String, String>,
    /// Element text by selector.
    pub texts: HashMap<String, String>,
    /// Clickable elements and the URL a click leads to (empty: stays).
    pub buttons: HashMap<String, String>,
    /// Overrides the element count for a selector.
    pub counts: HashMap<String, usize>,
    pub body_text: String,
    /// This many fill/type calls report success but change nothing.
    pub swallow_fills: usize,
    /// Operations that report `success: false`.
    pub failing: BTreeSet<Operation>,
    /// Script names that report `success: false`.
    pub failing_scripts: BTreeSet<String>,
    /// Sizes of successive screenshots; the last one repeats.
    pub screenshot_sizes: Vec<usize>,
    pub tools: Vec<String>,
    pub pids: Vec<u32>,
}

impl Page {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            tools: vec!["playwright_navigate".into(), "playwright_fill".into()],
            ..Default::default()
        }
    }

    pub fn with_field(mut self, selector: &str, value: &str) -> Self {
        self.fields.insert(selector.into(), value.into());
        self
    }

    pub fn with_button(mut self, selector: &str, leads_to: &str) -> Self {
        self.buttons.insert(selector.into(), leads_to.into());
        self
    }

    pub fn with_text(mut self, selector: &str, text: &str) -> Self {
        self.texts.insert(selector.into(), text.into());
        self
    }

    fn count(&self, selector: &str) -> usize {
        if let Some(n) = self.counts.get(selector) {
            return *n;
        }
        let known = self.fields.contains_key(selector)
            || self.texts.contains_key(selector)
            || self.buttons.contains_key(selector);
        usize::from(known)
    }

    fn click(&mut self, selector: &str) {
        if let Some(target) = self.buttons.get(selector).filter(|u| !u.is_empty()) {
            self.url = target.clone();
        }
    }

    fn next_screenshot_size(&mut self) -> usize {
        match self.screenshot_sizes.len() {
            0 => SCREENSHOT_BYTES,
            1 => self.screenshot_sizes[0],
            _ => self.screenshot_sizes.remove(0),
        }
    }

    fn evaluate(&mut self, script: Option<ScriptCall>) -> RemoteResult {
        let Some(script) = script else {
            return RemoteResult::ok(Payload::Value(Value::Null));
        };
        if self.failing_scripts.contains(&script.name) {
            return RemoteResult::failed(format!("{} threw", script.name));
        }
        let arg = |key: &str| {
            script
                .args
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let selector = arg("selector");
        let n = self.count(&selector);

        let answer = match script.name.as_str() {
            "read_field" if n == 1 => json!({
                "count": 1,
                "value": self.fields.get(&selector).cloned().unwrap_or_default()
            }),
            "focus_clear" if n == 1 => {
                self.fields.insert(selector, String::new());
                json!({"count": 1})
            }
            "assign_value" if n == 1 => {
                self.fields.insert(selector, arg("value"));
                json!({"count": 1})
            }
            "click" if n == 1 => {
                self.click(&selector);
                json!({"count": 1})
            }
            "read_field" | "focus_clear" | "assign_value" | "click" | "count" => {
                json!({"count": n})
            }
            "location" => return RemoteResult::ok(Payload::Value(json!(self.url))),
            "text_present" => json!({"present": self.body_text.contains(&arg("text"))}),
            "ready_state" => return RemoteResult::ok(Payload::Value(json!("complete"))),
            other => panic!("fake page does not know script {}", other),
        };
        // The HTTP bridge hands JSON.stringify results back as strings.
        RemoteResult::ok(Payload::Value(Value::String(answer.to_string())))
    }
}

/// Bridge double that records every call and acts on a `Page`.
pub struct FakeBridge {
    page: Mutex<Page>,
    calls: Mutex<Vec<Recorded>>,
    down: AtomicBool,
    disconnects: AtomicUsize,
}

impl FakeBridge {
    pub fn new(page: Page) -> Self {
        Self {
            page: Mutex::new(page),
            calls: Mutex::new(Vec::new()),
            down: AtomicBool::new(false),
            disconnects: AtomicUsize::new(0),
        }
    }

    /// Makes every following call fail at the transport level.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn with_page<T>(&self, f: impl FnOnce(&mut Page) -> T) -> T {
        f(&mut self.page.lock().unwrap())
    }

    pub fn field(&self, selector: &str) -> Option<String> {
        self.with_page(|p| p.fields.get(selector).cloned())
    }

    pub fn calls(&self) -> Vec<Recorded> {
        self.calls.lock().unwrap().clone()
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.calls().iter().map(|c| c.operation).collect()
    }

    pub fn scripts(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| c.script.as_ref().map(|s| s.name.clone()))
            .collect()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Bridge for FakeBridge {
    async fn call(&self, call: RemoteCall) -> Result<RemoteResult, TransportError> {
        let operation = call.operation();
        let script = call.param_str("code").and_then(script::describe);
        self.calls.lock().unwrap().push(Recorded {
            operation,
            params: call.parameters().clone(),
            script: script.clone(),
        });
        if operation == Operation::Disconnect {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable {
                url: "http://fake-bridge".into(),
                reason: "connection refused".into(),
            });
        }

        let mut page = self.page.lock().unwrap();
        if page.failing.contains(&operation) {
            return Ok(RemoteResult::failed(format!("{} failed on fake page", operation)));
        }
        let selector = call.param_str("selector").unwrap_or_default().to_string();
        let text = call.param_str("text").unwrap_or_default().to_string();

        let result = match operation {
            Operation::Health | Operation::Disconnect => RemoteResult::ok(Payload::None),
            Operation::Connect => RemoteResult::ok(Payload::Catalog(ToolCatalog {
                tools: page.tools.iter().cloned().collect(),
                pids: page.pids.iter().copied().collect(),
            })),
            Operation::Navigate => {
                page.url = call.param_str("url").unwrap_or_default().to_string();
                RemoteResult::ok(Payload::Navigate(NavigateResult {
                    url: Some(page.url.clone()),
                }))
            }
            Operation::WaitFor if page.count(&selector) == 0 => {
                RemoteResult::failed(format!("Timeout waiting for selector {}", selector))
            }
            Operation::WaitFor => RemoteResult::ok(Payload::None),
            Operation::Click if page.count(&selector) != 1 => {
                RemoteResult::failed(format!("Element not found: {}", selector))
            }
            Operation::Click => {
                page.click(&selector);
                RemoteResult::ok(Payload::None)
            }
            Operation::Fill | Operation::Type if page.count(&selector) != 1 => {
                RemoteResult::failed(format!("Element not found: {}", selector))
            }
            Operation::Fill | Operation::Type => {
                if page.swallow_fills > 0 {
                    page.swallow_fills -= 1;
                } else {
                    page.fields.insert(selector, text);
                }
                RemoteResult::ok(Payload::None)
            }
            Operation::Screenshot => {
                let size = page.next_screenshot_size();
                RemoteResult::ok(Payload::Screenshot(ScreenshotResult {
                    bytes: Some(vec![0x89; size]),
                    saved_path: None,
                }))
            }
            Operation::ReadText => match page.texts.get(&selector) {
                Some(t) => RemoteResult::ok(Payload::Text(t.clone())),
                None => RemoteResult::failed(format!("Element not found: {}", selector)),
            },
            Operation::EvaluateScript => page.evaluate(script),
        };
        Ok(result)
    }
}

/// Defaults with every wait shortened for tests.
pub fn fast_config(screenshot_root: &Path) -> UiflowConfig {
    let mut config = UiflowConfig::default();
    config.execution.settle_delay_ms = 0;
    config.execution.navigation_timeout_ms = 50;
    config.execution.navigation_poll_ms = 5;
    config.execution.wait_for_element_ms = 100;
    config.screenshots.root = screenshot_root.to_path_buf();
    config.screenshots.retry_delay_ms = 0;
    config.screenshots.page_ready_timeout_ms = 100;
    config.session.grace_period_ms = 2_000;
    config.session.connect_timeout_ms = 2_000;
    config
}

pub fn step(index: u32, description: &str, intent: ActionIntent) -> StepDefinition {
    StepDefinition {
        index,
        description: description.to_string(),
        intent,
        is_conditional: false,
        condition_check: None,
    }
}

pub fn fill(target: &str, value: &str) -> ActionIntent {
    ActionIntent::Fill {
        target: target.into(),
        value: value.into(),
    }
}

pub fn click(target: &str) -> ActionIntent {
    ActionIntent::Click {
        target: target.into(),
        navigates_to: None,
    }
}

pub fn navigate(url: &str) -> ActionIntent {
    ActionIntent::Navigate {
        url: url.into(),
        expect_url: None,
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("uiflow_engine=debug")
        .try_init();
}
