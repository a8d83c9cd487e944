use crate::model::{IntentKind, StrategyId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UiflowConfig {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub screenshots: ScreenshotConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub otp: OtpConfig,
    /// Per-kind overrides of the fallback order.
    #[serde(default)]
    pub strategies: BTreeMap<IntentKind, Vec<StrategyId>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bridge_url")]
    pub url: String,
    #[serde(default = "default_action_timeout_ms")]
    pub action_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_control_timeout_ms")]
    pub control_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: default_bridge_url(),
            action_timeout_ms: default_action_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            control_timeout_ms: default_control_timeout_ms(),
        }
    }
}

fn default_bridge_url() -> String {
    "http://localhost:3001".to_string()
}

fn default_action_timeout_ms() -> u64 {
    180_000
}

fn default_read_timeout_ms() -> u64 {
    30_000
}

fn default_control_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Pause after each strategy attempt before reading the page back.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// How long a click that should navigate may take to change the URL.
    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,
    #[serde(default = "default_navigation_poll_ms")]
    pub navigation_poll_ms: u64,
    /// Timeout handed to the bridge when waiting for an element to appear.
    #[serde(default = "default_wait_for_element_ms")]
    pub wait_for_element_ms: u64,
    /// Consecutive transport failures after which the session is declared
    /// dead.
    #[serde(default = "default_session_dead_after")]
    pub session_dead_after: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            navigation_timeout_ms: default_navigation_timeout_ms(),
            navigation_poll_ms: default_navigation_poll_ms(),
            wait_for_element_ms: default_wait_for_element_ms(),
            session_dead_after: default_session_dead_after(),
        }
    }
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_navigation_timeout_ms() -> u64 {
    10_000
}

fn default_navigation_poll_ms() -> u64 {
    250
}

fn default_wait_for_element_ms() -> u64 {
    10_000
}

fn default_session_dead_after() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotConfig {
    #[serde(default = "default_screenshot_root")]
    pub root: PathBuf,
    /// Artifacts smaller than this are assumed blank and recaptured once.
    #[serde(default = "default_min_bytes")]
    pub min_bytes: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_true")]
    pub full_page: bool,
    #[serde(default)]
    pub capture_skipped: bool,
    /// Upper bound for the document-ready wait before capturing.
    #[serde(default = "default_page_ready_timeout_ms")]
    pub page_ready_timeout_ms: u64,
    /// Directories where the bridge may drop `<name>-<timestamp>.png` files.
    #[serde(default = "default_recovery_dirs")]
    pub recovery_dirs: Vec<PathBuf>,
    /// Recovered files older than this are ignored.
    #[serde(default = "default_recovery_max_age_secs")]
    pub recovery_max_age_secs: u64,
}

impl Default for ScreenshotConfig {
    fn default() -> Self {
        Self {
            root: default_screenshot_root(),
            min_bytes: default_min_bytes(),
            retry_delay_ms: default_retry_delay_ms(),
            full_page: true,
            capture_skipped: false,
            page_ready_timeout_ms: default_page_ready_timeout_ms(),
            recovery_dirs: default_recovery_dirs(),
            recovery_max_age_secs: default_recovery_max_age_secs(),
        }
    }
}

fn default_screenshot_root() -> PathBuf {
    PathBuf::from("screenshots")
}

fn default_min_bytes() -> u64 {
    5_000
}

fn default_retry_delay_ms() -> u64 {
    1_500
}

fn default_true() -> bool {
    true
}

fn default_page_ready_timeout_ms() -> u64 {
    15_000
}

fn default_recovery_dirs() -> Vec<PathBuf> {
    Vec::new()
}

fn default_recovery_max_age_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Command that starts the bridge, when this process should own it.
    #[serde(default)]
    pub bridge_command: Option<Vec<String>>,
    /// Bound on health check + connect during acquire.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// How long terminated processes get before being killed.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    /// Command-line patterns (regex) that identify browser/automation
    /// processes for the orphan sweep.
    #[serde(default = "default_process_patterns")]
    pub process_patterns: Vec<String>,
    #[serde(default = "default_orphan_max_age_secs")]
    pub orphan_max_age_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bridge_command: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            grace_period_ms: default_grace_period_ms(),
            process_patterns: default_process_patterns(),
            orphan_max_age_secs: default_orphan_max_age_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    30_000
}

fn default_grace_period_ms() -> u64 {
    5_000
}

fn default_process_patterns() -> Vec<String> {
    vec![
        r"playwright-mcp-server".to_string(),
        r"ms-playwright/chromium".to_string(),
        r"chrome.*--remote-debugging".to_string(),
    ]
}

fn default_orphan_max_age_secs() -> u64 {
    3_600
}

fn default_sweep_interval_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpConfig {
    /// Environment variable consulted when a step carries no secret.
    #[serde(default = "default_secret_env")]
    pub secret_env: String,
    #[serde(default = "default_digits")]
    pub digits: usize,
    #[serde(default = "default_step_secs")]
    pub step_secs: u64,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            secret_env: default_secret_env(),
            digits: default_digits(),
            step_secs: default_step_secs(),
        }
    }
}

fn default_secret_env() -> String {
    "TOTP_SECRET_KEY".to_string()
}

fn default_digits() -> usize {
    6
}

fn default_step_secs() -> u64 {
    30
}

impl BridgeConfig {
    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }
}

impl ExecutionConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn navigation_poll(&self) -> Duration {
        Duration::from_millis(self.navigation_poll_ms.max(1))
    }
}
