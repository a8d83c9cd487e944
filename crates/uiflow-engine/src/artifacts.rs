use crate::bridge::Bridge;
use crate::script;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uiflow_common::config::ScreenshotConfig;
use uiflow_common::error::TransportError;
use uiflow_common::protocol::{Operation, Payload, ScreenshotResult};
use uuid::Uuid;

const SLUG_LIMIT: usize = 50;

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s-]").unwrap());
static SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[-\s]+").unwrap());
static UNSAFE_PATH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]+").unwrap());

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Screenshot request failed: {0}")]
    Remote(String),
    #[error("Bridge returned no screenshot data and none was found on disk")]
    Missing,
    #[error("Failed to write screenshot: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Lowercased, underscore-separated, filesystem-safe form of a description.
pub fn slugify(description: &str) -> String {
    let stripped = NON_WORD.replace_all(description, "");
    let joined = SEPARATORS.replace_all(stripped.trim(), "_").to_lowercase();
    let capped: String = joined.chars().take(SLUG_LIMIT).collect();
    capped.trim_matches('_').to_string()
}

/// Test-case id reduced to one path component: no separators, no dots.
fn case_component(test_case_id: &str) -> String {
    UNSAFE_PATH
        .replace_all(test_case_id, "_")
        .trim_matches('_')
        .to_string()
}

/// Where a run's screenshots go:
/// `<root>/execution_<run>/TC<case>/step_<NN>_<slug>.png`.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    case_dir: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: &Path, run_id: Uuid, test_case_id: &str) -> Self {
        Self {
            case_dir: root
                .join(format!("execution_{}", run_id))
                .join(format!("TC{}", case_component(test_case_id))),
        }
    }

    pub fn case_dir(&self) -> &Path {
        &self.case_dir
    }

    pub fn step_path(&self, step_index: u32, description: &str) -> PathBuf {
        let slug = slugify(description);
        let name = if slug.is_empty() {
            format!("step_{:02}.png", step_index)
        } else {
            format!("step_{:02}_{}.png", step_index, slug)
        };
        self.case_dir.join(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureOutcome {
    pub path: PathBuf,
    pub bytes: u64,
    /// The first capture looked blank and was taken again.
    pub retried: bool,
}

/// Takes step screenshots through the bridge and stores them on disk.
#[derive(Debug, Clone)]
pub struct ScreenshotCapture {
    config: ScreenshotConfig,
}

impl ScreenshotCapture {
    pub fn new(config: ScreenshotConfig) -> Self {
        Self { config }
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn capture_skipped(&self) -> bool {
        self.config.capture_skipped
    }

    pub async fn capture<B: Bridge + ?Sized>(
        &self,
        bridge: &B,
        path: &Path,
    ) -> Result<CaptureOutcome, ArtifactError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        self.wait_page_ready(bridge).await?;
        let bytes = self.capture_once(bridge, path).await?;
        if bytes >= self.config.min_bytes {
            return Ok(CaptureOutcome {
                path: path.to_path_buf(),
                bytes,
                retried: false,
            });
        }

        warn!(
            path = %path.display(),
            bytes,
            min_bytes = self.config.min_bytes,
            "screenshot looks blank, retrying once"
        );
        sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
        let bytes = match self.capture_once(bridge, path).await {
            Ok(bytes) => bytes,
            // Keep the first artifact if the retry itself fails.
            Err(err) => {
                warn!(error = %err, "screenshot retry failed");
                file_size(path).await?
            }
        };
        Ok(CaptureOutcome {
            path: path.to_path_buf(),
            bytes,
            retried: true,
        })
    }

    /// Best-effort wait for `document.readyState == "complete"`.
    async fn wait_page_ready<B: Bridge + ?Sized>(&self, bridge: &B) -> Result<(), TransportError> {
        let result = bridge
            .evaluate(&script::ready_state(self.config.page_ready_timeout_ms))
            .await?;
        let state = result.payload.as_text().unwrap_or("unknown");
        if state != "complete" {
            debug!(state, "page not fully loaded, capturing anyway");
        }
        Ok(())
    }

    async fn capture_once<B: Bridge + ?Sized>(
        &self,
        bridge: &B,
        path: &Path,
    ) -> Result<u64, ArtifactError> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("screenshot")
            .to_string();
        let result = bridge.screenshot(&stem, self.config.full_page).await?;
        if !result.succeeded {
            return Err(ArtifactError::Remote(result.error_or(Operation::Screenshot)));
        }
        let shot = match result.payload {
            Payload::Screenshot(shot) => shot,
            _ => ScreenshotResult::default(),
        };

        if let Some(bytes) = shot.bytes.filter(|b| !b.is_empty()) {
            tokio::fs::write(path, &bytes).await?;
        } else if let Some(saved) = shot.saved_path.filter(|p| p.is_file()) {
            tokio::fs::copy(&saved, path).await?;
        } else if let Some(found) = self.recover(&stem) {
            info!(from = %found.display(), "recovered screenshot from bridge download dir");
            tokio::fs::copy(&found, path).await?;
        } else {
            return Err(ArtifactError::Missing);
        }
        file_size(path).await
    }

    /// Newest `<stem>-*.png` in the recovery dirs that is recent enough.
    fn recover(&self, stem: &str) -> Option<PathBuf> {
        let max_age = Duration::from_secs(self.config.recovery_max_age_secs);
        let now = SystemTime::now();

        self.config
            .recovery_dirs
            .iter()
            .filter_map(|dir| {
                let pattern = dir.join(format!("{}-*.png", glob::Pattern::escape(stem)));
                glob::glob(pattern.to_str()?).ok()
            })
            .flatten()
            .filter_map(Result::ok)
            .filter_map(|p| {
                let modified = p.metadata().ok()?.modified().ok()?;
                let age = now.duration_since(modified).unwrap_or_default();
                (age <= max_age).then_some((modified, p))
            })
            .max_by_key(|(modified, _)| *modified)
            .map(|(_, p)| p)
    }
}

async fn file_size(path: &Path) -> Result<u64, ArtifactError> {
    Ok(tokio::fs::metadata(path).await?.len())
}
