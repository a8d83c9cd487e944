use regex::Regex;
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use totp_rs::{Algorithm, Secret, TOTP};
use uiflow_common::config::OtpConfig;

const ACCOUNT_LABEL: &str = "uiflow";

static LABELLED_SECRET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:secret\s+key|key)\s*:?\s+([A-Z2-7=]{16,})").expect("valid regex")
});
static BARE_SECRET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z2-7]{20,}=*)").expect("valid regex"));

#[derive(Debug, Error)]
pub enum OtpError {
    #[error("No one-time code secret: none on the step, in its description, or in ${0}")]
    MissingSecret(String),
    #[error("Invalid one-time code secret: {0}")]
    InvalidSecret(String),
}

/// Produces a one-time code for a secret at a given unix time.
pub trait CodeGenerator: Send + Sync {
    fn generate(&self, secret: &str, unix_time: u64) -> Result<String, OtpError>;
}

pub trait Clock: Send + Sync {
    fn unix_now(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_now(&self) -> u64 {
        chrono::Utc::now().timestamp().max(0) as u64
    }
}

/// RFC 6238 codes (SHA1).
#[derive(Debug, Clone)]
pub struct TotpGenerator {
    digits: usize,
    step: u64,
}

impl Default for TotpGenerator {
    fn default() -> Self {
        Self::new(&OtpConfig::default())
    }
}

impl TotpGenerator {
    pub fn new(config: &OtpConfig) -> Self {
        Self {
            digits: config.digits,
            step: config.step_secs,
        }
    }
}

impl CodeGenerator for TotpGenerator {
    fn generate(&self, secret: &str, unix_time: u64) -> Result<String, OtpError> {
        let normalized: String = secret
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| c.to_ascii_uppercase())
            .collect();
        let bytes = Secret::Encoded(normalized)
            .to_bytes()
            .map_err(|e| OtpError::InvalidSecret(e.to_string()))?;
        let totp = TOTP::new(
            Algorithm::SHA1,
            self.digits,
            1,
            self.step,
            bytes,
            None,
            ACCOUNT_LABEL.to_string(),
        )
        .map_err(|e| OtpError::InvalidSecret(e.to_string()))?;
        Ok(totp.generate(unix_time))
    }
}

/// Looks for a base32 secret embedded in free text such as
/// "Enter the code for secret key JBSWY3DPEHPK3PXP...".
pub fn secret_from_text(text: &str) -> Option<String> {
    LABELLED_SECRET
        .captures(text)
        .or_else(|| BARE_SECRET.captures(text))
        .map(|c| c[1].to_string())
}

/// Source of fresh one-time codes for fill steps.
#[derive(Clone)]
pub struct OneTimeCodes {
    generator: Arc<dyn CodeGenerator>,
    clock: Arc<dyn Clock>,
    secret_env: String,
}

impl OneTimeCodes {
    pub fn new(config: &OtpConfig) -> Self {
        Self::with_parts(
            Arc::new(TotpGenerator::new(config)),
            Arc::new(SystemClock),
            config.secret_env.clone(),
        )
    }

    pub fn with_parts(
        generator: Arc<dyn CodeGenerator>,
        clock: Arc<dyn Clock>,
        secret_env: impl Into<String>,
    ) -> Self {
        Self {
            generator,
            clock,
            secret_env: secret_env.into(),
        }
    }

    /// Explicit secret, then one named in the step description, then the
    /// environment.
    pub fn resolve_secret(
        &self,
        explicit: Option<&str>,
        description: &str,
    ) -> Result<String, OtpError> {
        if let Some(secret) = explicit.filter(|s| !s.trim().is_empty()) {
            return Ok(secret.to_string());
        }
        if let Some(secret) = secret_from_text(description) {
            return Ok(secret);
        }
        std::env::var(&self.secret_env)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| OtpError::MissingSecret(self.secret_env.clone()))
    }

    /// Generates a code for the current time. Never cached.
    pub fn fresh_code(&self, explicit: Option<&str>, description: &str) -> Result<String, OtpError> {
        let secret = self.resolve_secret(explicit, description)?;
        self.generator.generate(&secret, self.clock.unix_now())
    }
}
