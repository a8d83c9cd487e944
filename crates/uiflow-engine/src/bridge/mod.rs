mod decode;
mod http;

pub use decode::decode_response;
pub use http::HttpBridge;

use crate::script;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uiflow_common::config::BridgeConfig;
use uiflow_common::error::TransportError;
use uiflow_common::protocol::{Operation, RemoteCall, RemoteResult, TimeoutClass};

/// The Bridge trait is the one interface the engine uses to drive a browser.
///
/// Implementors only provide `call`. Everything else is built on top of it,
/// so an in-memory bridge in tests behaves exactly like the HTTP one from
/// the engine's point of view.
#[async_trait]
pub trait Bridge: Send + Sync {
    /// Dispatch a single call. Ordinary remote failures come back as
    /// `RemoteResult { succeeded: false, .. }`; only a broken transport is
    /// an `Err`.
    async fn call(&self, call: RemoteCall) -> Result<RemoteResult, TransportError>;

    /// Timeout budget for an operation.
    fn timeout_for(&self, operation: Operation) -> Duration {
        timeout_from_config(&BridgeConfig::default(), operation)
    }

    /// `call` wrapped in before/after logging.
    async fn send(&self, call: RemoteCall) -> Result<RemoteResult, TransportError> {
        let operation = call.operation();
        let summary = match call.param_str("code").and_then(script::describe) {
            Some(described) => format!("script={}", described),
            None => call.summary(),
        };
        info!(%operation, params = %summary, "bridge call");

        let started = Instant::now();
        let result = self.call(call).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(r) if r.succeeded => info!(%operation, elapsed_ms, "bridge call succeeded"),
            Ok(r) => info!(
                %operation,
                elapsed_ms,
                error = r.error_message.as_deref().unwrap_or(""),
                "bridge call failed"
            ),
            Err(e) => warn!(%operation, elapsed_ms, error = %e, "bridge transport error"),
        }
        result
    }

    fn request(&self, operation: Operation) -> RemoteCall {
        RemoteCall::new(operation, self.timeout_for(operation))
    }

    async fn health(&self) -> Result<RemoteResult, TransportError> {
        self.send(self.request(Operation::Health)).await
    }

    /// Opens the browser session and returns the tool catalog.
    async fn connect(&self) -> Result<RemoteResult, TransportError> {
        self.send(self.request(Operation::Connect)).await
    }

    async fn navigate(&self, url: &str) -> Result<RemoteResult, TransportError> {
        self.send(self.request(Operation::Navigate).with_param("url", url))
            .await
    }

    async fn click(&self, selector: &str) -> Result<RemoteResult, TransportError> {
        self.send(self.request(Operation::Click).with_param("selector", selector))
            .await
    }

    async fn fill(&self, selector: &str, text: &str) -> Result<RemoteResult, TransportError> {
        self.send(
            self.request(Operation::Fill)
                .with_param("selector", selector)
                .with_param("text", text),
        )
        .await
    }

    /// Types `text` one key at a time.
    async fn type_text(&self, selector: &str, text: &str) -> Result<RemoteResult, TransportError> {
        self.send(
            self.request(Operation::Type)
                .with_param("selector", selector)
                .with_param("text", text),
        )
        .await
    }

    async fn screenshot(&self, name: &str, full_page: bool) -> Result<RemoteResult, TransportError> {
        self.send(
            self.request(Operation::Screenshot)
                .with_param("name", name)
                .with_param("savePng", true)
                .with_param("fullPage", full_page),
        )
        .await
    }

    async fn read_text(&self, selector: &str) -> Result<RemoteResult, TransportError> {
        self.send(self.request(Operation::ReadText).with_param("selector", selector))
            .await
    }

    async fn evaluate(&self, code: &str) -> Result<RemoteResult, TransportError> {
        let timeout_ms = self.timeout_for(Operation::EvaluateScript).as_millis() as u64;
        self.send(
            self.request(Operation::EvaluateScript)
                .with_param("code", code)
                .with_param("timeout", timeout_ms),
        )
        .await
    }

    async fn wait_for(&self, selector: &str, timeout_ms: u64) -> Result<RemoteResult, TransportError> {
        self.send(
            self.request(Operation::WaitFor)
                .with_param("selector", selector)
                .with_param("timeout", timeout_ms),
        )
        .await
    }

    async fn disconnect(&self) -> Result<RemoteResult, TransportError> {
        self.send(self.request(Operation::Disconnect)).await
    }
}

pub fn timeout_from_config(config: &BridgeConfig, operation: Operation) -> Duration {
    match operation.timeout_class() {
        TimeoutClass::Action => config.action_timeout(),
        TimeoutClass::Read => config.read_timeout(),
        TimeoutClass::Control => config.control_timeout(),
    }
}

#[async_trait]
impl<B: Bridge + ?Sized> Bridge for std::sync::Arc<B> {
    async fn call(&self, call: RemoteCall) -> Result<RemoteResult, TransportError> {
        (**self).call(call).await
    }

    fn timeout_for(&self, operation: Operation) -> Duration {
        (**self).timeout_for(operation)
    }
}
