use super::{Bridge, decode_response, timeout_from_config};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use uiflow_common::config::BridgeConfig;
use uiflow_common::error::TransportError;
use uiflow_common::protocol::{BridgeResponse, Operation, Payload, RemoteCall, RemoteResult};

/// Longest response body quoted back in a status error.
const BODY_EXCERPT: usize = 200;

/// Bridge client speaking JSON over HTTP to a local bridge service.
pub struct HttpBridge {
    client: reqwest::Client,
    base_url: String,
    config: BridgeConfig,
}

impl HttpBridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            config,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn classify(&self, operation: Operation, timeout: Duration, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout {
                operation,
                timeout_ms: timeout.as_millis() as u64,
            }
        } else if err.is_decode() {
            TransportError::Malformed {
                operation,
                reason: err.to_string(),
            }
        } else {
            TransportError::Unreachable {
                url: self.base_url.clone(),
                reason: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl Bridge for HttpBridge {
    async fn call(&self, call: RemoteCall) -> Result<RemoteResult, TransportError> {
        let operation = call.operation();
        let url = format!("{}/{}", self.base_url, operation.endpoint());

        let request = if operation == Operation::Health {
            self.client.get(&url)
        } else {
            self.client.post(&url).json(call.parameters())
        };

        let response = request
            .timeout(call.timeout())
            .send()
            .await
            .map_err(|e| self.classify(operation, call.timeout(), e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.classify(operation, call.timeout(), e))?;
        debug!(%operation, status = status.as_u16(), bytes = body.len(), "bridge response");

        if operation == Operation::Health {
            return if status.is_success() {
                Ok(RemoteResult::ok(Payload::None))
            } else {
                Err(TransportError::Status {
                    operation,
                    status: status.as_u16(),
                    body: excerpt(&body),
                })
            };
        }

        match serde_json::from_str::<BridgeResponse>(&body) {
            Ok(parsed) if status.is_success() => decode_response(operation, parsed),
            // A bridge that answers an error status with a well-formed
            // failure body is reporting an ordinary remote failure.
            Ok(parsed) if !parsed.success && parsed.error.is_some() => {
                decode_response(operation, parsed)
            }
            Ok(_) => Err(TransportError::Status {
                operation,
                status: status.as_u16(),
                body: excerpt(&body),
            }),
            Err(_) if !status.is_success() => Err(TransportError::Status {
                operation,
                status: status.as_u16(),
                body: excerpt(&body),
            }),
            Err(e) => Err(TransportError::Malformed {
                operation,
                reason: e.to_string(),
            }),
        }
    }

    fn timeout_for(&self, operation: Operation) -> Duration {
        timeout_from_config(&self.config, operation)
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT).collect()
}
