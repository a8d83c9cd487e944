use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use std::path::PathBuf;
use uiflow_common::error::TransportError;
use uiflow_common::protocol::{
    BridgeResponse, ContentItem, NavigateResult, Operation, Payload, RemoteResult,
    ScreenshotResult, ToolCatalog,
};

/// Lines the bridge echoes around an evaluate result.
const EVALUATE_LABELS: &[&str] = &[
    "Executed JavaScript:",
    "Executed:",
    "Result:",
    "JavaScript executed",
];

const SAVED_TO_MARKER: &str = "saved to:";

/// Turns a raw bridge body into a typed result for `operation`.
pub fn decode_response(
    operation: Operation,
    response: BridgeResponse,
) -> Result<RemoteResult, TransportError> {
    if !response.success {
        let mut result = RemoteResult::failed(
            response
                .error
                .unwrap_or_else(|| format!("{} failed", operation)),
        );
        result.error_detail = response.error_detail;
        return Ok(result);
    }

    let payload = match operation {
        Operation::Connect => Payload::Catalog(ToolCatalog {
            tools: response.tools.iter().map(|t| t.name().to_string()).collect(),
            pids: response.pids.iter().copied().collect(),
        }),
        Operation::Navigate => Payload::Navigate(NavigateResult {
            url: response.url.or_else(|| navigated_url(&response.content)),
        }),
        Operation::ReadText => Payload::Text(
            texts(&response.content)
                .next()
                .unwrap_or_default()
                .to_string(),
        ),
        Operation::EvaluateScript => Payload::Value(evaluate_value(&response.content)),
        Operation::Screenshot => Payload::Screenshot(screenshot(operation, &response.content)?),
        Operation::Health
        | Operation::Click
        | Operation::Fill
        | Operation::Type
        | Operation::WaitFor
        | Operation::Disconnect => Payload::None,
    };
    Ok(RemoteResult::ok(payload))
}

fn texts(content: &[ContentItem]) -> impl Iterator<Item = &str> {
    content
        .iter()
        .filter(|c| c.kind == "text")
        .filter_map(|c| c.text.as_deref())
}

fn navigated_url(content: &[ContentItem]) -> Option<String> {
    texts(content).find_map(|t| {
        t.split_whitespace()
            .find(|w| w.starts_with("http://") || w.starts_with("https://"))
            .map(|w| w.trim_end_matches(['.', ',']).to_string())
    })
}

/// The value printed after `Result:`, else the last non-label line.
fn evaluate_value(content: &[ContentItem]) -> Value {
    let lines: Vec<&str> = texts(content).map(str::trim).collect();

    let after_label = lines
        .iter()
        .position(|l| *l == "Result:")
        .and_then(|i| lines.get(i + 1).copied());
    let raw = after_label.or_else(|| {
        lines
            .iter()
            .rev()
            .find(|l| !l.is_empty() && !EVALUATE_LABELS.contains(*l))
            .copied()
    });

    match raw {
        None => Value::Null,
        Some(raw) => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
    }
}

fn screenshot(
    operation: Operation,
    content: &[ContentItem],
) -> Result<ScreenshotResult, TransportError> {
    let mut result = ScreenshotResult::default();

    if let Some(data) = content
        .iter()
        .find(|c| c.kind == "image")
        .and_then(|c| c.data.as_deref())
    {
        let bytes = STANDARD
            .decode(data)
            .map_err(|e| TransportError::Malformed {
                operation,
                reason: format!("invalid base64 image: {}", e),
            })?;
        result.bytes = Some(bytes);
    }

    result.saved_path = texts(content).find_map(saved_path);
    Ok(result)
}

/// `Screenshot saved to: ../../../tmp/x.png` -> `/tmp/x.png`.
fn saved_path(text: &str) -> Option<PathBuf> {
    let lower = text.to_ascii_lowercase();
    let start = lower.find(SAVED_TO_MARKER)? + SAVED_TO_MARKER.len();
    let raw = text[start..].trim();
    if raw.is_empty() {
        return None;
    }
    let mut rest = raw;
    let mut climbed = false;
    while let Some(stripped) = rest.strip_prefix("../") {
        rest = stripped;
        climbed = true;
    }
    if climbed {
        Some(PathBuf::from(format!("/{}", rest)))
    } else {
        Some(PathBuf::from(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(content: Vec<ContentItem>) -> BridgeResponse {
        BridgeResponse {
            success: true,
            content,
            ..Default::default()
        }
    }

    #[test]
    fn test_failure_keeps_error_and_detail() {
        let resp = BridgeResponse {
            success: false,
            error: Some("Element not found".into()),
            error_detail: Some("#login".into()),
            ..Default::default()
        };
        let result = decode_response(Operation::Click, resp).unwrap();
        assert!(!result.succeeded);
        assert_eq!(result.error_message.as_deref(), Some("Element not found"));
        assert_eq!(result.error_detail.as_deref(), Some("#login"));
    }

    #[test]
    fn test_failure_without_message_names_operation() {
        let resp = BridgeResponse::default();
        let result = decode_response(Operation::Fill, resp).unwrap();
        assert_eq!(result.error_message.as_deref(), Some("fill failed"));
    }

    #[test]
    fn test_evaluate_takes_value_after_result_label() {
        let resp = response(vec![
            ContentItem::text("Executed JavaScript:"),
            ContentItem::text("document.title"),
            ContentItem::text("Result:"),
            ContentItem::text("{\"count\":1,\"value\":\"x\"}"),
        ]);
        let result = decode_response(Operation::EvaluateScript, resp).unwrap();
        assert_eq!(result.payload, Payload::Value(json!({"count": 1, "value": "x"})));
    }

    #[test]
    fn test_evaluate_unquotes_strings_and_keeps_raw_text() {
        let quoted = response(vec![ContentItem::text("\"complete\"")]);
        let result = decode_response(Operation::EvaluateScript, quoted).unwrap();
        assert_eq!(result.payload.as_text(), Some("complete"));

        let raw = response(vec![
            ContentItem::text("Executed JavaScript:"),
            ContentItem::text("https://example.com/home"),
        ]);
        let result = decode_response(Operation::EvaluateScript, raw).unwrap();
        assert_eq!(result.payload.as_text(), Some("https://example.com/home"));

        let empty = decode_response(Operation::EvaluateScript, response(vec![])).unwrap();
        assert_eq!(empty.payload, Payload::Value(Value::Null));
    }

    #[test]
    fn test_screenshot_decodes_image_and_saved_path() {
        let resp = response(vec![
            ContentItem::image(STANDARD.encode([0x89, b'P', b'N', b'G'])),
            ContentItem::text("Screenshot saved to: ../../../tmp/shots/step_01-2024.png"),
        ]);
        let result = decode_response(Operation::Screenshot, resp).unwrap();
        let Payload::Screenshot(shot) = result.payload else {
            panic!("expected screenshot payload");
        };
        assert_eq!(shot.bytes.as_deref(), Some(&[0x89, b'P', b'N', b'G'][..]));
        assert_eq!(
            shot.saved_path,
            Some(PathBuf::from("/tmp/shots/step_01-2024.png"))
        );
    }

    #[test]
    fn test_screenshot_with_bad_base64_is_malformed() {
        let resp = response(vec![ContentItem::image("!!not base64!!")]);
        let err = decode_response(Operation::Screenshot, resp).unwrap_err();
        assert!(matches!(err, TransportError::Malformed { .. }));
    }

    #[test]
    fn test_connect_collects_catalog() {
        let raw = r#"{"success":true,"tools":["playwright_navigate",{"name":"playwright_fill"}],"pids":[41,42]}"#;
        let resp: BridgeResponse = serde_json::from_str(raw).unwrap();
        let result = decode_response(Operation::Connect, resp).unwrap();
        let Payload::Catalog(catalog) = result.payload else {
            panic!("expected catalog payload");
        };
        assert!(catalog.tools.contains("playwright_fill"));
        assert_eq!(catalog.pids.len(), 2);
    }

    #[test]
    fn test_navigate_reads_url_from_text() {
        let resp = response(vec![ContentItem::text("Navigated to https://example.com/login.")]);
        let result = decode_response(Operation::Navigate, resp).unwrap();
        assert_eq!(
            result.payload,
            Payload::Navigate(NavigateResult {
                url: Some("https://example.com/login".into())
            })
        );
    }
}
