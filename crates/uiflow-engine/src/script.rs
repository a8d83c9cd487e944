//! Page scripts run through the bridge's evaluate primitive.
//!
//! Every script has the shape `/*uiflow:<name>*/(function(args){...})(<json>)`
//! so the arguments are passed as JSON data instead of being spliced into
//! source text, and so a log line can name the script instead of dumping it.

use serde::Deserialize;
use serde_json::{Value, json};
use std::fmt;

const TAG_PREFIX: &str = "/*uiflow:";
const TAG_SUFFIX: &str = "*/";
const ARGS_OPEN: &str = "})(";

fn build(name: &str, body: &str, args: Value) -> String {
    format!("{TAG_PREFIX}{name}{TAG_SUFFIX}(function(args){{{body}{ARGS_OPEN}{args})")
}

/// Resolves `args.selector` to exactly one element or reports the count.
const RESOLVE_ONE: &str = "let els;\
try { els = document.querySelectorAll(args.selector); }\
catch (e) { return JSON.stringify({count: 0, error: String(e)}); }\
if (els.length !== 1) { return JSON.stringify({count: els.length}); }\
const el = els[0];";

/// Reads the live value of a form field, or its text for other elements.
pub fn read_field(selector: &str) -> String {
    let body = format!(
        "{}const v = ('value' in el) ? el.value : (el.textContent || '');\
         return JSON.stringify({{count: 1, value: String(v)}});",
        RESOLVE_ONE
    );
    build("read_field", &body, json!({ "selector": selector }))
}

/// Focuses the element and empties it.
pub fn focus_and_clear(selector: &str) -> String {
    let body = format!(
        "{}el.focus(); if ('value' in el) {{ el.value = ''; }}\
         el.dispatchEvent(new Event('input', {{bubbles: true}}));\
         return JSON.stringify({{count: 1}});",
        RESOLVE_ONE
    );
    build("focus_clear", &body, json!({ "selector": selector }))
}

/// Assigns the value through the native setter so framework-controlled
/// inputs see it, then fires the events those frameworks listen to.
pub fn assign_value(selector: &str, value: &str) -> String {
    let body = format!(
        "{}el.focus();\
         const proto = Object.getPrototypeOf(el);\
         const desc = proto ? Object.getOwnPropertyDescriptor(proto, 'value') : null;\
         if (desc && desc.set) {{ desc.set.call(el, args.value); }} else {{ el.value = args.value; }}\
         for (const type of ['input', 'change']) {{ el.dispatchEvent(new Event(type, {{bubbles: true}})); }}\
         el.dispatchEvent(new Event('blur'));\
         return JSON.stringify({{count: 1}});",
        RESOLVE_ONE
    );
    build(
        "assign_value",
        &body,
        json!({ "selector": selector, "value": value }),
    )
}

pub fn click(selector: &str) -> String {
    let body = format!(
        "{}if (el.scrollIntoView) {{ el.scrollIntoView({{block: 'center'}}); }}\
         el.click();\
         return JSON.stringify({{count: 1}});",
        RESOLVE_ONE
    );
    build("click", &body, json!({ "selector": selector }))
}

/// Number of elements matching the selector.
pub fn count(selector: &str) -> String {
    let body = "try { return JSON.stringify({count: document.querySelectorAll(args.selector).length}); }\
                catch (e) { return JSON.stringify({count: 0, error: String(e)}); }";
    build("count", body, json!({ "selector": selector }))
}

pub fn location() -> String {
    build("location", "return window.location.href;", json!({}))
}

pub fn text_present(text: &str) -> String {
    let body = "const t = document.body ? document.body.innerText : '';\
                return JSON.stringify({present: t.includes(args.text)});";
    build("text_present", body, json!({ "text": text }))
}

/// Resolves once the document has finished loading or `timeout_ms` passed.
pub fn ready_state(timeout_ms: u64) -> String {
    let body = "return new Promise((resolve) => {\
                  const deadline = Date.now() + args.timeout_ms;\
                  const poll = () => {\
                    if (document.readyState === 'complete' || Date.now() >= deadline) {\
                      resolve(document.readyState);\
                    } else { setTimeout(poll, 100); }\
                  };\
                  poll();\
                });";
    build("ready_state", body, json!({ "timeout_ms": timeout_ms }))
}

/// Name and arguments of a script built by this module.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptCall {
    pub name: String,
    pub args: Value,
}

impl fmt::Display for ScriptCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.args.get("selector").and_then(Value::as_str) {
            Some(selector) => write!(f, "{}({})", self.name, selector),
            None => f.write_str(&self.name),
        }
    }
}

/// Recovers the name and arguments from a script built here. Returns `None`
/// for foreign scripts.
pub fn describe(script: &str) -> Option<ScriptCall> {
    let rest = script.strip_prefix(TAG_PREFIX)?;
    let end = rest.find(TAG_SUFFIX)?;
    let name = rest[..end].to_string();
    let args_start = script.find(ARGS_OPEN)? + ARGS_OPEN.len();
    let args_src = script[args_start..].strip_suffix(')')?;
    let args = serde_json::from_str(args_src).ok()?;
    Some(ScriptCall { name, args })
}

/// What a selector-resolving script reports back.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ElementProbe {
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ElementProbe {
    pub fn is_unique(&self) -> bool {
        self.count == 1 && self.error.is_none()
    }

    /// Human-readable reason the selector did not resolve to one element.
    pub fn ambiguity(&self, selector: &str) -> String {
        match &self.error {
            Some(err) => format!("selector '{}' is invalid: {}", selector, err),
            None => format!("selector '{}' matched {} elements", selector, self.count),
        }
    }
}

/// Scripts return `JSON.stringify(..)`, which the bridge may hand back
/// either already decoded or still as a string.
pub fn parse_object<T: for<'de> Deserialize<'de>>(value: &Value) -> Option<T> {
    match value {
        Value::String(s) => serde_json::from_str(s).ok(),
        Value::Object(_) => serde_json::from_value(value.clone()).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_recovers_name_and_args() {
        let script = read_field("input[name=\"email\"]");
        let call = describe(&script).unwrap();
        assert_eq!(call.name, "read_field");
        assert_eq!(call.args["selector"], "input[name=\"email\"]");
        assert_eq!(call.to_string(), "read_field(input[name=\"email\"])");
    }

    #[test]
    fn test_arguments_are_json_not_source() {
        let script = assign_value("#q", "'); alert(1); ('");
        assert!(script.ends_with(r##"({"selector":"#q","value":"'); alert(1); ('"})"##));
        assert_eq!(describe(&script).unwrap().args["value"], "'); alert(1); ('");
    }

    #[test]
    fn test_describe_ignores_foreign_scripts() {
        assert_eq!(describe("document.title"), None);
        assert_eq!(describe("/*uiflow:broken"), None);
    }

    #[test]
    fn test_parse_object_accepts_string_or_object() {
        let from_string: ElementProbe =
            parse_object(&Value::String("{\"count\":1,\"value\":\"x\"}".into())).unwrap();
        assert!(from_string.is_unique());
        assert_eq!(from_string.value.as_deref(), Some("x"));

        let from_object: ElementProbe = parse_object(&json!({"count": 2})).unwrap();
        assert!(!from_object.is_unique());
        assert_eq!(from_object.ambiguity("li"), "selector 'li' matched 2 elements");

        assert_eq!(parse_object::<ElementProbe>(&Value::Null), None);
    }
}
