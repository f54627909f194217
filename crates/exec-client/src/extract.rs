//! Pulls values out of the differently shaped bodies the service returns.
//!
//! Each concept has an ordered list of shape matchers; the first one that
//! recognizes the body wins.

use serde_json::Value;

pub type Matcher<T> = fn(&Value) -> Option<T>;

pub fn first_match<T>(body: &Value, matchers: &[Matcher<T>]) -> Option<T> {
    matchers.iter().find_map(|matcher| matcher(body))
}

const REQUEST_ID_SHAPES: &[Matcher<String>] =
    &[snake_request_id, camel_request_id, nested_request_id];

const ERROR_TEXT_SHAPES: &[Matcher<String>] = &[
    error_text,
    message_text,
    detail_text,
    nested_error_text,
    first_listed_error,
];

const DATA_SHAPES: &[Matcher<Value>] = &[data_envelope, result_envelope];

fn snake_request_id(body: &Value) -> Option<String> {
    id_field(body.get("request_id"))
}

fn camel_request_id(body: &Value) -> Option<String> {
    id_field(body.get("requestId"))
}

fn nested_request_id(body: &Value) -> Option<String> {
    id_field(body.get("data").and_then(|data| data.get("request_id")))
}

fn error_text(body: &Value) -> Option<String> {
    text_field(body.get("error"))
}

fn message_text(body: &Value) -> Option<String> {
    text_field(body.get("message"))
}

fn detail_text(body: &Value) -> Option<String> {
    text_field(body.get("detail"))
}

fn nested_error_text(body: &Value) -> Option<String> {
    text_field(body.get("data").and_then(|data| data.get("error")))
}

fn first_listed_error(body: &Value) -> Option<String> {
    body.get("errors")
        .and_then(Value::as_array)
        .and_then(|items| items.first())
        .and_then(|first| text_field(Some(first)))
}

fn data_envelope(body: &Value) -> Option<Value> {
    body.get("data").filter(|data| !data.is_null()).cloned()
}

fn result_envelope(body: &Value) -> Option<Value> {
    body.get("result").filter(|data| !data.is_null()).cloned()
}

/// Request identifier assigned by the queue.
pub fn request_id(body: &Value) -> Option<String> {
    first_match(body, REQUEST_ID_SHAPES)
}

/// Error text when the body reports a failure despite a success status.
pub fn body_error(body: &Value) -> Option<String> {
    let flagged = reports_failure(body)
        || matches!(
            body.get("status").and_then(Value::as_str),
            Some("error") | Some("failed") | Some("failure")
        )
        || has_error_field(body);
    flagged.then(|| failure_text(body))
}

/// Like [`body_error`] for status bodies, where `status: failed` is a request
/// state rather than an envelope error.
pub fn status_body_error(body: &Value) -> Option<String> {
    let flagged =
        reports_failure(body) || (body.get("request_id").is_none() && has_error_field(body));
    flagged.then(|| failure_text(body))
}

fn reports_failure(body: &Value) -> bool {
    body.get("success").and_then(Value::as_bool) == Some(false)
}

fn has_error_field(body: &Value) -> bool {
    body.get("error").map_or(false, |error| match error {
        Value::Null | Value::Bool(false) => false,
        Value::String(text) => !text.trim().is_empty(),
        _ => true,
    })
}

fn failure_text(body: &Value) -> String {
    first_match(body, ERROR_TEXT_SHAPES)
        .unwrap_or_else(|| "remote command failed without an error message".to_string())
}

/// Payload of a result body, or the body itself when it has no envelope.
pub fn result_data(body: &Value) -> Value {
    first_match(body, DATA_SHAPES).unwrap_or_else(|| body.clone())
}

pub fn message(body: &Value) -> Option<String> {
    text_field(body.get("message"))
}

fn id_field(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn text_field(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Some(Value::Object(map.clone()).to_string())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_id_shapes_in_order() {
        assert_eq!(request_id(&json!({ "request_id": "a" })), Some("a".to_string()));
        assert_eq!(request_id(&json!({ "requestId": "b" })), Some("b".to_string()));
        assert_eq!(
            request_id(&json!({ "data": { "request_id": "c" } })),
            Some("c".to_string())
        );
        assert_eq!(request_id(&json!({ "request_id": 17 })), Some("17".to_string()));
        assert_eq!(
            request_id(&json!({ "request_id": "", "requestId": "d" })),
            Some("d".to_string())
        );
        assert_eq!(request_id(&json!({ "success": true })), None);
    }

    #[test]
    fn success_bodies_have_no_error() {
        assert_eq!(body_error(&json!({ "success": true, "data": [] })), None);
        assert_eq!(body_error(&json!({ "status": "success", "error": null })), None);
        assert_eq!(body_error(&json!(["plain", "list"])), None);
    }

    #[test]
    fn error_shapes_are_recognized() {
        assert_eq!(
            body_error(&json!({ "success": false, "error": "no such record" })),
            Some("no such record".to_string())
        );
        assert_eq!(
            body_error(&json!({ "status": "error", "message": "bad folder" })),
            Some("bad folder".to_string())
        );
        assert_eq!(
            body_error(&json!({ "error": { "message": "denied" } })),
            Some("denied".to_string())
        );
        assert_eq!(
            body_error(&json!({ "success": false, "errors": ["first", "second"] })),
            Some("first".to_string())
        );
        assert!(body_error(&json!({ "success": false }))
            .expect("error")
            .contains("without an error message"));
    }

    #[test]
    fn failed_request_state_is_not_a_status_body_error() {
        let report = json!({ "request_id": "r-1", "status": "failed", "error": "exit 1" });
        assert_eq!(status_body_error(&report), None);
        assert_eq!(
            status_body_error(&json!({ "success": false, "error": "session expired" })),
            Some("session expired".to_string())
        );
        assert_eq!(
            status_body_error(&json!({ "error": "unknown api key" })),
            Some("unknown api key".to_string())
        );
    }

    #[test]
    fn result_data_unwraps_envelopes() {
        assert_eq!(result_data(&json!({ "data": { "x": 1 } })), json!({ "x": 1 }));
        assert_eq!(result_data(&json!({ "result": "text" })), json!("text"));
        assert_eq!(result_data(&json!({ "x": 1 })), json!({ "x": 1 }));
        assert_eq!(result_data(&json!("raw")), json!("raw"));
    }
}
