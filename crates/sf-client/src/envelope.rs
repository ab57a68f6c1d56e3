//! The status/payload envelope every remote call resolves to.
//!
//! Callers never see a transport error directly: a call either produced a
//! response (whose status and body are kept) or failed before one arrived,
//! in which case the failure is mapped onto an HTTP-like status and an
//! [`ApiFault`]. Pipelines only have to look at [`ApiResult::is_failure`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Highest status code still considered a success.
pub const SUCCESS_THRESHOLD: u16 = 399;

/// Structured error description carried by a failed call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiFault {
    pub error_code: String,
    pub message: String,
}

impl ApiFault {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
        }
    }

    /// Pull a fault out of a Salesforce error body.
    ///
    /// REST returns `[{"errorCode": .., "message": ..}]`, OAuth returns
    /// `{"error": .., "error_description": ..}`.
    pub fn from_body(body: &Value) -> Option<Self> {
        let first = match body {
            Value::Array(items) => items.first()?,
            other => other,
        };

        if let (Some(code), Some(message)) = (
            first.get("errorCode").and_then(Value::as_str),
            first.get("message").and_then(Value::as_str),
        ) {
            return Some(Self::new(code, message));
        }

        if let Some(code) = first.get("error").and_then(Value::as_str) {
            let message = first
                .get("error_description")
                .and_then(Value::as_str)
                .unwrap_or(code);
            return Some(Self::new(code, message));
        }

        None
    }
}

impl std::fmt::Display for ApiFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code, self.message)
    }
}

/// Result of one remote call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResult {
    pub status_code: u16,
    #[serde(default)]
    pub body: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiFault>,
}

impl ApiResult {
    /// A successful result with a JSON body.
    pub fn ok(status_code: u16, body: Value) -> Self {
        Self {
            status_code,
            body,
            error: None,
        }
    }

    /// A failed result.
    pub fn failure(status_code: u16, fault: ApiFault) -> Self {
        Self {
            status_code,
            body: Value::Null,
            error: Some(fault),
        }
    }

    /// Build an envelope from a raw response status and body.
    pub fn from_response(status_code: u16, body: Value) -> Self {
        if status_code > SUCCESS_THRESHOLD {
            let fault = ApiFault::from_body(&body)
                .unwrap_or_else(|| ApiFault::new(format!("HTTP_{status_code}"), body.to_string()));
            Self {
                status_code,
                body,
                error: Some(fault),
            }
        } else {
            Self::ok(status_code, body)
        }
    }

    /// Map a transport error onto the envelope.
    pub fn from_error(err: &Error) -> Self {
        Self::failure(err.status_code(), err.fault())
    }

    /// Fold a multi-step call's outcome into an envelope.
    pub fn from_outcome(outcome: crate::Result<Value>) -> Self {
        match outcome {
            Ok(body) => Self::ok(200, body),
            Err(err) => Self::from_error(&err),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status_code > SUCCESS_THRESHOLD || self.error.is_some()
    }

    pub fn is_success(&self) -> bool {
        !self.is_failure()
    }

    /// The one-line message shown to the user for a failed call.
    pub fn error_message(&self) -> Option<String> {
        if !self.is_failure() {
            return None;
        }
        Some(match &self.error {
            Some(fault) => format!("{fault} (status {})", self.status_code),
            None => format!("HTTP_{0}: request failed (status {0})", self.status_code),
        })
    }

    /// Look up a top-level field of the body.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.body.get(field)
    }

    /// The `records` array of a query body, empty when absent.
    pub fn records(&self) -> &[Value] {
        self.body
            .get("records")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// `totalSize` of a query body.
    pub fn total_size(&self) -> u64 {
        self.body
            .get("totalSize")
            .and_then(Value::as_u64)
            .unwrap_or(self.records().len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_threshold() {
        assert!(ApiResult::ok(200, json!({})).is_success());
        assert!(ApiResult::from_response(204, Value::Null).is_success());
        assert!(ApiResult::from_response(399, Value::Null).is_success());
        assert!(ApiResult::from_response(400, Value::Null).is_failure());
        assert!(ApiResult::from_response(500, json!({})).is_failure());
    }

    #[test]
    fn test_rest_error_body_becomes_fault() {
        let result = ApiResult::from_response(
            400,
            json!([{"errorCode": "MALFORMED_QUERY", "message": "unexpected token: FORM"}]),
        );
        let fault = result.error.as_ref().unwrap();
        assert_eq!(fault.error_code, "MALFORMED_QUERY");
        assert_eq!(
            result.error_message().unwrap(),
            "MALFORMED_QUERY: unexpected token: FORM (status 400)"
        );
    }

    #[test]
    fn test_oauth_error_body_becomes_fault() {
        let result = ApiResult::from_response(
            400,
            json!({"error": "invalid_grant", "error_description": "authentication failure"}),
        );
        assert_eq!(
            result.error,
            Some(ApiFault::new("invalid_grant", "authentication failure"))
        );
    }

    #[test]
    fn test_success_has_no_error_message() {
        assert!(ApiResult::ok(200, json!({"totalSize": 0})).error_message().is_none());
    }

    #[test]
    fn test_transport_error_maps_to_failure() {
        let result = ApiResult::from_error(&Error::new(ErrorKind::Timeout));
        assert_eq!(result.status_code, 408);
        assert!(result.is_failure());
        assert_eq!(result.error.unwrap().error_code, "TIMEOUT");
    }

    #[test]
    fn test_records_and_total_size() {
        let result = ApiResult::ok(
            200,
            json!({"totalSize": 2, "done": true, "records": [{"Id": "1"}, {"Id": "2"}]}),
        );
        assert_eq!(result.records().len(), 2);
        assert_eq!(result.total_size(), 2);

        let empty = ApiResult::ok(200, json!({}));
        assert!(empty.records().is_empty());
        assert_eq!(empty.total_size(), 0);
    }
}
