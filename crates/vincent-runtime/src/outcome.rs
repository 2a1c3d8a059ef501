//! Result algebra shared by policies and tools.
//!
//! Policies answer with [`PolicyResponse`] (allow/deny), tools with
//! [`ToolResult`] (success/failure). Neither can be built outside this crate:
//! authors obtain them from the `allow`/`deny` and `succeed`/`fail` helpers
//! on their lifecycle context.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::{Schema, SchemaIssue};

/// Lifecycle step a payload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    Evaluate,
    Precheck,
    Commit,
    Execute,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecyclePhase::Evaluate => "evaluate",
            LifecyclePhase::Precheck => "precheck",
            LifecyclePhase::Commit => "commit",
            LifecyclePhase::Execute => "execute",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStage {
    Input,
    Output,
}

impl fmt::Display for ValidationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValidationStage::Input => "input",
            ValidationStage::Output => "output",
        })
    }
}

/// Marker payload placed in `result` when schema validation, rather than
/// business logic, produced a Deny/Failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationFailure {
    #[serde(rename = "validationError")]
    pub issues: Vec<SchemaIssue>,
    pub phase: LifecyclePhase,
    pub stage: ValidationStage,
}

impl ValidationFailure {
    /// Recognise the marker inside a `result` value.
    pub fn from_result(result: &Value) -> Option<Self> {
        serde_json::from_value(result.clone()).ok()
    }

    pub fn message(&self) -> String {
        let issues: Vec<String> = self.issues.iter().map(ToString::to_string).collect();
        format!(
            "Invalid {} for {}: {}",
            self.stage,
            self.phase,
            issues.join("; ")
        )
    }

    fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ============================================================================
// Policy responses
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyAllow {
    result: Option<Value>,
}

impl PolicyAllow {
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyDeny {
    result: Option<Value>,
    error: Option<String>,
}

impl PolicyDeny {
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn validation_failure(&self) -> Option<ValidationFailure> {
        self.result.as_ref().and_then(ValidationFailure::from_result)
    }

    pub(crate) fn into_parts(self) -> (Option<Value>, Option<String>) {
        (self.result, self.error)
    }
}

/// Outcome of a single policy lifecycle call.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyResponse {
    Allow(PolicyAllow),
    Deny(PolicyDeny),
}

impl PolicyResponse {
    pub(crate) fn allow(result: Option<Value>) -> Self {
        PolicyResponse::Allow(PolicyAllow {
            result: non_null(result),
        })
    }

    pub(crate) fn deny(result: Option<Value>, error: Option<String>) -> Self {
        PolicyResponse::Deny(PolicyDeny {
            result: non_null(result),
            error,
        })
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, PolicyResponse::Allow(_))
    }

    pub fn result(&self) -> Option<&Value> {
        match self {
            PolicyResponse::Allow(allow) => allow.result(),
            PolicyResponse::Deny(deny) => deny.result(),
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            PolicyResponse::Allow(_) => None,
            PolicyResponse::Deny(deny) => deny.error(),
        }
    }

    /// Build from a value already known to be deny-shaped.
    pub(crate) fn deny_from_wire(value: &Value) -> Self {
        let result = value.get("result").cloned();
        let error = value.get("error").and_then(|err| match err {
            Value::Null => None,
            Value::String(message) => Some(message.clone()),
            other => Some(other.to_string()),
        });
        Self::deny(result, error)
    }
}

#[derive(Serialize)]
struct ResponseWire<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    allow: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

impl Serialize for PolicyResponse {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ResponseWire {
            allow: Some(self.is_allow()),
            success: None,
            result: self.result(),
            error: self.error(),
        }
        .serialize(serializer)
    }
}

// ============================================================================
// Tool results
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ToolSuccess {
    result: Option<Value>,
}

impl ToolSuccess {
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolFailure {
    result: Option<Value>,
    error: Option<String>,
}

impl ToolFailure {
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn validation_failure(&self) -> Option<ValidationFailure> {
        self.result.as_ref().and_then(ValidationFailure::from_result)
    }
}

/// Outcome of a tool precheck or execute call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    Success(ToolSuccess),
    Failure(ToolFailure),
}

impl ToolResult {
    pub(crate) fn success(result: Option<Value>) -> Self {
        ToolResult::Success(ToolSuccess {
            result: non_null(result),
        })
    }

    pub(crate) fn failure(result: Option<Value>, error: Option<String>) -> Self {
        ToolResult::Failure(ToolFailure {
            result: non_null(result),
            error,
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolResult::Success(_))
    }

    pub fn result(&self) -> Option<&Value> {
        match self {
            ToolResult::Success(success) => success.result(),
            ToolResult::Failure(failure) => failure.result(),
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ToolResult::Success(_) => None,
            ToolResult::Failure(failure) => failure.error(),
        }
    }
}

impl Serialize for ToolResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ResponseWire {
            allow: None,
            success: Some(self.is_success()),
            result: self.result(),
            error: self.error(),
        }
        .serialize(serializer)
    }
}

fn non_null(value: Option<Value>) -> Option<Value> {
    value.filter(|v| !v.is_null())
}

// ============================================================================
// Validators
// ============================================================================

/// Negative outcome a validator or failure boundary can fall back to.
pub(crate) trait LifecycleOutcome: Sized {
    fn from_validation_failure(failure: ValidationFailure) -> Self;
    fn from_error(message: String) -> Self;
}

impl LifecycleOutcome for PolicyResponse {
    fn from_validation_failure(failure: ValidationFailure) -> Self {
        let message = failure.message();
        Self::deny(Some(failure.to_value()), Some(message))
    }

    fn from_error(message: String) -> Self {
        Self::deny(None, Some(message))
    }
}

impl LifecycleOutcome for ToolResult {
    fn from_validation_failure(failure: ValidationFailure) -> Self {
        let message = failure.message();
        Self::failure(Some(failure.to_value()), Some(message))
    }

    fn from_error(message: String) -> Self {
        Self::failure(None, Some(message))
    }
}

pub(crate) fn check_payload(
    value: Option<&Value>,
    schema: &Schema,
    phase: LifecyclePhase,
    stage: ValidationStage,
) -> Result<Option<Value>, ValidationFailure> {
    schema.check(value).map_err(|issues| ValidationFailure {
        issues,
        phase,
        stage,
    })
}

/// Validate a lifecycle input; a mismatch becomes the negative outcome.
pub(crate) fn validate_input<O: LifecycleOutcome>(
    value: Option<&Value>,
    schema: &Schema,
    phase: LifecyclePhase,
) -> Result<Option<Value>, O> {
    check_payload(value, schema, phase, ValidationStage::Input).map_err(O::from_validation_failure)
}

/// Validate a lifecycle output; a mismatch becomes the negative outcome.
pub(crate) fn validate_output<O: LifecycleOutcome>(
    value: Option<&Value>,
    schema: &Schema,
    phase: LifecyclePhase,
) -> Result<Option<Value>, O> {
    check_payload(value, schema, phase, ValidationStage::Output).map_err(O::from_validation_failure)
}

/// Which boolean discriminates a raw outcome value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultFlag {
    Allow,
    Success,
}

impl ResultFlag {
    pub fn key(self) -> &'static str {
        match self {
            ResultFlag::Allow => "allow",
            ResultFlag::Success => "success",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    /// `allow: true` / `success: true`
    Positive,
    /// `allow: false` / `success: false`
    Negative,
    /// Value lacks the boolean flag entirely.
    Unknown,
}

#[derive(Debug, Clone)]
pub struct SchemaSelection {
    pub kind: OutcomeKind,
    pub schema: Schema,
}

/// Pair an outcome-shaped value with the schema its `result` must satisfy.
pub fn select_result_schema(
    value: &Value,
    flag: ResultFlag,
    positive: &Schema,
    negative: &Schema,
) -> SchemaSelection {
    match value.get(flag.key()).and_then(Value::as_bool) {
        Some(true) => SchemaSelection {
            kind: OutcomeKind::Positive,
            schema: positive.clone(),
        },
        Some(false) => SchemaSelection {
            kind: OutcomeKind::Negative,
            schema: negative.clone(),
        },
        None => SchemaSelection {
            kind: OutcomeKind::Unknown,
            schema: Schema::any(),
        },
    }
}

// ============================================================================
// Failure boundary
// ============================================================================

/// Run author code, turning both `Err` and panics into an error message.
pub(crate) async fn failure_boundary<T, F>(fut: F) -> Result<T, String>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(err.to_string()),
        Err(panic) => Err(panic_message(panic.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "lifecycle callback panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn number_schema() -> Schema {
        Schema::json(json!({"type": "object", "properties": {"n": {"type": "integer"}}, "required": ["n"]}))
            .unwrap()
    }

    #[test]
    fn test_select_positive_and_negative() {
        let allow = Schema::any();
        let deny = Schema::absent();
        let selected = select_result_schema(&json!({"allow": true}), ResultFlag::Allow, &allow, &deny);
        assert_eq!(selected.kind, OutcomeKind::Positive);
        let selected = select_result_schema(&json!({"allow": false}), ResultFlag::Allow, &allow, &deny);
        assert_eq!(selected.kind, OutcomeKind::Negative);
        assert!(selected.schema.is_absent());
    }

    #[test]
    fn test_select_unknown_shape() {
        let selected = select_result_schema(
            &json!({"success": "yes"}),
            ResultFlag::Success,
            &Schema::absent(),
            &Schema::absent(),
        );
        assert_eq!(selected.kind, OutcomeKind::Unknown);
        assert!(!selected.schema.is_absent());
    }

    #[test]
    fn test_validation_failure_marker_roundtrips() {
        let response: PolicyResponse =
            validate_input(Some(&json!({"n": "x"})), &number_schema(), LifecyclePhase::Evaluate)
                .unwrap_err();
        let PolicyResponse::Deny(deny) = response else {
            panic!("expected deny");
        };
        let failure = deny.validation_failure().unwrap();
        assert_eq!(failure.phase, LifecyclePhase::Evaluate);
        assert_eq!(failure.stage, ValidationStage::Input);
        assert!(deny.error().unwrap().starts_with("Invalid input for evaluate"));
    }

    #[test]
    fn test_business_result_is_not_marker() {
        assert!(ValidationFailure::from_result(&json!({"reason": "x"})).is_none());
    }

    #[test]
    fn test_serialize_shapes() {
        let allow = PolicyResponse::allow(Some(json!({"approved": true})));
        assert_eq!(
            serde_json::to_value(&allow).unwrap(),
            json!({"allow": true, "result": {"approved": true}})
        );
        let deny = PolicyResponse::deny(None, Some("boom".into()));
        assert_eq!(
            serde_json::to_value(&deny).unwrap(),
            json!({"allow": false, "error": "boom"})
        );
        let success = ToolResult::success(None);
        assert_eq!(serde_json::to_value(&success).unwrap(), json!({"success": true}));
    }

    #[test]
    fn test_deny_from_wire_stringifies_error() {
        let deny = PolicyResponse::deny_from_wire(&json!({"allow": false, "error": {"code": 1}}));
        assert_eq!(deny.error(), Some(r#"{"code":1}"#));
    }

    #[tokio::test]
    async fn test_failure_boundary_catches_error_and_panic() {
        let err = failure_boundary(async { Err::<(), _>(anyhow::anyhow!("boom")) })
            .await
            .unwrap_err();
        assert_eq!(err, "boom");

        let err = failure_boundary(async {
            if true {
                panic!("kaboom");
            }
            Ok::<(), anyhow::Error>(())
        })
        .await
        .unwrap_err();
        assert_eq!(err, "kaboom");
    }

    proptest! {
        #[test]
        fn prop_valid_payload_passes_unchanged(n in any::<i64>(), tag in "[a-z]{0,12}") {
            let value = json!({"n": n, "tag": tag});
            let out: Result<Option<Value>, ToolResult> =
                validate_output(Some(&value), &number_schema(), LifecyclePhase::Execute);
            prop_assert_eq!(out.unwrap(), Some(value));
        }

        #[test]
        fn prop_invalid_payload_yields_marker(text in ".{0,24}") {
            let value = json!({"n": text});
            let out: Result<Option<Value>, PolicyResponse> =
                validate_output(Some(&value), &number_schema(), LifecyclePhase::Commit);
            let response = out.unwrap_err();
            prop_assert!(!response.is_allow());
            let marker = response.result().and_then(ValidationFailure::from_result);
            prop_assert!(marker.is_some());
            prop_assert_ne!(response.result(), Some(&value));
        }
    }
}
