//! Multi-policy evaluation: run every applicable policy for one invocation and
//! fold the individual responses into a single [`PolicyEvaluationResult`].

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::binding::PolicyCall;
use crate::error::EngineError;
use crate::outcome::{
    select_result_schema, validate_output, LifecycleOutcome, LifecyclePhase, OutcomeKind,
    PolicyResponse, ResultFlag,
};
use crate::policy::PolicyArgs;
use crate::remote::{PolicyRunner, RemoteEvaluationRequest, RoutingContext};

/// Result recorded for a policy that individually allowed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllowedPolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// The policy that decided a denied evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeniedPolicy {
    pub package_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AllowedEvaluation {
    evaluated_policies: Vec<String>,
    allowed_policies: BTreeMap<String, AllowedPolicy>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeniedEvaluation {
    evaluated_policies: Vec<String>,
    allowed_policies: BTreeMap<String, AllowedPolicy>,
    denied_policy: DeniedPolicy,
}

/// Aggregate outcome of all policies applicable to one invocation.
///
/// `evaluated_policies` lists every attempted policy in invocation order.
/// `allowed_policies` holds every individual allow, including on the deny
/// branch.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyEvaluationResult {
    Allow(AllowedEvaluation),
    Deny(DeniedEvaluation),
}

impl PolicyEvaluationResult {
    pub fn is_allow(&self) -> bool {
        matches!(self, PolicyEvaluationResult::Allow(_))
    }

    pub fn evaluated_policies(&self) -> &[String] {
        match self {
            PolicyEvaluationResult::Allow(allow) => &allow.evaluated_policies,
            PolicyEvaluationResult::Deny(deny) => &deny.evaluated_policies,
        }
    }

    pub fn allowed_policies(&self) -> &BTreeMap<String, AllowedPolicy> {
        match self {
            PolicyEvaluationResult::Allow(allow) => &allow.allowed_policies,
            PolicyEvaluationResult::Deny(deny) => &deny.allowed_policies,
        }
    }

    pub fn denied_policy(&self) -> Option<&DeniedPolicy> {
        match self {
            PolicyEvaluationResult::Allow(_) => None,
            PolicyEvaluationResult::Deny(deny) => Some(&deny.denied_policy),
        }
    }

    /// Allow-branch result for an invocation with no applicable policies.
    pub fn empty() -> Self {
        EvaluationAccumulator::default().finish()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EvaluationWire<'a> {
    allow: bool,
    evaluated_policies: &'a [String],
    allowed_policies: &'a BTreeMap<String, AllowedPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    denied_policy: Option<&'a DeniedPolicy>,
}

impl Serialize for PolicyEvaluationResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        EvaluationWire {
            allow: self.is_allow(),
            evaluated_policies: self.evaluated_policies(),
            allowed_policies: self.allowed_policies(),
            denied_policy: self.denied_policy(),
        }
        .serialize(serializer)
    }
}

/// Fatal evaluation error, with whatever was recorded before it. The failing
/// policy is listed in `evaluated_policies` of `partial`.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct EvaluationAborted {
    pub partial: PolicyEvaluationResult,
    #[source]
    pub error: EngineError,
}

/// Folds per-policy responses in invocation order.
#[derive(Debug, Default)]
pub(crate) struct EvaluationAccumulator {
    evaluated: Vec<String>,
    allowed: BTreeMap<String, AllowedPolicy>,
    denied: Option<DeniedPolicy>,
}

impl EvaluationAccumulator {
    pub(crate) fn begin(&mut self, package: &str) {
        self.evaluated.push(package.to_string());
    }

    pub(crate) fn record(&mut self, package: &str, response: PolicyResponse) {
        match response {
            PolicyResponse::Allow(allow) => {
                debug!(policy = package, "Policy allowed");
                self.allowed.insert(
                    package.to_string(),
                    AllowedPolicy {
                        result: allow.result().cloned(),
                    },
                );
            }
            PolicyResponse::Deny(deny) => {
                let (result, error) = deny.into_parts();
                warn!(policy = package, error = error.as_deref().unwrap_or(""), "Policy denied");
                // Later denials replace earlier ones.
                self.denied = Some(DeniedPolicy {
                    package_name: package.to_string(),
                    result,
                    error,
                });
            }
        }
    }

    pub(crate) fn finish(self) -> PolicyEvaluationResult {
        match self.denied {
            Some(denied_policy) => PolicyEvaluationResult::Deny(DeniedEvaluation {
                evaluated_policies: self.evaluated,
                allowed_policies: self.allowed,
                denied_policy,
            }),
            None => PolicyEvaluationResult::Allow(AllowedEvaluation {
                evaluated_policies: self.evaluated,
                allowed_policies: self.allowed,
            }),
        }
    }
}

/// Evaluate every call through the sandbox runner, in order, without
/// stopping at the first deny.
pub async fn evaluate_policies(
    calls: &[PolicyCall],
    routing: &RoutingContext,
    tool_api_version: &str,
    runner: &dyn PolicyRunner,
) -> Result<PolicyEvaluationResult, EvaluationAborted> {
    let mut acc = EvaluationAccumulator::default();

    for call in calls {
        let package = call.package_name();
        acc.begin(package);

        let request = RemoteEvaluationRequest {
            tool_params: call.tool_params.clone(),
            context: routing.clone(),
            tool_api_version: tool_api_version.to_string(),
        };
        debug!(policy = package, ipfs_cid = %call.bound.ipfs_cid, "Evaluating policy remotely");

        let response = match runner.run(&call.bound.ipfs_cid, &request).await {
            Ok(raw) => match interpret_remote_response(call, &raw) {
                Ok(response) => response,
                Err(error) => {
                    return Err(EvaluationAborted {
                        partial: acc.finish(),
                        error,
                    })
                }
            },
            Err(err) => {
                warn!(policy = package, error = %err, "Remote policy evaluation failed");
                PolicyResponse::from_error(err.to_string())
            }
        };
        acc.record(package, response);
    }

    let result = acc.finish();
    info!(
        allow = result.is_allow(),
        evaluated = result.evaluated_policies().len(),
        "Policy evaluation complete"
    );
    Ok(result)
}

/// Turn the sandbox's textual answer into a validated response.
fn interpret_remote_response(call: &PolicyCall, raw: &str) -> Result<PolicyResponse, EngineError> {
    let package = call.package_name();
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            warn!(policy = package, error = %err, "Unparseable policy response");
            return Ok(PolicyResponse::from_error(format!(
                "Failed to parse response from policy '{package}': {err}"
            )));
        }
    };

    let schemas = call.bound.policy.definition().schemas();
    let selection = select_result_schema(
        &value,
        ResultFlag::Allow,
        &schemas.eval_allow_result,
        &schemas.eval_deny_result,
    );
    match selection.kind {
        OutcomeKind::Negative => Ok(PolicyResponse::deny_from_wire(&value)),
        OutcomeKind::Positive => Ok(
            match validate_output::<PolicyResponse>(
                value.get("result"),
                &selection.schema,
                LifecyclePhase::Evaluate,
            ) {
                Ok(result) => PolicyResponse::allow(result),
                Err(deny) => deny,
            },
        ),
        OutcomeKind::Unknown => Err(EngineError::MalformedPolicyResponse {
            package: package.to_string(),
            reason: "response has no boolean 'allow' field".to_string(),
        }),
    }
}

/// Run the local precheck of every call whose policy declares one. Policies
/// without a precheck are skipped entirely.
pub async fn precheck_policies(calls: &[PolicyCall], routing: &RoutingContext) -> PolicyEvaluationResult {
    let mut acc = EvaluationAccumulator::default();

    for call in calls {
        let Some(precheck) = call.bound.policy.precheck() else {
            debug!(policy = call.package_name(), "No precheck declared, skipping");
            continue;
        };
        acc.begin(call.package_name());
        let response = precheck
            .run(
                PolicyArgs {
                    tool_params: call.tool_params.clone(),
                    user_params: call.user_params.clone(),
                },
                routing,
            )
            .await;
        acc.record(call.package_name(), response);
    }

    acc.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use serde_json::json;

    use crate::binding::BoundPolicy;
    use crate::policy::{PolicyDefinition, VincentPolicy};
    use crate::schema::Schema;

    /// Runner answering from a fixed table and recording call order.
    struct ScriptedRunner {
        answers: HashMap<String, Result<String, String>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn new(answers: &[(&str, Result<&str, &str>)]) -> Self {
            Self {
                answers: answers
                    .iter()
                    .map(|(cid, answer)| {
                        (
                            cid.to_string(),
                            answer.map(str::to_string).map_err(str::to_string),
                        )
                    })
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PolicyRunner for ScriptedRunner {
        async fn run(&self, policy_ipfs_cid: &str, _request: &RemoteEvaluationRequest) -> Result<String> {
            self.calls.lock().unwrap().push(policy_ipfs_cid.to_string());
            match self.answers.get(policy_ipfs_cid) {
                Some(Ok(body)) => Ok(body.clone()),
                Some(Err(message)) => Err(anyhow!(message.clone())),
                None => Err(anyhow!("no answer for {policy_ipfs_cid}")),
            }
        }
    }

    fn routing() -> RoutingContext {
        RoutingContext {
            tool_ipfs_cid: "QmTool".into(),
            delegator_address: "0xdelegator".into(),
            delegatee_address: "0xdelegatee".into(),
        }
    }

    fn approved_schema() -> Schema {
        Schema::json(json!({
            "type": "object",
            "properties": {"approved": {"type": "boolean"}},
            "required": ["approved"]
        }))
        .unwrap()
    }

    fn call(name: &str, cid: &str) -> PolicyCall {
        let policy = VincentPolicy::new(
            PolicyDefinition::new(name, Schema::any(), |_args, ctx| async move {
                Ok(ctx.allow(json!({"approved": true})))
            })
            .with_evaluate_results(approved_schema(), Schema::any()),
        );
        PolicyCall {
            bound: Arc::new(BoundPolicy::new(cid, policy)),
            tool_params: json!({}),
            user_params: None,
        }
    }

    #[tokio::test]
    async fn test_single_allow() {
        let runner = ScriptedRunner::new(&[("Qm1", Ok(r#"{"allow":true,"result":{"approved":true}}"#))]);
        let result = evaluate_policies(&[call("p", "Qm1")], &routing(), "2.0.0", &runner)
            .await
            .unwrap();
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({
                "allow": true,
                "evaluatedPolicies": ["p"],
                "allowedPolicies": {"p": {"result": {"approved": true}}}
            })
        );
    }

    #[tokio::test]
    async fn test_no_short_circuit_after_deny() {
        let runner = ScriptedRunner::new(&[
            ("Qm1", Ok(r#"{"allow":true,"result":{"approved":true}}"#)),
            ("Qm2", Ok(r#"{"allow":false,"result":{"reason":"x"}}"#)),
            ("Qm3", Ok(r#"{"allow":true,"result":{"approved":true}}"#)),
        ]);
        let calls = [call("a", "Qm1"), call("b", "Qm2"), call("c", "Qm3")];
        let result = evaluate_policies(&calls, &routing(), "2.0.0", &runner).await.unwrap();

        assert!(!result.is_allow());
        assert_eq!(result.evaluated_policies(), ["a", "b", "c"]);
        assert_eq!(*runner.calls.lock().unwrap(), vec!["Qm1", "Qm2", "Qm3"]);
        assert!(result.allowed_policies().contains_key("a"));
        assert!(result.allowed_policies().contains_key("c"));
        assert_eq!(result.denied_policy().unwrap().package_name, "b");
    }

    #[tokio::test]
    async fn test_deny_then_allow() {
        let runner = ScriptedRunner::new(&[
            ("Qm1", Ok(r#"{"allow":false,"result":{"reason":"x"}}"#)),
            ("Qm2", Ok(r#"{"allow":true,"result":{"approved":true}}"#)),
        ]);
        let calls = [call("first", "Qm1"), call("second", "Qm2")];
        let result = evaluate_policies(&calls, &routing(), "2.0.0", &runner).await.unwrap();

        let denied = result.denied_policy().unwrap();
        assert_eq!(denied.package_name, "first");
        assert_eq!(denied.result, Some(json!({"reason": "x"})));
        assert_eq!(
            result.allowed_policies()["second"].result,
            Some(json!({"approved": true}))
        );
    }

    #[tokio::test]
    async fn test_last_deny_wins() {
        let runner = ScriptedRunner::new(&[
            ("Qm1", Ok(r#"{"allow":false,"error":"first"}"#)),
            ("Qm2", Ok(r#"{"allow":false,"error":"second"}"#)),
        ]);
        let calls = [call("a", "Qm1"), call("b", "Qm2")];
        let result = evaluate_policies(&calls, &routing(), "2.0.0", &runner).await.unwrap();
        let denied = result.denied_policy().unwrap();
        assert_eq!(denied.package_name, "b");
        assert_eq!(denied.error.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_unparseable_response_is_per_policy_deny() {
        let runner = ScriptedRunner::new(&[
            ("Qm1", Ok("not json")),
            ("Qm2", Ok(r#"{"allow":true,"result":{"approved":true}}"#)),
        ]);
        let calls = [call("a", "Qm1"), call("b", "Qm2")];
        let result = evaluate_policies(&calls, &routing(), "2.0.0", &runner).await.unwrap();
        let denied = result.denied_policy().unwrap();
        assert_eq!(denied.package_name, "a");
        assert!(denied.error.as_deref().unwrap().contains("Failed to parse"));
        assert_eq!(result.evaluated_policies().len(), 2);
    }

    #[tokio::test]
    async fn test_transport_error_is_per_policy_deny() {
        let runner = ScriptedRunner::new(&[("Qm1", Err("connection refused"))]);
        let result = evaluate_policies(&[call("a", "Qm1")], &routing(), "2.0.0", &runner)
            .await
            .unwrap();
        assert_eq!(
            result.denied_policy().unwrap().error.as_deref(),
            Some("connection refused")
        );
    }

    #[tokio::test]
    async fn test_allow_result_outside_schema_is_validation_deny() {
        let runner = ScriptedRunner::new(&[("Qm1", Ok(r#"{"allow":true,"result":{"approved":"yes"}}"#))]);
        let result = evaluate_policies(&[call("a", "Qm1")], &routing(), "2.0.0", &runner)
            .await
            .unwrap();
        let denied = result.denied_policy().unwrap();
        let marker = denied
            .result
            .as_ref()
            .and_then(crate::outcome::ValidationFailure::from_result)
            .unwrap();
        assert_eq!(marker.phase, LifecyclePhase::Evaluate);
    }

    #[tokio::test]
    async fn test_shapeless_response_is_fatal() {
        let runner = ScriptedRunner::new(&[
            ("Qm1", Ok(r#"{"allow":true}"#)),
            ("Qm2", Ok(r#"{"ok":true}"#)),
            ("Qm3", Ok(r#"{"allow":true}"#)),
        ]);
        let calls = [call("a", "Qm1"), call("b", "Qm2"), call("c", "Qm3")];
        let aborted = evaluate_policies(&calls, &routing(), "2.0.0", &runner)
            .await
            .unwrap_err();
        assert!(matches!(aborted.error, EngineError::MalformedPolicyResponse { .. }));
        assert_eq!(aborted.partial.evaluated_policies(), ["a", "b"]);
        assert!(aborted.partial.allowed_policies().contains_key("a"));
        assert!(!aborted.partial.allowed_policies().contains_key("b"));
        assert_eq!(*runner.calls.lock().unwrap(), ["Qm1", "Qm2"]);
    }

    #[tokio::test]
    async fn test_precheck_skips_policies_without_precheck() {
        let with_precheck = VincentPolicy::new(
            PolicyDefinition::new("checked", Schema::any(), |_args, ctx| async move {
                Ok(ctx.allow(None))
            })
            .with_precheck(Schema::absent(), Schema::any(), |_args, ctx| async move {
                Ok(ctx.deny(json!({"reason": "balance"})))
            }),
        );
        let calls = [
            call("plain", "Qm1"),
            PolicyCall {
                bound: Arc::new(BoundPolicy::new("Qm2", with_precheck)),
                tool_params: json!({}),
                user_params: None,
            },
        ];
        let result = precheck_policies(&calls, &routing()).await;
        assert_eq!(result.evaluated_policies(), ["checked"]);
        assert_eq!(result.denied_policy().unwrap().package_name, "checked");
    }

    #[test]
    fn test_empty_evaluation_allows() {
        let result = PolicyEvaluationResult::empty();
        assert!(result.is_allow());
        assert!(result.evaluated_policies().is_empty());
    }
}
