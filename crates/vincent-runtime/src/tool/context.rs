//! Contexts handed to a tool's raw `precheck` and `execute`.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::binding::SupportedPolicies;
use crate::error::EngineError;
use crate::evaluation::PolicyEvaluationResult;
use crate::outcome::{
    check_payload, LifecycleOutcome, LifecyclePhase, PolicyResponse, ToolResult, ValidationStage,
};
use crate::policy::PolicyCommit;
use crate::remote::RoutingContext;
use crate::schema::Schema;

/// Builds tool results, checking payloads against the phase's schemas.
#[derive(Debug, Clone)]
struct ResultGate {
    phase: LifecyclePhase,
    success_schema: Schema,
    fail_schema: Schema,
}

impl ResultGate {
    fn succeed(&self, result: Option<Value>) -> ToolResult {
        match check_payload(result.as_ref(), &self.success_schema, self.phase, ValidationStage::Output) {
            Ok(result) => ToolResult::success(result),
            Err(failure) => ToolResult::from_validation_failure(failure),
        }
    }

    fn fail(&self, result: Option<Value>, error: Option<String>) -> ToolResult {
        match check_payload(result.as_ref(), &self.fail_schema, self.phase, ValidationStage::Output) {
            Ok(result) => ToolResult::failure(result, error),
            Err(failure) => ToolResult::from_validation_failure(failure),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolPrecheckContext {
    routing: RoutingContext,
    policies: PolicyEvaluationResult,
    gate: ResultGate,
}

impl ToolPrecheckContext {
    pub(crate) fn new(
        routing: RoutingContext,
        policies: PolicyEvaluationResult,
        success_schema: Schema,
        fail_schema: Schema,
    ) -> Self {
        Self {
            routing,
            policies,
            gate: ResultGate {
                phase: LifecyclePhase::Precheck,
                success_schema,
                fail_schema,
            },
        }
    }

    pub fn tool_ipfs_cid(&self) -> &str {
        &self.routing.tool_ipfs_cid
    }

    pub fn delegator_address(&self) -> &str {
        &self.routing.delegator_address
    }

    pub fn delegatee_address(&self) -> &str {
        &self.routing.delegatee_address
    }

    /// Aggregated policy precheck outcome, read-only.
    pub fn policies(&self) -> &PolicyEvaluationResult {
        &self.policies
    }

    pub fn succeed(&self, result: impl Into<Option<Value>>) -> ToolResult {
        self.gate.succeed(result.into())
    }

    pub fn fail(&self, result: impl Into<Option<Value>>) -> ToolResult {
        self.gate.fail(result.into(), None)
    }

    pub fn fail_with_error(&self, result: impl Into<Option<Value>>, error: impl Into<String>) -> ToolResult {
        self.gate.fail(result.into(), Some(error.into()))
    }
}

/// Commit of an allowed policy, bound to the invocation's routing context.
#[derive(Debug, Clone)]
pub struct CommitHandle {
    commit: PolicyCommit,
    routing: RoutingContext,
}

impl CommitHandle {
    pub fn package_name(&self) -> &str {
        self.commit.package_name()
    }

    /// Run the policy's wrapped commit. Never fails; problems come back as
    /// a `Deny`.
    pub async fn call(&self, params: impl Into<Option<Value>>) -> PolicyResponse {
        self.commit.run(params.into(), &self.routing).await
    }
}

/// An allowed policy as seen from `execute`.
#[derive(Debug, Clone)]
pub struct ExecutePolicyEntry {
    pub result: Option<Value>,
    /// Present only when the policy declared a commit.
    pub commit: Option<CommitHandle>,
}

#[derive(Debug, Clone)]
pub struct ToolExecuteContext {
    routing: RoutingContext,
    evaluated_policies: Vec<String>,
    allowed_policies: BTreeMap<String, ExecutePolicyEntry>,
    gate: ResultGate,
}

impl ToolExecuteContext {
    pub fn tool_ipfs_cid(&self) -> &str {
        &self.routing.tool_ipfs_cid
    }

    pub fn delegator_address(&self) -> &str {
        &self.routing.delegator_address
    }

    pub fn delegatee_address(&self) -> &str {
        &self.routing.delegatee_address
    }

    pub fn evaluated_policies(&self) -> &[String] {
        &self.evaluated_policies
    }

    pub fn allowed_policies(&self) -> &BTreeMap<String, ExecutePolicyEntry> {
        &self.allowed_policies
    }

    pub fn policy(&self, package_name: &str) -> Option<&ExecutePolicyEntry> {
        self.allowed_policies.get(package_name)
    }

    pub fn succeed(&self, result: impl Into<Option<Value>>) -> ToolResult {
        self.gate.succeed(result.into())
    }

    pub fn fail(&self, result: impl Into<Option<Value>>) -> ToolResult {
        self.gate.fail(result.into(), None)
    }

    pub fn fail_with_error(&self, result: impl Into<Option<Value>>, error: impl Into<String>) -> ToolResult {
        self.gate.fail(result.into(), Some(error.into()))
    }
}

/// Build the execute context from an allow-branch evaluation, attaching a
/// commit handle to each allowed policy that declared one.
pub(crate) fn build_execute_context(
    evaluation: &PolicyEvaluationResult,
    supported: &SupportedPolicies,
    routing: &RoutingContext,
    success_schema: Schema,
    fail_schema: Schema,
) -> Result<ToolExecuteContext, EngineError> {
    if let Some(denied) = evaluation.denied_policy() {
        return Err(EngineError::ExecuteAfterDeny {
            package: denied.package_name.clone(),
        });
    }

    let allowed_policies = evaluation
        .allowed_policies()
        .iter()
        .map(|(package, allowed)| {
            let commit = supported
                .by_package(package)
                .and_then(|bound| bound.policy.commit())
                .map(|commit| CommitHandle {
                    commit,
                    routing: routing.clone(),
                });
            (
                package.clone(),
                ExecutePolicyEntry {
                    result: allowed.result.clone(),
                    commit,
                },
            )
        })
        .collect();

    Ok(ToolExecuteContext {
        routing: routing.clone(),
        evaluated_policies: evaluation.evaluated_policies().to_vec(),
        allowed_policies,
        gate: ResultGate {
            phase: LifecyclePhase::Execute,
            success_schema,
            fail_schema,
        },
    })
}
