//! Schema-bound wrapper around a [`PolicyDefinition`].
//!
//! Every lifecycle call goes validate-in → invoke → validate-out and is
//! total: validation mismatches, author errors and panics all come back as a
//! `Deny`, never as a Rust error.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::{PolicyArgs, PolicyContext, PolicyDefinition, PolicyLifecycleFn};
use crate::outcome::{
    failure_boundary, select_result_schema, validate_input, validate_output, LifecycleOutcome,
    LifecyclePhase, OutcomeKind, PolicyResponse, ResultFlag,
};
use crate::remote::RoutingContext;
use crate::schema::Schema;

/// Runtime-safe policy built from a definition.
#[derive(Debug, Clone)]
pub struct VincentPolicy {
    definition: Arc<PolicyDefinition>,
}

impl VincentPolicy {
    pub fn new(definition: PolicyDefinition) -> Self {
        Self {
            definition: Arc::new(definition),
        }
    }

    pub fn package_name(&self) -> &str {
        self.definition.package_name()
    }

    pub fn definition(&self) -> &PolicyDefinition {
        &self.definition
    }

    pub async fn evaluate(&self, args: PolicyArgs, routing: &RoutingContext) -> PolicyResponse {
        let schemas = &self.definition.schemas;
        run_policy_phase(
            &self.definition,
            LifecyclePhase::Evaluate,
            &self.definition.evaluate,
            args,
            routing,
            &schemas.eval_allow_result,
            &schemas.eval_deny_result,
        )
        .await
    }

    /// `None` when the author supplied no precheck.
    pub fn precheck(&self) -> Option<PolicyPrecheck> {
        self.definition.precheck.as_ref().map(|_| PolicyPrecheck {
            definition: self.definition.clone(),
        })
    }

    /// `None` when the author supplied no commit.
    pub fn commit(&self) -> Option<PolicyCommit> {
        self.definition.commit.as_ref().map(|_| PolicyCommit {
            definition: self.definition.clone(),
        })
    }
}

impl From<PolicyDefinition> for VincentPolicy {
    fn from(definition: PolicyDefinition) -> Self {
        Self::new(definition)
    }
}

/// Wrapped precheck of a policy that declared one.
#[derive(Debug, Clone)]
pub struct PolicyPrecheck {
    definition: Arc<PolicyDefinition>,
}

impl PolicyPrecheck {
    pub async fn run(&self, args: PolicyArgs, routing: &RoutingContext) -> PolicyResponse {
        let Some(precheck) = self.definition.precheck.as_ref() else {
            return PolicyResponse::from_error(format!(
                "Policy '{}' has no precheck",
                self.definition.package_name()
            ));
        };
        let schemas = &self.definition.schemas;
        run_policy_phase(
            &self.definition,
            LifecyclePhase::Precheck,
            precheck,
            args,
            routing,
            &schemas.precheck_allow_result,
            &schemas.precheck_deny_result,
        )
        .await
    }
}

/// Wrapped commit of a policy that declared one.
#[derive(Debug, Clone)]
pub struct PolicyCommit {
    definition: Arc<PolicyDefinition>,
}

impl PolicyCommit {
    pub fn package_name(&self) -> &str {
        self.definition.package_name()
    }

    pub async fn run(&self, params: Option<Value>, routing: &RoutingContext) -> PolicyResponse {
        let package = self.definition.package_name();
        let Some(commit) = self.definition.commit.as_ref() else {
            return PolicyResponse::from_error(format!("Policy '{package}' has no commit"));
        };
        let schemas = &self.definition.schemas;
        let phase = LifecyclePhase::Commit;

        let params = match validate_input::<PolicyResponse>(params.as_ref(), &schemas.commit_params, phase) {
            Ok(params) => params,
            Err(deny) => {
                warn!(policy = package, %phase, "Commit params rejected");
                return deny;
            }
        };

        let ctx = PolicyContext::new(
            routing.clone(),
            phase,
            schemas.commit_allow_result.clone(),
            schemas.commit_deny_result.clone(),
        );
        debug!(policy = package, %phase, "Invoking policy lifecycle");
        let outcome = failure_boundary(async move { commit(params, ctx).await }).await;
        finish_policy_phase(
            package,
            phase,
            outcome,
            &schemas.commit_allow_result,
            &schemas.commit_deny_result,
        )
    }
}

async fn run_policy_phase(
    definition: &PolicyDefinition,
    phase: LifecyclePhase,
    callback: &PolicyLifecycleFn,
    args: PolicyArgs,
    routing: &RoutingContext,
    allow_schema: &Schema,
    deny_schema: &Schema,
) -> PolicyResponse {
    let package = definition.package_name();
    let schemas = &definition.schemas;

    let tool_params =
        match validate_input::<PolicyResponse>(Some(&args.tool_params), &schemas.tool_params, phase) {
            Ok(params) => params.unwrap_or(Value::Null),
            Err(deny) => {
                warn!(policy = package, %phase, "Tool params rejected");
                return deny;
            }
        };
    let user_params =
        match validate_input::<PolicyResponse>(args.user_params.as_ref(), &schemas.user_params, phase) {
            Ok(params) => params,
            Err(deny) => {
                warn!(policy = package, %phase, "User params rejected");
                return deny;
            }
        };

    let ctx = PolicyContext::new(routing.clone(), phase, allow_schema.clone(), deny_schema.clone());
    debug!(policy = package, %phase, "Invoking policy lifecycle");
    let args = PolicyArgs {
        tool_params,
        user_params,
    };
    // The author closure may panic before handing back its future.
    let outcome = failure_boundary(async move { callback(args, ctx).await }).await;
    finish_policy_phase(package, phase, outcome, allow_schema, deny_schema)
}

fn finish_policy_phase(
    package: &str,
    phase: LifecyclePhase,
    outcome: Result<PolicyResponse, String>,
    allow_schema: &Schema,
    deny_schema: &Schema,
) -> PolicyResponse {
    let response = match outcome {
        Ok(response) => response,
        Err(message) => {
            warn!(policy = package, %phase, error = %message, "Policy lifecycle failed");
            return PolicyResponse::from_error(message);
        }
    };
    if !response.is_allow() {
        return response;
    }

    let raw = serde_json::to_value(&response).unwrap_or(Value::Null);
    let selection = select_result_schema(&raw, ResultFlag::Allow, allow_schema, deny_schema);
    if selection.kind != OutcomeKind::Positive {
        return PolicyResponse::from_error(format!(
            "Policy '{package}' produced an unclassifiable {phase} result"
        ));
    }
    match validate_output::<PolicyResponse>(response.result(), &selection.schema, phase) {
        Ok(result) => PolicyResponse::allow(result),
        Err(deny) => {
            warn!(policy = package, %phase, "Policy result rejected by schema");
            deny
        }
    }
}
