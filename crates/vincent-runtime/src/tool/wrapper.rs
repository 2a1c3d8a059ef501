//! Schema-bound wrapper around a [`ToolDefinition`].

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::context::{build_execute_context, ToolPrecheckContext};
use super::ToolDefinition;
use crate::binding::SupportedPolicies;
use crate::error::EngineError;
use crate::evaluation::PolicyEvaluationResult;
use crate::outcome::{
    failure_boundary, select_result_schema, validate_input, validate_output, LifecycleOutcome,
    LifecyclePhase, OutcomeKind, ResultFlag, ToolResult,
};
use crate::remote::RoutingContext;
use crate::schema::Schema;

/// Runtime-safe tool built from a definition.
#[derive(Debug, Clone)]
pub struct VincentTool {
    definition: Arc<ToolDefinition>,
}

impl VincentTool {
    pub fn new(definition: ToolDefinition) -> Self {
        Self {
            definition: Arc::new(definition),
        }
    }

    pub fn package_name(&self) -> &str {
        self.definition.package_name()
    }

    pub fn api_version(&self) -> &str {
        self.definition.api_version()
    }

    pub fn supported_policies(&self) -> &SupportedPolicies {
        self.definition.supported_policies()
    }

    pub fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    /// Check raw tool params before any context exists.
    pub fn validate_params(&self, params: &Value, phase: LifecyclePhase) -> Result<Value, ToolResult> {
        validate_input::<ToolResult>(Some(params), &self.definition.schemas.tool_params, phase)
            .map(|params| params.unwrap_or(Value::Null))
            .inspect_err(|_| warn!(tool = self.package_name(), %phase, "Tool params rejected"))
    }

    /// `None` when the author supplied no precheck.
    pub async fn precheck(
        &self,
        params: &Value,
        policies: PolicyEvaluationResult,
        routing: &RoutingContext,
    ) -> Option<ToolResult> {
        let precheck = self.definition.precheck.as_ref()?;
        let phase = LifecyclePhase::Precheck;
        let schemas = &self.definition.schemas;

        let params = match self.validate_params(params, phase) {
            Ok(params) => params,
            Err(failure) => return Some(failure),
        };
        let ctx = ToolPrecheckContext::new(
            routing.clone(),
            policies,
            schemas.precheck_success.clone(),
            schemas.precheck_fail.clone(),
        );
        debug!(tool = self.package_name(), %phase, "Invoking tool lifecycle");
        let outcome = failure_boundary(async move { precheck(params, ctx).await }).await;
        Some(self.finish(phase, outcome, &schemas.precheck_success, &schemas.precheck_fail))
    }

    /// Run `execute`. Only an evaluation that denied is an error here; every
    /// other problem is returned as a `Failure`.
    pub async fn execute(
        &self,
        params: &Value,
        policies: &PolicyEvaluationResult,
        routing: &RoutingContext,
    ) -> Result<ToolResult, EngineError> {
        let phase = LifecyclePhase::Execute;
        let schemas = &self.definition.schemas;

        let params = match self.validate_params(params, phase) {
            Ok(params) => params,
            Err(failure) => return Ok(failure),
        };
        let ctx = build_execute_context(
            policies,
            &self.definition.supported_policies,
            routing,
            schemas.execute_success.clone(),
            schemas.execute_fail.clone(),
        )?;
        debug!(tool = self.package_name(), %phase, "Invoking tool lifecycle");
        let execute = &self.definition.execute;
        let outcome = failure_boundary(async move { execute(params, ctx).await }).await;
        Ok(self.finish(phase, outcome, &schemas.execute_success, &schemas.execute_fail))
    }

    fn finish(
        &self,
        phase: LifecyclePhase,
        outcome: Result<ToolResult, String>,
        success_schema: &Schema,
        fail_schema: &Schema,
    ) -> ToolResult {
        let package = self.package_name();
        let result = match outcome {
            Ok(result) => result,
            Err(message) => {
                warn!(tool = package, %phase, error = %message, "Tool lifecycle failed");
                return ToolResult::from_error(message);
            }
        };
        if !result.is_success() {
            return result;
        }

        let raw = serde_json::to_value(&result).unwrap_or(Value::Null);
        let selection = select_result_schema(&raw, ResultFlag::Success, success_schema, fail_schema);
        if selection.kind != OutcomeKind::Positive {
            return ToolResult::from_error(format!(
                "Tool '{package}' produced an unclassifiable {phase} result"
            ));
        }
        match validate_output::<ToolResult>(result.result(), &selection.schema, phase) {
            Ok(result) => ToolResult::success(result),
            Err(failure) => {
                warn!(tool = package, %phase, "Tool result rejected by schema");
                failure
            }
        }
    }
}

impl From<ToolDefinition> for VincentTool {
    fn from(definition: ToolDefinition) -> Self {
        Self::new(definition)
    }
}
