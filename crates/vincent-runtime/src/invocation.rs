//! Top-level invocation handler: resolve, validate, evaluate, execute, and
//! always answer with a [`ToolExecutionEnvelope`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::binding::bind_applicable_policies;
use crate::error::EngineError;
use crate::evaluation::{evaluate_policies, precheck_policies, PolicyEvaluationResult};
use crate::outcome::{LifecycleOutcome, LifecyclePhase, ToolResult};
use crate::remote::{PolicyResolver, PolicyRunner, ResolvedPolicies, RoutingContext};
use crate::tool::VincentTool;
use crate::version::assert_supported_api_version;

/// One request to run a tool on behalf of a delegator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub tool_ipfs_cid: String,
    pub delegatee_address: String,
    pub delegator_address: String,
    pub tool_params: Value,
}

impl ToolInvocation {
    fn routing(&self) -> RoutingContext {
        RoutingContext {
            tool_ipfs_cid: self.tool_ipfs_cid.clone(),
            delegator_address: self.delegator_address.clone(),
            delegatee_address: self.delegatee_address.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Delegation {
    pub delegatee_address: String,
    pub delegator_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolContextSummary {
    pub tool_ipfs_cid: String,
    pub app_id: Option<u64>,
    pub app_version: Option<u64>,
    pub delegation: Delegation,
    /// `null` until policy evaluation has run.
    pub policies_context: Option<PolicyEvaluationResult>,
}

/// Final answer returned to the invoking host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionEnvelope {
    pub tool_execution_result: ToolResult,
    pub tool_context: ToolContextSummary,
}

impl ToolExecutionEnvelope {
    fn new(invocation: &ToolInvocation) -> Self {
        Self {
            tool_execution_result: ToolResult::success(None),
            tool_context: ToolContextSummary {
                tool_ipfs_cid: invocation.tool_ipfs_cid.clone(),
                app_id: None,
                app_version: None,
                delegation: Delegation {
                    delegatee_address: invocation.delegatee_address.clone(),
                    delegator_address: invocation.delegator_address.clone(),
                },
                policies_context: None,
            },
        }
    }

    fn record_resolution(&mut self, resolved: &ResolvedPolicies) {
        self.tool_context.app_id = resolved.app_id;
        self.tool_context.app_version = resolved.app_version;
    }
}

/// Drives tool invocations against a resolver and a sandbox runner.
#[derive(Clone)]
pub struct ToolExecutor {
    resolver: Arc<dyn PolicyResolver>,
    runner: Arc<dyn PolicyRunner>,
}

impl ToolExecutor {
    pub fn new(resolver: Arc<dyn PolicyResolver>, runner: Arc<dyn PolicyRunner>) -> Self {
        Self { resolver, runner }
    }

    /// Evaluate all applicable policies remotely, then execute the tool if
    /// they allow.
    ///
    /// Only an API version mismatch is returned as `Err`. Every other fatal
    /// error is reported inside the envelope as a `Failure`.
    pub async fn execute(
        &self,
        tool: &VincentTool,
        invocation: ToolInvocation,
    ) -> Result<ToolExecutionEnvelope, EngineError> {
        assert_supported_api_version(tool.package_name(), tool.api_version())?;

        let span = info_span!(
            "tool_execute",
            invocation_id = %Uuid::new_v4(),
            tool = tool.package_name(),
            ipfs_cid = %invocation.tool_ipfs_cid,
        );
        let envelope = async move {
            let mut envelope = ToolExecutionEnvelope::new(&invocation);
            if let Err(err) = self.run_execute(tool, &invocation, &mut envelope).await {
                error!(error = %err, "Tool invocation aborted");
                envelope.tool_execution_result = ToolResult::from_error(err.to_string());
            }
            envelope
        }
        .instrument(span)
        .await;
        Ok(envelope)
    }

    async fn run_execute(
        &self,
        tool: &VincentTool,
        invocation: &ToolInvocation,
        envelope: &mut ToolExecutionEnvelope,
    ) -> Result<(), EngineError> {
        let resolved = self.resolve(invocation).await?;
        envelope.record_resolution(&resolved);

        let params = match tool.validate_params(&invocation.tool_params, LifecyclePhase::Execute) {
            Ok(params) => params,
            Err(failure) => {
                envelope.tool_execution_result = failure;
                return Ok(());
            }
        };

        let calls = bind_applicable_policies(tool.package_name(), tool.supported_policies(), &params, &resolved)?;
        let routing = invocation.routing();
        let evaluation = match evaluate_policies(&calls, &routing, tool.api_version(), self.runner.as_ref()).await {
            Ok(evaluation) => evaluation,
            Err(aborted) => {
                envelope.tool_context.policies_context = Some(aborted.partial);
                return Err(aborted.error);
            }
        };

        let result = match evaluation.denied_policy() {
            Some(denied) => {
                warn!(policy = %denied.package_name, "Tool execution denied by policy");
                Ok(ToolResult::from_error(format!(
                    "Policy '{}' denied tool execution",
                    denied.package_name
                )))
            }
            None => tool.execute(&params, &evaluation, &routing).await,
        };
        envelope.tool_context.policies_context = Some(evaluation);
        envelope.tool_execution_result = result?;
        info!(
            success = envelope.tool_execution_result.is_success(),
            "Tool invocation finished"
        );
        Ok(())
    }

    /// Run every applicable policy's local precheck and, if they allow, the
    /// tool's own precheck. Nothing is committed.
    pub async fn precheck(
        &self,
        tool: &VincentTool,
        invocation: ToolInvocation,
    ) -> Result<ToolExecutionEnvelope, EngineError> {
        assert_supported_api_version(tool.package_name(), tool.api_version())?;

        let span = info_span!(
            "tool_precheck",
            invocation_id = %Uuid::new_v4(),
            tool = tool.package_name(),
            ipfs_cid = %invocation.tool_ipfs_cid,
        );
        let envelope = async move {
            let mut envelope = ToolExecutionEnvelope::new(&invocation);
            if let Err(err) = self.run_precheck(tool, &invocation, &mut envelope).await {
                error!(error = %err, "Tool precheck aborted");
                envelope.tool_execution_result = ToolResult::from_error(err.to_string());
            }
            envelope
        }
        .instrument(span)
        .await;
        Ok(envelope)
    }

    async fn run_precheck(
        &self,
        tool: &VincentTool,
        invocation: &ToolInvocation,
        envelope: &mut ToolExecutionEnvelope,
    ) -> Result<(), EngineError> {
        let resolved = self.resolve(invocation).await?;
        envelope.record_resolution(&resolved);

        let params = match tool.validate_params(&invocation.tool_params, LifecyclePhase::Precheck) {
            Ok(params) => params,
            Err(failure) => {
                envelope.tool_execution_result = failure;
                return Ok(());
            }
        };

        let calls = bind_applicable_policies(tool.package_name(), tool.supported_policies(), &params, &resolved)?;
        let routing = invocation.routing();
        let evaluation = precheck_policies(&calls, &routing).await;

        envelope.tool_execution_result = match evaluation.denied_policy() {
            Some(denied) => {
                warn!(policy = %denied.package_name, "Tool precheck denied by policy");
                ToolResult::from_error(format!(
                    "Policy '{}' denied tool precheck",
                    denied.package_name
                ))
            }
            None => tool
                .precheck(&params, evaluation.clone(), &routing)
                .await
                .unwrap_or_else(|| ToolResult::success(None)),
        };
        envelope.tool_context.policies_context = Some(evaluation);
        Ok(())
    }

    async fn resolve(&self, invocation: &ToolInvocation) -> Result<ResolvedPolicies, EngineError> {
        let resolved = self
            .resolver
            .resolve(
                &invocation.delegatee_address,
                &invocation.delegator_address,
                &invocation.tool_ipfs_cid,
            )
            .await
            .map_err(|err| EngineError::Resolution(err.to_string()))?;
        if !resolved.is_permitted {
            return Err(EngineError::NotPermitted {
                delegatee: invocation.delegatee_address.clone(),
                delegator: invocation.delegator_address.clone(),
                tool_ipfs_cid: invocation.tool_ipfs_cid.clone(),
            });
        }
        info!(
            app_id = ?resolved.app_id,
            policies = resolved.decoded_policies.len(),
            "Resolved applicable policies"
        );
        Ok(resolved)
    }
}
