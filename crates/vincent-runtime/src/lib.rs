pub mod binding;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod invocation;
pub mod outcome;
pub mod policy;
pub mod remote;
pub mod sandbox;
pub mod schema;
pub mod tool;
pub mod version;

pub use binding::{bind_applicable_policies, map_tool_params, BoundPolicy, PolicyCall, SupportedPolicies};
pub use config::{EngineConfig, LogFormat, LoggingConfig, SandboxConfig};
pub use error::{EngineError, SchemaError};
pub use evaluation::{
    evaluate_policies, precheck_policies, AllowedPolicy, DeniedPolicy, EvaluationAborted,
    PolicyEvaluationResult,
};
pub use invocation::{
    Delegation, ToolContextSummary, ToolExecutionEnvelope, ToolExecutor, ToolInvocation,
};
pub use outcome::{
    select_result_schema, LifecyclePhase, OutcomeKind, PolicyResponse, ResultFlag,
    SchemaSelection, ToolResult, ValidationFailure, ValidationStage,
};
pub use policy::{
    PolicyArgs, PolicyCommit, PolicyContext, PolicyDefinition, PolicyPrecheck, PolicySchemas,
    VincentPolicy,
};
pub use remote::{
    PolicyResolver, PolicyRunner, RemoteEvaluationRequest, ResolvedPolicies, ResolvedPolicy,
    RoutingContext,
};
pub use sandbox::PolicySandbox;
pub use schema::{Schema, SchemaIssue};
pub use tool::{
    CommitHandle, ExecutePolicyEntry, ToolDefinition, ToolExecuteContext, ToolPrecheckContext,
    ToolSchemas, VincentTool,
};
pub use version::{assert_supported_api_version, TOOL_API_VERSION};

/// Initialize structured logging. `RUST_LOG` wins over the configured filter.
///
/// Returns `false` when a global subscriber was already installed, in which
/// case that subscriber is left in place.
pub fn init_logging(config: &LoggingConfig) -> bool {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    let installed = match config.format {
        LogFormat::Json => fmt().json().with_env_filter(filter).try_init(),
        LogFormat::Pretty => fmt().pretty().with_env_filter(filter).try_init(),
    };
    match installed {
        Ok(()) => true,
        Err(err) => {
            tracing::debug!(error = %err, "Tracing subscriber already installed, keeping it");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_keeps_existing_subscriber() {
        let config = LoggingConfig::default();
        init_logging(&config);
        assert!(!init_logging(&LoggingConfig {
            format: LogFormat::Pretty,
            ..config
        }));
    }
}
