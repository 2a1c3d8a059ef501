//! Tool definitions and their schema-bound lifecycle wrapper.

pub mod context;
pub mod wrapper;

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;

use crate::binding::{BoundPolicy, SupportedPolicies};
use crate::error::EngineError;
use crate::outcome::ToolResult;
use crate::policy::LifecycleFuture;
use crate::schema::Schema;
use crate::version::TOOL_API_VERSION;

pub use context::{CommitHandle, ExecutePolicyEntry, ToolExecuteContext, ToolPrecheckContext};
pub use wrapper::VincentTool;

pub(crate) type ToolPrecheckFn =
    Arc<dyn Fn(Value, ToolPrecheckContext) -> LifecycleFuture<ToolResult> + Send + Sync>;

pub(crate) type ToolExecuteFn =
    Arc<dyn Fn(Value, ToolExecuteContext) -> LifecycleFuture<ToolResult> + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct ToolSchemas {
    pub tool_params: Schema,
    pub precheck_success: Schema,
    pub precheck_fail: Schema,
    pub execute_success: Schema,
    pub execute_fail: Schema,
}

/// A tool as written by its author.
pub struct ToolDefinition {
    package_name: String,
    api_version: String,
    schemas: ToolSchemas,
    supported_policies: SupportedPolicies,
    precheck: Option<ToolPrecheckFn>,
    execute: ToolExecuteFn,
}

impl ToolDefinition {
    pub fn new<F, Fut>(package_name: impl Into<String>, tool_params_schema: Schema, execute: F) -> Self
    where
        F: Fn(Value, ToolExecuteContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ToolResult>> + Send + 'static,
    {
        Self {
            package_name: package_name.into(),
            api_version: TOOL_API_VERSION.to_string(),
            schemas: ToolSchemas {
                tool_params: tool_params_schema,
                ..ToolSchemas::default()
            },
            supported_policies: SupportedPolicies::default(),
            precheck: None,
            execute: Arc::new(move |params: Value, ctx: ToolExecuteContext| execute(params, ctx).boxed()),
        }
    }

    /// Override the API version the tool was built against.
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    pub fn with_execute_results(mut self, success: Schema, fail: Schema) -> Self {
        self.schemas.execute_success = success;
        self.schemas.execute_fail = fail;
        self
    }

    pub fn with_precheck<F, Fut>(mut self, success: Schema, fail: Schema, precheck: F) -> Self
    where
        F: Fn(Value, ToolPrecheckContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ToolResult>> + Send + 'static,
    {
        self.schemas.precheck_success = success;
        self.schemas.precheck_fail = fail;
        self.precheck = Some(Arc::new(move |params: Value, ctx: ToolPrecheckContext| {
            precheck(params, ctx).boxed()
        }));
        self
    }

    /// Bind a policy. Package names and CIDs must be unique per tool.
    pub fn with_policy(mut self, bound: BoundPolicy) -> Result<Self, EngineError> {
        self.supported_policies.insert(&self.package_name, bound)?;
        Ok(self)
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn schemas(&self) -> &ToolSchemas {
        &self.schemas
    }

    pub fn supported_policies(&self) -> &SupportedPolicies {
        &self.supported_policies
    }

    pub fn has_precheck(&self) -> bool {
        self.precheck.is_some()
    }
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("package_name", &self.package_name)
            .field("api_version", &self.api_version)
            .field("supported_policies", &self.supported_policies.len())
            .field("precheck", &self.has_precheck())
            .finish()
    }
}
