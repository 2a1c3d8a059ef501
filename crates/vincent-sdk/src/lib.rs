//! Author-facing surface for writing Vincent tools and policies.
//!
//! ```no_run
//! use serde_json::json;
//! use vincent_sdk::prelude::*;
//!
//! let limit = PolicyDefinition::new("spend-limit", Schema::any(), |args, ctx| async move {
//!     let amount = args.tool_params["amount"].as_u64().unwrap_or_default();
//!     if amount <= 100 {
//!         Ok(ctx.allow(None))
//!     } else {
//!         Ok(ctx.deny_with_error(None, "over limit"))
//!     }
//! });
//!
//! let tool = ToolDefinition::new("transfer", Schema::any(), |_params, ctx| async move {
//!     Ok(ctx.succeed(json!({"txHash": "0x0"})))
//! })
//! .with_execute_results(Schema::any(), Schema::absent())
//! .with_policy(BoundPolicy::new("QmSpendLimit", limit).map_param("amount", "amount"))?;
//! # Ok::<(), vincent_sdk::EngineError>(())
//! ```

pub use vincent_runtime::{
    BoundPolicy, CommitHandle, EngineError, ExecutePolicyEntry, LifecyclePhase,
    PolicyArgs, PolicyContext, PolicyDefinition, PolicyEvaluationResult, PolicyResponse,
    Schema, SchemaError, ToolDefinition, ToolExecuteContext, ToolPrecheckContext, ToolResult,
    ValidationFailure, VincentPolicy, VincentTool, TOOL_API_VERSION,
};

/// API version new tools are stamped with.
pub const API_VERSION: &str = TOOL_API_VERSION;

pub mod prelude {
    pub use super::{
        BoundPolicy, PolicyArgs, PolicyContext, PolicyDefinition, Schema, ToolDefinition,
        ToolExecuteContext, ToolPrecheckContext,
    };
}

/// Compile a JSON Schema document into a [`Schema`].
pub fn schema(document: serde_json::Value) -> Result<Schema, SchemaError> {
    Schema::json(document)
}
