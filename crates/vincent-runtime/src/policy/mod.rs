//! Policy definitions and their schema-bound lifecycle wrapper.

pub mod context;
pub mod wrapper;

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::outcome::PolicyResponse;
use crate::schema::Schema;

pub use context::PolicyContext;
pub use wrapper::{PolicyCommit, PolicyPrecheck, VincentPolicy};

/// Future returned by author lifecycle callbacks.
pub type LifecycleFuture<T> = BoxFuture<'static, anyhow::Result<T>>;

pub(crate) type PolicyLifecycleFn =
    Arc<dyn Fn(PolicyArgs, PolicyContext) -> LifecycleFuture<PolicyResponse> + Send + Sync>;

pub(crate) type CommitLifecycleFn =
    Arc<dyn Fn(Option<Value>, PolicyContext) -> LifecycleFuture<PolicyResponse> + Send + Sync>;

/// Parameters handed to `evaluate` and `precheck`.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyArgs {
    /// Tool parameters, already renamed to this policy's names.
    pub tool_params: Value,
    /// The policy's own on-chain configuration.
    pub user_params: Option<Value>,
}

/// Every payload shape a policy declares. Unset slots are [`Schema::absent`].
#[derive(Debug, Clone, Default)]
pub struct PolicySchemas {
    pub tool_params: Schema,
    pub user_params: Schema,
    pub eval_allow_result: Schema,
    pub eval_deny_result: Schema,
    pub precheck_allow_result: Schema,
    pub precheck_deny_result: Schema,
    pub commit_params: Schema,
    pub commit_allow_result: Schema,
    pub commit_deny_result: Schema,
}

/// A policy as written by its author: schemas plus raw callbacks.
pub struct PolicyDefinition {
    package_name: String,
    schemas: PolicySchemas,
    evaluate: PolicyLifecycleFn,
    precheck: Option<PolicyLifecycleFn>,
    commit: Option<CommitLifecycleFn>,
}

impl PolicyDefinition {
    pub fn new<F, Fut>(package_name: impl Into<String>, tool_params_schema: Schema, evaluate: F) -> Self
    where
        F: Fn(PolicyArgs, PolicyContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<PolicyResponse>> + Send + 'static,
    {
        Self {
            package_name: package_name.into(),
            schemas: PolicySchemas {
                tool_params: tool_params_schema,
                ..PolicySchemas::default()
            },
            evaluate: Arc::new(move |args: PolicyArgs, ctx: PolicyContext| evaluate(args, ctx).boxed()),
            precheck: None,
            commit: None,
        }
    }

    pub fn with_user_params_schema(mut self, schema: Schema) -> Self {
        self.schemas.user_params = schema;
        self
    }

    pub fn with_evaluate_results(mut self, allow: Schema, deny: Schema) -> Self {
        self.schemas.eval_allow_result = allow;
        self.schemas.eval_deny_result = deny;
        self
    }

    pub fn with_precheck<F, Fut>(mut self, allow: Schema, deny: Schema, precheck: F) -> Self
    where
        F: Fn(PolicyArgs, PolicyContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<PolicyResponse>> + Send + 'static,
    {
        self.schemas.precheck_allow_result = allow;
        self.schemas.precheck_deny_result = deny;
        self.precheck = Some(Arc::new(move |args: PolicyArgs, ctx: PolicyContext| precheck(args, ctx).boxed()));
        self
    }

    pub fn with_commit<F, Fut>(
        mut self,
        params: Schema,
        allow: Schema,
        deny: Schema,
        commit: F,
    ) -> Self
    where
        F: Fn(Option<Value>, PolicyContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<PolicyResponse>> + Send + 'static,
    {
        self.schemas.commit_params = params;
        self.schemas.commit_allow_result = allow;
        self.schemas.commit_deny_result = deny;
        self.commit = Some(Arc::new(move |params: Option<Value>, ctx: PolicyContext| commit(params, ctx).boxed()));
        self
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn schemas(&self) -> &PolicySchemas {
        &self.schemas
    }

    pub fn has_precheck(&self) -> bool {
        self.precheck.is_some()
    }

    pub fn has_commit(&self) -> bool {
        self.commit.is_some()
    }
}

impl std::fmt::Debug for PolicyDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyDefinition")
            .field("package_name", &self.package_name)
            .field("precheck", &self.has_precheck())
            .field("commit", &self.has_commit())
            .finish()
    }
}
