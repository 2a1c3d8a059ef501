//! In-process stand-in for the isolated environment that runs packaged
//! policy code. Answers remote evaluation requests with the same textual
//! payload a real sandbox would produce.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::outcome::{LifecycleOutcome, PolicyResponse};
use crate::policy::{PolicyArgs, VincentPolicy};
use crate::remote::{PolicyResolver, RemoteEvaluationRequest};
use crate::version::assert_supported_api_version;

pub struct PolicySandbox {
    policies: HashMap<String, VincentPolicy>,
    resolver: Arc<dyn PolicyResolver>,
}

impl PolicySandbox {
    pub fn new(resolver: Arc<dyn PolicyResolver>) -> Self {
        Self {
            policies: HashMap::new(),
            resolver,
        }
    }

    /// Host `policy` under the content address `ipfs_cid`.
    pub fn with_policy(mut self, ipfs_cid: impl Into<String>, policy: impl Into<VincentPolicy>) -> Self {
        self.policies.insert(ipfs_cid.into(), policy.into());
        self
    }

    pub fn contains(&self, ipfs_cid: &str) -> bool {
        self.policies.contains_key(ipfs_cid)
    }

    /// Evaluate the hosted policy and serialise its response. Every failure
    /// is reported as a deny payload.
    pub async fn handle(&self, ipfs_cid: &str, request: &RemoteEvaluationRequest) -> String {
        let response = self.evaluate(ipfs_cid, request).await;
        match serde_json::to_string(&response) {
            Ok(body) => body,
            Err(err) => {
                warn!(ipfs_cid, error = %err, "Failed to serialise policy response");
                r#"{"allow":false,"error":"Failed to serialise policy response"}"#.to_string()
            }
        }
    }

    async fn evaluate(&self, ipfs_cid: &str, request: &RemoteEvaluationRequest) -> PolicyResponse {
        let Some(policy) = self.policies.get(ipfs_cid) else {
            warn!(ipfs_cid, "Unknown policy requested");
            return PolicyResponse::from_error(format!("Unknown policy {ipfs_cid}"));
        };
        if let Err(err) = assert_supported_api_version(policy.package_name(), &request.tool_api_version) {
            return PolicyResponse::from_error(err.to_string());
        }

        let context = &request.context;
        let resolved = match self
            .resolver
            .resolve(
                &context.delegatee_address,
                &context.delegator_address,
                &context.tool_ipfs_cid,
            )
            .await
        {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!(ipfs_cid, error = %err, "User params lookup failed");
                return PolicyResponse::from_error(format!("Failed to resolve user params: {err}"));
            }
        };
        let user_params: Option<Value> = resolved.user_params_for(ipfs_cid).cloned();

        debug!(policy = policy.package_name(), ipfs_cid, "Sandbox evaluating policy");
        policy
            .evaluate(
                PolicyArgs {
                    tool_params: request.tool_params.clone(),
                    user_params,
                },
                context,
            )
            .await
    }
}

impl std::fmt::Debug for PolicySandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicySandbox")
            .field("policies", &self.policies.keys().collect::<Vec<_>>())
            .finish()
    }
}
