//! Seams to the two external collaborators: the sandbox that runs packaged
//! policy code, and the on-chain lookup of which policies apply.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity of the invocation a policy is being asked about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingContext {
    pub tool_ipfs_cid: String,
    pub delegator_address: String,
    pub delegatee_address: String,
}

/// Payload sent to the sandbox for one policy evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEvaluationRequest {
    pub tool_params: Value,
    pub context: RoutingContext,
    pub tool_api_version: String,
}

/// Runs a policy's packaged code in an isolated environment.
///
/// Returns the raw textual response; parsing and validation are the
/// orchestrator's job. An `Err` is treated like the policy having thrown.
#[async_trait]
pub trait PolicyRunner: Send + Sync {
    async fn run(&self, policy_ipfs_cid: &str, request: &RemoteEvaluationRequest)
        -> Result<String>;
}

/// One applicable policy with its on-chain configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPolicy {
    pub ipfs_cid: String,
    #[serde(default)]
    pub user_params: Option<Value>,
}

/// Answer of the on-chain permission lookup. `decoded_policies` keeps the
/// order in which policies must be evaluated.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPolicies {
    pub is_permitted: bool,
    #[serde(default)]
    pub app_id: Option<u64>,
    #[serde(default)]
    pub app_version: Option<u64>,
    #[serde(default)]
    pub decoded_policies: Vec<ResolvedPolicy>,
}

impl ResolvedPolicies {
    pub fn not_permitted() -> Self {
        Self::default()
    }

    pub fn user_params_for(&self, ipfs_cid: &str) -> Option<&Value> {
        self.decoded_policies
            .iter()
            .find(|policy| policy.ipfs_cid == ipfs_cid)
            .and_then(|policy| policy.user_params.as_ref())
    }
}

/// Resolves which policies apply to `(delegatee, delegator, tool)`.
#[async_trait]
pub trait PolicyResolver: Send + Sync {
    async fn resolve(
        &self,
        delegatee_address: &str,
        delegator_address: &str,
        tool_ipfs_cid: &str,
    ) -> Result<ResolvedPolicies>;
}
