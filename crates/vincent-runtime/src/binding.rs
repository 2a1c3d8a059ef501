//! Tool ↔ policy binding: which policies a tool supports, how tool
//! parameters are renamed for each of them, and how the externally resolved
//! policy set is matched against that index.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::EngineError;
use crate::policy::VincentPolicy;
use crate::remote::ResolvedPolicies;

/// A policy attached to a tool.
#[derive(Debug, Clone)]
pub struct BoundPolicy {
    pub ipfs_cid: String,
    pub policy: VincentPolicy,
    /// Tool parameter name → policy parameter name. Unlisted tool
    /// parameters are never forwarded.
    pub tool_parameter_mappings: HashMap<String, String>,
}

impl BoundPolicy {
    pub fn new(ipfs_cid: impl Into<String>, policy: impl Into<VincentPolicy>) -> Self {
        Self {
            ipfs_cid: ipfs_cid.into(),
            policy: policy.into(),
            tool_parameter_mappings: HashMap::new(),
        }
    }

    pub fn map_param(mut self, tool_param: impl Into<String>, policy_param: impl Into<String>) -> Self {
        self.tool_parameter_mappings
            .insert(tool_param.into(), policy_param.into());
        self
    }

    pub fn package_name(&self) -> &str {
        self.policy.package_name()
    }
}

/// Index of a tool's bound policies, by package name and by content address.
#[derive(Debug, Clone, Default)]
pub struct SupportedPolicies {
    by_package: HashMap<String, Arc<BoundPolicy>>,
    by_cid: HashMap<String, Arc<BoundPolicy>>,
}

impl SupportedPolicies {
    pub(crate) fn insert(&mut self, tool: &str, bound: BoundPolicy) -> Result<(), EngineError> {
        let package = bound.package_name().to_string();
        if self.by_package.contains_key(&package) {
            return Err(EngineError::DuplicatePolicy {
                tool: tool.to_string(),
                key: package,
            });
        }
        if self.by_cid.contains_key(&bound.ipfs_cid) {
            return Err(EngineError::DuplicatePolicy {
                tool: tool.to_string(),
                key: bound.ipfs_cid,
            });
        }
        let bound = Arc::new(bound);
        self.by_cid.insert(bound.ipfs_cid.clone(), bound.clone());
        self.by_package.insert(package, bound);
        Ok(())
    }

    pub fn by_package(&self, package_name: &str) -> Option<&BoundPolicy> {
        self.by_package.get(package_name).map(|bound| &**bound)
    }

    pub fn by_cid(&self, ipfs_cid: &str) -> Option<&BoundPolicy> {
        self.by_cid.get(ipfs_cid).map(|bound| &**bound)
    }

    pub fn len(&self) -> usize {
        self.by_package.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_package.is_empty()
    }
}

/// One policy to run for the current invocation.
#[derive(Debug, Clone)]
pub struct PolicyCall {
    pub bound: Arc<BoundPolicy>,
    /// Tool params renamed into the policy's parameter names.
    pub tool_params: Value,
    pub user_params: Option<Value>,
}

impl PolicyCall {
    pub fn package_name(&self) -> &str {
        self.bound.package_name()
    }
}

/// Rename validated tool params per `mappings`, dropping unmapped keys.
pub fn map_tool_params(tool_params: &Value, mappings: &HashMap<String, String>) -> Value {
    let mut mapped = Map::new();
    if let Some(params) = tool_params.as_object() {
        for (tool_name, policy_name) in mappings {
            if let Some(value) = params.get(tool_name) {
                mapped.insert(policy_name.clone(), value.clone());
            }
        }
    }
    Value::Object(mapped)
}

/// Match the resolved policies against the tool's index, preserving the
/// resolver's order. A policy the tool does not support aborts the whole
/// invocation.
pub fn bind_applicable_policies(
    tool: &str,
    supported: &SupportedPolicies,
    tool_params: &Value,
    resolved: &ResolvedPolicies,
) -> Result<Vec<PolicyCall>, EngineError> {
    resolved
        .decoded_policies
        .iter()
        .map(|applicable| {
            let bound = supported
                .by_cid
                .get(&applicable.ipfs_cid)
                .ok_or_else(|| EngineError::UnsupportedPolicy {
                    tool: tool.to_string(),
                    ipfs_cid: applicable.ipfs_cid.clone(),
                })?;
            Ok(PolicyCall {
                bound: bound.clone(),
                tool_params: map_tool_params(tool_params, &bound.tool_parameter_mappings),
                user_params: applicable.user_params.clone(),
            })
        })
        .collect()
}
