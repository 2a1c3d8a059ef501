use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::info;
use vincent_runtime::{PolicyResolver, ResolvedPolicies, ResolvedPolicy};

type PermissionKey = (String, String, String);

/// Table-driven permission lookup keyed by `(delegatee, delegator, tool)`.
/// Unknown triples are not permitted.
#[derive(Default)]
pub struct StaticPolicyResolver {
    permissions: DashMap<PermissionKey, ResolvedPolicies>,
}

#[derive(Debug, Deserialize)]
struct PermissionsFile {
    #[serde(default, rename = "permission")]
    permissions: Vec<PermissionEntry>,
}

#[derive(Debug, Deserialize)]
struct PermissionEntry {
    delegatee: String,
    delegator: String,
    tool_ipfs_cid: String,
    #[serde(default)]
    app_id: Option<u64>,
    #[serde(default)]
    app_version: Option<u64>,
    #[serde(default)]
    policies: Vec<PolicyEntry>,
}

#[derive(Debug, Deserialize)]
struct PolicyEntry {
    ipfs_cid: String,
    #[serde(default)]
    user_params: Option<Value>,
}

impl StaticPolicyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load permissions from a TOML file of `[[permission]]` tables.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read permissions file: {:?}", path))?;
        let file: PermissionsFile =
            toml::from_str(&content).context("Failed to parse permissions TOML")?;

        let resolver = Self::new();
        for entry in file.permissions {
            let resolved = ResolvedPolicies {
                is_permitted: true,
                app_id: entry.app_id,
                app_version: entry.app_version,
                decoded_policies: entry
                    .policies
                    .into_iter()
                    .map(|policy| ResolvedPolicy {
                        ipfs_cid: policy.ipfs_cid,
                        user_params: policy.user_params,
                    })
                    .collect(),
            };
            resolver.grant(&entry.delegatee, &entry.delegator, &entry.tool_ipfs_cid, resolved);
        }
        info!(permissions = resolver.len(), "Loaded static permissions");
        Ok(resolver)
    }

    /// Insert or replace the entry for a triple.
    pub fn grant(
        &self,
        delegatee_address: &str,
        delegator_address: &str,
        tool_ipfs_cid: &str,
        resolved: ResolvedPolicies,
    ) {
        self.permissions.insert(
            key(delegatee_address, delegator_address, tool_ipfs_cid),
            resolved,
        );
    }

    pub fn revoke(&self, delegatee_address: &str, delegator_address: &str, tool_ipfs_cid: &str) -> bool {
        self.permissions
            .remove(&key(delegatee_address, delegator_address, tool_ipfs_cid))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.permissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }
}

fn key(delegatee: &str, delegator: &str, tool: &str) -> PermissionKey {
    (delegatee.to_string(), delegator.to_string(), tool.to_string())
}

#[async_trait]
impl PolicyResolver for StaticPolicyResolver {
    async fn resolve(
        &self,
        delegatee_address: &str,
        delegator_address: &str,
        tool_ipfs_cid: &str,
    ) -> Result<ResolvedPolicies> {
        Ok(self
            .permissions
            .get(&key(delegatee_address, delegator_address, tool_ipfs_cid))
            .map(|entry| entry.value().clone())
            .unwrap_or_else(ResolvedPolicies::not_permitted))
    }
}
