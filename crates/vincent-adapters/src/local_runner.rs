use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use vincent_runtime::{PolicyRunner, PolicySandbox, RemoteEvaluationRequest};

/// Runs policies in an in-process [`PolicySandbox`].
pub struct LocalPolicyRunner {
    sandbox: Arc<PolicySandbox>,
}

impl LocalPolicyRunner {
    pub fn new(sandbox: Arc<PolicySandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl PolicyRunner for LocalPolicyRunner {
    async fn run(&self, policy_ipfs_cid: &str, request: &RemoteEvaluationRequest) -> Result<String> {
        Ok(self.sandbox.handle(policy_ipfs_cid, request).await)
    }
}
