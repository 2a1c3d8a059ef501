use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use std::time::Duration;
use tracing::debug;
use vincent_runtime::{PolicyRunner, RemoteEvaluationRequest, SandboxConfig};

/// Sends policy evaluations to a remote sandbox over HTTP.
///
/// Each evaluation is a `POST {endpoint}/policies/{ipfsCid}/evaluate` with the
/// request as JSON; the response body is handed back verbatim. No retries.
pub struct HttpPolicyRunner {
    client: Client,
    endpoint: String,
}

impl HttpPolicyRunner {
    pub fn new(config: &SandboxConfig) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn evaluate_url(&self, policy_ipfs_cid: &str) -> String {
        format!("{}/policies/{}/evaluate", self.endpoint, policy_ipfs_cid)
    }
}

#[async_trait]
impl PolicyRunner for HttpPolicyRunner {
    async fn run(&self, policy_ipfs_cid: &str, request: &RemoteEvaluationRequest) -> Result<String> {
        let url = self.evaluate_url(policy_ipfs_cid);
        debug!(ipfs_cid = policy_ipfs_cid, url = %url, "Posting policy evaluation");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .context(format!("Sandbox request for policy {} failed", policy_ipfs_cid))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Sandbox error ({}): {}", status, error_body));
        }

        response
            .text()
            .await
            .context("Failed to read sandbox response body")
    }
}
