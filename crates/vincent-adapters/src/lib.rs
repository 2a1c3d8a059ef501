pub mod http_runner;
pub mod local_runner;
pub mod static_resolver;

pub use http_runner::HttpPolicyRunner;
pub use local_runner::LocalPolicyRunner;
pub use static_resolver::StaticPolicyResolver;

use anyhow::Result;
use std::sync::Arc;
use vincent_runtime::{EngineConfig, PolicyResolver, ToolExecutor};

/// Build an executor that evaluates policies through the configured HTTP sandbox.
pub fn http_executor(config: &EngineConfig, resolver: Arc<dyn PolicyResolver>) -> Result<ToolExecutor> {
    let runner = HttpPolicyRunner::new(&config.sandbox)?;
    Ok(ToolExecutor::new(resolver, Arc::new(runner)))
}
