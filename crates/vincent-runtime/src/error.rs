use thiserror::Error;

/// Invocation-level errors.
///
/// These abort a whole tool invocation. Everything recoverable (validation
/// failures, author errors) is carried as a Deny/Failure value instead and
/// never shows up here.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Tool '{package}' targets API version {declared}, engine supports major {supported}")]
    ApiVersionMismatch {
        package: String,
        declared: String,
        supported: u64,
    },

    #[error("Delegatee '{delegatee}' is not permitted to run tool {tool_ipfs_cid} for '{delegator}'")]
    NotPermitted {
        delegatee: String,
        delegator: String,
        tool_ipfs_cid: String,
    },

    #[error("Policy {ipfs_cid} applies to tool '{tool}' but the tool does not support it")]
    UnsupportedPolicy { tool: String, ipfs_cid: String },

    #[error("Malformed response from policy '{package}': {reason}")]
    MalformedPolicyResponse { package: String, reason: String },

    #[error("Cannot build execute context: policy '{package}' denied the invocation")]
    ExecuteAfterDeny { package: String },

    #[error("Policy resolution failed: {0}")]
    Resolution(String),

    #[error("Duplicate policy binding in tool '{tool}': {key}")]
    DuplicatePolicy { tool: String, key: String },
}

/// Error raised when a schema document cannot be compiled.
#[derive(Debug, Error)]
#[error("Invalid schema: {0}")]
pub struct SchemaError(pub String);
