use crate::error::EngineError;

/// Tool API version this engine implements. Tools must match its major.
pub const TOOL_API_VERSION: &str = "2.0.0";

fn major_of(version: &str) -> Option<u64> {
    version
        .trim()
        .trim_start_matches('v')
        .split('.')
        .next()
        .and_then(|major| major.parse().ok())
}

/// Fail unless `declared` shares the engine's major version.
pub fn assert_supported_api_version(package: &str, declared: &str) -> Result<(), EngineError> {
    let supported = major_of(TOOL_API_VERSION).unwrap_or_default();
    match major_of(declared) {
        Some(major) if major == supported => Ok(()),
        _ => Err(EngineError::ApiVersionMismatch {
            package: package.to_string(),
            declared: declared.to_string(),
            supported,
        }),
    }
}
