use serde_json::Value;

use crate::outcome::{
    check_payload, LifecycleOutcome, LifecyclePhase, PolicyResponse, ValidationStage,
};
use crate::remote::RoutingContext;
use crate::schema::Schema;

/// Context handed to a policy's raw `evaluate`/`precheck`/`commit`.
///
/// The only way for policy code to produce a [`PolicyResponse`] is through
/// [`allow`](Self::allow) and [`deny`](Self::deny), which check the payload
/// against the schemas declared for the current phase.
#[derive(Debug, Clone)]
pub struct PolicyContext {
    routing: RoutingContext,
    phase: LifecyclePhase,
    allow_schema: Schema,
    deny_schema: Schema,
}

impl PolicyContext {
    pub(crate) fn new(
        routing: RoutingContext,
        phase: LifecyclePhase,
        allow_schema: Schema,
        deny_schema: Schema,
    ) -> Self {
        Self {
            routing,
            phase,
            allow_schema,
            deny_schema,
        }
    }

    pub fn tool_ipfs_cid(&self) -> &str {
        &self.routing.tool_ipfs_cid
    }

    pub fn delegator_address(&self) -> &str {
        &self.routing.delegator_address
    }

    pub fn delegatee_address(&self) -> &str {
        &self.routing.delegatee_address
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    pub fn allow(&self, result: impl Into<Option<Value>>) -> PolicyResponse {
        let result = result.into();
        match check_payload(result.as_ref(), &self.allow_schema, self.phase, ValidationStage::Output) {
            Ok(result) => PolicyResponse::allow(result),
            Err(failure) => PolicyResponse::from_validation_failure(failure),
        }
    }

    pub fn deny(&self, result: impl Into<Option<Value>>) -> PolicyResponse {
        self.gated_deny(result.into(), None)
    }

    pub fn deny_with_error(
        &self,
        result: impl Into<Option<Value>>,
        error: impl Into<String>,
    ) -> PolicyResponse {
        self.gated_deny(result.into(), Some(error.into()))
    }

    fn gated_deny(&self, result: Option<Value>, error: Option<String>) -> PolicyResponse {
        match check_payload(result.as_ref(), &self.deny_schema, self.phase, ValidationStage::Output) {
            Ok(result) => PolicyResponse::deny(result, error),
            Err(failure) => PolicyResponse::from_validation_failure(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(allow: Schema, deny: Schema) -> PolicyContext {
        PolicyContext::new(
            RoutingContext {
                tool_ipfs_cid: "QmTool".into(),
                delegator_address: "0xdelegator".into(),
                delegatee_address: "0xdelegatee".into(),
            },
            LifecyclePhase::Evaluate,
            allow,
            deny,
        )
    }

    #[test]
    fn test_allow_without_schema() {
        let response = ctx(Schema::absent(), Schema::absent()).allow(None);
        assert!(response.is_allow());
        assert!(response.result().is_none());
    }

    #[test]
    fn test_deny_checked_against_deny_schema() {
        let deny_schema = Schema::json(json!({
            "type": "object",
            "properties": {"reason": {"type": "string"}},
            "required": ["reason"]
        }))
        .unwrap();
        let ctx = ctx(Schema::absent(), deny_schema);

        let ok = ctx.deny(json!({"reason": "limit"}));
        assert_eq!(ok.result(), Some(&json!({"reason": "limit"})));

        let bad = ctx.deny(json!({"why": 1}));
        let PolicyResponse::Deny(deny) = bad else {
            panic!("expected deny");
        };
        assert!(deny.validation_failure().is_some());
    }

    #[test]
    fn test_allow_with_undeclared_result_is_denied() {
        let response = ctx(Schema::absent(), Schema::absent()).allow(json!({"extra": true}));
        assert!(!response.is_allow());
    }
}
