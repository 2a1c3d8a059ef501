//! Schema descriptors used to validate lifecycle payloads.
//!
//! A [`Schema`] is either the "absent" default (the payload must not be
//! present), the permissive fallback used when an outcome cannot be
//! classified, or a compiled JSON Schema document.

use std::fmt;
use std::sync::Arc;

use jsonschema::{Draft, Validator};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SchemaError;

/// One validation problem, located by JSON pointer into the checked value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaIssue {
    pub path: String,
    pub message: String,
}

impl fmt::Display for SchemaIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

#[derive(Clone)]
enum SchemaKind {
    Absent,
    Any,
    Json {
        document: Arc<Value>,
        validator: Arc<Validator>,
    },
}

/// Composable payload descriptor. Cheap to clone.
#[derive(Clone)]
pub struct Schema {
    kind: SchemaKind,
}

impl Schema {
    /// Payload must be missing (`null` counts as missing).
    pub fn absent() -> Self {
        Self {
            kind: SchemaKind::Absent,
        }
    }

    /// Accepts anything, including a missing payload.
    pub fn any() -> Self {
        Self {
            kind: SchemaKind::Any,
        }
    }

    /// Compile a JSON Schema (draft 2020-12) document.
    pub fn json(document: Value) -> Result<Self, SchemaError> {
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&document)
            .map_err(|err| SchemaError(err.to_string()))?;
        Ok(Self {
            kind: SchemaKind::Json {
                document: Arc::new(document),
                validator: Arc::new(validator),
            },
        })
    }

    pub fn is_absent(&self) -> bool {
        matches!(self.kind, SchemaKind::Absent)
    }

    /// Source document, for JSON schemas only.
    pub fn document(&self) -> Option<&Value> {
        match &self.kind {
            SchemaKind::Json { document, .. } => Some(document),
            _ => None,
        }
    }

    /// Check a payload. On success the payload is handed back untouched.
    pub fn check(&self, value: Option<&Value>) -> Result<Option<Value>, Vec<SchemaIssue>> {
        match &self.kind {
            SchemaKind::Absent => match value {
                None | Some(Value::Null) => Ok(None),
                Some(other) => Err(vec![SchemaIssue {
                    path: String::new(),
                    message: format!("expected no value, found {}", type_name(other)),
                }]),
            },
            SchemaKind::Any => Ok(value.cloned()),
            SchemaKind::Json { validator, .. } => {
                let instance = value.cloned().unwrap_or(Value::Null);
                let issues: Vec<SchemaIssue> = validator
                    .iter_errors(&instance)
                    .map(|err| SchemaIssue {
                        path: err.instance_path().to_string(),
                        message: err.to_string(),
                    })
                    .collect();
                if issues.is_empty() {
                    Ok(value.cloned())
                } else {
                    Err(issues)
                }
            }
        }
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::absent()
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            SchemaKind::Absent => f.write_str("Schema::Absent"),
            SchemaKind::Any => f.write_str("Schema::Any"),
            SchemaKind::Json { document, .. } => {
                f.debug_tuple("Schema::Json").field(document).finish()
            }
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn approval_schema() -> Schema {
        Schema::json(json!({
            "type": "object",
            "properties": { "approved": { "type": "boolean" } },
            "required": ["approved"]
        }))
        .unwrap()
    }

    #[test]
    fn test_absent_accepts_missing_and_null() {
        let schema = Schema::absent();
        assert_eq!(schema.check(None).unwrap(), None);
        assert_eq!(schema.check(Some(&Value::Null)).unwrap(), None);
    }

    #[test]
    fn test_absent_rejects_value() {
        let issues = Schema::absent().check(Some(&json!({"a": 1}))).unwrap_err();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("object"));
    }

    #[test]
    fn test_any_passes_through() {
        let value = json!([1, 2, 3]);
        assert_eq!(Schema::any().check(Some(&value)).unwrap(), Some(value));
        assert_eq!(Schema::any().check(None).unwrap(), None);
    }

    #[test]
    fn test_json_schema_accepts_matching_value() {
        let value = json!({"approved": true});
        assert_eq!(approval_schema().check(Some(&value)).unwrap(), Some(value));
    }

    #[test]
    fn test_json_schema_reports_path() {
        let issues = approval_schema()
            .check(Some(&json!({"approved": "yes"})))
            .unwrap_err();
        assert_eq!(issues[0].path, "/approved");
    }

    #[test]
    fn test_json_schema_rejects_missing_value() {
        assert!(approval_schema().check(None).is_err());
    }

    #[test]
    fn test_invalid_document_rejected() {
        let err = Schema::json(json!({"type": "nonsense"})).unwrap_err();
        assert!(err.to_string().contains("Invalid schema"));
    }
}
