//! Operation payloads.
//!
//! Every payload is strict: unknown fields are rejected, and the operation
//! is selected by an `op` field next to its parameters:
//!
//! ```json
//! {"op": "start", "subagent_type": "finder", "description": "...", "prompt": "..."}
//! {"op": "start", "tasks": [{...}, {...}], "parallel": true}
//! {"op": "wait", "ids": ["task-1"], "timeout_ms": 5000}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorCode, OperationError};

/// One task to start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskSpec {
    pub subagent_type: String,
    pub description: String,
    pub prompt: String,
}

impl TaskSpec {
    pub fn new(
        subagent_type: impl Into<String>,
        description: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            subagent_type: subagent_type.into(),
            description: description.into(),
            prompt: prompt.into(),
        }
    }

    fn validate(&self) -> Result<(), OperationError> {
        for (field, value) in [
            ("subagent_type", &self.subagent_type),
            ("description", &self.description),
            ("prompt", &self.prompt),
        ] {
            if value.trim().is_empty() {
                return Err(OperationError::invalid_params(format!("{field} must not be empty")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subagent_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Vec<TaskSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_in_background: Option<bool>,
}

/// A validated start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartPlan {
    Single(TaskSpec),
    Batch { tasks: Vec<TaskSpec>, parallel: bool },
}

impl StartParams {
    pub fn single(spec: TaskSpec) -> Self {
        Self {
            subagent_type: Some(spec.subagent_type),
            description: Some(spec.description),
            prompt: Some(spec.prompt),
            ..Self::default()
        }
    }

    pub fn batch(tasks: Vec<TaskSpec>, parallel: bool) -> Self {
        Self {
            tasks: Some(tasks),
            parallel: Some(parallel),
            ..Self::default()
        }
    }

    /// Check the shape. Batch entries are only checked for presence here;
    /// each one is validated on its own when the batch is prepared.
    pub fn plan(self) -> Result<StartPlan, OperationError> {
        if self.run_in_background == Some(true) {
            return Err(OperationError::new(
                ErrorCode::BackgroundNotSupported,
                "background execution is not supported; start synchronously and use wait or status",
            ));
        }

        let has_single =
            self.subagent_type.is_some() || self.description.is_some() || self.prompt.is_some();
        match (self.tasks, has_single) {
            (Some(_), true) => Err(OperationError::invalid_params(
                "pass either tasks or subagent_type/description/prompt, not both",
            )),
            (Some(tasks), false) => {
                if tasks.is_empty() {
                    return Err(OperationError::invalid_params("tasks must not be empty"));
                }
                Ok(StartPlan::Batch {
                    tasks,
                    parallel: self.parallel.unwrap_or(false),
                })
            }
            (None, _) => {
                if self.parallel.is_some() {
                    return Err(OperationError::invalid_params(
                        "parallel only applies to a tasks batch",
                    ));
                }
                let spec = TaskSpec {
                    subagent_type: self
                        .subagent_type
                        .ok_or_else(|| OperationError::invalid_params("missing subagent_type"))?,
                    description: self
                        .description
                        .ok_or_else(|| OperationError::invalid_params("missing description"))?,
                    prompt: self
                        .prompt
                        .ok_or_else(|| OperationError::invalid_params("missing prompt"))?,
                };
                spec.validate()?;
                Ok(StartPlan::Single(spec))
            }
        }
    }
}

/// Validate one batch entry.
pub(crate) fn validate_spec(spec: &TaskSpec) -> Result<(), OperationError> {
    spec.validate()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusParams {
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaitParams {
    pub ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendParams {
    pub id: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CancelParams {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Start(StartParams),
    Status(StatusParams),
    Wait(WaitParams),
    Send(SendParams),
    Cancel(CancelParams),
}

impl Operation {
    pub const NAMES: [&'static str; 5] = ["start", "status", "wait", "send", "cancel"];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::Status(_) => "status",
            Self::Wait(_) => "wait",
            Self::Send(_) => "send",
            Self::Cancel(_) => "cancel",
        }
    }

    /// Parse `{"op": "...", ...params}`.
    pub fn from_value(value: Value) -> Result<Self, OperationError> {
        let Value::Object(mut map) = value else {
            return Err(OperationError::invalid_params("operation must be a JSON object"));
        };
        let op = match map.remove("op") {
            Some(Value::String(op)) => op,
            Some(_) => return Err(OperationError::invalid_params("op must be a string")),
            None => return Err(OperationError::invalid_params("missing op")),
        };
        Self::from_parts(&op, Value::Object(map))
    }

    /// Parse parameters for an operation named separately.
    pub fn from_parts(op: &str, params: Value) -> Result<Self, OperationError> {
        match op {
            "start" => parse(params).map(Self::Start),
            "status" => parse(params).map(Self::Status),
            "wait" => parse(params).map(Self::Wait),
            "send" => parse(params).map(Self::Send),
            "cancel" => parse(params).map(Self::Cancel),
            other => Err(OperationError::new(
                ErrorCode::UnknownOperation,
                format!(
                    "unknown operation {other:?}; expected one of {}",
                    Self::NAMES.join(", ")
                ),
            )),
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, OperationError> {
    serde_json::from_value(params).map_err(|e| OperationError::invalid_params(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_single_start() {
        let op = Operation::from_value(json!({
            "op": "start",
            "subagent_type": "finder",
            "description": "find main",
            "prompt": "where is main?"
        }))
        .unwrap();
        let Operation::Start(params) = op else {
            panic!("expected start");
        };
        assert_eq!(
            params.plan().unwrap(),
            StartPlan::Single(TaskSpec::new("finder", "find main", "where is main?"))
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = Operation::from_value(json!({"op": "cancel", "id": "t", "force": true})).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams);
        let err = Operation::from_value(json!({
            "op": "start",
            "tasks": [{"subagent_type": "a", "description": "b", "prompt": "c", "extra": 1}]
        }))
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams);
    }

    #[test]
    fn unknown_and_missing_op() {
        assert_eq!(
            Operation::from_value(json!({"op": "pause"})).unwrap_err().code,
            ErrorCode::UnknownOperation
        );
        assert_eq!(
            Operation::from_value(json!({"ids": []})).unwrap_err().code,
            ErrorCode::InvalidParams
        );
        assert_eq!(
            Operation::from_value(json!([1, 2])).unwrap_err().code,
            ErrorCode::InvalidParams
        );
    }

    #[test]
    fn background_is_rejected_with_dedicated_code() {
        let params = StartParams {
            run_in_background: Some(true),
            ..StartParams::single(TaskSpec::new("a", "b", "c"))
        };
        assert_eq!(params.plan().unwrap_err().code, ErrorCode::BackgroundNotSupported);
    }

    #[test]
    fn mixed_and_empty_shapes_are_invalid() {
        let mixed = StartParams {
            subagent_type: Some("a".into()),
            ..StartParams::batch(vec![TaskSpec::new("a", "b", "c")], true)
        };
        assert_eq!(mixed.plan().unwrap_err().code, ErrorCode::InvalidParams);
        assert_eq!(
            StartParams::batch(Vec::new(), true).plan().unwrap_err().code,
            ErrorCode::InvalidParams
        );
        assert_eq!(
            StartParams::single(TaskSpec::new("a", " ", "c")).plan().unwrap_err().code,
            ErrorCode::InvalidParams
        );
        assert_eq!(StartParams::default().plan().unwrap_err().code, ErrorCode::InvalidParams);
    }

    #[test]
    fn wait_timeout_is_optional() {
        let Operation::Wait(params) =
            Operation::from_value(json!({"op": "wait", "ids": ["a"]})).unwrap()
        else {
            panic!("expected wait");
        };
        assert_eq!(params.timeout_ms, None);
    }
}
