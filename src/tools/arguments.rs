//! Typed access to tool call arguments.

use serde_json::Value;

use crate::error::TurnError;
use crate::plan::ToolArgs;

/// A step's argument map with typed extraction helpers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArguments {
    args: ToolArgs,
}

impl ToolArguments {
    pub fn new(args: ToolArgs) -> Self {
        Self { args }
    }

    pub fn raw(&self) -> &ToolArgs {
        &self.args
    }

    pub fn get_str(&self, key: &str) -> Result<&str, TurnError> {
        self.get_str_opt(key)
            .ok_or_else(|| TurnError::InvalidArgument(format!("Missing string argument: {key}")))
    }

    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Result<i64, TurnError> {
        self.args
            .get(key)
            .and_then(Value::as_i64)
            .ok_or_else(|| TurnError::InvalidArgument(format!("Missing integer argument: {key}")))
    }

    pub fn get_bool_opt(&self, key: &str) -> Option<bool> {
        self.args.get(key).and_then(Value::as_bool)
    }

    /// A list of strings. A single string is accepted as a one-element list,
    /// since models sometimes collapse singleton arrays.
    pub fn get_string_list(&self, key: &str) -> Result<Vec<String>, TurnError> {
        match self.args.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        TurnError::InvalidArgument(format!("{key} must contain only strings"))
                    })
                })
                .collect(),
            Some(Value::String(single)) => Ok(vec![single.clone()]),
            _ => Err(TurnError::InvalidArgument(format!(
                "Missing array argument: {key}"
            ))),
        }
    }

    /// Deserialize the whole argument map into a typed struct.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T, TurnError> {
        serde_json::from_value(Value::Object(self.args.clone())).map_err(|e| {
            TurnError::InvalidArgument(format!("Failed to deserialize arguments: {e}"))
        })
    }
}

impl From<ToolArgs> for ToolArguments {
    fn from(args: ToolArgs) -> Self {
        Self::new(args)
    }
}
