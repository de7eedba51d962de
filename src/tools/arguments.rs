//! Typed access to tool-use input.

use crate::error::DelveError;

/// Wrapper around a tool-use block's `input`, providing typed extraction.
#[derive(Debug, Clone)]
pub struct ToolArguments {
    value: serde_json::Value,
}

impl ToolArguments {
    pub fn new(value: serde_json::Value) -> Self {
        Self { value }
    }

    /// Get the raw JSON value.
    pub fn raw(&self) -> &serde_json::Value {
        &self.value
    }

    /// Get a required string argument.
    pub fn get_str(&self, key: &str) -> Result<&str, DelveError> {
        self.value
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| DelveError::InvalidArgument(format!("Missing string argument: {key}")))
    }

    /// Get an optional string argument.
    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(|v| v.as_str())
    }

    /// Get an optional boolean argument.
    pub fn get_bool_opt(&self, key: &str) -> Option<bool> {
        self.value.get(key).and_then(|v| v.as_bool())
    }

    /// Deserialize the whole input into a typed struct.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T, DelveError> {
        serde_json::from_value(self.value.clone()).map_err(|e| {
            DelveError::InvalidArgument(format!("Failed to deserialize arguments: {e}"))
        })
    }
}
