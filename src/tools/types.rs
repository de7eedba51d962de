//! Tool-related types: parameter schemas, definitions, outputs.

use serde::{Deserialize, Serialize};

/// Backend-neutral tool declaration: name, description, and a JSON-Schema-like
/// description of the accepted input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// What a tool hands back after a successful invocation.
///
/// `content` is always fed back to the model. `system`, when present, is
/// appended as a new trailing system-prompt segment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub system: Option<String>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            system: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// JSON Schema-based parameter definition for a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameters {
    pub schema: serde_json::Value,
}

impl ToolParameters {
    /// Create from a raw JSON Schema value.
    pub fn from_schema(schema: serde_json::Value) -> Self {
        Self { schema }
    }

    /// An object schema with no properties.
    pub fn empty() -> Self {
        Self {
            schema: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": [],
            }),
        }
    }

    /// Start building an object schema.
    pub fn object() -> ParameterBuilder {
        ParameterBuilder {
            properties: serde_json::Map::new(),
            required: Vec::new(),
        }
    }
}

/// Builder for tool parameter schemas.
pub struct ParameterBuilder {
    properties: serde_json::Map<String, serde_json::Value>,
    required: Vec<String>,
}

impl ParameterBuilder {
    pub fn string(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        self.property(name, "string", description, required)
    }

    pub fn boolean(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        self.property(name, "boolean", description, required)
    }

    fn property(
        mut self,
        name: impl Into<String>,
        kind: &str,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        let name = name.into();
        self.properties.insert(
            name.clone(),
            serde_json::json!({
                "type": kind,
                "description": description.into(),
            }),
        );
        if required {
            self.required.push(name);
        }
        self
    }

    pub fn build(self) -> ToolParameters {
        ToolParameters {
            schema: serde_json::json!({
                "type": "object",
                "properties": self.properties,
                "required": self.required,
            }),
        }
    }
}
