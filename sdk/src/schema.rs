//! Tool parameter schemas and side-effect classes
//!
//! A [`ToolSchema`] is what the registry validates arguments against before a
//! handler is ever invoked, and what gets advertised to the LLM.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::types::{json_kind, ToolError};

/// How much a tool can change the world
///
/// Anything other than `ReadOnly` needs a rendered preview and an explicit
/// decision from the user before it is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    ReadOnly,
    Mutating,
    Destructive,
}

impl SideEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadOnly => "read_only",
            Self::Mutating => "mutating",
            Self::Destructive => "destructive",
        }
    }

    pub fn requires_confirmation(&self) -> bool {
        !matches!(self, Self::ReadOnly)
    }
}

impl std::fmt::Display for SideEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON type of a single parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
}

impl ParamSpec {
    pub fn required(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            description: description.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }
}

/// Capability descriptor for one tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub side_effect: SideEffect,
    pub params: Vec<ParamSpec>,
}

impl ToolSchema {
    pub fn new(name: &str, description: &str, side_effect: SideEffect) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            side_effect,
            params: Vec::new(),
        }
    }

    /// Builder-style parameter declaration
    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    /// Validate call arguments against this schema
    ///
    /// Arguments must be an object (or `null` when nothing is required), every
    /// required field must be present and non-null, every present field must
    /// have the declared type, and unknown fields are rejected.
    pub fn validate(&self, args: &Value) -> Result<(), ToolError> {
        let empty = Map::new();
        let object = match args {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(ToolError::invalid_args(format!(
                    "{}: arguments must be a JSON object, got {}",
                    self.name,
                    json_kind(other)
                )))
            }
        };

        for spec in &self.params {
            match object.get(&spec.name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(ToolError::invalid_args(format!(
                        "{}: missing required parameter `{}`",
                        self.name, spec.name
                    )));
                }
                None | Some(Value::Null) => {}
                Some(value) if !spec.param_type.matches(value) => {
                    return Err(ToolError::invalid_args(format!(
                        "{}: parameter `{}` must be {}, got {}",
                        self.name,
                        spec.name,
                        spec.param_type.as_str(),
                        json_kind(value)
                    )));
                }
                Some(_) => {}
            }
        }

        if let Some(unknown) = object
            .keys()
            .find(|key| !self.params.iter().any(|p| &p.name == *key))
        {
            return Err(ToolError::invalid_args(format!(
                "{}: unknown parameter `{}`",
                self.name, unknown
            )));
        }

        Ok(())
    }

    /// JSON-Schema rendering of the parameters, as LLM providers expect it
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for spec in &self.params {
            properties.insert(
                spec.name.clone(),
                json!({
                    "type": spec.param_type.as_str(),
                    "description": spec.description,
                }),
            );
            if spec.required {
                required.push(Value::String(spec.name.clone()));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}
