//! Declared parameter shapes for tools.
//!
//! Parameters stay a string-keyed JSON map at the boundary; each tool declares
//! what it expects once, the registry checks that declaration when the tool is
//! registered and checks every call against it before dispatch.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ToolError;

/// Primitive type of a tool parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
}

impl ParamKind {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
        }
    }

    /// JSON Schema type name
    pub fn json_type(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    pub description: String,
}

/// Parameter declaration of one tool
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolSchema {
    pub params: Vec<ParamSpec>,
    /// Parameter naming the file this tool modifies
    pub path_param: Option<String>,
}

impl ToolSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.param(name, kind, true, description)
    }

    pub fn optional(self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.param(name, kind, false, description)
    }

    fn param(mut self, name: &str, kind: ParamKind, required: bool, description: &str) -> Self {
        self.params.push(ParamSpec {
            name: name.to_string(),
            kind,
            required,
            description: description.to_string(),
        });
        self
    }

    /// Mark the tool as file-modifying through parameter `name`
    pub fn modifies(mut self, name: &str) -> Self {
        self.path_param = Some(name.to_string());
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Registration-time consistency check
    pub fn check(&self, tool: &str) -> Result<(), ToolError> {
        let invalid = |reason: String| ToolError::InvalidSchema {
            tool: tool.to_string(),
            reason,
        };

        let mut seen = HashSet::new();
        for param in &self.params {
            if param.name.trim().is_empty() {
                return Err(invalid("parameter name cannot be empty".to_string()));
            }
            if !seen.insert(param.name.as_str()) {
                return Err(invalid(format!("duplicate parameter '{}'", param.name)));
            }
        }

        if let Some(path_param) = &self.path_param {
            match self.get(path_param) {
                Some(spec) if spec.kind == ParamKind::String => {}
                Some(_) => {
                    return Err(invalid(format!("path parameter '{}' must be a string", path_param)));
                }
                None => {
                    return Err(invalid(format!("path parameter '{}' is not declared", path_param)));
                }
            }
        }
        Ok(())
    }

    /// Check a call's parameters against the declaration
    pub fn validate_call(&self, tool: &str, params: &Map<String, Value>) -> Result<(), ToolError> {
        let invalid = |reason: String| ToolError::InvalidParams {
            tool: tool.to_string(),
            reason,
        };

        for (name, value) in params {
            let Some(spec) = self.get(name) else {
                return Err(invalid(format!("unexpected parameter '{}'", name)));
            };
            if value.is_null() && !spec.required {
                continue;
            }
            if !spec.kind.matches(value) {
                return Err(invalid(format!(
                    "parameter '{}' must be {}",
                    name,
                    spec.kind.json_type()
                )));
            }
        }

        for spec in self.params.iter().filter(|p| p.required) {
            match params.get(&spec.name) {
                None | Some(Value::Null) => {
                    return Err(invalid(format!("missing required parameter '{}'", spec.name)));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// File a call with these parameters would modify
    pub fn changed_path(&self, params: &Map<String, Value>) -> Option<PathBuf> {
        let name = self.path_param.as_ref()?;
        params.get(name)?.as_str().map(PathBuf::from)
    }

    /// JSON Schema object for tool definitions
    pub fn to_json(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.params {
            properties.insert(
                param.name.clone(),
                serde_json::json!({
                    "type": param.kind.json_type(),
                    "description": param.description,
                }),
            );
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Fetch a string parameter
pub fn str_param<'a>(params: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    params.get(name).and_then(Value::as_str)
}

/// Fetch a required string parameter
pub fn require_str<'a>(tool: &str, params: &'a Map<String, Value>, name: &str) -> Result<&'a str, ToolError> {
    str_param(params, name).ok_or_else(|| ToolError::InvalidParams {
        tool: tool.to_string(),
        reason: format!("missing required parameter '{}'", name),
    })
}

pub fn u64_param(params: &Map<String, Value>, name: &str) -> Option<u64> {
    params.get(name).and_then(Value::as_u64)
}

pub fn bool_param(params: &Map<String, Value>, name: &str) -> Option<bool> {
    params.get(name).and_then(Value::as_bool)
}
