//! # Tools
//!
//! - `ToolDefinition`: the catalog entry offered to the model
//! - `Tool`: an executable capability with a name, schema and async call
//! - `ToolRegistry`: name -> tool lookup plus dispatch of model tool calls
//!
//! Dispatch failures (unknown tool, unparsable arguments, tool errors) come
//! back as `Err` values with a model-readable message. They never panic and
//! never end the agent loop.

use crate::error::{Error, Result};
use crate::message::ToolCall;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Keyword arguments for a tool call
pub type ToolArguments = Map<String, Value>;

/// A tool/function that the model can call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Declare one named parameter.
    pub fn with_param(
        mut self,
        name: &str,
        param_type: &str,
        description: &str,
        required: bool,
    ) -> Self {
        if let Some(schema) = self.parameters.as_object_mut() {
            let properties = schema
                .entry("properties")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(properties) = properties.as_object_mut() {
                properties.insert(
                    name.to_string(),
                    serde_json::json!({ "type": param_type, "description": description }),
                );
            }
            if required {
                let list = schema
                    .entry("required")
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Some(list) = list.as_array_mut() {
                    if !list.iter().any(|v| v == name) {
                        list.push(Value::String(name.to_string()));
                    }
                }
            }
        }
        self
    }

    /// Names of the parameters marked required
    pub fn required_params(&self) -> Vec<&str> {
        self.parameters
            .get("required")
            .and_then(|v| v.as_array())
            .map(|list| list.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default()
    }
}

/// An executable tool.
///
/// Implementations validate their own arguments: the registry only
/// guarantees that `arguments` is a JSON object.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn call(&self, arguments: ToolArguments) -> Result<String>;
}

/// Fetch a required string argument
pub fn require_str<'a>(arguments: &'a ToolArguments, key: &str) -> Result<&'a str> {
    arguments
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::invalid_argument(format!("missing string argument '{}'", key)))
}

/// Fetch a required integer argument. Numeric strings are accepted since
/// models often quote numbers.
pub fn require_i64(arguments: &ToolArguments, key: &str) -> Result<i64> {
    match arguments.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| Error::invalid_argument(format!("argument '{}' must be an integer", key))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| Error::invalid_argument(format!("argument '{}' must be an integer", key))),
        _ => Err(Error::invalid_argument(format!(
            "missing integer argument '{}'",
            key
        ))),
    }
}

/// Executable name -> tool mapping.
///
/// Registering a second tool under an existing name replaces the first
/// (last write wins); `register` returns the replaced tool.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chainable form of `register`
    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    pub fn register(&mut self, tool: impl Tool + 'static) -> Option<Arc<dyn Tool>> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Option<Arc<dyn Tool>> {
        let name = tool.definition().name;
        let replaced = self.tools.insert(name.clone(), tool);
        if replaced.is_some() {
            warn!(tool = %name, "tool re-registered, previous implementation replaced");
        } else {
            self.order.push(name);
        }
        replaced
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Tool catalog in registration order
    pub fn catalog(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.definition())
            .collect()
    }

    /// Execute a model tool call.
    pub async fn dispatch(&self, call: &ToolCall) -> Result<String> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| Error::unknown_tool(&call.name).with_context("call_id", &call.id))?;

        let arguments = parse_arguments(call)?;
        debug!(tool = %call.name, call_id = %call.id, arguments = %call.arguments, "dispatching tool call");

        tool.call(arguments).await.map_err(|err| {
            Error::tool_execution(&call.name, err.message())
                .with_operation("registry::dispatch")
                .with_context("call_id", &call.id)
                .set_source(err)
        })
    }
}

fn parse_arguments(call: &ToolCall) -> Result<ToolArguments> {
    let raw = call.arguments.trim();
    if raw.is_empty() {
        return Ok(ToolArguments::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(ToolArguments::new()),
        Ok(other) => Err(Error::argument_parse(
            &call.name,
            &call.arguments,
            format!("expected a JSON object, got {}", json_type_name(&other)),
        )
        .with_operation("registry::dispatch")),
        Err(e) => Err(Error::argument_parse(&call.name, &call.arguments, &e)
            .with_operation("registry::dispatch")
            .set_source(e)),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
