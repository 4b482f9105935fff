//! Capability registry: the process-wide table of invocable tools.
//!
//! Handler modules register a bundle of [`ToolDescriptor`]s plus one
//! [`ToolHandler`] during startup. Registration is all-or-nothing per module:
//! if any tool name collides (with the registry or within the module itself)
//! nothing from that module becomes visible.
//!
//! After the registration phase the registry is frozen into an `Arc` and
//! only read, so lookups from concurrent transports need no locking.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::{DispatchError, RegistryError};
use crate::models::{CallContext, Outcome, Role};

// ── Schema ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Any,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::String => "string",
            PropertyType::Number => "number",
            PropertyType::Integer => "integer",
            PropertyType::Boolean => "boolean",
            PropertyType::Object => "object",
            PropertyType::Array => "array",
            PropertyType::Any => "any",
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            PropertyType::String => value.is_string(),
            PropertyType::Number => value.is_number(),
            PropertyType::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            PropertyType::Boolean => value.is_boolean(),
            PropertyType::Object => value.is_object(),
            PropertyType::Array => value.is_array(),
            PropertyType::Any => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertySchema {
    pub kind: PropertyType,
    pub description: String,
    pub default: Option<Value>,
}

impl PropertySchema {
    pub fn new(kind: PropertyType, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            default: None,
        }
    }

    pub fn string(description: impl Into<String>) -> Self {
        Self::new(PropertyType::String, description)
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Structural input schema: declared properties (in declaration order) plus
/// the set of required property names.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSchema {
    pub properties: Vec<(String, PropertySchema)>,
    pub required: Vec<String>,
    /// When `false`, arguments not declared in `properties` are rejected.
    pub additional_properties: bool,
}

impl Default for InputSchema {
    fn default() -> Self {
        Self {
            properties: Vec::new(),
            required: Vec::new(),
            additional_properties: true,
        }
    }
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn property(mut self, name: impl Into<String>, schema: PropertySchema) -> Self {
        self.properties.push((name.into(), schema));
        self
    }

    pub fn required_property(mut self, name: impl Into<String>, schema: PropertySchema) -> Self {
        let name = name.into();
        self.required.push(name.clone());
        self.properties.push((name, schema));
        self
    }

    pub fn deny_unknown(mut self) -> Self {
        self.additional_properties = false;
        self
    }

    pub fn get(&self, name: &str) -> Option<&PropertySchema> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s)
    }

    /// Render as a JSON Schema object for `tools/list`.
    pub fn to_json(&self) -> Value {
        let mut props = Map::new();
        for (name, prop) in &self.properties {
            let mut p = Map::new();
            if prop.kind != PropertyType::Any {
                p.insert("type".into(), json!(prop.kind.as_str()));
            }
            if !prop.description.is_empty() {
                p.insert("description".into(), json!(prop.description));
            }
            if let Some(default) = &prop.default {
                p.insert("default".into(), default.clone());
            }
            props.insert(name.clone(), Value::Object(p));
        }

        let mut schema = json!({
            "type": "object",
            "properties": props,
        });
        if !self.required.is_empty() {
            schema["required"] = json!(self.required);
        }
        if !self.additional_properties {
            schema["additionalProperties"] = json!(false);
        }
        schema
    }
}

// ── Descriptor ──────────────────────────────────────────────────────────────

/// Behavioral hints surfaced to clients. Advisory only.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolAnnotations {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub read_only_hint: bool,
    pub destructive_hint: bool,
    pub idempotent_hint: bool,
    pub open_world_hint: bool,
}

/// Module type tag plus a config blob passed back to that module's dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerRef {
    pub module: String,
    pub config: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
    pub annotations: ToolAnnotations,
    pub handler: HandlerRef,
    pub roles_permitted: Vec<Role>,
}

impl ToolDescriptor {
    pub fn permits(&self, role: &Role) -> bool {
        self.roles_permitted.iter().any(|r| r == role)
    }

    /// MCP `Tool` object for discovery responses.
    pub fn to_mcp_json(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema.to_json(),
            "annotations": self.annotations,
        })
    }
}

// ── Handler modules ─────────────────────────────────────────────────────────

/// The single capability a handler module provides: route one call by its
/// `config` (typically an action tag) and produce an [`Outcome`].
///
/// Returning `Ok(Outcome::Error { .. })` is a normal, handler-reported
/// failure. Returning `Err` (or panicking) is a fault; the dispatcher wraps it
/// as `HandlerFault`.
pub trait ToolHandler: Send + Sync + 'static {
    fn dispatch<'a>(
        &'a self,
        args: Value,
        ctx: &'a CallContext,
        config: &'a Value,
    ) -> BoxFuture<'a, anyhow::Result<Outcome>>;
}

pub struct HandlerModule {
    pub name: String,
    pub tools: Vec<ToolDescriptor>,
    pub handler: Arc<dyn ToolHandler>,
}

impl HandlerModule {
    pub fn new(name: impl Into<String>, handler: Arc<dyn ToolHandler>) -> Self {
        Self {
            name: name.into(),
            tools: Vec::new(),
            handler,
        }
    }

    pub fn with_tool(mut self, tool: ToolDescriptor) -> Self {
        self.tools.push(tool);
        self
    }
}

impl std::fmt::Debug for HandlerModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerModule")
            .field("name", &self.name)
            .field("tools", &self.tools.iter().map(|t| &t.name).collect::<Vec<_>>())
            .finish()
    }
}

// ── Registry ────────────────────────────────────────────────────────────────

struct ModuleEntry {
    name: String,
    handler: Arc<dyn ToolHandler>,
}

struct ToolEntry {
    descriptor: ToolDescriptor,
    module: usize,
}

/// A resolved tool: its descriptor and the owning module's dispatch handle.
pub struct ResolvedTool<'a> {
    pub descriptor: &'a ToolDescriptor,
    pub module: &'a str,
    pub handler: Arc<dyn ToolHandler>,
}

#[derive(Default)]
pub struct Registry {
    modules: Vec<ModuleEntry>,
    tools: Vec<ToolEntry>,
    index: HashMap<String, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every tool of `module`, or none of them.
    pub fn register(&mut self, module: HandlerModule) -> Result<(), RegistryError> {
        let mut seen = HashSet::new();
        for tool in &module.tools {
            if self.index.contains_key(&tool.name) || !seen.insert(tool.name.as_str()) {
                return Err(RegistryError::DuplicateToolName {
                    tool: tool.name.clone(),
                    module: module.name.clone(),
                });
            }
            if tool.roles_permitted.is_empty() {
                return Err(RegistryError::NoPermittedRoles(tool.name.clone()));
            }
            check_schema(tool)?;
        }

        let module_idx = self.modules.len();
        let tool_count = module.tools.len();
        self.modules.push(ModuleEntry {
            name: module.name.clone(),
            handler: module.handler,
        });
        for descriptor in module.tools {
            self.index.insert(descriptor.name.clone(), self.tools.len());
            self.tools.push(ToolEntry {
                descriptor,
                module: module_idx,
            });
        }

        tracing::info!(module = %module.name, tools = tool_count, "registry: module registered");
        Ok(())
    }

    pub fn resolve(&self, tool_name: &str) -> Result<ResolvedTool<'_>, DispatchError> {
        let entry = self
            .index
            .get(tool_name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| DispatchError::UnknownTool(tool_name.to_string()))?;
        let module = &self.modules[entry.module];
        Ok(ResolvedTool {
            descriptor: &entry.descriptor,
            module: &module.name,
            handler: Arc::clone(&module.handler),
        })
    }

    /// All descriptors in registration order. The iterator is lazy and can be
    /// cloned to restart it.
    pub fn list_tools(&self) -> impl Iterator<Item = &ToolDescriptor> + Clone + '_ {
        self.tools.iter().map(|e| &e.descriptor)
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.list_tools().map(|t| t.name.as_str()).collect()
    }

    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

fn check_schema(tool: &ToolDescriptor) -> Result<(), RegistryError> {
    let schema = &tool.input_schema;
    if !schema.additional_properties {
        if let Some(missing) = schema.required.iter().find(|r| schema.get(r).is_none()) {
            return Err(RegistryError::InvalidSchema {
                tool: tool.name.clone(),
                reason: format!("required property '{}' is not declared", missing),
            });
        }
    }
    for (name, prop) in &schema.properties {
        if let Some(default) = &prop.default {
            if !prop.kind.matches(default) {
                return Err(RegistryError::InvalidSchema {
                    tool: tool.name.clone(),
                    reason: format!("default for '{}' is not a {}", name, prop.kind.as_str()),
                });
            }
        }
    }
    Ok(())
}
