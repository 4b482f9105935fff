//! Built-in `basic-tools` handler module.
//!
//! Three tools share one dispatch function routed by `config.action`:
//! - `echo`: return the given message
//! - `current-time`: current instant, optionally rendered in an IANA timezone
//! - `calculate`: arithmetic-only evaluation (see [`calc`])

pub mod calc;

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use chrono_tz::Tz;
use futures_util::future::BoxFuture;
use serde_json::{json, Value};

use crate::models::{CallContext, Outcome, Role};
use crate::registry::{
    HandlerModule, HandlerRef, InputSchema, PropertySchema, ToolAnnotations, ToolDescriptor,
    ToolHandler,
};

pub const MODULE_NAME: &str = "basic-tools";

/// Build the module with all three tool descriptors.
pub fn basic_tools() -> HandlerModule {
    HandlerModule::new(MODULE_NAME, Arc::new(BasicTools))
        .with_tool(descriptor(
            "echo",
            "Echo the input message back",
            "Echo",
            InputSchema::new().required_property("message", PropertySchema::string("Message to echo")),
        ))
        .with_tool(descriptor(
            "current-time",
            "Get the current time",
            "Current time",
            InputSchema::new().property(
                "timezone",
                PropertySchema::string("IANA timezone, e.g. 'Asia/Shanghai'").with_default(json!("UTC")),
            ),
        ))
        .with_tool(descriptor(
            "calculate",
            "Evaluate a simple arithmetic expression",
            "Calculator",
            InputSchema::new().required_property(
                "expression",
                PropertySchema::string("Arithmetic expression, e.g. '2 + 3 * 4'"),
            ),
        ))
}

fn descriptor(name: &str, description: &str, title: &str, input_schema: InputSchema) -> ToolDescriptor {
    ToolDescriptor {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
        annotations: ToolAnnotations {
            title: Some(title.to_string()),
            read_only_hint: true,
            destructive_hint: false,
            idempotent_hint: true,
            open_world_hint: true,
        },
        handler: HandlerRef {
            module: MODULE_NAME.to_string(),
            config: json!({ "action": name }),
        },
        roles_permitted: vec![Role::user(), Role::admin()],
    }
}

struct BasicTools;

impl ToolHandler for BasicTools {
    fn dispatch<'a>(
        &'a self,
        args: Value,
        _ctx: &'a CallContext,
        config: &'a Value,
    ) -> BoxFuture<'a, anyhow::Result<Outcome>> {
        Box::pin(async move {
            let action = config.get("action").and_then(Value::as_str).unwrap_or_default();
            Ok(match action {
                "echo" => echo(&args),
                "current-time" => current_time(&args),
                "calculate" => calculate(&args),
                other => Outcome::error(format!("Unknown action: {}", other)),
            })
        })
    }
}

fn str_arg<'a>(args: &'a Value, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

fn echo(args: &Value) -> Outcome {
    let message = str_arg(args, "message").unwrap_or_default();
    Outcome::success(json!({ "message": message }), format!("Echo: {}", message))
}

fn current_time(args: &Value) -> Outcome {
    let zone = str_arg(args, "timezone").unwrap_or("UTC");
    let tz: Tz = match zone.parse() {
        Ok(tz) => tz,
        Err(_) => return Outcome::error(format!("Unknown timezone: {}", zone)),
    };

    let now = Utc::now();
    let formatted = now.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S %Z").to_string();
    Outcome::success(
        json!({
            "timestamp": now.to_rfc3339_opts(SecondsFormat::Millis, true),
            "formatted": formatted,
            "timezone": zone,
        }),
        format!("Current time: {}", formatted),
    )
}

fn calculate(args: &Value) -> Outcome {
    let expression = str_arg(args, "expression").unwrap_or_default();
    match calc::evaluate(expression) {
        Ok(value) => {
            let result = number_json(value);
            Outcome::success(
                json!({ "expression": expression, "result": result }),
                format!("Result: {} = {}", expression, result),
            )
        }
        Err(e) => Outcome::error(format!("Calculation error: {}", e)),
    }
}

/// Whole numbers are rendered without a trailing `.0`.
fn number_json(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        json!(value as i64)
    } else {
        json!(value)
    }
}
