//! Tool Invocation Gateway
//!
//! Validates a model-requested tool call against the active capability set,
//! executes it with a per-call timeout, and normalizes every outcome —
//! success or failure — into an Observation. No raw fault ever reaches the
//! loop from here, and mutating tools are never retried.

use crate::error::AgentError;
use crate::models::{Observation, ToolCall};
use crate::tools::{CapabilitySet, ToolKind};
use crate::Result;
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ToolGateway {
    timeout: Duration,
}

impl ToolGateway {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Execute one ToolCall against the active set. Always returns an
    /// Observation; unknown tools, bad arguments, provider failures and
    /// timeouts all land in the same failure channel.
    pub async fn invoke(&self, call: &ToolCall, active_set: &CapabilitySet) -> Observation {
        let start = Instant::now();

        let Some(tool) = active_set.get(&call.name) else {
            warn!(
                tool_name = %call.name,
                capability_set = %active_set.name(),
                "Unknown tool requested by model"
            );
            return Observation::failure(
                call.name.clone(),
                AgentError::UnknownTool(format!(
                    "'{}' is not in this capability set. Available tools: {}",
                    call.name,
                    active_set.tool_names().join(", ")
                ))
                .to_string(),
                elapsed_ms(start),
            );
        };

        let mut args = match validate_arguments(&tool.parameters(), &call.arguments) {
            Ok(args) => args,
            Err(e) => {
                warn!(tool_name = %call.name, error = %e, "Argument validation failed");
                return Observation::failure(call.name.clone(), e.to_string(), elapsed_ms(start));
            }
        };

        // Writes carry an idempotency key so an upstream duplicate cannot
        // double-apply; generated here when the model did not supply one.
        if tool.kind() == ToolKind::Mutating {
            if let Some(object) = args.as_object_mut() {
                object
                    .entry("idempotency_key".to_string())
                    .or_insert_with(|| json!(Uuid::new_v4().to_string()));
            }
        }

        debug!(tool_name = %call.name, "Invoking tool");

        let result = tokio::time::timeout(self.timeout, tool.execute(&args)).await;
        let elapsed = elapsed_ms(start);

        match result {
            Ok(Ok(payload)) => Observation::success(call.name.clone(), payload, elapsed),
            Ok(Err(e)) => {
                warn!(tool_name = %call.name, error = %e, "Tool execution failed");
                Observation::failure(call.name.clone(), e.to_string(), elapsed)
            }
            Err(_) => {
                warn!(tool_name = %call.name, timeout = ?self.timeout, "Tool timed out");
                Observation::failure(
                    call.name.clone(),
                    AgentError::ToolTimeout(self.timeout).to_string(),
                    elapsed,
                )
            }
        }
    }
}

impl Default for ToolGateway {
    fn default() -> Self {
        Self::new(DEFAULT_TOOL_TIMEOUT)
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Check (and where possible coerce) the call arguments against the tool's
/// parameter schema. Supports the object schemas the tools declare:
/// `properties` with string/number/integer/boolean types plus `required`.
pub fn validate_arguments(schema: &Value, args: &Value) -> Result<Value> {
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let supplied = match args {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        _ => {
            return Err(AgentError::InvalidArguments(
                "tool arguments must be a JSON object".to_string(),
            ))
        }
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !supplied.contains_key(key) {
                return Err(AgentError::InvalidArguments(format!(
                    "missing required argument '{}'",
                    key
                )));
            }
        }
    }

    let mut coerced = Map::with_capacity(supplied.len());
    for (key, value) in supplied {
        let expected = properties
            .get(&key)
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str);

        let value = match expected {
            Some(expected) => coerce(&key, value, expected)?,
            // Extra arguments are passed through untouched.
            None => value,
        };
        coerced.insert(key, value);
    }

    Ok(Value::Object(coerced))
}

fn coerce(key: &str, value: Value, expected: &str) -> Result<Value> {
    let mismatch = |value: &Value| {
        AgentError::InvalidArguments(format!(
            "argument '{}' should be {}, got {}",
            key, expected, value
        ))
    };

    match expected {
        "string" => match value {
            Value::String(_) => Ok(value),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            other => Err(mismatch(&other)),
        },
        "number" => match &value {
            Value::Number(_) => Ok(value),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(|f| serde_json::Number::from_f64(f).map(Value::Number))
                .ok_or_else(|| mismatch(&value)),
            _ => Err(mismatch(&value)),
        },
        "integer" => match &value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value),
            Value::Number(n) => match n.as_f64() {
                // Whole floats only, and only within i64 range; anything
                // that would saturate is a mismatch.
                Some(f)
                    if f.fract() == 0.0
                        && f >= i64::MIN as f64
                        && f < i64::MAX as f64 =>
                {
                    Ok(json!(f as i64))
                }
                _ => Err(mismatch(&value)),
            },
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(|i| json!(i))
                .map_err(|_| mismatch(&value)),
            _ => Err(mismatch(&value)),
        },
        "boolean" => match &value {
            Value::Bool(_) => Ok(value),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" => Ok(json!(true)),
                "false" => Ok(json!(false)),
                _ => Err(mismatch(&value)),
            },
            _ => Err(mismatch(&value)),
        },
        "array" => match &value {
            Value::Array(_) => Ok(value),
            _ => Err(mismatch(&value)),
        },
        _ => Ok(value),
    }
}
