//! Projection of variable definitions into a container environment

use crate::error::{LifecycleError, LifecycleResult};
use hearth_proto::{VariableDefinition, VariableType};
use serde_json::Value;
use std::collections::BTreeMap;

/// Build the `env` map sent to the node, coercing each value through its
/// declared type. The first malformed variable aborts the whole projection.
pub fn project_environment(variables: &[VariableDefinition]) -> LifecycleResult<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();
    for variable in variables {
        if variable.env.trim().is_empty() {
            return Err(invalid(variable, "empty environment name"));
        }
        let value = coerce(variable.kind, variable.effective()).map_err(|reason| invalid(variable, reason))?;
        env.insert(variable.env.clone(), value);
    }
    Ok(env)
}

/// Coerce a raw value to the string form of `kind`.
pub fn coerce(kind: VariableType, value: &Value) -> Result<String, String> {
    match kind {
        VariableType::Boolean => Ok(truthy(value).to_string()),
        VariableType::Number => number(value),
        VariableType::Text => text(value),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => {
            let s = s.trim();
            s == "1" || s.eq_ignore_ascii_case("true")
        }
        _ => false,
    }
}

fn number(value: &Value) -> Result<String, String> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
        Value::Number(n) => n
            .as_f64()
            .map(format_float)
            .ok_or_else(|| format!("{n} is not a finite number")),
        Value::String(s) => {
            let parsed: f64 = s
                .trim()
                .parse()
                .map_err(|_| format!("{s:?} is not a number"))?;
            if !parsed.is_finite() {
                return Err(format!("{s:?} is not a finite number"));
            }
            Ok(format_float(parsed))
        }
        Value::Null => Err("no value set".to_string()),
        other => Err(format!("{other} is not a number")),
    }
}

fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

fn text(value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Null => Ok(String::new()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(format!("{other} cannot be used as text")),
    }
}

fn invalid(variable: &VariableDefinition, reason: impl Into<String>) -> LifecycleError {
    LifecycleError::InvalidVariable {
        name: variable.env.clone(),
        reason: reason.into(),
    }
}
