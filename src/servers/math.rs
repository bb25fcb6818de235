//! Arithmetic tools over 64-bit floats.
//!
//! Non-finite results are returned as the sentinel strings `"inf"`,
//! `"-inf"` and `"nan"`, never as errors.

use serde_json::Value;

use crate::tool_server::{Arguments, ParamSpec, ParamType, ServerRegistry, ToolEntry, ToolError, ToolOutput};

/// Render a float for the wire.
pub fn sentinel_value(v: f64) -> Value {
    if v.is_nan() {
        Value::from("nan")
    } else if v == f64::INFINITY {
        Value::from("inf")
    } else if v == f64::NEG_INFINITY {
        Value::from("-inf")
    } else {
        Value::from(v)
    }
}

fn output(v: f64) -> ToolOutput {
    let value = sentinel_value(v);
    let text = match &value {
        Value::String(s) => s.clone(),
        _ => v.to_string(),
    };
    ToolOutput::text(text).with_structured(serde_json::json!({ "result": value }))
}

fn binary<F>(name: &str, description: &str, lhs: &str, rhs: &str, op: F) -> ToolEntry
where
    F: Fn(f64, f64) -> f64 + Send + Sync + 'static,
{
    let (lhs_name, rhs_name) = (lhs.to_string(), rhs.to_string());
    ToolEntry::sync(
        name,
        description,
        vec![
            ParamSpec::required(lhs, ParamType::Number, ""),
            ParamSpec::required(rhs, ParamType::Number, ""),
        ],
        move |args: &Arguments| -> Result<ToolOutput, ToolError> {
            Ok(output(op(args.number(&lhs_name)?, args.number(&rhs_name)?)))
        },
    )
}

pub fn divide(a: f64, b: f64) -> f64 {
    if b == 0.0 {
        f64::INFINITY
    } else {
        a / b
    }
}

pub fn sqrt(value: f64) -> f64 {
    if value < 0.0 {
        f64::NAN
    } else {
        value.sqrt()
    }
}

/// The math server: add, subtract, multiply, divide, power, sqrt.
pub fn registry() -> ServerRegistry {
    ServerRegistry::new("math")
        .with_tool(binary("add", "Add two numbers.", "a", "b", |a, b| a + b))
        .with_tool(binary("subtract", "Subtract two numbers.", "a", "b", |a, b| a - b))
        .with_tool(binary("multiply", "Multiply two numbers.", "a", "b", |a, b| a * b))
        .with_tool(binary("divide", "Divide two numbers.", "a", "b", divide))
        .with_tool(binary(
            "power",
            "Raise a number to a power.",
            "base",
            "exponent",
            f64::powf,
        ))
        .with_tool(ToolEntry::sync(
            "sqrt",
            "Calculate the square root of a number.",
            vec![ParamSpec::required("value", ParamType::Number, "")],
            |args| Ok(output(sqrt(args.number("value")?))),
        ))
}
