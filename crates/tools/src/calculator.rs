//! Calculator tool: one arithmetic operation on two numbers.
//!
//! Runs as a blocking tool. Domain failures (division by zero, unknown
//! operation, unparseable numbers) come back as `{"error": ...}` payloads.

use serde_json::{Value, json};
use toolrelay_core::error::ToolError;
use toolrelay_core::tool::BlockingTool;

pub const VALID_OPERATIONS: [&str; 4] = ["add", "subtract", "multiply", "divide"];

pub struct CalculatorTool;

impl BlockingTool for CalculatorTool {
    fn name(&self) -> &str {
        "calculate"
    }

    fn description(&self) -> &str {
        "Perform basic arithmetic operations (add, subtract, multiply, divide) on two numbers."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": VALID_OPERATIONS,
                    "description": "The arithmetic operation to perform"
                },
                "num1": {
                    "type": "number",
                    "description": "The first number"
                },
                "num2": {
                    "type": "number",
                    "description": "The second number"
                }
            },
            "required": ["operation", "num1", "num2"]
        })
    }

    fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        Ok(calculate(&arguments))
    }
}

/// Evaluate one calculator request. Never fails: errors are encoded.
pub fn calculate(arguments: &Value) -> Value {
    let operation = arguments["operation"].as_str().unwrap_or_default();

    let (num1, num2) = match (coerce(&arguments["num1"], "num1"), coerce(&arguments["num2"], "num2")) {
        (Ok(a), Ok(b)) => (a, b),
        (Err(e), _) | (_, Err(e)) => return json!({ "error": format!("Invalid number format: {e}") }),
    };

    let result = match operation {
        "add" => num1 + num2,
        "subtract" => num1 - num2,
        "multiply" => num1 * num2,
        "divide" => {
            if num2 == 0.0 {
                return json!({
                    "error": "Division by zero is not allowed",
                    "operation": operation,
                    "num1": num1,
                    "num2": num2,
                });
            }
            num1 / num2
        }
        other => {
            return json!({
                "error": format!("Unknown operation: {other}"),
                "valid_operations": VALID_OPERATIONS,
            });
        }
    };

    json!({
        "operation": operation,
        "num1": num1,
        "num2": num2,
        "result": result,
    })
}

/// Accept JSON numbers and numeric strings, like a float() cast would.
fn coerce(value: &Value, field: &str) -> Result<f64, String> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| format!("{field} is out of range")),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("could not convert string to float: '{s}'")),
        Value::Null => Err(format!("missing required argument '{field}'")),
        other => Err(format!("{field} must be a number, got {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds_two_numbers() {
        let out = calculate(&json!({"operation": "add", "num1": 2, "num2": 1}));
        assert_eq!(
            out,
            json!({"operation": "add", "num1": 2.0, "num2": 1.0, "result": 3.0})
        );
    }

    #[test]
    fn other_operations() {
        assert_eq!(calculate(&json!({"operation": "subtract", "num1": 5, "num2": 8}))["result"], -3.0);
        assert_eq!(calculate(&json!({"operation": "multiply", "num1": 1.5, "num2": 4}))["result"], 6.0);
        assert_eq!(calculate(&json!({"operation": "divide", "num1": 9, "num2": 3}))["result"], 3.0);
    }

    #[test]
    fn division_by_zero_is_encoded() {
        let out = calculate(&json!({"operation": "divide", "num1": 5, "num2": 0}));
        assert_eq!(
            out,
            json!({
                "error": "Division by zero is not allowed",
                "operation": "divide",
                "num1": 5.0,
                "num2": 0.0
            })
        );
    }

    #[test]
    fn unknown_operation_lists_valid_ones() {
        let out = calculate(&json!({"operation": "modulo", "num1": 5, "num2": 2}));
        assert_eq!(out["error"], "Unknown operation: modulo");
        assert_eq!(out["valid_operations"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn numeric_strings_are_coerced() {
        let out = calculate(&json!({"operation": "add", "num1": "2.5", "num2": " 1 "}));
        assert_eq!(out["result"], 3.5);
    }

    #[test]
    fn bad_numbers_are_encoded() {
        let out = calculate(&json!({"operation": "add", "num1": "two", "num2": 1}));
        assert!(out["error"].as_str().unwrap().starts_with("Invalid number format"));

        let out = calculate(&json!({"operation": "add", "num1": 1}));
        assert!(out["error"].as_str().unwrap().contains("num2"));
    }

    #[test]
    fn blocking_tool_never_errs() {
        let out = CalculatorTool.call(json!({})).unwrap();
        assert!(out.get("error").is_some());
    }
}
