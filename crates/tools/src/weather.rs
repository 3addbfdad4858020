//! Weather tool that returns mock current conditions.
//!
//! The data is derived from a hash of the location name, so the same city
//! always reports the same weather and tests need no network.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use toolrelay_core::error::ToolError;
use toolrelay_core::tool::Tool;

#[derive(Default)]
pub struct WeatherTool {
    latency: Duration,
}

impl WeatherTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a slow upstream API.
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "get_current_weather"
    }

    fn description(&self) -> &str {
        "Get the current weather in a given location. Returns temperature, conditions, humidity, and wind speed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "The city and state, e.g. San Francisco, CA"
                },
                "unit": {
                    "type": "string",
                    "enum": ["celsius", "fahrenheit"],
                    "description": "Temperature unit (default: celsius)"
                }
            },
            "required": ["location"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let Some(location) = arguments["location"].as_str().filter(|l| !l.trim().is_empty()) else {
            return Ok(json!({ "error": "Missing required argument 'location'" }));
        };

        let unit = match arguments["unit"].as_str() {
            None | Some("celsius") => Unit::Celsius,
            Some("fahrenheit") => Unit::Fahrenheit,
            Some(other) => {
                return Ok(json!({
                    "error": format!("Unknown unit: {other}"),
                    "valid_units": ["celsius", "fahrenheit"],
                }));
            }
        };

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let report = mock_weather(location, unit);
        serde_json::to_value(&report).map_err(|e| ToolError::ExecutionFailed {
            tool_name: "get_current_weather".into(),
            reason: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Unit {
    Celsius,
    Fahrenheit,
}

#[derive(Serialize)]
struct WeatherReport {
    location: String,
    temperature: f64,
    unit: Unit,
    conditions: &'static str,
    humidity: u32,
    wind_speed: f64,
}

fn mock_weather(location: &str, unit: Unit) -> WeatherReport {
    let hash: u32 = location
        .trim()
        .to_lowercase()
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));

    let conditions = [
        "Clear skies",
        "Partly cloudy",
        "Overcast",
        "Light rain",
        "Heavy rain",
        "Thunderstorms",
        "Snow",
        "Foggy",
    ];

    let base_c = ((hash % 40) as f64) - 5.0; // -5 to 34°C
    let temperature = match unit {
        Unit::Celsius => base_c,
        Unit::Fahrenheit => base_c * 9.0 / 5.0 + 32.0,
    };

    WeatherReport {
        location: location.to_string(),
        temperature: (temperature * 10.0).round() / 10.0,
        unit,
        conditions: conditions[(hash as usize / 7) % conditions.len()],
        humidity: 30 + (hash % 60),
        wind_speed: ((hash % 30) as f64) + 5.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_report_fields() {
        let out = WeatherTool::new()
            .execute(json!({"location": "Tokyo"}))
            .await
            .unwrap();
        assert_eq!(out["location"], "Tokyo");
        assert_eq!(out["unit"], "celsius");
        for field in ["temperature", "conditions", "humidity", "wind_speed"] {
            assert!(out.get(field).is_some(), "missing {field}");
        }
    }

    #[tokio::test]
    async fn fahrenheit_converts() {
        let tool = WeatherTool::new();
        let c = tool.execute(json!({"location": "Paris"})).await.unwrap();
        let f = tool
            .execute(json!({"location": "Paris", "unit": "fahrenheit"}))
            .await
            .unwrap();
        let expected = c["temperature"].as_f64().unwrap() * 9.0 / 5.0 + 32.0;
        assert!((f["temperature"].as_f64().unwrap() - expected).abs() < 0.11);
        assert_eq!(f["unit"], "fahrenheit");
    }

    #[tokio::test]
    async fn deterministic_results() {
        let tool = WeatherTool::new();
        let r1 = tool.execute(json!({"location": "London"})).await.unwrap();
        let r2 = tool.execute(json!({"location": "london "})).await.unwrap();
        assert_eq!(r1["temperature"], r2["temperature"]);
        assert_eq!(r1["conditions"], r2["conditions"]);
    }

    #[tokio::test]
    async fn missing_location_is_encoded() {
        let out = WeatherTool::new().execute(json!({})).await.unwrap();
        assert!(out["error"].as_str().unwrap().contains("location"));
    }

    #[tokio::test]
    async fn unknown_unit_is_encoded() {
        let out = WeatherTool::new()
            .execute(json!({"location": "Oslo", "unit": "kelvin"}))
            .await
            .unwrap();
        assert_eq!(out["error"], "Unknown unit: kelvin");
    }
}
