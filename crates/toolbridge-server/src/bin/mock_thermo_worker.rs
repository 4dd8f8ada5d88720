//! Canned thermodynamic-property worker.
//!
//! Speaks the toolbridge line protocol on stdin/stdout with a small built-in
//! property table. Good enough for local runs and the end-to-end tests.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use toolbridge::bridge::protocol::{ToolDescriptor, ToolOutput};
use toolbridge::{ToolError, ToolHandler, run_worker};

const COMPONENTS: &[&str] = &["water", "ethanol", "methanol", "benzene", "toluene"];
const PROPERTIES: &[&str] = &[
    "density",
    "viscosity",
    "heat_capacity",
    "vapor_pressure",
    "enthalpy",
    "entropy",
];
const DATA_SOURCE: &str = "mock correlations";

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

/// Antoine equation in mmHg, returned in Pa.
fn antoine(a: f64, b: f64, c: f64, t_c: f64) -> f64 {
    let log_p_mmhg = a - b / (c + t_c);
    round_to(10f64.powf(log_p_mmhg) * 133.322, 1)
}

fn unit(property: &str) -> &'static str {
    match property {
        "density" => "kg/m3",
        "viscosity" => "Pa*s",
        "vapor_pressure" => "Pa",
        "heat_capacity" => "J/(kg*K)",
        _ => "",
    }
}

/// Property value at `temperature` (K); `None` outside the table or its validity range.
fn lookup(component: &str, property: &str, temperature: f64) -> Option<f64> {
    let t_c = temperature - 273.15;
    match (component, property) {
        ("water", "density") if (0.0..=150.0).contains(&t_c) => Some(round_to(
            999.97 - 0.0467 * t_c - 0.0088 * t_c.powi(2) + 0.000015 * t_c.powi(3),
            1,
        )),
        ("water", "viscosity") if (0.0..=150.0).contains(&t_c) => Some(round_to(
            0.00002414 * 10f64.powf(247.8 / (temperature - 140.0)),
            6,
        )),
        ("water", "vapor_pressure") if (0.0..=150.0).contains(&t_c) => {
            Some(antoine(8.07131, 1730.63, 233.426, t_c))
        }
        ("water", "heat_capacity") => Some(4184.0),
        ("ethanol", "density") if (-114.0..=78.0).contains(&t_c) => {
            Some(round_to(789.0 - 0.85 * (t_c - 20.0), 1))
        }
        ("ethanol", "vapor_pressure") if (-114.0..=78.0).contains(&t_c) => {
            Some(antoine(8.11220, 1592.864, 226.184, t_c))
        }
        ("ethanol", "heat_capacity") => Some(2440.0),
        ("methanol", "density") => Some(791.8),
        ("methanol", "heat_capacity") => Some(2534.0),
        ("benzene", "density") => Some(876.5),
        ("benzene", "heat_capacity") => Some(1740.0),
        ("toluene", "density") => Some(866.9),
        ("toluene", "heat_capacity") => Some(1687.0),
        _ => None,
    }
}

fn string_arg<'a>(arguments: &'a Map<String, Value>, key: &str) -> Result<&'a str, ToolError> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::invalid_arguments(format!("'{key}' must be a string")))
}

fn number_arg(arguments: &Map<String, Value>, key: &str) -> Result<f64, ToolError> {
    arguments
        .get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| ToolError::invalid_arguments(format!("'{key}' must be a number")))
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({"type": "object", "properties": properties, "required": required})
}

struct MockThermo;

impl MockThermo {
    fn calculate_property(&self, arguments: &Map<String, Value>) -> Result<ToolOutput, ToolError> {
        let component = string_arg(arguments, "component")?.to_lowercase();
        let property = string_arg(arguments, "property")?.to_lowercase();
        let mut temperature = number_arg(arguments, "temperature")?;
        let pressure = number_arg(arguments, "pressure")?;

        // Values this low are taken as Celsius.
        if temperature < 200.0 {
            temperature += 273.15;
        }

        let Some(value) = lookup(&component, &property, temperature) else {
            return Ok(ToolOutput::text(format!(
                "Could not find {property} data for {component} at T={temperature}K, P={pressure}Pa"
            )));
        };

        let text = format!("{property} of {component} at T={temperature}K, P={pressure}Pa: {value}");
        let structured = Map::from_iter([
            ("property".to_string(), json!(property)),
            ("component".to_string(), json!(component)),
            ("value".to_string(), json!(value)),
            ("unit".to_string(), json!(unit(&property))),
            ("temperature_K".to_string(), json!(temperature)),
            ("pressure_Pa".to_string(), json!(pressure)),
            ("data_sources".to_string(), json!([DATA_SOURCE])),
            ("formatted_text".to_string(), json!(text)),
        ]);
        Ok(ToolOutput::text(text).with_structured(structured))
    }

    fn search_components(&self, arguments: &Map<String, Value>) -> Result<ToolOutput, ToolError> {
        let query = string_arg(arguments, "query")?.trim().to_lowercase();
        let matches: Vec<&str> = COMPONENTS
            .iter()
            .copied()
            .filter(|c| c.contains(query.as_str()))
            .collect();

        if matches.is_empty() {
            return Ok(ToolOutput::text(format!("No components matching '{query}'")));
        }
        Ok(ToolOutput::text(format!("Matching components: {}", matches.join(", "))))
    }
}

#[async_trait]
impl ToolHandler for MockThermo {
    fn tools(&self) -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor {
                name: "calculate_property".to_string(),
                description: "Calculate thermodynamic property for a chemical component"
                    .to_string(),
                input_schema: object_schema(
                    json!({
                        "component": {"type": "string", "description": "Chemical component name (e.g., 'water', 'ethanol')"},
                        "property": {"type": "string", "description": "Property to calculate (e.g., 'density', 'vapor_pressure')"},
                        "temperature": {"type": "number", "description": "Temperature in Kelvin"},
                        "pressure": {"type": "number", "description": "Pressure in Pascal"}
                    }),
                    &["component", "property", "temperature", "pressure"],
                ),
            },
            ToolDescriptor {
                name: "list_available_components".to_string(),
                description: "List all available chemical components in the database".to_string(),
                input_schema: object_schema(json!({}), &[]),
            },
            ToolDescriptor {
                name: "list_available_properties".to_string(),
                description: "List all available properties that can be calculated".to_string(),
                input_schema: object_schema(json!({}), &[]),
            },
            ToolDescriptor {
                name: "search_components".to_string(),
                description: "Search the component database by name".to_string(),
                input_schema: object_schema(
                    json!({"query": {"type": "string", "description": "Part of a component name"}}),
                    &["query"],
                ),
            },
        ]
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolOutput, ToolError> {
        tracing::debug!(tool = %name, "Calling tool");
        match name {
            "calculate_property" => self.calculate_property(&arguments),
            "list_available_components" => Ok(ToolOutput::text(format!(
                "Available components: {}",
                COMPONENTS.join(", ")
            ))),
            "list_available_properties" => Ok(ToolOutput::text(format!(
                "Available properties: {}",
                PROPERTIES.join(", ")
            ))),
            "search_components" => self.search_components(&arguments),
            other => Err(ToolError::unknown_tool(other)),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    toolbridge_server::init_tracing();
    run_worker(Arc::new(MockThermo), tokio::io::stdin(), tokio::io::stdout()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn water_density_follows_temperature() {
        assert_eq!(lookup("water", "density", 298.15), Some(993.5));
        assert_eq!(lookup("water", "density", 273.15), Some(1000.0));
        assert_eq!(lookup("water", "density", 500.0), None);
    }

    #[test]
    fn fixed_values_ignore_temperature() {
        assert_eq!(lookup("toluene", "heat_capacity", 1000.0), Some(1687.0));
        assert_eq!(lookup("benzene", "viscosity", 300.0), None);
    }

    #[tokio::test]
    async fn calculate_property_structured() {
        let output = MockThermo
            .call_tool(
                "calculate_property",
                args(json!({"component": "Water", "property": "density", "temperature": 25, "pressure": 101325})),
            )
            .await
            .unwrap();

        assert_eq!(
            output.text,
            "density of water at T=298.15K, P=101325Pa: 993.5"
        );
        let structured = output.structured.unwrap();
        assert_eq!(structured["value"], json!(993.5));
        assert_eq!(structured["unit"], "kg/m3");
        assert_eq!(structured["temperature_K"], json!(298.15));
        assert_eq!(structured["formatted_text"], json!(output.text));
    }

    #[tokio::test]
    async fn unknown_pair_is_text_only() {
        let output = MockThermo
            .call_tool(
                "calculate_property",
                args(json!({"component": "mercury", "property": "density", "temperature": 300, "pressure": 1})),
            )
            .await
            .unwrap();
        assert!(output.text.starts_with("Could not find density data for mercury"));
        assert!(output.structured.is_none());
    }

    #[tokio::test]
    async fn missing_argument_is_rejected() {
        let err = MockThermo
            .call_tool("calculate_property", args(json!({"component": "water"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid arguments: 'property' must be a string");
    }

    #[tokio::test]
    async fn search_matches_substrings() {
        let output = MockThermo
            .call_tool("search_components", args(json!({"query": "ANOL"})))
            .await
            .unwrap();
        assert_eq!(output.text, "Matching components: ethanol, methanol");
    }

    #[tokio::test]
    async fn unknown_tool() {
        let err = MockThermo.call_tool("melt", Map::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Unknown tool: melt");
    }

    #[test]
    fn catalog_lists_every_tool() {
        let names: Vec<String> = MockThermo.tools().into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            [
                "calculate_property",
                "list_available_components",
                "list_available_properties",
                "search_components"
            ]
        );
    }
}
