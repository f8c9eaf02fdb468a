//! `getCurrentTemperature` — live temperature lookup via OpenWeatherMap.
//!
//! The sentinel output is `"NaN"`: missing credential, bad arguments,
//! unknown locations, timeouts, and malformed responses all produce it, and
//! the model is expected to tell the user the reading is unavailable.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use chatrelay_core::error::ToolError;
use chatrelay_core::provider::ToolDefinition;
use chatrelay_core::Tool;

const TOOL_NAME: &str = "getCurrentTemperature";
const BASE_URL: &str = "https://api.openweathermap.org/data/2.5/weather";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The sentinel returned when no real reading is available.
pub const UNAVAILABLE: &str = "NaN";

pub struct CurrentTemperatureTool {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl CurrentTemperatureTool {
    pub fn new(api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            api_key,
            base_url: BASE_URL.into(),
            client,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn fetch(&self, arguments_json: &str) -> Result<String, ToolError> {
        let args: Arguments = serde_json::from_str(arguments_json)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ToolError::NotConfigured("no OpenWeatherMap API key".into()))?;

        let units = match args.unit {
            Unit::Celsius => "metric",
            Unit::Fahrenheit => "imperial",
        };

        debug!(location = %args.location, units, "fetching current temperature");

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("q", args.location.as_str()),
                ("units", units),
                ("appid", api_key),
            ])
            .send()
            .await
            .map_err(|e| ToolError::RequestFailed {
                tool_name: TOOL_NAME.into(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(ToolError::RequestFailed {
                tool_name: TOOL_NAME.into(),
                reason: format!("status {}", response.status().as_u16()),
            });
        }

        let body: WeatherResponse =
            response.json().await.map_err(|e| ToolError::RequestFailed {
                tool_name: TOOL_NAME.into(),
                reason: format!("malformed response: {e}"),
            })?;

        Ok(body.main.temp.to_string())
    }
}

#[async_trait]
impl Tool for CurrentTemperatureTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: TOOL_NAME.into(),
            description: "Get the current temperature for a specific location".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "location": {
                        "type": "string",
                        "description": "The city and state, e.g., San Francisco, CA"
                    },
                    "unit": {
                        "type": "string",
                        "enum": ["Celsius", "Fahrenheit"],
                        "description": "The temperature unit to use"
                    }
                },
                "required": ["location", "unit"],
                "additionalProperties": false
            }),
            strict: true,
        }
    }

    async fn invoke(&self, arguments_json: &str) -> String {
        match self.fetch(arguments_json).await {
            Ok(temperature) => temperature,
            Err(e) => {
                warn!(error = %e, "temperature lookup failed");
                UNAVAILABLE.into()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct Arguments {
    location: String,
    unit: Unit,
}

#[derive(Debug, Deserialize)]
enum Unit {
    Celsius,
    Fahrenheit,
}

#[derive(Debug, Deserialize)]
struct WeatherResponse {
    main: WeatherMain,
}

#[derive(Debug, Deserialize)]
struct WeatherMain {
    temp: f64,
}
