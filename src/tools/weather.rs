//! Current-weather lookup against the OpenWeatherMap API.

use super::traits::{required_str_arg, Tool, ToolResult};
use crate::config::WeatherToolConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

pub struct WeatherTool {
    api_key: Option<String>,
    base_url: String,
    units: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct WeatherResponse {
    main: WeatherMain,
    #[serde(default)]
    weather: Vec<WeatherCondition>,
}

#[derive(Debug, Deserialize)]
struct WeatherMain {
    temp: f64,
}

#[derive(Debug, Deserialize)]
struct WeatherCondition {
    description: String,
}

impl WeatherTool {
    pub fn new(config: &WeatherToolConfig) -> Self {
        Self {
            api_key: config
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(ToString::to_string),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            units: config.units.clone(),
            client: Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    fn unit_symbol(&self) -> &'static str {
        match self.units.as_str() {
            "imperial" => "°F",
            "standard" => "K",
            _ => "°C",
        }
    }

    fn apology(location: &str) -> String {
        format!("Sorry, I couldn't get the weather for {location}")
    }

    fn describe(&self, location: &str, body: &WeatherResponse) -> anyhow::Result<String> {
        let condition = body
            .weather
            .first()
            .map(|w| w.description.as_str())
            .ok_or_else(|| anyhow::anyhow!("weather response has no conditions"))?;
        Ok(format!(
            "The current weather in {location} is {}{} with {condition}",
            body.main.temp,
            self.unit_symbol()
        ))
    }

    async fn lookup(&self, location: &str) -> anyhow::Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("OpenWeather API key not configured"))?;

        let response = self
            .client
            .get(format!("{}/weather", self.base_url))
            .query(&[
                ("q", location),
                ("appid", api_key),
                ("units", self.units.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(crate::providers::api_error("OpenWeather", response).await);
        }

        let body: WeatherResponse = response.json().await?;
        self.describe(location, &body)
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Get current weather information for a specific location"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "The location to get weather for"
                }
            },
            "required": ["location"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let location = match required_str_arg(&args, "location") {
            Ok(location) => location,
            Err(error) => return Ok(ToolResult::failed(error)),
        };

        match self.lookup(location).await {
            Ok(report) => Ok(ToolResult::ok(report)),
            Err(error) => {
                // Transport errors carry the request URL, which holds the key.
                let detail = crate::providers::sanitize_api_error(&error.to_string());
                tracing::warn!(tool = "get_weather", location, "Weather lookup failed: {detail}");
                Ok(ToolResult::degraded(Self::apology(location), detail))
            }
        }
    }
}
