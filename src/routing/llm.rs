//! LLM-backed router step using structured output.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use super::traits::{Category, Classifier, RouteDecision, RoutingError};
use crate::providers::{ChatMessage, ChatRequest, ConversationMessage, Provider, ResponseFormat};

pub const ROUTER_SYSTEM_PROMPT: &str = "You are a routing expert. Analyze the user's request and route it to the appropriate agents:\n\
- For any request that involves weather (e.g., 'what is the weather in a given city', 'tell me about the temperature in a given city'): route to 'weather'\n\
- For any request related to news (e.g., 'give me information about something', 'tell me what is going on at a given place', 'tell me what is happening in the world'): route to 'news'\n\
- For any other requests: route to 'general'\n\
If the request clearly asks for more than one of these, list every matching step, most important first. \
Otherwise return exactly one step.";

const ROUTE_SCHEMA_NAME: &str = "route";

fn route_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "steps": {
                "type": "array",
                "description": "The next steps in the routing process",
                "items": {
                    "type": "string",
                    "enum": ["general", "weather", "news"]
                }
            }
        },
        "required": ["steps"],
        "additionalProperties": false
    })
}

/// Routes with one structured-output model call.
pub struct LlmClassifier {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f64,
    multi_route: bool,
}

impl LlmClassifier {
    pub fn new(provider: Arc<dyn Provider>, model: &str, temperature: f64, multi_route: bool) -> Self {
        Self {
            provider,
            model: model.to_string(),
            temperature,
            multi_route,
        }
    }
}

/// Remove a surrounding Markdown code fence, if any.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    // Drop an info string such as `json`
    match inner.find('\n') {
        Some(newline) if !inner[..newline].trim_start().starts_with('{') => {
            inner[newline + 1..].trim()
        }
        _ => inner.trim(),
    }
}

fn labels_from_value(value: &serde_json::Value) -> Option<Vec<String>> {
    match value {
        serde_json::Value::String(label) => Some(vec![label.clone()]),
        serde_json::Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|item| item.as_str().map(ToString::to_string))
                .collect(),
        ),
        serde_json::Value::Object(map) => map
            .get("steps")
            .or_else(|| map.get("step"))
            .and_then(labels_from_value),
        _ => None,
    }
}

/// Parse the router's raw reply into a decision.
///
/// Accepts `{"steps": [...]}`, `{"step": "..."}`, a bare JSON list or string,
/// or a bare label. Labels outside the closed set are dropped; nothing usable
/// left means `general`.
pub fn parse_decision(raw: &str) -> std::result::Result<RouteDecision, RoutingError> {
    let body = strip_code_fence(raw);
    let labels = match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => labels_from_value(&value)
            .ok_or_else(|| RoutingError::MalformedDecision(crate::util::truncate(body, 80)))?,
        Err(_) if body.parse::<Category>().is_ok() => vec![body.to_string()],
        Err(_) => return Err(RoutingError::MalformedDecision(crate::util::truncate(body, 80))),
    };

    let categories = labels.iter().filter_map(|label| match label.parse::<Category>() {
        Ok(category) => Some(category),
        Err(error) => {
            tracing::debug!("Dropping router label: {error}");
            None
        }
    });

    Ok(RouteDecision::new(categories))
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(&self, input: &str) -> Result<RouteDecision> {
        let messages = vec![
            ConversationMessage::Chat(ChatMessage::system(ROUTER_SYSTEM_PROMPT)),
            ConversationMessage::Chat(ChatMessage::user(input)),
        ];
        let request = ChatRequest::new(&messages).with_response_format(ResponseFormat::JsonSchema {
            name: ROUTE_SCHEMA_NAME.to_string(),
            schema: route_schema(),
        });

        let response = self
            .provider
            .chat(request, &self.model, self.temperature)
            .await?;

        let decision = parse_decision(response.text_or_empty()).unwrap_or_else(|error| {
            tracing::warn!("{error}; routing to general");
            RouteDecision::single(Category::General)
        });

        Ok(if self.multi_route {
            decision
        } else {
            decision.into_single()
        })
    }

    fn name(&self) -> &str {
        "llm"
    }
}
