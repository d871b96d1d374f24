//! Latest-news lookup against the NewsAPI `everything` endpoint.

use super::traits::{required_str_arg, Tool, ToolResult};
use crate::config::NewsToolConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

pub struct NewsTool {
    api_key: Option<String>,
    base_url: String,
    page_size: u32,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct NewsResponse {
    #[serde(default)]
    articles: Vec<Article>,
}

#[derive(Debug, Deserialize)]
struct Article {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

impl NewsTool {
    pub fn new(config: &NewsToolConfig) -> Self {
        Self {
            api_key: config
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(ToString::to_string),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            page_size: config.page_size,
            client: Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    fn apology(topic: &str) -> String {
        format!("Sorry, I couldn't find news about {topic}")
    }

    /// One `title\ndescription` block per article, separated by a blank line.
    fn digest(body: &NewsResponse) -> String {
        body.articles
            .iter()
            .map(|article| {
                format!(
                    "{}\n{}",
                    article.title.as_deref().unwrap_or_default(),
                    article.description.as_deref().unwrap_or_default()
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    async fn lookup(&self, topic: &str) -> anyhow::Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("News API key not configured"))?;

        let page_size = self.page_size.to_string();
        let response = self
            .client
            .get(format!("{}/everything", self.base_url))
            .query(&[
                ("q", topic),
                ("sortBy", "publishedAt"),
                ("pageSize", page_size.as_str()),
                ("apiKey", api_key),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(crate::providers::api_error("NewsAPI", response).await);
        }

        let body: NewsResponse = response.json().await?;
        Ok(Self::digest(&body))
    }
}

#[async_trait]
impl Tool for NewsTool {
    fn name(&self) -> &str {
        "get_news"
    }

    fn description(&self) -> &str {
        "Get latest news about a specific topic"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "topic": {
                    "type": "string",
                    "description": "The topic to get news about"
                }
            },
            "required": ["topic"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let topic = match required_str_arg(&args, "topic") {
            Ok(topic) => topic,
            Err(error) => return Ok(ToolResult::failed(error)),
        };

        match self.lookup(topic).await {
            Ok(digest) => Ok(ToolResult::ok(digest)),
            Err(error) => {
                let detail = crate::providers::sanitize_api_error(&error.to_string());
                tracing::warn!(tool = "get_news", topic, "News lookup failed: {detail}");
                Ok(ToolResult::degraded(Self::apology(topic), detail))
            }
        }
    }
}
