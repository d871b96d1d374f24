//! OpenAI chat completions provider.
//!
//! Speaks `/chat/completions` with native function calling and JSON-schema
//! structured output. Any OpenAI-compatible endpoint works through `api_url`.

use crate::providers::traits::{
    ChatRequest as ProviderChatRequest, ChatResponse as ProviderChatResponse,
    ConversationMessage, Provider, ResponseFormat, TokenUsage, ToolCall as ProviderToolCall,
};
use crate::tools::ToolSpec;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(api_key: Option<&str>) -> Self {
        Self::with_base_url(None, api_key)
    }

    pub fn with_base_url(base_url: Option<&str>, api_key: Option<&str>) -> Self {
        let base_url = base_url
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .unwrap_or(DEFAULT_BASE_URL);
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(ToString::to_string),
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Full chat completions URL. A base that already names the endpoint is used as-is.
    fn chat_completions_url(&self) -> String {
        let has_full_endpoint = reqwest::Url::parse(&self.base_url)
            .map(|url| {
                url.path()
                    .trim_end_matches('/')
                    .ends_with("/chat/completions")
            })
            .unwrap_or_else(|_| {
                self.base_url
                    .trim_end_matches('/')
                    .ends_with("/chat/completions")
            });

        if has_full_endpoint {
            self.base_url.clone()
        } else {
            format!("{}/chat/completions", self.base_url)
        }
    }

    fn require_key(&self) -> anyhow::Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            anyhow::anyhow!(
                "OpenAI API key not set. Set OPENAI_API_KEY or `api_key` in config.toml."
            )
        })
    }
}

// ── Wire types ──────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<NativeMessage>,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<NativeToolSpec>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct NativeMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<NativeToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct NativeToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    function: NativeFunction,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct NativeFunction {
    name: String,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Serialize)]
struct NativeToolSpec {
    #[serde(rename = "type")]
    kind: &'static str,
    function: NativeFunctionSpec,
}

#[derive(Debug, Serialize)]
struct NativeFunctionSpec {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<NativeToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

// ── SSE streaming types ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StreamChatResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Drain complete SSE lines from `buffer` and extract `data:` payloads.
///
/// Bytes after the last newline stay in the buffer, so a multi-byte
/// character split across network chunks is decoded only once whole.
fn drain_sse_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let Some(idx) = buffer.iter().rposition(|&b| b == b'\n') else {
        return Vec::new();
    };
    let complete: Vec<u8> = buffer.drain(..=idx).collect();

    String::from_utf8_lossy(&complete)
        .split('\n')
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|data| !data.is_empty() && *data != "[DONE]")
        .map(ToString::to_string)
        .collect()
}

fn to_native_messages(messages: &[ConversationMessage]) -> Vec<NativeMessage> {
    let mut native = Vec::with_capacity(messages.len());
    for message in messages {
        match message {
            ConversationMessage::Chat(chat) => native.push(NativeMessage {
                role: chat.role.clone(),
                content: Some(chat.content.clone()),
                tool_calls: None,
                tool_call_id: None,
            }),
            ConversationMessage::AssistantToolCalls { text, tool_calls } => {
                native.push(NativeMessage {
                    role: "assistant".into(),
                    content: text.clone(),
                    tool_calls: Some(
                        tool_calls
                            .iter()
                            .map(|call| NativeToolCall {
                                id: Some(call.id.clone()),
                                kind: Some("function".into()),
                                function: NativeFunction {
                                    name: call.name.clone(),
                                    arguments: Some(call.arguments.clone()),
                                },
                            })
                            .collect(),
                    ),
                    tool_call_id: None,
                });
            }
            ConversationMessage::ToolResults(results) => {
                native.extend(results.iter().map(|result| NativeMessage {
                    role: "tool".into(),
                    content: Some(result.content.clone()),
                    tool_calls: None,
                    tool_call_id: Some(result.tool_call_id.clone()),
                }));
            }
        }
    }
    native
}

fn to_native_tools(tools: &[ToolSpec]) -> Vec<NativeToolSpec> {
    tools
        .iter()
        .map(|spec| NativeToolSpec {
            kind: "function",
            function: NativeFunctionSpec {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: spec.parameters.clone(),
            },
        })
        .collect()
}

fn to_native_response_format(format: &ResponseFormat) -> Option<serde_json::Value> {
    match format {
        ResponseFormat::Text => None,
        ResponseFormat::JsonSchema { name, schema } => Some(serde_json::json!({
            "type": "json_schema",
            "json_schema": {
                "name": name,
                "schema": schema,
                "strict": true,
            }
        })),
    }
}

fn parse_chat_response(body: ApiChatResponse) -> anyhow::Result<ProviderChatResponse> {
    let usage = body.usage.map(|u| TokenUsage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
    });

    let choice = body
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("No response from OpenAI"))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| ProviderToolCall {
            id: call
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            name: call.function.name,
            arguments: call
                .function
                .arguments
                .filter(|args| !args.trim().is_empty())
                .unwrap_or_else(|| "{}".to_string()),
        })
        .collect();

    Ok(ProviderChatResponse {
        text: choice.message.content,
        tool_calls,
        usage,
    })
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn chat(
        &self,
        request: ProviderChatRequest<'_>,
        model: &str,
        temperature: f64,
    ) -> anyhow::Result<ProviderChatResponse> {
        let api_key = self.require_key()?;

        let body = ChatRequest {
            model: model.to_string(),
            messages: to_native_messages(request.messages),
            temperature,
            tools: request.tools.map(to_native_tools),
            response_format: to_native_response_format(&request.response_format),
            stream: None,
        };

        let response = self
            .client
            .post(self.chat_completions_url())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(super::api_error(self.name(), response).await);
        }

        let chat_response: ApiChatResponse = response.json().await?;
        parse_chat_response(chat_response)
    }

    async fn stream_chat(
        &self,
        messages: &[ConversationMessage],
        model: &str,
        temperature: f64,
        tx: mpsc::UnboundedSender<String>,
    ) -> anyhow::Result<String> {
        let api_key = self.require_key()?;

        let body = ChatRequest {
            model: model.to_string(),
            messages: to_native_messages(messages),
            temperature,
            tools: None,
            response_format: None,
            stream: Some(true),
        };

        let response = self
            .client
            .post(self.chat_completions_url())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(super::api_error(self.name(), response).await);
        }

        let mut content_buf = String::new();
        let mut sse_buf: Vec<u8> = Vec::new();
        let mut byte_stream = response.bytes_stream();

        while let Some(chunk_result) = byte_stream.next().await {
            let bytes = chunk_result?;
            sse_buf.extend_from_slice(&bytes);

            let payloads = drain_sse_lines(&mut sse_buf);
            push_stream_payloads(&payloads, &mut content_buf, &tx);
        }

        // Trailing event without a final newline
        if !sse_buf.is_empty() {
            sse_buf.push(b'\n');
            let payloads = drain_sse_lines(&mut sse_buf);
            push_stream_payloads(&payloads, &mut content_buf, &tx);
        }

        Ok(content_buf)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

fn push_stream_payloads(
    payloads: &[String],
    content_buf: &mut String,
    tx: &mpsc::UnboundedSender<String>,
) {
    for payload in payloads {
        let Ok(chunk) = serde_json::from_str::<StreamChatResponse>(payload) else {
            tracing::debug!(payload = %payload, "Skipping unparseable stream chunk");
            continue;
        };
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                content_buf.push_str(&content);
                let _ = tx.send(content);
            }
        }
    }
}
