//! Test doubles shared across module tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::providers::{
    ChatMessage, ChatRequest, ChatResponse, ConversationMessage, Provider, ResponseFormat, ToolCall,
};

/// Snapshot of one request seen by [`MockProvider`].
#[derive(Debug, Clone)]
pub struct MockCall {
    pub messages: Vec<ConversationMessage>,
    pub tool_names: Vec<String>,
    pub response_format: ResponseFormat,
    pub model: String,
}

impl MockCall {
    fn chat_messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter().filter_map(|m| match m {
            ConversationMessage::Chat(chat) => Some(chat),
            _ => None,
        })
    }

    pub fn system_prompt(&self) -> Option<String> {
        self.chat_messages()
            .find(|m| m.role == "system")
            .map(|m| m.content.clone())
    }

    pub fn last_user(&self) -> Option<String> {
        self.chat_messages()
            .filter(|m| m.role == "user")
            .last()
            .map(|m| m.content.clone())
    }

    /// Content of the most recent tool result, if the last turn was a tool round.
    pub fn last_tool_result(&self) -> Option<String> {
        match self.messages.last() {
            Some(ConversationMessage::ToolResults(results)) => {
                results.last().map(|r| r.content.clone())
            }
            _ => None,
        }
    }
}

type Handler = dyn Fn(&MockCall) -> anyhow::Result<ChatResponse> + Send + Sync;

/// Provider whose replies are computed by a closure over the request.
pub struct MockProvider {
    handler: Box<Handler>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockProvider {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&MockCall) -> anyhow::Result<ChatResponse> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn text(text: &str) -> ChatResponse {
        ChatResponse {
            text: Some(text.to_string()),
            tool_calls: Vec::new(),
            usage: None,
        }
    }

    pub fn tool_call(name: &str, arguments: serde_json::Value) -> ChatResponse {
        ChatResponse {
            text: None,
            tool_calls: vec![ToolCall {
                id: format!("call_{name}"),
                name: name.to_string(),
                arguments: arguments.to_string(),
            }],
            usage: None,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn chat(
        &self,
        request: ChatRequest<'_>,
        model: &str,
        _temperature: f64,
    ) -> anyhow::Result<ChatResponse> {
        let call = MockCall {
            messages: request.messages.to_vec(),
            tool_names: request
                .tools
                .unwrap_or_default()
                .iter()
                .map(|t| t.name.clone())
                .collect(),
            response_format: request.response_format.clone(),
            model: model.to_string(),
        };
        self.calls.lock().push(call.clone());
        (self.handler)(&call)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ── Local HTTP upstream ─────────────────────────────────────────

/// Raw HTTP/1.1 response that closes the connection after `body`.
pub fn http_response(status: &str, content_type: &str, body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

/// Serve one connection on a loopback port, writing `chunks` with a pause
/// between each. The handle yields the request line and headers.
pub async fn serve_once(chunks: Vec<Vec<u8>>) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let head = read_request(&mut socket).await;
        for (i, chunk) in chunks.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            socket.write_all(chunk).await.unwrap();
            socket.flush().await.unwrap();
        }
        socket.shutdown().await.unwrap();
        head
    });

    (base_url, handle)
}

/// Read headers plus a `Content-Length` body; return the head as text.
async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0_u8; 4096];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before sending headers");
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < head_end + content_length {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    head
}

/// A loopback URL nothing listens on.
pub async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

// ── Log capture ─────────────────────────────────────────────────

/// Shared buffer a fmt subscriber writes into.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    /// Fmt subscriber writing into this buffer. Install it per test with
    /// `SubscriberInitExt::set_default`.
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + 'static {
        let writer = self.clone();
        tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || writer.clone())
            .finish()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).to_string()
    }
}

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
