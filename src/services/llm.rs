//! LLM 流式对话服务
//!
//! Anthropic Messages API 客户端，以增量文本流形式返回补全结果。
//! 内容过滤拒绝与其他上游错误严格区分，由中继端点分别处理。

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{Value, json};
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::config::config::LlmConfig;
use crate::error::Result;
use crate::models::conversation::ChatTurn;

/// Anthropic API 版本头
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// LLM 流式调用错误
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// 内容被上游策略过滤，中继端点以固定致歉语替代
    #[error("Content filtered by provider")]
    ContentFiltered,

    /// 上游 API 错误
    #[error("Provider API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// 网络层错误
    #[error("Provider network error: {0}")]
    Network(String),

    /// 响应流格式错误
    #[error("Provider protocol error: {0}")]
    Protocol(String),
}

/// 增量文本流
pub type TokenStream = Pin<Box<dyn futures_util::Stream<Item = std::result::Result<String, LlmError>> + Send>>;

/// 流式对话补全接口
#[async_trait]
pub trait ChatCompletionStream: Send + Sync {
    /// 发起流式补全，返回增量文本流
    async fn stream_chat(
        &self,
        system: &str,
        turns: &[ChatTurn],
    ) -> std::result::Result<TokenStream, LlmError>;
}

/// Anthropic Messages API 客户端
pub struct AnthropicMessagesClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
}

impl AnthropicMessagesClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        // 不限制整体超时：token 流在上游完成或客户端断开时结束
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
        })
    }
}

#[async_trait]
impl ChatCompletionStream for AnthropicMessagesClient {
    async fn stream_chat(
        &self,
        system: &str,
        turns: &[ChatTurn],
    ) -> std::result::Result<TokenStream, LlmError> {
        let messages: Vec<Value> = turns
            .iter()
            .map(|turn| {
                json!({
                    "role": turn.role.as_str(),
                    "content": turn.content,
                })
            })
            .collect();

        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "top_p": self.top_p,
            "stream": true,
            "system": system,
            "messages": messages,
        });

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(map_error_body(status.as_u16(), &error_body));
        }

        debug!("Provider stream opened (model: {})", self.model);

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(relay_provider_stream(response, tx));

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// 将上游 SSE 字节流解码为增量文本，写入通道
///
/// 接收端关闭（客户端断开）时立即返回，连同丢弃的 response 一起
/// 中止上游请求。
async fn relay_provider_stream(
    response: reqwest::Response,
    tx: mpsc::Sender<std::result::Result<String, LlmError>>,
) {
    let mut byte_stream = response.bytes_stream();
    let mut parser = SseEventParser::default();

    while let Some(chunk) = byte_stream.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tx.send(Err(LlmError::Network(e.to_string()))).await;
                return;
            }
        };

        for event in parser.push(&bytes) {
            match interpret_event(&event) {
                StreamAction::Text(text) => {
                    if tx.send(Ok(text)).await.is_err() {
                        return;
                    }
                }
                StreamAction::Stop => return,
                StreamAction::Fail(error) => {
                    let _ = tx.send(Err(error)).await;
                    return;
                }
                StreamAction::Ignore => {}
            }
        }
    }
}

/// 一条上游 SSE 事件
#[derive(Debug, Clone, PartialEq)]
struct SseEvent {
    event: String,
    data: String,
}

/// 上游 SSE 事件解析器
///
/// 字节块可能在任意位置截断（包括多字节字符中间），
/// 因此以字节缓冲累积，按空行切分事件后再解码。
#[derive(Default)]
struct SseEventParser {
    buffer: Vec<u8>,
}

impl SseEventParser {
    fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(boundary) = find_event_boundary(&self.buffer) {
            let raw: Vec<u8> = self.buffer.drain(..boundary + 2).collect();
            if let Ok(text) = std::str::from_utf8(&raw) {
                if let Some(event) = parse_event(text) {
                    events.push(event);
                }
            }
        }
        events
    }
}

fn find_event_boundary(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|pair| pair == b"\n\n")
}

fn parse_event(raw: &str) -> Option<SseEvent> {
    let mut event = String::new();
    let mut data_lines: Vec<&str> = Vec::new();

    for line in raw.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            event = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.trim_start_matches(' '));
        }
    }

    if event.is_empty() && data_lines.is_empty() {
        return None;
    }

    Some(SseEvent {
        event,
        data: data_lines.join("\n"),
    })
}

/// 事件解释结果
#[derive(Debug)]
enum StreamAction {
    /// 转发增量文本
    Text(String),
    /// 流正常结束
    Stop,
    /// 流以错误结束
    Fail(LlmError),
    /// 忽略（ping、块开始/结束等）
    Ignore,
}

fn interpret_event(event: &SseEvent) -> StreamAction {
    match event.event.as_str() {
        "content_block_delta" => {
            let json: Value = match serde_json::from_str(&event.data) {
                Ok(json) => json,
                Err(e) => return StreamAction::Fail(LlmError::Protocol(e.to_string())),
            };
            let delta = json.get("delta");
            let delta_type = delta
                .and_then(|d| d.get("type"))
                .and_then(|t| t.as_str());
            if delta_type == Some("text_delta") {
                if let Some(text) = delta
                    .and_then(|d| d.get("text"))
                    .and_then(|t| t.as_str())
                {
                    return StreamAction::Text(text.to_string());
                }
            }
            StreamAction::Ignore
        }
        "message_delta" => {
            let stop_reason = serde_json::from_str::<Value>(&event.data)
                .ok()
                .and_then(|json| {
                    json.get("delta")
                        .and_then(|d| d.get("stop_reason"))
                        .and_then(|s| s.as_str())
                        .map(|s| s.to_string())
                });
            if stop_reason.as_deref() == Some("refusal") {
                StreamAction::Fail(LlmError::ContentFiltered)
            } else {
                StreamAction::Ignore
            }
        }
        "message_stop" => StreamAction::Stop,
        "error" => {
            let json: Value = serde_json::from_str(&event.data).unwrap_or(Value::Null);
            let error_type = json
                .get("error")
                .and_then(|e| e.get("type"))
                .and_then(|t| t.as_str())
                .unwrap_or("unknown");
            let message = json
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("unknown provider error");

            if is_content_filter(error_type, message) {
                StreamAction::Fail(LlmError::ContentFiltered)
            } else {
                StreamAction::Fail(LlmError::Api {
                    status: 0,
                    message: format!("{}: {}", error_type, message),
                })
            }
        }
        _ => StreamAction::Ignore,
    }
}

/// 将非 2xx 响应体映射为错误
fn map_error_body(status: u16, body: &str) -> LlmError {
    let json: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let error_type = json
        .get("error")
        .and_then(|e| e.get("type"))
        .and_then(|t| t.as_str())
        .unwrap_or("unknown");
    let message = json
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .unwrap_or(body);

    if is_content_filter(error_type, message) {
        LlmError::ContentFiltered
    } else {
        LlmError::Api {
            status,
            message: format!("{}: {}", error_type, message),
        }
    }
}

/// 判断错误是否为内容策略过滤
fn is_content_filter(error_type: &str, message: &str) -> bool {
    error_type.contains("content_filter")
        || message.to_lowercase().contains("content filtering")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta_event(text: &str) -> SseEvent {
        SseEvent {
            event: "content_block_delta".into(),
            data: json!({
                "type": "content_block_delta",
                "index": 0,
                "delta": {"type": "text_delta", "text": text}
            })
            .to_string(),
        }
    }

    #[test]
    fn test_parser_splits_complete_events() {
        let mut parser = SseEventParser::default();
        let raw = "event: message_start\ndata: {}\n\nevent: message_stop\ndata: {}\n\n";

        let events = parser.push(raw.as_bytes());
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "message_start");
        assert_eq!(events[1].event, "message_stop");
    }

    #[test]
    fn test_parser_buffers_partial_events() {
        let mut parser = SseEventParser::default();

        let first = parser.push(b"event: content_block_delta\ndata: {\"delta\":");
        assert!(first.is_empty());

        let second = parser.push(b"{\"type\":\"text_delta\",\"text\":\"Hei\"}}\n\n");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].event, "content_block_delta");
    }

    #[test]
    fn test_parser_survives_chunk_split_inside_multibyte_char() {
        let mut parser = SseEventParser::default();
        let raw = "event: content_block_delta\ndata: {\"delta\":{\"type\":\"text_delta\",\"text\":\"på\"}}\n\n";
        let bytes = raw.as_bytes();

        // 在 å 的两个字节之间切分
        let split = raw.find("på").unwrap() + 2;
        let first = parser.push(&bytes[..split]);
        assert!(first.is_empty());
        let second = parser.push(&bytes[split..]);
        assert_eq!(second.len(), 1);
        assert!(second[0].data.contains("på"));
    }

    #[test]
    fn test_text_delta_interpreted_as_text() {
        match interpret_event(&delta_event("Hei der")) {
            StreamAction::Text(text) => assert_eq!(text, "Hei der"),
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn test_message_stop_ends_stream() {
        let event = SseEvent {
            event: "message_stop".into(),
            data: "{}".into(),
        };
        assert!(matches!(interpret_event(&event), StreamAction::Stop));
    }

    #[test]
    fn test_refusal_stop_reason_maps_to_content_filtered() {
        let event = SseEvent {
            event: "message_delta".into(),
            data: json!({"delta": {"stop_reason": "refusal"}}).to_string(),
        };
        assert!(matches!(
            interpret_event(&event),
            StreamAction::Fail(LlmError::ContentFiltered)
        ));
    }

    #[test]
    fn test_ping_ignored() {
        let event = SseEvent {
            event: "ping".into(),
            data: "{}".into(),
        };
        assert!(matches!(interpret_event(&event), StreamAction::Ignore));
    }

    #[test]
    fn test_error_event_distinguishes_content_filter() {
        let filtered = SseEvent {
            event: "error".into(),
            data: json!({"error": {"type": "content_filter_error", "message": "blocked"}})
                .to_string(),
        };
        assert!(matches!(
            interpret_event(&filtered),
            StreamAction::Fail(LlmError::ContentFiltered)
        ));

        let overloaded = SseEvent {
            event: "error".into(),
            data: json!({"error": {"type": "overloaded_error", "message": "busy"}}).to_string(),
        };
        assert!(matches!(
            interpret_event(&overloaded),
            StreamAction::Fail(LlmError::Api { .. })
        ));
    }

    #[test]
    fn test_error_body_mapping() {
        let body = json!({"error": {"type": "authentication_error", "message": "bad key"}})
            .to_string();
        match map_error_body(401, &body) {
            LlmError::Api { status, message } => {
                assert_eq!(status, 401);
                assert!(message.contains("bad key"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_chat_collects_deltas() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let sse_body = concat!(
            "event: message_start\ndata: {\"type\":\"message_start\"}\n\n",
            "event: content_block_delta\ndata: {\"delta\":{\"type\":\"text_delta\",\"text\":\"Hei\"}}\n\n",
            "event: content_block_delta\ndata: {\"delta\":{\"type\":\"text_delta\",\"text\":\" der\"}}\n\n",
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        );

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_raw(sse_body, "text/event-stream"),
            )
            .mount(&server)
            .await;

        let config = LlmConfig {
            base_url: server.uri(),
            api_key: "test-key".into(),
            ..LlmConfig::default()
        };
        let client = AnthropicMessagesClient::new(&config).unwrap();

        let turns = vec![ChatTurn {
            role: crate::models::conversation::TurnRole::User,
            content: "Hei".into(),
        }];
        let mut stream = client.stream_chat("system", &turns).await.unwrap();

        let mut collected = String::new();
        while let Some(item) = stream.next().await {
            collected.push_str(&item.unwrap());
        }
        assert_eq!(collected, "Hei der");
    }

    #[tokio::test]
    async fn test_stream_chat_maps_content_filter_rejection() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let error_body = json!({
            "type": "error",
            "error": {
                "type": "invalid_request_error",
                "message": "Output blocked by content filtering policy"
            }
        });

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(400).set_body_json(error_body))
            .mount(&server)
            .await;

        let config = LlmConfig {
            base_url: server.uri(),
            api_key: "test-key".into(),
            ..LlmConfig::default()
        };
        let client = AnthropicMessagesClient::new(&config).unwrap();

        let turns = vec![ChatTurn {
            role: crate::models::conversation::TurnRole::User,
            content: "Hei".into(),
        }];
        let result = client.stream_chat("system", &turns).await;
        assert!(matches!(result, Err(LlmError::ContentFiltered)));
    }
}
