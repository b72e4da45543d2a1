//! 对话 DTO
//!
//! 定义对话接口的请求数据结构。

use serde::{Deserialize, Serialize};

/// 对话请求
///
/// messages 为 null 或缺失时按空列表处理，由对话验证统一拒绝。
#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ChatRequest {
    /// 按时间顺序排列的消息列表
    pub messages: Option<Vec<ChatMessage>>,
}

/// 单条消息
///
/// role 为传输层兼容字段；服务端按位置推断角色，不信任该值。
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChatMessage {
    /// 声明的角色
    pub role: String,
    /// 消息内容
    pub content: String,
}

impl Default for ChatMessage {
    fn default() -> Self {
        Self {
            role: String::new(),
            content: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_request() {
        let json = r#"{"messages":[{"role":"user","content":"Hei"}]}"#;
        let request: ChatRequest = serde_json::from_str(json).unwrap();
        let messages = request.messages.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "Hei");
    }

    #[test]
    fn test_missing_fields_default() {
        let request: ChatRequest = serde_json::from_str("{}").unwrap();
        assert!(request.messages.is_none());

        let message: ChatMessage = serde_json::from_str(r#"{"content":"Hei"}"#).unwrap();
        assert_eq!(message.role, "");
    }

    #[test]
    fn test_null_messages_tolerated() {
        let request: ChatRequest = serde_json::from_str(r#"{"messages":null}"#).unwrap();
        assert!(request.messages.is_none());
    }
}
