use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 对话轮数上限
pub const MAX_TURNS: usize = 40;

/// 单条消息内容长度上限（字符数）
pub const MAX_CONTENT_CHARS: usize = 2000;

/// 消息角色
///
/// 角色按消息在序列中的位置推断：偶数下标为用户，奇数下标为助手。
/// 客户端声明的 role 字段仅保留在传输层，服务端不信任。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TurnRole {
    /// 用户消息
    User,
    /// 助手消息
    Assistant,
}

impl TurnRole {
    /// 位置推断角色
    pub fn from_index(index: usize) -> Self {
        if index % 2 == 0 {
            TurnRole::User
        } else {
            TurnRole::Assistant
        }
    }

    /// 上游 API 使用的角色名
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

/// 对话轮次
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatTurn {
    /// 角色
    pub role: TurnRole,
    /// 内容
    pub content: String,
}

/// 对话验证错误
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConversationError {
    #[error("Messages required")]
    Empty,

    #[error("Message limit exceeded (max: {max}, got: {got})")]
    TooManyTurns { max: usize, got: usize },

    #[error("Last message must be from the user")]
    LastTurnNotUser,

    #[error("Message {index} is too long (max: {max} characters, got: {got})")]
    ContentTooLong {
        index: usize,
        max: usize,
        got: usize,
    },
}

/// 验证对话并按位置分配角色
///
/// 验证规则（任一失败即拒绝，不会调用上游）：
/// - 消息列表非空；
/// - 轮数不超过 [`MAX_TURNS`]；
/// - 轮数为奇数，即最后一条来自用户；
/// - 每条消息内容不超过 [`MAX_CONTENT_CHARS`] 个字符。
pub fn validate_conversation(contents: &[&str]) -> Result<Vec<ChatTurn>, ConversationError> {
    if contents.is_empty() {
        return Err(ConversationError::Empty);
    }

    if contents.len() > MAX_TURNS {
        return Err(ConversationError::TooManyTurns {
            max: MAX_TURNS,
            got: contents.len(),
        });
    }

    // 偶数条意味着最后一条会被推断为助手消息
    if contents.len() % 2 == 0 {
        return Err(ConversationError::LastTurnNotUser);
    }

    for (index, content) in contents.iter().enumerate() {
        let length = content.chars().count();
        if length > MAX_CONTENT_CHARS {
            return Err(ConversationError::ContentTooLong {
                index,
                max: MAX_CONTENT_CHARS,
                got: length,
            });
        }
    }

    Ok(contents
        .iter()
        .enumerate()
        .map(|(index, content)| ChatTurn {
            role: TurnRole::from_index(index),
            content: content.to_string(),
        })
        .collect())
}
