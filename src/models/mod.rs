//! 核心数据模型模块
//!
//! 定义对话轮次模型和对话验证策略。

pub mod conversation;

pub use conversation::*;
