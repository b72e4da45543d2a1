//! FAIA Chat - 营销站点流式对话后端
//!
//! 将对话请求代理到托管的大语言模型服务，以 Server-Sent Events 流式返回，
//! 按客户端 IP 做固定窗口限流，并基于缓存的知识内容组装系统提示词。

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod observability;
pub mod security;
pub mod services;
