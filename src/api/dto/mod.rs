//! DTO 模块
//!
//! 定义 API 的请求和响应数据结构。

pub mod chat_dto;
