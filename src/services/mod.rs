//! 服务模块

pub mod content_cache;
pub mod llm;
pub mod prompt_builder;

pub use content_cache::{ContentCache, ContentOutcome, NotionFetcher, PageFetcher};
pub use llm::{AnthropicMessagesClient, ChatCompletionStream, LlmError, TokenStream};
pub use prompt_builder::{LangfusePromptSource, PromptBuilder, PromptTemplateSource};
