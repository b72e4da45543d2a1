use std::sync::Arc;

use crate::config::AppConfig;
use crate::observability::AppMetrics;
use crate::security::rate_limit::RateLimiter;
use crate::services::llm::ChatCompletionStream;
use crate::services::prompt_builder::PromptBuilder;

/// Application state containing all shared services
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,
    /// System prompt builder (owns the content cache)
    pub prompt_builder: Arc<PromptBuilder>,
    /// Streaming chat-completion provider
    pub llm: Arc<dyn ChatCompletionStream>,
    /// Rate limiter for the chat route
    pub rate_limiter: Arc<RateLimiter>,
    /// Application metrics
    pub metrics: AppMetrics,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config.app_name)
            .field("prompt_builder", &"Arc<PromptBuilder>")
            .field("llm", &"Arc<dyn ChatCompletionStream>")
            .field("rate_limiter", &"Arc<RateLimiter>")
            .finish()
    }
}

impl AppState {
    /// Create new application state
    pub fn new(
        config: AppConfig,
        prompt_builder: PromptBuilder,
        llm: Box<dyn ChatCompletionStream>,
        rate_limiter: RateLimiter,
        metrics: AppMetrics,
    ) -> Self {
        Self {
            config: Arc::new(config),
            prompt_builder: Arc::new(prompt_builder),
            llm: Arc::from(llm),
            rate_limiter: Arc::new(rate_limiter),
            metrics,
        }
    }
}
