use anyhow::Context;
use faia_chat::api::{self, app_state::AppState};
use faia_chat::config::loader::ConfigLoader;
use faia_chat::observability::{AppMetrics, create_observability_router, init_logging};
use faia_chat::security::rate_limit::RateLimiter;
use faia_chat::services::content_cache::{ContentCache, NotionFetcher};
use faia_chat::services::llm::AnthropicMessagesClient;
use faia_chat::services::prompt_builder::{
    LangfusePromptSource, PromptBuilder, PromptTemplateSource,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigLoader::load().context("Failed to load configuration")?;
    init_logging(&config.logging);

    info!("Starting FAIA Chat ({})...", config.environment);

    ConfigLoader::validate(&config).context("Invalid configuration")?;

    let fetcher = NotionFetcher::new(&config.notion).context("Failed to create Notion client")?;
    let content_cache = Arc::new(ContentCache::new(
        Arc::new(fetcher),
        config.notion.page_ids.clone(),
        config.notion.cache_ttl_minutes,
    ));
    info!(
        "Content cache initialized ({} pages, TTL {} min)",
        config.notion.page_ids.len(),
        config.notion.cache_ttl_minutes
    );

    let template_source: Option<Arc<dyn PromptTemplateSource>> =
        if config.prompt.base_url.is_empty() {
            info!("No prompt template service configured, using built-in template");
            None
        } else {
            info!("Prompt template service: {}", config.prompt.base_url);
            Some(Arc::new(
                LangfusePromptSource::new(&config.prompt)
                    .context("Failed to create prompt template client")?,
            ))
        };

    let prompt_builder = PromptBuilder::new(template_source, content_cache, &config.prompt);
    info!("Prompt builder initialized");

    let llm = AnthropicMessagesClient::new(&config.llm).context("Failed to create LLM client")?;
    info!("LLM client initialized (model: {})", config.llm.model);

    let rate_limiter = RateLimiter::new(config.rate_limit.clone());
    info!(
        "Rate limiter initialized (enabled: {})",
        config.rate_limit.enabled
    );

    let metrics = AppMetrics::default();

    let addr = format!("{}:{}", config.server.host, config.server.port);

    let app_state = AppState::new(
        config,
        prompt_builder,
        Box::new(llm),
        rate_limiter,
        metrics.clone(),
    );
    info!("Application state created");

    let api_router = api::create_router(app_state);
    let router = create_observability_router(metrics).merge(api_router);
    info!("API router created with observability endpoints");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Server listening on {}", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
