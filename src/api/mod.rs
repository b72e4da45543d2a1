//! API 模块
//!
//! 提供 REST API 支持。

pub mod app_state;
pub mod dto;
pub mod handlers;
pub mod routes;
pub mod sse;

use crate::api::app_state::AppState;
use crate::config::config::ServerConfig;
use crate::security::rate_limit::rate_limit_middleware;
use axum::Router;
use axum::http::{HeaderValue, Method};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

pub fn create_router(app_state: AppState) -> Router {
    // 限流仅作用于对话路由
    let chat = routes::chat_routes::create_chat_router().layer(
        axum::middleware::from_fn_with_state(app_state.clone(), rate_limit_middleware),
    );

    Router::new()
        .nest("/api", chat)
        .layer(cors_layer(&app_state.config.server))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// 按配置构建 CORS 层
fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}
