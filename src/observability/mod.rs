//! 可观测性模块
//!
//! 提供 Prometheus 格式指标、结构化日志初始化和存活检查。

use axum::{Router, response::IntoResponse, routing::get};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

use crate::config::config::LoggingConfig;

// ===== Simple Metrics (using atomics for zero-dep implementation) =====

/// 简单应用指标
#[derive(Clone, Default)]
pub struct AppMetrics {
    pub chat_requests_total: Arc<AtomicU64>,
    pub chat_streams_completed: Arc<AtomicU64>,
    pub chat_streams_cancelled: Arc<AtomicU64>,
    pub content_filter_total: Arc<AtomicU64>,
    pub provider_errors_total: Arc<AtomicU64>,
    pub rate_limited_total: Arc<AtomicU64>,
    pub validation_errors_total: Arc<AtomicU64>,
}

impl AppMetrics {
    /// 记录一次对话请求
    pub fn record_chat_request(&self) {
        self.chat_requests_total.fetch_add(1, Ordering::SeqCst);
    }

    /// 记录一次正常完成的流
    pub fn record_stream_completed(&self) {
        self.chat_streams_completed.fetch_add(1, Ordering::SeqCst);
    }

    /// 记录一次客户端中断
    pub fn record_stream_cancelled(&self) {
        self.chat_streams_cancelled.fetch_add(1, Ordering::SeqCst);
    }

    /// 记录一次内容过滤替换
    pub fn record_content_filtered(&self) {
        self.content_filter_total.fetch_add(1, Ordering::SeqCst);
    }

    /// 记录一次上游错误
    pub fn record_provider_error(&self) {
        self.provider_errors_total.fetch_add(1, Ordering::SeqCst);
    }

    /// 记录一次限流拒绝
    pub fn record_rate_limited(&self) {
        self.rate_limited_total.fetch_add(1, Ordering::SeqCst);
    }

    /// 记录一次验证失败
    pub fn record_validation_error(&self) {
        self.validation_errors_total.fetch_add(1, Ordering::SeqCst);
    }

    /// 生成 Prometheus 格式指标
    pub fn gather(&self) -> String {
        format!(
            r#"# HELP chat_requests_total Total chat requests
# TYPE chat_requests_total counter
chat_requests_total {}
# HELP chat_streams_completed Chat streams completed normally
# TYPE chat_streams_completed counter
chat_streams_completed {}
# HELP chat_streams_cancelled Chat streams cancelled by the client
# TYPE chat_streams_cancelled counter
chat_streams_cancelled {}
# HELP content_filter_total Responses replaced by the content-filter apology
# TYPE content_filter_total counter
content_filter_total {}
# HELP provider_errors_total Upstream provider failures
# TYPE provider_errors_total counter
provider_errors_total {}
# HELP rate_limited_total Requests rejected by the rate limiter
# TYPE rate_limited_total counter
rate_limited_total {}
# HELP validation_errors_total Requests rejected by conversation validation
# TYPE validation_errors_total counter
validation_errors_total {}
"#,
            self.chat_requests_total.load(Ordering::SeqCst),
            self.chat_streams_completed.load(Ordering::SeqCst),
            self.chat_streams_cancelled.load(Ordering::SeqCst),
            self.content_filter_total.load(Ordering::SeqCst),
            self.provider_errors_total.load(Ordering::SeqCst),
            self.rate_limited_total.load(Ordering::SeqCst),
            self.validation_errors_total.load(Ordering::SeqCst),
        )
    }
}

// ===== Health Check =====

/// 存活检查，返回固定文本
async fn health_handler() -> &'static str {
    "OK"
}

/// 可观测性状态
#[derive(Clone)]
pub struct ObservabilityState {
    pub metrics: AppMetrics,
}

async fn metrics_handler(
    axum::extract::State(state): axum::extract::State<ObservabilityState>,
) -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.gather(),
    )
}

/// 创建可观测性路由（/health 与 /metrics）
pub fn create_observability_router(metrics: AppMetrics) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(ObservabilityState { metrics })
}

// ===== Logging =====

/// 按配置初始化日志
///
/// RUST_LOG 环境变量优先于配置中的级别。
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    if config.structured {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
