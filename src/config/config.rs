use serde::{Deserialize, Serialize};

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 服务地址
    pub host: String,
    /// 服务端口
    pub port: u16,
    /// 允许的跨域来源
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5000,
            allowed_origins: vec!["http://localhost:5173".into()],
        }
    }
}

/// LLM 服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API 基础地址
    pub base_url: String,
    /// API 密钥
    pub api_key: String,
    /// 模型标识
    pub model: String,
    /// 最大输出 token 数
    pub max_tokens: u32,
    /// 采样温度
    pub temperature: f32,
    /// 核采样阈值
    pub top_p: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".into(),
            api_key: String::new(),
            model: "claude-sonnet-4-20250514".into(),
            max_tokens: 1024,
            temperature: 0.7,
            top_p: 0.9,
        }
    }
}

/// 知识内容源配置（Notion）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotionConfig {
    /// API 基础地址
    pub base_url: String,
    /// API 密钥
    pub api_key: String,
    /// 页面 ID 列表，按配置顺序拼接
    pub page_ids: Vec<String>,
    /// 缓存有效期（分钟）
    pub cache_ttl_minutes: i64,
    /// 请求超时（秒）
    pub request_timeout: u64,
}

impl Default for NotionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.notion.com".into(),
            api_key: String::new(),
            page_ids: Vec::new(),
            cache_ttl_minutes: 60,
            request_timeout: 10,
        }
    }
}

/// 提示词模板服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// 模板服务基础地址，为空则直接使用内置模板
    pub base_url: String,
    /// 公钥
    pub public_key: String,
    /// 私钥
    pub secret_key: String,
    /// 模板名称
    pub template_name: String,
    /// 模板发布标签
    pub template_label: String,
    /// 编译结果缓存有效期（分钟）
    pub cache_ttl_minutes: i64,
    /// 请求超时（秒）
    pub request_timeout: u64,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            public_key: String::new(),
            secret_key: String::new(),
            template_name: "faia-chat-system".into(),
            template_label: "production".into(),
            cache_ttl_minutes: 5,
            request_timeout: 10,
        }
    }
}

/// 限流配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// 是否启用
    pub enabled: bool,
    /// 每分钟请求上限
    pub requests_per_minute: u32,
    /// 每小时请求上限
    pub requests_per_hour: u32,
    /// 每天请求上限
    pub requests_per_day: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 20,
            requests_per_hour: 200,
            requests_per_day: 1000,
        }
    }
}

impl RateLimitConfig {
    /// 开发环境限流配置
    pub fn development() -> Self {
        Self {
            enabled: false,
            requests_per_minute: 100,
            requests_per_hour: 5000,
            requests_per_day: 50000,
        }
    }

    /// 生产环境限流配置
    pub fn production() -> Self {
        Self::default()
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: String,
    /// 结构化日志格式
    pub structured: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            structured: false,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// 服务器配置
    pub server: ServerConfig,
    /// LLM 服务配置
    pub llm: LlmConfig,
    /// 知识内容源配置
    pub notion: NotionConfig,
    /// 提示词模板服务配置
    pub prompt: PromptConfig,
    /// 限流配置
    pub rate_limit: RateLimitConfig,
    /// 日志配置
    pub logging: LoggingConfig,
    /// 应用名称
    pub app_name: String,
    /// 环境
    pub environment: String,
}

impl AppConfig {
    /// 创建开发环境配置
    pub fn development() -> Self {
        Self {
            server: ServerConfig::default(),
            llm: LlmConfig::default(),
            notion: NotionConfig::default(),
            prompt: PromptConfig::default(),
            rate_limit: RateLimitConfig::development(),
            logging: LoggingConfig {
                level: "debug".into(),
                structured: false,
            },
            app_name: "faia-chat".into(),
            environment: "development".into(),
        }
    }

    /// 创建生产环境配置
    pub fn production() -> Self {
        let mut config = Self::development();
        config.environment = "production".into();
        config.logging.level = "info".into();
        config.logging.structured = true;
        config.rate_limit = RateLimitConfig::production();
        config
    }
}
