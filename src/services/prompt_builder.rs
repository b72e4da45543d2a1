//! 系统提示词构建服务
//!
//! 将远程管理的提示词模板与知识内容合成系统提示词；
//! 任一环节失败时回退到内置模板，构建过程永不失败。

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::config::PromptConfig;
use crate::error::{AppError, Result};
use crate::services::content_cache::ContentCache;

/// 模板中替换为知识内容的占位符
pub const KNOWLEDGE_PLACEHOLDER: &str = "{{knowledge}}";

/// 对话收尾时输出的预约链接
pub const BOOKING_LINK: &str = "https://faia.no/kontakt";

/// 内置提示词模板，远程模板不可用时使用
const FALLBACK_TEMPLATE: &str = r#"Du er FAIA-assistenten, en profesjonell og saklig rådgiver for Forte AI Accelerator.

Instruksjoner:
- Svar kun basert på innholdet nedenfor. Ikke spekuler eller finn på informasjon.
- Svar på norsk.
- Vær kort og konsis: maks 2-3 setninger per svar. Ingen punktlister eller markdown.
- Avslutt hvert svar med ett oppklarende spørsmål, bortsett fra det avsluttende svaret.
- Ikke be om personlige kontaktopplysninger.
- Ikke påstå at du kan utføre handlinger utenfor chatten, som å booke møter eller sende e-post.
- Når du forstår hva brukeren trenger, avslutt samtalen ved å henvise til https://faia.no/kontakt

Her er informasjonen du har tilgjengelig:

{{knowledge}}"#;

/// 提示词模板
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    /// 模板正文，含知识占位符
    pub content: String,
}

/// 远程提示词模板源
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PromptTemplateSource: Send + Sync {
    /// 按名称和发布标签获取模板
    async fn fetch(&self, name: &str, label: &str) -> Result<PromptTemplate>;
}

/// Langfuse 提示词管理服务客户端
pub struct LangfusePromptSource {
    client: reqwest::Client,
    base_url: String,
    public_key: String,
    secret_key: String,
}

impl LangfusePromptSource {
    pub fn new(config: &PromptConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            public_key: config.public_key.clone(),
            secret_key: config.secret_key.clone(),
        })
    }
}

#[async_trait]
impl PromptTemplateSource for LangfusePromptSource {
    async fn fetch(&self, name: &str, label: &str) -> Result<PromptTemplate> {
        let url = format!("{}/api/public/v2/prompts/{}", self.base_url, name);

        let response = self
            .client
            .get(url)
            .query(&[("label", label)])
            .basic_auth(&self.public_key, Some(&self.secret_key))
            .send()
            .await
            .map_err(|e| AppError::PromptTemplate(format!("Template request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::PromptTemplate(format!(
                "Template service returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::PromptTemplate(format!("Invalid template response: {}", e)))?;

        let content = body
            .get("prompt")
            .and_then(|p| p.as_str())
            .ok_or_else(|| {
                AppError::PromptTemplate("Template response missing prompt field".to_string())
            })?;

        Ok(PromptTemplate {
            content: content.to_string(),
        })
    }
}

/// 编译后的提示词缓存槽
#[derive(Debug, Clone)]
struct CompiledPrompt {
    text: String,
    fresh_until: DateTime<Utc>,
}

/// 系统提示词构建器
pub struct PromptBuilder {
    template_source: Option<Arc<dyn PromptTemplateSource>>,
    content_cache: Arc<ContentCache>,
    template_name: String,
    template_label: String,
    cache_ttl: Duration,
    compiled: Mutex<Option<CompiledPrompt>>,
}

impl PromptBuilder {
    pub fn new(
        template_source: Option<Arc<dyn PromptTemplateSource>>,
        content_cache: Arc<ContentCache>,
        config: &PromptConfig,
    ) -> Self {
        Self {
            template_source,
            content_cache,
            template_name: config.template_name.clone(),
            template_label: config.template_label.clone(),
            cache_ttl: Duration::minutes(config.cache_ttl_minutes),
            compiled: Mutex::new(None),
        }
    }

    /// 构建系统提示词
    ///
    /// 编译结果在短暂有效期内复用；远程模板或知识内容不可用时
    /// 回退到内置模板，因此总能返回一个可用的提示词。
    pub async fn build(&self) -> String {
        {
            let compiled = self.compiled.lock();
            if let Some(cached) = compiled.as_ref() {
                if Utc::now() < cached.fresh_until {
                    return cached.text.clone();
                }
            }
        }

        let knowledge = match self.content_cache.get().await {
            Ok(outcome) => outcome.into_value(),
            Err(e) => {
                warn!("Knowledge content unavailable: {}", e);
                String::new()
            }
        };

        let template = match &self.template_source {
            Some(source) => match source
                .fetch(&self.template_name, &self.template_label)
                .await
            {
                Ok(template) => {
                    debug!(
                        "Using remote prompt template '{}' ({})",
                        self.template_name, self.template_label
                    );
                    template.content
                }
                Err(e) => {
                    warn!("Remote prompt template unavailable, using fallback: {}", e);
                    FALLBACK_TEMPLATE.to_string()
                }
            },
            None => FALLBACK_TEMPLATE.to_string(),
        };

        let text = compile(&template, &knowledge);

        let mut compiled = self.compiled.lock();
        *compiled = Some(CompiledPrompt {
            text: text.clone(),
            fresh_until: Utc::now() + self.cache_ttl,
        });

        text
    }
}

/// 将知识内容代入模板
///
/// 模板缺少占位符时将知识内容追加到末尾，保证内容不丢失。
fn compile(template: &str, knowledge: &str) -> String {
    if template.contains(KNOWLEDGE_PLACEHOLDER) {
        template.replace(KNOWLEDGE_PLACEHOLDER, knowledge)
    } else if knowledge.is_empty() {
        template.to_string()
    } else {
        format!("{}\n\n{}", template, knowledge)
    }
}
