//! 知识内容缓存服务
//!
//! 从 Notion 块 API 拉取知识内容并缓存，刷新失败时回退到最近一次成功值。

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::config::config::NotionConfig;
use crate::error::{AppError, Result};

/// 页面内容之间的可见分隔符
const PAGE_SEPARATOR: &str = "\n\n---\n\n";

/// Notion API 版本
const NOTION_VERSION: &str = "2022-06-28";

/// 支持提取文本的块类型，其余类型静默跳过
const SUPPORTED_BLOCK_TYPES: &[&str] = &[
    "paragraph",
    "heading_1",
    "heading_2",
    "heading_3",
    "bulleted_list_item",
    "numbered_list_item",
];

/// 缓存读取结果
///
/// 区分新鲜值和过期回退值，使回退路径成为可测试的显式分支。
#[derive(Debug, Clone, PartialEq)]
pub enum ContentOutcome {
    /// 有效期内的值
    Fresh(String),
    /// 刷新失败后返回的最近一次成功值
    Stale(String),
}

impl ContentOutcome {
    /// 取出内容字符串
    pub fn into_value(self) -> String {
        match self {
            ContentOutcome::Fresh(value) | ContentOutcome::Stale(value) => value,
        }
    }
}

/// 单页内容拉取接口
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// 拉取并提取一个页面的纯文本内容
    async fn fetch_page(&self, page_id: &str) -> Result<String>;
}

/// Notion 块 API 客户端
pub struct NotionFetcher {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl NotionFetcher {
    pub fn new(config: &NotionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    async fn fetch_children(&self, page_id: &str, cursor: Option<&str>) -> Result<Value> {
        let mut url = format!(
            "{}/v1/blocks/{}/children?page_size=100",
            self.base_url, page_id
        );
        if let Some(cursor) = cursor {
            url.push_str(&format!("&start_cursor={}", cursor));
        }

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .header("Notion-Version", NOTION_VERSION)
            .send()
            .await
            .map_err(|e| AppError::ContentSource(format!("Notion request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::ContentSource(format!(
                "Notion returned {}: {}",
                status, error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::ContentSource(format!("Invalid Notion response: {}", e)))
    }
}

#[async_trait]
impl PageFetcher for NotionFetcher {
    async fn fetch_page(&self, page_id: &str) -> Result<String> {
        let mut lines: Vec<String> = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let body = self.fetch_children(page_id, cursor.as_deref()).await?;

            let results = body
                .get("results")
                .and_then(|r| r.as_array())
                .ok_or_else(|| {
                    AppError::ContentSource("Notion response missing results".to_string())
                })?;

            for block in results {
                if let Some(text) = extract_block_text(block) {
                    if !text.trim().is_empty() {
                        lines.push(text);
                    }
                }
            }

            let has_more = body.get("has_more").and_then(|v| v.as_bool()).unwrap_or(false);
            if !has_more {
                break;
            }
            cursor = body
                .get("next_cursor")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            if cursor.is_none() {
                break;
            }
        }

        Ok(lines.join("\n"))
    }
}

/// 从单个块中提取纯文本
///
/// 块内的富文本片段按顺序无分隔拼接；不支持的块类型返回 None。
pub fn extract_block_text(block: &Value) -> Option<String> {
    let block_type = block.get("type")?.as_str()?;

    if !SUPPORTED_BLOCK_TYPES.contains(&block_type) {
        return None;
    }

    let rich_text = block.get(block_type)?.get("rich_text")?.as_array()?;

    let mut parts = String::new();
    for segment in rich_text {
        if let Some(plain) = segment.get("plain_text").and_then(|t| t.as_str()) {
            parts.push_str(plain);
        }
    }

    Some(parts)
}

/// 缓存内部状态
#[derive(Debug, Default)]
struct CacheState {
    /// 当前值
    value: Option<String>,
    /// 有效期截止时间
    fresh_until: Option<DateTime<Utc>>,
    /// 最近一次成功值，刷新失败时回退
    last_known_good: Option<String>,
}

/// 知识内容缓存
///
/// 读路径无须争用刷新锁；刷新通过独立互斥锁保证全局至多一个并发刷新，
/// 获得锁后重新检查有效期，并发未命中合并为一次拉取。
pub struct ContentCache {
    fetcher: Arc<dyn PageFetcher>,
    page_ids: Vec<String>,
    ttl: Duration,
    state: RwLock<CacheState>,
    refresh_lock: Mutex<()>,
}

impl ContentCache {
    pub fn new(fetcher: Arc<dyn PageFetcher>, page_ids: Vec<String>, ttl_minutes: i64) -> Self {
        Self {
            fetcher,
            page_ids,
            ttl: Duration::minutes(ttl_minutes),
            state: RwLock::new(CacheState::default()),
            refresh_lock: Mutex::new(()),
        }
    }

    /// 获取知识内容
    ///
    /// 仅在从未成功拉取且本次刷新也失败时返回错误。
    pub async fn get(&self) -> Result<ContentOutcome> {
        {
            let state = self.state.read().await;
            if let (Some(value), Some(fresh_until)) = (&state.value, state.fresh_until) {
                if Utc::now() < fresh_until {
                    return Ok(ContentOutcome::Fresh(value.clone()));
                }
            }
        }

        let _guard = self.refresh_lock.lock().await;

        // 拿到锁后重新检查，前一个持锁者可能已完成刷新
        {
            let state = self.state.read().await;
            if let (Some(value), Some(fresh_until)) = (&state.value, state.fresh_until) {
                if Utc::now() < fresh_until {
                    return Ok(ContentOutcome::Fresh(value.clone()));
                }
            }
        }

        match self.refresh().await {
            Ok(value) => {
                let mut state = self.state.write().await;
                state.value = Some(value.clone());
                state.last_known_good = Some(value.clone());
                state.fresh_until = Some(Utc::now() + self.ttl);
                debug!("Content cache refreshed ({} chars)", value.len());
                Ok(ContentOutcome::Fresh(value))
            }
            Err(e) => {
                let state = self.state.read().await;
                if let Some(stale) = &state.last_known_good {
                    warn!("Content refresh failed, serving stale value: {}", e);
                    Ok(ContentOutcome::Stale(stale.clone()))
                } else {
                    Err(e)
                }
            }
        }
    }

    /// 按配置顺序拉取所有页面并拼接
    async fn refresh(&self) -> Result<String> {
        let mut page_contents: Vec<String> = Vec::new();

        for page_id in &self.page_ids {
            let content = self.fetcher.fetch_page(page_id).await?;
            if !content.trim().is_empty() {
                page_contents.push(content);
            }
        }

        Ok(page_contents.join(PAGE_SEPARATOR))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 可编程的测试用拉取器
    struct ScriptedFetcher {
        calls: AtomicUsize,
        fail_from_call: Option<usize>,
        content: String,
    }

    impl ScriptedFetcher {
        fn succeeding(content: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_from_call: None,
                content: content.to_string(),
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_from_call: Some(0),
                content: String::new(),
            }
        }

        fn failing_after(calls: usize, content: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_from_call: Some(calls),
                content: content.to_string(),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn fetch_page(&self, _page_id: &str) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(fail_from) = self.fail_from_call {
                if call >= fail_from {
                    return Err(AppError::ContentSource("fetch failed".into()));
                }
            }
            Ok(self.content.clone())
        }
    }

    #[tokio::test]
    async fn test_second_call_within_ttl_hits_cache() {
        let fetcher = Arc::new(ScriptedFetcher::succeeding("kunnskap"));
        let cache = ContentCache::new(fetcher.clone(), vec!["page-1".into()], 60);

        let first = cache.get().await.unwrap();
        let second = cache.get().await.unwrap();

        assert_eq!(first, ContentOutcome::Fresh("kunnskap".into()));
        assert_eq!(first, second);
        assert_eq!(fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_value_served_when_refresh_fails() {
        let fetcher = Arc::new(ScriptedFetcher::failing_after(1, "kunnskap"));
        // TTL 为 0 分钟使第二次调用立即过期
        let cache = ContentCache::new(fetcher.clone(), vec!["page-1".into()], 0);

        let first = cache.get().await.unwrap();
        assert_eq!(first, ContentOutcome::Fresh("kunnskap".into()));

        let second = cache.get().await.unwrap();
        assert_eq!(second, ContentOutcome::Stale("kunnskap".into()));
        assert_eq!(fetcher.call_count(), 2);
    }

    #[tokio::test]
    async fn test_error_when_no_prior_value_and_fetch_fails() {
        let fetcher = Arc::new(ScriptedFetcher::failing());
        let cache = ContentCache::new(fetcher, vec!["page-1".into()], 60);

        assert!(cache.get().await.is_err());
    }

    #[tokio::test]
    async fn test_pages_joined_in_configured_order() {
        let fetcher = Arc::new(ScriptedFetcher::succeeding("side"));
        let cache = ContentCache::new(
            fetcher,
            vec!["page-1".into(), "page-2".into()],
            60,
        );

        let value = cache.get().await.unwrap().into_value();
        assert_eq!(value, format!("side{}side", PAGE_SEPARATOR));
    }

    #[tokio::test]
    async fn test_concurrent_misses_collapse_into_one_fetch() {
        let fetcher = Arc::new(ScriptedFetcher::succeeding("kunnskap"));
        let cache = Arc::new(ContentCache::new(
            fetcher.clone(),
            vec!["page-1".into()],
            60,
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.get().await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(fetcher.call_count(), 1);
    }

    #[test]
    fn test_extract_paragraph_text() {
        let block = json!({
            "type": "paragraph",
            "paragraph": {
                "rich_text": [
                    {"plain_text": "FAIA "},
                    {"plain_text": "Accelerator"}
                ]
            }
        });

        assert_eq!(
            extract_block_text(&block),
            Some("FAIA Accelerator".to_string())
        );
    }

    #[test]
    fn test_extract_heading_and_list_items() {
        for block_type in ["heading_1", "heading_2", "heading_3", "bulleted_list_item", "numbered_list_item"] {
            let block = json!({
                "type": block_type,
                block_type: {
                    "rich_text": [{"plain_text": "tekst"}]
                }
            });
            assert_eq!(extract_block_text(&block), Some("tekst".to_string()));
        }
    }

    #[test]
    fn test_unsupported_block_skipped() {
        let block = json!({
            "type": "image",
            "image": {"url": "https://example.com/a.png"}
        });
        assert_eq!(extract_block_text(&block), None);
    }

    #[test]
    fn test_block_without_rich_text_skipped() {
        let block = json!({
            "type": "paragraph",
            "paragraph": {}
        });
        assert_eq!(extract_block_text(&block), None);
    }
}
