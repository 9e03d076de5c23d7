use crate::core::config::Config;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use log::debug;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Raw body of a streaming response.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

// --- Requests ---

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TitleRequest {
    pub genre: String,
    pub theme: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OutlineRequest {
    pub genre: String,
    pub theme: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChapterRequest {
    pub title: String,
    pub outline: String,
    pub chapter_number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_title: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SaveChapterRequest {
    pub title: String,
    pub content: String,
    pub chapter_number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_title: Option<String>,
    pub genre: String,
    pub theme: String,
    pub outline: String,
}

#[derive(Debug, Clone, Serialize)]
struct PositionRequest {
    new_position: u32,
}

// --- Responses ---

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct SavedChapterSummary {
    pub chapter_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub novel_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    pub chapter_number: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub word_count: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub created_at: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub novel_title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub genre: String,
    #[serde(default)]
    pub theme: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct SavedChapter {
    pub chapter_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub novel_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    pub chapter_number: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub word_count: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub created_at: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub updated_at: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub novel_title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub genre: String,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub outline: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveReceipt {
    pub chapter_id: Option<String>,
    pub novel_id: Option<String>,
}

#[derive(Deserialize)]
struct TitleResponse {
    title: Option<String>,
}

#[derive(Deserialize)]
struct SaveChapterResponse {
    success: bool,
    message: Option<String>,
    chapter_id: Option<String>,
    novel_id: Option<String>,
}

#[derive(Deserialize)]
struct SavedChaptersResponse {
    success: bool,
    message: Option<String>,
    #[serde(default)]
    chapters: Option<Vec<SavedChapterSummary>>,
}

#[derive(Deserialize)]
struct ChapterResponse {
    success: bool,
    message: Option<String>,
    chapter: Option<SavedChapter>,
}

#[derive(Deserialize)]
struct StatusResponse {
    success: bool,
    message: Option<String>,
}

/// Treats an explicit `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn envelope_error(message: Option<String>, default: &str) -> anyhow::Error {
    anyhow!(message.filter(|m| !m.is_empty()).unwrap_or_else(|| default.to_string()))
}

/// The novel backend: generation endpoints plus the saved-chapter store.
#[async_trait]
pub trait NovelBackend: Send + Sync {
    async fn generate_title(&self, request: &TitleRequest) -> Result<String>;
    async fn stream_outline(&self, request: &OutlineRequest) -> Result<ByteStream>;
    async fn stream_chapter(&self, request: &ChapterRequest) -> Result<ByteStream>;
    async fn save_chapter(&self, request: &SaveChapterRequest) -> Result<SaveReceipt>;
    async fn saved_chapters(&self) -> Result<Vec<SavedChapterSummary>>;
    async fn chapter(&self, chapter_id: &str) -> Result<SavedChapter>;
    async fn update_chapter_position(&self, chapter_id: &str, new_position: u32) -> Result<()>;
}

// --- HTTP ---

#[derive(Debug)]
pub struct HttpBackend {
    base_url: Url,
    timeout: Duration,
    client: Client,
}

impl HttpBackend {
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = Url::parse(&config.api_base_url)
            .with_context(|| format!("Invalid api_base_url: {}", config.api_base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("api_base_url cannot be used as a base: {}", config.api_base_url);
        }
        Ok(Self {
            base_url,
            timeout: Duration::from_secs(config.request_timeout_seconds),
            client: Client::new(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Base URL cannot have path segments"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn check(resp: Response) -> Result<Response> {
        let status = resp.status();
        if !status.is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("HTTP error! status: {} {}", status.as_u16(), error_text.trim()));
        }
        Ok(resp)
    }

    async fn post_json<B: Serialize + Sync, R: DeserializeOwned>(&self, path: &[&str], body: &B) -> Result<R> {
        let url = self.endpoint(path)?;
        debug!("POST {}", url);
        let resp = self.client.post(url).timeout(self.timeout).json(body).send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn get_json<R: DeserializeOwned>(&self, path: &[&str]) -> Result<R> {
        let url = self.endpoint(path)?;
        debug!("GET {}", url);
        let resp = self.client.get(url).timeout(self.timeout).send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn open_stream<B: Serialize + Sync>(&self, path: &[&str], body: &B) -> Result<ByteStream> {
        let url = self.endpoint(path)?;
        debug!("POST {} (stream)", url);
        let resp = self.client.post(url).json(body).send().await?;
        let resp = Self::check(resp).await?;
        Ok(resp
            .bytes_stream()
            .map(|chunk| chunk.context("Stream error"))
            .boxed())
    }
}

#[async_trait]
impl NovelBackend for HttpBackend {
    async fn generate_title(&self, request: &TitleRequest) -> Result<String> {
        let resp: TitleResponse = self.post_json(&["generate-title"], request).await?;
        resp.title
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| anyhow!("响应数据格式错误"))
    }

    async fn stream_outline(&self, request: &OutlineRequest) -> Result<ByteStream> {
        self.open_stream(&["generate-outline-stream"], request).await
    }

    async fn stream_chapter(&self, request: &ChapterRequest) -> Result<ByteStream> {
        self.open_stream(&["generate-chapter-stream"], request).await
    }

    async fn save_chapter(&self, request: &SaveChapterRequest) -> Result<SaveReceipt> {
        let resp: SaveChapterResponse = self.post_json(&["save-chapter"], request).await?;
        if !resp.success {
            return Err(envelope_error(resp.message, "保存失败"));
        }
        Ok(SaveReceipt {
            chapter_id: resp.chapter_id,
            novel_id: resp.novel_id,
        })
    }

    async fn saved_chapters(&self) -> Result<Vec<SavedChapterSummary>> {
        let resp: SavedChaptersResponse = self.get_json(&["saved-chapters"]).await?;
        if !resp.success {
            return Err(envelope_error(resp.message, "获取章节列表失败"));
        }
        Ok(resp.chapters.unwrap_or_default())
    }

    async fn chapter(&self, chapter_id: &str) -> Result<SavedChapter> {
        let resp: ChapterResponse = self.get_json(&["chapter", chapter_id]).await?;
        if !resp.success {
            return Err(envelope_error(resp.message, "获取章节内容失败"));
        }
        resp.chapter.ok_or_else(|| anyhow!("章节数据不存在"))
    }

    async fn update_chapter_position(&self, chapter_id: &str, new_position: u32) -> Result<()> {
        let url = self.endpoint(&["chapter", chapter_id, "position"])?;
        debug!("PUT {}", url);
        let resp = self
            .client
            .put(url)
            .timeout(self.timeout)
            .json(&PositionRequest { new_position })
            .send()
            .await?;
        let resp: StatusResponse = Self::check(resp).await?.json().await?;
        if !resp.success {
            return Err(envelope_error(resp.message, "位置更新失败"));
        }
        Ok(())
    }
}
