//! In-memory backend and event recorder shared by the service tests.

use crate::services::api::{
    ByteStream, ChapterRequest, NovelBackend, OutlineRequest, SaveChapterRequest, SaveReceipt, SavedChapter,
    SavedChapterSummary, TitleRequest,
};
use crate::services::controller::CancelHandle;
use crate::services::workflow::{CreationWorkflow, Notice, WorkflowEvent, WorkflowObserver};
use crate::core::state::WorkflowState;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Renders SSE `data:` records for each piece, optionally followed by the sentinel.
pub fn sse_body(pieces: &[&str], with_done: bool) -> String {
    let mut body = String::new();
    for piece in pieces {
        let record = serde_json::json!({ "choices": [{ "delta": { "content": piece } }] });
        body.push_str(&format!("data: {}\n\n", record));
    }
    if with_done {
        body.push_str("data: [DONE]\n\n");
    }
    body
}

#[derive(Debug, Clone)]
enum Tail {
    End,
    Error(String),
    Hang,
}

/// What a fake streaming endpoint does when opened.
#[derive(Debug, Clone)]
pub struct StreamScript {
    open_error: Option<String>,
    chunks: Vec<String>,
    tail: Tail,
}

impl StreamScript {
    pub fn chunks(chunks: Vec<String>) -> Self {
        Self {
            open_error: None,
            chunks,
            tail: Tail::End,
        }
    }

    pub fn open_error(message: &str) -> Self {
        Self {
            open_error: Some(message.to_string()),
            chunks: Vec::new(),
            tail: Tail::End,
        }
    }

    pub fn then_error(mut self, message: &str) -> Self {
        self.tail = Tail::Error(message.to_string());
        self
    }

    /// The connection stays open after the last chunk.
    pub fn then_hang(mut self) -> Self {
        self.tail = Tail::Hang;
        self
    }

    fn open(&self) -> Result<ByteStream> {
        if let Some(message) = &self.open_error {
            return Err(anyhow!(message.clone()));
        }
        let head = stream::iter(
            self.chunks
                .iter()
                .map(|c| Ok(Bytes::from(c.clone())))
                .collect::<Vec<Result<Bytes>>>(),
        );
        Ok(match &self.tail {
            Tail::End => head.boxed(),
            Tail::Error(message) => head.chain(stream::iter(vec![Err(anyhow!(message.clone()))])).boxed(),
            Tail::Hang => head.chain(stream::pending()).boxed(),
        })
    }
}

#[derive(Default)]
struct Calls {
    titles: Vec<TitleRequest>,
    chapters: Vec<ChapterRequest>,
    saves: Vec<SaveChapterRequest>,
    positions: Vec<(String, u32)>,
}

pub struct FakeBackend {
    title: String,
    fail_title: AtomicBool,
    hang_title: AtomicBool,
    fail_listing: AtomicBool,
    fail_save: Mutex<Option<String>>,
    outline: Mutex<StreamScript>,
    chapter: Mutex<StreamScript>,
    stream_calls: AtomicUsize,
    store: Mutex<Vec<SavedChapter>>,
    calls: Mutex<Calls>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            title: "时之轮".to_string(),
            fail_title: AtomicBool::new(false),
            hang_title: AtomicBool::new(false),
            fail_listing: AtomicBool::new(false),
            fail_save: Mutex::new(None),
            outline: Mutex::new(StreamScript::chunks(vec![sse_body(&["第一章 开端\n", "第二章 循环"], true)])),
            chapter: Mutex::new(StreamScript::chunks(vec![sse_body(&["他醒来。"], true)])),
            stream_calls: AtomicUsize::new(0),
            store: Mutex::new(Vec::new()),
            calls: Mutex::new(Calls::default()),
        })
    }

    pub fn fail_title(&self) {
        self.fail_title.store(true, Ordering::SeqCst);
    }

    /// The title request never answers.
    pub fn hang_title(&self) {
        self.hang_title.store(true, Ordering::SeqCst);
    }

    pub fn fail_listing(&self) {
        self.fail_listing.store(true, Ordering::SeqCst);
    }

    pub fn fail_save(&self, message: &str) {
        *self.fail_save.lock().unwrap() = Some(message.to_string());
    }

    pub fn script_outline(&self, script: StreamScript) {
        *self.outline.lock().unwrap() = script;
    }

    pub fn script_chapter(&self, script: StreamScript) {
        *self.chapter.lock().unwrap() = script;
    }

    pub fn seed_saved(&self, chapters: Vec<SavedChapter>) {
        self.store.lock().unwrap().extend(chapters);
    }

    pub fn saved(&self) -> Vec<SavedChapter> {
        self.store.lock().unwrap().clone()
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn title_requests(&self) -> Vec<TitleRequest> {
        self.calls.lock().unwrap().titles.clone()
    }

    pub fn chapter_requests(&self) -> Vec<ChapterRequest> {
        self.calls.lock().unwrap().chapters.clone()
    }

    pub fn save_requests(&self) -> Vec<SaveChapterRequest> {
        self.calls.lock().unwrap().saves.clone()
    }

    pub fn position_updates(&self) -> Vec<(String, u32)> {
        self.calls.lock().unwrap().positions.clone()
    }
}

fn summary(chapter: &SavedChapter) -> SavedChapterSummary {
    SavedChapterSummary {
        chapter_id: chapter.chapter_id.clone(),
        novel_id: chapter.novel_id.clone(),
        title: chapter.title.clone(),
        chapter_number: chapter.chapter_number,
        word_count: chapter.content.as_deref().map(|c| c.chars().count() as u64).unwrap_or(0),
        created_at: chapter.created_at.clone(),
        novel_title: chapter.novel_title.clone(),
        genre: chapter.genre.clone(),
        theme: chapter.theme.clone(),
    }
}

#[async_trait]
impl NovelBackend for FakeBackend {
    async fn generate_title(&self, request: &TitleRequest) -> Result<String> {
        self.calls.lock().unwrap().titles.push(request.clone());
        if self.hang_title.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_title.load(Ordering::SeqCst) {
            return Err(anyhow!("HTTP error! status: 500"));
        }
        Ok(self.title.clone())
    }

    async fn stream_outline(&self, _request: &OutlineRequest) -> Result<ByteStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.outline.lock().unwrap().clone();
        script.open()
    }

    async fn stream_chapter(&self, request: &ChapterRequest) -> Result<ByteStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().chapters.push(request.clone());
        let script = self.chapter.lock().unwrap().clone();
        script.open()
    }

    async fn save_chapter(&self, request: &SaveChapterRequest) -> Result<SaveReceipt> {
        self.calls.lock().unwrap().saves.push(request.clone());
        if let Some(message) = self.fail_save.lock().unwrap().clone() {
            return Err(anyhow!(message));
        }
        let novel_id = format!("novel-{}", request.title);
        let chapter_id = format!("{}-{}", request.title, request.chapter_number);
        let record = SavedChapter {
            chapter_id: chapter_id.clone(),
            novel_id: novel_id.clone(),
            title: request
                .custom_title
                .clone()
                .unwrap_or_else(|| format!("第{}章", request.chapter_number)),
            content: Some(request.content.clone()),
            chapter_number: request.chapter_number,
            novel_title: request.title.clone(),
            genre: request.genre.clone(),
            theme: Some(request.theme.clone()),
            outline: Some(request.outline.clone()),
            ..Default::default()
        };
        let mut store = self.store.lock().unwrap();
        match store
            .iter_mut()
            .find(|c| c.novel_title == record.novel_title && c.chapter_number == record.chapter_number)
        {
            Some(existing) => *existing = record,
            None => store.push(record),
        }
        Ok(SaveReceipt {
            chapter_id: Some(chapter_id),
            novel_id: Some(novel_id),
        })
    }

    async fn saved_chapters(&self) -> Result<Vec<SavedChapterSummary>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(anyhow!("HTTP error! status: 503"));
        }
        Ok(self.store.lock().unwrap().iter().map(summary).collect())
    }

    async fn chapter(&self, chapter_id: &str) -> Result<SavedChapter> {
        self.store
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.chapter_id == chapter_id)
            .cloned()
            .ok_or_else(|| anyhow!("章节不存在"))
    }

    async fn update_chapter_position(&self, chapter_id: &str, new_position: u32) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .positions
            .push((chapter_id.to_string(), new_position));
        Ok(())
    }
}

/// One observed event plus the flags as they were when it fired.
#[derive(Debug, Clone)]
pub struct Sample {
    pub event: WorkflowEvent,
    pub busy: bool,
    pub streaming_outline: bool,
    pub streaming_chapter: bool,
}

#[derive(Clone, Default)]
pub struct Recorder {
    samples: Arc<Mutex<Vec<Sample>>>,
    cancel_on_delta: Option<CancelHandle>,
}

impl Recorder {
    pub fn attach(workflow: &mut CreationWorkflow) -> Self {
        let recorder = Self::default();
        workflow.subscribe(Box::new(recorder.clone()));
        recorder
    }

    /// Also cancels the live request as soon as the first delta arrives.
    pub fn cancelling_on_delta(workflow: &mut CreationWorkflow) -> Self {
        let recorder = Self {
            samples: Arc::default(),
            cancel_on_delta: Some(workflow.cancel_handle()),
        };
        workflow.subscribe(Box::new(recorder.clone()));
        recorder
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.samples.lock().unwrap().clone()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.samples()
            .into_iter()
            .filter_map(|s| match s.event {
                WorkflowEvent::Notice(notice) => Some(notice),
                _ => None,
            })
            .collect()
    }

    pub fn deltas(&self) -> Vec<String> {
        self.samples()
            .into_iter()
            .filter_map(|s| match s.event {
                WorkflowEvent::Delta { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }
}

impl WorkflowObserver for Recorder {
    fn on_event(&self, event: &WorkflowEvent, state: &WorkflowState) {
        self.samples.lock().unwrap().push(Sample {
            event: event.clone(),
            busy: state.is_busy,
            streaming_outline: state.is_streaming_outline,
            streaming_chapter: state.is_streaming_chapter,
        });
        if let (WorkflowEvent::Delta { .. }, Some(handle)) = (event, &self.cancel_on_delta) {
            handle.cancel();
        }
    }
}
