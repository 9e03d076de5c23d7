use crate::core::config::Config;
use crate::core::state::{ChapterForm, Genre, ReviewSeed, Step, WorkflowState};
use crate::services::api::{ByteStream, ChapterRequest, NovelBackend, OutlineRequest, TitleRequest};
use crate::services::controller::{CancelHandle, Lease, Outcome, RequestController};
use crate::services::stream::DeltaStream;
use crate::utils::outline::format_outline;
use anyhow::{anyhow, Result};
use log::{debug, error, info, warn};
use std::future::Future;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamTarget {
    Outline,
    Chapter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Warning,
    Error,
}

/// A user-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowEvent {
    StepChanged { from: Step, to: Step },
    Delta { target: StreamTarget, text: String },
    Activity { busy: bool, streaming: Option<StreamTarget> },
    Notice(Notice),
    Reset,
}

/// Receives every event right after the state change it describes.
pub trait WorkflowObserver: Send + Sync {
    fn on_event(&self, event: &WorkflowEvent, state: &WorkflowState);
}

/// The creation wizard: step gating, generation, and the edit/confirm handoff.
pub struct CreationWorkflow {
    pub(crate) state: WorkflowState,
    pub(crate) backend: Arc<dyn NovelBackend>,
    controller: RequestController,
    observers: Vec<Box<dyn WorkflowObserver>>,
    max_chapter_number: u32,
}

impl CreationWorkflow {
    pub fn new(backend: Arc<dyn NovelBackend>, config: &Config) -> Self {
        Self {
            state: WorkflowState::default(),
            backend,
            controller: RequestController::new(),
            observers: Vec::new(),
            max_chapter_number: config.max_chapter_number.max(1),
        }
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn controller(&self) -> &RequestController {
        &self.controller
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.controller.cancel_handle()
    }

    pub fn subscribe(&mut self, observer: Box<dyn WorkflowObserver>) {
        self.observers.push(observer);
    }

    pub(crate) fn emit(&self, event: WorkflowEvent) {
        for observer in &self.observers {
            observer.on_event(&event, &self.state);
        }
    }

    pub(crate) fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        self.emit(WorkflowEvent::Notice(Notice {
            level,
            message: message.into(),
        }));
    }

    pub(crate) fn reject<T>(&self, message: &str) -> Outcome<T> {
        warn!("Rejected: {}", message);
        self.notify(NoticeLevel::Warning, message);
        Outcome::Rejected(message.to_string())
    }

    /// Surfaces failures to the user; cancellation stays silent.
    pub(crate) fn report<T>(&self, outcome: Outcome<T>, context: &str) -> Outcome<T> {
        match &outcome {
            Outcome::Failed(e) => {
                error!("{}: {:#}", context, e);
                self.notify(NoticeLevel::Error, format!("{}：{}", context, e));
            }
            Outcome::Cancelled => info!("{}: interrupted", context),
            _ => {}
        }
        outcome
    }

    // --- Form input ---

    pub fn set_genre(&mut self, genre: Option<Genre>) {
        self.state.novel_form.genre = genre;
    }

    pub fn set_theme(&mut self, theme: impl Into<String>) {
        self.state.novel_form.theme = theme.into();
    }

    pub fn set_editable_title(&mut self, title: impl Into<String>) {
        self.state.editable_title = title.into();
    }

    pub fn set_editable_outline(&mut self, outline: impl Into<String>) {
        self.state.editable_outline = outline.into();
    }

    pub fn set_chapter_number(&mut self, number: u32) {
        self.state.chapter_form.number = number.max(1);
    }

    pub fn set_custom_title(&mut self, title: impl Into<String>) {
        self.state.chapter_form.custom_title = title.into();
    }

    pub fn set_session(&mut self, session_id: Option<String>, novel_id: Option<String>) {
        self.state.session_id = session_id;
        self.state.novel_id = novel_id;
    }

    // --- Steps ---

    pub fn can_proceed(&self) -> bool {
        self.state.can_proceed()
    }

    pub fn step_name(&self) -> &'static str {
        self.state.step.name()
    }

    fn move_to(&mut self, to: Step) {
        let from = self.state.step;
        self.state.step = to;
        if to == Step::ContentReview && from < to {
            self.seed_review();
        }
        info!("Step {} -> {}", from, to);
        self.emit(WorkflowEvent::StepChanged { from, to });
    }

    /// Seeds the review editables unless they were already seeded from the
    /// same generated values, so edits survive back-and-forth navigation.
    fn seed_review(&mut self) {
        let seed = ReviewSeed {
            title: self.state.generated_title.clone(),
            outline: self.state.generated_outline.clone(),
        };
        if self.state.review_seed.as_ref() == Some(&seed) {
            debug!("Review content already seeded; keeping edits");
            return;
        }
        self.state.editable_title = seed.title.clone();
        self.state.editable_outline = format_outline(&seed.outline);
        self.state.review_seed = Some(seed);
    }

    /// Moves one step forward if the current step is ready.
    pub fn advance(&mut self) -> bool {
        let Some(next) = self.state.step.next() else {
            return false;
        };
        if !self.state.can_proceed() {
            debug!("Step {} not ready; staying", self.state.step);
            return false;
        }
        self.move_to(next);
        true
    }

    pub fn retreat(&mut self) -> bool {
        match self.state.step.prev() {
            Some(prev) => {
                self.move_to(prev);
                true
            }
            None => false,
        }
    }

    /// Freezes the reviewed title and outline, then advances.
    pub fn confirm_and_advance(&mut self) -> bool {
        if self.state.editable_title.is_empty() {
            self.state.editable_title = self.state.generated_title.clone();
        }
        if self.state.editable_outline.is_empty() {
            self.state.editable_outline = self.state.generated_outline.clone();
        }

        if self.state.is_confirmed() {
            warn!("Final title and outline already set; keeping them");
            self.notify(NoticeLevel::Warning, "标题和大纲已确认，如需修改请重新开始");
        } else if self.state.editable_title.is_empty() || self.state.editable_outline.is_empty() {
            self.reject::<()>("请先确认标题和大纲");
            return false;
        } else {
            self.state.final_title = self.state.editable_title.clone();
            self.state.final_outline = self.state.editable_outline.clone();
            info!("Confirmed title: {}", self.state.final_title);
        }
        self.advance()
    }

    /// Cancels any in-flight request and returns to a fresh state.
    pub fn reset(&mut self) {
        self.controller.cancel();
        self.state = WorkflowState::default();
        info!("Workflow reset");
        self.emit(WorkflowEvent::Reset);
    }

    /// Session end.
    pub fn dispose(&mut self) {
        self.controller.cancel();
        self.observers.clear();
    }

    pub fn cancel(&self) {
        self.controller.cancel();
    }

    // --- Generation ---

    fn set_activity(&mut self, busy: bool, streaming: Option<StreamTarget>) {
        self.state.is_busy = busy;
        self.state.is_streaming_outline = streaming == Some(StreamTarget::Outline);
        self.state.is_streaming_chapter = streaming == Some(StreamTarget::Chapter);
        self.emit(WorkflowEvent::Activity { busy, streaming });
    }

    fn buffer_mut(&mut self, target: StreamTarget) -> &mut String {
        match target {
            StreamTarget::Outline => &mut self.state.streaming_outline,
            StreamTarget::Chapter => &mut self.state.streaming_chapter,
        }
    }

    /// Opens a stream under a fresh lease and appends every delta to the target buffer.
    async fn stream_into<F>(&mut self, target: StreamTarget, open: F) -> Outcome<()>
    where
        F: Future<Output = Result<ByteStream>>,
    {
        let lease = self.controller.begin();
        let outcome = match lease.run(open).await {
            Outcome::Completed(source) => self.pump(target, &lease, DeltaStream::new(source)).await,
            other => other.map(|_| ()),
        };
        self.controller.release(&lease);
        outcome
    }

    async fn pump(&mut self, target: StreamTarget, lease: &Lease, mut deltas: DeltaStream) -> Outcome<()> {
        loop {
            let next = tokio::select! {
                biased;
                _ = lease.token().cancelled() => return Outcome::Cancelled,
                next = deltas.next_delta() => next,
            };
            match next {
                Some(Ok(text)) => {
                    debug!("{:?} delta: {} bytes", target, text.len());
                    self.buffer_mut(target).push_str(&text);
                    self.emit(WorkflowEvent::Delta { target, text });
                }
                Some(Err(_)) if lease.is_cancelled() => return Outcome::Cancelled,
                Some(Err(e)) => return Outcome::Failed(e),
                None => return Outcome::Completed(()),
            }
        }
    }

    pub async fn generate_title(&mut self) -> Outcome<()> {
        let form = &self.state.novel_form;
        let (Some(genre), false) = (form.genre, form.theme.trim().is_empty()) else {
            return self.reject("请先填写小说类型和主题");
        };
        let request = TitleRequest {
            genre: genre.to_string(),
            theme: form.theme.clone(),
        };

        info!("Generating title for {} / {}", request.genre, request.theme);
        self.set_activity(true, None);
        let lease = self.controller.begin();
        let backend = self.backend.clone();
        let outcome = lease.run(async move { backend.generate_title(&request).await }).await;
        self.controller.release(&lease);

        let outcome = match outcome {
            Outcome::Completed(title) if title.trim().is_empty() => {
                Outcome::Failed(anyhow!("响应数据格式错误"))
            }
            Outcome::Completed(title) => {
                self.state.generated_title = title;
                Outcome::Completed(())
            }
            other => other.map(|_| ()),
        };
        self.set_activity(false, None);
        if outcome.is_completed() {
            self.notify(NoticeLevel::Success, "标题生成成功");
        }
        self.report(outcome, "标题生成失败")
    }

    pub async fn regenerate_title(&mut self) -> Outcome<()> {
        self.state.generated_title.clear();
        self.generate_title().await
    }

    pub async fn generate_outline(&mut self) -> Outcome<()> {
        if self.state.generated_title.is_empty() {
            return self.reject("请先生成标题");
        }
        let request = OutlineRequest {
            genre: self.state.novel_form.genre.map(|g| g.to_string()).unwrap_or_default(),
            theme: self.state.novel_form.theme.clone(),
            title: self.state.generated_title.clone(),
        };

        info!("Generating outline for {}", request.title);
        self.state.streaming_outline.clear();
        self.set_activity(true, Some(StreamTarget::Outline));
        let backend = self.backend.clone();
        let open = async move { backend.stream_outline(&request).await };
        let outcome = match self.stream_into(StreamTarget::Outline, open).await {
            Outcome::Completed(()) if self.state.streaming_outline.is_empty() => {
                Outcome::Failed(anyhow!("未收到大纲内容"))
            }
            Outcome::Completed(()) => {
                self.state.generated_outline = self.state.streaming_outline.clone();
                Outcome::Completed(())
            }
            other => other,
        };
        self.set_activity(false, None);
        if outcome.is_completed() {
            self.notify(NoticeLevel::Success, "大纲生成成功");
        }
        self.report(outcome, "大纲生成失败")
    }

    pub async fn regenerate_outline(&mut self) -> Outcome<()> {
        self.state.generated_outline.clear();
        self.state.streaming_outline.clear();
        self.generate_outline().await
    }

    pub async fn generate_chapter(&mut self) -> Outcome<()> {
        if !self.state.is_confirmed() {
            return self.reject("请先确认标题和大纲");
        }
        let number = self.state.chapter_form.number;
        let custom_title = self.state.chapter_form.custom_title.trim().to_string();
        let request = ChapterRequest {
            title: self.state.final_title.clone(),
            outline: self.state.final_outline.clone(),
            chapter_number: number,
            custom_title: (!custom_title.is_empty()).then_some(custom_title),
        };

        info!("Generating chapter {} of {}", number, request.title);
        self.state.streaming_chapter.clear();
        let heading = self.state.chapter_form.display_title();
        self.set_activity(true, Some(StreamTarget::Chapter));
        let backend = self.backend.clone();
        let open = async move { backend.stream_chapter(&request).await };
        let outcome = match self.stream_into(StreamTarget::Chapter, open).await {
            Outcome::Completed(()) if self.state.streaming_chapter.is_empty() => {
                Outcome::Failed(anyhow!("未收到章节内容"))
            }
            Outcome::Completed(()) => {
                self.state.chapter_content = self.state.streaming_chapter.clone();
                self.state.current_chapter_title = heading;
                Outcome::Completed(())
            }
            other => other,
        };
        self.set_activity(false, None);
        if outcome.is_completed() {
            self.notify(NoticeLevel::Success, format!("第{}章生成成功", number));
        }
        self.report(outcome, "章节生成失败")
    }

    pub async fn regenerate_chapter(&mut self) -> Outcome<()> {
        self.state.chapter_content.clear();
        self.state.streaming_chapter.clear();
        self.generate_chapter().await
    }

    /// Prepares the next chapter number, capped at the configured maximum.
    pub fn next_chapter(&mut self) {
        self.state.chapter_content.clear();
        self.state.streaming_chapter.clear();
        self.state.chapter_form = ChapterForm {
            number: (self.state.chapter_form.number + 1).min(self.max_chapter_number),
            custom_title: String::new(),
        };
    }
}
