//! Saved-chapter reconciliation: conflict detection before a save, loading a
//! saved chapter back into the wizard, and repositioning.

use crate::core::state::{ChapterForm, Genre, NovelForm, ReviewSeed, Step, WorkflowState};
use crate::services::api::{SaveChapterRequest, SaveReceipt, SavedChapterSummary};
use crate::services::controller::Outcome;
use crate::services::workflow::{CreationWorkflow, NoticeLevel, WorkflowEvent};
use log::{info, warn};
use std::ops::RangeInclusive;

/// Positions the chapter store accepts.
pub const CHAPTER_POSITIONS: RangeInclusive<u32> = 1..=99;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwriteDecision {
    Overwrite,
    Cancel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChapterConflict {
    pub novel_title: String,
    pub chapter_number: u32,
    pub existing: SavedChapterSummary,
}

/// Asked whenever a save would clobber an existing (novel title, chapter number).
pub trait ConflictResolver: Send + Sync {
    fn resolve(&self, conflict: &ChapterConflict) -> OverwriteDecision;
}

impl CreationWorkflow {
    pub async fn saved_chapters(&self) -> Outcome<Vec<SavedChapterSummary>> {
        let outcome = match self.backend.saved_chapters().await {
            Ok(chapters) => Outcome::Completed(chapters),
            Err(e) => Outcome::Failed(e),
        };
        self.report(outcome, "获取章节列表失败")
    }

    /// Looks up a saved chapter by key. A failed lookup counts as "not found".
    pub async fn find_existing_chapter(&self, chapter_number: u32, novel_title: &str) -> Option<SavedChapterSummary> {
        match self.backend.saved_chapters().await {
            Ok(chapters) => chapters
                .into_iter()
                .find(|ch| ch.chapter_number == chapter_number && ch.novel_title == novel_title),
            Err(e) => {
                warn!("Existing chapter check failed: {:#}", e);
                None
            }
        }
    }

    /// Persists the current chapter, asking `resolver` first if the key is taken.
    /// A declined overwrite returns `Cancelled` without touching the store.
    pub async fn save_chapter(&mut self, resolver: &dyn ConflictResolver) -> Outcome<SaveReceipt> {
        let state = &self.state;
        if state.chapter_content.is_empty() || !state.is_confirmed() {
            return self.reject("没有可保存的章节内容");
        }
        let number = state.chapter_form.number;
        let novel_title = state.final_title.clone();

        if let Some(existing) = self.find_existing_chapter(number, &novel_title).await {
            let conflict = ChapterConflict {
                novel_title: novel_title.clone(),
                chapter_number: number,
                existing,
            };
            match resolver.resolve(&conflict) {
                OverwriteDecision::Overwrite => info!("Overwriting chapter {} of {}", number, novel_title),
                OverwriteDecision::Cancel => {
                    info!("Save of chapter {} of {} declined", number, novel_title);
                    return Outcome::Cancelled;
                }
            }
        }

        let state = &self.state;
        let custom_title = state.chapter_form.custom_title.trim();
        let request = SaveChapterRequest {
            title: novel_title,
            content: state.chapter_content.clone(),
            chapter_number: number,
            custom_title: (!custom_title.is_empty()).then(|| custom_title.to_string()),
            genre: state.novel_form.genre.map(|g| g.to_string()).unwrap_or_default(),
            theme: state.novel_form.theme.clone(),
            outline: state.final_outline.clone(),
        };

        let outcome = match self.backend.save_chapter(&request).await {
            Ok(receipt) => {
                if receipt.novel_id.is_some() {
                    self.state.novel_id = receipt.novel_id.clone();
                }
                self.notify(NoticeLevel::Success, format!("第{}章已成功保存到服务器", number));
                Outcome::Completed(receipt)
            }
            Err(e) => Outcome::Failed(e),
        };
        self.report(outcome, "保存章节失败")
    }

    /// Replaces the whole workflow state with a saved chapter, at ChapterGeneration.
    pub async fn open_saved_chapter(&mut self, chapter_id: &str) -> Outcome<()> {
        let record = match self.backend.chapter(chapter_id).await {
            Ok(record) => record,
            Err(e) => return self.report(Outcome::Failed(e), "打开章节失败"),
        };

        self.cancel();
        let from = self.state.step;
        let number = record.chapter_number.max(1);
        let outline = record.outline.unwrap_or_default();
        let heading = match record.title.trim() {
            "" => ChapterForm::default_title(number),
            title => title.to_string(),
        };
        let custom_title = if heading == ChapterForm::default_title(number) {
            String::new()
        } else {
            heading.clone()
        };

        self.state = WorkflowState {
            step: Step::ChapterGeneration,
            novel_form: NovelForm {
                genre: Genre::parse(&record.genre),
                theme: record.theme.unwrap_or_default(),
            },
            chapter_form: ChapterForm {
                number,
                custom_title,
            },
            generated_title: record.novel_title.clone(),
            generated_outline: outline.clone(),
            editable_title: record.novel_title.clone(),
            editable_outline: outline.clone(),
            final_title: record.novel_title.clone(),
            final_outline: outline.clone(),
            chapter_content: record.content.unwrap_or_default(),
            current_chapter_title: heading.clone(),
            novel_id: Some(record.novel_id).filter(|id| !id.is_empty()),
            review_seed: Some(ReviewSeed {
                title: record.novel_title,
                outline,
            }),
            ..WorkflowState::default()
        };

        info!("Opened saved chapter {} ({})", chapter_id, heading);
        self.emit(WorkflowEvent::StepChanged {
            from,
            to: Step::ChapterGeneration,
        });
        self.notify(NoticeLevel::Success, format!("已加载章节：{}", heading));
        Outcome::Completed(())
    }

    /// Asks the store to move a chapter. Ordering of other chapters is the store's concern.
    pub async fn update_chapter_position(&self, chapter_id: &str, new_position: u32) -> Outcome<()> {
        if !CHAPTER_POSITIONS.contains(&new_position) {
            return self.reject("章节位置必须在1到99之间");
        }
        let outcome = match self.backend.update_chapter_position(chapter_id, new_position).await {
            Ok(()) => {
                info!("Chapter {} moved to {}", chapter_id, new_position);
                self.notify(NoticeLevel::Success, format!("章节位置已更新为第{}章", new_position));
                Outcome::Completed(())
            }
            Err(e) => Outcome::Failed(e),
        };
        self.report(outcome, "修改章节位置失败")
    }
}
