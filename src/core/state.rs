use serde::{Deserialize, Serialize};
use std::fmt;

/// The five creation steps, in wizard order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Step {
    #[default]
    BasicSetup,
    TitleGeneration,
    OutlineCreation,
    ContentReview,
    ChapterGeneration,
}

impl Step {
    pub const ALL: [Step; 5] = [
        Step::BasicSetup,
        Step::TitleGeneration,
        Step::OutlineCreation,
        Step::ContentReview,
        Step::ChapterGeneration,
    ];

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(index: u8) -> Option<Step> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn next(self) -> Option<Step> {
        Self::from_index(self.index() + 1)
    }

    pub fn prev(self) -> Option<Step> {
        self.index().checked_sub(1).and_then(Self::from_index)
    }

    pub fn name(self) -> &'static str {
        match self {
            Step::BasicSetup => "基础设置",
            Step::TitleGeneration => "生成标题",
            Step::OutlineCreation => "创建大纲",
            Step::ContentReview => "确认信息",
            Step::ChapterGeneration => "生成章节",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Genre {
    #[serde(rename = "玄幻")]
    Fantasy,
    #[serde(rename = "都市")]
    Urban,
    #[serde(rename = "科幻")]
    SciFi,
    #[serde(rename = "武侠")]
    Wuxia,
    #[serde(rename = "言情")]
    Romance,
}

impl Genre {
    pub const ALL: [Genre; 5] = [
        Genre::Fantasy,
        Genre::Urban,
        Genre::SciFi,
        Genre::Wuxia,
        Genre::Romance,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Genre::Fantasy => "玄幻",
            Genre::Urban => "都市",
            Genre::SciFi => "科幻",
            Genre::Wuxia => "武侠",
            Genre::Romance => "言情",
        }
    }

    /// Lenient lookup; unknown labels map to `None`.
    pub fn parse(label: &str) -> Option<Genre> {
        let label = label.trim();
        Self::ALL.into_iter().find(|g| g.as_str() == label)
    }
}

impl fmt::Display for Genre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NovelForm {
    pub genre: Option<Genre>,
    pub theme: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterForm {
    pub number: u32,
    pub custom_title: String,
}

impl Default for ChapterForm {
    fn default() -> Self {
        Self {
            number: 1,
            custom_title: String::new(),
        }
    }
}

impl ChapterForm {
    /// The heading used when no custom title is given.
    pub fn default_title(number: u32) -> String {
        format!("第{}章", number)
    }

    pub fn display_title(&self) -> String {
        if self.custom_title.trim().is_empty() {
            Self::default_title(self.number)
        } else {
            self.custom_title.clone()
        }
    }
}

/// Generated values the review editables were last seeded from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewSeed {
    pub title: String,
    pub outline: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowState {
    pub step: Step,

    pub novel_form: NovelForm,
    pub chapter_form: ChapterForm,

    pub generated_title: String,
    pub generated_outline: String,
    pub editable_title: String,
    pub editable_outline: String,
    pub final_title: String,
    pub final_outline: String,
    pub chapter_content: String,
    pub current_chapter_title: String,

    pub streaming_outline: String,
    pub streaming_chapter: String,
    pub is_streaming_outline: bool,
    pub is_streaming_chapter: bool,
    pub is_busy: bool,

    pub session_id: Option<String>,
    pub novel_id: Option<String>,

    pub review_seed: Option<ReviewSeed>,
}

impl WorkflowState {
    /// Readiness predicate for leaving the current step forward.
    pub fn can_proceed(&self) -> bool {
        match self.step {
            Step::BasicSetup => {
                self.novel_form.genre.is_some() && !self.novel_form.theme.trim().is_empty()
            }
            Step::TitleGeneration => !self.generated_title.is_empty(),
            Step::OutlineCreation => !self.generated_outline.is_empty(),
            Step::ContentReview => {
                !self.editable_title.is_empty() && !self.editable_outline.is_empty()
            }
            Step::ChapterGeneration => true,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        !self.final_title.is_empty() && !self.final_outline.is_empty()
    }
}
