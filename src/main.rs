use anyhow::Result;
use co_novel::core::config::Config;
use co_novel::core::io::NativeStorage;
use co_novel::core::state::{Genre, Step, WorkflowState};
use co_novel::services::api::{HttpBackend, SavedChapterSummary};
use co_novel::services::chapters::{ChapterConflict, ConflictResolver, OverwriteDecision};
use co_novel::services::progress::ProgressStore;
use co_novel::services::workflow::{CreationWorkflow, NoticeLevel, WorkflowEvent, WorkflowObserver};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::list_option::ListOption;
use inquire::{Confirm, CustomType, Editor, Select, Text};
use log::{info, warn};
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Prints deltas as they arrive and notices as prefixed lines.
#[derive(Default)]
struct ConsolePrinter {
    mid_stream: AtomicBool,
}

impl WorkflowObserver for ConsolePrinter {
    fn on_event(&self, event: &WorkflowEvent, _state: &WorkflowState) {
        match event {
            WorkflowEvent::Delta { text, .. } => {
                self.mid_stream.store(true, Ordering::Relaxed);
                print!("{}", text);
                let _ = std::io::stdout().flush();
            }
            WorkflowEvent::Activity { busy: false, .. } => {
                if self.mid_stream.swap(false, Ordering::Relaxed) {
                    println!();
                }
            }
            WorkflowEvent::Notice(notice) => match notice.level {
                NoticeLevel::Success => println!("✓ {}", notice.message),
                NoticeLevel::Warning => println!("! {}", notice.message),
                NoticeLevel::Error => eprintln!("✗ {}", notice.message),
            },
            _ => {}
        }
    }
}

struct PromptResolver {
    unattended: bool,
}

impl ConflictResolver for PromptResolver {
    fn resolve(&self, conflict: &ChapterConflict) -> OverwriteDecision {
        if self.unattended {
            warn!(
                "Chapter {} of {} already exists; not overwriting in unattended mode",
                conflict.chapter_number, conflict.novel_title
            );
            return OverwriteDecision::Cancel;
        }
        let question = format!(
            "《{}》第{}章已存在（{}，{}字），是否覆盖？",
            conflict.novel_title, conflict.chapter_number, conflict.existing.title, conflict.existing.word_count
        );
        match Confirm::new(&question).with_default(false).prompt() {
            Ok(true) => OverwriteDecision::Overwrite,
            _ => OverwriteDecision::Cancel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Fill,
    Generate,
    Regenerate,
    Show,
    EditTitle,
    EditOutline,
    Confirm,
    Next,
    Back,
    ChapterNumber,
    CustomTitle,
    NextChapter,
    SaveChapter,
    ListSaved,
    OpenSaved,
    Reposition,
    SaveProgress,
    Restart,
    Quit,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Action::Fill => "填写类型和主题",
            Action::Generate => "生成",
            Action::Regenerate => "重新生成",
            Action::Show => "查看当前内容",
            Action::EditTitle => "修改标题",
            Action::EditOutline => "修改大纲",
            Action::Confirm => "确认并继续",
            Action::Next => "下一步",
            Action::Back => "上一步",
            Action::ChapterNumber => "设置章节号",
            Action::CustomTitle => "设置章节标题",
            Action::NextChapter => "准备下一章",
            Action::SaveChapter => "保存章节",
            Action::ListSaved => "查看已保存章节",
            Action::OpenSaved => "打开已保存章节",
            Action::Reposition => "修改章节位置",
            Action::SaveProgress => "保存进度",
            Action::Restart => "重新开始",
            Action::Quit => "退出",
        };
        f.write_str(label)
    }
}

fn actions_for(step: Step) -> Vec<Action> {
    use Action::*;
    let mut actions = match step {
        Step::BasicSetup => vec![Fill, Next, OpenSaved],
        Step::TitleGeneration | Step::OutlineCreation => vec![Generate, Regenerate, Show, Next, Back],
        Step::ContentReview => vec![Show, EditTitle, EditOutline, Confirm, Back],
        Step::ChapterGeneration => vec![
            Generate,
            Regenerate,
            Show,
            ChapterNumber,
            CustomTitle,
            NextChapter,
            SaveChapter,
            ListSaved,
            OpenSaved,
            Reposition,
            Back,
        ],
    };
    actions.extend([SaveProgress, Restart, Quit]);
    actions
}

fn spinner(message: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

fn show(state: &WorkflowState) {
    match state.step {
        Step::BasicSetup => {
            let genre = state.novel_form.genre.map(|g| g.to_string()).unwrap_or_default();
            println!("类型：{}  主题：{}", genre, state.novel_form.theme);
        }
        Step::TitleGeneration => println!("标题：{}", state.generated_title),
        Step::OutlineCreation => println!("{}", state.generated_outline),
        Step::ContentReview => println!("《{}》\n{}", state.editable_title, state.editable_outline),
        Step::ChapterGeneration => {
            println!("《{}》 第{}章", state.final_title, state.chapter_form.number);
            if state.chapter_content.is_empty() {
                println!("（尚未生成章节内容）");
            } else {
                println!("{}\n\n{}", state.current_chapter_title, state.chapter_content);
            }
        }
    }
}

fn basic_setup(workflow: &mut CreationWorkflow) -> Result<()> {
    let genre = Select::new("小说类型：", Genre::ALL.to_vec()).prompt()?;
    workflow.set_genre(Some(genre));
    let theme = Text::new("主题：")
        .with_initial_value(&workflow.state().novel_form.theme)
        .prompt()?;
    workflow.set_theme(theme);
    Ok(())
}

async fn pick_saved(workflow: &CreationWorkflow, prompt: &str) -> Result<Option<SavedChapterSummary>> {
    let Some(chapters) = workflow.saved_chapters().await.completed() else {
        return Ok(None);
    };
    if chapters.is_empty() {
        println!("暂无已保存的章节");
        return Ok(None);
    }
    let labels: Vec<String> = chapters.iter().map(describe).collect();
    let picked = Select::new(prompt, labels).raw_prompt()?;
    Ok(chosen(&chapters, &picked))
}

/// Maps a menu choice back by position; descriptions need not be unique.
fn chosen(chapters: &[SavedChapterSummary], picked: &ListOption<String>) -> Option<SavedChapterSummary> {
    chapters.get(picked.index).cloned()
}

fn describe(ch: &SavedChapterSummary) -> String {
    format!(
        "《{}》第{}章 {}（{}字）{}",
        ch.novel_title, ch.chapter_number, ch.title, ch.word_count, ch.created_at
    )
}

async fn run_action(
    workflow: &mut CreationWorkflow,
    progress: &ProgressStore,
    resolver: &PromptResolver,
    action: Action,
) -> Result<bool> {
    let step = workflow.state().step;
    match action {
        Action::Generate | Action::Regenerate => {
            let again = action == Action::Regenerate;
            match step {
                Step::TitleGeneration => {
                    let pb = spinner("正在生成标题...")?;
                    if again {
                        workflow.regenerate_title().await;
                    } else {
                        workflow.generate_title().await;
                    }
                    pb.finish_and_clear();
                    show(workflow.state());
                }
                Step::OutlineCreation if again => {
                    workflow.regenerate_outline().await;
                }
                Step::OutlineCreation => {
                    workflow.generate_outline().await;
                }
                Step::ChapterGeneration if again => {
                    workflow.regenerate_chapter().await;
                }
                Step::ChapterGeneration => {
                    println!("{}", workflow.state().chapter_form.display_title());
                    workflow.generate_chapter().await;
                }
                Step::BasicSetup | Step::ContentReview => {}
            }
        }
        Action::Fill => basic_setup(workflow)?,
        Action::Show => show(workflow.state()),
        Action::EditTitle => {
            let title = Text::new("标题：")
                .with_initial_value(&workflow.state().editable_title)
                .prompt()?;
            workflow.set_editable_title(title);
        }
        Action::EditOutline => {
            let outline = Editor::new("大纲：")
                .with_predefined_text(&workflow.state().editable_outline)
                .prompt()?;
            workflow.set_editable_outline(outline);
        }
        Action::Confirm => {
            workflow.confirm_and_advance();
        }
        Action::Next => {
            if !workflow.advance() {
                println!("! 请先完成当前步骤");
            }
        }
        Action::Back => {
            workflow.retreat();
        }
        Action::ChapterNumber => {
            let number = CustomType::<u32>::new("章节号：")
                .with_default(workflow.state().chapter_form.number)
                .with_error_message("请输入正整数")
                .prompt()?;
            workflow.set_chapter_number(number);
        }
        Action::CustomTitle => {
            let title = Text::new("章节标题（留空使用默认）：")
                .with_initial_value(&workflow.state().chapter_form.custom_title)
                .prompt()?;
            workflow.set_custom_title(title);
        }
        Action::NextChapter => workflow.next_chapter(),
        Action::SaveChapter => {
            workflow.save_chapter(resolver).await;
        }
        Action::ListSaved => {
            if let Some(chapters) = workflow.saved_chapters().await.completed() {
                if chapters.is_empty() {
                    println!("暂无已保存的章节");
                }
                for ch in &chapters {
                    println!("{}", describe(ch));
                }
            }
        }
        Action::OpenSaved => {
            if let Some(ch) = pick_saved(workflow, "打开章节：").await? {
                workflow.open_saved_chapter(&ch.chapter_id).await;
            }
        }
        Action::Reposition => {
            if let Some(ch) = pick_saved(workflow, "要移动的章节：").await? {
                let position = CustomType::<u32>::new("新位置（1-99）：")
                    .with_default(ch.chapter_number)
                    .prompt()?;
                workflow.update_chapter_position(&ch.chapter_id, position).await;
            }
        }
        Action::SaveProgress => {
            if let Err(e) = workflow.save_progress(progress).await {
                eprintln!("✗ 保存进度失败：{:#}", e);
            }
        }
        Action::Restart => {
            if Confirm::new("确定重新开始吗？当前内容将丢失").with_default(false).prompt()? {
                workflow.reset();
                workflow.clear_progress(progress).await?;
            }
        }
        Action::Quit => return Ok(false),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("{:#}; using default settings", e);
            Config::default()
        }
    };
    info!("Backend: {}", config.api_base_url);

    let backend = Arc::new(HttpBackend::new(&config)?);
    let progress = ProgressStore::new(Arc::new(NativeStorage::new()), config.progress_file.clone());
    let resolver = PromptResolver {
        unattended: config.unattended,
    };

    let mut workflow = CreationWorkflow::new(backend, &config);
    workflow.subscribe(Box::new(ConsolePrinter::default()));

    let handle = workflow.cancel_handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling current request");
            handle.cancel();
        }
    });

    if !config.unattended
        && progress.load().await.is_some()
        && Confirm::new("发现未完成的创作进度，是否恢复？").with_default(true).prompt()?
    {
        workflow.load_progress(&progress).await;
    }

    loop {
        let step = workflow.state().step;
        println!("\n== 第{}步：{} ==", step.index() + 1, workflow.step_name());
        let action = Select::new("操作：", actions_for(step)).prompt()?;
        if !run_action(&mut workflow, &progress, &resolver, action).await? {
            break;
        }
    }

    workflow.dispose();
    Ok(())
}
