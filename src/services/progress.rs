use crate::core::io::Storage;
use crate::core::state::{Genre, NovelForm, ReviewSeed, Step};
use crate::services::workflow::{CreationWorkflow, NoticeLevel, WorkflowEvent};
use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Name the snapshot is known by.
pub const PROGRESS_RECORD: &str = "novel-creation-progress";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct SnapshotForm {
    #[serde(default)]
    genre: String,
    #[serde(default)]
    theme: String,
}

/// On-disk shape of a progress snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    current_step: u8,
    novel_form: SnapshotForm,
    #[serde(default)]
    generated_title: String,
    #[serde(default)]
    generated_outline: String,
    #[serde(default)]
    editable_title: String,
    #[serde(default)]
    editable_outline: String,
    #[serde(default)]
    final_title: String,
    #[serde(default)]
    final_outline: String,
}

/// A single snapshot slot backed by [`Storage`].
pub struct ProgressStore {
    storage: Arc<dyn Storage>,
    path: String,
}

impl ProgressStore {
    pub fn new(storage: Arc<dyn Storage>, path: impl Into<String>) -> Self {
        Self {
            storage,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn save(&self, snapshot: &ProgressSnapshot) -> Result<()> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        self.storage
            .write(&self.path, &json)
            .await
            .with_context(|| format!("Failed to write {}", self.path))
    }

    /// `None` when there is no usable snapshot.
    pub async fn load(&self) -> Option<ProgressSnapshot> {
        match self.storage.exists(&self.path).await {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                warn!("Cannot check {}: {:#}", self.path, e);
                return None;
            }
        }
        let bytes = match self.storage.read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Cannot read {}: {:#}", self.path, e);
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Ignoring corrupt {} at {}: {}", PROGRESS_RECORD, self.path, e);
                None
            }
        }
    }

    pub async fn clear(&self) -> Result<()> {
        self.storage
            .delete(&self.path)
            .await
            .with_context(|| format!("Failed to delete {}", self.path))
    }
}

impl CreationWorkflow {
    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = &self.state;
        ProgressSnapshot {
            current_step: state.step.index(),
            novel_form: SnapshotForm {
                genre: state.novel_form.genre.map(|g| g.to_string()).unwrap_or_default(),
                theme: state.novel_form.theme.clone(),
            },
            generated_title: state.generated_title.clone(),
            generated_outline: state.generated_outline.clone(),
            editable_title: state.editable_title.clone(),
            editable_outline: state.editable_outline.clone(),
            final_title: state.final_title.clone(),
            final_outline: state.final_outline.clone(),
        }
    }

    pub async fn save_progress(&self, store: &ProgressStore) -> Result<()> {
        store.save(&self.snapshot()).await?;
        info!("Progress saved to {}", store.path());
        self.notify(NoticeLevel::Success, "进度已保存");
        Ok(())
    }

    /// Restores the snapshot fields. Returns `false` when nothing usable was stored.
    pub async fn load_progress(&mut self, store: &ProgressStore) -> bool {
        let Some(snapshot) = store.load().await else {
            return false;
        };
        let Some(step) = Step::from_index(snapshot.current_step) else {
            warn!("Ignoring {} with unknown step {}", PROGRESS_RECORD, snapshot.current_step);
            return false;
        };

        self.cancel();
        let from = self.state.step;
        let state = &mut self.state;
        state.step = step;
        state.novel_form = NovelForm {
            genre: Genre::parse(&snapshot.novel_form.genre),
            theme: snapshot.novel_form.theme,
        };
        state.generated_title = snapshot.generated_title;
        state.generated_outline = snapshot.generated_outline;
        state.editable_title = snapshot.editable_title;
        state.editable_outline = snapshot.editable_outline;
        state.final_title = snapshot.final_title;
        state.final_outline = snapshot.final_outline;
        // Restored edits count as already seeded from the restored generated values.
        state.review_seed = (!state.editable_title.is_empty() || !state.editable_outline.is_empty()).then(|| {
            ReviewSeed {
                title: state.generated_title.clone(),
                outline: state.generated_outline.clone(),
            }
        });

        info!("Progress restored at step {}", step);
        if from != step {
            self.emit(WorkflowEvent::StepChanged { from, to: step });
        }
        self.notify(NoticeLevel::Success, "进度已恢复");
        true
    }

    pub async fn clear_progress(&self, store: &ProgressStore) -> Result<()> {
        store.clear().await?;
        info!("Progress cleared");
        Ok(())
    }
}
