use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Emoji assigned to an image when the user does not pick one.
pub const DEFAULT_EMOJI: &str = "😊";

/// Stages of the publish workflow, in the order they run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Validating,
    Processing,
    Resizing,
    Compressing,
    Publishing,
    Done,
    Error,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Validating => "validating",
            Stage::Processing => "processing",
            Stage::Resizing => "resizing",
            Stage::Compressing => "compressing",
            Stage::Publishing => "publishing",
            Stage::Done => "done",
            Stage::Error => "error",
        }
    }

    /// User-facing progress line for this stage.
    pub fn describe(&self) -> &'static str {
        match self {
            Stage::Idle => "Idle.",
            Stage::Validating => "Validating...",
            Stage::Processing => "Processing images...",
            Stage::Resizing => "Resizing images...",
            Stage::Compressing => "Compressing images...",
            Stage::Publishing => "Publishing stickers...",
            Stage::Done => "Done.",
            Stage::Error => "Error.",
        }
    }
}

/// One uploaded image: where it lives, what to call it, which emoji it gets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageItem {
    pub path: PathBuf,
    pub name: String,
    pub emoji: String,
}

impl ImageItem {
    pub fn new(path: PathBuf, emoji: Option<String>) -> Self {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("sticker")
            .to_string();
        Self {
            path,
            name,
            emoji: emoji.unwrap_or_else(|| DEFAULT_EMOJI.to_string()),
        }
    }
}

/// Events the orchestrator sends back to the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StatusEvent {
    Stage(Stage),
    /// Per-image progress within a stage: `done` out of `total` finished.
    Item {
        stage: Stage,
        done: usize,
        total: usize,
    },
    Message(String),
}

/// Outcome of a successful publish run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishReport {
    pub pack_name: String,
    pub pack_url: String,
    pub stickers: usize,
}
