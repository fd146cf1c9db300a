//! Errors surfaced by the narration pipeline.

use std::fmt;
use thiserror::Error;

/// The external stage a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Segmentation,
    Casting,
    EmotionTagging,
    SpeechSynthesis,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Segmentation => "segmentation",
            Stage::Casting => "casting",
            Stage::EmotionTagging => "emotion tagging",
            Stage::SpeechSynthesis => "speech synthesis",
        };
        f.write_str(name)
    }
}

/// Chunks handed to the caller before an error stay delivered; the callback
/// stream, not the absence of an error, is the record of what succeeded.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Story not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Stage {stage} failed: {source:#}")]
    Stage {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("Story store error: {0:#}")]
    Store(anyhow::Error),

    #[error("Narration cancelled: consumer went away")]
    Cancelled,
}

impl PipelineError {
    pub fn stage(stage: Stage, source: impl Into<anyhow::Error>) -> Self {
        PipelineError::Stage {
            stage,
            source: source.into(),
        }
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
