use crate::core::config::Config;
use crate::core::state::{find_character, Character, DialogueSegment};
use crate::services::emotion::DEFAULT_EMOTION;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod gemini;
pub mod openai;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Voice {
    pub id: String,
    pub gender: String,
    pub style: String,
}

impl Voice {
    pub fn new(id: &str, gender: &str, style: &str) -> Self {
        Self {
            id: id.to_string(),
            gender: gender.to_string(),
            style: style.to_string(),
        }
    }
}

/// Turns a batch of emotion-tagged segments into one audio artifact.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Returns the audio as a `data:` URI.
    async fn synthesize(
        &self,
        segments: &[DialogueSegment],
        characters: &[Character],
    ) -> Result<String>;

    /// Voices the provider can speak with, offered to casting.
    fn voices(&self) -> Vec<Voice>;

    fn narrator_voice(&self) -> Option<String>;
}

/// The voice a segment should be spoken with: the cast voice of its
/// character, else the narrator voice, else the provider default.
pub(crate) fn voice_for(
    segment: &DialogueSegment,
    characters: &[Character],
    narrator_voice: Option<&str>,
    default_voice: &str,
) -> String {
    match find_character(characters, &segment.character).and_then(|c| c.voice_id.as_deref()) {
        Some(v) => v.to_string(),
        None => {
            warn!(
                "No cast voice for {} (segment {}), using fallback",
                segment.character, segment.index
            );
            narrator_voice.unwrap_or(default_voice).to_string()
        }
    }
}

pub(crate) fn emotion_of(segment: &DialogueSegment) -> &str {
    segment
        .emotion
        .as_deref()
        .filter(|e| !e.trim().is_empty())
        .unwrap_or(DEFAULT_EMOTION)
}

pub fn create_synthesizer(config: &Config) -> Result<Arc<dyn SpeechSynthesizer>> {
    info!("Initializing TTS client for provider: {}", config.audio.provider);
    match config.audio.provider.as_str() {
        "gemini" => {
            let cfg = config
                .audio
                .gemini
                .clone()
                .ok_or_else(|| anyhow!("Gemini TTS config missing"))?;
            Ok(Arc::new(gemini::GeminiSynthesizer::new(cfg)))
        }
        "openai" => {
            let cfg = config
                .audio
                .openai
                .clone()
                .ok_or_else(|| anyhow!("OpenAI TTS config missing"))?;
            Ok(Arc::new(openai::OpenAiSynthesizer::new(cfg)))
        }
        _ => Err(anyhow!("Unknown TTS provider: {}", config.audio.provider)),
    }
}
