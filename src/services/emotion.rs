use crate::core::state::{Character, DialogueSegment};
use crate::services::llm::LlmClient;
use crate::services::script::strip_code_blocks;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub const DEFAULT_EMOTION: &str = "neutral";

/// Annotates each segment of a batch with an emotion label.
#[async_trait]
pub trait EmotionTagger: Send + Sync {
    async fn tag_emotions(
        &self,
        segments: &[DialogueSegment],
        characters: &[Character],
    ) -> Result<Vec<DialogueSegment>>;
}

pub struct LlmEmotionTagger {
    llm: Arc<dyn LlmClient>,
}

impl LlmEmotionTagger {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[derive(Serialize)]
struct TaggingLine<'a> {
    index: usize,
    character: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TaggingReply {
    Wrapped { segments: Vec<EmotionLabel> },
    Bare(Vec<EmotionLabel>),
}

#[derive(Deserialize)]
struct EmotionLabel {
    index: usize,
    #[serde(default)]
    emotion: String,
}

impl TaggingReply {
    fn into_labels(self) -> HashMap<usize, String> {
        let labels = match self {
            TaggingReply::Wrapped { segments } => segments,
            TaggingReply::Bare(labels) => labels,
        };
        labels
            .into_iter()
            .map(|l| (l.index, l.emotion.trim().to_lowercase()))
            .filter(|(_, e)| !e.is_empty())
            .collect()
    }
}

#[async_trait]
impl EmotionTagger for LlmEmotionTagger {
    async fn tag_emotions(
        &self,
        segments: &[DialogueSegment],
        characters: &[Character],
    ) -> Result<Vec<DialogueSegment>> {
        let lines: Vec<TaggingLine> = segments
            .iter()
            .map(|s| TaggingLine {
                index: s.index,
                character: &s.character,
                text: &s.text,
            })
            .collect();
        let profiles: HashMap<&str, &str> = characters
            .iter()
            .map(|c| (c.name.as_str(), c.description.as_str()))
            .collect();

        let prompt = format!(
            "Label the emotional delivery of each line below with one or two lowercase words \
            (for example: calm, afraid, angry, whispering, joyful, tense).\n\
            Narration should be labelled with the mood it should be read in.\n\
            \n\
            Character profiles: {}\n\
            \n\
            Lines: {}\n\
            \n\
            Return a JSON object: {{ \"segments\": [ {{ \"index\": 0, \"emotion\": \"...\" }} ] }}",
            serde_json::to_string(&profiles)?,
            serde_json::to_string(&lines)?
        );

        let response = self
            .llm
            .chat("You are a voice director. Reply with valid JSON only.", &prompt)
            .await?;
        let clean_json = strip_code_blocks(&response);
        let reply: TaggingReply = serde_json::from_str(&clean_json)
            .with_context(|| format!("Failed to parse emotion JSON: {}", clean_json))?;
        let labels = reply.into_labels();

        Ok(segments
            .iter()
            .map(|s| {
                let emotion = labels
                    .get(&s.index)
                    .map(String::as_str)
                    .unwrap_or(DEFAULT_EMOTION);
                s.with_emotion(emotion)
            })
            .collect())
    }
}
