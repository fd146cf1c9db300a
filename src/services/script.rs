use crate::core::state::{is_narrator, Character, DialogueSegment, Segmentation, NARRATOR};
use crate::services::llm::LlmClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Splits story text into ordered segments and a character roster.
#[async_trait]
pub trait Segmenter: Send + Sync {
    async fn segment(&self, text: &str) -> Result<Segmentation>;
}

pub struct LlmSegmenter {
    llm: Arc<dyn LlmClient>,
}

impl LlmSegmenter {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn system_prompt() -> &'static str {
        "You are a script editor preparing a story for multi-voice narration. Reply with valid JSON only."
    }

    fn prompt(text: &str) -> String {
        format!(
            "Break the following story into consecutive segments of narration and dialogue.\n\
            \n\
            Rules:\n\
            - Keep the original order and wording. Do not summarise, skip or merge across speakers.\n\
            - Attribute every line of dialogue to the character speaking it.\n\
            - Attribute everything that is not spoken dialogue to \"{narrator}\".\n\
            - List every character exactly once, including \"{narrator}\" if it appears, with a short profile \
            (age, temperament, manner of speaking) inferred from the text.\n\
            \n\
            Return a JSON object:\n\
            {{ \"segments\": [ {{ \"character\": \"...\", \"text\": \"...\" }} ], \
            \"characters\": [ {{ \"name\": \"...\", \"description\": \"...\" }} ] }}\n\
            \n\
            Story:\n{text}",
            narrator = NARRATOR,
            text = text
        )
    }
}

#[derive(Deserialize)]
struct RawSegmentation {
    #[serde(default)]
    segments: Vec<RawSegment>,
    #[serde(default)]
    characters: Vec<RawCharacter>,
}

#[derive(Deserialize)]
struct RawSegment {
    #[serde(alias = "speaker", default)]
    character: String,
    text: String,
}

#[derive(Deserialize)]
struct RawCharacter {
    name: String,
    #[serde(default)]
    description: String,
}

fn canonical_name(name: &str) -> String {
    let name = name.trim();
    if name.is_empty() || is_narrator(name) {
        NARRATOR.to_string()
    } else {
        name.to_string()
    }
}

/// Re-indexes segments in returned order, drops blank ones and makes sure
/// every speaker has exactly one roster entry.
fn normalize(raw: RawSegmentation) -> Segmentation {
    let segments: Vec<DialogueSegment> = raw
        .segments
        .into_iter()
        .filter(|s| !s.text.trim().is_empty())
        .enumerate()
        .map(|(i, s)| DialogueSegment::new(i, canonical_name(&s.character), s.text.trim()))
        .collect();

    let mut seen = HashSet::new();
    let mut characters = Vec::new();
    for c in raw.characters {
        let name = canonical_name(&c.name);
        if seen.insert(name.clone()) {
            characters.push(Character::new(name, c.description.trim()));
        }
    }
    for s in &segments {
        if seen.insert(s.character.clone()) {
            characters.push(Character::new(s.character.clone(), ""));
        }
    }

    Segmentation {
        segments,
        characters,
    }
}

#[async_trait]
impl Segmenter for LlmSegmenter {
    async fn segment(&self, text: &str) -> Result<Segmentation> {
        let response = self
            .llm
            .chat(Self::system_prompt(), &Self::prompt(text))
            .await?;
        let clean_json = strip_code_blocks(&response);
        let raw: RawSegmentation = serde_json::from_str(&clean_json)
            .with_context(|| format!("Failed to parse segmentation JSON: {}", clean_json))?;
        Ok(normalize(raw))
    }
}

pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json")
            .trim_end_matches("```")
            .trim()
            .to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
            .to_string()
    } else {
        s.to_string()
    }
}
