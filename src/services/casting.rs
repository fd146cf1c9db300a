use crate::core::state::{Character, DialogueSegment};
use crate::services::llm::LlmClient;
use crate::services::script::strip_code_blocks;
use crate::services::tts::Voice;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const SAMPLE_LINES_PER_CHARACTER: usize = 3;
const SAMPLE_LINE_CHARS: usize = 160;

/// Assigns a synthesis voice to every character of a roster.
#[async_trait]
pub trait Caster: Send + Sync {
    async fn cast(
        &self,
        segments: &[DialogueSegment],
        characters: &[Character],
    ) -> Result<Vec<Character>>;
}

pub struct LlmCaster {
    llm: Arc<dyn LlmClient>,
    voices: Vec<Voice>,
    narrator_voice: Option<String>,
}

#[derive(Serialize)]
struct CastingSheet<'a> {
    name: &'a str,
    description: &'a str,
    sample_lines: Vec<String>,
}

#[derive(Deserialize)]
struct CastingReply {
    #[serde(default)]
    characters: Vec<CastingPick>,
}

#[derive(Deserialize)]
struct CastingPick {
    name: String,
    #[serde(default)]
    voice_id: Option<String>,
}

impl LlmCaster {
    pub fn new(llm: Arc<dyn LlmClient>, voices: Vec<Voice>, narrator_voice: Option<String>) -> Self {
        Self {
            llm,
            voices,
            narrator_voice,
        }
    }

    fn prompt(&self, segments: &[DialogueSegment], characters: &[Character]) -> Result<String> {
        let sheets: Vec<CastingSheet> = characters
            .iter()
            .map(|c| CastingSheet {
                name: &c.name,
                description: &c.description,
                sample_lines: segments
                    .iter()
                    .filter(|s| s.character == c.name)
                    .take(SAMPLE_LINES_PER_CHARACTER)
                    .map(|s| s.text.chars().take(SAMPLE_LINE_CHARS).collect())
                    .collect(),
            })
            .collect();

        let voice_list = self
            .voices
            .iter()
            .map(|v| format!("{} ({}, {})", v.id, v.gender, v.style))
            .collect::<Vec<_>>()
            .join("\n");

        let narrator_hint = match &self.narrator_voice {
            Some(v) => format!("The narrator is already cast as \"{}\"; do not give that voice to anyone else.", v),
            None => "Give the narrator a clear, neutral storytelling voice.".to_string(),
        };

        Ok(format!(
            "Cast a voice for every character of this story.\n\
            \n\
            Characters:\n{}\n\
            \n\
            Available voices (id, gender, style):\n{}\n\
            \n\
            Rules:\n\
            - Use only voice ids from the list.\n\
            - Match gender and temperament to each character's profile and lines.\n\
            - Avoid giving the same voice to two characters while unused voices remain.\n\
            - {}\n\
            \n\
            Return a JSON object: {{ \"characters\": [ {{ \"name\": \"...\", \"voice_id\": \"...\" }} ] }}",
            serde_json::to_string_pretty(&sheets)?,
            voice_list,
            narrator_hint
        ))
    }

    fn is_known_voice(&self, id: &str) -> bool {
        self.voices.is_empty() || self.voices.iter().any(|v| v.id == id)
    }

    /// Unused voices first, then any voice other than the narrator's.
    fn pick_spare_voice(&self, used: &HashSet<String>) -> Option<String> {
        let narrator = self.narrator_voice.as_deref();
        let unused: Vec<&Voice> = self
            .voices
            .iter()
            .filter(|v| !used.contains(&v.id) && Some(v.id.as_str()) != narrator)
            .collect();
        let pool: Vec<&Voice> = if unused.is_empty() {
            self.voices
                .iter()
                .filter(|v| Some(v.id.as_str()) != narrator)
                .collect()
        } else {
            unused
        };
        pool.choose(&mut rand::rng())
            .map(|v| v.id.clone())
            .or_else(|| self.voices.first().map(|v| v.id.clone()))
    }

    fn merge(&self, characters: &[Character], reply: CastingReply) -> Result<Vec<Character>> {
        let picks: HashMap<String, String> = reply
            .characters
            .into_iter()
            .filter_map(|p| p.voice_id.map(|v| (p.name, v.trim().to_string())))
            .filter(|(_, v)| !v.is_empty())
            .collect();

        let mut cast: Vec<Character> = characters
            .iter()
            .map(|c| {
                let mut c = c.clone();
                if c.is_narrator() && self.narrator_voice.is_some() {
                    c.voice_id = self.narrator_voice.clone();
                } else if let Some(pick) = picks.get(&c.name) {
                    if self.is_known_voice(pick) {
                        c.voice_id = Some(pick.clone());
                    } else {
                        warn!("Casting picked unknown voice {} for {}", pick, c.name);
                    }
                }
                c
            })
            .collect();

        let mut used: HashSet<String> = cast.iter().filter_map(|c| c.voice_id.clone()).collect();
        for c in cast.iter_mut().filter(|c| c.voice_id.is_none()) {
            let voice = self
                .pick_spare_voice(&used)
                .ok_or_else(|| anyhow!("No voice available to cast {}", c.name))?;
            debug!("Falling back to voice {} for {}", voice, c.name);
            used.insert(voice.clone());
            c.voice_id = Some(voice);
        }

        Ok(cast)
    }
}

#[async_trait]
impl Caster for LlmCaster {
    async fn cast(
        &self,
        segments: &[DialogueSegment],
        characters: &[Character],
    ) -> Result<Vec<Character>> {
        let prompt = self.prompt(segments, characters)?;
        let response = self
            .llm
            .chat("You are a voice casting director. Reply with valid JSON only.", &prompt)
            .await?;
        let clean_json = strip_code_blocks(&response);
        let reply: CastingReply = serde_json::from_str(&clean_json)
            .with_context(|| format!("Failed to parse casting JSON: {}", clean_json))?;
        self.merge(characters, reply)
    }
}
