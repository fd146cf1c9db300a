use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reserved roster name for non-dialogue narrative text.
pub const NARRATOR: &str = "Narrator";

pub fn is_narrator(name: &str) -> bool {
    name.trim().eq_ignore_ascii_case(NARRATOR)
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Story {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Story {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            owner_id: None,
            created_at: None,
            updated_at: None,
        }
    }
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Character {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub voice_id: Option<String>,
}

impl Character {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            voice_id: None,
        }
    }

    pub fn is_narrator(&self) -> bool {
        is_narrator(&self.name)
    }
}

/// One ordered unit of story text attributed to a single character.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DialogueSegment {
    pub index: usize,
    pub character: String,
    pub text: String,
    #[serde(default)]
    pub emotion: Option<String>,
}

impl DialogueSegment {
    pub fn new(index: usize, character: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            index,
            character: character.into(),
            text: text.into(),
            emotion: None,
        }
    }

    pub fn with_emotion(&self, emotion: impl Into<String>) -> Self {
        Self {
            emotion: Some(emotion.into()),
            ..self.clone()
        }
    }

    /// Same position, speaker and text; the emotion label is ignored.
    pub fn same_line(&self, other: &DialogueSegment) -> bool {
        self.index == other.index && self.character == other.character && self.text == other.text
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Segmentation {
    pub segments: Vec<DialogueSegment>,
    pub characters: Vec<Character>,
}

/// Audio for one chunk, together with the tagged segments it covers.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NarrationChunk {
    #[serde(skip)]
    pub index: usize,
    pub audio_data_uri: String,
    pub segments: Vec<DialogueSegment>,
}

pub fn find_character<'a>(roster: &'a [Character], name: &str) -> Option<&'a Character> {
    roster.iter().find(|c| c.name == name)
}
