use crate::core::state::{Character, DialogueSegment};
use crate::services::tts::{emotion_of, voice_for, SpeechSynthesizer, Voice};
use crate::utils::audio::{pcm_to_wav, to_data_uri, WAV_MIME};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

/// `/audio/speech` with `response_format: pcm` yields 24 kHz mono s16le.
const PCM_SAMPLE_RATE: u32 = 24_000;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAiTtsConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    pub narrator_voice: Option<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_model() -> String {
    "gpt-4o-mini-tts".to_string()
}
fn default_concurrency() -> usize {
    3
}

const VOICES: &[(&str, &str, &str)] = &[
    ("alloy", "Neutral", "Balanced"),
    ("ash", "Male", "Clear"),
    ("ballad", "Male", "Melodic"),
    ("coral", "Female", "Warm"),
    ("echo", "Male", "Resonant"),
    ("fable", "Neutral", "Storyteller"),
    ("nova", "Female", "Bright"),
    ("onyx", "Male", "Deep"),
    ("sage", "Female", "Calm"),
    ("shimmer", "Female", "Soft"),
    ("verse", "Male", "Expressive"),
];

#[derive(Serialize, Debug)]
struct SpeechRequest {
    model: String,
    voice: String,
    input: String,
    instructions: String,
    response_format: String,
}

pub struct OpenAiSynthesizer {
    config: OpenAiTtsConfig,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiSynthesizer {
    pub fn new(config: OpenAiTtsConfig) -> Self {
        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1")
            .trim_end_matches('/')
            .to_string();
        Self {
            config,
            base_url,
            client: reqwest::Client::new(),
        }
    }

    fn request_for(&self, segment: &DialogueSegment, characters: &[Character]) -> SpeechRequest {
        let voice = voice_for(
            segment,
            characters,
            self.config.narrator_voice.as_deref(),
            VOICES[0].0,
        );
        SpeechRequest {
            model: self.config.model.clone(),
            voice,
            input: segment.text.clone(),
            instructions: format!(
                "Speak as {}. Emotion: {}.",
                segment.character,
                emotion_of(segment)
            ),
            response_format: "pcm".to_string(),
        }
    }

    async fn send(&self, request: SpeechRequest) -> Result<Vec<u8>> {
        let url = format!("{}/audio/speech", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("OpenAI TTS API error: {}", error_text));
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSynthesizer {
    async fn synthesize(
        &self,
        segments: &[DialogueSegment],
        characters: &[Character],
    ) -> Result<String> {
        if segments.is_empty() {
            return Err(anyhow!("Nothing to synthesize"));
        }

        let requests: Vec<SpeechRequest> = segments
            .iter()
            .map(|s| self.request_for(s, characters))
            .collect();

        // `buffered` keeps results in segment order.
        let parts: Vec<Vec<u8>> = futures_util::stream::iter(requests)
            .map(|r| self.send(r))
            .buffered(self.config.concurrency.max(1))
            .try_collect()
            .await?;

        let wav = pcm_to_wav(&parts.concat(), PCM_SAMPLE_RATE, 1)?;
        Ok(to_data_uri(WAV_MIME, &wav))
    }

    fn voices(&self) -> Vec<Voice> {
        VOICES
            .iter()
            .map(|(id, gender, style)| Voice::new(id, gender, style))
            .collect()
    }

    fn narrator_voice(&self) -> Option<String> {
        self.config.narrator_voice.clone()
    }
}
