//! Gemini native speech generation.
//!
//! Gemini accepts at most two named speakers per request, so a batch with two
//! or fewer distinct speakers becomes one conversation request; larger casts
//! are spoken one segment at a time and the PCM is joined.

use crate::core::state::{Character, DialogueSegment};
use crate::services::llm::gemini_url;
use crate::services::tts::{emotion_of, voice_for, SpeechSynthesizer, Voice};
use crate::utils::audio::{pcm_to_wav, to_data_uri, WAV_MIME};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::debug;
use serde::{Deserialize, Serialize};

const DEFAULT_SAMPLE_RATE: u32 = 24_000;
const MAX_SPEAKERS_PER_REQUEST: usize = 2;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiTtsConfig {
    pub api_key: String,
    #[serde(default = "default_tts_model")]
    pub model: String,
    pub narrator_voice: Option<String>,
}

fn default_tts_model() -> String {
    "gemini-2.5-flash-preview-tts".to_string()
}

impl Default for GeminiTtsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_tts_model(),
            narrator_voice: None,
        }
    }
}

const PREBUILT_VOICES: &[(&str, &str, &str)] = &[
    ("Zephyr", "Female", "Bright"),
    ("Puck", "Male", "Upbeat"),
    ("Charon", "Male", "Informative"),
    ("Kore", "Female", "Firm"),
    ("Fenrir", "Male", "Excitable"),
    ("Leda", "Female", "Youthful"),
    ("Orus", "Male", "Firm"),
    ("Aoede", "Female", "Breezy"),
    ("Callirrhoe", "Female", "Easy-going"),
    ("Autonoe", "Female", "Bright"),
    ("Enceladus", "Male", "Breathy"),
    ("Iapetus", "Male", "Clear"),
    ("Umbriel", "Male", "Easy-going"),
    ("Algieba", "Male", "Smooth"),
    ("Despina", "Female", "Smooth"),
    ("Erinome", "Female", "Clear"),
    ("Algenib", "Male", "Gravelly"),
    ("Rasalgethi", "Male", "Informative"),
    ("Laomedeia", "Female", "Upbeat"),
    ("Achernar", "Female", "Soft"),
    ("Alnilam", "Male", "Firm"),
    ("Schedar", "Male", "Even"),
    ("Gacrux", "Female", "Mature"),
    ("Pulcherrima", "Female", "Forward"),
    ("Achird", "Male", "Friendly"),
    ("Zubenelgenubi", "Male", "Casual"),
    ("Vindemiatrix", "Female", "Gentle"),
    ("Sadachbia", "Male", "Lively"),
    ("Sadaltager", "Male", "Knowledgeable"),
    ("Sulafat", "Female", "Warm"),
];

// --- Wire types ---

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct TtsRequest {
    contents: Vec<TtsContent>,
    generation_config: TtsGenerationConfig,
}

#[derive(Serialize, Debug)]
struct TtsContent {
    parts: Vec<TtsPart>,
}

#[derive(Serialize, Debug)]
struct TtsPart {
    text: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct TtsGenerationConfig {
    response_modalities: Vec<String>,
    speech_config: SpeechConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
enum SpeechConfig {
    VoiceConfig(VoiceConfig),
    MultiSpeakerVoiceConfig {
        #[serde(rename = "speakerVoiceConfigs")]
        speaker_voice_configs: Vec<SpeakerVoiceConfig>,
    },
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SpeakerVoiceConfig {
    speaker: String,
    voice_config: VoiceConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

impl VoiceConfig {
    fn prebuilt(voice: &str) -> Self {
        Self {
            prebuilt_voice_config: PrebuiltVoiceConfig {
                voice_name: voice.to_string(),
            },
        }
    }
}

impl TtsRequest {
    fn new(transcript: String, speech_config: SpeechConfig) -> Self {
        Self {
            contents: vec![TtsContent {
                parts: vec![TtsPart { text: transcript }],
            }],
            generation_config: TtsGenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config,
            },
        }
    }
}

#[derive(Deserialize)]
struct TtsResponse {
    candidates: Option<Vec<TtsCandidate>>,
    error: Option<TtsError>,
}

#[derive(Deserialize)]
struct TtsCandidate {
    content: Option<TtsContentResponse>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct TtsContentResponse {
    #[serde(default)]
    parts: Vec<TtsPartResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TtsPartResponse {
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
struct TtsError {
    message: String,
}

/// Raw PCM plus its sample rate.
struct PcmAudio {
    sample_rate: u32,
    pcm: Vec<u8>,
}

fn sample_rate_of(mime_type: &str) -> u32 {
    mime_type
        .split(';')
        .filter_map(|p| p.trim().strip_prefix("rate="))
        .find_map(|r| r.parse().ok())
        .unwrap_or(DEFAULT_SAMPLE_RATE)
}

impl TtsResponse {
    fn into_pcm(self) -> Result<PcmAudio> {
        if let Some(err) = self.error {
            return Err(anyhow!("Gemini TTS returned error: {}", err.message));
        }
        let first = self
            .candidates
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| anyhow!("Gemini TTS response has no candidates"))?;
        let reason = first.finish_reason.unwrap_or_else(|| "UNKNOWN".to_string());
        let inline = first
            .content
            .and_then(|c| c.parts.into_iter().find_map(|p| p.inline_data))
            .ok_or_else(|| anyhow!("Gemini TTS returned no audio. Finish reason: {}", reason))?;

        let pcm = STANDARD
            .decode(inline.data.as_bytes())
            .context("Gemini TTS audio is not valid base64")?;
        Ok(PcmAudio {
            sample_rate: sample_rate_of(&inline.mime_type),
            pcm,
        })
    }
}

// --- Client ---

pub struct GeminiSynthesizer {
    config: GeminiTtsConfig,
    client: reqwest::Client,
}

impl GeminiSynthesizer {
    pub fn new(config: GeminiTtsConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn resolve_voice(&self, segment: &DialogueSegment, characters: &[Character]) -> String {
        voice_for(
            segment,
            characters,
            self.config.narrator_voice.as_deref(),
            PREBUILT_VOICES[0].0,
        )
    }

    fn plan_requests(
        &self,
        segments: &[DialogueSegment],
        characters: &[Character],
    ) -> Vec<TtsRequest> {
        let mut speakers: Vec<(&str, String)> = Vec::new();
        for s in segments {
            if !speakers.iter().any(|(name, _)| *name == s.character) {
                speakers.push((s.character.as_str(), self.resolve_voice(s, characters)));
            }
        }

        match speakers.len() {
            0 => Vec::new(),
            1 => {
                let transcript = segments
                    .iter()
                    .map(|s| format!("({}) {}", emotion_of(s), s.text))
                    .collect::<Vec<_>>()
                    .join("\n");
                vec![TtsRequest::new(
                    format!("Read aloud, following each line's delivery cue:\n{}", transcript),
                    SpeechConfig::VoiceConfig(VoiceConfig::prebuilt(&speakers[0].1)),
                )]
            }
            n if n <= MAX_SPEAKERS_PER_REQUEST => {
                let transcript = segments
                    .iter()
                    .map(|s| format!("{}: ({}) {}", s.character, emotion_of(s), s.text))
                    .collect::<Vec<_>>()
                    .join("\n");
                let speaker_voice_configs = speakers
                    .iter()
                    .map(|(name, voice)| SpeakerVoiceConfig {
                        speaker: name.to_string(),
                        voice_config: VoiceConfig::prebuilt(voice),
                    })
                    .collect();
                vec![TtsRequest::new(
                    format!("Perform this scene, following each line's delivery cue:\n{}", transcript),
                    SpeechConfig::MultiSpeakerVoiceConfig {
                        speaker_voice_configs,
                    },
                )]
            }
            _ => segments
                .iter()
                .map(|s| {
                    TtsRequest::new(
                        format!("Say in a {} tone: {}", emotion_of(s), s.text),
                        SpeechConfig::VoiceConfig(VoiceConfig::prebuilt(
                            &self.resolve_voice(s, characters),
                        )),
                    )
                })
                .collect(),
        }
    }

    async fn send(&self, request: &TtsRequest) -> Result<PcmAudio> {
        let url = gemini_url(&self.config.model, "generateContent", &self.config.api_key)?;
        let resp = self.client.post(url).json(request).send().await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Gemini TTS API error: {}", error_text));
        }

        let body = resp.text().await?;
        let parsed: TtsResponse =
            serde_json::from_str(&body).context("Failed to parse Gemini TTS response")?;
        parsed.into_pcm()
    }
}

#[async_trait]
impl SpeechSynthesizer for GeminiSynthesizer {
    async fn synthesize(
        &self,
        segments: &[DialogueSegment],
        characters: &[Character],
    ) -> Result<String> {
        let requests = self.plan_requests(segments, characters);
        if requests.is_empty() {
            return Err(anyhow!("Nothing to synthesize"));
        }
        debug!(
            "Gemini TTS: {} segments in {} request(s)",
            segments.len(),
            requests.len()
        );

        let mut sample_rate = None;
        let mut pcm = Vec::new();
        for request in &requests {
            let audio = self.send(request).await?;
            match sample_rate {
                None => sample_rate = Some(audio.sample_rate),
                Some(rate) if rate != audio.sample_rate => {
                    return Err(anyhow!(
                        "Gemini TTS changed sample rate mid-batch ({} vs {})",
                        rate,
                        audio.sample_rate
                    ))
                }
                Some(_) => {}
            }
            pcm.extend_from_slice(&audio.pcm);
        }

        let wav = pcm_to_wav(&pcm, sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE), 1)?;
        Ok(to_data_uri(WAV_MIME, &wav))
    }

    fn voices(&self) -> Vec<Voice> {
        PREBUILT_VOICES
            .iter()
            .map(|(id, gender, style)| Voice::new(id, gender, style))
            .collect()
    }

    fn narrator_voice(&self) -> Option<String> {
        self.config.narrator_voice.clone()
    }
}
