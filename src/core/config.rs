use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::services::llm::LlmConfig;
use crate::services::tts::gemini::GeminiTtsConfig;
use crate::services::tts::openai::OpenAiTtsConfig;
use crate::services::workflow::CHUNK_SIZE;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_stories")]
    pub story_folder: String,

    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default)]
    pub unattended: bool,

    pub llm: LlmConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AudioConfig {
    #[serde(default = "default_tts_provider")]
    pub provider: String,

    pub gemini: Option<GeminiTtsConfig>,
    pub openai: Option<OpenAiTtsConfig>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            provider: default_tts_provider(),
            gemini: None,
            openai: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_stories() -> String {
    "stories".to_string()
}
fn default_output() -> String {
    "output".to_string()
}
fn default_tts_provider() -> String {
    "gemini".to_string()
}
fn default_chunk_size() -> usize {
    CHUNK_SIZE
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config.yml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write("config.yml", content).context("Failed to write config.yml")?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.chunk_size == 0 {
            anyhow::bail!("pipeline.chunk_size must be at least 1");
        }
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.story_folder)?;
        fs::create_dir_all(&self.output_folder)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.yml");
        fs::write(
            &path,
            "llm:\n  provider: gemini\n  gemini:\n    api_key: k\n    model: gemini-2.5-flash\n",
        )?;

        let config = Config::load_from(&path)?;
        assert_eq!(config.story_folder, "stories");
        assert_eq!(config.output_folder, "output");
        assert_eq!(config.pipeline.chunk_size, 5);
        assert_eq!(config.llm.retry_count, 3);
        assert_eq!(config.audio.provider, "gemini");
        assert!(config.audio.gemini.is_none());
        Ok(())
    }

    #[test]
    fn test_zero_chunk_size_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.yml");
        fs::write(
            &path,
            "llm:\n  provider: ollama\n  ollama:\n    base_url: http://localhost:11434\n    model: m\npipeline:\n  chunk_size: 0\n",
        )?;

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("chunk_size"));
        Ok(())
    }

    #[test]
    fn test_missing_config_file() {
        let err = Config::load_from(Path::new("/nonexistent/config.yml")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
