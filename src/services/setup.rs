use crate::core::config::Config;
use crate::services::tts::create_synthesizer;
use crate::services::tts::Voice;
use anyhow::{anyhow, Result};
use inquire::Select;
use log::info;

/// Asks for a narrator voice when the active TTS provider has none and the
/// run is interactive. The choice is written back to `config.yml`.
pub fn run_setup(config: &mut Config) -> Result<()> {
    if config.unattended || !needs_narrator_voice(config)? {
        return Ok(());
    }

    let voices = create_synthesizer(config)?.voices();
    if voices.is_empty() {
        return Err(anyhow!(
            "No voices available for provider: {}",
            config.audio.provider
        ));
    }

    let voice = select_voice("Select Narrator Voice:", &voices)?;
    info!("Narrator voice set to {}", voice);
    set_narrator_voice(config, voice)?;

    config.save()?;
    println!("Configuration saved.");
    Ok(())
}

fn needs_narrator_voice(config: &Config) -> Result<bool> {
    match config.audio.provider.as_str() {
        "gemini" => Ok(config
            .audio
            .gemini
            .as_ref()
            .is_some_and(|c| c.narrator_voice.is_none())),
        "openai" => Ok(config
            .audio
            .openai
            .as_ref()
            .is_some_and(|c| c.narrator_voice.is_none())),
        other => Err(anyhow!("Unknown TTS provider: {}", other)),
    }
}

fn set_narrator_voice(config: &mut Config, voice: String) -> Result<()> {
    let slot = match config.audio.provider.as_str() {
        "gemini" => config.audio.gemini.as_mut().map(|c| &mut c.narrator_voice),
        "openai" => config.audio.openai.as_mut().map(|c| &mut c.narrator_voice),
        _ => None,
    };
    let slot = slot.ok_or_else(|| anyhow!("TTS provider config missing"))?;
    *slot = Some(voice);
    Ok(())
}

fn voice_label(voice: &Voice) -> String {
    format!("{} ({}) - {}", voice.id, voice.gender, voice.style)
}

fn select_voice(prompt: &str, voices: &[Voice]) -> Result<String> {
    let options: Vec<String> = voices.iter().map(voice_label).collect();
    let selection = Select::new(prompt, options).prompt()?;

    selection
        .split_whitespace()
        .next()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Empty voice selection"))
}
