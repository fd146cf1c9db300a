use anyhow::{anyhow, Result};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::Select;
use log::error;
use std::sync::Arc;
use std::time::Duration;
use storyvoice::core::config::Config;
use storyvoice::core::io::{NativeStorage, Storage};
use storyvoice::services::export::export_narration;
use storyvoice::services::llm::create_llm;
use storyvoice::services::setup::run_setup;
use storyvoice::services::store::FileStoryStore;
use storyvoice::services::workflow::NarrationPipeline;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let mut config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists with valid LLM and TTS settings.");
            return Err(e);
        }
    };

    config.ensure_directories()?;
    run_setup(&mut config)?;

    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
    let llm = create_llm(&config)?;
    let store = Arc::new(FileStoryStore::new(
        config.story_folder.clone(),
        storage.clone(),
    ));
    let pipeline = Arc::new(NarrationPipeline::from_config(&config, llm, store.clone())?);

    let mut story_ids: Vec<String> = std::env::args().skip(1).collect();
    if story_ids.is_empty() {
        let available = store.list_ids().await?;
        if available.is_empty() {
            return Err(anyhow!("No stories found in {}", config.story_folder));
        }
        story_ids = if config.unattended {
            available
        } else {
            vec![Select::new("Select a story to narrate:", available).prompt()?]
        };
    }

    let mut failed = 0;
    for id in &story_ids {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")?,
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        pb.set_message(format!("{}: preparing script", id));

        let result = export_narration(&pipeline, &storage, &config.output_folder, id, |n| {
            pb.set_message(format!("{}: {} chunks ready", id, n))
        })
        .await;

        match result {
            Ok(export) => pb.finish_with_message(format!(
                "{}: {} chunks -> {}",
                id, export.chunks, export.output_path
            )),
            Err(e) => {
                pb.abandon_with_message(format!("{}: failed", id));
                error!("Story {} failed: {:#}", id, e);
                eprintln!("Story {} failed: {:#}", id, e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(anyhow!("{} of {} stories failed", failed, story_ids.len()));
    }
    Ok(())
}
