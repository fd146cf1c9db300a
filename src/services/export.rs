use crate::core::io::Storage;
use crate::services::workflow::NarrationPipeline;
use crate::utils::audio::{decode_data_uri, merge_wav};
use anyhow::{Context, Result};
use log::info;
use std::path::Path;
use std::sync::Arc;

/// Where a finished narration ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrationExport {
    pub output_path: String,
    pub chunks: usize,
}

fn chunk_path(output_folder: &str, story_id: &str, index: usize) -> String {
    Path::new(output_folder)
        .join(story_id)
        .join(format!("chunk_{:04}.wav", index))
        .to_string_lossy()
        .to_string()
}

/// Streams the narration of `story_id` into `<output>/<id>/chunk_NNNN.wav`,
/// one file per chunk as it arrives, then merges them into `<output>/<id>.wav`
/// and removes the chunk files.
///
/// If a chunk cannot be written the stream is dropped, which stops the
/// pipeline after the stage call in flight. Chunks written before any
/// failure are left in place.
pub async fn export_narration<F>(
    pipeline: &Arc<NarrationPipeline>,
    storage: &Arc<dyn Storage>,
    output_folder: &str,
    story_id: &str,
    mut on_chunk_written: F,
) -> Result<NarrationExport>
where
    F: FnMut(usize),
{
    let mut rx = pipeline.narration_stream(story_id);
    let mut written: Vec<String> = Vec::new();

    while let Some(item) = rx.recv().await {
        let chunk = item?;
        let path = chunk_path(output_folder, story_id, chunk.index);
        let (_, bytes) = decode_data_uri(&chunk.audio_data_uri)
            .with_context(|| format!("Chunk {} of {} carries no audio", chunk.index, story_id))?;
        storage
            .write(&path, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", path))?;
        written.push(path);
        on_chunk_written(written.len());
    }

    let mut parts = Vec::with_capacity(written.len());
    for path in &written {
        parts.push(storage.read(path).await?);
    }
    let merged = merge_wav(&parts)?;

    let output_path = Path::new(output_folder)
        .join(format!("{}.wav", story_id))
        .to_string_lossy()
        .to_string();
    storage
        .write(&output_path, &merged)
        .await
        .with_context(|| format!("Failed to write {}", output_path))?;

    for path in &written {
        storage.delete(path).await?;
    }
    info!("Story {} narrated to {}", story_id, output_path);

    Ok(NarrationExport {
        output_path,
        chunks: written.len(),
    })
}
