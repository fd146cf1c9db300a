//! Story store: where the pipeline reads raw story text from.

use crate::core::io::Storage;
use crate::core::state::Story;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

#[async_trait]
pub trait StoryStore: Send + Sync {
    /// `Ok(None)` when the id does not resolve.
    async fn get_story(&self, id: &str) -> Result<Option<Story>>;
}

/// Stories kept as `<id>.json` (full record) or `<id>.txt` (text only).
pub struct FileStoryStore {
    folder: String,
    storage: Arc<dyn Storage>,
}

impl FileStoryStore {
    pub fn new(folder: impl Into<String>, storage: Arc<dyn Storage>) -> Self {
        Self {
            folder: folder.into(),
            storage,
        }
    }

    fn path_for(&self, id: &str, ext: &str) -> String {
        Path::new(&self.folder)
            .join(format!("{}.{}", id, ext))
            .to_string_lossy()
            .to_string()
    }

    pub async fn list_ids(&self) -> Result<Vec<String>> {
        let entries = self.storage.list(&self.folder).await?;
        let mut ids: Vec<String> = entries
            .iter()
            .map(Path::new)
            .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("json" | "txt")))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().to_string()))
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

fn is_plain_id(id: &str) -> bool {
    !id.is_empty() && !id.contains(['/', '\\']) && !id.contains("..")
}

#[async_trait]
impl StoryStore for FileStoryStore {
    async fn get_story(&self, id: &str) -> Result<Option<Story>> {
        if !is_plain_id(id) {
            return Ok(None);
        }

        let json_path = self.path_for(id, "json");
        if self.storage.exists(&json_path).await? {
            let bytes = self.storage.read(&json_path).await?;
            let story: Story = serde_json::from_slice(&bytes)
                .with_context(|| format!("Failed to parse story file {}", json_path))?;
            return Ok(Some(story));
        }

        let txt_path = self.path_for(id, "txt");
        if self.storage.exists(&txt_path).await? {
            let bytes = self.storage.read(&txt_path).await?;
            let text = String::from_utf8(bytes)
                .with_context(|| format!("Story file {} is not UTF-8", txt_path))?;
            return Ok(Some(Story::new(id, text)));
        }

        Ok(None)
    }
}

#[derive(Default)]
pub struct MemoryStoryStore {
    stories: RwLock<HashMap<String, Story>>,
}

impl MemoryStoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, story: Story) {
        if let Ok(mut stories) = self.stories.write() {
            stories.insert(story.id.clone(), story);
        }
    }
}

#[async_trait]
impl StoryStore for MemoryStoryStore {
    async fn get_story(&self, id: &str) -> Result<Option<Story>> {
        let stories = self
            .stories
            .read()
            .map_err(|_| anyhow::anyhow!("story map lock poisoned"))?;
        Ok(stories.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use std::fs;

    #[tokio::test]
    async fn test_file_store_reads_json_then_txt() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let folder = dir.path().join("stories");
        fs::create_dir_all(&folder)?;
        fs::write(
            folder.join("night.json"),
            r#"{"id": "night", "text": "It was dark.", "owner_id": "u1",
                "created_at": "2024-05-01T10:00:00Z"}"#,
        )?;
        fs::write(folder.join("day.txt"), "It was bright.")?;

        let store = FileStoryStore::new(
            folder.to_string_lossy().to_string(),
            Arc::new(NativeStorage::new()),
        );

        let night = store.get_story("night").await?.unwrap();
        assert_eq!(night.owner_id.as_deref(), Some("u1"));
        assert!(night.created_at.is_some());

        let day = store.get_story("day").await?.unwrap();
        assert_eq!(day.text, "It was bright.");
        assert_eq!(day.id, "day");

        assert!(store.get_story("missing").await?.is_none());
        assert!(store.get_story("../night").await?.is_none());

        assert_eq!(store.list_ids().await?, vec!["day", "night"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_file_store_reports_corrupt_json() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("bad.json"), "{ not json")?;
        let store = FileStoryStore::new(
            dir.path().to_string_lossy().to_string(),
            Arc::new(NativeStorage::new()),
        );
        assert!(store.get_story("bad").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_memory_store() -> Result<()> {
        let store = MemoryStoryStore::new();
        store.insert(Story::new("a", "text"));
        assert_eq!(store.get_story("a").await?.unwrap().text, "text");
        assert!(store.get_story("b").await?.is_none());
        Ok(())
    }
}
