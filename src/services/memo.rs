//! Per-run deduplication of the whole-story stages.

use crate::core::state::{Character, DialogueSegment, Segmentation};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;

/// Records the output of a stage for each distinct input seen. Failed calls
/// are not recorded, so a later call with the same input runs again.
pub struct StageCache<I, O> {
    entries: HashMap<I, O>,
}

impl<I, O> Default for StageCache<I, O> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<I, O> StageCache<I, O>
where
    I: Eq + Hash + Clone,
    O: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_try_insert_with<F, Fut, E>(&mut self, input: I, f: F) -> Result<O, E>
    where
        F: FnOnce(I) -> Fut,
        Fut: Future<Output = Result<O, E>>,
    {
        if let Some(hit) = self.entries.get(&input) {
            return Ok(hit.clone());
        }
        let output = f(input.clone()).await?;
        self.entries.insert(input, output.clone());
        Ok(output)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub type CastingInput = (Vec<DialogueSegment>, Vec<Character>);

/// Cache scope for one pipeline run, or for several runs made while
/// serving one request. Nothing outlives the scope.
#[derive(Default)]
pub struct RunScope {
    pub segmentation: StageCache<String, Segmentation>,
    pub casting: StageCache<CastingInput, Vec<Character>>,
}

impl RunScope {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test]
    async fn test_equal_input_hits_cache() {
        let calls = &Cell::new(0);
        let mut cache: StageCache<String, usize> = StageCache::new();

        for _ in 0..3 {
            let out: Result<usize, ()> = cache
                .get_or_try_insert_with("It was dark.".to_string(), |text| async move {
                    calls.set(calls.get() + 1);
                    Ok(text.len())
                })
                .await;
            assert_eq!(out, Ok(12));
        }
        assert_eq!(calls.get(), 1);

        let _: Result<usize, ()> = cache
            .get_or_try_insert_with("Silence.".to_string(), |text| async move {
                calls.set(calls.get() + 1);
                Ok(text.len())
            })
            .await;
        assert_eq!(calls.get(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let calls = &Cell::new(0);
        let mut cache: StageCache<u8, u8> = StageCache::new();

        let first: Result<u8, &str> = cache
            .get_or_try_insert_with(1, |_| async move {
                calls.set(calls.get() + 1);
                Err("timeout")
            })
            .await;
        assert_eq!(first, Err("timeout"));
        assert!(cache.is_empty());

        let second: Result<u8, &str> = cache
            .get_or_try_insert_with(1, |n| async move {
                calls.set(calls.get() + 1);
                Ok(n + 1)
            })
            .await;
        assert_eq!(second, Ok(2));
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn test_casting_key_is_structural() {
        let mut scope = RunScope::new();
        let segments = vec![DialogueSegment::new(0, "Alice", "Hello?")];
        let roster = vec![Character::new("Alice", "")];
        let calls = &Cell::new(0);

        for _ in 0..2 {
            let key = (segments.clone(), roster.clone());
            let _: Result<Vec<Character>, ()> = scope
                .casting
                .get_or_try_insert_with(key, |(_, chars)| async move {
                    calls.set(calls.get() + 1);
                    Ok(chars)
                })
                .await;
        }
        assert_eq!(calls.get(), 1);

        let tagged = vec![segments[0].with_emotion("afraid")];
        let _: Result<Vec<Character>, ()> = scope
            .casting
            .get_or_try_insert_with((tagged, roster), |(_, chars)| async move {
                calls.set(calls.get() + 1);
                Ok(chars)
            })
            .await;
        assert_eq!(calls.get(), 2);
    }
}
