use crate::core::config::Config;
use crate::core::error::{PipelineError, Stage};
use crate::core::state::{Character, DialogueSegment, NarrationChunk, Segmentation};
use crate::services::casting::{Caster, LlmCaster};
use crate::services::chunking::partition;
use crate::services::emotion::{EmotionTagger, LlmEmotionTagger};
use crate::services::llm::LlmClient;
use crate::services::memo::RunScope;
use crate::services::script::{LlmSegmenter, Segmenter};
use crate::services::store::StoryStore;
use crate::services::tts::{create_synthesizer, SpeechSynthesizer};
use anyhow::anyhow;
use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Segments per emotion-tagging and synthesis call.
pub const CHUNK_SIZE: usize = 5;

/// Where finished chunks go.
#[async_trait]
trait ChunkSink: Send {
    async fn deliver(&mut self, chunk: NarrationChunk) -> Result<(), PipelineError>;

    /// True once nobody is listening; no further stage calls are made.
    fn is_closed(&self) -> bool {
        false
    }
}

struct CallbackSink<F>(F);

#[async_trait]
impl<F> ChunkSink for CallbackSink<F>
where
    F: FnMut(NarrationChunk) + Send,
{
    async fn deliver(&mut self, chunk: NarrationChunk) -> Result<(), PipelineError> {
        (self.0)(chunk);
        Ok(())
    }
}

struct ChannelSink {
    tx: mpsc::Sender<Result<NarrationChunk, PipelineError>>,
}

#[async_trait]
impl ChunkSink for ChannelSink {
    async fn deliver(&mut self, chunk: NarrationChunk) -> Result<(), PipelineError> {
        self.tx
            .send(Ok(chunk))
            .await
            .map_err(|_| PipelineError::Cancelled)
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

fn ensure_open<S: ChunkSink>(sink: &S) -> Result<(), PipelineError> {
    if sink.is_closed() {
        info!("Narration consumer went away, stopping");
        return Err(PipelineError::Cancelled);
    }
    Ok(())
}

/// Casting keeps the roster as given, names and order included, and gives
/// every character a voice.
fn check_cast(characters: &[Character], cast: &[Character]) -> anyhow::Result<()> {
    if characters.len() != cast.len() {
        return Err(anyhow!(
            "expected {} cast characters, got {}",
            characters.len(),
            cast.len()
        ));
    }
    for (original, c) in characters.iter().zip(cast) {
        if original.name != c.name {
            return Err(anyhow!(
                "cast returned {} where {} was expected",
                c.name,
                original.name
            ));
        }
        if c.voice_id.as_deref().map_or(true, |v| v.trim().is_empty()) {
            return Err(anyhow!("{} has no voice assigned", c.name));
        }
    }
    Ok(())
}

/// The tagger must hand back the chunk it was given, in order, with every
/// segment labelled.
fn check_tagged(chunk: &[DialogueSegment], tagged: &[DialogueSegment]) -> anyhow::Result<()> {
    if chunk.len() != tagged.len() {
        return Err(anyhow!(
            "expected {} tagged segments, got {}",
            chunk.len(),
            tagged.len()
        ));
    }
    for (original, t) in chunk.iter().zip(tagged) {
        if !original.same_line(t) {
            return Err(anyhow!(
                "segment {} came back altered or out of order",
                original.index
            ));
        }
        if t.emotion.as_deref().map_or(true, |e| e.trim().is_empty()) {
            return Err(anyhow!("segment {} has no emotion label", t.index));
        }
    }
    Ok(())
}

/// Drives one story from raw text to a sequence of synthesized chunks.
pub struct NarrationPipeline {
    store: Arc<dyn StoryStore>,
    segmenter: Arc<dyn Segmenter>,
    caster: Arc<dyn Caster>,
    tagger: Arc<dyn EmotionTagger>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    chunk_size: usize,
}

impl NarrationPipeline {
    pub fn new(
        store: Arc<dyn StoryStore>,
        segmenter: Arc<dyn Segmenter>,
        caster: Arc<dyn Caster>,
        tagger: Arc<dyn EmotionTagger>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        Self {
            store,
            segmenter,
            caster,
            tagger,
            synthesizer,
            chunk_size: CHUNK_SIZE,
        }
    }

    /// LLM-backed stages and the configured TTS provider.
    pub fn from_config(
        config: &Config,
        llm: Arc<dyn LlmClient>,
        store: Arc<dyn StoryStore>,
    ) -> anyhow::Result<Self> {
        let synthesizer = create_synthesizer(config)?;
        let caster = LlmCaster::new(
            llm.clone(),
            synthesizer.voices(),
            synthesizer.narrator_voice(),
        );
        Ok(Self::new(
            store,
            Arc::new(LlmSegmenter::new(llm.clone())),
            Arc::new(caster),
            Arc::new(LlmEmotionTagger::new(llm)),
            synthesizer,
        )
        .with_chunk_size(config.pipeline.chunk_size))
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Runs the pipeline for `story_id`, calling `on_chunk_ready` once per
    /// chunk, in story order, before the next chunk is started. On error,
    /// chunks already handed over stay delivered.
    pub async fn produce_narration<F>(
        &self,
        story_id: &str,
        on_chunk_ready: F,
    ) -> Result<(), PipelineError>
    where
        F: FnMut(NarrationChunk) + Send,
    {
        let mut scope = RunScope::new();
        self.produce_narration_in(&mut scope, story_id, on_chunk_ready)
            .await
    }

    /// Same as [`produce_narration`](Self::produce_narration), with segmentation
    /// and casting results shared through a caller-owned scope.
    pub async fn produce_narration_in<F>(
        &self,
        scope: &mut RunScope,
        story_id: &str,
        on_chunk_ready: F,
    ) -> Result<(), PipelineError>
    where
        F: FnMut(NarrationChunk) + Send,
    {
        let mut sink = CallbackSink(on_chunk_ready);
        self.drive(scope, story_id, &mut sink).await
    }

    /// Runs the pipeline on a background task. Chunks arrive in order; a
    /// failure arrives as the final item. Dropping the receiver stops the run
    /// once the stage call in flight settles.
    pub fn narration_stream(
        self: &Arc<Self>,
        story_id: &str,
    ) -> mpsc::Receiver<Result<NarrationChunk, PipelineError>> {
        let (tx, rx) = mpsc::channel(1);
        let pipeline = Arc::clone(self);
        let story_id = story_id.to_string();

        tokio::spawn(async move {
            let mut scope = RunScope::new();
            let mut sink = ChannelSink { tx: tx.clone() };
            match pipeline.drive(&mut scope, &story_id, &mut sink).await {
                Ok(()) | Err(PipelineError::Cancelled) => {}
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                }
            }
        });

        rx
    }

    async fn drive<S: ChunkSink>(
        &self,
        scope: &mut RunScope,
        story_id: &str,
        sink: &mut S,
    ) -> Result<(), PipelineError> {
        if self.chunk_size == 0 {
            return Err(PipelineError::Validation(
                "chunk size must be at least 1".to_string(),
            ));
        }

        let story = self
            .store
            .get_story(story_id)
            .await
            .map_err(PipelineError::Store)?
            .ok_or_else(|| PipelineError::NotFound(story_id.to_string()))?;
        if story.text.trim().is_empty() {
            return Err(PipelineError::Validation(format!(
                "story {} has no text",
                story_id
            )));
        }
        info!("Narrating story {} ({} bytes)", story_id, story.text.len());

        ensure_open(sink)?;
        let segmenter = &self.segmenter;
        let Segmentation {
            segments,
            characters,
        } = scope
            .segmentation
            .get_or_try_insert_with(story.text, |text| async move {
                segmenter.segment(&text).await
            })
            .await
            .map_err(|e| PipelineError::stage(Stage::Segmentation, e))?;

        if segments.is_empty() {
            return Err(PipelineError::Validation(format!(
                "segmentation of story {} produced no segments",
                story_id
            )));
        }
        info!(
            "Segmented into {} segments, {} characters",
            segments.len(),
            characters.len()
        );

        ensure_open(sink)?;
        let caster = &self.caster;
        let cast = scope
            .casting
            .get_or_try_insert_with(
                (segments.clone(), characters.clone()),
                |(segments, characters)| async move { caster.cast(&segments, &characters).await },
            )
            .await
            .and_then(|cast| check_cast(&characters, &cast).map(|_| cast))
            .map_err(|e| PipelineError::stage(Stage::Casting, e))?;
        debug!(
            "Cast: {:?}",
            cast.iter()
                .map(|c| (c.name.as_str(), c.voice_id.as_deref()))
                .collect::<Vec<_>>()
        );

        let chunks = partition(&segments, self.chunk_size)?;
        let total = chunks.len();

        for (i, chunk) in chunks.into_iter().enumerate() {
            ensure_open(sink)?;
            let tagged = self
                .tagger
                .tag_emotions(&chunk, &characters)
                .await
                .and_then(|tagged| check_tagged(&chunk, &tagged).map(|_| tagged))
                .map_err(|e| PipelineError::stage(Stage::EmotionTagging, e))?;

            ensure_open(sink)?;
            let audio_data_uri = self
                .synthesizer
                .synthesize(&tagged, &cast)
                .await
                .and_then(|uri| {
                    if uri.is_empty() {
                        Err(anyhow!("synthesizer returned no audio"))
                    } else {
                        Ok(uri)
                    }
                })
                .map_err(|e| PipelineError::stage(Stage::SpeechSynthesis, e))?;

            sink.deliver(NarrationChunk {
                index: i,
                audio_data_uri,
                segments: tagged,
            })
            .await?;
            info!("Chunk {}/{} of story {} delivered", i + 1, total, story_id);
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::state::{Character, Story};
    use crate::services::store::MemoryStoryStore;
    use crate::services::tts::Voice;
    use crate::utils::audio::{pcm_to_wav, to_data_uri, WAV_MIME};
    use anyhow::Result;
    use std::sync::Mutex;
    use std::time::Duration;

    const SCENE: &str = "Narrator: It was dark.\nAlice: Hello?\nBob: Who's there?\nAlice: Answer me!\nNarrator: Silence.";

    #[derive(Clone, Default)]
    pub(crate) struct EventLog(Arc<Mutex<Vec<String>>>);

    impl EventLog {
        fn push(&self, event: String) {
            self.0.lock().unwrap().push(event);
        }
        fn events(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
        pub(crate) fn count(&self, prefix: &str) -> usize {
            self.events().iter().filter(|e| e.starts_with(prefix)).count()
        }
    }

    pub(crate) fn segmentation(n: usize) -> Segmentation {
        let speakers = ["Narrator", "Alice", "Bob"];
        Segmentation {
            segments: (0..n)
                .map(|i| DialogueSegment::new(i, speakers[i % 3], format!("line {}", i)))
                .collect(),
            characters: speakers
                .iter()
                .map(|name| Character::new(*name, format!("{} profile", name)))
                .collect(),
        }
    }

    fn scene_segmentation() -> Segmentation {
        let lines = [
            ("Narrator", "It was dark."),
            ("Alice", "Hello?"),
            ("Bob", "Who's there?"),
            ("Alice", "Answer me!"),
            ("Narrator", "Silence."),
        ];
        Segmentation {
            segments: lines
                .iter()
                .enumerate()
                .map(|(i, (who, text))| DialogueSegment::new(i, *who, *text))
                .collect(),
            characters: ["Narrator", "Alice", "Bob"]
                .iter()
                .map(|name| Character::new(*name, ""))
                .collect(),
        }
    }

    struct MockSegmenter {
        log: EventLog,
        result: Segmentation,
    }

    #[async_trait]
    impl Segmenter for MockSegmenter {
        async fn segment(&self, text: &str) -> Result<Segmentation> {
            self.log.push(format!("segment:{}", text.len()));
            Ok(self.result.clone())
        }
    }

    struct MockCaster {
        log: EventLog,
        drop_character: Option<&'static str>,
        voiceless: Option<&'static str>,
    }

    #[async_trait]
    impl Caster for MockCaster {
        async fn cast(
            &self,
            segments: &[DialogueSegment],
            characters: &[Character],
        ) -> Result<Vec<Character>> {
            self.log.push(format!("cast:{}", segments.len()));
            Ok(characters
                .iter()
                .filter(|c| Some(c.name.as_str()) != self.drop_character)
                .map(|c| Character {
                    voice_id: if Some(c.name.as_str()) == self.voiceless {
                        Some(String::new())
                    } else {
                        Some(format!("voice-{}", c.name))
                    },
                    ..c.clone()
                })
                .collect())
        }
    }

    struct MockTagger {
        log: EventLog,
        fail_on_call: Option<usize>,
        skip_labels: bool,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl EmotionTagger for MockTagger {
        async fn tag_emotions(
            &self,
            segments: &[DialogueSegment],
            characters: &[Character],
        ) -> Result<Vec<DialogueSegment>> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            self.log.push(format!("tag:{}", segments[0].index));
            assert!(
                characters.iter().all(|c| c.voice_id.is_none()),
                "tagging sees the uncast roster"
            );
            if self.fail_on_call == Some(call) {
                return Err(anyhow!("model overloaded"));
            }
            Ok(segments
                .iter()
                .map(|s| {
                    if self.skip_labels {
                        s.clone()
                    } else {
                        s.with_emotion(format!("mood-{}", s.index))
                    }
                })
                .collect())
        }
    }

    struct MockSynth {
        log: EventLog,
        fail_on_call: Option<usize>,
        wav: bool,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl SpeechSynthesizer for MockSynth {
        async fn synthesize(
            &self,
            segments: &[DialogueSegment],
            characters: &[Character],
        ) -> Result<String> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            self.log.push(format!("synth:{}", segments[0].index));
            assert!(characters.iter().all(|c| c.voice_id.is_some()));
            assert!(segments.iter().all(|s| s.emotion.is_some()));
            if self.fail_on_call == Some(call) {
                return Err(anyhow!("tts timeout"));
            }
            if self.wav {
                let pcm: Vec<u8> = segments
                    .iter()
                    .flat_map(|s| (s.index as i16).to_le_bytes())
                    .collect();
                return Ok(to_data_uri(WAV_MIME, &pcm_to_wav(&pcm, 24_000, 1)?));
            }
            Ok(format!(
                "data:audio/wav;base64,{}-{}",
                segments[0].index,
                segments[segments.len() - 1].index
            ))
        }

        fn voices(&self) -> Vec<Voice> {
            Vec::new()
        }

        fn narrator_voice(&self) -> Option<String> {
            None
        }
    }

    pub(crate) struct Harness {
        pub(crate) log: EventLog,
        store: Arc<MemoryStoryStore>,
        result: Segmentation,
        tag_fail_on: Option<usize>,
        pub(crate) synth_fail_on: Option<usize>,
        skip_labels: bool,
        drop_character: Option<&'static str>,
        voiceless: Option<&'static str>,
        pub(crate) wav: bool,
    }

    impl Harness {
        pub(crate) fn new(text: &str, result: Segmentation) -> Self {
            let store = Arc::new(MemoryStoryStore::new());
            store.insert(Story::new("story-1", text));
            Self {
                log: EventLog::default(),
                store,
                result,
                tag_fail_on: None,
                synth_fail_on: None,
                skip_labels: false,
                drop_character: None,
                voiceless: None,
                wav: false,
            }
        }

        pub(crate) fn pipeline(&self) -> NarrationPipeline {
            NarrationPipeline::new(
                self.store.clone(),
                Arc::new(MockSegmenter {
                    log: self.log.clone(),
                    result: self.result.clone(),
                }),
                Arc::new(MockCaster {
                    log: self.log.clone(),
                    drop_character: self.drop_character,
                    voiceless: self.voiceless,
                }),
                Arc::new(MockTagger {
                    log: self.log.clone(),
                    fail_on_call: self.tag_fail_on,
                    skip_labels: self.skip_labels,
                    calls: Mutex::new(0),
                }),
                Arc::new(MockSynth {
                    log: self.log.clone(),
                    fail_on_call: self.synth_fail_on,
                    wav: self.wav,
                    calls: Mutex::new(0),
                }),
            )
        }

        async fn run(&self) -> (Vec<NarrationChunk>, Result<(), PipelineError>) {
            let delivered = Arc::new(Mutex::new(Vec::new()));
            let sink = delivered.clone();
            let log = self.log.clone();
            let result = self
                .pipeline()
                .produce_narration("story-1", move |chunk| {
                    log.push(format!("deliver:{}", chunk.index));
                    sink.lock().unwrap().push(chunk);
                })
                .await;
            let chunks = delivered.lock().unwrap().clone();
            (chunks, result)
        }
    }

    #[tokio::test]
    async fn test_scene_narrated_in_one_chunk() {
        let harness = Harness::new(SCENE, scene_segmentation());
        let (chunks, result) = harness.run().await;

        assert!(result.is_ok());
        assert_eq!(chunks.len(), 1);
        let chunk = &chunks[0];
        assert_eq!(chunk.audio_data_uri, "data:audio/wav;base64,0-4");
        assert_eq!(
            chunk.segments.iter().map(|s| s.text.as_str()).collect::<Vec<_>>(),
            vec!["It was dark.", "Hello?", "Who's there?", "Answer me!", "Silence."]
        );
        assert!(chunk
            .segments
            .iter()
            .all(|s| s.emotion.as_deref().is_some_and(|e| !e.is_empty())));
        assert_eq!(
            harness.log.events(),
            vec![
                format!("segment:{}", SCENE.len()),
                "cast:5".to_string(),
                "tag:0".to_string(),
                "synth:0".to_string(),
                "deliver:0".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_chunks_delivered_in_order_one_at_a_time() {
        let harness = Harness::new("ten lines", segmentation(10));
        let (chunks, result) = harness.run().await;

        assert!(result.is_ok());
        assert_eq!(chunks.len(), 2);
        let indices: Vec<Vec<usize>> = chunks
            .iter()
            .map(|c| c.segments.iter().map(|s| s.index).collect())
            .collect();
        assert_eq!(indices, vec![vec![0, 1, 2, 3, 4], vec![5, 6, 7, 8, 9]]);

        assert_eq!(
            harness.log.events()[2..],
            [
                "tag:0", "synth:0", "deliver:0", "tag:5", "synth:5", "deliver:1",
            ]
            .map(String::from)
        );
        assert_eq!(harness.log.count("segment:"), 1);
        assert_eq!(harness.log.count("cast:"), 1);
        assert_eq!(harness.log.events()[1], "cast:10");
    }

    #[tokio::test]
    async fn test_remainder_chunk() {
        let harness = Harness::new("seven lines", segmentation(7));
        let (chunks, result) = harness.run().await;

        assert!(result.is_ok());
        assert_eq!(
            chunks.iter().map(|c| c.segments.len()).collect::<Vec<_>>(),
            vec![5, 2]
        );
        assert_eq!(chunks[1].audio_data_uri, "data:audio/wav;base64,5-6");
    }

    #[tokio::test]
    async fn test_tagging_failure_keeps_earlier_chunks() {
        let mut harness = Harness::new("ten lines", segmentation(10));
        harness.tag_fail_on = Some(2);
        let (chunks, result) = harness.run().await;

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        let err = result.unwrap_err();
        assert_eq!(err.failed_stage(), Some(Stage::EmotionTagging));
        assert!(err.to_string().contains("model overloaded"));
        assert_eq!(harness.log.count("synth:"), 1);
    }

    #[tokio::test]
    async fn test_synthesis_failure_delivers_nothing() {
        let mut harness = Harness::new("ten lines", segmentation(10));
        harness.synth_fail_on = Some(1);
        let (chunks, result) = harness.run().await;

        assert!(chunks.is_empty());
        assert_eq!(
            result.unwrap_err().failed_stage(),
            Some(Stage::SpeechSynthesis)
        );
        assert_eq!(harness.log.count("tag:"), 1);
    }

    #[tokio::test]
    async fn test_missing_labels_are_a_tagging_failure() {
        let mut harness = Harness::new("three lines", segmentation(3));
        harness.skip_labels = true;
        let (chunks, result) = harness.run().await;

        assert!(chunks.is_empty());
        assert_eq!(
            result.unwrap_err().failed_stage(),
            Some(Stage::EmotionTagging)
        );
        assert_eq!(harness.log.count("synth:"), 0);
    }

    #[tokio::test]
    async fn test_blank_story_rejected_before_segmentation() {
        for text in ["", "   \n\t "] {
            let harness = Harness::new(text, segmentation(3));
            let (chunks, result) = harness.run().await;

            assert!(chunks.is_empty());
            assert!(matches!(result, Err(PipelineError::Validation(_))));
            assert!(harness.log.events().is_empty());
        }
    }

    #[tokio::test]
    async fn test_unknown_story_is_not_found() {
        let harness = Harness::new(SCENE, scene_segmentation());
        let result = harness
            .pipeline()
            .produce_narration("no-such-story", |_| panic!("nothing to deliver"))
            .await;

        assert!(matches!(result, Err(PipelineError::NotFound(id)) if id == "no-such-story"));
        assert!(harness.log.events().is_empty());
    }

    #[tokio::test]
    async fn test_empty_segmentation_rejected_before_casting() {
        let harness = Harness::new(SCENE, segmentation(0));
        let (chunks, result) = harness.run().await;

        assert!(chunks.is_empty());
        assert!(matches!(result, Err(PipelineError::Validation(_))));
        assert_eq!(harness.log.count("segment:"), 1);
        assert_eq!(harness.log.count("cast:"), 0);
    }

    #[tokio::test]
    async fn test_all_narration_chunk_is_synthesized() {
        let result = Segmentation {
            segments: (0..3)
                .map(|i| DialogueSegment::new(i, "Narrator", format!("line {}", i)))
                .collect(),
            characters: vec![Character::new("Narrator", "")],
        };
        let harness = Harness::new("narration only", result);
        let (chunks, outcome) = harness.run().await;

        assert!(outcome.is_ok());
        assert_eq!(chunks.len(), 1);
        assert_eq!(harness.log.count("synth:"), 1);
    }

    #[tokio::test]
    async fn test_shared_scope_dedups_across_runs() -> Result<()> {
        let harness = Harness::new("ten lines", segmentation(10));
        let pipeline = harness.pipeline();

        let mut scope = RunScope::new();
        pipeline.produce_narration_in(&mut scope, "story-1", |_| {}).await?;
        pipeline.produce_narration_in(&mut scope, "story-1", |_| {}).await?;
        assert_eq!(harness.log.count("segment:"), 1);
        assert_eq!(harness.log.count("cast:"), 1);
        assert_eq!(harness.log.count("tag:"), 4);

        pipeline.produce_narration("story-1", |_| {}).await?;
        assert_eq!(harness.log.count("segment:"), 2);
        assert_eq!(harness.log.count("cast:"), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_custom_chunk_size() {
        let harness = Harness::new("seven lines", segmentation(7));
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = delivered.clone();
        let pipeline = harness.pipeline().with_chunk_size(3);
        assert_eq!(pipeline.chunk_size(), 3);

        pipeline
            .produce_narration("story-1", move |c| sink.lock().unwrap().push(c.segments.len()))
            .await
            .unwrap();
        assert_eq!(*delivered.lock().unwrap(), vec![3, 3, 1]);

        let zero = harness.pipeline().with_chunk_size(0);
        let result = zero.produce_narration("story-1", |_| {}).await;
        assert!(matches!(result, Err(PipelineError::Validation(_))));
        assert_eq!(harness.log.count("segment:"), 1);
    }

    #[tokio::test]
    async fn test_stream_yields_chunks_then_error() {
        let mut harness = Harness::new("ten lines", segmentation(12));
        harness.synth_fail_on = Some(2);
        let pipeline = Arc::new(harness.pipeline());

        let mut rx = pipeline.narration_stream("story-1");
        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.index, 0);
        let second = rx.recv().await.unwrap();
        assert_eq!(
            second.unwrap_err().failed_stage(),
            Some(Stage::SpeechSynthesis)
        );
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_completes() {
        let harness = Harness::new("ten lines", segmentation(10));
        let pipeline = Arc::new(harness.pipeline());

        let mut rx = pipeline.narration_stream("story-1");
        let mut indices = Vec::new();
        while let Some(item) = rx.recv().await {
            indices.push(item.unwrap().index);
        }
        assert_eq!(indices, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_closed_consumer_stops_before_any_stage() {
        let harness = Harness::new(SCENE, scene_segmentation());
        let pipeline = harness.pipeline();

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut sink = ChannelSink { tx };
        let mut scope = RunScope::new();
        let result = pipeline.drive(&mut scope, "story-1", &mut sink).await;

        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert!(harness.log.events().is_empty());
    }

    #[tokio::test]
    async fn test_caster_dropping_a_character_fails_casting() {
        let mut harness = Harness::new(SCENE, scene_segmentation());
        harness.drop_character = Some("Bob");
        let (chunks, result) = harness.run().await;

        assert!(chunks.is_empty());
        let err = result.unwrap_err();
        assert_eq!(err.failed_stage(), Some(Stage::Casting));
        assert!(err.to_string().contains("expected 3 cast characters, got 2"));
        assert_eq!(harness.log.count("tag:"), 0);
        assert_eq!(harness.log.count("synth:"), 0);
    }

    #[tokio::test]
    async fn test_caster_leaving_voice_blank_fails_casting() {
        let mut harness = Harness::new(SCENE, scene_segmentation());
        harness.voiceless = Some("Alice");
        let (chunks, result) = harness.run().await;

        assert!(chunks.is_empty());
        let err = result.unwrap_err();
        assert_eq!(err.failed_stage(), Some(Stage::Casting));
        assert!(err.to_string().contains("Alice has no voice assigned"));
        assert_eq!(harness.log.count("tag:"), 0);
    }

    #[test]
    fn test_check_cast_rejects_reordered_roster() {
        let roster = vec![Character::new("Alice", ""), Character::new("Bob", "")];
        let voiced = |name: &str| Character {
            voice_id: Some(format!("voice-{}", name)),
            ..Character::new(name, "")
        };
        assert!(check_cast(&roster, &[voiced("Alice"), voiced("Bob")]).is_ok());
        let err = check_cast(&roster, &[voiced("Bob"), voiced("Alice")]).unwrap_err();
        assert!(err.to_string().contains("cast returned Bob where Alice was expected"));
    }

    #[tokio::test]
    async fn test_dropping_stream_mid_run_stops_scheduling() {
        let harness = Harness::new("thirty lines", segmentation(30));
        let pipeline = Arc::new(harness.pipeline());

        let mut rx = pipeline.narration_stream("story-1");
        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.index, 0);
        drop(rx);

        // Let the producer observe the closed channel and wind down.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let synths = harness.log.count("synth:");
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(harness.log.count("synth:"), synths);
        assert_eq!(synths, 2);
        assert_eq!(harness.log.count("tag:"), 2);
    }
}
