pub mod casting;
pub mod chunking;
pub mod emotion;
pub mod export;
pub mod llm;
pub mod memo;
pub mod script;
pub mod setup;
pub mod store;
pub mod tts;
pub mod workflow;
