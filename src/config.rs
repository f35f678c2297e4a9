//! Configuration and wire-adjacent constants.
//!
//! Uses the same `serde` + `clap` derive stack as the demo-facing CLI struct,
//! but splits the knobs by the collaborator they govern, since this crate's
//! config is consumed by a library rather than a single CLI entry point.

use serde::{Deserialize, Serialize};

use crate::model::BotSentiment;

/// Reserved transcript value meaning "voice-activity detector fired, no
/// text was actually transcribed".
pub const HUMAN_ACTIVITY_DETECTED: &str = "<human-activity-detected>";

/// Default seconds of audio represented by one synthesis chunk.
pub const TEXT_TO_SPEECH_CHUNK_SIZE_SECONDS: f64 = 1.0;

/// Default slack subtracted from each inter-chunk sleep so playback stays
/// slightly ahead of the pacing clock rather than behind it.
pub const PER_CHUNK_ALLOWANCE_SECONDS: f64 = 0.01;

/// Default idle timeout before the supervisor tears the conversation down.
pub const ALLOWED_IDLE_TIME_SECONDS: u64 = 1800;

/// Audio sample encoding, used only to compute bytes-per-second for chunk
/// sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioEncoding {
    Linear16,
    Mulaw,
}

/// Bytes of audio per wall-clock second for a given encoding/sample rate.
pub fn chunk_size_per_second(encoding: AudioEncoding, sampling_rate: u32) -> usize {
    let bytes_per_sample: usize = match encoding {
        AudioEncoding::Linear16 => 2,
        AudioEncoding::Mulaw => 1,
    };
    sampling_rate as usize * bytes_per_sample
}

/// Knobs the transcriber's config exposes to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriberConfig {
    pub min_interrupt_confidence: f32,
    pub interruption_word_threshold: usize,
    pub mute_during_speech: bool,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self { min_interrupt_confidence: 0.5, interruption_word_threshold: 2, mute_during_speech: false }
    }
}

/// Knobs the agent's config exposes to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub initial_message: Option<String>,
    pub initial_message_delay_seconds: f64,
    pub interrupt_initial_message: bool,
    pub allowed_idle_time_seconds: Option<u64>,
    pub end_conversation_on_goodbye: bool,
    pub send_follow_up_audio: bool,
    pub track_bot_sentiment: bool,
    /// Names of the actions this agent may invoke. Empty means the actions
    /// worker is never spawned for this conversation.
    pub actions: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            initial_message: None,
            initial_message_delay_seconds: 0.0,
            interrupt_initial_message: true,
            allowed_idle_time_seconds: None,
            end_conversation_on_goodbye: false,
            send_follow_up_audio: false,
            track_bot_sentiment: false,
            actions: Vec::new(),
        }
    }
}

/// Knobs the synthesizer's config exposes to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizerConfig {
    pub audio_encoding: AudioEncoding,
    pub sampling_rate: u32,
    pub initial_bot_sentiment: BotSentiment,
    pub sentiment_config: Option<SentimentConfig>,
}

/// Which emotions the bot sentiment analyser should recognize.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SentimentConfig {
    pub emotions: Vec<String>,
}

/// Conversation-wide knobs that don't belong to any one collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    pub text_to_speech_chunk_size_seconds: f64,
    pub per_chunk_allowance_seconds: f64,
    pub allowed_idle_time_seconds: u64,
    pub min_human_messages_in_transcript: usize,
    pub agent_response_queue_capacity: usize,
    pub synthesis_results_queue_capacity: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            text_to_speech_chunk_size_seconds: TEXT_TO_SPEECH_CHUNK_SIZE_SECONDS,
            per_chunk_allowance_seconds: PER_CHUNK_ALLOWANCE_SECONDS,
            allowed_idle_time_seconds: ALLOWED_IDLE_TIME_SECONDS,
            min_human_messages_in_transcript: 2,
            agent_response_queue_capacity: 16,
            synthesis_results_queue_capacity: 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear16_is_two_bytes_per_sample() {
        assert_eq!(chunk_size_per_second(AudioEncoding::Linear16, 16000), 32000);
    }

    #[test]
    fn mulaw_is_one_byte_per_sample() {
        assert_eq!(chunk_size_per_second(AudioEncoding::Mulaw, 8000), 8000);
    }
}
