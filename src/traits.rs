//! External interfaces: the contracts the core consumes but does not
//! implement. Concrete transcription providers, LLM agents, TTS engines,
//! and output devices are out of scope — these traits are the seam a real
//! deployment plugs into (see `demos/` for toy implementations).

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{AgentConfig, SynthesizerConfig, TranscriberConfig};
use crate::error::ConversationError;
use crate::events::InterruptibleEvent;
use crate::model::{ActionRequest, AgentInput, AgentResponse, BotSentiment, SpeechChunk, SynthesisResult};
use crate::transcript::Transcript;
use crate::worker::BoundedQueue;

/// Async speech-to-text source. Pushes `Transcription`s onto the queue the
/// core was constructed with; `start`/`ready`/`terminate` drive its
/// lifecycle.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn start(&self);

    /// Must resolve to `false` only on a genuine startup failure — the
    /// supervisor treats that as fatal.
    async fn ready(&self) -> bool;

    async fn terminate(&self);

    async fn send_audio(&self, bytes: Vec<u8>);

    fn mute(&self);

    fn unmute(&self);

    fn config(&self) -> TranscriberConfig;
}

/// The LLM agent. Owns its own input/output queues so any worker can push
/// directly into `output_queue()` on the agent's behalf (filler, follow-up,
/// and backtrack requests never come from the agent itself).
#[async_trait]
pub trait Agent: Send + Sync {
    fn input_queue(&self) -> Arc<BoundedQueue<Arc<InterruptibleEvent<AgentInput>>>>;

    fn output_queue(&self) -> Arc<BoundedQueue<Arc<InterruptibleEvent<AgentResponse>>>>;

    /// Requests to run agent-invoked side effects. Only drained when
    /// `config().actions` is non-empty; an agent with no configured actions
    /// may hand back a queue nothing ever sends on.
    fn actions_queue(&self) -> Arc<BoundedQueue<ActionRequest>>;

    async fn start(&self);

    async fn terminate(&self);

    /// Cancel whatever generation task is currently in flight.
    fn cancel_current_task(&self);

    /// Let the agent trim its own memory of the last bot utterance after a
    /// cut-off.
    fn update_last_bot_message_on_cut_off(&self, text: &str);

    /// Run goodbye detection over the given text. The caller applies its own
    /// deadline around this call; this method just returns the eventual
    /// verdict.
    async fn detect_goodbye(&self, text: String) -> bool;

    fn config(&self) -> AgentConfig;

    fn attach_transcript(&self, transcript: Arc<Transcript>);
}

/// Speech synthesizer.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn create_speech(&self, message: &str, chunk_size: usize, bot_sentiment: &BotSentiment) -> Result<SynthesisResult, ConversationError>;

    async fn tear_down(&self);

    async fn ready_synthesizer(&self);

    fn config(&self) -> SynthesizerConfig;
}

/// The bidirectional audio device. `consume` is non-blocking; the broker
/// may drain `clear_queue` at any time.
#[async_trait]
pub trait OutputDevice: Send + Sync {
    async fn start(&self);

    async fn terminate(&self);

    fn consume(&self, chunk: SpeechChunk);

    fn clear_queue(&self);

    fn queue_len(&self) -> usize;
}

/// Analyses the running transcript text and returns the bot's current
/// sentiment, polled periodically by the supervisor.
#[async_trait]
pub trait SentimentAnalyser: Send + Sync {
    async fn analyse(&self, transcript_text: &str) -> BotSentiment;
}
