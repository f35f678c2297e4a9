//! Conversation handle: the shared state workers read and write without
//! holding a reference back to the supervisor itself, avoiding the ownership
//! cycle a naive port would otherwise introduce.
//!
//! Every flag here is a boolean latch, counter, or timestamp written by
//! exactly one designated worker; cross-worker reads are racy but
//! monotonically safe, so plain atomics with `SeqCst` are sufficient — no
//! flag needs a lock.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::ConversationConfig;
use crate::model::BotSentiment;
use crate::random_audio::RandomAudioManager;
use crate::traits::{Agent, OutputDevice, Synthesizer, Transcriber};
use crate::transcript::Transcript;

/// The boolean/counter/timestamp latches shared across workers.
///
/// Idle tracking is measured off `tokio::time::Instant` rather than the wall
/// clock so it advances (and can be fast-forwarded in tests) along with
/// tokio's own timers, including the watchdog's `interval` tick.
pub struct ConversationFlags {
    pub active: AtomicBool,
    pub is_human_speaking: AtomicBool,
    pub is_bot_speaking: AtomicBool,
    pub is_interrupted: AtomicBool,
    pub is_synthesizing: AtomicBool,
    pub bot_has_spoken: AtomicBool,
    pub human_has_spoken: AtomicBool,
    pub sent_initial_message: AtomicBool,
    pub human_messages_in_transcript: AtomicUsize,
    created_at: Instant,
    last_action_millis: AtomicU64,
}

impl Default for ConversationFlags {
    fn default() -> Self {
        Self {
            active: AtomicBool::new(false),
            is_human_speaking: AtomicBool::new(false),
            is_bot_speaking: AtomicBool::new(false),
            is_interrupted: AtomicBool::new(false),
            is_synthesizing: AtomicBool::new(false),
            bot_has_spoken: AtomicBool::new(false),
            human_has_spoken: AtomicBool::new(false),
            sent_initial_message: AtomicBool::new(false),
            human_messages_in_transcript: AtomicUsize::new(0),
            created_at: Instant::now(),
            last_action_millis: AtomicU64::new(0),
        }
    }
}

impl ConversationFlags {
    fn elapsed_millis(&self) -> u64 {
        self.created_at.elapsed().as_millis() as u64
    }

    /// Monotonically non-decreasing: only ever moves forward, even if two
    /// writers race.
    pub fn mark_action(&self) {
        let now = self.elapsed_millis();
        self.last_action_millis.fetch_max(now, Ordering::SeqCst);
    }

    pub fn idle_for_secs(&self) -> u64 {
        self.elapsed_millis().saturating_sub(self.last_action_millis.load(Ordering::SeqCst)) / 1000
    }
}

/// Shared handle every worker holds instead of a back-reference to the
/// supervisor, breaking the ownership cycle a naive port would introduce.
pub struct ConversationHandle {
    pub id: String,
    pub flags: Arc<ConversationFlags>,
    pub config: ConversationConfig,
    pub transcript: Arc<Transcript>,
    pub transcriber: Arc<dyn Transcriber>,
    pub agent: Arc<dyn Agent>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub output_device: Arc<dyn OutputDevice>,
    pub random_audio_manager: Arc<RandomAudioManager>,
    pub bot_sentiment: Mutex<BotSentiment>,
    pub call_start: Instant,
}

impl ConversationHandle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        config: ConversationConfig,
        transcript: Arc<Transcript>,
        transcriber: Arc<dyn Transcriber>,
        agent: Arc<dyn Agent>,
        synthesizer: Arc<dyn Synthesizer>,
        output_device: Arc<dyn OutputDevice>,
        random_audio_manager: Arc<RandomAudioManager>,
        initial_bot_sentiment: BotSentiment,
    ) -> Self {
        Self {
            id,
            flags: Arc::new(ConversationFlags::default()),
            config,
            transcript,
            transcriber,
            agent,
            synthesizer,
            output_device,
            random_audio_manager,
            bot_sentiment: Mutex::new(initial_bot_sentiment),
            call_start: Instant::now(),
        }
    }

    pub fn refresh_human_messages_in_transcript(&self) {
        if self.flags.human_messages_in_transcript.load(Ordering::SeqCst) <= self.config.min_human_messages_in_transcript {
            self.flags.human_messages_in_transcript.store(self.transcript.count_human_messages(), Ordering::SeqCst);
        }
    }

    pub fn bot_sentiment(&self) -> BotSentiment {
        self.bot_sentiment.lock().clone()
    }
}
