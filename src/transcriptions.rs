//! Transcriptions worker: classifies each transcription as a barge-in or
//! not, and forwards finals to the agent.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::HUMAN_ACTIVITY_DETECTED;
use crate::events::InterruptibleEventFactory;
use crate::handle::ConversationHandle;
use crate::model::{AgentInput, AgentResponse, Transcription};
use crate::policy::is_interrupt;
use crate::worker::AsyncQueueWorker;

/// Callback the worker uses to fire a barge-in without depending on the
/// supervisor directly.
#[async_trait]
pub trait InterruptBroadcaster: Send + Sync {
    async fn broadcast_interrupt(&self) -> bool;
}

pub struct TranscriptionsWorker {
    handle: Arc<ConversationHandle>,
    event_factory: InterruptibleEventFactory,
    broker: Arc<dyn InterruptBroadcaster>,
}

impl TranscriptionsWorker {
    pub fn new(handle: Arc<ConversationHandle>, event_factory: InterruptibleEventFactory, broker: Arc<dyn InterruptBroadcaster>) -> Self {
        Self { handle, event_factory, broker }
    }

    fn should_check_interrupt(&self) -> bool {
        self.handle.flags.is_bot_speaking.load(Ordering::SeqCst)
            || self.handle.flags.is_synthesizing.load(Ordering::SeqCst)
            || !self.handle.flags.sent_initial_message.load(Ordering::SeqCst)
    }

    async fn forward_to_agent(&self, transcription: Transcription) {
        let input = AgentInput { transcription, conversation_id: self.handle.id.clone() };
        let event = self.event_factory.create_event(input, true);
        if self.handle.agent.input_queue().sender().send(event).await.is_err() {
            debug!("agent input queue closed, dropping transcription");
        }
    }

    async fn enqueue_backtrack_audio(&self) {
        let event = self.event_factory.create_event(AgentResponse::BacktrackAudio, true);
        if self.handle.agent.output_queue().sender().send(event).await.is_err() {
            debug!("agent output queue closed, dropping backtrack request");
        }
    }
}

#[async_trait]
impl AsyncQueueWorker for TranscriptionsWorker {
    type Item = Transcription;

    async fn process(&self, transcription: Transcription) {
        self.handle.flags.mark_action();
        self.handle.random_audio_manager.sync_stop_follow_up_audio();

        if transcription.text.trim().is_empty() {
            return;
        }

        let is_voice_activity_hint = transcription.text == HUMAN_ACTIVITY_DETECTED;

        if transcription.is_final {
            self.handle.flags.human_has_spoken.store(true, Ordering::SeqCst);
        }
        self.handle.flags.is_human_speaking.store(!transcription.is_final, Ordering::SeqCst);

        if !self.should_check_interrupt() {
            if !is_voice_activity_hint && transcription.is_final && transcription.confidence >= self.handle.transcriber.config().min_interrupt_confidence {
                self.forward_to_agent(transcription).await;
            }
            return;
        }

        let config = self.handle.transcriber.config();
        if is_interrupt(&transcription, &config) {
            debug!(text = %transcription.text, "barge-in detected");
            self.broker.broadcast_interrupt().await;
            self.enqueue_backtrack_audio().await;
            if !is_voice_activity_hint {
                let mut stamped = transcription;
                stamped.is_interrupt = true;
                self.forward_to_agent(stamped).await;
            }
        }
        // not an interrupt while bot speech is in play: drop the transcript, forward nothing
    }
}
