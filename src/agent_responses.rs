//! Agent responses worker: dispatches whatever the agent produced next —
//! synthesize a message, play filler/follow-up/backtrack audio, or stop the
//! conversation.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::chunk_size_per_second;
use crate::events::{InterruptibleEvent, InterruptibleEventFactory};
use crate::handle::ConversationHandle;
use crate::model::{AgentResponse, BotMessage};
use crate::synthesis_results::CurrentSynthesisTracker;
use crate::worker::{BoundedQueue, InterruptibleWorker};

pub trait Terminator: Send + Sync {
    fn terminate(&self);
}

pub struct AgentResponsesWorker {
    handle: Arc<ConversationHandle>,
    output_queue: Arc<BoundedQueue<Arc<InterruptibleEvent<(String, crate::model::SynthesisResult)>>>>,
    event_factory: InterruptibleEventFactory,
    current_synthesis: Arc<CurrentSynthesisTracker>,
    terminator: Arc<dyn Terminator>,
}

impl AgentResponsesWorker {
    pub fn new(
        handle: Arc<ConversationHandle>,
        output_queue: Arc<BoundedQueue<Arc<InterruptibleEvent<(String, crate::model::SynthesisResult)>>>>,
        event_factory: InterruptibleEventFactory,
        current_synthesis: Arc<CurrentSynthesisTracker>,
        terminator: Arc<dyn Terminator>,
    ) -> Self {
        Self { handle, output_queue, event_factory, current_synthesis, terminator }
    }

    async fn handle_filler_audio(&self, event: &Arc<InterruptibleEvent<AgentResponse>>) {
        self.handle.refresh_human_messages_in_transcript();
        let should_send = self.handle.flags.bot_has_spoken.load(Ordering::SeqCst)
            && self.handle.flags.human_messages_in_transcript.load(Ordering::SeqCst) > self.handle.config.min_human_messages_in_transcript
            && !self.handle.flags.is_bot_speaking.load(Ordering::SeqCst)
            && self.output_queue.is_empty();

        if should_send {
            debug!("sending filler audio");
            self.handle.random_audio_manager.sync_send_filler_audio(event.completion_tracker.clone());
        } else {
            event.completion_tracker.set();
        }
    }

    async fn handle_follow_up_audio(&self, event: &Arc<InterruptibleEvent<AgentResponse>>) {
        self.handle.random_audio_manager.sync_send_follow_up_audio(event.completion_tracker.clone());
    }

    async fn handle_backtrack_audio(&self, event: &Arc<InterruptibleEvent<AgentResponse>>) {
        debug!("waiting for bot to stop speaking after interruption");
        self.current_synthesis.wait_current().await;

        let should_send = self.handle.flags.human_messages_in_transcript.load(Ordering::SeqCst) > self.handle.config.min_human_messages_in_transcript
            && self.handle.flags.bot_has_spoken.load(Ordering::SeqCst)
            && self.handle.flags.is_human_speaking.load(Ordering::SeqCst);

        if should_send {
            debug!("sending backtrack audio");
            self.handle.random_audio_manager.sync_send_backtrack_audio(event.completion_tracker.clone());
        } else {
            event.completion_tracker.set();
        }
    }

    async fn handle_stop(&self, event: &Arc<InterruptibleEvent<AgentResponse>>) {
        debug!("agent requested to stop");
        event.completion_tracker.set();
        self.terminator.terminate();
    }

    async fn handle_message(&self, event: &Arc<InterruptibleEvent<AgentResponse>>, message: &BotMessage) {
        let chunk_size = chunk_size_per_second(self.handle.synthesizer.config().audio_encoding, self.handle.synthesizer.config().sampling_rate) as f64
            * self.handle.config.text_to_speech_chunk_size_seconds;

        self.handle.flags.is_synthesizing.store(true, Ordering::SeqCst);
        let bot_sentiment = self.handle.bot_sentiment();
        let result = match self.handle.synthesizer.create_speech(message.text(), chunk_size as usize, &bot_sentiment).await {
            Ok(result) => result,
            Err(err) => {
                debug!(%err, "synthesis failed, dropping turn");
                event.completion_tracker.set();
                return;
            }
        };

        // more Message turns may already be queued behind this item; a queued
        // FillerAudio/FollowUpAudio/BacktrackAudio/Stop doesn't count as
        // still-synthesizing
        let more_messages_queued = self.handle.agent.output_queue().has_queued(|event| event.peek(|response| matches!(response, AgentResponse::Message(_)))).await;
        self.handle.flags.is_synthesizing.store(more_messages_queued, Ordering::SeqCst);

        let downstream = self.event_factory.create_event((message.text().to_string(), result), event.is_interruptible());
        if self.output_queue.sender().send(downstream).await.is_err() {
            debug!("synthesis-results queue closed, dropping turn");
        }
    }
}

#[async_trait]
impl InterruptibleWorker for AgentResponsesWorker {
    type Input = AgentResponse;

    async fn process(&self, event: Arc<InterruptibleEvent<AgentResponse>>) {
        match event.clone_payload() {
            AgentResponse::FillerAudio => self.handle_filler_audio(&event).await,
            AgentResponse::FollowUpAudio => self.handle_follow_up_audio(&event).await,
            AgentResponse::BacktrackAudio => self.handle_backtrack_audio(&event).await,
            AgentResponse::Stop => self.handle_stop(&event).await,
            AgentResponse::Message(message) => {
                self.handle_message(&event, &message).await;
            }
        }
    }
}
