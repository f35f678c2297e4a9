//! Synthesis results worker: plays each synthesized turn to the output
//! device, updates the transcript and speaking flags, runs goodbye
//! detection, and triggers follow-up audio.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use tracing::debug;

use crate::emitter::send_speech_to_output;
use crate::events::{Interruptible, InterruptibleEvent, InterruptibleEventFactory, OnceSignal};
use crate::handle::ConversationHandle;
use crate::model::{AgentResponse, SynthesisResult};
use crate::transcript::Sender;
use crate::worker::InterruptibleWorker;

/// Lets `AgentResponsesWorker::handle_backtrack_audio` wait for whatever
/// synthesis turn is currently playing, without holding a reference to this
/// worker directly.
#[derive(Default)]
pub struct CurrentSynthesisTracker {
    current: SyncMutex<OnceSignal>,
}

impl CurrentSynthesisTracker {
    pub fn begin_turn(&self) -> OnceSignal {
        let signal = OnceSignal::new();
        *self.current.lock() = signal.clone();
        signal
    }

    pub async fn wait_current(&self) {
        let signal = self.current.lock().clone();
        signal.wait().await;
    }
}

pub struct SynthesisResultsWorker {
    handle: Arc<ConversationHandle>,
    event_factory: InterruptibleEventFactory,
    current_synthesis: Arc<CurrentSynthesisTracker>,
    chunk_size_bytes: usize,
}

impl SynthesisResultsWorker {
    pub fn new(handle: Arc<ConversationHandle>, event_factory: InterruptibleEventFactory, current_synthesis: Arc<CurrentSynthesisTracker>, chunk_size_bytes: usize) -> Self {
        Self { handle, event_factory, current_synthesis, chunk_size_bytes }
    }

    async fn maybe_delay_initial_message(&self) {
        if self.handle.flags.sent_initial_message.load(Ordering::SeqCst) || self.handle.flags.human_has_spoken.load(Ordering::SeqCst) {
            return;
        }
        let delay = self.handle.agent.config().initial_message_delay_seconds;
        if delay <= 0.0 {
            return;
        }
        let elapsed = self.handle.call_start.elapsed().as_secs_f64();
        let remaining = delay - elapsed;
        if remaining > 0.0 {
            debug!(remaining, "delaying initial message");
            tokio::time::sleep(Duration::from_secs_f64(remaining)).await;
        }
    }

    async fn maybe_detect_goodbye(&self, message_sent: &str) {
        if !self.handle.agent.config().end_conversation_on_goodbye {
            return;
        }
        let agent = self.handle.agent.clone();
        let text = message_sent.to_string();
        let detection = tokio::spawn(async move { agent.detect_goodbye(text).await });

        match tokio::time::timeout(Duration::from_millis(100), detection).await {
            Ok(Ok(true)) => {
                debug!("agent said goodbye, ending call");
                tokio::time::sleep(Duration::from_secs(2)).await;
                self.handle.flags.active.store(false, Ordering::SeqCst);
            }
            Ok(Ok(false)) => {}
            Ok(Err(_)) => debug!("goodbye detection task panicked"),
            Err(_) => debug!("goodbye detection deadline expired"),
        }
    }

    fn maybe_trigger_follow_up(&self) {
        let should_send_follow_up = self.handle.flags.human_has_spoken.load(Ordering::SeqCst)
            && !self.handle.flags.is_bot_speaking.load(Ordering::SeqCst)
            && !self.handle.flags.is_synthesizing.load(Ordering::SeqCst)
            && self.handle.agent.config().send_follow_up_audio;

        if should_send_follow_up {
            debug!("sending follow-up to agent responses worker");
            let event = self.event_factory.create_event(AgentResponse::FollowUpAudio, true);
            let sender = self.handle.agent.output_queue().sender();
            tokio::spawn(async move {
                if sender.send(event).await.is_err() {
                    debug!("agent output queue closed, dropping follow-up request");
                }
            });
        }
    }
}

#[async_trait]
impl InterruptibleWorker for SynthesisResultsWorker {
    type Input = (String, SynthesisResult);

    async fn process(&self, event: Arc<InterruptibleEvent<(String, SynthesisResult)>>) {
        self.handle.random_audio_manager.stop_all_audios();

        let transcript_message = self.handle.transcript.add_message(Sender::Bot, "");

        self.maybe_delay_initial_message().await;

        self.handle.flags.is_interrupted.store(false, Ordering::SeqCst);
        self.handle.flags.is_bot_speaking.store(true, Ordering::SeqCst);

        if self.handle.transcriber.config().mute_during_speech {
            self.handle.transcriber.mute();
        }

        let turn_tracker = self.current_synthesis.begin_turn();
        let (message, result) = event.take_payload();
        let interrupt_facet: Arc<dyn Interruptible> = event.clone();

        let outcome = send_speech_to_output(
            &message,
            result,
            &self.handle.output_device,
            &interrupt_facet,
            self.handle.config.text_to_speech_chunk_size_seconds,
            self.chunk_size_bytes,
            self.handle.config.per_chunk_allowance_seconds,
            &transcript_message,
            &self.handle.flags,
        )
        .await;

        if self.handle.transcriber.config().mute_during_speech {
            self.handle.transcriber.unmute();
        }

        turn_tracker.set();
        self.handle.flags.is_interrupted.store(outcome.cut_off, Ordering::SeqCst);
        self.handle.flags.is_bot_speaking.store(!self.handle.agent.output_queue().is_empty() && !outcome.cut_off, Ordering::SeqCst);

        if !self.handle.flags.bot_has_spoken.load(Ordering::SeqCst) && (!outcome.cut_off || outcome.message_sent.len() > 5) {
            self.handle.flags.bot_has_spoken.store(true, Ordering::SeqCst);
        }

        transcript_message.set_text(outcome.message_sent.clone());
        self.handle.transcript.mark_complete(&transcript_message);
        self.handle.flags.mark_action();

        event.completion_tracker.set();
        debug!(message_sent = %outcome.message_sent, "message sent");

        if outcome.cut_off {
            self.handle.agent.update_last_bot_message_on_cut_off(&outcome.message_sent);
        }

        self.maybe_detect_goodbye(&outcome.message_sent).await;
        self.maybe_trigger_follow_up();
    }
}
