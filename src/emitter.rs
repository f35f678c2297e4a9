//! Speech emitter: paces synthesized audio chunks out to the output device
//! in real time and reports how much of the message was actually spoken
//! when cut off mid-sentence.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tokio::time::{sleep, Duration};
use tracing::trace;

use crate::events::Interruptible;
use crate::handle::ConversationFlags;
use crate::model::{SpeechChunk, SynthesisResult};
use crate::policy::should_finish_sentence;
use crate::traits::OutputDevice;
use crate::transcript::Message;

/// Outcome of streaming one synthesis result to the output device.
pub struct EmitOutcome {
    /// How much of the message text was actually sent, accounting for a
    /// cut-off (the interrupted-prefix convention).
    pub message_sent: String,
    pub cut_off: bool,
    pub seconds_spoken: f64,
}

/// Stream `result`'s chunks to `output` at real-time pace, stopping early if
/// `stop_event` fires and the in-progress sentence isn't worth finishing.
///
/// `message` is the full text being spoken, used to resolve how much of it
/// was actually said on cut-off. `chunk_seconds` is how much wall-clock audio
/// one chunk represents at full size; the last chunk may be shorter, and its
/// `speech_length` is scaled down proportionally. `transcript_message` and
/// `flags` are updated after every chunk (not just once at the end) so a
/// long bot turn keeps touching `last_action_timestamp` and the transcript
/// stays live while speech is still streaming.
#[allow(clippy::too_many_arguments)]
pub async fn send_speech_to_output(
    message: &str,
    mut result: SynthesisResult,
    output: &Arc<dyn OutputDevice>,
    event: &Arc<dyn Interruptible>,
    chunk_seconds: f64,
    chunk_size_bytes: usize,
    per_chunk_allowance_seconds: f64,
    transcript_message: &Arc<Message>,
    flags: &Arc<ConversationFlags>,
) -> EmitOutcome {
    let mut seconds_spoken = 0.0_f64;
    let mut cut_off = false;
    let mut chunk_idx: u64 = 0;

    loop {
        let Some(chunk) = result.chunks.next().await else { break };
        let started = Instant::now();
        let is_last = chunk.is_last;
        let chunk_len = chunk.bytes.len();

        let speech_length = if chunk_size_bytes == 0 { 0.0 } else { chunk_seconds * (chunk_len as f64 / chunk_size_bytes as f64) };
        seconds_spoken = chunk_seconds * chunk_idx as f64;

        if event.is_interrupted() && !cut_off {
            if should_finish_sentence(message, seconds_spoken) {
                trace!(seconds_spoken, "letting sentence finish before cutting off");
            } else {
                cut_off = true;
                trace!(seconds_spoken, "cutting off mid-sentence");
                break;
            }
        }

        output.consume(SpeechChunk { bytes: chunk.bytes, is_last });
        chunk_idx += 1;

        let elapsed = started.elapsed().as_secs_f64();
        let remaining = (speech_length - elapsed - per_chunk_allowance_seconds).max(0.0);
        if remaining > 0.0 {
            sleep(Duration::from_secs_f64(remaining)).await;
        }

        flags.mark_action();
        transcript_message.set_text((result.resolve_prefix)(seconds_spoken));
    }

    let message_sent = if cut_off { (result.resolve_prefix)(seconds_spoken) + "-" } else { message.to_string() };

    EmitOutcome { message_sent, cut_off, seconds_spoken }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::{Sender, Transcript};
    use futures::stream;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingDevice {
        consumed: Mutex<Vec<Vec<u8>>>,
        cleared: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl OutputDevice for RecordingDevice {
        async fn start(&self) {}
        async fn terminate(&self) {}
        fn consume(&self, chunk: SpeechChunk) {
            self.consumed.lock().push(chunk.bytes);
        }
        fn clear_queue(&self) {
            self.cleared.fetch_add(1, Ordering::SeqCst);
        }
        fn queue_len(&self) -> usize {
            self.consumed.lock().len()
        }
    }

    fn registry_event() -> Arc<dyn Interruptible> {
        Arc::new(crate::events::InterruptibleEvent::new(
            crate::model::AgentResponse::Message(crate::model::BotMessage::Text("hi there".into())),
            true,
        ))
    }

    #[tokio::test]
    async fn uninterrupted_stream_emits_every_chunk() {
        let chunks = vec![
            SpeechChunk { bytes: vec![0; 4], is_last: false },
            SpeechChunk { bytes: vec![0; 4], is_last: true },
        ];
        let result = SynthesisResult::new(stream::iter(chunks), |_| String::new());
        let output: Arc<dyn OutputDevice> = Arc::new(RecordingDevice { consumed: Mutex::new(Vec::new()), cleared: AtomicUsize::new(0) });
        let event = registry_event();
        let transcript = Transcript::new();
        let transcript_message = transcript.add_message(Sender::Bot, "");
        let flags = Arc::new(ConversationFlags::default());

        let outcome = send_speech_to_output("hi there", result, &output, &event, 0.0, 4, 0.0, &transcript_message, &flags).await;

        assert!(!outcome.cut_off);
        assert_eq!(outcome.message_sent, "hi there");
        assert_eq!(output.queue_len(), 2);
    }

    #[tokio::test]
    async fn every_chunk_advances_last_action_and_transcript_text() {
        let chunks = vec![
            SpeechChunk { bytes: vec![0; 4], is_last: false },
            SpeechChunk { bytes: vec![0; 4], is_last: true },
        ];
        let result = SynthesisResult::new(stream::iter(chunks), |secs| format!("prefix@{secs:.2}"));
        let output: Arc<dyn OutputDevice> = Arc::new(RecordingDevice { consumed: Mutex::new(Vec::new()), cleared: AtomicUsize::new(0) });
        let event = registry_event();
        let transcript = Transcript::new();
        let transcript_message = transcript.add_message(Sender::Bot, "");
        let flags = Arc::new(ConversationFlags::default());

        send_speech_to_output("hi there", result, &output, &event, 1.0, 4, 0.0, &transcript_message, &flags).await;

        assert_eq!(transcript_message.text(), "prefix@1.00");
        assert!(flags.idle_for_secs() < 5, "mark_action should have been called at least once during the turn");
    }

    #[tokio::test]
    async fn interrupted_stream_cuts_off_and_marks_prefix() {
        let chunks = vec![
            SpeechChunk { bytes: vec![0; 4], is_last: false },
            SpeechChunk { bytes: vec![0; 4], is_last: false },
            SpeechChunk { bytes: vec![0; 4], is_last: true },
        ];
        let result = SynthesisResult::new(stream::iter(chunks), |secs| format!("spoke for {secs:.2}s"));
        let output: Arc<dyn OutputDevice> = Arc::new(RecordingDevice { consumed: Mutex::new(Vec::new()), cleared: AtomicUsize::new(0) });
        let event = registry_event();
        event.interrupt();
        let transcript = Transcript::new();
        let transcript_message = transcript.add_message(Sender::Bot, "");
        let flags = Arc::new(ConversationFlags::default());

        let outcome = send_speech_to_output(
            "a very long sentence with plenty of words left to go",
            result,
            &output,
            &event,
            0.0,
            4,
            0.0,
            &transcript_message,
            &flags,
        )
        .await;

        assert!(outcome.cut_off);
        assert!(outcome.message_sent.ends_with('-'));
        assert_eq!(output.queue_len(), 0);
    }
}
