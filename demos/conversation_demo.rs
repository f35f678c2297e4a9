//! Toy end-to-end wiring for `conversation-core`: a scripted transcriber, an
//! echo agent, a silence synthesizer, and a console output device, so the
//! pipeline can be exercised without any real provider.

use std::io::{self, BufRead};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use conversation_core::actions::NullActionFactory;
use conversation_core::config::{AgentConfig, AudioEncoding, ConversationConfig, SynthesizerConfig, TranscriberConfig};
use conversation_core::conversation::Conversation;
use conversation_core::error::ConversationError;
use conversation_core::events::InterruptibleEvent;
use conversation_core::model::{ActionRequest, AgentInput, AgentResponse, BotMessage, BotSentiment, SpeechChunk, SynthesisResult, Transcription};
use conversation_core::random_audio::RandomAudioSource;
use conversation_core::traits::{Agent, OutputDevice, SentimentAnalyser, Synthesizer, Transcriber};
use conversation_core::transcript::Transcript;
use conversation_core::worker::BoundedQueue;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::EnvFilter;

/// Run a scripted conversation against toy collaborators.
#[derive(Parser, Debug)]
#[command(name = "conversation-demo", version, about)]
struct Args {
    /// Sample rate (Hz) assumed for chunk-size pacing math.
    #[arg(long, default_value_t = 16000)]
    sampling_rate: u32,

    /// Greet the caller before anything is said.
    #[arg(long)]
    initial_message: Option<String>,

    /// Print debug-level logs.
    #[arg(long)]
    verbose: bool,
}

/// Reads lines from stdin and forwards them as final transcriptions. Closing
/// stdin (Ctrl+D) ends the script.
struct StdinTranscriber {
    queue: Arc<BoundedQueue<Transcription>>,
    config: TranscriberConfig,
}

#[async_trait]
impl Transcriber for StdinTranscriber {
    async fn start(&self) {
        let sender = self.queue.sender();
        tokio::task::spawn_blocking(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines().map_while(Result::ok) {
                if sender.blocking_send(Transcription::new(line, 0.95, true)).is_err() {
                    break;
                }
            }
        });
    }

    async fn ready(&self) -> bool {
        true
    }

    async fn terminate(&self) {}

    async fn send_audio(&self, _bytes: Vec<u8>) {}

    fn mute(&self) {}

    fn unmute(&self) {}

    fn config(&self) -> TranscriberConfig {
        self.config.clone()
    }
}

/// Echoes back a canned acknowledgement for every transcript it receives.
struct EchoAgent {
    input: Arc<BoundedQueue<Arc<InterruptibleEvent<AgentInput>>>>,
    output: Arc<BoundedQueue<Arc<InterruptibleEvent<AgentResponse>>>>,
    actions: Arc<BoundedQueue<ActionRequest>>,
    config: AgentConfig,
    transcript: parking_lot::Mutex<Option<Arc<Transcript>>>,
}

#[async_trait]
impl Agent for EchoAgent {
    fn input_queue(&self) -> Arc<BoundedQueue<Arc<InterruptibleEvent<AgentInput>>>> {
        self.input.clone()
    }

    fn output_queue(&self) -> Arc<BoundedQueue<Arc<InterruptibleEvent<AgentResponse>>>> {
        self.output.clone()
    }

    fn actions_queue(&self) -> Arc<BoundedQueue<ActionRequest>> {
        self.actions.clone()
    }

    async fn start(&self) {
        let input = self.input.clone();
        let output = self.output.clone();
        tokio::spawn(async move {
            while let Some(event) = input.recv().await {
                let transcription = event.clone_payload().transcription;
                event.completion_tracker.set();
                if transcription.text.trim().is_empty() {
                    continue;
                }
                let reply = format!("You said: {}", transcription.text);
                let response_event = Arc::new(InterruptibleEvent::new(AgentResponse::Message(BotMessage::Text(reply)), true));
                if output.sender().send(response_event).await.is_err() {
                    break;
                }
            }
        });
    }

    async fn terminate(&self) {}

    fn cancel_current_task(&self) {}

    fn update_last_bot_message_on_cut_off(&self, text: &str) {
        info!(%text, "agent trimming memory of cut-off message");
    }

    async fn detect_goodbye(&self, text: String) -> bool {
        let lowered = text.to_lowercase();
        lowered.contains("bye") || lowered.contains("goodbye")
    }

    fn config(&self) -> AgentConfig {
        self.config.clone()
    }

    fn attach_transcript(&self, transcript: Arc<Transcript>) {
        *self.transcript.lock() = Some(transcript);
    }
}

/// Synthesizes silence sized to the message length instead of real audio.
struct SilenceSynthesizer {
    config: SynthesizerConfig,
}

#[async_trait]
impl Synthesizer for SilenceSynthesizer {
    async fn create_speech(&self, message: &str, chunk_size: usize, _bot_sentiment: &BotSentiment) -> Result<SynthesisResult, ConversationError> {
        if !message.chars().any(|c| c.is_alphanumeric()) {
            return Ok(SynthesisResult::empty());
        }

        let words: Vec<String> = message.split_whitespace().map(|w| w.to_string()).collect();
        let total_bytes = chunk_size.max(1) * words.len().max(1);
        let chunks: Vec<SpeechChunk> = (0..words.len().max(1))
            .map(|i| SpeechChunk { bytes: vec![0u8; chunk_size.max(1)], is_last: i + 1 == words.len().max(1) })
            .collect();

        let resolve_prefix = move |seconds: f64| -> String {
            let fraction = (seconds / (total_bytes as f64 / chunk_size.max(1) as f64).max(1.0)).clamp(0.0, 1.0);
            let word_count = (words.len() as f64 * fraction).round() as usize;
            words[..word_count.min(words.len())].join(" ")
        };

        Ok(SynthesisResult::new(futures::stream::iter(chunks), resolve_prefix))
    }

    async fn tear_down(&self) {}

    async fn ready_synthesizer(&self) {}

    fn config(&self) -> SynthesizerConfig {
        self.config.clone()
    }
}

/// Logs each chunk to stdout instead of driving a speaker.
struct ConsoleOutputDevice {
    queued: AtomicUsize,
}

#[async_trait]
impl OutputDevice for ConsoleOutputDevice {
    async fn start(&self) {}
    async fn terminate(&self) {}

    fn consume(&self, chunk: SpeechChunk) {
        self.queued.fetch_add(1, Ordering::SeqCst);
        info!(bytes = chunk.bytes.len(), is_last = chunk.is_last, "bot audio chunk");
    }

    fn clear_queue(&self) {
        self.queued.store(0, Ordering::SeqCst);
    }

    fn queue_len(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }
}

struct SilentAudio;

#[async_trait]
impl RandomAudioSource for SilentAudio {
    async fn filler(&self) -> Option<Vec<u8>> {
        Some(vec![0u8; 128])
    }
    async fn follow_up(&self) -> Option<Vec<u8>> {
        Some(vec![0u8; 128])
    }
    async fn backtrack(&self) -> Option<Vec<u8>> {
        Some(vec![0u8; 64])
    }
    fn chunk_size_per_second(&self) -> usize {
        16000
    }
}

struct NeutralSentiment;

#[async_trait]
impl SentimentAnalyser for NeutralSentiment {
    async fn analyse(&self, _transcript_text: &str) -> BotSentiment {
        BotSentiment { emotion: Some("neutral".to_string()) }
    }
}

async fn wait_for_shutdown() {
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("received SIGTERM, shutting down");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().or_else(|_| if args.verbose { EnvFilter::try_new("debug") } else { EnvFilter::try_new("info") }).unwrap();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(LocalTime::new(time::macros::format_description!("[hour]:[minute]:[second]")))
        .init();

    info!("conversation-demo v{}", env!("CARGO_PKG_VERSION"));

    let transcriber_output = Arc::new(BoundedQueue::new(16));
    let transcriber_config = TranscriberConfig::default();
    let transcriber: Arc<dyn Transcriber> = Arc::new(StdinTranscriber { queue: transcriber_output.clone(), config: transcriber_config });

    let agent_config =
        AgentConfig { initial_message: args.initial_message.clone(), initial_message_delay_seconds: 0.0, send_follow_up_audio: true, ..AgentConfig::default() };
    let agent: Arc<dyn Agent> = Arc::new(EchoAgent {
        input: Arc::new(BoundedQueue::new(8)),
        output: Arc::new(BoundedQueue::new(8)),
        actions: Arc::new(BoundedQueue::new(8)),
        config: agent_config,
        transcript: parking_lot::Mutex::new(None),
    });

    let synthesizer: Arc<dyn Synthesizer> = Arc::new(SilenceSynthesizer {
        config: SynthesizerConfig { audio_encoding: AudioEncoding::Linear16, sampling_rate: args.sampling_rate, initial_bot_sentiment: BotSentiment::default(), sentiment_config: None },
    });

    let output_device: Arc<dyn OutputDevice> = Arc::new(ConsoleOutputDevice { queued: AtomicUsize::new(0) });
    let random_audio_source: Arc<dyn RandomAudioSource> = Arc::new(SilentAudio);
    let sentiment_analyser: Arc<dyn SentimentAnalyser> = Arc::new(NeutralSentiment);

    let conversation = Conversation::new(
        "demo-conversation".to_string(),
        ConversationConfig::default(),
        transcriber,
        transcriber_output,
        agent,
        synthesizer,
        output_device,
        random_audio_source,
        Some(sentiment_analyser),
        Arc::new(NullActionFactory),
    );

    conversation.start().await?;
    info!("conversation started, type into stdin to talk to the bot (Ctrl+D to close the mic, Ctrl+C to exit)");

    wait_for_shutdown().await;

    conversation.terminate().await;
    if !conversation.is_active() {
        info!("conversation terminated cleanly");
    } else {
        warn!("conversation did not report terminated after shutdown");
    }

    Ok(())
}
