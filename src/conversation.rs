//! Conversation supervisor and interruption broker: wires the workers
//! together, drives startup/shutdown, and owns the idle watchdog and
//! sentiment poller.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::actions::{ActionFactory, ActionsWorker};
use crate::agent_responses::{AgentResponsesWorker, Terminator};
use crate::config::{chunk_size_per_second, ConversationConfig};
use crate::error::ConversationError;
use crate::events::{InterruptibleEvent, InterruptibleEventFactory, InterruptionRegistry};
use crate::handle::ConversationHandle;
use crate::model::{AgentResponse, BotSentiment, SynthesisResult};
use crate::random_audio::RandomAudioManager;
use crate::synthesis_results::{CurrentSynthesisTracker, SynthesisResultsWorker};
use crate::traits::{Agent, OutputDevice, SentimentAnalyser, Synthesizer, Transcriber};
use crate::transcript::Transcript;
use crate::transcriptions::{InterruptBroadcaster, TranscriptionsWorker};
use crate::worker::{run_async_queue_worker, run_interruptible_worker, BoundedQueue, CurrentTask};

/// Implements `broadcast_interrupt`: drains the registry, cancels in-flight
/// agent/synthesis work, stops random audio, and clears every queue
/// downstream of the barge-in point.
pub struct InterruptionBroker {
    registry: Arc<InterruptionRegistry>,
    agent: Arc<dyn Agent>,
    agent_responses_current: CurrentTask,
    synthesis_queue: Arc<BoundedQueue<Arc<InterruptibleEvent<(String, SynthesisResult)>>>>,
    output_device: Arc<dyn OutputDevice>,
    random_audio_manager: Arc<RandomAudioManager>,
    handle: Arc<ConversationHandle>,
}

#[async_trait]
impl InterruptBroadcaster for InterruptionBroker {
    async fn broadcast_interrupt(&self) -> bool {
        let interrupted = self.registry.broadcast_interrupt();

        self.agent.cancel_current_task();
        self.agent_responses_current.cancel();
        self.random_audio_manager.stop_all_audios();

        self.agent.output_queue().drain().await;
        self.synthesis_queue.drain().await;
        self.output_device.clear_queue();

        self.handle.flags.is_synthesizing.store(false, Ordering::SeqCst);

        debug!(interrupted, "broadcast_interrupt complete");
        interrupted > 0
    }
}

/// Lets `AgentResponsesWorker` request termination on an `AgentResponse::Stop`
/// without owning the supervisor.
struct ActiveFlagTerminator(Arc<ConversationHandle>);

impl Terminator for ActiveFlagTerminator {
    fn terminate(&self) {
        self.0.flags.active.store(false, Ordering::SeqCst);
    }
}

struct SupervisorTasks {
    idle_watchdog: Option<JoinHandle<()>>,
    sentiment_poller: Option<JoinHandle<()>>,
    transcriptions: Option<JoinHandle<()>>,
    agent_responses: Option<JoinHandle<()>>,
    synthesis_results: Option<JoinHandle<()>>,
    initial_message: Option<JoinHandle<()>>,
    actions: Option<JoinHandle<()>>,
}

/// The real-time conversation core: owns every worker and the queues
/// between them, and drives the full startup/shutdown lifecycle.
pub struct Conversation {
    handle: Arc<ConversationHandle>,
    config: ConversationConfig,
    transcriber_output: Arc<BoundedQueue<crate::model::Transcription>>,
    agent_output_to_synthesis: Arc<BoundedQueue<Arc<InterruptibleEvent<(String, SynthesisResult)>>>>,
    broker: Arc<InterruptionBroker>,
    sentiment_analyser: Option<Arc<dyn SentimentAnalyser>>,
    action_factory: Arc<dyn ActionFactory>,
    current_synthesis_tracker: Mutex<Option<Arc<CurrentSynthesisTracker>>>,
    tasks: Arc<Mutex<SupervisorTasks>>,
}

impl Conversation {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        config: ConversationConfig,
        transcriber: Arc<dyn Transcriber>,
        transcriber_output: Arc<BoundedQueue<crate::model::Transcription>>,
        agent: Arc<dyn Agent>,
        synthesizer: Arc<dyn Synthesizer>,
        output_device: Arc<dyn OutputDevice>,
        random_audio_source: Arc<dyn crate::random_audio::RandomAudioSource>,
        sentiment_analyser: Option<Arc<dyn SentimentAnalyser>>,
        action_factory: Arc<dyn ActionFactory>,
    ) -> Self {
        let random_audio_manager = Arc::new(RandomAudioManager::new(random_audio_source, output_device.clone()));
        let initial_sentiment = synthesizer.config().initial_bot_sentiment;

        let handle = Arc::new(ConversationHandle::new(
            id,
            config.clone(),
            Arc::new(Transcript::new()),
            transcriber,
            agent.clone(),
            synthesizer,
            output_device.clone(),
            random_audio_manager.clone(),
            initial_sentiment,
        ));

        let agent_output_to_synthesis = Arc::new(BoundedQueue::new(config.synthesis_results_queue_capacity));

        let broker = Arc::new(InterruptionBroker {
            registry: Arc::new(InterruptionRegistry::new()),
            agent,
            agent_responses_current: CurrentTask::default(),
            synthesis_queue: agent_output_to_synthesis.clone(),
            output_device,
            random_audio_manager,
            handle: handle.clone(),
        });

        Self {
            handle,
            config,
            transcriber_output,
            agent_output_to_synthesis,
            broker,
            sentiment_analyser,
            action_factory,
            current_synthesis_tracker: Mutex::new(None),
            tasks: Arc::new(Mutex::new(SupervisorTasks {
                idle_watchdog: None,
                sentiment_poller: None,
                transcriptions: None,
                agent_responses: None,
                synthesis_results: None,
                initial_message: None,
                actions: None,
            })),
        }
    }

    pub fn handle(&self) -> Arc<ConversationHandle> {
        self.handle.clone()
    }

    fn event_factory(&self) -> InterruptibleEventFactory {
        InterruptibleEventFactory::new(self.broker.registry.clone())
    }

    /// Drive the full startup sequence.
    pub async fn start(&self) -> Result<(), ConversationError> {
        self.handle.transcriber.start().await;
        self.spawn_transcriptions_worker();
        self.spawn_agent_responses_worker();
        self.spawn_synthesis_results_worker();
        self.handle.output_device.start().await;
        if !self.handle.agent.config().actions.is_empty() {
            self.spawn_actions_worker();
        }

        if !self.handle.transcriber.ready().await {
            return Err(ConversationError::TranscriberStartupFailed);
        }

        self.handle.agent.start().await;
        self.handle.agent.attach_transcript(self.handle.transcript.clone());

        if let Some(initial_message) = self.handle.agent.config().initial_message.clone() {
            self.spawn_initial_message(initial_message);
        }

        self.handle.flags.active.store(true, Ordering::SeqCst);
        self.handle.flags.mark_action();

        self.spawn_idle_watchdog();
        if self.handle.agent.config().track_bot_sentiment {
            self.spawn_sentiment_poller();
        }

        info!(conversation_id = %self.handle.id, "conversation started");
        Ok(())
    }

    fn spawn_transcriptions_worker(&self) {
        let worker = Arc::new(TranscriptionsWorker::new(self.handle.clone(), self.event_factory(), self.broker.clone()));
        let queue = self.transcriber_output.clone();
        let task = tokio::spawn(async move { run_async_queue_worker(worker, queue).await });
        self.tasks.lock().transcriptions = Some(task);
    }

    fn spawn_agent_responses_worker(&self) {
        let current_synthesis = Arc::new(CurrentSynthesisTracker::default());
        *self.current_synthesis_tracker.lock() = Some(current_synthesis.clone());
        let worker = Arc::new(AgentResponsesWorker::new(
            self.handle.clone(),
            self.agent_output_to_synthesis.clone(),
            self.event_factory(),
            current_synthesis,
            Arc::new(ActiveFlagTerminator(self.handle.clone())),
        ));
        let queue = self.handle.agent.output_queue();
        let current = self.broker.agent_responses_current.clone();
        let task = tokio::spawn(async move { run_interruptible_worker(worker, queue, current).await });
        self.tasks.lock().agent_responses = Some(task);
    }

    fn spawn_synthesis_results_worker(&self) {
        let current_synthesis = self.current_synthesis_tracker.lock().clone().expect("agent responses worker spawned first");
        let chunk_size = chunk_size_per_second(self.handle.synthesizer.config().audio_encoding, self.handle.synthesizer.config().sampling_rate) as f64
            * self.config.text_to_speech_chunk_size_seconds;
        let worker = Arc::new(SynthesisResultsWorker::new(self.handle.clone(), self.event_factory(), current_synthesis, chunk_size as usize));
        let queue = self.agent_output_to_synthesis.clone();
        let current = CurrentTask::default();
        let task = tokio::spawn(async move { run_interruptible_worker(worker, queue, current).await });
        self.tasks.lock().synthesis_results = Some(task);
    }

    fn spawn_actions_worker(&self) {
        let worker = Arc::new(ActionsWorker::new(self.handle.clone(), self.event_factory(), self.action_factory.clone()));
        let queue = self.handle.agent.actions_queue();
        let task = tokio::spawn(async move { run_async_queue_worker(worker, queue).await });
        self.tasks.lock().actions = Some(task);
    }

    fn spawn_initial_message(&self, message: String) {
        let handle = self.handle.clone();
        let factory = self.event_factory();
        let interrupt_initial = handle.agent.config().interrupt_initial_message;
        let task = tokio::spawn(async move {
            let event = factory.create_event(AgentResponse::Message(crate::model::BotMessage::Text(message)), interrupt_initial);
            if handle.agent.output_queue().sender().send(event.clone()).await.is_err() {
                return;
            }
            event.completion_tracker.wait().await;
            handle.flags.sent_initial_message.store(true, Ordering::SeqCst);
        });
        self.tasks.lock().initial_message = Some(task);
    }

    fn spawn_idle_watchdog(&self) {
        let handle = self.handle.clone();
        let broker = self.broker.clone();
        let tasks = self.tasks.clone();
        let allowed = self.config.allowed_idle_time_seconds;
        let task = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(15));
            loop {
                ticker.tick().await;
                if !handle.flags.active.load(Ordering::SeqCst) {
                    break;
                }
                if handle.flags.idle_for_secs() > allowed {
                    warn!("idle watchdog tripped, terminating conversation");
                    // forget our own handle first: run_termination would
                    // otherwise abort the task it's currently running in,
                    // which can cancel it mid-teardown
                    tasks.lock().idle_watchdog.take();
                    run_termination(handle, broker, tasks).await;
                    break;
                }
            }
        });
        self.tasks.lock().idle_watchdog = Some(task);
    }

    fn spawn_sentiment_poller(&self) {
        let Some(analyser) = self.sentiment_analyser.clone() else { return };
        let handle = self.handle.clone();
        let task = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(1));
            let mut last_len = 0usize;
            loop {
                ticker.tick().await;
                if !handle.flags.active.load(Ordering::SeqCst) {
                    break;
                }
                let text = handle.transcript.to_string_full();
                if text.len() != last_len {
                    last_len = text.len();
                    let sentiment = analyser.analyse(&text).await;
                    *handle.bot_sentiment.lock() = sentiment;
                }
            }
        });
        self.tasks.lock().sentiment_poller = Some(task);
    }

    /// Idempotent shutdown.
    pub async fn terminate(&self) {
        run_termination(self.handle.clone(), self.broker.clone(), self.tasks.clone()).await;
    }

    pub fn is_active(&self) -> bool {
        self.handle.flags.active.load(Ordering::SeqCst)
    }

    /// Feed a synthetic, maximum-confidence transcription directly into the
    /// pipeline, bypassing the transcriber.
    pub async fn receive_message(&self, text: impl Into<String>) {
        let transcription = crate::model::Transcription::synthetic(text);
        if self.transcriber_output.sender().send(transcription).await.is_err() {
            warn!("transcriber output queue closed, dropping synthetic message");
        }
    }

    /// Forward raw audio bytes to the transcriber.
    pub async fn receive_audio(&self, bytes: Vec<u8>) {
        self.handle.transcriber.send_audio(bytes).await;
    }

    pub async fn warmup_synthesizer(&self) {
        self.handle.synthesizer.ready_synthesizer().await;
    }
}

/// The shared shutdown sequence, callable both from `Conversation::terminate`
/// and from the idle watchdog when it trips on its own, so an idle timeout
/// tears the conversation down exactly like an explicit `terminate()` call
/// would — including publishing the transcript-complete event.
async fn run_termination(handle: Arc<ConversationHandle>, broker: Arc<InterruptionBroker>, tasks: Arc<Mutex<SupervisorTasks>>) {
    broker.broadcast_interrupt().await;

    let was_active = handle.flags.active.swap(false, Ordering::SeqCst);
    if was_active {
        handle.transcript.publish_complete(&handle.id).await;
    }

    let mut locked = tasks.lock();
    for task in [locked.idle_watchdog.take(), locked.sentiment_poller.take(), locked.initial_message.take()] {
        if let Some(task) = task {
            task.abort();
        }
    }
    drop(locked);

    handle.synthesizer.tear_down().await;
    handle.agent.terminate().await;
    handle.output_device.terminate().await;
    handle.transcriber.terminate().await;

    let mut locked = tasks.lock();
    for task in [locked.transcriptions.take(), locked.agent_responses.take(), locked.synthesis_results.take()] {
        if let Some(task) = task {
            task.abort();
        }
    }
    if let Some(task) = locked.actions.take() {
        task.abort();
    }

    info!(conversation_id = %handle.id, "conversation terminated");
}
