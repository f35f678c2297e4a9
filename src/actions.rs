//! Actions worker: runs agent-invoked side effects and feeds the result
//! back to the agent as a new turn of input.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::events::InterruptibleEventFactory;
use crate::handle::ConversationHandle;
use crate::model::{ActionRequest, ActionResult, AgentInput, Transcription};
use crate::worker::AsyncQueueWorker;

/// Looks up and runs a named action. Concrete actions (call transfer, order
/// lookup, ...) are out of scope; this is the seam a deployment plugs its
/// side effects into.
#[async_trait]
pub trait ActionFactory: Send + Sync {
    async fn run(&self, request: &ActionRequest) -> Option<serde_json::Value>;
}

/// An `ActionFactory` that resolves no actions. The default when a
/// deployment configures `actions` without wiring a factory.
#[derive(Default)]
pub struct NullActionFactory;

#[async_trait]
impl ActionFactory for NullActionFactory {
    async fn run(&self, request: &ActionRequest) -> Option<serde_json::Value> {
        debug!(action = %request.action_name, "no action factory attached, dropping action request");
        None
    }
}

/// Drains `Agent::actions_queue`, runs each request through the attached
/// `ActionFactory`, and forwards the result back to the agent's input queue
/// so the agent can continue reasoning from it, matching how the original
/// routes an action's output back through `agent.get_input_queue()`.
pub struct ActionsWorker {
    handle: Arc<ConversationHandle>,
    event_factory: InterruptibleEventFactory,
    factory: Arc<dyn ActionFactory>,
}

impl ActionsWorker {
    pub fn new(handle: Arc<ConversationHandle>, event_factory: InterruptibleEventFactory, factory: Arc<dyn ActionFactory>) -> Self {
        Self { handle, event_factory, factory }
    }

    async fn forward_result_to_agent(&self, result: ActionResult, conversation_id: String) {
        let transcription = Transcription::synthetic(result.output.to_string());
        let input = AgentInput { transcription, conversation_id };
        let event = self.event_factory.create_event(input, true);
        if self.handle.agent.input_queue().sender().send(event).await.is_err() {
            debug!("agent input queue closed, dropping action result");
        }
    }
}

#[async_trait]
impl AsyncQueueWorker for ActionsWorker {
    type Item = ActionRequest;

    async fn process(&self, request: ActionRequest) {
        let Some(output) = self.factory.run(&request).await else {
            warn!(action = %request.action_name, "action produced no result");
            return;
        };
        let conversation_id = request.conversation_id.clone();
        let result = ActionResult { action_name: request.action_name, output };
        self.forward_result_to_agent(result, conversation_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentConfig, AudioEncoding, ConversationConfig, SynthesizerConfig, TranscriberConfig};
    use crate::events::InterruptionRegistry;
    use crate::model::{AgentResponse, BotSentiment, SynthesisResult};
    use crate::random_audio::{RandomAudioManager, RandomAudioSource};
    use crate::traits::{Agent, OutputDevice, Synthesizer, Transcriber};
    use crate::transcript::Transcript;
    use crate::worker::BoundedQueue;

    struct NoAudio;
    #[async_trait]
    impl RandomAudioSource for NoAudio {
        async fn filler(&self) -> Option<Vec<u8>> {
            None
        }
        async fn follow_up(&self) -> Option<Vec<u8>> {
            None
        }
        async fn backtrack(&self) -> Option<Vec<u8>> {
            None
        }
        fn chunk_size_per_second(&self) -> usize {
            16000
        }
    }

    struct NullDevice;
    #[async_trait]
    impl OutputDevice for NullDevice {
        async fn start(&self) {}
        async fn terminate(&self) {}
        fn consume(&self, _chunk: crate::model::SpeechChunk) {}
        fn clear_queue(&self) {}
        fn queue_len(&self) -> usize {
            0
        }
    }

    struct StubTranscriber;
    #[async_trait]
    impl Transcriber for StubTranscriber {
        async fn start(&self) {}
        async fn ready(&self) -> bool {
            true
        }
        async fn terminate(&self) {}
        async fn send_audio(&self, _bytes: Vec<u8>) {}
        fn mute(&self) {}
        fn unmute(&self) {}
        fn config(&self) -> TranscriberConfig {
            TranscriberConfig::default()
        }
    }

    struct StubSynthesizer;
    #[async_trait]
    impl Synthesizer for StubSynthesizer {
        async fn create_speech(&self, _message: &str, _chunk_size: usize, _bot_sentiment: &BotSentiment) -> Result<SynthesisResult, crate::error::ConversationError> {
            Ok(SynthesisResult::empty())
        }
        async fn tear_down(&self) {}
        async fn ready_synthesizer(&self) {}
        fn config(&self) -> SynthesizerConfig {
            SynthesizerConfig { audio_encoding: AudioEncoding::Linear16, sampling_rate: 16000, initial_bot_sentiment: BotSentiment::default(), sentiment_config: None }
        }
    }

    struct StubAgent {
        input: Arc<BoundedQueue<Arc<crate::events::InterruptibleEvent<AgentInput>>>>,
        output: Arc<BoundedQueue<Arc<crate::events::InterruptibleEvent<AgentResponse>>>>,
        actions: Arc<BoundedQueue<ActionRequest>>,
    }
    #[async_trait]
    impl Agent for StubAgent {
        fn input_queue(&self) -> Arc<BoundedQueue<Arc<crate::events::InterruptibleEvent<AgentInput>>>> {
            self.input.clone()
        }
        fn output_queue(&self) -> Arc<BoundedQueue<Arc<crate::events::InterruptibleEvent<AgentResponse>>>> {
            self.output.clone()
        }
        fn actions_queue(&self) -> Arc<BoundedQueue<ActionRequest>> {
            self.actions.clone()
        }
        async fn start(&self) {}
        async fn terminate(&self) {}
        fn cancel_current_task(&self) {}
        fn update_last_bot_message_on_cut_off(&self, _text: &str) {}
        async fn detect_goodbye(&self, _text: String) -> bool {
            false
        }
        fn config(&self) -> AgentConfig {
            AgentConfig::default()
        }
        fn attach_transcript(&self, _transcript: Arc<Transcript>) {}
    }

    struct EchoActionFactory;
    #[async_trait]
    impl ActionFactory for EchoActionFactory {
        async fn run(&self, request: &ActionRequest) -> Option<serde_json::Value> {
            Some(request.params.clone())
        }
    }

    fn test_handle() -> (Arc<ConversationHandle>, Arc<StubAgent>) {
        let agent = Arc::new(StubAgent { input: Arc::new(BoundedQueue::new(4)), output: Arc::new(BoundedQueue::new(4)), actions: Arc::new(BoundedQueue::new(4)) });
        let output_device: Arc<dyn OutputDevice> = Arc::new(NullDevice);
        let random_audio = Arc::new(RandomAudioManager::new(Arc::new(NoAudio), output_device.clone()));
        let handle = Arc::new(ConversationHandle::new(
            "conv-1".into(),
            ConversationConfig::default(),
            Arc::new(Transcript::new()),
            Arc::new(StubTranscriber),
            agent.clone() as Arc<dyn Agent>,
            Arc::new(StubSynthesizer),
            output_device,
            random_audio,
            BotSentiment::default(),
        ));
        (handle, agent)
    }

    #[tokio::test]
    async fn successful_action_forwards_result_to_agent_input() {
        let (handle, agent) = test_handle();
        let factory = InterruptibleEventFactory::new(Arc::new(InterruptionRegistry::new()));
        let worker = ActionsWorker::new(handle.clone(), factory, Arc::new(EchoActionFactory));

        worker
            .process(ActionRequest { action_name: "lookup_order".into(), params: serde_json::json!({"order_id": 42}), conversation_id: "conv-1".into() })
            .await;

        assert!(!agent.input.is_empty());
    }

    #[tokio::test]
    async fn unresolved_action_forwards_nothing() {
        let (handle, agent) = test_handle();
        let factory = InterruptibleEventFactory::new(Arc::new(InterruptionRegistry::new()));
        let worker = ActionsWorker::new(handle.clone(), factory, Arc::new(NullActionFactory));

        worker.process(ActionRequest { action_name: "unknown".into(), params: serde_json::Value::Null, conversation_id: "conv-1".into() }).await;

        assert!(agent.input.is_empty());
    }
}
