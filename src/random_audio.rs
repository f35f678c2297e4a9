//! Random audio manager: filler, follow-up, and backtrack audio are mutually
//! exclusive categories played straight to the output device at the same
//! pacing discipline as the speech emitter.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::AbortHandle;
use tokio::time::{sleep, Duration};
use tracing::debug;

use crate::config::{PER_CHUNK_ALLOWANCE_SECONDS, TEXT_TO_SPEECH_CHUNK_SIZE_SECONDS};
use crate::events::OnceSignal;
use crate::model::SpeechChunk;
use crate::traits::OutputDevice;
use crate::worker::CurrentTask;

/// Source of pre-rendered audio bytes for each category. Concrete asset
/// loading (files, TTS-rendered-once-at-startup, etc.) is out of scope; this
/// is the seam a deployment plugs its recordings into.
#[async_trait]
pub trait RandomAudioSource: Send + Sync {
    async fn filler(&self) -> Option<Vec<u8>>;
    async fn follow_up(&self) -> Option<Vec<u8>>;
    async fn backtrack(&self) -> Option<Vec<u8>>;

    /// Bytes of audio per wall-clock second, used for pacing.
    fn chunk_size_per_second(&self) -> usize;
}

enum Category {
    Filler,
    FollowUp,
    Backtrack,
}

/// Owns the single in-flight random-audio task and enforces mutual
/// exclusion across the three categories.
pub struct RandomAudioManager {
    source: Arc<dyn RandomAudioSource>,
    output: Arc<dyn OutputDevice>,
    current: CurrentTask,
    follow_up_handle: Arc<parking_lot::Mutex<Option<AbortHandle>>>,
}

impl RandomAudioManager {
    pub fn new(source: Arc<dyn RandomAudioSource>, output: Arc<dyn OutputDevice>) -> Self {
        Self { source, output, current: CurrentTask::default(), follow_up_handle: Arc::new(parking_lot::Mutex::new(None)) }
    }

    /// Cancel whatever random audio is currently playing. Idempotent and
    /// safe to call from any worker.
    pub fn stop_all_audios(&self) {
        self.current.cancel();
    }

    /// Cancel only a running follow-up task, leaving filler/backtrack
    /// untouched. Called on every inbound transcript.
    pub fn sync_stop_follow_up_audio(&self) {
        if let Some(handle) = self.follow_up_handle.lock().take() {
            handle.abort();
        }
    }

    pub fn sync_send_filler_audio(&self, completion_tracker: OnceSignal) {
        self.spawn(Category::Filler, completion_tracker);
    }

    pub fn sync_send_follow_up_audio(&self, completion_tracker: OnceSignal) {
        self.spawn(Category::FollowUp, completion_tracker);
    }

    pub fn sync_send_backtrack_audio(&self, completion_tracker: OnceSignal) {
        self.spawn(Category::Backtrack, completion_tracker);
    }

    fn spawn(&self, category: Category, completion_tracker: OnceSignal) {
        self.stop_all_audios();
        let source = self.source.clone();
        let output = self.output.clone();
        let follow_up_handle = self.follow_up_handle.clone();
        let is_follow_up = matches!(category, Category::FollowUp);

        let task = tokio::spawn(async move {
            let bytes = match category {
                Category::Filler => source.filler().await,
                Category::FollowUp => source.follow_up().await,
                Category::Backtrack => source.backtrack().await,
            };
            let Some(bytes) = bytes else {
                completion_tracker.set();
                return;
            };

            let chunk_size = source.chunk_size_per_second() as f64 * TEXT_TO_SPEECH_CHUNK_SIZE_SECONDS;
            for chunk in bytes.chunks(chunk_size.max(1.0) as usize) {
                let started = std::time::Instant::now();
                let is_last = false;
                output.consume(SpeechChunk { bytes: chunk.to_vec(), is_last });
                let speech_length = chunk.len() as f64 / source.chunk_size_per_second().max(1) as f64;
                let elapsed = started.elapsed().as_secs_f64();
                let remaining = (speech_length - elapsed - PER_CHUNK_ALLOWANCE_SECONDS).max(0.0);
                if remaining > 0.0 {
                    sleep(Duration::from_secs_f64(remaining)).await;
                }
            }
            completion_tracker.set();
        });

        let abort_handle = task.abort_handle();
        self.current.track(abort_handle.clone());
        if is_follow_up {
            *follow_up_handle.lock() = Some(abort_handle);
        }
        debug!("random audio task spawned");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct FixedSource(Vec<u8>);

    #[async_trait]
    impl RandomAudioSource for FixedSource {
        async fn filler(&self) -> Option<Vec<u8>> {
            Some(self.0.clone())
        }
        async fn follow_up(&self) -> Option<Vec<u8>> {
            Some(self.0.clone())
        }
        async fn backtrack(&self) -> Option<Vec<u8>> {
            None
        }
        fn chunk_size_per_second(&self) -> usize {
            16
        }
    }

    struct RecordingDevice(Mutex<usize>);

    #[async_trait]
    impl OutputDevice for RecordingDevice {
        async fn start(&self) {}
        async fn terminate(&self) {}
        fn consume(&self, _chunk: SpeechChunk) {
            *self.0.lock() += 1;
        }
        fn clear_queue(&self) {}
        fn queue_len(&self) -> usize {
            *self.0.lock()
        }
    }

    #[tokio::test]
    async fn filler_audio_plays_and_sets_tracker() {
        let output = Arc::new(RecordingDevice(Mutex::new(0)));
        let manager = RandomAudioManager::new(Arc::new(FixedSource(vec![0; 32])), output.clone());
        let tracker = OnceSignal::new();
        manager.sync_send_filler_audio(tracker.clone());
        tokio::time::timeout(Duration::from_secs(1), tracker.wait()).await.expect("tracker should be set");
        assert!(output.queue_len() > 0);
    }

    #[tokio::test]
    async fn missing_backtrack_audio_still_sets_tracker() {
        let output = Arc::new(RecordingDevice(Mutex::new(0)));
        let manager = RandomAudioManager::new(Arc::new(FixedSource(vec![0; 32])), output);
        let tracker = OnceSignal::new();
        manager.sync_send_backtrack_audio(tracker.clone());
        tokio::time::timeout(Duration::from_secs(1), tracker.wait()).await.expect("tracker should be set");
    }

    #[tokio::test]
    async fn stop_all_audios_is_idempotent_with_nothing_running() {
        let output = Arc::new(RecordingDevice(Mutex::new(0)));
        let manager = RandomAudioManager::new(Arc::new(FixedSource(vec![0; 32])), output);
        manager.stop_all_audios();
        manager.stop_all_audios();
    }
}
