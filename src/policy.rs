//! Pure decision functions used by the pipeline: the barge-in classifier and
//! the "let the sentence finish" heuristic used by the speech emitter.

use crate::config::{TranscriberConfig, HUMAN_ACTIVITY_DETECTED};
use crate::model::Transcription;

/// Backchannel words that, in a short utterance, mean "keep going" rather
/// than "stop talking".
const VERBAL_CUES: &[&str] = &["uh", "um", "mhm", "yes", "yeah", "okay", "i see", "i understand", "go on", "go ahead"];

/// Decide whether a transcription should be treated as a barge-in.
///
/// Pure function of the transcript and transcriber config: dropping a
/// non-interrupt transcript while the bot is speaking depends on this
/// classifier never touching shared state.
pub fn is_interrupt(transcription: &Transcription, config: &TranscriberConfig) -> bool {
    if transcription.text == HUMAN_ACTIVITY_DETECTED {
        return true;
    }

    if transcription.confidence < config.min_interrupt_confidence {
        return false;
    }

    let message = transcription.text.to_lowercase();
    let message = message.trim();
    let words: Vec<&str> = message.split_whitespace().collect();

    if words.len() <= 1 {
        return false;
    }

    let is_backchannel = VERBAL_CUES.iter().any(|cue| message.contains(cue));
    if is_backchannel && words.len() <= config.interruption_word_threshold {
        return false;
    }

    if words.len() > config.interruption_word_threshold {
        return true;
    }

    // Conservative default for medium-length utterances: treat them as a
    // barge-in rather than risk ignoring the caller.
    true
}

/// Whether, having been signalled to stop, the emitter should finish the
/// current sentence rather than cutting off mid-word.
///
/// Estimates total spoken duration from word count at a conversational
/// 150 words/minute and allows the sentence to finish once at least 80% of
/// that estimate has already been spoken — cutting off earlier than that
/// would clip mid-sentence audibly; later adds negligible latency.
pub fn should_finish_sentence(message: &str, seconds_spoken: f64) -> bool {
    const WORDS_PER_MINUTE: f64 = 150.0;
    const FINISH_THRESHOLD: f64 = 0.8;

    let word_count = message.split_whitespace().count() as f64;
    if word_count == 0.0 {
        return false;
    }
    let estimated_total_seconds = word_count / WORDS_PER_MINUTE * 60.0;
    if estimated_total_seconds <= 0.0 {
        return false;
    }
    seconds_spoken / estimated_total_seconds >= FINISH_THRESHOLD
}
