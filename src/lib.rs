//! Real-time streaming conversation core: the interruptible pipeline that
//! turns a live duplex audio stream into a turn-taking dialogue between a
//! human caller and a bot, mediated by a transcriber, an LLM agent, a
//! speech synthesizer, and a bidirectional output device.
//!
//! Those four collaborators are out of scope for this crate — see
//! [`traits`] for the contracts a deployment plugs into.

pub mod actions;
pub mod agent_responses;
pub mod config;
pub mod conversation;
pub mod emitter;
pub mod error;
pub mod events;
pub mod handle;
pub mod model;
pub mod policy;
pub mod random_audio;
pub mod synthesis_results;
pub mod transcript;
pub mod transcriptions;
pub mod traits;
pub mod worker;

pub use conversation::Conversation;
pub use error::ConversationError;
pub use handle::ConversationHandle;
