//! # loom-llm
//!
//! Streaming completion orchestration for Loom.
//!
//! A completion is produced as a sequence of segments:
//! - Each segment is one provider call, retried on transient 500/503 errors
//! - Segments are spliced into one continuous output by a `StreamSwitcher`
//! - A segment cut off by the token budget is followed by a continuation
//!   request, up to a fixed segment limit
//!
//! The consumer of the output never reattaches; it sees one text stream that
//! either ends normally or ends with a terminal error.

mod auth;
mod client;
pub mod mock;
mod provider;
mod retry;
mod segment;
mod session;
mod state_machine;
mod switcher;
mod types;

pub use auth::get_api_key;
pub use client::RetryingCompletionClient;
pub use provider::{CompletionProvider, OpenAiProvider, ProviderError, SseDecoder};
pub use retry::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS};
pub use segment::{PendingSummary, Segment, SegmentEvent, SegmentSummary, TextStream};
pub use session::{CompletionSession, SessionOutcome, CONTINUE_PROMPT};
pub use state_machine::{
    transition, Directive, SessionEvent, SessionPhase, SessionState, MAX_SEGMENTS,
};
pub use switcher::{RelayOutcome, StreamSwitcher, SwitcherOutput};
pub use types::{ChatCompletionChunk, ChatCompletionRequest, ChunkChoice, ChunkDelta};
