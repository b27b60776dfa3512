//! Scripted provider for tests and offline runs
//!
//! Plays back a fixed list of segments and failures, recording every request
//! it receives and when it received it.

use crate::provider::{CompletionProvider, ProviderError};
use crate::segment::{Segment, SegmentEvent};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use loom_core::{FinishReason, Message};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

/// One scripted provider response
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Segment {
        chunks: Vec<String>,
        finish_reason: FinishReason,
    },
    /// Relay `chunks`, then never finish
    Stall { chunks: Vec<String> },
    Fail(ProviderError),
}

impl ScriptStep {
    pub fn segment<I, T>(chunks: I, finish_reason: FinishReason) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        ScriptStep::Segment {
            chunks: chunks.into_iter().map(Into::into).collect(),
            finish_reason,
        }
    }

    pub fn stall<I, T>(chunks: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        ScriptStep::Stall {
            chunks: chunks.into_iter().map(Into::into).collect(),
        }
    }

    pub fn status(status: u16) -> Self {
        ScriptStep::Fail(ProviderError::Status {
            status,
            body: format!("scripted status {}", status),
        })
    }
}

#[derive(Default)]
struct Recorded {
    requests: Vec<Vec<Message>>,
    call_times: Vec<Instant>,
}

/// Provider that replays `ScriptStep`s in order
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<ScriptStep>>,
    repeat: Option<ScriptStep>,
    recorded: Mutex<Recorded>,
}

impl ScriptedProvider {
    /// Replay `steps` once; calls beyond the script fail as malformed
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            repeat: None,
            recorded: Mutex::new(Recorded::default()),
        }
    }

    /// Answer every call with the same step
    pub fn repeating(step: ScriptStep) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            repeat: Some(step),
            recorded: Mutex::new(Recorded::default()),
        }
    }

    /// Number of `open_segment` calls so far
    pub fn calls(&self) -> usize {
        self.recorded().requests.len()
    }

    /// Message histories passed to each call, in call order
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.recorded().requests.clone()
    }

    /// Instants at which each call arrived
    pub fn call_times(&self) -> Vec<Instant> {
        self.recorded().call_times.clone()
    }

    fn recorded(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_step(&self) -> Option<ScriptStep> {
        let next = self
            .steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        next.or_else(|| self.repeat.clone())
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn open_segment(&self, messages: &[Message]) -> Result<Segment, ProviderError> {
        {
            let mut recorded = self.recorded();
            recorded.requests.push(messages.to_vec());
            recorded.call_times.push(Instant::now());
        }

        match self.next_step() {
            Some(ScriptStep::Segment {
                chunks,
                finish_reason,
            }) => Ok(Segment::fixed(chunks, finish_reason)),
            Some(ScriptStep::Stall { chunks }) => {
                let events = chunks
                    .into_iter()
                    .map(|chunk| Ok(SegmentEvent::Delta(chunk)))
                    .collect::<Vec<loom_core::Result<SegmentEvent>>>();
                Ok(Segment::from_events(
                    stream::iter(events).chain(stream::pending()),
                ))
            }
            Some(ScriptStep::Fail(err)) => Err(err),
            None => Err(ProviderError::Malformed("script exhausted".to_string())),
        }
    }
}
