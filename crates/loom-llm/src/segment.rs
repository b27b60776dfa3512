//! Live completion segments
//!
//! A segment is one provider response attempt. Its text is relayed while it
//! is still being produced, so the finish reason is only known once the text
//! stream has been consumed to the end. `Segment` pairs the stream with a
//! one-shot summary that resolves at that point.

use futures::stream::{self, BoxStream, Stream, StreamExt};
use loom_core::{FinishReason, LoomError, Result};
use tokio::sync::oneshot;

/// Text chunks of a segment, ending early with an error if the source fails
pub type TextStream = BoxStream<'static, Result<String>>;

/// Incremental event produced while a segment streams
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentEvent {
    Delta(String),
    Finish(FinishReason),
}

/// Full text and finish reason of a consumed segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSummary {
    pub text: String,
    pub finish_reason: FinishReason,
}

/// One provider response attempt, still streaming
pub struct Segment {
    body: TextStream,
    summary: oneshot::Receiver<SegmentSummary>,
}

impl Segment {
    /// Build a segment from provider events.
    ///
    /// The summary resolves when the event stream ends. A stream that fails
    /// or never reports a finish reason summarises as `FinishReason::Error`.
    /// Dropping the body before the end drops the summary sender.
    pub fn from_events<S>(events: S) -> Self
    where
        S: Stream<Item = Result<SegmentEvent>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        let body = async_stream::stream! {
            let mut events = Box::pin(events);
            let mut text = String::new();
            let mut finish_reason = None;

            while let Some(event) = events.next().await {
                match event {
                    Ok(SegmentEvent::Delta(delta)) => {
                        text.push_str(&delta);
                        yield Ok(delta);
                    }
                    Ok(SegmentEvent::Finish(reason)) => finish_reason = Some(reason),
                    Err(err) => {
                        let _ = tx.send(SegmentSummary {
                            text,
                            finish_reason: FinishReason::Error,
                        });
                        yield Err(err);
                        return;
                    }
                }
            }

            let _ = tx.send(SegmentSummary {
                text,
                finish_reason: finish_reason.unwrap_or(FinishReason::Error),
            });
        };

        Self {
            body: body.boxed(),
            summary: rx,
        }
    }

    /// A segment with fixed chunks, used by scripted providers
    pub fn fixed<I, T>(chunks: I, finish_reason: FinishReason) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut events: Vec<Result<SegmentEvent>> = chunks
            .into_iter()
            .map(|chunk| Ok(SegmentEvent::Delta(chunk.into())))
            .collect();
        events.push(Ok(SegmentEvent::Finish(finish_reason)));
        Self::from_events(stream::iter(events))
    }

    /// Split into the relayable body and the pending summary
    pub fn into_parts(self) -> (TextStream, PendingSummary) {
        (self.body, PendingSummary(self.summary))
    }
}

/// Summary of a segment whose body is still being relayed
pub struct PendingSummary(oneshot::Receiver<SegmentSummary>);

impl PendingSummary {
    /// Wait for the summary; fails with `Aborted` if the body was dropped early
    pub async fn wait(self) -> Result<SegmentSummary> {
        self.0.await.map_err(|_| LoomError::Aborted)
    }
}
