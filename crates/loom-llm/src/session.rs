//! Completion session
//!
//! Drives the segment continuation loop for one assistant response. Every
//! segment is spliced into the shared `StreamSwitcher` as soon as the
//! provider answers, so the caller's output starts flowing before the
//! segment is known to be complete. A segment cut off by the token budget is
//! followed by a continuation request until the model stops on its own or
//! the segment limit is reached.

use crate::client::RetryingCompletionClient;
use crate::segment::SegmentSummary;
use crate::state_machine::{transition, Directive, SessionEvent, SessionPhase, SessionState};
use crate::switcher::{RelayOutcome, StreamSwitcher};
use loom_core::{LoomError, Message, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Instruction sent after a truncated segment
pub const CONTINUE_PROMPT: &str = "Continue your prior response. IMPORTANT: Immediately begin from where you left off without any interruptions. Do not repeat any content, including artifact and action tags.";

/// Result of a session that ran to a natural stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Concatenated text of every segment: the full assistant message
    pub text: String,
    /// Continuation splices performed
    pub switch_count: u32,
    /// Provider segments relayed
    pub segments: u32,
}

pub struct CompletionSession {
    client: RetryingCompletionClient,
    switcher: Arc<StreamSwitcher>,
    cancel: CancellationToken,
    messages: Vec<Message>,
    max_segments: u32,
}

impl CompletionSession {
    pub fn new(
        client: RetryingCompletionClient,
        switcher: Arc<StreamSwitcher>,
        messages: Vec<Message>,
        max_segments: u32,
    ) -> Self {
        Self {
            client,
            switcher,
            cancel: CancellationToken::new(),
            messages,
            max_segments,
        }
    }

    /// Use an externally owned abort signal
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until the model stops, the segment limit is hit or the session is
    /// aborted. The switcher is always closed when this returns; errors are
    /// also forwarded to it as a terminal item.
    pub async fn run(mut self) -> Result<SessionOutcome> {
        let mut state = SessionState::new(self.max_segments);
        let mut events = VecDeque::from([SessionEvent::Start]);
        let mut failure: Option<LoomError> = None;
        let mut text = String::new();
        let mut last_segment = String::new();
        let mut segments: u32 = 0;

        while let Some(event) = events.pop_front() {
            let (next, directives) = transition(state, event);
            state = next;

            for directive in directives {
                match directive {
                    Directive::CallProvider => {
                        segments += 1;
                        match self.relay_segment(segments).await {
                            Ok(summary) => {
                                tracing::debug!(
                                    segment = segments,
                                    finish_reason = %summary.finish_reason,
                                    chars = summary.text.len(),
                                    "Segment finished"
                                );
                                text.push_str(&summary.text);
                                last_segment = summary.text;
                                events.push_back(SessionEvent::SegmentFinished {
                                    finish_reason: summary.finish_reason,
                                });
                            }
                            Err(LoomError::Aborted) => {
                                tracing::info!(segment = segments, "Session aborted");
                                failure = Some(LoomError::Aborted);
                                events.push_back(SessionEvent::Aborted);
                            }
                            Err(err) => {
                                tracing::error!(segment = segments, "Segment failed: {}", err);
                                events.push_back(SessionEvent::Failed {
                                    message: err.to_string(),
                                });
                                failure = Some(err);
                            }
                        }
                    }
                    Directive::AppendContinuation => {
                        tracing::info!(
                            switch_count = state.switch_count,
                            switches_left = state.switches_left(),
                            "Segment truncated, requesting continuation"
                        );
                        self.messages
                            .push(Message::assistant(std::mem::take(&mut last_segment)));
                        self.messages.push(Message::user(CONTINUE_PROMPT));
                        events.push_back(SessionEvent::ContinuationAppended);
                    }
                    Directive::CloseOutput => {
                        self.switcher.close();
                    }
                    Directive::RejectSegmentLimit => {
                        tracing::error!(
                            max_segments = state.max_segments,
                            "Cannot continue message: maximum segments reached"
                        );
                        self.switcher
                            .fail(LoomError::SegmentLimitExceeded {
                                max_segments: state.max_segments,
                            })
                            .await;
                        failure = Some(LoomError::SegmentLimitExceeded {
                            max_segments: state.max_segments,
                        });
                    }
                    Directive::FailOutput => {
                        let reason = match &state.phase {
                            SessionPhase::Closed { reason } => reason.clone(),
                            _ => "session failed".to_string(),
                        };
                        // An upstream read error has already been forwarded
                        if !self.switcher.is_closed() {
                            self.switcher.fail(LoomError::Stream(reason.clone())).await;
                        }
                        failure.get_or_insert(LoomError::Stream(reason));
                    }
                }
            }
        }

        self.switcher.close();

        match failure {
            Some(err) => Err(err),
            None => {
                tracing::info!(
                    segments,
                    switch_count = state.switch_count,
                    "Completion session finished"
                );
                Ok(SessionOutcome {
                    text,
                    switch_count: state.switch_count,
                    segments,
                })
            }
        }
    }

    /// Request one segment and relay it through the switcher
    async fn relay_segment(&self, index: u32) -> Result<SegmentSummary> {
        tracing::debug!(segment = index, messages = self.messages.len(), "Opening segment");
        let segment = self.client.complete(&self.messages, &self.cancel).await?;
        let (body, summary) = segment.into_parts();

        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(LoomError::Aborted),
            outcome = self.switcher.switch_source(body) => outcome?,
        };

        match outcome {
            RelayOutcome::Drained => summary.wait().await,
            RelayOutcome::Closed | RelayOutcome::DownstreamGone => Err(LoomError::Aborted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ScriptStep, ScriptedProvider};
    use crate::retry::RetryPolicy;
    use futures::StreamExt;
    use loom_core::{FinishReason, Role};
    use std::time::Duration;

    fn new_session(
        provider: &Arc<ScriptedProvider>,
        max_segments: u32,
    ) -> (CompletionSession, Arc<StreamSwitcher>, crate::switcher::SwitcherOutput) {
        let (switcher, output) = StreamSwitcher::new();
        let switcher = Arc::new(switcher);
        let client = RetryingCompletionClient::new(provider.clone())
            .with_policy(RetryPolicy::new(5, Duration::from_millis(1)));
        let session = CompletionSession::new(
            client,
            switcher.clone(),
            vec![Message::user("build me a site")],
            max_segments,
        );
        (session, switcher, output)
    }

    fn length(chunk: &str) -> ScriptStep {
        ScriptStep::segment([chunk], FinishReason::Length)
    }

    #[tokio::test]
    async fn test_single_stop_segment() {
        let provider = Arc::new(ScriptedProvider::new([ScriptStep::segment(
            ["Hello", " world"],
            FinishReason::Stop,
        )]));
        let (session, switcher, output) = new_session(&provider, 5);

        let outcome = session.run().await.unwrap();
        assert_eq!(outcome.text, "Hello world");
        assert_eq!(outcome.switch_count, 0);
        assert_eq!(outcome.segments, 1);
        assert!(switcher.is_closed());

        let chunks: Vec<String> = output.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks.concat(), "Hello world");
    }

    #[tokio::test]
    async fn test_n_segments_report_n_minus_one_switches() {
        for n in 1..=5u32 {
            let mut steps: Vec<ScriptStep> = (1..n).map(|i| length(&format!("s{} ", i))).collect();
            steps.push(ScriptStep::segment(["end"], FinishReason::Stop));
            let provider = Arc::new(ScriptedProvider::new(steps));
            let (session, switcher, output) = new_session(&provider, 5);

            let outcome = session.run().await.unwrap();
            assert_eq!(outcome.segments, n);
            assert_eq!(outcome.switch_count, n - 1);
            assert_eq!(switcher.switches(), n);
            assert_eq!(provider.calls(), n as usize);

            let chunks: Vec<String> = output.map(|c| c.unwrap()).collect().await;
            assert_eq!(chunks.len(), n as usize);
            assert_eq!(chunks.concat(), outcome.text);
        }
    }

    #[tokio::test]
    async fn test_three_truncations_then_stop() {
        let provider = Arc::new(ScriptedProvider::new([
            length("a"),
            length("b"),
            length("c"),
            ScriptStep::segment(["d"], FinishReason::Stop),
        ]));
        let (session, _switcher, output) = new_session(&provider, 5);

        let outcome = session.run().await.unwrap();
        assert_eq!(outcome.switch_count, 3);
        assert_eq!(outcome.text, "abcd");

        let chunks: Vec<String> = output.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks.concat(), "abcd");
    }

    #[tokio::test]
    async fn test_segment_limit_exceeded() {
        let provider = Arc::new(ScriptedProvider::repeating(length("x")));
        let (session, switcher, output) = new_session(&provider, 5);

        let result = session.run().await;
        assert!(matches!(
            result,
            Err(LoomError::SegmentLimitExceeded { max_segments: 5 })
        ));
        assert_eq!(provider.calls(), 6);
        assert_eq!(switcher.switches(), 6);
        assert!(switcher.is_closed());

        let items: Vec<Result<String>> = output.collect().await;
        assert_eq!(items.len(), 7);
        assert!(items[..6].iter().all(|item| item.is_ok()));
        assert!(matches!(
            items[6],
            Err(LoomError::SegmentLimitExceeded { max_segments: 5 })
        ));
    }

    #[tokio::test]
    async fn test_continuation_pair_precedes_next_call() {
        let provider = Arc::new(ScriptedProvider::new([
            ScriptStep::segment(["<artifact>", "<action"], FinishReason::Length),
            ScriptStep::segment([" type=\"shell\">ls</action></artifact>"], FinishReason::Stop),
        ]));
        let (session, _switcher, _output) = new_session(&provider, 5);
        session.run().await.unwrap();

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0], vec![Message::user("build me a site")]);
        assert_eq!(
            requests[1],
            vec![
                Message::user("build me a site"),
                Message::assistant("<artifact><action"),
                Message::user(CONTINUE_PROMPT),
            ]
        );
        assert_eq!(requests[1][1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_continuation_carries_only_latest_segment() {
        let provider = Arc::new(ScriptedProvider::new([
            length("one"),
            length("two"),
            ScriptStep::segment(["three"], FinishReason::Stop),
        ]));
        let (session, _switcher, _output) = new_session(&provider, 5);
        session.run().await.unwrap();

        let third = &provider.requests()[2];
        assert_eq!(third.len(), 5);
        assert_eq!(third[1], Message::assistant("one"));
        assert_eq!(third[3], Message::assistant("two"));
    }

    #[tokio::test]
    async fn test_provider_failure_ends_output_with_error() {
        let provider = Arc::new(ScriptedProvider::new([ScriptStep::status(401)]));
        let (session, switcher, output) = new_session(&provider, 5);

        let result = session.run().await;
        assert!(matches!(result, Err(LoomError::ProviderRejected(_))));
        assert!(switcher.is_closed());

        let items: Vec<Result<String>> = output.collect().await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[tokio::test]
    async fn test_error_finish_reason_ends_session() {
        let provider = Arc::new(ScriptedProvider::new([ScriptStep::segment(
            ["cut"],
            FinishReason::Error,
        )]));
        let (session, _switcher, _output) = new_session(&provider, 5);

        let outcome = session.run().await.unwrap();
        assert_eq!(outcome.text, "cut");
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_session_is_aborted() {
        let provider = Arc::new(ScriptedProvider::repeating(length("x")));
        let (session, switcher, output) = new_session(&provider, 5);
        session.cancel_token().cancel();

        let result = session.run().await;
        assert!(matches!(result, Err(LoomError::Aborted)));
        assert_eq!(provider.calls(), 0);
        assert!(switcher.is_closed());

        let items: Vec<Result<String>> = output.collect().await;
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_consumer_aborts_session() {
        let provider = Arc::new(ScriptedProvider::repeating(length("x")));
        let (session, switcher, output) = new_session(&provider, 5);
        drop(output);

        let result = session.run().await;
        assert!(matches!(result, Err(LoomError::Aborted)));
        assert_eq!(provider.calls(), 1);
        assert!(switcher.is_closed());
    }

    #[tokio::test]
    async fn test_abort_mid_segment_stops_relay() {
        let provider = Arc::new(ScriptedProvider::new([
            ScriptStep::stall(["partial "]),
            ScriptStep::segment(["never sent"], FinishReason::Stop),
        ]));
        let (session, switcher, mut output) = new_session(&provider, 5);
        let cancel = session.cancel_token();
        let run = tokio::spawn(session.run());

        let first = tokio::time::timeout(Duration::from_secs(5), output.next())
            .await
            .unwrap();
        assert_eq!(first.unwrap().unwrap(), "partial ");

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(LoomError::Aborted)));

        let rest: Vec<Result<String>> = output.collect().await;
        assert!(rest.is_empty());
        assert_eq!(provider.calls(), 1);
        assert!(switcher.is_closed());
    }
}
