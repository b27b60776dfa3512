//! Pure state machine for completion sessions
//!
//! No I/O: `transition(state, event)` returns the next state plus the
//! directives the session must carry out. Terminal states ignore further
//! events so `closed` never reverts.

use loom_core::FinishReason;

/// Default maximum number of continuation splices per response
pub const MAX_SEGMENTS: u32 = 5;

/// Where a session is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    /// A segment is being requested or relayed
    Streaming,
    /// A truncated segment finished; continuation messages are pending
    Continuing,
    /// The model stopped on its own and the output has been closed
    Finished,
    /// Ended early: segment limit, provider failure or abort
    Closed { reason: String },
}

/// Bookkeeping owned exclusively by one completion session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub phase: SessionPhase,
    /// Continuation splices performed so far; never exceeds `max_segments`
    pub switch_count: u32,
    pub closed: bool,
    pub max_segments: u32,
}

impl SessionState {
    pub fn new(max_segments: u32) -> Self {
        Self {
            phase: SessionPhase::Idle,
            switch_count: 0,
            closed: false,
            max_segments,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, SessionPhase::Finished | SessionPhase::Closed { .. })
    }

    /// Splices still available before the segment limit is hit
    pub fn switches_left(&self) -> u32 {
        self.max_segments.saturating_sub(self.switch_count)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(MAX_SEGMENTS)
    }
}

/// Events fed into the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Start,
    SegmentFinished { finish_reason: FinishReason },
    ContinuationAppended,
    Failed { message: String },
    Aborted,
}

/// Side effects requested by a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Request the next segment and splice it into the output
    CallProvider,
    /// Push `assistant: <partial>` and `user: <continue prompt>` onto the history
    AppendContinuation,
    /// End the downstream output normally
    CloseOutput,
    /// End the downstream output with the segment-limit error
    RejectSegmentLimit,
    /// End the downstream output with the error that caused the failure
    FailOutput,
}

/// Pure state transition function
pub fn transition(state: SessionState, event: SessionEvent) -> (SessionState, Vec<Directive>) {
    if state.is_terminal() {
        tracing::debug!(?event, phase = ?state.phase, "Ignoring event for terminal session");
        return (state, vec![]);
    }

    match (state.phase.clone(), event) {
        (SessionPhase::Idle, SessionEvent::Start) => (
            SessionState {
                phase: SessionPhase::Streaming,
                ..state
            },
            vec![Directive::CallProvider],
        ),

        (SessionPhase::Streaming, SessionEvent::SegmentFinished { finish_reason }) => {
            if !finish_reason.is_truncated() {
                return (
                    SessionState {
                        phase: SessionPhase::Finished,
                        closed: true,
                        ..state
                    },
                    vec![Directive::CloseOutput],
                );
            }

            if state.switch_count >= state.max_segments {
                let reason = format!(
                    "maximum segments reached ({} of {})",
                    state.switch_count, state.max_segments
                );
                return (
                    SessionState {
                        phase: SessionPhase::Closed { reason },
                        closed: true,
                        ..state
                    },
                    vec![Directive::RejectSegmentLimit],
                );
            }

            (
                SessionState {
                    phase: SessionPhase::Continuing,
                    switch_count: state.switch_count + 1,
                    ..state
                },
                vec![Directive::AppendContinuation],
            )
        }

        (SessionPhase::Continuing, SessionEvent::ContinuationAppended) => (
            SessionState {
                phase: SessionPhase::Streaming,
                ..state
            },
            vec![Directive::CallProvider],
        ),

        (_, SessionEvent::Failed { message }) => (
            SessionState {
                phase: SessionPhase::Closed { reason: message },
                closed: true,
                ..state
            },
            vec![Directive::FailOutput],
        ),

        (_, SessionEvent::Aborted) => (
            SessionState {
                phase: SessionPhase::Closed {
                    reason: "aborted".to_string(),
                },
                closed: true,
                ..state
            },
            vec![Directive::CloseOutput],
        ),

        (phase, event) => {
            let reason = format!("invalid transition from {:?} on {:?}", phase, event);
            tracing::error!("{}", reason);
            (
                SessionState {
                    phase: SessionPhase::Closed { reason },
                    closed: true,
                    ..state
                },
                vec![Directive::FailOutput],
            )
        }
    }
}
