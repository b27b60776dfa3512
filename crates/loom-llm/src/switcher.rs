//! Stream switcher
//!
//! Presents one continuous text output to a single downstream consumer while
//! the upstream source is replaced any number of times. Only one upstream
//! relays at a time: a switch that arrives while a relay is draining waits on
//! the relay lock until that relay has finished or been cancelled.

use crate::segment::TextStream;
use futures::{Stream, StreamExt};
use loom_core::{LoomError, Result};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Chunks buffered between the relay and the downstream consumer
const DEFAULT_BUFFER: usize = 64;

type Sink = mpsc::Sender<Result<String>>;

/// How a relay ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The source reached its end
    Drained,
    /// The switcher was closed before or during the relay
    Closed,
    /// The downstream consumer went away
    DownstreamGone,
}

/// Proxy whose upstream can be replaced without the consumer reattaching
pub struct StreamSwitcher {
    sink: Mutex<Option<Sink>>,
    relay: tokio::sync::Mutex<()>,
    closed: AtomicBool,
    shutdown: CancellationToken,
    switches: AtomicU32,
}

/// The single downstream end of a `StreamSwitcher`
pub struct SwitcherOutput {
    rx: mpsc::Receiver<Result<String>>,
}

impl Stream for SwitcherOutput {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl StreamSwitcher {
    pub fn new() -> (Self, SwitcherOutput) {
        Self::with_buffer(DEFAULT_BUFFER)
    }

    pub fn with_buffer(buffer: usize) -> (Self, SwitcherOutput) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let switcher = Self {
            sink: Mutex::new(Some(tx)),
            relay: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            switches: AtomicU32::new(0),
        };
        (switcher, SwitcherOutput { rx })
    }

    /// Number of sources installed so far
    pub fn switches(&self) -> u32 {
        self.switches.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Install `source` as the active upstream and relay it until it ends.
    ///
    /// Refused with a warning once the switcher is closed. A read error from
    /// the source is forwarded downstream as a terminal error, the switcher
    /// closes, and the error is returned.
    pub async fn switch_source(&self, source: TextStream) -> Result<RelayOutcome> {
        if self.is_closed() {
            tracing::warn!("Attempt to switch source on closed stream");
            return Ok(RelayOutcome::Closed);
        }

        let _relay = self.relay.lock().await;

        let Some(sink) = self.active_sink() else {
            tracing::warn!("Attempt to switch source on closed stream");
            return Ok(RelayOutcome::Closed);
        };

        let installed = self.switches.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(switches = installed, "Installed new upstream source");

        self.pump(source, sink).await
    }

    async fn pump(&self, mut source: TextStream, sink: Sink) -> Result<RelayOutcome> {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(RelayOutcome::Closed),
                next = source.next() => next,
            };

            match next {
                None => return Ok(RelayOutcome::Drained),
                Some(Ok(chunk)) => {
                    let sent = tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => return Ok(RelayOutcome::Closed),
                        sent = sink.send(Ok(chunk)) => sent,
                    };
                    if sent.is_err() {
                        tracing::debug!("Downstream consumer dropped, closing switcher");
                        self.close();
                        return Ok(RelayOutcome::DownstreamGone);
                    }
                }
                Some(Err(err)) => {
                    let message = err.to_string();
                    tracing::error!("Upstream read failed: {}", message);
                    let _ = sink.send(Err(err)).await;
                    self.close();
                    return Err(LoomError::Stream(message));
                }
            }
        }
    }

    /// Forward `err` downstream as a terminal error, then close
    pub async fn fail(&self, err: LoomError) {
        let Some(sink) = self.active_sink() else {
            tracing::warn!("Dropping error for closed stream: {}", err);
            return;
        };
        let _ = sink.send(Err(err)).await;
        self.close();
    }

    /// Close the switcher. Returns `false` if it was already closed.
    ///
    /// Cancels the active relay (dropping its source) and releases the sink;
    /// the consumer sees end-of-stream once any buffered chunks are read.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.shutdown.cancel();
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        tracing::debug!(switches = self.switches(), "Stream switcher closed");
        true
    }

    fn active_sink(&self) -> Option<Sink> {
        if self.is_closed() {
            return None;
        }
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
