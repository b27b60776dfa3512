//! Server-Sent Events endpoint for session notifications

use crate::server::SharedState;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

/// SSE handler - streams notifications as they are published
pub async fn sse_handler(
    State(app): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut updates = BroadcastStream::new(app.subscribe());

    let stream = async_stream::stream! {
        while let Some(update) = updates.next().await {
            match update {
                Ok(notification) => {
                    if let Ok(json) = serde_json::to_string(&notification) {
                        yield Ok(Event::default().event(notification.kind.event_name()).data(json));
                    }
                }
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Event subscriber lagged behind");
                    yield Ok(Event::default().event("lagged").data(missed.to_string()));
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
