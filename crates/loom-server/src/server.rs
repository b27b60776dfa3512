//! Axum web server for chat sessions

use crate::notification::{Notification, NotificationKind};
use crate::sse;
use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, HeaderName, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use loom_actions::{find_artifact, ActionExecutor, ExecutionEvent, Sandbox};
use loom_core::{Message, SessionConfig};
use loom_llm::{
    CompletionProvider, CompletionSession, RetryPolicy, RetryingCompletionClient, StreamSwitcher,
    MAX_SEGMENTS,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::Instrument;
use uuid::Uuid;

/// Response header carrying the id used by the abort endpoint
pub const SESSION_ID_HEADER: &str = "x-session-id";

/// Body of every top-level failure; details stay in the server log
const GENERIC_ERROR: &str = "An error occurred while processing your request";

/// Notifications kept for slow `/events` subscribers
const NOTIFICATION_BUFFER: usize = 256;

/// Body of `POST /chat`
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
}

/// Handles needed to abort a running session
#[derive(Clone)]
struct ActiveSession {
    cancel: CancellationToken,
    switcher: Arc<StreamSwitcher>,
}

/// Shared application state
pub struct AppState {
    provider: Arc<dyn CompletionProvider>,
    policy: RetryPolicy,
    max_segments: u32,
    sandbox: Arc<dyn Sandbox>,
    executor: ActionExecutor,
    /// Serializes artifact execution against the shared sandbox
    execution: Mutex<()>,
    /// Cancels the artifact execution of the latest turn
    current_execution: std::sync::Mutex<Option<CancellationToken>>,
    sessions: RwLock<HashMap<Uuid, ActiveSession>>,
    notifications: broadcast::Sender<Notification>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        sandbox: Arc<dyn Sandbox>,
        executor: ActionExecutor,
    ) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);
        Self {
            provider,
            policy: RetryPolicy::default(),
            max_segments: MAX_SEGMENTS,
            sandbox,
            executor,
            execution: Mutex::new(()),
            current_execution: std::sync::Mutex::new(None),
            sessions: RwLock::new(HashMap::new()),
            notifications,
        }
    }

    pub fn with_session_config(mut self, config: &SessionConfig) -> Self {
        self.policy = RetryPolicy::from_config(config);
        self.max_segments = config.max_segments;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Number of sessions still streaming or executing
    pub async fn active_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Kill everything running in the sandbox
    pub fn halt_sandbox(&self) {
        self.executor.stop_dev_server();
        self.sandbox.halt();
    }

    /// Make `next` the current execution, cancelling the previous turn's
    /// actions and stopping its dev server
    fn supersede_execution(&self, next: &CancellationToken) {
        let previous = self
            .current_execution
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(next.clone());

        if let Some(previous) = previous {
            if !previous.is_cancelled() {
                tracing::info!("Cancelling artifact execution of the previous turn");
                previous.cancel();
            }
        }
        self.executor.stop_dev_server();
    }

    fn notify(&self, session_id: Uuid, kind: NotificationKind) {
        // No subscribers is not an error
        let _ = self.notifications.send(Notification::new(session_id, kind));
    }
}

/// Build the router
pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/chat", post(chat))
        .route("/events", get(sse::sse_handler))
        .route("/sessions/:id/abort", post(abort_session))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}

/// Serve the router until ctrl-c
pub async fn serve(state: SharedState, addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Loom listening on {}", listener.local_addr()?);

    let shutdown_state = state.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down, halting sandbox");
            shutdown_state.halt_sandbox();
        })
        .await?;
    Ok(())
}

/// POST /chat - streams the spliced completion as plain text
async fn chat(State(app): State<SharedState>, body: Bytes) -> Response {
    let request: ChatRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::error!("Invalid chat request: {}", e);
            return error_response();
        }
    };

    let session_id = Uuid::new_v4();
    let (switcher, output) = StreamSwitcher::new();
    let switcher = Arc::new(switcher);
    let cancel = CancellationToken::new();

    app.sessions.write().await.insert(
        session_id,
        ActiveSession {
            cancel: cancel.clone(),
            switcher: switcher.clone(),
        },
    );

    let client = RetryingCompletionClient::new(app.provider.clone()).with_policy(app.policy);
    let session = CompletionSession::new(client, switcher, request.messages, app.max_segments)
        .with_cancel(cancel);

    tracing::info!(session = %session_id, "Chat session started");
    tokio::spawn(
        drive_session(app.clone(), session_id, session)
            .instrument(tracing::info_span!("session", id = %session_id)),
    );

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (HeaderName::from_static(SESSION_ID_HEADER), session_id.to_string()),
        ],
        Body::from_stream(output),
    )
        .into_response()
}

/// Run the session, then extract and execute its artifact
async fn drive_session(app: SharedState, session_id: Uuid, session: CompletionSession) {
    app.notify(session_id, NotificationKind::SessionStarted);
    let cancel = session.cancel_token();

    match session.run().await {
        Ok(outcome) => {
            app.notify(
                session_id,
                NotificationKind::SessionFinished {
                    segments: outcome.segments,
                    switch_count: outcome.switch_count,
                },
            );
            execute_artifact(&app, session_id, &outcome.text, cancel).await;
        }
        Err(e) => {
            tracing::error!("Chat session failed: {}", e);
            app.notify(
                session_id,
                NotificationKind::SessionFailed {
                    error: e.to_string(),
                },
            );
        }
    }

    app.sessions.write().await.remove(&session_id);
}

/// Execute the message's artifact, publishing progress as notifications.
///
/// A newer turn or an abort cancels `cancel`. The execution lock is released
/// once the dev server is spawned; its preview URL is reported by a
/// background task.
async fn execute_artifact(
    app: &SharedState,
    session_id: Uuid,
    text: &str,
    cancel: CancellationToken,
) {
    let Some(artifact) = find_artifact(text) else {
        tracing::warn!("No artifact found in the message");
        app.notify(session_id, NotificationKind::ArtifactMissing);
        return;
    };

    for skipped in &artifact.skipped {
        app.notify(
            session_id,
            NotificationKind::ActionSkipped {
                index: skipped.index,
                reason: skipped.reason.clone(),
            },
        );
    }

    app.supersede_execution(&cancel);

    let (events, mut progress) = mpsc::unbounded_channel::<ExecutionEvent>();
    let forwarder = {
        let app = app.clone();
        tokio::spawn(
            async move {
                while let Some(event) = progress.recv().await {
                    app.notify(session_id, event.into());
                }
            }
            .in_current_span(),
        )
    };

    let mut report = {
        let _execution = app.execution.lock().await;
        app.executor
            .start(&artifact, app.sandbox.as_ref(), &cancel, &events)
            .await
    };

    // Every failure is published before the completion notice
    drop(events);
    if let Err(e) = forwarder.await {
        tracing::warn!("Progress forwarder stopped: {}", e);
    }

    app.notify(
        session_id,
        NotificationKind::ActionsCompleted {
            files_written: report.files_written.len(),
            commands_run: report.commands_run.len(),
            errors: report.errors.len(),
            cancelled: report.cancelled,
            summary: report.summary(),
        },
    );

    if let Some(watch) = report.pending_preview.take() {
        let app = app.clone();
        tokio::spawn(
            async move {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::debug!("Stopped waiting for preview");
                    }
                    preview = watch.wait() => match preview {
                        Some(preview) => app.notify(
                            session_id,
                            NotificationKind::PreviewReady { url: preview.url },
                        ),
                        None => tracing::warn!("Development server did not report a preview URL"),
                    },
                }
            }
            .in_current_span(),
        );
    }
}

/// POST /sessions/:id/abort
async fn abort_session(State(app): State<SharedState>, Path(id): Path<Uuid>) -> StatusCode {
    let session = app.sessions.read().await.get(&id).cloned();
    let Some(session) = session else {
        return StatusCode::NOT_FOUND;
    };

    tracing::info!(session = %id, "Aborting session");
    session.cancel.cancel();
    session.switcher.close();
    app.halt_sandbox();
    StatusCode::NO_CONTENT
}

/// GET /health
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "loom"
    }))
}

fn error_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": GENERIC_ERROR })),
    )
        .into_response()
}
