//! # loom-server
//!
//! HTTP surface for Loom, served with Axum:
//! - `POST /chat` streams the spliced completion as plain text
//! - `GET /events` streams session and action notifications over SSE
//! - `POST /sessions/:id/abort` cancels a running session
//! - `GET /health` for liveness checks

mod notification;
mod server;
mod sse;

pub use notification::{Notification, NotificationKind};
pub use server::{router, serve, AppState, ChatRequest, SharedState, SESSION_ID_HEADER};

use loom_actions::{ActionExecutor, LocalSandbox};
use loom_core::LoomConfig;
use loom_llm::OpenAiProvider;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Run the server described by `config`, with the sandbox rooted under `base`
pub async fn run(config: LoomConfig, base: &Path) -> anyhow::Result<()> {
    config.validate()?;

    let provider = OpenAiProvider::from_config(&config.provider)?;
    let sandbox = LocalSandbox::from_config(&config.sandbox, base);
    let executor = ActionExecutor::from_config(&config.sandbox)?;

    info!(
        model = provider.model(),
        sandbox = %sandbox.root().display(),
        start_command = executor.start_command(),
        "Starting loom server"
    );

    let state = Arc::new(
        AppState::new(Arc::new(provider), Arc::new(sandbox), executor)
            .with_session_config(&config.session),
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    println!("Loom running at http://{}", addr);
    println!("Press Ctrl+C to stop");

    serve(state, &addr).await
}
