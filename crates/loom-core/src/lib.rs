//! # loom-core
//!
//! Core types for Loom: conversation messages, finish reasons, the unified
//! error type and configuration loading.
//!
//! Loom turns a chat with a language model into file writes and shell
//! commands inside a sandbox, and surfaces a live preview once the
//! sandbox's development server reports ready.

pub mod config;
mod error;
mod types;

pub use config::{
    LoomConfig, ProviderConfig, SandboxConfig, ServerConfig, SessionConfig, DEFAULT_MODEL,
};
pub use error::{LoomError, Result};
pub use types::*;
