//! API key lookup for the completion provider

use loom_core::{LoomError, Result};
use std::env;

/// Read the provider API key from the environment variable `key_env`
pub fn get_api_key(key_env: &str) -> Result<String> {
    match env::var(key_env) {
        Ok(key) if !key.trim().is_empty() => {
            tracing::info!("Using provider API key from {}", key_env);
            Ok(key.trim().to_string())
        }
        _ => Err(LoomError::Auth(format!(
            "No API key found. Set {}=... or change provider.api_key_env in .loom/config.toml",
            key_env
        ))),
    }
}
