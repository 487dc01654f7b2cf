//! Structured logging for debugging reelforge.
//!
//! Log levels:
//! - ERROR: Task failures and fatal provider errors
//! - WARN: Retried failures, provider switches, skipped work
//! - INFO: Phase and task lifecycle (start, barrier completion, queue moves)
//! - DEBUG: Request/response pairs and per-unit traces
//! - TRACE: Barrier arrivals and pool slot accounting
//!
//! Debug mode can be enabled with `--debug` flag or `REELFORGE_DEBUG=1` env var.
//! `REELFORGE_LOG` takes an `EnvFilter` directive and overrides both.

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

use tracing_subscriber::EnvFilter;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Initialize logging to ~/.reelforge/reelforge.log, with explicit debug
/// mode setting.
pub fn init_with_debug(debug: bool) {
    let env_debug = std::env::var("REELFORGE_DEBUG")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false);

    let debug_enabled = debug || env_debug;
    DEBUG_ENABLED.store(debug_enabled, Ordering::SeqCst);

    let default_level = if debug_enabled { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("REELFORGE_LOG")
        .unwrap_or_else(|_| EnvFilter::new(format!("reelforge={}", default_level)));

    let Some(dir) = dirs::home_dir().map(|h| h.join(".reelforge")) else {
        return;
    };
    let _ = std::fs::create_dir_all(&dir);
    let path = dir.join("reelforge.log");
    // File::create truncates on startup
    let Ok(file) = File::create(&path) else {
        return;
    };
    LOG_PATH.set(path).ok();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_thread_names(true)
        .try_init();
}

/// Check if debug mode is enabled.
pub fn is_debug() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

/// Path of the active log file, once initialised.
pub fn log_path() -> Option<&'static PathBuf> {
    LOG_PATH.get()
}

/// Shorten a payload for request/response logging. Binary bodies are
/// summarised by length.
pub fn summarize(body: &[u8], limit: usize) -> String {
    match std::str::from_utf8(body) {
        Ok(text) if text.chars().count() <= limit => text.to_string(),
        Ok(text) => {
            let head: String = text.chars().take(limit).collect();
            format!("{}... ({} bytes)", head, body.len())
        }
        Err(_) => format!("<{} bytes of binary data>", body.len()),
    }
}
