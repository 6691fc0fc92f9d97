use serde::Serialize;
use std::io::Write;
use transat::BackendSnapshot;

/// Emit a JSONL event to stdout (flushed immediately for piped output).
pub fn emit<T: Serialize>(event: &T) {
    if let Ok(json) = serde_json::to_string(event) {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        let _ = writeln!(lock, "{json}");
        let _ = lock.flush();
    }
}

pub use transat::now_ms;

// ── Session events ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventStarted {
    pub event: &'static str,
    pub publisher_id: String,
    pub mode: String,
    pub backends: Vec<String>,
    pub timestamp_ms: u64,
}

impl EventStarted {
    pub fn new(publisher_id: &str, mode: &str, backends: &[&str]) -> Self {
        Self {
            event: "started",
            publisher_id: publisher_id.to_string(),
            mode: mode.to_string(),
            backends: backends.iter().map(|b| b.to_string()).collect(),
            timestamp_ms: now_ms(),
        }
    }
}

// ── Delivery events ─────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventConfirmed {
    pub event: &'static str,
    pub message: u32,
    pub worker: u32,
    pub latency_ms: f64,
    pub elapsed_s: f64,
}

#[derive(Serialize)]
pub struct EventDeliveryError {
    pub event: &'static str,
    pub message: u32,
    pub worker: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    pub error: String,
    pub elapsed_s: f64,
}

// ── Summary ─────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventPublishSummary {
    pub event: &'static str,
    pub messages: u32,
    pub confirmed: u32,
    pub failed: u32,
    pub workers: u32,
    pub backends: Vec<BackendSnapshot>,
    /// Backend names whose held-set is not exactly the sent messages.
    pub incomplete: Vec<String>,
    pub messages_per_sec: f64,
    pub elapsed_s: f64,
}
