//! Structured logging for snsm-agent.
//!
//! Provides a [`Logger`] that writes events to stdout and optionally to a log
//! file. Output is either human-readable plain text or newline-delimited JSON
//! (NDJSON) so the agent's own log can be shipped next to the data it exports.

use chrono::Local;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::sync::{Arc, Mutex};

// ── Event types ──────────────────────────────────────────────────────────────

/// All distinct event kinds that the agent can emit.
///
/// The `#[serde(tag = "event")]` attribute puts an `"event"` key in JSON
/// output so consumers can filter by type without inspecting structure.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event<'a> {
    /// Informational startup / status message.
    Info { message: &'a str },

    /// Diagnostic detail, only written in verbose mode.
    Debug { message: &'a str },

    /// A recoverable failure worth surfacing to the operator.
    Error { message: &'a str },

    /// The agent registered with the collector.
    Registered { agent_id: &'a str, ip: &'a str },

    /// The detector raised an alert.
    Alert {
        signature_id: &'a str,
        name:         &'a str,
        severity:     &'a str,
        src:          &'a str,
    },

    /// A batch of scored flows was accepted by the collector.
    FlowsExported { count: usize, total: u64 },

    /// A batch of alerts was accepted by the collector.
    AlertsExported { count: usize },

    /// A collector call failed; the batch it carried is gone.
    ExportFailed { endpoint: &'a str, dropped: usize, error: &'a str },

    /// Periodic health report sent to the collector.
    Heartbeat {
        cpu_percent:      f32,
        memory_percent:   f32,
        packets_captured: u64,
        alerts_generated: u64,
    },

    /// Session summary emitted on graceful shutdown.
    SessionSummary {
        duration_secs:  u64,
        hosts_seen:     u64,
        flows_tracked:  u64,
        flows_exported: u64,
        packets_total:  u64,
        alerts_emitted: u64,
    },
}

// ── Logger ───────────────────────────────────────────────────────────────────

/// Shared, thread-safe structured logger.
///
/// Constructed once in `main` and passed as an `Arc<Logger>` to every module
/// that needs to emit events. The file `Mutex` serialises writes so lines are
/// never interleaved across the capture and export threads.
pub struct Logger {
    json:    bool,
    verbose: bool,
    /// `None` when `--log-file` was not given.
    file:    Option<Mutex<BufWriter<std::fs::File>>>,
}

pub type SharedLogger = Arc<Logger>;

impl Logger {
    /// Creates a new logger.
    ///
    /// # Arguments
    /// * `json`     - Emit NDJSON instead of plain text when `true`.
    /// * `verbose`  - Also write [`Event::Debug`] events.
    /// * `log_path` - If `Some`, open (or create) this file for appended writes.
    ///
    /// # Errors
    /// Returns an `io::Error` if the log file cannot be opened or created.
    pub fn new(json: bool, verbose: bool, log_path: Option<&str>) -> io::Result<Self> {
        let file = match log_path {
            Some(path) => {
                let f = OpenOptions::new().create(true).append(true).open(path)?;
                Some(Mutex::new(BufWriter::new(f)))
            }
            None => None,
        };

        Ok(Self { json, verbose, file })
    }

    /// Logs a single [`Event`] to stdout and, if configured, the log file.
    pub fn log(&self, event: &Event) {
        if matches!(event, Event::Debug { .. }) && !self.verbose {
            return;
        }

        let line = self.render(event);
        println!("{}", line);

        if let Some(mutex) = &self.file {
            if let Ok(mut writer) = mutex.lock() {
                let _ = writeln!(writer, "{}", line);
                let _ = writer.flush();
            }
        }
    }

    fn render(&self, event: &Event) -> String {
        let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string();

        if self.json {
            let mut val = serde_json::to_value(event).unwrap_or_default();
            if let Some(obj) = val.as_object_mut() {
                obj.insert("timestamp".to_string(), serde_json::Value::String(timestamp));
            }
            serde_json::to_string(&val).unwrap_or_default()
        } else {
            format!("[{}] {}", timestamp, plain_text(event))
        }
    }
}

/// Formats an [`Event`] as a human-readable plain-text string (no timestamp).
fn plain_text(event: &Event) -> String {
    match event {
        Event::Info { message } =>
            format!("[INFO] {}", message),

        Event::Debug { message } =>
            format!("[DEBUG] {}", message),

        Event::Error { message } =>
            format!("[ERROR] {}", message),

        Event::Registered { agent_id, ip } =>
            format!("[REGISTERED] agent {} monitoring {}", short_id(agent_id), ip),

        Event::Alert { signature_id, name, severity, src } =>
            format!("[ALERT] {} {} from {} ({})", severity.to_uppercase(), name, src, signature_id),

        Event::FlowsExported { count, total } =>
            format!("[EXPORT] sent {} flows (total: {})", count, total),

        Event::AlertsExported { count } =>
            format!("[EXPORT] sent {} alerts", count),

        Event::ExportFailed { endpoint, dropped, error } =>
            format!("[EXPORT FAILED] {} dropped {} records: {}", endpoint, dropped, error),

        Event::Heartbeat { cpu_percent, memory_percent, packets_captured, alerts_generated } =>
            format!(
                "[HEARTBEAT] cpu={:.1}% mem={:.1}% packets={} alerts={}",
                cpu_percent, memory_percent, packets_captured, alerts_generated
            ),

        Event::SessionSummary {
            duration_secs, hosts_seen, flows_tracked, flows_exported, packets_total, alerts_emitted
        } => format!(
            "[SUMMARY] duration={}s hosts={} flows={} exported={} packets={} alerts={}",
            duration_secs, hosts_seen, flows_tracked, flows_exported, packets_total, alerts_emitted
        ),
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
