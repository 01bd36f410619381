//! Structured engine events and the sinks that receive them.
//!
//! The fetcher and the collector never log to a global file; they are handed
//! an [`EventSink`] when they are built. `TracingSink` forwards to `tracing`,
//! `JsonLinesSink` appends one JSON object per line to a file that is opened
//! when the sink is created and flushed when a sweep ends.

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::models::{AttemptOutcome, RunSummary, Tier};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    RequestIssued {
        url: String,
        attempt: u32,
    },
    RequestFailed {
        url: String,
        attempt: u32,
        error: String,
    },
    FetchExhausted {
        url: String,
        attempts: u32,
        error: String,
    },
    AttemptRecorded {
        resort: String,
        outcome: AttemptOutcome,
        tier: Tier,
        fields: usize,
    },
    SweepFinished {
        summary: RunSummary,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

// ── tracing ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: EngineEvent) {
        match event {
            EngineEvent::RequestIssued { url, attempt } => {
                debug!(%url, attempt, "GET");
            }
            EngineEvent::RequestFailed { url, attempt, error } => {
                warn!(%url, attempt, %error, "request failed");
            }
            EngineEvent::FetchExhausted { url, attempts, error } => {
                warn!(%url, attempts, %error, "retries exhausted");
            }
            EngineEvent::AttemptRecorded { resort, outcome, tier, fields } => {
                info!(%resort, %outcome, %tier, fields, "attempt recorded");
            }
            EngineEvent::SweepFinished { summary } => {
                info!(
                    attempted = summary.attempted,
                    succeeded = summary.succeeded,
                    partial = summary.partial,
                    failed = summary.failed,
                    cancelled = summary.cancelled,
                    "sweep finished"
                );
            }
        }
    }
}

// ── JSON lines ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct Line<'a> {
    at: NaiveDateTime,
    #[serde(flatten)]
    event: &'a EngineEvent,
}

/// Appends events to a file, one JSON object per line.
pub struct JsonLinesSink {
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesSink {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open event log {:?}", path))?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl EventSink for JsonLinesSink {
    fn emit(&self, event: EngineEvent) {
        let line = Line {
            at: Utc::now().naive_utc(),
            event: &event,
        };
        let Ok(mut writer) = self.writer.lock() else {
            return;
        };
        let written = serde_json::to_writer(&mut *writer, &line)
            .map_err(anyhow::Error::from)
            .and_then(|_| writer.write_all(b"\n").map_err(anyhow::Error::from));
        if let Err(e) = written {
            warn!("event log write failed: {:#}", e);
        }
    }

    fn flush(&self) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        writer.flush().context("Failed to flush event log")
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_lines_sink_writes_one_object_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/events.jsonl");
        let sink = JsonLinesSink::create(&path).unwrap();

        sink.emit(EngineEvent::RequestIssued {
            url: "https://a.example".into(),
            attempt: 1,
        });
        sink.emit(EngineEvent::AttemptRecorded {
            resort: "Vail".into(),
            outcome: AttemptOutcome::Success,
            tier: Tier::Generic,
            fields: 4,
        });
        sink.flush().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "request_issued");
        assert_eq!(lines[1]["resort"], "Vail");
        assert_eq!(lines[1]["outcome"], "success");
        assert!(lines[1].get("at").is_some());
    }
}
