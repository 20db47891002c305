use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use cardreg_core::now_rfc3339;

use crate::model::RowState;

// File names co-located with the source data. The JSONL file is the
// durable source of truth for progress reconstruction.
const TEXT_LOG: &str = "vault_run.log";
const JSON_LOG: &str = "vault_run.jsonl";

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// One structured run event. Serialized as a single JSON line; a
/// stateless poller folds these back into per-row progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum LogEvent {
    BatchStarted {
        run_id: String,
        source: String,
        total: usize,
    },
    RowMapped {
        index: usize,
        card_no: String,
        name: String,
    },
    OverrideApplied {
        index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        card_no: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        download_card: Option<bool>,
    },
    CardNoMissing {
        index: usize,
    },
    PhotoCandidates {
        index: usize,
        candidates: Vec<String>,
    },
    PhotoAttached {
        index: usize,
        has_photo: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file: Option<String>,
    },
    RequestSent {
        index: usize,
        card_no: String,
        action: String,
        /// Envelope with the photo payload redacted.
        envelope: String,
    },
    ResponseReceived {
        index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        http_status: Option<u16>,
        code: String,
        message: String,
    },
    RowError {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        card_no: Option<String>,
    },
    RowCompleted {
        index: usize,
        state: RowState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        card_no: String,
        duration_ms: u64,
        started_at: String,
    },
    /// Completion marker — a poller treats the batch as finished only
    /// after seeing this.
    BatchCompleted {
        run_id: String,
        attempted: u64,
        registered: u64,
        failed: u64,
        skipped: u64,
    },
}

/// A log line: timestamp plus event payload, flattened into one object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub ts: String,
    #[serde(flatten)]
    pub event: LogEvent,
}

/// Strip the base64 photo payload out of an envelope before logging it.
pub fn redact_photo(envelope: &str) -> String {
    let open = match envelope.find("<Photo>") {
        Some(i) => i,
        None => return envelope.to_string(),
    };
    let close = match envelope[open..].find("</Photo>") {
        Some(i) => open + i,
        None => return envelope.to_string(),
    };
    format!(
        "{}<Photo>[redacted]{}",
        &envelope[..open],
        &envelope[close..]
    )
}

// ---------------------------------------------------------------------------
// RunLog
// ---------------------------------------------------------------------------

/// Append-only run logs for one execution context: a human-readable text
/// log and a structured JSONL log, co-located with the source data.
///
/// Every append is one complete line written in a single call, so
/// concurrent row workers interleave whole events, never partial ones.
/// Log failures degrade to a `tracing` warning — they never abort a row.
pub struct RunLog {
    text_path: PathBuf,
    json_path: PathBuf,
}

impl RunLog {
    /// Logs for the execution context that owns `source` (a file's parent
    /// directory, or the directory itself).
    pub fn for_source(source: &Path) -> Self {
        let dir = context_dir(source);
        Self {
            text_path: dir.join(TEXT_LOG),
            json_path: dir.join(JSON_LOG),
        }
    }

    /// Path of the structured log for a source, for replay by a process
    /// that did not run the batch.
    pub fn json_path_for(source: &Path) -> PathBuf {
        context_dir(source).join(JSON_LOG)
    }

    pub fn append(&self, event: LogEvent) {
        let record = LogRecord { ts: now_rfc3339(), event };

        match serde_json::to_string(&record) {
            Ok(mut line) => {
                line.push('\n');
                append_line(&self.json_path, &line);
            }
            Err(e) => warn!("run log serialization failed: {e}"),
        }

        let mut line = human_line(&record);
        line.push('\n');
        append_line(&self.text_path, &line);
    }
}

fn context_dir(source: &Path) -> PathBuf {
    if source.is_dir() {
        source.to_path_buf()
    } else {
        source.parent().map(|p| p.to_path_buf()).unwrap_or_else(|| PathBuf::from("."))
    }
}

fn append_line(path: &Path, line: &str) {
    let result = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut f| f.write_all(line.as_bytes()));
    if let Err(e) = result {
        warn!("append to {} failed: {e}", path.display());
    }
}

fn human_line(record: &LogRecord) -> String {
    let ts = &record.ts;
    match &record.event {
        LogEvent::BatchStarted { run_id, source, total } => {
            format!("{ts} [batch] run {run_id} started: {total} rows from {source}")
        }
        LogEvent::RowMapped { index, card_no, name } => {
            format!("{ts} [row {index}] mapped card_no={card_no:?} name={name:?}")
        }
        LogEvent::OverrideApplied { index, card_no, download_card } => {
            format!(
                "{ts} [row {index}] override applied card_no={card_no:?} \
                 download_card={download_card:?}"
            )
        }
        LogEvent::CardNoMissing { index } => {
            format!("{ts} [row {index}] card number missing, skipping")
        }
        LogEvent::PhotoCandidates { index, candidates } => {
            format!("{ts} [row {index}] photo candidates: {}", candidates.join(", "))
        }
        LogEvent::PhotoAttached { index, has_photo, file } => {
            format!("{ts} [row {index}] photo attached={has_photo} file={file:?}")
        }
        LogEvent::RequestSent { index, card_no, action, .. } => {
            format!("{ts} [row {index}] {action} request sent for card_no={card_no:?}")
        }
        LogEvent::ResponseReceived { index, http_status, code, message } => {
            format!(
                "{ts} [row {index}] response http={http_status:?} code={code:?} \
                 message={message:?}"
            )
        }
        LogEvent::RowError { index, code, message, card_no } => {
            format!("{ts} [row {index:?}] error {code}: {message} card_no={card_no:?}")
        }
        LogEvent::RowCompleted { index, state, code, duration_ms, .. } => {
            format!("{ts} [row {index}] completed state={state} code={code:?} in {duration_ms}ms")
        }
        LogEvent::BatchCompleted { run_id, attempted, registered, failed, skipped } => {
            format!(
                "{ts} [batch] run {run_id} complete: attempted={attempted} \
                 registered={registered} failed={failed} skipped={skipped}"
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
