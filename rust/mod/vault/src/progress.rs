use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use cardreg_core::ServiceError;

use crate::model::{RowState, RowStatus};
use crate::runlog::{LogEvent, LogRecord, RunLog};

/// Per-batch progress reconstructed for an external poller.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub rows: BTreeMap<usize, RowStatus>,
    /// True only after the batch completion marker was seen.
    pub complete: bool,
}

/// Stateless progress lookup for an execution context.
///
/// The trait exists so the HTTP layer and tests never depend on the log
/// file format; the default implementation replays the JSONL run log.
pub trait ProgressStore: Send + Sync {
    fn get_progress(&self, source: &Path) -> Result<BatchProgress, ServiceError>;
}

/// Reconstructs progress purely by reading and folding the structured
/// run log. Usable from a process that did not originate the batch.
pub struct LogReplayStore;

impl ProgressStore for LogReplayStore {
    fn get_progress(&self, source: &Path) -> Result<BatchProgress, ServiceError> {
        let path = RunLog::json_path_for(source);
        if !path.is_file() {
            return Ok(BatchProgress::default());
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| ServiceError::Storage(format!("read {}: {e}", path.display())))?;

        let mut progress = BatchProgress::default();
        for line in content.lines() {
            let record: LogRecord = match serde_json::from_str(line) {
                Ok(r) => r,
                Err(e) => {
                    // A line mid-write by a concurrent batch; skip it.
                    debug!("unparseable run log line skipped: {e}");
                    continue;
                }
            };
            fold(&mut progress, record);
        }
        Ok(progress)
    }
}

fn fold(progress: &mut BatchProgress, record: LogRecord) {
    match record.event {
        // A new batch over the same context supersedes the previous one.
        LogEvent::BatchStarted { .. } => {
            progress.rows.clear();
            progress.complete = false;
        }
        LogEvent::RowMapped { index, card_no, .. } => {
            let status = progress.rows.entry(index).or_default();
            if !status.state.is_terminal() {
                status.state = RowState::Executing;
                status.card_no = Some(card_no);
                status.started_at = Some(record.ts);
            }
        }
        LogEvent::RequestSent { index, card_no, .. } => {
            let status = progress.rows.entry(index).or_default();
            if !status.state.is_terminal() {
                status.state = RowState::Executing;
                status.card_no = Some(card_no);
            }
        }
        LogEvent::RowCompleted {
            index,
            state,
            code,
            message,
            card_no,
            duration_ms,
            started_at,
        } => {
            progress.rows.insert(
                index,
                RowStatus {
                    state,
                    code,
                    message,
                    duration_ms: Some(duration_ms),
                    started_at: Some(started_at),
                    card_no: Some(card_no),
                },
            );
        }
        LogEvent::BatchCompleted { .. } => {
            progress.complete = true;
        }
        // Intermediate events carry no state transition of their own.
        LogEvent::OverrideApplied { .. }
        | LogEvent::CardNoMissing { .. }
        | LogEvent::PhotoCandidates { .. }
        | LogEvent::PhotoAttached { .. }
        | LogEvent::ResponseReceived { .. }
        | LogEvent::RowError { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runlog::RunLog;

    fn completed(index: usize, state: RowState, code: Option<&str>) -> LogEvent {
        LogEvent::RowCompleted {
            index,
            state,
            code: code.map(|c| c.to_string()),
            message: None,
            card_no: format!("C{index}"),
            duration_ms: 12,
            started_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn empty_context_is_empty_progress() {
        let dir = tempfile::tempdir().unwrap();
        let progress = LogReplayStore.get_progress(dir.path()).unwrap();
        assert!(progress.rows.is_empty());
        assert!(!progress.complete);
    }

    #[test]
    fn replay_reconstructs_row_states() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::for_source(dir.path());

        log.append(LogEvent::BatchStarted { run_id: "r1".into(), source: "s".into(), total: 3 });
        log.append(LogEvent::RowMapped { index: 0, card_no: "C0".into(), name: "A".into() });
        log.append(completed(0, RowState::Success, None));
        log.append(completed(1, RowState::Failed, Some("HTTP_ERROR")));
        log.append(LogEvent::RowMapped { index: 2, card_no: "C2".into(), name: "C".into() });

        let progress = LogReplayStore.get_progress(dir.path()).unwrap();
        assert_eq!(progress.rows[&0].state, RowState::Success);
        assert_eq!(progress.rows[&1].state, RowState::Failed);
        assert_eq!(progress.rows[&1].code.as_deref(), Some("HTTP_ERROR"));
        // Row 2 was mapped but never completed — still executing.
        assert_eq!(progress.rows[&2].state, RowState::Executing);
        assert!(!progress.complete);
    }

    #[test]
    fn completion_requires_marker() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::for_source(dir.path());

        log.append(LogEvent::BatchStarted { run_id: "r1".into(), source: "s".into(), total: 1 });
        log.append(completed(0, RowState::Skipped, Some("CARD_NO_MISSING")));
        let progress = LogReplayStore.get_progress(dir.path()).unwrap();
        assert!(!progress.complete);

        log.append(LogEvent::BatchCompleted {
            run_id: "r1".into(),
            attempted: 1,
            registered: 0,
            failed: 0,
            skipped: 1,
        });
        let progress = LogReplayStore.get_progress(dir.path()).unwrap();
        assert!(progress.complete);
        assert_eq!(progress.rows[&0].state, RowState::Skipped);
    }

    #[test]
    fn later_batch_supersedes_earlier() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::for_source(dir.path());

        log.append(LogEvent::BatchStarted { run_id: "r1".into(), source: "s".into(), total: 2 });
        log.append(completed(0, RowState::Failed, Some("VAULT_ERROR")));
        log.append(LogEvent::BatchCompleted {
            run_id: "r1".into(),
            attempted: 2,
            registered: 1,
            failed: 1,
            skipped: 0,
        });

        log.append(LogEvent::BatchStarted { run_id: "r2".into(), source: "s".into(), total: 2 });
        log.append(completed(0, RowState::Success, None));

        let progress = LogReplayStore.get_progress(dir.path()).unwrap();
        assert_eq!(progress.rows[&0].state, RowState::Success);
        assert_eq!(progress.rows.len(), 1);
        assert!(!progress.complete);
    }

    #[test]
    fn single_row_rerun_updates_terminal_state() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::for_source(dir.path());

        log.append(LogEvent::BatchStarted { run_id: "r1".into(), source: "s".into(), total: 1 });
        log.append(completed(0, RowState::Failed, Some("HTTP_ERROR")));
        log.append(LogEvent::BatchCompleted {
            run_id: "r1".into(),
            attempted: 1,
            registered: 0,
            failed: 1,
            skipped: 0,
        });

        // Single-row re-execution appends without a new batch marker.
        log.append(completed(0, RowState::Success, None));
        let progress = LogReplayStore.get_progress(dir.path()).unwrap();
        assert_eq!(progress.rows[&0].state, RowState::Success);
    }

    #[test]
    fn garbage_lines_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::for_source(dir.path());
        log.append(completed(0, RowState::Success, None));

        let path = RunLog::json_path_for(dir.path());
        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str("{\"truncated\": \n");
        fs::write(&path, content).unwrap();

        let progress = LogReplayStore.get_progress(dir.path()).unwrap();
        assert_eq!(progress.rows.len(), 1);
    }
}
