use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cardreg_core::{new_id, now_rfc3339, ServiceError};

use crate::client::{OutcomeKind, VaultClient};
use crate::envelope::{self, EnvelopeConfig, SoapVersion};
use crate::ingest;
use crate::mapper::{self, HeaderResolver};
use crate::model::{
    error_code, CardProfile, ExecutionResult, OverrideSet, PreviewResult, PreviewRow, Row,
    RowDetail, RowError, RowOverride, RowState, RowStatus, RunKind,
};
use crate::overrides;
use crate::photo::PhotoResolver;
use crate::retry::RetryPolicy;
use crate::runlog::{redact_photo, LogEvent, RunLog};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Engine configuration, filled from [`cardreg_core::ServiceConfig`] by
/// the binary.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub endpoint: String,
    pub soap: EnvelopeConfig,
    pub create_action: String,
    pub update_action: String,
    /// Bounded worker count for batch execution.
    pub workers: usize,
    pub request_timeout: Duration,
    /// Root for relative source paths in requests.
    pub data_dir: Option<PathBuf>,
    /// Default photo lookup directory when a request names none; the
    /// source's own directory is the last fallback.
    pub photo_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            soap: EnvelopeConfig {
                version: SoapVersion::V11,
                namespace: "http://tempuri.org/".to_string(),
            },
            create_action: "AddCard".to_string(),
            update_action: "UpdateCard".to_string(),
            workers: 6,
            request_timeout: Duration::from_secs(30),
            data_dir: None,
            photo_dir: None,
        }
    }
}

impl EngineConfig {
    fn action(&self, kind: RunKind) -> &str {
        match kind {
            RunKind::Create => &self.create_action,
            RunKind::Update => &self.update_action,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-row record
// ---------------------------------------------------------------------------

/// Everything one row's execution produced; batch aggregates are reduced
/// from these after the workers finish — no shared counters.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowRecord {
    pub index: usize,
    pub status: RowStatus,
    pub detail: RowDetail,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RowError>,
}

// ---------------------------------------------------------------------------
// ExecutionEngine
// ---------------------------------------------------------------------------

/// Drives Ingester → Mapper → OverrideApplier → PhotoResolver →
/// EnvelopeBuilder → VaultClient row by row.
///
/// Rows are independent: the only cross-row state is the append-only run
/// log and the reduced aggregates.
#[derive(Clone)]
pub struct ExecutionEngine {
    config: EngineConfig,
    client: Arc<VaultClient>,
    resolver: Arc<HeaderResolver>,
    retry: RetryPolicy,
}

/// One batch request, resolved from the API layer.
#[derive(Debug, Clone)]
pub struct BatchSpec {
    pub source: PathBuf,
    pub photo_dir: Option<PathBuf>,
    pub kind: RunKind,
    pub overrides: OverrideSet,
    /// Restrict execution to these indices; `None` runs every row.
    pub indices: Option<Vec<usize>>,
    /// Worker count override for this batch.
    pub concurrency: Option<usize>,
}

impl ExecutionEngine {
    pub fn new(config: EngineConfig) -> Result<Self, ServiceError> {
        let client = Arc::new(VaultClient::new(
            &config.endpoint,
            config.soap.clone(),
            config.request_timeout,
        )?);
        Ok(Self {
            config,
            client,
            resolver: Arc::new(HeaderResolver::default()),
            retry: RetryPolicy::default(),
        })
    }

    /// Substitute the Vault client (custom parser or success policy).
    pub fn with_client(mut self, client: Arc<VaultClient>) -> Self {
        self.client = client;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Resolve a request's source path against the configured data dir.
    fn source_path(&self, source: &Path) -> PathBuf {
        if source.is_relative() {
            if let Some(dir) = &self.config.data_dir {
                return dir.join(source);
            }
        }
        source.to_path_buf()
    }

    /// Photo lookup directory: request override, configured default, then
    /// the source's own directory.
    fn photo_dir_for(&self, requested: Option<&Path>, resolved: &Path) -> Option<PathBuf> {
        requested
            .map(|p| p.to_path_buf())
            .or_else(|| self.config.photo_dir.clone())
            .or_else(|| resolved.parent().map(|p| p.to_path_buf()))
    }

    // =======================================================================
    // Batch execution
    // =======================================================================

    /// Execute a whole batch with bounded concurrency.
    ///
    /// Row-level failures never abort remaining rows; the batch always
    /// completes and reports aggregate counts. The cancellation token
    /// stops rows that have not started yet — in-flight calls finish.
    pub async fn execute_batch(
        &self,
        spec: BatchSpec,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, ServiceError> {
        let (resolved, rows) = ingest::read_rows(&self.source_path(&spec.source))?;
        let run_id = new_id();
        let log = Arc::new(RunLog::for_source(&resolved));
        let photo_dir = self.photo_dir_for(spec.photo_dir.as_deref(), &resolved);

        let selected: Vec<(usize, Row)> = rows
            .into_iter()
            .enumerate()
            .filter(|(i, _)| match &spec.indices {
                Some(allow) => allow.contains(i),
                None => true,
            })
            .collect();

        log.append(LogEvent::BatchStarted {
            run_id: run_id.clone(),
            source: resolved.display().to_string(),
            total: selected.len(),
        });
        info!(
            "run {run_id}: executing {} rows from {}",
            selected.len(),
            resolved.display()
        );

        let workers = spec.concurrency.unwrap_or(self.config.workers).max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut join = JoinSet::new();

        for (index, row) in selected {
            let engine = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let log = Arc::clone(&log);
            let cancel = cancel.clone();
            let override_for_row = spec.overrides.get(&index).cloned();
            let photo_dir = photo_dir.clone();
            let kind = spec.kind;

            join.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return None,
                };
                if cancel.is_cancelled() {
                    return None;
                }
                let ov = override_for_row.as_ref();
                Some(
                    engine
                        .process_row(index, &row, ov, photo_dir.as_deref(), kind, &log)
                        .await,
                )
            });
        }

        let mut records: Vec<RowRecord> = Vec::new();
        while let Some(joined) = join.join_next().await {
            match joined {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!("run {run_id}: row task panicked: {e}"),
            }
        }
        records.sort_by_key(|r| r.index);

        let result = reduce(run_id.clone(), records);
        log.append(LogEvent::BatchCompleted {
            run_id: run_id.clone(),
            attempted: result.attempted,
            registered: result.registered,
            failed: result.failed,
            skipped: result.skipped,
        });
        info!(
            "run {run_id}: complete attempted={} registered={} failed={} skipped={}",
            result.attempted, result.registered, result.failed, result.skipped
        );
        Ok(result)
    }

    // =======================================================================
    // Single-row execution
    // =======================================================================

    /// Execute one row by index, re-reading the source and re-resolving
    /// the override at call time so repeated calls reflect the latest
    /// override state.
    pub async fn execute_row(
        &self,
        source: &Path,
        index: usize,
        photo_dir: Option<&Path>,
        kind: RunKind,
        overrides: &OverrideSet,
    ) -> Result<RowRecord, ServiceError> {
        let (resolved, rows) = ingest::read_rows(&self.source_path(source))?;
        let row = rows.get(index).ok_or_else(|| {
            ServiceError::NotFound(format!("row {index} not found in {}", resolved.display()))
        })?;
        let log = RunLog::for_source(&resolved);
        let photo_dir = self.photo_dir_for(photo_dir, &resolved);

        let record = self
            .process_row(index, row, overrides.get(&index), photo_dir.as_deref(), kind, &log)
            .await;
        Ok(record)
    }

    // =======================================================================
    // Preview
    // =======================================================================

    /// Dry-run: Ingester → Mapper → OverrideApplier → photo existence
    /// check. Zero network calls, zero log writes, zero count effects.
    pub fn preview(
        &self,
        source: &Path,
        photo_dir: Option<&Path>,
        overrides: &OverrideSet,
    ) -> Result<PreviewResult, ServiceError> {
        let (resolved, rows) = ingest::read_rows(&self.source_path(source))?;
        let photo_dir = self.photo_dir_for(photo_dir, &resolved);
        let photos = PhotoResolver::new(photo_dir.as_deref());

        let details: Vec<PreviewRow> = rows
            .into_iter()
            .enumerate()
            .map(|(index, row)| {
                let mut profile = mapper::map_row(&self.resolver, &row);
                if let Some(ov) = overrides.get(&index) {
                    overrides::apply(&mut profile, ov);
                }
                let has_photo = photos.find(&profile).is_some();
                PreviewRow {
                    index,
                    card_no: profile.card_no.clone(),
                    name: profile.name.clone(),
                    has_photo,
                    row,
                    profile,
                }
            })
            .collect();

        Ok(PreviewResult { total: details.len(), details })
    }

    // =======================================================================
    // Row state machine
    // =======================================================================

    /// `Idle → Executing → {Success | Failed | Skipped}` for one row.
    async fn process_row(
        &self,
        index: usize,
        row: &Row,
        ov: Option<&RowOverride>,
        photo_dir: Option<&Path>,
        kind: RunKind,
        log: &RunLog,
    ) -> RowRecord {
        let started_at = now_rfc3339();
        let started = Instant::now();

        let mut profile = mapper::map_row(&self.resolver, row);
        log.append(LogEvent::RowMapped {
            index,
            card_no: profile.card_no.clone(),
            name: profile.name.clone(),
        });

        if let Some(ov) = ov {
            overrides::apply(&mut profile, ov);
            log.append(LogEvent::OverrideApplied {
                index,
                card_no: ov.card_no.clone(),
                download_card: ov.download_card,
            });
        }

        // Skip without any network call: empty card number.
        if !profile.has_card_no() {
            log.append(LogEvent::CardNoMissing { index });
            return self.finish_row(
                index,
                &profile,
                false,
                RowState::Skipped,
                Some(error_code::CARD_NO_MISSING.to_string()),
                Some("card number missing after overrides".to_string()),
                None,
                started,
                started_at,
                log,
            );
        }

        let photos = PhotoResolver::new(photo_dir);
        let candidates = photos.candidates(&profile);
        log.append(LogEvent::PhotoCandidates {
            index,
            candidates: candidates.iter().map(|p| p.display().to_string()).collect(),
        });
        // One lookup decides both the flag and the logged file.
        let attached = photos.attach(&mut profile);
        let has_photo = attached.is_some();
        log.append(LogEvent::PhotoAttached {
            index,
            has_photo,
            file: attached.map(|p| p.display().to_string()),
        });

        let action = self.config.action(kind);
        let envelope = envelope::build(&self.config.soap, action, kind, &profile);
        log.append(LogEvent::RequestSent {
            index,
            card_no: profile.card_no.clone(),
            action: action.to_string(),
            envelope: redact_photo(&envelope),
        });

        let mut attempt = 1u32;
        let outcome = loop {
            let outcome = self.client.call(action, &envelope).await;
            log.append(LogEvent::ResponseReceived {
                index,
                http_status: outcome.http_status,
                code: outcome.code.clone(),
                message: outcome.message.clone(),
            });
            if self.retry.should_retry(outcome.kind, attempt) {
                attempt += 1;
                tokio::time::sleep(self.retry.delay(attempt - 1)).await;
                continue;
            }
            break outcome;
        };

        let (state, code, message) = match outcome.kind {
            OutcomeKind::Success => (RowState::Success, None, None),
            kind => (
                RowState::Failed,
                kind.error_code().map(|c| c.to_string()),
                Some(outcome.message.clone()),
            ),
        };
        self.finish_row(
            index,
            &profile,
            has_photo,
            state,
            code,
            message,
            Some(outcome.code),
            started,
            started_at,
            log,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_row(
        &self,
        index: usize,
        profile: &CardProfile,
        has_photo: bool,
        state: RowState,
        code: Option<String>,
        message: Option<String>,
        resp_code: Option<String>,
        started: Instant,
        started_at: String,
        log: &RunLog,
    ) -> RowRecord {
        let duration_ms = started.elapsed().as_millis() as u64;

        let error = code.as_ref().map(|c| {
            let err = RowError {
                code: c.clone(),
                message: message.clone().unwrap_or_default(),
                card_no: if profile.card_no.is_empty() {
                    None
                } else {
                    Some(profile.card_no.clone())
                },
                index: Some(index),
            };
            log.append(LogEvent::RowError {
                index: Some(index),
                code: err.code.clone(),
                message: err.message.clone(),
                card_no: err.card_no.clone(),
            });
            err
        });

        log.append(LogEvent::RowCompleted {
            index,
            state,
            code: code.clone(),
            message: message.clone(),
            card_no: profile.card_no.clone(),
            duration_ms,
            started_at: started_at.clone(),
        });

        RowRecord {
            index,
            status: RowStatus {
                state,
                code: code.clone(),
                message: message.clone(),
                duration_ms: Some(duration_ms),
                started_at: Some(started_at),
                card_no: Some(profile.card_no.clone()),
            },
            detail: RowDetail {
                index,
                card_no: profile.card_no.clone(),
                name: profile.name.clone(),
                has_photo,
                resp_code,
                resp_message: message,
            },
            error,
        }
    }
}

/// Reduce completed per-row records into the batch aggregate.
fn reduce(run_id: String, records: Vec<RowRecord>) -> ExecutionResult {
    let mut result = ExecutionResult {
        run_id,
        attempted: 0,
        registered: 0,
        failed: 0,
        skipped: 0,
        with_photo: 0,
        without_photo: 0,
        errors: Vec::new(),
        details: Vec::new(),
    };
    for record in records {
        result.attempted += 1;
        match record.status.state {
            RowState::Success => {
                result.registered += 1;
                if record.detail.has_photo {
                    result.with_photo += 1;
                } else {
                    result.without_photo += 1;
                }
            }
            RowState::Failed => result.failed += 1,
            RowState::Skipped => result.skipped += 1,
            RowState::Idle | RowState::Executing => {}
        }
        if let Some(error) = record.error {
            result.errors.push(error);
        }
        result.details.push(record.detail);
    }
    result
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::Router;

    use crate::model::index_overrides;

    /// In-process mock Vault: returns a canned (status, body) and counts
    /// requests.
    async fn mock_vault(status: u16, body: &'static str) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        let app = Router::new().route(
            "/vault.asmx",
            post(move |_headers: HeaderMap, _body: String| {
                let hits = Arc::clone(&hits_clone);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (axum::http::StatusCode::from_u16(status).unwrap(), body)
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/vault.asmx"), hits)
    }

    /// Mock Vault that counts the request before stalling past any
    /// reasonable client timeout.
    async fn mock_slow_vault(delay: Duration) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        let app = Router::new().route(
            "/vault.asmx",
            post(move || {
                let hits = Arc::clone(&hits_clone);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    OK_BODY
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/vault.asmx"), hits)
    }

    fn engine_for(endpoint: &str) -> ExecutionEngine {
        let config = EngineConfig { endpoint: endpoint.to_string(), ..Default::default() };
        ExecutionEngine::new(config).unwrap()
    }

    fn write_source(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("export_card_data.csv");
        fs::write(&path, content).unwrap();
        path
    }

    fn spec(source: &Path) -> BatchSpec {
        BatchSpec {
            source: source.to_path_buf(),
            photo_dir: None,
            kind: RunKind::Create,
            overrides: OverrideSet::new(),
            indices: None,
            concurrency: None,
        }
    }

    const OK_BODY: &str = "<Resp><ErrCode>0</ErrCode><ErrMessage>OK</ErrMessage></Resp>";

    #[tokio::test]
    async fn scenario_a_success_without_photo() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), "CardNo,Name\nCARD01,Alice\n");
        let (endpoint, hits) = mock_vault(200, OK_BODY).await;

        let engine = engine_for(&endpoint);
        let result = engine.execute_batch(spec(&source), CancellationToken::new()).await.unwrap();

        assert_eq!(result.attempted, 1);
        assert_eq!(result.registered, 1);
        assert_eq!(result.without_photo, 1);
        assert!(result.errors.is_empty());
        assert_eq!(result.details[0].card_no, "CARD01");
        assert!(!result.details[0].has_photo);
        assert_eq!(result.details[0].resp_code.as_deref(), Some("0"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn scenario_b_missing_card_no_skips_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), "CardNo,Name\n,NoCard\n");
        let (endpoint, hits) = mock_vault(200, OK_BODY).await;

        let engine = engine_for(&endpoint);
        let result = engine.execute_batch(spec(&source), CancellationToken::new()).await.unwrap();

        assert_eq!(result.attempted, 1);
        assert_eq!(result.registered, 0);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].code, "CARD_NO_MISSING");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn scenario_c_http_500_fails_row_but_batch_continues() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), "CardNo,Name\nC1,A\nC2,B\nC3,C\n");
        let (endpoint, hits) = mock_vault(500, "boom").await;

        let engine = engine_for(&endpoint);
        let result = engine.execute_batch(spec(&source), CancellationToken::new()).await.unwrap();

        assert_eq!(result.attempted, 3);
        assert_eq!(result.registered, 0);
        assert_eq!(result.failed, 3);
        assert_eq!(result.errors.len(), 3);
        assert!(result.errors.iter().all(|e| e.code == "HTTP_ERROR"));
        // Every row was still sent.
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        // Counting invariant.
        assert_eq!(result.attempted, result.registered + result.failed + result.skipped);
    }

    #[tokio::test]
    async fn scenario_d_preview_sends_nothing_and_matches_real_profile() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), "CardNo,Name\nCARD01,Alice\n");
        let (endpoint, hits) = mock_vault(200, OK_BODY).await;

        let engine = engine_for(&endpoint);
        let preview = engine.preview(&source, None, &OverrideSet::new()).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(preview.total, 1);
        assert_eq!(preview.details[0].profile.card_no, "CARD01");
        assert_eq!(preview.details[0].row["Name"], "Alice");
        assert!(!preview.details[0].has_photo);

        // The mapped profile matches what the real run sends.
        let resolver = HeaderResolver::default();
        let expected = mapper::map_row(&resolver, &preview.details[0].row);
        assert_eq!(preview.details[0].profile, expected);

        // And preview produced no run log.
        assert!(!RunLog::json_path_for(&source).is_file());
    }

    #[tokio::test]
    async fn vault_rejection_is_vault_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), "CardNo\nC1\n");
        let body = "<Resp><ErrCode>8</ErrCode><ErrMessage>duplicate card</ErrMessage></Resp>";
        let (endpoint, _) = mock_vault(200, body).await;

        let engine = engine_for(&endpoint);
        let result = engine.execute_batch(spec(&source), CancellationToken::new()).await.unwrap();
        assert_eq!(result.failed, 1);
        assert_eq!(result.errors[0].code, "VAULT_ERROR");
        assert_eq!(result.errors[0].message, "duplicate card");
        assert_eq!(result.details[0].resp_code.as_deref(), Some("8"));
    }

    #[tokio::test]
    async fn legacy_code_one_counts_as_success() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), "CardNo\nC1\n");
        let (endpoint, _) = mock_vault(200, "<ErrCode>1</ErrCode>").await;

        let engine = engine_for(&endpoint);
        let result = engine.execute_batch(spec(&source), CancellationToken::new()).await.unwrap();
        assert_eq!(result.registered, 1);
    }

    #[tokio::test]
    async fn photo_attached_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), "CardNo,Name\n1234567890,Alice\n");
        fs::write(dir.path().join("1234567890.jpg"), b"jpegbytes").unwrap();
        let (endpoint, _) = mock_vault(200, OK_BODY).await;

        let engine = engine_for(&endpoint);
        let result = engine.execute_batch(spec(&source), CancellationToken::new()).await.unwrap();
        assert_eq!(result.with_photo, 1);
        assert_eq!(result.without_photo, 0);
        assert!(result.details[0].has_photo);
    }

    #[tokio::test]
    async fn override_replaces_card_no_and_empty_override_skips() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), "CardNo,Name\nC1,A\nC2,B\n");
        let (endpoint, hits) = mock_vault(200, OK_BODY).await;

        let engine = engine_for(&endpoint);
        let mut batch = spec(&source);
        batch.overrides = index_overrides(vec![
            RowOverride { index: 0, card_no: Some("REPLACED".into()), download_card: None },
            RowOverride { index: 1, card_no: Some(String::new()), download_card: None },
        ]);
        let result = engine.execute_batch(batch, CancellationToken::new()).await.unwrap();

        assert_eq!(result.registered, 1);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.details[0].card_no, "REPLACED");
        assert_eq!(result.errors[0].code, "CARD_NO_MISSING");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn index_allow_list_restricts_rows() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), "CardNo\nC1\nC2\nC3\n");
        let (endpoint, hits) = mock_vault(200, OK_BODY).await;

        let engine = engine_for(&endpoint);
        let mut batch = spec(&source);
        batch.indices = Some(vec![0, 2]);
        let result = engine.execute_batch(batch, CancellationToken::new()).await.unwrap();

        assert_eq!(result.attempted, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        let indices: Vec<usize> = result.details.iter().map(|d| d.index).collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[tokio::test]
    async fn single_row_execution_reresolves_override() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), "CardNo,Name\nC1,A\nC2,B\n");
        let (endpoint, _) = mock_vault(200, OK_BODY).await;
        let engine = engine_for(&endpoint);

        let record = engine
            .execute_row(&source, 1, None, RunKind::Create, &OverrideSet::new())
            .await
            .unwrap();
        assert_eq!(record.status.state, RowState::Success);
        assert_eq!(record.detail.card_no, "C2");

        // A fresh call with a new override sees the override.
        let with_override = index_overrides(vec![RowOverride {
            index: 1,
            card_no: Some("LATEST".into()),
            download_card: None,
        }]);
        let record = engine
            .execute_row(&source, 1, None, RunKind::Create, &with_override)
            .await
            .unwrap();
        assert_eq!(record.detail.card_no, "LATEST");
    }

    #[tokio::test]
    async fn single_row_out_of_range_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), "CardNo\nC1\n");
        let (endpoint, _) = mock_vault(200, OK_BODY).await;
        let engine = engine_for(&endpoint);

        let err = engine
            .execute_row(&source, 9, None, RunKind::Create, &OverrideSet::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn missing_source_is_fatal() {
        let (endpoint, _) = mock_vault(200, OK_BODY).await;
        let engine = engine_for(&endpoint);
        let err = engine
            .execute_batch(spec(Path::new("/nonexistent/cards.csv")), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn cancelled_batch_skips_unstarted_rows() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), "CardNo\nC1\nC2\nC3\n");
        let (endpoint, _) = mock_vault(200, OK_BODY).await;

        let engine = engine_for(&endpoint);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = engine.execute_batch(spec(&source), cancel).await.unwrap();
        assert_eq!(result.attempted, 0);
    }

    #[tokio::test]
    async fn timeout_is_request_timeout_and_retried_as_transient() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), "CardNo\nC1\n");
        let (endpoint, hits) = mock_slow_vault(Duration::from_secs(30)).await;

        let config = EngineConfig {
            endpoint,
            request_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let engine = ExecutionEngine::new(config)
            .unwrap()
            .with_retry(RetryPolicy::backoff(2, Duration::from_millis(1)));
        let result = engine.execute_batch(spec(&source), CancellationToken::new()).await.unwrap();

        assert_eq!(result.failed, 1);
        assert_eq!(result.errors[0].code, "REQUEST_TIMEOUT");
        // Transient: the full retry budget was spent.
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn configured_photo_dir_used_when_request_names_none() {
        let data = tempfile::tempdir().unwrap();
        let photos = tempfile::tempdir().unwrap();
        let source = write_source(data.path(), "CardNo,Name\nC1,Alice\n");
        fs::write(photos.path().join("C1.jpg"), b"jpegbytes").unwrap();
        let (endpoint, _) = mock_vault(200, OK_BODY).await;

        let config = EngineConfig {
            endpoint,
            photo_dir: Some(photos.path().to_path_buf()),
            ..Default::default()
        };
        let engine = ExecutionEngine::new(config).unwrap();
        let result = engine.execute_batch(spec(&source), CancellationToken::new()).await.unwrap();
        assert_eq!(result.with_photo, 1);
        assert!(result.details[0].has_photo);

        // An explicit request directory still wins over the configured one.
        let mut batch = spec(&source);
        batch.photo_dir = Some(data.path().to_path_buf());
        let result = engine.execute_batch(batch, CancellationToken::new()).await.unwrap();
        assert_eq!(result.with_photo, 0);
    }

    #[tokio::test]
    async fn relative_source_resolves_against_data_dir() {
        let data = tempfile::tempdir().unwrap();
        write_source(data.path(), "CardNo\nC1\n");
        let (endpoint, _) = mock_vault(200, OK_BODY).await;

        let config = EngineConfig {
            endpoint,
            data_dir: Some(data.path().to_path_buf()),
            ..Default::default()
        };
        let engine = ExecutionEngine::new(config).unwrap();
        let result = engine
            .execute_batch(spec(Path::new("export_card_data.csv")), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.registered, 1);
    }

    #[tokio::test]
    async fn retry_policy_retries_transient_failures() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), "CardNo\nC1\n");
        let (endpoint, hits) = mock_vault(500, "boom").await;

        let engine = engine_for(&endpoint)
            .with_retry(RetryPolicy::backoff(3, Duration::from_millis(1)));
        let result = engine.execute_batch(spec(&source), CancellationToken::new()).await.unwrap();

        assert_eq!(result.failed, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn run_log_written_and_replayable() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path(), "CardNo,Name\nC1,A\n,B\n");
        let (endpoint, _) = mock_vault(200, OK_BODY).await;

        let engine = engine_for(&endpoint);
        engine.execute_batch(spec(&source), CancellationToken::new()).await.unwrap();

        use crate::progress::{LogReplayStore, ProgressStore};
        let progress = LogReplayStore.get_progress(&source).unwrap();
        assert!(progress.complete);
        assert_eq!(progress.rows[&0].state, RowState::Success);
        assert_eq!(progress.rows[&1].state, RowState::Skipped);
        assert_eq!(progress.rows[&1].code.as_deref(), Some("CARD_NO_MISSING"));
    }
}
