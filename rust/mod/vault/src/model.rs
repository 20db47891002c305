use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

/// Stable error codes recorded in run results and logs.
///
/// The first three are fatal to a whole batch (nothing to process);
/// the rest are row-level and never abort remaining rows.
pub mod error_code {
    pub const OUTPUT_NOT_FOUND: &str = "OUTPUT_NOT_FOUND";
    pub const CSV_NOT_FOUND: &str = "CSV_NOT_FOUND";
    pub const NO_ROWS: &str = "NO_ROWS";
    pub const CARD_NO_MISSING: &str = "CARD_NO_MISSING";
    pub const HTTP_ERROR: &str = "HTTP_ERROR";
    pub const VAULT_ERROR: &str = "VAULT_ERROR";
    pub const REQUEST_FAILED: &str = "REQUEST_FAILED";
    pub const REQUEST_TIMEOUT: &str = "REQUEST_TIMEOUT";
}

/// The Vault API rejects card numbers longer than 10 characters.
pub const MAX_CARD_NO_LEN: usize = 10;

/// Access-level code sent when the source value is blank.
pub const DEFAULT_ACCESS_LEVEL: &str = "00";

/// Clip a card number to the Vault's 10-character limit.
pub fn clip_card_no(s: &str) -> String {
    s.trim().chars().take(MAX_CARD_NO_LEN).collect()
}

// ---------------------------------------------------------------------------
// Raw row
// ---------------------------------------------------------------------------

/// One raw source row: header → cell value, both trimmed.
pub type Row = HashMap<String, String>;

// ---------------------------------------------------------------------------
// CardProfile
// ---------------------------------------------------------------------------

/// Canonical badge record sent to the Vault.
///
/// Booleans are serialized as `"true"/"false"` strings on the SOAP wire
/// (see `envelope`); here they stay typed. `photo` holds the base64 image
/// payload when a matching file was found, and is skipped in API JSON
/// when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardProfile {
    // --- identity ---
    pub card_no: String,
    pub name: String,
    /// Employee ID. Business rule: never used as a fallback card number.
    pub staff_no: String,
    pub department: String,
    pub company: String,
    pub title: String,
    pub position: String,
    pub gender: String,
    pub nric: String,
    pub passport: String,
    pub race: String,
    pub dob: String,
    pub joining_date: String,
    pub resign_date: String,
    pub address1: String,
    pub address2: String,
    pub postal_code: String,
    pub city: String,
    pub state: String,
    pub email: String,
    pub mobile_no: String,
    pub vehicle_no: String,

    // --- access ---
    pub access_level: String,
    pub face_access_level: String,
    pub lift_access_level: String,

    // --- status ---
    pub active_status: bool,
    pub non_expired: bool,
    pub expired_date: String,
    pub download_card: bool,

    // --- photo ---
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
}

impl Default for CardProfile {
    fn default() -> Self {
        Self {
            card_no: String::new(),
            name: String::new(),
            staff_no: String::new(),
            department: String::new(),
            company: String::new(),
            title: String::new(),
            position: String::new(),
            gender: String::new(),
            nric: String::new(),
            passport: String::new(),
            race: String::new(),
            dob: String::new(),
            joining_date: String::new(),
            resign_date: String::new(),
            address1: String::new(),
            address2: String::new(),
            postal_code: String::new(),
            city: String::new(),
            state: String::new(),
            email: String::new(),
            mobile_no: String::new(),
            vehicle_no: String::new(),
            access_level: DEFAULT_ACCESS_LEVEL.to_string(),
            face_access_level: DEFAULT_ACCESS_LEVEL.to_string(),
            lift_access_level: DEFAULT_ACCESS_LEVEL.to_string(),
            active_status: true,
            non_expired: true,
            expired_date: String::new(),
            download_card: true,
            photo: None,
        }
    }
}

impl CardProfile {
    /// Whether this profile may be sent to the Vault at all.
    pub fn has_card_no(&self) -> bool {
        !self.card_no.trim().is_empty()
    }
}

// ---------------------------------------------------------------------------
// RowOverride
// ---------------------------------------------------------------------------

/// Caller-supplied correction for one row, keyed by its zero-based index.
///
/// `card_no = Some("")` intentionally empties the card number, which turns
/// the row into a skip.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowOverride {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_no: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_card: Option<bool>,
}

/// Overrides indexed by row position.
pub type OverrideSet = BTreeMap<usize, RowOverride>;

/// Build an [`OverrideSet`] from a request list. Later entries for the same
/// index win.
pub fn index_overrides(list: Vec<RowOverride>) -> OverrideSet {
    let mut set = OverrideSet::new();
    for ov in list {
        set.insert(ov.index, ov);
    }
    set
}

// ---------------------------------------------------------------------------
// RowState / RowStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of one row.
///
/// ```text
/// IDLE → EXECUTING → SUCCESS
///                  → FAILED
///      → SKIPPED            (empty card number, no network call)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowState {
    Idle,
    Executing,
    Success,
    Failed,
    Skipped,
}

impl RowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Executing => "EXECUTING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        }
    }

    /// Whether the row has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for RowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally observable progress of one row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowStatus {
    pub state: RowState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_no: Option<String>,
}

impl Default for RowStatus {
    fn default() -> Self {
        Self {
            state: RowState::Idle,
            code: None,
            message: None,
            duration_ms: None,
            started_at: None,
            card_no: None,
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionResult
// ---------------------------------------------------------------------------

/// One recorded row-level error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_no: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

/// Row-level provenance carried in batch results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowDetail {
    pub index: usize,
    pub card_no: String,
    pub name: String,
    pub has_photo: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resp_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resp_message: Option<String>,
}

/// Batch-level aggregate returned once per run.
///
/// Invariant: `attempted == registered + failed + skipped`. A non-empty
/// `errors` means "completed with errors", not a hard failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub run_id: String,
    pub attempted: u64,
    pub registered: u64,
    pub failed: u64,
    pub skipped: u64,
    pub with_photo: u64,
    pub without_photo: u64,
    pub errors: Vec<RowError>,
    pub details: Vec<RowDetail>,
}

// ---------------------------------------------------------------------------
// Preview
// ---------------------------------------------------------------------------

/// One previewed row: the raw source row plus the mapped profile, exactly
/// as a real run would send it (photo reported by existence only).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRow {
    pub index: usize,
    pub card_no: String,
    pub name: String,
    pub has_photo: bool,
    pub row: Row,
    pub profile: CardProfile,
}

/// Dry-run result. Zero network calls, zero effect on counts.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResult {
    pub total: usize,
    pub details: Vec<PreviewRow>,
}

// ---------------------------------------------------------------------------
// API request / response types
// ---------------------------------------------------------------------------

/// Which envelope variant to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    /// Minimal payload — new card registration.
    #[default]
    Create,
    /// Extended payload — full demographic update.
    Update,
}

/// Body for `POST /runs` — execute a batch.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    /// Source directory or explicit file path.
    pub source: String,
    /// Photo lookup directory. Defaults to the source directory.
    #[serde(default)]
    pub photo_dir: Option<String>,
    #[serde(default)]
    pub kind: RunKind,
    #[serde(default)]
    pub overrides: Vec<RowOverride>,
    /// Restrict execution to these row indices.
    #[serde(default)]
    pub indices: Option<Vec<usize>>,
    /// Bounded worker count; defaults to the engine configuration.
    #[serde(default)]
    pub concurrency: Option<usize>,
}

/// Body for `POST /runs/@preview`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRequest {
    pub source: String,
    #[serde(default)]
    pub photo_dir: Option<String>,
    #[serde(default)]
    pub overrides: Vec<RowOverride>,
}

/// Body for `POST /rows/{index}/@execute`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowExecuteRequest {
    pub source: String,
    #[serde(default)]
    pub photo_dir: Option<String>,
    #[serde(default)]
    pub kind: RunKind,
    #[serde(default)]
    pub overrides: Vec<RowOverride>,
}

/// Query parameters for `GET /progress`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressQuery {
    pub source: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
