use std::path::PathBuf;
use std::time::Duration;

/// Common service configuration shared by the engine and the server binary.
///
/// The binary fills this from command-line arguments, then passes it down
/// to engine initialization.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Directory containing uploaded source data (workbooks, CSVs, photos).
    /// Relative source paths in requests resolve against it.
    pub data_dir: Option<PathBuf>,

    /// Directory holding photo files, when not co-located with the source.
    /// Defaults to `{data_dir}/photos` when a data dir is set.
    pub photo_dir: Option<PathBuf>,

    /// Vault SOAP endpoint URL.
    pub endpoint: String,

    /// SOAP version string: `"1.1"` or `"1.2"`.
    pub soap_version: String,

    /// SOAP service namespace for the request body and SOAPAction.
    pub namespace: String,

    /// Bounded worker count for batch execution.
    pub workers: usize,

    /// Per-request timeout in seconds for outbound Vault calls.
    pub request_timeout_secs: u64,

    /// Listen address for the HTTP server.
    pub listen: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            photo_dir: None,
            endpoint: String::new(),
            soap_version: "1.1".to_string(),
            namespace: "http://tempuri.org/".to_string(),
            workers: 6,
            request_timeout_secs: 30,
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Resolve the default photo directory: an explicit `photo_dir`, else
    /// `{data_dir}/photos`, else none (photo lookup then falls back to the
    /// source's own directory).
    pub fn resolve_photo_dir(&self) -> Option<PathBuf> {
        self.photo_dir
            .clone()
            .or_else(|| self.data_dir.as_ref().map(|d| d.join("photos")))
    }

    /// Per-request timeout as a `Duration`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
