use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use cardreg_core::ServiceError;

use crate::envelope::{EnvelopeConfig, SoapVersion};
use crate::model::error_code;

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// Fields extracted from a Vault SOAP response body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VaultResponse {
    pub err_code: Option<String>,
    pub err_message: Option<String>,
    pub card_id: Option<String>,
}

/// Extraction contract for Vault response bodies.
///
/// The default implementation is deliberately a text scanner, not an XML
/// parser — the legacy responder emits malformed and partial bodies that
/// must still yield an error code. A stricter parser can be substituted
/// without touching the execution state machine.
pub trait ResponseParser: Send + Sync {
    fn parse(&self, body: &str) -> VaultResponse;
}

/// Tolerant text scanning over the response body.
pub struct TextScanParser;

impl ResponseParser for TextScanParser {
    fn parse(&self, body: &str) -> VaultResponse {
        VaultResponse {
            err_code: scan_tag(body, "ErrCode"),
            err_message: scan_tag(body, "ErrMessage"),
            card_id: scan_tag(body, "CardID").or_else(|| scan_tag(body, "ID")),
        }
    }
}

/// Find `<Tag>` (case-insensitive, namespace prefixes and attributes
/// tolerated) and return the text up to the next `<`. Survives truncated
/// bodies: a tag with no closing element yields whatever text follows it.
fn scan_tag(body: &str, tag: &str) -> Option<String> {
    let lower = body.to_ascii_lowercase();
    let needle = tag.to_ascii_lowercase();

    let mut search_from = 0;
    while let Some(rel) = lower[search_from..].find(&needle) {
        let at = search_from + rel;
        search_from = at + needle.len();

        // Must be a tag name: preceded by '<' or a namespace prefix ':',
        // followed by '>', whitespace (attributes), or end of input.
        let before = lower[..at].chars().last();
        let opens_tag = match before {
            Some('<') | Some(':') => true,
            _ => false,
        };
        if !opens_tag {
            continue;
        }
        if before == Some(':') {
            // Walk the prefix back to its '<'.
            let prefix = &lower[..at - 1];
            let lt = match prefix.rfind('<') {
                Some(i) => i,
                None => continue,
            };
            if prefix[lt + 1..].contains(|c: char| c.is_whitespace() || c == '>' || c == '/') {
                continue;
            }
        }
        let after = lower[at + needle.len()..].chars().next();
        match after {
            // '/' is a self-closing tag; a truncated body may end right
            // after the tag name.
            Some('>') | Some(' ') | Some('\t') | Some('\r') | Some('\n') | Some('/') | None => {}
            _ => continue,
        }

        let rest = &body[at + needle.len()..];
        let gt = match rest.find('>') {
            Some(i) => i,
            None => return Some(String::new()),
        };
        if rest[..gt].ends_with('/') {
            // Self-closing element: present but empty.
            return Some(String::new());
        }
        let content = &rest[gt + 1..];
        let end = content.find('<').unwrap_or(content.len());
        return Some(content[..end].trim().to_string());
    }
    None
}

// ---------------------------------------------------------------------------
// Success policy
// ---------------------------------------------------------------------------

/// Which business codes count as success inside a 2xx response.
///
/// The legacy responder returns `"1"` for some successful writes with no
/// documented rationale; the default policy preserves that behavior, and
/// callers that want strict `"0"`-only can override it.
#[derive(Debug, Clone)]
pub struct SuccessPolicy {
    accept: Vec<String>,
}

impl Default for SuccessPolicy {
    fn default() -> Self {
        Self { accept: vec!["0".to_string(), "1".to_string()] }
    }
}

impl SuccessPolicy {
    pub fn strict() -> Self {
        Self { accept: vec!["0".to_string()] }
    }

    pub fn accepting(codes: &[&str]) -> Self {
        Self { accept: codes.iter().map(|c| c.to_string()).collect() }
    }

    pub fn is_success(&self, code: &str) -> bool {
        self.accept.iter().any(|c| c == code)
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Classification of one Vault call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    /// 2xx and an accepted business code.
    Success,
    /// 2xx but a rejecting business code.
    VaultError,
    /// Non-2xx HTTP status.
    HttpError,
    /// Transport-level exception.
    RequestFailed,
    /// The configured per-request timeout elapsed.
    RequestTimeout,
}

impl OutcomeKind {
    /// Taxonomy code for failed outcomes; `None` for success.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            OutcomeKind::Success => None,
            OutcomeKind::VaultError => Some(error_code::VAULT_ERROR),
            OutcomeKind::HttpError => Some(error_code::HTTP_ERROR),
            OutcomeKind::RequestFailed => Some(error_code::REQUEST_FAILED),
            OutcomeKind::RequestTimeout => Some(error_code::REQUEST_TIMEOUT),
        }
    }

    /// Transient faults are retryable; business rejections never are.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OutcomeKind::HttpError | OutcomeKind::RequestFailed | OutcomeKind::RequestTimeout
        )
    }
}

/// Full result of one Vault call.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub kind: OutcomeKind,
    /// Business code for Success/VaultError; taxonomy code otherwise.
    pub code: String,
    pub message: String,
    pub card_id: Option<String>,
    pub http_status: Option<u16>,
}

// ---------------------------------------------------------------------------
// VaultClient
// ---------------------------------------------------------------------------

/// HTTP client for the Vault SOAP endpoint.
pub struct VaultClient {
    http: reqwest::Client,
    endpoint: String,
    config: EnvelopeConfig,
    parser: Arc<dyn ResponseParser>,
    policy: SuccessPolicy,
}

impl VaultClient {
    pub fn new(
        endpoint: &str,
        config: EnvelopeConfig,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Internal(format!("http client init: {e}")))?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            config,
            parser: Arc::new(TextScanParser),
            policy: SuccessPolicy::default(),
        })
    }

    pub fn with_parser(mut self, parser: Arc<dyn ResponseParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_policy(mut self, policy: SuccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POST one envelope and classify the outcome. No implicit retries —
    /// retry decisions belong to the caller's policy.
    pub async fn call(&self, action: &str, envelope: &str) -> CallOutcome {
        let soap_action = self.config.soap_action(action);
        let request = match self.config.version {
            SoapVersion::V11 => self
                .http
                .post(&self.endpoint)
                .header(CONTENT_TYPE, "text/xml; charset=utf-8")
                .header("SOAPAction", format!("\"{soap_action}\"")),
            SoapVersion::V12 => self.http.post(&self.endpoint).header(
                CONTENT_TYPE,
                format!("application/soap+xml; charset=utf-8; action=\"{soap_action}\""),
            ),
        };

        let response = match request.body(envelope.to_string()).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return CallOutcome {
                    kind: OutcomeKind::RequestTimeout,
                    code: error_code::REQUEST_TIMEOUT.to_string(),
                    message: format!("request to {} timed out", self.endpoint),
                    card_id: None,
                    http_status: None,
                };
            }
            Err(e) => {
                return CallOutcome {
                    kind: OutcomeKind::RequestFailed,
                    code: error_code::REQUEST_FAILED.to_string(),
                    message: e.to_string(),
                    card_id: None,
                    http_status: None,
                };
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let parsed = self.parser.parse(&body);
        debug!(
            "vault {action} → {status}, ErrCode={:?}",
            parsed.err_code
        );

        if !status.is_success() {
            return CallOutcome {
                kind: OutcomeKind::HttpError,
                code: error_code::HTTP_ERROR.to_string(),
                message: format!(
                    "HTTP {} from {}: {}",
                    status.as_u16(),
                    self.endpoint,
                    parsed.err_message.unwrap_or_default()
                ),
                card_id: parsed.card_id,
                http_status: Some(status.as_u16()),
            };
        }

        let code = parsed.err_code.unwrap_or_default();
        let message = parsed.err_message.unwrap_or_default();
        if self.policy.is_success(&code) {
            CallOutcome {
                kind: OutcomeKind::Success,
                code,
                message,
                card_id: parsed.card_id,
                http_status: Some(status.as_u16()),
            }
        } else {
            CallOutcome {
                kind: OutcomeKind::VaultError,
                code,
                message,
                card_id: parsed.card_id,
                http_status: Some(status.as_u16()),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
