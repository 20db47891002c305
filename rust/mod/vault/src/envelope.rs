use crate::model::{CardProfile, RunKind};

// ---------------------------------------------------------------------------
// SOAP version
// ---------------------------------------------------------------------------

/// SOAP envelope version. Selects the envelope namespace and how the
/// action is conveyed on the wire (header vs Content-Type parameter).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoapVersion {
    V11,
    V12,
}

impl SoapVersion {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "1.1" => Some(Self::V11),
            "1.2" => Some(Self::V12),
            _ => None,
        }
    }

    pub fn envelope_ns(&self) -> &'static str {
        match self {
            Self::V11 => "http://schemas.xmlsoap.org/soap/envelope/",
            Self::V12 => "http://www.w3.org/2003/05/soap-envelope",
        }
    }
}

/// Wire-level envelope configuration.
#[derive(Debug, Clone)]
pub struct EnvelopeConfig {
    pub version: SoapVersion,
    /// Service namespace for the body element and the SOAPAction URI,
    /// e.g. `http://tempuri.org/`.
    pub namespace: String,
}

impl EnvelopeConfig {
    /// Full SOAPAction URI for a named action.
    pub fn soap_action(&self, action: &str) -> String {
        if self.namespace.ends_with('/') {
            format!("{}{}", self.namespace, action)
        } else {
            format!("{}/{}", self.namespace, action)
        }
    }
}

// ---------------------------------------------------------------------------
// Escaping
// ---------------------------------------------------------------------------

/// Escape text content against `& < > " '`.
pub fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Envelope building
// ---------------------------------------------------------------------------

fn push_field(body: &mut String, tag: &str, value: &str) {
    body.push('<');
    body.push_str(tag);
    body.push('>');
    body.push_str(&escape_xml(value));
    body.push_str("</");
    body.push_str(tag);
    body.push('>');
}

fn push_bool(body: &mut String, tag: &str, value: bool) {
    push_field(body, tag, if value { "true" } else { "false" });
}

fn push_photo(body: &mut String, profile: &CardProfile) {
    // The external API tolerates a missing photo only as a self-closing
    // element, not an empty-string element.
    match &profile.photo {
        Some(b64) => push_field(body, "Photo", b64),
        None => body.push_str("<Photo />"),
    }
}

/// Serialize a profile into a SOAP envelope for the named action.
///
/// `Create` emits the minimal registration payload; `Update` the extended
/// demographic payload. Both share the same escaping and namespace logic.
pub fn build(
    config: &EnvelopeConfig,
    action: &str,
    kind: RunKind,
    profile: &CardProfile,
) -> String {
    let mut body = String::new();
    match kind {
        RunKind::Create => push_create_fields(&mut body, profile),
        RunKind::Update => push_update_fields(&mut body, profile),
    }

    format!(
        concat!(
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            r#"<soap:Envelope xmlns:soap="{env_ns}" "#,
            r#"xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" "#,
            r#"xmlns:xsd="http://www.w3.org/2001/XMLSchema">"#,
            r#"<soap:Body><{action} xmlns="{ns}">{body}</{action}></soap:Body>"#,
            r#"</soap:Envelope>"#,
        ),
        env_ns = config.version.envelope_ns(),
        action = action,
        ns = config.namespace,
        body = body,
    )
}

fn push_create_fields(body: &mut String, p: &CardProfile) {
    push_field(body, "CardNo", &p.card_no);
    push_field(body, "Name", &p.name);
    push_field(body, "Department", &p.department);
    push_field(body, "Company", &p.company);
    push_field(body, "AccessLevel", &p.access_level);
    push_field(body, "FaceAccessLevel", &p.face_access_level);
    push_bool(body, "ActiveStatus", p.active_status);
    push_bool(body, "NonExpired", p.non_expired);
    push_field(body, "ExpiredDate", &p.expired_date);
    push_field(body, "Email", &p.email);
    push_field(body, "MobileNo", &p.mobile_no);
    push_photo(body, p);
    push_bool(body, "DownloadCard", p.download_card);
}

fn push_update_fields(body: &mut String, p: &CardProfile) {
    push_field(body, "CardNo", &p.card_no);
    push_field(body, "CardPinNo", "");
    push_field(body, "CardType", "");
    push_field(body, "Name", &p.name);
    push_field(body, "Department", &p.department);
    push_field(body, "Company", &p.company);
    push_field(body, "AccessLevel", &p.access_level);
    push_field(body, "FaceAccessLevel", &p.face_access_level);
    push_field(body, "LiftAccessLevel", &p.lift_access_level);
    push_bool(body, "ActiveStatus", p.active_status);
    push_bool(body, "NonExpired", p.non_expired);
    push_field(body, "ExpiredDate", &p.expired_date);
    // "Gentle" is the Vault API's own spelling of the gender field.
    push_field(body, "Gentle", &p.gender);
    push_field(body, "BypassAP", "");
    push_field(body, "VehicleNo", &p.vehicle_no);
    push_field(body, "FloorNo", "");
    push_field(body, "UnitNo", "");
    push_field(body, "ParkingNo", "");
    push_field(body, "StaffNo", &p.staff_no);
    push_field(body, "Title", &p.title);
    push_field(body, "Position", &p.position);
    push_field(body, "NRIC", &p.nric);
    push_field(body, "Passport", &p.passport);
    push_field(body, "Race", &p.race);
    push_field(body, "DOB", &p.dob);
    push_field(body, "JoiningDate", &p.joining_date);
    push_field(body, "ResignDate", &p.resign_date);
    push_field(body, "Address1", &p.address1);
    push_field(body, "Address2", &p.address2);
    push_field(body, "PostalCode", &p.postal_code);
    push_field(body, "City", &p.city);
    push_field(body, "State", &p.state);
    push_field(body, "Email", &p.email);
    push_field(body, "MobileNo", &p.mobile_no);
    push_photo(body, p);
    push_bool(body, "DownloadCard", p.download_card);
}
