use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::model::{clip_card_no, CardProfile, Row, DEFAULT_ACCESS_LEVEL};

// ---------------------------------------------------------------------------
// Header aliases
//
// Historical exports spell the same logical column several ways. Candidates
// are tried in priority order; the first non-empty cell wins.
// ---------------------------------------------------------------------------

const CARD_NO: &[&str] = &["Card No #[Max 10]", "Card No [Max 10]", "CardNo", "Card Number"];
const NAME: &[&str] = &["Name", "Full Name", "Employee Name"];
const STAFF_NO: &[&str] = &["Staff No", "StaffNo", "Employee ID", "Emp No"];
const DEPARTMENT: &[&str] = &["Department", "Dept"];
const COMPANY: &[&str] = &["Company", "Company Name"];
const TITLE: &[&str] = &["Title"];
const POSITION: &[&str] = &["Position", "Designation"];
const GENDER: &[&str] = &["Gender", "Sex"];
const NRIC: &[&str] = &["NRIC", "IC No", "IC"];
const PASSPORT: &[&str] = &["Passport", "Passport No"];
const RACE: &[&str] = &["Race"];
const DOB: &[&str] = &["DOB", "Date of Birth"];
const JOINING_DATE: &[&str] = &["Joining Date", "Join Date", "Date Joined"];
const RESIGN_DATE: &[&str] = &["Resign Date", "Resignation Date"];
const ADDRESS1: &[&str] = &["Address1", "Address 1", "Address"];
const ADDRESS2: &[&str] = &["Address2", "Address 2"];
const POSTAL_CODE: &[&str] = &["Postal Code", "PostalCode", "Postcode"];
const CITY: &[&str] = &["City"];
const STATE: &[&str] = &["State"];
const EMAIL: &[&str] = &["Email", "Email Address", "E-mail"];
const MOBILE_NO: &[&str] = &["Mobile No", "MobileNo", "Mobile", "Phone"];
const VEHICLE_NO: &[&str] = &["Vehicle No", "VehicleNo", "Car Plate"];
const ACCESS_LEVEL: &[&str] = &["Access Level", "AccessLevel"];
const FACE_ACCESS_LEVEL: &[&str] = &["Face Access Level", "FaceAccessLevel"];
const LIFT_ACCESS_LEVEL: &[&str] = &["Lift Access Level", "LiftAccessLevel"];
const MESS_HALL: &[&str] = &["MessHall", "Mess Hall"];

// ---------------------------------------------------------------------------
// HeaderResolver
// ---------------------------------------------------------------------------

/// Resolves logical fields against the actual headers of a source.
///
/// Successful alias matches are cached (field → concrete header) with a
/// TTL so that a long batch over one source does not re-scan the alias
/// list per row, while a freshly uploaded source with different headers
/// re-resolves after the TTL expires. Explicitly injectable — no ambient
/// module state.
pub struct HeaderResolver {
    ttl: Duration,
    cache: Mutex<CacheState>,
}

struct CacheState {
    resolved: HashMap<&'static str, String>,
    refreshed_at: Instant,
}

impl Default for HeaderResolver {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl HeaderResolver {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cache: Mutex::new(CacheState {
                resolved: HashMap::new(),
                refreshed_at: Instant::now(),
            }),
        }
    }

    /// Resolve `field` in `row`, trying `aliases` in priority order and
    /// taking the first non-empty value. Returns an empty string when no
    /// alias matches.
    pub fn value(&self, row: &Row, field: &'static str, aliases: &[&str]) -> String {
        if let Some(hit) = self.cached_header(field) {
            if let Some(v) = lookup(row, &hit) {
                if !v.is_empty() {
                    return v;
                }
            }
        }

        for alias in aliases {
            if let Some(v) = lookup(row, alias) {
                if !v.is_empty() {
                    self.remember(field, alias);
                    return v;
                }
            }
        }
        String::new()
    }

    fn cached_header(&self, field: &'static str) -> Option<String> {
        let mut cache = self.cache.lock().unwrap();
        if cache.refreshed_at.elapsed() > self.ttl {
            cache.resolved.clear();
            cache.refreshed_at = Instant::now();
            return None;
        }
        cache.resolved.get(field).cloned()
    }

    fn remember(&self, field: &'static str, header: &str) {
        let mut cache = self.cache.lock().unwrap();
        cache.resolved.insert(field, header.to_string());
    }
}

/// Exact match on the trimmed header, then case-insensitive fallback.
fn lookup(row: &Row, header: &str) -> Option<String> {
    if let Some(v) = row.get(header) {
        return Some(v.trim().to_string());
    }
    row.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(header))
        .map(|(_, v)| v.trim().to_string())
}

// ---------------------------------------------------------------------------
// Mapping
// ---------------------------------------------------------------------------

/// Derive an access-level code from a MessHall value.
///
/// Unknown values and the literal "no access!!" sentinel map to blank,
/// which then falls through to the `"00"` default.
fn mess_hall_level(value: &str) -> &'static str {
    match value.trim().to_ascii_lowercase().as_str() {
        "labota" => "1",
        "makarti" => "2",
        _ => "",
    }
}

fn or_default_level(value: String) -> String {
    if value.trim().is_empty() {
        DEFAULT_ACCESS_LEVEL.to_string()
    } else {
        value
    }
}

/// Map one raw row into a canonical [`CardProfile`]. Pure: mapping the
/// same row twice yields an identical profile.
pub fn map_row(resolver: &HeaderResolver, row: &Row) -> CardProfile {
    let card_no = clip_card_no(&resolver.value(row, "card_no", CARD_NO));
    // Staff No is an employee identifier, never a card identifier —
    // it must not back-fill an empty card number.
    let staff_no = resolver.value(row, "staff_no", STAFF_NO);

    let mut access_level = resolver.value(row, "access_level", ACCESS_LEVEL);
    if access_level.is_empty() {
        access_level = mess_hall_level(&resolver.value(row, "mess_hall", MESS_HALL)).to_string();
    }
    let access_level = or_default_level(access_level);
    let face_access_level =
        or_default_level(resolver.value(row, "face_access_level", FACE_ACCESS_LEVEL));
    let lift_access_level =
        or_default_level(resolver.value(row, "lift_access_level", LIFT_ACCESS_LEVEL));

    CardProfile {
        card_no,
        name: resolver.value(row, "name", NAME),
        staff_no,
        department: resolver.value(row, "department", DEPARTMENT),
        company: resolver.value(row, "company", COMPANY),
        title: resolver.value(row, "title", TITLE),
        position: resolver.value(row, "position", POSITION),
        gender: resolver.value(row, "gender", GENDER),
        nric: resolver.value(row, "nric", NRIC),
        passport: resolver.value(row, "passport", PASSPORT),
        race: resolver.value(row, "race", RACE),
        dob: resolver.value(row, "dob", DOB),
        joining_date: resolver.value(row, "joining_date", JOINING_DATE),
        resign_date: resolver.value(row, "resign_date", RESIGN_DATE),
        address1: resolver.value(row, "address1", ADDRESS1),
        address2: resolver.value(row, "address2", ADDRESS2),
        postal_code: resolver.value(row, "postal_code", POSTAL_CODE),
        city: resolver.value(row, "city", CITY),
        state: resolver.value(row, "state", STATE),
        email: resolver.value(row, "email", EMAIL),
        mobile_no: resolver.value(row, "mobile_no", MOBILE_NO),
        vehicle_no: resolver.value(row, "vehicle_no", VEHICLE_NO),
        access_level,
        face_access_level,
        lift_access_level,
        ..CardProfile::default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn card_no_alias_priority() {
        let resolver = HeaderResolver::default();
        let r = row(&[("Card No #[Max 10]", "PRIMARY"), ("CardNo", "SECONDARY")]);
        let p = map_row(&resolver, &r);
        assert_eq!(p.card_no, "PRIMARY");

        let resolver = HeaderResolver::default();
        let r = row(&[("Card No #[Max 10]", ""), ("Card Number", "FALLBACK")]);
        let p = map_row(&resolver, &r);
        assert_eq!(p.card_no, "FALLBACK");
    }

    #[test]
    fn card_no_truncated_to_ten() {
        let resolver = HeaderResolver::default();
        let r = row(&[("CardNo", "12345678901234")]);
        let p = map_row(&resolver, &r);
        assert_eq!(p.card_no, "1234567890");
    }

    #[test]
    fn staff_no_never_backfills_card_no() {
        let resolver = HeaderResolver::default();
        let r = row(&[("Staff No", "EMP123"), ("Name", "Alice")]);
        let p = map_row(&resolver, &r);
        assert_eq!(p.staff_no, "EMP123");
        assert_eq!(p.card_no, "");
        assert!(!p.has_card_no());
    }

    #[test]
    fn mess_hall_lookup_table() {
        assert_eq!(mess_hall_level("labota"), "1");
        assert_eq!(mess_hall_level("LABOTA"), "1");
        assert_eq!(mess_hall_level("makarti"), "2");
        assert_eq!(mess_hall_level(""), "");
        assert_eq!(mess_hall_level("no access!!"), "");
        assert_eq!(mess_hall_level("canteen"), "");
    }

    #[test]
    fn access_level_from_mess_hall() {
        let resolver = HeaderResolver::default();
        let r = row(&[("CardNo", "C1"), ("MessHall", "labota")]);
        let p = map_row(&resolver, &r);
        assert_eq!(p.access_level, "1");
    }

    #[test]
    fn explicit_access_level_beats_mess_hall() {
        let resolver = HeaderResolver::default();
        let r = row(&[("CardNo", "C1"), ("Access Level", "07"), ("MessHall", "labota")]);
        let p = map_row(&resolver, &r);
        assert_eq!(p.access_level, "07");
    }

    #[test]
    fn blank_levels_default_to_00() {
        let resolver = HeaderResolver::default();
        let r = row(&[("CardNo", "C1"), ("MessHall", "no access!!")]);
        let p = map_row(&resolver, &r);
        assert_eq!(p.access_level, "00");
        assert_eq!(p.face_access_level, "00");
        assert_eq!(p.lift_access_level, "00");
    }

    #[test]
    fn face_and_lift_levels_independent() {
        let resolver = HeaderResolver::default();
        let r = row(&[
            ("CardNo", "C1"),
            ("Face Access Level", "03"),
            ("Lift Access Level", ""),
        ]);
        let p = map_row(&resolver, &r);
        assert_eq!(p.face_access_level, "03");
        assert_eq!(p.lift_access_level, "00");
    }

    #[test]
    fn business_defaults() {
        let resolver = HeaderResolver::default();
        let p = map_row(&resolver, &row(&[("CardNo", "C1")]));
        assert!(p.active_status);
        assert!(p.non_expired);
        assert!(p.download_card);
        assert_eq!(p.expired_date, "");
    }

    #[test]
    fn mapping_is_idempotent() {
        let resolver = HeaderResolver::default();
        let r = row(&[
            ("Card No [Max 10]", "CARD01"),
            ("Name", "Alice"),
            ("MessHall", "makarti"),
            ("Email", "alice@example.com"),
        ]);
        let first = map_row(&resolver, &r);
        let second = map_row(&resolver, &r);
        assert_eq!(first, second);
    }

    #[test]
    fn case_insensitive_header_fallback() {
        let resolver = HeaderResolver::default();
        let r = row(&[("cardno", "C9"), ("NAME", "Bob")]);
        let p = map_row(&resolver, &r);
        assert_eq!(p.card_no, "C9");
        assert_eq!(p.name, "Bob");
    }

    #[test]
    fn resolver_cache_survives_header_change_after_ttl() {
        let resolver = HeaderResolver::new(Duration::from_millis(0));
        let first = row(&[("CardNo", "A1")]);
        assert_eq!(map_row(&resolver, &first).card_no, "A1");
        // TTL of zero forces a re-scan; a different alias still resolves.
        let second = row(&[("Card Number", "B2")]);
        assert_eq!(map_row(&resolver, &second).card_no, "B2");
    }

    #[test]
    fn resolver_cached_header_missing_from_row_rescans() {
        let resolver = HeaderResolver::default();
        let first = row(&[("Card Number", "A1")]);
        assert_eq!(map_row(&resolver, &first).card_no, "A1");
        let second = row(&[("CardNo", "B2")]);
        assert_eq!(map_row(&resolver, &second).card_no, "B2");
    }
}
