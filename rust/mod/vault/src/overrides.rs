use crate::model::{clip_card_no, CardProfile, RowOverride};

/// Merge a caller-supplied override into a mapped profile.
///
/// A present `card_no` replaces the profile's card number, re-clipped to
/// 10 characters — possibly emptying it intentionally, which turns the
/// row into a skip. A present `download_card` replaces the flag. All
/// other fields pass through. Idempotent.
pub fn apply(profile: &mut CardProfile, ov: &RowOverride) {
    if let Some(card_no) = &ov.card_no {
        profile.card_no = clip_card_no(card_no);
    }
    if let Some(download) = ov.download_card {
        profile.download_card = download;
    }
}
