use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::warn;

use crate::model::CardProfile;

const PHOTO_EXTS: &[&str] = &["jpg", "jpeg", "png"];

/// Looks up photo files co-located with the source data, named by card
/// number or staff number.
pub struct PhotoResolver {
    dir: Option<PathBuf>,
}

impl PhotoResolver {
    pub fn new(dir: Option<&Path>) -> Self {
        Self { dir: dir.map(|d| d.to_path_buf()) }
    }

    /// Candidate filenames in lookup order. Staff-number candidates apply
    /// only when none of the card-number candidates exists on disk.
    pub fn candidates(&self, profile: &CardProfile) -> Vec<PathBuf> {
        let dir = match &self.dir {
            Some(d) => d,
            None => return Vec::new(),
        };
        let mut list = Vec::new();
        let card_no = profile.card_no.trim();
        if !card_no.is_empty() {
            for ext in PHOTO_EXTS {
                list.push(dir.join(format!("{card_no}.{ext}")));
            }
        }
        let staff_no = profile.staff_no.trim();
        if !staff_no.is_empty() && !list.iter().any(|p| p.is_file()) {
            for ext in PHOTO_EXTS {
                list.push(dir.join(format!("{staff_no}.{ext}")));
            }
        }
        list
    }

    /// Existence-only check — no file read. For UI preview scenarios that
    /// only need a yes/no answer.
    pub fn find(&self, profile: &CardProfile) -> Option<PathBuf> {
        self.candidates(profile).into_iter().find(|p| p.is_file())
    }

    /// Read and base64-attach the first existing candidate, returning the
    /// path that was used. No photo found is not an error; an unreadable
    /// photo file degrades to "no photo".
    pub fn attach(&self, profile: &mut CardProfile) -> Option<PathBuf> {
        let path = self.find(profile)?;
        match fs::read(&path) {
            Ok(bytes) => {
                profile.photo = Some(BASE64.encode(bytes));
                Some(path)
            }
            Err(e) => {
                warn!("photo {} unreadable, sending without photo: {e}", path.display());
                None
            }
        }
    }
}
