use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capabilities::timer::TimerId;
use crate::detection::{Candidate, DetectionMethod, DetectionStatus, Generation};
use crate::error::AppError;
use crate::geometry::{Region, RegionConstraint};
use crate::resource::ImageHandle;
use crate::selector::SelectorBinding;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Idle,
    Cropping,
    Labeling,
    Saving,
    Done,
}

impl SessionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Cropping => "cropping",
            Self::Labeling => "labeling",
            Self::Saving => "saving",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DetectionTask {
    pub generation: Generation,
    pub status: DetectionStatus,
    pub error: Option<AppError>,
}

impl DetectionTask {
    pub fn pending(generation: Generation) -> Self {
        Self {
            generation,
            status: DetectionStatus::Pending,
            error: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RegionGuess {
    pub region: Region,
    pub method: DetectionMethod,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelOrigin {
    User,
    Detected,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UploadTicket {
    pub seq: u64,
    pub region: Region,
}

/// Crop-confirm uploads for this session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UploadState {
    pub seq: u64,
    pub in_flight: Option<UploadTicket>,
    /// Region the current `server_file_id` was produced from.
    pub accepted_region: Option<Region>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExportState {
    pub seq: u64,
    pub in_flight: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareIntent {
    pub title: String,
    pub text: String,
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub result_url: String,
    pub label: String,
    pub download_name: String,
    pub share: ShareIntent,
}

impl Completion {
    pub fn new(session: SessionId, label: &str, result_url: String) -> Self {
        let simple = session.0.simple().to_string();
        let short = simple.get(..12).unwrap_or(&simple);
        Self {
            download_name: format!("ramen_{short}.jpg"),
            share: ShareIntent {
                title: label.to_string(),
                text: format!("{label}のラーメン 🍜"),
                url: result_url.clone(),
            },
            label: label.to_string(),
            result_url,
        }
    }
}

/// One editing attempt, from upload to done or reset.
#[derive(Debug, Default)]
pub struct Session {
    pub id: Option<SessionId>,
    pub state: SessionState,
    pub source: Option<ImageHandle>,
    pub generation: Option<Generation>,
    pub detection: Option<DetectionTask>,
    pub detection_deadline: Option<TimerId>,
    pub binding: Option<SelectorBinding>,
    pub constraint: Option<RegionConstraint>,
    pub region: Option<Region>,
    pub region_user_touched: bool,
    /// Guess that arrived before the selector was ready.
    pub pending_guess: Option<RegionGuess>,
    pub applied_guess: Option<RegionGuess>,
    pub label: String,
    pub label_origin: Option<LabelOrigin>,
    pub label_watch: Option<TimerId>,
    pub candidates: Vec<Candidate>,
    pub upload: UploadState,
    pub server_file_id: Option<String>,
    pub export: ExportState,
    pub completion: Option<Completion>,
}

impl Session {
    pub fn is_current(&self, generation: Generation) -> bool {
        self.generation == Some(generation)
    }

    pub fn detection_status(&self) -> Option<DetectionStatus> {
        self.detection.as_ref().map(|t| t.status)
    }

    pub fn detection_pending(&self) -> bool {
        self.detection_status() == Some(DetectionStatus::Pending)
    }

    pub fn auto_guess_accepted(&self) -> bool {
        self.applied_guess
            .is_some_and(|guess| guess.method.unlocks_gate())
    }

    pub fn has_region(&self) -> bool {
        self.region.is_some_and(|r| !r.is_empty())
    }

    /// Cropping may be left: a non-empty region the user either touched or
    /// accepted from detection.
    pub fn gate_open(&self) -> bool {
        self.has_region() && (self.region_user_touched || self.auto_guess_accepted())
    }

    pub fn label_is_empty(&self) -> bool {
        self.label.trim().is_empty()
    }

    pub fn can_save(&self) -> bool {
        self.state == SessionState::Labeling
            && !self.label_is_empty()
            && self.server_file_id.is_some()
    }

    pub fn waiting_for_upload(&self) -> bool {
        self.server_file_id.is_none() && self.upload.in_flight.is_some()
    }

    pub fn constraint(&self) -> RegionConstraint {
        self.constraint
            .unwrap_or_else(|| RegionConstraint::unknown(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_idle() {
        let session = Session::default();
        assert_eq!(session.state, SessionState::Idle);
        assert!(session.id.is_none());
        assert!(!session.gate_open());
    }

    #[test]
    fn test_gate_needs_touch_or_accepted_guess() {
        let mut session = Session {
            region: Some(Region::new(0.1, 0.1, 0.5, 0.5)),
            ..Session::default()
        };
        assert!(!session.gate_open());

        session.applied_guess = Some(RegionGuess {
            region: Region::new(0.1, 0.1, 0.5, 0.5),
            method: DetectionMethod::None,
        });
        assert!(!session.gate_open());

        session.applied_guess = Some(RegionGuess {
            region: Region::new(0.1, 0.1, 0.5, 0.5),
            method: DetectionMethod::Approximate,
        });
        assert!(session.gate_open());

        session.region = Some(Region::new(0.1, 0.1, 0.0, 0.5));
        assert!(!session.gate_open());
    }

    #[test]
    fn test_completion_share_text() {
        let done = Completion::new(SessionId::new(), "Shop A", "https://x/r.jpg".into());
        assert_eq!(done.share.text, "Shop Aのラーメン 🍜");
        assert_eq!(done.share.title, "Shop A");
        assert!(done.download_name.starts_with("ramen_"));
        assert!(done.download_name.ends_with(".jpg"));
    }
}
