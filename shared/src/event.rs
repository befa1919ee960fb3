use serde::{Deserialize, Serialize};

use crate::capabilities::api::ApiResult;
use crate::capabilities::timer::TimerOutput;
use crate::config::SessionConfig;
use crate::detection::Generation;
use crate::geometry::Region;
use crate::selector::BindingId;
use crate::transfer::ExportResult;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum Event {
    // Shell
    Configure(Box<SessionConfig>),

    // Upload & crop
    ImageSelected {
        file_name: String,
        #[serde(with = "serde_bytes")]
        bytes: Vec<u8>,
    },
    SelectorReady {
        binding: BindingId,
        region: Region,
    },
    RegionChanged {
        binding: BindingId,
        region: Region,
    },
    ConfirmRegion,

    // Label & save
    Back,
    LabelChanged {
        text: String,
    },
    CandidatePicked {
        index: usize,
    },
    Save,
    Reset,

    DismissToast,
    DismissError,

    // Capability responses (boxed to keep enum size small)
    #[serde(skip)]
    AnalysisResponded {
        generation: Generation,
        result: Box<ApiResult>,
    },
    #[serde(skip)]
    CropUploadResponded {
        generation: Generation,
        seq: u64,
        result: Box<ApiResult>,
    },
    #[serde(skip)]
    ExportResponded {
        generation: Generation,
        seq: u64,
        result: Box<ExportResult>,
    },
    #[serde(skip)]
    TimerFinished(TimerOutput),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Configure(_) => "configure",
            Self::ImageSelected { .. } => "image_selected",
            Self::SelectorReady { .. } => "selector_ready",
            Self::RegionChanged { .. } => "region_changed",
            Self::ConfirmRegion => "confirm_region",
            Self::Back => "back",
            Self::LabelChanged { .. } => "label_changed",
            Self::CandidatePicked { .. } => "candidate_picked",
            Self::Save => "save",
            Self::Reset => "reset",
            Self::DismissToast => "dismiss_toast",
            Self::DismissError => "dismiss_error",
            Self::AnalysisResponded { .. } => "analysis_responded",
            Self::CropUploadResponded { .. } => "crop_upload_responded",
            Self::ExportResponded { .. } => "export_responded",
            Self::TimerFinished(_) => "timer_finished",
        }
    }

    pub fn is_user_initiated(&self) -> bool {
        matches!(
            self,
            Self::ImageSelected { .. }
                | Self::ConfirmRegion
                | Self::Back
                | Self::LabelChanged { .. }
                | Self::CandidatePicked { .. }
                | Self::Save
                | Self::Reset
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_size_is_reasonable() {
        let size = std::mem::size_of::<Event>();
        assert!(size <= 64, "Event enum is {size} bytes, box more variants");
    }

    #[test]
    fn shell_events_round_trip() {
        let event = Event::RegionChanged {
            binding: BindingId(3),
            region: Region::new(0.1, 0.2, 0.3, 0.3),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(serde_json::from_str::<Event>(&json).unwrap(), event);
    }

    #[test]
    fn user_initiated_classification() {
        assert!(Event::Save.is_user_initiated());
        assert!(!Event::DismissToast.is_user_initiated());
    }
}
