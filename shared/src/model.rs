use serde::{Deserialize, Serialize};

use crate::detection::{Candidate, DetectionStatus};
use crate::error::{AppError, ErrorKind};
use crate::geometry::Region;
use crate::reconcile::{Notice, Reconciler};
use crate::resource::HandleLedger;
use crate::session::{Session, SessionState, ShareIntent};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToastKind {
    Info,
    Success,
    Warning,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Toast {
    pub kind: ToastKind,
    pub message: String,
}

impl From<Notice> for Toast {
    fn from(notice: Notice) -> Self {
        match notice {
            Notice::LabelDetected(label) => Self {
                kind: ToastKind::Success,
                message: format!("Shop name detected: {label}"),
            },
            Notice::DetectionUnavailable => Self {
                kind: ToastKind::Info,
                message: "Automatic detection unavailable. Adjust the crop manually.".into(),
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct Model {
    pub session: Session,
    pub engine: Reconciler,
    pub ledger: HandleLedger,
    pub toast: Option<Toast>,
    pub active_error: Option<AppError>,
}

impl Model {
    pub fn set_error(&mut self, error: AppError) {
        self.active_error = Some(error);
    }

    pub fn clear_error(&mut self) {
        self.active_error = None;
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorView {
    pub code: String,
    pub message: String,
    pub is_retryable: bool,
}

impl From<&AppError> for ErrorView {
    fn from(e: &AppError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.user_facing_message(),
            is_retryable: e.is_retryable(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum Screen {
    Idle,
    Cropping {
        can_continue: bool,
        detection: Option<DetectionStatus>,
        region: Option<Region>,
        /// Why the gate is still closed, if it is.
        hint: Option<String>,
    },
    Labeling {
        label: String,
        candidates: Vec<Candidate>,
        can_save: bool,
        waiting_for_upload: bool,
        detecting: bool,
    },
    Saving {
        label: String,
    },
    Done {
        result_url: String,
        label: String,
        download_name: String,
        share: ShareIntent,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ViewModel {
    pub screen: Screen,
    pub toast: Option<Toast>,
    pub error: Option<ErrorView>,
}

impl ViewModel {
    pub fn from_model(model: &Model) -> Self {
        let session = &model.session;
        let screen = match session.state {
            SessionState::Idle => Screen::Idle,
            SessionState::Cropping => Screen::Cropping {
                can_continue: session.gate_open(),
                detection: session.detection_status(),
                region: session.region,
                hint: (!session.gate_open()).then(|| {
                    let degraded = session.detection.as_ref().and_then(|t| t.error.as_ref());
                    match degraded {
                        Some(e) if session.has_region() => e.user_facing_message(),
                        _ if session.has_region() => {
                            AppError::new(ErrorKind::RegionNotConfirmed, "").user_facing_message()
                        }
                        _ => AppError::new(ErrorKind::EmptyRegion, "").user_facing_message(),
                    }
                }),
            },
            SessionState::Labeling => Screen::Labeling {
                label: session.label.clone(),
                candidates: session.candidates.clone(),
                can_save: session.can_save(),
                waiting_for_upload: session.waiting_for_upload(),
                detecting: session.label_watch.is_some(),
            },
            SessionState::Saving => Screen::Saving {
                label: session.label.clone(),
            },
            SessionState::Done => match &session.completion {
                Some(done) => Screen::Done {
                    result_url: done.result_url.clone(),
                    label: done.label.clone(),
                    download_name: done.download_name.clone(),
                    share: done.share.clone(),
                },
                None => Screen::Idle,
            },
        };

        Self {
            screen,
            toast: model.toast.clone(),
            error: model.active_error.as_ref().map(ErrorView::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_view() {
        let view = ViewModel::from_model(&Model::default());
        assert_eq!(view.screen, Screen::Idle);
        assert!(view.toast.is_none());
        assert!(view.error.is_none());
    }

    #[test]
    fn test_error_view_uses_user_message() {
        let mut model = Model::default();
        model.set_error(AppError::new(ErrorKind::EmptyLabel, "label is empty"));
        let view = ViewModel::from_model(&model);
        let error = view.error.unwrap();
        assert_eq!(error.code, "EMPTY_LABEL");
        assert_eq!(error.message, "Please enter a shop name.");
    }

    #[test]
    fn test_notice_toasts() {
        let toast = Toast::from(Notice::LabelDetected("Shop A".into()));
        assert_eq!(toast.kind, ToastKind::Success);
        assert!(toast.message.contains("Shop A"));
    }
}
