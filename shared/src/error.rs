use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::MAX_INPUT_BYTES;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Transient,
    Permanent,
}

/// Which failure class an error belongs to. Decides how it is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Fall back to a usable default and keep going.
    Degradation,
    /// Blocks one transition until the user fixes the input.
    UserInput,
    /// Stale or out-of-state callback. Logged, never shown.
    Sequencing,
    /// An external call failed. Surfaced; the session stays where it was.
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    EmptyFile,
    FileTooLarge,
    EmptyRegion,
    RegionNotConfirmed,
    EmptyLabel,
    LabelTooLong,
    NotReady,
    DetectionUnavailable,
    Network,
    Timeout,
    Server,
    Export,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::EmptyFile => "EMPTY_FILE",
            Self::FileTooLarge => "FILE_TOO_LARGE",
            Self::EmptyRegion => "EMPTY_REGION",
            Self::RegionNotConfirmed => "REGION_NOT_CONFIRMED",
            Self::EmptyLabel => "EMPTY_LABEL",
            Self::LabelTooLong => "LABEL_TOO_LONG",
            Self::NotReady => "NOT_READY",
            Self::DetectionUnavailable => "DETECTION_UNAVAILABLE",
            Self::Network => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Server => "SERVER_ERROR",
            Self::Export => "EXPORT_FAILED",
        }
    }

    #[must_use]
    pub const fn category(self) -> ErrorCategory {
        match self {
            Self::EmptyFile
            | Self::FileTooLarge
            | Self::EmptyRegion
            | Self::RegionNotConfirmed
            | Self::EmptyLabel
            | Self::LabelTooLong
            | Self::NotReady => ErrorCategory::UserInput,
            Self::DetectionUnavailable => ErrorCategory::Degradation,
            Self::Network | Self::Timeout | Self::Server | Self::Export => ErrorCategory::External,
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::NotReady | Self::Network | Self::Timeout | Self::Server => {
                ErrorSeverity::Transient
            }
            _ => ErrorSeverity::Permanent,
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::NotReady | Self::Network | Self::Timeout | Self::Server | Self::Export
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub internal_message: Option<String>,
    pub context: HashMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            internal_message: None,
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    /// Re-file as a degradation, recording the original code as the cause.
    #[must_use]
    pub fn into_degradation(self, message: impl Into<String>) -> Self {
        let cause = self.code();
        let internal = self.internal_message.unwrap_or(self.message);
        let mut degraded = Self::new(ErrorKind::DetectionUnavailable, message)
            .with_internal(internal)
            .with_context("cause", cause);
        degraded.context.extend(self.context);
        degraded
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Text for the notification surface. Export failures are shown verbatim.
    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::EmptyFile => "The selected file is empty.".into(),
            ErrorKind::FileTooLarge => format!(
                "The photo is too large. Please use an image smaller than {} MB.",
                MAX_INPUT_BYTES / (1024 * 1024)
            ),
            ErrorKind::EmptyRegion => "Please select an area of the photo to crop.".into(),
            ErrorKind::RegionNotConfirmed => {
                "Adjust the crop once before continuing.".into()
            }
            ErrorKind::EmptyLabel => "Please enter a shop name.".into(),
            ErrorKind::LabelTooLong => self.message.clone(),
            ErrorKind::NotReady => {
                "Still uploading the cropped photo. Please try again in a moment.".into()
            }
            ErrorKind::DetectionUnavailable => self.message.clone(),
            ErrorKind::Network => {
                "Unable to connect. Please check your internet connection and try again.".into()
            }
            ErrorKind::Timeout => "The request timed out. Please try again.".into(),
            ErrorKind::Server | ErrorKind::Export => self.message.clone(),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}
