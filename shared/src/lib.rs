#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::must_use_candidate)]

pub mod app;
pub mod capabilities;
pub mod config;
pub mod detection;
pub mod error;
pub mod event;
pub mod geometry;
pub mod image_processing;
pub mod model;
pub mod reconcile;
pub mod resource;
pub mod selector;
pub mod session;
pub mod transfer;

pub use app::App;
pub use capabilities::{Capabilities, Effect};
pub use config::SessionConfig;
pub use crux_core::App as CruxApp;
pub use detection::{DetectionMethod, DetectionOutcome, DetectionStatus, Generation};
pub use error::{AppError, ErrorCategory, ErrorKind, ErrorSeverity};
pub use event::Event;
pub use geometry::{Region, RegionConstraint};
pub use model::{Model, Screen, Toast, ToastKind, ViewModel};
pub use reconcile::{Directive, Input, Reconciler, Step, TransitionError};
pub use resource::{HandleLedger, ImageHandle};
pub use selector::BindingId;
pub use session::{Session, SessionState};
