use metrics::counter;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::capabilities::timer::TimerId;
use crate::config::SessionConfig;
use crate::detection::{DetectionOutcome, DetectionResult, DetectionStatus, Generation, GenerationCounter};
use crate::error::{AppError, ErrorCategory, ErrorKind};
use crate::geometry::Region;
use crate::resource::{self, ImageHandle};
use crate::selector::{BindingError, BindingId, RegionChange, SelectorBinding};
use crate::session::{
    Completion, DetectionTask, LabelOrigin, RegionGuess, Session, SessionId, SessionState,
    UploadTicket,
};

#[derive(Debug)]
pub enum Input {
    Upload(ImageHandle),
    SelectorReady { binding: BindingId, region: Region },
    RegionChanged { binding: BindingId, region: Region },
    DetectionResolved { generation: Generation, outcome: DetectionOutcome },
    TimerFired(TimerId),
    LabelEdited(String),
    CandidatePicked(usize),
    ConfirmRegion,
    Back,
    CropUploaded { generation: Generation, seq: u64, result: Result<String, AppError> },
    Save,
    ExportFinished { generation: Generation, seq: u64, result: Result<String, AppError> },
    Reset,
}

impl Input {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Upload(_) => "upload",
            Self::SelectorReady { .. } => "selector_ready",
            Self::RegionChanged { .. } => "region_changed",
            Self::DetectionResolved { .. } => "detection_resolved",
            Self::TimerFired(_) => "timer_fired",
            Self::LabelEdited(_) => "label_edited",
            Self::CandidatePicked(_) => "candidate_picked",
            Self::ConfirmRegion => "confirm_region",
            Self::Back => "back",
            Self::CropUploaded { .. } => "crop_uploaded",
            Self::Save => "save",
            Self::ExportFinished { .. } => "export_finished",
            Self::Reset => "reset",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    LabelDetected(String),
    DetectionUnavailable,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Directive {
    InitializeSelector { binding: BindingId, initial: Option<Region> },
    SetRegion { binding: BindingId, region: Region },
    DestroySelector { binding: BindingId },
    Analyze { generation: Generation },
    ConfirmCrop { generation: Generation, seq: u64, region: Region },
    Export { generation: Generation, seq: u64, file_id: String, label: String },
    StartTimer { id: TimerId, after_ms: u64 },
    CancelTimer { id: TimerId },
    Notify(Notice),
    Surface(AppError),
}

const DETECTION_UNAVAILABLE: &str = "Automatic detection is unavailable. Adjust the crop by hand.";

/// Why an input was dropped without effect. Never shown to the user.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum TransitionError {
    #[error("{input} ignored in state {state}")]
    WrongState {
        input: &'static str,
        state: SessionState,
    },

    #[error("{input} for {got} is stale (current {current:?})")]
    StaleGeneration {
        input: &'static str,
        got: Generation,
        current: Option<Generation>,
    },

    #[error("{input} sequence {got} superseded")]
    StaleSequence { input: &'static str, got: u64 },

    #[error("selector callback dropped: {0}")]
    Binding(#[from] BindingError),

    #[error("no live selector binding")]
    NoBinding,

    #[error("detection for {0} already resolved")]
    AlreadyResolved(Generation),

    #[error("unknown timer {0}")]
    UnknownTimer(TimerId),

    #[error("no candidate at index {0}")]
    NoSuchCandidate(usize),
}

impl TransitionError {
    pub const fn category(&self) -> ErrorCategory {
        ErrorCategory::Sequencing
    }
}

#[derive(Debug)]
pub struct Step {
    pub session: Session,
    pub directives: Vec<Directive>,
    pub discarded: Option<TransitionError>,
}

type Outcome = Result<(), TransitionError>;

#[derive(Debug, Default)]
pub struct Reconciler {
    config: SessionConfig,
    generations: GenerationCounter,
    next_binding: u64,
    next_timer: u64,
}

impl Reconciler {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config: config.validated(),
            ..Self::default()
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SessionConfig) {
        self.config = config.validated();
    }

    pub fn step(&mut self, mut session: Session, input: Input) -> Step {
        let name = input.name();
        let mut out = Vec::new();

        let result = match input {
            Input::Upload(handle) => {
                self.upload(&mut session, handle, &mut out);
                Ok(())
            }
            Input::SelectorReady { binding, region } => {
                Self::selector_ready(&mut session, binding, region, &mut out)
            }
            Input::RegionChanged { binding, region } => {
                Self::region_changed(&mut session, binding, region)
            }
            Input::DetectionResolved {
                generation,
                outcome,
            } => Self::detection_resolved(&mut session, generation, outcome, &mut out),
            Input::TimerFired(id) => Self::timer_fired(&mut session, id, &mut out),
            Input::LabelEdited(text) => Self::edit_label(&mut session, text, name, &mut out),
            Input::CandidatePicked(index) => Self::pick_candidate(&mut session, index, &mut out),
            Input::ConfirmRegion => self.confirm_region(&mut session, &mut out),
            Input::Back => self.back(&mut session, &mut out),
            Input::CropUploaded {
                generation,
                seq,
                result,
            } => Self::crop_uploaded(&mut session, generation, seq, result, &mut out),
            Input::Save => self.save(&mut session, &mut out),
            Input::ExportFinished {
                generation,
                seq,
                result,
            } => Self::export_finished(&mut session, generation, seq, result, &mut out),
            Input::Reset => {
                Self::teardown(&mut session, &mut out);
                session = Session::default();
                info!("session reset");
                counter!("session.transition", "to" => SessionState::Idle.as_str()).increment(1);
                Ok(())
            }
        };

        let discarded = result.err();
        if let Some(reason) = &discarded {
            debug!(
                input = name,
                state = %session.state,
                generation = ?session.generation,
                %reason,
                category = ?reason.category(),
                "input discarded"
            );
            counter!("session.discarded", "input" => name).increment(1);
        }

        Step {
            session,
            directives: out,
            discarded,
        }
    }

    fn upload(&mut self, session: &mut Session, handle: ImageHandle, out: &mut Vec<Directive>) {
        Self::teardown(session, out);

        let generation = self.generations.next();
        let constraint = handle.constraint(self.config.square_crop);
        *session = Session {
            id: Some(SessionId::new()),
            generation: Some(generation),
            detection: Some(DetectionTask::pending(generation)),
            constraint: Some(constraint),
            ..Session::default()
        };
        resource::replace(&mut session.source, handle);
        Self::transition(session, SessionState::Cropping);

        self.bind(session, out);
        out.push(Directive::Analyze { generation });

        let deadline = self.timer();
        session.detection_deadline = Some(deadline);
        out.push(Directive::StartTimer {
            id: deadline,
            after_ms: self.config.detection_deadline_ms,
        });
    }

    fn selector_ready(
        session: &mut Session,
        binding: BindingId,
        reported: Region,
        out: &mut Vec<Directive>,
    ) -> Outcome {
        Self::require(session, SessionState::Cropping, "selector_ready")?;
        let constraint = session.constraint();
        let selector = session.binding.as_mut().ok_or(TransitionError::NoBinding)?;
        selector.check(binding)?;
        if let Err(e) = selector.mark_ready() {
            error!(%binding, "selector signalled ready twice, ignoring");
            return Err(e.into());
        }

        // A snapshot from an earlier visit stays authoritative.
        if session.region.is_none() {
            session.region = Some(reported.clamp(constraint));
        }

        if let Some(guess) = session.pending_guess.take() {
            if !session.region_user_touched {
                Self::apply_guess(session, guess, out);
            }
        } else if let Some(guess) = session.applied_guess {
            if guess.method.unlocks_gate() && !session.region_user_touched {
                Self::apply_guess(session, guess, out);
            }
        }
        Ok(())
    }

    fn region_changed(session: &mut Session, binding: BindingId, reported: Region) -> Outcome {
        Self::require(session, SessionState::Cropping, "region_changed")?;
        let constraint = session.constraint();
        let selector = session.binding.as_mut().ok_or(TransitionError::NoBinding)?;
        selector.check(binding)?;

        match selector.classify(&reported) {
            RegionChange::AutoPlacement => {
                if selector.is_live() && session.region.is_none() {
                    session.region = Some(reported.clamp(constraint));
                }
                debug!(%binding, "selector auto-placement");
            }
            RegionChange::Echo => {}
            RegionChange::UserGesture => {
                if !selector.is_live() {
                    return Err(TransitionError::NoBinding);
                }
                session.region = Some(reported.clamp(constraint));
                if !session.region_user_touched {
                    debug!(%binding, "first manual region adjustment");
                }
                session.region_user_touched = true;
                session.pending_guess = None;
            }
        }
        Ok(())
    }

    fn detection_resolved(
        session: &mut Session,
        generation: Generation,
        outcome: DetectionOutcome,
        out: &mut Vec<Directive>,
    ) -> Outcome {
        Self::require_current(session, generation, "detection_resolved")?;
        let task = session
            .detection
            .as_mut()
            .filter(|t| t.status == DetectionStatus::Pending)
            .ok_or(TransitionError::AlreadyResolved(generation))?;

        match outcome {
            DetectionOutcome::Failed(e) => {
                let e = e.into_degradation(DETECTION_UNAVAILABLE);
                warn!(%generation, error = %e, category = ?e.category(), "detection failed, continuing manually");
                counter!("detection.degraded").increment(1);
                task.status = DetectionStatus::Failed;
                task.error = Some(e);
                Self::settle_timers(session, out);
                if matches!(session.state, SessionState::Cropping | SessionState::Labeling) {
                    out.push(Directive::Notify(Notice::DetectionUnavailable));
                }
            }
            DetectionOutcome::Succeeded(result) => {
                task.status = DetectionStatus::Succeeded;
                info!(
                    %generation,
                    method = ?result.method,
                    has_region = result.region_guess.is_some(),
                    has_label = result.label_guess.is_some(),
                    "detection succeeded"
                );
                Self::reconcile(session, result, out);
                Self::settle_timers(session, out);
            }
        }
        Ok(())
    }

    fn reconcile(session: &mut Session, result: DetectionResult, out: &mut Vec<Directive>) {
        let editing = matches!(session.state, SessionState::Cropping | SessionState::Labeling);
        if editing {
            session.candidates = result.candidates;
        }

        if let Some(region) = result.region_guess {
            let guess = RegionGuess {
                region,
                method: result.method,
            };
            let state = session.state;
            match state {
                SessionState::Cropping if session.region_user_touched => {
                    debug!("region guess ignored, user already adjusted");
                }
                SessionState::Cropping if session.binding.as_ref().is_some_and(SelectorBinding::is_live) => {
                    Self::apply_guess(session, guess, out);
                }
                SessionState::Cropping => {
                    debug!("selector not ready, caching region guess");
                    session.pending_guess = Some(guess);
                }
                state => {
                    debug!(%state, "region guess arrived after cropping, discarded");
                    counter!("detection.region_late").increment(1);
                }
            }
        }

        if let Some(label) = result.label_guess {
            let accepting = match session.state {
                SessionState::Cropping => true,
                SessionState::Labeling => session.label_watch.is_some(),
                _ => false,
            };
            if accepting && session.label_is_empty() {
                session.label.clone_from(&label);
                session.label_origin = Some(LabelOrigin::Detected);
                out.push(Directive::Notify(Notice::LabelDetected(label)));
            } else {
                debug!(state = %session.state, "label guess not applied");
            }
        }
    }

    fn apply_guess(session: &mut Session, guess: RegionGuess, out: &mut Vec<Directive>) {
        let Some(selector) = session.binding.as_mut() else {
            return;
        };
        selector.expect_echo(guess.region);
        out.push(Directive::SetRegion {
            binding: selector.id(),
            region: guess.region,
        });
        session.region = Some(guess.region);
        session.applied_guess = Some(guess);
    }

    fn timer_fired(session: &mut Session, id: TimerId, out: &mut Vec<Directive>) -> Outcome {
        if session.detection_deadline == Some(id) {
            session.detection_deadline = None;
            if let Some(task) = session.detection.as_mut().filter(|t| t.status == DetectionStatus::Pending) {
                warn!(generation = %task.generation, "detection deadline passed, continuing manually");
                counter!("detection.degraded").increment(1);
                task.status = DetectionStatus::Failed;
                task.error = Some(
                    AppError::new(ErrorKind::Timeout, "detection timed out")
                        .into_degradation(DETECTION_UNAVAILABLE),
                );
                if let Some(watch) = session.label_watch.take() {
                    out.push(Directive::CancelTimer { id: watch });
                }
                if matches!(session.state, SessionState::Cropping | SessionState::Labeling) {
                    out.push(Directive::Notify(Notice::DetectionUnavailable));
                }
            }
            return Ok(());
        }
        if session.label_watch == Some(id) {
            session.label_watch = None;
            debug!("label watcher gave up");
            return Ok(());
        }
        Err(TransitionError::UnknownTimer(id))
    }

    fn edit_label(
        session: &mut Session,
        text: String,
        name: &'static str,
        out: &mut Vec<Directive>,
    ) -> Outcome {
        if !matches!(session.state, SessionState::Cropping | SessionState::Labeling) {
            return Err(TransitionError::WrongState {
                input: name,
                state: session.state,
            });
        }
        session.label = text;
        session.label_origin = (!session.label_is_empty()).then_some(LabelOrigin::User);
        if !session.label_is_empty() {
            Self::stop_label_watch(session, out);
        }
        Ok(())
    }

    fn pick_candidate(session: &mut Session, index: usize, out: &mut Vec<Directive>) -> Outcome {
        let name = session
            .candidates
            .get(index)
            .map(|c| c.name.clone())
            .ok_or(TransitionError::NoSuchCandidate(index))?;
        Self::edit_label(session, name, "candidate_picked", out)
    }

    fn confirm_region(&mut self, session: &mut Session, out: &mut Vec<Directive>) -> Outcome {
        Self::require(session, SessionState::Cropping, "confirm_region")?;

        let region = match session.region {
            Some(region) if !region.is_empty() => region,
            _ => {
                out.push(Directive::Surface(AppError::new(
                    ErrorKind::EmptyRegion,
                    "crop region is empty",
                )));
                return Ok(());
            }
        };
        if !session.gate_open() {
            out.push(Directive::Surface(AppError::new(
                ErrorKind::RegionNotConfirmed,
                "region neither adjusted nor detected",
            )));
            return Ok(());
        }

        if let Some(selector) = session.binding.take() {
            out.push(Directive::DestroySelector {
                binding: selector.id(),
            });
        }
        session.pending_guess = None;
        Self::transition(session, SessionState::Labeling);
        self.upload_crop(session, region, out);

        if session.label_is_empty() && session.detection_pending() {
            let id = self.timer();
            session.label_watch = Some(id);
            out.push(Directive::StartTimer {
                id,
                after_ms: self.config.label_watch_ms,
            });
        }
        Ok(())
    }

    fn upload_crop(&mut self, session: &mut Session, region: Region, out: &mut Vec<Directive>) {
        let Some(generation) = session.generation else {
            return;
        };
        let accepted = session.server_file_id.is_some() && session.upload.accepted_region == Some(region);
        let in_flight = session.upload.in_flight.is_some_and(|t| t.region == region);
        if accepted || in_flight {
            debug!(accepted, in_flight, "region unchanged, reusing crop upload");
            return;
        }

        session.server_file_id = None;
        session.upload.accepted_region = None;
        session.upload.seq += 1;
        let seq = session.upload.seq;
        session.upload.in_flight = Some(UploadTicket { seq, region });
        out.push(Directive::ConfirmCrop {
            generation,
            seq,
            region,
        });
    }

    fn back(&mut self, session: &mut Session, out: &mut Vec<Directive>) -> Outcome {
        Self::require(session, SessionState::Labeling, "back")?;
        Self::stop_label_watch(session, out);
        Self::transition(session, SessionState::Cropping);
        self.bind(session, out);
        Ok(())
    }

    fn crop_uploaded(
        session: &mut Session,
        generation: Generation,
        seq: u64,
        result: Result<String, AppError>,
        out: &mut Vec<Directive>,
    ) -> Outcome {
        Self::require_current(session, generation, "crop_uploaded")?;
        let ticket = session
            .upload
            .in_flight
            .filter(|t| t.seq == seq)
            .ok_or(TransitionError::StaleSequence {
                input: "crop_uploaded",
                got: seq,
            })?;
        session.upload.in_flight = None;

        match result {
            Ok(file_id) => {
                debug!(%generation, seq, "crop accepted");
                session.server_file_id = Some(file_id);
                session.upload.accepted_region = Some(ticket.region);
            }
            Err(e) => {
                warn!(%generation, seq, error = %e, "crop upload failed");
                if matches!(session.state, SessionState::Cropping | SessionState::Labeling) {
                    out.push(Directive::Surface(e));
                }
            }
        }
        Ok(())
    }

    fn save(&mut self, session: &mut Session, out: &mut Vec<Directive>) -> Outcome {
        Self::require(session, SessionState::Labeling, "save")?;

        let label = session.label.trim().to_string();
        if label.is_empty() {
            out.push(Directive::Surface(AppError::new(ErrorKind::EmptyLabel, "label is empty")));
            return Ok(());
        }
        let max = self.config.max_label_chars;
        if label.chars().count() > max {
            out.push(Directive::Surface(AppError::new(
                ErrorKind::LabelTooLong,
                format!("Please keep the shop name under {max} characters."),
            )));
            return Ok(());
        }

        let Some(file_id) = session.server_file_id.clone() else {
            if session.upload.in_flight.is_none() {
                if let Some(region) = session.region {
                    self.upload_crop(session, region, out);
                }
            }
            out.push(Directive::Surface(AppError::new(
                ErrorKind::NotReady,
                "cropped image not yet accepted",
            )));
            return Ok(());
        };
        let Some(generation) = session.generation else {
            return Err(TransitionError::WrongState {
                input: "save",
                state: session.state,
            });
        };

        Self::stop_label_watch(session, out);
        session.export.seq += 1;
        let seq = session.export.seq;
        session.export.in_flight = Some(seq);
        Self::transition(session, SessionState::Saving);
        out.push(Directive::Export {
            generation,
            seq,
            file_id,
            label,
        });
        Ok(())
    }

    fn export_finished(
        session: &mut Session,
        generation: Generation,
        seq: u64,
        result: Result<String, AppError>,
        out: &mut Vec<Directive>,
    ) -> Outcome {
        Self::require_current(session, generation, "export_finished")?;
        Self::require(session, SessionState::Saving, "export_finished")?;
        if session.export.in_flight != Some(seq) {
            return Err(TransitionError::StaleSequence {
                input: "export_finished",
                got: seq,
            });
        }
        session.export.in_flight = None;

        match result {
            Ok(url) => {
                let id = session.id.unwrap_or_default();
                session.completion = Some(Completion::new(id, session.label.trim(), url));
                Self::settle_timers(session, out);
                resource::release(&mut session.source);
                Self::transition(session, SessionState::Done);
            }
            Err(e) => {
                warn!(%generation, error = %e, "export failed, back to labeling");
                Self::transition(session, SessionState::Labeling);
                out.push(Directive::Surface(e));
            }
        }
        Ok(())
    }

    /// Release everything the session holds and invalidate its generation.
    fn teardown(session: &mut Session, out: &mut Vec<Directive>) {
        if let Some(selector) = session.binding.take() {
            out.push(Directive::DestroySelector {
                binding: selector.id(),
            });
        }
        Self::settle_timers(session, out);
        resource::release(&mut session.source);
        session.generation = None;
    }

    fn bind(&mut self, session: &mut Session, out: &mut Vec<Directive>) {
        if let Some(previous) = session.binding.take() {
            out.push(Directive::DestroySelector {
                binding: previous.id(),
            });
        }
        self.next_binding += 1;
        let id = BindingId(self.next_binding);
        session.binding = Some(SelectorBinding::new(id, session.constraint()));
        out.push(Directive::InitializeSelector {
            binding: id,
            initial: session.region,
        });
    }

    fn timer(&mut self) -> TimerId {
        self.next_timer += 1;
        TimerId(self.next_timer)
    }

    fn stop_label_watch(session: &mut Session, out: &mut Vec<Directive>) {
        if let Some(id) = session.label_watch.take() {
            out.push(Directive::CancelTimer { id });
        }
    }

    fn settle_timers(session: &mut Session, out: &mut Vec<Directive>) {
        if let Some(id) = session.detection_deadline.take() {
            out.push(Directive::CancelTimer { id });
        }
        Self::stop_label_watch(session, out);
    }

    fn transition(session: &mut Session, to: SessionState) {
        let from = session.state;
        session.state = to;
        info!(
            session = ?session.id.map(|id| id.to_string()),
            %from,
            %to,
            "session transition"
        );
        counter!("session.transition", "to" => to.as_str()).increment(1);
    }

    fn require(session: &Session, state: SessionState, input: &'static str) -> Outcome {
        if session.state == state {
            Ok(())
        } else {
            Err(TransitionError::WrongState {
                input,
                state: session.state,
            })
        }
    }

    fn require_current(session: &Session, got: Generation, input: &'static str) -> Outcome {
        if session.is_current(got) {
            Ok(())
        } else {
            counter!("session.stale_generation", "input" => input).increment(1);
            Err(TransitionError::StaleGeneration {
                input,
                got,
                current: session.generation,
            })
        }
    }
}
