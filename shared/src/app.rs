use metrics::counter;
use tracing::{debug, warn};

use crate::capabilities::{
    ApiEndpoint, ApiOperation, Capabilities, SelectorOptions, TimerOutput,
};
use crate::detection::{self, DetectionOutcome};
use crate::error::AppError;
use crate::event::Event;
use crate::geometry::MIN_EXTENT;
use crate::model::{Model, ViewModel};
use crate::reconcile::{Directive, Input, Step};
use crate::resource;
use crate::session::SessionState;
use crate::transfer::{self, ExportResponse};

#[derive(Default)]
pub struct App;

impl App {
    /// Run one engine step and carry out what it asks for.
    fn drive(model: &mut Model, caps: &Capabilities, input: Input) {
        let session = std::mem::take(&mut model.session);
        let Step {
            session,
            directives,
            discarded: _,
        } = model.engine.step(session, input);
        model.session = session;

        for directive in directives {
            Self::execute(model, caps, directive);
        }
    }

    fn execute(model: &mut Model, caps: &Capabilities, directive: Directive) {
        match directive {
            Directive::InitializeSelector { binding, initial } => {
                let Some(source) = model.session.source.as_ref() else {
                    warn!(%binding, "no source image to bind");
                    return;
                };
                let (bytes, mime_type) = source.display();
                let options = SelectorOptions {
                    square: model.engine.config().square_crop,
                    min_extent: MIN_EXTENT,
                    circular_overlay: true,
                };
                caps.selector
                    .initialize(binding, bytes.to_vec(), mime_type, initial, options);
            }

            Directive::SetRegion { binding, region } => caps.selector.set_region(binding, region),

            Directive::DestroySelector { binding } => caps.selector.destroy(binding),

            Directive::Analyze { generation } => {
                let Some(source) = model.session.source.as_ref() else {
                    return;
                };
                let config = model.engine.config();
                let request = detection::prepare(source, generation, config);
                match transfer::endpoint_url(config, ApiEndpoint::Analyze.path()) {
                    Ok(url) => {
                        let op = ApiOperation::file(
                            ApiEndpoint::Analyze,
                            url,
                            request.file_name,
                            request.image.mime_type,
                            request.image.bytes,
                        );
                        caps.api.send(op, move |result| Event::AnalysisResponded {
                            generation,
                            result: Box::new(result),
                        });
                    }
                    Err(e) => Self::drive(
                        model,
                        caps,
                        Input::DetectionResolved {
                            generation,
                            outcome: DetectionOutcome::Failed(e),
                        },
                    ),
                }
            }

            Directive::ConfirmCrop {
                generation,
                seq,
                region,
            } => {
                let Some(source) = model.session.source.as_ref() else {
                    return;
                };
                match transfer::crop_upload(source, &region, model.engine.config()) {
                    Ok(op) => caps.api.send(op, move |result| Event::CropUploadResponded {
                        generation,
                        seq,
                        result: Box::new(result),
                    }),
                    Err(e) => Self::drive(
                        model,
                        caps,
                        Input::CropUploaded {
                            generation,
                            seq,
                            result: Err(e),
                        },
                    ),
                }
            }

            Directive::Export {
                generation,
                seq,
                file_id,
                label,
            } => match transfer::export_request(&file_id, &label, model.engine.config()) {
                Ok((url, body)) => caps
                    .http
                    .post(url)
                    .header("Content-Type", "application/json")
                    .body(body)
                    .expect_json::<ExportResponse>()
                    .send(move |result| Event::ExportResponded {
                        generation,
                        seq,
                        result: Box::new(result),
                    }),
                Err(e) => Self::drive(
                    model,
                    caps,
                    Input::ExportFinished {
                        generation,
                        seq,
                        result: Err(e),
                    },
                ),
            },

            Directive::StartTimer { id, after_ms } => {
                caps.timer.start(id, after_ms, Event::TimerFinished);
            }

            Directive::CancelTimer { id } => caps.timer.cancel(id),

            Directive::Notify(notice) => model.toast = Some(notice.into()),

            Directive::Surface(error) => {
                debug!(code = error.code(), category = ?error.category(), "surfacing error");
                model.set_error(error);
            }
        }
    }
}

impl crux_core::App for App {
    type Event = Event;
    type Model = Model;
    type ViewModel = ViewModel;
    type Capabilities = Capabilities;

    fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
        let event_name = event.name();
        counter!("event", "name" => event_name).increment(1);

        if event.is_user_initiated() {
            model.clear_error();
        }

        match event {
            Event::Configure(config) => {
                if model.session.state == SessionState::Idle {
                    model.engine.set_config(*config);
                } else {
                    debug!(state = %model.session.state, "configuration ignored mid-session");
                }
            }

            Event::ImageSelected { file_name, bytes } => {
                match resource::acquire(&model.ledger, bytes, file_name, model.engine.config()) {
                    Ok(handle) => {
                        model.toast = None;
                        Self::drive(model, caps, Input::Upload(handle));
                    }
                    Err(e) => {
                        warn!(error = %e, "upload refused");
                        model.set_error(AppError::from(e));
                    }
                }
            }

            Event::SelectorReady { binding, region } => {
                Self::drive(model, caps, Input::SelectorReady { binding, region });
            }

            Event::RegionChanged { binding, region } => {
                Self::drive(model, caps, Input::RegionChanged { binding, region });
            }

            Event::ConfirmRegion => Self::drive(model, caps, Input::ConfirmRegion),

            Event::Back => Self::drive(model, caps, Input::Back),

            Event::LabelChanged { text } => Self::drive(model, caps, Input::LabelEdited(text)),

            Event::CandidatePicked { index } => {
                Self::drive(model, caps, Input::CandidatePicked(index));
            }

            Event::Save => Self::drive(model, caps, Input::Save),

            Event::Reset => {
                model.toast = None;
                Self::drive(model, caps, Input::Reset);
            }

            Event::DismissToast => model.toast = None,

            Event::DismissError => model.clear_error(),

            Event::AnalysisResponded { generation, result } => {
                let outcome = detection::interpret(
                    *result,
                    model.session.constraint(),
                    model.engine.config(),
                );
                Self::drive(model, caps, Input::DetectionResolved { generation, outcome });
            }

            Event::CropUploadResponded {
                generation,
                seq,
                result,
            } => {
                let result = transfer::interpret_crop(*result);
                Self::drive(
                    model,
                    caps,
                    Input::CropUploaded {
                        generation,
                        seq,
                        result,
                    },
                );
            }

            Event::ExportResponded {
                generation,
                seq,
                result,
            } => {
                let result = transfer::interpret_export(*result, model.engine.config());
                Self::drive(
                    model,
                    caps,
                    Input::ExportFinished {
                        generation,
                        seq,
                        result,
                    },
                );
            }

            Event::TimerFinished(output) => match output {
                TimerOutput::Fired { id } => Self::drive(model, caps, Input::TimerFired(id)),
                TimerOutput::Cancelled { id } => debug!(%id, "timer cancelled by shell"),
            },
        }

        caps.render.render();
    }

    fn view(&self, model: &Model) -> ViewModel {
        ViewModel::from_model(model)
    }
}
