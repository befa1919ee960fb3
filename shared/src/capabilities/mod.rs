pub mod api;
pub mod selector;
pub mod timer;

pub use self::api::{Api, ApiEndpoint, ApiError, ApiOperation, ApiResponse, ApiResult, FilePart};
pub use self::selector::{Selector, SelectorOperation, SelectorOptions};
pub use self::timer::{Timer, TimerId, TimerOperation, TimerOutput};

// Crux's built-in Render covers view refreshes.
pub use crux_core::render::Render;
pub use crux_http::Http;

use crate::app::App;
use crate::event::Event;

#[derive(crux_core::macros::Effect)]
pub struct Capabilities {
    pub api: Api<Event>,
    pub http: Http<Event>,
    pub selector: Selector<Event>,
    pub timer: Timer<Event>,
    pub render: Render<Event>,
}
