use crux_core::capability::{CapabilityContext, Operation};
use crux_core::macros::Capability;
use serde::{Deserialize, Serialize};

use crate::geometry::Region;
use crate::selector::BindingId;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectorOptions {
    /// Constrain the selection to a 1:1 square in pixel space.
    pub square: bool,
    pub min_extent: f64,
    /// Draw the selection as a circle over the square.
    pub circular_overlay: bool,
}

/// Commands for the crop widget hosted by the shell.
///
/// `Initialize` tears down whatever the widget was bound to before binding
/// `binding`; the shell answers with `Event::SelectorReady` and
/// `Event::RegionChanged`, both carrying the same binding id.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub enum SelectorOperation {
    Initialize {
        binding: BindingId,
        #[serde(with = "serde_bytes")]
        image: Vec<u8>,
        mime_type: String,
        initial: Option<Region>,
        options: SelectorOptions,
    },
    SetRegion {
        binding: BindingId,
        region: Region,
    },
    Destroy {
        binding: BindingId,
    },
}

impl std::fmt::Debug for SelectorOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initialize {
                binding,
                image,
                mime_type,
                initial,
                options,
            } => f
                .debug_struct("Initialize")
                .field("binding", binding)
                .field("image_size", &image.len())
                .field("mime_type", mime_type)
                .field("initial", initial)
                .field("options", options)
                .finish(),
            Self::SetRegion { binding, region } => f
                .debug_struct("SetRegion")
                .field("binding", binding)
                .field("region", region)
                .finish(),
            Self::Destroy { binding } => {
                f.debug_struct("Destroy").field("binding", binding).finish()
            }
        }
    }
}

impl Operation for SelectorOperation {
    type Output = ();
}

#[derive(Capability)]
pub struct Selector<Ev> {
    context: CapabilityContext<SelectorOperation, Ev>,
}

impl<Ev> Selector<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<SelectorOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn initialize(
        &self,
        binding: BindingId,
        image: Vec<u8>,
        mime_type: impl Into<String>,
        initial: Option<Region>,
        options: SelectorOptions,
    ) {
        self.notify(SelectorOperation::Initialize {
            binding,
            image,
            mime_type: mime_type.into(),
            initial,
            options,
        });
    }

    pub fn set_region(&self, binding: BindingId, region: Region) {
        self.notify(SelectorOperation::SetRegion { binding, region });
    }

    pub fn destroy(&self, binding: BindingId) {
        self.notify(SelectorOperation::Destroy { binding });
    }

    fn notify(&self, operation: SelectorOperation) {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            ctx.notify_shell(operation).await;
        });
    }
}
