//! Ownership of the transient local image for the live session.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use image::DynamicImage;
use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::SessionConfig;
use crate::error::{AppError, ErrorKind};
use crate::geometry::RegionConstraint;
use crate::image_processing::{self, DecodeLimits, JPEG_MIME};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "img-{}", self.0)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AcquireError {
    #[error("input bytes empty")]
    Empty,
    #[error("input too large: {size} bytes, max {max}")]
    TooLarge { size: usize, max: usize },
}

impl From<AcquireError> for AppError {
    fn from(e: AcquireError) -> Self {
        match e {
            AcquireError::Empty => AppError::new(ErrorKind::EmptyFile, e.to_string()),
            AcquireError::TooLarge { size, .. } => {
                AppError::new(ErrorKind::FileTooLarge, e.to_string())
                    .with_context("size_bytes", size.to_string())
            }
        }
    }
}

#[derive(Debug, Default)]
struct LedgerInner {
    next_id: AtomicU64,
    live: AtomicUsize,
    released: AtomicUsize,
}

/// Counts live image handles.
#[derive(Clone, Debug, Default)]
pub struct HandleLedger {
    inner: Arc<LedgerInner>,
}

impl HandleLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.inner.released.load(Ordering::SeqCst)
    }

    fn register(&self) -> HandleId {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.live.fetch_add(1, Ordering::SeqCst);
        HandleId(id)
    }

    fn unregister(&self, id: HandleId) {
        self.inner.live.fetch_sub(1, Ordering::SeqCst);
        self.inner.released.fetch_add(1, Ordering::SeqCst);
        debug!(handle = %id, live = self.live(), "image handle released");
    }
}

struct SourceImage {
    file_name: String,
    raw: Vec<u8>,
    pixels: Option<DynamicImage>,
    display: Option<Vec<u8>>,
}

/// Exclusively owned reference to the uploaded, orientation-corrected image.
pub struct ImageHandle {
    id: HandleId,
    source: SourceImage,
    ledger: HandleLedger,
}

impl ImageHandle {
    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn file_name(&self) -> &str {
        &self.source.file_name
    }

    pub fn raw(&self) -> &[u8] {
        &self.source.raw
    }

    /// Decoded, rotated pixels; `None` when decoding degraded to the raw file.
    pub fn pixels(&self) -> Option<&DynamicImage> {
        self.source.pixels.as_ref()
    }

    pub fn is_normalized(&self) -> bool {
        self.source.pixels.is_some()
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.pixels().map(|p| (p.width(), p.height()))
    }

    /// Bytes and MIME type the shell should show in the crop widget.
    pub fn display(&self) -> (&[u8], &'static str) {
        match &self.source.display {
            Some(bytes) => (bytes, JPEG_MIME),
            None => (&self.source.raw, image_processing::sniff_mime(&self.source.raw)),
        }
    }

    pub fn constraint(&self, square: bool) -> RegionConstraint {
        match self.dimensions() {
            Some((w, h)) => RegionConstraint::new(w, h, square),
            None => RegionConstraint::unknown(square),
        }
    }
}

impl Drop for ImageHandle {
    fn drop(&mut self) {
        self.ledger.unregister(self.id);
    }
}

impl fmt::Debug for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageHandle")
            .field("id", &self.id)
            .field("raw_size", &self.source.raw.len())
            .field("dimensions", &self.dimensions())
            .finish_non_exhaustive()
    }
}

/// Take ownership of an uploaded file.
///
/// Orientation normalization failures degrade to the raw file; only empty
/// or oversized input is refused.
#[instrument(skip(ledger, raw, file_name, config), fields(input_size = raw.len()))]
pub fn acquire(
    ledger: &HandleLedger,
    raw: Vec<u8>,
    file_name: impl Into<String>,
    config: &SessionConfig,
) -> Result<ImageHandle, AcquireError> {
    if raw.is_empty() {
        return Err(AcquireError::Empty);
    }
    if raw.len() > config.max_input_bytes {
        return Err(AcquireError::TooLarge {
            size: raw.len(),
            max: config.max_input_bytes,
        });
    }

    let limits = DecodeLimits {
        max_dimension: config.max_image_dimension,
        max_alloc: config.max_decode_alloc,
    };

    let (pixels, display) = match image_processing::decode_oriented(&raw, limits) {
        Ok(oriented) => {
            let display = match image_processing::encode_jpeg(&oriented.image, config.jpeg_quality) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!(error = %e, "display copy failed, showing raw file");
                    None
                }
            };
            (Some(oriented.image), display)
        }
        Err(e) => {
            warn!(error = %e, "orientation normalization failed, using raw file");
            counter!("resource.normalize.degraded").increment(1);
            (None, None)
        }
    };

    let id = ledger.register();
    debug!(handle = %id, live = ledger.live(), "image handle acquired");

    Ok(ImageHandle {
        id,
        source: SourceImage {
            file_name: file_name.into(),
            raw,
            pixels,
            display,
        },
        ledger: ledger.clone(),
    })
}

/// Release whatever `slot` holds. Safe on an empty slot.
pub fn release(slot: &mut Option<ImageHandle>) {
    if let Some(handle) = slot.take() {
        drop(handle);
    }
}

/// Put `next` into `slot`, releasing the previous handle first.
pub fn replace(slot: &mut Option<ImageHandle>, next: ImageHandle) {
    release(slot);
    *slot = Some(next);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_processing::tests::{jpeg_fixture, with_exif_orientation};

    fn config() -> SessionConfig {
        SessionConfig::default()
    }

    #[test]
    fn test_acquire_decodes_and_registers() {
        let ledger = HandleLedger::new();
        let handle = acquire(&ledger, jpeg_fixture(32, 16), "bowl.jpg", &config()).unwrap();
        assert_eq!(ledger.live(), 1);
        assert!(handle.is_normalized());
        assert_eq!(handle.dimensions(), Some((32, 16)));
        assert_eq!(handle.display().1, JPEG_MIME);
    }

    #[test]
    fn test_acquire_normalizes_rotated_photo() {
        let ledger = HandleLedger::new();
        let raw = with_exif_orientation(&jpeg_fixture(40, 20), 6);
        let handle = acquire(&ledger, raw, "bowl.jpg", &config()).unwrap();
        assert!(handle.is_normalized());
        assert_eq!(handle.dimensions(), Some((20, 40)));
        assert_eq!(handle.constraint(false), RegionConstraint::new(20, 40, false));

        let (display, _) = handle.display();
        let shown = image::load_from_memory(display).unwrap();
        assert_eq!((shown.width(), shown.height()), (20, 40));
    }

    #[test]
    fn test_acquire_undecodable_falls_back_to_raw() {
        let ledger = HandleLedger::new();
        let handle = acquire(&ledger, b"not-an-image".to_vec(), "x.jpg", &config()).unwrap();
        assert!(!handle.is_normalized());
        assert_eq!(handle.display().0, b"not-an-image");
        assert_eq!(handle.constraint(true), RegionConstraint::unknown(true));
    }

    #[test]
    fn test_acquire_refuses_empty_and_oversized() {
        let ledger = HandleLedger::new();
        assert_eq!(
            acquire(&ledger, Vec::new(), "x.jpg", &config()).unwrap_err(),
            AcquireError::Empty
        );
        let small = SessionConfig {
            max_input_bytes: 4,
            ..config()
        };
        assert!(matches!(
            acquire(&ledger, vec![0; 5], "x.jpg", &small),
            Err(AcquireError::TooLarge { size: 5, max: 4 })
        ));
        assert_eq!(ledger.live(), 0);
    }

    #[test]
    fn test_release_is_idempotent() {
        let ledger = HandleLedger::new();
        let mut slot = Some(acquire(&ledger, b"raw".to_vec(), "a", &config()).unwrap());
        release(&mut slot);
        release(&mut slot);
        assert!(slot.is_none());
        assert_eq!(ledger.live(), 0);
        assert_eq!(ledger.released(), 1);
    }

    #[test]
    fn test_replace_keeps_exactly_one_live() {
        let ledger = HandleLedger::new();
        let mut slot = None;
        for i in 0..5 {
            let next = acquire(&ledger, format!("raw-{i}").into_bytes(), "a", &config()).unwrap();
            replace(&mut slot, next);
            assert_eq!(ledger.live(), 1);
        }
        assert_eq!(ledger.released(), 4);
        release(&mut slot);
        assert_eq!(ledger.live(), 0);
    }
}
