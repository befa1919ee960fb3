use serde::{Deserialize, Serialize};

/// Smallest width/height a region may be clamped down to.
pub const MIN_EXTENT: f64 = 0.01;

/// Share of the shorter image side covered by the default placement.
pub const DEFAULT_COVERAGE: f64 = 0.8;

/// Echo tolerance per axis when the bound image size is unknown.
pub const UNKNOWN_SIZE_TOLERANCE: f64 = 1.0 / 256.0;

/// Crop geometry in image-relative normalized coordinates.
///
/// `0 <= x, y` and `x + width <= 1`, `y + height <= 1` once clamped.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// How regions are bounded for one bound image.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegionConstraint {
    // width / height
    pub image_aspect: f64,
    pub square: bool,
    /// Source size in pixels, when it could be decoded.
    #[serde(default)]
    pub pixels: Option<(u32, u32)>,
}

impl RegionConstraint {
    pub fn new(width: u32, height: u32, square: bool) -> Self {
        let image_aspect = if width == 0 || height == 0 {
            1.0
        } else {
            f64::from(width) / f64::from(height)
        };
        Self {
            image_aspect,
            square,
            pixels: (width > 0 && height > 0).then_some((width, height)),
        }
    }

    /// Used when the source could not be decoded and its size is unknown.
    pub fn unknown(square: bool) -> Self {
        Self {
            image_aspect: 1.0,
            square,
            pixels: None,
        }
    }

    /// One source pixel along each axis, in normalized units.
    pub fn pixel_tolerance(self) -> (f64, f64) {
        match self.pixels {
            Some((w, h)) => (1.0 / f64::from(w), 1.0 / f64::from(h)),
            None => (UNKNOWN_SIZE_TOLERANCE, UNKNOWN_SIZE_TOLERANCE),
        }
    }

    fn aspect(self) -> f64 {
        if self.image_aspect.is_finite() && self.image_aspect > 0.0 {
            self.image_aspect
        } else {
            1.0
        }
    }
}

impl Region {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn full() -> Self {
        Self::new(0.0, 0.0, 1.0, 1.0)
    }

    /// Centered placement covering [`DEFAULT_COVERAGE`] of the shorter side.
    pub fn default_for(constraint: RegionConstraint) -> Self {
        let a = constraint.aspect();
        let (width, height) = if constraint.square {
            let side = DEFAULT_COVERAGE * a.min(1.0);
            (side / a, side)
        } else {
            (DEFAULT_COVERAGE, DEFAULT_COVERAGE)
        };
        Self::new((1.0 - width) / 2.0, (1.0 - height) / 2.0, width, height)
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn matches(&self, other: &Region, constraint: RegionConstraint) -> bool {
        let (tx, ty) = constraint.pixel_tolerance();
        (self.x - other.x).abs() <= tx
            && (self.y - other.y).abs() <= ty
            && (self.width - other.width).abs() <= tx
            && (self.height - other.height).abs() <= ty
    }

    /// Pull the region inside the image, never failing.
    ///
    /// Non-finite input falls back to the default placement. With a square
    /// constraint the result is the closest square (geometric mean of the
    /// requested sides) that fits, kept on the requested centre where possible.
    pub fn clamp(&self, constraint: RegionConstraint) -> Region {
        if !self.is_finite() {
            return Self::default_for(constraint);
        }

        let (cx, cy) = self.center();
        let mut width = self.width.abs().clamp(MIN_EXTENT, 1.0);
        let mut height = self.height.abs().clamp(MIN_EXTENT, 1.0);

        if constraint.square {
            let a = constraint.aspect();
            // Sides measured in units of the image height.
            let max_side = a.min(1.0);
            let side = (width * a * height)
                .sqrt()
                .max(MIN_EXTENT * a.max(1.0))
                .min(max_side);
            width = side / a;
            height = side;
        }

        let x = (cx - width / 2.0).clamp(0.0, 1.0 - width);
        let y = (cy - height / 2.0).clamp(0.0, 1.0 - height);

        Region::new(x, y, width, height)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn to_pixels(&self, image_width: u32, image_height: u32) -> Option<(u32, u32, u32, u32)> {
        if self.is_empty() || !self.is_finite() || image_width == 0 || image_height == 0 {
            return None;
        }
        let fw = f64::from(image_width);
        let fh = f64::from(image_height);

        let px = (self.x.max(0.0) * fw).floor().min(fw - 1.0);
        let py = (self.y.max(0.0) * fh).floor().min(fh - 1.0);
        let pw = (self.width * fw).round().clamp(1.0, fw - px);
        let ph = (self.height * fh).round().clamp(1.0, fh - py);

        Some((px as u32, py as u32, pw as u32, ph as u32))
    }
}

/// Region guess as the analysis endpoint sends it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireRegion {
    /// Centre normalized to width/height, radius normalized to the shorter side.
    Circle { cx: f64, cy: f64, r: f64 },
    Rect { x: f64, y: f64, w: f64, h: f64 },
}

impl WireRegion {
    pub fn to_region(self, constraint: RegionConstraint) -> Region {
        match self {
            WireRegion::Rect { x, y, w, h } => Region::new(x, y, w, h),
            WireRegion::Circle { cx, cy, r } => {
                let a = constraint.aspect();
                let diameter = 2.0 * r * a.min(1.0);
                let width = diameter / a;
                let height = diameter;
                Region::new(cx - width / 2.0, cy - height / 2.0, width, height)
            }
        }
    }
}
