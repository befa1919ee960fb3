use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_TRANSPORT_LONG_EDGE: u32 = 1200;
pub const DEFAULT_JPEG_QUALITY: u8 = 90;
pub const DEFAULT_LABEL_WATCH_MS: u64 = 10_000;
pub const DEFAULT_DETECTION_DEADLINE_MS: u64 = 30_000;
pub const MAX_INPUT_BYTES: usize = 20 * 1024 * 1024;
pub const MAX_IMAGE_DIMENSION: u32 = 12_000;
pub const MAX_DECODE_ALLOC: u64 = 512 * 1024 * 1024;
pub const MAX_LABEL_CHARS: usize = 64;
pub const DEFAULT_API_BASE: &str = "https://snapbowl.invalid/";

/// Markers the analysis service uses when it could not determine a label.
pub const DEFAULT_UNDETERMINED_MARKERS: &[&str] = &["判定不能", "特定できません"];

/// Tunables for one editing session.
///
/// Sent by the shell with `Event::Configure`; anything missing keeps its default.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub transport_long_edge: u32,
    pub jpeg_quality: u8,
    pub label_watch_ms: u64,
    pub detection_deadline_ms: u64,
    pub max_input_bytes: usize,
    pub max_image_dimension: u32,
    pub max_decode_alloc: u64,
    pub max_label_chars: usize,
    pub square_crop: bool,
    pub undetermined_markers: Vec<String>,
    pub api_base: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            transport_long_edge: DEFAULT_TRANSPORT_LONG_EDGE,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            label_watch_ms: DEFAULT_LABEL_WATCH_MS,
            detection_deadline_ms: DEFAULT_DETECTION_DEADLINE_MS,
            max_input_bytes: MAX_INPUT_BYTES,
            max_image_dimension: MAX_IMAGE_DIMENSION,
            max_decode_alloc: MAX_DECODE_ALLOC,
            max_label_chars: MAX_LABEL_CHARS,
            square_crop: true,
            undetermined_markers: DEFAULT_UNDETERMINED_MARKERS
                .iter()
                .map(|m| (*m).to_string())
                .collect(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

impl SessionConfig {
    pub fn with_transport(mut self, long_edge: u32, quality: u8) -> Self {
        self.transport_long_edge = long_edge;
        self.jpeg_quality = quality;
        self
    }

    pub fn with_label_watch_ms(mut self, ms: u64) -> Self {
        self.label_watch_ms = ms;
        self
    }

    pub fn with_detection_deadline_ms(mut self, ms: u64) -> Self {
        self.detection_deadline_ms = ms;
        self
    }

    pub fn with_square_crop(mut self, square: bool) -> Self {
        self.square_crop = square;
        self
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    pub fn validated(mut self) -> Self {
        self.transport_long_edge = self.transport_long_edge.clamp(64, 8192);
        self.jpeg_quality = self.jpeg_quality.clamp(1, 100);
        self.label_watch_ms = self.label_watch_ms.clamp(100, 60_000);
        self.detection_deadline_ms = self.detection_deadline_ms.clamp(1_000, 300_000);
        self.max_input_bytes = self.max_input_bytes.clamp(1, MAX_INPUT_BYTES * 4);
        self.max_image_dimension = self.max_image_dimension.max(1);
        self.max_label_chars = self.max_label_chars.max(1);
        self.undetermined_markers.retain(|m| !m.trim().is_empty());
        if Url::parse(&self.api_base).is_err() {
            tracing::warn!(api_base = %self.api_base, "invalid api base, using default");
            self.api_base = DEFAULT_API_BASE.to_string();
        }
        self
    }

    /// True when `label` is absent in substance: blank or an undetermined marker.
    pub fn is_undetermined(&self, label: &str) -> bool {
        let trimmed = label.trim();
        trimmed.is_empty()
            || self
                .undetermined_markers
                .iter()
                .any(|marker| trimmed.contains(marker.as_str()))
    }

    /// Resolve a possibly relative URL returned by the server.
    pub fn resolve_url(&self, raw: &str) -> Option<Url> {
        if let Ok(absolute) = Url::parse(raw) {
            return Some(absolute);
        }
        Url::parse(&self.api_base).ok()?.join(raw).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.transport_long_edge, 1200);
        assert_eq!(config.jpeg_quality, 90);
        assert_eq!(config.label_watch_ms, 10_000);
        assert!(config.square_crop);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"label_watch_ms": 5000}"#).unwrap();
        assert_eq!(config.label_watch_ms, 5000);
        assert_eq!(config.jpeg_quality, DEFAULT_JPEG_QUALITY);
    }

    #[test]
    fn test_validated_clamps() {
        let config = SessionConfig::default()
            .with_transport(0, 0)
            .with_label_watch_ms(0)
            .with_api_base("not a url")
            .validated();
        assert_eq!(config.transport_long_edge, 64);
        assert_eq!(config.jpeg_quality, 1);
        assert_eq!(config.label_watch_ms, 100);
        assert_eq!(config.api_base, DEFAULT_API_BASE);
    }

    #[test]
    fn test_undetermined_markers() {
        let config = SessionConfig::default();
        assert!(config.is_undetermined("店舗名：判定不能"));
        assert!(config.is_undetermined("   "));
        assert!(!config.is_undetermined("Shop A"));
    }

    #[test]
    fn test_resolve_relative_result_url() {
        let config = SessionConfig::default().with_api_base("https://api.example.com/");
        let url = config.resolve_url("/results/labeled_1.jpg").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/results/labeled_1.jpg");
        let abs = config.resolve_url("https://cdn.example.com/a.jpg").unwrap();
        assert_eq!(abs.host_str(), Some("cdn.example.com"));
    }
}
