use std::fmt;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::capabilities::api::{ApiResult, ErrorBody};
use crate::config::SessionConfig;
use crate::error::{AppError, ErrorKind};
use crate::geometry::{Region, RegionConstraint, WireRegion};
use crate::image_processing::{self, TransportImage};
use crate::resource::ImageHandle;

pub const MAX_CANDIDATES: usize = 3;

/// Tag distinguishing the current upload from superseded ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Generation(pub u64);

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

/// Strictly increasing; never reset for the lifetime of the core.
#[derive(Debug, Default)]
pub struct GenerationCounter {
    last: u64,
}

impl GenerationCounter {
    pub fn next(&mut self) -> Generation {
        self.last += 1;
        Generation(self.last)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMethod {
    Precise,
    Approximate,
    #[default]
    #[serde(other)]
    None,
}

impl DetectionMethod {
    /// Whether an applied guess of this kind opens the crop gate on its own.
    pub fn unlocks_gate(self) -> bool {
        matches!(self, Self::Precise | Self::Approximate)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    #[serde(default)]
    pub distance: Option<f64>,
}

/// Analysis endpoint payload, before any validation.
#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    region_guess: Option<serde_json::Value>,
    #[serde(default)]
    detection_method: DetectionMethod,
    #[serde(default, alias = "shop_name")]
    label_guess: Option<String>,
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    debug: Option<AnalysisDebug>,
}

/// Older analysis servers only report candidates here.
#[derive(Debug, Default, Deserialize)]
struct AnalysisDebug {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DetectionResult {
    /// Already clamped to the bound image.
    pub region_guess: Option<Region>,
    pub method: DetectionMethod,
    /// `None` for absent, blank or undetermined guesses.
    pub label_guess: Option<String>,
    pub candidates: Vec<Candidate>,
    pub analysis_file: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DetectionOutcome {
    Succeeded(DetectionResult),
    Failed(AppError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionStatus {
    Pending,
    Succeeded,
    Failed,
}

/// Everything the shell needs to send one analysis request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetectionRequest {
    pub generation: Generation,
    pub file_name: String,
    pub image: TransportImage,
}

/// Shrink the bound image for transport and tag it with `generation`.
#[instrument(skip(handle, config), fields(handle = %handle.id()))]
pub fn prepare(handle: &ImageHandle, generation: Generation, config: &SessionConfig) -> DetectionRequest {
    let image = image_processing::prepare_transport(
        handle.raw(),
        handle.pixels(),
        config.transport_long_edge,
        config.jpeg_quality,
    );
    debug!(%generation, bytes = image.bytes.len(), resized = image.resized, "detection request prepared");
    DetectionRequest {
        generation,
        file_name: handle.file_name().to_string(),
        image,
    }
}

/// Turn the shell's response into an outcome. Never fails: every problem
/// becomes `DetectionOutcome::Failed`.
pub fn interpret(
    result: ApiResult,
    constraint: RegionConstraint,
    config: &SessionConfig,
) -> DetectionOutcome {
    let response = match result {
        Ok(response) => response,
        Err(e) => {
            counter!("detection.failed", "reason" => "transport").increment(1);
            return DetectionOutcome::Failed(e.into());
        }
    };

    if !response.is_success() {
        counter!("detection.failed", "reason" => "status").increment(1);
        let message = response
            .json::<ErrorBody>()
            .map(|b| b.error)
            .unwrap_or_else(|_| format!("analysis failed with status {}", response.status));
        return DetectionOutcome::Failed(
            AppError::new(ErrorKind::Server, message)
                .with_context("status", response.status.to_string()),
        );
    }

    let parsed: AnalysisResponse = match response.json() {
        Ok(parsed) => parsed,
        Err(e) => {
            counter!("detection.failed", "reason" => "decode").increment(1);
            return DetectionOutcome::Failed(e.into());
        }
    };

    let region_guess = parsed
        .region_guess
        .and_then(|raw| match serde_json::from_value::<WireRegion>(raw) {
            Ok(wire) => Some(wire),
            Err(e) => {
                warn!(error = %e, "unrecognized region guess, ignoring");
                None
            }
        })
        .map(|wire| wire.to_region(constraint))
        .filter(|r| r.is_finite() && !r.is_empty())
        .map(|r| r.clamp(constraint));

    let label_guess = parsed
        .label_guess
        .map(|l| l.trim().to_string())
        .filter(|l| !config.is_undetermined(l));

    let listed = if parsed.candidates.is_empty() {
        parsed.debug.map(|d| d.candidates).unwrap_or_default()
    } else {
        parsed.candidates
    };
    let mut candidates: Vec<Candidate> = listed
        .into_iter()
        .filter(|c| !config.is_undetermined(&c.name))
        .collect();
    candidates.truncate(MAX_CANDIDATES);

    DetectionOutcome::Succeeded(DetectionResult {
        region_guess,
        method: parsed.detection_method,
        label_guess,
        candidates,
        analysis_file: parsed.filename,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::api::{ApiError, ApiResponse};
    use assert_matches::assert_matches;

    fn ok(body: &str) -> ApiResult {
        Ok(ApiResponse::new(200, body.as_bytes().to_vec()))
    }

    fn run(result: ApiResult) -> DetectionOutcome {
        interpret(
            result,
            RegionConstraint::new(400, 300, true),
            &SessionConfig::default(),
        )
    }

    #[test]
    fn test_generations_increase() {
        let mut counter = GenerationCounter::default();
        let a = counter.next();
        let b = counter.next();
        assert!(b > a);
        assert_eq!(a, Generation(1));
    }

    #[test]
    fn test_precise_circle_guess() {
        let outcome = run(ok(
            r#"{"filename":"f.jpg","region_guess":{"cx":0.5,"cy":0.5,"r":0.3},"detection_method":"precise","label_guess":"Shop A"}"#,
        ));
        assert_matches!(outcome, DetectionOutcome::Succeeded(result) => {
            assert_eq!(result.method, DetectionMethod::Precise);
            assert!(result.region_guess.is_some());
            assert_eq!(result.label_guess.as_deref(), Some("Shop A"));
            assert_eq!(result.analysis_file.as_deref(), Some("f.jpg"));
        });
    }

    #[test]
    fn test_sentinel_label_is_no_guess() {
        let outcome = run(ok(r#"{"detection_method":"none","label_guess":"判定不能"}"#));
        assert_matches!(outcome, DetectionOutcome::Succeeded(result) => {
            assert_eq!(result.label_guess, None);
            assert_eq!(result.region_guess, None);
        });
    }

    #[test]
    fn test_legacy_shop_name_field() {
        let outcome = run(ok(r#"{"detection_method":"approximate","shop_name":"Shop B"}"#));
        assert_matches!(outcome, DetectionOutcome::Succeeded(result) => {
            assert_eq!(result.label_guess.as_deref(), Some("Shop B"));
            assert!(result.method.unlocks_gate());
        });
    }

    #[test]
    fn test_unknown_method_decodes_as_none() {
        let outcome = run(ok(r#"{"detection_method":"contour-v2"}"#));
        assert_matches!(outcome, DetectionOutcome::Succeeded(result) => {
            assert_eq!(result.method, DetectionMethod::None);
        });
    }

    #[test]
    fn test_malformed_region_is_ignored() {
        let outcome = run(ok(r#"{"detection_method":"precise","region_guess":{"radius":3}}"#));
        assert_matches!(outcome, DetectionOutcome::Succeeded(result) => {
            assert_eq!(result.region_guess, None);
        });
    }

    #[test]
    fn test_candidates_are_capped() {
        let outcome = run(ok(
            r#"{"candidates":[{"name":"A","distance":10.0},{"name":"B"},{"name":"特定できません"},{"name":"C"},{"name":"D"}]}"#,
        ));
        assert_matches!(outcome, DetectionOutcome::Succeeded(result) => {
            let names: Vec<_> = result.candidates.iter().map(|c| c.name.as_str()).collect();
            assert_eq!(names, vec!["A", "B", "C"]);
        });
    }

    #[test]
    fn test_candidates_fall_back_to_debug_block() {
        let outcome = run(ok(
            r#"{"shop_name":"Shop B","debug":{"gps_detected":false,"candidates":[{"name":"Shop B","distance":120.5},{"name":"Shop C","distance":0}]}}"#,
        ));
        assert_matches!(outcome, DetectionOutcome::Succeeded(result) => {
            let names: Vec<_> = result.candidates.iter().map(|c| c.name.as_str()).collect();
            assert_eq!(names, vec!["Shop B", "Shop C"]);
            assert_eq!(result.candidates[0].distance, Some(120.5));
        });

        let outcome = run(ok(
            r#"{"candidates":[{"name":"A"}],"debug":{"candidates":[{"name":"Z"}]}}"#,
        ));
        assert_matches!(outcome, DetectionOutcome::Succeeded(result) => {
            assert_eq!(result.candidates.len(), 1);
            assert_eq!(result.candidates[0].name, "A");
        });
    }

    #[test]
    fn test_network_failure_is_data() {
        let outcome = run(Err(ApiError::Network {
            message: "offline".into(),
        }));
        assert_matches!(outcome, DetectionOutcome::Failed(e) => {
            assert_eq!(e.kind, ErrorKind::Network);
        });
    }

    #[test]
    fn test_server_error_body() {
        let outcome = run(Ok(ApiResponse::new(400, br#"{"error":"Invalid file type"}"#.to_vec())));
        assert_matches!(outcome, DetectionOutcome::Failed(e) => {
            assert_eq!(e.kind, ErrorKind::Server);
            assert_eq!(e.message, "Invalid file type");
        });
    }

    #[test]
    fn test_garbage_body_fails() {
        assert_matches!(run(ok("<html>")), DetectionOutcome::Failed(_));
    }
}
