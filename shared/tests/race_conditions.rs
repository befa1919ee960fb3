use assert_matches::assert_matches;
use proptest::prelude::*;

use snapbowl_shared::detection::DetectionResult;
use snapbowl_shared::resource::acquire;
use snapbowl_shared::{
    BindingId, DetectionMethod, DetectionOutcome, Directive, Generation, HandleLedger, Input,
    Reconciler, Region, Session, SessionConfig, SessionState, TransitionError,
};

struct Driver {
    engine: Reconciler,
    ledger: HandleLedger,
    session: Session,
    last: Vec<Directive>,
    discarded: Option<TransitionError>,
}

impl Driver {
    fn new() -> Self {
        Self {
            engine: Reconciler::new(SessionConfig::default()),
            ledger: HandleLedger::new(),
            session: Session::default(),
            last: Vec::new(),
            discarded: None,
        }
    }

    fn step(&mut self, input: Input) {
        let session = std::mem::take(&mut self.session);
        let step = self.engine.step(session, input);
        self.session = step.session;
        self.last = step.directives;
        self.discarded = step.discarded;
    }

    /// Upload a file and return its generation and selector binding.
    fn upload(&mut self, name: &str) -> (Generation, BindingId) {
        let handle = acquire(
            &self.ledger,
            name.as_bytes().to_vec(),
            format!("{name}.jpg"),
            self.engine.config(),
        )
        .unwrap();
        self.step(Input::Upload(handle));
        let binding = self
            .last
            .iter()
            .find_map(|d| match d {
                Directive::InitializeSelector { binding, .. } => Some(*binding),
                _ => None,
            })
            .unwrap();
        (self.session.generation.unwrap(), binding)
    }

    fn ready(&mut self, binding: BindingId) {
        let region = Region::new(0.1, 0.1, 0.8, 0.8);
        self.step(Input::SelectorReady { binding, region });
        self.step(Input::RegionChanged { binding, region });
    }

    fn drag(&mut self, binding: BindingId, region: Region) {
        self.step(Input::RegionChanged { binding, region });
    }

    fn resolve(&mut self, generation: Generation, result: DetectionResult) {
        self.step(Input::DetectionResolved {
            generation,
            outcome: DetectionOutcome::Succeeded(result),
        });
    }
}

fn detected(region: Option<Region>, method: DetectionMethod, label: Option<&str>) -> DetectionResult {
    DetectionResult {
        region_guess: region,
        method,
        label_guess: label.map(String::from),
        candidates: Vec::new(),
        analysis_file: None,
    }
}

fn guess_for(i: usize) -> Region {
    Region::new(0.05 * i as f64, 0.1, 0.3, 0.3)
}

proptest! {
    #[test]
    fn only_latest_upload_mutates_session(
        order in (3usize..7).prop_flat_map(|n| Just((0..n).collect::<Vec<_>>()).prop_shuffle())
    ) {
        let n = order.len();
        let mut driver = Driver::new();
        let mut uploads = Vec::new();
        for i in 0..n {
            uploads.push(driver.upload(&format!("bowl-{i}")));
            prop_assert_eq!(driver.ledger.live(), 1);
        }
        let (_, latest_binding) = uploads[n - 1];
        driver.ready(latest_binding);

        for &i in &order {
            let (generation, _) = uploads[i];
            let label = format!("Shop {i}");
            driver.resolve(
                generation,
                detected(Some(guess_for(i)), DetectionMethod::Precise, Some(&label)),
            );
            if i == n - 1 {
                prop_assert!(driver.discarded.is_none());
            } else {
                prop_assert!(
                    matches!(driver.discarded, Some(TransitionError::StaleGeneration { .. })),
                    "expected stale discard, got {:?}",
                    driver.discarded
                );
                prop_assert!(driver.last.is_empty());
            }
        }

        prop_assert_eq!(&driver.session.label, &format!("Shop {}", n - 1));
        prop_assert_eq!(driver.session.region, Some(guess_for(n - 1)));
        prop_assert!(driver.session.gate_open());
    }

    #[test]
    fn confirm_requires_open_gate(
        ops in proptest::collection::vec(0u8..5, 1..24)
    ) {
        let mut driver = Driver::new();
        let (generation, binding) = driver.upload("bowl");
        let mut resolved = false;

        for op in ops {
            let before = driver.session.state;
            let gate = driver.session.gate_open();
            match op {
                0 => driver.ready(binding),
                1 => driver.drag(binding, Region::new(0.2, 0.25, 0.4, 0.4)),
                2 if !resolved => {
                    resolved = true;
                    driver.resolve(generation, detected(None, DetectionMethod::None, None));
                }
                3 => driver.step(Input::ConfirmRegion),
                _ => driver.step(Input::Back),
            }
            if before == SessionState::Cropping && driver.session.state == SessionState::Labeling {
                prop_assert!(gate, "left cropping with a closed gate");
                prop_assert!(driver.session.has_region());
            }
        }
    }

    #[test]
    fn at_most_one_live_handle(
        ops in proptest::collection::vec(0u8..4, 1..20)
    ) {
        let mut driver = Driver::new();
        let mut binding = None;
        for (i, op) in ops.into_iter().enumerate() {
            match op {
                0 | 1 => binding = Some(driver.upload(&format!("bowl-{i}")).1),
                2 => {
                    if let Some(b) = binding {
                        driver.ready(b);
                        driver.drag(b, Region::new(0.3, 0.3, 0.3, 0.3));
                        driver.step(Input::ConfirmRegion);
                    }
                }
                _ => {
                    driver.step(Input::Reset);
                    binding = None;
                    prop_assert_eq!(driver.ledger.live(), 0);
                }
            }
            prop_assert!(driver.ledger.live() <= 1);
        }
        driver.step(Input::Reset);
        prop_assert_eq!(driver.ledger.live(), 0);
    }

    #[test]
    fn back_navigation_is_idempotent(trips in 1usize..6) {
        let mut driver = Driver::new();
        let (generation, binding) = driver.upload("bowl");
        driver.ready(binding);
        driver.resolve(
            generation,
            detected(Some(Region::new(0.2, 0.2, 0.5, 0.5)), DetectionMethod::Approximate, None),
        );
        driver.drag(binding, Region::new(0.15, 0.2, 0.5, 0.5));
        let snapshot = driver.session.region;

        for _ in 0..trips {
            driver.step(Input::ConfirmRegion);
            prop_assert_eq!(driver.session.state, SessionState::Labeling);
            driver.step(Input::Back);
            prop_assert_eq!(driver.session.state, SessionState::Cropping);
            let redispatched = driver.last.iter().any(|d| matches!(d, Directive::Analyze { .. }));
            prop_assert!(!redispatched);

            let rebound = driver
                .last
                .iter()
                .find_map(|d| match d {
                    Directive::InitializeSelector { binding, initial } => Some((*binding, *initial)),
                    _ => None,
                })
                .unwrap();
            prop_assert_eq!(rebound.1, snapshot);
            driver.step(Input::SelectorReady { binding: rebound.0, region: Region::full() });
            driver.step(Input::RegionChanged { binding: rebound.0, region: Region::full() });
            prop_assert_eq!(driver.session.region, snapshot);
        }
    }
}

#[test]
fn test_late_result_for_replaced_image_is_inert() {
    let mut driver = Driver::new();
    let (gen_a, _) = driver.upload("a");
    let (gen_b, binding_b) = driver.upload("b");
    driver.ready(binding_b);

    driver.resolve(gen_b, detected(None, DetectionMethod::None, None));
    assert!(driver.discarded.is_none());

    let before = driver.session.region;
    driver.resolve(
        gen_a,
        detected(
            Some(Region::new(0.2, 0.2, 0.6, 0.6)),
            DetectionMethod::Precise,
            Some("Shop A"),
        ),
    );
    assert_matches!(driver.discarded, Some(TransitionError::StaleGeneration { .. }));
    assert_eq!(driver.session.region, before);
    assert!(driver.session.label.is_empty());
    assert!(!driver.session.gate_open());

    driver.drag(binding_b, Region::new(0.25, 0.3, 0.4, 0.4));
    assert!(driver.session.gate_open());
}

#[test]
fn test_failed_detection_single_gesture_unlocks() {
    let mut driver = Driver::new();
    let (generation, binding) = driver.upload("bowl");
    driver.ready(binding);
    driver.step(Input::DetectionResolved {
        generation,
        outcome: DetectionOutcome::Failed(snapbowl_shared::AppError::new(
            snapbowl_shared::ErrorKind::Network,
            "offline",
        )),
    });
    assert!(!driver.session.gate_open());

    driver.drag(binding, Region::new(0.3, 0.3, 0.4, 0.4));
    assert!(driver.session.gate_open());
    driver.step(Input::ConfirmRegion);
    assert_eq!(driver.session.state, SessionState::Labeling);
    assert!(driver.session.label.is_empty());
}

#[test]
fn test_user_label_never_overwritten() {
    let mut driver = Driver::new();
    let (generation, binding) = driver.upload("bowl");
    driver.ready(binding);
    driver.step(Input::LabelEdited("Mine".into()));
    driver.resolve(
        generation,
        detected(None, DetectionMethod::Approximate, Some("Shop A")),
    );
    assert_eq!(driver.session.label, "Mine");
    assert!(!driver
        .last
        .iter()
        .any(|d| matches!(d, Directive::Notify(_))));
}

#[test]
fn test_guess_before_ready_applied_once_ready() {
    let mut driver = Driver::new();
    let (generation, binding) = driver.upload("bowl");
    let guess = Region::new(0.2, 0.2, 0.5, 0.5);
    driver.resolve(generation, detected(Some(guess), DetectionMethod::Precise, None));
    assert!(driver.last.iter().all(|d| !matches!(d, Directive::SetRegion { .. })));

    driver.step(Input::SelectorReady {
        binding,
        region: Region::new(0.1, 0.1, 0.8, 0.8),
    });
    assert!(driver
        .last
        .contains(&Directive::SetRegion { binding, region: guess }));
    assert_eq!(driver.session.region, Some(guess));
    assert!(driver.session.gate_open());
}
