use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{Region, RegionConstraint};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BindingId(pub u64);

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "binding-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum BindingError {
    #[error("{0} reported ready twice")]
    DuplicateReady(BindingId),
    #[error("callback for {got}, current binding is {expected}")]
    Mismatch { expected: BindingId, got: BindingId },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionChange {
    /// The widget placing its initial selection.
    AutoPlacement,
    /// The widget reporting back a region the core set.
    Echo,
    UserGesture,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SelectorBinding {
    id: BindingId,
    constraint: RegionConstraint,
    ready: bool,
    placement_seen: bool,
    pending_echo: Option<Region>,
}

impl SelectorBinding {
    pub fn new(id: BindingId, constraint: RegionConstraint) -> Self {
        Self {
            id,
            constraint,
            ready: false,
            placement_seen: false,
            pending_echo: None,
        }
    }

    pub fn id(&self) -> BindingId {
        self.id
    }

    /// Live means ready: only then may the core query or set geometry.
    pub fn is_live(&self) -> bool {
        self.ready
    }

    pub fn check(&self, got: BindingId) -> Result<(), BindingError> {
        if got == self.id {
            Ok(())
        } else {
            Err(BindingError::Mismatch {
                expected: self.id,
                got,
            })
        }
    }

    pub fn mark_ready(&mut self) -> Result<(), BindingError> {
        if self.ready {
            return Err(BindingError::DuplicateReady(self.id));
        }
        self.ready = true;
        Ok(())
    }

    /// Remember a region the core is about to send with `setRegion`. The next
    /// report counts as its echo if it lands within a pixel of it.
    pub fn expect_echo(&mut self, region: Region) {
        self.pending_echo = Some(region);
    }

    pub fn classify(&mut self, reported: &Region) -> RegionChange {
        if !self.placement_seen {
            self.placement_seen = true;
            return RegionChange::AutoPlacement;
        }
        match self.pending_echo.take() {
            Some(expected) if expected.matches(reported, self.constraint) => RegionChange::Echo,
            _ => RegionChange::UserGesture,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding() -> SelectorBinding {
        SelectorBinding::new(BindingId(1), RegionConstraint::unknown(true))
    }

    #[test]
    fn test_ready_only_once() {
        let mut b = binding();
        assert!(!b.is_live());
        assert!(b.mark_ready().is_ok());
        assert_eq!(b.mark_ready(), Err(BindingError::DuplicateReady(BindingId(1))));
        assert!(b.is_live());
    }

    #[test]
    fn test_first_change_is_auto_placement() {
        let mut b = binding();
        let r = Region::new(0.1, 0.1, 0.8, 0.8);
        assert_eq!(b.classify(&r), RegionChange::AutoPlacement);
        assert_eq!(b.classify(&r), RegionChange::UserGesture);
    }

    #[test]
    fn test_echo_of_set_region() {
        let mut b = binding();
        b.classify(&Region::full());
        let set = Region::new(0.2, 0.2, 0.5, 0.5);
        b.expect_echo(set);
        let reported = Region::new(0.2 + 1e-9, 0.2, 0.5, 0.5);
        assert_eq!(b.classify(&reported), RegionChange::Echo);
        // Consumed: the same report again is the user.
        assert_eq!(b.classify(&reported), RegionChange::UserGesture);
    }

    #[test]
    fn test_echo_tolerates_pixel_rounding() {
        let mut b = SelectorBinding::new(BindingId(2), RegionConstraint::new(1200, 900, false));
        b.classify(&Region::full());
        let set = Region::new(0.123_456_7, 0.1, 0.5, 0.5);

        b.expect_echo(set);
        let rounded = Region::new(148.0 / 1200.0, 90.0 / 900.0, 600.0 / 1200.0, 450.0 / 900.0);
        assert_eq!(b.classify(&rounded), RegionChange::Echo);

        b.expect_echo(set);
        let moved = Region::new(set.x + 3.0 / 1200.0, set.y, set.width, set.height);
        assert_eq!(b.classify(&moved), RegionChange::UserGesture);
    }

    #[test]
    fn test_gesture_instead_of_echo_clears_expectation() {
        let mut b = binding();
        b.classify(&Region::full());
        b.expect_echo(Region::new(0.2, 0.2, 0.5, 0.5));
        assert_eq!(
            b.classify(&Region::new(0.0, 0.0, 0.3, 0.3)),
            RegionChange::UserGesture
        );
        assert_eq!(
            b.classify(&Region::new(0.2, 0.2, 0.5, 0.5)),
            RegionChange::UserGesture
        );
    }

    #[test]
    fn test_binding_mismatch() {
        let b = binding();
        assert!(b.check(BindingId(1)).is_ok());
        assert_eq!(
            b.check(BindingId(2)),
            Err(BindingError::Mismatch {
                expected: BindingId(1),
                got: BindingId(2)
            })
        );
    }
}
