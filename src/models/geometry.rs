use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ModifierMask;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// One pointer observation from the event source.
///
/// `display_location` is where overlays are drawn; `hit_test_location` is what the item
/// resolver receives. The two live in different coordinate spaces and are carried through
/// untouched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerSample {
    pub display_location: Point,
    pub hit_test_location: Point,
    pub modifiers: ModifierMask,
    /// Monotonic time since the pump's clock origin.
    pub timestamp: Duration,
}

impl PointerSample {
    pub fn new(
        display_location: Point,
        hit_test_location: Point,
        modifiers: ModifierMask,
        timestamp: Duration,
    ) -> Self {
        Self {
            display_location,
            hit_test_location,
            modifiers,
            timestamp,
        }
    }

    /// Sample whose display and hit-test coordinates coincide.
    pub fn at(location: Point, modifiers: ModifierMask, timestamp: Duration) -> Self {
        Self::new(location, location, modifiers, timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_euclidean() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert_eq!(a.distance_to(&b), 5.0);
        assert_eq!(b.distance_to(&a), 5.0);
    }
}
