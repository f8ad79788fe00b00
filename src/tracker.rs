//! Per-event pointer samples and delta accumulation.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WheelDelta {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    /// DOM delta mode: 0 = pixels, 1 = lines, 2 = pages.
    #[serde(default)]
    pub mode: u32,
}

/// One normalized pointer or wheel observation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MouseSample {
    pub button: u8,
    pub x: f64,
    pub y: f64,
    pub dx: f64,
    pub dy: f64,
    pub wheel: Option<WheelDelta>,
}

impl MouseSample {
    pub fn at(button: u8, x: f64, y: f64) -> Self {
        Self {
            button,
            x,
            y,
            ..Self::default()
        }
    }

    pub fn magnitude(&self) -> f64 {
        self.dx.hypot(self.dy)
    }

    /// Shift into the parent's coordinate space. Deltas are translation-invariant.
    pub fn offset_by(mut self, ox: f64, oy: f64) -> Self {
        self.x += ox;
        self.y += oy;
        self
    }
}

#[derive(Debug, Default, Clone)]
pub struct DeltaAccumulator {
    dx: f64,
    dy: f64,
}

impl DeltaAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.dx = 0.0;
        self.dy = 0.0;
    }

    /// Adds the sample's deltas and returns it carrying the cumulative delta
    /// since the last reset.
    pub fn accumulate(&mut self, sample: &MouseSample) -> MouseSample {
        self.dx += sample.dx;
        self.dy += sample.dy;
        MouseSample {
            dx: self.dx,
            dy: self.dy,
            ..*sample
        }
    }

    /// Accumulate, and once the cumulative movement reaches `fidelity`
    /// reset and hand back the significant sample.
    pub fn throttle(&mut self, sample: &MouseSample, fidelity: f64) -> Option<MouseSample> {
        let acc = self.accumulate(sample);
        if acc.magnitude() >= fidelity {
            self.reset();
            Some(acc)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moved(dx: f64, dy: f64) -> MouseSample {
        MouseSample {
            dx,
            dy,
            ..MouseSample::default()
        }
    }

    #[test]
    fn accumulate_returns_cumulative_delta() {
        let mut acc = DeltaAccumulator::new();
        acc.accumulate(&moved(3.0, 1.0));
        let s = acc.accumulate(&moved(2.0, -4.0));
        assert_eq!((s.dx, s.dy), (5.0, -3.0));

        acc.reset();
        let s = acc.accumulate(&moved(1.0, 1.0));
        assert_eq!((s.dx, s.dy), (1.0, 1.0));
    }

    #[test]
    fn throttle_holds_back_small_moves() {
        let mut acc = DeltaAccumulator::new();
        for _ in 0..3 {
            assert!(acc.throttle(&moved(2.0, 2.0), 10.0).is_none());
        }
        let s = acc.throttle(&moved(2.0, 2.0), 10.0).expect("threshold crossed");
        assert_eq!((s.dx, s.dy), (8.0, 8.0));
        // reset after crossing
        assert!(acc.throttle(&moved(1.0, 0.0), 10.0).is_none());
    }

    #[test]
    fn offset_keeps_deltas() {
        let s = MouseSample {
            x: 5.0,
            y: 6.0,
            dx: 1.0,
            dy: 2.0,
            ..MouseSample::default()
        }
        .offset_by(100.0, 50.0);
        assert_eq!((s.x, s.y, s.dx, s.dy), (105.0, 56.0, 1.0, 2.0));
    }
}
