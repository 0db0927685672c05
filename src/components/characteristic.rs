//! Piecewise-linear device characteristics.
//!
//! A conduction curve given as measured `(voltage, current)` samples is split
//! into linear segments. Each segment presents a differential resistance and a
//! forward-voltage offset (the segment extrapolated to zero current), which is
//! exactly what a switch-like device needs to stamp:
//!
//! ```text
//!   i = (v - uf) / r        for startVoltage <= v <= endVoltage
//! ```
//!
//! The first segment starts at -inf and the last one ends at +inf, so every
//! voltage belongs to exactly one segment.

use crate::error::{PowersimError, Result};
use crate::solver::MIN_RESISTANCE;

/// One linear region of a characteristic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    /// Lower voltage bound (-inf for the first segment)
    pub start_voltage: f64,
    /// Upper voltage bound (+inf for the last segment)
    pub end_voltage: f64,
    /// Differential resistance dV/dI
    pub resistance: f64,
    /// Voltage at which the extrapolated segment carries zero current
    pub forward_voltage: f64,
}

/// Result of checking a test voltage against the active segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentMove {
    /// Operating point lies below the active segment
    Previous,
    /// Operating point is inside the active segment
    Stable,
    /// Operating point lies above the active segment
    Next,
}

/// Ordered, contiguous set of segments with one of them active.
#[derive(Debug, Clone)]
pub struct Characteristic {
    segments: Vec<Segment>,
    active: usize,
}

impl Characteristic {
    /// Build from `(voltage, current)` samples ordered by increasing voltage.
    ///
    /// Both voltage and current must be strictly increasing; anything else is
    /// a configuration error. The active segment starts at the one containing 0 V.
    pub fn from_samples(component: &str, samples: &[(f64, f64)]) -> Result<Self> {
        if samples.len() < 2 {
            return Err(PowersimError::malformed_characteristic(
                component,
                "at least two (voltage, current) samples are required",
            ));
        }
        if samples.iter().any(|(v, i)| !v.is_finite() || !i.is_finite()) {
            return Err(PowersimError::malformed_characteristic(
                component,
                "samples must be finite",
            ));
        }

        let last = samples.len() - 2;
        let mut segments = Vec::with_capacity(samples.len() - 1);
        for (k, pair) in samples.windows(2).enumerate() {
            let (v0, i0) = pair[0];
            let (v1, i1) = pair[1];
            if v1 <= v0 || i1 <= i0 {
                return Err(PowersimError::malformed_characteristic(
                    component,
                    format!("samples {} and {} are not monotonically increasing", k, k + 1),
                ));
            }
            let resistance = ((v1 - v0) / (i1 - i0)).max(MIN_RESISTANCE);
            segments.push(Segment {
                start_voltage: if k == 0 { f64::NEG_INFINITY } else { v0 },
                end_voltage: if k == last { f64::INFINITY } else { v1 },
                resistance,
                forward_voltage: v0 - resistance * i0,
            });
        }

        let active = segments
            .iter()
            .position(|s| 0.0 <= s.end_voltage)
            .unwrap_or(segments.len() - 1);
        Ok(Self { segments, active })
    }

    /// All segments in increasing voltage order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Index of the active segment.
    pub fn active_index(&self) -> usize {
        self.active
    }

    /// The active segment.
    pub fn active(&self) -> &Segment {
        &self.segments[self.active]
    }

    /// Force the active segment (clamped to the valid range).
    pub fn set_active(&mut self, index: usize) {
        self.active = index.min(self.segments.len() - 1);
    }

    /// Check whether `voltage` still lies in the active segment, with the
    /// segment bounds scaled by `scale` and narrowed by `tolerance`.
    pub fn test_if_wrong_segment(&self, voltage: f64, scale: f64, tolerance: f64) -> SegmentMove {
        let segment = self.active();
        if voltage < segment.start_voltage * scale + tolerance {
            SegmentMove::Previous
        } else if voltage > segment.end_voltage * scale - tolerance {
            SegmentMove::Next
        } else {
            SegmentMove::Stable
        }
    }

    /// Evaluate [`Self::test_if_wrong_segment`] and move the active index by
    /// at most one. Callers re-evaluate after the next solve if the operating
    /// point moved further.
    pub fn advance(&mut self, voltage: f64, scale: f64, tolerance: f64) -> SegmentMove {
        let step = self.test_if_wrong_segment(voltage, scale, tolerance);
        match step {
            SegmentMove::Previous if self.active > 0 => self.active -= 1,
            SegmentMove::Next if self.active + 1 < self.segments.len() => self.active += 1,
            SegmentMove::Previous | SegmentMove::Next => return SegmentMove::Stable,
            SegmentMove::Stable => {}
        }
        step
    }
}

/// Piecewise-linear lookup `y(x)` over monotonic samples, held constant
/// outside the sampled range.
#[derive(Debug, Clone)]
pub struct PiecewiseLinear {
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl PiecewiseLinear {
    /// Build from `(x, y)` samples with strictly increasing `x`.
    pub fn new(component: &str, samples: &[(f64, f64)]) -> Result<Self> {
        if samples.is_empty() {
            return Err(PowersimError::malformed_characteristic(component, "curve has no samples"));
        }
        if samples.windows(2).any(|p| p[1].0 <= p[0].0) {
            return Err(PowersimError::malformed_characteristic(
                component,
                "curve abscissae must be strictly increasing",
            ));
        }
        Ok(Self {
            xs: samples.iter().map(|s| s.0).collect(),
            ys: samples.iter().map(|s| s.1).collect(),
        })
    }

    /// Interpolated value at `x`.
    pub fn value(&self, x: f64) -> f64 {
        let idx = self.xs.partition_point(|&xi| xi < x);
        if idx == 0 {
            return self.ys[0];
        }
        if idx >= self.xs.len() {
            return self.ys[self.ys.len() - 1];
        }
        let (x1, x2) = (self.xs[idx - 1], self.xs[idx]);
        (self.ys[idx - 1] * (x2 - x) + self.ys[idx] * (x - x1)) / (x2 - x1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn diode_curve() -> Characteristic {
        Characteristic::from_samples(
            "D1",
            &[(-100.0, -1e-6), (0.6, 0.0), (0.8, 1.0), (1.2, 21.0)],
        )
        .unwrap()
    }

    #[test]
    fn test_segment_parameters() {
        let c = diode_curve();
        assert_eq!(c.segments().len(), 3);
        let s = c.segments()[1];
        assert_relative_eq!(s.resistance, 0.2, epsilon = 1e-12);
        assert_relative_eq!(s.forward_voltage, 0.6, epsilon = 1e-12);
        let s = c.segments()[2];
        assert_relative_eq!(s.resistance, 0.02, epsilon = 1e-12);
        assert_relative_eq!(s.forward_voltage, 0.8 - 0.02, epsilon = 1e-12);
    }

    #[test]
    fn test_extreme_segments_are_unbounded() {
        let c = diode_curve();
        assert_eq!(c.segments()[0].start_voltage, f64::NEG_INFINITY);
        assert_eq!(c.segments()[2].end_voltage, f64::INFINITY);
        // Segments are contiguous
        assert_eq!(c.segments()[0].end_voltage, c.segments()[1].start_voltage);
        assert_eq!(c.segments()[1].end_voltage, c.segments()[2].start_voltage);
    }

    #[test]
    fn test_stable_inside_and_moves_outside() {
        let mut c = diode_curve();
        c.set_active(1);
        assert_eq!(c.test_if_wrong_segment(0.7, 1.0, 0.0), SegmentMove::Stable);
        assert_eq!(c.test_if_wrong_segment(0.59, 1.0, 0.0), SegmentMove::Previous);
        assert_eq!(c.test_if_wrong_segment(0.81, 1.0, 0.0), SegmentMove::Next);
    }

    #[test]
    fn test_first_and_last_accept_extreme_voltages() {
        let mut c = diode_curve();
        c.set_active(0);
        assert_eq!(c.test_if_wrong_segment(-1e12, 1.0, 0.0), SegmentMove::Stable);
        c.set_active(2);
        assert_eq!(c.test_if_wrong_segment(1e12, 1.0, 0.0), SegmentMove::Stable);
    }

    #[test]
    fn test_advance_moves_one_segment_per_call() {
        let mut c = diode_curve();
        c.set_active(0);
        // 5 V is two segments up; each call moves by one
        assert_eq!(c.advance(5.0, 1.0, 0.0), SegmentMove::Next);
        assert_eq!(c.active_index(), 1);
        assert_eq!(c.advance(5.0, 1.0, 0.0), SegmentMove::Next);
        assert_eq!(c.active_index(), 2);
        assert_eq!(c.advance(5.0, 1.0, 0.0), SegmentMove::Stable);
        assert_eq!(c.active_index(), 2);
    }

    #[test]
    fn test_non_monotonic_samples_rejected() {
        let err = Characteristic::from_samples("D2", &[(0.0, 0.0), (0.7, 1.0), (0.6, 2.0)]);
        assert!(matches!(err, Err(PowersimError::MalformedCharacteristic { .. })));
        let err = Characteristic::from_samples("D3", &[(0.0, 0.0), (0.7, 1.0), (0.9, 0.5)]);
        assert!(err.is_err());
        assert!(Characteristic::from_samples("D4", &[(0.0, 0.0)]).is_err());
    }

    #[test]
    fn test_piecewise_linear_interpolation() {
        let curve = PiecewiseLinear::new("L1", &[(0.0, 10e-3), (2.0, 10e-3), (4.0, 2e-3)]).unwrap();
        assert_relative_eq!(curve.value(-1.0), 10e-3);
        assert_relative_eq!(curve.value(1.0), 10e-3);
        assert_relative_eq!(curve.value(3.0), 6e-3, epsilon = 1e-15);
        assert_relative_eq!(curve.value(10.0), 2e-3);
    }
}
