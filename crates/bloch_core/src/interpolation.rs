use nalgebra::Vector3;

/// Relative slack granted to queries just outside the fitted domain, to absorb
/// round-off in stage times such as `t + c * dt`.
const DOMAIN_SLACK: f64 = 1e-9;

/// A single cubic segment `p(s) = c0 + c1 s + c2 s^2 + c3 s^3`, `s = t - t0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HermiteSpline {
    t0: f64,
    t1: f64,
    coeffs: [f64; 4],
}

impl HermiteSpline {
    /// Fits the cubic through `(t0, y0)` and `(t1, y1)`.
    ///
    /// With `slopes = Some((m0, m1))` the derivative at each end is matched
    /// as well; with `None` both end slopes equal the secant, which makes the
    /// cubic terms vanish.
    ///
    /// # Panics
    /// Panics unless `t0 < t1` and both are finite.
    pub fn new(t0: f64, t1: f64, y0: f64, y1: f64, slopes: Option<(f64, f64)>) -> Self {
        assert!(
            t0.is_finite() && t1.is_finite() && t0 < t1,
            "spline domain must be a finite, non-empty interval (got [{t0}, {t1}])"
        );
        let h = t1 - t0;
        let secant = (y1 - y0) / h;
        let (m0, m1) = slopes.unwrap_or((secant, secant));

        let c2 = (3.0 * secant - 2.0 * m0 - m1) / h;
        let c3 = (m0 + m1 - 2.0 * secant) / (h * h);

        Self {
            t0,
            t1,
            coeffs: [y0, m0, c2, c3],
        }
    }

    pub fn domain(&self) -> (f64, f64) {
        (self.t0, self.t1)
    }

    pub fn evaluate(&self, t: f64) -> f64 {
        let s = self.local(t);
        let [c0, c1, c2, c3] = self.coeffs;
        c0 + s * (c1 + s * (c2 + s * c3))
    }

    pub fn derivative(&self, t: f64) -> f64 {
        let s = self.local(t);
        let [_, c1, c2, c3] = self.coeffs;
        c1 + s * (2.0 * c2 + s * 3.0 * c3)
    }

    /// Maps `t` to the local coordinate. Queries outside the fitted domain
    /// are a logic error in the caller.
    fn local(&self, t: f64) -> f64 {
        let slack = DOMAIN_SLACK * (self.t1 - self.t0);
        assert!(
            t >= self.t0 - slack && t <= self.t1 + slack,
            "interpolation at t = {t} outside fitted domain [{}, {}]",
            self.t0,
            self.t1
        );
        t.clamp(self.t0, self.t1) - self.t0
    }
}

/// Field value (and optionally its time derivative) at one track point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSample {
    pub time: f64,
    pub field: [f64; 3],
    pub rate: Option<[f64; 3]>,
}

/// Continuous estimate of the three field components on one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInterpolant {
    axes: [HermiteSpline; 3],
}

impl FieldInterpolant {
    /// Builds one cubic per axis. Derivatives are used only when both ends
    /// carry them.
    pub fn new(start: &FieldSample, end: &FieldSample) -> Self {
        let axis = |i: usize| {
            let slopes = match (start.rate, end.rate) {
                (Some(r0), Some(r1)) => Some((r0[i], r1[i])),
                _ => None,
            };
            HermiteSpline::new(start.time, end.time, start.field[i], end.field[i], slopes)
        };
        Self {
            axes: [axis(0), axis(1), axis(2)],
        }
    }

    pub fn start_time(&self) -> f64 {
        self.axes[0].domain().0
    }

    pub fn end_time(&self) -> f64 {
        self.axes[0].domain().1
    }

    pub fn field_at(&self, t: f64) -> Vector3<f64> {
        Vector3::new(
            self.axes[0].evaluate(t),
            self.axes[1].evaluate(t),
            self.axes[2].evaluate(t),
        )
    }

    pub fn rate_at(&self, t: f64) -> Vector3<f64> {
        Vector3::new(
            self.axes[0].derivative(t),
            self.axes[1].derivative(t),
            self.axes[2].derivative(t),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{FieldInterpolant, FieldSample, HermiteSpline};

    #[test]
    fn spline_matches_values_and_slopes_at_ends() {
        let spline = HermiteSpline::new(1.0, 3.0, 2.0, -1.0, Some((0.5, 4.0)));
        assert!((spline.evaluate(1.0) - 2.0).abs() < 1e-14);
        assert!((spline.evaluate(3.0) + 1.0).abs() < 1e-14);
        assert!((spline.derivative(1.0) - 0.5).abs() < 1e-14);
        assert!((spline.derivative(3.0) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn spline_reproduces_cubic_exactly() {
        let f = |t: f64| 1.0 - 2.0 * t + 0.5 * t * t + 0.25 * t * t * t;
        let df = |t: f64| -2.0 + t + 0.75 * t * t;
        let spline = HermiteSpline::new(-1.0, 2.0, f(-1.0), f(2.0), Some((df(-1.0), df(2.0))));
        for i in 0..=30 {
            let t = -1.0 + 0.1 * i as f64;
            assert!((spline.evaluate(t) - f(t)).abs() < 1e-12, "t = {t}");
        }
    }

    #[test]
    fn spline_without_slopes_is_linear() {
        let spline = HermiteSpline::new(0.0, 4.0, 1.0, 9.0, None);
        assert!((spline.evaluate(1.0) - 3.0).abs() < 1e-14);
        assert!((spline.evaluate(2.5) - 6.0).abs() < 1e-14);
        assert!((spline.derivative(3.0) - 2.0).abs() < 1e-14);
    }

    #[test]
    fn spline_tolerates_round_off_at_domain_edge() {
        let spline = HermiteSpline::new(0.1, 0.3, 1.0, 2.0, None);
        let edge = 0.1 + (0.3 - 0.1);
        assert!((spline.evaluate(edge) - 2.0).abs() < 1e-12);
    }

    #[test]
    #[should_panic(expected = "outside fitted domain")]
    fn spline_rejects_queries_outside_domain() {
        let spline = HermiteSpline::new(0.0, 1.0, 0.0, 1.0, None);
        spline.evaluate(1.5);
    }

    #[test]
    #[should_panic(expected = "non-empty interval")]
    fn spline_rejects_empty_domain() {
        HermiteSpline::new(1.0, 1.0, 0.0, 1.0, None);
    }

    #[test]
    fn interpolant_uses_rates_only_when_both_ends_have_them() {
        let start = FieldSample {
            time: 0.0,
            field: [0.0, 1.0, 2.0],
            rate: Some([1.0, 0.0, 0.0]),
        };
        let end = FieldSample {
            time: 1.0,
            field: [2.0, 1.0, 0.0],
            rate: None,
        };
        let interp = FieldInterpolant::new(&start, &end);
        let mid = interp.field_at(0.5);
        assert!((mid.x - 1.0).abs() < 1e-14);
        assert!((mid.y - 1.0).abs() < 1e-14);
        assert!((mid.z - 1.0).abs() < 1e-14);
        assert_eq!(interp.start_time(), 0.0);
        assert_eq!(interp.end_time(), 1.0);
    }

    #[test]
    fn interpolant_follows_linear_ramp_with_rates() {
        let start = FieldSample {
            time: 2.0,
            field: [1e-7, 0.0, 5e-7],
            rate: Some([0.0, 0.0, 3e-7]),
        };
        let end = FieldSample {
            time: 3.0,
            field: [1e-7, 0.0, 8e-7],
            rate: Some([0.0, 0.0, 3e-7]),
        };
        let interp = FieldInterpolant::new(&start, &end);
        let b = interp.field_at(2.25);
        assert!((b.z - 5.75e-7).abs() < 1e-20);
        assert!((interp.rate_at(2.7).z - 3e-7).abs() < 1e-18);
    }
}
