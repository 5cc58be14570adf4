use crate::error::IntegrationError;
use crate::solvers::{Dopri5, Tsit5};
use crate::traits::{lit, DenseOutput, DenseView, DynamicalSystem, EmbeddedStepper, Scalar};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Tolerances and step-size controller limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntegratorSettings {
    pub abs_tolerance: f64,
    pub rel_tolerance: f64,
    /// Accepted steps allowed between two initializations.
    pub max_steps: usize,
    pub safety: f64,
    pub min_factor: f64,
    pub max_factor: f64,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            abs_tolerance: 1e-12,
            rel_tolerance: 1e-12,
            max_steps: 100_000_000,
            safety: 0.9,
            min_factor: 0.2,
            max_factor: 5.0,
        }
    }
}

/// Drives an [`EmbeddedStepper`] with local error control and keeps the last
/// accepted step available for dense queries.
pub struct DenseIntegrator<T: Scalar, S: EmbeddedStepper<T>> {
    stepper: S,
    settings: IntegratorSettings,
    t_old: T,
    t: T,
    state_old: Vec<T>,
    state: Vec<T>,
    proposal: Vec<T>,
    error: Vec<T>,
    /// Step size to try next; `None` until the first advance picks one.
    dt: Option<T>,
    steps: usize,
    rejected: usize,
}

impl<T: Scalar, S: EmbeddedStepper<T>> DenseIntegrator<T, S> {
    pub fn new(stepper: S, settings: IntegratorSettings, state: &[T], t: T) -> Self {
        let dim = state.len();
        Self {
            stepper,
            settings,
            t_old: t,
            t,
            state_old: state.to_vec(),
            state: state.to_vec(),
            proposal: vec![T::zero(); dim],
            error: vec![T::zero(); dim],
            dt: None,
            steps: 0,
            rejected: 0,
        }
    }

    pub fn settings(&self) -> &IntegratorSettings {
        &self.settings
    }

    pub fn rejected_steps(&self) -> usize {
        self.rejected
    }

    /// Step size the controller will try next, if one has been chosen.
    pub fn next_step_size(&self) -> Option<T> {
        self.dt
    }

    /// Scaled max-norm of the last error estimate; `<= 1` means acceptable.
    fn error_norm(&self) -> T {
        let atol = lit::<T>(self.settings.abs_tolerance);
        let rtol = lit::<T>(self.settings.rel_tolerance);
        let mut norm = T::zero();
        for i in 0..self.state.len() {
            let scale = atol + rtol * self.state[i].abs().max(self.proposal[i].abs());
            norm = norm.max(self.error[i].abs() / scale);
        }
        norm
    }

    fn step_factor(&self, err: T) -> T {
        let max_factor = lit::<T>(self.settings.max_factor);
        if err <= T::zero() {
            return max_factor;
        }
        let exponent = -T::one() / lit::<T>((self.stepper.error_order() + 1) as f64);
        let factor = lit::<T>(self.settings.safety) * err.powf(exponent);
        factor.max(lit(self.settings.min_factor)).min(max_factor)
    }

    /// Smallest step that still advances time at the current position.
    fn min_step(&self, t_end: T) -> T {
        let scale = self.t.abs().max(t_end.abs());
        (lit::<T>(16.0) * T::epsilon() * scale).max(T::min_positive_value())
    }

    /// Automatic initial step (Hairer, Norsett & Wanner, II.4), capped at
    /// the distance to `t_end`.
    fn initial_step(&self, system: &impl DynamicalSystem<T>, t_end: T) -> T {
        let span = t_end - self.t;
        let dim = self.state.len();
        let atol = lit::<T>(self.settings.abs_tolerance);
        let rtol = lit::<T>(self.settings.rel_tolerance);
        let n = lit::<T>(dim as f64);
        let scale: Vec<T> = self.state.iter().map(|y| atol + rtol * y.abs()).collect();
        let rms = |v: &[T]| -> T {
            let sum = v
                .iter()
                .zip(&scale)
                .fold(T::zero(), |acc, (x, s)| acc + (*x / *s) * (*x / *s));
            (sum / n).sqrt()
        };

        let mut f0 = vec![T::zero(); dim];
        system.apply(self.t, &self.state, &mut f0);
        let d0 = rms(&self.state);
        let d1 = rms(&f0);

        let tiny = lit::<T>(1e-5);
        let mut h0 = if d0 < tiny || d1 < tiny {
            lit(1e-6)
        } else {
            lit::<T>(0.01) * d0 / d1
        };
        h0 = h0.min(span);

        let y1: Vec<T> = self
            .state
            .iter()
            .zip(&f0)
            .map(|(y, f)| *y + h0 * *f)
            .collect();
        let mut f1 = vec![T::zero(); dim];
        system.apply(self.t + h0, &y1, &mut f1);
        let diff: Vec<T> = f1.iter().zip(&f0).map(|(a, b)| *a - *b).collect();
        let d2 = rms(&diff) / h0;

        let dmax = d1.max(d2);
        let h1 = if dmax <= lit(1e-15) {
            (h0 * lit(1e-3)).max(lit(1e-6))
        } else {
            let exponent = T::one() / lit::<T>((self.stepper.error_order() + 1) as f64);
            (lit::<T>(0.01) / dmax).powf(exponent)
        };

        (lit::<T>(100.0) * h0).min(h1).min(span)
    }
}

fn as_f64<T: Scalar>(value: T) -> f64 {
    value.to_f64().unwrap_or(f64::NAN)
}

impl<T: Scalar, S: EmbeddedStepper<T>> DenseView<T> for DenseIntegrator<T, S> {
    fn previous_time(&self) -> T {
        self.t_old
    }

    fn previous_state(&self) -> &[T] {
        &self.state_old
    }

    fn current_time(&self) -> T {
        self.t
    }

    fn current_state(&self) -> &[T] {
        &self.state
    }

    fn steps(&self) -> usize {
        self.steps
    }

    fn calc_state(&self, t: T, out: &mut [T]) -> Result<(), IntegrationError> {
        let span = self.t - self.t_old;
        let slack = lit::<T>(1e-9) * span;
        if t < self.t_old - slack || t > self.t + slack {
            return Err(IntegrationError::OutsideDenseRange {
                t: as_f64(t),
                start: as_f64(self.t_old),
                end: as_f64(self.t),
            });
        }
        if span <= T::zero() {
            out.copy_from_slice(&self.state);
            return Ok(());
        }
        let theta = ((t - self.t_old) / span).max(T::zero()).min(T::one());
        self.stepper
            .interpolate(theta, span, &self.state_old, &self.state, out);
        Ok(())
    }
}

impl<T: Scalar, S: EmbeddedStepper<T>> DenseOutput<T> for DenseIntegrator<T, S> {
    fn initialize(&mut self, state: &[T], t: T) {
        self.state.copy_from_slice(state);
        self.state_old.copy_from_slice(state);
        self.t = t;
        self.t_old = t;
        self.dt = None;
        self.steps = 0;
        self.rejected = 0;
    }

    fn advance<D, E, F>(&mut self, system: &D, t_end: T, mut observe: F) -> Result<usize, E>
    where
        D: DynamicalSystem<T>,
        E: From<IntegrationError>,
        F: FnMut(&dyn DenseView<T>) -> Result<(), E>,
    {
        if t_end.is_nan() || t_end < self.t {
            return Err(IntegrationError::InvalidInput(format!(
                "cannot advance from t = {} to t = {}",
                as_f64(self.t),
                as_f64(t_end)
            ))
            .into());
        }
        if t_end == self.t {
            return Ok(0);
        }

        let mut dt = match self.dt {
            Some(dt) => dt,
            None => self.initial_step(system, t_end),
        };
        if dt.is_nan() || dt <= T::zero() {
            return Err(IntegrationError::StepSizeTooSmall {
                t: as_f64(self.t),
                h: as_f64(dt),
            }
            .into());
        }
        let mut taken = 0usize;

        while self.t < t_end {
            let remaining = t_end - self.t;
            let last = dt >= remaining;
            let h = if last { remaining } else { dt };

            self.stepper
                .try_step(system, self.t, &self.state, h, &mut self.proposal, &mut self.error);
            let err = self.error_norm();

            if !err.is_finite() || self.proposal.iter().any(|v| !v.is_finite()) {
                return Err(IntegrationError::NonFiniteState { t: as_f64(self.t) }.into());
            }

            let factor = self.step_factor(err);
            if err <= T::one() {
                std::mem::swap(&mut self.state_old, &mut self.state);
                self.state.copy_from_slice(&self.proposal);
                self.t_old = self.t;
                self.t = if last { t_end } else { self.t + h };
                self.steps += 1;
                taken += 1;

                if self.steps > self.settings.max_steps {
                    return Err(IntegrationError::MaxStepsExceeded {
                        steps: self.settings.max_steps,
                    }
                    .into());
                }

                observe(&*self)?;

                // A step clipped to hit t_end says nothing about the
                // attainable step size, so it never shrinks the carried one.
                let grown = h * factor;
                dt = if last && h < dt { dt.max(grown) } else { grown };
            } else {
                self.rejected += 1;
                dt = h * factor;
                if dt < self.min_step(t_end) {
                    return Err(IntegrationError::StepSizeTooSmall {
                        t: as_f64(self.t),
                        h: as_f64(dt),
                    }
                    .into());
                }
            }
        }

        self.dt = Some(dt);
        Ok(taken)
    }
}

/// Which embedded pair drives spin integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegratorKind {
    #[default]
    Dopri5,
    Tsit5,
}

impl IntegratorKind {
    pub fn build(self, settings: IntegratorSettings, state: &[f64], t: f64) -> Integrator {
        let dim = state.len();
        match self {
            IntegratorKind::Dopri5 => {
                Integrator::Dopri5(DenseIntegrator::new(Dopri5::new(dim), settings, state, t))
            }
            IntegratorKind::Tsit5 => {
                Integrator::Tsit5(DenseIntegrator::new(Tsit5::new(dim), settings, state, t))
            }
        }
    }
}

impl FromStr for IntegratorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dopri5" => Ok(IntegratorKind::Dopri5),
            "tsit5" => Ok(IntegratorKind::Tsit5),
            other => Err(format!("unknown integrator \"{other}\" (expected dopri5 or tsit5)")),
        }
    }
}

/// A dense-output engine over one of the supported pairs.
pub enum Integrator {
    Dopri5(DenseIntegrator<f64, Dopri5<f64>>),
    Tsit5(DenseIntegrator<f64, Tsit5<f64>>),
}

impl DenseView<f64> for Integrator {
    fn previous_time(&self) -> f64 {
        match self {
            Integrator::Dopri5(i) => i.previous_time(),
            Integrator::Tsit5(i) => i.previous_time(),
        }
    }

    fn previous_state(&self) -> &[f64] {
        match self {
            Integrator::Dopri5(i) => i.previous_state(),
            Integrator::Tsit5(i) => i.previous_state(),
        }
    }

    fn current_time(&self) -> f64 {
        match self {
            Integrator::Dopri5(i) => i.current_time(),
            Integrator::Tsit5(i) => i.current_time(),
        }
    }

    fn current_state(&self) -> &[f64] {
        match self {
            Integrator::Dopri5(i) => i.current_state(),
            Integrator::Tsit5(i) => i.current_state(),
        }
    }

    fn steps(&self) -> usize {
        match self {
            Integrator::Dopri5(i) => i.steps(),
            Integrator::Tsit5(i) => i.steps(),
        }
    }

    fn calc_state(&self, t: f64, out: &mut [f64]) -> Result<(), IntegrationError> {
        match self {
            Integrator::Dopri5(i) => i.calc_state(t, out),
            Integrator::Tsit5(i) => i.calc_state(t, out),
        }
    }
}

impl DenseOutput<f64> for Integrator {
    fn initialize(&mut self, state: &[f64], t: f64) {
        match self {
            Integrator::Dopri5(i) => i.initialize(state, t),
            Integrator::Tsit5(i) => i.initialize(state, t),
        }
    }

    fn advance<D, E, F>(&mut self, system: &D, t_end: f64, observe: F) -> Result<usize, E>
    where
        D: DynamicalSystem<f64>,
        E: From<IntegrationError>,
        F: FnMut(&dyn DenseView<f64>) -> Result<(), E>,
    {
        match self {
            Integrator::Dopri5(i) => i.advance(system, t_end, observe),
            Integrator::Tsit5(i) => i.advance(system, t_end, observe),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Rotation {
        omega: f64,
    }

    impl DynamicalSystem<f64> for Rotation {
        fn dimension(&self) -> usize {
            2
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = -self.omega * x[1];
            out[1] = self.omega * x[0];
        }
    }

    struct Blowup;

    impl DynamicalSystem<f64> for Blowup {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = x[0] * x[0];
        }
    }

    /// `x' = 1` from `t = 0.5` on, `0` before.
    struct Kick;

    impl DynamicalSystem<f64> for Kick {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, t: f64, _x: &[f64], out: &mut [f64]) {
            out[0] = if t < 0.5 { 0.0 } else { 1.0 };
        }
    }

        fn assert_err_contains<T: std::fmt::Debug>(result: Result<T, IntegrationError>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    fn no_observer(_: &dyn DenseView<f64>) -> Result<(), IntegrationError> {
        Ok(())
    }

    #[test]
    fn advance_lands_exactly_on_end_time() {
        for kind in [IntegratorKind::Dopri5, IntegratorKind::Tsit5] {
            let system = Rotation { omega: 3.0 };
            let mut integrator = kind.build(IntegratorSettings::default(), &[1.0, 0.0], 0.0);
            let steps = integrator
                .advance(&system, 2.0, no_observer)
                .expect("integration should succeed");
            assert!(steps > 0);
            assert_eq!(integrator.current_time(), 2.0);
            let state = integrator.current_state();
            assert!((state[0] - 6.0f64.cos()).abs() < 1e-9, "{kind:?}");
            assert!((state[1] - 6.0f64.sin()).abs() < 1e-9, "{kind:?}");
        }
    }

    #[test]
    fn dense_output_matches_solution_inside_every_step() {
        let system = Rotation { omega: 2.0 };
        let mut integrator =
            IntegratorKind::Dopri5.build(IntegratorSettings::default(), &[1.0, 0.0], 0.0);
        let mut checked = 0usize;
        integrator
            .advance(&system, 1.5, |step: &dyn DenseView<f64>| {
                let (t0, t1) = (step.previous_time(), step.current_time());
                let mut out = [0.0; 2];
                for frac in [0.0, 0.3, 0.7, 1.0] {
                    let t = t0 + frac * (t1 - t0);
                    step.calc_state(t, &mut out)?;
                    assert!((out[0] - (2.0 * t).cos()).abs() < 1e-9);
                    assert!((out[1] - (2.0 * t).sin()).abs() < 1e-9);
                }
                checked += 1;
                Ok::<(), IntegrationError>(())
            })
            .expect("integration should succeed");
        assert_eq!(checked, integrator.steps());
    }

    #[test]
    fn dense_output_rejects_queries_outside_last_step() {
        let system = Rotation { omega: 1.0 };
        let mut integrator =
            IntegratorKind::Tsit5.build(IntegratorSettings::default(), &[1.0, 0.0], 0.0);
        integrator
            .advance(&system, 0.5, no_observer)
            .expect("integration should succeed");
        let mut out = [0.0; 2];
        assert_err_contains(integrator.calc_state(0.75, &mut out), "outside the last step");
        assert!(integrator.calc_state(0.5, &mut out).is_ok());
    }

    #[test]
    fn advance_is_additive_over_sub_intervals() {
        let system = Rotation { omega: 5.0 };
        let settings = IntegratorSettings::default();
        let mut whole = IntegratorKind::Dopri5.build(settings, &[1.0, 0.0], 0.0);
        whole.advance(&system, 1.0, no_observer).expect("whole");

        let mut pieces = IntegratorKind::Dopri5.build(settings, &[1.0, 0.0], 0.0);
        for k in 1..=10 {
            pieces
                .advance(&system, k as f64 * 0.1, no_observer)
                .expect("piece");
        }
        assert_eq!(pieces.current_time(), 1.0);
        for i in 0..2 {
            assert!((whole.current_state()[i] - pieces.current_state()[i]).abs() < 1e-9);
        }
    }

    #[test]
    fn advance_rejects_backwards_end_time() {
        let system = Rotation { omega: 1.0 };
        let mut integrator =
            IntegratorKind::Dopri5.build(IntegratorSettings::default(), &[1.0, 0.0], 1.0);
        assert_err_contains(integrator.advance(&system, 0.5, no_observer), "cannot advance");
        assert_eq!(integrator.advance(&system, 1.0, no_observer), Ok(0));
    }

    #[test]
    fn finite_time_blowup_is_reported() {
        // x' = x^2, x(0) = 1 diverges at t = 1.
        let mut integrator =
            IntegratorKind::Dopri5.build(IntegratorSettings::default(), &[1.0], 0.0);
        let result = integrator.advance(&Blowup, 2.0, no_observer);
        match result {
            Err(IntegrationError::StepSizeTooSmall { t, .. })
            | Err(IntegrationError::NonFiniteState { t }) => {
                assert!(t < 1.0 + 1e-6, "diverged late at t = {t}");
            }
            other => panic!("expected divergence, got {other:?}"),
        }
    }

    #[test]
    fn step_budget_is_enforced() {
        let settings = IntegratorSettings {
            max_steps: 3,
            ..IntegratorSettings::default()
        };
        let system = Rotation { omega: 50.0 };
        let mut integrator = IntegratorKind::Dopri5.build(settings, &[1.0, 0.0], 0.0);
        assert_err_contains(
            integrator.advance(&system, 10.0, no_observer),
            "maximum number of integration steps",
        );
    }

    #[test]
    fn initialize_resets_position_and_counters() {
        let system = Rotation { omega: 1.0 };
        let mut integrator =
            IntegratorKind::Tsit5.build(IntegratorSettings::default(), &[1.0, 0.0], 0.0);
        integrator.advance(&system, 0.3, no_observer).expect("advance");
        integrator.initialize(&[0.0, 1.0], 5.0);
        assert_eq!(integrator.current_time(), 5.0);
        assert_eq!(integrator.previous_time(), 5.0);
        assert_eq!(integrator.current_state(), &[0.0, 1.0]);
        assert_eq!(integrator.steps(), 0);
    }

    #[test]
    fn steps_across_a_kink_are_rejected_and_retried() {
        let mut integrator =
            DenseIntegrator::new(Dopri5::new(1), IntegratorSettings::default(), &[0.0], 0.0);
        assert_eq!(integrator.next_step_size(), None);

        integrator.advance(&Kick, 1.0, no_observer).expect("advance");
        assert!(integrator.rejected_steps() > 0);
        assert!((integrator.current_state()[0] - 0.5).abs() < 1e-9);
        assert!(integrator.next_step_size().is_some_and(|dt| dt > 0.0));

        integrator.initialize(&[0.0], 2.0);
        assert_eq!(integrator.rejected_steps(), 0);
        assert_eq!(integrator.next_step_size(), None);
    }

    #[test]
    fn integrator_kind_parses_names() {
        assert_eq!("dopri5".parse::<IntegratorKind>(), Ok(IntegratorKind::Dopri5));
        assert_eq!(" Tsit5 ".parse::<IntegratorKind>(), Ok(IntegratorKind::Tsit5));
        assert!("rk4".parse::<IntegratorKind>().is_err());
    }
}
