use crate::bloch::{
    bloch_projection, no_flip_probability, precession_angle, transverse_fraction, BlochEquation,
};
use crate::config::SpinTrackingConfig;
use crate::dense::Integrator;
use crate::error::{IntegrationError, SpinError};
use crate::interpolation::FieldInterpolant;
use crate::spinlog::{SpinLog, SpinRecord};
use crate::track::{kinematics_at, TrackPoint};
use crate::traits::{DenseOutput, DenseView};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use tracing::{debug, trace};

/// Below this fraction of the spin perpendicular to the start field, the
/// precession phase is undefined.
const MIN_TRANSVERSE: f64 = 1e-9;

/// Failure inside one segment, before it is attributed to the particle.
#[derive(Debug)]
enum SegmentFailure {
    Integration(IntegrationError),
    Log(io::Error),
}

impl From<IntegrationError> for SegmentFailure {
    fn from(err: IntegrationError) -> Self {
        SegmentFailure::Integration(err)
    }
}

impl From<io::Error> for SegmentFailure {
    fn from(err: io::Error) -> Self {
        SegmentFailure::Log(err)
    }
}

/// Diagnostics of a closed tracking interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalSummary {
    pub start_time: f64,
    pub end_time: f64,
    /// Accepted integrator steps.
    pub steps: usize,
    pub min_field: f64,
    pub larmor_frequency: Option<f64>,
    pub bloch_polarization: f64,
    pub spin: [f64; 3],
    pub no_flip_probability: f64,
}

/// An open span during which the field stayed below `BFmax`.
pub struct TrackingInterval {
    start_time: f64,
    start_field: Vector3<f64>,
    /// Unit start field direction, the reference for the precession phase.
    phase_axis: Option<Vector3<f64>>,
    min_field: f64,
    integrator: Integrator,
    steps: usize,
    phase: f64,
    /// Set once a step had a measurable spin component across the start field.
    precessing: bool,
    tracked_time: f64,
    log_index: u64,
    bloch_polarization: f64,
}

impl TrackingInterval {
    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn start_field(&self) -> Vector3<f64> {
        self.start_field
    }

    /// Smallest field magnitude seen at any track point of this interval.
    pub fn min_field(&self) -> f64 {
        self.min_field
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn end_time(&self) -> f64 {
        self.integrator.current_time()
    }

    pub fn bloch_polarization(&self) -> f64 {
        self.bloch_polarization
    }

    /// Precession phase accumulated about the start field direction per
    /// tracked second, signed so that a constant field gives `gamma * |B|`.
    /// `None` before the first accepted step, for a zero start field, and
    /// while the spin has stayed parallel to the start field.
    pub fn larmor_frequency(&self) -> Option<f64> {
        if self.phase_axis.is_none()
            || !self.precessing
            || self.steps == 0
            || self.tracked_time <= 0.0
        {
            return None;
        }
        Some(-self.phase / self.tracked_time)
    }
}

/// Whether a tracking interval is open.
pub enum TrackerState {
    Idle,
    Tracking(Box<TrackingInterval>),
}

/// Tracks the spin of one particle. Each particle needs its own tracker.
///
/// The Bloch equation is integrated while the field magnitude stays below
/// `BFmax`; the spin vector survives between tracking intervals.
pub struct SpinTracker<'a> {
    gamma: f64,
    particle: String,
    config: SpinTrackingConfig,
    reference: Vector3<f64>,
    spin: Vector3<f64>,
    state: TrackerState,
    log: Option<SpinLog<'a>>,
    last_interval: Option<IntervalSummary>,
}

impl<'a> SpinTracker<'a> {
    /// Creates a tracker whose spin starts along `start_polarization`.
    ///
    /// `log` is only kept when the configuration enables spin logging.
    pub fn new(
        gamma: f64,
        particle: impl Into<String>,
        config: SpinTrackingConfig,
        log: Option<SpinLog<'a>>,
    ) -> Result<Self, SpinError> {
        config.validate()?;
        if !gamma.is_finite() {
            return Err(SpinError::config(
                "gamma",
                format!("gyromagnetic ratio must be finite, got {gamma}"),
            ));
        }
        if config.spin_log && log.is_none() {
            return Err(SpinError::MissingLogStream);
        }
        let log = if config.spin_log { log } else { None };
        let reference = config.polarization_axis();

        Ok(Self {
            gamma,
            particle: particle.into(),
            config,
            reference,
            spin: reference,
            state: TrackerState::Idle,
            log,
            last_interval: None,
        })
    }

    pub fn from_options(
        gamma: f64,
        particle: impl Into<String>,
        options: &BTreeMap<String, String>,
        log: Option<SpinLog<'a>>,
    ) -> Result<Self, SpinError> {
        let config = SpinTrackingConfig::from_options(options)?;
        Self::new(gamma, particle, config, log)
    }

    /// Processes one trajectory segment.
    ///
    /// Returns the no-flip probability of the interval this call closes, and
    /// `1.0` otherwise. An integration failure abandons the open interval and
    /// leaves the spin at its value after the last completed segment.
    pub fn integrate(&mut self, p1: &TrackPoint, p2: &TrackPoint) -> Result<f64, SpinError> {
        if p2.time < p1.time {
            return Err(SpinError::InvalidSegment {
                t1: p1.time,
                t2: p2.time,
            });
        }

        if !self.is_trackable(p1, p2) {
            return Ok(self.finish());
        }

        if matches!(self.state, TrackerState::Idle) {
            self.open(p1);
        }

        if let Err(failure) = self.track_segment(p1, p2) {
            self.state = TrackerState::Idle;
            return Err(match failure {
                SegmentFailure::Integration(source) => SpinError::IntegrationDivergence {
                    particle: self.particle.clone(),
                    source,
                },
                SegmentFailure::Log(source) => SpinError::Log {
                    particle: self.particle.clone(),
                    source,
                },
            });
        }
        Ok(1.0)
    }

    /// Closes the open interval, if any, and returns its no-flip probability.
    /// Call at the end of a trajectory that ends inside a low-field region.
    pub fn finish(&mut self) -> f64 {
        let TrackerState::Tracking(interval) = std::mem::replace(&mut self.state, TrackerState::Idle)
        else {
            return 1.0;
        };

        let probability = no_flip_probability(&self.spin, &self.reference);
        let summary = IntervalSummary {
            start_time: interval.start_time,
            end_time: interval.end_time(),
            steps: interval.steps,
            min_field: interval.min_field,
            larmor_frequency: interval.larmor_frequency(),
            bloch_polarization: interval.bloch_polarization,
            spin: self.spin.into(),
            no_flip_probability: probability,
        };
        debug!(
            particle = %self.particle,
            start = summary.start_time,
            end = summary.end_time,
            steps = summary.steps,
            min_field = summary.min_field,
            probability,
            "finished spin tracking"
        );
        self.last_interval = Some(summary);
        probability
    }

    /// Both ends below `BFmax` (strictly) and the segment inside a `BFtimes` window.
    pub fn is_trackable(&self, p1: &TrackPoint, p2: &TrackPoint) -> bool {
        let b_max = self.config.b_max;
        p1.field.magnitude() < b_max
            && p2.field.magnitude() < b_max
            && self.config.windows.contains(p1.time, p2.time)
    }

    fn open(&mut self, p1: &TrackPoint) {
        let start_field = p1.field.vector();
        let integrator =
            self.config
                .integrator
                .build(self.config.settings, self.spin.as_slice(), p1.time);
        debug!(
            particle = %self.particle,
            t = p1.time,
            field = p1.field.magnitude(),
            "starting spin tracking"
        );
        self.state = TrackerState::Tracking(Box::new(TrackingInterval {
            start_time: p1.time,
            start_field,
            phase_axis: start_field.try_normalize(0.0),
            min_field: p1.field.magnitude(),
            integrator,
            steps: 0,
            phase: 0.0,
            precessing: false,
            tracked_time: 0.0,
            log_index: 0,
            bloch_polarization: bloch_projection(&self.spin, &start_field),
        }));
    }

    fn track_segment(&mut self, p1: &TrackPoint, p2: &TrackPoint) -> Result<(), SegmentFailure> {
        let Self {
            gamma,
            particle,
            config,
            spin,
            state,
            log,
            ..
        } = self;
        let TrackerState::Tracking(interval) = state else {
            return Ok(());
        };
        let interval: &mut TrackingInterval = interval;

        interval.min_field = interval
            .min_field
            .min(p1.field.magnitude())
            .min(p2.field.magnitude());
        if p2.time <= p1.time {
            return Ok(());
        }

        if interval.integrator.current_time() != p1.time {
            trace!(
                from = interval.integrator.current_time(),
                to = p1.time,
                "realigning spin integrator with track"
            );
            interval.integrator.initialize(spin.as_slice(), p1.time);
        }

        let interpolant = FieldInterpolant::new(&p1.field_sample(), &p2.field_sample());
        let system = BlochEquation::new(*gamma, &interpolant);
        let particle = particle.as_str();
        let log_interval = config.spin_log_interval;

        let TrackingInterval {
            start_time,
            phase_axis,
            integrator,
            phase,
            precessing,
            log_index,
            ..
        } = &mut *interval;

        let taken = integrator.advance(
            &system,
            p2.time,
            |step: &dyn DenseView<f64>| -> Result<(), SegmentFailure> {
                if let Some(axis) = phase_axis.as_ref() {
                    let before = Vector3::from_column_slice(step.previous_state());
                    let after = Vector3::from_column_slice(step.current_state());
                    if transverse_fraction(axis, &before) > MIN_TRANSVERSE
                        && transverse_fraction(axis, &after) > MIN_TRANSVERSE
                    {
                        *precessing = true;
                    }
                    *phase += precession_angle(axis, &before, &after);
                }

                if let Some(log) = log.as_mut() {
                    let mut sample = [0.0; 3];
                    let (begin, end) = (step.previous_time(), step.current_time());
                    // rows whose nominal time rounds just past the step end belong to it
                    let slack = 1e-9 * (end - begin);
                    loop {
                        let nominal = *start_time + *log_index as f64 * log_interval;
                        if nominal > end + slack {
                            break;
                        }
                        if nominal >= begin - slack {
                            let t = nominal.clamp(begin, end);
                            step.calc_state(t, &mut sample)?;
                            log.write_record(&SpinRecord {
                                particle,
                                time: t,
                                spin: sample,
                                kinematics: kinematics_at(p1, p2, t),
                                field: interpolant.field_at(t).into(),
                            })?;
                        }
                        *log_index += 1;
                    }
                }
                Ok(())
            },
        )?;

        interval.steps += taken;
        interval.tracked_time += p2.time - p1.time;
        *spin = Vector3::from_column_slice(interval.integrator.current_state());
        interval.bloch_polarization = bloch_projection(spin, &interpolant.field_at(p2.time));
        trace!(particle = %particle, t = p2.time, steps = taken, "integrated spin segment");
        Ok(())
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    pub fn particle(&self) -> &str {
        &self.particle
    }

    pub fn config(&self) -> &SpinTrackingConfig {
        &self.config
    }

    /// Current spin vector; frozen while no interval is open.
    pub fn spin(&self) -> Vector3<f64> {
        self.spin
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    pub fn is_tracking(&self) -> bool {
        matches!(self.state, TrackerState::Tracking(_))
    }

    pub fn last_interval(&self) -> Option<&IntervalSummary> {
        self.last_interval.as_ref()
    }

    fn open_interval(&self) -> Option<&TrackingInterval> {
        match &self.state {
            TrackerState::Tracking(interval) => Some(interval),
            TrackerState::Idle => None,
        }
    }

    /// Larmor frequency of the open interval, else of the last closed one.
    pub fn larmor_frequency(&self) -> Option<f64> {
        match self.open_interval() {
            Some(interval) => interval.larmor_frequency(),
            None => self.last_interval.as_ref()?.larmor_frequency,
        }
    }

    /// Projection of the spin onto the field at the end of the latest segment.
    pub fn bloch_polarization(&self) -> Option<f64> {
        match self.open_interval() {
            Some(interval) => Some(interval.bloch_polarization),
            None => self.last_interval.as_ref().map(|s| s.bloch_polarization),
        }
    }

    pub fn min_field(&self) -> Option<f64> {
        match self.open_interval() {
            Some(interval) => Some(interval.min_field),
            None => self.last_interval.as_ref().map(|s| s.min_field),
        }
    }

    pub fn steps(&self) -> usize {
        match self.open_interval() {
            Some(interval) => interval.steps,
            None => self.last_interval.as_ref().map_or(0, |s| s.steps),
        }
    }

    /// Rows written to the spin log so far.
    pub fn log_rows(&self) -> usize {
        self.log.as_ref().map_or(0, SpinLog::rows)
    }
}
