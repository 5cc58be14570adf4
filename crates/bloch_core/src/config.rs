use crate::dense::{IntegratorKind, IntegratorSettings};
use crate::error::SpinError;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::warn;

pub const DEFAULT_SPIN_LOG_INTERVAL: f64 = 5e-7;

/// Absolute time windows `[start, end]` inside which spin tracking may run.
/// No windows means tracking is allowed at any time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeWindows(Vec<(f64, f64)>);

impl TimeWindows {
    /// Builds windows from a flat list of `start end` pairs.
    pub fn from_bounds(bounds: &[f64]) -> Result<Self, SpinError> {
        if bounds.len() % 2 != 0 {
            return Err(SpinError::config(
                "BFtimes",
                format!("expected pairs of times, got {} values", bounds.len()),
            ));
        }
        let mut windows = Vec::with_capacity(bounds.len() / 2);
        for pair in bounds.chunks_exact(2) {
            let (start, end) = (pair[0], pair[1]);
            if start.is_nan() || end.is_nan() || start > end {
                return Err(SpinError::config(
                    "BFtimes",
                    format!("window [{start}, {end}] is not ordered"),
                ));
            }
            windows.push((start, end));
        }
        Ok(Self(windows))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn windows(&self) -> &[(f64, f64)] {
        &self.0
    }

    /// True if `[t1, t2]` lies inside one of the windows.
    pub fn contains(&self, t1: f64, t2: f64) -> bool {
        self.0.is_empty() || self.0.iter().any(|&(start, end)| t1 >= start && t2 <= end)
    }
}

/// Options controlling when and how spins are tracked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpinTrackingConfig {
    /// Tracking runs only while the field magnitude is strictly below this value [T].
    pub b_max: f64,
    pub windows: TimeWindows,
    pub spin_log: bool,
    /// Spacing of spin log rows [s].
    pub spin_log_interval: f64,
    /// Initial spin direction and reference axis of the no-flip probability.
    pub start_polarization: [f64; 3],
    pub integrator: IntegratorKind,
    pub settings: IntegratorSettings,
}

impl Default for SpinTrackingConfig {
    fn default() -> Self {
        Self {
            b_max: 0.0,
            windows: TimeWindows::default(),
            spin_log: false,
            spin_log_interval: DEFAULT_SPIN_LOG_INTERVAL,
            start_polarization: [0.0, 0.0, 1.0],
            integrator: IntegratorKind::default(),
            settings: IntegratorSettings::default(),
        }
    }
}

impl SpinTrackingConfig {
    /// Reads the recognised options; unknown keys are ignored.
    pub fn from_options(options: &BTreeMap<String, String>) -> Result<Self, SpinError> {
        let mut config = Self::default();

        match parse_value::<f64>(options, "BFmax")? {
            Some(b_max) => config.b_max = b_max,
            None => warn!("option BFmax not set; spin tracking stays disabled"),
        }
        if let Some(raw) = options.get("BFtimes") {
            let bounds = parse_list(raw, "BFtimes")?;
            config.windows = TimeWindows::from_bounds(&bounds)?;
        }
        if let Some(raw) = options.get("spinlog") {
            config.spin_log = parse_bool(raw, "spinlog")?;
        }
        if let Some(interval) = parse_value::<f64>(options, "spinloginterval")? {
            config.spin_log_interval = interval;
        }
        if let Some(raw) = options.get("startpolarization") {
            let components = parse_list(raw, "startpolarization")?;
            let [x, y, z] = <[f64; 3]>::try_from(components.as_slice()).map_err(|_| {
                SpinError::config(
                    "startpolarization",
                    format!("expected three components, got {}", components.len()),
                )
            })?;
            config.start_polarization = [x, y, z];
        }
        if let Some(kind) = options.get("spinintegrator") {
            config.integrator = kind
                .parse::<IntegratorKind>()
                .map_err(|e| SpinError::config("spinintegrator", e))?;
        }
        if let Some(atol) = parse_value::<f64>(options, "spinabstol")? {
            config.settings.abs_tolerance = atol;
        }
        if let Some(rtol) = parse_value::<f64>(options, "spinreltol")? {
            config.settings.rel_tolerance = rtol;
        }
        if let Some(max_steps) = parse_value::<usize>(options, "spinmaxsteps")? {
            config.settings.max_steps = max_steps;
        }

        config.validate()?;

        let norm = Vector3::from(config.start_polarization).norm();
        if (norm - 1.0).abs() > 1e-9 {
            warn!(norm, "startpolarization is not a unit vector; normalising");
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SpinError> {
        if !self.b_max.is_finite() || self.b_max < 0.0 {
            return Err(SpinError::config(
                "BFmax",
                format!("must be a finite, non-negative field, got {}", self.b_max),
            ));
        }
        if !self.spin_log_interval.is_finite() || self.spin_log_interval <= 0.0 {
            return Err(SpinError::config(
                "spinloginterval",
                format!("must be positive, got {}", self.spin_log_interval),
            ));
        }
        let axis = Vector3::from(self.start_polarization);
        if !axis.iter().all(|c| c.is_finite()) || axis.norm() == 0.0 {
            return Err(SpinError::config(
                "startpolarization",
                "must be a finite, non-zero vector",
            ));
        }
        for (option, tol) in [
            ("spinabstol", self.settings.abs_tolerance),
            ("spinreltol", self.settings.rel_tolerance),
        ] {
            if !tol.is_finite() || tol <= 0.0 {
                return Err(SpinError::config(option, format!("must be positive, got {tol}")));
            }
        }
        if self.settings.max_steps == 0 {
            return Err(SpinError::config("spinmaxsteps", "must be greater than zero"));
        }
        Ok(())
    }

    /// Unit reference axis `p0`.
    pub fn polarization_axis(&self) -> Vector3<f64> {
        Vector3::from(self.start_polarization).normalize()
    }
}

fn parse_value<T: FromStr>(
    options: &BTreeMap<String, String>,
    key: &str,
) -> Result<Option<T>, SpinError> {
    match options.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| SpinError::config(key, format!("cannot parse \"{raw}\""))),
    }
}

fn parse_list(raw: &str, key: &str) -> Result<Vec<f64>, SpinError> {
    raw.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty())
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|_| SpinError::config(key, format!("cannot parse \"{token}\"")))
        })
        .collect()
}

fn parse_bool(raw: &str, key: &str) -> Result<bool, SpinError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(SpinError::config(key, format!("expected a boolean, got \"{other}\""))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn assert_config_error(result: Result<SpinTrackingConfig, SpinError>, option: &str) {
        match result {
            Err(SpinError::Configuration { option: got, .. }) => assert_eq!(got, option),
            other => panic!("expected configuration error for {option}, got {other:?}"),
        }
    }

    #[test]
    fn defaults_when_options_are_absent() {
        let config = SpinTrackingConfig::from_options(&BTreeMap::new()).expect("defaults");
        assert_eq!(config, SpinTrackingConfig::default());
        assert_eq!(config.b_max, 0.0);
        assert!(config.windows.is_empty());
    }

    #[test]
    fn parses_all_recognised_options() {
        let config = SpinTrackingConfig::from_options(&options(&[
            ("BFmax", "1e-6"),
            ("BFtimes", "0 10, 20 30"),
            ("spinlog", "1"),
            ("spinloginterval", "1e-3"),
            ("startpolarization", "0 2 0"),
            ("spinintegrator", "tsit5"),
            ("spinabstol", "1e-10"),
            ("spinreltol", "1e-9"),
            ("spinmaxsteps", "5000"),
        ]))
        .expect("valid options");

        assert_eq!(config.b_max, 1e-6);
        assert_eq!(config.windows.windows(), &[(0.0, 10.0), (20.0, 30.0)]);
        assert!(config.spin_log);
        assert_eq!(config.spin_log_interval, 1e-3);
        assert_eq!(config.polarization_axis(), Vector3::y());
        assert_eq!(config.integrator, IntegratorKind::Tsit5);
        assert_eq!(config.settings.abs_tolerance, 1e-10);
        assert_eq!(config.settings.rel_tolerance, 1e-9);
        assert_eq!(config.settings.max_steps, 5000);
    }

    #[test]
    fn rejects_malformed_options() {
        assert_config_error(
            SpinTrackingConfig::from_options(&options(&[("BFmax", "low")])),
            "BFmax",
        );
        assert_config_error(
            SpinTrackingConfig::from_options(&options(&[("BFmax", "-1e-6")])),
            "BFmax",
        );
        assert_config_error(
            SpinTrackingConfig::from_options(&options(&[("BFtimes", "0 1 2")])),
            "BFtimes",
        );
        assert_config_error(
            SpinTrackingConfig::from_options(&options(&[("BFtimes", "5 1")])),
            "BFtimes",
        );
        assert_config_error(
            SpinTrackingConfig::from_options(&options(&[("spinlog", "maybe")])),
            "spinlog",
        );
        assert_config_error(
            SpinTrackingConfig::from_options(&options(&[("spinloginterval", "0")])),
            "spinloginterval",
        );
        assert_config_error(
            SpinTrackingConfig::from_options(&options(&[("startpolarization", "1 0")])),
            "startpolarization",
        );
        assert_config_error(
            SpinTrackingConfig::from_options(&options(&[("startpolarization", "0 0 0")])),
            "startpolarization",
        );
        assert_config_error(
            SpinTrackingConfig::from_options(&options(&[("spinintegrator", "euler")])),
            "spinintegrator",
        );
        assert_config_error(
            SpinTrackingConfig::from_options(&options(&[("spinmaxsteps", "0")])),
            "spinmaxsteps",
        );
    }

    #[test]
    fn time_windows_contain_whole_segments_only() {
        let windows = TimeWindows::from_bounds(&[1.0, 2.0, 5.0, 6.0]).expect("windows");
        assert!(windows.contains(1.0, 2.0));
        assert!(windows.contains(5.5, 5.75));
        assert!(!windows.contains(1.5, 2.5));
        assert!(!windows.contains(3.0, 4.0));
        assert!(TimeWindows::default().contains(-1e9, 1e9));
    }
}
