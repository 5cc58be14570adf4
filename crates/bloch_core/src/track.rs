use crate::interpolation::FieldSample;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// Magnetic field and its spatial gradient at one point.
///
/// Rows 0..2 hold `[B_i, dB_i/dx, dB_i/dy, dB_i/dz]` for the three
/// components, row 3 holds the same for the magnitude `|B|`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor(pub [[f64; 4]; 4]);

impl FieldDescriptor {
    /// A homogeneous field with vanishing gradient.
    pub fn uniform(field: [f64; 3]) -> Self {
        Self::with_gradient(field, [[0.0; 3]; 3])
    }

    /// Builds the descriptor from the field and its Jacobian
    /// `gradient[i][j] = dB_i/dx_j`. The magnitude row is derived.
    pub fn with_gradient(field: [f64; 3], gradient: [[f64; 3]; 3]) -> Self {
        let b = Vector3::from(field);
        let magnitude = b.norm();
        let jacobian = Matrix3::from_fn(|i, j| gradient[i][j]);
        // d|B|/dx_j = (B . dB/dx_j) / |B|
        let magnitude_gradient = if magnitude > 0.0 {
            jacobian.transpose() * b / magnitude
        } else {
            Vector3::zeros()
        };

        let mut rows = [[0.0; 4]; 4];
        for i in 0..3 {
            rows[i][0] = field[i];
            rows[i][1..].copy_from_slice(&gradient[i]);
        }
        rows[3][0] = magnitude;
        rows[3][1..].copy_from_slice(magnitude_gradient.as_slice());
        Self(rows)
    }

    pub fn vector(&self) -> Vector3<f64> {
        Vector3::new(self.0[0][0], self.0[1][0], self.0[2][0])
    }

    /// Field magnitude as reported by the field source.
    pub fn magnitude(&self) -> f64 {
        self.0[3][0]
    }

    /// `dB_i/dt = sum_j dB_i/dx_j * v_j` along a path moving with `velocity`.
    pub fn time_derivative(&self, velocity: &Vector3<f64>) -> Vector3<f64> {
        Vector3::from_fn(|i, _| {
            self.0[i][1] * velocity.x + self.0[i][2] * velocity.y + self.0[i][3] * velocity.z
        })
    }
}

/// One sample of the particle trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub time: f64,
    /// Position and velocity `[x, y, z, vx, vy, vz]`.
    pub state: [f64; 6],
    /// Time derivative of `state`.
    pub derivative: [f64; 6],
    pub field: FieldDescriptor,
    pub electric: [f64; 3],
    pub electric_gradient: [[f64; 3]; 3],
}

impl TrackPoint {
    /// A point with no electric field; the derivative is filled from the
    /// velocity with zero acceleration.
    pub fn new(time: f64, position: [f64; 3], velocity: [f64; 3], field: FieldDescriptor) -> Self {
        let mut state = [0.0; 6];
        state[..3].copy_from_slice(&position);
        state[3..].copy_from_slice(&velocity);
        let mut derivative = [0.0; 6];
        derivative[..3].copy_from_slice(&velocity);
        Self {
            time,
            state,
            derivative,
            field,
            electric: [0.0; 3],
            electric_gradient: [[0.0; 3]; 3],
        }
    }

    pub fn with_electric(mut self, electric: [f64; 3], gradient: [[f64; 3]; 3]) -> Self {
        self.electric = electric;
        self.electric_gradient = gradient;
        self
    }

    pub fn position(&self) -> Vector3<f64> {
        Vector3::new(self.state[0], self.state[1], self.state[2])
    }

    pub fn velocity(&self) -> Vector3<f64> {
        Vector3::new(self.state[3], self.state[4], self.state[5])
    }

    /// Field value and its rate of change along the track, taking the
    /// path velocity from the derivative input.
    pub fn field_sample(&self) -> FieldSample {
        let path_velocity = Vector3::new(self.derivative[0], self.derivative[1], self.derivative[2]);
        let rate = self.field.time_derivative(&path_velocity);
        FieldSample {
            time: self.time,
            field: self.field.vector().into(),
            rate: Some(rate.into()),
        }
    }
}

/// Kinematics and electric field at a time between two track points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KinematicSample {
    pub position: [f64; 3],
    pub velocity: [f64; 3],
    pub electric: [f64; 3],
    pub electric_gradient: [[f64; 3]; 3],
}

/// Linear interpolation of everything but the magnetic field between `p1`
/// and `p2`.
pub fn kinematics_at(p1: &TrackPoint, p2: &TrackPoint, t: f64) -> KinematicSample {
    let span = p2.time - p1.time;
    let w = if span > 0.0 {
        ((t - p1.time) / span).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let mix = |a: f64, b: f64| a + w * (b - a);

    let mut sample = KinematicSample {
        position: [0.0; 3],
        velocity: [0.0; 3],
        electric: [0.0; 3],
        electric_gradient: [[0.0; 3]; 3],
    };
    for i in 0..3 {
        sample.position[i] = mix(p1.state[i], p2.state[i]);
        sample.velocity[i] = mix(p1.state[i + 3], p2.state[i + 3]);
        sample.electric[i] = mix(p1.electric[i], p2.electric[i]);
        for j in 0..3 {
            sample.electric_gradient[i][j] =
                mix(p1.electric_gradient[i][j], p2.electric_gradient[i][j]);
        }
    }
    sample
}
