use crate::interpolation::FieldInterpolant;
use crate::traits::DynamicalSystem;
use nalgebra::Vector3;

/// `dS/dt = gamma * (S x B(t))` with `B(t)` taken from the segment interpolant.
pub struct BlochEquation<'a> {
    gamma: f64,
    field: &'a FieldInterpolant,
}

impl<'a> BlochEquation<'a> {
    pub fn new(gamma: f64, field: &'a FieldInterpolant) -> Self {
        Self { gamma, field }
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    /// Instantaneous spin derivative at time `t`.
    pub fn derivative(&self, spin: &Vector3<f64>, t: f64) -> Vector3<f64> {
        precession_rate(self.gamma, spin, &self.field.field_at(t))
    }
}

impl DynamicalSystem<f64> for BlochEquation<'_> {
    fn dimension(&self) -> usize {
        3
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) {
        let spin = Vector3::new(x[0], x[1], x[2]);
        let rate = self.derivative(&spin, t);
        out[..3].copy_from_slice(rate.as_slice());
    }
}

/// `gamma * (spin x field)`. A zero field gives a zero vector.
pub fn precession_rate(gamma: f64, spin: &Vector3<f64>, field: &Vector3<f64>) -> Vector3<f64> {
    spin.cross(field) * gamma
}

/// Projection of the spin onto the field direction; `0` for a vanishing field.
pub fn bloch_projection(spin: &Vector3<f64>, field: &Vector3<f64>) -> f64 {
    let norm = field.norm();
    if norm > 0.0 {
        spin.dot(field) / norm
    } else {
        0.0
    }
}

/// Signed angle (right-handed about `axis`) that carries the projection of
/// `before` onto the plane normal to `axis` into that of `after`.
///
/// `axis` must be a unit vector. Returns `0` when either projection vanishes.
pub fn precession_angle(axis: &Vector3<f64>, before: &Vector3<f64>, after: &Vector3<f64>) -> f64 {
    let p0 = before - axis * axis.dot(before);
    let p1 = after - axis * axis.dot(after);
    let sin = axis.dot(&p0.cross(&p1));
    let cos = p0.dot(&p1);
    sin.atan2(cos)
}

/// Length of the part of `spin` perpendicular to the unit `axis`, relative to
/// `|spin|`. `0` for a zero spin.
pub fn transverse_fraction(axis: &Vector3<f64>, spin: &Vector3<f64>) -> f64 {
    let norm = spin.norm();
    if norm > 0.0 {
        (spin - axis * axis.dot(spin)).norm() / norm
    } else {
        0.0
    }
}

/// Probability of staying in the eigenstate along `reference`:
/// `(1 + S . p0) / 2` with `S` normalised, clamped to `[0, 1]`.
pub fn no_flip_probability(spin: &Vector3<f64>, reference: &Vector3<f64>) -> f64 {
    let norm = spin.norm();
    let projection = if norm > 0.0 {
        spin.dot(reference) / norm
    } else {
        0.0
    };
    (0.5 * (1.0 + projection)).clamp(0.0, 1.0)
}
