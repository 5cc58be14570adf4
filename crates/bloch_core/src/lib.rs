/// The `bloch_core` crate tracks the spin of a particle through slowly varying
/// magnetic fields by integrating the Bloch equation `dS/dt = gamma S x B`
/// along a trajectory.
///
/// Key components:
/// - **Traits**: `Scalar`, `DynamicalSystem`, `EmbeddedStepper` and the dense-output engine contract.
/// - **Solvers**: Dormand-Prince 5(4) and Tsitouras 5(4) pairs with continuous extensions.
/// - **Dense**: Adaptive step control that exposes the last accepted step for dense queries.
/// - **Interpolation**: Cubic Hermite reconstruction of the field along a track segment.
/// - **Tracker**: The `BFmax`-gated state machine that reports no-flip probabilities.
pub mod bloch;
pub mod config;
pub mod constants;
pub mod dense;
pub mod error;
pub mod interpolation;
pub mod solvers;
pub mod spinlog;
pub mod track;
pub mod tracker;
pub mod traits;

pub use config::{SpinTrackingConfig, TimeWindows};
pub use dense::{Integrator, IntegratorKind, IntegratorSettings};
pub use error::{IntegrationError, SpinError};
pub use spinlog::SpinLog;
pub use track::{FieldDescriptor, TrackPoint};
pub use tracker::{IntervalSummary, SpinTracker, TrackerState};
