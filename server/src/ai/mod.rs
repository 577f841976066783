//! AI traffic: spline graph, pooled driving identities and the director.

pub mod director;
pub mod obstacle;
pub mod spline;
pub mod state;

pub use director::AiDirector;
pub use obstacle::ObstacleDetector;
pub use spline::{AiSpline, JunctionEvaluator, SplinePoint};
pub use state::AiState;

/// Whether a slot may host AI identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiMode {
    /// Slot never hosts AI.
    None,
    /// Slot is AI-only regardless of occupancy.
    Fixed,
    /// Slot hosts AI while no client occupies it.
    Auto,
}
