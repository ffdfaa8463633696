use thiserror::Error;

/// Failures surfaced while building or differentiating a graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
  /// The backend could not combine two values elementwise
  #[error("shape mismatch: cannot broadcast {lhs:?} with {rhs:?}")]
  ShapeMismatch { lhs: Vec<usize>, rhs: Vec<usize> },

  /// A gradient contribution could not be reduced onto its target
  #[error("cannot accumulate gradient of shape {delta:?} into shape {target:?}")]
  GradientShape {
    target: Vec<usize>,
    delta: Vec<usize>,
  },

  /// Operands of a binary operation were recorded on different tapes
  #[error("operands belong to different tapes")]
  TapeMismatch,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
