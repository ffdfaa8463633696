use crate::error::{Error, Result};

/// The gradient a backward pass starts from at its root: ones in the shape of
/// the root's value
pub trait Seedable<T> {
  fn seed(value: &T) -> T;
}

/// The arithmetic a value type must provide for the tape to differentiate it.
///
/// Backends are zero-sized markers so that a crate can describe a foreign
/// array type (an `ndarray` array, a `nalgebra` matrix...) without a newtype.
/// Broadcasting is entirely the backend's business; the engine only relies on
/// two guarantees:
///
/// - `add`/`mul` either succeed or return [`Error::ShapeMismatch`]
/// - `accumulate` sums a contribution computed at a broadcast shape back down
///   to the shape of the gradient it lands in
pub trait Backend<T>: Seedable<T> {
  /// A value of the same shape as `value`, filled with zeros
  fn zeros_like(value: &T) -> T;

  /// Promote a scalar into a one-element value
  fn from_scalar(scalar: f64) -> T;

  /// Dimensions of a value, only used for diagnostics
  fn shape(value: &T) -> Vec<usize>;

  /// Elementwise sum
  fn add(a: &T, b: &T) -> Result<T>;

  /// Elementwise product
  fn mul(a: &T, b: &T) -> Result<T>;

  /// In-place `grad += delta`, reducing any broadcast axes of `delta`
  fn accumulate(grad: &mut T, delta: &T) -> Result<()>;
}

/// Backend for plain `f64` values; every value has the empty shape
pub struct Scalar;

impl Seedable<f64> for Scalar {
  #[inline]
  fn seed(_value: &f64) -> f64 {
    1.0
  }
}

impl Backend<f64> for Scalar {
  #[inline]
  fn zeros_like(_value: &f64) -> f64 {
    0.0
  }

  #[inline]
  fn from_scalar(scalar: f64) -> f64 {
    scalar
  }

  fn shape(_value: &f64) -> Vec<usize> {
    Vec::new()
  }

  #[inline]
  fn add(a: &f64, b: &f64) -> Result<f64> {
    Ok(a + b)
  }

  #[inline]
  fn mul(a: &f64, b: &f64) -> Result<f64> {
    Ok(a * b)
  }

  #[inline]
  fn accumulate(grad: &mut f64, delta: &f64) -> Result<()> {
    *grad += delta;
    Ok(())
  }
}

/// Convenience for backends comparing two shapes before an elementwise op
pub fn mismatch<T, B: Backend<T>>(a: &T, b: &T) -> Error {
  Error::ShapeMismatch {
    lhs: B::shape(a),
    rhs: B::shape(b),
  }
}
