//!
//! # grad-matrix
//!
//! This crate provides a matrix backend for the tape using nalgebra's
//! `DMatrix<f64>`.
//!
//! Matrices combine elementwise when their shapes agree; a 1x1 matrix acts as
//! a scalar against any shape, which is what negation and scalar addition rely
//! on. Anything else is a shape mismatch.
//!

use nalgebra::DMatrix;

use lib_grad_core::{self as core, backend, Backend, Error, Result, Seedable};

pub type Tape = core::Tape<DMatrix<f64>, Matrix>;

pub type Var<'a> = core::Var<'a, DMatrix<f64>, Matrix>;

/// Backend for `DMatrix<f64>` values
pub struct Matrix;

#[inline]
fn as_scalar(m: &DMatrix<f64>) -> Option<f64> {
  (m.shape() == (1, 1)).then(|| m[(0, 0)])
}

impl Seedable<DMatrix<f64>> for Matrix {
  fn seed(value: &DMatrix<f64>) -> DMatrix<f64> {
    DMatrix::from_element(value.nrows(), value.ncols(), 1.0)
  }
}

impl Backend<DMatrix<f64>> for Matrix {
  fn zeros_like(value: &DMatrix<f64>) -> DMatrix<f64> {
    DMatrix::zeros(value.nrows(), value.ncols())
  }

  fn from_scalar(scalar: f64) -> DMatrix<f64> {
    DMatrix::from_element(1, 1, scalar)
  }

  fn shape(value: &DMatrix<f64>) -> Vec<usize> {
    vec![value.nrows(), value.ncols()]
  }

  fn add(a: &DMatrix<f64>, b: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    if a.shape() == b.shape() {
      return Ok(a + b);
    }
    match (as_scalar(a), as_scalar(b)) {
      (Some(s), _) => Ok(b.add_scalar(s)),
      (_, Some(s)) => Ok(a.add_scalar(s)),
      _ => Err(backend::mismatch::<_, Matrix>(a, b)),
    }
  }

  fn mul(a: &DMatrix<f64>, b: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    if a.shape() == b.shape() {
      return Ok(a.component_mul(b));
    }
    match (as_scalar(a), as_scalar(b)) {
      (Some(s), _) => Ok(b * s),
      (_, Some(s)) => Ok(a * s),
      _ => Err(backend::mismatch::<_, Matrix>(a, b)),
    }
  }

  fn accumulate(grad: &mut DMatrix<f64>, delta: &DMatrix<f64>) -> Result<()> {
    if grad.shape() == delta.shape() {
      *grad += delta;
      return Ok(());
    }
    // a scalar operand collects the whole broadcast contribution
    if grad.shape() == (1, 1) {
      grad[(0, 0)] += delta.sum();
      return Ok(());
    }
    Err(Error::GradientShape {
      target: Self::shape(grad),
      delta: Self::shape(delta),
    })
  }
}
