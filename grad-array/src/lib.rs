//!
//! # grad-array
//!
//! This crate provides an n-dimensional array backend for the tape, on top of
//! `ndarray`'s dynamically shaped `ArrayD<f64>`.
//!
//! Binary operations follow numpy broadcasting: shapes are aligned from the
//! trailing axis and every pair of dimensions must either match or contain a
//! one. Gradients of broadcast operands are summed back down to the operand's
//! shape, so a gradient always has the shape of its value.
//!

use ndarray::{ArrayD, Axis, IxDyn, Zip};

use lib_grad_core::{self as core, backend, Backend, Error, Result, Seedable};

pub type Tape = core::Tape<ArrayD<f64>, Ndarray>;

pub type Var<'a> = core::Var<'a, ArrayD<f64>, Ndarray>;

/// Backend for `ArrayD<f64>` values
pub struct Ndarray;

impl Seedable<ArrayD<f64>> for Ndarray {
  fn seed(value: &ArrayD<f64>) -> ArrayD<f64> {
    ArrayD::ones(value.raw_dim())
  }
}

impl Backend<ArrayD<f64>> for Ndarray {
  fn zeros_like(value: &ArrayD<f64>) -> ArrayD<f64> {
    ArrayD::zeros(value.raw_dim())
  }

  fn from_scalar(scalar: f64) -> ArrayD<f64> {
    ArrayD::from_elem(IxDyn(&[1]), scalar)
  }

  fn shape(value: &ArrayD<f64>) -> Vec<usize> {
    value.shape().to_vec()
  }

  fn add(a: &ArrayD<f64>, b: &ArrayD<f64>) -> Result<ArrayD<f64>> {
    zip_broadcast(a, b, |x, y| x + y)
  }

  fn mul(a: &ArrayD<f64>, b: &ArrayD<f64>) -> Result<ArrayD<f64>> {
    zip_broadcast(a, b, |x, y| x * y)
  }

  fn accumulate(grad: &mut ArrayD<f64>, delta: &ArrayD<f64>) -> Result<()> {
    if grad.shape() == delta.shape() {
      *grad += delta;
      return Ok(());
    }
    let reduced = sum_to(delta, grad.shape()).ok_or_else(|| Error::GradientShape {
      target: grad.shape().to_vec(),
      delta: delta.shape().to_vec(),
    })?;
    *grad += &reduced;
    Ok(())
  }
}

/// Combine two arrays elementwise after broadcasting both to a common shape
fn zip_broadcast<F>(a: &ArrayD<f64>, b: &ArrayD<f64>, f: F) -> Result<ArrayD<f64>>
where
  F: Fn(f64, f64) -> f64,
{
  let mismatch = || backend::mismatch::<_, Ndarray>(a, b);
  let shape = co_broadcast(a.shape(), b.shape()).ok_or_else(mismatch)?;
  let lhs = a.broadcast(IxDyn(&shape)).ok_or_else(mismatch)?;
  let rhs = b.broadcast(IxDyn(&shape)).ok_or_else(mismatch)?;
  Ok(Zip::from(&lhs).and(&rhs).map_collect(|&x, &y| f(x, y)))
}

/// The shape both operands broadcast to, if there is one
fn co_broadcast(lhs: &[usize], rhs: &[usize]) -> Option<Vec<usize>> {
  let ndim = lhs.len().max(rhs.len());
  // missing leading axes behave as ones
  let dim = |shape: &[usize], axis: usize| {
    let offset = ndim - shape.len();
    if axis < offset {
      1
    } else {
      shape[axis - offset]
    }
  };
  (0..ndim)
    .map(|axis| match (dim(lhs, axis), dim(rhs, axis)) {
      (l, r) if l == r => Some(l),
      (1, r) => Some(r),
      (l, 1) => Some(l),
      _ => None,
    })
    .collect()
}

/// Undo a broadcast: sum `delta` over the leading axes it gained and over the
/// axes that were stretched from one
fn sum_to(delta: &ArrayD<f64>, shape: &[usize]) -> Option<ArrayD<f64>> {
  if delta.ndim() < shape.len() {
    return None;
  }
  let mut out = delta.to_owned();
  while out.ndim() > shape.len() {
    out = out.sum_axis(Axis(0));
  }
  for (axis, &dim) in shape.iter().enumerate() {
    if dim == 1 && out.len_of(Axis(axis)) != 1 {
      out = out.sum_axis(Axis(axis)).insert_axis(Axis(axis));
    }
  }
  (out.shape() == shape).then_some(out)
}
