//!
//! # grad
//!
//! ## Core API
//!
//! Reverse-mode automatic differentiation over a tape of nodes. Values are
//! recorded as leaves, combined with `+`, `*`, unary `-` and `+ f64`, and
//! [`Var::backward`] accumulates the gradient of the chosen root into every
//! node it depends on.
//!
//! The value type is pluggable through [`Backend`]; the core ships a plain
//! `f64` backend ([`Scalar`]) and two optional ones:
//!
//! - `array` (default feature): `ndarray::ArrayD<f64>` with broadcasting
//! - `matrix`: `nalgebra::DMatrix<f64>`
//!
//! ```
//! # #[cfg(feature = "array")]
//! # {
//! use lib_grad::array::Tape;
//! use ndarray::array;
//!
//! let tape = Tape::new();
//! let x = tape.leaf(array![2.0].into_dyn());
//! let y = tape.leaf(array![3.0].into_dyn());
//! let w = &(&x + &y) * &x;
//! w.backward()?;
//! assert_eq!(x.grad(), array![7.0].into_dyn());
//! assert_eq!(y.grad(), array![2.0].into_dyn());
//! # }
//! # Ok::<(), lib_grad::Error>(())
//! ```
//!

pub use lib_grad_core::*;

#[cfg(feature = "array")]
pub use lib_grad_array as array;

#[cfg(feature = "matrix")]
pub use lib_grad_matrix as matrix;
