//!
//! # grad-core
//!
//! A reverse-mode automatic differentiation engine over an arena of nodes.
//!
//! ## Graph model
//!
//! Every value lives in a node on a [`Tape`]. A node knows its forward value,
//! its accumulated gradient and the operation that produced it; the operation
//! doubles as the node's backward rule and as its (ordered) list of
//! dependencies. Dependencies are plain indices into the arena, and a node can
//! only point at slots that were filled before it, so the graph is a DAG by
//! construction.
//!
//! [`Var`] is a cheap `Copy` handle to a node, borrowing its tape; the borrow
//! guarantees a handle never outlives the nodes it refers to.
//!
//! ## Gradients
//!
//! [`Var::backward`] seeds the root with ones and walks the reachable subgraph
//! in reverse topological order, adding every contribution into the gradients
//! stored on the tape. Gradients accumulate across calls; use
//! [`Tape::zero_grad`] or [`Var::zero_grad`] to start over.
//!

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Add, Mul, Neg};
use std::ptr;

use rustc_hash::{FxHashMap, FxHashSet};

use smallvec::{smallvec, SmallVec};

use tracing::{debug, debug_span, trace};

pub mod backend;
pub mod error;

pub use backend::{Backend, Scalar, Seedable};
pub use error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct NodeIndex(usize);

/// Which operation produced a node, and therefore how it propagates gradients
/// to its dependencies (operands in argument order)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
  Leaf,
  Add(NodeIndex, NodeIndex),
  Mul(NodeIndex, NodeIndex),
}

impl Op {
  #[inline]
  fn dependencies(&self) -> SmallVec<[NodeIndex; 2]> {
    match *self {
      Op::Leaf => SmallVec::new(),
      Op::Add(a, b) | Op::Mul(a, b) => smallvec![a, b],
    }
  }

  /// Diagnostic label, never used for dispatch
  #[inline]
  fn symbol(&self) -> &'static str {
    match self {
      Op::Leaf => "",
      Op::Add(..) => "+",
      Op::Mul(..) => "*",
    }
  }
}

struct Node<T> {
  value: T,
  grad: T,
  op: Op,
}

/// The arena (Wengert list) holding every node of a computation graph.
///
/// Nodes are only ever appended; the whole tape is released at once when it
/// is cleared or dropped.
pub struct Tape<T, B> {
  nodes: RefCell<Vec<Node<T>>>,
  phantom: PhantomData<B>,
}

impl<T, B> Tape<T, B>
where
  B: Backend<T>,
{
  pub fn new() -> Self {
    Self {
      nodes: RefCell::new(Vec::new()),
      phantom: PhantomData,
    }
  }

  /// Preallocate room for `capacity` nodes
  pub fn with_capacity(capacity: usize) -> Self {
    Self {
      nodes: RefCell::new(Vec::with_capacity(capacity)),
      phantom: PhantomData,
    }
  }

  /// Record a leaf: the given value, a zero gradient, no dependencies
  #[inline]
  pub fn leaf(&self, value: T) -> Var<'_, T, B> {
    self.push(value, Op::Leaf)
  }

  /// Number of nodes recorded so far
  pub fn len(&self) -> usize {
    self.nodes.borrow().len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.borrow().is_empty()
  }

  /// Reset the gradient of every node on the tape to zeros
  pub fn zero_grad(&self) {
    for node in self.nodes.borrow_mut().iter_mut() {
      node.grad = B::zeros_like(&node.value);
    }
  }

  /// Drop every node; exclusive access means no `Var` can still be around
  pub fn clear(&mut self) {
    self.nodes.get_mut().clear();
  }

  #[inline]
  fn push(&self, value: T, op: Op) -> Var<'_, T, B> {
    let grad = B::zeros_like(&value);
    let mut nodes = self.nodes.borrow_mut();
    let index = NodeIndex(nodes.len());
    nodes.push(Node { value, grad, op });
    Var { index, tape: self }
  }
}

impl<T, B> Default for Tape<T, B>
where
  B: Backend<T>,
{
  fn default() -> Self {
    Self::new()
  }
}

impl<T, B> fmt::Debug for Tape<T, B> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Tape")
      .field("nodes", &self.nodes.borrow().len())
      .finish()
  }
}

/// A handle to a node recorded on a [`Tape`]
pub struct Var<'tape, T, B> {
  index: NodeIndex,
  tape: &'tape Tape<T, B>,
}

impl<T, B> Clone for Var<'_, T, B> {
  #[inline(always)]
  fn clone(&self) -> Self {
    *self
  }
}

impl<T, B> Copy for Var<'_, T, B> {}

impl<T, B> PartialEq for Var<'_, T, B> {
  fn eq(&self, other: &Self) -> bool {
    self.index == other.index && ptr::eq(self.tape, other.tape)
  }
}

impl<T, B> Eq for Var<'_, T, B> {}

impl<'tape, T, B> Var<'tape, T, B>
where
  B: Backend<T>,
{
  /// Position of this node on its tape
  #[inline(always)]
  pub fn index(&self) -> usize {
    self.index.0
  }

  /// The forward value, materialized when the node was recorded
  pub fn value(&self) -> T
  where
    T: Clone,
  {
    self.tape.nodes.borrow()[self.index.0].value.clone()
  }

  /// The gradient accumulated so far (zeros until a backward pass reaches it)
  pub fn grad(&self) -> T
  where
    T: Clone,
  {
    self.tape.nodes.borrow()[self.index.0].grad.clone()
  }

  pub fn shape(&self) -> Vec<usize> {
    B::shape(&self.tape.nodes.borrow()[self.index.0].value)
  }

  /// Operator tag of the producing operation, `""` for leaves
  pub fn op(&self) -> &'static str {
    self.tape.nodes.borrow()[self.index.0].op.symbol()
  }

  pub fn is_leaf(&self) -> bool {
    self.tape.nodes.borrow()[self.index.0].op == Op::Leaf
  }

  /// Direct dependencies in the argument order of the producing operation
  pub fn dependencies(&self) -> Vec<Self> {
    let deps = self.tape.nodes.borrow()[self.index.0].op.dependencies();
    deps.into_iter().map(|index| self.at(index)).collect()
  }

  /// Elementwise `self + other`
  #[inline]
  pub fn try_add(&self, other: &Self) -> Result<Self> {
    self.binary_op(other, B::add, Op::Add)
  }

  /// Elementwise `self * other`
  #[inline]
  pub fn try_mul(&self, other: &Self) -> Result<Self> {
    self.binary_op(other, B::mul, Op::Mul)
  }

  /// Add a scalar, recorded as a fresh one-element leaf
  #[inline]
  pub fn try_add_scalar(&self, scalar: f64) -> Result<Self> {
    let scalar = self.tape.leaf(B::from_scalar(scalar));
    self.try_add(&scalar)
  }

  /// Multiply by a fresh leaf holding `-1`
  #[inline]
  pub fn try_neg(&self) -> Result<Self> {
    let minus_one = self.tape.leaf(B::from_scalar(-1.0));
    self.try_mul(&minus_one)
  }

  /// Reset this node's gradient to zeros
  pub fn zero_grad(&self) {
    let mut nodes = self.tape.nodes.borrow_mut();
    let node = &mut nodes[self.index.0];
    node.grad = B::zeros_like(&node.value);
  }

  /// Reverse-mode differentiation of everything reachable from `self`.
  ///
  /// A pass seeds `self` with ones, pulls the seed back through the subgraph
  /// and then adds what reached each node into its stored gradient. Nothing is
  /// ever overwritten: calling this twice without zeroing doubles every
  /// gradient of the subgraph, the root's included.
  pub fn backward(&self) -> Result<()>
  where
    T: Clone,
  {
    let mut nodes = self.tape.nodes.borrow_mut();
    let order = topological_order(&nodes, self.index);
    let _span = debug_span!("backward", root = self.index.0, reachable = order.len()).entered();

    // gradients of this pass only, keyed by node
    let mut upstream: FxHashMap<NodeIndex, T> = FxHashMap::default();
    upstream.reserve(order.len());
    if let Some(root) = nodes.get(self.index.0) {
      upstream.insert(self.index, B::seed(&root.value));
    }

    for &index in order.iter().rev() {
      // read phase, every dependent of `index` has already been applied
      let grad = match upstream.get(&index) {
        Some(grad) => grad,
        None => continue,
      };

      // compute phase
      let deltas = pullback::<T, B>(&nodes, index, grad)?;

      // write phase
      for (dep, delta) in deltas {
        let Some(target) = nodes.get(dep.0) else {
          trace!(node = dep.0, "skipping unresolvable dependency");
          continue;
        };
        let acc = upstream
          .entry(dep)
          .or_insert_with(|| B::zeros_like(&target.value));
        B::accumulate(acc, &delta)?;
      }
    }

    for (index, grad) in upstream {
      if let Some(node) = nodes.get_mut(index.0) {
        B::accumulate(&mut node.grad, &grad)?;
      }
    }
    Ok(())
  }

  /// The order the engine visits the subgraph of `self` in: every node comes
  /// after all of its dependencies, and each node shows up once
  pub fn topological_order(&self) -> Vec<Self> {
    let order = topological_order(&self.tape.nodes.borrow(), self.index);
    order.into_iter().map(|index| self.at(index)).collect()
  }

  #[inline(always)]
  fn at(&self, index: NodeIndex) -> Self {
    Var {
      index,
      tape: self.tape,
    }
  }

  #[inline]
  fn binary_op(
    &self,
    other: &Self,
    forward: fn(&T, &T) -> Result<T>,
    op: fn(NodeIndex, NodeIndex) -> Op,
  ) -> Result<Self> {
    if !ptr::eq(self.tape, other.tape) {
      return Err(Error::TapeMismatch);
    }
    let op = op(self.index, other.index);
    let value = {
      let nodes = self.tape.nodes.borrow();
      forward(&nodes[self.index.0].value, &nodes[other.index.0].value)
    }
    .inspect_err(|err| debug!(%err, op = op.symbol(), "operation rejected"))?;
    Ok(self.tape.push(value, op))
  }
}

impl<T, B> fmt::Debug for Var<'_, T, B> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Var").field("index", &self.index.0).finish()
  }
}

impl<T, B> fmt::Display for Var<'_, T, B>
where
  T: fmt::Display,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let nodes = self.tape.nodes.borrow();
    let node = &nodes[self.index.0];
    write!(
      f,
      "Var(value={}, grad={}, op={})",
      node.value,
      node.grad,
      node.op.symbol()
    )
  }
}

/// Operator sugar over the `try_*` constructors.
///
/// # Panics
///
/// On a shape mismatch (or operands from different tapes), the same way array
/// libraries panic on incompatible operands.
impl<'tape, T, B> Add<&Var<'tape, T, B>> for &Var<'tape, T, B>
where
  B: Backend<T>,
{
  type Output = Var<'tape, T, B>;

  #[inline]
  fn add(self, other: &Var<'tape, T, B>) -> Self::Output {
    self.try_add(other).unwrap_or_else(|err| panic!("{err}"))
  }
}

impl<'tape, T, B> Add<f64> for &Var<'tape, T, B>
where
  B: Backend<T>,
{
  type Output = Var<'tape, T, B>;

  #[inline]
  fn add(self, other: f64) -> Self::Output {
    self
      .try_add_scalar(other)
      .unwrap_or_else(|err| panic!("{err}"))
  }
}

impl<'tape, T, B> Add<f64> for Var<'tape, T, B>
where
  B: Backend<T>,
{
  type Output = Var<'tape, T, B>;

  #[inline(always)]
  fn add(self, other: f64) -> Self::Output {
    (&self).add(other)
  }
}

impl<'tape, T, B> Mul<&Var<'tape, T, B>> for &Var<'tape, T, B>
where
  B: Backend<T>,
{
  type Output = Var<'tape, T, B>;

  #[inline]
  fn mul(self, other: &Var<'tape, T, B>) -> Self::Output {
    self.try_mul(other).unwrap_or_else(|err| panic!("{err}"))
  }
}

impl<'tape, T, B> Neg for &Var<'tape, T, B>
where
  B: Backend<T>,
{
  type Output = Var<'tape, T, B>;

  #[inline]
  fn neg(self) -> Self::Output {
    self.try_neg().unwrap_or_else(|err| panic!("{err}"))
  }
}

impl<'tape, T, B> Neg for Var<'tape, T, B>
where
  B: Backend<T>,
{
  type Output = Var<'tape, T, B>;

  #[inline(always)]
  fn neg(self) -> Self::Output {
    (&self).neg()
  }
}

/// Owned and mixed operand forms all defer to the `&Var op &Var` impl
macro_rules! forward_owned_binop {
  ($imp:ident, $method:ident) => {
    impl<'tape, T, B> $imp for Var<'tape, T, B>
    where
      B: Backend<T>,
    {
      type Output = Var<'tape, T, B>;

      #[inline(always)]
      fn $method(self, other: Self) -> Self::Output {
        (&self).$method(&other)
      }
    }

    impl<'tape, T, B> $imp<&Var<'tape, T, B>> for Var<'tape, T, B>
    where
      B: Backend<T>,
    {
      type Output = Var<'tape, T, B>;

      #[inline(always)]
      fn $method(self, other: &Var<'tape, T, B>) -> Self::Output {
        (&self).$method(other)
      }
    }

    impl<'tape, T, B> $imp<Var<'tape, T, B>> for &Var<'tape, T, B>
    where
      B: Backend<T>,
    {
      type Output = Var<'tape, T, B>;

      #[inline(always)]
      fn $method(self, other: Var<'tape, T, B>) -> Self::Output {
        self.$method(&other)
      }
    }
  };
}

forward_owned_binop!(Add, add);
forward_owned_binop!(Mul, mul);

/// Topologically sort the subgraph reachable from `root`, dependencies first.
///
/// Indices that do not resolve to a node are left out of the order.
fn topological_order<T>(nodes: &[Node<T>], root: NodeIndex) -> Vec<NodeIndex> {
  let mut stack = Vec::with_capacity(64);
  let mut result = Vec::with_capacity(64);
  let mut visited = FxHashSet::default();

  stack.push((root, false));

  // linear dfs, the flag marks a node whose dependencies were already pushed
  while let Some((index, dependencies_pushed)) = stack.pop() {
    if dependencies_pushed {
      result.push(index);
    } else if visited.insert(index) {
      let Some(node) = nodes.get(index.0) else {
        trace!(node = index.0, "skipping unresolvable dependency");
        continue;
      };
      stack.push((index, true));
      // reversed so the first operand is explored first
      for dep in node.op.dependencies().into_iter().rev() {
        if !visited.contains(&dep) {
          stack.push((dep, false));
        }
      }
    }
  }

  result
}

/// The backward rule of a single node: given the gradient that reached it,
/// produce the local-derivative contribution for each of its dependencies
fn pullback<T, B>(
  nodes: &[Node<T>],
  index: NodeIndex,
  grad: &T,
) -> Result<SmallVec<[(NodeIndex, T); 2]>>
where
  B: Backend<T>,
  T: Clone,
{
  let mut deltas = SmallVec::new();
  let Some(node) = nodes.get(index.0) else {
    return Ok(deltas);
  };
  trace!(node = index.0, op = node.op.symbol(), "applying backward rule");

  match node.op {
    Op::Leaf => {}
    Op::Add(a, b) => {
      deltas.push((a, grad.clone()));
      deltas.push((b, grad.clone()));
    }
    Op::Mul(a, b) => {
      // product rule, weighted by the value of the other operand
      if let Some(rhs) = nodes.get(b.0) {
        deltas.push((a, B::mul(grad, &rhs.value)?));
      }
      if let Some(lhs) = nodes.get(a.0) {
        deltas.push((b, B::mul(grad, &lhs.value)?));
      }
    }
  }
  Ok(deltas)
}
