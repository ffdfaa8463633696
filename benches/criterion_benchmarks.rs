use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nalgebra::DMatrix;
use ndarray::{ArrayD, IxDyn};

use lib_grad::array::Tape as ArrayTape;
use lib_grad::matrix::Tape as MatrixTape;
use lib_grad::{Scalar, Tape};

// =============================================================================
// SCALAR BENCHMARKS
// =============================================================================

fn scalar_forward_chain(c: &mut Criterion) {
  let mut group = c.benchmark_group("scalar/forward_chain");

  for chain_len in [10, 50, 100, 500, 1000] {
    group.throughput(Throughput::Elements(chain_len as u64));
    group.bench_with_input(
      BenchmarkId::from_parameter(chain_len),
      &chain_len,
      |b, &len| {
        let mut tape: Tape<f64, Scalar> = Tape::with_capacity(4 * len);
        b.iter(|| {
          let value = {
            let mut x = tape.leaf(black_box(0.5));
            for _ in 0..len {
              x = &(&x * &x) + 0.25;
            }
            x.value()
          };
          tape.clear();
          black_box(value)
        });
      },
    );
  }
  group.finish();
}

fn scalar_backward_chain(c: &mut Criterion) {
  let mut group = c.benchmark_group("scalar/backward_chain");

  for chain_len in [10, 50, 100, 500, 1000] {
    group.throughput(Throughput::Elements(chain_len as u64));
    group.bench_with_input(
      BenchmarkId::from_parameter(chain_len),
      &chain_len,
      |b, &len| {
        let mut tape: Tape<f64, Scalar> = Tape::with_capacity(4 * len);
        b.iter(|| {
          let grad = {
            let x = tape.leaf(black_box(0.5));
            let mut result = &x + 0.0;
            for _ in 0..len {
              result = &(&result * &result) + 0.25;
            }
            result.backward().unwrap();
            x.grad()
          };
          tape.clear();
          black_box(grad)
        });
      },
    );
  }
  group.finish();
}

// =============================================================================
// ARRAY BENCHMARKS
// =============================================================================

fn array_backward_chain(c: &mut Criterion) {
  let mut group = c.benchmark_group("array/backward_chain");

  for size in [4, 64, 1024] {
    for chain_len in [10, 100] {
      group.throughput(Throughput::Elements((size * chain_len) as u64));
      group.bench_with_input(
        BenchmarkId::new(format!("{}", size), chain_len),
        &(size, chain_len),
        |b, &(sz, len)| {
          let mut tape = ArrayTape::with_capacity(4 * len);
          let init = ArrayD::from_shape_fn(IxDyn(&[sz]), |i| (i[0] as f64) * 1e-3);
          b.iter(|| {
            let grad = {
              let x = tape.leaf(black_box(init.clone()));
              let mut result = &x + 0.0;
              for _ in 0..len {
                result = &(&result * &x) + 0.5;
              }
              result.backward().unwrap();
              x.grad()
            };
            tape.clear();
            black_box(grad)
          });
        },
      );
    }
  }
  group.finish();
}

fn array_broadcast(c: &mut Criterion) {
  let mut group = c.benchmark_group("array/broadcast");

  for rows in [8, 64, 512] {
    group.throughput(Throughput::Elements((rows * 64) as u64));
    group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, &rows| {
      let mut tape = ArrayTape::new();
      let weights = ArrayD::from_elem(IxDyn(&[rows, 64]), 0.5);
      let bias = ArrayD::from_elem(IxDyn(&[64]), 0.1);
      b.iter(|| {
        let grad = {
          let w = tape.leaf(black_box(weights.clone()));
          let bias = tape.leaf(black_box(bias.clone()));
          let out = &(&w * &w) + &bias;
          out.backward().unwrap();
          bias.grad()
        };
        tape.clear();
        black_box(grad)
      });
    });
  }
  group.finish();
}

// =============================================================================
// MATRIX BENCHMARKS
// =============================================================================

fn matrix_backward_chain(c: &mut Criterion) {
  let mut group = c.benchmark_group("matrix/backward_chain");

  for size in [2, 4, 8, 16] {
    for chain_len in [10, 50, 100] {
      group.throughput(Throughput::Elements((size * size * chain_len) as u64));
      group.bench_with_input(
        BenchmarkId::new(format!("{}x{}", size, size), chain_len),
        &(size, chain_len),
        |b, &(sz, len)| {
          let mut tape = MatrixTape::with_capacity(4 * len);
          let init_matrix = DMatrix::from_fn(sz, sz, |i, j| ((i + j) as f64) * 0.1);
          b.iter(|| {
            let grad = {
              let x = tape.leaf(black_box(init_matrix.clone()));
              let mut result = &x + 0.0;
              for _ in 0..len {
                result = -&(&result * &x);
              }
              result.backward().unwrap();
              x.grad()
            };
            tape.clear();
            black_box(grad)
          });
        },
      );
    }
  }
  group.finish();
}

// =============================================================================
// INTERNAL BENCHMARKS
// =============================================================================

/// Wide fan-in: one leaf shared by every node, stresses the visited set and
/// the accumulation of repeated contributions
fn bench_diamond_fan_in(c: &mut Criterion) {
  let mut group = c.benchmark_group("internal/diamond_fan_in");

  for width in [10, 100, 1000] {
    group.throughput(Throughput::Elements(width as u64));
    group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
      let mut tape: Tape<f64, Scalar> = Tape::with_capacity(2 * width + 1);
      b.iter(|| {
        let grad = {
          let x = tape.leaf(black_box(1.0001));
          let mut acc = &x * &x;
          for _ in 0..width {
            acc = &(&acc * &x) + &x;
          }
          acc.backward().unwrap();
          x.grad()
        };
        tape.clear();
        black_box(grad)
      });
    });
  }
  group.finish();
}

fn bench_topological_sort(c: &mut Criterion) {
  let mut group = c.benchmark_group("internal/topological_sort");

  for depth in [100, 1000, 10000] {
    group.throughput(Throughput::Elements(depth as u64));
    group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
      let tape: Tape<f64, Scalar> = Tape::with_capacity(2 * depth + 2);
      let x = tape.leaf(1.0);
      let y = tape.leaf(2.0);
      let mut root = &x * &y;
      for i in 0..depth {
        root = if i % 2 == 0 { &root + &x } else { &root * &y };
      }
      b.iter(|| black_box(root.topological_order().len()));
    });
  }
  group.finish();
}

criterion_group!(
  name = benches;
  config = Criterion::default().measurement_time(Duration::from_secs(10));
  targets =
    // Scalar benchmarks
    scalar_forward_chain,
    scalar_backward_chain,
    // Array benchmarks
    array_backward_chain,
    array_broadcast,
    // Matrix benchmarks
    matrix_backward_chain,
    // Internal benchmarks
    bench_diamond_fan_in,
    bench_topological_sort,
);

criterion_main!(benches);
