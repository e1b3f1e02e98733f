//! Soft-Float Reference Benchmarks
//!
//! Measures the per-lane cost of the scalar reference operations, which
//! bounds the cost of a JIT software fallback (4 lanes single / 2 lanes
//! double plus call overhead).

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use charm_core::fp::op::{fp_add, fp_mul_add, fp_recip_estimate, fp_round_int, fp_to_fixed};
use charm_core::{Fpcr, Fpsr, RoundingMode};

// =============================================================================
// Arithmetic
// =============================================================================

fn bench_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("add");
    let fpcr = Fpcr::default();

    group.bench_function("single_normal", |b| {
        let mut fpsr = Fpsr::default();
        b.iter(|| fp_add(black_box(0x3FC0_0000u32), black_box(0x4010_0000), fpcr, &mut fpsr))
    });

    group.bench_function("double_normal", |b| {
        let mut fpsr = Fpsr::default();
        b.iter(|| {
            fp_add(
                black_box(0x3FF8_0000_0000_0000u64),
                black_box(0x4002_0000_0000_0000),
                fpcr,
                &mut fpsr,
            )
        })
    });

    group.finish();
}

fn bench_mul_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("mul_add");
    let fpcr = Fpcr::default();

    group.bench_function("single_fused", |b| {
        let mut fpsr = Fpsr::default();
        b.iter(|| {
            fp_mul_add(
                black_box(0x3F80_0000u32),
                black_box(0x4000_0000),
                black_box(0x4040_0000),
                fpcr,
                &mut fpsr,
            )
        })
    });

    // Near-cancellation exercises the alignment path.
    group.bench_function("single_cancel", |b| {
        let mut fpsr = Fpsr::default();
        b.iter(|| {
            fp_mul_add(
                black_box(0xC0C0_0000u32),
                black_box(0x4000_0000),
                black_box(0x4040_0000),
                fpcr,
                &mut fpsr,
            )
        })
    });

    group.finish();
}

// =============================================================================
// Estimates and conversions
// =============================================================================

fn bench_estimate(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimate");
    let fpcr = Fpcr::default();

    group.bench_function("recip_single", |b| {
        let mut fpsr = Fpsr::default();
        b.iter(|| fp_recip_estimate(black_box(0x4000_0000u32), fpcr, &mut fpsr))
    });

    group.finish();
}

fn bench_convert(c: &mut Criterion) {
    let mut group = c.benchmark_group("convert");
    let fpcr = Fpcr::default();

    group.bench_function("round_int_single", |b| {
        let mut fpsr = Fpsr::default();
        b.iter(|| {
            fp_round_int(
                black_box(0x3FC0_0000u32),
                fpcr,
                RoundingMode::ToNearestTieEven,
                false,
                &mut fpsr,
            )
        })
    });

    group.bench_function("to_fixed_single", |b| {
        let mut fpsr = Fpsr::default();
        b.iter(|| {
            fp_to_fixed(
                black_box(0x42C8_0000u32),
                16,
                false,
                RoundingMode::TowardsZero,
                fpcr,
                &mut fpsr,
            )
        })
    });

    group.finish();
}

criterion_group!(benches, bench_add, bench_mul_add, bench_estimate, bench_convert);
criterion_main!(benches);
