// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Interpreter dispatch and pool throughput microbenchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rill_vm::{Heap, Op, Program, ProgramBuilder, Runtime};

/// Countdown loop: INTLIT n; { DUP, BRANCH0 exit; INTLIT 1; INTSUBT;
/// BRANCH top }; exit: DROP, END. Executes ~5 opcodes per iteration.
fn countdown_program(n: i64) -> Program {
    let mut b = ProgramBuilder::new();
    let entry = b.here();
    b.int_lit(n);
    let top = b.here();
    b.op(Op::Dup);
    let exit = b.branch0();
    b.int_lit(1).op(Op::IntSub);
    let back = b.here();
    b.branch_rel(top as i64 - back as i64);
    b.land(exit);
    b.op(Op::Drop).op(Op::End);
    b.finish(entry)
}

fn bench_dispatch(c: &mut Criterion) {
    let program = countdown_program(1_000);
    c.bench_function("dispatch_countdown_1k", |b| {
        b.iter(|| {
            let rt = Runtime::new(black_box(program.clone()));
            rt.run().unwrap();
        });
    });
}

fn bench_pool(c: &mut Criterion) {
    let heap = Heap::new();
    c.bench_function("scalar_allocate_release", |b| {
        b.iter(|| {
            let h = heap.scalar_allocate(false);
            heap.scalar_set_int(h, black_box(42));
            heap.scalar_release(h);
        });
    });

    c.bench_function("scalar_shared_get_set", |b| {
        let h = heap.scalar_allocate(true);
        b.iter(|| {
            heap.scalar_set_int(h, black_box(7));
            black_box(heap.scalar_get_int(h));
        });
        heap.scalar_release(h);
    });
}

criterion_group!(benches, bench_dispatch, bench_pool);
criterion_main!(benches);
