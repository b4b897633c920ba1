//! Benchmarks for the graph layer and the inliner.
//!
//! Measures:
//! - Building a CFG from linear code
//! - Linearizing a CFG
//! - One shrinker run over a branchy body
//! - A whole inliner run over a layered call graph

extern crate redex;

use std::{hint::black_box, sync::Arc};

use criterion::{criterion_group, criterion_main, Criterion};
use redex::{
    cfg::ControlFlowGraph,
    compiler::{InlinerConfig, MultiMethodInliner, Shrinker, ShrinkerConfig},
    ir::{parse_code, IrCode},
    model::{AccessFlags, DexClass, DexContext, DexMethodRef, MethodBuilder},
};

/// A body with `n` diamonds, each followed by a throwing call inside one try region.
fn branchy_body(ctx: &DexContext, n: usize) -> IrCode {
    let mut text = String::from("((load-param v0) (const v1 0) (.try_start c0)");
    for i in 0..n {
        text.push_str(&format!(
            " (if-eqz v0 :else{i}) (const v2 {i}) (goto :join{i}) (:else{i}) (const v2 1) (:join{i})\
              (add-int v1 v1 v2) (invoke-static (v1) \"LBench;.touch:(I)V\")"
        ));
    }
    text.push_str(
        " (.try_end c0) (return v1) (.catch (c0) \"Ljava/lang/Exception;\") (const v1 -1) (return v1))",
    );
    parse_code(ctx, &text).unwrap()
}

/// Benchmark building a CFG from 64 diamonds.
fn bench_build(c: &mut Criterion) {
    let ctx = DexContext::new();
    let code = branchy_body(&ctx, 64);

    c.bench_function("cfg_build_64_diamonds", |b| {
        b.iter(|| {
            let cfg = ControlFlowGraph::build(black_box(code.items()), code.registers_size()).unwrap();
            black_box(cfg)
        });
    });
}

/// Benchmark linearizing a CFG built from 64 diamonds.
fn bench_linearize(c: &mut Criterion) {
    let ctx = DexContext::new();
    let code = branchy_body(&ctx, 64);
    let cfg = ControlFlowGraph::build(code.items(), code.registers_size()).unwrap();

    c.bench_function("cfg_linearize_64_diamonds", |b| {
        b.iter(|| {
            let items = black_box(&cfg).linearize().unwrap();
            black_box(items)
        });
    });
}

/// Benchmark a full shrinker run on a fresh copy of the graph.
fn bench_shrink(c: &mut Criterion) {
    let ctx = DexContext::new();
    let code = branchy_body(&ctx, 32);
    let cfg = ControlFlowGraph::build(code.items(), code.registers_size()).unwrap();
    let shrinker = Shrinker::new(ShrinkerConfig::default());

    c.bench_function("shrinker_32_diamonds", |b| {
        b.iter(|| {
            let mut copy = cfg.deep_copy();
            let stats = shrinker.shrink(black_box(&mut copy)).unwrap();
            black_box(stats)
        });
    });
}

/// Defines `width` leaves and `depth` layers of callers that each call every method of the
/// layer below, then returns every method as a candidate.
fn layered_program(width: usize, depth: usize) -> (Arc<DexContext>, Vec<DexMethodRef>) {
    let ctx = DexContext::new();
    ctx.define_class(DexClass::new(ctx.make_type("LBench;"), None, AccessFlags::PUBLIC));
    let mut candidates = Vec::new();
    for layer in 0..depth {
        for i in 0..width {
            let reference = format!("LBench;.m{layer}_{i}:(I)I");
            let body = if layer == 0 {
                format!("((load-param v0) (add-int/lit v0 v0 {i}) (return v0))")
            } else {
                let mut body = String::from("((load-param v0)");
                for j in 0..width {
                    body.push_str(&format!(
                        " (invoke-static (v0) \"LBench;.m{}_{j}:(I)I\") (move-result v0)",
                        layer - 1
                    ));
                }
                body.push_str(" (return v0))");
                body
            };
            let method = MethodBuilder::new(&reference)
                .access(AccessFlags::PUBLIC | AccessFlags::STATIC)
                .code(&body)
                .build(&ctx)
                .unwrap();
            candidates.push(method.reference());
        }
    }
    (Arc::new(ctx), candidates)
}

/// Benchmark one inliner run over a 4x4 layered program, single threaded.
fn bench_inliner_run(c: &mut Criterion) {
    c.bench_function("inliner_layered_4x4", |b| {
        b.iter_with_setup(
            || layered_program(4, 4),
            |(ctx, candidates)| {
                let output = MultiMethodInliner::new(ctx, candidates, InlinerConfig::debug())
                    .run()
                    .unwrap();
                black_box(output.stats)
            },
        );
    });
}

criterion_group!(
    benches,
    bench_build,
    bench_linearize,
    bench_shrink,
    bench_inliner_run
);
criterion_main!(benches);
