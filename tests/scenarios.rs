//! End-to-end scenarios.
//!
//! Each test builds a small program from S-expression bodies using the public API, runs one
//! transformation over it and checks the printed result:
//! 1. Goto reduction by branch inversion
//! 2. Simple inlining with callee deletion
//! 3. No-return cutting
//! 4. Constructor fences for relaxed constructor inlining
//! 5. Cross-store rejection
//! 6. Synchronized-region rejection

use std::sync::Arc;

use redex::{
    compiler::{InlinerConfig, InlinerOutput, MultiMethodInliner, Shrinker, ShrinkerConfig},
    ir::{parse_code, print_items},
    model::{
        AccessFlags, ApiLevelChecker, DexClass, DexContext, DexField, DexMethod, DexMethodRef,
        MethodBuilder, StoreInfo, XStoreRefs,
    },
    Result,
};

/// Defines a public class.
fn class(ctx: &DexContext, descriptor: &str) {
    ctx.define_class(DexClass::new(ctx.make_type(descriptor), None, AccessFlags::PUBLIC));
}

/// Defines a public static method from an S-expression body.
fn static_method(ctx: &DexContext, reference: &str, body: &str) -> Result<Arc<DexMethod>> {
    MethodBuilder::new(reference)
        .access(AccessFlags::PUBLIC | AccessFlags::STATIC)
        .code(body)
        .build(ctx)
}

/// Printed linear body of `method`.
fn body_of(method: &DexMethod) -> String {
    let code = method.code.read().unwrap();
    let code = code.as_ref().unwrap();
    assert!(code.cfg().is_none(), "bodies are linear after a run");
    print_items(code.items())
}

fn run(
    ctx: Arc<DexContext>,
    candidates: &[DexMethodRef],
    config: InlinerConfig,
) -> Result<InlinerOutput> {
    MultiMethodInliner::new(ctx, candidates.iter().cloned(), config).run()
}

#[test]
fn test_reduce_gotos_inversion() -> Result<()> {
    let ctx = DexContext::new();
    let mut code = parse_code(
        &ctx,
        "((if-eqz v0 :t) (const v1 0) (:end) (return v1) (:t) (const v1 1) (goto :end))",
    )?;
    let config = ShrinkerConfig {
        run_reduce_gotos: true,
        ..ShrinkerConfig::disabled()
    };
    let stats = Shrinker::new(config).shrink_code(&mut code)?;
    assert!(stats.changed());

    let expected = parse_code(&ctx, "((const v1 1) (if-eqz v0 :end) (const v1 0) (:end) (return v1))")?;
    assert_eq!(print_items(code.items()), print_items(expected.items()));
    Ok(())
}

#[test]
fn test_simple_inline() -> Result<()> {
    let ctx = DexContext::new();
    class(&ctx, "LA;");
    let foo = static_method(&ctx, "LA;.foo:(I)I", "((load-param v0) (add-int/lit v0 v0 1) (return v0))")?;
    let bar = static_method(
        &ctx,
        "LA;.bar:()I",
        r#"((const v0 3) (invoke-static (v0) "LA;.foo:(I)I") (move-result v0) (return v0))"#,
    )?;

    let output = run(Arc::new(ctx), &[foo.reference()], InlinerConfig::debug())?;

    let body = body_of(&bar);
    assert!(body.contains("(const v0 3)"), "{body}");
    assert!(body.contains("add-int/lit"), "{body}");
    assert!(body.contains("(return v"), "{body}");
    assert!(!body.contains("invoke-"), "{body}");
    assert!(output.delete.contains(&foo.reference()));
    assert_eq!(output.stats.calls_inlined, 1);
    assert_eq!(output.stats.inlined, 1);
    Ok(())
}

#[test]
fn test_no_return_inlining() -> Result<()> {
    let ctx = DexContext::new();
    class(&ctx, "LA;");
    let fail = static_method(
        &ctx,
        "LA;.fail:()V",
        r#"((new-instance "Ljava/lang/Error;") (move-result-pseudo-object v0) (throw v0))"#,
    )?;
    let caller = static_method(
        &ctx,
        "LA;.run:(I)I",
        r#"((load-param v0)
            (invoke-static () "LA;.fail:()V")
            (add-int/lit v0 v0 7)
            (return v0))"#,
    )?;

    let config = InlinerConfig::debug().with_throw_after_no_return(true);
    let output = run(Arc::new(ctx), &[fail.reference()], config)?;

    let body = body_of(&caller);
    assert!(body.contains(r#"(invoke-static "LA;.fail:()V") (unreachable v1) (throw v1)"#), "{body}");
    assert!(!body.contains("add-int/lit"), "{body}");
    assert!(!body.contains("(return"), "{body}");
    assert_eq!(output.stats.no_returns, 1);
    assert!(!output.delete.contains(&fail.reference()));
    Ok(())
}

#[test]
fn test_constructor_fence() -> Result<()> {
    let ctx = DexContext::new();
    class(&ctx, "LA;");
    let c = ctx.make_type("LC;");
    ctx.define_class(DexClass::new(
        c.clone(),
        Some(ctx.make_type("Ljava/lang/Object;")),
        AccessFlags::PUBLIC,
    ));
    ctx.define_field(DexField::new(
        ctx.make_field(c, "f", ctx.make_type("I")),
        AccessFlags::PRIVATE | AccessFlags::FINAL,
    ));
    let init = MethodBuilder::new("LC;.<init>:(I)V")
        .access(AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR)
        .code(
            r#"((load-param-object v0)
                (load-param v1)
                (invoke-direct (v0) "Ljava/lang/Object;.<init>:()V")
                (iput v1 v0 "LC;.f:I")
                (return-void))"#,
        )
        .build(&ctx)?;
    let make = static_method(
        &ctx,
        "LA;.make:(I)LC;",
        r#"((load-param v0)
            (new-instance "LC;")
            (move-result-pseudo-object v1)
            (invoke-direct (v1 v0) "LC;.<init>:(I)V")
            (return-object v1))"#,
    )?;

    let config = InlinerConfig::debug().with_relaxed_init_inline(true);
    let output = MultiMethodInliner::new(Arc::new(ctx), [init.reference()], config)
        .with_api_level_checker(ApiLevelChecker::new(21))
        .run()?;

    let body = body_of(&make);
    assert!(body.contains(r#"(iput v"#), "{body}");
    assert!(body.contains("(write-barrier) (return-object v1)"), "{body}");
    assert!(!body.contains(r#""LC;.<init>:(I)V""#), "{body}");
    assert!(output.methods_with_write_barrier.contains(&make.reference()));
    assert_eq!(output.stats.write_barriers, 1);
    Ok(())
}

#[test]
fn test_cross_store_rejection() -> Result<()> {
    let ctx = DexContext::new();
    ctx.define_class(DexClass::new(ctx.make_type("LMain;"), None, AccessFlags::PUBLIC).with_location(0, 0));
    ctx.define_class(DexClass::new(ctx.make_type("LFeature;"), None, AccessFlags::PUBLIC).with_location(1, 1));
    ctx.define_class(DexClass::new(ctx.make_type("LOther;"), None, AccessFlags::PUBLIC).with_location(2, 2));
    let make = static_method(
        &ctx,
        "LFeature;.make:()V",
        r#"((new-instance "LOther;") (move-result-pseudo-object v0) (return-void))"#,
    )?;
    let caller = static_method(&ctx, "LFeature;.run:()V", r#"((invoke-static () "LFeature;.make:()V") (return-void))"#)?;

    let xstores = XStoreRefs::new(vec![
        StoreInfo::new("classes", vec![]),
        StoreInfo::new("feature", vec![0]),
        StoreInfo::new("other", vec![0]),
    ]);
    let output = MultiMethodInliner::new(Arc::new(ctx), [make.reference()], InlinerConfig::debug())
        .with_xstores(xstores)
        .run()?;

    assert_eq!(output.stats.cross_store, 1);
    assert!(output.inlined.is_empty());
    assert!(output.delete.is_empty());
    assert!(body_of(&caller).contains(r#""LFeature;.make:()V""#));
    Ok(())
}

#[test]
fn test_monitor_balance_rejection() -> Result<()> {
    let ctx = DexContext::new();
    class(&ctx, "LA;");
    class(&ctx, "LB;");
    let cast = static_method(
        &ctx,
        "LA;.cast:(Ljava/lang/Object;)V",
        r#"((load-param-object v0) (check-cast v0 "LB;") (move-result-pseudo-object v1) (return-void))"#,
    )?;
    let caller = static_method(
        &ctx,
        "LA;.run:(Ljava/lang/Object;)V",
        r#"((load-param-object v0)
            (monitor-enter v0)
            (invoke-static (v0) "LA;.cast:(Ljava/lang/Object;)V")
            (monitor-exit v0)
            (return-void))"#,
    )?;

    let output = run(Arc::new(ctx), &[cast.reference()], InlinerConfig::debug())?;

    assert_eq!(output.stats.cannot_inline_sketchy_code, 1);
    assert!(output.delete.is_empty());
    assert!(body_of(&caller).contains(r#""LA;.cast:(Ljava/lang/Object;)V""#));
    Ok(())
}
