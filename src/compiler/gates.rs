//! Hard gates: the reasons a call site can never be inlined.
//!
//! A gate is a verifier-safety or capacity rule, not a profitability judgement; the cost
//! model only sees call sites every gate let through. Each failed gate is a [`Rejection`],
//! recorded as [`EventKind::Rejected`](crate::compiler::EventKind::Rejected) and counted in
//! [`InlinerStats`](crate::compiler::InlinerStats).
//!
//! Facts that depend on the callee alone (which types and members it references, whether it
//! throws, whether it reads the platform version) are computed once per callee as
//! [`CalleeFacts`] and shared by every call site.

use std::{collections::BTreeSet, fmt, sync::Arc};

use crate::{
    analysis::{can_inline_init, cannot_inline_sketchy_code, InitInline, InitInlineOptions},
    cfg::{ControlFlowGraph, EdgeKind, InsnPos},
    compiler::{context::InlinerContext, visibility::needs_static},
    ir::IrOpcode,
    model::{
        AccessFlags, DexContext, DexFieldRef, DexMethod, DexMethodRef, DexType, FieldSearch,
        MethodFlags, MethodSearch,
    },
};

/// Code units no method may ever reach.
pub const HARD_MAX_INSTRUCTION_SIZE: u64 = 1 << 32;

const SDK_INT_CLASS: &str = "Landroid/os/Build$VERSION;";
const SDK_INT_NAME: &str = "SDK_INT";

/// Why a call site was not inlined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    /// The caller must not be optimized.
    NoOptimizations,
    /// The caller or the callee is blocklisted, or the callee is marked do-not-inline.
    Blocklisted,
    /// The invoke does not resolve to a callee with a body.
    NotFound,
    /// The callee references a type the caller's store may not see.
    CrossStore,
    /// The callee calls methods defined outside the caller's dex.
    IntraDex,
    /// A cold callee would grow a hot caller by more than the allowed budget.
    HotColdMismatch,
    /// The callee catches a non-public external type.
    NonPublicCatch,
    /// The callee requires a higher API level than the caller.
    ApiLevelMismatch,
    /// The callee calls a method that does not resolve.
    UnknownVirtual,
    /// The callee uses `invoke-super` whose meaning depends on its class.
    NonRelocatableSuper,
    /// The callee's `invoke-direct` would turn into a virtual call in the caller's class.
    CreatesVirtualDispatch,
    /// The callee accesses a field that does not resolve.
    UnknownField,
    /// The callee reads the platform version.
    AndroidVersionCheck,
    /// The callee contains `throw` and throwing callees are not inlined.
    Throws,
    /// The caller would grow past the method size limit.
    CallerTooLarge,
    /// The callee alone exceeds the method size limit.
    CalleeTooBig,
    /// Throwing code would move into a synchronized region without catch-all coverage.
    SketchyCode,
    /// The constructor cannot be inlined safely.
    CannotInlineInit,
}

impl Rejection {
    /// Returns a short human-readable description.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::NoOptimizations => "caller not optimizable",
            Self::Blocklisted => "blocklisted",
            Self::NotFound => "callee not found",
            Self::CrossStore => "cross-store reference",
            Self::IntraDex => "intra-dex violation",
            Self::HotColdMismatch => "hot-cold mismatch",
            Self::NonPublicCatch => "non-public catch type",
            Self::ApiLevelMismatch => "api level mismatch",
            Self::UnknownVirtual => "unknown virtual",
            Self::NonRelocatableSuper => "non-relocatable invoke-super",
            Self::CreatesVirtualDispatch => "would create a virtual dispatch",
            Self::UnknownField => "unknown field",
            Self::AndroidVersionCheck => "android version check",
            Self::Throws => "callee throws",
            Self::CallerTooLarge => "caller too large",
            Self::CalleeTooBig => "callee too big",
            Self::SketchyCode => "sketchy synchronized code",
            Self::CannotInlineInit => "constructor not inlinable",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// What is known about a callee body independently of any call site.
#[derive(Debug, Clone, Default)]
pub struct CalleeFacts {
    /// The body contains `throw`.
    pub has_throw: bool,
    /// The body reads `Build.VERSION.SDK_INT`.
    pub reads_sdk_int: bool,
    /// Some invoke does not resolve although its class is defined by the application.
    pub unknown_virtual: bool,
    /// Some field access does not resolve although its class is defined by the application.
    pub unknown_field: bool,
    /// Resolved targets of the body's `invoke-super` instructions.
    pub super_targets: Vec<Option<Arc<DexMethod>>>,
    /// Every type the body names, directly or as the owner of a member.
    pub types: BTreeSet<DexType>,
    /// Methods the body invokes.
    pub method_refs: BTreeSet<DexMethodRef>,
    /// Fields the body accesses.
    pub field_refs: BTreeSet<DexFieldRef>,
    /// Types caught by the body's handlers.
    pub catch_types: BTreeSet<DexType>,
    /// Non-constructor methods the body reaches through `invoke-direct`, including targets
    /// that are not private.
    pub direct_calls: BTreeSet<DexMethodRef>,
}

impl CalleeFacts {
    /// Scans `cfg`, the body of `callee`.
    pub(crate) fn collect(ictx: &InlinerContext, callee: &DexMethod, cfg: &ControlFlowGraph) -> Self {
        let ctx = ictx.ctx.as_ref();
        let mut facts = CalleeFacts::default();
        facts.types.insert(callee.class());

        for (_, insn) in cfg.instructions() {
            let op = insn.opcode();
            if op.is_throw() {
                facts.has_throw = true;
            }
            if let Some(ty) = insn.ty() {
                facts.types.insert(ty.clone());
            }
            if let Some(field) = insn.field() {
                facts.types.insert(field.class().clone());
                facts.field_refs.insert(field.clone());
                if field.class().descriptor() == SDK_INT_CLASS
                    && field.name().as_str() == SDK_INT_NAME
                {
                    facts.reads_sdk_int = true;
                }
                let search = if op.is_sget() || op.is_sput() {
                    FieldSearch::Static
                } else {
                    FieldSearch::Instance
                };
                if ictx.fields.resolve_field(field, search).is_none() && is_app_type(ctx, field.class()) {
                    facts.unknown_field = true;
                }
            }
            let Some(method) = insn.method() else {
                continue;
            };
            facts.types.insert(method.class().clone());
            facts.method_refs.insert(method.clone());
            let Some(search) = MethodSearch::from_opcode(op) else {
                continue;
            };
            let resolved = ictx.resolver.resolve(method, search, Some(callee));
            if op == IrOpcode::InvokeSuper {
                facts.super_targets.push(resolved);
                continue;
            }
            match resolved {
                None if op == IrOpcode::InvokeDirect
                    && ctx.method_def(method).is_some_and(|m| !m.is_init()) =>
                {
                    facts.direct_calls.insert(method.clone());
                }
                None if is_app_type(ctx, method.class()) => facts.unknown_virtual = true,
                Some(target) if op == IrOpcode::InvokeDirect && !target.is_init() => {
                    facts.direct_calls.insert(target.reference());
                }
                _ => {}
            }
        }

        for (_, edge) in cfg.edges() {
            if let EdgeKind::Throw {
                catch_type: Some(ty),
                ..
            } = edge.kind()
            {
                facts.catch_types.insert(ty.clone());
                facts.types.insert(ty.clone());
            }
        }
        facts
    }
}

/// Returns `true` if `ty` is defined by the application rather than the platform.
fn is_app_type(ctx: &DexContext, ty: &DexType) -> bool {
    ctx.class_of(ty).is_some_and(|c| !c.is_external())
}

/// One call site under consideration.
pub(crate) struct CallSite<'a> {
    pub caller: &'a DexMethod,
    pub caller_cfg: &'a ControlFlowGraph,
    pub pos: InsnPos,
    pub callee: &'a DexMethod,
    pub callee_cfg: &'a ControlFlowGraph,
    pub facts: &'a CalleeFacts,
    pub callee_size: usize,
}

/// Checks the caller-independent and caller-dependent gates for `site`.
///
/// Returns the constructor facts when the callee is an approved `<init>`.
pub(crate) fn check_call_site(
    ictx: &InlinerContext,
    site: &CallSite<'_>,
) -> Result<Option<InitInline>, Rejection> {
    let config = &ictx.config;
    let caller_class = site.caller.class();
    let callee_class = site.callee.class();

    if site.caller.flags().contains(MethodFlags::NO_OPTIMIZATIONS) {
        return Err(Rejection::NoOptimizations);
    }
    if site.callee.flags().contains(MethodFlags::DONT_INLINE)
        || config.is_blocklisted(callee_class.descriptor())
        || config.is_caller_blocklisted(caller_class.descriptor())
    {
        return Err(Rejection::Blocklisted);
    }
    check_stores(ictx, site, &caller_class)?;
    check_hot_cold(ictx, site)?;

    let ctx = ictx.ctx.as_ref();
    let non_public_catch = site.facts.catch_types.iter().any(|ty| {
        ctx.class_of(ty)
            .is_some_and(|c| c.is_external() && !c.access().is_public())
    });
    if non_public_catch {
        return Err(Rejection::NonPublicCatch);
    }
    if ictx.api.method_level(site.callee) > ictx.api.method_level(site.caller) {
        return Err(Rejection::ApiLevelMismatch);
    }
    check_opcodes(ictx, site, &caller_class)?;
    check_size(ictx, site.caller_cfg.estimate_code_units(), site.callee_size)?;

    if config.respect_sketchy_methods
        && cannot_inline_sketchy_code(site.caller_cfg, site.callee_cfg, site.pos)
    {
        return Err(Rejection::SketchyCode);
    }

    if site.callee.is_init() {
        let options = InitInlineOptions {
            relaxed: config.relaxed_init_inline,
            strict_throwable: config.strict_throwable_init_inline,
            min_sdk: ictx.api.min_sdk(),
            same_class_caller: site.caller.is_init() && caller_class == callee_class,
        };
        return match can_inline_init(ctx, site.callee, site.callee_cfg, &options) {
            Ok(init) => Ok(Some(init)),
            Err(reason) => {
                log::trace!("{}: {reason}", site.callee.reference());
                Err(Rejection::CannotInlineInit)
            }
        };
    }
    Ok(None)
}

fn check_stores(
    ictx: &InlinerContext,
    site: &CallSite<'_>,
    caller_class: &DexType,
) -> Result<(), Rejection> {
    let ctx = ictx.ctx.as_ref();
    if let Some(xstores) = &ictx.xstores {
        if let Some(from) = xstores.store_of(ctx, caller_class) {
            if site.facts.types.iter().any(|ty| xstores.illegal_ref(ctx, from, ty)) {
                return Err(Rejection::CrossStore);
            }
        }
    }
    if ictx.config.intra_dex {
        let caller_dex = ctx.class_of(caller_class).map(|c| c.dex());
        let foreign = site.facts.method_refs.iter().any(|m| {
            ctx.class_of(m.class())
                .is_some_and(|c| !c.is_external() && Some(c.dex()) != caller_dex)
        });
        if foreign {
            return Err(Rejection::IntraDex);
        }
    }
    Ok(())
}

fn check_hot_cold(ictx: &InlinerContext, site: &CallSite<'_>) -> Result<(), Rejection> {
    let Some(profile) = &ictx.profile else {
        return Ok(());
    };
    let caller_hot = profile.is_hot_method(&site.caller.reference());
    let callee_hot = profile.is_hot_method(&site.callee.reference());
    if caller_hot && !callee_hot && site.callee_size > ictx.config.hot_cold_max_growth {
        return Err(Rejection::HotColdMismatch);
    }
    Ok(())
}

fn check_opcodes(
    ictx: &InlinerContext,
    site: &CallSite<'_>,
    caller_class: &DexType,
) -> Result<(), Rejection> {
    let facts = site.facts;
    let same_class = *caller_class == site.callee.class();
    if !facts.super_targets.is_empty() && !same_class {
        // Outside its class, invoke-super can only become a direct dispatch to a target
        // nobody overrides.
        let relocatable = ictx.config.rewrite_invoke_super
            && facts.super_targets.iter().all(|t| t.as_ref().is_some_and(|m| is_final_target(ictx, m)));
        if !relocatable {
            return Err(Rejection::NonRelocatableSuper);
        }
    }
    // Direct calls leaving their class are made static, which needs a private body.
    let ctx = ictx.ctx.as_ref();
    let virtualizing = needs_static(caller_class, facts).iter().any(|reference| {
        ctx.method_def(reference).map_or(true, |m| {
            !m.access().is_private()
                || !m.has_code()
                || ctx.class_of(&m.class()).map_or(true, |c| c.is_external())
        })
    });
    if virtualizing {
        return Err(Rejection::CreatesVirtualDispatch);
    }
    if facts.unknown_virtual {
        return Err(Rejection::UnknownVirtual);
    }
    if facts.unknown_field {
        return Err(Rejection::UnknownField);
    }
    if facts.reads_sdk_int {
        return Err(Rejection::AndroidVersionCheck);
    }
    if facts.has_throw && !ictx.config.throws_inline {
        return Err(Rejection::Throws);
    }
    Ok(())
}

/// Returns `true` if no subclass can override `method`.
pub(crate) fn is_final_target(ictx: &InlinerContext, method: &DexMethod) -> bool {
    method.access().contains(AccessFlags::FINAL)
        || ictx
            .ctx
            .class_of(&method.class())
            .is_some_and(|c| c.access().is_final())
}

/// Rejects inlining a callee of `callee_size` code units into a caller of `caller_size`.
pub(crate) fn check_size(
    ictx: &InlinerContext,
    caller_size: usize,
    callee_size: usize,
) -> Result<(), Rejection> {
    let config = &ictx.config;
    let hard = HARD_MAX_INSTRUCTION_SIZE.saturating_sub(config.instruction_size_buffer);
    let soft = config.size_limit();
    let callee_size = callee_size as u64;
    let combined = caller_size as u64 + callee_size;
    if config.enforce_method_size_limit && callee_size > soft {
        return Err(Rejection::CalleeTooBig);
    }
    if combined > hard || (config.enforce_method_size_limit && combined > soft) {
        return Err(Rejection::CallerTooLarge);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::{context::tests::context_with, InlinerConfig},
        model::{DexClass, MethodBuilder, StoreInfo, XStoreRefs},
    };

    fn cfg_of(method: &DexMethod) -> ControlFlowGraph {
        let mut guard = method.code.write().unwrap();
        let code = guard.as_mut().unwrap();
        code.build_cfg().unwrap();
        code.cfg().unwrap().deep_copy()
    }

    fn check(
        ictx: &InlinerContext,
        caller: &DexMethod,
        callee: &DexMethod,
    ) -> Result<Option<InitInline>, Rejection> {
        let caller_cfg = cfg_of(caller);
        let callee_cfg = cfg_of(callee);
        let pos = caller_cfg
            .instructions()
            .find(|(_, i)| i.opcode().is_invoke())
            .map(|(p, _)| p)
            .unwrap();
        let facts = CalleeFacts::collect(ictx, callee, &callee_cfg);
        let site = CallSite {
            caller,
            caller_cfg: &caller_cfg,
            pos,
            callee,
            callee_cfg: &callee_cfg,
            facts: &facts,
            callee_size: callee_cfg.estimate_code_units(),
        };
        check_call_site(ictx, &site)
    }

    fn static_method(ctx: &DexContext, reference: &str, code: &str) -> Arc<DexMethod> {
        MethodBuilder::new(reference)
            .access(AccessFlags::PUBLIC | AccessFlags::STATIC)
            .code(code)
            .build(ctx)
            .unwrap()
    }

    #[test]
    fn test_rejects_throw_by_default() {
        let ictx = context_with(InlinerConfig::debug(), |ctx| {
            ctx.define_class(DexClass::new(ctx.make_type("LA;"), None, AccessFlags::PUBLIC));
        });
        let ctx = ictx.ctx.as_ref();
        let callee = static_method(
            ctx,
            "LA;.fail:()V",
            r#"((new-instance "Ljava/lang/Error;") (move-result-pseudo-object v0) (throw v0))"#,
        );
        let caller = static_method(ctx, "LA;.run:()V", r#"((invoke-static () "LA;.fail:()V") (return-void))"#);
        assert_eq!(check(&ictx, &caller, &callee), Err(Rejection::Throws));
    }

    #[test]
    fn test_sdk_int_and_api_level() {
        let ictx = context_with(InlinerConfig::debug(), |_| {});
        let ctx = ictx.ctx.as_ref();
        let callee = static_method(
            ctx,
            "LA;.sdk:()I",
            r#"((sget "Landroid/os/Build$VERSION;.SDK_INT:I") (move-result-pseudo v0) (return v0))"#,
        );
        let caller = static_method(ctx, "LA;.run:()I", r#"((invoke-static () "LA;.sdk:()I") (move-result v0) (return v0))"#);
        assert_eq!(check(&ictx, &caller, &callee), Err(Rejection::AndroidVersionCheck));

        let newer = MethodBuilder::new("LA;.newer:()V")
            .access(AccessFlags::PUBLIC | AccessFlags::STATIC)
            .api_level(30)
            .code("((return-void))")
            .build(ctx)
            .unwrap();
        let old_caller = static_method(ctx, "LA;.old:()V", r#"((invoke-static () "LA;.newer:()V") (return-void))"#);
        assert_eq!(check(&ictx, &old_caller, &newer), Err(Rejection::ApiLevelMismatch));
    }

    #[test]
    fn test_cross_store() {
        let ictx = context_with(InlinerConfig::debug(), |ctx| {
            ctx.define_class(
                DexClass::new(ctx.make_type("LMain;"), None, AccessFlags::PUBLIC).with_location(0, 0),
            );
            ctx.define_class(
                DexClass::new(ctx.make_type("LFeature;"), None, AccessFlags::PUBLIC).with_location(1, 1),
            );
            ctx.define_class(
                DexClass::new(ctx.make_type("LOther;"), None, AccessFlags::PUBLIC).with_location(2, 2),
            );
        })
        .with_xstores(XStoreRefs::new(vec![
            StoreInfo::new("classes", vec![]),
            StoreInfo::new("feature", vec![0]),
            StoreInfo::new("other", vec![0]),
        ]));
        let ctx = ictx.ctx.as_ref();
        let callee = static_method(
            ctx,
            "LFeature;.make:()V",
            r#"((new-instance "LOther;") (move-result-pseudo-object v0) (return-void))"#,
        );
        let caller = static_method(ctx, "LFeature;.run:()V", r#"((invoke-static () "LFeature;.make:()V") (return-void))"#);
        assert_eq!(check(&ictx, &caller, &callee), Err(Rejection::CrossStore));
    }

    #[test]
    fn test_sketchy_monitor_region() {
        let ictx = context_with(InlinerConfig::debug(), |_| {});
        let ctx = ictx.ctx.as_ref();
        let callee = static_method(
            ctx,
            "LA;.cast:(Ljava/lang/Object;)V",
            r#"((load-param-object v0) (check-cast v0 "LB;") (move-result-pseudo-object v1) (return-void))"#,
        );
        let caller = static_method(
            ctx,
            "LA;.run:(Ljava/lang/Object;)V",
            r#"((load-param-object v0)
                (monitor-enter v0)
                (invoke-static (v0) "LA;.cast:(Ljava/lang/Object;)V")
                (monitor-exit v0)
                (return-void))"#,
        );
        assert_eq!(check(&ictx, &caller, &callee), Err(Rejection::SketchyCode));
    }

    #[test]
    fn test_size_limits() {
        let config = InlinerConfig::debug()
            .with_soft_max_instruction_size(100)
            .with_instruction_size_buffer(20);
        let ictx = context_with(config, |_| {});
        assert!(check_size(&ictx, 40, 40).is_ok());
        assert_eq!(check_size(&ictx, 60, 40), Err(Rejection::CallerTooLarge));
        assert_eq!(check_size(&ictx, 0, 81), Err(Rejection::CalleeTooBig));
    }

    #[test]
    fn test_blocklisted_and_no_optimizations() {
        let ictx = context_with(InlinerConfig::debug().with_blocklisted("LKeep;"), |_| {});
        let ctx = ictx.ctx.as_ref();
        let kept = static_method(ctx, "LKeep;.f:()V", "((return-void))");
        let caller = static_method(ctx, "LA;.run:()V", r#"((invoke-static () "LKeep;.f:()V") (return-void))"#);
        assert_eq!(check(&ictx, &caller, &kept), Err(Rejection::Blocklisted));

        let callee = static_method(ctx, "LA;.f:()V", "((return-void))");
        let frozen = MethodBuilder::new("LA;.frozen:()V")
            .access(AccessFlags::PUBLIC | AccessFlags::STATIC)
            .flags(MethodFlags::NO_OPTIMIZATIONS)
            .code(r#"((invoke-static () "LA;.f:()V") (return-void))"#)
            .build(ctx)
            .unwrap();
        assert_eq!(check(&ictx, &frozen, &callee), Err(Rejection::NoOptimizations));
        assert_eq!(check(&ictx, &caller, &callee), Ok(None));
    }

    #[test]
    fn test_direct_call_leaving_its_class() {
        let ictx = context_with(InlinerConfig::debug(), |ctx| {
            ctx.define_class(DexClass::new(ctx.make_type("LA;"), None, AccessFlags::PUBLIC));
            ctx.define_class(DexClass::new(ctx.make_type("LB;"), None, AccessFlags::PUBLIC));
        });
        let ctx = ictx.ctx.as_ref();
        let body = "((load-param-object v0) (const v1 1) (return v1))";
        MethodBuilder::new("LB;.shown:()I")
            .access(AccessFlags::PUBLIC)
            .code(body)
            .build(ctx)
            .unwrap();
        MethodBuilder::new("LB;.hidden:()I")
            .access(AccessFlags::PRIVATE)
            .code(body)
            .build(ctx)
            .unwrap();
        let calls_shown = static_method(
            ctx,
            "LB;.viaShown:(LB;)I",
            r#"((load-param-object v0) (invoke-direct (v0) "LB;.shown:()I") (move-result v1) (return v1))"#,
        );
        let calls_hidden = static_method(
            ctx,
            "LB;.viaHidden:(LB;)I",
            r#"((load-param-object v0) (invoke-direct (v0) "LB;.hidden:()I") (move-result v1) (return v1))"#,
        );
        let outside = |name: &str, target: &str| {
            static_method(
                ctx,
                &format!("LA;.{name}:(LB;)I"),
                &format!(r#"((load-param-object v0) (invoke-static (v0) "{target}") (move-result v1) (return v1))"#),
            )
        };
        let inside = static_method(
            ctx,
            "LB;.local:(LB;)I",
            r#"((load-param-object v0) (invoke-static (v0) "LB;.viaShown:(LB;)I") (move-result v1) (return v1))"#,
        );

        let caller = outside("runShown", "LB;.viaShown:(LB;)I");
        assert_eq!(check(&ictx, &caller, &calls_shown), Err(Rejection::CreatesVirtualDispatch));
        assert_eq!(check(&ictx, &inside, &calls_shown), Ok(None));
        let caller = outside("runHidden", "LB;.viaHidden:(LB;)I");
        assert_eq!(check(&ictx, &caller, &calls_hidden), Ok(None));
    }

    #[test]
    fn test_facts_collect_references() {
        let ictx = context_with(InlinerConfig::debug(), |ctx| {
            ctx.define_class(DexClass::new(ctx.make_type("LA;"), None, AccessFlags::PUBLIC));
        });
        let ctx = ictx.ctx.as_ref();
        let callee = static_method(
            ctx,
            "LA;.f:()V",
            r#"((invoke-static () "LA;.missing:()V") (sget "LB;.x:I") (move-result-pseudo v0) (return-void))"#,
        );
        let cfg = cfg_of(&callee);
        let facts = CalleeFacts::collect(&ictx, &callee, &cfg);
        assert!(facts.unknown_virtual);
        assert!(!facts.unknown_field);
        assert!(facts.types.contains(&ctx.make_type("LB;")));
        assert_eq!(facts.method_refs.len(), 1);
    }
}
