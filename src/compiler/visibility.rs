//! Access fix-ups for relocated code.
//!
//! Code inlined into another class keeps referencing the callee's classes and members. A
//! reference that was legal from the callee's class may not be legal from the caller's, so
//! every inlined call site contributes the members that must become public. Private
//! methods reached through `invoke-direct` additionally become static, since a direct
//! invocation of a private method is only legal inside its class.
//!
//! Workers only collect changes; [`VisibilityChanges::apply`] and [`staticize`] run
//! serially after every caller is done.

use std::collections::BTreeSet;

use crate::{
    compiler::{gates::CalleeFacts, EventKind, EventLog},
    ir::{IrOpcode, MethodItem},
    model::{
        AccessFlags, ContextResolver, DexContext, DexFieldRef, DexMethodRef, DexType, FieldSearch,
        MethodResolver, MethodSearch,
    },
    Result,
};

/// Members and classes whose access must be widened to public.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibilityChanges {
    /// Methods to make public.
    pub methods: BTreeSet<DexMethodRef>,
    /// Fields to make public.
    pub fields: BTreeSet<DexFieldRef>,
    /// Classes to make public.
    pub classes: BTreeSet<DexType>,
}

impl VisibilityChanges {
    /// Returns `true` if nothing needs widening.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty() && self.fields.is_empty() && self.classes.is_empty()
    }

    /// Total number of changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len() + self.fields.len() + self.classes.len()
    }

    /// Adds all changes of `other`.
    pub fn merge(&mut self, other: VisibilityChanges) {
        self.methods.extend(other.methods);
        self.fields.extend(other.fields);
        self.classes.extend(other.classes);
    }

    /// Makes every collected definition public and returns the number actually changed.
    ///
    /// References without a definition, and definitions already public, are skipped.
    pub fn apply(&self, ctx: &DexContext, log: &EventLog) -> usize {
        let mut changed = 0;
        for class in self.classes.iter().filter_map(|ty| ctx.class_of(ty)) {
            if !class.access().is_public() {
                class.set_access(class.access().made_public());
                log.record(EventKind::VisibilityChanged)
                    .message(format!("class {}", class.ty()));
                changed += 1;
            }
        }
        for method in self.methods.iter().filter_map(|m| ctx.method_def(m)) {
            if !method.access().is_public() {
                method.set_access(method.access().made_public());
                log.record(EventKind::VisibilityChanged)
                    .method(method.reference())
                    .message("method");
                changed += 1;
            }
        }
        for field in self.fields.iter().filter_map(|f| ctx.field_def(f)) {
            if !field.access().is_public() {
                field.set_access(field.access().made_public());
                log.record(EventKind::VisibilityChanged)
                    .message(format!("field {}", field.reference()));
                changed += 1;
            }
        }
        changed
    }
}

/// Returns `true` if code in `from` may access a member of `owner` with `access`.
fn is_accessible(ctx: &DexContext, from: &DexType, owner: &DexType, access: AccessFlags) -> bool {
    if from == owner || access.is_public() {
        return true;
    }
    if access.is_private() {
        return false;
    }
    from.package() == owner.package() || (access.is_protected() && ctx.is_subclass(from, owner))
}

/// Computes the changes needed to run the body described by `facts` inside `caller_class`.
pub(crate) fn changes_for(
    ctx: &DexContext,
    resolver: &dyn MethodResolver,
    fields: &ContextResolver,
    caller_class: &DexType,
    facts: &CalleeFacts,
) -> VisibilityChanges {
    let mut changes = VisibilityChanges::default();
    for ty in &facts.types {
        let Some(class) = ctx.class_of(ty) else {
            continue;
        };
        if !class.is_external() && !is_accessible(ctx, caller_class, ty, class.access()) {
            changes.classes.insert(ty.clone());
        }
    }
    for reference in &facts.method_refs {
        let Some(method) = resolver.resolve(reference, MethodSearch::Any, None) else {
            continue;
        };
        let owner = method.class();
        let external = ctx.class_of(&owner).map_or(true, |c| c.is_external());
        if !external && !method.is_init() && !is_accessible(ctx, caller_class, &owner, method.access()) {
            changes.methods.insert(method.reference());
        }
    }
    for reference in &facts.field_refs {
        let Some(field) = fields.resolve_field(reference, FieldSearch::Any) else {
            continue;
        };
        let owner = field.reference().class().clone();
        let external = ctx.class_of(&owner).map_or(true, |c| c.is_external());
        if !external && !is_accessible(ctx, caller_class, &owner, field.access()) {
            changes.fields.insert(field.reference().clone());
        }
    }
    changes
}

/// Returns the methods reached through `invoke-direct` that must become static when the body
/// described by `facts` moves into `caller_class`.
pub(crate) fn needs_static(caller_class: &DexType, facts: &CalleeFacts) -> Vec<DexMethodRef> {
    facts
        .direct_calls
        .iter()
        .filter(|m| m.class() != caller_class)
        .cloned()
        .collect()
}

/// Rewrites each method of `methods` as a static method taking its former receiver as first
/// parameter, and every `invoke-direct` of it as `invoke-static`.
///
/// Methods are processed in the given order. A method whose static signature is already
/// taken is left unchanged. Returns the pairs of old and new references.
///
/// # Errors
///
/// Returns an error if a definition cannot be moved to its new reference.
pub fn staticize<'a>(
    ctx: &DexContext,
    methods: impl IntoIterator<Item = &'a DexMethodRef>,
    log: &EventLog,
) -> Result<Vec<(DexMethodRef, DexMethodRef)>> {
    let mut renamed = Vec::new();
    for old in methods {
        let Some(method) = ctx.method_def(old) else {
            continue;
        };
        if method.is_static() {
            continue;
        }
        let class = method.class();
        let proto = method.proto();
        let mut args = Vec::with_capacity(proto.args().len() + 1);
        args.push(class.clone());
        args.extend(proto.args().iter().cloned());
        let new_proto = ctx.make_proto(proto.rtype().clone(), args);
        let new = ctx.make_method(class, method.name().as_str(), new_proto);
        if ctx.method_def(&new).is_some() {
            log::warn!("cannot make {old} static: {new} already exists");
            log.record(EventKind::Warning)
                .method(old.clone())
                .message(format!("static signature {new} already exists"));
            continue;
        }
        ctx.rekey_method(old, new.clone())?;
        method.set_access(method.access() | AccessFlags::STATIC);
        log.record(EventKind::MethodMadeStatic)
            .method(new.clone())
            .message(format!("was {old}"));
        renamed.push((old.clone(), new));
    }
    if !renamed.is_empty() {
        rewrite_direct_calls(ctx, &renamed);
    }
    Ok(renamed)
}

fn rewrite_direct_calls(ctx: &DexContext, renamed: &[(DexMethodRef, DexMethodRef)]) {
    let rewrite = |insn: &mut crate::ir::IrInstruction| {
        if insn.opcode() != IrOpcode::InvokeDirect {
            return;
        }
        let target = insn
            .method()
            .and_then(|m| renamed.iter().find(|(old, _)| old == m))
            .map(|(_, new)| new.clone());
        if let Some(new) = target {
            insn.set_opcode(IrOpcode::InvokeStatic);
            insn.set_method(new);
        }
    };
    for method in ctx.all_methods() {
        let mut code = write_lock!(method.code);
        let Some(code) = code.as_mut() else {
            continue;
        };
        match code.cfg_mut() {
            Some(cfg) => cfg.instructions_mut().for_each(|(_, insn)| rewrite(insn)),
            None => code
                .items_mut()
                .iter_mut()
                .filter_map(MethodItem::insn_mut)
                .for_each(rewrite),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::{context::tests::context_with, InlinerConfig},
        model::{DexClass, DexField},
        test::{built_cfg, create_class, create_method, printed_body},
    };

    #[test]
    fn test_private_members_widened_across_classes() {
        let ictx = context_with(InlinerConfig::debug(), |ctx| {
            create_class(ctx, "Lcom/a/A;", None);
            create_class(ctx, "Lcom/a/B;", None);
            create_class(ctx, "Lcom/b/C;", None);
            let field = ctx.make_field_from_str("Lcom/a/A;.secret:I").unwrap();
            ctx.define_field(DexField::new(field, AccessFlags::PRIVATE | AccessFlags::STATIC));
        });
        let ctx = ictx.ctx.as_ref();
        create_method(
            ctx,
            "Lcom/a/A;.helper:()V",
            AccessFlags::STATIC,
            "((return-void))",
        );
        let callee = create_method(
            ctx,
            "Lcom/a/A;.f:()I",
            AccessFlags::PUBLIC | AccessFlags::STATIC,
            r#"((invoke-static () "Lcom/a/A;.helper:()V")
                (sget "Lcom/a/A;.secret:I")
                (move-result-pseudo v0)
                (return v0))"#,
        );
        let cfg = built_cfg(&callee);
        let facts = CalleeFacts::collect(&ictx, &callee, &cfg);

        let same_package = changes_for(ctx, ictx.resolver.as_ref(), &ictx.fields, &ctx.make_type("Lcom/a/B;"), &facts);
        assert!(same_package.methods.is_empty());
        assert_eq!(same_package.fields.len(), 1);

        let other_package = changes_for(ctx, ictx.resolver.as_ref(), &ictx.fields, &ctx.make_type("Lcom/b/C;"), &facts);
        assert_eq!(other_package.methods.len(), 1);
        assert_eq!(other_package.fields.len(), 1);

        let own_class = changes_for(ctx, ictx.resolver.as_ref(), &ictx.fields, &ctx.make_type("Lcom/a/A;"), &facts);
        assert!(own_class.is_empty());

        let log = EventLog::new();
        assert_eq!(other_package.apply(ctx, &log), 2);
        assert_eq!(log.count_kind(EventKind::VisibilityChanged), 2);
        let helper = ctx.make_method_from_str("Lcom/a/A;.helper:()V").unwrap();
        assert!(ctx.method_def(&helper).unwrap().access().is_public());
        assert_eq!(other_package.apply(ctx, &log), 0);
    }

    #[test]
    fn test_staticize_rewrites_callers() {
        let ictx = context_with(InlinerConfig::debug(), |ctx| {
            ctx.define_class(DexClass::new(ctx.make_type("LA;"), None, AccessFlags::PUBLIC));
        });
        let ctx = ictx.ctx.as_ref();
        create_method(
            ctx,
            "LA;.secret:(I)I",
            AccessFlags::PRIVATE,
            "((load-param-object v1) (load-param v0) (return v0))",
        );
        let caller = create_method(
            ctx,
            "LA;.run:()I",
            AccessFlags::PUBLIC,
            r#"((load-param-object v0)
                (const v1 5)
                (invoke-direct (v0 v1) "LA;.secret:(I)I")
                (move-result v2)
                (return v2))"#,
        );
        let old = ctx.make_method_from_str("LA;.secret:(I)I").unwrap();
        let log = EventLog::new();
        let renamed = staticize(ctx, [&old], &log).unwrap();
        assert_eq!(renamed.len(), 1);
        let new = &renamed[0].1;
        assert_eq!(new.to_string(), "LA;.secret:(LA;I)I");
        assert!(ctx.method_def(new).unwrap().is_static());
        assert!(ctx.method_def(&old).is_none());
        assert!(printed_body(&caller).contains(r#"(invoke-static v0 v1 "LA;.secret:(LA;I)I")"#));
        assert_eq!(log.count_kind(EventKind::MethodMadeStatic), 1);
    }

    #[test]
    fn test_staticize_collision_skipped() {
        let ictx = context_with(InlinerConfig::debug(), |ctx| {
            ctx.define_class(DexClass::new(ctx.make_type("LA;"), None, AccessFlags::PUBLIC));
        });
        let ctx = ictx.ctx.as_ref();
        create_method(ctx, "LA;.m:()V", AccessFlags::PRIVATE, "((load-param-object v0) (return-void))");
        create_method(
            ctx,
            "LA;.m:(LA;)V",
            AccessFlags::PUBLIC | AccessFlags::STATIC,
            "((load-param-object v0) (return-void))",
        );
        let old = ctx.make_method_from_str("LA;.m:()V").unwrap();
        let log = EventLog::new();
        assert!(staticize(ctx, [&old], &log).unwrap().is_empty());
        assert!(!ctx.method_def(&old).unwrap().is_static());
        assert_eq!(log.count_kind(EventKind::Warning), 1);
    }

    #[test]
    fn test_needs_static_only_foreign() {
        let ctx = DexContext::new();
        let mut facts = CalleeFacts::default();
        facts.direct_calls.insert(ctx.make_method_from_str("LA;.p:()V").unwrap());
        assert!(needs_static(&ctx.make_type("LA;"), &facts).is_empty());
        assert_eq!(needs_static(&ctx.make_type("LB;"), &facts).len(), 1);
    }
}
