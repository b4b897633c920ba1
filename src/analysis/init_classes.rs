//! Which class initializations are observable.
//!
//! Inlining a static method into a different class can move the point where the callee's
//! class gets initialized. That only matters when running some `<clinit>` in the callee's
//! hierarchy has side effects; otherwise the inliner may drop the implicit initialization.

use std::sync::Arc;

use dashmap::DashMap;

use crate::{
    ir::IrOpcode,
    model::{DexContext, DexType},
};

/// Caches, per type, the nearest class in its superclass chain whose static initializer has
/// side effects.
pub struct InitClassesWithSideEffects {
    ctx: Arc<DexContext>,
    cache: DashMap<DexType, Option<DexType>>,
}

impl InitClassesWithSideEffects {
    /// Creates an oracle over the classes defined in `ctx`.
    #[must_use]
    pub fn new(ctx: Arc<DexContext>) -> Self {
        InitClassesWithSideEffects {
            ctx,
            cache: DashMap::new(),
        }
    }

    /// Returns the first class at or above `ty` whose initialization has side effects.
    ///
    /// Classes without a definition and external classes are assumed to have side effects.
    #[must_use]
    pub fn refine(&self, ty: &DexType) -> Option<DexType> {
        if let Some(cached) = self.cache.get(ty) {
            return cached.clone();
        }
        let found = self.compute(ty);
        self.cache.entry(ty.clone()).or_insert(found).clone()
    }

    /// Returns the type an `init-class` must name when code of `caller_class` runs code that
    /// relies on `callee_class` being initialized, or `None` if no initialization is needed.
    #[must_use]
    pub fn needs_init_class(
        &self,
        caller_class: &DexType,
        callee_class: &DexType,
    ) -> Option<DexType> {
        if self.ctx.is_subclass(caller_class, callee_class) {
            return None;
        }
        self.refine(callee_class)
    }

    fn compute(&self, ty: &DexType) -> Option<DexType> {
        let mut current = Some(ty.clone());
        while let Some(t) = current {
            let Some(class) = self.ctx.class_of(&t) else {
                return Some(t);
            };
            if class.is_external() || self.clinit_has_side_effects(&t) {
                return Some(t);
            }
            current = class.super_class().cloned();
        }
        None
    }

    /// A static initializer made only of constants and static field writes has no effect
    /// beyond initializing its own class.
    fn clinit_has_side_effects(&self, ty: &DexType) -> bool {
        let Some(class) = self.ctx.class_of(ty) else {
            return true;
        };
        let Some(clinit) = class
            .methods()
            .into_iter()
            .find(|m| m.is_clinit())
            .and_then(|m| self.ctx.method_def(&m))
        else {
            return false;
        };
        let code = read_lock!(clinit.code);
        let Some(code) = code.as_ref() else {
            return true;
        };
        let benign = |op: IrOpcode| {
            op.is_literal_const()
                || matches!(op, IrOpcode::ConstString | IrOpcode::ConstClass)
                || op.is_move_result_pseudo()
                || op.is_sput()
                || op == IrOpcode::ReturnVoid
        };
        match code.cfg() {
            Some(cfg) => cfg.instructions().any(|(_, insn)| !benign(insn.opcode())),
            None => code.insns().any(|insn| !benign(insn.opcode())),
        }
    }
}
