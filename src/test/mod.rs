use std::sync::Arc;

use crate::{
    cfg::{ControlFlowGraph, InsnPos},
    model::{AccessFlags, DexClass, DexContext, DexMethod, MethodBuilder},
};

// Helper function to define a public class with an optional super class
pub fn create_class(ctx: &DexContext, descriptor: &str, super_class: Option<&str>) -> Arc<DexClass> {
    let super_class = super_class.map(|s| ctx.make_type(s));
    ctx.define_class(DexClass::new(ctx.make_type(descriptor), super_class, AccessFlags::PUBLIC))
}

// Helper function to define a public static method from an S-expression body
pub fn create_static_method(ctx: &DexContext, reference: &str, code: &str) -> Arc<DexMethod> {
    create_method(ctx, reference, AccessFlags::PUBLIC | AccessFlags::STATIC, code)
}

// Helper function to define a method with the given access flags
pub fn create_method(
    ctx: &DexContext,
    reference: &str,
    access: AccessFlags,
    code: &str,
) -> Arc<DexMethod> {
    MethodBuilder::new(reference)
        .access(access)
        .code(code)
        .build(ctx)
        .unwrap()
}

/// Builds the CFG of `method` in place and returns a copy of it.
pub fn built_cfg(method: &DexMethod) -> ControlFlowGraph {
    let mut guard = method.code.write().unwrap();
    let code = guard.as_mut().unwrap();
    code.build_cfg().unwrap();
    code.cfg().unwrap().deep_copy()
}

/// Position of the first invoke in `cfg`.
pub fn first_invoke(cfg: &ControlFlowGraph) -> InsnPos {
    cfg.instructions()
        .find(|(_, i)| i.opcode().is_invoke())
        .map(|(p, _)| p)
        .unwrap()
}

/// Printed linear form of `method`'s body, linearizing a CFG if one is built.
pub fn printed_body(method: &DexMethod) -> String {
    let guard = method.code.read().unwrap();
    let code = guard.as_ref().unwrap();
    match code.cfg() {
        Some(cfg) => crate::ir::print_items(&cfg.linearize().unwrap()),
        None => crate::ir::print_items(code.items()),
    }
}
