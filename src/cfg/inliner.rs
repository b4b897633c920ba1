//! Splicing a callee graph into a caller graph at one call site.
//!
//! [`inline_cfg`] replaces an invoke with a register-shifted copy of the callee body:
//! parameters become moves from the invoke's arguments, returns become moves into the
//! invoke's result register followed by a goto to the code after the call, and the try
//! coverage of the call site is extended over every transplanted instruction that may
//! throw. [`CfgInlinerPlugin`] lets a caller rewrite the copy while it is spliced.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use crate::{
    cfg::{BlockId, ControlFlowGraph, EdgeKind, InsnPos},
    ir::{DebugOpcode, DexPosition, IrInstruction, IrOpcode, MethodItem, Reg},
    model::{DexFieldRef, DexType},
    Result,
};

/// Extra code the splice must emit around the inlined body.
#[derive(Debug, Clone, Default)]
pub struct InlineOptions {
    /// Cast the receiver to this type before the body runs. Needed when the callee's class
    /// is more specific than the invoke's static receiver type.
    pub needs_receiver_cast: Option<DexType>,
    /// Emit `init-class` for this type at the start of the body. Needed when a static callee
    /// would have triggered class initialization.
    pub needs_init_class: Option<DexType>,
    /// Emit a `write-barrier` after the body. Needed when a constructor writing final fields
    /// is inlined outside of a constructor of its class.
    pub needs_constructor_fence: bool,
}

impl InlineOptions {
    /// Sets [`InlineOptions::needs_receiver_cast`].
    #[must_use]
    pub fn with_receiver_cast(mut self, ty: DexType) -> Self {
        self.needs_receiver_cast = Some(ty);
        self
    }

    /// Sets [`InlineOptions::needs_init_class`].
    #[must_use]
    pub fn with_init_class(mut self, ty: DexType) -> Self {
        self.needs_init_class = Some(ty);
        self
    }

    /// Sets [`InlineOptions::needs_constructor_fence`].
    #[must_use]
    pub fn with_constructor_fence(mut self, fence: bool) -> Self {
        self.needs_constructor_fence = fence;
        self
    }
}

/// Hooks into the splice.
///
/// All hooks have defaults that leave the splice unchanged.
pub trait CfgInlinerPlugin {
    /// Runs on the callee copy before its registers are shifted. Returns `true` if it
    /// changed the copy.
    fn update_before_reg_remap(
        &mut self,
        _caller: &mut ControlFlowGraph,
        _callee: &mut ControlFlowGraph,
    ) -> Result<bool> {
        Ok(false)
    }

    /// Runs on the callee copy after its registers are shifted and before parameters and
    /// returns are rewritten. Returns `true` if it changed the copy.
    fn update_after_reg_remap(
        &mut self,
        _caller: &mut ControlFlowGraph,
        _callee: &mut ControlFlowGraph,
    ) -> Result<bool> {
        Ok(false)
    }

    /// Registers to bind to the callee's parameters instead of the invoke's sources.
    fn inline_srcs(&self) -> Option<Vec<Reg>> {
        None
    }

    /// Register that receives the callee's result instead of the invoke's result follower.
    fn reg_for_return(&self) -> Option<Reg> {
        None
    }
}

/// The plugin used by [`inline_cfg`].
struct NoPlugin;

impl CfgInlinerPlugin for NoPlugin {}

/// Replaces instance field reads and writes of selected fields with register moves.
///
/// Used when the object owning the fields is being eliminated and its fields have been
/// assigned caller registers.
#[derive(Debug, Clone, Default)]
pub struct FieldRegisterPlugin {
    fields: HashMap<DexFieldRef, Reg>,
}

impl FieldRegisterPlugin {
    /// Creates a plugin mapping each field to the caller register holding its value.
    #[must_use]
    pub fn new(fields: HashMap<DexFieldRef, Reg>) -> Self {
        FieldRegisterPlugin { fields }
    }

    fn next_access(&self, cfg: &ControlFlowGraph) -> Option<(InsnPos, IrInstruction)> {
        cfg.instructions().find_map(|(pos, insn)| {
            let op = insn.opcode();
            let field = insn.field()?;
            if !(op.is_iget() || op.is_iput()) {
                return None;
            }
            let reg = *self.fields.get(field)?;
            let mv = if field.ty().is_wide() {
                IrOpcode::MoveWide
            } else if field.ty().is_object() {
                IrOpcode::MoveObject
            } else {
                IrOpcode::Move
            };
            if op.is_iput() {
                return Some((pos, IrInstruction::new(mv).with_dest(reg).with_srcs(vec![insn.src(0)])));
            }
            let follower = cfg.move_result_of(pos)?;
            let dest = cfg.insn(follower).dest()?;
            Some((pos, IrInstruction::new(mv).with_dest(dest).with_srcs(vec![reg])))
        })
    }
}

impl CfgInlinerPlugin for FieldRegisterPlugin {
    fn update_after_reg_remap(
        &mut self,
        _caller: &mut ControlFlowGraph,
        callee: &mut ControlFlowGraph,
    ) -> Result<bool> {
        let mut changed = false;
        while let Some((pos, replacement)) = self.next_access(callee) {
            callee.remove_insn(pos)?;
            callee.insert_before(pos, vec![replacement])?;
            changed = true;
        }
        Ok(changed)
    }
}

/// What a splice did to the caller.
#[derive(Debug, Clone)]
pub struct InlineResult {
    callsite: InsnPos,
    removed_result: Option<InsnPos>,
    post_block: BlockId,
    post_prefix: usize,
    inlined_blocks: Vec<BlockId>,
    registers_added: u32,
}

impl InlineResult {
    /// Returns the caller blocks holding the transplanted body.
    #[must_use]
    pub fn inlined_blocks(&self) -> &[BlockId] {
        &self.inlined_blocks
    }

    /// Returns the block holding the caller code that followed the call.
    #[must_use]
    pub fn post_block(&self) -> BlockId {
        self.post_block
    }

    /// Returns how many registers the caller grew by.
    #[must_use]
    pub fn registers_added(&self) -> u32 {
        self.registers_added
    }

    /// Translates a caller position taken before the splice into one valid after it.
    ///
    /// Returns `None` for the inlined invoke and its removed result follower.
    #[must_use]
    pub fn remap(&self, pos: InsnPos) -> Option<InsnPos> {
        if pos == self.callsite || Some(pos) == self.removed_result {
            return None;
        }
        let mut index = pos.index;
        if let Some(mr) = self.removed_result {
            if mr.block == pos.block && mr.index < pos.index {
                index -= 1;
            }
        }
        if pos.block == self.callsite.block && pos.index > self.callsite.index {
            let index = index - self.callsite.index - 1 + self.post_prefix;
            return Some(InsnPos::new(self.post_block, index));
        }
        Some(InsnPos::new(pos.block, index))
    }
}

/// Inlines `callee` at the invoke `callsite` of `caller`.
///
/// `next_caller_reg` is the first caller register the body may use; the callee's
/// registers are shifted by it. The callee graph is not modified.
///
/// The caller is left unsimplified; run [`ControlFlowGraph::simplify`] or the shrinker
/// before the next structural analysis.
///
/// # Errors
///
/// Returns [`crate::Error::InvalidCfg`] if `callsite` is not an invoke or the callee's
/// parameters do not match the invoke's arguments.
pub fn inline_cfg(
    caller: &mut ControlFlowGraph,
    callsite: InsnPos,
    callee: &ControlFlowGraph,
    next_caller_reg: Reg,
    options: &InlineOptions,
) -> Result<InlineResult> {
    inline_cfg_with_plugin(caller, callsite, callee, next_caller_reg, options, &mut NoPlugin)
}

/// Inlines `callee` at `callsite` like [`inline_cfg`], running `plugin`'s hooks.
///
/// # Errors
///
/// See [`inline_cfg`]; errors from the plugin are passed through.
pub fn inline_cfg_with_plugin(
    caller: &mut ControlFlowGraph,
    callsite: InsnPos,
    callee: &ControlFlowGraph,
    next_caller_reg: Reg,
    options: &InlineOptions,
    plugin: &mut dyn CfgInlinerPlugin,
) -> Result<InlineResult> {
    let invoke = caller.insn(callsite).clone();
    if !invoke.opcode().is_invoke() {
        return Err(invalid_cfg!("{callsite:?} is `{}`, not an invoke", invoke.opcode()));
    }

    let mut copy = callee.deep_copy();
    drop_unpaired_debug_info(&mut copy);
    copy.remove_ghost_exit_block();
    emit_prologue(&mut copy, options)?;
    plugin.update_before_reg_remap(caller, &mut copy)?;

    shift_registers(&mut copy, next_caller_reg);
    let needed = copy.registers_size();
    let registers_added = needed.saturating_sub(caller.registers_size());
    if registers_added > 0 {
        caller.set_registers_size(needed);
    }
    plugin.update_after_reg_remap(caller, &mut copy)?;

    let handlers = caller.throw_signature(callsite.block);
    let call_position = position_before(caller, callsite);

    let removed_result = caller.move_result_of(callsite);
    let result_reg = match removed_result {
        Some(mr) => {
            let dest = caller.insn(mr).dest();
            caller.block_mut(mr.block).items.remove(mr.index);
            dest
        }
        None => None,
    };
    let result_reg = plugin.reg_for_return().or(result_reg);

    let pre = callsite.block;
    let post = caller.split_at(pre, callsite.index + 1);
    caller.block_mut(pre).items.remove(callsite.index);
    caller.prune_throw_edges(pre);

    let args = plugin
        .inline_srcs()
        .unwrap_or_else(|| invoke.srcs().to_vec());
    bind_parameters(&mut copy, &args)?;
    let return_blocks = bind_returns(&mut copy, result_reg)?;

    let block_map = transplant(caller, copy);
    let body_entry = block_map[&callee.entry()];
    if let Some(goto) = caller.goto_edge(pre) {
        caller.set_edge_target(goto, body_entry);
    } else {
        caller.add_edge(pre, body_entry, EdgeKind::Goto);
    }
    for b in &return_blocks {
        caller.add_edge(block_map[b], post, EdgeKind::Goto);
    }

    let mut inlined_blocks: Vec<BlockId> = block_map.values().copied().collect();
    inlined_blocks.sort_unstable();
    if !handlers.is_empty() {
        let added = cover_with_handlers(caller, &inlined_blocks, &handlers);
        inlined_blocks.extend(added);
    }

    let mut post_prefix = 0;
    if let Some(parent) = &call_position {
        for &b in &inlined_blocks {
            for item in &mut caller.block_mut(b).items {
                if let MethodItem::Position(pos) = item {
                    *pos = Arc::new(pos.rebased_onto(parent));
                }
            }
        }
        caller
            .block_mut(post)
            .items
            .insert(0, MethodItem::Position(parent.clone()));
        post_prefix += 1;
    }
    if options.needs_constructor_fence {
        caller
            .block_mut(post)
            .items
            .insert(0, MethodItem::Opcode(IrInstruction::new(IrOpcode::WriteBarrier)));
        post_prefix += 1;
    }

    log::trace!(
        "inlined {} blocks at {callsite:?}, {registers_added} registers added",
        inlined_blocks.len()
    );
    Ok(InlineResult {
        callsite,
        removed_result,
        post_block: post,
        post_prefix,
        inlined_blocks,
        registers_added,
    })
}

/// Drops prologue markers and local-variable events that refer to locals the copy never
/// starts.
fn drop_unpaired_debug_info(copy: &mut ControlFlowGraph) {
    let mut started = HashSet::new();
    for block in copy.blocks() {
        for item in block.items() {
            if let MethodItem::Debug(dbg) = item {
                if dbg.opcode == DebugOpcode::StartLocal {
                    started.extend(dbg.reg);
                }
            }
        }
    }
    for block in copy.blocks.iter_mut().flatten() {
        block.items.retain(|item| match item {
            MethodItem::Debug(dbg) => match dbg.opcode {
                DebugOpcode::SetPrologueEnd => false,
                DebugOpcode::EndLocal | DebugOpcode::RestartLocal => {
                    dbg.reg.is_some_and(|r| started.contains(&r))
                }
                _ => true,
            },
            _ => true,
        });
    }
}

/// Adds the receiver cast and class initialization the options ask for.
fn emit_prologue(copy: &mut ControlFlowGraph, options: &InlineOptions) -> Result<()> {
    let entry = copy.entry();
    if let Some(ty) = &options.needs_receiver_cast {
        let params = copy.param_positions();
        let Some(&this_pos) = params.first() else {
            return Err(invalid_cfg!("receiver cast requested for a callee without parameters"));
        };
        let Some(this) = copy.insn(this_pos).dest() else {
            return Err(invalid_cfg!("receiver parameter has no register"));
        };
        let last = *params.last().unwrap_or(&this_pos);
        copy.insert_after(
            last,
            vec![
                IrInstruction::new(IrOpcode::CheckCast)
                    .with_srcs(vec![this])
                    .with_type(ty.clone()),
                IrInstruction::new(IrOpcode::MoveResultPseudoObject).with_dest(this),
            ],
        )?;
    }
    if let Some(ty) = &options.needs_init_class {
        copy.push_front(entry, vec![IrInstruction::new(IrOpcode::InitClass).with_type(ty.clone())])?;
    }
    Ok(())
}

fn shift_registers(copy: &mut ControlFlowGraph, offset: Reg) {
    if offset == 0 {
        return;
    }
    for block in copy.blocks.iter_mut().flatten() {
        for item in &mut block.items {
            match item {
                MethodItem::Opcode(insn) => insn.shift_regs(offset),
                MethodItem::Debug(dbg) => {
                    if let Some(reg) = dbg.reg.as_mut() {
                        *reg += offset;
                    }
                }
                _ => {}
            }
        }
    }
    let size = copy.registers_size();
    copy.set_registers_size(size + offset);
}

/// Turns every `load-param*` into a move from the corresponding argument register.
fn bind_parameters(copy: &mut ControlFlowGraph, args: &[Reg]) -> Result<()> {
    let params = copy.param_positions();
    if params.len() != args.len() {
        return Err(invalid_cfg!(
            "callee takes {} parameters, invoke passes {}",
            params.len(),
            args.len()
        ));
    }
    for (pos, &arg) in params.into_iter().zip(args) {
        let insn = copy.insn_mut(pos);
        let Some(mv) = insn.opcode().matching_move() else {
            return Err(invalid_cfg!("`{}` is not a parameter load", insn.opcode()));
        };
        insn.set_opcode(mv);
        insn.set_srcs(vec![arg]);
    }
    Ok(())
}

/// Rewrites every `return*` into a move into `result` (or nothing) and returns the blocks
/// that now continue after the call.
fn bind_returns(copy: &mut ControlFlowGraph, result: Option<Reg>) -> Result<Vec<BlockId>> {
    let returns = copy.return_blocks();
    for &b in &returns {
        let Some((index, insn)) = copy.block(b).last_insn() else {
            continue;
        };
        let op = insn.opcode();
        let replacement = match (op.matching_move(), result, insn.srcs().first()) {
            (Some(mv), Some(dest), Some(&src)) => {
                Some(IrInstruction::new(mv).with_dest(dest).with_srcs(vec![src]))
            }
            (None, _, _) if op != IrOpcode::ReturnVoid => {
                return Err(invalid_cfg!("`{op}` is not a return"));
            }
            _ => None,
        };
        let items = &mut copy.block_mut(b).items;
        match replacement {
            Some(mv) => items[index] = MethodItem::Opcode(mv),
            None => {
                items.remove(index);
            }
        }
    }
    Ok(returns)
}

/// Moves every block and edge of `copy` into `caller`; returns the block id mapping.
fn transplant(caller: &mut ControlFlowGraph, copy: ControlFlowGraph) -> HashMap<BlockId, BlockId> {
    let mut map = HashMap::new();
    for block in copy.blocks() {
        map.insert(block.id(), caller.create_block());
    }
    for (_, edge) in copy.edges() {
        caller.add_edge(map[&edge.src], map[&edge.target], edge.kind.clone());
    }
    for block in copy.blocks.into_iter().flatten() {
        caller.block_mut(map[&block.id]).items = block.items;
    }
    map
}

/// Extends the call site's handlers over every transplanted block that may throw.
///
/// Blocks outside any callee try region are split so each throwing instruction ends its
/// block. The call site's handlers are consulted after the callee's own. Returns the
/// blocks created by splitting.
fn cover_with_handlers(
    caller: &mut ControlFlowGraph,
    blocks: &[BlockId],
    handlers: &[(Option<DexType>, BlockId)],
) -> Vec<BlockId> {
    let mut created = Vec::new();
    for &b in blocks {
        if !caller.throw_edges(b).is_empty() {
            add_handlers(caller, b, handlers);
            continue;
        }
        let mut current = b;
        while caller.block(current).can_throw() {
            let block = caller.block(current);
            let Some((index, _)) = block.insns().find(|(_, i)| i.may_throw()) else {
                break;
            };
            let is_last = block.last_insn().map(|(i, _)| i) == Some(index);
            if is_last {
                add_handlers(caller, current, handlers);
                break;
            }
            let next = caller.split_at(current, index + 1);
            add_handlers(caller, current, handlers);
            created.push(next);
            current = next;
        }
    }
    created
}

fn add_handlers(caller: &mut ControlFlowGraph, block: BlockId, handlers: &[(Option<DexType>, BlockId)]) {
    let existing = caller.throw_signature(block);
    if existing.iter().any(|(ty, _)| ty.is_none()) {
        return;
    }
    let mut next_index = caller
        .throw_edges(block)
        .iter()
        .filter_map(|&e| caller.edge(e).kind.throw_index())
        .max()
        .map_or(0, |i| i + 1);
    for (catch_type, target) in handlers {
        if existing.iter().any(|(ty, _)| ty == catch_type) {
            continue;
        }
        caller.add_edge(
            block,
            *target,
            EdgeKind::Throw {
                catch_type: catch_type.clone(),
                index: next_index,
            },
        );
        next_index += 1;
    }
}

/// Finds the source position in effect at `pos`, looking back through single-predecessor
/// blocks.
fn position_before(cfg: &ControlFlowGraph, pos: InsnPos) -> Option<Arc<DexPosition>> {
    let mut block = pos.block;
    let mut end = pos.index;
    let mut seen = HashSet::new();
    loop {
        let found = cfg.block(block).items[..end].iter().rev().find_map(|item| match item {
            MethodItem::Position(p) => Some(p.clone()),
            _ => None,
        });
        if found.is_some() {
            return found;
        }
        let preds = cfg.pred_blocks(block);
        let [pred] = preds.as_slice() else {
            return None;
        };
        if !seen.insert(*pred) {
            return None;
        }
        block = *pred;
        end = cfg.block(block).items.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{parse_code, print_items},
        model::DexContext,
    };

    fn build(ctx: &DexContext, text: &str) -> ControlFlowGraph {
        let code = parse_code(ctx, text).unwrap();
        ControlFlowGraph::build(code.items(), code.registers_size()).unwrap()
    }

    fn invoke_pos(cfg: &ControlFlowGraph) -> InsnPos {
        cfg.instructions()
            .find(|(_, i)| i.opcode().is_invoke())
            .map(|(p, _)| p)
            .unwrap()
    }

    fn canonical(ctx: &DexContext, text: &str) -> String {
        print_items(parse_code(ctx, text).unwrap().items())
    }

    #[test]
    fn test_simple_inline() {
        let ctx = DexContext::new();
        let mut caller = build(
            &ctx,
            r#"((const v0 3) (invoke-static (v0) "LFoo;.foo:(I)I") (move-result v1) (return v1))"#,
        );
        let callee = build(&ctx, "((load-param v0) (add-int/lit v1 v0 1) (return v1))");
        let site = invoke_pos(&caller);
        let next = caller.registers_size();
        let result = inline_cfg(&mut caller, site, &callee, next, &InlineOptions::default()).unwrap();
        assert_eq!(result.registers_added(), 2);
        caller.simplify();
        caller.sanity_check().unwrap();
        assert_eq!(
            print_items(&caller.linearize().unwrap()),
            canonical(&ctx, "((const v0 3) (move v2 v0) (add-int/lit v3 v2 1) (move v1 v3) (return v1))")
        );
    }

    #[test]
    fn test_void_callee_with_branches() {
        let ctx = DexContext::new();
        let mut caller = build(
            &ctx,
            r#"((load-param v0) (invoke-static (v0) "LFoo;.foo:(I)V") (return v0))"#,
        );
        let callee = build(
            &ctx,
            r#"((load-param v0) (if-eqz v0 :a) (return-void) (:a) (sput v0 "LFoo;.f:I") (return-void))"#,
        );
        let site = invoke_pos(&caller);
        let next = caller.registers_size();
        inline_cfg(&mut caller, site, &callee, next, &InlineOptions::default()).unwrap();
        caller.simplify();
        caller.sanity_check().unwrap();
        assert!(caller.instructions().all(|(_, i)| !i.opcode().is_invoke()));
        assert_eq!(caller.return_blocks().len(), 1);
        let params = caller
            .instructions()
            .filter(|(_, i)| i.opcode().is_load_param())
            .count();
        assert_eq!(params, 1);
    }

    #[test]
    fn test_inline_inside_try_covers_body() {
        let ctx = DexContext::new();
        let mut caller = build(
            &ctx,
            r#"((load-param v0)
                (.try_start c0)
                (invoke-static (v0) "LFoo;.foo:(I)V")
                (.try_end c0)
                (return-void)
                (.catch (c0))
                (return-void))"#,
        );
        let callee = build(
            &ctx,
            r#"((load-param v0)
                (invoke-static (v0) "LFoo;.a:(I)V")
                (const v1 1)
                (invoke-static (v1) "LFoo;.b:(I)V")
                (return-void))"#,
        );
        let handler = caller
            .blocks()
            .find(|b| caller.is_catch(b.id()))
            .map(|b| b.id())
            .unwrap();
        let site = invoke_pos(&caller);
        let next = caller.registers_size();
        inline_cfg(&mut caller, site, &callee, next, &InlineOptions::default()).unwrap();
        caller.sanity_check().unwrap();

        let throwing: Vec<_> = caller
            .instructions()
            .filter(|(_, i)| i.opcode().is_invoke())
            .map(|(p, _)| p)
            .collect();
        assert_eq!(throwing.len(), 2);
        for pos in throwing {
            assert_eq!(caller.throw_signature(pos.block()), vec![(None, handler)]);
            assert_eq!(caller.block(pos.block()).last_insn().map(|(i, _)| i), Some(pos.index()));
        }
        caller.linearize().unwrap();
    }

    #[test]
    fn test_prologue_and_fence() {
        let ctx = DexContext::new();
        let mut caller = build(
            &ctx,
            r#"((load-param-object v0) (invoke-direct (v0) "LFoo;.<init>:()V") (return-void))"#,
        );
        let callee = build(
            &ctx,
            r#"((load-param-object v0) (const v1 0) (iput v1 v0 "LFoo;.f:I") (return-void))"#,
        );
        let options = InlineOptions::default()
            .with_receiver_cast(ctx.make_type("LFoo;"))
            .with_init_class(ctx.make_type("LBar;"))
            .with_constructor_fence(true);
        let site = invoke_pos(&caller);
        let next = caller.registers_size();
        let result = inline_cfg(&mut caller, site, &callee, next, &options).unwrap();
        caller.sanity_check().unwrap();
        let ops: Vec<IrOpcode> = caller.instructions().map(|(_, i)| i.opcode()).collect();
        assert!(ops.contains(&IrOpcode::CheckCast));
        assert!(ops.contains(&IrOpcode::InitClass));
        let (_, first) = caller.block(result.post_block()).first_insn().unwrap();
        assert_eq!(first.opcode(), IrOpcode::WriteBarrier);
    }

    #[test]
    fn test_positions_are_rebased() {
        let ctx = DexContext::new();
        let mut caller = build(
            &ctx,
            r#"((.pos "LBar;.run:()V" "Bar.java" 10)
                (invoke-static () "LFoo;.foo:()V")
                (return-void))"#,
        );
        let callee = build(&ctx, r#"((.pos "LFoo;.foo:()V" "Foo.java" 3) (return-void))"#);
        let site = invoke_pos(&caller);
        let result = inline_cfg(&mut caller, site, &callee, 0, &InlineOptions::default()).unwrap();
        let inlined = result.inlined_blocks()[0];
        let pos = caller
            .block(inlined)
            .items()
            .iter()
            .find_map(|item| match item {
                MethodItem::Position(p) => Some(p.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(pos.line, 3);
        assert_eq!(pos.parent.as_ref().map(|p| p.line), Some(10));
        assert!(matches!(
            caller.block(result.post_block()).items()[0],
            MethodItem::Position(_)
        ));
    }

    #[test]
    fn test_remap_pending_callsites() {
        let ctx = DexContext::new();
        let mut caller = build(
            &ctx,
            r#"((invoke-static () "LFoo;.a:()I")
                (move-result v0)
                (invoke-static (v0) "LFoo;.b:(I)V")
                (return-void))"#,
        );
        let callee = build(&ctx, "((const v0 7) (return v0))");
        let sites: Vec<InsnPos> = caller
            .instructions()
            .filter(|(_, i)| i.opcode().is_invoke())
            .map(|(p, _)| p)
            .collect();
        let next = caller.registers_size();
        let result = inline_cfg(&mut caller, sites[0], &callee, next, &InlineOptions::default()).unwrap();
        assert_eq!(result.remap(sites[0]), None);
        let moved = result.remap(sites[1]).unwrap();
        let insn = caller.insn(moved);
        assert_eq!(insn.method().map(|m| m.name().as_str().to_string()), Some("b".to_string()));
    }

    #[test]
    fn test_field_register_plugin() {
        let ctx = DexContext::new();
        let mut caller = build(
            &ctx,
            r#"((load-param-object v0) (invoke-virtual (v0) "LFoo;.get:()I") (move-result v1) (return v1))"#,
        );
        let callee = build(
            &ctx,
            r#"((load-param-object v0) (iget v0 "LFoo;.f:I") (move-result-pseudo v1) (return v1))"#,
        );
        let field = ctx.make_field_from_str("LFoo;.f:I").unwrap();
        let mut plugin = FieldRegisterPlugin::new(HashMap::from([(field, 5)]));
        let site = invoke_pos(&caller);
        caller.set_registers_size(6);
        inline_cfg_with_plugin(&mut caller, site, &callee, 6, &InlineOptions::default(), &mut plugin)
            .unwrap();
        caller.sanity_check().unwrap();
        assert!(caller.instructions().all(|(_, i)| !i.opcode().is_iget()));
        assert!(caller
            .instructions()
            .any(|(_, i)| i.opcode() == IrOpcode::Move && i.srcs() == [5]));
    }

    #[test]
    fn test_rejects_non_invoke() {
        let ctx = DexContext::new();
        let mut caller = build(&ctx, "((const v0 0) (return v0))");
        let callee = build(&ctx, "((return-void))");
        let pos = InsnPos::new(caller.entry(), 0);
        assert!(inline_cfg(&mut caller, pos, &callee, 1, &InlineOptions::default()).is_err());
    }
}
