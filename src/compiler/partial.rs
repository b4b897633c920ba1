//! Partial inlining of hot entry paths.
//!
//! A callee that is too large to inline as a whole may still have a cheap early exit, as in
//! `if (cache != null) return cache; ...slow path...`. The partial body keeps the callee's
//! entry block and the returning side of its first branch, and replaces the other side by a
//! call to the original callee. Inlining that body puts the fast path into the caller while
//! the slow path stays out of line, so the callee is never deleted.

use crate::{
    cfg::{BlockId, ControlFlowGraph, EdgeId},
    compiler::{
        cost::{block_cost, body_cost},
        InlinerCostConfig,
    },
    ir::{IrInstruction, IrOpcode, Reg},
    model::DexMethod,
    Result,
};

/// A callee body reduced to its entry fast path.
#[derive(Debug)]
pub(crate) struct PartialCallee {
    /// The body to inline.
    pub cfg: ControlFlowGraph,
    /// Cost of the kept fast path.
    pub code: usize,
}

/// Builds the partial body of `callee`, whose full body is `cfg`.
///
/// `invoke` is the opcode of the call site, reused for the out-of-line call. Returns
/// `None` when the entry does not end in a conditional branch with one side that returns
/// straight away, or when the kept path costs more than `max_code_units`.
///
/// # Errors
///
/// Returns an error if editing the copy fails.
pub(crate) fn build_partial(
    callee: &DexMethod,
    cfg: &ControlFlowGraph,
    invoke: IrOpcode,
    cost: &InlinerCostConfig,
    max_code_units: usize,
) -> Result<Option<PartialCallee>> {
    let entry = cfg.entry();
    let Some(params) = unmodified_params(cfg, entry) else {
        return Ok(None);
    };
    let Some((kept, replaced)) = fast_exit(cfg, entry) else {
        return Ok(None);
    };

    let code: usize = [entry, kept].iter().map(|&b| block_cost(cfg, b, cost)).sum();
    if code > max_code_units {
        return Ok(None);
    }

    let mut copy = cfg.deep_copy();
    copy.remove_ghost_exit_block();
    let call = copy.create_block();
    copy.set_edge_target(replaced, call);

    let call_insn = IrInstruction::new(invoke)
        .with_srcs(params)
        .with_method(callee.reference());
    let proto = callee.proto();
    let rtype = proto.rtype();
    let tail = if rtype.is_void() {
        vec![call_insn, IrInstruction::new(IrOpcode::ReturnVoid)]
    } else {
        let (result, move_op, return_op) = if rtype.is_wide() {
            (copy.allocate_wide_temp(), IrOpcode::MoveResultWide, IrOpcode::ReturnWide)
        } else if rtype.is_object() {
            (copy.allocate_temp(), IrOpcode::MoveResultObject, IrOpcode::ReturnObject)
        } else {
            (copy.allocate_temp(), IrOpcode::MoveResult, IrOpcode::Return)
        };
        vec![
            call_insn,
            IrInstruction::new(move_op).with_dest(result),
            IrInstruction::new(return_op).with_srcs(vec![result]),
        ]
    };
    copy.push_back(call, tail)?;
    copy.remove_unreachable_blocks();

    log::trace!(
        "partial body of {}: {code} code units kept",
        callee.reference()
    );
    Ok(Some(PartialCallee { cfg: copy, code }))
}

/// Returns the parameter registers if the entry block never overwrites one.
fn unmodified_params(cfg: &ControlFlowGraph, entry: BlockId) -> Option<Vec<Reg>> {
    let params: Vec<Reg> = cfg
        .param_positions()
        .into_iter()
        .filter_map(|pos| cfg.insn(pos).dest())
        .collect();
    let clobbered = cfg
        .block(entry)
        .insns()
        .filter(|(_, insn)| !insn.opcode().is_load_param())
        .any(|(_, insn)| params.iter().any(|&p| insn.writes(p)));
    (!clobbered).then_some(params)
}

/// Finds the side of the entry branch to keep and the edge to the side to replace.
fn fast_exit(cfg: &ControlFlowGraph, entry: BlockId) -> Option<(BlockId, EdgeId)> {
    let (_, last) = cfg.block(entry).last_insn()?;
    if !last.opcode().is_conditional_branch() || !cfg.throw_edges(entry).is_empty() {
        return None;
    }
    let fallthrough = cfg.goto_edge(entry)?;
    let taken = *cfg.branch_edges(entry).first()?;
    let returns_directly = |b: BlockId| {
        let block = cfg.block(b);
        b != entry
            && block.ends_with_return()
            && cfg.pred_blocks(b).len() == 1
            && cfg.throw_edges(b).is_empty()
    };

    let sides = [(fallthrough, taken), (taken, fallthrough)];
    sides
        .into_iter()
        .filter(|(keep, other)| {
            let kept = cfg.edge(*keep).target();
            kept != cfg.edge(*other).target() && returns_directly(kept)
        })
        .min_by_key(|(keep, _)| cfg.block_code_units(cfg.edge(*keep).target()))
        .map(|(keep, other)| (cfg.edge(keep).target(), other))
}

/// Returns `true` if the partial body of a callee with cost `full` is worth inlining over a
/// call.
pub(crate) fn pays_off(partial: &PartialCallee, cfg_cost: &InlinerCostConfig, full: usize) -> bool {
    body_cost(&partial.cfg, cfg_cost) < full
}
