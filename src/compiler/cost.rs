//! The inlining cost model.
//!
//! Costs are estimates in code units. A callee body is summarized once as an
//! [`InlinedCost`]; at each call site the cost of the invoke it replaces is weighed against
//! the body it brings in:
//!
//! ```text
//! invoke_cost = cost_invoke + result_used * cost_move_result + reg_penalty(arity)
//! benefit     = invoke_cost - (code + cross_dex_penalty - unused_args * discount)
//! ```
//!
//! A site with a non-negative benefit shrinks the caller and is always worth inlining. A
//! callee whose sites do not pay off one by one may still be inlined everywhere when the
//! total growth stays below what keeping the method costs:
//!
//! ```text
//! sum(benefit) + cost_method + full_code >= 0
//! ```

use std::collections::BTreeSet;

use crate::{
    analysis::{dataflow::Liveness, ConstantValue},
    cfg::{BlockId, ControlFlowGraph},
    compiler::{summaries::CallSiteSummary, InlinerCostConfig},
    ir::{IrInstruction, IrOpcode},
    model::DexContext,
};

/// Cost summary of one callee body, optionally specialized to a call site.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InlinedCost {
    /// Cost of the whole unspecialized body.
    pub full_code: usize,
    /// Cost of the body as inlined at this site; at most `full_code`.
    pub code: f32,
    /// Distinct methods of application classes the body references.
    pub method_refs: usize,
    /// Distinct fields and types of application classes the body references.
    pub other_refs: usize,
    /// Every exit of the body throws.
    pub no_return: bool,
    /// Whether the caller reads the result: 1, 0, or the fraction of sites that do.
    pub result_used: f32,
    /// Weighted count of parameters the body never reads.
    pub unused_args: f32,
    /// Estimated serialized size in code units.
    pub insn_size: usize,
}

/// Cost of one instruction, in code units.
///
/// `cases` is the case count of a switch; it is ignored for every other opcode.
#[must_use]
pub fn insn_cost(insn: &IrInstruction, cases: usize, config: &InlinerCostConfig) -> usize {
    let op = insn.opcode();
    if op.is_internal() {
        return 0;
    }
    match op {
        IrOpcode::Switch => 4 + 3 * cases,
        IrOpcode::Throw => insn.size() + config.cost_move_exception,
        _ => insn.size(),
    }
}

/// Cost of the instructions of one block, taking switch cases from its branch edges.
#[must_use]
pub fn block_cost(cfg: &ControlFlowGraph, block: BlockId, config: &InlinerCostConfig) -> usize {
    let cases = cfg.switch_cases(block);
    cfg.block(block)
        .insns()
        .map(|(_, i)| insn_cost(i, cases, config))
        .sum()
}

/// Cost of a whole body: the instructions plus one unit per branch edge.
#[must_use]
pub fn body_cost(cfg: &ControlFlowGraph, config: &InlinerCostConfig) -> usize {
    let insns: usize = cfg.block_ids().into_iter().map(|b| block_cost(cfg, b, config)).sum();
    let branches = cfg.edges().filter(|(_, e)| e.kind().is_branch()).count();
    insns + branches
}

/// Extra cost of passing `arity` argument registers.
#[must_use]
pub fn reg_penalty(config: &InlinerCostConfig, arity: usize) -> f32 {
    let mut penalty = 0;
    if arity > config.reg_threshold_1 {
        penalty += arity - config.reg_threshold_1;
    }
    if arity > config.reg_threshold_2 {
        penalty += arity - config.reg_threshold_2;
    }
    penalty as f32
}

/// Cost of the invoke (and result move) that inlining removes.
#[must_use]
pub fn invoke_cost(config: &InlinerCostConfig, arity: usize, result_used: f32) -> f32 {
    config.cost_invoke + result_used * config.cost_move_result + reg_penalty(config, arity)
}

/// Penalty for references the body adds to a caller in another dex.
#[must_use]
pub fn cross_dex_penalty(config: &InlinerCostConfig, cost: &InlinedCost) -> f32 {
    if cost.method_refs == 0 && cost.other_refs == 0 {
        return 0.0;
    }
    config.cross_dex_penalty_coe1 * cost.method_refs as f32
        + config.cross_dex_penalty_coe2 * cost.other_refs as f32
        + config.cross_dex_penalty_const
}

/// Weight of an unused argument known to hold `value`.
#[must_use]
pub fn unused_arg_weight(config: &InlinerCostConfig, value: &ConstantValue) -> f32 {
    match value {
        ConstantValue::Bottom => 0.0,
        ConstantValue::Top => config.unused_arg_not_top_multiplier,
        ConstantValue::Interval { lo: 0, hi: 0 } => config.unused_arg_zero_multiplier,
        ConstantValue::Interval { lo, hi } if lo == hi => {
            config.unused_arg_non_zero_constant_multiplier
        }
        ConstantValue::Interval { .. } => config.unused_arg_interval_multiplier,
        ConstantValue::NonZero => config.unused_arg_nez_multiplier,
        ConstantValue::SingletonObject(_) => config.unused_arg_singleton_object_multiplier,
        ConstantValue::ObjectWithImmutableAttr { .. } => {
            config.unused_arg_object_with_immutable_attr_multiplier
        }
        ConstantValue::ClassObject(_) => config.unused_arg_class_object_multiplier,
        ConstantValue::NewObject { .. } => config.unused_arg_new_object_multiplier,
        ConstantValue::String(_) => config.unused_arg_string_multiplier,
    }
}

impl InlinedCost {
    /// Summarizes `cfg`.
    ///
    /// With a `summary`, argument values and result use come from that call site;
    /// otherwise every argument is unknown and the result counts as used.
    #[must_use]
    pub fn compute(
        ctx: &DexContext,
        cfg: &ControlFlowGraph,
        config: &InlinerCostConfig,
        summary: Option<&CallSiteSummary>,
    ) -> Self {
        let full_code = body_cost(cfg, config);

        let is_app = |ty: &crate::model::DexType| ctx.class_of(ty).is_some_and(|c| !c.is_external());
        let mut methods = BTreeSet::new();
        let mut others = BTreeSet::new();
        for (_, insn) in cfg.instructions() {
            if let Some(m) = insn.method().filter(|m| is_app(m.class())) {
                methods.insert(m.to_string());
            }
            if let Some(f) = insn.field().filter(|f| is_app(f.class())) {
                others.insert(f.to_string());
            }
            if let Some(t) = insn.ty().filter(|t| is_app(t)) {
                others.insert(t.to_string());
            }
        }

        let liveness = Liveness::compute(cfg);
        let unused_args = cfg
            .param_positions()
            .into_iter()
            .enumerate()
            .filter(|(_, pos)| liveness.is_dead_def(cfg, *pos))
            .map(|(index, _)| {
                let value = summary
                    .and_then(|s| s.arguments.get(&index))
                    .cloned()
                    .unwrap_or(ConstantValue::Top);
                unused_arg_weight(config, &value)
            })
            .sum();

        InlinedCost {
            full_code,
            code: full_code as f32,
            method_refs: methods.len(),
            other_refs: others.len(),
            no_return: cfg.return_blocks().is_empty(),
            result_used: summary.map_or(1.0, |s| if s.result_used { 1.0 } else { 0.0 }),
            unused_args,
            insn_size: cfg.estimate_code_units(),
        }
    }

    /// Returns this cost with the body replaced by a specialized body of `code` units.
    #[must_use]
    pub fn with_code(mut self, code: usize) -> Self {
        self.code = (code as f32).min(self.full_code as f32);
        self
    }
}

/// Predicted size change of the caller from inlining one site; positive means smaller.
///
/// `discount` divides the body cost; 1.0 means no profile-guided discount.
#[must_use]
pub fn site_benefit(
    config: &InlinerCostConfig,
    cost: &InlinedCost,
    arity: usize,
    cross_dex: bool,
    discount: f32,
) -> f32 {
    let penalty = if cross_dex {
        cross_dex_penalty(config, cost)
    } else {
        0.0
    };
    let discount = discount.max(1.0);
    invoke_cost(config, arity, cost.result_used)
        - ((cost.code + penalty) / discount - cost.unused_args * config.unused_args_discount)
}

/// Returns `true` if inlining all `sites` calls and deleting the callee does not grow the
/// program.
#[must_use]
pub fn is_pervasive(config: &InlinerCostConfig, cost: &InlinedCost, arity: usize, sites: usize) -> bool {
    let per_site = site_benefit(config, cost, arity, false, 1.0);
    per_site * sites as f32 + config.cost_method + cost.full_code as f32 >= 0.0
}

/// Profile-guided discount for a hot call site: grows with how much the specialized body
/// shrank and with the hot fraction of the inlined blocks.
#[must_use]
pub fn profile_discount(config: &InlinerCostConfig, cost: &InlinedCost, hot_fraction: f32) -> f32 {
    let shrink = if cost.full_code == 0 {
        0.0
    } else {
        1.0 - cost.code / cost.full_code as f32
    };
    1.0 + config.profile_guided_shrink_bias * shrink.max(0.0)
        + config.profile_guided_hot_block_bias * hot_fraction.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{compiler::passes::test_support::build, ir::parse_code};

    #[test]
    fn test_simple_callee_pays_off() {
        let ctx = DexContext::new();
        let config = InlinerCostConfig::default();
        let cfg = build(&ctx, "((load-param v0) (add-int/lit v0 v0 1) (return v0))");
        let cost = InlinedCost::compute(&ctx, &cfg, &config, None);
        assert_eq!(cost.full_code, 3);
        assert!(!cost.no_return);
        assert_eq!(cost.unused_args, 0.0);
        let benefit = site_benefit(&config, &cost, 1, false, 1.0);
        assert!((benefit - 3.7).abs() < 1e-4, "{benefit}");
    }

    #[test]
    fn test_switch_and_throw_costs() {
        let ctx = DexContext::new();
        let config = InlinerCostConfig::default();
        let cfg = build(
            &ctx,
            r#"((load-param v0)
                (switch v0 (:a :b))
                (return v0)
                (:a 1)
                (throw v0)
                (:b 2)
                (const v0 3)
                (return v0))"#,
        );
        let throw = cfg.instructions().find(|(_, i)| i.opcode().is_throw()).unwrap().1;
        assert_eq!(insn_cost(throw, 0, &config), 1 + config.cost_move_exception);
        let (pos, switch) = cfg.instructions().find(|(_, i)| i.opcode().is_switch()).unwrap();
        let cases = cfg.switch_cases(pos.block());
        assert_eq!(cases, 2);
        assert_eq!(insn_cost(switch, cases, &config), 10);
        assert_eq!(block_cost(&cfg, pos.block(), &config), 10);
        assert_eq!(cfg.block_code_units(pos.block()), 7);
    }

    #[test]
    fn test_switch_cases_count_toward_size_gates() {
        let ctx = DexContext::new();
        let config = InlinerCostConfig::default();
        let labels: Vec<String> = (0..8).map(|k| format!(":c{k}")).collect();
        let cases: String = (0..8).map(|k| format!(" (:c{k} {k}) (return v0)")).collect();
        let text = format!(
            "((load-param v0) (switch v0 ({})) (return v0){cases})",
            labels.join(" ")
        );
        let code = parse_code(&ctx, &text).unwrap();
        let linear = code.estimate_code_units();
        let cfg = build(&ctx, &text);

        assert_eq!(cfg.estimate_code_units(), linear);
        let cost = InlinedCost::compute(&ctx, &cfg, &config, None);
        assert_eq!(cost.insn_size, linear);
        assert!(cost.full_code >= 4 + 3 * 8);
    }

    #[test]
    fn test_no_return_and_unused_args() {
        let ctx = DexContext::new();
        let config = InlinerCostConfig::default();
        let cfg = build(&ctx, "((load-param v0) (load-param-object v1) (throw v1))");
        let cost = InlinedCost::compute(&ctx, &cfg, &config, None);
        assert!(cost.no_return);
        assert_eq!(cost.unused_args, config.unused_arg_not_top_multiplier);
    }

    #[test]
    fn test_reg_penalty_thresholds() {
        let config = InlinerCostConfig::default();
        assert_eq!(reg_penalty(&config, 3), 0.0);
        assert_eq!(reg_penalty(&config, 4), 1.0);
        assert_eq!(reg_penalty(&config, 7), 6.0);
    }

    #[test]
    fn test_pervasive_balance() {
        let config = InlinerCostConfig::default();
        let cost = InlinedCost {
            full_code: 20,
            code: 20.0,
            result_used: 1.0,
            ..InlinedCost::default()
        };
        // Each site grows the caller by 13.3 units; keeping the method costs 36.
        assert!(is_pervasive(&config, &cost, 1, 2));
        assert!(!is_pervasive(&config, &cost, 1, 3));
    }

    #[test]
    fn test_profile_discount() {
        let config = InlinerCostConfig::default();
        let cost = InlinedCost {
            full_code: 10,
            code: 5.0,
            ..InlinedCost::default()
        };
        let discount = profile_discount(&config, &cost, 1.0);
        assert!((discount - 2.0).abs() < 1e-4);
        assert!(site_benefit(&config, &cost, 0, false, discount) > site_benefit(&config, &cost, 0, false, 1.0));
    }
}
