//! Call-site summaries and callee specialization.
//!
//! A [`CallSiteSummary`] records what the caller knows at one invoke: the constant values
//! of the arguments and whether the result is read. Summaries are computed top-down over
//! the pruned call graph, so a method whose every caller passes the same constant sees that
//! constant as its own parameter when its call sites are summarized in turn.
//!
//! Summaries are interned by their canonical [`CallSiteSummary::key`]; equal summaries
//! share one `Arc`, and the key doubles as the cache key for the [`ReducedCallee`] built
//! from it.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};

use dashmap::DashMap;

use crate::{
    analysis::{
        dataflow::{JoinSemiLattice, Liveness},
        ConstantAnalysis, ConstantValue,
    },
    cfg::{ControlFlowGraph, InsnPos},
    compiler::{cost::body_cost, passes::fold_constant_branches, InlinerCostConfig, Shrinker},
    ir::IrInstruction,
    model::{DexContext, DexMethod, DexMethodRef},
    Result,
};

/// What a caller knows at one call site.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallSiteSummary {
    /// Known argument values by argument index; unknown arguments are absent.
    pub arguments: BTreeMap<usize, ConstantValue>,
    /// The caller reads the result.
    pub result_used: bool,
}

impl CallSiteSummary {
    /// Canonical text identifying this summary.
    #[must_use]
    pub fn key(&self) -> String {
        self.to_string()
    }

    /// Returns the parameter values for a callee taking `arity` parameters.
    #[must_use]
    pub fn params(&self, arity: usize) -> Vec<ConstantValue> {
        (0..arity)
            .map(|i| self.arguments.get(&i).cloned().unwrap_or(ConstantValue::Top))
            .collect()
    }

    /// Returns `true` if no argument value is known.
    #[must_use]
    pub fn has_constant_arguments(&self) -> bool {
        !self.arguments.is_empty()
    }
}

impl fmt::Display for CallSiteSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (n, (index, value)) in self.arguments.iter().enumerate() {
            if n > 0 {
                f.write_str(",")?;
            }
            write!(f, "{index}:{}", value.key())?;
        }
        f.write_str(if self.result_used { "}+" } else { "}-" })
    }
}

/// Concurrent interning table for summaries. The first writer of a key wins.
#[derive(Debug, Default)]
pub struct SummaryInterner {
    table: DashMap<String, Arc<CallSiteSummary>>,
}

impl SummaryInterner {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the canonical instance equal to `summary`.
    pub fn intern(&self, summary: CallSiteSummary) -> Arc<CallSiteSummary> {
        let key = summary.key();
        if let Some(existing) = self.table.get(&key) {
            return Arc::clone(&existing);
        }
        Arc::clone(&self.table.entry(key).or_insert_with(|| Arc::new(summary)))
    }

    /// Number of distinct summaries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if nothing was interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Summarizes the invoke at `pos`; `None` if the analysis proves it unreachable.
pub(crate) fn summarize(
    cfg: &ControlFlowGraph,
    constants: &ConstantAnalysis<'_>,
    liveness: &Liveness,
    pos: InsnPos,
) -> Option<CallSiteSummary> {
    let env = constants.env_before(cfg, pos);
    if env.is_unreachable() {
        return None;
    }
    let insn = cfg.insn(pos);
    let arguments = insn
        .srcs()
        .iter()
        .enumerate()
        .filter_map(|(index, &reg)| {
            let value = match env.get(reg) {
                // Allocation sites are local to the caller.
                ConstantValue::NewObject { .. } => ConstantValue::nez(),
                value => value,
            };
            (!value.is_top()).then_some((index, value))
        })
        .collect();
    let result_used = cfg
        .move_result_of(pos)
        .is_some_and(|mr| !liveness.is_dead_def(cfg, mr));
    Some(CallSiteSummary {
        arguments,
        result_used,
    })
}

/// Summaries of every candidate call site, keyed by caller and invoke position.
///
/// Positions refer to the caller graphs as they were when the table was computed; a
/// caller's graph is not edited before its own inlining task starts.
#[derive(Debug, Default)]
pub struct CallSiteSummaries {
    sites: HashMap<DexMethodRef, BTreeMap<InsnPos, Option<Arc<CallSiteSummary>>>>,
}

impl CallSiteSummaries {
    /// Computes summaries in `order`, which must list callers before their callees.
    ///
    /// `callee_of` names the candidate callee of an invoke, or `None` for invokes that are
    /// not summarized. Parameters of methods for which `closed` holds start from the join
    /// of what their already summarized call sites pass; others start unknown.
    pub(crate) fn compute(
        ctx: &DexContext,
        interner: &SummaryInterner,
        order: &[Arc<DexMethod>],
        mut callee_of: impl FnMut(&DexMethod, &IrInstruction) -> Option<DexMethodRef>,
        closed: impl Fn(&DexMethod) -> bool,
    ) -> Self {
        let mut incoming: HashMap<DexMethodRef, Vec<ConstantValue>> = HashMap::new();
        let mut summaries = CallSiteSummaries::default();

        for method in order {
            let reference = method.reference();
            let code = read_lock!(method.code);
            let Some(cfg) = code.as_ref().and_then(|c| c.cfg()) else {
                continue;
            };
            let params = match incoming.get(&reference) {
                Some(joined) if closed(method) => joined.clone(),
                _ => Vec::new(),
            };
            let constants = ConstantAnalysis::run(cfg, params, Some(ctx));
            let liveness = Liveness::compute(cfg);

            let mut sites = BTreeMap::new();
            for (pos, insn) in cfg.instructions() {
                if !insn.opcode().is_invoke() {
                    continue;
                }
                let Some(callee) = callee_of(method, insn) else {
                    continue;
                };
                let summary = summarize(cfg, &constants, &liveness, pos);
                if let Some(summary) = &summary {
                    let arity = insn.srcs().len();
                    let joined = incoming
                        .entry(callee)
                        .or_insert_with(|| vec![ConstantValue::bottom(); arity]);
                    for (index, slot) in joined.iter_mut().enumerate() {
                        let value = summary
                            .arguments
                            .get(&index)
                            .cloned()
                            .unwrap_or(ConstantValue::Top);
                        *slot = slot.join(&value);
                    }
                }
                sites.insert(pos, summary.map(|s| interner.intern(s)));
            }
            if !sites.is_empty() {
                summaries.sites.insert(reference, sites);
            }
        }
        summaries
    }

    /// Returns the summary of the call at `pos` in `caller`: `None` if the site was not
    /// summarized, `Some(None)` if it is unreachable.
    #[must_use]
    pub fn get(&self, caller: &DexMethodRef, pos: InsnPos) -> Option<Option<Arc<CallSiteSummary>>> {
        self.sites.get(caller)?.get(&pos).cloned()
    }

    /// Number of summarized call sites.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sites.values().map(BTreeMap::len).sum()
    }

    /// Returns `true` if no call site was summarized.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

/// A callee body specialized to the argument values of one call-site summary.
#[derive(Debug, Clone)]
pub struct ReducedCallee {
    /// The specialized body.
    pub cfg: ControlFlowGraph,
    /// Its cost, in the units of [`body_cost`].
    pub code: usize,
}

impl ReducedCallee {
    /// Specializes `callee` for `summary`: branches decided by the known arguments are
    /// folded, dead blocks removed and the rest shrunk.
    ///
    /// # Errors
    ///
    /// Returns an error if a shrinker step fails.
    pub fn build(
        ctx: &DexContext,
        callee: &ControlFlowGraph,
        summary: &CallSiteSummary,
        shrinker: &Shrinker,
        costs: &InlinerCostConfig,
    ) -> Result<Self> {
        let mut cfg = callee.deep_copy();
        let arity = cfg.param_positions().len();
        let folded = fold_constant_branches(&mut cfg, summary.params(arity), Some(ctx));
        cfg.remove_unreachable_blocks();
        shrinker.shrink(&mut cfg)?;
        let code = body_cost(&cfg, costs);
        log::trace!("specialized for {summary}: {folded} edges folded, cost {code}");
        Ok(ReducedCallee { cfg, code })
    }
}
