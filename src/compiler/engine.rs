//! The multi-method inliner.
//!
//! [`MultiMethodInliner`] inlines calls to a candidate set of methods across a whole
//! program:
//!
//! 1. Every method body is turned into a control-flow graph.
//! 2. Calls to candidates form a [`CallGraph`]; edges closing a recursion cycle are pruned so
//!    the rest is a DAG.
//! 3. With call-site summaries enabled, constant arguments are propagated top-down over that
//!    DAG and every call site gets a [`CallSiteSummary`].
//! 4. One task per method runs on the [`PriorityScheduler`]; a method is processed only once
//!    all of its callees are final. The task weighs each call site against the hard gates and
//!    the cost model, splices the accepted callees in and shrinks the result.
//! 5. Serial post-processing widens visibility, rewrites private methods reached from other
//!    classes as static, unfinalizes fields, linearizes every body and reports which callees
//!    can be deleted.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use redex::{
//!     compiler::{InlinerConfig, MultiMethodInliner},
//!     model::{AccessFlags, DexClass, DexContext, MethodBuilder},
//! };
//!
//! let ctx = DexContext::new();
//! ctx.define_class(DexClass::new(ctx.make_type("LA;"), None, AccessFlags::PUBLIC));
//! let foo = MethodBuilder::new("LA;.foo:(I)I")
//!     .access(AccessFlags::PUBLIC | AccessFlags::STATIC)
//!     .code("((load-param v0) (add-int/lit v0 v0 1) (return v0))")
//!     .build(&ctx)?;
//! MethodBuilder::new("LA;.bar:()I")
//!     .access(AccessFlags::PUBLIC | AccessFlags::STATIC)
//!     .code(r#"((const v0 3) (invoke-static v0 "LA;.foo:(I)I") (move-result v0) (return v0))"#)
//!     .build(&ctx)?;
//!
//! let output = MultiMethodInliner::new(Arc::new(ctx), [foo.reference()], InlinerConfig::debug())
//!     .run()?;
//! assert!(output.inlined.contains(&foo.reference()));
//! assert!(output.delete.contains(&foo.reference()));
//! # Ok::<(), redex::Error>(())
//! ```

use std::{collections::BTreeSet, sync::Arc};

use rayon::prelude::*;

use crate::{
    analysis::{InitClassesWithSideEffects, InitInline},
    cfg::{inline_cfg, ControlFlowGraph, InlineOptions, InsnPos},
    compiler::{
        callgraph::{resolve_candidate, CallGraph},
        context::{InlineForSpeed, InlinerContext},
        cost::{profile_discount, site_benefit, InlinedCost},
        gates::{check_call_site, check_size, CallSite, CalleeFacts, Rejection},
        partial::{build_partial, pays_off, PartialCallee},
        profile::source_block_of,
        scheduler::{PriorityScheduler, TaskHandle, TaskSpec},
        summaries::{CallSiteSummaries, CallSiteSummary, ReducedCallee},
        visibility::{changes_for, needs_static, staticize, VisibilityChanges},
        BaselineProfile, EventKind, EventLog, InlinerConfig, InlinerStats, UnfinalizePerfMode,
    },
    ir::{IrCode, IrInstruction, IrOpcode, SourceBlock},
    model::{
        AccessFlags, ApiLevelChecker, DexContext, DexMethod, DexMethodRef, MethodFlags,
        MethodResolver, MethodSearch, XStoreRefs,
    },
    Error, Result,
};

/// What an inlining run produced.
#[derive(Debug, Clone, Default)]
pub struct InlinerOutput {
    /// Callees inlined at one call site or more.
    pub inlined: BTreeSet<DexMethodRef>,
    /// Callees inlined at every call site that nothing else can reach; safe to delete.
    pub delete: BTreeSet<DexMethodRef>,
    /// Methods rewritten as static, under their new references.
    pub make_static: BTreeSet<DexMethodRef>,
    /// Callers that received a constructor fence.
    pub methods_with_write_barrier: BTreeSet<DexMethodRef>,
    /// Counters.
    pub stats: InlinerStats,
    /// Every decision and transformation of the run.
    pub events: EventLog,
}

/// Inlines calls to a set of candidate methods across a program.
pub struct MultiMethodInliner {
    ictx: InlinerContext,
    candidates: BTreeSet<DexMethodRef>,
}

/// The body that replaces a call site.
enum Body {
    /// Keep the call and cut the code after it.
    NoReturn,
    /// The callee as it is.
    Full(Arc<ControlFlowGraph>),
    /// The callee specialized to the site's constant arguments.
    Reduced(Arc<ReducedCallee>),
    /// The callee's fast path plus a call for the rest.
    Partial(Box<PartialCallee>),
}

impl Body {
    fn cfg(&self) -> Option<&ControlFlowGraph> {
        match self {
            Body::NoReturn => None,
            Body::Full(cfg) => Some(cfg.as_ref()),
            Body::Reduced(reduced) => Some(&reduced.cfg),
            Body::Partial(partial) => Some(&partial.cfg),
        }
    }
}

/// A call site accepted for transformation.
struct Inlinable {
    pos: InsnPos,
    invoke: IrInstruction,
    callee: Arc<DexMethod>,
    body: Body,
    facts: Arc<CalleeFacts>,
    init: Option<InitInline>,
    true_virtual: bool,
    for_speed: bool,
    cold: bool,
    size: usize,
}

impl Inlinable {
    fn sort_key(&self) -> (bool, bool, bool, bool, usize) {
        (
            !matches!(self.body, Body::NoReturn),
            matches!(self.body, Body::Partial(_)),
            self.for_speed,
            self.cold,
            self.size,
        )
    }
}

fn same_call(a: &IrInstruction, b: &IrInstruction) -> bool {
    a.opcode() == b.opcode() && a.method() == b.method()
}

impl MultiMethodInliner {
    /// Creates an inliner for calls to `candidates` in the program `ctx`.
    pub fn new(
        ctx: Arc<DexContext>,
        candidates: impl IntoIterator<Item = DexMethodRef>,
        config: InlinerConfig,
    ) -> Self {
        Self {
            ictx: InlinerContext::new(ctx, config),
            candidates: candidates.into_iter().collect(),
        }
    }

    /// Replaces the method resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn MethodResolver>) -> Self {
        self.ictx = self.ictx.with_resolver(resolver);
        self
    }

    /// Enables cross-store checks.
    #[must_use]
    pub fn with_xstores(mut self, xstores: XStoreRefs) -> Self {
        self.ictx = self.ictx.with_xstores(xstores);
        self
    }

    /// Replaces the API level checker.
    #[must_use]
    pub fn with_api_level_checker(mut self, api: ApiLevelChecker) -> Self {
        self.ictx = self.ictx.with_api_level_checker(api);
        self
    }

    /// Replaces the oracle deciding which class initializations must be kept.
    #[must_use]
    pub fn with_init_classes(mut self, init_classes: InitClassesWithSideEffects) -> Self {
        self.ictx = self.ictx.with_init_classes(init_classes);
        self
    }

    /// Supplies a baseline profile.
    #[must_use]
    pub fn with_profile(mut self, profile: BaselineProfile) -> Self {
        self.ictx = self.ictx.with_profile(profile);
        self
    }

    /// Supplies a speed gate; call sites it declines are treated as cold.
    #[must_use]
    pub fn with_inline_for_speed(mut self, gate: Arc<InlineForSpeed>) -> Self {
        self.ictx = self.ictx.with_inline_for_speed(gate);
        self
    }

    /// Declares that calls to `invoked` from `caller` always reach `target`.
    #[must_use]
    pub fn with_true_virtual(
        mut self,
        caller: DexMethodRef,
        invoked: DexMethodRef,
        target: DexMethodRef,
    ) -> Self {
        self.ictx = self.ictx.with_true_virtual(caller, invoked, target);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &InlinerConfig {
        &self.ictx.config
    }

    /// Runs the inliner over the whole program.
    ///
    /// # Errors
    ///
    /// Returns an error if a method body cannot be turned into a graph or back, or if a
    /// transformation corrupts a graph. Call sites that are merely not inlined are never
    /// errors; they are reported in [`InlinerOutput::events`].
    pub fn run(self) -> Result<InlinerOutput> {
        let ictx = &self.ictx;
        let ctx = ictx.ctx.as_ref();
        let methods = ctx.all_methods();

        methods.par_iter().try_for_each(|method| {
            let mut code = write_lock!(method.code);
            match code.as_mut() {
                Some(code) if code.cfg().is_none() => code.build_cfg(),
                _ => Ok(()),
            }
        })?;

        let mut graph = CallGraph::discover(ictx, &self.candidates);
        let pruned = graph.prune_recursion(&ictx.log);
        let order = graph
            .top_down_order()
            .ok_or_else(|| Error::Error("call graph still cyclic after pruning".into()))?;
        log::debug!(
            "inliner: {} candidates, {} call edges, {pruned} recursive sites pruned",
            self.candidates.len(),
            graph.edge_count()
        );

        let summaries = if ictx.config.use_call_site_summaries {
            let top_down: Vec<Arc<DexMethod>> =
                order.iter().map(|&n| Arc::clone(graph.method(n))).collect();
            CallSiteSummaries::compute(
                ctx,
                &ictx.summaries,
                &top_down,
                |caller, insn| {
                    resolve_candidate(ictx, &self.candidates, caller, insn)
                        .map(|(callee, _)| callee.reference())
                        .filter(|callee| graph.has_edge(&caller.reference(), callee))
                },
                |method| self.is_closed(&graph, method),
            )
        } else {
            CallSiteSummaries::default()
        };

        let heights = graph.heights();
        let tasks: Vec<TaskSpec> = (0..graph.method_count())
            .map(|node| TaskSpec::new(heights[node] as u64, graph.callees_of(node).collect()))
            .collect();
        PriorityScheduler::new(ictx.config.effective_threads()).run(&tasks, |node, handle| {
            self.process_caller(&graph, &summaries, node, handle)
        })?;

        let output = self.finish(&graph, heights.into_iter().max().unwrap_or(0))?;

        methods.par_iter().try_for_each(|method| {
            let mut code = write_lock!(method.code);
            match code.as_mut() {
                Some(code) => code.clear_cfg(),
                None => Ok(()),
            }
        })?;
        log::debug!("inliner: {}", output.stats);
        Ok(output)
    }

    // ── Per-caller task ─────────────────────────────────────────────────

    fn process_caller<'a>(
        &'a self,
        graph: &'a CallGraph,
        summaries: &CallSiteSummaries,
        node: usize,
        handle: &TaskHandle<'a>,
    ) -> Result<()> {
        let caller = graph.method(node);
        let changed = {
            let mut code = write_lock!(caller.code);
            let Some(cfg) = code.as_mut().and_then(IrCode::cfg_mut) else {
                return Ok(());
            };
            let plans = self.plan(graph, summaries, caller, cfg)?;
            self.apply(caller, cfg, plans)?
        };
        let frozen = caller.flags().contains(MethodFlags::NO_OPTIMIZATIONS);
        if !frozen && (changed || self.ictx.config.shrink_other_methods) {
            handle.augment(move || self.shrink_caller(caller));
        }
        Ok(())
    }

    fn shrink_caller(&self, caller: &DexMethod) -> Result<()> {
        let mut code = write_lock!(caller.code);
        if let Some(cfg) = code.as_mut().and_then(IrCode::cfg_mut) {
            self.ictx
                .shrinker
                .shrink_logged(cfg, &caller.reference(), &self.ictx.log)?;
        }
        Ok(())
    }

    fn reject(&self, caller: &DexMethod, callee: &DexMethod, reason: Rejection) {
        log::trace!("{} -> {}: {reason}", caller.reference(), callee.reference());
        self.ictx
            .log
            .record(EventKind::Rejected(reason))
            .method(caller.reference())
            .callee(callee.reference());
    }

    /// Collects the call sites of `caller` worth transforming.
    fn plan(
        &self,
        graph: &CallGraph,
        summaries: &CallSiteSummaries,
        caller: &DexMethod,
        cfg: &ControlFlowGraph,
    ) -> Result<Vec<Inlinable>> {
        let ictx = &self.ictx;
        let caller_ref = caller.reference();
        let invokes: Vec<(InsnPos, IrInstruction)> = cfg
            .instructions()
            .filter(|(_, insn)| insn.opcode().is_invoke())
            .map(|(pos, insn)| (pos, insn.clone()))
            .collect();

        let mut plans = Vec::new();
        for (pos, invoke) in invokes {
            let Some((callee, true_virtual)) =
                resolve_candidate(ictx, &self.candidates, caller, &invoke)
            else {
                continue;
            };
            let callee_ref = callee.reference();
            if !graph.has_edge(&caller_ref, &callee_ref) {
                continue;
            }
            let summary = match summaries.get(&caller_ref, pos) {
                Some(None) => {
                    ictx.log
                        .record(EventKind::UnreachableCallSite)
                        .method(caller_ref.clone())
                        .callee(callee_ref);
                    continue;
                }
                Some(Some(summary)) => Some(summary),
                None => None,
            };
            let Some(callee_cfg) = ictx.snapshot(&callee) else {
                self.reject(caller, &callee, Rejection::NotFound);
                continue;
            };
            let facts = ictx.facts(&callee, &callee_cfg);
            let cost = ictx.cost(&callee, &callee_cfg, summary.as_deref());
            let block = source_block_of(cfg, pos.block());
            let speed = ictx.for_speed(caller, &callee, block);
            let mut plan = Inlinable {
                pos,
                invoke,
                callee: Arc::clone(&callee),
                body: Body::NoReturn,
                facts: Arc::clone(&facts),
                init: None,
                true_virtual,
                for_speed: speed == Some(true),
                cold: speed == Some(false),
                size: 0,
            };

            if ictx.config.throw_after_no_return && cost.no_return {
                plans.push(plan);
                continue;
            }

            let site = CallSite {
                caller,
                caller_cfg: cfg,
                pos,
                callee: &callee,
                callee_cfg: &callee_cfg,
                facts: &facts,
                callee_size: callee_cfg.estimate_code_units(),
            };
            plan.init = match check_call_site(ictx, &site) {
                Ok(init) => init,
                Err(reason) => {
                    self.reject(caller, &callee, reason);
                    continue;
                }
            };

            match self.choose_body(graph, caller, &plan, &callee_cfg, &cost, summary.as_deref(), block)? {
                Some(body) => {
                    if let Body::Partial(partial) = &body {
                        plan.facts = Arc::new(CalleeFacts::collect(ictx, &callee, &partial.cfg));
                    }
                    plan.size = body.cfg().map_or(0, ControlFlowGraph::estimate_code_units);
                    plan.body = body;
                    plans.push(plan);
                }
                None => {
                    ictx.log
                        .record(EventKind::CallNotInlined)
                        .method(caller_ref.clone())
                        .callee(callee_ref);
                }
            }
        }
        Ok(plans)
    }

    /// Applies the cost model to one call site that passed every gate.
    #[allow(clippy::too_many_arguments)]
    fn choose_body(
        &self,
        graph: &CallGraph,
        caller: &DexMethod,
        plan: &Inlinable,
        callee_cfg: &Arc<ControlFlowGraph>,
        cost: &InlinedCost,
        summary: Option<&CallSiteSummary>,
        block: Option<&SourceBlock>,
    ) -> Result<Option<Body>> {
        let ictx = &self.ictx;
        let config = &ictx.config;
        let callee = &plan.callee;
        let callee_ref = callee.reference();

        let reduced = match summary {
            Some(summary) => ictx.reduced(callee, callee_cfg, summary)?,
            None => None,
        };
        let (site_cost, body_cfg) = match &reduced {
            Some(reduced) => (cost.clone().with_code(reduced.code), &reduced.cfg),
            None => (cost.clone(), callee_cfg.as_ref()),
        };

        let arity = plan.invoke.srcs().len();
        let discount = self.discount(caller, block, &site_cost, body_cfg);
        let benefit = site_benefit(
            &config.cost,
            &site_cost,
            arity,
            self.is_cross_dex(caller, callee),
            discount,
        );
        let forced = callee.flags().contains(MethodFlags::FORCE_INLINE);
        let pervasive = !plan.cold
            && !plan.true_virtual
            && self.is_deletable(graph, callee)
            && ictx.is_pervasive(callee, callee_cfg, arity, graph.occurrences(&callee_ref));
        log::trace!(
            "{} -> {callee_ref}: benefit {benefit:.1}, pervasive {pervasive}",
            caller.reference()
        );

        if forced || benefit >= 0.0 || pervasive {
            return Ok(Some(match reduced {
                Some(reduced) => Body::Reduced(reduced),
                None => Body::Full(Arc::clone(callee_cfg)),
            }));
        }

        let hot_hot = config.partial_hot_hot_inline && ictx.is_hot(caller) && ictx.is_hot(callee);
        if hot_hot && !callee.is_init() {
            if let Some(partial) = build_partial(
                callee,
                callee_cfg,
                plan.invoke.opcode(),
                &config.cost,
                config.partial_inline_max_code_units,
            )? {
                if pays_off(&partial, &config.cost, cost.full_code) {
                    return Ok(Some(Body::Partial(Box::new(partial))));
                }
            }
        }
        Ok(None)
    }

    fn discount(
        &self,
        caller: &DexMethod,
        block: Option<&SourceBlock>,
        cost: &InlinedCost,
        body: &ControlFlowGraph,
    ) -> f32 {
        match (&self.ictx.profile, block) {
            (Some(profile), Some(block)) if self.ictx.is_hot(caller) && profile.is_hot_block(block) => {
                let hot_fraction = profile.hot_fraction(body).unwrap_or(0.0);
                profile_discount(&self.ictx.config.cost, cost, hot_fraction)
            }
            _ => 1.0,
        }
    }

    fn is_cross_dex(&self, caller: &DexMethod, callee: &DexMethod) -> bool {
        let ctx = self.ictx.ctx.as_ref();
        match (ctx.class_of(&caller.class()), ctx.class_of(&callee.class())) {
            (Some(a), Some(b)) => a.dex() != b.dex(),
            _ => false,
        }
    }

    /// Returns `true` if every call of `method` is known, so that inlining all of them
    /// leaves it dead.
    fn is_closed(&self, graph: &CallGraph, method: &DexMethod) -> bool {
        let reference = method.reference();
        !method.flags().contains(MethodFlags::ROOT)
            && !method.is_virtual()
            && !graph.is_recursive(&reference)
            && !graph.has_pruned_callers(&reference)
            && !graph.is_true_virtual_callee(&reference)
            && !self.ictx.is_true_virtual_target(&reference)
    }

    fn is_deletable(&self, graph: &CallGraph, method: &DexMethod) -> bool {
        let argless_init = method.is_init() && method.proto().args().is_empty();
        self.is_closed(graph, method)
            && !argless_init
            && (self.ictx.config.multiple_callers || graph.caller_count(&method.reference()) <= 1)
    }

    /// Transforms the planned call sites of `caller`; returns whether anything changed.
    fn apply(
        &self,
        caller: &DexMethod,
        cfg: &mut ControlFlowGraph,
        mut plans: Vec<Inlinable>,
    ) -> Result<bool> {
        let ictx = &self.ictx;
        let config = &ictx.config;
        let caller_ref = caller.reference();
        plans.sort_by_key(Inlinable::sort_key);

        let base_registers = cfg.registers_size();
        let mut positions: Vec<Option<InsnPos>> = plans.iter().map(|p| Some(p.pos)).collect();
        let mut changes = VisibilityChanges::default();
        let mut changed = false;
        let mut shrunk = false;

        for i in 0..plans.len() {
            let plan = &plans[i];
            let callee_ref = plan.callee.reference();
            let Some(pos) = positions[i]
                .filter(|&p| cfg.get_insn(p).is_some_and(|insn| same_call(insn, &plan.invoke)))
            else {
                continue;
            };

            let Some(body) = plan.body.cfg() else {
                cut_after_no_return(cfg, pos)?;
                ictx.retained.insert(callee_ref.clone());
                ictx.log
                    .record(EventKind::NoReturnCut)
                    .at(caller_ref.clone(), pos.block().index())
                    .callee(callee_ref);
                changed = true;
                continue;
            };

            let mut fits = check_size(ictx, cfg.estimate_code_units(), plan.size);
            if fits.is_err() && config.intermediate_shrinking && !shrunk {
                cfg.remove_unreachable_blocks();
                ictx.shrinker.shrink_logged(cfg, &caller_ref, &ictx.log)?;
                relocate(cfg, &plans, &mut positions, i);
                shrunk = true;
                fits = check_size(ictx, cfg.estimate_code_units(), plan.size);
            }
            if let Err(reason) = fits {
                self.reject(caller, &plan.callee, reason);
                continue;
            }
            let Some(pos) = positions[i] else {
                continue;
            };

            let next_reg = if config.unique_inlined_registers {
                cfg.registers_size()
            } else {
                base_registers
            };
            let options = self.inline_options(caller, plan);
            let relocated = self.relocate_super_calls(caller, &plan.callee, body);
            let result = inline_cfg(cfg, pos, relocated.as_ref().unwrap_or(body), next_reg, &options)?;
            for later in positions.iter_mut().skip(i + 1) {
                *later = later.and_then(|p| result.remap(p));
            }
            changed = true;
            shrunk = false;

            if let Body::Partial(_) = plan.body {
                ictx.inlined.insert(callee_ref.clone());
                ictx.retained.insert(callee_ref.clone());
                ictx.log
                    .record(EventKind::PartialInline)
                    .at(caller_ref.clone(), pos.block().index())
                    .callee(callee_ref.clone());
            } else {
                ictx.record_inlined(&callee_ref);
                ictx.log
                    .record(EventKind::CallInlined)
                    .at(caller_ref.clone(), pos.block().index())
                    .callee(callee_ref.clone());
            }
            if body.return_blocks().len() > 1 {
                ictx.log
                    .record(EventKind::MultipleReturns)
                    .method(caller_ref.clone())
                    .callee(callee_ref.clone());
            }
            if options.needs_constructor_fence {
                ictx.write_barriers.insert(caller_ref.clone());
                ictx.log
                    .record(EventKind::WriteBarrierInserted)
                    .method(caller_ref.clone())
                    .callee(callee_ref.clone());
            }

            let caller_class = caller.class();
            changes.merge(changes_for(
                ictx.ctx.as_ref(),
                ictx.resolver.as_ref(),
                &ictx.fields,
                &caller_class,
                &plan.facts,
            ));
            for method in needs_static(&caller_class, &plan.facts) {
                ictx.make_static.insert(method);
            }
        }

        ictx.merge_visibility(changes);
        Ok(changed)
    }

    fn inline_options(&self, caller: &DexMethod, plan: &Inlinable) -> InlineOptions {
        let ictx = &self.ictx;
        let callee = &plan.callee;
        let mut options = InlineOptions::default();
        let invoked_class = plan.invoke.method().map(|m| m.class().clone());
        if plan.true_virtual && !callee.is_static() && invoked_class != Some(callee.class()) {
            options = options.with_receiver_cast(callee.class());
        }
        if callee.is_static() {
            if let Some(ty) = ictx.init_classes.needs_init_class(&caller.class(), &callee.class()) {
                options = options.with_init_class(ty);
            }
        }
        if let Some(init) = plan.init.as_ref().filter(|init| init.needs_fence) {
            if self.unfinalizes(caller, plan) {
                for field in &init.final_fields {
                    ictx.unfinalize.insert(field.clone());
                }
            } else {
                options = options.with_constructor_fence(true);
            }
        }
        options
    }

    /// Decides between dropping `final` and fencing for a relaxed constructor inline.
    fn unfinalizes(&self, caller: &DexMethod, plan: &Inlinable) -> bool {
        let config = &self.ictx.config;
        if !config.unfinalize_relaxed_init_inline {
            return false;
        }
        let hot = self.ictx.is_hot(caller);
        match config.unfinalize_perf_mode {
            UnfinalizePerfMode::Off => false,
            UnfinalizePerfMode::NotCold => !plan.cold,
            UnfinalizePerfMode::MaybeHot => hot || plan.for_speed,
            UnfinalizePerfMode::Hot => hot,
        }
    }

    /// Rewrites the `invoke-super` calls of a body moving out of its class as direct
    /// dispatches to their final targets.
    fn relocate_super_calls(
        &self,
        caller: &DexMethod,
        callee: &DexMethod,
        body: &ControlFlowGraph,
    ) -> Option<ControlFlowGraph> {
        let has_super = body
            .instructions()
            .any(|(_, insn)| insn.opcode() == IrOpcode::InvokeSuper);
        if !has_super || caller.class() == callee.class() {
            return None;
        }
        let mut copy = body.deep_copy();
        for (_, insn) in copy.instructions_mut() {
            if insn.opcode() != IrOpcode::InvokeSuper {
                continue;
            }
            let target = insn
                .method()
                .and_then(|m| self.ictx.resolver.resolve(m, MethodSearch::Super, Some(callee)));
            if let Some(target) = target {
                insn.set_opcode(IrOpcode::InvokeVirtual);
                insn.set_method(target.reference());
            }
        }
        Some(copy)
    }

    // ── Post-processing ─────────────────────────────────────────────────

    fn finish(&self, graph: &CallGraph, depth: usize) -> Result<InlinerOutput> {
        let ictx = &self.ictx;
        let ctx = ictx.ctx.as_ref();

        let delete: BTreeSet<DexMethodRef> = ictx
            .inlined
            .iter()
            .map(|r| r.key().clone())
            .filter(|r| self.is_fully_inlined(graph, r))
            .collect();
        for method in &delete {
            ictx.log.record(EventKind::MethodRemoved).method(method.clone());
        }

        let visibility = std::mem::take(&mut *lock!(ictx.visibility));
        visibility.apply(ctx, &ictx.log);

        let pending: Vec<DexMethodRef> = ictx
            .make_static
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|m| !delete.contains(m))
            .collect();
        let make_static = staticize(ctx, &pending, &ictx.log)?
            .into_iter()
            .map(|(_, new)| new)
            .collect();

        let unfinalize: BTreeSet<_> = ictx.unfinalize.iter().map(|f| f.key().clone()).collect();
        for field in unfinalize {
            if let Some(def) = ctx.field_def(&field) {
                def.set_access(def.access().difference(AccessFlags::FINAL));
                ictx.log
                    .record(EventKind::FieldUnfinalized)
                    .message(field.to_string());
            }
        }

        let stats = InlinerStats::from_log(&ictx.log)
            .with_max_call_stack_depth(depth)
            .with_time(ictx.elapsed());
        Ok(InlinerOutput {
            inlined: ictx.inlined.iter().map(|r| r.key().clone()).collect(),
            delete,
            make_static,
            methods_with_write_barrier: ictx.write_barriers.iter().map(|r| r.key().clone()).collect(),
            stats,
            events: ictx.log.clone(),
        })
    }

    fn is_fully_inlined(&self, graph: &CallGraph, method: &DexMethodRef) -> bool {
        let Some(node) = graph.node_of(method) else {
            return false;
        };
        self.ictx.inlined_count(method) == graph.occurrences(method)
            && !self.ictx.retained.contains(method)
            && self.is_deletable(graph, graph.method(node))
    }
}

/// Replaces the code after the no-return call at `pos` by `unreachable; throw`.
fn cut_after_no_return(cfg: &mut ControlFlowGraph, pos: InsnPos) -> Result<()> {
    if let Some(result) = cfg.move_result_of(pos) {
        cfg.remove_insn(result)?;
    }
    let tmp = cfg.allocate_temp();
    cfg.insert_after(
        pos,
        vec![
            IrInstruction::new(IrOpcode::Unreachable).with_dest(tmp),
            IrInstruction::new(IrOpcode::Throw).with_srcs(vec![tmp]),
        ],
    )?;
    cfg.remove_unreachable_blocks();
    Ok(())
}

/// Finds the call sites of `plans[from..]` again after the caller was shrunk.
///
/// Calls are matched in block order; a plan whose call disappeared loses its position.
fn relocate(cfg: &ControlFlowGraph, plans: &[Inlinable], positions: &mut [Option<InsnPos>], from: usize) {
    let mut invokes: Vec<(InsnPos, &IrInstruction)> = cfg
        .instructions()
        .filter(|(_, insn)| insn.opcode().is_invoke())
        .collect();
    let mut order: Vec<usize> = (from..plans.len()).filter(|&j| positions[j].is_some()).collect();
    order.sort_by_key(|&j| positions[j]);
    for j in order {
        let found = invokes
            .iter()
            .position(|(_, insn)| same_call(insn, &plans[j].invoke));
        positions[j] = found.map(|k| invokes.remove(k).0);
    }
}
