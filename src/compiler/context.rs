//! Shared state of one inlining run.
//!
//! The [`InlinerContext`] holds the inputs every worker reads (configuration, resolver,
//! oracles) and the state workers share across callers. All shared collections are
//! concurrent: per-callee caches are insert-only maps where the first worker to need a
//! value computes it and every later worker sees that same value, and the output sets are
//! `DashSet`s ordered only when the serial post-processing reads them.

use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use crossbeam_skiplist::SkipSet;
use dashmap::{DashMap, DashSet};

use crate::{
    analysis::InitClassesWithSideEffects,
    cfg::ControlFlowGraph,
    compiler::{
        cost::{is_pervasive, InlinedCost},
        gates::CalleeFacts,
        summaries::{CallSiteSummary, ReducedCallee, SummaryInterner},
        visibility::VisibilityChanges,
        BaselineProfile, EventLog, InlinerConfig, Shrinker,
    },
    ir::SourceBlock,
    model::{
        ApiLevelChecker, ConcurrentMethodResolver, ContextResolver, DexContext, DexFieldRef,
        DexMethod, DexMethodRef, MethodResolver, XStoreRefs,
    },
    Result,
};

/// Predicate deciding whether inlining `callee` into `caller` at a block pays off for speed.
pub type InlineForSpeed = dyn Fn(&DexMethod, &DexMethod, Option<&SourceBlock>) -> bool + Send + Sync;

/// Returns the cached value for `key`, computing it with `make` on a miss.
///
/// Two workers missing at once may both compute; the first insert wins and both return it.
fn get_or_create<K, V>(map: &DashMap<K, V>, key: K, make: impl FnOnce() -> V) -> V
where
    K: Eq + Hash,
    V: Clone,
{
    if let Some(value) = map.get(&key) {
        return value.clone();
    }
    let value = make();
    map.entry(key).or_insert(value).value().clone()
}

/// Inputs and shared state of one inlining run.
pub(crate) struct InlinerContext {
    /// The program.
    pub ctx: Arc<DexContext>,
    /// Engine options.
    pub config: InlinerConfig,
    /// Resolves invoked method references.
    pub resolver: Arc<dyn MethodResolver>,
    /// Resolves accessed field references.
    pub fields: ContextResolver,
    /// Store partitioning, when cross-store references must be checked.
    pub xstores: Option<XStoreRefs>,
    /// Per-method API levels.
    pub api: ApiLevelChecker,
    /// Decides which static callees need an `init-class`.
    pub init_classes: InitClassesWithSideEffects,
    /// Hot methods and classes.
    pub profile: Option<BaselineProfile>,
    /// Optional profitability gate for hot code.
    pub inline_for_speed: Option<Arc<InlineForSpeed>>,
    /// Concrete targets of virtual calls, keyed by caller and invoked reference.
    pub true_virtuals: HashMap<(DexMethodRef, DexMethodRef), DexMethodRef>,
    /// Cleans up callers after inlining.
    pub shrinker: Shrinker,
    /// Decisions and diagnostics.
    pub log: EventLog,
    /// Interned call-site summaries.
    pub summaries: SummaryInterner,

    // ── Per-callee caches ───────────────────────────────────────────────
    snapshots: DashMap<DexMethodRef, Arc<ControlFlowGraph>>,
    facts: DashMap<DexMethodRef, Arc<CalleeFacts>>,
    costs: DashMap<(DexMethodRef, String), Arc<InlinedCost>>,
    pervasive: DashMap<DexMethodRef, bool>,
    reduced: DashMap<(DexMethodRef, String), Option<Arc<ReducedCallee>>>,

    // ── Outputs ─────────────────────────────────────────────────────────
    /// Members whose access must be widened.
    pub visibility: Mutex<VisibilityChanges>,
    /// Private methods to be rewritten as static, in method-key order.
    pub make_static: SkipSet<DexMethodRef>,
    /// Callees inlined at least once.
    pub inlined: DashSet<DexMethodRef>,
    /// Callers that received a constructor fence.
    pub write_barriers: DashSet<DexMethodRef>,
    /// Final fields to unfinalize instead of fencing.
    pub unfinalize: DashSet<DexFieldRef>,
    /// Callees that must survive even if every call was inlined.
    pub retained: DashSet<DexMethodRef>,
    /// Number of call sites inlined per callee.
    pub inlined_counts: DashMap<DexMethodRef, usize>,

    start: Instant,
}

impl InlinerContext {
    /// Creates a context with the default resolver, API checker and init-class oracle.
    pub fn new(ctx: Arc<DexContext>, config: InlinerConfig) -> Self {
        let resolver: Arc<dyn MethodResolver> =
            Arc::new(ConcurrentMethodResolver::new(ContextResolver::new(Arc::clone(&ctx))));
        Self {
            fields: ContextResolver::new(Arc::clone(&ctx)),
            init_classes: InitClassesWithSideEffects::new(Arc::clone(&ctx)),
            shrinker: Shrinker::new(config.shrinker.clone()),
            resolver,
            xstores: None,
            api: ApiLevelChecker::default(),
            profile: None,
            inline_for_speed: None,
            true_virtuals: HashMap::new(),
            log: EventLog::new(),
            summaries: SummaryInterner::new(),
            snapshots: DashMap::new(),
            facts: DashMap::new(),
            costs: DashMap::new(),
            pervasive: DashMap::new(),
            reduced: DashMap::new(),
            visibility: Mutex::new(VisibilityChanges::default()),
            make_static: SkipSet::new(),
            inlined: DashSet::new(),
            write_barriers: DashSet::new(),
            unfinalize: DashSet::new(),
            retained: DashSet::new(),
            inlined_counts: DashMap::new(),
            start: Instant::now(),
            ctx,
            config,
        }
    }

    /// Replaces the method resolver.
    pub fn with_resolver(mut self, resolver: Arc<dyn MethodResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Enables cross-store checks.
    pub fn with_xstores(mut self, xstores: XStoreRefs) -> Self {
        self.xstores = Some(xstores);
        self
    }

    /// Replaces the API level checker.
    pub fn with_api_level_checker(mut self, api: ApiLevelChecker) -> Self {
        self.api = api;
        self
    }

    /// Replaces the init-class oracle.
    pub fn with_init_classes(mut self, init_classes: InitClassesWithSideEffects) -> Self {
        self.init_classes = init_classes;
        self
    }

    /// Sets the baseline profile.
    pub fn with_profile(mut self, profile: BaselineProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Sets the speed gate.
    pub fn with_inline_for_speed(mut self, gate: Arc<InlineForSpeed>) -> Self {
        self.inline_for_speed = Some(gate);
        self
    }

    /// Records that `invoked` called from `caller` always dispatches to `target`.
    pub fn with_true_virtual(
        mut self,
        caller: DexMethodRef,
        invoked: DexMethodRef,
        target: DexMethodRef,
    ) -> Self {
        self.true_virtuals.insert((caller, invoked), target);
        self
    }

    /// Time since the context was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Returns the concrete target of `invoked` in `caller`, if one was supplied.
    pub fn true_virtual(&self, caller: &DexMethodRef, invoked: &DexMethodRef) -> Option<&DexMethodRef> {
        self.true_virtuals.get(&(caller.clone(), invoked.clone()))
    }

    /// Returns `true` if `method` is the concrete target of some true-virtual call.
    pub fn is_true_virtual_target(&self, method: &DexMethodRef) -> bool {
        self.true_virtuals.values().any(|t| t == method)
    }

    // ── Callee caches ───────────────────────────────────────────────────

    /// Returns the final body of `callee`.
    ///
    /// Must only be called once no task edits `callee` any more.
    pub fn snapshot(&self, callee: &DexMethod) -> Option<Arc<ControlFlowGraph>> {
        let reference = callee.reference();
        if let Some(cfg) = self.snapshots.get(&reference) {
            return Some(Arc::clone(&cfg));
        }
        let copy = {
            let code = read_lock!(callee.code);
            code.as_ref()?.cfg()?.deep_copy()
        };
        Some(get_or_create(&self.snapshots, reference, || Arc::new(copy)))
    }

    /// Returns the call-site independent facts of `callee`.
    pub fn facts(&self, callee: &DexMethod, cfg: &ControlFlowGraph) -> Arc<CalleeFacts> {
        get_or_create(&self.facts, callee.reference(), || {
            Arc::new(CalleeFacts::collect(self, callee, cfg))
        })
    }

    /// Returns the cost of `callee`, specialized to `summary` when one is given.
    pub fn cost(
        &self,
        callee: &DexMethod,
        cfg: &ControlFlowGraph,
        summary: Option<&CallSiteSummary>,
    ) -> Arc<InlinedCost> {
        let key = (callee.reference(), summary.map(CallSiteSummary::key).unwrap_or_default());
        get_or_create(&self.costs, key, || {
            Arc::new(InlinedCost::compute(&self.ctx, cfg, &self.config.cost, summary))
        })
    }

    /// Returns `true` if inlining `callee` at all of its `sites` and deleting it does not
    /// grow the program.
    pub fn is_pervasive(
        &self,
        callee: &DexMethod,
        cfg: &ControlFlowGraph,
        arity: usize,
        sites: usize,
    ) -> bool {
        get_or_create(&self.pervasive, callee.reference(), || {
            let cost = self.cost(callee, cfg, None);
            is_pervasive(&self.config.cost, &cost, arity, sites)
        })
    }

    /// Returns `callee` specialized to `summary`, or `None` if no worthwhile
    /// specialization exists.
    ///
    /// # Errors
    ///
    /// Returns an error if shrinking the specialized body fails.
    pub fn reduced(
        &self,
        callee: &DexMethod,
        cfg: &ControlFlowGraph,
        summary: &CallSiteSummary,
    ) -> Result<Option<Arc<ReducedCallee>>> {
        if !self.config.use_call_site_summaries || !summary.has_constant_arguments() {
            return Ok(None);
        }
        let key = (callee.reference(), summary.key());
        if let Some(reduced) = self.reduced.get(&key) {
            return Ok(reduced.clone());
        }
        let full = self.cost(callee, cfg, None).full_code;
        let built = if full > self.config.max_cost_for_constant_propagation {
            None
        } else {
            let reduced =
                ReducedCallee::build(&self.ctx, cfg, summary, &self.shrinker, &self.config.cost)?;
            (reduced.code < full && reduced.code <= self.config.max_reduced_size)
                .then(|| Arc::new(reduced))
        };
        Ok(get_or_create(&self.reduced, key, || built))
    }

    // ── Profile ─────────────────────────────────────────────────────────

    /// Asks the speed gate about one call site; `None` without a gate.
    pub fn for_speed(
        &self,
        caller: &DexMethod,
        callee: &DexMethod,
        block: Option<&SourceBlock>,
    ) -> Option<bool> {
        self.inline_for_speed
            .as_ref()
            .map(|gate| gate(caller, callee, block))
    }

    /// Returns `true` if the profile marks `method` hot.
    pub fn is_hot(&self, method: &DexMethod) -> bool {
        self.profile
            .as_ref()
            .is_some_and(|p| p.is_hot_method(&method.reference()))
    }

    // ── Outputs ─────────────────────────────────────────────────────────

    /// Counts one inlined call of `callee`.
    pub fn record_inlined(&self, callee: &DexMethodRef) {
        self.inlined.insert(callee.clone());
        *self.inlined_counts.entry(callee.clone()).or_default() += 1;
    }

    /// Number of call sites of `callee` inlined so far.
    pub fn inlined_count(&self, callee: &DexMethodRef) -> usize {
        self.inlined_counts.get(callee).map_or(0, |n| *n)
    }

    /// Merges visibility changes found while inlining one caller.
    pub fn merge_visibility(&self, changes: VisibilityChanges) {
        if !changes.is_empty() {
            lock!(self.visibility).merge(changes);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::test::{built_cfg, create_static_method};

    /// Builds a context over a fresh program populated by `setup`.
    pub(crate) fn context_with(config: InlinerConfig, setup: impl FnOnce(&DexContext)) -> InlinerContext {
        let ctx = DexContext::new();
        setup(&ctx);
        InlinerContext::new(Arc::new(ctx), config)
    }

    #[test]
    fn test_caches_compute_once() {
        let ictx = context_with(InlinerConfig::debug(), |_| {});
        let callee = create_static_method(
            &ictx.ctx,
            "LA;.f:(I)I",
            "((load-param v0) (add-int/lit v0 v0 1) (return v0))",
        );
        built_cfg(&callee);
        let snapshot = ictx.snapshot(&callee).unwrap();
        assert!(Arc::ptr_eq(&snapshot, &ictx.snapshot(&callee).unwrap()));

        let a = ictx.cost(&callee, &snapshot, None);
        let b = ictx.cost(&callee, &snapshot, None);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.full_code, 3);

        let used = CallSiteSummary {
            result_used: false,
            ..CallSiteSummary::default()
        };
        let c = ictx.cost(&callee, &snapshot, Some(&used));
        assert_eq!(c.result_used, 0.0);
        assert!(Arc::ptr_eq(&ictx.facts(&callee, &snapshot), &ictx.facts(&callee, &snapshot)));
    }

    #[test]
    fn test_snapshot_requires_cfg() {
        let ictx = context_with(InlinerConfig::debug(), |_| {});
        let linear = create_static_method(&ictx.ctx, "LA;.g:()V", "((return-void))");
        assert!(ictx.snapshot(&linear).is_none());
    }

    #[test]
    fn test_reduced_callee_cached() {
        let ictx = context_with(InlinerConfig::debug(), |_| {});
        let callee = create_static_method(
            &ictx.ctx,
            "LA;.pick:(I)I",
            r#"((load-param v0)
                (if-eqz v0 :zero)
                (mul-int/lit v1 v0 7)
                (add-int/lit v1 v1 3)
                (mul-int/lit v1 v1 5)
                (return v1)
                (:zero)
                (const v1 1)
                (return v1))"#,
        );
        let cfg = built_cfg(&callee);
        let mut summary = CallSiteSummary::default();
        summary
            .arguments
            .insert(0, crate::analysis::ConstantValue::constant(0));
        let reduced = ictx.reduced(&callee, &cfg, &summary).unwrap().unwrap();
        assert!(reduced.code < ictx.cost(&callee, &cfg, None).full_code);
        let again = ictx.reduced(&callee, &cfg, &summary).unwrap().unwrap();
        assert!(Arc::ptr_eq(&reduced, &again));

        assert!(ictx
            .reduced(&callee, &cfg, &CallSiteSummary::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_record_inlined() {
        let ictx = context_with(InlinerConfig::debug(), |_| {});
        let m = ictx.ctx.make_method_from_str("LA;.f:()V").unwrap();
        ictx.record_inlined(&m);
        ictx.record_inlined(&m);
        assert_eq!(ictx.inlined_count(&m), 2);
        assert!(ictx.inlined.contains(&m));
    }
}
