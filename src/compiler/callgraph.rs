//! The caller/callee graph of inlining candidates.
//!
//! Nodes are methods with code; an edge `caller -> callee` carries the number of call sites
//! in `caller` that resolve to `callee`. Only callees from the candidate set appear as edge
//! targets. After [`CallGraph::prune_recursion`] the graph is a DAG, which the scheduler
//! walks bottom-up and the call-site summaries walk top-down.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use crate::{
    compiler::{context::InlinerContext, gates::is_final_target, EventKind, EventLog},
    ir::{IrInstruction, IrOpcode},
    model::{DexMethod, DexMethodRef, MethodSearch},
    utils::graph::{algorithms::topological_sort, GraphBase, NodeId, Predecessors, Successors},
};

/// Resolves the invoke `insn` of `caller` to an inlining candidate.
///
/// Returns the callee and whether it was supplied as the concrete target of a virtual call.
/// Virtual and interface calls only count when the target cannot be overridden.
pub(crate) fn resolve_candidate(
    ictx: &InlinerContext,
    candidates: &BTreeSet<DexMethodRef>,
    caller: &DexMethod,
    insn: &IrInstruction,
) -> Option<(Arc<DexMethod>, bool)> {
    let invoked = insn.method()?;
    let op = insn.opcode();
    let (callee, true_virtual) = match ictx.true_virtual(&caller.reference(), invoked) {
        Some(target) => (ictx.ctx.method_def(target)?, true),
        None => {
            let search = MethodSearch::from_opcode(op)?;
            let callee = ictx.resolver.resolve(invoked, search, Some(caller))?;
            let virtual_call = matches!(op, IrOpcode::InvokeVirtual | IrOpcode::InvokeInterface);
            if virtual_call && !is_final_target(ictx, &callee) {
                return None;
            }
            (callee, false)
        }
    };
    (candidates.contains(&callee.reference()) && callee.has_code()).then_some((callee, true_virtual))
}

/// Caller/callee occurrence graph over methods with code.
#[derive(Debug, Default)]
pub struct CallGraph {
    methods: Vec<Arc<DexMethod>>,
    index: HashMap<DexMethodRef, usize>,
    callees: Vec<BTreeMap<usize, usize>>,
    callers: Vec<BTreeMap<usize, usize>>,
    recursive: BTreeSet<DexMethodRef>,
    pruned_callers: BTreeSet<usize>,
    true_virtual_callees: BTreeSet<DexMethodRef>,
}

impl CallGraph {
    /// Records every call from a method with code to a candidate.
    ///
    /// Methods without a built CFG contribute no calls.
    pub(crate) fn discover(ictx: &InlinerContext, candidates: &BTreeSet<DexMethodRef>) -> Self {
        let mut graph = CallGraph::default();
        for method in ictx.ctx.all_methods() {
            if !method.has_code() {
                continue;
            }
            let caller = graph.add_node(&method);
            let code = read_lock!(method.code);
            let Some(cfg) = code.as_ref().and_then(|c| c.cfg()) else {
                continue;
            };
            for (_, insn) in cfg.instructions() {
                if !insn.opcode().is_invoke() {
                    continue;
                }
                let Some((callee, true_virtual)) = resolve_candidate(ictx, candidates, &method, insn)
                else {
                    continue;
                };
                if callee.reference() == method.reference() {
                    graph.recursive.insert(callee.reference());
                    continue;
                }
                if true_virtual {
                    graph.true_virtual_callees.insert(callee.reference());
                }
                let target = graph.add_node(&callee);
                *graph.callees[caller].entry(target).or_default() += 1;
                *graph.callers[target].entry(caller).or_default() += 1;
            }
        }
        log::debug!(
            "call graph: {} methods, {} edges",
            graph.methods.len(),
            graph.edge_count()
        );
        graph
    }

    fn add_node(&mut self, method: &Arc<DexMethod>) -> usize {
        let reference = method.reference();
        if let Some(&node) = self.index.get(&reference) {
            return node;
        }
        let node = self.methods.len();
        self.methods.push(Arc::clone(method));
        self.index.insert(reference, node);
        self.callees.push(BTreeMap::new());
        self.callers.push(BTreeMap::new());
        node
    }

    fn remove_edge(&mut self, caller: usize, callee: usize) -> usize {
        self.callers[callee].remove(&caller);
        self.callees[caller].remove(&callee).unwrap_or(0)
    }

    /// Removes every edge that closes a cycle and marks its target recursive.
    ///
    /// The search visits nodes and callees in index order, so the pruned edges are the same
    /// on every run. Returns the number of pruned call sites.
    pub(crate) fn prune_recursion(&mut self, log: &EventLog) -> usize {
        #[derive(Clone, Copy, PartialEq)]
        enum State {
            New,
            Active,
            Done,
        }

        let mut state = vec![State::New; self.methods.len()];
        let mut pruned = 0;
        for root in 0..self.methods.len() {
            if state[root] != State::New {
                continue;
            }
            state[root] = State::Active;
            let mut stack: Vec<(usize, Vec<usize>)> =
                vec![(root, self.callees[root].keys().rev().copied().collect())];
            while let Some((node, pending)) = stack.last_mut() {
                let node = *node;
                let Some(next) = pending.pop() else {
                    state[node] = State::Done;
                    stack.pop();
                    continue;
                };
                match state[next] {
                    State::New => {
                        state[next] = State::Active;
                        let callees = self.callees[next].keys().rev().copied().collect();
                        stack.push((next, callees));
                    }
                    State::Active => {
                        let sites = self.remove_edge(node, next);
                        pruned += sites;
                        self.pruned_callers.insert(next);
                        let callee = self.methods[next].reference();
                        log.record(EventKind::RecursionPruned)
                            .method(self.methods[node].reference())
                            .callee(callee.clone())
                            .message(format!("{sites} call sites"));
                        self.recursive.insert(callee);
                    }
                    State::Done => {}
                }
            }
        }
        pruned
    }

    /// Number of nodes.
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Number of distinct caller/callee pairs.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.callees.iter().map(BTreeMap::len).sum()
    }

    /// The method at `node`.
    pub(crate) fn method(&self, node: usize) -> &Arc<DexMethod> {
        &self.methods[node]
    }

    /// All nodes in index order.
    pub(crate) fn methods(&self) -> &[Arc<DexMethod>] {
        &self.methods
    }

    /// Returns the node of `method`.
    #[must_use]
    pub fn node_of(&self, method: &DexMethodRef) -> Option<usize> {
        self.index.get(method).copied()
    }

    /// Returns `true` if `caller` still has an edge to `callee`.
    #[must_use]
    pub fn has_edge(&self, caller: &DexMethodRef, callee: &DexMethodRef) -> bool {
        match (self.node_of(caller), self.node_of(callee)) {
            (Some(a), Some(b)) => self.callees[a].contains_key(&b),
            _ => false,
        }
    }

    /// Callee nodes of `node`.
    pub(crate) fn callees_of(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.callees[node].keys().copied()
    }

    /// Number of remaining call sites targeting `callee`.
    #[must_use]
    pub fn occurrences(&self, callee: &DexMethodRef) -> usize {
        self.node_of(callee)
            .map_or(0, |n| self.callers[n].values().sum())
    }

    /// Number of distinct callers of `callee`.
    #[must_use]
    pub fn caller_count(&self, callee: &DexMethodRef) -> usize {
        self.node_of(callee).map_or(0, |n| self.callers[n].len())
    }

    /// Returns `true` if `method` calls itself or closed a pruned cycle.
    #[must_use]
    pub fn is_recursive(&self, method: &DexMethodRef) -> bool {
        self.recursive.contains(method)
    }

    /// Returns the methods found recursive.
    #[must_use]
    pub fn recursive(&self) -> &BTreeSet<DexMethodRef> {
        &self.recursive
    }

    /// Returns `true` if some call into `method` was pruned.
    #[must_use]
    pub fn has_pruned_callers(&self, method: &DexMethodRef) -> bool {
        self.node_of(method)
            .is_some_and(|n| self.pruned_callers.contains(&n))
    }

    /// Returns `true` if `method` was reached through a supplied true-virtual target.
    #[must_use]
    pub fn is_true_virtual_callee(&self, method: &DexMethodRef) -> bool {
        self.true_virtual_callees.contains(method)
    }

    /// Returns the nodes with callers listed before their callees, or `None` while the
    /// graph still has a cycle.
    #[must_use]
    pub fn top_down_order(&self) -> Option<Vec<usize>> {
        topological_sort(self).map(|order| order.into_iter().map(|n| n.index()).collect())
    }

    /// Returns `true` if the graph has no cycle.
    #[must_use]
    pub fn is_dag(&self) -> bool {
        self.top_down_order().is_some()
    }

    /// Height of every node: 1 for methods calling no candidate, otherwise one more than
    /// the highest callee.
    ///
    /// The graph must be a DAG.
    #[must_use]
    pub fn heights(&self) -> Vec<usize> {
        let mut heights = vec![1; self.methods.len()];
        if let Some(order) = self.top_down_order() {
            for node in order.into_iter().rev() {
                heights[node] = 1 + self.callees[node]
                    .keys()
                    .map(|&c| heights[c])
                    .max()
                    .unwrap_or(0);
            }
        }
        heights
    }
}

impl GraphBase for CallGraph {
    fn node_count(&self) -> usize {
        self.methods.len()
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.methods.len()).map(NodeId::new)
    }
}

impl Successors for CallGraph {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.callees[node.index()].keys().map(|&n| NodeId::new(n))
    }
}

impl Predecessors for CallGraph {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.callers[node.index()].keys().map(|&n| NodeId::new(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::{context::tests::context_with, InlinerConfig},
        model::{AccessFlags, DexClass},
        test::{built_cfg, create_method, create_static_method},
    };

    fn graph_of(ictx: &InlinerContext) -> CallGraph {
        let mut candidates = BTreeSet::new();
        for m in ictx.ctx.all_methods() {
            built_cfg(&m);
            candidates.insert(m.reference());
        }
        CallGraph::discover(ictx, &candidates)
    }

    #[test]
    fn test_discovery_counts_sites() {
        let ictx = context_with(InlinerConfig::debug(), |ctx| {
            create_static_method(ctx, "LA;.leaf:()V", "((return-void))");
            create_static_method(
                ctx,
                "LA;.top:()V",
                r#"((invoke-static () "LA;.leaf:()V") (invoke-static () "LA;.leaf:()V") (return-void))"#,
            );
        });
        let graph = graph_of(&ictx);
        let leaf = ictx.ctx.make_method_from_str("LA;.leaf:()V").unwrap();
        let top = ictx.ctx.make_method_from_str("LA;.top:()V").unwrap();
        assert_eq!(graph.occurrences(&leaf), 2);
        assert_eq!(graph.caller_count(&leaf), 1);
        assert!(graph.has_edge(&top, &leaf));
        assert!(graph.is_dag());
        let heights = graph.heights();
        assert_eq!(heights[graph.node_of(&leaf).unwrap()], 1);
        assert_eq!(heights[graph.node_of(&top).unwrap()], 2);
    }

    #[test]
    fn test_prunes_cycles() {
        let ictx = context_with(InlinerConfig::debug(), |ctx| {
            create_static_method(ctx, "LA;.a:()V", r#"((invoke-static () "LA;.b:()V") (return-void))"#);
            create_static_method(ctx, "LA;.b:()V", r#"((invoke-static () "LA;.c:()V") (return-void))"#);
            create_static_method(ctx, "LA;.c:()V", r#"((invoke-static () "LA;.a:()V") (return-void))"#);
            create_static_method(ctx, "LA;.self:()V", r#"((invoke-static () "LA;.self:()V") (return-void))"#);
        });
        let mut graph = graph_of(&ictx);
        assert!(!graph.is_dag());
        let log = EventLog::new();
        assert_eq!(graph.prune_recursion(&log), 1);
        assert!(graph.is_dag());
        assert_eq!(log.count_kind(EventKind::RecursionPruned), 1);

        let a = ictx.ctx.make_method_from_str("LA;.a:()V").unwrap();
        let c = ictx.ctx.make_method_from_str("LA;.c:()V").unwrap();
        let itself = ictx.ctx.make_method_from_str("LA;.self:()V").unwrap();
        assert!(graph.is_recursive(&a));
        assert!(!graph.has_edge(&c, &a));
        assert!(graph.has_pruned_callers(&a));
        assert!(graph.is_recursive(&itself));
    }

    #[test]
    fn test_virtual_calls_need_final_target() {
        let ictx = context_with(InlinerConfig::debug(), |ctx| {
            ctx.define_class(DexClass::new(ctx.make_type("LOpen;"), None, AccessFlags::PUBLIC));
            ctx.define_class(DexClass::new(
                ctx.make_type("LSealed;"),
                None,
                AccessFlags::PUBLIC | AccessFlags::FINAL,
            ));
            create_method(ctx, "LOpen;.v:()V", AccessFlags::PUBLIC, "((load-param-object v0) (return-void))");
            create_method(ctx, "LSealed;.v:()V", AccessFlags::PUBLIC, "((load-param-object v0) (return-void))");
            create_static_method(
                ctx,
                "LMain;.run:(LOpen;LSealed;)V",
                r#"((load-param-object v0)
                    (load-param-object v1)
                    (invoke-virtual (v0) "LOpen;.v:()V")
                    (invoke-virtual (v1) "LSealed;.v:()V")
                    (return-void))"#,
            );
        });
        let graph = graph_of(&ictx);
        let open = ictx.ctx.make_method_from_str("LOpen;.v:()V").unwrap();
        let sealed = ictx.ctx.make_method_from_str("LSealed;.v:()V").unwrap();
        assert_eq!(graph.occurrences(&open), 0);
        assert_eq!(graph.occurrences(&sealed), 1);
    }

    #[test]
    fn test_true_virtual_target() {
        let ictx = context_with(InlinerConfig::debug(), |ctx| {
            ctx.define_class(DexClass::new(ctx.make_type("LOpen;"), None, AccessFlags::PUBLIC));
            create_method(ctx, "LOpen;.v:()V", AccessFlags::PUBLIC, "((load-param-object v0) (return-void))");
            create_static_method(
                ctx,
                "LMain;.run:(LOpen;)V",
                r#"((load-param-object v0) (invoke-virtual (v0) "LOpen;.v:()V") (return-void))"#,
            );
        });
        let open = ictx.ctx.make_method_from_str("LOpen;.v:()V").unwrap();
        let run = ictx.ctx.make_method_from_str("LMain;.run:(LOpen;)V").unwrap();
        let ictx = ictx.with_true_virtual(run, open.clone(), open.clone());
        let graph = graph_of(&ictx);
        assert_eq!(graph.occurrences(&open), 1);
        assert!(graph.is_true_virtual_callee(&open));
    }
}
