//! Baseline profiles.
//!
//! A baseline profile names the methods and classes that ran during app startup or other
//! critical journeys. The inliner uses it to favor inlining into hot code and to keep cold
//! code from bloating hot callers.

use std::collections::HashSet;

use crate::{
    cfg::{BlockId, ControlFlowGraph},
    ir::{MethodItem, SourceBlock},
    model::{DexMethodRef, DexType},
};

/// Hot methods and classes plus the block-appearance threshold that counts as hot.
#[derive(Debug, Clone, Default)]
pub struct BaselineProfile {
    hot_methods: HashSet<DexMethodRef>,
    hot_classes: HashSet<DexType>,
    min_appear_percent: f32,
}

impl BaselineProfile {
    /// Creates an empty profile; blocks reached by at least `min_appear_percent` percent of
    /// invocations count as hot.
    #[must_use]
    pub fn new(min_appear_percent: f32) -> Self {
        Self {
            hot_methods: HashSet::new(),
            hot_classes: HashSet::new(),
            min_appear_percent,
        }
    }

    /// Marks a method as hot.
    #[must_use]
    pub fn with_hot_method(mut self, method: DexMethodRef) -> Self {
        self.hot_classes.insert(method.class().clone());
        self.hot_methods.insert(method);
        self
    }

    /// Marks a class as hot.
    #[must_use]
    pub fn with_hot_class(mut self, ty: DexType) -> Self {
        self.hot_classes.insert(ty);
        self
    }

    /// Returns the appearance threshold, in percent.
    #[must_use]
    pub fn min_appear_percent(&self) -> f32 {
        self.min_appear_percent
    }

    /// Returns true if `method` is listed as hot.
    #[must_use]
    pub fn is_hot_method(&self, method: &DexMethodRef) -> bool {
        self.hot_methods.contains(method)
    }

    /// Returns true if `ty` is listed as hot.
    #[must_use]
    pub fn is_hot_class(&self, ty: &DexType) -> bool {
        self.hot_classes.contains(ty)
    }

    /// Returns true if the profiled block was reached often enough.
    #[must_use]
    pub fn is_hot_block(&self, block: &SourceBlock) -> bool {
        block
            .hit
            .is_some_and(|hit| hit > 0.0 && hit * 100.0 >= self.min_appear_percent)
    }

    /// The fraction of profiled blocks of `cfg` that are hot, or `None` without profile
    /// data.
    #[must_use]
    pub fn hot_fraction(&self, cfg: &ControlFlowGraph) -> Option<f32> {
        let mut total = 0usize;
        let mut hot = 0usize;
        for block in cfg.blocks() {
            for item in block.items() {
                if let MethodItem::SourceBlock(sb) = item {
                    total += 1;
                    if self.is_hot_block(sb) {
                        hot += 1;
                    }
                }
            }
        }
        (total > 0).then(|| hot as f32 / total as f32)
    }
}

/// Returns the first profiling marker of `block`.
pub(crate) fn source_block_of(cfg: &ControlFlowGraph, block: BlockId) -> Option<&SourceBlock> {
    cfg.block(block).items().iter().find_map(|item| match item {
        MethodItem::SourceBlock(sb) => Some(sb),
        _ => None,
    })
}
