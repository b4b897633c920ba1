//! Store partitioning and cross-store reference legality.
//!
//! An application is split into stores: the root store (index 0) holding the main
//! application classes, plus any number of module stores. Code in a store may reference
//! classes of its own store, the root store, and the stores it declares as dependencies.
//! Inlining a callee must not make a caller reference a class it could not reference before.

use crate::model::{DexContext, DexType};

/// One store and the stores it may reference.
#[derive(Debug, Clone, Default)]
pub struct StoreInfo {
    /// Store name, for diagnostics.
    pub name: String,
    /// Indices of stores this store may reference besides itself and the root.
    pub dependencies: Vec<usize>,
}

impl StoreInfo {
    /// Creates a store that may reference `dependencies`.
    #[must_use]
    pub fn new(name: impl Into<String>, dependencies: Vec<usize>) -> Self {
        StoreInfo {
            name: name.into(),
            dependencies,
        }
    }
}

/// Cross-store reference rules.
#[derive(Debug, Clone, Default)]
pub struct XStoreRefs {
    stores: Vec<StoreInfo>,
}

impl XStoreRefs {
    /// Creates the rules for the given stores. Index 0 is the root store.
    #[must_use]
    pub fn new(stores: Vec<StoreInfo>) -> Self {
        XStoreRefs { stores }
    }

    /// Returns the number of stores.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// Returns `true` if no store is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Returns the store index of the class defining `ty`, or `None` for types without an
    /// application definition (primitives, arrays of those, platform classes).
    pub fn store_of(&self, ctx: &DexContext, ty: &DexType) -> Option<usize> {
        let element = ty.descriptor().trim_start_matches('[');
        let element = if element.len() == ty.descriptor().len() {
            ty.clone()
        } else {
            ctx.get_type(element)?
        };
        ctx.class_of(&element)
            .filter(|c| !c.is_external())
            .map(|c| c.store())
    }

    /// Returns `true` if code in store `from` may not reference store `to`.
    #[must_use]
    pub fn illegal_store_ref(&self, from: usize, to: usize) -> bool {
        if from == to || to == 0 {
            return false;
        }
        match self.stores.get(from) {
            Some(info) => !info.dependencies.contains(&to),
            None => true,
        }
    }

    /// Returns `true` if code in store `from` may not reference the type `ty`.
    pub fn illegal_ref(&self, ctx: &DexContext, from: usize, ty: &DexType) -> bool {
        self.store_of(ctx, ty)
            .is_some_and(|to| self.illegal_store_ref(from, to))
    }
}
