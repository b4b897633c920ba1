//! Method and field resolution.
//!
//! The inliner never trusts the class named in an invoke: the target is looked up through a
//! [`MethodResolver`] following the Dalvik resolution rules for the invoke kind. Resolvers
//! are shared by all worker threads and must be `Send + Sync`.

use std::sync::Arc;

use dashmap::DashMap;

use crate::{
    ir::IrOpcode,
    model::{DexContext, DexField, DexFieldRef, DexMethod, DexMethodRef, DexType},
};

/// How a method reference is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MethodSearch {
    /// Constructors and private methods: exact class only.
    Direct,
    /// Static methods: the class, then its superclasses.
    Static,
    /// Instance methods: the class, then its superclasses.
    Virtual,
    /// Instance methods, starting at the superclass of the referring method's class.
    Super,
    /// Interface methods: the class and all its superinterfaces.
    Interface,
    /// Any method with the given name and prototype.
    Any,
}

impl MethodSearch {
    /// Returns the search kind implied by an invoke opcode, or `None` for other opcodes.
    #[must_use]
    pub fn from_opcode(opcode: IrOpcode) -> Option<Self> {
        match opcode {
            IrOpcode::InvokeDirect => Some(MethodSearch::Direct),
            IrOpcode::InvokeStatic => Some(MethodSearch::Static),
            IrOpcode::InvokeVirtual => Some(MethodSearch::Virtual),
            IrOpcode::InvokeSuper => Some(MethodSearch::Super),
            IrOpcode::InvokeInterface => Some(MethodSearch::Interface),
            _ => None,
        }
    }
}

/// How a field reference is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldSearch {
    /// Instance fields only.
    Instance,
    /// Static fields only.
    Static,
    /// Either kind.
    Any,
}

/// Resolves method references to definitions.
pub trait MethodResolver: Send + Sync {
    /// Resolves `method` according to `search`.
    ///
    /// # Arguments
    ///
    /// * `method` - The reference found in an instruction
    /// * `search` - The lookup rule (usually derived from the invoke opcode)
    /// * `caller` - The method containing the instruction; required for [`MethodSearch::Super`]
    ///
    /// # Returns
    ///
    /// The definition, or `None` if the reference does not resolve to a known definition.
    fn resolve(
        &self,
        method: &DexMethodRef,
        search: MethodSearch,
        caller: Option<&DexMethod>,
    ) -> Option<Arc<DexMethod>>;
}

/// Resolves against the definitions registered in a [`DexContext`] by walking the class
/// hierarchy.
pub struct ContextResolver {
    ctx: Arc<DexContext>,
}

impl ContextResolver {
    /// Creates a resolver over `ctx`.
    #[must_use]
    pub fn new(ctx: Arc<DexContext>) -> Self {
        ContextResolver { ctx }
    }

    fn find_in(&self, class: &DexType, method: &DexMethodRef) -> Option<Arc<DexMethod>> {
        let candidate = self.ctx.get_method(class, method.name(), method.proto())?;
        self.ctx.method_def(&candidate)
    }

    fn walk_supers(
        &self,
        start: Option<DexType>,
        method: &DexMethodRef,
        accept: impl Fn(&DexMethod) -> bool,
    ) -> Option<Arc<DexMethod>> {
        let mut current = start;
        while let Some(ty) = current {
            if let Some(found) = self.find_in(&ty, method) {
                if accept(found.as_ref()) {
                    return Some(found);
                }
            }
            current = self.ctx.class_of(&ty).and_then(|c| c.super_class().cloned());
        }
        None
    }

    fn walk_interfaces(&self, ty: &DexType, method: &DexMethodRef) -> Option<Arc<DexMethod>> {
        let mut pending = vec![ty.clone()];
        let mut seen = Vec::new();
        while let Some(current) = pending.pop() {
            if seen.contains(&current) {
                continue;
            }
            if let Some(found) = self.find_in(&current, method) {
                if !found.is_static() {
                    return Some(found);
                }
            }
            if let Some(class) = self.ctx.class_of(&current) {
                pending.extend(class.interfaces().iter().rev().cloned());
            }
            seen.push(current);
        }
        None
    }

    /// Resolves a field reference by walking the superclass chain.
    pub fn resolve_field(&self, field: &DexFieldRef, search: FieldSearch) -> Option<Arc<DexField>> {
        let mut current = Some(field.class().clone());
        while let Some(ty) = current {
            if let Some(found) = self
                .ctx
                .get_field(&ty, field.name(), field.ty())
                .and_then(|f| self.ctx.field_def(&f))
            {
                let matches = match search {
                    FieldSearch::Instance => !found.is_static(),
                    FieldSearch::Static => found.is_static(),
                    FieldSearch::Any => true,
                };
                if matches {
                    return Some(found);
                }
            }
            current = self.ctx.class_of(&ty).and_then(|c| c.super_class().cloned());
        }
        None
    }
}

impl MethodResolver for ContextResolver {
    fn resolve(
        &self,
        method: &DexMethodRef,
        search: MethodSearch,
        caller: Option<&DexMethod>,
    ) -> Option<Arc<DexMethod>> {
        match search {
            MethodSearch::Direct => self
                .find_in(method.class(), method)
                .filter(|m| m.is_direct()),
            MethodSearch::Static => {
                self.walk_supers(Some(method.class().clone()), method, DexMethod::is_static)
            }
            MethodSearch::Virtual => self
                .walk_supers(Some(method.class().clone()), method, DexMethod::is_virtual)
                .or_else(|| self.walk_interfaces(method.class(), method)),
            MethodSearch::Super => {
                let caller_class = caller?.class();
                let start = self
                    .ctx
                    .class_of(&caller_class)
                    .and_then(|c| c.super_class().cloned());
                self.walk_supers(start, method, DexMethod::is_virtual)
            }
            MethodSearch::Interface => self.walk_interfaces(method.class(), method),
            MethodSearch::Any => self
                .walk_supers(Some(method.class().clone()), method, |_| true)
                .or_else(|| self.walk_interfaces(method.class(), method)),
        }
    }
}

/// Memoizes another resolver's answers.
///
/// Resolution results are cached per (reference, search kind); super lookups also key on the
/// referring class since their answer depends on it.
pub struct ConcurrentMethodResolver<R: MethodResolver> {
    inner: R,
    cache: DashMap<(DexMethodRef, MethodSearch, Option<DexType>), Option<Arc<DexMethod>>>,
}

impl<R: MethodResolver> ConcurrentMethodResolver<R> {
    /// Wraps `inner` with a cache.
    pub fn new(inner: R) -> Self {
        ConcurrentMethodResolver {
            inner,
            cache: DashMap::new(),
        }
    }

    /// Returns the number of cached lookups.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

impl<R: MethodResolver> MethodResolver for ConcurrentMethodResolver<R> {
    fn resolve(
        &self,
        method: &DexMethodRef,
        search: MethodSearch,
        caller: Option<&DexMethod>,
    ) -> Option<Arc<DexMethod>> {
        let caller_class = match search {
            MethodSearch::Super => caller.map(DexMethod::class),
            _ => None,
        };
        let key = (method.clone(), search, caller_class);
        if let Some(hit) = self.cache.get(&key) {
            return hit.clone();
        }
        let resolved = self.inner.resolve(method, search, caller);
        self.cache.entry(key).or_insert(resolved).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AccessFlags, DexClass, MethodBuilder};

    fn hierarchy() -> Arc<DexContext> {
        let ctx = Arc::new(DexContext::new());
        let object = ctx.make_type("Ljava/lang/Object;");
        let base = ctx.make_type("LBase;");
        let derived = ctx.make_type("LDerived;");
        ctx.define_class(DexClass::new(base, Some(object), AccessFlags::PUBLIC));
        ctx.define_class(DexClass::new(derived, Some(ctx.make_type("LBase;")), AccessFlags::PUBLIC));
        MethodBuilder::new("LBase;.run:()V")
            .code("((load-param-object v0) (return-void))")
            .build(&ctx)
            .unwrap();
        MethodBuilder::new("LBase;.util:()V")
            .access(AccessFlags::PUBLIC | AccessFlags::STATIC)
            .code("((return-void))")
            .build(&ctx)
            .unwrap();
        ctx
    }

    #[test]
    fn test_virtual_walks_superclasses() {
        let ctx = hierarchy();
        let resolver = ContextResolver::new(Arc::clone(&ctx));
        let reference = ctx.make_method_from_str("LDerived;.run:()V").unwrap();
        let found = resolver.resolve(&reference, MethodSearch::Virtual, None).unwrap();
        assert_eq!(found.reference().to_string(), "LBase;.run:()V");
        assert!(resolver.resolve(&reference, MethodSearch::Static, None).is_none());
    }

    #[test]
    fn test_static_walks_superclasses() {
        let ctx = hierarchy();
        let resolver = ConcurrentMethodResolver::new(ContextResolver::new(Arc::clone(&ctx)));
        let reference = ctx.make_method_from_str("LDerived;.util:()V").unwrap();
        assert!(resolver.resolve(&reference, MethodSearch::Static, None).is_some());
        assert!(resolver.resolve(&reference, MethodSearch::Static, None).is_some());
        assert_eq!(resolver.cached(), 1);
    }

    #[test]
    fn test_search_from_opcode() {
        assert_eq!(
            MethodSearch::from_opcode(IrOpcode::InvokeSuper),
            Some(MethodSearch::Super)
        );
        assert_eq!(MethodSearch::from_opcode(IrOpcode::Const), None);
    }
}
