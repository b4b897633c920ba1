//! Interned references and definitions.
//!
//! # Key Types
//!
//! - [`DexContext`] - interning tables and the definition registry
//! - [`DexString`], [`DexType`], [`DexProto`], [`DexFieldRef`], [`DexMethodRef`] - interned
//!   references with pointer identity
//! - [`DexClass`], [`DexMethod`], [`DexField`] - definitions
//! - [`MethodResolver`] - thread-safe method resolution
//! - [`XStoreRefs`] - cross-store reference rules
//! - [`ApiLevelChecker`] - per-method API requirements

mod access;
mod api;
mod class;
mod context;
mod refs;
mod resolver;
mod xstore;

pub use access::{AccessFlags, MethodFlags, VISIBILITY_MASK};
pub use api::ApiLevelChecker;
pub use class::{DexClass, DexField, DexMethod};
pub use context::{DexContext, MethodBuilder};
pub use refs::{DexFieldRef, DexMethodRef, DexProto, DexString, DexType};
pub use resolver::{
    ConcurrentMethodResolver, ContextResolver, FieldSearch, MethodResolver, MethodSearch,
};
pub use xstore::{StoreInfo, XStoreRefs};
