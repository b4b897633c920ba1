//! Interned references.
//!
//! Every reference type in this module is a thin handle around an `Arc`. References are
//! only created by [`DexContext`](crate::model::DexContext), which interns them: two handles
//! are equal iff they point to the same allocation, so equality and hashing are pointer
//! operations. Ordering is structural (by descriptor text) so that sorted collections of
//! references are deterministic across runs.

use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

macro_rules! interned_handle {
    ($name:ident) => {
        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                Arc::ptr_eq(&self.0, &other.0)
            }
        }

        impl Eq for $name {}

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                std::ptr::hash(Arc::as_ptr(&self.0), state);
            }
        }

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self)
            }
        }
    };
}

/// An interned string.
#[derive(Clone)]
pub struct DexString(pub(crate) Arc<str>);

interned_handle!(DexString);

impl DexString {
    /// Returns the string contents.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Ord for DexString {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Display for DexString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An interned type, identified by its descriptor (`I`, `J`, `Ljava/lang/Object;`, `[I`).
#[derive(Clone)]
pub struct DexType(pub(crate) Arc<str>);

interned_handle!(DexType);

impl DexType {
    /// Returns the type descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &str {
        &self.0
    }

    /// Returns `true` for `J` and `D`, which occupy a register pair.
    #[must_use]
    pub fn is_wide(&self) -> bool {
        matches!(&*self.0, "J" | "D")
    }

    /// Returns `true` for class and array types.
    #[must_use]
    pub fn is_object(&self) -> bool {
        self.0.starts_with('L') || self.0.starts_with('[')
    }

    /// Returns `true` for array types.
    #[must_use]
    pub fn is_array(&self) -> bool {
        self.0.starts_with('[')
    }

    /// Returns `true` for `V`.
    #[must_use]
    pub fn is_void(&self) -> bool {
        &*self.0 == "V"
    }

    /// Returns the package prefix of a class type, including the trailing slash
    /// (`Lcom/foo/` for `Lcom/foo/Bar;`). Primitive and array types have no package.
    #[must_use]
    pub fn package(&self) -> &str {
        if !self.0.starts_with('L') {
            return "";
        }
        match self.0.rfind('/') {
            Some(pos) => &self.0[..=pos],
            None => "L",
        }
    }
}

impl Ord for DexType {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Display for DexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub(crate) struct ProtoData {
    pub(crate) rtype: DexType,
    pub(crate) args: Vec<DexType>,
}

/// An interned method prototype: return type plus ordered argument types.
#[derive(Clone)]
pub struct DexProto(pub(crate) Arc<ProtoData>);

interned_handle!(DexProto);

impl DexProto {
    /// Returns the return type.
    #[must_use]
    pub fn rtype(&self) -> &DexType {
        &self.0.rtype
    }

    /// Returns the argument types, not including an implicit `this`.
    #[must_use]
    pub fn args(&self) -> &[DexType] {
        &self.0.args
    }

    /// Returns `true` if the return type is `V`.
    #[must_use]
    pub fn is_void(&self) -> bool {
        self.0.rtype.is_void()
    }
}

impl Ord for DexProto {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .args
            .cmp(&other.0.args)
            .then_with(|| self.0.rtype.cmp(&other.0.rtype))
    }
}

impl fmt::Display for DexProto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for arg in &self.0.args {
            f.write_str(arg.descriptor())?;
        }
        write!(f, "){}", self.0.rtype)
    }
}

pub(crate) struct FieldData {
    pub(crate) class: DexType,
    pub(crate) name: DexString,
    pub(crate) ty: DexType,
}

/// An interned field reference `Lclass;.name:type`.
#[derive(Clone)]
pub struct DexFieldRef(pub(crate) Arc<FieldData>);

interned_handle!(DexFieldRef);

impl DexFieldRef {
    /// Returns the declaring class named by the reference.
    #[must_use]
    pub fn class(&self) -> &DexType {
        &self.0.class
    }

    /// Returns the field name.
    #[must_use]
    pub fn name(&self) -> &DexString {
        &self.0.name
    }

    /// Returns the field type.
    #[must_use]
    pub fn ty(&self) -> &DexType {
        &self.0.ty
    }
}

impl Ord for DexFieldRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .class
            .cmp(&other.0.class)
            .then_with(|| self.0.name.cmp(&other.0.name))
            .then_with(|| self.0.ty.cmp(&other.0.ty))
    }
}

impl fmt::Display for DexFieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.0.class, self.0.name, self.0.ty)
    }
}

pub(crate) struct MethodData {
    pub(crate) class: DexType,
    pub(crate) name: DexString,
    pub(crate) proto: DexProto,
}

/// An interned method reference `Lclass;.name:(args)ret`.
///
/// A reference does not imply a definition exists; use
/// [`DexContext::method_def`](crate::model::DexContext::method_def) or a
/// [`MethodResolver`](crate::model::MethodResolver) to find the definition.
#[derive(Clone)]
pub struct DexMethodRef(pub(crate) Arc<MethodData>);

interned_handle!(DexMethodRef);

impl DexMethodRef {
    /// Returns the class named by the reference.
    #[must_use]
    pub fn class(&self) -> &DexType {
        &self.0.class
    }

    /// Returns the method name.
    #[must_use]
    pub fn name(&self) -> &DexString {
        &self.0.name
    }

    /// Returns the prototype.
    #[must_use]
    pub fn proto(&self) -> &DexProto {
        &self.0.proto
    }

    /// Returns `true` for instance constructors.
    #[must_use]
    pub fn is_init(&self) -> bool {
        self.0.name.as_str() == "<init>"
    }

    /// Returns `true` for static initializers.
    #[must_use]
    pub fn is_clinit(&self) -> bool {
        self.0.name.as_str() == "<clinit>"
    }
}

impl Ord for DexMethodRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .class
            .cmp(&other.0.class)
            .then_with(|| self.0.name.cmp(&other.0.name))
            .then_with(|| self.0.proto.cmp(&other.0.proto))
    }
}

impl fmt::Display for DexMethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.0.class, self.0.name, self.0.proto)
    }
}
