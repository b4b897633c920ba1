//! The abstract value domain of constant propagation.

use std::fmt;

use crate::{
    analysis::dataflow::JoinSemiLattice,
    model::{DexFieldRef, DexMethodRef, DexString, DexType},
};

/// An attribute of an object whose value never changes after construction, such as the
/// payload of a boxed integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImmutableAttr {
    /// The accessor that reads the attribute (for boxed integers, `intValue()`).
    pub accessor: DexMethodRef,
    /// The attribute's value.
    pub value: i64,
}

/// An abstract value.
///
/// `Top` is "unknown", `Bottom` is "no value can reach here". Numeric values are signed
/// intervals; a singleton interval is a known constant. Every object kind is known to be
/// non-null, so joining two different object values yields [`ConstantValue::NonZero`].
///
/// # Examples
///
/// ```rust
/// use redex::analysis::{dataflow::JoinSemiLattice, ConstantValue};
///
/// let joined = ConstantValue::constant(1).join(&ConstantValue::constant(4));
/// assert_eq!(joined, ConstantValue::interval(1, 4));
/// assert!(joined.is_nez());
/// assert!(ConstantValue::constant(0).join(&joined).is_top() == false);
/// assert!(ConstantValue::constant(-1).join(&ConstantValue::top()).is_top());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConstantValue {
    /// Unreachable: no concrete value.
    Bottom,
    /// `lo..=hi`. Never the full `i64` range, which is `Top`.
    Interval {
        /// Smallest possible value.
        lo: i64,
        /// Largest possible value.
        hi: i64,
    },
    /// Any value except zero (for objects: non-null).
    NonZero,
    /// The value of an enum-like static field holding the only instance with that identity.
    SingletonObject(DexFieldRef),
    /// An object with known immutable attributes.
    ObjectWithImmutableAttr {
        /// The object's type.
        ty: DexType,
        /// The known attributes.
        attrs: Vec<ImmutableAttr>,
    },
    /// The `Class` object of a type.
    ClassObject(DexType),
    /// A fresh object allocated at one site of the analyzed method.
    NewObject {
        /// The allocated type.
        ty: DexType,
        /// Identifies the allocation site within the method.
        site: u32,
    },
    /// A string constant.
    String(DexString),
    /// Unknown.
    Top,
}

impl ConstantValue {
    /// The unknown value.
    #[must_use]
    pub const fn top() -> Self {
        ConstantValue::Top
    }

    /// The unreachable value.
    #[must_use]
    pub const fn bottom() -> Self {
        ConstantValue::Bottom
    }

    /// A known constant.
    #[must_use]
    pub const fn constant(value: i64) -> Self {
        ConstantValue::Interval {
            lo: value,
            hi: value,
        }
    }

    /// The interval `lo..=hi`, normalized: an empty interval is `Bottom` and the full range
    /// is `Top`.
    #[must_use]
    pub const fn interval(lo: i64, hi: i64) -> Self {
        if lo > hi {
            ConstantValue::Bottom
        } else if lo == i64::MIN && hi == i64::MAX {
            ConstantValue::Top
        } else {
            ConstantValue::Interval { lo, hi }
        }
    }

    /// Any non-zero value.
    #[must_use]
    pub const fn nez() -> Self {
        ConstantValue::NonZero
    }

    /// A constant string.
    #[must_use]
    pub fn string(value: DexString) -> Self {
        ConstantValue::String(value)
    }

    /// The class object of `ty`.
    #[must_use]
    pub fn class_object(ty: DexType) -> Self {
        ConstantValue::ClassObject(ty)
    }

    /// An object allocated at `site`.
    #[must_use]
    pub fn new_object(ty: DexType, site: u32) -> Self {
        ConstantValue::NewObject { ty, site }
    }

    /// The singleton held by `field`.
    #[must_use]
    pub fn singleton(field: DexFieldRef) -> Self {
        ConstantValue::SingletonObject(field)
    }

    /// An object of type `ty` whose `accessor` always answers `value`.
    #[must_use]
    pub fn with_immutable_attr(ty: DexType, accessor: DexMethodRef, value: i64) -> Self {
        ConstantValue::ObjectWithImmutableAttr {
            ty,
            attrs: vec![ImmutableAttr { accessor, value }],
        }
    }

    /// Returns `true` for the unreachable value.
    #[must_use]
    pub fn is_bottom(&self) -> bool {
        matches!(self, ConstantValue::Bottom)
    }

    /// Returns the constant, if the value is a singleton interval.
    #[must_use]
    pub fn as_constant(&self) -> Option<i64> {
        match *self {
            ConstantValue::Interval { lo, hi } if lo == hi => Some(lo),
            _ => None,
        }
    }

    /// Returns `true` if the value is known to be zero (or null).
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.as_constant() == Some(0)
    }

    /// Returns `true` if the value is known to be non-zero (or non-null).
    #[must_use]
    pub fn is_nez(&self) -> bool {
        match *self {
            ConstantValue::Interval { lo, hi } => lo > 0 || hi < 0,
            ConstantValue::Top | ConstantValue::Bottom => false,
            _ => true,
        }
    }

    /// Returns `true` for the object kinds.
    #[must_use]
    pub fn is_object(&self) -> bool {
        matches!(
            self,
            ConstantValue::SingletonObject(_)
                | ConstantValue::ObjectWithImmutableAttr { .. }
                | ConstantValue::ClassObject(_)
                | ConstantValue::NewObject { .. }
                | ConstantValue::String(_)
        )
    }

    /// The inclusive numeric bounds this value admits, if it is numeric.
    #[must_use]
    pub fn bounds(&self) -> Option<(i64, i64)> {
        match *self {
            ConstantValue::Interval { lo, hi } => Some((lo, hi)),
            ConstantValue::Top => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }

    /// Canonical text used as an interning key.
    #[must_use]
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl JoinSemiLattice for ConstantValue {
    fn join(&self, other: &Self) -> Self {
        use ConstantValue as V;
        match (self, other) {
            (V::Bottom, x) | (x, V::Bottom) => x.clone(),
            (V::Top, _) | (_, V::Top) => V::Top,
            (a, b) if a == b => a.clone(),
            (V::Interval { lo: a, hi: b }, V::Interval { lo: c, hi: d }) => {
                let (lo, hi) = ((*a).min(*c), (*b).max(*d));
                if self.is_nez() && other.is_nez() && (lo..=hi).contains(&0) {
                    V::NonZero
                } else {
                    V::interval(lo, hi)
                }
            }
            (
                V::ObjectWithImmutableAttr { ty: t1, attrs: a1 },
                V::ObjectWithImmutableAttr { ty: t2, attrs: a2 },
            ) if t1 == t2 => {
                let common: Vec<ImmutableAttr> =
                    a1.iter().filter(|a| a2.contains(a)).cloned().collect();
                if common.is_empty() {
                    V::NonZero
                } else {
                    V::ObjectWithImmutableAttr {
                        ty: t1.clone(),
                        attrs: common,
                    }
                }
            }
            (a, b) if a.is_nez() && b.is_nez() => V::NonZero,
            _ => V::Top,
        }
    }

    fn is_top(&self) -> bool {
        matches!(self, ConstantValue::Top)
    }
}

impl fmt::Display for ConstantValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstantValue::Bottom => f.write_str("_|_"),
            ConstantValue::Top => f.write_str("T"),
            ConstantValue::Interval { lo, hi } if lo == hi => write!(f, "{lo}"),
            ConstantValue::Interval { lo, hi } => write!(f, "[{lo}, {hi}]"),
            ConstantValue::NonZero => f.write_str("NEZ"),
            ConstantValue::SingletonObject(field) => write!(f, "singleton({field})"),
            ConstantValue::ObjectWithImmutableAttr { ty, attrs } => {
                write!(f, "attrs({ty}")?;
                for attr in attrs {
                    write!(f, " {}={}", attr.accessor, attr.value)?;
                }
                f.write_str(")")
            }
            ConstantValue::ClassObject(ty) => write!(f, "class({ty})"),
            ConstantValue::NewObject { ty, site } => write!(f, "new({ty}@{site})"),
            ConstantValue::String(s) => write!(f, "{:?}", s.as_str()),
        }
    }
}
