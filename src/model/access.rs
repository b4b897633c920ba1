//! Access and optimization flags for classes, methods and fields.

use bitflags::bitflags;

/// Mask of the three visibility bits.
pub const VISIBILITY_MASK: u32 = 0x0007;

bitflags! {
    /// Dalvik access flags, with the values used by the DEX format.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u32 {
        /// Visible everywhere
        const PUBLIC = 0x0001;
        /// Visible only to the defining class
        const PRIVATE = 0x0002;
        /// Visible to the package and subclasses
        const PROTECTED = 0x0004;
        /// Not bound to an instance
        const STATIC = 0x0008;
        /// Not overridable / not reassignable after construction
        const FINAL = 0x0010;
        /// Method acquires the receiver's monitor
        const SYNCHRONIZED = 0x0020;
        /// Field with volatile access semantics
        const VOLATILE = 0x0040;
        /// Field not serialized
        const TRANSIENT = 0x0080;
        /// Implemented in native code
        const NATIVE = 0x0100;
        /// Class is an interface
        const INTERFACE = 0x0200;
        /// No implementation
        const ABSTRACT = 0x0400;
        /// Strict floating point
        const STRICT = 0x0800;
        /// Not present in source
        const SYNTHETIC = 0x1000;
        /// Class is an annotation
        const ANNOTATION = 0x2000;
        /// Enum class or enum constant field
        const ENUM = 0x4000;
        /// Constructor method (`<init>` or `<clinit>`)
        const CONSTRUCTOR = 0x10000;
        /// Method declared `synchronized` in source
        const DECLARED_SYNCHRONIZED = 0x20000;
    }
}

impl AccessFlags {
    /// Returns `true` if public.
    #[must_use]
    pub fn is_public(self) -> bool {
        self.contains(Self::PUBLIC)
    }

    /// Returns `true` if private.
    #[must_use]
    pub fn is_private(self) -> bool {
        self.contains(Self::PRIVATE)
    }

    /// Returns `true` if protected.
    #[must_use]
    pub fn is_protected(self) -> bool {
        self.contains(Self::PROTECTED)
    }

    /// Returns `true` if none of the visibility bits is set.
    #[must_use]
    pub fn is_package_private(self) -> bool {
        self.bits() & VISIBILITY_MASK == 0
    }

    /// Returns `true` if static.
    #[must_use]
    pub fn is_static(self) -> bool {
        self.contains(Self::STATIC)
    }

    /// Returns `true` if final.
    #[must_use]
    pub fn is_final(self) -> bool {
        self.contains(Self::FINAL)
    }

    /// Returns these flags with the visibility replaced by `PUBLIC`.
    #[must_use]
    pub fn made_public(self) -> Self {
        (self - (Self::PRIVATE | Self::PROTECTED)) | Self::PUBLIC
    }
}

bitflags! {
    /// Per-method optimization state that does not correspond to DEX access flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MethodFlags: u32 {
        /// The method must not be touched by any optimization
        const NO_OPTIMIZATIONS = 0x0001;
        /// The method is an entry point kept by configuration and may not be deleted
        const ROOT = 0x0002;
        /// The method must never be inlined into its callers
        const DONT_INLINE = 0x0004;
        /// The method is inlined whenever the hard gates allow it
        const FORCE_INLINE = 0x0008;
    }
}
