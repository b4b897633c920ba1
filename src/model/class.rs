//! Class, method and field definitions.
//!
//! Definitions are shared (`Arc`) between worker threads. The parts that optimizations
//! mutate (access flags, the method body, a method's own reference when it is made static)
//! sit behind `RwLock`s; everything else is fixed at construction.

use std::sync::RwLock;

use crate::{
    ir::IrCode,
    model::{AccessFlags, DexFieldRef, DexMethodRef, DexProto, DexString, DexType, MethodFlags},
};

/// A class definition.
pub struct DexClass {
    ty: DexType,
    super_class: Option<DexType>,
    interfaces: Vec<DexType>,
    access: RwLock<AccessFlags>,
    store: usize,
    dex: usize,
    external: bool,
    methods: RwLock<Vec<DexMethodRef>>,
    fields: RwLock<Vec<DexFieldRef>>,
}

impl DexClass {
    /// Creates a class definition.
    ///
    /// # Arguments
    ///
    /// * `ty` - The class type
    /// * `super_class` - The superclass, `None` only for `java.lang.Object`
    /// * `access` - Class access flags
    #[must_use]
    pub fn new(ty: DexType, super_class: Option<DexType>, access: AccessFlags) -> Self {
        DexClass {
            ty,
            super_class,
            interfaces: Vec::new(),
            access: RwLock::new(access),
            store: 0,
            dex: 0,
            external: false,
            methods: RwLock::new(Vec::new()),
            fields: RwLock::new(Vec::new()),
        }
    }

    /// Sets the implemented interfaces.
    #[must_use]
    pub fn with_interfaces(mut self, interfaces: Vec<DexType>) -> Self {
        self.interfaces = interfaces;
        self
    }

    /// Places the class in the given store and DEX file.
    #[must_use]
    pub fn with_location(mut self, store: usize, dex: usize) -> Self {
        self.store = store;
        self.dex = dex;
        self
    }

    /// Marks the class as external (defined by the platform, not by the application).
    #[must_use]
    pub fn with_external(mut self, external: bool) -> Self {
        self.external = external;
        self
    }

    /// Returns the class type.
    #[must_use]
    pub fn ty(&self) -> &DexType {
        &self.ty
    }

    /// Returns the superclass.
    #[must_use]
    pub fn super_class(&self) -> Option<&DexType> {
        self.super_class.as_ref()
    }

    /// Returns the directly implemented interfaces.
    #[must_use]
    pub fn interfaces(&self) -> &[DexType] {
        &self.interfaces
    }

    /// Returns the current access flags.
    pub fn access(&self) -> AccessFlags {
        *read_lock!(self.access)
    }

    /// Replaces the access flags.
    pub fn set_access(&self, access: AccessFlags) {
        *write_lock!(self.access) = access;
    }

    /// Returns the index of the store this class belongs to.
    #[must_use]
    pub fn store(&self) -> usize {
        self.store
    }

    /// Returns the index of the DEX file this class is placed in.
    #[must_use]
    pub fn dex(&self) -> usize {
        self.dex
    }

    /// Returns `true` if the class is not part of the application being optimized.
    #[must_use]
    pub fn is_external(&self) -> bool {
        self.external
    }

    /// Returns `true` if the class is an interface.
    pub fn is_interface(&self) -> bool {
        self.access().contains(AccessFlags::INTERFACE)
    }

    /// Returns the references of all methods defined in this class.
    pub fn methods(&self) -> Vec<DexMethodRef> {
        read_lock!(self.methods).clone()
    }

    /// Returns the references of all fields defined in this class.
    pub fn fields(&self) -> Vec<DexFieldRef> {
        read_lock!(self.fields).clone()
    }

    pub(crate) fn add_method(&self, method: DexMethodRef) {
        let mut methods = write_lock!(self.methods);
        if !methods.contains(&method) {
            methods.push(method);
        }
    }

    pub(crate) fn replace_method(&self, old: &DexMethodRef, new: DexMethodRef) {
        let mut methods = write_lock!(self.methods);
        methods.retain(|m| m != old);
        methods.push(new);
    }

    pub(crate) fn add_field(&self, field: DexFieldRef) {
        let mut fields = write_lock!(self.fields);
        if !fields.contains(&field) {
            fields.push(field);
        }
    }
}

/// A method definition.
///
/// The body is `None` for abstract, native and external methods. While the inliner runs, a
/// body typically holds an editable CFG (see [`IrCode::build_cfg`]).
pub struct DexMethod {
    reference: RwLock<DexMethodRef>,
    access: RwLock<AccessFlags>,
    flags: RwLock<MethodFlags>,
    api_level: Option<i32>,
    /// The method body.
    pub code: RwLock<Option<IrCode>>,
}

impl DexMethod {
    /// Creates a method definition.
    #[must_use]
    pub fn new(reference: DexMethodRef, access: AccessFlags, code: Option<IrCode>) -> Self {
        DexMethod {
            reference: RwLock::new(reference),
            access: RwLock::new(access),
            flags: RwLock::new(MethodFlags::empty()),
            api_level: None,
            code: RwLock::new(code),
        }
    }

    /// Sets the minimum API level this method requires.
    #[must_use]
    pub fn with_api_level(mut self, level: i32) -> Self {
        self.api_level = Some(level);
        self
    }

    /// Sets the optimization flags.
    #[must_use]
    pub fn with_flags(self, flags: MethodFlags) -> Self {
        *write_lock!(self.flags) = flags;
        self
    }

    /// Returns the method reference.
    pub fn reference(&self) -> DexMethodRef {
        read_lock!(self.reference).clone()
    }

    pub(crate) fn set_reference(&self, reference: DexMethodRef) {
        *write_lock!(self.reference) = reference;
    }

    /// Returns the defining class type.
    pub fn class(&self) -> DexType {
        read_lock!(self.reference).class().clone()
    }

    /// Returns the method name.
    pub fn name(&self) -> DexString {
        read_lock!(self.reference).name().clone()
    }

    /// Returns the prototype.
    pub fn proto(&self) -> DexProto {
        read_lock!(self.reference).proto().clone()
    }

    /// Returns the current access flags.
    pub fn access(&self) -> AccessFlags {
        *read_lock!(self.access)
    }

    /// Replaces the access flags.
    pub fn set_access(&self, access: AccessFlags) {
        *write_lock!(self.access) = access;
    }

    /// Returns the optimization flags.
    pub fn flags(&self) -> MethodFlags {
        *read_lock!(self.flags)
    }

    /// Adds optimization flags.
    pub fn add_flags(&self, flags: MethodFlags) {
        write_lock!(self.flags).insert(flags);
    }

    /// Returns the API level recorded for this method, if any.
    #[must_use]
    pub fn api_level(&self) -> Option<i32> {
        self.api_level
    }

    /// Returns `true` if the method is static.
    pub fn is_static(&self) -> bool {
        self.access().is_static()
    }

    /// Returns `true` for instance constructors.
    pub fn is_init(&self) -> bool {
        read_lock!(self.reference).is_init()
    }

    /// Returns `true` for methods invoked through `invoke-direct`: constructors and private
    /// instance methods.
    pub fn is_direct(&self) -> bool {
        let access = self.access();
        !access.is_static() && (access.is_private() || self.is_init())
    }

    /// Returns `true` for overridable instance methods.
    pub fn is_virtual(&self) -> bool {
        !self.is_static() && !self.is_direct()
    }

    /// Returns `true` if the method has a body.
    pub fn has_code(&self) -> bool {
        read_lock!(self.code).is_some()
    }

    /// Returns the declared parameter types, including the receiver for instance methods.
    pub fn param_types(&self) -> Vec<DexType> {
        let reference = self.reference();
        let mut params = Vec::with_capacity(reference.proto().args().len() + 1);
        if !self.is_static() {
            params.push(reference.class().clone());
        }
        params.extend(reference.proto().args().iter().cloned());
        params
    }
}

impl std::fmt::Debug for DexMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DexMethod({})", self.reference())
    }
}

/// A field definition.
pub struct DexField {
    reference: DexFieldRef,
    access: RwLock<AccessFlags>,
}

impl DexField {
    /// Creates a field definition.
    #[must_use]
    pub fn new(reference: DexFieldRef, access: AccessFlags) -> Self {
        DexField {
            reference,
            access: RwLock::new(access),
        }
    }

    /// Returns the field reference.
    #[must_use]
    pub fn reference(&self) -> &DexFieldRef {
        &self.reference
    }

    /// Returns the current access flags.
    pub fn access(&self) -> AccessFlags {
        *read_lock!(self.access)
    }

    /// Replaces the access flags.
    pub fn set_access(&self, access: AccessFlags) {
        *write_lock!(self.access) = access;
    }

    /// Returns `true` if the field is static.
    pub fn is_static(&self) -> bool {
        self.access().is_static()
    }

    /// Returns `true` if the field is final.
    pub fn is_final(&self) -> bool {
        self.access().is_final()
    }
}
