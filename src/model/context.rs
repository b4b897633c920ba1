//! The process-wide interning context.
//!
//! A [`DexContext`] is created once by the enclosing pipeline and shared by every worker for
//! the lifetime of a run. Interning tables are append-only `DashMap`s: lookups of existing
//! entries (the overwhelmingly common case) only take a shard read lock, and concurrent
//! `make_*` calls for the same key always return the same handle.

use std::sync::Arc;

use dashmap::DashMap;

use crate::{
    ir::parse_code,
    model::{
        refs::{FieldData, MethodData, ProtoData},
        AccessFlags, DexClass, DexField, DexFieldRef, DexMethod, DexMethodRef, DexProto,
        DexString, DexType, MethodFlags,
    },
    Error, Result,
};

/// Interning tables plus the registry of class, method and field definitions.
#[derive(Default)]
pub struct DexContext {
    strings: DashMap<Box<str>, DexString>,
    types: DashMap<Box<str>, DexType>,
    protos: DashMap<(DexType, Vec<DexType>), DexProto>,
    fields: DashMap<(DexType, DexString, DexType), DexFieldRef>,
    methods: DashMap<(DexType, DexString, DexProto), DexMethodRef>,
    classes: DashMap<DexType, Arc<DexClass>>,
    method_defs: DashMap<DexMethodRef, Arc<DexMethod>>,
    field_defs: DashMap<DexFieldRef, Arc<DexField>>,
}

impl DexContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a string.
    pub fn make_string(&self, value: &str) -> DexString {
        if let Some(existing) = self.strings.get(value) {
            return existing.clone();
        }
        self.strings
            .entry(value.into())
            .or_insert_with(|| DexString(Arc::from(value)))
            .clone()
    }

    /// Interns a type descriptor.
    pub fn make_type(&self, descriptor: &str) -> DexType {
        if let Some(existing) = self.types.get(descriptor) {
            return existing.clone();
        }
        self.types
            .entry(descriptor.into())
            .or_insert_with(|| DexType(Arc::from(descriptor)))
            .clone()
    }

    /// Looks up a type without interning it.
    pub fn get_type(&self, descriptor: &str) -> Option<DexType> {
        self.types.get(descriptor).map(|t| t.clone())
    }

    /// Interns a prototype.
    pub fn make_proto(&self, rtype: DexType, args: Vec<DexType>) -> DexProto {
        let key = (rtype, args);
        if let Some(existing) = self.protos.get(&key) {
            return existing.clone();
        }
        let (rtype, args) = key.clone();
        self.protos
            .entry(key)
            .or_insert_with(|| DexProto(Arc::new(ProtoData { rtype, args })))
            .clone()
    }

    /// Interns a field reference.
    pub fn make_field(&self, class: DexType, name: &str, ty: DexType) -> DexFieldRef {
        let name = self.make_string(name);
        let key = (class, name, ty);
        if let Some(existing) = self.fields.get(&key) {
            return existing.clone();
        }
        let (class, name, ty) = key.clone();
        self.fields
            .entry(key)
            .or_insert_with(|| DexFieldRef(Arc::new(FieldData { class, name, ty })))
            .clone()
    }

    /// Interns a method reference.
    pub fn make_method(&self, class: DexType, name: &str, proto: DexProto) -> DexMethodRef {
        let name = self.make_string(name);
        let key = (class, name, proto);
        if let Some(existing) = self.methods.get(&key) {
            return existing.clone();
        }
        let (class, name, proto) = key.clone();
        self.methods
            .entry(key)
            .or_insert_with(|| DexMethodRef(Arc::new(MethodData { class, name, proto })))
            .clone()
    }

    /// Looks up a method reference without interning it.
    pub fn get_method(&self, class: &DexType, name: &DexString, proto: &DexProto) -> Option<DexMethodRef> {
        self.methods
            .get(&(class.clone(), name.clone(), proto.clone()))
            .map(|m| m.clone())
    }

    /// Looks up a field reference without interning it.
    pub fn get_field(&self, class: &DexType, name: &DexString, ty: &DexType) -> Option<DexFieldRef> {
        self.fields
            .get(&(class.clone(), name.clone(), ty.clone()))
            .map(|f| f.clone())
    }

    /// Interns a prototype from its descriptor form `(IJ)V`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the descriptor is malformed.
    pub fn make_proto_from_str(&self, descriptor: &str) -> Result<DexProto> {
        let inner = descriptor
            .strip_prefix('(')
            .ok_or_else(|| Error::Parse(format!("bad proto `{descriptor}`")))?;
        let close = inner
            .find(')')
            .ok_or_else(|| Error::Parse(format!("bad proto `{descriptor}`")))?;
        let args = split_type_list(&inner[..close])?
            .into_iter()
            .map(|t| self.make_type(t))
            .collect();
        let rtype = &inner[close + 1..];
        if split_type_list(rtype)?.len() != 1 {
            return Err(Error::Parse(format!("bad return type in `{descriptor}`")));
        }
        Ok(self.make_proto(self.make_type(rtype), args))
    }

    /// Interns a method reference from its textual form `LFoo;.bar:(I)V`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the text is not a valid method reference.
    pub fn make_method_from_str(&self, text: &str) -> Result<DexMethodRef> {
        let (class, rest) = split_member(text)?;
        let (name, proto) = rest
            .split_once(':')
            .ok_or_else(|| Error::Parse(format!("bad method `{text}`")))?;
        let proto = self.make_proto_from_str(proto)?;
        Ok(self.make_method(self.make_type(class), name, proto))
    }

    /// Interns a field reference from its textual form `LFoo;.bar:I`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the text is not a valid field reference.
    pub fn make_field_from_str(&self, text: &str) -> Result<DexFieldRef> {
        let (class, rest) = split_member(text)?;
        let (name, ty) = rest
            .split_once(':')
            .ok_or_else(|| Error::Parse(format!("bad field `{text}`")))?;
        if split_type_list(ty)?.len() != 1 {
            return Err(Error::Parse(format!("bad field type in `{text}`")));
        }
        Ok(self.make_field(self.make_type(class), name, self.make_type(ty)))
    }

    /// Registers a class definition, replacing any previous definition of the same type.
    pub fn define_class(&self, class: DexClass) -> Arc<DexClass> {
        let class = Arc::new(class);
        self.classes.insert(class.ty().clone(), Arc::clone(&class));
        class
    }

    /// Registers a method definition and attaches it to its class, if the class is defined.
    pub fn define_method(&self, method: DexMethod) -> Arc<DexMethod> {
        let method = Arc::new(method);
        let reference = method.reference();
        if let Some(class) = self.class_of(reference.class()) {
            class.add_method(reference.clone());
        }
        self.method_defs.insert(reference, Arc::clone(&method));
        method
    }

    /// Registers a field definition and attaches it to its class, if the class is defined.
    pub fn define_field(&self, field: DexField) -> Arc<DexField> {
        let field = Arc::new(field);
        let reference = field.reference().clone();
        if let Some(class) = self.class_of(reference.class()) {
            class.add_field(reference.clone());
        }
        self.field_defs.insert(reference, Arc::clone(&field));
        field
    }

    /// Returns the class definition of a type.
    pub fn class_of(&self, ty: &DexType) -> Option<Arc<DexClass>> {
        self.classes.get(ty).map(|c| Arc::clone(&c))
    }

    /// Returns the method definition named exactly by `reference`.
    pub fn method_def(&self, reference: &DexMethodRef) -> Option<Arc<DexMethod>> {
        self.method_defs.get(reference).map(|m| Arc::clone(&m))
    }

    /// Returns the field definition named exactly by `reference`.
    pub fn field_def(&self, reference: &DexFieldRef) -> Option<Arc<DexField>> {
        self.field_defs.get(reference).map(|f| Arc::clone(&f))
    }

    /// Returns all method definitions, ordered by reference.
    pub fn all_methods(&self) -> Vec<Arc<DexMethod>> {
        let mut methods: Vec<(DexMethodRef, Arc<DexMethod>)> = self
            .method_defs
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        methods.sort_by(|a, b| a.0.cmp(&b.0));
        methods.into_iter().map(|(_, m)| m).collect()
    }

    /// Returns all class definitions, ordered by type.
    pub fn all_classes(&self) -> Vec<Arc<DexClass>> {
        let mut classes: Vec<Arc<DexClass>> =
            self.classes.iter().map(|e| Arc::clone(e.value())).collect();
        classes.sort_by(|a, b| a.ty().cmp(b.ty()));
        classes
    }

    /// Moves a method definition to a new reference.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `old` has no definition, or [`Error::Error`] if `new`
    /// is already defined.
    pub fn rekey_method(&self, old: &DexMethodRef, new: DexMethodRef) -> Result<()> {
        if self.method_defs.contains_key(&new) {
            return Err(Error::Error(format!("method {new} is already defined")));
        }
        let (_, method) = self
            .method_defs
            .remove(old)
            .ok_or_else(|| Error::NotFound(old.to_string()))?;
        method.set_reference(new.clone());
        if let Some(class) = self.class_of(new.class()) {
            class.replace_method(old, new.clone());
        }
        self.method_defs.insert(new, method);
        Ok(())
    }

    /// Returns `true` if `ty` is `ancestor` or inherits from it through superclasses.
    pub fn is_subclass(&self, ty: &DexType, ancestor: &DexType) -> bool {
        let mut current = Some(ty.clone());
        while let Some(t) = current {
            if &t == ancestor {
                return true;
            }
            current = self.class_of(&t).and_then(|c| c.super_class().cloned());
        }
        false
    }
}

/// Fluent construction of a method definition from its textual reference and S-expression
/// body.
///
/// # Examples
///
/// ```rust
/// use redex::model::{AccessFlags, DexContext, MethodBuilder};
///
/// let ctx = DexContext::new();
/// let method = MethodBuilder::new("LFoo;.inc:(I)I")
///     .access(AccessFlags::PUBLIC | AccessFlags::STATIC)
///     .code("((load-param v0) (add-int/lit v0 v0 1) (return v0))")
///     .build(&ctx)?;
/// assert!(method.has_code());
/// # Ok::<(), redex::Error>(())
/// ```
pub struct MethodBuilder<'a> {
    reference: &'a str,
    access: AccessFlags,
    flags: MethodFlags,
    api_level: Option<i32>,
    code: Option<&'a str>,
}

impl<'a> MethodBuilder<'a> {
    /// Starts a builder for the method named by `reference`.
    #[must_use]
    pub fn new(reference: &'a str) -> Self {
        MethodBuilder {
            reference,
            access: AccessFlags::PUBLIC,
            flags: MethodFlags::empty(),
            api_level: None,
            code: None,
        }
    }

    /// Sets the access flags.
    #[must_use]
    pub fn access(mut self, access: AccessFlags) -> Self {
        self.access = access;
        self
    }

    /// Sets the optimization flags.
    #[must_use]
    pub fn flags(mut self, flags: MethodFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the required API level.
    #[must_use]
    pub fn api_level(mut self, level: i32) -> Self {
        self.api_level = Some(level);
        self
    }

    /// Sets the body, in S-expression form.
    #[must_use]
    pub fn code(mut self, code: &'a str) -> Self {
        self.code = Some(code);
        self
    }

    /// Parses the reference and body and registers the definition in `ctx`.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference or the body cannot be parsed.
    pub fn build(self, ctx: &DexContext) -> Result<Arc<DexMethod>> {
        let reference = ctx.make_method_from_str(self.reference)?;
        let mut access = self.access;
        if reference.is_init() || reference.is_clinit() {
            access |= AccessFlags::CONSTRUCTOR;
        }
        let code = self.code.map(|c| parse_code(ctx, c)).transpose()?;
        let mut method = DexMethod::new(reference, access, code).with_flags(self.flags);
        if let Some(level) = self.api_level {
            method = method.with_api_level(level);
        }
        Ok(ctx.define_method(method))
    }
}

fn split_member(text: &str) -> Result<(&str, &str)> {
    let semi = text
        .find(";.")
        .ok_or_else(|| Error::Parse(format!("bad member reference `{text}`")))?;
    Ok((&text[..=semi], &text[semi + 2..]))
}

/// Splits a concatenated list of type descriptors (`IJLfoo/Bar;[I`).
fn split_type_list(list: &str) -> Result<Vec<&str>> {
    let bytes = list.as_bytes();
    let mut types = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'[' => {
                i += 1;
                continue;
            }
            b'L' => {
                let end = list[i..]
                    .find(';')
                    .ok_or_else(|| Error::Parse(format!("unterminated type in `{list}`")))?;
                i += end + 1;
            }
            b'Z' | b'B' | b'S' | b'C' | b'I' | b'J' | b'F' | b'D' | b'V' => i += 1,
            other => {
                return Err(Error::Parse(format!(
                    "bad type character `{}` in `{list}`",
                    other as char
                )))
            }
        }
        types.push(&list[start..i]);
        start = i;
    }
    if start != bytes.len() {
        return Err(Error::Parse(format!("dangling array marker in `{list}`")));
    }
    Ok(types)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_type_list() {
        assert_eq!(
            split_type_list("IJLfoo/Bar;[[I").unwrap(),
            vec!["I", "J", "Lfoo/Bar;", "[[I"]
        );
        assert!(split_type_list("Lfoo").is_err());
        assert!(split_type_list("X").is_err());
    }

    #[test]
    fn test_make_method_from_str() {
        let ctx = DexContext::new();
        let a = ctx.make_method_from_str("LFoo;.bar:(ILjava/lang/String;)V").unwrap();
        let b = ctx.make_method_from_str("LFoo;.bar:(ILjava/lang/String;)V").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.class().descriptor(), "LFoo;");
        assert_eq!(a.name().as_str(), "bar");
        assert_eq!(a.proto().args()[1].descriptor(), "Ljava/lang/String;");
        assert!(ctx.make_method_from_str("LFoo;bar").is_err());
    }

    #[test]
    fn test_define_and_rekey() {
        let ctx = DexContext::new();
        let foo = ctx.make_type("LFoo;");
        ctx.define_class(DexClass::new(foo.clone(), None, AccessFlags::PUBLIC));
        let method = MethodBuilder::new("LFoo;.bar:()V")
            .access(AccessFlags::PRIVATE)
            .code("((load-param-object v0) (return-void))")
            .build(&ctx)
            .unwrap();
        let old = method.reference();
        assert_eq!(ctx.class_of(&foo).unwrap().methods(), vec![old.clone()]);

        let new = ctx.make_method_from_str("LFoo;.bar:(LFoo;)V").unwrap();
        ctx.rekey_method(&old, new.clone()).unwrap();
        assert!(ctx.method_def(&old).is_none());
        assert_eq!(ctx.method_def(&new).unwrap().reference(), new);
        assert_eq!(ctx.class_of(&foo).unwrap().methods(), vec![new]);
    }

    #[test]
    fn test_is_subclass() {
        let ctx = DexContext::new();
        let object = ctx.make_type("Ljava/lang/Object;");
        let base = ctx.make_type("LBase;");
        let derived = ctx.make_type("LDerived;");
        ctx.define_class(DexClass::new(base.clone(), Some(object.clone()), AccessFlags::PUBLIC));
        ctx.define_class(DexClass::new(derived.clone(), Some(base.clone()), AccessFlags::PUBLIC));
        assert!(ctx.is_subclass(&derived, &object));
        assert!(!ctx.is_subclass(&base, &derived));
    }
}
