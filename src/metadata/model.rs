//! The collaborator-facing model of classes, methods and resolution results.
//!
//! These are plain data carriers. A [`TypeSystem`](crate::TypeSystem) implementation builds them
//! from whatever representation the runtime uses; the driver only reads them.

use std::collections::{BTreeMap, BTreeSet};

use crate::metadata::{
    flags::{ClassFlags, ClassStatus, MemberFlags},
    reference::{
        ClassReference, FieldIndex, InvokeKind, MethodReference, ModuleId, StringIndex, TypeIndex,
    },
};

/// The loader environment that modules are resolved under.
///
/// The driver does not implement loader semantics. It only processes modules in classpath order
/// and hands this context to every resolution request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClassLoaderContext {
    /// Human-readable name of the loader
    pub name: String,
    /// Modules visible to the loader, in lookup order
    pub classpath: Vec<ModuleId>,
}

impl ClassLoaderContext {
    /// Creates a loader context with an empty classpath.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        ClassLoaderContext {
            name: name.into(),
            classpath: Vec::new(),
        }
    }

    /// Sets the classpath of this loader.
    #[must_use]
    pub fn with_classpath(mut self, classpath: Vec<ModuleId>) -> Self {
        self.classpath = classpath;
        self
    }

    /// Orders `modules` the way this loader searches them.
    ///
    /// Modules on the classpath come first, in classpath order; any remaining modules keep the
    /// order they were given in.
    #[must_use]
    pub fn order(&self, modules: &[ModuleId]) -> Vec<ModuleId> {
        let mut ordered: Vec<ModuleId> = self
            .classpath
            .iter()
            .copied()
            .filter(|module| modules.contains(module))
            .collect();
        for module in modules {
            if !ordered.contains(module) {
                ordered.push(*module);
            }
        }
        ordered
    }
}

/// Everything the driver needs to know about a resolved class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    /// Identity of the class definition
    pub reference: ClassReference,
    /// Type descriptor, e.g. `Ljava/lang/Object;`
    pub descriptor: String,
    /// Access and shape flags
    pub flags: ClassFlags,
    /// Direct superclass, if any
    pub superclass: Option<ClassReference>,
    /// True if the class is defined by the boot class loader
    pub in_boot_image: bool,
    /// Address of the class object inside the boot image, if it lives there
    pub image_address: Option<u64>,
}

impl ClassInfo {
    /// Returns true if the class is public.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.flags.contains(ClassFlags::PUBLIC)
    }

    /// Returns true if the class is final (arrays never report final).
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.flags.contains(ClassFlags::FINAL) && !self.is_array()
    }

    /// Returns true if the class is abstract (arrays never report abstract).
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.flags.contains(ClassFlags::ABSTRACT) && !self.is_array()
    }

    /// Returns true if the class is an interface.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.flags.contains(ClassFlags::INTERFACE)
    }

    /// Returns true if the class is an array type.
    #[must_use]
    pub fn is_array(&self) -> bool {
        self.flags.contains(ClassFlags::ARRAY)
    }

    /// Returns the package part of the descriptor.
    ///
    /// `Lfoo/bar/Baz;` yields `foo/bar`, a class in the default package yields an empty string.
    #[must_use]
    pub fn package(&self) -> &str {
        let name = self.descriptor.trim_start_matches('[');
        let name = name.strip_prefix('L').unwrap_or(name);
        let name = name.strip_suffix(';').unwrap_or(name);
        match name.rfind('/') {
            Some(pos) => &name[..pos],
            None => "",
        }
    }
}

/// A field reference resolved to its declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedField {
    /// Class that declares the field
    pub declaring_class: ClassReference,
    /// Access flags of the field
    pub flags: MemberFlags,
    /// Byte offset of the field inside the instance or the static storage
    pub offset: u32,
}

impl ResolvedField {
    /// Returns true if the field is declared `static`.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(MemberFlags::STATIC)
    }

    /// Returns true if the field is declared `final`.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.flags.contains(MemberFlags::FINAL)
    }

    /// Returns true if the field is declared `volatile`.
    #[must_use]
    pub fn is_volatile(&self) -> bool {
        self.flags.contains(MemberFlags::VOLATILE)
    }
}

/// Addresses of a method that lives inside the boot image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImagePointers {
    /// Address of the method object
    pub method: u64,
    /// Address of the method's compiled code
    pub code: u64,
}

/// A method reference resolved to its declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedMethod {
    /// Identity of the declaring method definition
    pub reference: MethodReference,
    /// Class that declares the method
    pub declaring_class: ClassReference,
    /// Access flags of the method
    pub flags: MemberFlags,
    /// Slot in the declaring class's vtable (meaningful for dispatched calls)
    pub vtable_index: u16,
    /// Boot image addresses, if the method is part of the boot image
    pub image_pointers: Option<ImagePointers>,
}

impl ResolvedMethod {
    /// Returns true if the method is declared `static`.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(MemberFlags::STATIC)
    }

    /// Returns true if the method is declared `final`.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.flags.contains(MemberFlags::FINAL)
    }

    /// Returns true if the method has no implementation.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.flags.contains(MemberFlags::ABSTRACT)
    }
}

/// What an instruction inside a method body refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteKind {
    /// A class constant or type check
    Type {
        /// The referenced type
        index: TypeIndex,
        /// True for allocation sites (`new-instance`)
        instantiate: bool,
    },
    /// A checked cast to the referenced type
    CheckCast {
        /// The target type of the cast
        index: TypeIndex,
    },
    /// An instance field get or put
    InstanceField {
        /// The referenced field
        index: FieldIndex,
        /// True for stores
        is_put: bool,
    },
    /// A static field get or put
    StaticField {
        /// The referenced field
        index: FieldIndex,
        /// True for stores
        is_put: bool,
    },
    /// A method call
    Invoke {
        /// The referenced method, as an index into the caller's module
        method_index: u32,
        /// The dispatch kind written in the bytecode
        kind: InvokeKind,
    },
    /// A string constant
    String {
        /// The referenced string
        index: StringIndex,
    },
}

/// A reference at a given instruction offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessSite {
    /// Bytecode offset of the instruction
    pub pc: u32,
    /// What the instruction refers to
    pub kind: SiteKind,
}

/// The bytecode body of a method, reduced to what the driver needs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CodeBody {
    /// Size of the body in code units
    pub size_in_units: u32,
    /// Every reference the body makes, in instruction order
    pub sites: Vec<AccessSite>,
}

/// A method definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDef {
    /// Identity of the method
    pub reference: MethodReference,
    /// Fully qualified name, as used by profiles
    pub name: String,
    /// Access flags
    pub flags: MemberFlags,
    /// How the method itself is invoked
    pub kind: InvokeKind,
    /// The body, absent for abstract and native methods
    pub code: Option<CodeBody>,
}

impl MethodDef {
    /// Returns true if the method is implemented outside the bytecode.
    #[must_use]
    pub fn is_native(&self) -> bool {
        self.flags.contains(MemberFlags::NATIVE)
    }

    /// Returns true if the method is a constructor.
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.flags.contains(MemberFlags::CONSTRUCTOR)
    }

    /// Returns the access sites of the body (empty without a body).
    #[must_use]
    pub fn sites(&self) -> &[AccessSite] {
        self.code.as_ref().map_or(&[], |code| code.sites.as_slice())
    }
}

/// A class definition with its methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDef {
    /// Identity of the class
    pub reference: ClassReference,
    /// Type descriptor
    pub descriptor: String,
    /// True if the class declares at least one final instance field
    pub has_final_instance_fields: bool,
    /// Direct and virtual methods
    pub methods: Vec<MethodDef>,
}

/// Verification facts for one method.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VerifiedMethod {
    /// The method verified, but some checks were deferred to runtime
    pub soft_failure: bool,
    /// Offsets of casts the verifier proved can never fail
    pub safe_casts: BTreeSet<u32>,
    /// Precise call targets the verifier derived from receiver types, by call offset
    pub devirtualization_targets: BTreeMap<u32, MethodReference>,
}

impl VerifiedMethod {
    /// Returns true if the cast at `pc` was proven safe.
    #[must_use]
    pub fn is_safe_cast(&self, pc: u32) -> bool {
        self.safe_casts.contains(&pc)
    }

    /// Returns the precise call target at `pc`, if the verifier found one.
    #[must_use]
    pub fn devirtualization_target(&self, pc: u32) -> Option<MethodReference> {
        self.devirtualization_targets.get(&pc).copied()
    }
}

/// The verifier's verdict on one method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodVerification {
    /// The method may be compiled
    Verified(VerifiedMethod),
    /// The method failed verification and must not be compiled
    Rejected {
        /// The verifier's explanation
        reason: String,
    },
}

/// The verifier's verdict on a class.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClassVerification {
    /// Status the class reaches (`Verified`, `NotReady` for deferred checks, or `Error`)
    pub status: ClassStatus,
    /// Per-method verdicts; methods without an entry verified without extra facts
    pub methods: BTreeMap<MethodReference, MethodVerification>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class_info(descriptor: &str) -> ClassInfo {
        ClassInfo {
            reference: ClassReference::new(ModuleId(0), 0),
            descriptor: descriptor.to_string(),
            flags: ClassFlags::PUBLIC,
            superclass: None,
            in_boot_image: false,
            image_address: None,
        }
    }

    #[test]
    fn test_package_extraction() {
        assert_eq!(class_info("Lfoo/bar/Baz;").package(), "foo/bar");
        assert_eq!(class_info("LBaz;").package(), "");
        assert_eq!(class_info("[Lfoo/Baz;").package(), "foo");
    }

    #[test]
    fn test_array_is_never_final_or_abstract() {
        let mut info = class_info("[I");
        info.flags = ClassFlags::FINAL | ClassFlags::ABSTRACT | ClassFlags::ARRAY;
        assert!(!info.is_final());
        assert!(!info.is_abstract());
        assert!(info.is_array());
    }

    #[test]
    fn test_loader_order() {
        let loader = ClassLoaderContext::new("app")
            .with_classpath(vec![ModuleId(3), ModuleId(1), ModuleId(9)]);
        let ordered = loader.order(&[ModuleId(1), ModuleId(2), ModuleId(3)]);
        assert_eq!(ordered, vec![ModuleId(3), ModuleId(1), ModuleId(2)]);
    }

    #[test]
    fn test_verified_method_queries() {
        let mut verified = VerifiedMethod::default();
        verified.safe_casts.insert(12);
        verified
            .devirtualization_targets
            .insert(20, MethodReference::new(ModuleId(1), 5));

        assert!(verified.is_safe_cast(12));
        assert!(!verified.is_safe_cast(13));
        assert_eq!(
            verified.devirtualization_target(20),
            Some(MethodReference::new(ModuleId(1), 5))
        );
        assert_eq!(verified.devirtualization_target(21), None);
    }
}
