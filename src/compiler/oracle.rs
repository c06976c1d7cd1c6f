//! Fast-path decisions for code generation.
//!
//! For every reference a method body makes, the backend needs to know whether it can emit the
//! fast sequence (a direct field load, a direct call, a class pointer embedded in the code) or
//! has to go through a runtime helper. The [`FastPathOracle`] answers these questions from the
//! frozen [`Facts`] of the run and the compiler options; it never asks the type system itself.
//!
//! Every answer is conservative: whenever a fact is missing (the reference did not resolve, the
//! referrer cannot access the target, the class may not be initialized) the slow path is chosen,
//! and a slow answer never carries an offset, index or pointer that could be used by mistake.
//!
//! Each decision is counted in [`OracleStats`].

use bitflags::bitflags;

use crate::{
    compiler::{facts::Facts, options::CompilerOptions, stats::OracleStats},
    metadata::{
        model::{ClassInfo, MethodDef, ResolvedMethod, SiteKind, VerifiedMethod},
        flags::MemberFlags,
        reference::{
            ClassReference, FieldIndex, InvokeKind, MethodReference, ModuleId, StringIndex,
            TypeIndex,
        },
    },
};

bitflags! {
    /// What the oracle established about a call site.
    ///
    /// An empty set means the call must go through the slow path.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InvokeFlags: u8 {
        /// The target resolved and is accessible from the referrer
        const METHOD_RESOLVED = 1 << 0;
        /// A virtual or super call was turned into a direct call
        const VIRTUAL_MADE_DIRECT = 1 << 1;
        /// The direct target came from the verifier's receiver type
        const PRECISE_TYPE_DEVIRTUALIZATION = 1 << 2;
        /// The code of the target lives in the boot image
        const DIRECT_CALL_TO_BOOT = 1 << 3;
        /// The method object of the target lives in the boot image
        const DIRECT_METHOD_TO_BOOT = 1 << 4;
    }
}

/// How a direct call reaches its target's code or method object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectPointer {
    /// A known address inside the boot image
    Address(u64),
    /// A placeholder the linker fills in through a patch
    Patch,
}

/// Result of checking whether a type can be used without an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypeAccess {
    /// The referrer may use the type without a runtime check
    pub allowed: bool,
    /// The type is final
    pub is_final: bool,
    /// The type is abstract
    pub is_abstract: bool,
    /// The type is the referrer's own class
    pub same_as_referrer: bool,
}

/// Fast-path answer for an instance field access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstanceFieldInfo {
    /// The access may be compiled as a direct load or store
    pub fast: bool,
    /// The field is volatile (only meaningful on the fast path)
    pub is_volatile: bool,
    /// Byte offset of the field, present only on the fast path
    pub offset: Option<u32>,
}

/// Fast-path answer for a static field access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StaticFieldInfo {
    /// The access may be compiled as a direct load or store
    pub fast: bool,
    /// Byte offset inside the static storage, present only on the fast path
    pub offset: Option<u32>,
    /// Index through which the referrer reaches the declaring class's storage
    pub storage_index: Option<TypeIndex>,
    /// The field is declared by the referrer's own class
    pub is_referrers_class: bool,
    /// The declaring class is known to be initialized, so no init check is needed
    pub is_initialized: bool,
    /// The field is volatile
    pub is_volatile: bool,
}

/// Fast-path answer for a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvokeInfo {
    /// The call may skip the resolution trampoline
    pub fast: bool,
    /// Dispatch kind to emit, possibly sharpened from the bytecode kind
    pub kind: InvokeKind,
    /// The method to call; the resolved declaration when known
    pub target: MethodReference,
    /// Vtable slot for dispatched calls
    pub vtable_index: Option<u16>,
    /// How to reach the target's code for direct calls
    pub direct_code: Option<DirectPointer>,
    /// How to reach the target's method object for direct calls
    pub direct_method: Option<DirectPointer>,
    /// The static target's class may need initialization before the call
    pub needs_class_init: bool,
    /// What was established; empty on the slow path
    pub flags: InvokeFlags,
}

impl InvokeInfo {
    fn slow(kind: InvokeKind, target: MethodReference) -> Self {
        InvokeInfo {
            fast: false,
            kind,
            target,
            vtable_index: None,
            direct_code: None,
            direct_method: None,
            needs_class_init: false,
            flags: InvokeFlags::empty(),
        }
    }
}

/// A class that generated code may refer to directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedType {
    /// The class is initialized
    pub is_initialized: bool,
    /// Address of the class object, `None` if the linker has to patch it in
    pub address: Option<u64>,
}

/// The oracle's decision for one access site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// A type constant or allocation
    Type {
        /// Access check result
        access: TypeAccess,
        /// The type may be allocated without checks (allocation sites only)
        instantiable: bool,
        /// The resolved type is guaranteed to be in the dex cache
        in_dex_cache: bool,
        /// The class can be embedded in the code
        embedded: Option<EmbeddedType>,
    },
    /// A checked cast
    CheckCast {
        /// The verifier proved the cast cannot fail
        safe: bool,
        /// Access check result for the target type
        access: TypeAccess,
    },
    /// An instance field access
    InstanceField(InstanceFieldInfo),
    /// A static field access
    StaticField(StaticFieldInfo),
    /// A call
    Invoke(InvokeInfo),
    /// A string constant
    String {
        /// The string is guaranteed to be in the dex cache
        in_dex_cache: bool,
    },
}

/// A decision together with the bytecode offset it applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiteDecision {
    /// Bytecode offset of the site
    pub pc: u32,
    /// The decision
    pub decision: Decision,
}

/// Answers fast-path questions from the frozen facts of a run.
pub struct FastPathOracle<'a> {
    facts: &'a Facts,
    options: &'a CompilerOptions,
    stats: &'a OracleStats,
}

impl<'a> FastPathOracle<'a> {
    /// Creates an oracle over `facts`.
    #[must_use]
    pub fn new(facts: &'a Facts, options: &'a CompilerOptions, stats: &'a OracleStats) -> Self {
        FastPathOracle {
            facts,
            options,
            stats,
        }
    }

    /// Decides every access site of `method`, in site order.
    #[must_use]
    pub fn decide(
        &self,
        referrer: ClassReference,
        method: &MethodDef,
        verified: Option<&VerifiedMethod>,
    ) -> Vec<SiteDecision> {
        let module = method.reference.module;
        method
            .sites()
            .iter()
            .map(|site| {
                let decision = match site.kind {
                    SiteKind::Type { index, instantiate } => {
                        let access = self.can_access_type_without_checks(referrer, module, index);
                        Decision::Type {
                            access,
                            instantiable: instantiate
                                && self.is_instantiable(module, index, &access),
                            in_dex_cache: self.can_assume_type_in_dex_cache(module, index),
                            embedded: self.can_embed_type_in_code(module, index),
                        }
                    }
                    SiteKind::CheckCast { index } => Decision::CheckCast {
                        safe: self.is_safe_cast(verified, site.pc),
                        access: self.can_access_type_without_checks(referrer, module, index),
                    },
                    SiteKind::InstanceField { index, is_put } => Decision::InstanceField(
                        self.is_fast_instance_field(referrer, module, index, is_put),
                    ),
                    SiteKind::StaticField { index, is_put } => Decision::StaticField(
                        self.is_fast_static_field(referrer, module, index, is_put),
                    ),
                    SiteKind::Invoke { method_index, kind } => Decision::Invoke(
                        self.is_fast_invoke(referrer, module, site.pc, method_index, kind, verified),
                    ),
                    SiteKind::String { index } => Decision::String {
                        in_dex_cache: self.can_assume_string_in_dex_cache(module, index),
                    },
                };
                SiteDecision {
                    pc: site.pc,
                    decision,
                }
            })
            .collect()
    }

    /// Returns true if `descriptor` names a class that goes into the boot image.
    ///
    /// Always false for application runs. In a boot image run without an explicit class list,
    /// every class is an image class.
    #[must_use]
    pub fn is_image_class(&self, descriptor: &str) -> bool {
        if !self.options.is_boot_image() {
            return false;
        }
        self.options
            .image_classes
            .as_ref()
            .map_or(true, |classes| classes.contains(descriptor))
    }

    /// Returns true if the resolved type will be present in the dex cache at runtime.
    #[must_use]
    pub fn can_assume_type_in_dex_cache(&self, module: ModuleId, index: TypeIndex) -> bool {
        let result = self.options.is_boot_image()
            && self
                .facts
                .resolved_type(module, index)
                .and_then(|class| self.facts.class(class))
                .is_some_and(|info| self.is_image_class(&info.descriptor));
        self.stats.type_in_dex_cache(result);
        result
    }

    /// Returns true if the resolved string will be present in the dex cache at runtime.
    #[must_use]
    pub fn can_assume_string_in_dex_cache(&self, module: ModuleId, index: StringIndex) -> bool {
        let result = self.options.is_boot_image() && self.facts.string_resolved(module, index);
        self.stats.string_in_dex_cache(result);
        result
    }

    /// Checks whether code in `referrer` may use a type without an access check.
    #[must_use]
    pub fn can_access_type_without_checks(
        &self,
        referrer: ClassReference,
        module: ModuleId,
        index: TypeIndex,
    ) -> TypeAccess {
        let access = self.type_access(referrer, module, index);
        self.stats.type_access(access.allowed);
        access
    }

    /// Checks whether code in `referrer` may allocate a type without any runtime check.
    #[must_use]
    pub fn can_access_instantiable_type_without_checks(
        &self,
        referrer: ClassReference,
        module: ModuleId,
        index: TypeIndex,
    ) -> bool {
        let access = self.can_access_type_without_checks(referrer, module, index);
        self.is_instantiable(module, index, &access)
    }

    fn is_instantiable(&self, module: ModuleId, index: TypeIndex, access: &TypeAccess) -> bool {
        access.allowed
            && self
                .facts
                .resolved_type(module, index)
                .and_then(|class| self.facts.class(class))
                .is_some_and(|info| info.flags.is_instantiable())
    }

    fn type_access(
        &self,
        referrer: ClassReference,
        module: ModuleId,
        index: TypeIndex,
    ) -> TypeAccess {
        let Some(resolved) = self.facts.resolved_type(module, index) else {
            return TypeAccess::default();
        };
        let (Some(referrer_info), Some(target)) =
            (self.facts.class(referrer), self.facts.class(resolved))
        else {
            return TypeAccess::default();
        };
        if !can_access_class(referrer_info, target) {
            return TypeAccess::default();
        }
        TypeAccess {
            allowed: true,
            is_final: target.is_final(),
            is_abstract: target.is_abstract(),
            same_as_referrer: resolved == referrer,
        }
    }

    /// Decides whether a type can be referenced directly from generated code.
    ///
    /// Boot image code may embed image classes when boot image fixups are supported; the linker
    /// patches in the address. Application code may embed classes that already live in the boot
    /// image at a known address.
    #[must_use]
    pub fn can_embed_type_in_code(&self, module: ModuleId, index: TypeIndex) -> Option<EmbeddedType> {
        let class = self.facts.resolved_type(module, index)?;
        let info = self.facts.class(class)?;
        let is_initialized = self.facts.is_initialized(class);
        if self.options.is_boot_image() {
            (self.options.support_boot_image_fixup && self.is_image_class(&info.descriptor)).then_some(
                EmbeddedType {
                    is_initialized,
                    address: None,
                },
            )
        } else if info.in_boot_image {
            info.image_address.map(|address| EmbeddedType {
                is_initialized,
                address: Some(address),
            })
        } else {
            None
        }
    }

    /// Returns true if the verifier proved the cast at `pc` can never fail.
    #[must_use]
    pub fn is_safe_cast(&self, verified: Option<&VerifiedMethod>, pc: u32) -> bool {
        let result = verified.is_some_and(|v| v.is_safe_cast(pc));
        self.stats.safe_cast(result);
        result
    }

    /// Decides an instance field access.
    ///
    /// Puts to final fields are only fast from inside the declaring class.
    #[must_use]
    pub fn is_fast_instance_field(
        &self,
        referrer: ClassReference,
        module: ModuleId,
        index: FieldIndex,
        is_put: bool,
    ) -> InstanceFieldInfo {
        let info = self.instance_field(referrer, module, index, is_put);
        self.stats.instance_field(info.fast);
        info
    }

    fn instance_field(
        &self,
        referrer: ClassReference,
        module: ModuleId,
        index: FieldIndex,
        is_put: bool,
    ) -> InstanceFieldInfo {
        let Some(field) = self.facts.field(module, index, false) else {
            return InstanceFieldInfo::default();
        };
        if !self.can_access_member(referrer, field.declaring_class, field.flags) {
            return InstanceFieldInfo::default();
        }
        if is_put && field.is_final() && field.declaring_class != referrer {
            return InstanceFieldInfo::default();
        }
        InstanceFieldInfo {
            fast: true,
            is_volatile: field.is_volatile(),
            offset: Some(field.offset),
        }
    }

    /// Decides a static field access.
    ///
    /// Fields of the referrer's own class are always fast and need no initialization check.
    /// Other accessible fields are fast when the referrer's module can name the declaring
    /// class; they skip the initialization check only if the class was initialized when the
    /// facts were frozen and is guaranteed to be in the dex cache.
    #[must_use]
    pub fn is_fast_static_field(
        &self,
        referrer: ClassReference,
        module: ModuleId,
        index: FieldIndex,
        is_put: bool,
    ) -> StaticFieldInfo {
        let info = self.static_field(referrer, module, index, is_put);
        self.stats.static_field(info.fast, info.is_referrers_class);
        info
    }

    fn static_field(
        &self,
        referrer: ClassReference,
        module: ModuleId,
        index: FieldIndex,
        is_put: bool,
    ) -> StaticFieldInfo {
        let Some(field) = self.facts.field(module, index, true) else {
            return StaticFieldInfo::default();
        };
        let declaring = field.declaring_class;
        let Some(storage_index) = self.facts.storage_index(module, declaring) else {
            return StaticFieldInfo::default();
        };

        if declaring == referrer {
            return StaticFieldInfo {
                fast: true,
                offset: Some(field.offset),
                storage_index: Some(storage_index),
                is_referrers_class: true,
                is_initialized: true,
                is_volatile: field.is_volatile(),
            };
        }
        if !self.can_access_member(referrer, declaring, field.flags) {
            return StaticFieldInfo::default();
        }
        if is_put && field.is_final() {
            return StaticFieldInfo::default();
        }
        StaticFieldInfo {
            fast: true,
            offset: Some(field.offset),
            storage_index: Some(storage_index),
            is_referrers_class: false,
            is_initialized: self.facts.is_initialized(declaring)
                && self.options.is_boot_image()
                && self
                    .facts
                    .class(declaring)
                    .is_some_and(|info| self.is_image_class(&info.descriptor)),
            is_volatile: field.is_volatile(),
        }
    }

    /// Returns true if calling `target` from `referrer` may trigger class initialization.
    #[must_use]
    pub fn needs_class_initialization(
        &self,
        referrer: ClassReference,
        target: &ResolvedMethod,
    ) -> bool {
        target.is_static()
            && target.declaring_class != referrer
            && !self.facts.is_initialized(target.declaring_class)
    }

    /// Decides a call site.
    ///
    /// Virtual calls to final methods or methods of final classes become direct calls, as do
    /// super calls whose vtable slot is known. With devirtualization enabled the verifier's
    /// precise receiver type can sharpen a virtual call as well. Super calls that cannot be
    /// sharpened always take the slow path.
    #[must_use]
    pub fn is_fast_invoke(
        &self,
        referrer: ClassReference,
        module: ModuleId,
        pc: u32,
        method_index: u32,
        kind: InvokeKind,
        verified: Option<&VerifiedMethod>,
    ) -> InvokeInfo {
        let info = self.invoke(referrer, module, pc, method_index, kind, verified);
        self.stats.invoke(kind, info.flags);
        info
    }

    fn invoke(
        &self,
        referrer: ClassReference,
        module: ModuleId,
        pc: u32,
        method_index: u32,
        kind: InvokeKind,
        verified: Option<&VerifiedMethod>,
    ) -> InvokeInfo {
        let unresolved = InvokeInfo::slow(kind, MethodReference::new(module, method_index));
        let Some(resolved) = self.facts.method(module, method_index, kind) else {
            return unresolved;
        };
        if !self.can_access_member(referrer, resolved.declaring_class, resolved.flags) {
            return unresolved;
        }
        let Some(declaring) = self.facts.class(resolved.declaring_class) else {
            return unresolved;
        };

        let can_sharpen_virtual =
            kind == InvokeKind::Virtual && (resolved.is_final() || declaring.is_final());
        let can_sharpen_super = kind == InvokeKind::Super
            && referrer != resolved.declaring_class
            && self.facts.is_subclass(referrer, resolved.declaring_class)
            && self
                .facts
                .vtable_entry(resolved.declaring_class, resolved.vtable_index)
                == Some(resolved.reference);

        if self.options.enable_devirtualization {
            if can_sharpen_virtual || can_sharpen_super {
                return self.direct_call(
                    referrer,
                    resolved,
                    kind,
                    InvokeKind::Direct,
                    InvokeFlags::METHOD_RESOLVED,
                );
            }
            if kind.is_dispatched() {
                let precise = verified
                    .and_then(|v| v.devirtualization_target(pc))
                    .and_then(|target| self.facts.method_def(target))
                    .filter(|called| !called.is_abstract());
                if let Some(called) = precise {
                    return self.direct_call(
                        referrer,
                        called,
                        kind,
                        InvokeKind::Direct,
                        InvokeFlags::METHOD_RESOLVED | InvokeFlags::PRECISE_TYPE_DEVIRTUALIZATION,
                    );
                }
            }
        }
        if kind == InvokeKind::Super {
            return unresolved;
        }
        self.direct_call(referrer, resolved, kind, kind, InvokeFlags::METHOD_RESOLVED)
    }

    fn direct_call(
        &self,
        referrer: ClassReference,
        method: &ResolvedMethod,
        original: InvokeKind,
        sharp: InvokeKind,
        mut flags: InvokeFlags,
    ) -> InvokeInfo {
        let mut info = InvokeInfo {
            fast: true,
            kind: original,
            target: method.reference,
            vtable_index: original.is_dispatched().then_some(method.vtable_index),
            direct_code: None,
            direct_method: None,
            needs_class_init: self.needs_class_initialization(referrer, method),
            flags,
        };
        if !matches!(sharp, InvokeKind::Static | InvokeKind::Direct) {
            return info;
        }
        if sharp != original {
            flags |= InvokeFlags::VIRTUAL_MADE_DIRECT;
            info.kind = sharp;
            info.vtable_index = None;
        }

        let declaring = self.facts.class(method.declaring_class);
        let in_boot = declaring.is_some_and(|d| d.in_boot_image);
        let compiling_boot = self.options.is_boot_image();

        let mut use_dex_cache = compiling_boot && !self.options.support_boot_image_fixup;
        if !use_dex_cache {
            if !in_boot {
                use_dex_cache = true;
            } else if method.is_static()
                && method.declaring_class != referrer
                && !self.facts.is_initialized(method.declaring_class)
            {
                // The call must go through the initialization check
                use_dex_cache = true;
            }
        }
        if in_boot {
            flags |= InvokeFlags::DIRECT_CALL_TO_BOOT | InvokeFlags::DIRECT_METHOD_TO_BOOT;
        }
        if !use_dex_cache
            && compiling_boot
            && !declaring.is_some_and(|d| self.is_image_class(&d.descriptor))
        {
            use_dex_cache = true;
        }
        info.flags = flags;
        if use_dex_cache {
            return info;
        }

        if compiling_boot {
            info.direct_code = Some(DirectPointer::Patch);
            info.direct_method = Some(DirectPointer::Patch);
        } else if let Some(pointers) = method.image_pointers {
            info.direct_code = Some(DirectPointer::Address(pointers.code));
            info.direct_method = Some(DirectPointer::Address(pointers.method));
        }
        info
    }

    fn can_access_member(
        &self,
        referrer: ClassReference,
        declaring: ClassReference,
        flags: MemberFlags,
    ) -> bool {
        let (Some(referrer_info), Some(declaring_info)) =
            (self.facts.class(referrer), self.facts.class(declaring))
        else {
            return false;
        };
        if !can_access_class(referrer_info, declaring_info) {
            return false;
        }
        if flags.contains(MemberFlags::PUBLIC) {
            return true;
        }
        if flags.contains(MemberFlags::PRIVATE) {
            return referrer == declaring;
        }
        if flags.contains(MemberFlags::PROTECTED)
            && !referrer_info.is_interface()
            && self.facts.is_subclass(referrer, declaring)
        {
            return true;
        }
        in_same_package(referrer_info, declaring_info)
    }
}

fn in_same_package(a: &ClassInfo, b: &ClassInfo) -> bool {
    a.in_boot_image == b.in_boot_image && a.package() == b.package()
}

fn can_access_class(referrer: &ClassInfo, target: &ClassInfo) -> bool {
    referrer.reference == target.reference || target.is_public() || in_same_package(referrer, target)
}
