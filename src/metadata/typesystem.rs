//! The [`TypeSystem`] collaborator.
//!
//! The driver never inspects bytecode or walks a classpath itself. Every fact about classes,
//! members and their resolution comes through this trait, and the driver makes sure each fact is
//! requested in the right phase:
//!
//! - **Resolve** calls `resolve_*` and [`TypeSystem::class_info`] for every reference used by the
//!   code of each class, module by module in classpath order.
//! - **Verify** calls [`TypeSystem::verify_class`] once per class.
//! - **InitializeClasses** calls [`TypeSystem::can_initialize`] and
//!   [`TypeSystem::initialize_class`] for image classes (boot image runs only).
//! - **PostCompile** calls [`TypeSystem::image_dependencies`] for initialized classes.
//!
//! Implementations must be callable from many worker threads at once.

use crate::metadata::{
    model::{
        ClassDef, ClassInfo, ClassLoaderContext, ClassVerification, ResolvedField, ResolvedMethod,
    },
    reference::{ClassReference, FieldIndex, InvokeKind, MethodReference, ModuleId, StringIndex, TypeIndex},
};

/// Resolution, hierarchy, verification and initialization facts for loaded modules.
pub trait TypeSystem: Send + Sync {
    /// Returns every class defined by `module`.
    fn classes(&self, module: ModuleId) -> Vec<ClassReference>;

    /// Returns the definition of a class, including its methods and their access sites.
    fn class_def(&self, class: ClassReference) -> Option<ClassDef>;

    /// Returns the class that defines `method`.
    fn declaring_class(&self, method: MethodReference) -> Option<ClassReference>;

    /// Returns shape and placement information for a class.
    fn class_info(&self, class: ClassReference) -> Option<ClassInfo>;

    /// Resolves a type reference used by code in `module`.
    fn resolve_type(
        &self,
        loader: &ClassLoaderContext,
        module: ModuleId,
        index: TypeIndex,
    ) -> Option<ClassReference>;

    /// Resolves a field reference used by code in `module`.
    ///
    /// `is_static` is the kind of access written in the bytecode; a mismatch with the actual
    /// declaration is an incompatible class change and must resolve to `None`.
    fn resolve_field(
        &self,
        loader: &ClassLoaderContext,
        module: ModuleId,
        index: FieldIndex,
        is_static: bool,
    ) -> Option<ResolvedField>;

    /// Resolves a method reference used by code in `module` for the given invoke kind.
    fn resolve_method(
        &self,
        loader: &ClassLoaderContext,
        module: ModuleId,
        method_index: u32,
        kind: InvokeKind,
    ) -> Option<ResolvedMethod>;

    /// Resolves a method definition directly, e.g. a devirtualization target.
    fn method(&self, method: MethodReference) -> Option<ResolvedMethod>;

    /// Resolves a string constant used by code in `module`.
    fn resolve_string(
        &self,
        loader: &ClassLoaderContext,
        module: ModuleId,
        index: StringIndex,
    ) -> bool;

    /// Looks up the index `module` uses for the type with `descriptor`.
    fn find_type_index(&self, module: ModuleId, descriptor: &str) -> Option<TypeIndex>;

    /// Returns the method at `index` in the vtable of `class`.
    fn vtable_entry(&self, class: ClassReference, index: u16) -> Option<MethodReference>;

    /// Runs the verifier over a class.
    fn verify_class(&self, class: ClassReference) -> ClassVerification;

    /// Returns true if the static initializer of `class` has completed.
    fn is_initialized(&self, class: ClassReference) -> bool;

    /// Returns true if the static initializer of `class` may run at compile time.
    fn can_initialize(&self, class: ClassReference) -> bool;

    /// Runs the static initializer of `class`. Returns true on success.
    fn initialize_class(&self, class: ClassReference) -> bool;

    /// Returns the descriptors of classes that `class` pulls into the image once initialized.
    fn image_dependencies(&self, class: ClassReference) -> Vec<String> {
        let _ = class;
        Vec::new()
    }
}
