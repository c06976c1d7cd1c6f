//! Resolution and verification facts, collected concurrently and then frozen.
//!
//! The Resolve and Verify phases fill a [`FactsBuilder`] from many workers at once. At the
//! barrier before Compile the builder is consumed by [`FactsBuilder::freeze`], which also
//! snapshots class initialization, and the resulting [`Facts`] is immutable. Compile tasks and
//! the [`FastPathOracle`](crate::compiler::FastPathOracle) only ever see `&Facts`, so a decision
//! can never be based on a reference that was still being resolved.

use std::fmt;

use dashmap::DashMap;
use rustc_hash::{FxBuildHasher, FxHashMap, FxHashSet};

use crate::metadata::{
    flags::ClassStatus,
    model::{
        ClassDef, ClassInfo, ClassLoaderContext, ClassVerification, MethodVerification,
        ResolvedField, ResolvedMethod, SiteKind, VerifiedMethod,
    },
    reference::{
        ClassReference, FieldIndex, InvokeKind, MethodReference, ModuleId, StringIndex, TypeIndex,
    },
    typesystem::TypeSystem,
};

type FieldKey = (ModuleId, FieldIndex, bool);
type MethodKey = (ModuleId, u32, InvokeKind);

/// A reference the type system could not resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnresolvedReference {
    /// A type reference
    Type(ModuleId, TypeIndex),
    /// A field reference, with the access kind
    Field(ModuleId, FieldIndex, bool),
    /// A method reference, with the invoke kind
    Method(ModuleId, u32, InvokeKind),
    /// A string constant
    String(ModuleId, StringIndex),
}

impl fmt::Display for UnresolvedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type(module, index) => write!(f, "type {module}:{index}"),
            Self::Field(module, index, true) => write!(f, "static field {module}:{index}"),
            Self::Field(module, index, false) => write!(f, "instance field {module}:{index}"),
            Self::Method(module, index, kind) => write!(f, "{kind} method {module}:m{index}"),
            Self::String(module, index) => write!(f, "string {module}:{index}"),
        }
    }
}

/// Outcome of resolving the references of one class.
#[derive(Debug, Clone, Default)]
pub struct ResolutionOutcome {
    /// Number of references that resolved
    pub resolved: usize,
    /// References that did not resolve
    pub unresolved: Vec<UnresolvedReference>,
}

/// Concurrent collector for the Resolve and Verify phases.
#[derive(Debug, Default)]
pub struct FactsBuilder {
    types: DashMap<(ModuleId, TypeIndex), Option<ClassReference>, FxBuildHasher>,
    fields: DashMap<FieldKey, Option<ResolvedField>, FxBuildHasher>,
    methods: DashMap<MethodKey, Option<ResolvedMethod>, FxBuildHasher>,
    strings: DashMap<(ModuleId, StringIndex), bool, FxBuildHasher>,
    classes: DashMap<ClassReference, ClassInfo, FxBuildHasher>,
    storage_indices: DashMap<(ModuleId, ClassReference), Option<TypeIndex>, FxBuildHasher>,
    vtables: DashMap<(ClassReference, u16), Option<MethodReference>, FxBuildHasher>,
    method_defs: DashMap<MethodReference, ResolvedMethod, FxBuildHasher>,
    verified: DashMap<MethodReference, VerifiedMethod, FxBuildHasher>,
    rejected: DashMap<MethodReference, String, FxBuildHasher>,
    class_verdicts: DashMap<ClassReference, ClassStatus, FxBuildHasher>,
}

impl FactsBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `class` and its superclass chain.
    pub fn record_class(&self, ts: &dyn TypeSystem, class: ClassReference) {
        let mut next = Some(class);
        while let Some(current) = next {
            if self.classes.contains_key(&current) {
                return;
            }
            let Some(info) = ts.class_info(current) else {
                return;
            };
            next = info.superclass;
            self.classes.insert(current, info);
        }
    }

    /// Resolves every reference made by the code of `def`.
    ///
    /// Failures are recorded as absent facts and reported in the outcome; they never stop the
    /// rest of the class from resolving.
    pub fn resolve_class(
        &self,
        ts: &dyn TypeSystem,
        loader: &ClassLoaderContext,
        def: &ClassDef,
    ) -> ResolutionOutcome {
        let module = def.reference.module;
        let mut outcome = ResolutionOutcome::default();
        self.record_class(ts, def.reference);

        for method in &def.methods {
            for site in method.sites() {
                let unresolved = match site.kind {
                    SiteKind::Type { index, .. } | SiteKind::CheckCast { index } => {
                        self.resolve_type(ts, loader, module, index)
                    }
                    SiteKind::InstanceField { index, .. } => {
                        self.resolve_field(ts, loader, module, index, false)
                    }
                    SiteKind::StaticField { index, .. } => {
                        self.resolve_field(ts, loader, module, index, true)
                    }
                    SiteKind::Invoke { method_index, kind } => {
                        self.resolve_method(ts, loader, module, method_index, kind)
                    }
                    SiteKind::String { index } => self.resolve_string(ts, loader, module, index),
                };
                match unresolved {
                    Some(reference) => outcome.unresolved.push(reference),
                    None => outcome.resolved += 1,
                }
            }
        }
        outcome
    }

    fn resolve_type(
        &self,
        ts: &dyn TypeSystem,
        loader: &ClassLoaderContext,
        module: ModuleId,
        index: TypeIndex,
    ) -> Option<UnresolvedReference> {
        let class = *self
            .types
            .entry((module, index))
            .or_insert_with(|| ts.resolve_type(loader, module, index));
        match class {
            Some(class) => {
                self.record_class(ts, class);
                None
            }
            None => Some(UnresolvedReference::Type(module, index)),
        }
    }

    fn resolve_field(
        &self,
        ts: &dyn TypeSystem,
        loader: &ClassLoaderContext,
        module: ModuleId,
        index: FieldIndex,
        is_static: bool,
    ) -> Option<UnresolvedReference> {
        let field = *self
            .fields
            .entry((module, index, is_static))
            .or_insert_with(|| {
                ts.resolve_field(loader, module, index, is_static)
                    .filter(|field| field.is_static() == is_static)
            });
        let Some(field) = field else {
            return Some(UnresolvedReference::Field(module, index, is_static));
        };

        self.record_class(ts, field.declaring_class);
        if is_static {
            self.record_storage_index(ts, module, field.declaring_class);
        }
        None
    }

    fn resolve_method(
        &self,
        ts: &dyn TypeSystem,
        loader: &ClassLoaderContext,
        module: ModuleId,
        method_index: u32,
        kind: InvokeKind,
    ) -> Option<UnresolvedReference> {
        let method = *self
            .methods
            .entry((module, method_index, kind))
            .or_insert_with(|| {
                ts.resolve_method(loader, module, method_index, kind)
                    .filter(|method| method.is_static() == (kind == InvokeKind::Static))
            });
        let Some(method) = method else {
            return Some(UnresolvedReference::Method(module, method_index, kind));
        };

        self.record_class(ts, method.declaring_class);
        if kind == InvokeKind::Super {
            self.vtables
                .entry((method.declaring_class, method.vtable_index))
                .or_insert_with(|| ts.vtable_entry(method.declaring_class, method.vtable_index));
        }
        None
    }

    fn resolve_string(
        &self,
        ts: &dyn TypeSystem,
        loader: &ClassLoaderContext,
        module: ModuleId,
        index: StringIndex,
    ) -> Option<UnresolvedReference> {
        let resolved = *self
            .strings
            .entry((module, index))
            .or_insert_with(|| ts.resolve_string(loader, module, index));
        if resolved {
            None
        } else {
            Some(UnresolvedReference::String(module, index))
        }
    }

    fn record_storage_index(&self, ts: &dyn TypeSystem, module: ModuleId, class: ClassReference) {
        if self.storage_indices.contains_key(&(module, class)) {
            return;
        }
        // May fail when the referrer only names a subclass of the declaring class
        let index = self
            .classes
            .get(&class)
            .and_then(|info| ts.find_type_index(module, &info.descriptor));
        self.storage_indices.insert((module, class), index);
    }

    /// Records the verifier's verdict on a class.
    ///
    /// Devirtualization targets named by the verifier are resolved here as well, so Compile
    /// never has to ask the type system.
    pub fn record_verification(
        &self,
        ts: &dyn TypeSystem,
        class: ClassReference,
        verification: &ClassVerification,
    ) {
        self.class_verdicts.insert(class, verification.status);
        for (method, verdict) in &verification.methods {
            match verdict {
                MethodVerification::Verified(facts) => {
                    for target in facts.devirtualization_targets.values() {
                        if !self.method_defs.contains_key(target) {
                            if let Some(resolved) = ts.method(*target) {
                                self.record_class(ts, resolved.declaring_class);
                                self.method_defs.insert(*target, resolved);
                            }
                        }
                    }
                    self.verified.insert(*method, facts.clone());
                }
                MethodVerification::Rejected { reason } => {
                    self.rejected.insert(*method, reason.clone());
                }
            }
        }
    }

    /// Consumes the builder into immutable facts.
    ///
    /// `is_initialized` is asked once for every recorded class; the answer is final for the
    /// rest of the run.
    pub fn freeze(self, is_initialized: impl Fn(ClassReference) -> bool) -> Facts {
        let initialized = self
            .classes
            .iter()
            .map(|entry| *entry.key())
            .filter(|class| is_initialized(*class))
            .collect();

        Facts {
            types: self.types.into_iter().collect(),
            fields: self.fields.into_iter().collect(),
            methods: self.methods.into_iter().collect(),
            strings: self.strings.into_iter().collect(),
            classes: self.classes.into_iter().collect(),
            storage_indices: self.storage_indices.into_iter().collect(),
            vtables: self.vtables.into_iter().collect(),
            method_defs: self.method_defs.into_iter().collect(),
            verified: self.verified.into_iter().collect(),
            rejected: self.rejected.into_iter().collect(),
            class_verdicts: self.class_verdicts.into_iter().collect(),
            initialized,
        }
    }
}

/// Immutable resolution, verification and initialization facts of a run.
#[derive(Debug, Default)]
pub struct Facts {
    types: FxHashMap<(ModuleId, TypeIndex), Option<ClassReference>>,
    fields: FxHashMap<FieldKey, Option<ResolvedField>>,
    methods: FxHashMap<MethodKey, Option<ResolvedMethod>>,
    strings: FxHashMap<(ModuleId, StringIndex), bool>,
    classes: FxHashMap<ClassReference, ClassInfo>,
    storage_indices: FxHashMap<(ModuleId, ClassReference), Option<TypeIndex>>,
    vtables: FxHashMap<(ClassReference, u16), Option<MethodReference>>,
    method_defs: FxHashMap<MethodReference, ResolvedMethod>,
    verified: FxHashMap<MethodReference, VerifiedMethod>,
    rejected: FxHashMap<MethodReference, String>,
    class_verdicts: FxHashMap<ClassReference, ClassStatus>,
    initialized: FxHashSet<ClassReference>,
}

impl Facts {
    /// The class a type reference resolved to.
    #[must_use]
    pub fn resolved_type(&self, module: ModuleId, index: TypeIndex) -> Option<ClassReference> {
        self.types.get(&(module, index)).copied().flatten()
    }

    /// The declaration a field reference resolved to.
    #[must_use]
    pub fn field(&self, module: ModuleId, index: FieldIndex, is_static: bool) -> Option<&ResolvedField> {
        self.fields.get(&(module, index, is_static)).and_then(Option::as_ref)
    }

    /// The declaration a method reference resolved to.
    #[must_use]
    pub fn method(
        &self,
        module: ModuleId,
        method_index: u32,
        kind: InvokeKind,
    ) -> Option<&ResolvedMethod> {
        self.methods
            .get(&(module, method_index, kind))
            .and_then(Option::as_ref)
    }

    /// A method definition recorded as a devirtualization target.
    #[must_use]
    pub fn method_def(&self, method: MethodReference) -> Option<&ResolvedMethod> {
        self.method_defs.get(&method)
    }

    /// Returns true if the string constant resolved.
    #[must_use]
    pub fn string_resolved(&self, module: ModuleId, index: StringIndex) -> bool {
        self.strings.get(&(module, index)).copied().unwrap_or(false)
    }

    /// Shape information of a recorded class.
    #[must_use]
    pub fn class(&self, class: ClassReference) -> Option<&ClassInfo> {
        self.classes.get(&class)
    }

    /// The index `module` uses for the static storage of `class`.
    #[must_use]
    pub fn storage_index(&self, module: ModuleId, class: ClassReference) -> Option<TypeIndex> {
        self.storage_indices.get(&(module, class)).copied().flatten()
    }

    /// The method in slot `index` of the vtable of `class`.
    #[must_use]
    pub fn vtable_entry(&self, class: ClassReference, index: u16) -> Option<MethodReference> {
        self.vtables.get(&(class, index)).copied().flatten()
    }

    /// Verification facts of a method that passed verification.
    #[must_use]
    pub fn verified_method(&self, method: MethodReference) -> Option<&VerifiedMethod> {
        self.verified.get(&method)
    }

    /// The verifier's reason for rejecting a method.
    #[must_use]
    pub fn rejection(&self, method: MethodReference) -> Option<&str> {
        self.rejected.get(&method).map(String::as_str)
    }

    /// Returns true if `class` went through verification in this run.
    #[must_use]
    pub fn is_class_verified(&self, class: ClassReference) -> bool {
        self.class_verdicts.contains_key(&class)
    }

    /// The status the verifier gave `class`, if it went through verification in this run.
    #[must_use]
    pub fn class_verdict(&self, class: ClassReference) -> Option<ClassStatus> {
        self.class_verdicts.get(&class).copied()
    }

    /// Returns true if `class` was initialized when the facts were frozen.
    #[must_use]
    pub fn is_initialized(&self, class: ClassReference) -> bool {
        self.initialized.contains(&class)
    }

    /// Returns true if `sub` is `sup` or one of its subclasses.
    #[must_use]
    pub fn is_subclass(&self, sub: ClassReference, sup: ClassReference) -> bool {
        let mut current = Some(sub);
        while let Some(class) = current {
            if class == sup {
                return true;
            }
            current = self.classes.get(&class).and_then(|info| info.superclass);
        }
        false
    }

    /// Number of reference lookups that resolved, across all kinds.
    #[must_use]
    pub fn resolved_count(&self) -> usize {
        self.types.values().filter(|v| v.is_some()).count()
            + self.fields.values().filter(|v| v.is_some()).count()
            + self.methods.values().filter(|v| v.is_some()).count()
            + self.strings.values().filter(|v| **v).count()
    }

    /// Number of distinct references that failed to resolve.
    #[must_use]
    pub fn unresolved_count(&self) -> usize {
        self.types.values().filter(|v| v.is_none()).count()
            + self.fields.values().filter(|v| v.is_none()).count()
            + self.methods.values().filter(|v| v.is_none()).count()
            + self.strings.values().filter(|v| !**v).count()
    }
}
