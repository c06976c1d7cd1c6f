//! The compilation driver.
//!
//! [`CompilerDriver`] runs the phase pipeline over a set of modules:
//!
//! ```text
//! Resolve ──► Verify ──► InitializeClasses ──► freeze ──► Compile ──► PostCompile
//!                        (boot image only)       │
//!                                                └─ Facts become immutable here
//! ```
//!
//! Every phase fans out over the classes of each module on a rayon pool and returns only when
//! all of its tasks have finished, so no phase ever observes another phase in progress. Resolve
//! and Verify write into a [`FactsBuilder`]; the builder is frozen into [`Facts`] before the first
//! Compile task starts, and Compile only reads those facts.
//!
//! Compile is the only phase that writes the shared output structures: the [`BlobStore`], the
//! [`PatchLedger`], the [`ArtifactTables`] and the [`TrampolineTable`]. Each method is compiled
//! at most once per driver, whether it is reached through [`CompilerDriver::compile_all`] or
//! [`CompilerDriver::compile_one`]; concurrent requests for the same method wait for the first
//! one and share its outcome.
//!
//! Per-method failures (verifier rejection, profile skip, codegen error) are recorded in the
//! [`EventLog`] and the [`Summary`]. Only setup failures and contract violations are returned
//! as errors.

use std::{
    collections::BTreeSet,
    fmt,
    sync::{Arc, OnceLock, RwLock},
    time::Instant,
};

use dashmap::DashMap;
use rayon::prelude::*;
use rustc_hash::{FxBuildHasher, FxHashMap, FxHashSet};
use strum::EnumIter;

use crate::{
    compiler::{
        codegen::{Codegen, CodegenContext, CodegenRequest, PatchRequest},
        dedupe::{BlobCategory, BlobStore},
        events::{EventKind, EventLog},
        facts::{Facts, FactsBuilder},
        options::CompilerOptions,
        oracle::FastPathOracle,
        patches::{
            CallPatch, MethodPatch, PatchLedger, PatchRecord, RelativeCallPatch, TypePatch,
        },
        profile::ProfileGate,
        stats::OracleStats,
        summary::Summary,
        tables::{ArtifactTables, CompiledMethodRecord},
        trampolines::{EntrypointId, TrampolineTable},
    },
    metadata::{
        flags::ClassStatus,
        model::{ClassDef, ClassLoaderContext, MethodDef},
        reference::{ClassReference, MethodReference, ModuleId},
        typesystem::TypeSystem,
    },
    Error, Result,
};

/// The phases of a compilation run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter)]
pub enum Phase {
    /// Resolve every reference made by the code of each class
    Resolve,
    /// Run the verifier over each class
    Verify,
    /// Run static initializers of image classes (boot image runs only)
    InitializeClasses,
    /// Generate code for every method
    Compile,
    /// Close the image class set and publish the link snapshot
    PostCompile,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Resolve => "resolve",
            Phase::Verify => "verify",
            Phase::InitializeClasses => "initialize-classes",
            Phase::Compile => "compile",
            Phase::PostCompile => "post-compile",
        };
        f.write_str(name)
    }
}

/// Final outcome of one method, shared by every request for it.
#[derive(Debug, Clone)]
enum MethodOutcome {
    Compiled(Arc<CompiledMethodRecord>),
    Skipped,
    NoCode,
    Rejected,
    CodegenFailed(String),
}

impl MethodOutcome {
    fn into_result(self, method: MethodReference) -> Result<Arc<CompiledMethodRecord>> {
        match self {
            MethodOutcome::Compiled(record) => Ok(record),
            MethodOutcome::Skipped => Err(Error::MethodSkipped(method)),
            MethodOutcome::NoCode => Err(Error::NoCode(method)),
            MethodOutcome::Rejected => Err(Error::VerificationFailed(method)),
            MethodOutcome::CodegenFailed(message) => Err(Error::Codegen { method, message }),
        }
    }
}

/// Everything the writer needs to lay out and link the output image.
///
/// Keyed collections are ordered by key, patches by referrer and offset, and trampolines by slot.
#[derive(Debug, Clone, Default)]
pub struct LinkSnapshot {
    /// Status of every touched class
    pub classes: Vec<(ClassReference, ClassStatus)>,
    /// Every compiled method
    pub methods: Vec<Arc<CompiledMethodRecord>>,
    /// Absolute call patches
    pub call_patches: Vec<CallPatch>,
    /// Pc-relative call patches
    pub relative_call_patches: Vec<RelativeCallPatch>,
    /// Method object patches
    pub method_patches: Vec<MethodPatch>,
    /// Class object patches
    pub class_patches: Vec<TypePatch>,
    /// Helper entrypoints in slot order
    pub trampolines: Vec<EntrypointId>,
    /// Descriptors of every class in the boot image (empty for application runs)
    pub image_classes: BTreeSet<String>,
}

/// Parallel ahead-of-time compilation driver.
///
/// One driver owns the output of one compilation: create it with the options and collaborators,
/// call [`compile_all`](Self::compile_all) once (and [`compile_one`](Self::compile_one) as often
/// as needed), then hand the [`LinkSnapshot`] to the writer.
///
/// # Examples
///
/// ```rust,ignore
/// use aotscope::prelude::*;
///
/// let options = CompilerOptions::application(InstructionSet::Thumb2);
/// let driver = CompilerDriver::new(options, &type_system, &backend)?
///     .with_profile(ProfileGate::from_path(path, ProfileOptions::default()));
/// let summary = driver.compile_all(&[ModuleId(0)], &ClassLoaderContext::new("app"))?;
/// println!("{summary}");
/// ```
pub struct CompilerDriver<'a> {
    options: CompilerOptions,
    type_system: &'a dyn TypeSystem,
    codegen: &'a dyn Codegen,
    profile: ProfileGate,
    blobs: BlobStore,
    patches: PatchLedger,
    tables: ArtifactTables,
    trampolines: TrampolineTable,
    events: EventLog,
    stats: OracleStats,
    // Written during Resolve for the few classes with final instance fields, read by every
    // constructor compile
    barrier_classes: RwLock<FxHashSet<ClassReference>>,
    image_classes: RwLock<BTreeSet<String>>,
    claims: DashMap<MethodReference, Arc<OnceLock<MethodOutcome>>, FxBuildHasher>,
    facts: RwLock<Option<Arc<Facts>>>,
    // Facts of classes compiled through `compile_one` before any run verified them
    local_facts: DashMap<ClassReference, Arc<Facts>, FxBuildHasher>,
    snapshot: RwLock<Option<Arc<LinkSnapshot>>>,
}

impl<'a> CompilerDriver<'a> {
    /// Creates a driver.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the options are inconsistent.
    pub fn new(
        options: CompilerOptions,
        type_system: &'a dyn TypeSystem,
        codegen: &'a dyn Codegen,
    ) -> Result<Self> {
        options.validate()?;
        let image_classes = options.image_classes.clone().unwrap_or_default();
        Ok(CompilerDriver {
            options,
            type_system,
            codegen,
            profile: ProfileGate::disabled(),
            blobs: BlobStore::new(),
            patches: PatchLedger::new(),
            tables: ArtifactTables::new(),
            trampolines: TrampolineTable::new(),
            events: EventLog::new(),
            stats: OracleStats::new(),
            barrier_classes: RwLock::new(FxHashSet::default()),
            image_classes: RwLock::new(image_classes),
            claims: DashMap::with_hasher(FxBuildHasher),
            facts: RwLock::new(None),
            local_facts: DashMap::with_hasher(FxBuildHasher),
            snapshot: RwLock::new(None),
        })
    }

    /// Uses `profile` to skip cold methods.
    #[must_use]
    pub fn with_profile(mut self, profile: ProfileGate) -> Self {
        self.profile = profile;
        self
    }

    /// Loads the profile at `path` with the profile options of this driver.
    ///
    /// A missing or malformed file leaves the driver compiling every method.
    #[must_use]
    pub fn with_profile_path(self, path: &std::path::Path) -> Self {
        let gate = ProfileGate::from_path(path, self.options.profile);
        self.with_profile(gate)
    }

    /// Runs the full phase pipeline over `modules`.
    ///
    /// Modules are processed in the order `loader` searches them; within a module, classes are
    /// processed in parallel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ThreadPool`] if the worker pool cannot be created and
    /// [`Error::DuplicateMethod`] if a compiled method was recorded twice. Per-method failures
    /// are reported in the returned [`Summary`].
    pub fn compile_all(&self, modules: &[ModuleId], loader: &ClassLoaderContext) -> Result<Summary> {
        let start = Instant::now();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.thread_count)
            .thread_name(|index| format!("aotscope-worker-{index}"))
            .build()
            .map_err(|error| Error::ThreadPool(error.to_string()))?;

        let order = loader.order(modules);
        log::info!(
            "compiling {} modules for {} with {} workers",
            order.len(),
            self.options.instruction_set,
            pool.current_num_threads()
        );

        let facts = pool.install(|| -> Result<Arc<Facts>> {
            let builder = FactsBuilder::new();
            let defs = self.phase(Phase::Resolve, || Ok(self.resolve(&builder, &order, loader)))?;
            self.phase(Phase::Verify, || {
                self.verify(&builder, &defs);
                Ok(())
            })?;
            if self.options.is_boot_image() {
                self.phase(Phase::InitializeClasses, || {
                    self.initialize_classes(&defs);
                    Ok(())
                })?;
            }

            let facts = Arc::new(builder.freeze(|class| self.type_system.is_initialized(class)));
            *write_lock!(self.facts) = Some(facts.clone());

            self.phase(Phase::Compile, || {
                defs.par_iter().try_for_each(|def| {
                    def.methods
                        .iter()
                        .try_for_each(|method| self.compile_method(&facts, def, method).map(drop))
                })
            })?;
            self.phase(Phase::PostCompile, || {
                self.post_compile(&defs);
                Ok(())
            })?;
            Ok(facts)
        })?;

        let summary = Summary::collect(self, &facts, start.elapsed());
        if self.options.dump_stats {
            summary.log();
            log::info!("fast paths:\n{}", self.stats.snapshot());
        }
        Ok(summary)
    }

    /// Compiles a single method outside the bulk pipeline.
    ///
    /// Returns the existing record if the method was already compiled. If no run has resolved the
    /// method's class yet, the class is resolved and verified first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MethodNotFound`] or [`Error::ClassNotFound`] for unknown identities, and
    /// [`Error::VerificationFailed`], [`Error::MethodSkipped`], [`Error::NoCode`] or
    /// [`Error::Codegen`] if the method was not compiled.
    pub fn compile_one(&self, method: MethodReference) -> Result<Arc<CompiledMethodRecord>> {
        if let Some(record) = self.tables.method(method) {
            return Ok(record);
        }
        let class = self
            .type_system
            .declaring_class(method)
            .ok_or(Error::MethodNotFound(method))?;
        let def = self
            .type_system
            .class_def(class)
            .ok_or(Error::ClassNotFound(class))?;
        let method_def = def
            .methods
            .iter()
            .find(|candidate| candidate.reference == method)
            .ok_or(Error::MethodNotFound(method))?;

        let facts = self.facts_for(&def);
        self.compile_method(&facts, &def, method_def)?
            .into_result(method)
    }

    /// Marks `class` as needing a store barrier at the end of its constructors.
    pub fn add_requires_constructor_barrier(&self, class: ClassReference) {
        let inserted = write_lock!(self.barrier_classes).insert(class);
        if inserted {
            self.events
                .record(EventKind::ConstructorBarrierRequired)
                .class(class);
        }
    }

    /// Returns true if the constructors of `class` need a store barrier.
    #[must_use]
    pub fn requires_constructor_barrier(&self, class: ClassReference) -> bool {
        read_lock!(self.barrier_classes).contains(&class)
    }

    /// Returns true if `descriptor` names a class that goes into the boot image.
    #[must_use]
    pub fn is_image_class(&self, descriptor: &str) -> bool {
        self.options.is_boot_image()
            && (self.options.image_classes.is_none()
                || read_lock!(self.image_classes).contains(descriptor))
    }

    /// The output of the last completed run, once PostCompile has finished.
    #[must_use]
    pub fn link_snapshot(&self) -> Option<Arc<LinkSnapshot>> {
        read_lock!(self.snapshot).clone()
    }

    /// The facts of the last run, once they have been frozen.
    #[must_use]
    pub fn facts(&self) -> Option<Arc<Facts>> {
        read_lock!(self.facts).clone()
    }

    /// The options this driver was created with.
    #[must_use]
    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// The deduplicated blobs of every compiled method.
    #[must_use]
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// The recorded patch requests.
    #[must_use]
    pub fn patches(&self) -> &PatchLedger {
        &self.patches
    }

    /// The compiled class and method tables.
    #[must_use]
    pub fn tables(&self) -> &ArtifactTables {
        &self.tables
    }

    /// The helper entrypoint table.
    #[must_use]
    pub fn trampolines(&self) -> &TrampolineTable {
        &self.trampolines
    }

    /// The event log of this driver.
    #[must_use]
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// The fast-path counters of this driver.
    #[must_use]
    pub fn stats(&self) -> &OracleStats {
        &self.stats
    }

    fn phase<T>(&self, phase: Phase, run: impl FnOnce() -> Result<T>) -> Result<T> {
        let start = Instant::now();
        self.events.record(EventKind::PhaseStarted).phase(phase);
        log::debug!("{phase} started");
        let result = run();
        match &result {
            Ok(_) => {
                self.events
                    .record(EventKind::PhaseCompleted)
                    .phase(phase)
                    .message(format!("{phase} took {:?}", start.elapsed()));
                log::debug!("{phase} completed in {:?}", start.elapsed());
            }
            Err(error) => {
                self.events
                    .record(EventKind::Error)
                    .phase(phase)
                    .message(error.to_string());
                log::warn!("{phase} aborted: {error}");
            }
        }
        result
    }

    fn resolve(
        &self,
        builder: &FactsBuilder,
        order: &[ModuleId],
        loader: &ClassLoaderContext,
    ) -> Vec<ClassDef> {
        let mut defs = Vec::new();
        // Modules one after another, so each sees the loader state of the ones before it
        for module in order {
            let classes = self.type_system.classes(*module);
            let module_defs: Vec<ClassDef> = classes
                .par_iter()
                .filter_map(|class| {
                    let Some(def) = self.type_system.class_def(*class) else {
                        self.events
                            .record(EventKind::Warning)
                            .class(*class)
                            .phase(Phase::Resolve)
                            .message("class listed by its module has no definition");
                        return None;
                    };
                    self.resolve_class(builder, loader, &def);
                    Some(def)
                })
                .collect();
            defs.extend(module_defs);
        }
        defs
    }

    fn resolve_class(&self, builder: &FactsBuilder, loader: &ClassLoaderContext, def: &ClassDef) {
        let outcome = builder.resolve_class(self.type_system, loader, def);
        for reference in &outcome.unresolved {
            self.events
                .record(EventKind::ReferenceUnresolved)
                .class(def.reference)
                .phase(Phase::Resolve)
                .message(reference.to_string());
        }
        if def.has_final_instance_fields {
            self.add_requires_constructor_barrier(def.reference);
        }
    }

    fn verify(&self, builder: &FactsBuilder, defs: &[ClassDef]) {
        defs.par_iter().for_each(|def| self.verify_class(builder, def));
    }

    fn verify_class(&self, builder: &FactsBuilder, def: &ClassDef) {
        let verification = self.type_system.verify_class(def.reference);
        builder.record_verification(self.type_system, def.reference, &verification);
        let status = self
            .tables
            .record_class_status(def.reference, verification.status);
        self.events
            .record(EventKind::ClassVerified)
            .class(def.reference)
            .phase(Phase::Verify)
            .message(format!("{} is {status}", def.descriptor));
    }

    fn initialize_classes(&self, defs: &[ClassDef]) {
        defs.par_iter()
            .filter(|def| self.is_image_class(&def.descriptor))
            .for_each(|def| {
                let class = def.reference;
                // Only classes the verifier fully accepted may run their initializer early
                if !self
                    .tables
                    .class_status(class)
                    .is_some_and(ClassStatus::is_verified)
                {
                    return;
                }
                if self.type_system.is_initialized(class) {
                    self.tables
                        .record_class_status(class, ClassStatus::Initialized);
                    return;
                }
                if self.type_system.can_initialize(class)
                    && self.type_system.initialize_class(class)
                {
                    self.tables
                        .record_class_status(class, ClassStatus::Initialized);
                    self.events
                        .record(EventKind::ClassInitialized)
                        .class(class)
                        .phase(Phase::InitializeClasses)
                        .message(def.descriptor.clone());
                } else {
                    self.events
                        .record(EventKind::ClassInitializationFailed)
                        .class(class)
                        .phase(Phase::InitializeClasses)
                        .message(def.descriptor.clone());
                }
            });
    }

    fn facts_for(&self, def: &ClassDef) -> Arc<Facts> {
        if let Some(facts) = read_lock!(self.facts).as_ref() {
            if facts.is_class_verified(def.reference) {
                return facts.clone();
            }
        }
        // Never part of a run: resolve and verify just this class, once
        self.local_facts
            .entry(def.reference)
            .or_insert_with(|| {
                let builder = FactsBuilder::new();
                self.resolve_class(&builder, &ClassLoaderContext::default(), def);
                self.verify_class(&builder, def);
                Arc::new(builder.freeze(|class| self.type_system.is_initialized(class)))
            })
            .clone()
    }

    fn compile_method(
        &self,
        facts: &Facts,
        def: &ClassDef,
        method: &MethodDef,
    ) -> Result<MethodOutcome> {
        let claim = self
            .claims
            .entry(method.reference)
            .or_insert_with(|| Arc::new(OnceLock::new()))
            .clone();

        let mut fatal = None;
        let outcome = claim.get_or_init(|| match self.run_method(facts, def, method) {
            Ok(outcome) => outcome,
            Err(error) => {
                let message = error.to_string();
                fatal = Some(error);
                MethodOutcome::CodegenFailed(message)
            }
        });
        match fatal {
            Some(error) => Err(error),
            None => Ok(outcome.clone()),
        }
    }

    fn run_method(&self, facts: &Facts, def: &ClassDef, method: &MethodDef) -> Result<MethodOutcome> {
        let reference = method.reference;
        if method.code.is_none() && !method.is_native() {
            self.events
                .record(EventKind::MethodWithoutCode)
                .method(reference)
                .phase(Phase::Compile);
            return Ok(MethodOutcome::NoCode);
        }

        let class_failed = self.tables.class_status(def.reference) == Some(ClassStatus::Error);
        if let Some(reason) = facts.rejection(reference).or(class_failed.then_some("class failed verification")) {
            self.events
                .record(EventKind::VerificationRejected)
                .method(reference)
                .phase(Phase::Compile)
                .message(reason);
            return Ok(MethodOutcome::Rejected);
        }

        if self.profile.should_skip(&method.name) {
            self.events
                .record(EventKind::MethodSkipped)
                .method(reference)
                .phase(Phase::Compile)
                .message(method.name.clone());
            return Ok(MethodOutcome::Skipped);
        }

        let verified = facts.verified_method(reference);
        let oracle = FastPathOracle::new(facts, &self.options, &self.stats);
        let decisions = oracle.decide(def.reference, method, verified);
        let request = CodegenRequest {
            method,
            class: def.reference,
            verified,
            decisions: &decisions,
            requires_constructor_barrier: method.is_constructor()
                && self.requires_constructor_barrier(def.reference),
            instruction_set: self.options.instruction_set,
        };
        let context = CodegenContext::new(&self.trampolines, self.options.instruction_set.policy());

        let output = match self.codegen.compile(&request, &context) {
            Ok(output) => output,
            Err(error) => {
                let message = error.to_string();
                log::debug!("{} failed on {reference}: {message}", self.codegen.name());
                self.events
                    .record(EventKind::CodegenFailed)
                    .method(reference)
                    .phase(Phase::Compile)
                    .message(message.clone());
                return Ok(MethodOutcome::CodegenFailed(message));
            }
        };

        let intern = |category, bytes: Option<&[u8]>| bytes.map(|bytes| self.blobs.intern(category, bytes));
        let record = self.tables.insert_method(CompiledMethodRecord {
            method: reference,
            instruction_set: self.options.instruction_set,
            code: intern(
                BlobCategory::Code,
                (!output.code.is_empty()).then_some(output.code.as_slice()),
            ),
            mapping_table: intern(BlobCategory::MappingTable, output.mapping_table.as_deref()),
            vmap_table: intern(BlobCategory::VmapTable, output.vmap_table.as_deref()),
            gc_map: intern(BlobCategory::GcMap, output.gc_map.as_deref()),
            cfi: intern(BlobCategory::CallFrameInfo, output.cfi.as_deref()),
            frame_size_in_bytes: output.frame_size_in_bytes,
            core_spill_mask: output.core_spill_mask,
            fp_spill_mask: output.fp_spill_mask,
        })?;

        for patch in &output.patches {
            self.patches.record(patch_record(def.reference, method, *patch));
        }
        let verdict = facts.class_verdict(def.reference).unwrap_or_default();
        self.tables.record_class_status(def.reference, verdict);
        self.events
            .record(EventKind::MethodCompiled)
            .method(reference)
            .phase(Phase::Compile);
        Ok(MethodOutcome::Compiled(record))
    }

    fn post_compile(&self, defs: &[ClassDef]) {
        let image_classes = if self.options.is_boot_image() {
            self.close_image_classes(defs)
        } else {
            BTreeSet::new()
        };

        let patches = self.patches.snapshot();
        let snapshot = LinkSnapshot {
            classes: self.tables.class_snapshot(),
            methods: self.tables.method_snapshot(),
            call_patches: patches.calls,
            relative_call_patches: patches.relative_calls,
            method_patches: patches.methods,
            class_patches: patches.types,
            trampolines: self.trampolines.entries(),
            image_classes,
        };
        *write_lock!(self.snapshot) = Some(Arc::new(snapshot));
    }

    /// Adds the image dependencies of every initialized image class, transitively.
    fn close_image_classes(&self, defs: &[ClassDef]) -> BTreeSet<String> {
        let by_descriptor: FxHashMap<&str, ClassReference> = defs
            .iter()
            .map(|def| (def.descriptor.as_str(), def.reference))
            .collect();
        let mut image_classes: BTreeSet<String> = match &self.options.image_classes {
            Some(_) => read_lock!(self.image_classes).clone(),
            None => defs.iter().map(|def| def.descriptor.clone()).collect(),
        };

        let mut worklist: Vec<String> = image_classes.iter().cloned().collect();
        while let Some(descriptor) = worklist.pop() {
            let Some(class) = by_descriptor.get(descriptor.as_str()) else {
                continue;
            };
            if self.tables.class_status(*class) != Some(ClassStatus::Initialized) {
                continue;
            }
            for dependency in self.type_system.image_dependencies(*class) {
                if image_classes.insert(dependency.clone()) {
                    self.events
                        .record(EventKind::ImageClassAdded)
                        .class(*class)
                        .phase(Phase::PostCompile)
                        .message(dependency.clone());
                    worklist.push(dependency);
                }
            }
        }

        write_lock!(self.image_classes).clone_from(&image_classes);
        image_classes
    }
}

fn patch_record(referrer_class: ClassReference, referrer: &MethodDef, patch: PatchRequest) -> PatchRecord {
    match patch {
        PatchRequest::Call {
            target,
            target_kind,
            literal_offset,
        } => PatchRecord::Call(CallPatch {
            referrer: referrer.reference,
            referrer_class,
            referrer_kind: referrer.kind,
            target,
            target_kind,
            literal_offset,
        }),
        PatchRequest::RelativeCall {
            target,
            target_kind,
            literal_offset,
            pc_relative_offset,
        } => PatchRecord::RelativeCall(RelativeCallPatch {
            call: CallPatch {
                referrer: referrer.reference,
                referrer_class,
                referrer_kind: referrer.kind,
                target,
                target_kind,
                literal_offset,
            },
            pc_relative_offset,
        }),
        PatchRequest::Method {
            target,
            literal_offset,
        } => PatchRecord::Method(MethodPatch {
            referrer: referrer.reference,
            referrer_class,
            target,
            literal_offset,
        }),
        PatchRequest::Type {
            target_type,
            literal_offset,
        } => PatchRecord::Type(TypePatch {
            referrer: referrer.reference,
            referrer_class,
            target_type,
            literal_offset,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::{
        compiler::{
            oracle::Decision,
            options::ProfileOptions,
            profile::ProfileEntries,
            target::InstructionSet,
        },
        metadata::{
            flags::{ClassFlags, MemberFlags},
            model::{AccessSite, CodeBody, SiteKind},
            reference::{FieldIndex, InvokeKind, TypeIndex},
        },
        test::{MockTypeSystem, StubCodegen},
    };

    const APP: ModuleId = ModuleId(1);

    fn body(sites: Vec<AccessSite>) -> Option<CodeBody> {
        Some(CodeBody {
            size_in_units: 4,
            sites,
        })
    }

    struct Fixture {
        ts: MockTypeSystem,
        main: ClassReference,
        util: ClassReference,
        run: MethodReference,
        helper: MethodReference,
        ctor: MethodReference,
        hash: MethodReference,
        missing: MethodReference,
    }

    fn fixture() -> Fixture {
        let mut ts = MockTypeSystem::new();
        let main = ts.add_class(ClassReference::new(APP, 0), "La/Main;", ClassFlags::PUBLIC, None);
        let util = ts.add_class(ClassReference::new(APP, 1), "La/Util;", ClassFlags::PUBLIC, None);
        ts.map_type(APP, TypeIndex(0), main);
        ts.map_type(APP, TypeIndex(1), util);
        ts.add_field(APP, FieldIndex(0), main, MemberFlags::PUBLIC, 8);
        ts.set_final_instance_fields(main);

        let run = ts.add_method(
            main,
            0,
            "La/Main;.run",
            MemberFlags::PUBLIC,
            InvokeKind::Virtual,
            body(vec![
                AccessSite {
                    pc: 0,
                    kind: SiteKind::InstanceField {
                        index: FieldIndex(0),
                        is_put: false,
                    },
                },
                AccessSite {
                    pc: 2,
                    kind: SiteKind::InstanceField {
                        index: FieldIndex(9),
                        is_put: true,
                    },
                },
                AccessSite {
                    pc: 4,
                    kind: SiteKind::Invoke {
                        method_index: 3,
                        kind: InvokeKind::Static,
                    },
                },
            ]),
        );
        let helper = ts.add_method(
            main,
            1,
            "La/Main;.helper",
            MemberFlags::PRIVATE,
            InvokeKind::Direct,
            body(vec![]),
        );
        let ctor = ts.add_method(
            main,
            2,
            "La/Main;.<init>",
            MemberFlags::PUBLIC | MemberFlags::CONSTRUCTOR,
            InvokeKind::Direct,
            body(vec![]),
        );
        let hash = ts.add_method(
            util,
            3,
            "La/Util;.hash",
            MemberFlags::PUBLIC | MemberFlags::STATIC,
            InvokeKind::Static,
            body(vec![]),
        );
        let missing = ts.add_method(
            util,
            4,
            "La/Util;.abstractOne",
            MemberFlags::PUBLIC | MemberFlags::ABSTRACT,
            InvokeKind::Virtual,
            None,
        );

        Fixture {
            ts,
            main,
            util,
            run,
            helper,
            ctor,
            hash,
            missing,
        }
    }

    fn options() -> CompilerOptions {
        let mut options = CompilerOptions::application(InstructionSet::Thumb2);
        options.thread_count = 4;
        options
    }

    #[test]
    fn test_compile_all_records_outcomes() {
        let f = fixture();
        let codegen = StubCodegen::new();
        let driver = CompilerDriver::new(options(), &f.ts, &codegen).unwrap();
        let summary = driver
            .compile_all(&[APP], &ClassLoaderContext::new("app"))
            .unwrap();

        assert_eq!(summary.methods_compiled, 4);
        assert_eq!(summary.methods_without_code, 1);
        assert_eq!(summary.methods_failed(), 0);
        assert_eq!(driver.tables().method_count(), 4);
        assert!(driver.tables().method(f.missing).is_none());
        assert_eq!(driver.tables().class_status(f.main), Some(ClassStatus::Verified));
        assert_eq!(driver.tables().class_status(f.util), Some(ClassStatus::Verified));
        assert_eq!(f.ts.verify_count(), 2);
        for method in [f.run, f.helper, f.ctor, f.hash] {
            assert_eq!(codegen.calls(method), 1);
        }
    }

    #[test]
    fn test_unresolved_field_is_slow_in_codegen() {
        let f = fixture();
        let codegen = StubCodegen::new();
        let driver = CompilerDriver::new(options(), &f.ts, &codegen).unwrap();
        let summary = driver
            .compile_all(&[APP], &ClassLoaderContext::new("app"))
            .unwrap();

        let decisions = codegen.decisions(f.run).unwrap();
        match decisions[1].decision {
            Decision::InstanceField(info) => {
                assert!(!info.fast);
                assert_eq!(info.offset, None);
            }
            other => panic!("unexpected {other:?}"),
        }
        match decisions[0].decision {
            Decision::InstanceField(info) => assert_eq!(info.offset, Some(8)),
            other => panic!("unexpected {other:?}"),
        }
        assert!(summary.references_unresolved >= 1);
        assert_eq!(driver.stats().snapshot().unresolved_instance_fields, 1);
        assert!(driver.events().has(EventKind::ReferenceUnresolved));
    }

    #[test]
    fn test_constructor_barrier_reaches_codegen() {
        let f = fixture();
        let codegen = StubCodegen::new();
        let driver = CompilerDriver::new(options(), &f.ts, &codegen).unwrap();
        driver
            .compile_all(&[APP], &ClassLoaderContext::new("app"))
            .unwrap();

        assert!(driver.requires_constructor_barrier(f.main));
        assert!(!driver.requires_constructor_barrier(f.util));
        assert_eq!(codegen.barrier_requests(), vec![f.ctor]);
    }

    #[test]
    fn test_compile_one_is_idempotent() {
        let f = fixture();
        let codegen = StubCodegen::new();
        let driver = CompilerDriver::new(options(), &f.ts, &codegen).unwrap();

        let first = driver.compile_one(f.hash).unwrap();
        let second = driver.compile_one(f.hash).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(codegen.calls(f.hash), 1);

        // The bulk run reuses the record
        driver
            .compile_all(&[APP], &ClassLoaderContext::new("app"))
            .unwrap();
        assert_eq!(codegen.calls(f.hash), 1);
        assert!(Arc::ptr_eq(&driver.tables().method(f.hash).unwrap(), &first));
    }

    #[test]
    fn test_compile_one_reports_failures() {
        let f = fixture();
        let codegen = StubCodegen::new().failing(f.helper);
        let driver = CompilerDriver::new(options(), &f.ts, &codegen).unwrap();

        assert!(matches!(driver.compile_one(f.missing), Err(Error::NoCode(m)) if m == f.missing));
        assert!(matches!(driver.compile_one(f.helper), Err(Error::Codegen { method, .. }) if method == f.helper));
        // A failed outcome sticks
        assert!(driver.compile_one(f.helper).is_err());
        assert_eq!(codegen.calls(f.helper), 1);

        let unknown = MethodReference::new(APP, 42);
        assert!(matches!(driver.compile_one(unknown), Err(Error::MethodNotFound(_))));
    }

    #[test]
    fn test_rejected_methods_are_not_compiled() {
        let mut f = fixture();
        f.ts.reject_method(f.helper, "register type mismatch");
        let codegen = StubCodegen::new();
        let driver = CompilerDriver::new(options(), &f.ts, &codegen).unwrap();
        let summary = driver
            .compile_all(&[APP], &ClassLoaderContext::new("app"))
            .unwrap();

        assert_eq!(summary.verification_rejected, 1);
        assert_eq!(codegen.calls(f.helper), 0);
        assert!(matches!(
            driver.compile_one(f.helper),
            Err(Error::VerificationFailed(_))
        ));
        let event = driver
            .events()
            .filter_kind(EventKind::VerificationRejected)
            .next()
            .unwrap();
        assert_eq!(event.message, "register type mismatch");
        let kinds: Vec<EventKind> = driver
            .events()
            .filter_method(f.helper)
            .map(|e| e.kind)
            .collect();
        assert_eq!(kinds, vec![EventKind::VerificationRejected]);
    }

    #[test]
    fn test_profile_skips_cold_methods() {
        let f = fixture();
        let profile = ProfileEntries::parse(
            "1000/0/0\nLa/Main;.run/990/20\nLa/Main;.helper/5/4\nLa/Main;.<init>/5/4\n",
        );
        let codegen = StubCodegen::new();
        let driver = CompilerDriver::new(options(), &f.ts, &codegen)
            .unwrap()
            .with_profile(ProfileGate::new(profile, ProfileOptions::default()));
        let summary = driver
            .compile_all(&[APP], &ClassLoaderContext::new("app"))
            .unwrap();

        assert_eq!(summary.methods_skipped, 2);
        assert_eq!(summary.methods_compiled, 2);
        assert!(matches!(driver.compile_one(f.helper), Err(Error::MethodSkipped(_))));
        assert_eq!(codegen.calls(f.helper), 0);
    }

    #[test]
    fn test_facts_are_frozen_before_compile() {
        let f = fixture();
        let codegen = StubCodegen::new().with_counter(&f.ts.resolve_calls);
        let driver = CompilerDriver::new(options(), &f.ts, &codegen).unwrap();
        driver
            .compile_all(&[APP], &ClassLoaderContext::new("app"))
            .unwrap();

        let resolves_after_run = f.ts.resolve_calls.load(Ordering::SeqCst);
        let facts = driver.facts().unwrap();
        assert!(facts.is_class_verified(f.main));
        // Compile never resolved anything: every lookup happened before the freeze
        assert_eq!(codegen.observed_counts(), vec![resolves_after_run; 4]);
    }

    #[test]
    fn test_boot_image_initializes_and_closes_image_classes() {
        let mut f = fixture();
        let extra = f.ts.add_class(ClassReference::new(APP, 2), "La/Extra;", ClassFlags::PUBLIC, None);
        f.ts.set_image_dependencies(f.util, &["La/Extra;", "Ljava/lang/String;"]);
        f.ts.set_image_dependencies(extra, &["La/Deep;"]);
        f.ts.set_can_initialize(f.main, false);

        let mut options = CompilerOptions::boot_image(
            InstructionSet::Thumb2,
            Some(BTreeSet::from(["La/Main;".to_string(), "La/Util;".to_string()])),
        );
        options.thread_count = 2;
        let codegen = StubCodegen::new();
        let driver = CompilerDriver::new(options, &f.ts, &codegen).unwrap();
        driver
            .compile_all(&[APP], &ClassLoaderContext::new("boot"))
            .unwrap();

        assert_eq!(driver.tables().class_status(f.util), Some(ClassStatus::Initialized));
        assert_eq!(driver.tables().class_status(f.main), Some(ClassStatus::Verified));
        // Extra is not an image class up front, so it was never initialized and adds nothing
        assert_eq!(driver.tables().class_status(extra), Some(ClassStatus::Verified));

        let snapshot = driver.link_snapshot().unwrap();
        let expected: BTreeSet<String> = ["La/Extra;", "La/Main;", "La/Util;", "Ljava/lang/String;"]
            .iter()
            .map(|d| (*d).to_string())
            .collect();
        assert_eq!(snapshot.image_classes, expected);
        assert!(driver.is_image_class("La/Extra;"));
        assert!(!driver.is_image_class("La/Deep;"));
        assert_eq!(driver.events().count_kind(EventKind::ClassInitialized), 1);
        assert_eq!(driver.events().count_kind(EventKind::ClassInitializationFailed), 1);
    }

    #[test]
    fn test_soft_failed_class_is_not_initialized() {
        let mut f = fixture();
        f.ts.set_class_status(f.util, ClassStatus::NotReady);

        let mut options = CompilerOptions::boot_image(InstructionSet::Thumb2, None);
        options.thread_count = 2;
        let codegen = StubCodegen::new();
        let driver = CompilerDriver::new(options, &f.ts, &codegen).unwrap();
        driver
            .compile_all(&[APP], &ClassLoaderContext::new("boot"))
            .unwrap();

        assert_eq!(driver.tables().class_status(f.util), Some(ClassStatus::NotReady));
        assert!(!f.ts.is_initialized(f.util));
        assert_eq!(f.ts.initialize_calls.load(Ordering::SeqCst), 1);
        assert_eq!(driver.tables().class_status(f.main), Some(ClassStatus::Initialized));
        // Checks deferred to runtime do not stop the class from being compiled
        assert_eq!(codegen.calls(f.hash), 1);
    }

    #[test]
    fn test_compiled_class_keeps_verifier_status() {
        let mut f = fixture();
        f.ts.set_class_status(f.util, ClassStatus::NotReady);
        let codegen = StubCodegen::new();
        let driver = CompilerDriver::new(options(), &f.ts, &codegen).unwrap();
        let summary = driver
            .compile_all(&[APP], &ClassLoaderContext::new("app"))
            .unwrap();

        assert_eq!(summary.methods_compiled, 4);
        assert!(driver.tables().method(f.hash).is_some());
        assert_eq!(driver.tables().class_status(f.util), Some(ClassStatus::NotReady));
        assert_eq!(driver.tables().class_status(f.main), Some(ClassStatus::Verified));
    }

    #[test]
    fn test_compile_one_records_verifier_status() {
        let mut f = fixture();
        f.ts.set_class_status(f.util, ClassStatus::NotReady);
        let codegen = StubCodegen::new();
        let driver = CompilerDriver::new(options(), &f.ts, &codegen).unwrap();

        driver.compile_one(f.hash).unwrap();
        assert_eq!(driver.tables().class_status(f.util), Some(ClassStatus::NotReady));
    }

    #[test]
    fn test_compile_one_verifies_each_class_once() {
        let f = fixture();
        let codegen = StubCodegen::new();
        let driver = CompilerDriver::new(options(), &f.ts, &codegen).unwrap();

        driver.compile_one(f.run).unwrap();
        driver.compile_one(f.helper).unwrap();
        driver.compile_one(f.ctor).unwrap();
        assert_eq!(f.ts.verify_count(), 1);
        assert_eq!(driver.events().count_kind(EventKind::ClassVerified), 1);

        driver.compile_one(f.hash).unwrap();
        assert_eq!(f.ts.verify_count(), 2);
        assert_eq!(codegen.calls(f.run), 1);
    }

    #[test]
    fn test_link_snapshot_collects_patches_and_trampolines() {
        let f = fixture();
        let codegen = StubCodegen::new().with_entrypoint(EntrypointId(0x120));
        let driver = CompilerDriver::new(options(), &f.ts, &codegen).unwrap();
        assert!(driver.link_snapshot().is_none());
        driver
            .compile_all(&[APP], &ClassLoaderContext::new("app"))
            .unwrap();

        let snapshot = driver.link_snapshot().unwrap();
        assert_eq!(snapshot.methods.len(), 4);
        assert_eq!(snapshot.trampolines, vec![EntrypointId(0x120)]);
        // Util.hash lives outside the boot image, so the call in run is linked through a patch
        assert_eq!(snapshot.call_patches.len(), 1);
        let call = snapshot.call_patches[0];
        assert_eq!(call.referrer, f.run);
        assert_eq!(call.target, f.hash);
        assert_eq!(call.referrer_class, f.main);
        assert_eq!(snapshot.classes.len(), 2);
    }

    #[test]
    fn test_invalid_options_are_rejected() {
        let f = fixture();
        let codegen = StubCodegen::new();
        let mut options = options();
        options.image_classes = Some(BTreeSet::new());
        assert!(matches!(
            CompilerDriver::new(options, &f.ts, &codegen),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_phase_order_in_events() {
        let f = fixture();
        let codegen = StubCodegen::new();
        let driver = CompilerDriver::new(options(), &f.ts, &codegen).unwrap();
        driver
            .compile_all(&[APP], &ClassLoaderContext::new("app"))
            .unwrap();

        let started: Vec<Phase> = driver
            .events()
            .filter_kind(EventKind::PhaseStarted)
            .filter_map(|e| e.phase)
            .collect();
        assert_eq!(
            started,
            vec![Phase::Resolve, Phase::Verify, Phase::Compile, Phase::PostCompile]
        );
    }
}
