//! Compiled class and method tables.
//!
//! The driver writes every compiled method exactly once and the writer reads the result, so the
//! tables expose only insert-if-absent, lookup and ordered snapshots. Both maps are
//! `crossbeam_skiplist::SkipMap`s: `get_or_insert` is atomic per key and iteration is ordered by
//! reference, which keeps the writer's view independent of worker scheduling.

use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};

use crossbeam_skiplist::SkipMap;

use crate::{
    compiler::{dedupe::BlobHandle, target::InstructionSet},
    metadata::{
        flags::ClassStatus,
        reference::{ClassReference, MethodReference},
    },
    Error, Result,
};

/// Compilation status of one class.
///
/// Created on first touch and never removed during a run; the status only moves upward along the
/// [`ClassStatus`] lattice.
#[derive(Debug)]
pub struct CompiledClassRecord {
    class: ClassReference,
    status: AtomicU8,
}

impl CompiledClassRecord {
    fn new(class: ClassReference) -> Self {
        Self {
            class,
            status: AtomicU8::new(ClassStatus::NotReady as u8),
        }
    }

    /// The class this record describes.
    #[must_use]
    pub fn class(&self) -> ClassReference {
        self.class
    }

    /// The current status.
    #[must_use]
    pub fn status(&self) -> ClassStatus {
        ClassStatus::from_raw(self.status.load(Ordering::Acquire))
    }

    /// Raises the status to at least `status` and returns the resulting status.
    pub fn advance(&self, status: ClassStatus) -> ClassStatus {
        let mut current = self.status.load(Ordering::Acquire);
        loop {
            let merged = ClassStatus::from_raw(current).merge(status);
            if merged as u8 == current {
                return merged;
            }
            match self.status.compare_exchange_weak(
                current,
                merged as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return merged,
                Err(actual) => current = actual,
            }
        }
    }
}

/// The artifacts of one compiled method.
///
/// Holds handles into the [`BlobStore`](crate::compiler::BlobStore), never the bytes themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledMethodRecord {
    /// The compiled method
    pub method: MethodReference,
    /// Instruction set of the code
    pub instruction_set: InstructionSet,
    /// Machine code
    pub code: Option<BlobHandle>,
    /// Native to bytecode pc mapping
    pub mapping_table: Option<BlobHandle>,
    /// Variable location map
    pub vmap_table: Option<BlobHandle>,
    /// GC root map
    pub gc_map: Option<BlobHandle>,
    /// Call frame information
    pub cfi: Option<BlobHandle>,
    /// Size of the method's frame in bytes
    pub frame_size_in_bytes: u32,
    /// Core registers saved by the prologue
    pub core_spill_mask: u32,
    /// Floating point registers saved by the prologue
    pub fp_spill_mask: u32,
}

/// Concurrent class and method tables with at-most-one write per method.
#[derive(Debug, Default)]
pub struct ArtifactTables {
    classes: SkipMap<ClassReference, Arc<CompiledClassRecord>>,
    methods: SkipMap<MethodReference, Arc<CompiledMethodRecord>>,
}

impl ArtifactTables {
    /// Creates empty tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record of `class`, creating it on first touch.
    pub fn class_record(&self, class: ClassReference) -> Arc<CompiledClassRecord> {
        self.classes
            .get_or_insert_with(class, || Arc::new(CompiledClassRecord::new(class)))
            .value()
            .clone()
    }

    /// Raises the status of `class` and returns the resulting status.
    pub fn record_class_status(&self, class: ClassReference, status: ClassStatus) -> ClassStatus {
        self.class_record(class).advance(status)
    }

    /// Returns the status of `class`, if it was touched.
    #[must_use]
    pub fn class_status(&self, class: ClassReference) -> Option<ClassStatus> {
        self.classes.get(&class).map(|entry| entry.value().status())
    }

    /// Inserts the record of a freshly compiled method.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateMethod`] if the method already has a record. The existing
    /// record stays in place.
    pub fn insert_method(&self, record: CompiledMethodRecord) -> Result<Arc<CompiledMethodRecord>> {
        let method = record.method;
        let record = Arc::new(record);
        let entry = self.methods.get_or_insert(method, record.clone());
        if Arc::ptr_eq(entry.value(), &record) {
            Ok(record)
        } else {
            Err(Error::DuplicateMethod(method))
        }
    }

    /// Returns the record of a compiled method.
    #[must_use]
    pub fn method(&self, method: MethodReference) -> Option<Arc<CompiledMethodRecord>> {
        self.methods.get(&method).map(|entry| entry.value().clone())
    }

    /// Number of compiled methods.
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Number of touched classes.
    #[must_use]
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Class statuses ordered by class reference.
    #[must_use]
    pub fn class_snapshot(&self) -> Vec<(ClassReference, ClassStatus)> {
        self.classes
            .iter()
            .map(|entry| (*entry.key(), entry.value().status()))
            .collect()
    }

    /// Compiled methods ordered by method reference.
    #[must_use]
    pub fn method_snapshot(&self) -> Vec<Arc<CompiledMethodRecord>> {
        self.methods
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}
