//! Deferred address fix-ups.
//!
//! Generated code often refers to things whose address is only known once the writer has laid
//! out the final image: other compiled methods, method objects and class objects. The backend
//! emits a placeholder and asks for a [`PatchRecord`] instead, and the [`PatchLedger`] keeps
//! those records until the writer applies them.
//!
//! The ledger is append-only and shared by every compile worker. It makes no promise about the
//! relative order of records from different referrers; [`PatchLedger::snapshot`] sorts them so
//! the writer sees a stable order.

use std::fmt;

use crate::metadata::reference::{ClassReference, InvokeKind, MethodReference, TypeIndex};

/// A call from compiled code to another method's code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallPatch {
    /// The method containing the call
    pub referrer: MethodReference,
    /// The class defining the referrer
    pub referrer_class: ClassReference,
    /// How the referrer itself is invoked
    pub referrer_kind: InvokeKind,
    /// The called method
    pub target: MethodReference,
    /// How the call site invokes the target after sharpening
    pub target_kind: InvokeKind,
    /// Offset of the placeholder within the referrer's code
    pub literal_offset: u32,
}

/// A call encoded relative to the program counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelativeCallPatch {
    /// The call being patched
    pub call: CallPatch,
    /// Distance between the placeholder and the pc the encoding is relative to
    pub pc_relative_offset: i32,
}

/// A reference from compiled code to a method object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodPatch {
    /// The method containing the reference
    pub referrer: MethodReference,
    /// The class defining the referrer
    pub referrer_class: ClassReference,
    /// The referenced method
    pub target: MethodReference,
    /// Offset of the placeholder within the referrer's code
    pub literal_offset: u32,
}

/// A reference from compiled code to a class object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypePatch {
    /// The method containing the reference
    pub referrer: MethodReference,
    /// The class defining the referrer
    pub referrer_class: ClassReference,
    /// The referenced type, relative to the referrer's module
    pub target_type: TypeIndex,
    /// Offset of the placeholder within the referrer's code
    pub literal_offset: u32,
}

/// Every kind of fix-up the writer has to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatchRecord {
    /// Absolute call target
    Call(CallPatch),
    /// Pc-relative call target
    RelativeCall(RelativeCallPatch),
    /// Method object address
    Method(MethodPatch),
    /// Class object address
    Type(TypePatch),
}

impl PatchRecord {
    /// The method whose code contains the placeholder.
    #[must_use]
    pub fn referrer(&self) -> MethodReference {
        match self {
            Self::Call(p) => p.referrer,
            Self::RelativeCall(p) => p.call.referrer,
            Self::Method(p) => p.referrer,
            Self::Type(p) => p.referrer,
        }
    }

    /// Offset of the placeholder within the referrer's code.
    #[must_use]
    pub fn literal_offset(&self) -> u32 {
        match self {
            Self::Call(p) => p.literal_offset,
            Self::RelativeCall(p) => p.call.literal_offset,
            Self::Method(p) => p.literal_offset,
            Self::Type(p) => p.literal_offset,
        }
    }

    fn sort_key(&self) -> (MethodReference, u32) {
        (self.referrer(), self.literal_offset())
    }
}

impl fmt::Display for PatchRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call(p) => write!(
                f,
                "call {}+{:#x} -> {} ({})",
                p.referrer, p.literal_offset, p.target, p.target_kind
            ),
            Self::RelativeCall(p) => write!(
                f,
                "rel-call {}+{:#x} -> {} ({}, pc{:+})",
                p.call.referrer,
                p.call.literal_offset,
                p.call.target,
                p.call.target_kind,
                p.pc_relative_offset
            ),
            Self::Method(p) => write!(
                f,
                "method {}+{:#x} -> {}",
                p.referrer, p.literal_offset, p.target
            ),
            Self::Type(p) => write!(
                f,
                "type {}+{:#x} -> {}",
                p.referrer, p.literal_offset, p.target_type
            ),
        }
    }
}

/// Immutable patch lists grouped by kind, each sorted by referrer and offset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSnapshot {
    /// Absolute call patches
    pub calls: Vec<CallPatch>,
    /// Pc-relative call patches
    pub relative_calls: Vec<RelativeCallPatch>,
    /// Method object patches
    pub methods: Vec<MethodPatch>,
    /// Class object patches
    pub types: Vec<TypePatch>,
}

impl PatchSnapshot {
    /// Total number of patches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len() + self.relative_calls.len() + self.methods.len() + self.types.len()
    }

    /// Returns true if there is nothing to patch.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Append-only, thread-safe collection of patch requests.
///
/// Calls and relative calls share one list so that a method's code patches stay in discovery
/// order relative to each other.
#[derive(Debug, Default)]
pub struct PatchLedger {
    code: boxcar::Vec<PatchRecord>,
    methods: boxcar::Vec<MethodPatch>,
    types: boxcar::Vec<TypePatch>,
}

impl PatchLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an absolute call patch.
    pub fn record_call_patch(&self, patch: CallPatch) {
        self.code.push(PatchRecord::Call(patch));
    }

    /// Records a pc-relative call patch.
    pub fn record_relative_call_patch(&self, patch: CallPatch, pc_relative_offset: i32) {
        self.code
            .push(PatchRecord::RelativeCall(RelativeCallPatch {
                call: patch,
                pc_relative_offset,
            }));
    }

    /// Records a method object patch.
    pub fn record_method_patch(&self, patch: MethodPatch) {
        self.methods.push(patch);
    }

    /// Records a class object patch.
    pub fn record_class_patch(&self, patch: TypePatch) {
        self.types.push(patch);
    }

    /// Records any kind of patch.
    pub fn record(&self, record: PatchRecord) {
        match record {
            PatchRecord::Call(_) | PatchRecord::RelativeCall(_) => {
                self.code.push(record);
            }
            PatchRecord::Method(patch) => self.record_method_patch(patch),
            PatchRecord::Type(patch) => self.record_class_patch(patch),
        }
    }

    /// Total number of recorded patches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.code.count() + self.methods.count() + self.types.count()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call and relative call patches, in discovery order.
    pub fn code_patches(&self) -> impl Iterator<Item = &PatchRecord> + '_ {
        self.code.iter().map(|(_, record)| record)
    }

    /// Every patch whose placeholder lives in the code of `method`.
    #[must_use]
    pub fn patches_for(&self, method: MethodReference) -> Vec<PatchRecord> {
        self.code
            .iter()
            .map(|(_, record)| *record)
            .chain(self.methods.iter().map(|(_, p)| PatchRecord::Method(*p)))
            .chain(self.types.iter().map(|(_, p)| PatchRecord::Type(*p)))
            .filter(|record| record.referrer() == method)
            .collect()
    }

    /// Grouped, sorted copy of every recorded patch.
    ///
    /// Only meaningful once no compile task can append anymore.
    #[must_use]
    pub fn snapshot(&self) -> PatchSnapshot {
        let mut snapshot = PatchSnapshot::default();
        let mut code: Vec<PatchRecord> = self.code.iter().map(|(_, r)| *r).collect();
        code.sort_by_key(PatchRecord::sort_key);
        for record in code {
            match record {
                PatchRecord::Call(p) => snapshot.calls.push(p),
                PatchRecord::RelativeCall(p) => snapshot.relative_calls.push(p),
                PatchRecord::Method(_) | PatchRecord::Type(_) => {}
            }
        }

        snapshot.methods = self.methods.iter().map(|(_, p)| *p).collect();
        snapshot
            .methods
            .sort_by_key(|p| (p.referrer, p.literal_offset));
        snapshot.types = self.types.iter().map(|(_, p)| *p).collect();
        snapshot.types.sort_by_key(|p| (p.referrer, p.literal_offset));
        snapshot
    }
}
