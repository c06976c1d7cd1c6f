//! Ahead-of-time compilation driver for managed bytecode.
//!
//! This module sits between the runtime's type system and a machine code backend:
//!
//! - [`crate::metadata`] - identities and the [`TypeSystem`](crate::TypeSystem) collaborator
//! - [`compiler`](self) - orchestration, fast-path decisions, link bookkeeping
//! - [`Codegen`] - the backend collaborator that produces machine code
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       Compilation Pipeline                       │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  CompilerDriver              Phase pipeline on a rayon pool      │
//! │    ├─ Resolve                 (every reference, per class)       │
//! │    ├─ Verify                  (class status, method verdicts)    │
//! │    ├─ InitializeClasses       (boot image only)                  │
//! │    ├─ Compile                 (at most once per method)          │
//! │    └─ PostCompile             (image classes, LinkSnapshot)      │
//! │    Each phase: fan out → join before the next one starts         │
//! │                                                                  │
//! │  FactsBuilder → Facts        Resolution and verification facts   │
//! │                               frozen before Compile              │
//! │                                                                  │
//! │  FastPathOracle              Pure decisions over Facts           │
//! │    ├─ types, strings, casts   (dex cache, access, safety)        │
//! │    ├─ field accesses          (offsets, storage, volatility)     │
//! │    └─ invokes                 (sharpening, direct pointers)      │
//! │                                                                  │
//! │  Output structures           Written only during Compile         │
//! │    ├─ BlobStore               (deduplicated code and tables)     │
//! │    ├─ PatchLedger             (deferred address fix-ups)         │
//! │    ├─ ArtifactTables          (class status, compiled methods)   │
//! │    └─ TrampolineTable         (helper entrypoint slots)          │
//! │                                                                  │
//! │  EventLog / Summary          Outcome tracking and diagnostics    │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

mod codegen;
mod dedupe;
mod driver;
mod events;
mod facts;
mod options;
mod oracle;
mod patches;
mod profile;
mod stats;
mod summary;
mod tables;
mod target;
mod trampolines;

pub use codegen::{Codegen, CodegenContext, CodegenOutput, CodegenRequest, PatchRequest};
pub use dedupe::{BlobCategory, BlobHandle, BlobStore, DedupeSet, DedupeStats, DeduplicatedBlob};
pub use driver::{CompilerDriver, LinkSnapshot, Phase};
pub use events::{Event, EventBuilder, EventKind, EventLog};
pub use facts::{Facts, FactsBuilder, ResolutionOutcome, UnresolvedReference};
pub use options::{CompilationMode, CompilerOptions, ProfileOptions};
pub use oracle::{
    Decision, DirectPointer, EmbeddedType, FastPathOracle, InstanceFieldInfo, InvokeFlags,
    InvokeInfo, SiteDecision, StaticFieldInfo, TypeAccess,
};
pub use patches::{
    CallPatch, MethodPatch, PatchLedger, PatchRecord, PatchSnapshot, RelativeCallPatch, TypePatch,
};
pub use profile::{ProfileEntries, ProfileEntry, ProfileGate};
pub use stats::{OracleStats, OracleStatsSnapshot};
pub use summary::Summary;
pub use tables::{ArtifactTables, CompiledClassRecord, CompiledMethodRecord};
pub use target::{InstructionSet, TargetPolicy};
pub use trampolines::{EntrypointId, TrampolineTable};
