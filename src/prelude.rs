//! # aotscope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the aotscope library. Import this module to get quick access to everything needed to
//! configure and run a compilation.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all aotscope operations
pub use crate::Error;

/// The result type used throughout aotscope
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// Runs the phase pipeline and owns the output of a compilation
pub use crate::compiler::{CompilerDriver, LinkSnapshot, Phase, Summary};

/// Run configuration
pub use crate::compiler::{
    CompilationMode, CompilerOptions, InstructionSet, ProfileOptions, TargetPolicy,
};

/// Profile-driven skip policy
pub use crate::compiler::{ProfileEntries, ProfileGate};

// ================================================================================================
// Collaborators
// ================================================================================================

/// Source of resolution, verification and initialization facts
pub use crate::metadata::typesystem::TypeSystem;

/// Machine code backend and the types it exchanges with the driver
pub use crate::compiler::{
    Codegen, CodegenContext, CodegenOutput, CodegenRequest, Decision, DirectPointer, InvokeFlags,
    PatchRequest, SiteDecision,
};

// ================================================================================================
// Metadata Model
// ================================================================================================

/// Identities of modules, classes, methods and indexed references
pub use crate::metadata::reference::{
    ClassReference, FieldIndex, InvokeKind, MethodReference, ModuleId, StringIndex, TypeIndex,
};

/// Class and member flags, class status lattice
pub use crate::metadata::flags::{ClassFlags, ClassStatus, MemberFlags};

/// Definitions and resolution results exchanged with the type system
pub use crate::metadata::model::{
    AccessSite, ClassDef, ClassInfo, ClassLoaderContext, ClassVerification, CodeBody,
    ImagePointers, MethodDef, MethodVerification, ResolvedField, ResolvedMethod, SiteKind,
    VerifiedMethod,
};

// ================================================================================================
// Output Structures
// ================================================================================================

/// Deduplicated blobs, patches, tables and trampolines
pub use crate::compiler::{
    ArtifactTables, BlobCategory, BlobHandle, BlobStore, CallPatch, CompiledMethodRecord,
    EntrypointId, MethodPatch, PatchLedger, RelativeCallPatch, TrampolineTable, TypePatch,
};

/// Diagnostics
pub use crate::compiler::{Event, EventKind, EventLog, OracleStatsSnapshot};
