//! The code generator collaborator.
//!
//! The driver does not generate machine code. For every method that passes the profile gate and
//! verification it builds a [`CodegenRequest`] carrying the method, its verification facts and
//! the oracle's decision for each access site, and hands it to a [`Codegen`] implementation. The
//! backend answers with a [`CodegenOutput`]; the driver interns the byte sections, records the
//! patches and stores the compiled method.
//!
//! Backends run on many workers at once and must not keep per-method state between calls.

use crate::{
    compiler::{
        oracle::SiteDecision,
        target::{InstructionSet, TargetPolicy},
        trampolines::{EntrypointId, TrampolineTable},
    },
    metadata::{
        model::{MethodDef, VerifiedMethod},
        reference::{ClassReference, InvokeKind, MethodReference, TypeIndex},
    },
    Result,
};

/// Everything a backend needs to compile one method.
#[derive(Debug)]
pub struct CodegenRequest<'a> {
    /// The method to compile
    pub method: &'a MethodDef,
    /// The class that defines the method
    pub class: ClassReference,
    /// Verification facts; `None` when the verifier recorded none for this method
    pub verified: Option<&'a VerifiedMethod>,
    /// Fast-path decision for every access site, in site order
    pub decisions: &'a [SiteDecision],
    /// The method is a constructor of a class with final instance fields and must end with a
    /// store barrier
    pub requires_constructor_barrier: bool,
    /// Target instruction set
    pub instruction_set: InstructionSet,
}

/// Shared services a backend may use while compiling.
pub struct CodegenContext<'a> {
    trampolines: &'a TrampolineTable,
    policy: TargetPolicy,
}

impl<'a> CodegenContext<'a> {
    pub(crate) fn new(trampolines: &'a TrampolineTable, policy: TargetPolicy) -> Self {
        CodegenContext {
            trampolines,
            policy,
        }
    }

    /// Returns the trampoline slot for a runtime helper, assigning one on first use.
    pub fn entrypoint_slot(&self, id: EntrypointId) -> u32 {
        self.trampolines.add_entrypoint(id)
    }

    /// Properties of the target.
    #[must_use]
    pub fn policy(&self) -> &TargetPolicy {
        &self.policy
    }
}

/// A location in the generated code that the linker has to fix up.
///
/// The referrer is always the method being compiled; the driver fills it in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchRequest {
    /// An absolute call target
    Call {
        /// The called method
        target: MethodReference,
        /// Dispatch kind of the call
        target_kind: InvokeKind,
        /// Byte offset of the literal inside the code
        literal_offset: u32,
    },
    /// A pc-relative call target
    RelativeCall {
        /// The called method
        target: MethodReference,
        /// Dispatch kind of the call
        target_kind: InvokeKind,
        /// Byte offset of the literal inside the code
        literal_offset: u32,
        /// Offset the relative displacement is measured from
        pc_relative_offset: i32,
    },
    /// A method object reference
    Method {
        /// The referenced method
        target: MethodReference,
        /// Byte offset of the literal inside the code
        literal_offset: u32,
    },
    /// A class object reference
    Type {
        /// The referenced type, as indexed by the referrer's module
        target_type: TypeIndex,
        /// Byte offset of the literal inside the code
        literal_offset: u32,
    },
}

/// The artifacts a backend produced for one method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodegenOutput {
    /// Machine code
    pub code: Vec<u8>,
    /// Native to bytecode pc mapping
    pub mapping_table: Option<Vec<u8>>,
    /// Variable location map
    pub vmap_table: Option<Vec<u8>>,
    /// GC root map
    pub gc_map: Option<Vec<u8>>,
    /// Call frame information
    pub cfi: Option<Vec<u8>>,
    /// Size of the frame in bytes
    pub frame_size_in_bytes: u32,
    /// Core registers saved by the prologue
    pub core_spill_mask: u32,
    /// Floating point registers saved by the prologue
    pub fp_spill_mask: u32,
    /// Locations to fix up at link time
    pub patches: Vec<PatchRequest>,
}

impl CodegenOutput {
    /// Creates output holding only machine code.
    #[must_use]
    pub fn new(code: Vec<u8>) -> Self {
        CodegenOutput {
            code,
            ..Self::default()
        }
    }

    /// Adds the pc mapping table.
    #[must_use]
    pub fn with_mapping_table(mut self, table: Vec<u8>) -> Self {
        self.mapping_table = Some(table);
        self
    }

    /// Adds the variable location map.
    #[must_use]
    pub fn with_vmap_table(mut self, table: Vec<u8>) -> Self {
        self.vmap_table = Some(table);
        self
    }

    /// Adds the GC map.
    #[must_use]
    pub fn with_gc_map(mut self, map: Vec<u8>) -> Self {
        self.gc_map = Some(map);
        self
    }

    /// Adds call frame information.
    #[must_use]
    pub fn with_cfi(mut self, cfi: Vec<u8>) -> Self {
        self.cfi = Some(cfi);
        self
    }

    /// Sets the frame layout.
    #[must_use]
    pub fn with_frame(mut self, frame_size_in_bytes: u32, core_spill_mask: u32, fp_spill_mask: u32) -> Self {
        self.frame_size_in_bytes = frame_size_in_bytes;
        self.core_spill_mask = core_spill_mask;
        self.fp_spill_mask = fp_spill_mask;
        self
    }

    /// Adds a patch request.
    #[must_use]
    pub fn with_patch(mut self, patch: PatchRequest) -> Self {
        self.patches.push(patch);
        self
    }
}

/// A machine code backend.
pub trait Codegen: Send + Sync {
    /// Name of the backend, for logs.
    fn name(&self) -> &str {
        "codegen"
    }

    /// Compiles one method.
    ///
    /// # Errors
    ///
    /// Any error is recorded as a codegen failure of this method; the run continues.
    fn compile(&self, request: &CodegenRequest<'_>, context: &CodegenContext<'_>) -> Result<CodegenOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::reference::ModuleId;

    #[test]
    fn test_output_builder() {
        let target = MethodReference::new(ModuleId(0), 4);
        let output = CodegenOutput::new(vec![0x70, 0x47])
            .with_mapping_table(vec![1])
            .with_gc_map(vec![2])
            .with_frame(32, 0x4de0, 0)
            .with_patch(PatchRequest::Method {
                target,
                literal_offset: 8,
            });

        assert_eq!(output.code, vec![0x70, 0x47]);
        assert_eq!(output.mapping_table, Some(vec![1]));
        assert_eq!(output.vmap_table, None);
        assert_eq!(output.gc_map, Some(vec![2]));
        assert_eq!(output.frame_size_in_bytes, 32);
        assert_eq!(output.core_spill_mask, 0x4de0);
        assert_eq!(output.patches.len(), 1);
    }

    #[test]
    fn test_context_hands_out_slots() {
        let table = TrampolineTable::new();
        let context = CodegenContext::new(&table, InstructionSet::Thumb2.policy());
        assert_eq!(context.entrypoint_slot(EntrypointId(0x40)), 0);
        assert_eq!(context.entrypoint_slot(EntrypointId(0x44)), 1);
        assert_eq!(context.entrypoint_slot(EntrypointId(0x40)), 0);
        assert_eq!(context.policy().trampoline_slot_size, 4);
    }
}
