//! Target instruction sets and the policies the driver derives from them.
//!
//! The driver is instruction-set agnostic. The only target-specific knowledge it needs is how
//! wide pointers are and how far a short relative branch can reach, since that decides whether
//! generated code can call runtime helpers through a nearby trampoline table.

use std::fmt;

use strum::EnumIter;

/// The instruction set generated code is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, EnumIter)]
pub enum InstructionSet {
    /// 32-bit ARM, A32 encoding
    Arm,
    /// 32-bit ARM, T32 encoding
    #[default]
    Thumb2,
    /// 64-bit ARM
    Arm64,
    /// 32-bit x86
    X86,
    /// 64-bit x86
    X86_64,
    /// 32-bit MIPS
    Mips,
}

impl InstructionSet {
    /// Returns the addressing policy for this instruction set.
    #[must_use]
    pub fn policy(self) -> TargetPolicy {
        match self {
            Self::Thumb2 => TargetPolicy {
                instruction_set: self,
                pointer_size: 4,
                trampoline_slot_size: 4,
                relative_branch_range: Some(16 * MIB),
            },
            Self::Arm | Self::X86 | Self::Mips => TargetPolicy {
                instruction_set: self,
                pointer_size: 4,
                trampoline_slot_size: 0,
                relative_branch_range: None,
            },
            Self::Arm64 | Self::X86_64 => TargetPolicy {
                instruction_set: self,
                pointer_size: 8,
                trampoline_slot_size: 0,
                relative_branch_range: None,
            },
        }
    }
}

impl fmt::Display for InstructionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Arm => "arm",
            Self::Thumb2 => "thumb2",
            Self::Arm64 => "arm64",
            Self::X86 => "x86",
            Self::X86_64 => "x86_64",
            Self::Mips => "mips",
        };
        f.write_str(name)
    }
}

const MIB: u64 = 1024 * 1024;

/// Target-specific parameters of the link bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetPolicy {
    /// The instruction set this policy describes
    pub instruction_set: InstructionSet,
    /// Pointer width in bytes
    pub pointer_size: usize,
    /// Size in bytes of one rendered trampoline slot, zero when the target has none
    pub trampoline_slot_size: usize,
    /// Reach of a short relative branch in bytes, `None` when calls are not range limited
    pub relative_branch_range: Option<u64>,
}

impl TargetPolicy {
    /// Maximum distance between generated code and the trampoline island it branches to.
    ///
    /// Stays one MiB below the branch range to leave room for the island itself. Returns `None`
    /// when the target can reach any address and needs no islands.
    #[must_use]
    pub fn max_island_spacing(&self) -> Option<u64> {
        self.relative_branch_range
            .map(|range| range.saturating_sub(MIB))
    }

    /// Returns true if generated code calls helpers through trampoline slots.
    #[must_use]
    pub fn uses_trampolines(&self) -> bool {
        self.trampoline_slot_size != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_thumb2_island_spacing() {
        let policy = InstructionSet::Thumb2.policy();
        assert_eq!(policy.max_island_spacing(), Some(15 * MIB));
        assert!(policy.max_island_spacing().unwrap() < policy.relative_branch_range.unwrap());
        assert!(policy.uses_trampolines());
    }

    #[test]
    fn test_unlimited_targets_need_no_islands() {
        for isa in InstructionSet::iter().filter(|isa| *isa != InstructionSet::Thumb2) {
            let policy = isa.policy();
            assert_eq!(policy.max_island_spacing(), None, "{isa}");
            assert!(!policy.uses_trampolines());
        }
    }

    #[test]
    fn test_pointer_sizes() {
        assert_eq!(InstructionSet::Arm64.policy().pointer_size, 8);
        assert_eq!(InstructionSet::X86_64.policy().pointer_size, 8);
        assert_eq!(InstructionSet::Thumb2.policy().pointer_size, 4);
    }
}
