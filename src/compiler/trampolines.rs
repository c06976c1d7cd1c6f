//! Entrypoint trampoline table.
//!
//! On targets with a short relative branch range, generated code cannot reach runtime helpers
//! with a single branch. Instead every helper gets a slot in a small table of stubs placed near
//! the code, and calls branch to the slot. The [`TrampolineTable`] hands out those slots: dense,
//! zero-based, in the order entrypoints are first requested, and stable for the lifetime of the
//! table.
//!
//! The first request for an entrypoint wins its slot. With several workers the table layout
//! therefore follows worker scheduling; a single-threaded run reproduces it exactly.

use std::{collections::hash_map::Entry, fmt, sync::Mutex};

use rustc_hash::FxHashMap;

use crate::{
    compiler::target::{InstructionSet, TargetPolicy},
    Error, Result,
};

/// A runtime helper entrypoint, identified by its offset from the thread register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntrypointId(pub u32);

impl fmt::Display for EntrypointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ep@{:#x}", self.0)
    }
}

#[derive(Debug, Default)]
struct TableState {
    slots: FxHashMap<EntrypointId, u32>,
    entries: Vec<EntrypointId>,
}

/// Dense, deduplicated slots for runtime helper entrypoints.
#[derive(Debug, Default)]
pub struct TrampolineTable {
    state: Mutex<TableState>,
}

impl TrampolineTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the slot of `id`, assigning the next free slot on first request.
    pub fn add_entrypoint(&self, id: EntrypointId) -> u32 {
        let mut guard = lock!(self.state);
        let state = &mut *guard;
        let next = state.entries.len() as u32;
        match state.slots.entry(id) {
            Entry::Occupied(slot) => *slot.get(),
            Entry::Vacant(slot) => {
                slot.insert(next);
                state.entries.push(id);
                next
            }
        }
    }

    /// Returns the slot of `id` without assigning one.
    #[must_use]
    pub fn slot(&self, id: EntrypointId) -> Option<u32> {
        lock!(self.state).slots.get(&id).copied()
    }

    /// Number of distinct entrypoints.
    #[must_use]
    pub fn table_size(&self) -> usize {
        lock!(self.state).entries.len()
    }

    /// Size of the rendered table in bytes.
    #[must_use]
    pub fn table_size_in_bytes(&self, policy: &TargetPolicy) -> usize {
        self.table_size() * policy.trampoline_slot_size
    }

    /// Entrypoints in slot order.
    #[must_use]
    pub fn entries(&self) -> Vec<EntrypointId> {
        lock!(self.state).entries.clone()
    }

    /// Maximum distance between generated code and the next copy of the table.
    ///
    /// `None` means the target reaches every helper directly and needs no islands.
    #[must_use]
    pub fn max_island_spacing(policy: &TargetPolicy) -> Option<u64> {
        policy.max_island_spacing()
    }

    /// Renders the table as machine code, one stub per slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSupported`] if the target has no trampolines or an entrypoint offset
    /// does not fit the stub encoding.
    pub fn render(&self, policy: &TargetPolicy) -> Result<Vec<u8>> {
        let entries = self.entries();
        match policy.instruction_set {
            InstructionSet::Thumb2 => {
                let mut code = Vec::with_capacity(entries.len() * policy.trampoline_slot_size);
                for id in entries {
                    code.extend_from_slice(&thumb2_load_pc(id)?);
                }
                Ok(code)
            }
            other => Err(Error::NotSupported(format!(
                "no entrypoint trampolines for {other}"
            ))),
        }
    }
}

/// Encodes `ldr.w pc, [r9, #offset]`, the thread register being r9.
fn thumb2_load_pc(id: EntrypointId) -> Result<[u8; 4]> {
    if id.0 > 0xfff {
        return Err(Error::NotSupported(format!(
            "{id} is out of range for a thumb2 trampoline"
        )));
    }
    let instr: u32 = 0xf8d9_f000 | id.0;
    // T32 stores the high halfword first, each halfword little endian
    Ok([
        (instr >> 16) as u8,
        (instr >> 24) as u8,
        instr as u8,
        (instr >> 8) as u8,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    const E1: EntrypointId = EntrypointId(0x100);
    const E2: EntrypointId = EntrypointId(0x104);
    const E3: EntrypointId = EntrypointId(0x108);

    #[test]
    fn test_serialized_requests() {
        let table = TrampolineTable::new();
        let slots: Vec<u32> = [E1, E2, E1, E3]
            .into_iter()
            .map(|id| table.add_entrypoint(id))
            .collect();
        assert_eq!(slots, vec![0, 1, 0, 2]);
        assert_eq!(table.table_size(), 3);
        assert_eq!(table.entries(), vec![E1, E2, E3]);
        assert_eq!(table.slot(E3), Some(2));
        assert_eq!(table.slot(EntrypointId(0x200)), None);
    }

    #[test]
    fn test_concurrent_requests_share_slots() {
        let table = Arc::new(TrampolineTable::new());
        // E1 is requested before the race starts
        assert_eq!(table.add_entrypoint(E1), 0);

        let workers: Vec<_> = [vec![E1, E2], vec![E2, E1, E3], vec![E3, E1]]
            .into_iter()
            .map(|requests| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    requests
                        .into_iter()
                        .map(|id| (id, table.add_entrypoint(id)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let results: Vec<(EntrypointId, u32)> = workers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect();

        assert_eq!(table.table_size(), 3);
        for (id, slot) in results {
            assert_eq!(table.slot(id), Some(slot));
        }
        assert_eq!(table.slot(E1), Some(0));
        let mut slots: Vec<u32> = [E2, E3].iter().filter_map(|id| table.slot(*id)).collect();
        slots.sort_unstable();
        assert_eq!(slots, vec![1, 2]);
    }

    #[test]
    fn test_render_thumb2() {
        let table = TrampolineTable::new();
        table.add_entrypoint(EntrypointId(0x1c4));
        let policy = InstructionSet::Thumb2.policy();

        let code = table.render(&policy).unwrap();
        // ldr.w pc, [r9, #0x1c4] = f8d9 f1c4
        assert_eq!(code, vec![0xd9, 0xf8, 0xc4, 0xf1]);
        assert_eq!(table.table_size_in_bytes(&policy), 4);
    }

    #[test]
    fn test_render_rejects_other_targets_and_large_offsets() {
        let table = TrampolineTable::new();
        table.add_entrypoint(E1);
        assert!(matches!(
            table.render(&InstructionSet::Arm64.policy()),
            Err(Error::NotSupported(_))
        ));

        table.add_entrypoint(EntrypointId(0x1000));
        assert!(table.render(&InstructionSet::Thumb2.policy()).is_err());
    }

    #[test]
    fn test_island_spacing() {
        assert_eq!(
            TrampolineTable::max_island_spacing(&InstructionSet::Thumb2.policy()),
            Some(15 * 1024 * 1024)
        );
        assert_eq!(
            TrampolineTable::max_island_spacing(&InstructionSet::X86_64.policy()),
            None
        );
    }
}
