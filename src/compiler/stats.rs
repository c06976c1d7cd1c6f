//! Fast-path statistics.
//!
//! Every oracle decision bumps a counter here. The counters use relaxed atomics: they are only
//! reported, never used to decide anything, so a slightly stale read is fine.

use std::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};

use strum::{EnumCount, IntoEnumIterator};

use crate::{compiler::oracle::InvokeFlags, metadata::reference::InvokeKind};

type PerKind = [AtomicUsize; InvokeKind::COUNT];

fn per_kind() -> PerKind {
    std::array::from_fn(|_| AtomicUsize::new(0))
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn load_per_kind(counters: &PerKind) -> [usize; InvokeKind::COUNT] {
    std::array::from_fn(|i| counters[i].load(Ordering::Relaxed))
}

/// Lock-free counters of fast-path decisions.
#[derive(Debug)]
pub struct OracleStats {
    types_in_dex_cache: AtomicUsize,
    types_not_in_dex_cache: AtomicUsize,
    strings_in_dex_cache: AtomicUsize,
    strings_not_in_dex_cache: AtomicUsize,
    resolved_types: AtomicUsize,
    unresolved_types: AtomicUsize,
    resolved_instance_fields: AtomicUsize,
    unresolved_instance_fields: AtomicUsize,
    resolved_local_static_fields: AtomicUsize,
    resolved_static_fields: AtomicUsize,
    unresolved_static_fields: AtomicUsize,
    type_based_devirtualization: AtomicUsize,
    safe_casts: AtomicUsize,
    not_safe_casts: AtomicUsize,
    resolved_methods: PerKind,
    unresolved_methods: PerKind,
    virtual_made_direct: PerKind,
    direct_calls_to_boot: PerKind,
    direct_methods_to_boot: PerKind,
}

impl Default for OracleStats {
    fn default() -> Self {
        Self::new()
    }
}

impl OracleStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            types_in_dex_cache: AtomicUsize::new(0),
            types_not_in_dex_cache: AtomicUsize::new(0),
            strings_in_dex_cache: AtomicUsize::new(0),
            strings_not_in_dex_cache: AtomicUsize::new(0),
            resolved_types: AtomicUsize::new(0),
            unresolved_types: AtomicUsize::new(0),
            resolved_instance_fields: AtomicUsize::new(0),
            unresolved_instance_fields: AtomicUsize::new(0),
            resolved_local_static_fields: AtomicUsize::new(0),
            resolved_static_fields: AtomicUsize::new(0),
            unresolved_static_fields: AtomicUsize::new(0),
            type_based_devirtualization: AtomicUsize::new(0),
            safe_casts: AtomicUsize::new(0),
            not_safe_casts: AtomicUsize::new(0),
            resolved_methods: per_kind(),
            unresolved_methods: per_kind(),
            virtual_made_direct: per_kind(),
            direct_calls_to_boot: per_kind(),
            direct_methods_to_boot: per_kind(),
        }
    }

    pub(crate) fn type_in_dex_cache(&self, in_cache: bool) {
        if in_cache {
            bump(&self.types_in_dex_cache);
        } else {
            bump(&self.types_not_in_dex_cache);
        }
    }

    pub(crate) fn string_in_dex_cache(&self, in_cache: bool) {
        if in_cache {
            bump(&self.strings_in_dex_cache);
        } else {
            bump(&self.strings_not_in_dex_cache);
        }
    }

    pub(crate) fn type_access(&self, without_checks: bool) {
        if without_checks {
            bump(&self.resolved_types);
        } else {
            bump(&self.unresolved_types);
        }
    }

    pub(crate) fn instance_field(&self, fast: bool) {
        if fast {
            bump(&self.resolved_instance_fields);
        } else {
            bump(&self.unresolved_instance_fields);
        }
    }

    pub(crate) fn static_field(&self, fast: bool, local: bool) {
        match (fast, local) {
            (true, true) => bump(&self.resolved_local_static_fields),
            (true, false) => bump(&self.resolved_static_fields),
            (false, _) => bump(&self.unresolved_static_fields),
        }
    }

    pub(crate) fn safe_cast(&self, safe: bool) {
        if safe {
            bump(&self.safe_casts);
        } else {
            bump(&self.not_safe_casts);
        }
    }

    /// Counts one invoke decision under the call site's original kind.
    pub(crate) fn invoke(&self, kind: InvokeKind, flags: InvokeFlags) {
        let i = kind.index();
        if flags.is_empty() {
            bump(&self.unresolved_methods[i]);
            return;
        }
        bump(&self.resolved_methods[i]);
        if flags.contains(InvokeFlags::VIRTUAL_MADE_DIRECT) {
            bump(&self.virtual_made_direct[i]);
            if flags.contains(InvokeFlags::PRECISE_TYPE_DEVIRTUALIZATION) {
                bump(&self.type_based_devirtualization);
            }
        }
        if flags.contains(InvokeFlags::DIRECT_CALL_TO_BOOT) {
            bump(&self.direct_calls_to_boot[i]);
        }
        if flags.contains(InvokeFlags::DIRECT_METHOD_TO_BOOT) {
            bump(&self.direct_methods_to_boot[i]);
        }
    }

    /// Copies the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> OracleStatsSnapshot {
        let load = |counter: &AtomicUsize| counter.load(Ordering::Relaxed);
        OracleStatsSnapshot {
            types_in_dex_cache: load(&self.types_in_dex_cache),
            types_not_in_dex_cache: load(&self.types_not_in_dex_cache),
            strings_in_dex_cache: load(&self.strings_in_dex_cache),
            strings_not_in_dex_cache: load(&self.strings_not_in_dex_cache),
            resolved_types: load(&self.resolved_types),
            unresolved_types: load(&self.unresolved_types),
            resolved_instance_fields: load(&self.resolved_instance_fields),
            unresolved_instance_fields: load(&self.unresolved_instance_fields),
            resolved_local_static_fields: load(&self.resolved_local_static_fields),
            resolved_static_fields: load(&self.resolved_static_fields),
            unresolved_static_fields: load(&self.unresolved_static_fields),
            type_based_devirtualization: load(&self.type_based_devirtualization),
            safe_casts: load(&self.safe_casts),
            not_safe_casts: load(&self.not_safe_casts),
            resolved_methods: load_per_kind(&self.resolved_methods),
            unresolved_methods: load_per_kind(&self.unresolved_methods),
            virtual_made_direct: load_per_kind(&self.virtual_made_direct),
            direct_calls_to_boot: load_per_kind(&self.direct_calls_to_boot),
            direct_methods_to_boot: load_per_kind(&self.direct_methods_to_boot),
        }
    }
}

/// Point-in-time copy of [`OracleStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(missing_docs)]
pub struct OracleStatsSnapshot {
    pub types_in_dex_cache: usize,
    pub types_not_in_dex_cache: usize,
    pub strings_in_dex_cache: usize,
    pub strings_not_in_dex_cache: usize,
    pub resolved_types: usize,
    pub unresolved_types: usize,
    pub resolved_instance_fields: usize,
    pub unresolved_instance_fields: usize,
    pub resolved_local_static_fields: usize,
    pub resolved_static_fields: usize,
    pub unresolved_static_fields: usize,
    pub type_based_devirtualization: usize,
    pub safe_casts: usize,
    pub not_safe_casts: usize,
    pub resolved_methods: [usize; InvokeKind::COUNT],
    pub unresolved_methods: [usize; InvokeKind::COUNT],
    pub virtual_made_direct: [usize; InvokeKind::COUNT],
    pub direct_calls_to_boot: [usize; InvokeKind::COUNT],
    pub direct_methods_to_boot: [usize; InvokeKind::COUNT],
}

impl OracleStatsSnapshot {
    /// Resolved invokes of one kind.
    #[must_use]
    pub fn resolved_invokes(&self, kind: InvokeKind) -> usize {
        self.resolved_methods[kind.index()]
    }

    /// Unresolved invokes of one kind.
    #[must_use]
    pub fn unresolved_invokes(&self, kind: InvokeKind) -> usize {
        self.unresolved_methods[kind.index()]
    }

    /// Fast decisions across all categories.
    #[must_use]
    pub fn fast_paths(&self) -> usize {
        self.resolved_types
            + self.resolved_instance_fields
            + self.resolved_local_static_fields
            + self.resolved_static_fields
            + self.resolved_methods.iter().sum::<usize>()
    }

    /// Slow decisions across all categories.
    #[must_use]
    pub fn slow_paths(&self) -> usize {
        self.unresolved_types
            + self.unresolved_instance_fields
            + self.unresolved_static_fields
            + self.unresolved_methods.iter().sum::<usize>()
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

fn ratio_line(
    f: &mut fmt::Formatter<'_>,
    what: &str,
    yes: usize,
    yes_label: &str,
    no: usize,
    no_label: &str,
) -> fmt::Result {
    let total = yes + no;
    writeln!(
        f,
        "{what}: {:.1}% ({yes}) {yes_label}, {:.1}% ({no}) {no_label}",
        percent(yes, total),
        percent(no, total)
    )
}

impl fmt::Display for OracleStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        ratio_line(
            f,
            "types",
            self.types_in_dex_cache,
            "in cache",
            self.types_not_in_dex_cache,
            "not in cache",
        )?;
        ratio_line(
            f,
            "strings",
            self.strings_in_dex_cache,
            "in cache",
            self.strings_not_in_dex_cache,
            "not in cache",
        )?;
        ratio_line(
            f,
            "type accesses",
            self.resolved_types,
            "without checks",
            self.unresolved_types,
            "checked",
        )?;
        ratio_line(
            f,
            "instance fields",
            self.resolved_instance_fields,
            "fast",
            self.unresolved_instance_fields,
            "slow",
        )?;
        ratio_line(
            f,
            "static fields",
            self.resolved_local_static_fields + self.resolved_static_fields,
            "fast",
            self.unresolved_static_fields,
            "slow",
        )?;
        ratio_line(
            f,
            "casts",
            self.safe_casts,
            "proven safe",
            self.not_safe_casts,
            "checked",
        )?;
        for kind in InvokeKind::iter() {
            let i = kind.index();
            ratio_line(
                f,
                &format!("{kind} invokes"),
                self.resolved_methods[i],
                "resolved",
                self.unresolved_methods[i],
                "unresolved",
            )?;
            if self.virtual_made_direct[i] > 0 {
                writeln!(
                    f,
                    "{kind} invokes made direct: {}",
                    self.virtual_made_direct[i]
                )?;
            }
            if self.direct_calls_to_boot[i] > 0 || self.direct_methods_to_boot[i] > 0 {
                writeln!(
                    f,
                    "{kind} invokes into boot image: {} code, {} method",
                    self.direct_calls_to_boot[i], self.direct_methods_to_boot[i]
                )?;
            }
        }
        write!(
            f,
            "type based devirtualization: {}",
            self.type_based_devirtualization
        )
    }
}
