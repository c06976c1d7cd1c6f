//! End-of-run statistics.
//!
//! Every number in a [`Summary`] is derived from state the driver already keeps: method outcomes
//! and class events from the [`EventLog`](crate::compiler::EventLog), reference counts from the
//! frozen facts and sizes from the output structures. Nothing is tracked separately.

use std::{fmt, time::Duration};

use strum::IntoEnumIterator;

use crate::compiler::{
    dedupe::BlobCategory, driver::CompilerDriver, events::EventKind, facts::Facts,
    stats::OracleStatsSnapshot,
};

/// Outcome counters of a [`CompilerDriver::compile_all`] run.
#[derive(Debug, Clone, Default)]
pub struct Summary {
    /// Number of classes with a recorded status
    pub classes: usize,
    /// Methods that produced code
    pub methods_compiled: usize,
    /// Methods skipped by the profile gate
    pub methods_skipped: usize,
    /// Abstract methods and other methods without a body
    pub methods_without_code: usize,
    /// Methods the verifier rejected
    pub verification_rejected: usize,
    /// Methods the backend failed on
    pub codegen_failed: usize,
    /// References resolved before compilation
    pub references_resolved: usize,
    /// References that stayed unresolved
    pub references_unresolved: usize,
    /// Classes initialized at compile time
    pub classes_initialized: usize,
    /// Classes whose constructors end with a store barrier
    pub constructor_barriers: usize,
    /// Distinct blobs across all categories
    pub unique_blobs: usize,
    /// Recorded patches
    pub patches: usize,
    /// Trampoline slots
    pub trampolines: usize,
    /// Fast-path decision counters
    pub oracle: OracleStatsSnapshot,
    /// Wall time of the run
    pub elapsed: Duration,
}

impl Summary {
    pub(crate) fn collect(driver: &CompilerDriver<'_>, facts: &Facts, elapsed: Duration) -> Self {
        let events = driver.events();
        let counts = events.count_by_kind();
        let get = |kind: EventKind| counts.get(&kind).copied().unwrap_or(0);
        let blobs = driver.blobs();

        Summary {
            classes: driver.tables().class_count(),
            methods_compiled: get(EventKind::MethodCompiled),
            methods_skipped: get(EventKind::MethodSkipped),
            methods_without_code: get(EventKind::MethodWithoutCode),
            verification_rejected: get(EventKind::VerificationRejected),
            codegen_failed: get(EventKind::CodegenFailed),
            references_resolved: facts.resolved_count(),
            references_unresolved: facts.unresolved_count(),
            classes_initialized: get(EventKind::ClassInitialized),
            constructor_barriers: get(EventKind::ConstructorBarrierRequired),
            unique_blobs: BlobCategory::iter()
                .map(|category| blobs.unique_count(category))
                .sum(),
            patches: driver.patches().len(),
            trampolines: driver.trampolines().table_size(),
            oracle: driver.stats().snapshot(),
            elapsed,
        }
    }

    /// Methods that were meant to be compiled but were not.
    #[must_use]
    pub fn methods_failed(&self) -> usize {
        self.verification_rejected + self.codegen_failed
    }

    /// Writes the summary to the log.
    pub fn log(&self) {
        log::info!("{self}");
        if self.methods_failed() > 0 {
            log::warn!(
                "{} methods failed ({} rejected by the verifier, {} in codegen)",
                self.methods_failed(),
                self.verification_rejected,
                self.codegen_failed
            );
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} methods compiled in {} classes ({:?})",
            self.methods_compiled, self.classes, self.elapsed
        )?;

        let mut parts = Vec::new();
        if self.methods_skipped > 0 {
            parts.push(format!("{} skipped", self.methods_skipped));
        }
        if self.methods_without_code > 0 {
            parts.push(format!("{} without code", self.methods_without_code));
        }
        if self.verification_rejected > 0 {
            parts.push(format!("{} rejected", self.verification_rejected));
        }
        if self.codegen_failed > 0 {
            parts.push(format!("{} failed", self.codegen_failed));
        }
        if !parts.is_empty() {
            write!(f, ", {}", parts.join(", "))?;
        }

        write!(
            f,
            "\n{} references resolved, {} unresolved",
            self.references_resolved, self.references_unresolved
        )?;
        if self.classes_initialized > 0 {
            write!(f, ", {} classes initialized", self.classes_initialized)?;
        }
        write!(
            f,
            "\n{} unique blobs, {} patches, {} trampolines",
            self.unique_blobs, self.patches, self.trampolines
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let summary = Summary {
            classes: 3,
            methods_compiled: 10,
            methods_skipped: 2,
            codegen_failed: 1,
            references_resolved: 40,
            references_unresolved: 4,
            unique_blobs: 12,
            patches: 5,
            trampolines: 2,
            ..Summary::default()
        };
        let text = summary.to_string();
        assert!(text.starts_with("10 methods compiled in 3 classes"));
        assert!(text.contains(", 2 skipped, 1 failed"));
        assert!(!text.contains("rejected"));
        assert!(text.contains("40 references resolved, 4 unresolved"));
        assert!(text.ends_with("12 unique blobs, 5 patches, 2 trampolines"));
        assert_eq!(summary.methods_failed(), 1);
    }
}
