//! Event logging for compilation runs.
//!
//! Every noteworthy outcome of a run is recorded here: phase boundaries, references that did not
//! resolve, verifier rejections, methods compiled or skipped, codegen failures. The
//! [`Summary`](crate::Summary) of a run is derived from these events rather than tracked
//! separately, and callers can inspect the log for per-method diagnostics.
//!
//! # Architecture
//!
//! - [`Event`] - A single recorded event
//! - [`EventLog`] - Append-only, thread-safe collection of events
//! - [`EventBuilder`] - Fluent API for creating events
//!
//! # Example
//!
//! ```rust,ignore
//! use aotscope::compiler::{EventKind, EventLog};
//!
//! let log = EventLog::new();
//! log.record(EventKind::CodegenFailed)
//!     .method(method)
//!     .message("register allocation failed");
//! assert!(log.has(EventKind::CodegenFailed));
//! ```

use std::{collections::HashMap, fmt};

use crate::{
    compiler::driver::Phase,
    metadata::reference::{ClassReference, MethodReference},
};

/// Categories of events that can be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A phase started.
    PhaseStarted,
    /// A phase completed.
    PhaseCompleted,

    /// A type, field, method or string reference did not resolve.
    ReferenceUnresolved,
    /// A class went through the verifier.
    ClassVerified,
    /// The verifier rejected a method.
    VerificationRejected,
    /// A class was initialized at compile time.
    ClassInitialized,
    /// A class could not be initialized at compile time.
    ClassInitializationFailed,
    /// A class was added to the image class set.
    ImageClassAdded,
    /// A class needs a store barrier at the end of its constructors.
    ConstructorBarrierRequired,

    /// A method was compiled.
    MethodCompiled,
    /// A method was skipped by the profile.
    MethodSkipped,
    /// A method has nothing to compile.
    MethodWithoutCode,
    /// The backend failed on a method.
    CodegenFailed,

    /// Warning (something unexpected but recoverable).
    Warning,
    /// Error (something failed).
    Error,
}

impl EventKind {
    /// Returns a human-readable description of this event kind.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::PhaseStarted => "phase started",
            Self::PhaseCompleted => "phase completed",
            Self::ReferenceUnresolved => "reference unresolved",
            Self::ClassVerified => "class verified",
            Self::VerificationRejected => "verification rejected",
            Self::ClassInitialized => "class initialized",
            Self::ClassInitializationFailed => "class initialization failed",
            Self::ImageClassAdded => "image class added",
            Self::ConstructorBarrierRequired => "constructor barrier required",
            Self::MethodCompiled => "method compiled",
            Self::MethodSkipped => "method skipped",
            Self::MethodWithoutCode => "method without code",
            Self::CodegenFailed => "codegen failed",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A single logged event.
#[derive(Debug, Clone)]
pub struct Event {
    /// The type of event.
    pub kind: EventKind,
    /// The method the event concerns (if applicable).
    pub method: Option<MethodReference>,
    /// The class the event concerns (if applicable).
    pub class: Option<ClassReference>,
    /// The phase the event was recorded in.
    pub phase: Option<Phase>,
    /// Human-readable description.
    pub message: String,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.kind)?;
        if let Some(phase) = self.phase {
            write!(f, " {phase}")?;
        }
        if let Some(method) = self.method {
            write!(f, " {method}")?;
        } else if let Some(class) = self.class {
            write!(f, " {class}")?;
        }
        write!(f, " {}", self.message)
    }
}

/// Builder for creating events with a fluent API.
///
/// Created by [`EventLog::record`]. The event is automatically added
/// to the log when the builder is dropped.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    kind: EventKind,
    method: Option<MethodReference>,
    class: Option<ClassReference>,
    phase: Option<Phase>,
    message: Option<String>,
}

impl<'a> EventBuilder<'a> {
    fn new(log: &'a EventLog, kind: EventKind) -> Self {
        Self {
            log,
            kind,
            method: None,
            class: None,
            phase: None,
            message: None,
        }
    }

    /// Sets the method the event concerns.
    pub fn method(mut self, method: MethodReference) -> Self {
        self.method = Some(method);
        self
    }

    /// Sets the class the event concerns.
    pub fn class(mut self, class: ClassReference) -> Self {
        self.class = Some(class);
        self
    }

    /// Sets the phase the event was recorded in.
    pub fn phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    /// Sets a custom message describing the event.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        let message = self
            .message
            .take()
            .unwrap_or_else(|| self.kind.description().to_string());

        self.log.events.push(Event {
            kind: self.kind,
            method: self.method.take(),
            class: self.class.take(),
            phase: self.phase.take(),
            message,
        });
    }
}

/// Collection of events from a compilation run.
///
/// This type is thread-safe: events can be appended concurrently from
/// multiple workers using shared references (`&self`). Events from one worker
/// appear in the order that worker recorded them; events from different
/// workers interleave arbitrarily.
#[derive(Debug)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    /// Creates an empty event log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: boxcar::Vec::new(),
        }
    }

    /// Starts building a new event of the given kind.
    ///
    /// The event is automatically added when the builder is dropped.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder::new(self, kind)
    }

    /// Returns true if any event of the given kind exists.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.iter().any(|e| e.kind == kind)
    }

    /// Counts events of the given kind.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.filter_kind(kind).count()
    }

    /// Returns an iterator over all events.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, e)| e)
    }

    /// Returns an iterator over events of a specific kind.
    pub fn filter_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(move |e| e.kind == kind)
    }

    /// Returns an iterator over events for a specific method.
    pub fn filter_method(&self, method: MethodReference) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(move |e| e.method == Some(method))
    }

    /// Counts events grouped by kind.
    #[must_use]
    pub fn count_by_kind(&self) -> HashMap<EventKind, usize> {
        let mut counts = HashMap::new();
        for event in self.iter() {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        counts
    }
}
