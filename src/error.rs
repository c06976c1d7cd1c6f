use thiserror::Error;

use crate::{
    compiler::BlobHandle,
    metadata::reference::{ClassReference, MethodReference},
};

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Only a small part of this enum is ever returned from
/// [`CompilerDriver::compile_all`](crate::CompilerDriver::compile_all): per-method outcomes such
/// as a failed verification or a codegen error are recorded in the run's event log and
/// [`Summary`](crate::Summary) instead of aborting the run.
///
/// # Error Categories
///
/// ## Fatal Run Errors
/// - [`Error::ThreadPool`] - The worker pool could not be created
/// - [`Error::Configuration`] - The compiler options are inconsistent
/// - [`Error::DuplicateMethod`] - A compiled method was inserted twice
///
/// ## Single-Method Outcomes
/// - [`Error::MethodNotFound`] / [`Error::ClassNotFound`] - Unknown identity
/// - [`Error::VerificationFailed`] - The method was rejected by the verifier
/// - [`Error::MethodSkipped`] - The profile marked the method as cold
/// - [`Error::NoCode`] - The method has no body to compile
/// - [`Error::Codegen`] - The backend failed on the method
///
/// ## Link Bookkeeping
/// - [`Error::BlobNotFound`] - A blob handle from another store
/// - [`Error::OffsetAlreadyAssigned`] - A blob was laid out twice at different offsets
/// - [`Error::NotSupported`] - The target has no representation for the request
///
/// # Examples
///
/// ```rust,ignore
/// use aotscope::Error;
///
/// match driver.compile_one(method) {
///     Ok(record) => println!("compiled {}", record.method),
///     Err(Error::MethodSkipped(m)) => println!("{m} is cold"),
///     Err(e) => eprintln!("failed: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // Fatal run errors
    /// The worker pool could not be created.
    ///
    /// Raised before any phase starts; the run is aborted as a whole.
    #[error("Failed to create the worker pool - {0}")]
    ThreadPool(String),

    /// The compiler options are inconsistent.
    #[error("Invalid configuration - {0}")]
    Configuration(String),

    /// A compiled method record was inserted twice.
    ///
    /// The driver guarantees that every method is compiled by exactly one task. Hitting this
    /// error means that guarantee was broken, so the run must not continue with a table that
    /// silently lost one of the two records.
    #[error("Compiled method {0} was already recorded")]
    DuplicateMethod(MethodReference),

    // Single-method outcomes
    /// The method is not defined by any class the type system knows about.
    #[error("Method {0} could not be found")]
    MethodNotFound(MethodReference),

    /// The class is not known to the type system.
    #[error("Class {0} could not be found")]
    ClassNotFound(ClassReference),

    /// The verifier rejected the method.
    #[error("Method {0} failed verification")]
    VerificationFailed(MethodReference),

    /// The loaded profile marks the method as cold.
    #[error("Method {0} was skipped by the profile")]
    MethodSkipped(MethodReference),

    /// The method is abstract and has nothing to compile.
    #[error("Method {0} has no code")]
    NoCode(MethodReference),

    /// The code generator failed on the method.
    ///
    /// # Fields
    ///
    /// * `method` - The method that was being compiled
    /// * `message` - The backend's description of the failure
    #[error("Codegen failed for {method}: {message}")]
    Codegen {
        /// The method that was being compiled
        method: MethodReference,
        /// The backend's description of the failure
        message: String,
    },

    // Link bookkeeping
    /// The handle does not belong to this blob store.
    #[error("Blob {0} is not part of this store")]
    BlobNotFound(BlobHandle),

    /// A blob already carries a different layout offset.
    #[error("Blob {handle} is already laid out at {offset:#x}")]
    OffsetAlreadyAssigned {
        /// The blob that was laid out twice
        handle: BlobHandle,
        /// The offset recorded first
        offset: u32,
    },

    /// The requested operation has no meaning for the selected target.
    #[error("Not supported - {0}")]
    NotSupported(String),
}
