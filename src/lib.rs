// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! # aotscope
//!
//! A whole-program ahead-of-time compilation driver for managed bytecode modules.
//!
//! Given a set of loaded modules, `aotscope` drives resolution, verification, optional
//! eager class initialization and parallel per-method code generation, and then assembles
//! the linking metadata a downstream image writer needs: patch records, a deduplicated blob
//! store and a compact entrypoint trampoline table.
//!
//! The crate owns the orchestration and the shared state. Everything that depends on a concrete
//! runtime is injected through two collaborator traits:
//!
//! - [`TypeSystem`] answers resolution, hierarchy, verification and initialization questions.
//! - [`Codegen`] turns one method (plus the fast-path decisions for every access inside it)
//!   into machine code and its auxiliary tables.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────── CompilerDriver ───────────────────────────────┐
//! │ Resolve ─▶ Verify ─▶ InitializeClasses (boot image) ─▶ Compile ─▶ PostCompile │
//! └───────┬───────────────────────────┬───────────────────────────────┬──────────┘
//!         │ frozen Facts              │ FastPathOracle                 │ LinkSnapshot
//!         ▼                           ▼                                ▼
//!   TypeSystem (external)     Codegen (external)    ArtifactTables · PatchLedger
//!                                                   BlobStore · TrampolineTable
//! ```
//!
//! Phases are separated by full barriers. Resolution and verification facts are frozen into an
//! immutable [`compiler::Facts`] value before the first compile task starts, so no compile task
//! can observe a half-resolved reference.
//!
//! # Example
//!
//! ```rust,ignore
//! use aotscope::prelude::*;
//!
//! let options = CompilerOptions::application(InstructionSet::Thumb2);
//! let driver = CompilerDriver::new(options, &type_system, &codegen)?;
//! let summary = driver.compile_all(&modules, &ClassLoaderContext::new("app"))?;
//! println!("{summary}");
//!
//! let snapshot = driver.link_snapshot().expect("run finished");
//! for patch in &snapshot.call_patches {
//!     // hand over to the image writer
//! }
//! # Ok::<(), aotscope::Error>(())
//! ```

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]

#[macro_use]
pub(crate) mod macros;

pub(crate) mod error;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
pub mod prelude;

/// Identities and the collaborator-facing model of loaded bytecode.
///
/// This module contains the value types the driver uses to talk about modules, classes, methods
/// and the references inside method bodies, plus the [`TypeSystem`] trait through which all
/// resolution and verification facts enter the driver.
///
/// # Key Types
///
/// - [`metadata::reference::ClassReference`] / [`metadata::reference::MethodReference`] - keys
///   into every shared table
/// - [`metadata::model::ClassDef`] - a class and the access sites of its methods
/// - [`metadata::flags::ClassStatus`] - the class initialization lattice
pub mod metadata;

/// The compilation core: orchestration, fast-path decisions and link bookkeeping.
///
/// # Key Components
///
/// - [`compiler::CompilerDriver`] - runs the phase pipeline over a worker pool
/// - [`compiler::FastPathOracle`] - decides which accesses can skip runtime checks
/// - [`compiler::BlobStore`] - content-addressable storage for generated artifacts
/// - [`compiler::PatchLedger`] - deferred address fix-ups for the writer
/// - [`compiler::TrampolineTable`] - dense slots for runtime helper entrypoints
/// - [`compiler::ProfileGate`] - profile-driven skip policy
pub mod compiler;

/// Utility functions shared across the crate.
pub mod utils;

/// `aotscope` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `aotscope` Error type
///
/// Fatal conditions (setup failures, table contract violations) and the errors returned by the
/// single-method entry point. Per-method failures inside a bulk run are recorded rather than
/// returned.
pub use error::Error;

pub use compiler::{Codegen, CompilerDriver, CompilerOptions, Summary};
pub use metadata::typesystem::TypeSystem;
