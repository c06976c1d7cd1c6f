//! Utility functions shared across the crate.

pub mod hash;

pub use hash::hash_blob;
